use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use winctx::services::kwin_helper;
use winctx::services::window_detector::registry;
use winctx::{Config, EnvironmentKey, WindowContext, WindowContextProvider, WindowEvent};

#[derive(Parser, Debug)]
#[command(name = "winctx")]
#[command(about = "Определение активного окна (класс и заголовок) на X11 и Wayland")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "winctx.toml")]
    config: String,

    /// Эмулировать смену окон без рабочего стола
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (по умолчанию из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    /// Тип сессии вместо XDG_SESSION_TYPE: x11 | wayland
    #[arg(long)]
    session_type: Option<String>,

    /// Рабочий стол вместо XDG_CURRENT_DESKTOP: gnome | kde | hyprland | wlroots | sway
    #[arg(long)]
    desktop: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Следить за активным окном и писать события смены фокуса в лог
    Watch {
        /// Вывести один снимок в JSON и выйти
        #[arg(long)]
        once: bool,
    },
    /// Запустить D-Bus helper-сервис для KDE Plasma
    KdeHelper,
    /// Показать поддерживаемые окружения и выбранный бэкенд
    Backends,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if args.session_type.is_some() {
        config.window.session_type = args.session_type.clone();
    }
    if args.desktop.is_some() {
        config.window.desktop = args.desktop.clone();
    }
    config.validate()?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, &config.logging.format)?;

    info!("Запуск winctx v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    match args.command.unwrap_or(Command::Watch { once: false }) {
        Command::Watch { once } => {
            if args.dry_run {
                warn!("Режим сухого запуска - рабочий стол не опрашивается");
            }
            let provider = if args.dry_run {
                WindowContextProvider::dry_run(&config)
            } else {
                // Для KDE создание блокируется до ответа helper-сервиса
                tokio::task::block_in_place(|| WindowContextProvider::from_config(&config))?
            };

            if once {
                print_snapshot(provider)?;
            } else {
                watch(provider, config.polling_interval()).await;
            }
        }
        Command::KdeHelper => kwin_helper::serve().await?,
        Command::Backends => list_backends(&config),
    }

    info!("winctx завершил работу");
    Ok(())
}

fn print_snapshot(mut provider: WindowContextProvider) -> Result<()> {
    let context = tokio::task::block_in_place(|| provider.query());
    println!("{}", serde_json::to_string(&context)?);
    Ok(())
}

async fn watch(mut provider: WindowContextProvider, polling_interval: Duration) {
    info!(
        "Отслеживание активного окна через {} (интервал {:?})",
        provider.backend_name(),
        polling_interval
    );

    let mut ticker = tokio::time::interval(polling_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut current: Option<WindowContext> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let context = tokio::task::block_in_place(|| provider.query());
                if let Some(event) = WindowEvent::between(current.as_ref(), &context) {
                    info!("{}", event);
                    current = Some(context);
                }
            }
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                    Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
                }
                break;
            }
        }
    }
}

fn list_backends(config: &Config) {
    println!("Поддерживаемые окружения:");
    for environment in registry::supported_environments() {
        println!("    {}", environment);
    }

    let key = EnvironmentKey::with_overrides(
        config.window.session_type.as_deref(),
        config.window.desktop.as_deref(),
    );
    match key {
        Ok(key) => match registry::lookup(&key) {
            Ok(kind) => println!("Текущее окружение {}: бэкенд {}", key, kind),
            Err(e) => println!("Текущее окружение {}: {}", key, e),
        },
        Err(e) => println!("{}", e),
    }
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if format == "full" {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }

    Ok(())
}
