//! Hyprland backend with three tiers, fastest first:
//!
//! 1. `hyprland` crate client call;
//! 2. the compositor's request socket, spoken to directly;
//! 3. `hyprctl -j activewindow` as a child process.
//!
//! Tier 2 is skipped for the current call only when the socket cannot be
//! reached; a socket that answers badly produces an error without falling
//! through to tier 3.

use super::r#trait::{SupportedEnvironment, WindowContextBackend};
use crate::ctx_error;
use crate::debug_if_enabled;
use crate::error::Result;
use crate::events::WindowContext;
use crate::utils::find_executable;
use hyprland::shared::HyprDataActiveOptional;
use std::ffi::{OsStr, OsString};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

pub const SUPPORTED_ENVIRONMENTS: &[SupportedEnvironment] =
    &[SupportedEnvironment::wayland("hyprland")];

const INSTANCE_SIGNATURE_VAR: &str = "HYPRLAND_INSTANCE_SIGNATURE";
const ACTIVE_WINDOW_REQUEST: &[u8] = b"j/activewindow";
const SOCKET_TIMEOUT: Duration = Duration::from_millis(500);

pub const MISSING_CLASS: &str = "ERR_NO_WDW_CLASS";
pub const MISSING_TITLE: &str = "ERR_NO_WDW_TITLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Library,
    Socket,
    Cli,
}

/// Высокоуровневый клиент Hyprland (уровень 1)
pub trait HyprClient: Send {
    /// `Ok(None)` - ни одно окно не в фокусе
    fn active_window(&self) -> Result<Option<WindowContext>>;
}

/// Клиент на основе крейта `hyprland`
pub struct HyprlandCrateClient;

impl HyprClient for HyprlandCrateClient {
    fn active_window(&self) -> Result<Option<WindowContext>> {
        check_instance_signature(std::env::var_os(INSTANCE_SIGNATURE_VAR).as_deref())?;
        let client = hyprland::data::Client::get_active()?;
        Ok(client.map(|c| WindowContext::new(c.class, c.title)))
    }
}

/// Без сигнатуры экземпляра или с сигнатурой не в UTF-8 крейт паникует при поиске сокета
fn check_instance_signature(signature: Option<&OsStr>) -> Result<()> {
    match signature.map(OsStr::to_str) {
        Some(Some(_)) => Ok(()),
        Some(None) => Err(ctx_error!(transport, "{} не в UTF-8", INSTANCE_SIGNATURE_VAR)),
        None => Err(ctx_error!(transport, "{} не задан", INSTANCE_SIGNATURE_VAR)),
    }
}

/// Откуда брать путь к сокету запросов (уровень 2)
#[derive(Debug, Clone)]
pub enum SocketLocator {
    /// По HYPRLAND_INSTANCE_SIGNATURE и XDG_RUNTIME_DIR
    Environment,
    Fixed(Option<PathBuf>),
}

impl SocketLocator {
    fn locate(&self) -> Option<PathBuf> {
        match self {
            SocketLocator::Fixed(path) => path.clone(),
            SocketLocator::Environment => {
                let signature = std::env::var_os(INSTANCE_SIGNATURE_VAR)?;
                let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR");
                Some(request_socket_path(&signature, runtime_dir.as_deref()))
            }
        }
    }
}

/// Hyprland >= 0.40 держит сокеты в $XDG_RUNTIME_DIR/hypr, старые версии - в /tmp/hypr
pub fn request_socket_path(signature: &OsStr, runtime_dir: Option<&OsStr>) -> PathBuf {
    if let Some(dir) = runtime_dir {
        let path = Path::new(dir).join("hypr").join(signature).join(".socket.sock");
        if path.exists() {
            return path;
        }
    }
    Path::new("/tmp/hypr").join(signature).join(".socket.sock")
}

/// Разобрать JSON ответа activewindow; `{}` означает отсутствие окна в фокусе
pub fn parse_active_window(raw: &[u8]) -> Result<WindowContext> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    let object = value
        .as_object()
        .ok_or_else(|| ctx_error!(protocol, "ответ activewindow не является объектом"))?;

    if object.is_empty() {
        return Ok(WindowContext::empty());
    }

    let field = |name: &str, fallback: &str| {
        object
            .get(name)
            .and_then(serde_json::Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };
    Ok(WindowContext::new(
        field("class", MISSING_CLASS),
        field("title", MISSING_TITLE),
    ))
}

fn exchange(mut stream: UnixStream, response_limit: usize) -> Result<WindowContext> {
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
    stream.write_all(ACTIVE_WINDOW_REQUEST)?;

    // Hyprland закрывает соединение после ответа
    let mut response = Vec::new();
    (&mut stream)
        .take((response_limit as u64).saturating_add(1))
        .read_to_end(&mut response)?;
    if response.len() > response_limit {
        return Err(ctx_error!(protocol, "ответ сокета длиннее {} байт", response_limit));
    }
    parse_active_window(&response)
}

/// CLI-утилита Hyprland (уровень 3)
pub struct CliTool {
    binary: String,
    /// None - брать PATH процесса в момент вызова
    search_path: Option<OsString>,
    spawns: usize,
}

impl CliTool {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            search_path: None,
            spawns: 0,
        }
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Сколько раз утилита действительно запускалась
    pub fn spawns(&self) -> usize {
        self.spawns
    }

    fn run(&mut self) -> Result<WindowContext> {
        let search_path = self.search_path.clone().or_else(|| std::env::var_os("PATH"));
        let binary = find_executable(&self.binary, search_path.as_deref())
            .ok_or_else(|| ctx_error!(transport, "{} не найден в PATH", self.binary))?;

        self.spawns += 1;
        let output = Command::new(&binary).args(["-j", "activewindow"]).output()?;
        if !output.status.success() {
            return Err(ctx_error!(
                protocol,
                "{} завершился с ошибкой: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        parse_active_window(&output.stdout)
    }
}

pub struct HyprlandBackend {
    library: Box<dyn HyprClient>,
    locator: SocketLocator,
    /// Путь к сокету запросов; сбрасывается при любом сбое сокета
    socket_path: Option<PathBuf>,
    cli: CliTool,
    response_limit: usize,
    last_tier: Option<Tier>,
}

impl HyprlandBackend {
    pub fn new(cli_binary: &str, response_limit: usize) -> Self {
        Self::with_parts(
            Box::new(HyprlandCrateClient),
            SocketLocator::Environment,
            CliTool::new(cli_binary),
            response_limit,
        )
    }

    pub fn with_parts(
        library: Box<dyn HyprClient>,
        locator: SocketLocator,
        cli: CliTool,
        response_limit: usize,
    ) -> Self {
        Self {
            library,
            locator,
            socket_path: None,
            cli,
            response_limit,
            last_tier: None,
        }
    }

    /// Уровень, обслуживший последний опрос
    pub fn last_tier(&self) -> Option<Tier> {
        self.last_tier
    }

    pub fn cli(&self) -> &CliTool {
        &self.cli
    }

    fn set_tier(&mut self, tier: Tier) {
        if self.last_tier != Some(tier) {
            info!("Hyprland: контекст окна берётся через {:?}", tier);
        }
        self.last_tier = Some(tier);
    }

    fn open_socket(&mut self) -> Option<UnixStream> {
        if self.socket_path.is_none() {
            self.socket_path = self.locator.locate();
        }
        let Some(path) = self.socket_path.as_ref() else {
            debug!("Hyprland: {} не задан, сокет пропускаем", INSTANCE_SIGNATURE_VAR);
            return None;
        };

        match UnixStream::connect(path) {
            Ok(stream) => Some(stream),
            Err(e) => {
                debug!("Hyprland: сокет {:?} недоступен: {}", path, e);
                self.socket_path = None;
                None
            }
        }
    }
}

impl WindowContextBackend for HyprlandBackend {
    fn name(&self) -> &'static str {
        "hyprland"
    }

    fn query_once(&mut self) -> Result<WindowContext> {
        match self.library.active_window() {
            Ok(context) => {
                self.set_tier(Tier::Library);
                return Ok(context.unwrap_or_else(WindowContext::empty));
            }
            Err(e) => debug_if_enabled!("Hyprland: клиентский вызов не удался: {}", e),
        }

        if let Some(stream) = self.open_socket() {
            self.set_tier(Tier::Socket);
            let result = exchange(stream, self.response_limit);
            if result.is_err() {
                self.socket_path = None;
            }
            return result;
        }

        self.set_tier(Tier::Cli);
        self.cli.run()
    }
}
