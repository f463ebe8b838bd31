use super::r#trait::{SupportedEnvironment, WindowContextBackend};
use super::session_bus::{DBusEndpoint, SessionBus};
use crate::ctx_error;
use crate::error::Result;
use crate::events::WindowContext;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SUPPORTED_ENVIRONMENTS: &[SupportedEnvironment] =
    &[SupportedEnvironment::wayland("kde")];

/// Helper-сервис, которому KWin-скрипт сообщает о смене активного окна
pub const HELPER_ENDPOINT: DBusEndpoint = DBusEndpoint {
    destination: "io.github.winctx.Helper",
    path: "/io/github/winctx/Helper",
    interface: "io.github.winctx.Helper",
};

/// Активное окно в терминах KWin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveWindow {
    pub caption: String,
    pub resource_class: String,
    /// Аналога в других окружениях нет, используется только в логах
    pub resource_name: String,
}

pub trait HelperInterface: Send {
    fn active_window(&self) -> Result<ActiveWindow>;
}

pub trait HelperConnector: Send {
    /// Найти интерфейс helper-сервиса; ошибка, если сервис не отвечает
    fn resolve(&mut self) -> Result<Box<dyn HelperInterface>>;
}

struct DBusHelperInterface {
    bus: SessionBus,
}

impl HelperInterface for DBusHelperInterface {
    fn active_window(&self) -> Result<ActiveWindow> {
        let (caption, resource_class, resource_name): (String, String, String) =
            self.bus.call(&HELPER_ENDPOINT, "GetActiveWindow")?;
        Ok(ActiveWindow {
            caption,
            resource_class,
            resource_name,
        })
    }
}

pub struct DBusHelperConnector {
    bus: SessionBus,
}

impl DBusHelperConnector {
    pub fn new() -> Self {
        Self {
            bus: SessionBus::new(),
        }
    }
}

impl Default for DBusHelperConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl HelperConnector for DBusHelperConnector {
    fn resolve(&mut self) -> Result<Box<dyn HelperInterface>> {
        self.bus.ping(&HELPER_ENDPOINT)?;
        Ok(Box::new(DBusHelperInterface {
            bus: self.bus.clone(),
        }))
    }
}

pub struct KdePlasmaBackend {
    connector: Box<dyn HelperConnector>,
    interface: Option<Box<dyn HelperInterface>>,
}

impl KdePlasmaBackend {
    /// Блокируется, пока helper-сервис не ответит
    pub fn connect(retry_interval: Duration) -> Self {
        Self::connect_with(Box::new(DBusHelperConnector::new()), retry_interval)
    }

    /// Повторять `resolve` с фиксированным интервалом без ограничения числа попыток
    pub fn connect_with(mut connector: Box<dyn HelperConnector>, retry_interval: Duration) -> Self {
        let mut attempt: u64 = 0;
        let interface = loop {
            attempt += 1;
            match connector.resolve() {
                Ok(interface) => break interface,
                Err(e) if attempt == 1 => {
                    warn!(
                        "KDE: helper-сервис {} недоступен ({}). Запустите `winctx kde-helper`; повтор каждые {:?}",
                        HELPER_ENDPOINT.destination, e, retry_interval
                    );
                }
                Err(e) => {
                    debug!("KDE: попытка {} подключения к helper-сервису не удалась: {}", attempt, e);
                }
            }
            std::thread::sleep(retry_interval);
        };

        info!("KDE: helper-сервис доступен (попыток: {})", attempt);
        Self {
            connector,
            interface: Some(interface),
        }
    }

    fn reresolve_and_query(&mut self) -> Result<ActiveWindow> {
        let interface = self.connector.resolve()?;
        let window = interface.active_window()?;
        self.interface = Some(interface);
        Ok(window)
    }
}

impl WindowContextBackend for KdePlasmaBackend {
    fn name(&self) -> &'static str {
        "kde"
    }

    fn query_once(&mut self) -> Result<WindowContext> {
        let first = match &self.interface {
            Some(interface) => interface.active_window(),
            None => Err(ctx_error!(transport, "интерфейс helper-сервиса не разрешён")),
        };

        let window = match first {
            Ok(window) => window,
            Err(e) => {
                debug!("KDE: ошибка helper-сервиса ({}), переразрешаем интерфейс", e);
                self.interface = None;
                self.reresolve_and_query()?
            }
        };

        debug!(
            resource_name = %window.resource_name,
            "KDE: активное окно '{}' ({})",
            window.caption,
            window.resource_class
        );
        Ok(WindowContext::new(window.resource_class, window.caption))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Default)]
    struct Shared {
        resolves: AtomicUsize,
        calls: AtomicUsize,
        /// Сколько ближайших resolve завершатся ошибкой
        resolve_failures: AtomicUsize,
        /// Сколько ближайших вызовов GetActiveWindow завершатся ошибкой
        call_failures: AtomicUsize,
        window: Mutex<ActiveWindow>,
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    struct FakeInterface(Arc<Shared>);

    impl HelperInterface for FakeInterface {
        fn active_window(&self) -> Result<ActiveWindow> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.0.call_failures) {
                return Err(ctx_error!(protocol, "UnknownObject"));
            }
            Ok(self.0.window.lock().clone())
        }
    }

    struct FakeConnector(Arc<Shared>);

    impl HelperConnector for FakeConnector {
        fn resolve(&mut self) -> Result<Box<dyn HelperInterface>> {
            self.0.resolves.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.0.resolve_failures) {
                return Err(ctx_error!(transport, "ServiceUnknown"));
            }
            Ok(Box::new(FakeInterface(self.0.clone())))
        }
    }

    fn shared(resolve_failures: usize) -> Arc<Shared> {
        let shared = Arc::new(Shared::default());
        shared.resolve_failures.store(resolve_failures, Ordering::SeqCst);
        *shared.window.lock() = ActiveWindow {
            caption: "main.rs - Kate".to_string(),
            resource_class: "org.kde.kate".to_string(),
            resource_name: "kate".to_string(),
        };
        shared
    }

    #[test]
    fn constructor_retries_until_third_attempt() {
        let shared = shared(2);
        let interval = Duration::from_millis(10);
        let started = Instant::now();

        let _backend = KdePlasmaBackend::connect_with(Box::new(FakeConnector(shared.clone())), interval);

        assert_eq!(shared.resolves.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= interval * 2);
    }

    #[test]
    fn constructor_does_not_give_up() {
        let shared = shared(40);
        let _backend = KdePlasmaBackend::connect_with(
            Box::new(FakeConnector(shared.clone())),
            Duration::from_millis(1),
        );
        assert_eq!(shared.resolves.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn fields_are_mapped_from_kwin_names() {
        let shared = shared(0);
        let mut backend =
            KdePlasmaBackend::connect_with(Box::new(FakeConnector(shared.clone())), Duration::from_millis(1));

        let ctx = backend.query_once().unwrap();
        assert_eq!(ctx, WindowContext::new("org.kde.kate", "main.rs - Kate"));
        // Повторный опрос без изменений даёт тот же результат
        assert_eq!(backend.query_once().unwrap(), ctx);
    }

    #[test]
    fn stale_interface_is_resolved_once_and_retried() {
        let shared = shared(0);
        let mut backend =
            KdePlasmaBackend::connect_with(Box::new(FakeConnector(shared.clone())), Duration::from_millis(1));
        assert_eq!(shared.resolves.load(Ordering::SeqCst), 1);

        shared.call_failures.store(1, Ordering::SeqCst);
        let ctx = backend.query_once().unwrap();
        assert_eq!(ctx.app_class(), "org.kde.kate");
        assert_eq!(shared.resolves.load(Ordering::SeqCst), 2);
        assert_eq!(shared.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn second_failure_gives_error_and_next_query_reconnects() {
        let shared = shared(0);
        let mut backend =
            KdePlasmaBackend::connect_with(Box::new(FakeConnector(shared.clone())), Duration::from_millis(1));

        shared.call_failures.store(2, Ordering::SeqCst);
        assert!(backend.query_once().is_err());
        assert_eq!(shared.resolves.load(Ordering::SeqCst), 2);
        assert!(backend.interface.is_none());

        // Сервис вернулся: следующий опрос сам переразрешает интерфейс
        let ctx = backend.query_once().unwrap();
        assert_eq!(ctx.window_title(), "main.rs - Kate");
        assert_eq!(shared.resolves.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unreachable_service_during_query_is_error() {
        let shared = shared(0);
        let mut backend =
            KdePlasmaBackend::connect_with(Box::new(FakeConnector(shared.clone())), Duration::from_millis(1));

        shared.call_failures.store(1, Ordering::SeqCst);
        shared.resolve_failures.store(1, Ordering::SeqCst);
        assert!(backend.query_once().is_err());
        assert!(backend.interface.is_none());
    }
}
