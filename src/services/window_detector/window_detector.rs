use super::dry_run::DryRunBackend;
use super::r#trait::{EnvironmentKey, WindowContextBackend};
use super::registry;
use crate::config::Config;
use crate::error::Result;
use crate::events::WindowContext;
use crate::utils::DiagnosticThrottle;
use std::time::Duration;
use tracing::{info, warn};

/// Единственная точка получения контекста активного окна.
///
/// Владеет ровно одним бэкендом, выбранным по окружению при создании.
pub struct WindowContextProvider {
    backend: Box<dyn WindowContextBackend>,
    throttle: DiagnosticThrottle,
    failures: u64,
}

impl WindowContextProvider {
    /// Выбрать бэкенд по окружению и создать его.
    ///
    /// Неподдерживаемое окружение - ошибка конфигурации. Для KDE вызов
    /// блокируется, пока не ответит helper-сервис.
    pub fn new(key: &EnvironmentKey, config: &Config) -> Result<Self> {
        let kind = registry::lookup(key)?;
        info!("Окружение {}: используем бэкенд {}", key, kind);
        Ok(Self::with_backend(kind.build(config), config.diagnostics_interval()))
    }

    /// Окружение берётся из конфигурации, а недостающее определяется по переменным сессии
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = EnvironmentKey::with_overrides(
            config.window.session_type.as_deref(),
            config.window.desktop.as_deref(),
        )?;
        Self::new(&key, config)
    }

    pub fn dry_run(config: &Config) -> Self {
        Self::with_backend(Box::new(DryRunBackend::new()), config.diagnostics_interval())
    }

    pub fn with_backend(backend: Box<dyn WindowContextBackend>, diagnostics_interval: Duration) -> Self {
        Self {
            backend,
            throttle: DiagnosticThrottle::new(diagnostics_interval),
            failures: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Опросить бэкенд. Никогда не завершается ошибкой: любой сбой
    /// превращается в `WindowContext::error()`.
    pub fn query(&mut self) -> WindowContext {
        match self.backend.query_once() {
            Ok(context) => {
                if self.failures > 0 {
                    info!(
                        "Бэкенд {} снова отвечает (сбоев подряд: {})",
                        self.backend.name(),
                        self.failures
                    );
                    self.failures = 0;
                    self.throttle.reset(self.backend.name());
                }
                context
            }
            Err(e) => {
                self.failures += 1;
                if self.throttle.allow(self.backend.name()) {
                    warn!(
                        "Бэкенд {} не смог определить активное окно: {} (сбоев подряд: {})",
                        self.backend.name(),
                        e,
                        self.failures
                    );
                }
                WindowContext::error()
            }
        }
    }
}

impl Drop for WindowContextProvider {
    fn drop(&mut self) {
        info!("WindowContextProvider ({}) завершает работу", self.backend.name());
    }
}
