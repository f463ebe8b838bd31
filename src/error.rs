use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Ошибка конфигурации: {0}")]
    Configuration(String),

    #[error("Транспорт недоступен: {0}")]
    TransportUnavailable(String),

    #[error("Ошибка протокола: {0}")]
    Protocol(String),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка D-Bus: {0}")]
    DBus(#[from] zbus::Error),

    #[error("Не удалось подключиться к X серверу: {0}")]
    X11Connect(#[from] x11rb::errors::ConnectError),

    #[error("Соединение с X сервером потеряно: {0}")]
    X11Connection(#[from] x11rb::errors::ConnectionError),

    #[error("Ошибка запроса X11: {0}")]
    X11Reply(#[from] x11rb::errors::ReplyError),

    #[error("Не удалось подключиться к Wayland: {0}")]
    WaylandConnect(#[from] wayland_client::ConnectError),

    #[error("Ошибка диспетчеризации Wayland: {0}")]
    WaylandDispatch(#[from] wayland_client::DispatchError),

    #[error("Ошибка реестра Wayland: {0}")]
    WaylandGlobals(#[from] wayland_client::globals::GlobalError),

    #[error("Ошибка Hyprland: {0}")]
    Hyprland(#[from] hyprland::shared::HyprError),

    #[error("Ошибка разбора JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ContextError {
    /// Ошибки конфигурации фатальны и не повторяются
    pub fn is_configuration(&self) -> bool {
        matches!(self, ContextError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! ctx_error {
    (configuration, $($arg:tt)*) => {
        $crate::error::ContextError::Configuration(format!($($arg)*))
    };
    (transport, $($arg:tt)*) => {
        $crate::error::ContextError::TransportUnavailable(format!($($arg)*))
    };
    (protocol, $($arg:tt)*) => {
        $crate::error::ContextError::Protocol(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_builds_matching_variants() {
        let err = ctx_error!(configuration, "нет бэкенда для {}", "wayland/unknown");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("wayland/unknown"));

        let err = ctx_error!(transport, "сокет {}", 1);
        assert!(matches!(err, ContextError::TransportUnavailable(_)));
        assert!(!err.is_configuration());

        let err = ctx_error!(protocol, "плохой ответ");
        assert!(matches!(err, ContextError::Protocol(_)));
    }
}
