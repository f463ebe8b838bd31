use crate::error::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use zbus::blocking::Connection;
use zbus::zvariant::Type;

/// Адрес D-Bus объекта: имя сервиса, путь и интерфейс
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DBusEndpoint {
    pub destination: &'static str,
    pub path: &'static str,
    pub interface: &'static str,
}

/// Лениво открываемое соединение с сессионной шиной.
///
/// Клоны разделяют одно соединение. После транспортного сбоя соединение
/// сбрасывается и открывается заново при следующем вызове.
#[derive(Clone, Default)]
pub struct SessionBus {
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SessionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn connection(&self) -> Result<Connection> {
        let mut guard = self.connection.lock();
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }

        debug!("Подключение к сессионной шине D-Bus");
        let connection = Connection::session()?;
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Сбросить соединение; следующий вызов откроет новое
    pub fn reset(&self) {
        if self.connection.lock().take().is_some() {
            debug!("Соединение с сессионной шиной сброшено");
        }
    }

    /// Вызвать метод без аргументов и разобрать ответ
    pub fn call<R>(&self, endpoint: &DBusEndpoint, method: &str) -> Result<R>
    where
        R: DeserializeOwned + Type,
    {
        let connection = self.connection()?;
        let reply = connection
            .call_method(
                Some(endpoint.destination),
                endpoint.path,
                Some(endpoint.interface),
                method,
                &(),
            )
            .inspect_err(|e| self.reset_on_transport_failure(e))?;

        let value = reply.body().deserialize::<R>()?;
        Ok(value)
    }

    /// Проверить, что сервис отвечает (org.freedesktop.DBus.Peer.Ping)
    pub fn ping(&self, endpoint: &DBusEndpoint) -> Result<()> {
        let connection = self.connection()?;
        connection
            .call_method(
                Some(endpoint.destination),
                endpoint.path,
                Some("org.freedesktop.DBus.Peer"),
                "Ping",
                &(),
            )
            .inspect_err(|e| self.reset_on_transport_failure(e))?;
        Ok(())
    }

    fn reset_on_transport_failure(&self, error: &zbus::Error) {
        if is_transport_failure(error) {
            self.reset();
        }
    }
}

/// Ошибки, после которых соединение непригодно. Ошибки удалённых методов
/// (MethodError, FDO) соединение не портят.
pub fn is_transport_failure(error: &zbus::Error) -> bool {
    matches!(
        error,
        zbus::Error::InputOutput(_) | zbus::Error::Address(_) | zbus::Error::Handshake(_)
    )
}

/// Текст ошибки удалённого метода, если это ошибка метода
pub fn method_error_text(error: &zbus::Error) -> Option<String> {
    match error {
        zbus::Error::MethodError(name, detail, _) => Some(match detail {
            Some(detail) => format!("{}: {}", name.as_str(), detail),
            None => name.as_str().to_string(),
        }),
        zbus::Error::FDO(fdo) => Some(fdo.to_string()),
        _ => None,
    }
}
