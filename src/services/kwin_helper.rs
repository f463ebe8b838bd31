//! Helper service for KDE Plasma on Wayland.
//!
//! KWin does not publish the active window on D-Bus, so the helper claims
//! a bus name, injects a small KWin script that calls `NotifyActiveWindow`
//! on every activation, and answers `GetActiveWindow` from the last report.

use crate::error::Result;
use crate::services::window_detector::kde::{ActiveWindow, HELPER_ENDPOINT};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zbus::Connection;

const KWIN_BUS_NAME: &str = "org.kde.KWin";
const KWIN_SCRIPTING_PATH: &str = "/Scripting";
const KWIN_SCRIPTING_INTERFACE: &str = "org.kde.kwin.Scripting";
const SCRIPT_FILE_NAME: &str = "winctx-kwin.js";

/// Объект на шине: хранит последнее сообщённое KWin окно
pub struct ActiveWindowService {
    window: Arc<Mutex<ActiveWindow>>,
}

impl ActiveWindowService {
    pub fn new(window: Arc<Mutex<ActiveWindow>>) -> Self {
        Self { window }
    }
}

#[zbus::interface(name = "io.github.winctx.Helper")]
impl ActiveWindowService {
    fn notify_active_window(&self, caption: String, resource_class: String, resource_name: String) {
        debug!("KWin: активное окно '{}' ({})", caption, resource_class);
        *self.window.lock() = ActiveWindow {
            caption,
            resource_class,
            resource_name,
        };
    }

    fn get_active_window(&self) -> (String, String, String) {
        let window = self.window.lock();
        (
            window.caption.clone(),
            window.resource_class.clone(),
            window.resource_name.clone(),
        )
    }
}

/// Plasma 6 переименовала сигнал активации и свойство активного окна
pub fn is_plasma6(kde_session_version: Option<&str>) -> bool {
    kde_session_version
        .and_then(|v| v.trim().parse::<u32>().ok())
        .is_some_and(|v| v >= 6)
}

pub fn build_kwin_script(plasma6: bool) -> String {
    let (signal, active) = if plasma6 {
        ("windowActivated", "activeWindow")
    } else {
        ("clientActivated", "activeClient")
    };
    format!(
        r#"function notifyActiveWindow(client) {{
    callDBus(
        "{destination}",
        "{path}",
        "{interface}",
        "NotifyActiveWindow",
        client ? (client.caption || "") : "",
        client ? (client.resourceClass || "") : "",
        client ? (client.resourceName || "") : ""
    );
}}
workspace.{signal}.connect(notifyActiveWindow);
notifyActiveWindow(workspace.{active});
"#,
        destination = HELPER_ENDPOINT.destination,
        path = HELPER_ENDPOINT.path,
        interface = HELPER_ENDPOINT.interface,
        signal = signal,
        active = active,
    )
}

/// Файл скрипта кладётся в XDG_RUNTIME_DIR, иначе во временный каталог
pub fn script_path(runtime_dir: Option<&OsStr>) -> PathBuf {
    match runtime_dir {
        Some(dir) if !dir.is_empty() => Path::new(dir).join(SCRIPT_FILE_NAME),
        _ => std::env::temp_dir().join(SCRIPT_FILE_NAME),
    }
}

async fn kwin_scripting_call(connection: &Connection, method: &str, script: &str) -> zbus::Result<zbus::Message> {
    connection
        .call_method(
            Some(KWIN_BUS_NAME),
            KWIN_SCRIPTING_PATH,
            Some(KWIN_SCRIPTING_INTERFACE),
            method,
            &(script,),
        )
        .await
}

/// Загрузить скрипт в KWin и запустить его
async fn inject_script(connection: &Connection, path: &Path) -> Result<i32> {
    let script = path.to_string_lossy();

    // Копия от предыдущего запуска иначе продолжит слать уведомления дважды
    match kwin_scripting_call(connection, "unloadScript", &script).await {
        Ok(_) => debug!("KWin: старая копия скрипта выгружена"),
        Err(e) => debug!("KWin: выгружать нечего: {}", e),
    }

    let reply = kwin_scripting_call(connection, "loadScript", &script).await?;
    let script_id: i32 = reply.body().deserialize()?;

    connection
        .call_method(
            Some(KWIN_BUS_NAME),
            KWIN_SCRIPTING_PATH,
            Some(KWIN_SCRIPTING_INTERFACE),
            "start",
            &(),
        )
        .await?;

    Ok(script_id)
}

/// Запустить helper-сервис и обслуживать его до Ctrl+C
pub async fn serve() -> Result<()> {
    let window = Arc::new(Mutex::new(ActiveWindow::default()));

    let connection = zbus::connection::Builder::session()?
        .name(HELPER_ENDPOINT.destination)?
        .serve_at(HELPER_ENDPOINT.path, ActiveWindowService::new(window.clone()))?
        .build()
        .await?;
    info!("KDE helper: имя {} занято на сессионной шине", HELPER_ENDPOINT.destination);

    let plasma6 = is_plasma6(std::env::var("KDE_SESSION_VERSION").ok().as_deref());
    let path = script_path(std::env::var_os("XDG_RUNTIME_DIR").as_deref());
    std::fs::write(&path, build_kwin_script(plasma6))?;

    let script_id = inject_script(&connection, &path).await?;
    info!(
        "KDE helper: KWin-скрипт {:?} загружен (id {}, Plasma {})",
        path,
        script_id,
        if plasma6 { 6 } else { 5 }
    );

    tokio::signal::ctrl_c().await?;
    info!("KDE helper: получен сигнал завершения (Ctrl+C)");

    if let Err(e) = kwin_scripting_call(&connection, "unloadScript", &path.to_string_lossy()).await {
        warn!("KDE helper: не удалось выгрузить KWin-скрипт: {}", e);
    }
    if let Err(e) = std::fs::remove_file(&path) {
        debug!("KDE helper: не удалось удалить {:?}: {}", path, e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plasma_version_detection() {
        assert!(is_plasma6(Some("6")));
        assert!(is_plasma6(Some(" 7 ")));
        assert!(!is_plasma6(Some("5")));
        assert!(!is_plasma6(Some("plasma")));
        assert!(!is_plasma6(None));
    }

    #[test]
    fn script_uses_version_specific_api() {
        let plasma5 = build_kwin_script(false);
        assert!(plasma5.contains("workspace.clientActivated.connect"));
        assert!(plasma5.contains("workspace.activeClient"));

        let plasma6 = build_kwin_script(true);
        assert!(plasma6.contains("workspace.windowActivated.connect"));
        assert!(plasma6.contains("workspace.activeWindow"));
        assert!(!plasma6.contains("clientActivated"));

        for script in [plasma5, plasma6] {
            assert!(script.contains(HELPER_ENDPOINT.destination));
            assert!(script.contains(HELPER_ENDPOINT.path));
            assert!(script.contains("\"NotifyActiveWindow\""));
        }
    }

    #[test]
    fn script_path_prefers_runtime_dir() {
        assert_eq!(
            script_path(Some(OsStr::new("/run/user/1000"))),
            PathBuf::from("/run/user/1000/winctx-kwin.js")
        );
        assert_eq!(script_path(None), std::env::temp_dir().join(SCRIPT_FILE_NAME));
        assert_eq!(script_path(Some(OsStr::new(""))), std::env::temp_dir().join(SCRIPT_FILE_NAME));
    }

    #[test]
    fn service_reports_last_notification() {
        let window = Arc::new(Mutex::new(ActiveWindow::default()));
        let service = ActiveWindowService::new(window.clone());
        assert_eq!(service.get_active_window(), (String::new(), String::new(), String::new()));

        service.notify_active_window(
            "main.rs - Kate".to_string(),
            "org.kde.kate".to_string(),
            "kate".to_string(),
        );
        assert_eq!(
            service.get_active_window(),
            (
                "main.rs - Kate".to_string(),
                "org.kde.kate".to_string(),
                "kate".to_string()
            )
        );
        assert_eq!(window.lock().resource_class, "org.kde.kate");
    }
}
