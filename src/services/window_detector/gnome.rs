//! GNOME Shell on Wayland exposes the focused window only through shell
//! extensions. Three independently maintained extensions are supported; any
//! one of them being installed and enabled is enough.

use super::r#trait::{SupportedEnvironment, WindowContextBackend};
use super::session_bus::{method_error_text, DBusEndpoint, SessionBus};
use crate::ctx_error;
use crate::error::{ContextError, Result};
use crate::events::WindowContext;
use crate::utils::DiagnosticThrottle;
use serde::Deserialize;
use smallvec::SmallVec;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SUPPORTED_ENVIRONMENTS: &[SupportedEnvironment] =
    &[SupportedEnvironment::wayland("gnome")];

const GNOME_SHELL_BUS_NAME: &str = "org.gnome.Shell";

/// Текст ошибки, которым focused-window-dbus сообщает об отсутствии окна в фокусе
const NO_WINDOW_MARKER: &str = "No window in focus";

const GUIDANCE_KEY: &str = "gnome-guidance";

/// Расширение GNOME Shell, умеющее сообщить активное окно
pub trait ShellExtension: Send {
    fn uuid(&self) -> &'static str;

    /// Страница расширения на extensions.gnome.org
    fn homepage(&self) -> &'static str;

    fn focused_window(&self) -> Result<WindowContext>;
}

/// focused-window-dbus: один метод `Get`, возвращающий JSON-запись окна
pub struct FocusedWindowExtension {
    bus: SessionBus,
}

#[derive(Debug, Deserialize)]
struct FocusedWindowRecord {
    #[serde(default)]
    wm_class: String,
    #[serde(default)]
    title: String,
}

impl FocusedWindowExtension {
    const ENDPOINT: DBusEndpoint = DBusEndpoint {
        destination: GNOME_SHELL_BUS_NAME,
        path: "/org/gnome/shell/extensions/FocusedWindow",
        interface: "org.gnome.shell.extensions.FocusedWindow",
    };

    pub fn new(bus: SessionBus) -> Self {
        Self { bus }
    }
}

/// Отсутствие окна в фокусе приходит как ошибка метода с фиксированным текстом
pub fn is_no_window_error(error: &ContextError) -> bool {
    match error {
        ContextError::DBus(e) => method_error_text(e).is_some_and(|text| text.contains(NO_WINDOW_MARKER)),
        _ => false,
    }
}

/// Разобрать ответ `Get`: JSON-запись окна или ошибку "нет окна в фокусе"
fn focused_window_context(reply: Result<String>) -> Result<WindowContext> {
    let raw = match reply {
        Ok(raw) => raw,
        Err(e) if is_no_window_error(&e) => return Ok(WindowContext::empty()),
        Err(e) => return Err(e),
    };
    let record: FocusedWindowRecord = serde_json::from_str(&raw)?;
    Ok(WindowContext::new(record.wm_class, record.title))
}

impl ShellExtension for FocusedWindowExtension {
    fn uuid(&self) -> &'static str {
        "focused-window-dbus@flexagoon.com"
    }

    fn homepage(&self) -> &'static str {
        "https://extensions.gnome.org/extension/5592/focused-window-d-bus/"
    }

    fn focused_window(&self) -> Result<WindowContext> {
        focused_window_context(self.bus.call(&Self::ENDPOINT, "Get"))
    }
}

/// window-calls-extended: отдельные методы для класса и заголовка
pub struct WindowsExtExtension {
    bus: SessionBus,
}

impl WindowsExtExtension {
    const ENDPOINT: DBusEndpoint = DBusEndpoint {
        destination: GNOME_SHELL_BUS_NAME,
        path: "/org/gnome/Shell/Extensions/WindowsExt",
        interface: "org.gnome.Shell.Extensions.WindowsExt",
    };

    pub fn new(bus: SessionBus) -> Self {
        Self { bus }
    }
}

impl ShellExtension for WindowsExtExtension {
    fn uuid(&self) -> &'static str {
        "window-calls-extended@hseliger.eu"
    }

    fn homepage(&self) -> &'static str {
        "https://extensions.gnome.org/extension/4974/window-calls-extended/"
    }

    fn focused_window(&self) -> Result<WindowContext> {
        let class: String = self.bus.call(&Self::ENDPOINT, "FocusClass")?;
        let title: String = self.bus.call(&Self::ENDPOINT, "FocusTitle")?;
        Ok(WindowContext::new(class, title))
    }
}

/// xremap: метод `ActiveWindow` возвращает произвольный JSON
pub struct XremapExtension {
    bus: SessionBus,
}

impl XremapExtension {
    const ENDPOINT: DBusEndpoint = DBusEndpoint {
        destination: GNOME_SHELL_BUS_NAME,
        path: "/com/k0kubun/Xremap",
        interface: "com.k0kubun.Xremap",
    };

    pub fn new(bus: SessionBus) -> Self {
        Self { bus }
    }
}

fn json_field(blob: &serde_json::Value, field: &str) -> Result<String> {
    blob.get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ctx_error!(protocol, "в ответе xremap нет поля '{}'", field))
}

impl ShellExtension for XremapExtension {
    fn uuid(&self) -> &'static str {
        "xremap@k0kubun.com"
    }

    fn homepage(&self) -> &'static str {
        "https://extensions.gnome.org/extension/5060/xremap/"
    }

    fn focused_window(&self) -> Result<WindowContext> {
        let raw: String = self.bus.call(&Self::ENDPOINT, "ActiveWindow")?;
        let blob: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(WindowContext::new(
            json_field(&blob, "wm_class")?,
            json_field(&blob, "title")?,
        ))
    }
}

/// Порядок опроса расширений: список кандидатов и последний успешный индекс
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPreference {
    len: usize,
    last_good: Option<usize>,
}

impl ExtensionPreference {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            last_good: None,
        }
    }

    pub fn last_good(&self) -> Option<usize> {
        self.last_good
    }

    /// Начать с последнего успешного кандидата, дальше по кругу в объявленном порядке
    pub fn order(&self) -> SmallVec<[usize; 4]> {
        let start = self.last_good.unwrap_or(0);
        (0..self.len).map(|offset| (start + offset) % self.len).collect()
    }

    pub fn record_success(&mut self, index: usize) {
        self.last_good = Some(index);
    }

    pub fn record_failure(&mut self, index: usize) {
        if self.last_good == Some(index) {
            self.last_good = None;
        }
    }
}

pub struct GnomeBackend {
    extensions: Vec<Box<dyn ShellExtension>>,
    preference: ExtensionPreference,
    throttle: DiagnosticThrottle,
}

impl GnomeBackend {
    pub fn new(diagnostics_interval: Duration) -> Self {
        let bus = SessionBus::new();
        let extensions: Vec<Box<dyn ShellExtension>> = vec![
            Box::new(FocusedWindowExtension::new(bus.clone())),
            Box::new(WindowsExtExtension::new(bus.clone())),
            Box::new(XremapExtension::new(bus)),
        ];
        Self::with_extensions(extensions, diagnostics_interval)
    }

    pub fn with_extensions(
        extensions: Vec<Box<dyn ShellExtension>>,
        diagnostics_interval: Duration,
    ) -> Self {
        info!(
            "GNOME: поддерживаемые расширения: {}",
            extensions.iter().map(|e| e.uuid()).collect::<Vec<_>>().join(", ")
        );
        Self {
            preference: ExtensionPreference::new(extensions.len()),
            extensions,
            throttle: DiagnosticThrottle::new(diagnostics_interval),
        }
    }

    pub fn preference(&self) -> &ExtensionPreference {
        &self.preference
    }

    fn emit_guidance(&mut self) {
        if !self.throttle.allow(GUIDANCE_KEY) {
            return;
        }
        warn!("############################################################################");
        warn!("GNOME: ни одно совместимое расширение GNOME Shell не отвечает через D-Bus.");
        warn!("Совместимые расширения:");
        for extension in &self.extensions {
            warn!("    {}: {}", extension.uuid(), extension.homepage());
        }
        warn!("Для управления расширениями установите \"Extension Manager\" из Flathub");
        warn!("############################################################################");
    }
}

impl WindowContextBackend for GnomeBackend {
    fn name(&self) -> &'static str {
        "gnome"
    }

    fn query_once(&mut self) -> Result<WindowContext> {
        let previous = self.preference.last_good();

        for index in self.preference.order() {
            let extension = &self.extensions[index];
            match extension.focused_window() {
                Ok(context) => {
                    if previous != Some(index) {
                        info!("GNOME: контекст окна берётся из '{}'", extension.uuid());
                    }
                    self.preference.record_success(index);
                    self.throttle.reset(GUIDANCE_KEY);
                    return Ok(context);
                }
                Err(e) => {
                    if self.throttle.allow(extension.uuid()) {
                        debug!("GNOME: ошибка от расширения {}: {}", extension.uuid(), e);
                    }
                    self.preference.record_failure(index);
                }
            }
        }

        self.emit_guidance();
        Err(ctx_error!(
            transport,
            "ни одно расширение GNOME Shell не вернуло активное окно"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Focused(&'static str, &'static str),
        NoWindow,
        Fail,
    }

    struct FakeExtension {
        uuid: &'static str,
        behaviour: Arc<Mutex<Behaviour>>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ShellExtension for FakeExtension {
        fn uuid(&self) -> &'static str {
            self.uuid
        }

        fn homepage(&self) -> &'static str {
            "https://extensions.gnome.org/"
        }

        fn focused_window(&self) -> Result<WindowContext> {
            self.calls.lock().push(self.uuid);
            match *self.behaviour.lock() {
                Behaviour::Focused(class, title) => Ok(WindowContext::new(class, title)),
                Behaviour::NoWindow => Ok(WindowContext::empty()),
                Behaviour::Fail => Err(ctx_error!(transport, "{} не отвечает", self.uuid)),
            }
        }
    }

    struct Harness {
        backend: GnomeBackend,
        behaviours: Vec<Arc<Mutex<Behaviour>>>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Harness {
        fn new(initial: [Behaviour; 3]) -> Self {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let mut behaviours = Vec::new();
            let mut extensions: Vec<Box<dyn ShellExtension>> = Vec::new();
            for (uuid, behaviour) in ["A", "B", "C"].into_iter().zip(initial) {
                let behaviour = Arc::new(Mutex::new(behaviour));
                behaviours.push(behaviour.clone());
                extensions.push(Box::new(FakeExtension {
                    uuid,
                    behaviour,
                    calls: calls.clone(),
                }));
            }
            Self {
                backend: GnomeBackend::with_extensions(extensions, Duration::from_secs(60)),
                behaviours,
                calls,
            }
        }

        fn set(&self, index: usize, behaviour: Behaviour) {
            *self.behaviours[index].lock() = behaviour;
        }

        fn take_calls(&self) -> Vec<&'static str> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    #[test]
    fn order_rotates_from_last_good() {
        let mut preference = ExtensionPreference::new(3);
        assert_eq!(preference.order().as_slice(), &[0, 1, 2]);

        preference.record_success(1);
        assert_eq!(preference.order().as_slice(), &[1, 2, 0]);

        preference.record_success(2);
        assert_eq!(preference.order().as_slice(), &[2, 0, 1]);

        // Сбой не текущего кандидата предпочтение не меняет
        preference.record_failure(0);
        assert_eq!(preference.last_good(), Some(2));

        preference.record_failure(2);
        assert_eq!(preference.last_good(), None);
        assert_eq!(preference.order().as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn successful_extension_is_tried_first_next_time() {
        let mut h = Harness::new([
            Behaviour::Fail,
            Behaviour::Focused("org.gnome.Nautilus", "Home"),
            Behaviour::Focused("firefox", "Firefox"),
        ]);

        let ctx = h.backend.query_once().unwrap();
        assert_eq!(ctx, WindowContext::new("org.gnome.Nautilus", "Home"));
        assert_eq!(h.backend.preference().last_good(), Some(1));
        assert_eq!(h.take_calls(), vec!["A", "B"]);

        let again = h.backend.query_once().unwrap();
        assert_eq!(again, ctx);
        assert_eq!(h.take_calls(), vec!["B"]);
    }

    #[test]
    fn preferred_failure_rotates_to_next_candidates() {
        let mut h = Harness::new([
            Behaviour::Focused("a", "a"),
            Behaviour::Focused("b", "b"),
            Behaviour::Focused("c", "c"),
        ]);
        h.backend.preference.record_success(1);

        h.set(1, Behaviour::Fail);
        let ctx = h.backend.query_once().unwrap();
        assert_eq!(ctx, WindowContext::new("c", "c"));
        assert_eq!(h.backend.preference().last_good(), Some(2));
        assert_eq!(h.take_calls(), vec!["B", "C"]);
    }

    #[test]
    fn all_failing_returns_error_and_clears_preference() {
        let mut h = Harness::new([Behaviour::Fail, Behaviour::Fail, Behaviour::Focused("c", "c")]);

        h.backend.query_once().unwrap();
        assert_eq!(h.backend.preference().last_good(), Some(2));
        h.take_calls();

        h.set(2, Behaviour::Fail);
        assert!(h.backend.query_once().is_err());
        assert_eq!(h.backend.preference().last_good(), None);
        assert_eq!(h.take_calls(), vec!["C", "A", "B"]);

        // Следующий опрос начинается с начала списка
        assert!(h.backend.query_once().is_err());
        assert_eq!(h.take_calls(), vec!["A", "B", "C"]);
    }

    #[test]
    fn no_window_is_successful_empty_context() {
        let mut h = Harness::new([Behaviour::Fail, Behaviour::NoWindow, Behaviour::Fail]);

        let ctx = h.backend.query_once().unwrap();
        assert!(!ctx.is_error());
        assert!(ctx.is_empty());
        assert_eq!(h.backend.preference().last_good(), Some(1));
        assert_eq!(h.take_calls(), vec!["A", "B"]);
    }

    #[test]
    fn no_window_error_text_is_recognised() {
        let no_window = ContextError::DBus(zbus::Error::FDO(Box::new(zbus::fdo::Error::Failed(
            "No window in focus".to_string(),
        ))));
        assert!(is_no_window_error(&no_window));

        let other = ContextError::DBus(zbus::Error::FDO(Box::new(zbus::fdo::Error::Failed(
            "Object does not exist at path".to_string(),
        ))));
        assert!(!is_no_window_error(&other));
        assert!(!is_no_window_error(&ctx_error!(transport, "No window in focus")));
    }

    #[test]
    fn get_reply_is_turned_into_context() {
        let no_window = ContextError::DBus(zbus::Error::FDO(Box::new(zbus::fdo::Error::Failed(
            "No window in focus".to_string(),
        ))));
        let ctx = focused_window_context(Err(no_window)).unwrap();
        assert_eq!(ctx, WindowContext::empty());
        assert!(!ctx.is_error());

        let unknown_object = ContextError::DBus(zbus::Error::FDO(Box::new(
            zbus::fdo::Error::UnknownObject("/org/gnome/shell/extensions/FocusedWindow".to_string()),
        )));
        assert!(focused_window_context(Err(unknown_object)).is_err());
        assert!(focused_window_context(Err(ctx_error!(transport, "нет шины"))).is_err());

        let ctx = focused_window_context(Ok(
            r#"{"wm_class": "org.gnome.Ptyxis", "title": "Terminal"}"#.to_string(),
        ))
        .unwrap();
        assert_eq!(ctx, WindowContext::new("org.gnome.Ptyxis", "Terminal"));

        assert!(focused_window_context(Ok("not json".to_string())).is_err());
    }

    #[test]
    fn xremap_json_fields_are_required() {
        let blob: serde_json::Value =
            serde_json::from_str(r#"{"wm_class": "kitty", "title": "nvim"}"#).unwrap();
        assert_eq!(json_field(&blob, "wm_class").unwrap(), "kitty");

        let partial: serde_json::Value = serde_json::from_str(r#"{"title": "nvim"}"#).unwrap();
        assert!(json_field(&partial, "wm_class").is_err());
    }

    #[test]
    fn focused_window_record_tolerates_missing_fields() {
        let record: FocusedWindowRecord =
            serde_json::from_str(r#"{"title": "Terminal", "wm_class": "org.gnome.Ptyxis", "pid": 42}"#).unwrap();
        assert_eq!(record.wm_class, "org.gnome.Ptyxis");
        assert_eq!(record.title, "Terminal");

        let record: FocusedWindowRecord = serde_json::from_str(r#"{"title": "Terminal"}"#).unwrap();
        assert_eq!(record.wm_class, "");
    }
}
