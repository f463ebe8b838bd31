use crate::error::{ContextError, Result};
use crate::events::WindowContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trait for transport-specific window context backends.
///
/// `query_once` may fail; the provider turns every failure into the error
/// context, so implementations only have to leave their connection state
/// clean before returning `Err`.
pub trait WindowContextBackend: Send {
    /// Short transport name used in diagnostics
    fn name(&self) -> &'static str;

    /// Ask the transport for the focused window exactly once
    fn query_once(&mut self) -> Result<WindowContext>;
}

/// Семейство протоколов отображения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    X11,
    Wayland,
}

impl SessionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "x11" | "xorg" => Some(SessionType::X11),
            "wayland" => Some(SessionType::Wayland),
            _ => None,
        }
    }

    pub fn from_env() -> Option<Self> {
        if let Some(session) = std::env::var("XDG_SESSION_TYPE")
            .ok()
            .and_then(|s| Self::parse(&s))
        {
            return Some(session);
        }
        if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            return Some(SessionType::Wayland);
        }
        if std::env::var_os("DISPLAY").is_some() {
            return Some(SessionType::X11);
        }
        None
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::X11 => write!(f, "x11"),
            SessionType::Wayland => write!(f, "wayland"),
        }
    }
}

/// Ключ поиска в реестре бэкендов
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvironmentKey {
    pub session_type: SessionType,
    pub desktop_hint: Option<String>,
}

impl EnvironmentKey {
    pub fn new(session_type: SessionType, desktop_hint: Option<&str>) -> Self {
        Self {
            session_type,
            desktop_hint: desktop_hint.and_then(normalize_desktop_hint),
        }
    }

    /// Определить окружение по переменным сессии
    pub fn detect() -> Result<Self> {
        Self::with_overrides(None, None)
    }

    /// Явно заданные значения важнее переменных окружения
    pub fn with_overrides(session_type: Option<&str>, desktop: Option<&str>) -> Result<Self> {
        let session_type = match session_type {
            Some(raw) => SessionType::parse(raw).ok_or_else(|| {
                ContextError::Configuration(format!("неизвестный тип сессии: {}", raw))
            })?,
            None => SessionType::from_env().ok_or_else(|| {
                ContextError::Configuration(
                    "не удалось определить тип сессии (XDG_SESSION_TYPE, WAYLAND_DISPLAY, DISPLAY)"
                        .to_string(),
                )
            })?,
        };
        let desktop_hint = match desktop {
            Some(raw) => normalize_desktop_hint(raw),
            None => detect_desktop_hint(),
        };
        Ok(Self {
            session_type,
            desktop_hint,
        })
    }
}

impl fmt::Display for EnvironmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.desktop_hint {
            Some(hint) => write!(f, "{}/{}", self.session_type, hint),
            None => write!(f, "{}/-", self.session_type),
        }
    }
}

/// Одна поддерживаемая пара (тип сессии, рабочий стол).
///
/// `desktop_hint == None` означает "любой рабочий стол".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedEnvironment {
    pub session_type: SessionType,
    pub desktop_hint: Option<&'static str>,
}

impl SupportedEnvironment {
    pub const fn any_desktop(session_type: SessionType) -> Self {
        Self {
            session_type,
            desktop_hint: None,
        }
    }

    pub const fn wayland(desktop: &'static str) -> Self {
        Self {
            session_type: SessionType::Wayland,
            desktop_hint: Some(desktop),
        }
    }

    pub fn matches(&self, key: &EnvironmentKey) -> bool {
        if self.session_type != key.session_type {
            return false;
        }
        match self.desktop_hint {
            None => true,
            Some(hint) => key.desktop_hint.as_deref() == Some(hint),
        }
    }
}

/// Привести идентификатор рабочего стола к одному из известных семейств
pub fn normalize_desktop_hint(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    // XDG_CURRENT_DESKTOP бывает списком: "ubuntu:GNOME"
    for part in lower.split(':') {
        let family = match part {
            p if p.contains("gnome") => "gnome",
            p if p.contains("kde") || p.contains("plasma") => "kde",
            p if p.contains("hyprland") => "hyprland",
            p if p.contains("sway") => "sway",
            p if p.contains("wlroots") => "wlroots",
            _ => continue,
        };
        return Some(family.to_string());
    }

    Some(lower)
}

fn detect_desktop_hint() -> Option<String> {
    if std::env::var_os("HYPRLAND_INSTANCE_SIGNATURE").is_some() {
        return Some("hyprland".to_string());
    }
    if std::env::var_os("SWAYSOCK").is_some() {
        return Some("sway".to_string());
    }
    ["XDG_CURRENT_DESKTOP", "DESKTOP_SESSION"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|value| normalize_desktop_hint(&value))
}
