use super::gnome::GnomeBackend;
use super::hyprland::HyprlandBackend;
use super::kde::KdePlasmaBackend;
use super::r#trait::{EnvironmentKey, SupportedEnvironment, WindowContextBackend};
use super::wlroots::WlrootsBackend;
use super::x11::X11Backend;
use super::{gnome, hyprland, kde, wlroots, x11};
use crate::config::Config;
use crate::ctx_error;
use crate::error::Result;
use once_cell::sync::Lazy;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    X11,
    GnomeMulti,
    KdePlasma,
    Hyprland,
    WlrootsGeneric,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::X11,
        BackendKind::GnomeMulti,
        BackendKind::KdePlasma,
        BackendKind::Hyprland,
        BackendKind::WlrootsGeneric,
    ];

    pub fn supported_environments(self) -> &'static [SupportedEnvironment] {
        match self {
            BackendKind::X11 => x11::SUPPORTED_ENVIRONMENTS,
            BackendKind::GnomeMulti => gnome::SUPPORTED_ENVIRONMENTS,
            BackendKind::KdePlasma => kde::SUPPORTED_ENVIRONMENTS,
            BackendKind::Hyprland => hyprland::SUPPORTED_ENVIRONMENTS,
            BackendKind::WlrootsGeneric => wlroots::SUPPORTED_ENVIRONMENTS,
        }
    }

    /// Создать бэкенд. Для KDE блокируется до ответа helper-сервиса.
    pub fn build(self, config: &Config) -> Box<dyn WindowContextBackend> {
        match self {
            BackendKind::X11 => Box::new(X11Backend::new()),
            BackendKind::GnomeMulti => Box::new(GnomeBackend::new(config.diagnostics_interval())),
            BackendKind::KdePlasma => Box::new(KdePlasmaBackend::connect(config.kde_retry_interval())),
            BackendKind::Hyprland => Box::new(HyprlandBackend::new(
                &config.hyprland.cli_binary,
                config.hyprland.response_limit,
            )),
            BackendKind::WlrootsGeneric => Box::new(WlrootsBackend::new()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::X11 => "X11",
            BackendKind::GnomeMulti => "GNOME",
            BackendKind::KdePlasma => "KDE Plasma",
            BackendKind::Hyprland => "Hyprland",
            BackendKind::WlrootsGeneric => "wlroots",
        };
        f.write_str(name)
    }
}

/// Таблица (окружение -> бэкенд), собирается один раз и больше не меняется
static REGISTRY: Lazy<Vec<(SupportedEnvironment, BackendKind)>> = Lazy::new(|| {
    let table: Vec<_> = BackendKind::ALL
        .iter()
        .flat_map(|&kind| {
            kind.supported_environments()
                .iter()
                .map(move |&environment| (environment, kind))
        })
        .collect();
    debug!("Реестр бэкендов: {} записей", table.len());
    table
});

/// Найти бэкенд для окружения
pub fn lookup(key: &EnvironmentKey) -> Result<BackendKind> {
    REGISTRY
        .iter()
        .find(|(environment, _)| environment.matches(key))
        .map(|&(_, kind)| kind)
        .ok_or_else(|| ctx_error!(configuration, "нет бэкенда для окружения {}", key))
}

/// Все поддерживаемые окружения в виде "сессия/рабочий стол"
pub fn supported_environments() -> Vec<String> {
    REGISTRY
        .iter()
        .map(|(environment, kind)| match environment.desktop_hint {
            Some(hint) => format!("{}/{} ({})", environment.session_type, hint, kind),
            None => format!("{}/* ({})", environment.session_type, kind),
        })
        .collect()
}
