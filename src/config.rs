use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::services::window_detector::SessionType;

const MIN_RESPONSE_LIMIT: usize = 64;
const MAX_RESPONSE_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub window: WindowConfig,
    pub kde: KdeConfig,
    pub hyprland: HyprlandConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    /// x11 | wayland; пусто - берём из XDG_SESSION_TYPE
    pub session_type: Option<String>,
    /// gnome | kde | hyprland | wlroots | sway; пусто - определяем по окружению
    pub desktop: Option<String>,
    pub polling_interval_ms: u64,
    pub diagnostics_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KdeConfig {
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HyprlandConfig {
    pub cli_binary: String,
    pub response_limit: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            session_type: None,
            desktop: None,
            polling_interval_ms: 250,
            diagnostics_interval_ms: 5000,
        }
    }
}

impl Default for KdeConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 3000,
        }
    }
}

impl Default for HyprlandConfig {
    fn default() -> Self {
        Self {
            cli_binary: "hyprctl".to_string(),
            response_limit: 8192,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("WINCTX_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "full" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        if let Some(session) = &self.window.session_type {
            if SessionType::parse(session).is_none() {
                anyhow::bail!("Неизвестный тип сессии: {}", session);
            }
        }

        if self.window.polling_interval_ms < 50 {
            anyhow::bail!("polling_interval_ms должно быть минимум 50");
        }

        if self.kde.retry_interval_ms == 0 {
            anyhow::bail!("kde.retry_interval_ms должно быть больше 0");
        }

        if self.hyprland.cli_binary.trim().is_empty() {
            anyhow::bail!("hyprland.cli_binary не может быть пустым");
        }

        if !(MIN_RESPONSE_LIMIT..=MAX_RESPONSE_LIMIT).contains(&self.hyprland.response_limit) {
            anyhow::bail!(
                "hyprland.response_limit должно быть от {} до {} байт",
                MIN_RESPONSE_LIMIT,
                MAX_RESPONSE_LIMIT
            );
        }

        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.window.polling_interval_ms)
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_millis(self.window.diagnostics_interval_ms)
    }

    pub fn kde_retry_interval(&self) -> Duration {
        Duration::from_millis(self.kde.retry_interval_ms)
    }
}
