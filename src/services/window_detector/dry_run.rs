use super::r#trait::WindowContextBackend;
use crate::error::Result;
use crate::events::WindowContext;
use tracing::info;

const FAKE_WINDOWS: &[(&str, &str)] = &[
    ("org.wezfurlong.wezterm", "Terminal - dry_run"),
    ("firefox", "Browser - dry_run"),
    ("code", "Editor - dry_run"),
    ("steam_app_0", "Game - dry_run"),
];

/// Бэкенд без рабочего стола: по кругу перебирает фиктивные окна
pub struct DryRunBackend {
    index: usize,
}

impl DryRunBackend {
    pub fn new() -> Self {
        info!("Dry-run режим - контекст окна эмулируется");
        Self { index: 0 }
    }
}

impl Default for DryRunBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowContextBackend for DryRunBackend {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn query_once(&mut self) -> Result<WindowContext> {
        let (class, title) = FAKE_WINDOWS[self.index];
        self.index = (self.index + 1) % FAKE_WINDOWS.len();
        Ok(WindowContext::new(class, title))
    }
}
