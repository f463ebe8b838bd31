use serde::{Deserialize, Serialize};
use std::fmt;

/// Снимок активного окна: класс приложения, заголовок и признак ошибки.
///
/// При `error == true` класс и заголовок всегда пустые.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowContext {
    app_class: String,
    window_title: String,
    error: bool,
}

impl WindowContext {
    pub fn new(app_class: impl Into<String>, window_title: impl Into<String>) -> Self {
        Self {
            app_class: app_class.into(),
            window_title: window_title.into(),
            error: false,
        }
    }

    /// Нет окна в фокусе - это не ошибка
    pub fn empty() -> Self {
        Self::new("", "")
    }

    /// Сторожевое значение `{"", "", true}`
    pub fn error() -> Self {
        Self {
            app_class: String::new(),
            window_title: String::new(),
            error: true,
        }
    }

    pub fn app_class(&self) -> &str {
        &self.app_class
    }

    pub fn window_title(&self) -> &str {
        &self.window_title
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn is_empty(&self) -> bool {
        !self.error && self.app_class.is_empty() && self.window_title.is_empty()
    }
}

impl fmt::Display for WindowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error {
            write!(f, "<ошибка контекста>")
        } else if self.app_class.is_empty() {
            write!(f, "\"{}\"", self.window_title)
        } else {
            write!(f, "\"{}\" ({})", self.window_title, self.app_class)
        }
    }
}

/// Событие смены активного окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEvent {
    pub context: WindowContext,
    pub timestamp: std::time::Instant,
    pub event_type: WindowEventType,
}

impl WindowEvent {
    pub fn new(context: WindowContext, event_type: WindowEventType) -> Self {
        Self {
            context,
            timestamp: std::time::Instant::now(),
            event_type,
        }
    }

    /// Сравнить новый снимок с предыдущим и построить событие, если что-то изменилось
    pub fn between(previous: Option<&WindowContext>, current: &WindowContext) -> Option<Self> {
        let event_type = match previous {
            None => WindowEventType::FocusChanged,
            Some(prev) if prev == current => return None,
            Some(_) if current.is_error() => WindowEventType::ContextLost,
            Some(prev) if prev.app_class() == current.app_class() && !prev.is_error() => {
                WindowEventType::TitleChanged
            }
            Some(_) => WindowEventType::FocusChanged,
        };
        Some(Self::new(current.clone(), event_type))
    }
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} ({}ms ago)",
            self.event_type,
            self.context,
            self.timestamp.elapsed().as_millis()
        )
    }
}

/// Тип события окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowEventType {
    FocusChanged,
    TitleChanged,
    ContextLost,
}
