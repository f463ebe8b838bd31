//! Window context resolution: responsibility and boundaries
//!
//! This module and its submodules answer exactly one question: which
//! application (class) and which window (title) currently have focus.
//! Each desktop stack gets its own backend behind `WindowContextBackend`;
//! the registry picks one by session type and desktop, and
//! `WindowContextProvider` turns every backend fault into the error context.
//! Nothing here knows about keymaps or what the caller does with the answer.

mod dry_run;
pub mod gnome;
pub mod hyprland;
pub mod kde;
pub mod registry;
mod session_bus;
mod r#trait;
mod window_detector;
pub mod wlroots;
pub mod x11;

pub use self::registry::BackendKind;
pub use self::r#trait::{EnvironmentKey, SessionType, SupportedEnvironment, WindowContextBackend};
pub use self::session_bus::{DBusEndpoint, SessionBus};
pub use self::window_detector::WindowContextProvider;
