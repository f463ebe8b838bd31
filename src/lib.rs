//! winctx: which application has keyboard focus, on X11 and on the
//! Wayland compositors that expose it in some way.

pub mod config;
pub mod error;
pub mod events;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{ContextError, Result};
pub use events::{WindowContext, WindowEvent, WindowEventType};
pub use services::{EnvironmentKey, WindowContextBackend, WindowContextProvider};
