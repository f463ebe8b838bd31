pub mod window;

pub use window::{WindowContext, WindowEvent, WindowEventType};
