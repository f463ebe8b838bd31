pub mod kwin_helper;
pub mod window_detector;

pub use window_detector::{EnvironmentKey, WindowContextBackend, WindowContextProvider};
