//! Small, project-agnostic building blocks used by the consumer engine

mod backoff;
mod retry_window;

pub use backoff::*;
pub use retry_window::*;
