//! Progress reporting for batch exports

mod bar;
mod handler;
mod logging;

pub use bar::ProgressBarHandler;
pub use handler::{NoOpHandler, ProgressEvent, ProgressHandler};
pub use logging::LoggingHandler;
