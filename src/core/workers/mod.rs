//! Capture and process worker loops (§4.6, §4.7).

mod capture;
mod process;

pub use capture::{CaptureSource, CaptureWorker};
pub use process::ProcessWorker;
