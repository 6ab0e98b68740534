use std::path::PathBuf;

/// Every fallible operation in this crate returns one of these kinds.
///
/// `FrameReadTransient` is special: callers that sit in a per-frame loop are
/// expected to log it and continue rather than propagate it, per the
/// capture/process worker contracts. Every other variant is meant to reach
/// a caller that can make a setup-time decision (retry, abort, skip a
/// camera).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("camera config missing: {path}")]
    ConfigMissing { path: PathBuf },

    #[error("camera config invalid ({path}): {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("camera {device} has no project_matrix; run calibrate-extrinsic first")]
    NotCalibrated { device: String },

    #[error("failed to open camera device {device}: {reason}")]
    CameraOpenFailed { device: String, reason: String },

    #[error("resolution {width}x{height} not supported by device {device}")]
    ResolutionUnsupported {
        device: String,
        width: i32,
        height: i32,
    },

    #[error("transient frame read failure on {device}: {reason}")]
    FrameReadTransient { device: String, reason: String },

    #[error("buffer shut down")]
    BufferShutdown,

    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
