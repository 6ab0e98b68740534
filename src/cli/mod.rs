//! The five external-collaborator CLI tools (§6, §10.5). Each owns its own
//! interactive OpenCV `highgui` loop and writes straight to the camera
//! files / image directory the core library reads; none of them holds a
//! reference to a running `Pipeline`.

pub(crate) mod build_weights;
pub(crate) mod calibrate_extrinsic;
pub(crate) mod calibrate_intrinsics;
pub(crate) mod capture_image;
pub(crate) mod gst;
pub(crate) mod run;

pub use build_weights::BuildWeightsArgs;
pub use calibrate_extrinsic::CalibrateExtrinsicArgs;
pub use calibrate_intrinsics::CalibrateIntrinsicsArgs;
pub use capture_image::CaptureImageArgs;
pub use run::RunArgs;

use std::path::Path;

use anyhow::Result;
use opencv::core::{FileStorage, FileStorage_WRITE, Mat, Size};
use opencv::prelude::*;

/// Writes the three intrinsic fields `calibrate-intrinsics` produces
/// (`camera_matrix`, `dist_coeffs`, `resolution`) to a fresh camera file, in
/// the same `FileStorage` layout `CameraModel::load`/`save` read and write
/// (§6). `calibrate-extrinsic` later opens this same file with
/// `CameraModel::load` and adds `project_matrix` to it.
pub(crate) fn save_intrinsics(
    path: &Path,
    camera_matrix: &Mat,
    dist_coeffs: &Mat,
    resolution: Size,
) -> Result<()> {
    let path_str = path.to_string_lossy().to_string();
    let mut fs = FileStorage::new(&path_str, FileStorage_WRITE, "")?;
    fs.write_mat("camera_matrix", camera_matrix)?;
    fs.write_mat("dist_coeffs", dist_coeffs)?;
    let mut res_mat = Mat::new_rows_cols_with_default(1, 2, opencv::core::CV_32S, 0.0.into())?;
    *res_mat.at_2d_mut::<i32>(0, 0)? = resolution.width;
    *res_mat.at_2d_mut::<i32>(0, 1)? = resolution.height;
    fs.write_mat("resolution", &res_mat)?;
    fs.release()?;
    Ok(())
}
