//! Per-camera intrinsics, extrinsics and the undistort/project/flip pipeline
//! (§4.2).
//!
//! `project_matrix` is a nullable field rather than an `Option` wrapped
//! around the whole model (§9 "Dynamic attributes on the camera model") —
//! everything else is required and known the moment the camera file loads;
//! only the extrinsic calibration step is optional until `calibrate-extrinsic`
//! has run once.

use std::path::{Path, PathBuf};

use opencv::calib3d;
use opencv::core::{
    FileStorage, FileStorage_READ, FileStorage_WRITE, Mat, Point2f, Size, Vector, CV_16SC2,
};
use opencv::prelude::*;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::geometry::CameraId;

/// Everything that can change together under live recalibration. Guarded by
/// one mutex so `process()` never observes a torn `camera_matrix` /
/// `undistort_maps` pair (§3's consistency invariant).
struct Inner {
    camera_matrix: Mat,
    dist_coeffs: Mat,
    resolution: Size,
    scale_xy: [f32; 2],
    shift_xy: [f32; 2],
    project_matrix: Option<Mat>,
    undistort_map1: Mat,
    undistort_map2: Mat,
}

pub struct CameraModel {
    pub id: CameraId,
    inner: Mutex<Inner>,
}

impl CameraModel {
    /// Loads `camera_matrix`, `dist_coeffs`, `resolution`, `scale_xy`,
    /// `shift_xy` and the optional `project_matrix` from `path`, then builds
    /// the undistort maps for the loaded intrinsics.
    pub fn load(id: CameraId, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigMissing {
                path: path.to_path_buf(),
            });
        }
        let path_str = path.to_string_lossy().to_string();
        let fs = FileStorage::new(&path_str, FileStorage_READ, "")
            .map_err(|e| config_invalid(path, format!("cannot open file storage: {e}")))?;

        let camera_matrix = read_required_mat(&fs, path, "camera_matrix")?;
        let dist_coeffs = read_required_mat(&fs, path, "dist_coeffs")?;
        let resolution = read_required_size(&fs, path, "resolution")?;
        let scale_xy = read_vec2f(&fs, "scale_xy").unwrap_or([1.0, 1.0]);
        let shift_xy = read_vec2f(&fs, "shift_xy").unwrap_or([0.0, 0.0]);
        let project_matrix = read_optional_mat(&fs, "project_matrix");

        let (undistort_map1, undistort_map2) =
            build_undistort_maps(&camera_matrix, &dist_coeffs, resolution, scale_xy, shift_xy)?;

        Ok(Self {
            id,
            inner: Mutex::new(Inner {
                camera_matrix,
                dist_coeffs,
                resolution,
                scale_xy,
                shift_xy,
                project_matrix,
                undistort_map1,
                undistort_map2,
            }),
        })
    }

    /// Persists the current parameters back to `path` (§4.2 "Persistence").
    pub fn save(&self, path: &Path) -> Result<()> {
        let inner = self.inner.lock();
        let path_str = path.to_string_lossy().to_string();
        let mut fs = FileStorage::new(&path_str, FileStorage_WRITE, "")?;
        fs.write_mat("camera_matrix", &inner.camera_matrix)?;
        fs.write_mat("dist_coeffs", &inner.dist_coeffs)?;
        write_size(&mut fs, "resolution", inner.resolution)?;
        write_vec2f(&mut fs, "scale_xy", inner.scale_xy)?;
        write_vec2f(&mut fs, "shift_xy", inner.shift_xy)?;
        if let Some(pm) = &inner.project_matrix {
            fs.write_mat("project_matrix", pm)?;
        }
        fs.release()?;
        Ok(())
    }

    pub fn resolution(&self) -> Size {
        self.inner.lock().resolution
    }

    /// Sets the extrinsic homography computed by `calibrate-extrinsic`.
    pub fn set_project_matrix(&self, project_matrix: Mat) {
        self.inner.lock().project_matrix = Some(project_matrix);
    }

    /// Updates the post-undistortion virtual-camera adjustment and rebuilds
    /// `undistort_maps` so the invariant in §3 holds immediately, not lazily.
    pub fn set_scale_shift(&self, scale_xy: [f32; 2], shift_xy: [f32; 2]) -> Result<()> {
        let mut inner = self.inner.lock();
        let (map1, map2) = build_undistort_maps(
            &inner.camera_matrix,
            &inner.dist_coeffs,
            inner.resolution,
            scale_xy,
            shift_xy,
        )?;
        inner.scale_xy = scale_xy;
        inner.shift_xy = shift_xy;
        inner.undistort_map1 = map1;
        inner.undistort_map2 = map2;
        Ok(())
    }

    /// Runs undistort → project → flip as one atomic sequence with respect
    /// to live recalibration (§4.7's "processing-mutex scope"). `target`
    /// is the camera's canonical projected shape (`CanvasLayout::projected_shape`),
    /// supplied by the caller so this module stays independent of canvas
    /// geometry.
    pub fn process(&self, raw: &Mat, target: Size) -> Result<Mat> {
        let inner = self.inner.lock();
        let undistorted = undistort_with_maps(raw, &inner.undistort_map1, &inner.undistort_map2)?;
        let project_matrix = inner
            .project_matrix
            .as_ref()
            .ok_or_else(|| Error::NotCalibrated {
                device: self.id.name().to_string(),
            })?;
        let projected = project_with_matrix(&undistorted, project_matrix, target)?;
        drop(inner);
        Ok(crate::geometry::flip(self.id, &projected)?)
    }

    /// `undistort(img)` from §4.2's contract in isolation — used by
    /// `calibrate-extrinsic`'s point picker, which needs an undistorted
    /// still frame to click source points on before `project_matrix` even
    /// exists.
    pub fn undistort(&self, raw: &Mat) -> Result<Mat> {
        let inner = self.inner.lock();
        Ok(undistort_with_maps(raw, &inner.undistort_map1, &inner.undistort_map2)?)
    }

    /// `project(img)` from §4.2's contract in isolation.
    pub fn project(&self, undistorted: &Mat, target: Size) -> Result<Mat> {
        let inner = self.inner.lock();
        let project_matrix = inner
            .project_matrix
            .as_ref()
            .ok_or_else(|| Error::NotCalibrated {
                device: self.id.name().to_string(),
            })?;
        Ok(project_with_matrix(undistorted, project_matrix, target)?)
    }

    /// `flip(img)` from §4.2's contract in isolation.
    pub fn flip(&self, projected: &Mat) -> Result<Mat> {
        Ok(crate::geometry::flip(self.id, projected)?)
    }
}

fn undistort_with_maps(img: &Mat, map1: &Mat, map2: &Mat) -> opencv::Result<Mat> {
    let mut out = Mat::default();
    opencv::imgproc::remap(
        img,
        &mut out,
        map1,
        map2,
        opencv::imgproc::INTER_LINEAR,
        opencv::core::BORDER_CONSTANT,
        opencv::core::Scalar::all(0.0),
    )?;
    Ok(out)
}

fn project_with_matrix(img: &Mat, project_matrix: &Mat, target: Size) -> opencv::Result<Mat> {
    let mut out = Mat::default();
    opencv::imgproc::warp_perspective(
        img,
        &mut out,
        project_matrix,
        target,
        opencv::imgproc::INTER_LINEAR,
        opencv::core::BORDER_CONSTANT,
        opencv::core::Scalar::all(0.0),
    )?;
    Ok(out)
}

/// Builds the virtual-camera intrinsic (`camera_matrix` scaled by
/// `scale_xy` and shifted by `shift_xy` in principal point) and the
/// corresponding fisheye undistort maps.
fn build_undistort_maps(
    camera_matrix: &Mat,
    dist_coeffs: &Mat,
    resolution: Size,
    scale_xy: [f32; 2],
    shift_xy: [f32; 2],
) -> opencv::Result<(Mat, Mat)> {
    let mut new_matrix = camera_matrix.clone();
    {
        let fx = *camera_matrix.at_2d::<f64>(0, 0)?;
        let fy = *camera_matrix.at_2d::<f64>(1, 1)?;
        let cx = *camera_matrix.at_2d::<f64>(0, 2)?;
        let cy = *camera_matrix.at_2d::<f64>(1, 2)?;
        *new_matrix.at_2d_mut::<f64>(0, 0)? = fx * scale_xy[0] as f64;
        *new_matrix.at_2d_mut::<f64>(1, 1)? = fy * scale_xy[1] as f64;
        *new_matrix.at_2d_mut::<f64>(0, 2)? = cx + shift_xy[0] as f64;
        *new_matrix.at_2d_mut::<f64>(1, 2)? = cy + shift_xy[1] as f64;
    }
    let identity = Mat::eye(3, 3, opencv::core::CV_64F)?.to_mat()?;
    let mut map1 = Mat::default();
    let mut map2 = Mat::default();
    calib3d::fisheye_init_undistort_rectify_map(
        camera_matrix,
        dist_coeffs,
        &identity,
        &new_matrix,
        resolution,
        CV_16SC2,
        &mut map1,
        &mut map2,
    )?;
    Ok((map1, map2))
}

fn config_invalid(path: &Path, reason: impl Into<String>) -> Error {
    Error::ConfigInvalid {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_required_mat(fs: &FileStorage, path: &Path, key: &str) -> Result<Mat> {
    let node = fs
        .get(key)
        .map_err(|e| config_invalid(path, format!("missing field {key}: {e}")))?;
    node.mat()
        .map_err(|e| config_invalid(path, format!("field {key} is not a matrix: {e}")))
}

fn read_optional_mat(fs: &FileStorage, key: &str) -> Option<Mat> {
    fs.get(key).ok().and_then(|n| n.mat().ok())
}

fn read_required_size(fs: &FileStorage, path: &Path, key: &str) -> Result<Size> {
    let node = fs
        .get(key)
        .map_err(|e| config_invalid(path, format!("missing field {key}: {e}")))?;
    let mat = node
        .mat()
        .map_err(|e| config_invalid(path, format!("field {key} is not a matrix: {e}")))?;
    let w = *mat
        .at_2d::<i32>(0, 0)
        .map_err(|e| config_invalid(path, format!("field {key} malformed: {e}")))?;
    let h = *mat
        .at_2d::<i32>(0, 1)
        .map_err(|e| config_invalid(path, format!("field {key} malformed: {e}")))?;
    Ok(Size::new(w, h))
}

fn write_size(fs: &mut FileStorage, key: &str, size: Size) -> opencv::Result<()> {
    let mut mat = Mat::new_rows_cols_with_default(1, 2, opencv::core::CV_32S, 0.0.into())?;
    *mat.at_2d_mut::<i32>(0, 0)? = size.width;
    *mat.at_2d_mut::<i32>(0, 1)? = size.height;
    fs.write_mat(key, &mat)
}

fn read_vec2f(fs: &FileStorage, key: &str) -> Option<[f32; 2]> {
    let node = fs.get(key).ok()?;
    let mat = node.mat().ok()?;
    let x = *mat.at_2d::<f32>(0, 0).ok()?;
    let y = *mat.at_2d::<f32>(0, 1).ok()?;
    Some([x, y])
}

fn write_vec2f(fs: &mut FileStorage, key: &str, v: [f32; 2]) -> opencv::Result<()> {
    let mut mat = Mat::new_rows_cols_with_default(1, 2, opencv::core::CV_32F, 0.0.into())?;
    *mat.at_2d_mut::<f32>(0, 0)? = v[0];
    *mat.at_2d_mut::<f32>(0, 1)? = v[1];
    fs.write_mat(key, &mat)
}

/// Resolves a per-camera parameter file path from a directory and camera id,
/// the layout `calibrate-intrinsics`/`calibrate-extrinsic`/`run` all share.
pub fn camera_file_path(dir: &Path, id: CameraId) -> PathBuf {
    dir.join(format!("{}.yaml", id.name()))
}

/// Reference destination points a calibrated `project_matrix` must map its
/// four picked source points onto, keyed by camera (§8 scenario 6). Values
/// are expressed in the camera's own projected-shape coordinates, matching
/// `calibrate-extrinsic`'s point picker.
pub fn reference_dst_points(id: CameraId, layout: &crate::geometry::CanvasLayout) -> Vector<Point2f> {
    let shape = layout.projected_shape(id);
    let w = shape.width as f32;
    let h = shape.height as f32;
    let pts = match id {
        CameraId::Front | CameraId::Back => vec![
            Point2f::new(layout.xl as f32, 0.0),
            Point2f::new(layout.xr as f32, 0.0),
            Point2f::new(layout.xr as f32, h),
            Point2f::new(layout.xl as f32, h),
        ],
        CameraId::Left | CameraId::Right => vec![
            Point2f::new(0.0, layout.yt as f32),
            Point2f::new(w, layout.yt as f32),
            Point2f::new(w, layout.yb as f32),
            Point2f::new(0.0, layout.yb as f32),
        ],
    };
    Vector::from_iter(pts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_file_path_uses_camera_name() {
        let dir = PathBuf::from("/tmp/cams");
        assert_eq!(
            camera_file_path(&dir, CameraId::Front),
            PathBuf::from("/tmp/cams/front.yaml")
        );
    }

    #[test]
    fn reference_dst_points_has_four_points() {
        let layout = crate::geometry::CanvasLayout::default();
        let pts = reference_dst_points(CameraId::Front, &layout);
        assert_eq!(pts.len(), 4);
    }
}
