//! `build-weights`: non-interactive batch tool that loads the four
//! already-captured raw sample images from `./images`, runs each through
//! its own camera's `undistort` → `project` → `flip` (the same sequence
//! `ProcessWorker` runs online), and writes `weights.png`/`masks.png`
//! (§6, §10.5), grounded in
//! `original_source/run_get_weight_matrices.py`, which does exactly this
//! before calling `get_weights_and_masks`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use opencv::core::{Mat, Vector, CV_8UC1};
use opencv::imgcodecs;
use opencv::prelude::*;

use surround_view_core::camera::camera_file_path;
use surround_view_core::{CameraId, CameraModel, Quadrant};

/// Compute seam weights and overlap masks from four raw captured sample
/// images and write weights.png / masks.png.
#[derive(FromArgs)]
#[argh(subcommand, name = "build-weights")]
pub struct BuildWeightsArgs {
    /// directory holding front.png/back.png/left.png/right.png and where
    /// weights.png/masks.png are written
    #[argh(option, default = "PathBuf::from(\"./images\")")]
    images_dir: PathBuf,

    /// directory containing the per-camera parameter files
    #[argh(option, default = "PathBuf::from(\".\")")]
    camera_dir: PathBuf,
}

pub fn run(args: BuildWeightsArgs) -> Result<()> {
    let layout = surround_view_core::CanvasLayout::default();

    let project = |cam: CameraId| -> Result<Mat> {
        let image_path = args.images_dir.join(format!("{}.png", cam.name()));
        let raw = imgcodecs::imread(&image_path.to_string_lossy(), imgcodecs::IMREAD_COLOR)
            .with_context(|| format!("reading {}", image_path.display()))?;
        if raw.empty() {
            anyhow::bail!("{} decoded to an empty image", image_path.display());
        }

        let camera_path = camera_file_path(&args.camera_dir, cam);
        let camera = CameraModel::load(cam, &camera_path)
            .with_context(|| format!("loading camera parameters for {}", cam.name()))?;
        let undistorted = camera.undistort(&raw)?;
        let projected = camera.project(&undistorted, layout.projected_shape(cam))?;
        Ok(camera.flip(&projected)?)
    };

    let front = project(CameraId::Front)?;
    let back = project(CameraId::Back)?;
    let left = project(CameraId::Left)?;
    let right = project(CameraId::Right)?;
    let tile = |cam: CameraId, q: Quadrant| -> Result<Mat> {
        let img = match cam {
            CameraId::Front => &front,
            CameraId::Back => &back,
            CameraId::Left => &left,
            CameraId::Right => &right,
        };
        let rect = layout.tile_slice_rect(cam, q);
        Ok(Mat::roi(img, rect)?.try_clone()?)
    };

    let mut weight_channels: Vector<Mat> = Vector::new();
    let mut mask_channels: Vector<Mat> = Vector::new();

    for q in Quadrant::ALL {
        let a = tile(q.a_camera(), q)?;
        let b = tile(q.b_camera(), q)?;
        let result = surround_view_core::stitch::weight_and_mask(&a, &b)?;

        let mut weight_u8 = Mat::default();
        result.weight.convert_to(&mut weight_u8, CV_8UC1, 255.0, 0.0)?;
        weight_channels.push(weight_u8);
        mask_channels.push(result.mask);
    }

    let mut weights_img = Mat::default();
    opencv::core::merge(&weight_channels, &mut weights_img)?;
    let mut masks_img = Mat::default();
    opencv::core::merge(&mask_channels, &mut masks_img)?;

    let weights_path = args.images_dir.join("weights.png");
    let masks_path = args.images_dir.join("masks.png");
    imgcodecs::imwrite(&weights_path.to_string_lossy(), &weights_img, &Vector::new())
        .context("writing weights.png")?;
    imgcodecs::imwrite(&masks_path.to_string_lossy(), &masks_img, &Vector::new())
        .context("writing masks.png")?;

    log::info!(
        target: "cli::build_weights",
        "wrote {} and {}",
        weights_path.display(),
        masks_path.display()
    );
    Ok(())
}
