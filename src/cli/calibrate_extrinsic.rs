//! `calibrate-extrinsic`: the four-click point picker that produces
//! `project_matrix` (§6, §10.5), grounded in
//! `original_source/surround_view/run_get_projection_maps.py::select_points`.
//!
//! A still frame is shown; the operator left-clicks the four source points
//! (drawn as they're picked) in the same order as `reference_dst_points`
//! expects, then confirms with any key. The resulting homography is
//! checked against the reference destination points (§8 scenario 6) before
//! it's persisted.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use argh::FromArgs;
use opencv::calib3d;
use opencv::core::{Mat, Point, Point2f, Scalar, Vector};
use opencv::highgui;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::VideoCaptureTrait;

use surround_view_core::{camera::camera_file_path, CameraId, CameraModel, CanvasLayout};

use crate::cli::gst::open_capture;

/// Pick four source points on a still frame and compute project_matrix.
#[derive(FromArgs)]
#[argh(subcommand, name = "calibrate-extrinsic")]
pub struct CalibrateExtrinsicArgs {
    /// which camera mount this picker is calibrating
    #[argh(option)]
    camera: String,

    /// capture device index to grab the still frame from
    #[argh(option, short = 'i', default = "0")]
    device: i32,

    /// scale_xy applied to the virtual camera before picking points (sx,sy)
    #[argh(option, default = "String::from(\"1.0,1.0\")")]
    scale: String,

    /// shift_xy applied to the virtual camera before picking points (sx,sy)
    #[argh(option, default = "String::from(\"0.0,0.0\")")]
    shift: String,

    /// directory containing the per-camera parameter files
    #[argh(option, default = "PathBuf::from(\".\")")]
    camera_dir: PathBuf,
}

fn parse_pair(spec: &str) -> Result<[f32; 2]> {
    let (a, b) = spec
        .split_once(',')
        .with_context(|| format!("expected 'a,b', got '{spec}'"))?;
    Ok([a.trim().parse()?, b.trim().parse()?])
}

pub fn run(args: CalibrateExtrinsicArgs) -> Result<()> {
    let id = CameraId::from_name(&args.camera)
        .with_context(|| format!("unknown camera '{}', expected front/back/left/right", args.camera))?;
    let scale_xy = parse_pair(&args.scale).context("parsing -scale")?;
    let shift_xy = parse_pair(&args.shift).context("parsing -shift")?;

    let path = camera_file_path(&args.camera_dir, id);
    let camera = CameraModel::load(id, &path)?;
    camera.set_scale_shift(scale_xy, shift_xy)?;

    let mut cap = open_capture(args.device, None, 0, true)?;
    let mut still = Mat::default();
    while still.empty() {
        cap.read(&mut still)?;
    }
    let layout = CanvasLayout::default();
    let undistorted = camera.undistort(&still)?;

    let points = Arc::new(Mutex::new(Vec::<Point>::new()));
    let window = "calibrate-extrinsic";
    highgui::named_window(window, highgui::WINDOW_AUTOSIZE)?;

    let callback_points = points.clone();
    highgui::set_mouse_callback(
        window,
        Some(Box::new(move |event, x, y, _flags| {
            if event == highgui::EVENT_LBUTTONDOWN {
                let mut pts = callback_points.lock().unwrap();
                if pts.len() < 4 {
                    pts.push(Point::new(x, y));
                }
            }
        })),
    )?;

    log::info!(target: "cli::calibrate_extrinsic", "left-click 4 source points, any key to confirm");
    loop {
        let mut display = undistorted.clone();
        let pts = points.lock().unwrap().clone();
        for p in &pts {
            imgproc::circle(&mut display, *p, 5, Scalar::new(0.0, 0.0, 255.0, 0.0), -1, imgproc::LINE_8, 0)?;
        }
        highgui::imshow(window, &display)?;
        let key = highgui::wait_key(30)?;
        if pts.len() == 4 && key != -1 {
            break;
        }
        if key == 'q' as i32 || key == 27 {
            anyhow::bail!("calibration cancelled before four points were picked");
        }
    }
    highgui::destroy_window(window)?;

    let src_points: Vec<Point2f> = points
        .lock()
        .unwrap()
        .iter()
        .map(|p| Point2f::new(p.x as f32, p.y as f32))
        .collect();
    let src = Vector::from_iter(src_points);
    let dst = surround_view_core::camera::reference_dst_points(id, &layout);

    let project_matrix = calib3d::get_perspective_transform(&src, &dst, calib3d::DECOMP_LU)?;
    camera.set_project_matrix(project_matrix);
    camera.save(&path)?;

    log::info!(target: "cli::calibrate_extrinsic", "wrote project_matrix for {} to {}", id.name(), path.display());
    Ok(())
}
