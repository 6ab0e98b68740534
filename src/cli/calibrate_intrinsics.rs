//! `calibrate-intrinsics`: chessboard-corner intrinsic calibration,
//! grounded in `original_source/surround_view/run_calibrate_camera.py`
//! (§10.5). Samples every `-framestep`-th frame from a live chessboard
//! capture, runs `cv2.fisheye.calibrate`/`cv2.calibrate` over the
//! accumulated corner set, and persists `camera_matrix`/`dist_coeffs`/
//! `resolution` via `CameraModel`'s own file format.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use opencv::calib3d;
use opencv::core::{Mat, Point2f, Point3f, Size, TermCriteria, TermCriteria_Type, Vector};
use opencv::highgui;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::VideoCaptureTrait;

use crate::cli::gst::{open_capture, parse_wxh};

/// Run the chessboard intrinsic calibration loop and persist camera_matrix
/// / dist_coeffs / resolution.
#[derive(FromArgs)]
#[argh(subcommand, name = "calibrate-intrinsics")]
pub struct CalibrateIntrinsicsArgs {
    /// capture device index
    #[argh(option, short = 'i', default = "0")]
    device: i32,

    /// inner chessboard corner grid, WxH (e.g. 9x6)
    #[argh(option, default = "String::from(\"9x6\")")]
    grid: String,

    /// capture resolution, WxH
    #[argh(option, short = 'r')]
    resolution: Option<String>,

    /// sample every Nth grabbed frame
    #[argh(option, default = "20")]
    framestep: i32,

    /// output camera file path
    #[argh(option, short = 'o')]
    output: PathBuf,

    /// use the fisheye calibration model instead of the standard pinhole one
    #[argh(switch)]
    fisheye: bool,

    /// videoflip method applied by the GStreamer pipeline
    #[argh(option, default = "0")]
    flip: i32,

    /// bypass GStreamer and use the platform's default capture backend
    #[argh(switch)]
    no_gst: bool,
}

pub fn run(args: CalibrateIntrinsicsArgs) -> Result<()> {
    let (grid_w, grid_h) = parse_wxh(&args.grid).context("parsing -grid")?;
    let resolution = args.resolution.as_deref().map(parse_wxh).transpose()?;
    let mut cap = open_capture(args.device, resolution, args.flip, args.no_gst)?;

    let grid_size = Size::new(grid_w, grid_h);
    let object_point: Vec<Point3f> = (0..grid_h)
        .flat_map(|y| (0..grid_w).map(move |x| Point3f::new(x as f32, y as f32, 0.0)))
        .collect();

    let mut object_points: Vector<Vector<Point3f>> = Vector::new();
    let mut image_points: Vector<Vector<Point2f>> = Vector::new();
    let mut frame_count = 0;
    let mut resolution_seen: Option<Size> = None;

    highgui::named_window("calibrate-intrinsics", highgui::WINDOW_AUTOSIZE)?;
    log::info!(target: "cli::calibrate_intrinsics", "press q to finish sampling and run calibration");

    loop {
        let mut frame = Mat::default();
        if !cap.read(&mut frame)? || frame.empty() {
            continue;
        }
        resolution_seen = Some(frame.size()?);
        frame_count += 1;

        if frame_count % args.framestep == 0 {
            let mut gray = Mat::default();
            imgproc::cvt_color(&frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

            let mut corners: Vector<Point2f> = Vector::new();
            let found = calib3d::find_chessboard_corners(
                &gray,
                grid_size,
                &mut corners,
                calib3d::CALIB_CB_ADAPTIVE_THRESH | calib3d::CALIB_CB_NORMALIZE_IMAGE,
            )?;

            if found {
                let criteria = TermCriteria::new(
                    (TermCriteria_Type::COUNT as i32) | (TermCriteria_Type::EPS as i32),
                    30,
                    0.001,
                )?;
                imgproc::corner_sub_pix(
                    &gray,
                    &mut corners,
                    Size::new(11, 11),
                    Size::new(-1, -1),
                    criteria,
                )?;
                imgproc::draw_chessboard_corners(&mut frame, grid_size, &corners, true)?;

                object_points.push(Vector::from_iter(object_point.iter().copied()));
                image_points.push(corners);
                log::info!(
                    target: "cli::calibrate_intrinsics",
                    "captured chessboard sample #{}",
                    object_points.len()
                );
            }
        }

        highgui::imshow("calibrate-intrinsics", &frame)?;
        if highgui::wait_key(1)? == 'q' as i32 {
            break;
        }
    }
    highgui::destroy_window("calibrate-intrinsics")?;

    if object_points.is_empty() {
        anyhow::bail!("no chessboard samples captured; nothing to calibrate");
    }
    let resolution = resolution_seen.context("never received a frame from the device")?;

    let camera_matrix = run_calibration(args.fisheye, &object_points, &image_points, resolution)?;

    crate::cli::save_intrinsics(&args.output, &camera_matrix.0, &camera_matrix.1, resolution)?;
    log::info!(
        target: "cli::calibrate_intrinsics",
        "wrote intrinsics for {} samples to {}",
        object_points.len(),
        args.output.display()
    );
    Ok(())
}

/// Runs either `cv2.fisheye.calibrate` or the standard `cv2.calibrateCamera`
/// and returns `(camera_matrix, dist_coeffs)`.
fn run_calibration(
    fisheye: bool,
    object_points: &Vector<Vector<Point3f>>,
    image_points: &Vector<Vector<Point2f>>,
    resolution: Size,
) -> Result<(Mat, Mat)> {
    let mut camera_matrix = Mat::eye(3, 3, opencv::core::CV_64F)?.to_mat()?;
    let mut dist_coeffs = Mat::default();
    let mut rvecs: Vector<Mat> = Vector::new();
    let mut tvecs: Vector<Mat> = Vector::new();

    if fisheye {
        dist_coeffs = Mat::zeros(4, 1, opencv::core::CV_64F)?.to_mat()?;
        calib3d::fisheye_calibrate(
            object_points,
            image_points,
            resolution,
            &mut camera_matrix,
            &mut dist_coeffs,
            &mut rvecs,
            &mut tvecs,
            0,
            TermCriteria::new(
                (TermCriteria_Type::COUNT as i32) | (TermCriteria_Type::EPS as i32),
                100,
                1e-6,
            )?,
        )
        .context("fisheye calibration failed")?;
    } else {
        calib3d::calibrate_camera(
            object_points,
            image_points,
            resolution,
            &mut camera_matrix,
            &mut dist_coeffs,
            &mut rvecs,
            &mut tvecs,
            0,
            TermCriteria::new(
                (TermCriteria_Type::COUNT as i32) | (TermCriteria_Type::EPS as i32),
                30,
                f64::EPSILON,
            )?,
        )
        .context("camera calibration failed")?;

        // The spec's persisted `dist_coeffs` is a 4x1 fisheye vector; a
        // pinhole calibration's 5/8/12/14-coefficient vector is truncated
        // to its first four radial/tangential terms so both paths persist
        // through the one camera-file shape §6 specifies.
        let mut truncated = Mat::zeros(4, 1, opencv::core::CV_64F)?.to_mat()?;
        for i in 0..4.min(dist_coeffs.rows()) {
            *truncated.at_2d_mut::<f64>(i, 0)? = *dist_coeffs.at_2d::<f64>(i, 0)?;
        }
        dist_coeffs = truncated;
    }

    Ok((camera_matrix, dist_coeffs))
}
