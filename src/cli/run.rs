//! `run`: the composite display loop (§6, §10.5), grounded in
//! `original_source/surround_view/run_live_demo.py`. Starts the full
//! capture → process → stitch pipeline, shows the composite canvas in a
//! `highgui` window with live per-camera FPS overlaid, and exits on `q` or
//! Esc.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use opencv::core::{Point, Scalar};
use opencv::highgui;
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;

use surround_view_core::camera::camera_file_path;
use surround_view_core::pipeline::{CameraConnection, Pipeline};
use surround_view_core::stitch::{QuadrantMasks, QuadrantWeights, Stitcher};
use surround_view_core::workers::CaptureSource;
use surround_view_core::{CameraId, CameraModel, CanvasLayout, Quadrant};

/// Start the live four-camera birdview pipeline and display the result.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
pub struct RunArgs {
    /// directory containing the per-camera parameter files and weights.png/masks.png
    #[argh(option, default = "PathBuf::from(\".\")")]
    camera_dir: PathBuf,

    /// path to the car icon image
    #[argh(option, default = "PathBuf::from(\"./images/car.png\")")]
    car_icon: PathBuf,

    /// capture resolution, WxH, applied to every camera
    #[argh(option, short = 'r')]
    resolution: Option<String>,

    /// bypass GStreamer and use the platform's default capture backend
    #[argh(switch)]
    no_gst: bool,

    /// per-camera capture buffer capacity
    #[argh(option, default = "4")]
    buffer_capacity: usize,
}

pub fn run(args: RunArgs) -> Result<()> {
    let layout = CanvasLayout::default();
    let resolution = args
        .resolution
        .as_deref()
        .map(crate::cli::gst::parse_wxh)
        .transpose()?;

    let mut cameras = HashMap::new();
    let mut connections = HashMap::new();
    for (device_index, id) in CameraId::ALL.iter().copied().enumerate() {
        let path = camera_file_path(&args.camera_dir, id);
        let camera = CameraModel::load(id, &path)
            .with_context(|| format!("loading camera parameters for {}", id.name()))?;
        cameras.insert(id, Arc::new(camera));
        connections.insert(
            id,
            CameraConnection {
                source: if args.no_gst {
                    CaptureSource::Device(device_index as i32)
                } else {
                    CaptureSource::Pipeline(crate::cli::gst::gst_pipeline(
                        device_index as i32,
                        resolution.map(|r| r.0).unwrap_or(1280),
                        resolution.map(|r| r.1).unwrap_or(720),
                        30,
                        0,
                    ))
                },
                resolution,
                drop_if_full: true,
            },
        );
    }

    let (weights, masks) = load_weights_and_masks(&args.camera_dir)?;
    let car_icon = imgcodecs::imread(&args.car_icon.to_string_lossy(), imgcodecs::IMREAD_COLOR)
        .with_context(|| format!("reading car icon {}", args.car_icon.display()))?;
    let car_icon = resize_to(&car_icon, layout.car_rect().width, layout.car_rect().height)?;

    let stitcher = Stitcher::new(layout, weights, masks, car_icon);
    let pipeline = Pipeline::start(layout, cameras, connections, stitcher, args.buffer_capacity, 4)?;

    highgui::named_window("surround-view", highgui::WINDOW_AUTOSIZE)?;
    log::info!(target: "cli::run", "press q or Esc to quit");

    loop {
        let mut canvas = match pipeline.recv_composite() {
            Ok(canvas) => canvas,
            Err(_) => break,
        };

        let mut y = 24;
        for id in CameraId::ALL {
            let text = format!("{}: {:.1} fps", id.name(), pipeline.fps(id));
            imgproc::put_text(
                &mut canvas,
                &text,
                Point::new(10, y),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.6,
                Scalar::new(0.0, 255.0, 0.0, 0.0),
                1,
                imgproc::LINE_8,
                false,
            )?;
            y += 22;
        }

        highgui::imshow("surround-view", &canvas)?;
        let key = highgui::wait_key(1)?;
        if key == 'q' as i32 || key == 27 {
            break;
        }
    }

    highgui::destroy_window("surround-view")?;
    pipeline.stop();
    Ok(())
}

fn load_weights_and_masks(dir: &std::path::Path) -> Result<(QuadrantWeights, QuadrantMasks)> {
    let weights_img = imgcodecs::imread(
        &dir.join("weights.png").to_string_lossy(),
        imgcodecs::IMREAD_UNCHANGED,
    )
    .context("reading weights.png (run build-weights first)")?;
    let masks_img = imgcodecs::imread(
        &dir.join("masks.png").to_string_lossy(),
        imgcodecs::IMREAD_UNCHANGED,
    )
    .context("reading masks.png (run build-weights first)")?;

    let mut weight_channels = opencv::core::Vector::<opencv::core::Mat>::new();
    opencv::core::split(&weights_img, &mut weight_channels)?;
    let mut mask_channels = opencv::core::Vector::<opencv::core::Mat>::new();
    opencv::core::split(&masks_img, &mut mask_channels)?;

    let to_float = |m: &opencv::core::Mat| -> Result<opencv::core::Mat> {
        let mut out = opencv::core::Mat::default();
        m.convert_to(&mut out, opencv::core::CV_32FC1, 1.0 / 255.0, 0.0)?;
        Ok(out)
    };

    let weights = QuadrantWeights {
        weights: [
            to_float(&weight_channels.get(Quadrant::FrontLeft.channel())?)?,
            to_float(&weight_channels.get(Quadrant::FrontRight.channel())?)?,
            to_float(&weight_channels.get(Quadrant::BackLeft.channel())?)?,
            to_float(&weight_channels.get(Quadrant::BackRight.channel())?)?,
        ],
    };
    let masks = QuadrantMasks {
        masks: [
            mask_channels.get(Quadrant::FrontLeft.channel())?,
            mask_channels.get(Quadrant::FrontRight.channel())?,
            mask_channels.get(Quadrant::BackLeft.channel())?,
            mask_channels.get(Quadrant::BackRight.channel())?,
        ],
    };
    Ok((weights, masks))
}

fn resize_to(img: &opencv::core::Mat, width: i32, height: i32) -> Result<opencv::core::Mat> {
    let mut out = opencv::core::Mat::default();
    imgproc::resize(
        img,
        &mut out,
        opencv::core::Size::new(width, height),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    Ok(out)
}
