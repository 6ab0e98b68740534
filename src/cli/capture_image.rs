//! `capture-image`: live preview with a save/quit overlay, writing a single
//! PNG into `./images` (§6, §10.5), grounded in
//! `original_source/surround_view/get_images.py`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use opencv::core::{Mat, Point, Scalar};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::highgui;
use opencv::prelude::*;
use opencv::videoio::VideoCaptureTrait;

use crate::cli::gst::{open_capture, parse_wxh};

/// Show a live preview and save a single frame as a PNG under ./images.
#[derive(FromArgs)]
#[argh(subcommand, name = "capture-image")]
pub struct CaptureImageArgs {
    /// capture device index
    #[argh(option, short = 'i', default = "0")]
    device: i32,

    /// capture resolution, WxH
    #[argh(option, short = 'r')]
    resolution: Option<String>,

    /// output file name (without directory or extension)
    #[argh(option, short = 'o')]
    name: String,

    /// videoflip method applied by the GStreamer pipeline
    #[argh(option, default = "0")]
    flip: i32,

    /// bypass GStreamer and use the platform's default capture backend
    #[argh(switch)]
    no_gst: bool,
}

pub fn run(args: CaptureImageArgs) -> Result<()> {
    let resolution = args.resolution.as_deref().map(parse_wxh).transpose()?;
    let mut cap = open_capture(args.device, resolution, args.flip, args.no_gst)?;

    let out_dir = PathBuf::from("./images");
    std::fs::create_dir_all(&out_dir).context("creating ./images")?;
    let out_path = out_dir.join(format!("{}.png", args.name));

    highgui::named_window("capture-image", highgui::WINDOW_AUTOSIZE)?;
    log::info!(target: "cli::capture_image", "press s to save, q to quit");

    let mut saved = false;
    loop {
        let mut frame = Mat::default();
        if !cap.read(&mut frame)? || frame.empty() {
            continue;
        }

        let mut overlay = frame.clone();
        imgproc::put_text(
            &mut overlay,
            "press s to save, q to quit",
            Point::new(10, 24),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.7,
            Scalar::new(0.0, 255.0, 0.0, 0.0),
            2,
            imgproc::LINE_8,
            false,
        )?;
        highgui::imshow("capture-image", &overlay)?;

        let key = highgui::wait_key(1)?;
        if key == 's' as i32 {
            imgcodecs::imwrite(&out_path.to_string_lossy(), &frame, &opencv::core::Vector::new())
                .context("writing captured image")?;
            log::info!(target: "cli::capture_image", "saved {}", out_path.display());
            saved = true;
            break;
        }
        if key == 'q' as i32 || key == 27 {
            break;
        }
    }
    highgui::destroy_window("capture-image")?;

    if !saved {
        anyhow::bail!("quit without saving an image");
    }
    Ok(())
}
