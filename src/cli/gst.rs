//! Shared camera-opening helper for the CLI tools (§6 "Capture pipeline
//! string"). Every tool that talks to a live camera (`calibrate-intrinsics`,
//! `capture-image`, `run`) resolves a device the same way: either the
//! platform's default backend, or a GStreamer pipeline string built from
//! `(device, width, height, framerate, flip_method)`.

use anyhow::{Context, Result};
use opencv::videoio::{self, VideoCaptureTrait, VideoCaptureTraitConst};

/// A Jetson/nvarguscamerasrc-style pipeline description, parameterized the
/// way §6 specifies. `flip_method` follows `nvvidconv`'s own 0-7 enum.
pub fn gst_pipeline(device: i32, width: i32, height: i32, framerate: i32, flip_method: i32) -> String {
    format!(
        "v4l2src device=/dev/video{device} ! \
         video/x-raw, width={width}, height={height}, framerate={framerate}/1 ! \
         videoconvert ! videoflip method={flip} ! appsink",
        device = device,
        width = width,
        height = height,
        framerate = framerate,
        flip = flip_method,
    )
}

/// Opens `device` either through the default platform backend or a
/// GStreamer pipeline built by `gst_pipeline`, and pins `resolution` when
/// the caller asks for one.
pub fn open_capture(
    device: i32,
    resolution: Option<(i32, i32)>,
    flip_method: i32,
    no_gst: bool,
) -> Result<videoio::VideoCapture> {
    let mut cap = if no_gst {
        videoio::VideoCapture::new(device, videoio::CAP_ANY)
            .context("failed to open default capture backend")?
    } else {
        let (w, h) = resolution.unwrap_or((1280, 720));
        let pipeline = gst_pipeline(device, w, h, 30, flip_method);
        videoio::VideoCapture::from_file(&pipeline, videoio::CAP_GSTREAMER)
            .context("failed to open GStreamer pipeline")?
    };

    if !cap.is_opened().context("querying capture backend state")? {
        anyhow::bail!("device {device} did not open");
    }

    if let Some((width, height)) = resolution {
        cap.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
        cap.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
    }

    Ok(cap)
}

/// Parses a `WxH` CLI argument (`-r`, `-grid`) into a pair of integers.
pub fn parse_wxh(spec: &str) -> Result<(i32, i32)> {
    let (w, h) = spec
        .split_once('x')
        .or_else(|| spec.split_once('X'))
        .with_context(|| format!("expected WxH, got '{spec}'"))?;
    Ok((w.parse()?, h.parse()?))
}
