//! Capture worker (§4.6): pulls one raw frame per round from a single
//! camera and deposits it into that camera's own capture buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCaptureTrait, VideoCaptureTraitConst};

use crate::barrier::CaptureBarrier;
use crate::buffer::BoundedBuffer;
use crate::error::{Error, Result};
use crate::fps::FpsCounter;
use crate::geometry::CameraId;

/// Either the platform's default camera backend, or a caller-supplied media
/// pipeline string (GStreamer, an RTSP URL, a video file path — §6).
pub enum CaptureSource {
    Device(i32),
    Pipeline(String),
}

/// Owns one camera's `VideoCapture` handle and feeds its raw frames into
/// `capture_buffer`, gated by `barrier` so no camera drifts more than one
/// frame ahead of its slowest peer (§4.4's guarantee).
pub struct CaptureWorker {
    pub device: CameraId,
    cap: videoio::VideoCapture,
    capture_buffer: Arc<BoundedBuffer<Mat>>,
    barrier: Arc<CaptureBarrier>,
    drop_if_full: bool,
    fps: Arc<FpsCounter>,
}

impl CaptureWorker {
    /// Opens `source` for `device`, optionally pinning a resolution.
    /// Returns `ResolutionUnsupported` if the request closes the device, and
    /// `CameraOpenFailed` if the backend never opens it at all (§4.6: "the
    /// owner decides whether to continue without this camera"). `fps` is
    /// shared with the pipeline owner so it can be polled from outside this
    /// worker's thread (§9 "Signals for statistics").
    pub fn connect(
        device: CameraId,
        source: CaptureSource,
        resolution: Option<(i32, i32)>,
        capture_buffer: Arc<BoundedBuffer<Mat>>,
        barrier: Arc<CaptureBarrier>,
        drop_if_full: bool,
        fps: Arc<FpsCounter>,
    ) -> Result<Self> {
        let mut cap = match &source {
            CaptureSource::Device(index) => {
                videoio::VideoCapture::new(*index, videoio::CAP_ANY)?
            }
            CaptureSource::Pipeline(pipeline) => {
                videoio::VideoCapture::from_file(pipeline, videoio::CAP_GSTREAMER)?
            }
        };

        if !cap.is_opened()? {
            return Err(Error::CameraOpenFailed {
                device: device.name().to_string(),
                reason: "backend refused to open the requested source".to_string(),
            });
        }

        if let Some((width, height)) = resolution {
            cap.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
            cap.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
            if !cap.is_opened()? {
                return Err(Error::ResolutionUnsupported {
                    device: device.name().to_string(),
                    width,
                    height,
                });
            }
        }

        Ok(Self {
            device,
            cap,
            capture_buffer,
            barrier,
            drop_if_full,
            fps,
        })
    }

    /// Runs the per-frame loop described in §4.6 until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        let mut last_tick = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            self.fps.record(now.duration_since(last_tick));
            last_tick = now;

            self.barrier.arrive(self.device);

            let grabbed = match self.cap.grab() {
                Ok(grabbed) => grabbed,
                Err(err) => {
                    self.log_transient(err);
                    continue;
                }
            };
            if !grabbed {
                continue;
            }
            let mut frame = Mat::default();
            let retrieved = match self.cap.retrieve(&mut frame, 0) {
                Ok(retrieved) => retrieved,
                Err(err) => {
                    self.log_transient(err);
                    continue;
                }
            };
            if !retrieved {
                continue;
            }

            self.capture_buffer.push(frame, self.drop_if_full)?;
        }
        self.barrier.remove(self.device);
        Ok(())
    }

    /// A grab/retrieve failure is transient per §7: logged and swallowed,
    /// never propagated out of the per-frame loop.
    fn log_transient(&self, err: opencv::Error) {
        let transient = Error::FrameReadTransient {
            device: self.device.name().to_string(),
            reason: err.to_string(),
        };
        log::warn!(target: "capture", "{transient}");
    }
}
