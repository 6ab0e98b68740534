//! Process worker (§4.7): turns one camera's raw frames into oriented,
//! canvas-shaped frames and deposits them into the projection barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::barrier::ProjectionBarrier;
use crate::buffer::BoundedBuffer;
use crate::camera::CameraModel;
use crate::error::Result;
use crate::fps::FpsCounter;
use crate::geometry::{CameraId, CanvasLayout};

use opencv::core::{Mat, Size};

/// Pops raw frames from `capture_buffer`, runs them through `camera` (§4.2's
/// `undistort` → `project` → `flip`), and hands the result to
/// `projection_barrier` for this worker's device id.
pub struct ProcessWorker {
    pub device: CameraId,
    camera: Arc<CameraModel>,
    target: Size,
    capture_buffer: Arc<BoundedBuffer<Mat>>,
    projection_barrier: Arc<ProjectionBarrier>,
    fps: Arc<FpsCounter>,
}

impl ProcessWorker {
    /// `fps` is shared with the pipeline owner so it can be polled from
    /// outside this worker's thread (§9 "Signals for statistics").
    pub fn new(
        device: CameraId,
        camera: Arc<CameraModel>,
        layout: &CanvasLayout,
        capture_buffer: Arc<BoundedBuffer<Mat>>,
        projection_barrier: Arc<ProjectionBarrier>,
        fps: Arc<FpsCounter>,
    ) -> Self {
        Self {
            device,
            camera,
            target: layout.projected_shape(device),
            capture_buffer,
            projection_barrier,
            fps,
        }
    }

    /// Runs the per-frame loop described in §4.7 until `stop` is set or the
    /// capture buffer shuts down.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        let mut last_tick = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            let raw = match self.capture_buffer.pop() {
                Ok(frame) => frame,
                Err(crate::error::Error::BufferShutdown) => break,
                Err(err) => return Err(err),
            };

            let oriented = self.camera.process(&raw, self.target)?;
            self.projection_barrier.arrive(self.device, oriented);

            let now = Instant::now();
            self.fps.record(now.duration_since(last_tick));
            last_tick = now;
        }
        self.projection_barrier.remove(self.device);
        Ok(())
    }
}
