//! Wires capture workers, process workers, the two barriers and the
//! stitcher into one running pipeline (§2's data flow, §5's concurrency
//! model).
//!
//! This is the one place that owns every long-lived thread. Everything it
//! hands out (bounded buffers, barriers, FPS counters) is constructed here
//! and passed into workers by the constructor, never patched in afterward
//! (§9 "Per-thread buffer wiring via back-pointers").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use opencv::core::Mat;

use crate::barrier::{CaptureBarrier, ProjectionBarrier};
use crate::buffer::BoundedBuffer;
use crate::camera::CameraModel;
use crate::error::Result;
use crate::fps::FpsCounter;
use crate::geometry::{CameraId, CanvasLayout};
use crate::stitch::Stitcher;
use crate::workers::{CaptureSource, CaptureWorker, ProcessWorker};

/// Per-camera connection parameters the pipeline owner supplies at
/// `Pipeline::start` time (§6's capture pipeline string / device index
/// toggle).
pub struct CameraConnection {
    pub source: CaptureSource,
    pub resolution: Option<(i32, i32)>,
    pub drop_if_full: bool,
}

/// A running four-camera-to-composite pipeline. Holds every worker thread
/// and the atomic stop flag that signals them all (§5 "Cancellation").
pub struct Pipeline {
    stop: Arc<AtomicBool>,
    capture_threads: Vec<JoinHandle<()>>,
    process_threads: Vec<JoinHandle<()>>,
    stitch_thread: Option<JoinHandle<()>>,
    capture_buffers: HashMap<CameraId, Arc<BoundedBuffer<Mat>>>,
    output: Arc<BoundedBuffer<Mat>>,
    fps: HashMap<CameraId, Arc<FpsCounter>>,
}

impl Pipeline {
    /// Starts capture + process workers for every camera present in
    /// `connections`, plus the stitcher thread. A camera whose
    /// `CaptureWorker::connect` fails (§4.6 "the owner decides whether to
    /// continue without this camera") is logged and skipped rather than
    /// aborting the whole pipeline; the capture/projection barriers are
    /// built only from the cameras that actually connected.
    pub fn start(
        layout: CanvasLayout,
        cameras: HashMap<CameraId, Arc<CameraModel>>,
        connections: HashMap<CameraId, CameraConnection>,
        stitcher: Stitcher,
        capture_buffer_capacity: usize,
        output_buffer_capacity: usize,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut fps = HashMap::new();
        let mut capture_buffers = HashMap::new();
        for id in CameraId::ALL {
            fps.insert(id, Arc::new(FpsCounter::new()));
            capture_buffers.insert(id, Arc::new(BoundedBuffer::new(capture_buffer_capacity)));
        }

        let mut connected: Vec<CameraId> = Vec::new();
        let mut worker_specs = Vec::new();
        for (id, conn) in connections {
            let camera = match cameras.get(&id) {
                Some(camera) => camera.clone(),
                None => {
                    log::warn!(target: "pipeline", "no camera model supplied for {}, skipping", id.name());
                    continue;
                }
            };
            worker_specs.push((id, conn, camera));
            connected.push(id);
        }

        let capture_barrier = Arc::new(CaptureBarrier::new(connected.iter().copied()));
        let projection_barrier = Arc::new(ProjectionBarrier::new(
            connected.iter().copied(),
            output_buffer_capacity,
        ));

        let mut capture_threads = Vec::new();
        let mut process_threads = Vec::new();

        for (id, conn, camera) in worker_specs {
            let capture_buffer = capture_buffers[&id].clone();
            let cam_fps = fps[&id].clone();
            let mut worker = match CaptureWorker::connect(
                id,
                conn.source,
                conn.resolution,
                capture_buffer.clone(),
                capture_barrier.clone(),
                conn.drop_if_full,
                cam_fps,
            ) {
                Ok(worker) => worker,
                Err(err) => {
                    log::warn!(target: "pipeline", "camera {} failed to connect: {err}", id.name());
                    capture_barrier.remove(id);
                    projection_barrier.remove(id);
                    continue;
                }
            };

            let capture_stop = stop.clone();
            capture_threads.push(
                std::thread::Builder::new()
                    .name(format!("capture::{}", id.name()))
                    .spawn(move || {
                        if let Err(err) = worker.run(&capture_stop) {
                            log::error!(target: "pipeline", "capture worker {} exited: {err}", id.name());
                        }
                    })
                    .expect("failed to spawn capture thread"),
            );

            let process_fps = fps[&id].clone();
            let mut process_worker = ProcessWorker::new(
                id,
                camera,
                &layout,
                capture_buffer,
                projection_barrier.clone(),
                process_fps,
            );
            let process_stop = stop.clone();
            process_threads.push(
                std::thread::Builder::new()
                    .name(format!("process::{}", id.name()))
                    .spawn(move || {
                        if let Err(err) = process_worker.run(&process_stop) {
                            log::error!(target: "pipeline", "process worker {} exited: {err}", id.name());
                        }
                    })
                    .expect("failed to spawn process thread"),
            );
        }

        let output = Arc::new(BoundedBuffer::new(output_buffer_capacity));
        let stitch_output = output.clone();
        let stitch_stop = stop.clone();
        let stitch_thread = std::thread::Builder::new()
            .name("stitch".to_string())
            .spawn(move || run_stitch_loop(stitcher, projection_barrier, stitch_output, &stitch_stop))
            .expect("failed to spawn stitch thread");

        Ok(Self {
            stop,
            capture_threads,
            process_threads,
            stitch_thread: Some(stitch_thread),
            capture_buffers,
            output,
            fps,
        })
    }

    /// Blocks until a fresh composite canvas is available (§6 "Runtime
    /// output").
    pub fn recv_composite(&self) -> Result<Mat> {
        self.output.pop()
    }

    /// Current smoothed FPS for one camera, for display-loop overlays
    /// (§9 "Signals for statistics").
    pub fn fps(&self, id: CameraId) -> f64 {
        self.fps.get(&id).map(|c| c.get()).unwrap_or(0.0)
    }

    /// Signals every worker to stop, wakes anything blocked on a buffer,
    /// joins every thread, then clears the buffers (§5 "Buffers are
    /// cleared only after all producers/consumers have stopped").
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for buffer in self.capture_buffers.values() {
            buffer.shutdown();
        }
        self.output.shutdown();

        for handle in self.capture_threads.drain(..) {
            let _ = handle.join();
        }
        for handle in self.process_threads.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.stitch_thread.take() {
            let _ = handle.join();
        }

        for buffer in self.capture_buffers.values() {
            buffer.clear();
        }
        self.output.clear();
    }
}

/// The stitcher's own worker loop: pop a four-frame snapshot, stitch it,
/// publish the result (§4.8.6 "the stitcher never fails a frame").
fn run_stitch_loop(
    stitcher: Stitcher,
    projection_barrier: Arc<ProjectionBarrier>,
    output: Arc<BoundedBuffer<Mat>>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        let snapshot = match projection_barrier.pop() {
            Ok(snapshot) => snapshot,
            Err(crate::error::Error::BufferShutdown) => break,
            Err(err) => {
                log::error!(target: "stitch", "projection barrier pop failed: {err}");
                continue;
            }
        };

        let [front, back, left, right] = snapshot.into_parts();
        let (front, back, left, right) = match (front, back, left, right) {
            (Some(f), Some(b), Some(l), Some(r)) => (f, b, l, r),
            _ => {
                log::debug!(target: "stitch", "skipping snapshot missing a camera");
                continue;
            }
        };

        let frames = crate::stitch::Frames { front, back, left, right };
        match stitcher.stitch(frames) {
            Ok(canvas) => {
                let _ = output.push(canvas, true);
            }
            Err(err) => {
                log::error!(target: "stitch", "stitch failed, skipping frame: {err}");
            }
        }
    }
}
