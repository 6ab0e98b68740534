//! Capture barrier (§4.4) and projection barrier (§4.5).
//!
//! Both are reusable: after releasing one cohort of arrivals they
//! immediately start counting the next one. A plain "arrived == members,
//! reset to zero" counter has a classic bug where a thread that was
//! pre-empted right after the release condition fired can wake up in the
//! *next* round and consume a slot meant for a different generation. The
//! `generation` counter closes that hole (§9 "Re-entrant barrier"): a
//! waiter only stops waiting once the generation it observed on entry has
//! advanced, so a stale wakeup from two rounds ago is simply impossible to
//! construct.

use std::collections::HashSet;

use opencv::core::Mat;
use parking_lot::{Condvar, Mutex};

use crate::geometry::CameraId;

struct BarrierState {
    members: HashSet<CameraId>,
    arrived: HashSet<CameraId>,
    generation: u64,
}

/// Groups capture workers; releases them as a set once every member has
/// presented a frame for the current round.
pub struct CaptureBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl CaptureBarrier {
    pub fn new(members: impl IntoIterator<Item = CameraId>) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                members: members.into_iter().collect(),
                arrived: HashSet::new(),
                generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Blocks the caller until every current member has called `arrive` for
    /// this round, then returns. The member that completes the cohort
    /// releases everyone (including itself) without blocking.
    pub fn arrive(&self, device: CameraId) {
        let mut state = self.state.lock();
        let my_generation = state.generation;
        state.arrived.insert(device);
        if !state.members.is_empty() && state.arrived.len() >= state.members.len() {
            state.arrived.clear();
            state.generation += 1;
            self.cond.notify_all();
            return;
        }
        while state.generation == my_generation {
            self.cond.wait(&mut state);
        }
    }

    /// Drops `device` from membership and wakes every waiter so the cohort
    /// can be re-evaluated against the new, smaller membership (§5
    /// "Removing a device wakes any waiters so they can re-count").
    pub fn remove(&self, device: CameraId) {
        let mut state = self.state.lock();
        state.members.remove(&device);
        state.arrived.remove(&device);
        if !state.members.is_empty() && state.arrived.len() >= state.members.len() {
            state.arrived.clear();
            state.generation += 1;
        }
        self.cond.notify_all();
    }
}

/// A per-device four-slot frame map, filled in as process workers arrive.
#[derive(Default)]
pub struct FrameSnapshot {
    slots: [Option<Mat>; 4],
}

impl FrameSnapshot {
    pub fn get(&self, id: CameraId) -> Option<&Mat> {
        self.slots[id.index()].as_ref()
    }

    pub fn into_parts(self) -> [Option<Mat>; 4] {
        self.slots
    }
}

struct ProjectionState {
    members: HashSet<CameraId>,
    arrived: HashSet<CameraId>,
    frames: FrameSnapshot,
    generation: u64,
}

/// As `CaptureBarrier`, but each arrival also deposits its latest projected
/// frame, and the releasing arrival publishes a consistent four-camera
/// snapshot to `output` instead of just unblocking waiters (§4.5).
pub struct ProjectionBarrier {
    state: Mutex<ProjectionState>,
    cond: Condvar,
    output: crate::buffer::BoundedBuffer<FrameSnapshot>,
}

impl ProjectionBarrier {
    pub fn new(members: impl IntoIterator<Item = CameraId>, output_capacity: usize) -> Self {
        Self {
            state: Mutex::new(ProjectionState {
                members: members.into_iter().collect(),
                arrived: HashSet::new(),
                frames: FrameSnapshot::default(),
                generation: 0,
            }),
            cond: Condvar::new(),
            output: crate::buffer::BoundedBuffer::new(output_capacity),
        }
    }

    /// Deposits `frame` for `device` and arrives at the barrier. If this
    /// arrival completes the cohort, snapshots the four-frame map and
    /// pushes it (drop-if-full, per §5's backpressure rule) before waking
    /// the other workers.
    pub fn arrive(&self, device: CameraId, frame: Mat) {
        let mut state = self.state.lock();
        state.frames.slots[device.index()] = Some(frame);
        let my_generation = state.generation;
        state.arrived.insert(device);

        if !state.members.is_empty() && state.arrived.len() >= state.members.len() {
            let snapshot = std::mem::take(&mut state.frames);
            state.arrived.clear();
            state.generation += 1;
            self.cond.notify_all();
            drop(state);
            let _ = self.output.push(snapshot, true);
            return;
        }
        while state.generation == my_generation {
            self.cond.wait(&mut state);
        }
    }

    pub fn remove(&self, device: CameraId) {
        let mut state = self.state.lock();
        state.members.remove(&device);
        state.arrived.remove(&device);
        state.frames.slots[device.index()] = None;
        if !state.members.is_empty() && state.arrived.len() >= state.members.len() {
            let snapshot = std::mem::take(&mut state.frames);
            state.arrived.clear();
            state.generation += 1;
            drop(state);
            let _ = self.output.push(snapshot, true);
            self.cond.notify_all();
            return;
        }
        self.cond.notify_all();
    }

    /// Consumer side: blocks until a fresh four-frame snapshot is published.
    pub fn pop(&self) -> crate::error::Result<FrameSnapshot> {
        self.output.pop()
    }

    pub fn shutdown(&self) {
        self.output.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn releases_only_after_every_member_arrives() {
        let barrier = Arc::new(CaptureBarrier::new(CameraId::ALL));
        let released = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for cam in CameraId::ALL {
            let barrier = barrier.clone();
            let released = released.clone();
            handles.push(thread::spawn(move || {
                barrier.arrive(cam);
                released.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn is_reusable_across_rounds() {
        let barrier = Arc::new(CaptureBarrier::new(CameraId::ALL));
        for _round in 0..3 {
            let mut handles = Vec::new();
            for cam in CameraId::ALL {
                let barrier = barrier.clone();
                handles.push(thread::spawn(move || barrier.arrive(cam)));
            }
            for h in handles {
                h.join().unwrap();
            }
        }
    }

    #[test]
    fn removing_a_member_unblocks_remaining_waiters() {
        let barrier = Arc::new(CaptureBarrier::new(CameraId::ALL));
        let mut handles = Vec::new();
        for cam in [CameraId::Front, CameraId::Back, CameraId::Left] {
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || barrier.arrive(cam)));
        }
        thread::sleep(Duration::from_millis(20));
        barrier.remove(CameraId::Right);
        for h in handles {
            h.join_timeout_or_panic();
        }
    }

    trait JoinOrPanic {
        fn join_timeout_or_panic(self);
    }
    impl JoinOrPanic for thread::JoinHandle<()> {
        fn join_timeout_or_panic(self) {
            self.join().expect("capture worker thread should not panic");
        }
    }

    #[test]
    fn projection_barrier_publishes_snapshot_on_full_arrival() {
        let barrier = Arc::new(ProjectionBarrier::new(CameraId::ALL, 4));
        let mut handles = Vec::new();
        for cam in CameraId::ALL {
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                let frame = Mat::default();
                barrier.arrive(cam, frame);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let snapshot = barrier.pop().unwrap();
        for cam in CameraId::ALL {
            assert!(snapshot.get(cam).is_some());
        }
    }
}
