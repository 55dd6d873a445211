// SPDX-License-Identifier: GPL-3.0-only

//! Single-producer/single-consumer hand-off between a capture source and
//! the render thread
//!
//! The producer overwrites the latest frame and raises the `available`
//! flag. The consumer test-and-clears the flag and takes whatever frame is
//! latest at that moment, so every published frame is composited at most
//! once and stale frames are simply replaced.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::types::CameraFrame;

#[derive(Debug, Default)]
pub struct FrameSlot {
    available: AtomicBool,
    latest: Mutex<Option<Arc<CameraFrame>>>,
    published: AtomicU64,
    consumed: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Producer side: replace the latest frame and flag it
    pub fn publish(&self, frame: Arc<CameraFrame>) {
        *self.latest.lock() = Some(frame);
        self.published.fetch_add(1, Ordering::Relaxed);
        self.available.store(true, Ordering::Release);
    }

    /// Consumer side: the latest frame if one arrived since the last take
    pub fn take(&self) -> Option<Arc<CameraFrame>> {
        if !self.available.swap(false, Ordering::AcqRel) {
            return None;
        }
        let frame = self.latest.lock().take();
        if frame.is_some() {
            self.consumed.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn has_pending(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Frames delivered by the producer
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames taken by the consumer
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

/// Where a capture session delivers frames
///
/// Usually one slot; in single-source mode one camera feeds both slots.
#[derive(Debug, Clone)]
pub struct FrameTarget {
    slots: Vec<Arc<FrameSlot>>,
}

impl FrameTarget {
    pub fn single(slot: Arc<FrameSlot>) -> Self {
        Self { slots: vec![slot] }
    }

    pub fn fan_out(slots: impl IntoIterator<Item = Arc<FrameSlot>>) -> Self {
        Self {
            slots: slots.into_iter().collect(),
        }
    }

    pub fn publish(&self, frame: CameraFrame) {
        let frame = Arc::new(frame);
        for slot in &self.slots {
            slot.publish(Arc::clone(&frame));
        }
    }

    pub fn slots(&self) -> &[Arc<FrameSlot>] {
        &self.slots
    }
}
