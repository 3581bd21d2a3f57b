// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Native resource arena.
//!
//! The arena owns every pixel buffer and capture device and hands out
//! generation-tagged ids instead of addresses. It never raises errors:
//! failures are reported as `None`, `false` or an empty byte vector, and the
//! handle layer in [`crate::handle`] turns those into [`crate::Error`]s.
//!
//! Releasing an id twice is a caller bug. The arena detects it through the
//! slot generation and logs a warning instead of freeing anything, but
//! correct code relies on the handle layer never doing so.

use crate::{
    image::Mat,
    ops::{self, Contour, ContourApprox, ContourMode, Shape, Transform},
    slots::{SlotKey, SlotTable},
    video::{CaptureBackend, CaptureDevice, NullCapture},
};
use parking_lot::Mutex;
use std::{fmt, path::Path, sync::Arc};
use tracing::{debug, trace, warn};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash)]
        pub struct $name(SlotKey);

        impl $name {
            /// Non-zero integer form used across the C ABI.
            pub fn to_raw(self) -> u64 {
                self.0.to_raw()
            }

            /// Rebuilds an id from its raw form. `0` is null.
            pub fn from_raw(raw: u64) -> Option<Self> {
                SlotKey::from_raw(raw).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(
    /// Id of a pixel buffer owned by an arena.
    BufferId
);

arena_id!(
    /// Id of an open capture device owned by an arena.
    DeviceId
);

/// Allocation, operation and release of native buffers and devices.
///
/// Ids are only meaningful to the arena that issued them.
pub trait Arena: Send + Sync {
    /// Allocates a zero sized buffer.
    fn create_empty(&self) -> BufferId;

    /// Allocates a zero filled buffer.
    fn create(&self, width: u32, height: u32, channels: u8) -> Option<BufferId>;

    fn load(&self, path: &Path) -> Option<BufferId>;

    /// Encodes the buffer to `path`, picking the format from its extension.
    fn write(&self, id: BufferId, path: &Path) -> bool;

    fn decode(&self, bytes: &[u8]) -> Option<BufferId>;

    /// Encoded bytes, empty on any failure.
    fn encode(&self, id: BufferId, ext: &str) -> Vec<u8>;

    /// Produces a new buffer; the input is left untouched.
    fn transform(&self, id: BufferId, op: &Transform) -> Option<BufferId>;

    /// Draws into the buffer in place.
    fn draw(&self, id: BufferId, shape: &Shape);

    fn find_contours(
        &self,
        id: BufferId,
        mode: ContourMode,
        approx: ContourApprox,
    ) -> Option<Vec<Contour>>;

    fn width(&self, id: BufferId) -> Option<u32>;

    fn height(&self, id: BufferId) -> Option<u32>;

    fn channels(&self, id: BufferId) -> Option<u8>;

    fn data_len(&self, id: BufferId) -> Option<usize>;

    /// Address of the pixel data. Valid until the buffer is released, drawn
    /// into, or overwritten by [`device_read`](Arena::device_read).
    fn data_ptr(&self, id: BufferId) -> Option<*const u8>;

    /// Copy of the pixel data.
    fn pixels(&self, id: BufferId) -> Option<Vec<u8>>;

    fn release(&self, id: BufferId);

    fn device_open(&self, index: i32) -> Option<DeviceId>;

    /// Replaces the content of `dst` with the next frame, which invalidates
    /// any pointer from [`data_ptr`](Arena::data_ptr). `false` on a missed
    /// read; the device stays open.
    fn device_read(&self, dev: DeviceId, dst: BufferId) -> bool;

    fn device_get(&self, dev: DeviceId, prop: i32) -> f64;

    fn device_set(&self, dev: DeviceId, prop: i32, value: f64) -> bool;

    fn device_release(&self, dev: DeviceId);

    /// Buffers allocated and not yet released.
    fn live_buffers(&self) -> usize;

    /// Devices opened and not yet released.
    fn live_devices(&self) -> usize;
}

type SharedBuffer = Arc<Mutex<Arc<Mat>>>;
type SharedDevice = Arc<Mutex<Box<dyn CaptureDevice>>>;

/// In-process arena backed by slot tables.
///
/// The table locks are only held to look up or swap a slot. Every buffer
/// has its own lock: drawing holds it while rendering, and a transform
/// clones the reference counted `Mat` out of it and runs unlocked. Each
/// device likewise has its own lock, which serializes reads of one device
/// without blocking the others.
pub struct NativeArena {
    buffers: Mutex<SlotTable<SharedBuffer>>,
    devices: Mutex<SlotTable<SharedDevice>>,
    capture: Box<dyn CaptureBackend>,
}

impl Default for NativeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NativeArena {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NativeArena")
            .field("buffers", &self.live_buffers())
            .field("devices", &self.live_devices())
            .finish()
    }
}

impl NativeArena {
    /// Arena without capture devices.
    pub fn new() -> Self {
        Self::with_capture(Box::new(NullCapture))
    }

    pub fn with_capture(capture: Box<dyn CaptureBackend>) -> Self {
        Self {
            buffers: Mutex::new(SlotTable::new()),
            devices: Mutex::new(SlotTable::new()),
            capture,
        }
    }

    /// Takes ownership of `mat` and returns its id.
    pub fn insert(&self, mat: Mat) -> BufferId {
        let slot = Arc::new(Mutex::new(Arc::new(mat)));
        let id = BufferId(self.buffers.lock().insert(slot));
        debug!(?id, "allocated");
        id
    }

    fn slot(&self, id: BufferId) -> Option<SharedBuffer> {
        self.buffers.lock().get(id.0).cloned()
    }

    /// Snapshot of the buffer content.
    fn buffer(&self, id: BufferId) -> Option<Arc<Mat>> {
        self.slot(id).map(|slot| slot.lock().clone())
    }

    fn with_buffer<R>(&self, id: BufferId, f: impl FnOnce(&Mat) -> R) -> Option<R> {
        self.slot(id).map(|slot| f(slot.lock().as_ref()))
    }

    fn device(&self, dev: DeviceId) -> Option<SharedDevice> {
        self.devices.lock().get(dev.0).cloned()
    }
}

impl Arena for NativeArena {
    fn create_empty(&self) -> BufferId {
        self.insert(Mat::empty())
    }

    fn create(&self, width: u32, height: u32, channels: u8) -> Option<BufferId> {
        Mat::zeros(width, height, channels).map(|mat| self.insert(mat))
    }

    fn load(&self, path: &Path) -> Option<BufferId> {
        Mat::load(path).map(|mat| self.insert(mat))
    }

    fn write(&self, id: BufferId, path: &Path) -> bool {
        self.buffer(id).is_some_and(|mat| mat.write(path))
    }

    fn decode(&self, bytes: &[u8]) -> Option<BufferId> {
        Mat::decode(bytes).map(|mat| self.insert(mat))
    }

    fn encode(&self, id: BufferId, ext: &str) -> Vec<u8> {
        self.buffer(id)
            .and_then(|mat| mat.encode(ext))
            .unwrap_or_default()
    }

    fn transform(&self, id: BufferId, op: &Transform) -> Option<BufferId> {
        let src = self.buffer(id)?;
        match ops::apply(&src, op) {
            Some(mat) => Some(self.insert(mat)),
            None => {
                debug!(?id, "{} produced no result for {src}", op.name());
                None
            }
        }
    }

    fn draw(&self, id: BufferId, shape: &Shape) {
        if let Some(slot) = self.slot(id) {
            let mut mat = slot.lock();
            ops::render(Arc::make_mut(&mut mat), shape);
        }
    }

    fn find_contours(
        &self,
        id: BufferId,
        mode: ContourMode,
        approx: ContourApprox,
    ) -> Option<Vec<Contour>> {
        let src = self.buffer(id)?;
        ops::find_contours(&src, mode, approx)
    }

    fn width(&self, id: BufferId) -> Option<u32> {
        self.with_buffer(id, Mat::width)
    }

    fn height(&self, id: BufferId) -> Option<u32> {
        self.with_buffer(id, Mat::height)
    }

    fn channels(&self, id: BufferId) -> Option<u8> {
        self.with_buffer(id, Mat::channels)
    }

    fn data_len(&self, id: BufferId) -> Option<usize> {
        self.with_buffer(id, Mat::len)
    }

    fn data_ptr(&self, id: BufferId) -> Option<*const u8> {
        self.with_buffer(id, |mat| mat.data().as_ptr())
    }

    fn pixels(&self, id: BufferId) -> Option<Vec<u8>> {
        self.with_buffer(id, |mat| mat.data().to_vec())
    }

    fn release(&self, id: BufferId) {
        match self.buffers.lock().remove(id.0) {
            Some(_) => debug!(?id, "released"),
            None => warn!(?id, "release of unknown or stale buffer ignored"),
        }
    }

    fn device_open(&self, index: i32) -> Option<DeviceId> {
        let device = self.capture.open(index)?;
        let dev = DeviceId(self.devices.lock().insert(Arc::new(Mutex::new(device))));
        debug!(?dev, "opened capture device {index}");
        Some(dev)
    }

    fn device_read(&self, dev: DeviceId, dst: BufferId) -> bool {
        let (Some(device), Some(slot)) = (self.device(dev), self.slot(dst)) else {
            return false;
        };
        let Some(frame) = device.lock().read() else {
            trace!(?dev, "read missed");
            return false;
        };
        *slot.lock() = Arc::new(frame);
        true
    }

    fn device_get(&self, dev: DeviceId, prop: i32) -> f64 {
        self.device(dev).map_or(0.0, |device| device.lock().get(prop))
    }

    fn device_set(&self, dev: DeviceId, prop: i32, value: f64) -> bool {
        self.device(dev)
            .is_some_and(|device| device.lock().set(prop, value))
    }

    fn device_release(&self, dev: DeviceId) {
        match self.devices.lock().remove(dev.0) {
            Some(_) => debug!(?dev, "released capture device"),
            None => warn!(?dev, "release of unknown or stale device ignored"),
        }
    }

    fn live_buffers(&self) -> usize {
        self.buffers.lock().len()
    }

    fn live_devices(&self) -> usize {
        self.devices.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ops::Color, video::TestPattern};
    use std::{sync::mpsc, thread, time::Duration};

    #[test]
    fn transform_allocates_new_buffer() {
        let arena = NativeArena::new();
        let src = arena.create(4, 4, 3).unwrap();
        let dst = arena.transform(src, &Transform::Gray).unwrap();
        assert_ne!(src, dst);
        assert_eq!(arena.channels(src), Some(3));
        assert_eq!(arena.channels(dst), Some(1));
        assert_eq!(arena.live_buffers(), 2);
        arena.release(src);
        arena.release(dst);
        assert_eq!(arena.live_buffers(), 0);
    }

    #[test]
    fn stale_ids_are_ignored() {
        let arena = NativeArena::new();
        let id = arena.create_empty();
        arena.release(id);
        arena.release(id);
        let reused = arena.create(2, 2, 1).unwrap();
        assert_eq!(arena.width(id), None);
        assert_eq!(arena.width(reused), Some(2));
        assert!(arena.encode(id, ".png").is_empty());
        assert!(arena.transform(id, &Transform::Copy).is_none());
    }

    #[test]
    fn empty_buffer_fails_transforms() {
        let arena = NativeArena::new();
        let id = arena.create_empty();
        assert_eq!(arena.data_len(id), Some(0));
        assert!(arena.transform(id, &Transform::Gray).is_none());
        assert!(arena.encode(id, ".png").is_empty());
        assert_eq!(arena.live_buffers(), 1);
    }

    #[test]
    fn device_read_replaces_content() {
        let arena = NativeArena::with_capture(Box::new(TestPattern::new(1).with_size(8, 6)));
        assert!(arena.device_open(3).is_none());
        assert_eq!(arena.live_devices(), 0);

        let dev = arena.device_open(0).unwrap();
        let dst = arena.create_empty();
        assert!(arena.device_read(dev, dst));
        assert_eq!(arena.width(dst), Some(8));
        assert_eq!(arena.height(dst), Some(6));

        // A pointer taken after the read sees the new frame.
        assert!(arena.device_read(dev, dst));
        let ptr = arena.data_ptr(dst).unwrap();
        let len = arena.data_len(dst).unwrap();
        let seen = unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec();
        assert_eq!(Some(seen), arena.pixels(dst));

        arena.device_release(dev);
        assert!(!arena.device_read(dev, dst));
        assert_eq!(arena.live_devices(), 0);
    }

    #[test]
    fn busy_buffer_leaves_others_usable() {
        let arena = Arc::new(NativeArena::new());
        let busy = arena.create(64, 64, 3).unwrap();
        let other = arena.create(8, 8, 1).unwrap();

        let held = arena.slot(busy).unwrap();
        let guard = held.lock();
        let (tx, rx) = mpsc::channel();
        let worker = {
            let arena = arena.clone();
            thread::spawn(move || {
                let shape = Shape::Rectangle {
                    x: 0,
                    y: 0,
                    width: 4,
                    height: 4,
                    color: Color::new(255, 255, 255),
                    thickness: -1,
                };
                arena.draw(other, &shape);
                let copy = arena.transform(other, &Transform::Copy);
                let _ = tx.send((arena.pixels(other), copy, arena.live_buffers()));
            })
        };
        let (pixels, copy, live) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pixels.unwrap()[0], 255);
        assert!(copy.is_some());
        assert_eq!(live, 3);
        drop(guard);
        worker.join().unwrap();

        arena.draw(
            busy,
            &Shape::Line {
                x1: 0,
                y1: 0,
                x2: 63,
                y2: 0,
                color: Color::new(0, 0, 255),
                thickness: 1,
            },
        );
        assert_eq!(&arena.pixels(busy).unwrap()[..3], &[255, 0, 0]);
    }
}
