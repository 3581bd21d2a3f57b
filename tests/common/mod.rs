// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

#![allow(dead_code)]

use cvbind::{
    handle::SharedArena,
    ops::{Contour, ContourApprox, ContourMode, Shape, Transform},
    video::CaptureBackend,
    Arena, BufferId, DeviceId, NativeArena,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Arena that counts the calls reaching a `NativeArena`.
#[derive(Default)]
pub struct CountingArena {
    inner: NativeArena,
    calls: AtomicUsize,
    releases: AtomicUsize,
    device_releases: AtomicUsize,
}

impl CountingArena {
    pub fn with_capture(capture: Box<dyn CaptureBackend>) -> Self {
        Self {
            inner: NativeArena::with_capture(capture),
            ..Default::default()
        }
    }

    pub fn shared(self) -> (Arc<Self>, SharedArena) {
        let counting = Arc::new(self);
        let shared: SharedArena = counting.clone();
        (counting, shared)
    }

    /// Every arena call except the live counters.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn device_releases(&self) -> usize {
        self.device_releases.load(Ordering::SeqCst)
    }

    fn hit(&self) -> &NativeArena {
        self.calls.fetch_add(1, Ordering::SeqCst);
        &self.inner
    }
}

impl Arena for CountingArena {
    fn create_empty(&self) -> BufferId {
        self.hit().create_empty()
    }

    fn create(&self, width: u32, height: u32, channels: u8) -> Option<BufferId> {
        self.hit().create(width, height, channels)
    }

    fn load(&self, path: &Path) -> Option<BufferId> {
        self.hit().load(path)
    }

    fn write(&self, id: BufferId, path: &Path) -> bool {
        self.hit().write(id, path)
    }

    fn decode(&self, bytes: &[u8]) -> Option<BufferId> {
        self.hit().decode(bytes)
    }

    fn encode(&self, id: BufferId, ext: &str) -> Vec<u8> {
        self.hit().encode(id, ext)
    }

    fn transform(&self, id: BufferId, op: &Transform) -> Option<BufferId> {
        self.hit().transform(id, op)
    }

    fn draw(&self, id: BufferId, shape: &Shape) {
        self.hit().draw(id, shape)
    }

    fn find_contours(
        &self,
        id: BufferId,
        mode: ContourMode,
        approx: ContourApprox,
    ) -> Option<Vec<Contour>> {
        self.hit().find_contours(id, mode, approx)
    }

    fn width(&self, id: BufferId) -> Option<u32> {
        self.hit().width(id)
    }

    fn height(&self, id: BufferId) -> Option<u32> {
        self.hit().height(id)
    }

    fn channels(&self, id: BufferId) -> Option<u8> {
        self.hit().channels(id)
    }

    fn data_len(&self, id: BufferId) -> Option<usize> {
        self.hit().data_len(id)
    }

    fn data_ptr(&self, id: BufferId) -> Option<*const u8> {
        self.hit().data_ptr(id)
    }

    fn pixels(&self, id: BufferId) -> Option<Vec<u8>> {
        self.hit().pixels(id)
    }

    fn release(&self, id: BufferId) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.hit().release(id)
    }

    fn device_open(&self, index: i32) -> Option<DeviceId> {
        self.hit().device_open(index)
    }

    fn device_read(&self, dev: DeviceId, dst: BufferId) -> bool {
        self.hit().device_read(dev, dst)
    }

    fn device_get(&self, dev: DeviceId, prop: i32) -> f64 {
        self.hit().device_get(dev, prop)
    }

    fn device_set(&self, dev: DeviceId, prop: i32, value: f64) -> bool {
        self.hit().device_set(dev, prop, value)
    }

    fn device_release(&self, dev: DeviceId) {
        self.device_releases.fetch_add(1, Ordering::SeqCst);
        self.hit().device_release(dev)
    }

    fn live_buffers(&self) -> usize {
        self.inner.live_buffers()
    }

    fn live_devices(&self) -> usize {
        self.inner.live_devices()
    }
}
