// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Owning handles over arena ids.
//!
//! An [`Image`] or [`Capture`] is either live or released. It starts live
//! and becomes released exactly once, either through `dispose()` or when it
//! is dropped; whichever happens first calls into the arena and the other
//! does nothing. The transition is a single atomic swap so an explicit
//! dispose racing a drop on another thread still releases once.
//!
//! Every operation on a released handle fails with
//! [`Error::InvalidHandle`] without touching the arena.
//!
//! ```
//! use cvbind::{handle::{Image, SharedArena}, NativeArena};
//! use std::sync::Arc;
//!
//! # fn main() -> cvbind::Result<()> {
//! let arena: SharedArena = Arc::new(NativeArena::new());
//! let color = Image::new(&arena, 100, 100, 3)?;
//! let gray = color.gray()?;
//! assert_eq!(gray.channels()?, 1);
//!
//! color.dispose();
//! assert!(color.width().is_err());
//! # Ok(())
//! # }
//! ```

use crate::{
    arena::{Arena, BufferId, DeviceId},
    error::{Error, Result},
    ops::{Color, Contour, ContourApprox, ContourMode, Shape, Transform},
};
use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Arena shared between handles. Handles keep it alive until they are
/// released.
pub type SharedArena = Arc<dyn Arena>;

/// Id plus the flag that guards its single release.
struct Owned<K: Copy> {
    key: K,
    live: AtomicBool,
    arena: SharedArena,
    free: fn(&dyn Arena, K),
}

impl<K: Copy> Owned<K> {
    fn new(arena: SharedArena, key: K, free: fn(&dyn Arena, K)) -> Self {
        Self {
            key,
            live: AtomicBool::new(true),
            arena,
            free,
        }
    }

    fn key(&self) -> Result<K> {
        if self.live.load(Ordering::Acquire) {
            Ok(self.key)
        } else {
            Err(Error::InvalidHandle)
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn release(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            (self.free)(self.arena.as_ref(), self.key);
        }
    }

    /// Gives up ownership without releasing.
    fn forget(&self) -> Option<K> {
        self.live
            .swap(false, Ordering::AcqRel)
            .then_some(self.key)
    }
}

impl<K: Copy> Drop for Owned<K> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a pixel buffer.
///
/// Transforms return new handles and leave `self` untouched; disposing the
/// predecessor is up to the caller. Accessors always ask the arena, so they
/// observe drawing done through any handle.
pub struct Image {
    inner: Owned<BufferId>,
}

impl Image {
    /// Adopts `id`, which must not be owned by another handle.
    pub fn wrap(arena: SharedArena, id: BufferId) -> Self {
        Self {
            inner: Owned::new(arena, id, |arena, id| arena.release(id)),
        }
    }

    /// Zero sized image.
    pub fn empty(arena: &SharedArena) -> Self {
        Self::wrap(arena.clone(), arena.create_empty())
    }

    /// Zero filled image with 1, 3 or 4 channels.
    pub fn new(arena: &SharedArena, width: u32, height: u32, channels: u8) -> Result<Self> {
        let id = arena
            .create(width, height, channels)
            .ok_or(Error::Allocation("create"))?;
        Ok(Self::wrap(arena.clone(), id))
    }

    pub fn load(arena: &SharedArena, path: impl AsRef<Path>) -> Result<Self> {
        let id = arena
            .load(path.as_ref())
            .ok_or(Error::Allocation("load"))?;
        Ok(Self::wrap(arena.clone(), id))
    }

    pub fn decode(arena: &SharedArena, bytes: &[u8]) -> Result<Self> {
        let id = arena.decode(bytes).ok_or(Error::Allocation("decode"))?;
        Ok(Self::wrap(arena.clone(), id))
    }

    pub fn id(&self) -> Result<BufferId> {
        self.inner.key()
    }

    pub fn arena(&self) -> &SharedArena {
        &self.inner.arena
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    /// Releases the buffer. Further calls do nothing.
    pub fn dispose(&self) {
        self.inner.release();
    }

    /// Hands the id to the caller, who becomes responsible for releasing it.
    pub fn into_raw(self) -> Result<BufferId> {
        self.inner.forget().ok_or(Error::InvalidHandle)
    }

    fn query<T>(
        &self,
        what: &'static str,
        f: impl FnOnce(&dyn Arena, BufferId) -> Option<T>,
    ) -> Result<T> {
        let id = self.id()?;
        f(self.arena().as_ref(), id).ok_or(Error::OperationFailed(what))
    }

    pub fn width(&self) -> Result<u32> {
        self.query("width", |arena, id| arena.width(id))
    }

    pub fn height(&self) -> Result<u32> {
        self.query("height", |arena, id| arena.height(id))
    }

    pub fn channels(&self) -> Result<u8> {
        self.query("channels", |arena, id| arena.channels(id))
    }

    pub fn data_len(&self) -> Result<usize> {
        self.query("data_len", |arena, id| arena.data_len(id))
    }

    /// Address of the pixel data, valid until the next draw, release or
    /// [`Capture::read`] into this image.
    pub fn data_ptr(&self) -> Result<*const u8> {
        self.query("data_ptr", |arena, id| arena.data_ptr(id))
    }

    /// Copy of the pixel data.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.query("pixels", |arena, id| arena.pixels(id))
    }

    pub fn transform(&self, op: &Transform) -> Result<Image> {
        let id = self.id()?;
        let arena = self.arena();
        let out = arena
            .transform(id, op)
            .ok_or(Error::OperationFailed(op.name()))?;
        Ok(Image::wrap(arena.clone(), out))
    }

    pub fn copy(&self) -> Result<Image> {
        self.transform(&Transform::Copy)
    }

    pub fn gray(&self) -> Result<Image> {
        self.transform(&Transform::Gray)
    }

    pub fn bgr_to_rgb(&self) -> Result<Image> {
        self.transform(&Transform::BgrToRgb)
    }

    pub fn bgr_to_hsv(&self) -> Result<Image> {
        self.transform(&Transform::BgrToHsv)
    }

    pub fn hsv_to_bgr(&self) -> Result<Image> {
        self.transform(&Transform::HsvToBgr)
    }

    pub fn bgr_to_lab(&self) -> Result<Image> {
        self.transform(&Transform::BgrToLab)
    }

    pub fn lab_to_bgr(&self) -> Result<Image> {
        self.transform(&Transform::LabToBgr)
    }

    pub fn resize(&self, width: i32, height: i32, interpolation: i32) -> Result<Image> {
        self.transform(&Transform::Resize {
            width,
            height,
            interpolation,
        })
    }

    pub fn flip(&self, mode: i32) -> Result<Image> {
        self.transform(&Transform::Flip { mode })
    }

    pub fn rotate(&self, code: i32) -> Result<Image> {
        self.transform(&Transform::Rotate { code })
    }

    pub fn gaussian_blur(&self, kernel_size: i32, sigma: f64) -> Result<Image> {
        self.transform(&Transform::GaussianBlur { kernel_size, sigma })
    }

    pub fn median_blur(&self, kernel_size: i32) -> Result<Image> {
        self.transform(&Transform::MedianBlur { kernel_size })
    }

    pub fn bilateral_filter(
        &self,
        diameter: i32,
        sigma_color: f64,
        sigma_space: f64,
    ) -> Result<Image> {
        self.transform(&Transform::BilateralFilter {
            diameter,
            sigma_color,
            sigma_space,
        })
    }

    pub fn canny(&self, threshold1: f64, threshold2: f64) -> Result<Image> {
        self.transform(&Transform::Canny {
            threshold1,
            threshold2,
        })
    }

    pub fn sobel(&self, dx: i32, dy: i32, ksize: i32) -> Result<Image> {
        self.transform(&Transform::Sobel { dx, dy, ksize })
    }

    pub fn laplacian(&self, ksize: i32) -> Result<Image> {
        self.transform(&Transform::Laplacian { ksize })
    }

    pub fn sharpen(&self) -> Result<Image> {
        self.transform(&Transform::Sharpen)
    }

    pub fn erode(&self, kernel_size: i32, iterations: i32) -> Result<Image> {
        self.transform(&Transform::Erode {
            kernel_size,
            iterations,
        })
    }

    pub fn dilate(&self, kernel_size: i32, iterations: i32) -> Result<Image> {
        self.transform(&Transform::Dilate {
            kernel_size,
            iterations,
        })
    }

    pub fn morphology_ex(&self, op: i32, kernel_size: i32) -> Result<Image> {
        self.transform(&Transform::MorphologyEx { op, kernel_size })
    }

    pub fn threshold(&self, thresh: f64, maxval: f64, kind: i32) -> Result<Image> {
        self.transform(&Transform::Threshold {
            thresh,
            maxval,
            kind,
        })
    }

    pub fn adaptive_threshold(
        &self,
        max_value: f64,
        method: i32,
        kind: i32,
        block_size: i32,
        c: f64,
    ) -> Result<Image> {
        self.transform(&Transform::AdaptiveThreshold {
            max_value,
            method,
            kind,
            block_size,
            c,
        })
    }

    pub fn equalize_hist(&self) -> Result<Image> {
        self.transform(&Transform::EqualizeHist)
    }

    pub fn denoise(&self, h: f32, template_window: i32, search_window: i32) -> Result<Image> {
        self.transform(&Transform::Denoise {
            h,
            template_window,
            search_window,
        })
    }

    pub fn denoise_colored(
        &self,
        h: f32,
        h_color: f32,
        template_window: i32,
        search_window: i32,
    ) -> Result<Image> {
        self.transform(&Transform::DenoiseColored {
            h,
            h_color,
            template_window,
            search_window,
        })
    }

    /// Draws into this image in place.
    pub fn draw(&self, shape: &Shape) -> Result<()> {
        let id = self.id()?;
        self.arena().draw(id, shape);
        Ok(())
    }

    pub fn rectangle(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        color: Color,
        thickness: i32,
    ) -> Result<()> {
        self.draw(&Shape::Rectangle {
            x,
            y,
            width,
            height,
            color,
            thickness,
        })
    }

    pub fn circle(
        &self,
        center: (i32, i32),
        radius: i32,
        color: Color,
        thickness: i32,
    ) -> Result<()> {
        self.draw(&Shape::Circle {
            center_x: center.0,
            center_y: center.1,
            radius,
            color,
            thickness,
        })
    }

    pub fn line(
        &self,
        from: (i32, i32),
        to: (i32, i32),
        color: Color,
        thickness: i32,
    ) -> Result<()> {
        self.draw(&Shape::Line {
            x1: from.0,
            y1: from.1,
            x2: to.0,
            y2: to.1,
            color,
            thickness,
        })
    }

    pub fn draw_contours(
        &self,
        contours: &[Contour],
        index: i32,
        color: Color,
        thickness: i32,
    ) -> Result<()> {
        self.draw(&Shape::Contours {
            contours: contours.to_vec(),
            index,
            color,
            thickness,
        })
    }

    pub fn find_contours(&self, mode: ContourMode, approx: ContourApprox) -> Result<Vec<Contour>> {
        self.query("find_contours", |arena, id| {
            arena.find_contours(id, mode, approx)
        })
    }

    /// Encodes to the format named by `ext`.
    ///
    /// An empty vector means nothing was produced (unknown format, empty
    /// image or codec failure). Only a released handle is an error.
    pub fn encode(&self, ext: &str) -> Result<Vec<u8>> {
        let id = self.id()?;
        Ok(self.arena().encode(id, ext))
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let id = self.id()?;
        if self.arena().write(id, path.as_ref()) {
            Ok(())
        } else {
            Err(Error::OperationFailed("write"))
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.id() {
            Ok(id) => write!(f, "Image({id:?})"),
            Err(_) => f.write_str("Image(released)"),
        }
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.width(), self.height(), self.channels()) {
            (Ok(w), Ok(h), Ok(c)) => write!(f, "{w}x{h}x{c}"),
            _ => f.write_str("released"),
        }
    }
}

/// Handle to an open capture device.
///
/// A capture is meant to have one reader at a time;
/// [`FramePoller`](crate::video::FramePoller) enforces that by taking
/// ownership of it.
pub struct Capture {
    inner: Owned<DeviceId>,
}

impl Capture {
    pub fn wrap(arena: SharedArena, id: DeviceId) -> Self {
        Self {
            inner: Owned::new(arena, id, |arena, id| arena.device_release(id)),
        }
    }

    pub fn open(arena: &SharedArena, index: i32) -> Result<Self> {
        let id = arena
            .device_open(index)
            .ok_or(Error::DeviceUnavailable(index))?;
        Ok(Self::wrap(arena.clone(), id))
    }

    pub fn id(&self) -> Result<DeviceId> {
        self.inner.key()
    }

    pub fn arena(&self) -> &SharedArena {
        &self.inner.arena
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub fn dispose(&self) {
        self.inner.release();
    }

    pub fn into_raw(self) -> Result<DeviceId> {
        self.inner.forget().ok_or(Error::InvalidHandle)
    }

    /// Reads the next frame into `dst`, replacing its pixel data.
    /// `Ok(false)` is a missed read.
    pub fn read(&self, dst: &Image) -> Result<bool> {
        let dev = self.id()?;
        let dst = dst.id()?;
        Ok(self.arena().device_read(dev, dst))
    }

    /// Reads the next frame into a new image, `Ok(None)` on a missed read.
    pub fn read_frame(&self) -> Result<Option<Image>> {
        let dev = self.id()?;
        let frame = Image::empty(self.arena());
        if self.arena().device_read(dev, frame.id()?) {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    /// Property value, `0.0` for unknown properties.
    pub fn get(&self, prop: i32) -> Result<f64> {
        let dev = self.id()?;
        Ok(self.arena().device_get(dev, prop))
    }

    pub fn set(&self, prop: i32, value: f64) -> Result<bool> {
        let dev = self.id()?;
        Ok(self.arena().device_set(dev, prop, value))
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.id() {
            Ok(id) => write!(f, "Capture({id:?})"),
            Err(_) => f.write_str("Capture(released)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::NativeArena;

    fn arena() -> SharedArena {
        Arc::new(NativeArena::new())
    }

    #[test]
    fn dispose_is_idempotent() {
        let arena = arena();
        let img = Image::new(&arena, 2, 2, 1).unwrap();
        img.dispose();
        img.dispose();
        assert!(!img.is_live());
        assert!(matches!(img.width(), Err(Error::InvalidHandle)));
        assert!(matches!(img.encode(".png"), Err(Error::InvalidHandle)));
        drop(img);
        assert_eq!(arena.live_buffers(), 0);
    }

    #[test]
    fn into_raw_skips_release() {
        let arena = arena();
        let img = Image::empty(&arena);
        let id = img.into_raw().unwrap();
        assert_eq!(arena.live_buffers(), 1);
        arena.release(id);
        assert_eq!(arena.live_buffers(), 0);
    }

    #[test]
    fn encode_failure_is_empty() {
        let arena = arena();
        let img = Image::new(&arena, 2, 2, 3).unwrap();
        assert!(img.encode(".unknown").unwrap().is_empty());
        assert!(Image::empty(&arena).encode(".png").unwrap().is_empty());
    }

    #[test]
    fn failed_transform_reports_name() {
        let arena = arena();
        let img = Image::new(&arena, 2, 2, 1).unwrap();
        match img.bgr_to_hsv() {
            Err(Error::OperationFailed(name)) => assert_eq!(name, "bgr_to_hsv"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(img.is_live());
        assert_eq!(arena.live_buffers(), 1);
    }
}
