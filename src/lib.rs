// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # cvbind
//!
//! Handle-based image processing and video capture, usable from Rust and
//! through a C ABI.
//!
//! Pixel buffers and capture devices live in an [`Arena`] and are addressed
//! by generation-tagged ids. Rust callers hold them through owning
//! [`Image`](handle::Image) and [`Capture`](handle::Capture) handles that
//! release their id exactly once, on `dispose()` or on drop. C callers use
//! the raw ids exported by [`ffi`].
//!
//! ## Features
//!
//! - **Operations**: color conversion, resizing, flips and rotation,
//!   blurring, edge detection, morphology, thresholding, histogram
//!   equalization, denoising, contours and in-place drawing.
//! - **Codecs**: PNG, JPEG, BMP and TIFF through `image`, with JPEG routed
//!   through libjpeg-turbo when the `turbojpeg` feature is enabled.
//! - **Background processing**: a [`Worker`](worker::Worker) pool that
//!   moves encoded bytes, never ids, between threads.
//! - **Capture**: a timer driven [`FramePoller`](video::FramePoller) and a
//!   V4L2 backend behind the `v4l2` feature.
//!
//! ## Example
//!
//! ```
//! use cvbind::{handle::{Image, SharedArena}, ops::Color, NativeArena};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let arena: SharedArena = Arc::new(NativeArena::new());
//!
//! let frame = Image::new(&arena, 320, 240, 3)?;
//! frame.rectangle(40, 40, 100, 60, Color::new(255, 255, 255), -1)?;
//!
//! let edges = frame.gray()?.canny(50.0, 150.0)?;
//! let png = edges.encode(".png")?;
//! assert!(!png.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod arena;
mod color;
mod draw;
pub mod error;
pub mod ffi;
mod filter;
pub mod handle;
pub mod image;
pub mod ops;
pub mod pipeline;
pub mod slots;
pub mod video;
pub mod worker;

pub use arena::{Arena, BufferId, DeviceId, NativeArena};
pub use error::{Error, Result};
