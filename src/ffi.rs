// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! C ABI.
//!
//! All entry points share one process-wide [`NativeArena`], created on first
//! use and never torn down. Handles cross the boundary as `uint64_t` arena
//! ids with `0` meaning NULL. Ids are generation tagged, so a released id
//! passed back in is rejected instead of touching freed memory.
//!
//! Byte and contour results are allocated with `malloc` and must be
//! released with [`cv_free_bytes`] and [`cv_free_contours`] respectively,
//! never with [`cv_mat_release`].
//!
//! The declarations are mirrored in `include/cvbind.h`.

#![allow(non_snake_case, clippy::missing_safety_doc, clippy::too_many_arguments)]

use crate::{
    arena::{Arena, BufferId, DeviceId, NativeArena},
    ops::{Color, Contour, ContourApprox, ContourMode, Shape, Transform},
    video::CaptureBackend,
};
use libc::{c_char, c_double, c_float, c_int};
use std::{
    ffi::CStr,
    panic::{self, AssertUnwindSafe},
    path::Path,
    ptr, slice,
    sync::OnceLock,
};
use tracing::{error, warn};

/// Encoded bytes returned by [`cv_imencode`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BytesResult {
    pub data: *mut u8,
    pub len: c_int,
}

impl BytesResult {
    const NULL: Self = Self {
        data: ptr::null_mut(),
        len: 0,
    };
}

/// Contours returned by [`cv_find_contours`]. Contour `i` has
/// `contour_sizes[i]` points stored as `x, y` pairs in `contours[i]`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ContoursResult {
    pub contours: *mut *mut c_int,
    pub contour_sizes: *mut c_int,
    pub num_contours: c_int,
}

impl ContoursResult {
    const NULL: Self = Self {
        contours: ptr::null_mut(),
        contour_sizes: ptr::null_mut(),
        num_contours: 0,
    };
}

static ARENA: OnceLock<NativeArena> = OnceLock::new();

fn capture_backend() -> Box<dyn CaptureBackend> {
    #[cfg(feature = "v4l2")]
    {
        Box::new(crate::video::V4l2Capture::default())
    }
    #[cfg(not(feature = "v4l2"))]
    {
        Box::new(crate::video::NullCapture)
    }
}

/// The arena behind every C entry point.
pub fn global_arena() -> &'static NativeArena {
    ARENA.get_or_init(|| NativeArena::with_capture(capture_backend()))
}

/// Runs an entry point body, turning a panic into the call's failure value
/// so it never unwinds into the caller.
fn guard<T>(name: &str, fallback: T, body: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
        error!("{name} panicked");
        fallback
    })
}

fn to_int<T: TryInto<c_int>>(v: T) -> c_int {
    v.try_into().unwrap_or(c_int::MAX)
}

fn transform(mat: u64, op: Transform) -> u64 {
    guard(op.name(), 0, || {
        BufferId::from_raw(mat)
            .and_then(|id| global_arena().transform(id, &op))
            .map_or(0, BufferId::to_raw)
    })
}

fn draw(mat: u64, shape: Shape) {
    guard("draw", (), || {
        if let Some(id) = BufferId::from_raw(mat) {
            global_arena().draw(id, &shape);
        }
    })
}

unsafe fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    match unsafe { CStr::from_ptr(s) }.to_str() {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("string argument is not UTF-8: {e}");
            None
        }
    }
}

/// Copies `src` into a fresh `malloc` allocation. NULL for an empty slice or
/// allocation failure.
fn malloc_copy<T: Copy>(src: &[T]) -> *mut T {
    if src.is_empty() {
        return ptr::null_mut();
    }
    let dst = unsafe { libc::malloc(std::mem::size_of_val(src)) }.cast::<T>();
    if !dst.is_null() {
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
    }
    dst
}

/// Library version as a static NUL-terminated string.
#[no_mangle]
pub extern "C" fn cv_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}

// ============================================================================
// Buffer Lifecycle
// ============================================================================

/// Allocate an empty (0x0) image.
///
/// @return New image handle, never 0
#[no_mangle]
pub extern "C" fn cv_mat_create() -> u64 {
    guard("cv_mat_create", 0, || {
        global_arena().create_empty().to_raw()
    })
}

/// Allocate a zero filled image.
///
/// @param width Width in pixels
/// @param height Height in pixels
/// @param channels 1, 3 (BGR) or 4 (BGRA)
/// @return New image handle, 0 on invalid arguments
#[no_mangle]
pub extern "C" fn cv_mat_new(width: c_int, height: c_int, channels: c_int) -> u64 {
    guard("cv_mat_new", 0, || {
        let (Ok(w), Ok(h), Ok(c)) = (
            u32::try_from(width),
            u32::try_from(height),
            u8::try_from(channels),
        ) else {
            return 0;
        };
        global_arena().create(w, h, c).map_or(0, BufferId::to_raw)
    })
}

/// Release an image. Stale or unknown handles are ignored.
///
/// @param mat Image handle (0 is ignored)
#[no_mangle]
pub extern "C" fn cv_mat_release(mat: u64) {
    guard("cv_mat_release", (), || {
        if let Some(id) = BufferId::from_raw(mat) {
            global_arena().release(id);
        }
    })
}

/// Number of images currently allocated.
#[no_mangle]
pub extern "C" fn cv_live_mats() -> c_int {
    guard("cv_live_mats", 0, || {
        to_int(global_arena().live_buffers())
    })
}

// ============================================================================
// Codecs
// ============================================================================

/// Load an image file.
///
/// @param filename NUL-terminated UTF-8 path
/// @return New image handle, 0 if the file is missing or not an image
#[no_mangle]
pub unsafe extern "C" fn cv_imread(filename: *const c_char) -> u64 {
    guard("cv_imread", 0, || {
        let Some(path) = (unsafe { c_str(filename) }) else {
            return 0;
        };
        global_arena()
            .load(Path::new(path))
            .map_or(0, BufferId::to_raw)
    })
}

/// Write an image, choosing the format from the file extension.
///
/// @param filename NUL-terminated UTF-8 path
/// @param mat Image handle
/// @return 1 on success, 0 on failure
#[no_mangle]
pub unsafe extern "C" fn cv_imwrite(filename: *const c_char, mat: u64) -> c_int {
    guard("cv_imwrite", 0, || {
        let Some(path) = (unsafe { c_str(filename) }) else {
            return 0;
        };
        let ok = BufferId::from_raw(mat)
            .is_some_and(|id| global_arena().write(id, Path::new(path)));
        c_int::from(ok)
    })
}

/// Decode an encoded image held in memory.
///
/// @param data Encoded bytes
/// @param len Length of data in bytes
/// @return New image handle, 0 on malformed data
#[no_mangle]
pub unsafe extern "C" fn cv_imdecode(data: *const u8, len: c_int) -> u64 {
    guard("cv_imdecode", 0, || {
        let Ok(len) = usize::try_from(len) else {
            return 0;
        };
        if data.is_null() || len == 0 {
            return 0;
        }
        let bytes = unsafe { slice::from_raw_parts(data, len) };
        global_arena().decode(bytes).map_or(0, BufferId::to_raw)
    })
}

/// Encode an image.
///
/// @param ext Format extension such as ".png" or ".jpg"
/// @param mat Image handle
/// @return Encoded bytes, `{NULL, 0}` on failure. Release with
///         cv_free_bytes().
#[no_mangle]
pub unsafe extern "C" fn cv_imencode(ext: *const c_char, mat: u64) -> BytesResult {
    guard("cv_imencode", BytesResult::NULL, || {
        let (Some(ext), Some(id)) = (unsafe { c_str(ext) }, BufferId::from_raw(mat)) else {
            return BytesResult::NULL;
        };
        let bytes = global_arena().encode(id, ext);
        let Ok(len) = c_int::try_from(bytes.len()) else {
            return BytesResult::NULL;
        };
        let data = malloc_copy(&bytes);
        if data.is_null() {
            return BytesResult::NULL;
        }
        BytesResult { data, len }
    })
}

/// Free bytes returned by cv_imencode().
#[no_mangle]
pub unsafe extern "C" fn cv_free_bytes(bytes: BytesResult) {
    if !bytes.data.is_null() {
        unsafe { libc::free(bytes.data.cast()) };
    }
}

// ============================================================================
// Color Conversion
// ============================================================================

#[no_mangle]
pub extern "C" fn cv_cvtColor_bgr2gray(mat: u64) -> u64 {
    transform(mat, Transform::Gray)
}

#[no_mangle]
pub extern "C" fn cv_cvtColor_bgr2rgb(mat: u64) -> u64 {
    transform(mat, Transform::BgrToRgb)
}

#[no_mangle]
pub extern "C" fn cv_cvtColor_bgr2hsv(mat: u64) -> u64 {
    transform(mat, Transform::BgrToHsv)
}

#[no_mangle]
pub extern "C" fn cv_cvtColor_hsv2bgr(mat: u64) -> u64 {
    transform(mat, Transform::HsvToBgr)
}

#[no_mangle]
pub extern "C" fn cv_cvtColor_bgr2lab(mat: u64) -> u64 {
    transform(mat, Transform::BgrToLab)
}

#[no_mangle]
pub extern "C" fn cv_cvtColor_lab2bgr(mat: u64) -> u64 {
    transform(mat, Transform::LabToBgr)
}

// ============================================================================
// Geometry
// ============================================================================

/// Resize an image.
///
/// @param mat Source image
/// @param width Target width
/// @param height Target height
/// @param interpolation 0 nearest, 1 linear, 2 cubic, 3 area, 4 lanczos
/// @return New image handle, 0 on failure
#[no_mangle]
pub extern "C" fn cv_resize(mat: u64, width: c_int, height: c_int, interpolation: c_int) -> u64 {
    transform(
        mat,
        Transform::Resize {
            width,
            height,
            interpolation,
        },
    )
}

/// @param mode 0 around the x axis, >0 around the y axis, <0 both
#[no_mangle]
pub extern "C" fn cv_flip(mat: u64, mode: c_int) -> u64 {
    transform(mat, Transform::Flip { mode })
}

/// @param code 0 90° clockwise, 1 180°, 2 90° counter-clockwise
#[no_mangle]
pub extern "C" fn cv_rotate(mat: u64, code: c_int) -> u64 {
    transform(mat, Transform::Rotate { code })
}

// ============================================================================
// Filters
// ============================================================================

#[no_mangle]
pub extern "C" fn cv_gaussian_blur(mat: u64, kernel_size: c_int, sigma: c_double) -> u64 {
    transform(mat, Transform::GaussianBlur { kernel_size, sigma })
}

#[no_mangle]
pub extern "C" fn cv_median_blur(mat: u64, kernel_size: c_int) -> u64 {
    transform(mat, Transform::MedianBlur { kernel_size })
}

#[no_mangle]
pub extern "C" fn cv_bilateral_filter(
    mat: u64,
    d: c_int,
    sigma_color: c_double,
    sigma_space: c_double,
) -> u64 {
    transform(
        mat,
        Transform::BilateralFilter {
            diameter: d,
            sigma_color,
            sigma_space,
        },
    )
}

/// Canny edge detection. The result is single channel.
#[no_mangle]
pub extern "C" fn cv_canny(mat: u64, threshold1: c_double, threshold2: c_double) -> u64 {
    transform(
        mat,
        Transform::Canny {
            threshold1,
            threshold2,
        },
    )
}

#[no_mangle]
pub extern "C" fn cv_sobel(mat: u64, dx: c_int, dy: c_int, ksize: c_int) -> u64 {
    transform(mat, Transform::Sobel { dx, dy, ksize })
}

#[no_mangle]
pub extern "C" fn cv_laplacian(mat: u64, ksize: c_int) -> u64 {
    transform(mat, Transform::Laplacian { ksize })
}

#[no_mangle]
pub extern "C" fn cv_sharpen(mat: u64) -> u64 {
    transform(mat, Transform::Sharpen)
}

// ============================================================================
// Morphology and Thresholding
// ============================================================================

#[no_mangle]
pub extern "C" fn cv_erode(mat: u64, kernel_size: c_int, iterations: c_int) -> u64 {
    transform(
        mat,
        Transform::Erode {
            kernel_size,
            iterations,
        },
    )
}

#[no_mangle]
pub extern "C" fn cv_dilate(mat: u64, kernel_size: c_int, iterations: c_int) -> u64 {
    transform(
        mat,
        Transform::Dilate {
            kernel_size,
            iterations,
        },
    )
}

/// @param op 2 open, 3 close, 4 gradient, 5 top hat, 6 black hat
#[no_mangle]
pub extern "C" fn cv_morphology_ex(mat: u64, op: c_int, kernel_size: c_int) -> u64 {
    transform(mat, Transform::MorphologyEx { op, kernel_size })
}

/// @param kind 0 binary, 1 binary inverted, 2 truncate, 3 to zero,
///        4 to zero inverted; add 8 to pick the threshold with Otsu
#[no_mangle]
pub extern "C" fn cv_threshold(mat: u64, thresh: c_double, maxval: c_double, kind: c_int) -> u64 {
    transform(
        mat,
        Transform::Threshold {
            thresh,
            maxval,
            kind,
        },
    )
}

/// Adaptive threshold of a single channel image.
///
/// @param method 0 mean, 1 gaussian weighted
/// @param kind 0 binary, 1 binary inverted
/// @param block_size Neighbourhood size, odd and at least 3
/// @param c Constant subtracted from the neighbourhood mean
#[no_mangle]
pub extern "C" fn cv_adaptive_threshold(
    mat: u64,
    max_value: c_double,
    method: c_int,
    kind: c_int,
    block_size: c_int,
    c: c_double,
) -> u64 {
    transform(
        mat,
        Transform::AdaptiveThreshold {
            max_value,
            method,
            kind,
            block_size,
            c,
        },
    )
}

#[no_mangle]
pub extern "C" fn cv_equalize_hist(mat: u64) -> u64 {
    transform(mat, Transform::EqualizeHist)
}

// ============================================================================
// Denoising
// ============================================================================

#[no_mangle]
pub extern "C" fn cv_fast_nl_means_denoising(
    mat: u64,
    h: c_float,
    template_window: c_int,
    search_window: c_int,
) -> u64 {
    transform(
        mat,
        Transform::Denoise {
            h,
            template_window,
            search_window,
        },
    )
}

#[no_mangle]
pub extern "C" fn cv_fast_nl_means_denoising_colored(
    mat: u64,
    h: c_float,
    h_color: c_float,
    template_window: c_int,
    search_window: c_int,
) -> u64 {
    transform(
        mat,
        Transform::DenoiseColored {
            h,
            h_color,
            template_window,
            search_window,
        },
    )
}

// ============================================================================
// Contours and Drawing
// ============================================================================

/// Find contours in a binary image (non-zero pixels are foreground).
///
/// @param mat Image handle
/// @param mode 0 external borders only, 1-3 every border
/// @param method 1 every border pixel, 2 straight runs compressed
/// @return Contours, empty on failure. Release with cv_free_contours().
#[no_mangle]
pub extern "C" fn cv_find_contours(mat: u64, mode: c_int, method: c_int) -> ContoursResult {
    guard("cv_find_contours", ContoursResult::NULL, || {
        let (Some(id), Some(mode), Some(approx)) = (
            BufferId::from_raw(mat),
            ContourMode::from_code(mode),
            ContourApprox::from_code(method),
        ) else {
            return ContoursResult::NULL;
        };
        let Some(found) = global_arena().find_contours(id, mode, approx) else {
            return ContoursResult::NULL;
        };
        if found.is_empty() {
            return ContoursResult::NULL;
        }

        let sizes: Vec<c_int> = found.iter().map(|c| to_int(c.points.len())).collect();
        let arrays: Vec<*mut c_int> = found
            .iter()
            .map(|c| {
                let flat: Vec<c_int> = c.points.iter().flat_map(|&(x, y)| [x, y]).collect();
                malloc_copy(&flat)
            })
            .collect();
        let result = ContoursResult {
            contours: malloc_copy(&arrays),
            contour_sizes: malloc_copy(&sizes),
            num_contours: to_int(found.len()),
        };
        if result.contours.is_null()
            || result.contour_sizes.is_null()
            || arrays.iter().any(|a| a.is_null())
        {
            for a in arrays {
                unsafe { libc::free(a.cast()) };
            }
            unsafe {
                libc::free(result.contours.cast());
                libc::free(result.contour_sizes.cast());
            }
            return ContoursResult::NULL;
        }
        result
    })
}

/// Free contours returned by cv_find_contours().
#[no_mangle]
pub unsafe extern "C" fn cv_free_contours(result: ContoursResult) {
    if !result.contours.is_null() {
        for i in 0..result.num_contours.max(0) as usize {
            unsafe { libc::free((*result.contours.add(i)).cast()) };
        }
        unsafe { libc::free(result.contours.cast()) };
    }
    if !result.contour_sizes.is_null() {
        unsafe { libc::free(result.contour_sizes.cast()) };
    }
}

unsafe fn read_contours(result: &ContoursResult) -> Vec<Contour> {
    if result.contours.is_null() || result.contour_sizes.is_null() {
        return Vec::new();
    }
    let n = result.num_contours.max(0) as usize;
    let arrays = unsafe { slice::from_raw_parts(result.contours, n) };
    let sizes = unsafe { slice::from_raw_parts(result.contour_sizes, n) };
    arrays
        .iter()
        .zip(sizes)
        .map(|(&points, &size)| {
            let size = size.max(0) as usize;
            if points.is_null() || size == 0 {
                return Contour::default();
            }
            let flat = unsafe { slice::from_raw_parts(points, size * 2) };
            Contour {
                points: flat.chunks_exact(2).map(|p| (p[0], p[1])).collect(),
            }
        })
        .collect()
}

/// Draw contours in place.
///
/// @param mat Image handle
/// @param contours Contours, typically from cv_find_contours()
/// @param contour_idx Contour to draw, negative draws all
/// @param thickness Line thickness, negative fills
#[no_mangle]
pub unsafe extern "C" fn cv_draw_contours(
    mat: u64,
    contours: ContoursResult,
    contour_idx: c_int,
    r: c_int,
    g: c_int,
    b: c_int,
    thickness: c_int,
) {
    guard("cv_draw_contours", (), || {
        let contours = unsafe { read_contours(&contours) };
        if contours.is_empty() {
            return;
        }
        draw(
            mat,
            Shape::Contours {
                contours,
                index: contour_idx,
                color: Color::from_ints(r, g, b),
                thickness,
            },
        );
    })
}

/// Draw a rectangle in place. A negative thickness fills it.
#[no_mangle]
pub extern "C" fn cv_rectangle(
    mat: u64,
    x: c_int,
    y: c_int,
    width: c_int,
    height: c_int,
    r: c_int,
    g: c_int,
    b: c_int,
    thickness: c_int,
) {
    draw(
        mat,
        Shape::Rectangle {
            x,
            y,
            width,
            height,
            color: Color::from_ints(r, g, b),
            thickness,
        },
    );
}

#[no_mangle]
pub extern "C" fn cv_circle(
    mat: u64,
    center_x: c_int,
    center_y: c_int,
    radius: c_int,
    r: c_int,
    g: c_int,
    b: c_int,
    thickness: c_int,
) {
    draw(
        mat,
        Shape::Circle {
            center_x,
            center_y,
            radius,
            color: Color::from_ints(r, g, b),
            thickness,
        },
    );
}

#[no_mangle]
pub extern "C" fn cv_line(
    mat: u64,
    x1: c_int,
    y1: c_int,
    x2: c_int,
    y2: c_int,
    r: c_int,
    g: c_int,
    b: c_int,
    thickness: c_int,
) {
    draw(
        mat,
        Shape::Line {
            x1,
            y1,
            x2,
            y2,
            color: Color::from_ints(r, g, b),
            thickness,
        },
    );
}

// ============================================================================
// Accessors
// ============================================================================

/// @return Width in pixels, 0 for an unknown handle
#[no_mangle]
pub extern "C" fn cv_mat_width(mat: u64) -> c_int {
    guard("cv_mat_width", 0, || {
        BufferId::from_raw(mat)
            .and_then(|id| global_arena().width(id))
            .map_or(0, to_int)
    })
}

#[no_mangle]
pub extern "C" fn cv_mat_height(mat: u64) -> c_int {
    guard("cv_mat_height", 0, || {
        BufferId::from_raw(mat)
            .and_then(|id| global_arena().height(id))
            .map_or(0, to_int)
    })
}

#[no_mangle]
pub extern "C" fn cv_mat_channels(mat: u64) -> c_int {
    guard("cv_mat_channels", 0, || {
        BufferId::from_raw(mat)
            .and_then(|id| global_arena().channels(id))
            .map_or(0, c_int::from)
    })
}

/// Pointer to the interleaved pixel data.
///
/// The pointer stays valid until the image is released, drawn into or
/// filled by cv_videocapture_read().
///
/// @return Pixel data, NULL for an unknown handle
#[no_mangle]
pub extern "C" fn cv_mat_data(mat: u64) -> *const u8 {
    guard("cv_mat_data", ptr::null(), || {
        BufferId::from_raw(mat)
            .and_then(|id| global_arena().data_ptr(id))
            .unwrap_or(ptr::null())
    })
}

#[no_mangle]
pub extern "C" fn cv_mat_data_len(mat: u64) -> c_int {
    guard("cv_mat_data_len", 0, || {
        BufferId::from_raw(mat)
            .and_then(|id| global_arena().data_len(id))
            .map_or(0, to_int)
    })
}

// ============================================================================
// Video Capture
// ============================================================================

/// Open a capture device.
///
/// @param index Device index
/// @return New capture handle, 0 if the device cannot be opened
#[no_mangle]
pub extern "C" fn cv_videocapture_create(index: c_int) -> u64 {
    guard("cv_videocapture_create", 0, || {
        global_arena().device_open(index).map_or(0, DeviceId::to_raw)
    })
}

#[no_mangle]
pub extern "C" fn cv_videocapture_release(cap: u64) {
    guard("cv_videocapture_release", (), || {
        if let Some(dev) = DeviceId::from_raw(cap) {
            global_arena().device_release(dev);
        }
    })
}

/// Read the next frame into `dst`. This replaces the pixel data of `dst`,
/// so pointers from cv_mat_data() for it are no longer valid.
///
/// @return 1 when a frame was read, 0 on a missed read or bad handle
#[no_mangle]
pub extern "C" fn cv_videocapture_read(cap: u64, dst: u64) -> c_int {
    guard("cv_videocapture_read", 0, || {
        let (Some(dev), Some(dst)) = (DeviceId::from_raw(cap), BufferId::from_raw(dst)) else {
            return 0;
        };
        c_int::from(global_arena().device_read(dev, dst))
    })
}

/// @param prop_id Property code, e.g. 3 frame width, 4 frame height, 5 fps
#[no_mangle]
pub extern "C" fn cv_videocapture_get(cap: u64, prop_id: c_int) -> c_double {
    guard("cv_videocapture_get", 0.0, || {
        DeviceId::from_raw(cap).map_or(0.0, |dev| global_arena().device_get(dev, prop_id))
    })
}

/// @return 1 if the device accepted the value, 0 otherwise
#[no_mangle]
pub extern "C" fn cv_videocapture_set(cap: u64, prop_id: c_int, value: c_double) -> c_int {
    guard("cv_videocapture_set", 0, || {
        let ok = DeviceId::from_raw(cap)
            .is_some_and(|dev| global_arena().device_set(dev, prop_id, value));
        c_int::from(ok)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_failure_values() {
        assert_eq!(guard("cv_test", 0u64, || panic!("boom")), 0);
        assert!(guard("cv_test", ptr::null::<u8>(), || panic!("boom")).is_null());
        assert_eq!(guard("cv_test", 0, || 7), 7);
    }
}
