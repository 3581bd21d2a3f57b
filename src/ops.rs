// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Operation catalog.
//!
//! A [`Transform`] always reads one buffer and produces a new one. A
//! [`Shape`] is drawn into an existing buffer in place. Both are plain data
//! so they can be described in JSON and shipped to worker threads.

use crate::{color, draw, filter, image::Mat};
use image::{imageops, imageops::FilterType};
use serde::{Deserialize, Serialize};

/// Operation producing a new buffer from an existing one.
///
/// Integer codes follow the usual vision library conventions, e.g. flip
/// mode `0` flips around the x axis and threshold kind `1` is the inverted
/// binary threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum Transform {
    /// Plain copy.
    Copy,
    /// BGR to single channel luma.
    Gray,
    BgrToRgb,
    BgrToHsv,
    HsvToBgr,
    BgrToLab,
    LabToBgr,
    Resize {
        width: i32,
        height: i32,
        /// 0 nearest, 1 linear, 2 cubic, 3 area, 4 lanczos
        #[serde(default = "default_interpolation")]
        interpolation: i32,
    },
    Flip {
        mode: i32,
    },
    Rotate {
        code: i32,
    },
    GaussianBlur {
        kernel_size: i32,
        #[serde(default)]
        sigma: f64,
    },
    MedianBlur {
        kernel_size: i32,
    },
    BilateralFilter {
        diameter: i32,
        sigma_color: f64,
        sigma_space: f64,
    },
    Canny {
        threshold1: f64,
        threshold2: f64,
    },
    Sobel {
        dx: i32,
        dy: i32,
        #[serde(default = "default_ksize")]
        ksize: i32,
    },
    Laplacian {
        #[serde(default = "default_ksize")]
        ksize: i32,
    },
    Sharpen,
    Erode {
        kernel_size: i32,
        #[serde(default = "default_iterations")]
        iterations: i32,
    },
    Dilate {
        kernel_size: i32,
        #[serde(default = "default_iterations")]
        iterations: i32,
    },
    MorphologyEx {
        op: i32,
        kernel_size: i32,
    },
    Threshold {
        thresh: f64,
        maxval: f64,
        #[serde(default)]
        kind: i32,
    },
    AdaptiveThreshold {
        max_value: f64,
        method: i32,
        kind: i32,
        block_size: i32,
        c: f64,
    },
    EqualizeHist,
    Denoise {
        h: f32,
        #[serde(default = "default_template_window")]
        template_window: i32,
        #[serde(default = "default_search_window")]
        search_window: i32,
    },
    DenoiseColored {
        h: f32,
        h_color: f32,
        #[serde(default = "default_template_window")]
        template_window: i32,
        #[serde(default = "default_search_window")]
        search_window: i32,
    },
}

fn default_interpolation() -> i32 {
    1
}

fn default_ksize() -> i32 {
    3
}

fn default_iterations() -> i32 {
    1
}

fn default_template_window() -> i32 {
    7
}

fn default_search_window() -> i32 {
    21
}

impl Transform {
    /// Short operation name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Copy => "copy",
            Transform::Gray => "gray",
            Transform::BgrToRgb => "bgr_to_rgb",
            Transform::BgrToHsv => "bgr_to_hsv",
            Transform::HsvToBgr => "hsv_to_bgr",
            Transform::BgrToLab => "bgr_to_lab",
            Transform::LabToBgr => "lab_to_bgr",
            Transform::Resize { .. } => "resize",
            Transform::Flip { .. } => "flip",
            Transform::Rotate { .. } => "rotate",
            Transform::GaussianBlur { .. } => "gaussian_blur",
            Transform::MedianBlur { .. } => "median_blur",
            Transform::BilateralFilter { .. } => "bilateral_filter",
            Transform::Canny { .. } => "canny",
            Transform::Sobel { .. } => "sobel",
            Transform::Laplacian { .. } => "laplacian",
            Transform::Sharpen => "sharpen",
            Transform::Erode { .. } => "erode",
            Transform::Dilate { .. } => "dilate",
            Transform::MorphologyEx { .. } => "morphology_ex",
            Transform::Threshold { .. } => "threshold",
            Transform::AdaptiveThreshold { .. } => "adaptive_threshold",
            Transform::EqualizeHist => "equalize_hist",
            Transform::Denoise { .. } => "denoise",
            Transform::DenoiseColored { .. } => "denoise_colored",
        }
    }
}

/// Runs `op` on `src`. Returns `None` when the operation does not apply to
/// the input (empty buffer, wrong channel count, invalid parameters).
pub fn apply(src: &Mat, op: &Transform) -> Option<Mat> {
    if src.is_empty() {
        return None;
    }
    match *op {
        Transform::Copy => Some(src.clone()),
        Transform::Gray => color::to_gray(src),
        Transform::BgrToRgb => color::swap_red_blue(src),
        Transform::BgrToHsv => color::bgr_to_hsv(src),
        Transform::HsvToBgr => color::hsv_to_bgr(src),
        Transform::BgrToLab => color::bgr_to_lab(src),
        Transform::LabToBgr => color::lab_to_bgr(src),
        Transform::Resize {
            width,
            height,
            interpolation,
        } => resize(src, width, height, interpolation),
        Transform::Flip { mode } => flip(src, mode),
        Transform::Rotate { code } => rotate(src, code),
        Transform::GaussianBlur { kernel_size, sigma } => {
            filter::gaussian_blur(src, kernel_size, sigma)
        }
        Transform::MedianBlur { kernel_size } => filter::median_blur(src, kernel_size),
        Transform::BilateralFilter {
            diameter,
            sigma_color,
            sigma_space,
        } => filter::bilateral(src, diameter, sigma_color, sigma_space),
        Transform::Canny {
            threshold1,
            threshold2,
        } => filter::canny(src, threshold1, threshold2),
        Transform::Sobel { dx, dy, ksize } => filter::sobel(src, dx, dy, ksize),
        Transform::Laplacian { ksize } => filter::laplacian(src, ksize),
        Transform::Sharpen => filter::sharpen(src),
        Transform::Erode {
            kernel_size,
            iterations,
        } => filter::erode(src, kernel_size, iterations),
        Transform::Dilate {
            kernel_size,
            iterations,
        } => filter::dilate(src, kernel_size, iterations),
        Transform::MorphologyEx { op, kernel_size } => {
            filter::morphology_ex(src, op, kernel_size)
        }
        Transform::Threshold {
            thresh,
            maxval,
            kind,
        } => filter::threshold(src, thresh, maxval, kind),
        Transform::AdaptiveThreshold {
            max_value,
            method,
            kind,
            block_size,
            c,
        } => filter::adaptive_threshold(src, max_value, method, kind, block_size, c),
        Transform::EqualizeHist => filter::equalize_hist(src),
        Transform::Denoise {
            h,
            template_window,
            search_window,
        } => filter::denoise(src, h, template_window, search_window),
        Transform::DenoiseColored {
            h,
            h_color,
            template_window,
            search_window,
        } => filter::denoise_colored(src, h, h_color, template_window, search_window),
    }
}

fn resize(src: &Mat, width: i32, height: i32, interpolation: i32) -> Option<Mat> {
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        return None;
    };
    Mat::byte_len(width, height, src.channels())?;
    let filter = match interpolation {
        0 => FilterType::Nearest,
        1 => FilterType::Triangle,
        2 => FilterType::CatmullRom,
        3 => FilterType::Gaussian,
        4 => FilterType::Lanczos3,
        _ => return None,
    };
    src.map_planes(|plane| imageops::resize(plane, width, height, filter))
}

fn flip(src: &Mat, mode: i32) -> Option<Mat> {
    src.map_planes(|plane| match mode {
        0 => imageops::flip_vertical(plane),
        m if m > 0 => imageops::flip_horizontal(plane),
        _ => imageops::rotate180(plane),
    })
}

fn rotate(src: &Mat, code: i32) -> Option<Mat> {
    if !(0..=2).contains(&code) {
        return None;
    }
    src.map_planes(|plane| match code {
        0 => imageops::rotate90(plane),
        1 => imageops::rotate180(plane),
        _ => imageops::rotate270(plane),
    })
}

/// Drawing color, given as red, green, blue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Clamps integer components into range.
    pub fn from_ints(r: i32, g: i32, b: i32) -> Self {
        let c = |v: i32| v.clamp(0, 255) as u8;
        Self::new(c(r), c(g), c(b))
    }
}

/// Closed polyline returned by contour extraction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour {
    pub points: Vec<(i32, i32)>,
}

/// Which contours [`find_contours`](crate::handle::Image::find_contours)
/// returns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContourMode {
    /// Outermost borders only.
    External,
    /// Every border, no hierarchy.
    List,
}

impl ContourMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ContourMode::External),
            1..=3 => Some(ContourMode::List),
            _ => None,
        }
    }
}

/// How contour points are stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContourApprox {
    /// Every border pixel.
    None,
    /// Straight runs compressed to their end points.
    Simple,
}

impl ContourApprox {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ContourApprox::None),
            2 => Some(ContourApprox::Simple),
            _ => None,
        }
    }
}

/// In-place drawing operation. A negative thickness fills the shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    Rectangle {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        color: Color,
        thickness: i32,
    },
    Circle {
        center_x: i32,
        center_y: i32,
        radius: i32,
        color: Color,
        thickness: i32,
    },
    Line {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        color: Color,
        thickness: i32,
    },
    Contours {
        contours: Vec<Contour>,
        /// Contour to draw, or every contour when negative.
        index: i32,
        color: Color,
        thickness: i32,
    },
}

/// Draws `shape` into `dst`. Empty buffers are left alone.
pub fn render(dst: &mut Mat, shape: &Shape) {
    if dst.is_empty() {
        return;
    }
    draw::render(dst, shape);
}

/// Extracts contours from a binary buffer (non-zero is foreground).
pub fn find_contours(src: &Mat, mode: ContourMode, approx: ContourApprox) -> Option<Vec<Contour>> {
    if src.is_empty() {
        return None;
    }
    Some(draw::find_contours(src, mode, approx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_json() {
        let json = r#"[{"transform":"gray"},{"transform":"gaussian_blur","kernel_size":4},{"transform":"resize","width":10,"height":5}]"#;
        let ops: Vec<Transform> = serde_json::from_str(json).unwrap();
        assert_eq!(ops[0], Transform::Gray);
        assert_eq!(
            ops[1],
            Transform::GaussianBlur {
                kernel_size: 4,
                sigma: 0.0
            }
        );
        assert_eq!(
            ops[2],
            Transform::Resize {
                width: 10,
                height: 5,
                interpolation: 1
            }
        );
    }

    #[test]
    fn geometry_shapes() {
        let src = Mat::zeros(8, 4, 3).unwrap();
        let rotated = apply(&src, &Transform::Rotate { code: 0 }).unwrap();
        assert_eq!((rotated.width(), rotated.height()), (4, 8));
        assert!(apply(&src, &Transform::Rotate { code: 7 }).is_none());

        let resized = apply(
            &src,
            &Transform::Resize {
                width: 3,
                height: 2,
                interpolation: 0,
            },
        )
        .unwrap();
        assert_eq!((resized.width(), resized.height(), resized.channels()), (3, 2, 3));
        assert!(apply(&Mat::empty(), &Transform::Copy).is_none());
    }

    #[test]
    fn flip_modes() {
        let mut src = Mat::zeros(2, 2, 1).unwrap();
        src.data_mut().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(apply(&src, &Transform::Flip { mode: 0 }).unwrap().data(), &[3, 4, 1, 2]);
        assert_eq!(apply(&src, &Transform::Flip { mode: 1 }).unwrap().data(), &[2, 1, 4, 3]);
        assert_eq!(apply(&src, &Transform::Flip { mode: -1 }).unwrap().data(), &[4, 3, 2, 1]);
    }

    #[test]
    fn oversized_resize_is_rejected() {
        let src = Mat::zeros(4, 4, 3).unwrap();
        for (width, height) in [(i32::MAX, i32::MAX), (20_000, 20_000), (-4, 4), (4, 0)] {
            let op = Transform::Resize {
                width,
                height,
                interpolation: 1,
            };
            assert!(apply(&src, &op).is_none(), "{width}x{height}");
        }
        assert!(Mat::zeros(u32::MAX, u32::MAX, 1).is_none());
        assert_eq!(Mat::byte_len(16_384, 16_384, 4), Some(1 << 30));
    }
}
