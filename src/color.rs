// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Color space conversions on interleaved BGR buffers, using the 8-bit
//! conventions: hue in `0..180`, Lab lightness scaled to `0..255` and the
//! a/b axes offset by 128.

use crate::image::Mat;

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn map_pixels<F>(src: &Mat, out_channels: u8, mut f: F) -> Option<Mat>
where
    F: FnMut(&[u8], &mut [u8]),
{
    let mut dst = Mat::zeros(src.width(), src.height(), out_channels)?;
    let ci = src.channels() as usize;
    let co = out_channels as usize;
    for (s, d) in src.data().chunks_exact(ci).zip(dst.data_mut().chunks_exact_mut(co)) {
        f(s, d);
    }
    Some(dst)
}

/// BGR or BGRA to luma. Single channel input is copied.
pub fn to_gray(src: &Mat) -> Option<Mat> {
    match src.channels() {
        1 => Some(src.clone()),
        3 | 4 => map_pixels(src, 1, |s, d| {
            d[0] = saturate(0.114 * s[0] as f32 + 0.587 * s[1] as f32 + 0.299 * s[2] as f32);
        }),
        _ => None,
    }
}

/// Swaps the first and third channel (BGR to RGB and back).
pub fn swap_red_blue(src: &Mat) -> Option<Mat> {
    if src.channels() < 3 {
        return None;
    }
    let mut dst = src.clone();
    let c = src.channels() as usize;
    dst.data_mut().chunks_exact_mut(c).for_each(|px| px.swap(0, 2));
    Some(dst)
}

pub fn bgr_to_hsv(src: &Mat) -> Option<Mat> {
    if src.channels() != 3 {
        return None;
    }
    map_pixels(src, 3, |s, d| {
        let (b, g, r) = (s[0] as f32, s[1] as f32, s[2] as f32);
        let v = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = v - min;
        let sat = if v > 0.0 { delta * 255.0 / v } else { 0.0 };
        let mut h = if delta == 0.0 {
            0.0
        } else if v == r {
            60.0 * (g - b) / delta
        } else if v == g {
            120.0 + 60.0 * (b - r) / delta
        } else {
            240.0 + 60.0 * (r - g) / delta
        };
        if h < 0.0 {
            h += 360.0;
        }
        d[0] = saturate(h / 2.0).min(179);
        d[1] = saturate(sat);
        d[2] = saturate(v);
    })
}

pub fn hsv_to_bgr(src: &Mat) -> Option<Mat> {
    if src.channels() != 3 {
        return None;
    }
    map_pixels(src, 3, |s, d| {
        let h = (s[0] as f32 * 2.0) % 360.0;
        let sat = s[1] as f32 / 255.0;
        let v = s[2] as f32;
        let c = v * sat;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match (h / 60.0) as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        d[0] = saturate(b + m);
        d[1] = saturate(g + m);
        d[2] = saturate(r + m);
    })
}

const WHITE_X: f32 = 0.950_456;
const WHITE_Z: f32 = 1.088_754;

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > 0.008_856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    let t3 = t * t * t;
    if t3 > 0.008_856 {
        t3
    } else {
        (t - 16.0 / 116.0) / 7.787
    }
}

pub fn bgr_to_lab(src: &Mat) -> Option<Mat> {
    if src.channels() != 3 {
        return None;
    }
    map_pixels(src, 3, |s, d| {
        let b = srgb_to_linear(s[0] as f32 / 255.0);
        let g = srgb_to_linear(s[1] as f32 / 255.0);
        let r = srgb_to_linear(s[2] as f32 / 255.0);

        let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / WHITE_X;
        let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
        let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / WHITE_Z;

        let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
        let l = if y > 0.008_856 {
            116.0 * fy - 16.0
        } else {
            903.3 * y
        };
        d[0] = saturate(l * 255.0 / 100.0);
        d[1] = saturate(500.0 * (fx - fy) + 128.0);
        d[2] = saturate(200.0 * (fy - fz) + 128.0);
    })
}

pub fn lab_to_bgr(src: &Mat) -> Option<Mat> {
    if src.channels() != 3 {
        return None;
    }
    map_pixels(src, 3, |s, d| {
        let l = s[0] as f32 * 100.0 / 255.0;
        let a = s[1] as f32 - 128.0;
        let bb = s[2] as f32 - 128.0;

        let fy = (l + 16.0) / 116.0;
        let fx = fy + a / 500.0;
        let fz = fy - bb / 200.0;
        let x = lab_f_inv(fx) * WHITE_X;
        let y = lab_f_inv(fy);
        let z = lab_f_inv(fz) * WHITE_Z;

        let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
        let g = -0.969_256 * x + 1.875_992 * y + 0.041_556 * z;
        let b = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

        d[0] = saturate(linear_to_srgb(b.clamp(0.0, 1.0)) * 255.0);
        d[1] = saturate(linear_to_srgb(g.clamp(0.0, 1.0)) * 255.0);
        d[2] = saturate(linear_to_srgb(r.clamp(0.0, 1.0)) * 255.0);
    })
}

pub fn bgr_to_ycrcb(src: &Mat) -> Option<Mat> {
    if src.channels() != 3 {
        return None;
    }
    map_pixels(src, 3, |s, d| {
        let (b, g, r) = (s[0] as f32, s[1] as f32, s[2] as f32);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        d[0] = saturate(y);
        d[1] = saturate((r - y) * 0.713 + 128.0);
        d[2] = saturate((b - y) * 0.564 + 128.0);
    })
}

pub fn ycrcb_to_bgr(src: &Mat) -> Option<Mat> {
    if src.channels() != 3 {
        return None;
    }
    map_pixels(src, 3, |s, d| {
        let y = s[0] as f32;
        let cr = s[1] as f32 - 128.0;
        let cb = s[2] as f32 - 128.0;
        d[0] = saturate(y + 1.773 * cb);
        d[1] = saturate(y - 0.714 * cr - 0.344 * cb);
        d[2] = saturate(y + 1.403 * cr);
    })
}

/// Packed YUYV (4:2:2) camera data to BGR.
pub fn yuyv_to_bgr(data: &[u8], width: u32, height: u32) -> Option<Mat> {
    if width % 2 != 0 || data.len() < width as usize * height as usize * 2 {
        return None;
    }
    let mut dst = Mat::zeros(width, height, 3)?;
    let pairs = data.chunks_exact(4);
    for (yuyv, out) in pairs.zip(dst.data_mut().chunks_exact_mut(6)) {
        let u = yuyv[1] as f32 - 128.0;
        let v = yuyv[3] as f32 - 128.0;
        for (k, y) in [yuyv[0], yuyv[2]].into_iter().enumerate() {
            let y = y as f32;
            out[k * 3] = saturate(y + 1.772 * u);
            out[k * 3 + 1] = saturate(y - 0.344_136 * u - 0.714_136 * v);
            out[k * 3 + 2] = saturate(y + 1.402 * v);
        }
    }
    Some(dst)
}
