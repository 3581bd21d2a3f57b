// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Neighbourhood filters, morphology, thresholding, histogram equalization
//! and non-local means denoising.
//!
//! Multichannel buffers are processed one plane at a time unless noted.
//! Borders are reflected without repeating the edge pixel (`gfedcb|abcdefgh|gfedcba`)
//! except for adaptive thresholding, which replicates the edge.

use crate::{color, image::Mat};
use image::{GrayImage, Luma};
use imageproc::{contrast, distance_transform::Norm, edges, filter, morphology};

#[derive(Copy, Clone)]
enum Border {
    Reflect101,
    Replicate,
}

fn border_index(i: isize, n: usize, border: Border) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    match border {
        Border::Replicate => i.clamp(0, n - 1) as usize,
        Border::Reflect101 => {
            let mut i = i;
            loop {
                if i < 0 {
                    i = -i;
                } else if i >= n {
                    i = 2 * (n - 1) - i;
                } else {
                    return i as usize;
                }
            }
        }
    }
}

/// Largest kernel worth building for `src`: anything wider only samples
/// the reflected border again.
fn kernel_limit(src: &Mat) -> usize {
    (src.width().max(src.height()) as usize)
        .saturating_mul(2)
        .saturating_add(1)
}

/// Rounds `k` up to an odd size no larger than `limit`, which must be odd.
fn odd(k: i32, limit: usize) -> usize {
    let k = k.max(1) as usize;
    let k = if k % 2 == 0 { k + 1 } else { k };
    k.min(limit)
}

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn plane_f32(plane: &GrayImage) -> Vec<f32> {
    plane.as_raw().iter().map(|v| *v as f32).collect()
}

fn plane_from_f32(width: u32, height: u32, values: &[f32]) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        Luma([saturate(values[(y * width + x) as usize])])
    })
}

/// Correlates a plane with a row kernel then a column kernel.
fn separable(
    src: &[f32],
    width: usize,
    height: usize,
    kx: &[f32],
    ky: &[f32],
    border: Border,
) -> Vec<f32> {
    let rx = (kx.len() / 2) as isize;
    let ry = (ky.len() / 2) as isize;

    let mut tmp = vec![0f32; src.len()];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0;
            for (k, c) in kx.iter().enumerate() {
                acc += c * row[border_index(x as isize + k as isize - rx, width, border)];
            }
            tmp[y * width + x] = acc;
        }
    }

    let mut out = vec![0f32; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, c) in ky.iter().enumerate() {
                let yi = border_index(y as isize + k as isize - ry, height, border);
                acc += c * tmp[yi * width + x];
            }
            out[y * width + x] = acc;
        }
    }
    out
}

fn correlate3x3(src: &[f32], width: usize, height: usize, kernel: &[f32; 9]) -> Vec<f32> {
    let mut out = vec![0f32; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for ky in 0..3 {
                let yi = border_index(y as isize + ky as isize - 1, height, Border::Reflect101);
                for kx in 0..3 {
                    let xi = border_index(x as isize + kx as isize - 1, width, Border::Reflect101);
                    acc += kernel[ky * 3 + kx] * src[yi * width + xi];
                }
            }
            out[y * width + x] = acc;
        }
    }
    out
}

fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let r = (size / 2) as f64;
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| (-(i as f64 - r).powi(2) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= sum);
    kernel.into_iter().map(|v| v as f32).collect()
}

fn binomial(n: usize) -> Vec<f32> {
    let mut row = vec![1f32];
    for _ in 0..n {
        let mut next = vec![0f32; row.len() + 1];
        for (i, v) in row.iter().enumerate() {
            next[i] += v;
            next[i + 1] += v;
        }
        row = next;
    }
    row
}

/// Derivative kernel of the given order for an aperture of `size` taps.
fn deriv_kernel(order: usize, size: usize) -> Option<Vec<f32>> {
    if size == 1 {
        return match order {
            0 => Some(vec![1.0]),
            1 => Some(vec![-1.0, 0.0, 1.0]),
            2 => Some(vec![1.0, -2.0, 1.0]),
            _ => None,
        };
    }
    if order >= size {
        return None;
    }
    let mut kernel = binomial(size - 1 - order);
    for _ in 0..order {
        let mut next = vec![0f32; kernel.len() + 1];
        for (i, v) in kernel.iter().enumerate() {
            next[i] -= v;
            next[i + 1] += v;
        }
        kernel = next;
    }
    Some(kernel)
}

fn map_planes_f32<F>(src: &Mat, mut f: F) -> Option<Mat>
where
    F: FnMut(&[f32], usize, usize) -> Vec<f32>,
{
    let (w, h) = (src.width(), src.height());
    src.map_planes(|plane| {
        let out = f(&plane_f32(plane), w as usize, h as usize);
        plane_from_f32(w, h, &out)
    })
}

pub fn gaussian_blur(src: &Mat, kernel_size: i32, sigma: f64) -> Option<Mat> {
    let kernel = gaussian_kernel(odd(kernel_size, kernel_limit(src)), sigma);
    map_planes_f32(src, |p, w, h| {
        separable(p, w, h, &kernel, &kernel, Border::Reflect101)
    })
}

pub fn median_blur(src: &Mat, kernel_size: i32) -> Option<Mat> {
    let r = (odd(kernel_size, kernel_limit(src)) / 2) as u32;
    src.map_planes(|plane| filter::median_filter(plane, r, r))
}

/// Edge preserving smoothing. The color distance is the sum of absolute
/// channel differences, so all channels share one weight.
pub fn bilateral(src: &Mat, diameter: i32, sigma_color: f64, sigma_space: f64) -> Option<Mat> {
    if src.is_empty() {
        return None;
    }
    let sigma_color = if sigma_color > 0.0 { sigma_color } else { 1.0 };
    let sigma_space = if sigma_space > 0.0 { sigma_space } else { 1.0 };
    let radius = if diameter <= 0 {
        (sigma_space * 1.5).round() as isize
    } else {
        (diameter / 2) as isize
    }
    .clamp(1, src.width().max(src.height()) as isize);

    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let (w, h) = (src.width() as usize, src.height() as usize);
    let c = src.channels() as usize;
    let data = src.data();

    let mut window = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f64;
            if r2 <= (radius * radius) as f64 {
                window.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
    }

    let mut dst = Mat::zeros(src.width(), src.height(), src.channels())?;
    let out = dst.data_mut();
    let mut acc = vec![0f64; c];
    for y in 0..h {
        for x in 0..w {
            let center = &data[(y * w + x) * c..(y * w + x + 1) * c];
            acc.iter_mut().for_each(|v| *v = 0.0);
            let mut wsum = 0.0;
            for &(dx, dy, space_w) in &window {
                let xi = border_index(x as isize + dx, w, Border::Reflect101);
                let yi = border_index(y as isize + dy, h, Border::Reflect101);
                let px = &data[(yi * w + xi) * c..(yi * w + xi + 1) * c];
                let dist: f64 = center
                    .iter()
                    .zip(px)
                    .map(|(a, b)| (*a as f64 - *b as f64).abs())
                    .sum();
                let weight = space_w * (dist * dist * color_coeff).exp();
                for (a, v) in acc.iter_mut().zip(px) {
                    *a += weight * *v as f64;
                }
                wsum += weight;
            }
            for (ch, a) in acc.iter().enumerate() {
                out[(y * w + x) * c + ch] = saturate((a / wsum) as f32);
            }
        }
    }
    Some(dst)
}

/// Canny edge map. Color input is converted to luma first; the result is
/// always single channel.
pub fn canny(src: &Mat, threshold1: f64, threshold2: f64) -> Option<Mat> {
    let gray = color::to_gray(src)?.to_gray_image()?;
    let low = threshold1.min(threshold2) as f32;
    let high = threshold1.max(threshold2) as f32;
    Some(Mat::from_gray(edges::canny(&gray, low, high)))
}

/// Sobel derivative saturated to 8 bits (negative responses clip to 0).
pub fn sobel(src: &Mat, dx: i32, dy: i32, ksize: i32) -> Option<Mat> {
    if dx < 0 || dy < 0 || dx + dy == 0 {
        return None;
    }
    let size = match ksize {
        1 | 3 | 5 | 7 => ksize as usize,
        _ => return None,
    };
    let kx = deriv_kernel(dx as usize, size)?;
    let ky = deriv_kernel(dy as usize, size)?;
    map_planes_f32(src, |p, w, h| separable(p, w, h, &kx, &ky, Border::Reflect101))
}

pub fn laplacian(src: &Mat, ksize: i32) -> Option<Mat> {
    match ksize {
        1 => {
            const KERNEL: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];
            map_planes_f32(src, |p, w, h| correlate3x3(p, w, h, &KERNEL))
        }
        3 | 5 | 7 => {
            let size = ksize as usize;
            let d2 = deriv_kernel(2, size)?;
            let smooth = deriv_kernel(0, size)?;
            map_planes_f32(src, |p, w, h| {
                let xx = separable(p, w, h, &d2, &smooth, Border::Reflect101);
                let yy = separable(p, w, h, &smooth, &d2, Border::Reflect101);
                xx.iter().zip(&yy).map(|(a, b)| a + b).collect()
            })
        }
        _ => None,
    }
}

pub fn sharpen(src: &Mat) -> Option<Mat> {
    const KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
    map_planes_f32(src, |p, w, h| correlate3x3(p, w, h, &KERNEL))
}

fn morph_radius(kernel_size: i32) -> u8 {
    (kernel_size.max(1) / 2).min(u8::MAX as i32) as u8
}

/// Applies `f` up to `iterations` times. Every pass spreads by at least one
/// pixel, so the result is stable after as many passes as the larger side.
fn repeat<F>(plane: &GrayImage, iterations: i32, f: F) -> GrayImage
where
    F: Fn(&GrayImage) -> GrayImage,
{
    let passes = (iterations.max(0) as u32).min(plane.width().max(plane.height()));
    let mut out = plane.clone();
    for _ in 0..passes {
        out = f(&out);
    }
    out
}

pub fn erode(src: &Mat, kernel_size: i32, iterations: i32) -> Option<Mat> {
    let r = morph_radius(kernel_size);
    src.map_planes(|plane| repeat(plane, iterations, |p| morphology::erode(p, Norm::LInf, r)))
}

pub fn dilate(src: &Mat, kernel_size: i32, iterations: i32) -> Option<Mat> {
    let r = morph_radius(kernel_size);
    src.map_planes(|plane| repeat(plane, iterations, |p| morphology::dilate(p, Norm::LInf, r)))
}

fn zip_planes<F>(a: &GrayImage, b: &GrayImage, f: F) -> GrayImage
where
    F: Fn(u8, u8) -> u8,
{
    let mut out = a.clone();
    for (o, v) in out.iter_mut().zip(b.iter()) {
        *o = f(*o, *v);
    }
    out
}

/// Compound morphology: 0 erode, 1 dilate, 2 open, 3 close, 4 gradient,
/// 5 top-hat, 6 black-hat.
pub fn morphology_ex(src: &Mat, op: i32, kernel_size: i32) -> Option<Mat> {
    if !(0..=6).contains(&op) {
        return None;
    }
    let r = morph_radius(kernel_size);
    src.map_planes(|plane| {
        let erode = |p: &GrayImage| morphology::erode(p, Norm::LInf, r);
        let dilate = |p: &GrayImage| morphology::dilate(p, Norm::LInf, r);
        match op {
            0 => erode(plane),
            1 => dilate(plane),
            2 => dilate(&erode(plane)),
            3 => erode(&dilate(plane)),
            4 => zip_planes(&dilate(plane), &erode(plane), u8::saturating_sub),
            5 => zip_planes(plane, &dilate(&erode(plane)), u8::saturating_sub),
            _ => zip_planes(&erode(&dilate(plane)), plane, u8::saturating_sub),
        }
    })
}

const THRESH_OTSU: i32 = 8;

/// Fixed level threshold. `kind` is 0 binary, 1 binary inverted, 2
/// truncate, 3 to zero, 4 to zero inverted; adding 8 picks the level with
/// Otsu's method (single channel only).
pub fn threshold(src: &Mat, thresh: f64, maxval: f64, kind: i32) -> Option<Mat> {
    if kind < 0 || kind & !(THRESH_OTSU | 7) != 0 {
        return None;
    }
    let base = kind & 7;
    if base > 4 {
        return None;
    }
    let thresh = if kind & THRESH_OTSU != 0 {
        let gray = src.to_gray_image()?;
        contrast::otsu_level(&gray) as f64
    } else {
        thresh
    };

    let maxv = saturate(maxval as f32);
    let trunc = thresh.floor().clamp(0.0, 255.0) as u8;
    let mut dst = src.clone();
    for v in dst.data_mut() {
        let above = *v as f64 > thresh;
        *v = match base {
            0 if above => maxv,
            0 => 0,
            1 if above => 0,
            1 => maxv,
            2 if above => trunc,
            3 if !above => 0,
            4 if above => 0,
            _ => *v,
        };
    }
    Some(dst)
}

/// Locally adaptive threshold over a `block_size` neighbourhood. `method`
/// 0 uses the box mean, 1 a Gaussian weighted mean; `kind` is 0 binary or
/// 1 binary inverted.
pub fn adaptive_threshold(
    src: &Mat,
    max_value: f64,
    method: i32,
    kind: i32,
    block_size: i32,
    c: f64,
) -> Option<Mat> {
    if src.channels() != 1 || !(0..=1).contains(&kind) {
        return None;
    }
    let block = odd(block_size.max(3), kernel_limit(src).max(3));
    let kernel = match method {
        0 => vec![1.0 / block as f32; block],
        1 => gaussian_kernel(block, 0.0),
        _ => return None,
    };
    let (w, h) = (src.width() as usize, src.height() as usize);
    let values: Vec<f32> = src.data().iter().map(|v| *v as f32).collect();
    let mean = separable(&values, w, h, &kernel, &kernel, Border::Replicate);

    let maxv = saturate(max_value as f32);
    let mut dst = src.clone();
    for (v, m) in dst.data_mut().iter_mut().zip(&mean) {
        let above = *v as f64 - m.round() as f64 > -c;
        *v = if above == (kind == 0) { maxv } else { 0 };
    }
    Some(dst)
}

/// Histogram equalization. Color input is equalized on luma only.
pub fn equalize_hist(src: &Mat) -> Option<Mat> {
    match src.channels() {
        1 => Some(Mat::from_gray(contrast::equalize_histogram(
            &src.to_gray_image()?,
        ))),
        3 => {
            let ycrcb = color::bgr_to_ycrcb(src)?;
            let mut planes = ycrcb.split();
            planes[0] = contrast::equalize_histogram(&planes[0]);
            color::ycrcb_to_bgr(&Mat::merge(&planes)?)
        }
        _ => None,
    }
}

fn nl_means(
    src: &[f32],
    width: usize,
    height: usize,
    strength: f32,
    template: usize,
    search: usize,
) -> Vec<f32> {
    let n = src.len();
    let tr = template / 2;
    let sr = (search / 2) as isize;
    let box_kernel = vec![1.0 / (2 * tr + 1) as f32; 2 * tr + 1];
    let h2 = strength * strength;

    let mut sum = vec![0f32; n];
    let mut wsum = vec![0f32; n];
    let mut shifted = vec![0f32; n];
    let mut diff = vec![0f32; n];
    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for y in 0..height {
                let sy = border_index(y as isize + dy, height, Border::Reflect101);
                for x in 0..width {
                    let sx = border_index(x as isize + dx, width, Border::Reflect101);
                    let i = y * width + x;
                    let q = src[sy * width + sx];
                    let d = src[i] - q;
                    shifted[i] = q;
                    diff[i] = d * d;
                }
            }
            let distance = separable(
                &diff,
                width,
                height,
                &box_kernel,
                &box_kernel,
                Border::Reflect101,
            );
            for i in 0..n {
                let weight = (-distance[i] / h2).exp();
                sum[i] += weight * shifted[i];
                wsum[i] += weight;
            }
        }
    }
    sum.iter().zip(&wsum).map(|(s, w)| s / w).collect()
}

/// Non-local means denoising applied to each channel.
pub fn denoise(src: &Mat, h: f32, template_window: i32, search_window: i32) -> Option<Mat> {
    if h <= 0.0 {
        return if src.is_empty() { None } else { Some(src.clone()) };
    }
    let limit = kernel_limit(src);
    let (t, s) = (odd(template_window, limit), odd(search_window, limit));
    map_planes_f32(src, |p, w, hh| nl_means(p, w, hh, h, t, s))
}

/// Non-local means on a BGR buffer: lightness is filtered with `h`, the
/// chroma axes with `h_color`.
pub fn denoise_colored(
    src: &Mat,
    h: f32,
    h_color: f32,
    template_window: i32,
    search_window: i32,
) -> Option<Mat> {
    if src.channels() != 3 {
        return None;
    }
    let lab = color::bgr_to_lab(src)?;
    let (w, hh) = (lab.width(), lab.height());
    let limit = kernel_limit(src);
    let (t, s) = (odd(template_window, limit), odd(search_window, limit));
    let planes: Vec<GrayImage> = lab
        .split()
        .iter()
        .enumerate()
        .map(|(i, plane)| {
            let strength = if i == 0 { h } else { h_color };
            if strength <= 0.0 {
                return plane.clone();
            }
            let out = nl_means(&plane_f32(plane), w as usize, hh as usize, strength, t, s);
            plane_from_f32(w, hh, &out)
        })
        .collect();
    color::lab_to_bgr(&Mat::merge(&planes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, data: Vec<u8>) -> Mat {
        Mat::from_vec(width, height, 1, data).unwrap()
    }

    #[test]
    fn reflect_101() {
        assert_eq!(border_index(-1, 5, Border::Reflect101), 1);
        assert_eq!(border_index(5, 5, Border::Reflect101), 3);
        assert_eq!(border_index(-2, 5, Border::Replicate), 0);
    }

    #[test]
    fn sobel_kernels() {
        assert_eq!(deriv_kernel(1, 3).unwrap(), vec![-1.0, 0.0, 1.0]);
        assert_eq!(deriv_kernel(0, 3).unwrap(), vec![1.0, 2.0, 1.0]);
        assert_eq!(deriv_kernel(2, 3).unwrap(), vec![1.0, -2.0, 1.0]);
        assert_eq!(deriv_kernel(1, 5).unwrap(), vec![-1.0, -2.0, 0.0, 2.0, 1.0]);
        assert!(deriv_kernel(3, 3).is_none());
    }

    #[test]
    fn blur_keeps_flat_image() {
        let src = gray(5, 5, vec![90; 25]);
        assert_eq!(gaussian_blur(&src, 4, 0.0).unwrap(), src);
        assert_eq!(median_blur(&src, 3).unwrap(), src);
        assert_eq!(bilateral(&src, 5, 20.0, 20.0).unwrap(), src);
        assert_eq!(denoise(&src, 10.0, 3, 5).unwrap(), src);
    }

    #[test]
    fn sobel_step_edge() {
        let mut data = vec![0u8; 36];
        for y in 0..6 {
            for x in 3..6 {
                data[y * 6 + x] = 100;
            }
        }
        let src = gray(6, 6, data);
        let dst = sobel(&src, 1, 0, 3).unwrap();
        assert_eq!(dst.data()[6 + 2], 255);
        assert_eq!(dst.data()[6], 0);
        assert!(sobel(&src, 0, 0, 3).is_none());
        assert!(sobel(&src, 1, 0, 4).is_none());
    }

    #[test]
    fn threshold_kinds() {
        let src = gray(4, 1, vec![10, 100, 150, 250]);
        assert_eq!(threshold(&src, 120.0, 255.0, 0).unwrap().data(), &[0, 0, 255, 255]);
        assert_eq!(threshold(&src, 120.0, 255.0, 1).unwrap().data(), &[255, 255, 0, 0]);
        assert_eq!(threshold(&src, 120.0, 255.0, 2).unwrap().data(), &[10, 100, 120, 120]);
        assert_eq!(threshold(&src, 120.0, 255.0, 3).unwrap().data(), &[0, 0, 150, 250]);
        assert_eq!(threshold(&src, 120.0, 255.0, 4).unwrap().data(), &[10, 100, 0, 0]);
        assert!(threshold(&src, 120.0, 255.0, 5).is_none());
    }

    #[test]
    fn morphology_on_dot() {
        let mut data = vec![0u8; 25];
        data[12] = 255;
        let src = gray(5, 5, data);
        let dilated = dilate(&src, 3, 1).unwrap();
        assert_eq!(dilated.data().iter().filter(|v| **v == 255).count(), 9);
        let opened = morphology_ex(&src, 2, 3).unwrap();
        assert!(opened.data().iter().all(|v| *v == 0));
        assert!(morphology_ex(&src, 7, 3).is_none());
    }

    #[test]
    fn adaptive_requires_gray() {
        let color = Mat::zeros(4, 4, 3).unwrap();
        assert!(adaptive_threshold(&color, 255.0, 0, 0, 3, 2.0).is_none());
        let src = gray(4, 4, vec![50; 16]);
        let dst = adaptive_threshold(&src, 255.0, 0, 0, 4, 2.0).unwrap();
        assert!(dst.data().iter().all(|v| *v == 255));
    }

    #[test]
    fn oversized_kernels_are_bounded() {
        assert_eq!(odd(i32::MAX, 13), 13);
        assert_eq!(odd(4, 13), 5);

        let src = gray(6, 6, vec![90; 36]);
        assert_eq!(gaussian_blur(&src, i32::MAX, 0.0).unwrap(), src);
        assert_eq!(median_blur(&src, i32::MAX).unwrap(), src);
        assert_eq!(bilateral(&src, i32::MAX, 20.0, 20.0).unwrap(), src);
        assert_eq!(bilateral(&src, 0, 20.0, 1e12).unwrap(), src);
        assert_eq!(denoise(&src, 10.0, i32::MAX, i32::MAX).unwrap(), src);
        let dst = adaptive_threshold(&src, 255.0, 1, 0, i32::MAX, 2.0).unwrap();
        assert!(dst.data().iter().all(|v| *v == 255));

        let mut data = vec![0u8; 36];
        data[14] = 255;
        let dot = gray(6, 6, data);
        assert!(erode(&dot, 3, i32::MAX).unwrap().data().iter().all(|v| *v == 0));
        assert!(dilate(&dot, 3, i32::MAX).unwrap().data().iter().all(|v| *v == 255));
    }
}
