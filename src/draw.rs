// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-place drawing and contour extraction.

use crate::{
    image::Mat,
    ops::{Color, Contour, ContourApprox, ContourMode, Shape},
};
use image::Rgba;
use imageproc::{
    contours::{self, BorderType},
    drawing::{self, Canvas},
};

/// Drawing surface over a `Mat` of any channel count. Colors are passed as
/// RGBA and stored in the buffer's own layout.
struct MatCanvas<'a>(&'a mut Mat);

impl Canvas for MatCanvas<'_> {
    type Pixel = Rgba<u8>;

    fn dimensions(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }

    fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        let c = self.0.channels() as usize;
        let i = (y as usize * self.0.width() as usize + x as usize) * c;
        let px = &self.0.data()[i..i + c];
        match c {
            1 => Rgba([px[0], px[0], px[0], 255]),
            3 => Rgba([px[2], px[1], px[0], 255]),
            _ => Rgba([px[2], px[1], px[0], px[3]]),
        }
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        let (w, h) = self.dimensions();
        if x >= w || y >= h {
            return;
        }
        let c = self.0.channels() as usize;
        let i = (y as usize * w as usize + x as usize) * c;
        let px = &mut self.0.data_mut()[i..i + c];
        let [r, g, b, a] = color.0;
        match c {
            1 => px[0] = luma(r, g, b),
            3 => px.copy_from_slice(&[b, g, r]),
            _ => px.copy_from_slice(&[b, g, r, a]),
        }
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

fn rgba(color: Color) -> Rgba<u8> {
    Rgba([color.r, color.g, color.b, 255])
}

/// First and last ring offset of a stroke `thickness` pixels wide centred on
/// the outline. Positive offsets move inwards.
fn stroke_offsets(thickness: i32) -> (i64, i64) {
    let t = thickness.max(1) as i64;
    let start = -(t / 2);
    (start, start + t - 1)
}

/// Fills the half-open box `[x0, x1) x [y0, y1)` after clipping it to the
/// canvas.
fn fill_clipped(canvas: &mut MatCanvas, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
    let (w, h) = canvas.dimensions();
    let (x0, x1) = (x0.max(0), x1.min(w as i64));
    let (y0, y1) = (y0.max(0), y1.min(h as i64));
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.draw_pixel(x as u32, y as u32, color);
        }
    }
}

pub(crate) fn render(dst: &mut Mat, shape: &Shape) {
    let mut canvas = MatCanvas(dst);
    match shape {
        Shape::Rectangle {
            x,
            y,
            width,
            height,
            color,
            thickness,
        } => rectangle(&mut canvas, *x, *y, *width, *height, rgba(*color), *thickness),
        Shape::Circle {
            center_x,
            center_y,
            radius,
            color,
            thickness,
        } => circle(&mut canvas, (*center_x, *center_y), *radius, rgba(*color), *thickness),
        Shape::Line {
            x1,
            y1,
            x2,
            y2,
            color,
            thickness,
        } => line(&mut canvas, (*x1, *y1), (*x2, *y2), rgba(*color), *thickness),
        Shape::Contours {
            contours,
            index,
            color,
            thickness,
        } => {
            let selected: Vec<&Contour> = if *index < 0 {
                contours.iter().collect()
            } else {
                contours.get(*index as usize).into_iter().collect()
            };
            for contour in selected {
                polygon(&mut canvas, &contour.points, rgba(*color), *thickness);
            }
        }
    }
}

fn rectangle(
    canvas: &mut MatCanvas,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    color: Rgba<u8>,
    thickness: i32,
) {
    if width <= 0 || height <= 0 {
        return;
    }
    let (x, y) = (x as i64, y as i64);
    let (x1, y1) = (x + width as i64, y + height as i64);
    if thickness < 0 {
        fill_clipped(canvas, x, y, x1, y1, color);
        return;
    }

    // The stroke is the outer box minus whatever the innermost ring encloses.
    let (first, last) = stroke_offsets(thickness);
    let (ox0, oy0, ox1, oy1) = (x + first, y + first, x1 - first, y1 - first);
    let (ix0, iy0, ix1, iy1) = (x + last + 1, y + last + 1, x1 - last - 1, y1 - last - 1);
    if ix0 >= ix1 || iy0 >= iy1 {
        fill_clipped(canvas, ox0, oy0, ox1, oy1, color);
        return;
    }
    fill_clipped(canvas, ox0, oy0, ox1, iy0, color);
    fill_clipped(canvas, ox0, iy1, ox1, oy1, color);
    fill_clipped(canvas, ox0, iy0, ix0, iy1, color);
    fill_clipped(canvas, ix1, iy0, ox1, iy1, color);
}

/// Half width of the span a disk of radius `r` covers `dy` rows from its
/// centre, or `None` when the row misses it.
fn disk_span(r: i64, dy: i64) -> Option<i64> {
    if r < 0 {
        return None;
    }
    let (r, dy) = (r as f64, dy as f64);
    let s = r * r + r - dy * dy;
    (s >= 0.0).then(|| s.sqrt().floor() as i64)
}

fn circle(
    canvas: &mut MatCanvas,
    center: (i32, i32),
    radius: i32,
    color: Rgba<u8>,
    thickness: i32,
) {
    if radius < 0 {
        return;
    }
    let (cx, cy, radius) = (center.0 as i64, center.1 as i64, radius as i64);
    let (outer, inner) = if thickness < 0 {
        (radius, -1)
    } else {
        let (first, last) = stroke_offsets(thickness);
        (radius - first, radius - last - 1)
    };
    if outer < 0 {
        return;
    }

    let (_, h) = canvas.dimensions();
    let rows = (cy - outer).max(0)..(cy + outer + 1).min(h as i64);
    for y in rows {
        let dy = y - cy;
        let Some(o) = disk_span(outer, dy) else {
            continue;
        };
        match disk_span(inner, dy) {
            Some(i) => {
                fill_clipped(canvas, cx - o, y, cx - i, y + 1, color);
                fill_clipped(canvas, cx + i + 1, y, cx + o + 1, y + 1, color);
            }
            None => fill_clipped(canvas, cx - o, y, cx + o + 1, y + 1, color),
        }
    }
}

/// Clips a segment to the canvas grown by `margin` pixels on every side.
fn clip_segment(
    (w, h): (u32, u32),
    margin: f64,
    a: (f64, f64),
    b: (f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0f64, 1f64);
    let edges = [
        (-dx, a.0 + margin),
        (dx, w as f64 - 1.0 + margin - a.0),
        (-dy, a.1 + margin),
        (dy, h as f64 - 1.0 + margin - a.1),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((
        (a.0 + t0 * dx, a.1 + t0 * dy),
        (a.0 + t1 * dx, a.1 + t1 * dy),
    ))
}

fn line(
    canvas: &mut MatCanvas,
    from: (i32, i32),
    to: (i32, i32),
    color: Rgba<u8>,
    thickness: i32,
) {
    let t = thickness.max(1) as f64;
    let a = (from.0 as f64, from.1 as f64);
    let b = (to.0 as f64, to.1 as f64);
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();

    if t > 1.0 {
        let half = t / 2.0;
        if len > 0.0 {
            let (nx, ny) = (-dy / len * half, dx / len * half);
            let quad = [
                (a.0 + nx, a.1 + ny),
                (b.0 + nx, b.1 + ny),
                (b.0 - nx, b.1 - ny),
                (a.0 - nx, a.1 - ny),
            ];
            fill_polygon(canvas, &quad, color);
        } else {
            let (x, y, r) = (from.0 as i64, from.1 as i64, half as i64);
            fill_clipped(canvas, x - r, y - r, x + r + 1, y + r + 1, color);
        }
    }

    if let Some((a, b)) = clip_segment(canvas.dimensions(), 1.0, a, b) {
        drawing::draw_line_segment_mut(
            canvas,
            (a.0 as f32, a.1 as f32),
            (b.0 as f32, b.1 as f32),
            color,
        );
    }
}

/// Even-odd scanline fill sampled at pixel centres.
fn fill_polygon(canvas: &mut MatCanvas, pts: &[(f64, f64)], color: Rgba<u8>) {
    if pts.len() < 3 {
        return;
    }
    let (_, h) = canvas.dimensions();
    let lo = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let hi = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let rows = (lo.ceil().max(0.0) as i64)..((hi.floor() + 1.0).min(h as f64) as i64);

    let mut xs = Vec::with_capacity(pts.len());
    for y in rows {
        let yf = y as f64;
        xs.clear();
        for (i, &(x0, y0)) in pts.iter().enumerate() {
            let (x1, y1) = pts[(i + 1) % pts.len()];
            if (y0 <= yf && yf < y1) || (y1 <= yf && yf < y0) {
                xs.push(x0 + (yf - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        xs.sort_by(f64::total_cmp);
        for pair in xs.chunks_exact(2) {
            let (x0, x1) = (pair[0].ceil() as i64, pair[1].floor() as i64);
            fill_clipped(canvas, x0, y, x1 + 1, y + 1, color);
        }
    }
}

/// Collapses repeated points, including any run of closing points equal to
/// the first one.
fn distinct_outline(points: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let mut points = points.to_vec();
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn polygon(canvas: &mut MatCanvas, points: &[(i32, i32)], color: Rgba<u8>, thickness: i32) {
    let pts = distinct_outline(points);
    match pts.len() {
        0 => {}
        1 => {
            let (x, y) = (pts[0].0 as i64, pts[0].1 as i64);
            fill_clipped(canvas, x, y, x + 1, y + 1, color);
        }
        n => {
            if thickness < 0 && n >= 3 {
                let outline: Vec<(f64, f64)> =
                    pts.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
                fill_polygon(canvas, &outline, color);
            }
            let stroke = if thickness < 0 { 1 } else { thickness };
            for i in 0..n {
                line(canvas, pts[i], pts[(i + 1) % n], color, stroke);
            }
        }
    }
}

/// Drops points lying on a straight run between their neighbours.
fn compress(points: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let points = distinct_outline(points);
    let n = points.len();
    if n < 3 {
        return points;
    }
    let dir = |a: (i32, i32), b: (i32, i32)| ((b.0 - a.0).signum(), (b.1 - a.1).signum());
    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            dir(prev, points[i]) != dir(points[i], next)
        })
        .map(|i| points[i])
        .collect()
}

pub(crate) fn find_contours(src: &Mat, mode: ContourMode, approx: ContourApprox) -> Vec<Contour> {
    let plane = if src.channels() == 1 {
        src.to_gray_image()
    } else {
        src.split().into_iter().next()
    };
    let Some(plane) = plane else {
        return Vec::new();
    };

    contours::find_contours::<i32>(&plane)
        .into_iter()
        .filter(|c| match mode {
            ContourMode::External => {
                matches!(c.border_type, BorderType::Outer) && c.parent.is_none()
            }
            ContourMode::List => true,
        })
        .map(|c| {
            let points: Vec<(i32, i32)> = c.points.iter().map(|p| (p.x, p.y)).collect();
            let points = match approx {
                ContourApprox::None => points,
                ContourApprox::Simple => compress(&points),
            };
            Contour { points }
        })
        .collect()
}
