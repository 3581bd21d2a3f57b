// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use core::fmt;
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma};
use std::{io::Cursor, path::Path};
#[cfg(feature = "turbojpeg")]
use std::{error::Error, io};
use tracing::{debug, warn};

/// Native pixel buffer owned by an arena.
///
/// `Mat` stores `rows × cols × channels` bytes, row major and interleaved.
/// Three channel buffers are kept in BGR order and four channel buffers in
/// BGRA order, matching the convention of the capture and codec paths.
/// Grayscale buffers have a single channel.
///
/// A `Mat` is never handed out directly; callers see it only through the
/// accessors of the arena that owns it.
///
/// # Example
///
/// ```
/// use cvbind::image::Mat;
///
/// let mat = Mat::zeros(640, 480, 3).unwrap();
/// assert_eq!(mat.width(), 640);
/// assert_eq!(mat.height(), 480);
/// assert_eq!(mat.len(), 640 * 480 * 3);
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Mat {
    rows: u32,
    cols: u32,
    channels: u8,
    data: Vec<u8>,
}

const fn valid_channels(channels: u8) -> bool {
    matches!(channels, 1 | 3 | 4)
}

impl Mat {
    /// Largest pixel count a buffer may hold.
    pub const MAX_PIXELS: u64 = 1 << 28;

    /// Byte length of a `width × height × channels` buffer, or `None` when
    /// the geometry is empty, the channel count is unsupported or the pixel
    /// count exceeds [`Mat::MAX_PIXELS`].
    pub fn byte_len(width: u32, height: u32, channels: u8) -> Option<usize> {
        if width == 0 || height == 0 || !valid_channels(channels) {
            return None;
        }
        let pixels = (width as u64).checked_mul(height as u64)?;
        if pixels > Self::MAX_PIXELS {
            return None;
        }
        usize::try_from(pixels).ok()?.checked_mul(channels as usize)
    }

    /// Zero sized buffer with no channels.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocates a zero filled buffer.
    ///
    /// Returns `None` for a zero dimension, a channel count other than
    /// 1, 3 or 4, or more than [`Mat::MAX_PIXELS`] pixels.
    pub fn zeros(width: u32, height: u32, channels: u8) -> Option<Self> {
        let len = Self::byte_len(width, height, channels)?;
        Some(Self {
            rows: height,
            cols: width,
            channels,
            data: vec![0; len],
        })
    }

    /// Wraps existing interleaved pixel data, checking its length.
    pub fn from_vec(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        if Self::byte_len(width, height, channels)? != data.len() {
            return None;
        }
        Some(Self {
            rows: height,
            cols: width,
            channels,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.cols
    }

    pub fn height(&self) -> u32 {
        self.rows
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte length of the pixel data.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn row_stride(&self) -> usize {
        self.cols as usize * self.channels as usize
    }

    /// Splits the buffer into one grayscale plane per channel.
    pub fn split(&self) -> Vec<GrayImage> {
        let c = self.channels as usize;
        (0..c)
            .map(|ch| {
                GrayImage::from_fn(self.cols, self.rows, |x, y| {
                    let i = (y as usize * self.cols as usize + x as usize) * c + ch;
                    Luma([self.data[i]])
                })
            })
            .collect()
    }

    /// Interleaves equally sized planes back into a buffer.
    pub fn merge(planes: &[GrayImage]) -> Option<Self> {
        let first = planes.first()?;
        let (width, height) = first.dimensions();
        if planes.iter().any(|p| p.dimensions() != (width, height)) {
            return None;
        }
        let c = planes.len();
        let mut data = vec![0u8; width as usize * height as usize * c];
        for (ch, plane) in planes.iter().enumerate() {
            for (i, v) in plane.as_raw().iter().enumerate() {
                data[i * c + ch] = *v;
            }
        }
        Self::from_vec(width, height, c as u8, data)
    }

    pub fn from_gray(gray: GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        Self {
            rows: height,
            cols: width,
            channels: 1,
            data: gray.into_raw(),
        }
    }

    /// Copies a single channel buffer into a grayscale image.
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        if self.channels != 1 {
            return None;
        }
        ImageBuffer::from_raw(self.cols, self.rows, self.data.clone())
    }

    /// Applies `f` to every channel plane independently.
    pub fn map_planes<F>(&self, mut f: F) -> Option<Self>
    where
        F: FnMut(&GrayImage) -> GrayImage,
    {
        if self.is_empty() {
            return None;
        }
        if self.channels == 1 {
            return Some(Self::from_gray(f(&self.to_gray_image()?)));
        }
        let planes: Vec<GrayImage> = self.split().iter().map(&mut f).collect();
        Self::merge(&planes)
    }

    /// Converts a decoded image into BGR(A) or grayscale layout.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(gray) => Self::from_gray(gray),
            DynamicImage::ImageLuma16(_) => Self::from_gray(img.to_luma8()),
            DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgba8(_)
            | DynamicImage::ImageRgba16(_)
            | DynamicImage::ImageRgba32F(_) => {
                let rgba = img.to_rgba8();
                let (width, height) = rgba.dimensions();
                let mut data = rgba.into_raw();
                data.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
                Self {
                    rows: height,
                    cols: width,
                    channels: 4,
                    data,
                }
            }
            _ => {
                let rgb = img.to_rgb8();
                let (width, height) = rgb.dimensions();
                let mut data = rgb.into_raw();
                data.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
                Self {
                    rows: height,
                    cols: width,
                    channels: 3,
                    data,
                }
            }
        }
    }

    /// Converts to an RGB(A) or grayscale image for the codecs.
    pub fn to_dynamic(&self) -> Option<DynamicImage> {
        match self.channels {
            1 => Some(DynamicImage::ImageLuma8(self.to_gray_image()?)),
            3 => {
                let mut data = self.data.clone();
                data.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
                ImageBuffer::from_raw(self.cols, self.rows, data).map(DynamicImage::ImageRgb8)
            }
            4 => {
                let mut data = self.data.clone();
                data.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
                ImageBuffer::from_raw(self.cols, self.rows, data).map(DynamicImage::ImageRgba8)
            }
            _ => None,
        }
    }

    /// Decodes an encoded image (JPEG, PNG, BMP, TIFF, ...).
    ///
    /// Grayscale stays single channel, color becomes BGR and images with an
    /// alpha channel become BGRA. Palette BMPs whose palette is all gray
    /// count as grayscale. Returns `None` for malformed data.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        #[cfg(feature = "turbojpeg")]
        if bytes.starts_with(&[0xff, 0xd8]) {
            match decode_jpeg(bytes) {
                Ok(mat) => return Some(mat),
                Err(e) => debug!("turbojpeg decode failed, retrying: {e}"),
            }
        }

        match image::load_from_memory(bytes) {
            Ok(img) => {
                let mat = Self::from_dynamic(img);
                if mat.channels == 3 && is_gray_palette_bmp(bytes) {
                    return mat.split().into_iter().next().map(Self::from_gray);
                }
                Some(mat)
            }
            Err(e) => {
                debug!("decode failed: {e}");
                None
            }
        }
    }

    /// Reads and decodes an image file.
    pub fn load(path: &Path) -> Option<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Self::decode(&bytes),
            Err(e) => {
                debug!("read {} failed: {e}", path.display());
                None
            }
        }
    }

    /// Encodes to the format named by `ext` (`.png`, `.jpg`, `.bmp`,
    /// `.tif`; the leading dot is optional).
    ///
    /// Decoding the result gives back the same channel count, except for
    /// JPEG: it has no alpha channel, so BGRA buffers are written as color
    /// and decode as BGR.
    pub fn encode(&self, ext: &str) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }
        let format = image_format(ext)?;

        #[cfg(feature = "turbojpeg")]
        if format == ImageFormat::Jpeg {
            return match encode_jpeg(self, 95) {
                Ok(buf) => Some(buf),
                Err(e) => {
                    warn!("jpeg encode failed: {e}");
                    None
                }
            };
        }

        let mut img = self.to_dynamic()?;
        if format == ImageFormat::Jpeg && self.channels == 4 {
            img = DynamicImage::ImageRgb8(img.to_rgb8());
        }
        let mut out = Cursor::new(Vec::new());
        match img.write_to(&mut out, format) {
            Ok(()) => Some(out.into_inner()),
            Err(e) => {
                warn!("{format:?} encode failed: {e}");
                None
            }
        }
    }

    /// Encodes and writes to `path`, picking the format from its extension.
    pub fn write(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let Some(bytes) = self.encode(ext) else {
            return false;
        };
        match std::fs::write(path, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("write {} failed: {e}", path.display());
                false
            }
        }
    }
}

impl fmt::Debug for Mat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Mat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}x{}", self.cols, self.rows, self.channels)
    }
}

/// True for a BITMAPINFOHEADER (or later) BMP with a palette whose entries
/// all have equal blue, green and red.
fn is_gray_palette_bmp(bytes: &[u8]) -> bool {
    let u16_at = |i: usize| bytes.get(i..i + 2).map(|b| u16::from_le_bytes([b[0], b[1]]));
    let u32_at = |i: usize| {
        bytes
            .get(i..i + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };
    if !bytes.starts_with(b"BM") {
        return false;
    }
    let (Some(header), Some(bpp), Some(used)) = (u32_at(14), u16_at(28), u32_at(46)) else {
        return false;
    };
    if header < 40 || !matches!(bpp, 1 | 4 | 8) {
        return false;
    }
    let entries = match used as usize {
        0 => 1 << bpp,
        n => n.min(1 << bpp),
    };
    let start = 14 + header as usize;
    let Some(palette) = start
        .checked_add(entries * 4)
        .and_then(|end| bytes.get(start..end))
    else {
        return false;
    };
    palette.chunks_exact(4).all(|e| e[0] == e[1] && e[1] == e[2])
}

fn image_format(ext: &str) -> Option<ImageFormat> {
    let ext = ext.trim_start_matches('.');
    match ImageFormat::from_extension(ext) {
        Some(format) if format.can_write() => Some(format),
        _ => {
            debug!("unsupported image format {ext:?}");
            None
        }
    }
}

/// Encodes a buffer to JPEG using turbojpeg.
///
/// Single channel buffers are written as grayscale JPEG; BGR and BGRA
/// buffers are compressed with 4:2:0 chroma subsampling.
///
/// # Errors
///
/// Returns an error if:
/// - The buffer has an unsupported channel count
/// - JPEG compression fails
#[cfg(feature = "turbojpeg")]
pub fn encode_jpeg(mat: &Mat, quality: i32) -> Result<Vec<u8>, Box<dyn Error>> {
    let (format, subsamp) = match mat.channels() {
        1 => (turbojpeg::PixelFormat::GRAY, turbojpeg::Subsamp::Gray),
        3 => (turbojpeg::PixelFormat::BGR, turbojpeg::Subsamp::Sub2x2),
        4 => (turbojpeg::PixelFormat::BGRA, turbojpeg::Subsamp::Sub2x2),
        n => {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{n} channel image cannot be JPEG encoded"),
            )));
        }
    };
    let img = turbojpeg::Image {
        width: mat.width() as usize,
        height: mat.height() as usize,
        format,
        pixels: mat.data(),
        pitch: mat.row_stride(),
    };
    let buf = turbojpeg::compress(img, quality, subsamp)?;
    Ok(buf.to_vec())
}

#[cfg(feature = "turbojpeg")]
fn decode_jpeg(bytes: &[u8]) -> Result<Mat, Box<dyn Error>> {
    let header = turbojpeg::read_header(bytes)?;
    let (format, channels) = if matches!(header.subsamp, turbojpeg::Subsamp::Gray) {
        (turbojpeg::PixelFormat::GRAY, 1)
    } else {
        (turbojpeg::PixelFormat::BGR, 3)
    };
    let img = turbojpeg::decompress(bytes, format)?;
    Mat::from_vec(img.width as u32, img.height as u32, channels, img.pixels).ok_or_else(|| {
        Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "decoded size mismatch",
        )) as Box<dyn Error>
    })
}
