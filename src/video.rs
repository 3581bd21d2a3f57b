// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture devices and the timer driven frame poller.
//!
//! The arena owns open devices through [`CaptureDevice`] trait objects
//! produced by a [`CaptureBackend`]. Two backends are always available:
//! [`NullCapture`], which has no devices, and [`TestPattern`], which produces
//! synthetic frames. With the `v4l2` feature, `V4l2Capture` reads
//! `/dev/video{index}` through videostream.

use crate::{
    error::{Error, Result},
    handle::{Capture, Image},
    image::Mat,
};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

/// Device property codes, numbered the way capture libraries conventionally
/// number them.
pub mod prop {
    pub const POS_MSEC: i32 = 0;
    pub const POS_FRAMES: i32 = 1;
    pub const FRAME_WIDTH: i32 = 3;
    pub const FRAME_HEIGHT: i32 = 4;
    pub const FPS: i32 = 5;
    pub const FOURCC: i32 = 6;
    pub const FRAME_COUNT: i32 = 7;
}

/// Opens capture devices by index.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, index: i32) -> Option<Box<dyn CaptureDevice>>;
}

/// An open capture device. Reads block for at most one frame interval.
pub trait CaptureDevice: Send {
    /// Grabs the next frame as a BGR buffer, `None` on a missed read.
    fn read(&mut self) -> Option<Mat>;

    /// Property value, `0.0` when the property is unknown.
    fn get(&self, prop: i32) -> f64;

    fn set(&mut self, prop: i32, value: f64) -> bool;
}

/// Backend without devices. Every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCapture;

impl CaptureBackend for NullCapture {
    fn open(&self, index: i32) -> Option<Box<dyn CaptureDevice>> {
        debug!("no capture backend, device {index} unavailable");
        None
    }
}

/// Synthetic capture backend.
///
/// Devices `0..devices` open successfully and produce a moving BGR
/// gradient. With [`TestPattern::with_miss_every`] every n-th read misses,
/// which is how transient read failures are exercised.
///
/// ```
/// use cvbind::video::{prop, CaptureBackend, TestPattern};
///
/// let backend = TestPattern::new(1).with_size(64, 48);
/// let mut dev = backend.open(0).unwrap();
/// assert_eq!(dev.get(prop::FRAME_WIDTH), 64.0);
/// assert_eq!(dev.read().unwrap().height(), 48);
/// assert!(backend.open(1).is_none());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TestPattern {
    devices: i32,
    width: u32,
    height: u32,
    fps: f64,
    miss_every: u64,
}

impl TestPattern {
    pub fn new(devices: i32) -> Self {
        Self {
            devices,
            width: 640,
            height: 480,
            fps: 30.0,
            miss_every: 0,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_miss_every(mut self, n: u64) -> Self {
        self.miss_every = n;
        self
    }
}

impl CaptureBackend for TestPattern {
    fn open(&self, index: i32) -> Option<Box<dyn CaptureDevice>> {
        if !(0..self.devices).contains(&index) {
            debug!("test pattern device {index} out of range");
            return None;
        }
        Some(Box::new(PatternDevice {
            index,
            width: self.width,
            height: self.height,
            fps: self.fps,
            miss_every: self.miss_every,
            reads: 0,
            frames: 0,
        }))
    }
}

struct PatternDevice {
    index: i32,
    width: u32,
    height: u32,
    fps: f64,
    miss_every: u64,
    reads: u64,
    frames: u64,
}

impl CaptureDevice for PatternDevice {
    fn read(&mut self) -> Option<Mat> {
        self.reads += 1;
        if self.miss_every > 0 && self.reads % self.miss_every == 0 {
            return None;
        }
        let mut mat = Mat::zeros(self.width, self.height, 3)?;
        let shift = self.frames as usize;
        let red = (self.index as u8).wrapping_mul(64);
        let width = self.width as usize;
        for (i, px) in mat.data_mut().chunks_exact_mut(3).enumerate() {
            let (x, y) = (i % width, i / width);
            px[0] = (x + shift) as u8;
            px[1] = (y + shift) as u8;
            px[2] = red;
        }
        self.frames += 1;
        Some(mat)
    }

    fn get(&self, prop: i32) -> f64 {
        match prop {
            prop::POS_MSEC => self.frames as f64 * 1000.0 / self.fps,
            prop::POS_FRAMES => self.frames as f64,
            prop::FRAME_WIDTH => self.width as f64,
            prop::FRAME_HEIGHT => self.height as f64,
            prop::FPS => self.fps,
            prop::FOURCC => u32::from_le_bytes(*b"BGR3") as f64,
            _ => 0.0,
        }
    }

    fn set(&mut self, prop: i32, value: f64) -> bool {
        if !(value.is_finite() && value >= 1.0) {
            return false;
        }
        match prop {
            prop::FRAME_WIDTH => self.width = value as u32,
            prop::FRAME_HEIGHT => self.height = value as u32,
            prop::FPS => self.fps = value,
            _ => return false,
        }
        true
    }
}

#[cfg(feature = "v4l2")]
pub use self::v4l2::V4l2Capture;

#[cfg(feature = "v4l2")]
mod v4l2 {
    use super::{prop, CaptureBackend, CaptureDevice};
    use crate::{color, image::Mat};
    use tracing::{debug, warn};
    use videostream::{
        camera::{create_camera, CameraReader},
        fourcc::FourCC,
        frame::Frame,
    };

    /// V4L2 capture through videostream. Devices stream YUYV at the
    /// requested resolution and are converted to BGR on read.
    #[derive(Debug, Clone, Copy)]
    pub struct V4l2Capture {
        width: i32,
        height: i32,
    }

    impl V4l2Capture {
        pub fn new(width: i32, height: i32) -> Self {
            Self { width, height }
        }
    }

    impl Default for V4l2Capture {
        fn default() -> Self {
            Self::new(640, 480)
        }
    }

    struct V4l2Device {
        cam: Option<CameraReader>,
        path: String,
        width: i32,
        height: i32,
        fps: f64,
        frames: u64,
    }

    // SAFETY: the reader is only touched through `&mut self`, and the arena
    // serializes access to each device behind its own mutex.
    unsafe impl Send for V4l2Device {}

    fn open_camera(path: &str, width: i32, height: i32) -> Option<CameraReader> {
        let cam = match create_camera()
            .with_device(path)
            .with_resolution(width, height)
            .with_format(FourCC(*b"YUYV"))
            .open()
        {
            Ok(cam) => cam,
            Err(e) => {
                debug!("open {path} failed: {e}");
                return None;
            }
        };
        if let Err(e) = cam.start() {
            warn!("start {path} failed: {e}");
            return None;
        }
        if cam.width() != width || cam.height() != height {
            warn!(
                "requested {width}x{height} but {path} set {}x{}",
                cam.width(),
                cam.height()
            );
        }
        Some(cam)
    }

    impl CaptureBackend for V4l2Capture {
        fn open(&self, index: i32) -> Option<Box<dyn CaptureDevice>> {
            if index < 0 {
                return None;
            }
            let path = format!("/dev/video{index}");
            let cam = open_camera(&path, self.width, self.height)?;
            Some(Box::new(V4l2Device {
                width: cam.width(),
                height: cam.height(),
                cam: Some(cam),
                path,
                fps: 30.0,
                frames: 0,
            }))
        }
    }

    impl CaptureDevice for V4l2Device {
        fn read(&mut self) -> Option<Mat> {
            let buf = match self.cam.as_ref()?.read() {
                Ok(buf) => buf,
                Err(e) => {
                    debug!("{} read failed: {e}", self.path);
                    return None;
                }
            };
            let frame: Frame = (&buf).try_into().ok()?;
            let data = frame.mmap().ok()?;
            let mat = color::yuyv_to_bgr(data, self.width as u32, self.height as u32)?;
            self.frames += 1;
            Some(mat)
        }

        fn get(&self, prop: i32) -> f64 {
            match prop {
                prop::POS_FRAMES => self.frames as f64,
                prop::FRAME_WIDTH => self.width as f64,
                prop::FRAME_HEIGHT => self.height as f64,
                prop::FPS => self.fps,
                prop::FOURCC => u32::from_le_bytes(*b"YUYV") as f64,
                _ => 0.0,
            }
        }

        fn set(&mut self, prop: i32, value: f64) -> bool {
            let (width, height) = match prop {
                prop::FRAME_WIDTH => (value as i32, self.height),
                prop::FRAME_HEIGHT => (self.width, value as i32),
                _ => return false,
            };
            if width <= 0 || height <= 0 {
                return false;
            }
            // Resolution changes need the stream closed and reopened.
            self.cam = None;
            let (cam, ok) = match open_camera(&self.path, width, height) {
                Some(cam) => (Some(cam), true),
                None => (open_camera(&self.path, self.width, self.height), false),
            };
            if let Some(cam) = &cam {
                self.width = cam.width();
                self.height = cam.height();
            }
            self.cam = cam;
            ok
        }
    }
}

/// Periodic frame acquisition for one capture device.
///
/// The poller task owns the [`Capture`] for as long as it runs, so a device
/// never has two concurrent readers. Each tick makes a single read; missed
/// reads are logged and skipped. Frames are delivered to the sink as new
/// [`Image`] handles owned by the receiver.
pub struct FramePoller {
    stop: kanal::AsyncSender<()>,
    task: JoinHandle<Capture>,
}

impl FramePoller {
    /// Spawns the polling task on the current tokio runtime.
    pub fn start(capture: Capture, period: Duration, sink: kanal::AsyncSender<Image>) -> Self {
        let (stop, stopped) = kanal::bounded_async(1);
        let task = tokio::spawn(poll(capture, period, sink, stopped));
        Self { stop, task }
    }

    /// True once the task has ended on its own, e.g. the sink was closed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the timer and hands the device back.
    pub async fn stop(self) -> Result<Capture> {
        // The task may already be gone if the sink closed.
        let _ = self.stop.send(()).await;
        self.task
            .await
            .map_err(|_| Error::Worker("frame poller panicked"))
    }
}

async fn poll(
    capture: Capture,
    period: Duration,
    sink: kanal::AsyncSender<Image>,
    stopped: kanal::AsyncReceiver<()>,
) -> Capture {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut misses = 0u64;

    loop {
        tokio::select! {
            _ = stopped.recv() => break,
            _ = ticker.tick() => {}
        }

        match capture.read_frame() {
            Ok(Some(frame)) => {
                misses = 0;
                trace!("frame {frame}");
                // A full sink must not keep stop() waiting.
                tokio::select! {
                    _ = stopped.recv() => break,
                    sent = sink.send(frame) => if sent.is_err() {
                        debug!("frame sink closed, poller exiting");
                        break;
                    }
                }
            }
            Ok(None) => {
                misses += 1;
                if misses == 1 {
                    warn!("{}", Error::TransientRead);
                } else {
                    debug!("{} ({misses} in a row)", Error::TransientRead);
                }
            }
            Err(e) => {
                warn!("poller stopping: {e}");
                break;
            }
        }
    }

    capture
}
