// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use cvbind::pipeline::Pipeline;
use std::{path::PathBuf, time::Duration};

/// Command-line arguments for the cvbind demo.
///
/// The demo either processes a single image file or polls a capture
/// device, running each frame through a JSON pipeline of transforms.
/// Arguments can be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// cvbind --input photo.jpg --output edges.png \
///     --pipeline '[{"transform":"gray"},{"transform":"canny","threshold1":50,"threshold2":150}]'
///
/// # Via environment variables
/// export CAMERA=0
/// export WORKER=true
/// cvbind --frames 100
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Image file to process
    #[arg(short, long, env = "INPUT", conflicts_with = "camera")]
    pub input: Option<PathBuf>,

    /// Where to write the processed image (format from the extension)
    #[arg(short, long, env = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Pipeline as a JSON array of transforms
    #[arg(long, env = "PIPELINE", conflicts_with = "pipeline_file")]
    pub pipeline: Option<String>,

    /// Path to a JSON pipeline file
    #[arg(long, env = "PIPELINE_FILE")]
    pub pipeline_file: Option<PathBuf>,

    /// Encoding used between the caller and the worker
    #[arg(long, env = "FORMAT", default_value = ".png")]
    pub format: String,

    /// Process through the background worker pool
    #[arg(long, env = "WORKER")]
    pub worker: bool,

    /// Worker pool size
    #[arg(long, env = "THREADS", default_value = "1")]
    pub threads: usize,

    /// Capture device index to poll
    #[arg(short, long, env = "CAMERA")]
    pub camera: Option<i32>,

    /// Requested capture resolution in pixels (width height)
    #[arg(
        long,
        env = "CAMERA_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub camera_size: Vec<u32>,

    /// Capture poll rate in frames per second
    #[arg(long, env = "FPS", default_value = "30")]
    pub fps: u32,

    /// Stop after this many frames (0 polls until interrupted)
    #[arg(long, env = "FRAMES", default_value = "0")]
    pub frames: u64,

    /// Use the synthetic test pattern instead of a real device
    #[arg(long, env = "TEST_PATTERN")]
    pub test_pattern: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    /// The configured pipeline, empty when none was given.
    pub fn pipeline(&self) -> cvbind::Result<Pipeline> {
        if let Some(json) = &self.pipeline {
            return json.parse();
        }
        if let Some(path) = &self.pipeline_file {
            return Pipeline::from_file(path);
        }
        Ok(Pipeline::default())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    pub fn camera_size(&self) -> (u32, u32) {
        match self.camera_size[..] {
            [width, height] => (width, height),
            _ => (640, 480),
        }
    }
}
