// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use cvbind::{
    handle::{Capture, Image, SharedArena},
    pipeline::Pipeline,
    video::{prop, CaptureBackend, FramePoller, TestPattern},
    worker::Worker,
    NativeArena,
};
use std::{error::Error, path::Path, sync::Arc, time::Instant};
use tracing::{debug, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer as _, Registry};

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args)?;

    let pipeline = args.pipeline()?;
    debug!("pipeline: {pipeline:?}");

    if let Some(input) = &args.input {
        return process_file(&args, input, &pipeline);
    }

    if args.camera.is_some() || args.test_pattern {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        return rt.block_on(stream(args, pipeline));
    }

    Err("nothing to do, pass --input or --camera".into())
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let console = args.tokio_console.then(console_subscriber::spawn);
    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level);
    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(level)),
        Err(_) => None,
    };
    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(level))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(console)
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn process_file(args: &Args, input: &Path, pipeline: &Pipeline) -> Result<(), Box<dyn Error>> {
    let arena: SharedArena = Arc::new(NativeArena::new());
    let src = Image::load(&arena, input)?;
    info!("loaded {} as {src}", input.display());

    let now = Instant::now();
    let out = if args.worker {
        let worker = Worker::new(args.threads)?;
        worker.process(&src, pipeline, &args.format)?
    } else {
        pipeline.run(&src)?
    };
    info!(
        "{} steps in {:?}: {src} -> {out}",
        pipeline.len(),
        now.elapsed()
    );
    src.dispose();

    match &args.output {
        Some(path) => {
            out.write(path)?;
            info!("wrote {}", path.display());
        }
        None => {
            let encoded = out.encode(&args.format)?;
            info!("encoded {}KB as {}", encoded.len() / 1024, args.format);
        }
    }
    Ok(())
}

fn capture_backend(args: &Args) -> Box<dyn CaptureBackend> {
    let (width, height) = args.camera_size();
    if args.test_pattern {
        return Box::new(TestPattern::new(1).with_size(width, height));
    }
    #[cfg(feature = "v4l2")]
    {
        Box::new(cvbind::video::V4l2Capture::new(width as i32, height as i32))
    }
    #[cfg(not(feature = "v4l2"))]
    {
        warn!("built without v4l2 support, only --test-pattern can capture");
        Box::new(cvbind::video::NullCapture)
    }
}

fn update_fps(prev: &mut Instant, history: &mut [f64], index: &mut usize) -> f64 {
    let now = Instant::now();
    let elapsed = now.duration_since(*prev);
    *prev = now;

    history[*index] = 1.0 / elapsed.as_secs_f64().max(1e-9);
    *index = (*index + 1) % history.len();

    history.iter().sum::<f64>() / history.len() as f64
}

async fn stream(args: Args, pipeline: Pipeline) -> Result<(), Box<dyn Error>> {
    let arena: SharedArena = Arc::new(NativeArena::with_capture(capture_backend(&args)));
    let index = args.camera.unwrap_or(0);
    let capture = Capture::open(&arena, index)?;

    let (width, height) = args.camera_size();
    capture.set(prop::FRAME_WIDTH, f64::from(width))?;
    capture.set(prop::FRAME_HEIGHT, f64::from(height))?;
    capture.set(prop::FPS, f64::from(args.fps))?;
    let (cam_width, cam_height) = (
        capture.get(prop::FRAME_WIDTH)?,
        capture.get(prop::FRAME_HEIGHT)?,
    );
    if cam_width as u32 != width || cam_height as u32 != height {
        warn!(
            "requested {width}x{height} resolution but camera {index} set {cam_width}x{cam_height}"
        );
    }

    let worker = Worker::new(args.threads)?;
    let (tx, rx) = kanal::bounded_async(4);
    let poller = FramePoller::start(capture, args.poll_period(), tx);

    let mut prev = Instant::now();
    let mut history = vec![0.0; 30];
    let mut slot = 0;
    let mut frames = 0u64;
    while let Ok(frame) = rx.recv().await {
        frames += 1;
        let fps = update_fps(&mut prev, &mut history, &mut slot);

        let now = Instant::now();
        let ticket = worker.submit_image(&frame, pipeline.clone(), &args.format)?;
        frame.dispose();
        match ticket.recv_async().await {
            Ok(encoded) => debug!(
                "frame {frames}: {}KB in {:?} fps: {fps:.1}",
                encoded.len() / 1024,
                now.elapsed()
            ),
            Err(e) => warn!("frame {frames}: {e}"),
        }

        if args.frames > 0 && frames >= args.frames {
            break;
        }
    }

    let capture = poller.stop().await?;
    capture.dispose();
    info!("processed {frames} frames, {} buffers live", arena.live_buffers());
    Ok(())
}
