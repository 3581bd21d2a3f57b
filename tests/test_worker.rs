// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::CountingArena;
use cvbind::{
    handle::{Image, SharedArena},
    ops::{Color, Transform},
    pipeline::Pipeline,
    worker::Worker,
    Arena, Error, NativeArena,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

fn native() -> SharedArena {
    Arc::new(NativeArena::new())
}

#[test]
fn process_matches_local_pipeline() {
    let arena = native();
    let src = Image::new(&arena, 64, 48, 3).unwrap();
    src.rectangle(8, 8, 24, 16, Color::new(200, 100, 50), -1)
        .unwrap();

    let pipeline: Pipeline =
        r#"[{"transform":"gray"},{"transform":"threshold","thresh":60,"maxval":255}]"#.parse().unwrap();
    let local = pipeline.run(&src).unwrap();

    let worker = Worker::new(2).unwrap();
    let remote = worker.process(&src, &pipeline, ".png").unwrap();
    assert_eq!(remote.channels().unwrap(), 1);
    assert_eq!(remote.to_vec().unwrap(), local.to_vec().unwrap());
}

#[test]
fn many_submissions_complete() {
    let arena = native();
    let worker = Worker::new(3).unwrap();
    let pipeline = Pipeline::from(vec![Transform::Resize {
        width: 16,
        height: 12,
        interpolation: 1,
    }]);

    let tickets: Vec<_> = (1..=12)
        .map(|n| {
            let img = Image::new(&arena, 8 * n, 8, 3).unwrap();
            worker.submit_image(&img, pipeline.clone(), ".bmp").unwrap()
        })
        .collect();
    assert_eq!(arena.live_buffers(), 0);

    for ticket in tickets {
        let out = ticket.wait_image(&arena).unwrap();
        assert_eq!((out.width().unwrap(), out.height().unwrap()), (16, 12));
    }
    assert_eq!(arena.live_buffers(), 0);
}

#[test]
fn failing_pipeline_reports_error() {
    let worker = Worker::new(1).unwrap();
    let arena = native();
    let gray = Image::new(&arena, 8, 8, 1).unwrap();
    let pipeline: Pipeline = r#"[{"transform":"bgr_to_hsv"}]"#.parse().unwrap();
    assert!(matches!(
        worker.process(&gray, &pipeline, ".png"),
        Err(Error::OperationFailed("bgr_to_hsv"))
    ));
}

#[test]
fn empty_image_is_not_submitted() {
    let worker = Worker::new(1).unwrap();
    let arena = native();
    let empty = Image::empty(&arena);
    assert!(matches!(
        worker.submit_image(&empty, Pipeline::default(), ".png"),
        Err(Error::Allocation("encode"))
    ));
}

#[test]
fn worker_arenas_are_drained() {
    let arenas = Arc::new(AtomicUsize::new(0));
    let counting: Arc<std::sync::Mutex<Vec<Arc<CountingArena>>>> = Default::default();

    let worker = {
        let arenas = arenas.clone();
        let counting = counting.clone();
        Worker::with_arena(2, move || {
            arenas.fetch_add(1, Ordering::SeqCst);
            let (arena, shared) = CountingArena::default().shared();
            counting.lock().unwrap().push(arena);
            shared
        })
        .unwrap()
    };
    assert_eq!(worker.threads(), 2);

    let arena = native();
    let src = Image::new(&arena, 20, 10, 3).unwrap();
    let pipeline: Pipeline = r#"[{"transform":"gray"},{"transform":"equalize_hist"}]"#.parse().unwrap();
    let tickets: Vec<_> = (0..6)
        .map(|_| worker.submit_image(&src, pipeline.clone(), ".png").unwrap())
        .collect();
    for ticket in tickets {
        assert!(!ticket.wait().unwrap().is_empty());
    }
    drop(worker);

    assert_eq!(arenas.load(Ordering::SeqCst), 2);
    for arena in counting.lock().unwrap().iter() {
        assert_eq!(arena.live_buffers(), 0);
    }
}

#[tokio::test]
async fn async_ticket() {
    let arena = native();
    let worker = Worker::new(1).unwrap();
    let src = Image::new(&arena, 10, 10, 3).unwrap();
    let bytes = worker
        .submit_image(&src, Pipeline::default(), ".png")
        .unwrap()
        .recv_async()
        .await
        .unwrap();
    let out = Image::decode(&arena, &bytes).unwrap();
    assert_eq!(out.channels().unwrap(), 3);
}
