// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::CountingArena;
use cvbind::{
    handle::{Capture, Image, SharedArena},
    ops::{Color, ContourApprox, ContourMode, Transform},
    video::{prop, TestPattern},
    Error, NativeArena,
};
use proptest::prelude::*;
use std::{error::Error as _, sync::Arc, thread};

fn native() -> SharedArena {
    Arc::new(NativeArena::new())
}

#[test]
fn gray_outlives_source() -> Result<(), Box<dyn std::error::Error>> {
    let arena = native();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("color.png");

    let a = Image::new(&arena, 100, 100, 3)?;
    a.rectangle(10, 10, 50, 50, Color::new(0, 128, 255), -1)?;
    a.write(&path)?;

    let loaded = Image::load(&arena, &path)?;
    assert_eq!(
        (loaded.width()?, loaded.height()?, loaded.channels()?),
        (100, 100, 3)
    );

    let b = loaded.gray()?;
    loaded.dispose();
    assert!(matches!(loaded.width(), Err(Error::InvalidHandle)));
    assert_eq!((b.width()?, b.height()?, b.channels()?), (100, 100, 1));

    let gray_path = dir.path().join("gray.png");
    b.write(&gray_path)?;
    let reloaded = Image::load(&arena, &gray_path)?;
    assert_eq!(reloaded.channels()?, 1);
    assert_eq!(reloaded.to_vec()?, b.to_vec()?);

    Ok(())
}

#[test]
fn load_missing_file() {
    let arena = native();
    let err = Image::load(&arena, "/nonexistent/frame.png").unwrap_err();
    assert!(matches!(err, Error::Allocation("load")));
    assert!(err.source().is_none());
    assert_eq!(arena.live_buffers(), 0);
}

#[test]
fn decode_garbage() {
    let arena = native();
    assert!(matches!(
        Image::decode(&arena, b"not an image"),
        Err(Error::Allocation("decode"))
    ));
    assert!(Image::decode(&arena, &[]).is_err());
    assert_eq!(arena.live_buffers(), 0);
}

#[test]
fn invalid_device_index() {
    let arena: SharedArena = Arc::new(NativeArena::with_capture(Box::new(TestPattern::new(1))));
    assert!(matches!(
        Capture::open(&arena, 7),
        Err(Error::DeviceUnavailable(7))
    ));
    assert_eq!(arena.live_devices(), 0);
}

#[test]
fn dispose_twice_releases_once() {
    let (counting, arena) = CountingArena::default().shared();
    let img = Image::new(&arena, 4, 4, 3).unwrap();
    img.dispose();
    img.dispose();
    drop(img);
    assert_eq!(counting.releases(), 1);
    assert_eq!(arena.live_buffers(), 0);
}

#[test]
fn drop_releases_once() {
    let (counting, arena) = CountingArena::default().shared();
    {
        let _img = Image::new(&arena, 4, 4, 3).unwrap();
        let _empty = Image::empty(&arena);
    }
    assert_eq!(counting.releases(), 2);
    assert_eq!(arena.live_buffers(), 0);
}

#[test]
fn concurrent_dispose_releases_once() {
    let (counting, arena) = CountingArena::default().shared();
    let img = Image::new(&arena, 16, 16, 1).unwrap();
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| img.dispose());
        }
    });
    drop(img);
    assert_eq!(counting.releases(), 1);
}

#[test]
fn transforms_never_alias() {
    let arena = native();
    let a = Image::new(&arena, 32, 24, 3).unwrap();
    let id = a.id().unwrap();

    let b = a.gray().unwrap();
    let c = a.flip(1).unwrap();
    assert_eq!(a.id().unwrap(), id);
    assert_ne!(b.id().unwrap(), id);
    assert_ne!(c.id().unwrap(), id);
    assert_ne!(b.id().unwrap(), c.id().unwrap());
    assert_eq!(arena.live_buffers(), 3);
}

#[test]
fn encode_png_then_decode_keeps_gray() {
    let arena = native();
    let a = Image::new(&arena, 40, 30, 3).unwrap();
    a.rectangle(5, 5, 20, 10, Color::new(0, 128, 255), -1).unwrap();
    let b = a.gray().unwrap();

    let bytes = b.encode(".png").unwrap();
    let c = Image::decode(&arena, &bytes).unwrap();
    assert_eq!(c.channels().unwrap(), 1);
    assert_eq!(c.to_vec().unwrap(), b.to_vec().unwrap());
}

/// Every catalog entry with an input it accepts.
fn catalog() -> Vec<(Transform, u8)> {
    vec![
        (Transform::Copy, 3),
        (Transform::Gray, 3),
        (Transform::BgrToRgb, 3),
        (Transform::BgrToHsv, 3),
        (Transform::HsvToBgr, 3),
        (Transform::BgrToLab, 3),
        (Transform::LabToBgr, 3),
        (
            Transform::Resize {
                width: 12,
                height: 8,
                interpolation: 1,
            },
            3,
        ),
        (Transform::Flip { mode: 1 }, 3),
        (Transform::Rotate { code: 0 }, 3),
        (
            Transform::GaussianBlur {
                kernel_size: 5,
                sigma: 0.0,
            },
            3,
        ),
        (Transform::MedianBlur { kernel_size: 3 }, 3),
        (
            Transform::BilateralFilter {
                diameter: 5,
                sigma_color: 20.0,
                sigma_space: 20.0,
            },
            3,
        ),
        (
            Transform::Canny {
                threshold1: 50.0,
                threshold2: 150.0,
            },
            3,
        ),
        (
            Transform::Sobel {
                dx: 1,
                dy: 0,
                ksize: 3,
            },
            1,
        ),
        (Transform::Laplacian { ksize: 3 }, 1),
        (Transform::Sharpen, 3),
        (
            Transform::Erode {
                kernel_size: 3,
                iterations: 1,
            },
            1,
        ),
        (
            Transform::Dilate {
                kernel_size: 3,
                iterations: 2,
            },
            1,
        ),
        (
            Transform::MorphologyEx {
                op: 4,
                kernel_size: 3,
            },
            1,
        ),
        (
            Transform::Threshold {
                thresh: 100.0,
                maxval: 255.0,
                kind: 0,
            },
            3,
        ),
        (
            Transform::AdaptiveThreshold {
                max_value: 255.0,
                method: 0,
                kind: 0,
                block_size: 5,
                c: 2.0,
            },
            1,
        ),
        (Transform::EqualizeHist, 3),
        (
            Transform::Denoise {
                h: 10.0,
                template_window: 3,
                search_window: 7,
            },
            1,
        ),
        (
            Transform::DenoiseColored {
                h: 10.0,
                h_color: 10.0,
                template_window: 3,
                search_window: 7,
            },
            3,
        ),
    ]
}

#[test]
fn catalog_results_are_independent() {
    let arena = native();
    for (i, (op, channels)) in catalog().into_iter().enumerate() {
        let src = Image::new(&arena, 24, 16, channels).unwrap();
        src.rectangle(4, 4, 10, 6, Color::new(200, 90, 30), -1)
            .unwrap();
        let before = src.to_vec().unwrap();

        let out = src
            .transform(&op)
            .unwrap_or_else(|e| panic!("{}: {e}", op.name()));
        assert_ne!(out.id().unwrap(), src.id().unwrap(), "{}", op.name());
        assert_eq!(src.to_vec().unwrap(), before, "{}", op.name());
        assert_eq!(arena.live_buffers(), 2);

        // Either side can go first without touching the other.
        let (first, second) = if i % 2 == 0 { (&src, &out) } else { (&out, &src) };
        first.dispose();
        assert!(second.width().unwrap() > 0, "{}", op.name());
        assert_eq!(arena.live_buffers(), 1);
        second.dispose();
        assert_eq!(arena.live_buffers(), 0);
    }
}

#[test]
fn released_handle_skips_arena() {
    let (counting, arena) = CountingArena::default().shared();
    let img = Image::new(&arena, 8, 8, 3).unwrap();
    img.dispose();
    let before = counting.calls();

    assert!(matches!(img.width(), Err(Error::InvalidHandle)));
    assert!(matches!(img.gray(), Err(Error::InvalidHandle)));
    assert!(matches!(img.encode(".png"), Err(Error::InvalidHandle)));
    assert!(matches!(img.write("/tmp/never.png"), Err(Error::InvalidHandle)));
    assert!(matches!(
        img.rectangle(0, 0, 2, 2, Color::new(1, 2, 3), 1),
        Err(Error::InvalidHandle)
    ));
    assert!(matches!(
        img.find_contours(ContourMode::External, ContourApprox::Simple),
        Err(Error::InvalidHandle)
    ));
    assert!(matches!(img.into_raw(), Err(Error::InvalidHandle)));

    assert_eq!(counting.calls(), before);
    assert_eq!(counting.releases(), 1);
}

#[test]
fn failed_transform_allocates_nothing() {
    let arena = native();
    let empty = Image::empty(&arena);
    let err = empty.canny(50.0, 150.0).unwrap_err();
    assert!(matches!(err, Error::OperationFailed("canny")));
    assert!(empty
        .transform(&Transform::Resize {
            width: 0,
            height: 10,
            interpolation: 1,
        })
        .is_err());
    assert_eq!(arena.live_buffers(), 1);
}

#[test]
fn capture_frames() {
    let (counting, arena) =
        CountingArena::with_capture(Box::new(TestPattern::new(1).with_size(32, 16))).shared();
    let cap = Capture::open(&arena, 0).unwrap();
    assert_eq!(cap.get(prop::FRAME_WIDTH).unwrap(), 32.0);
    assert!(cap.set(prop::FRAME_WIDTH, 64.0).unwrap());

    let dst = Image::empty(&arena);
    assert!(cap.read(&dst).unwrap());
    assert_eq!((dst.width().unwrap(), dst.height().unwrap()), (64, 16));

    let frame = cap.read_frame().unwrap().unwrap();
    assert_ne!(frame.id().unwrap(), dst.id().unwrap());
    assert_eq!(cap.get(prop::POS_FRAMES).unwrap(), 2.0);

    drop(cap);
    assert_eq!(counting.device_releases(), 1);
    assert_eq!(arena.live_devices(), 0);
}

#[test]
fn contours_of_filled_shapes() {
    let arena = native();
    let img = Image::new(&arena, 64, 64, 1).unwrap();
    let white = Color::new(255, 255, 255);
    img.rectangle(4, 4, 12, 12, white, -1).unwrap();
    img.circle((44, 44), 8, white, -1).unwrap();

    let contours = img
        .find_contours(ContourMode::External, ContourApprox::Simple)
        .unwrap();
    assert_eq!(contours.len(), 2);

    let canvas = Image::new(&arena, 64, 64, 3).unwrap();
    canvas
        .draw_contours(&contours, -1, Color::new(0, 255, 0), 1)
        .unwrap();
    assert!(canvas.to_vec().unwrap().iter().any(|&v| v == 255));
}

proptest! {
    #[test]
    fn release_at_most_once(disposes in 0usize..4, threads in 1usize..4, raw in any::<bool>()) {
        let (counting, arena) = CountingArena::default().shared();
        let img = Image::new(&arena, 2, 2, 1).unwrap();
        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| (0..disposes).for_each(|_| img.dispose()));
            }
        });

        if raw {
            match img.into_raw() {
                Ok(id) => {
                    prop_assert_eq!(counting.releases(), 0);
                    arena.release(id);
                }
                Err(e) => prop_assert!(matches!(e, Error::InvalidHandle)),
            }
        } else {
            drop(img);
        }
        prop_assert_eq!(counting.releases(), 1);
        prop_assert_eq!(arena.live_buffers(), 0);
    }
}
