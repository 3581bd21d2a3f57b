// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use cvbind::image::Mat;

fn gradient(width: u32, height: u32) -> Mat {
    let len = (width * height * 3) as usize;
    let data = (0..len).map(|i| (i % 253) as u8).collect();
    Mat::from_vec(width, height, 3, data).unwrap()
}

pub fn benchmark_encode(c: &mut Criterion) {
    for ext in [".jpg", ".png", ".bmp"] {
        let mut group = c.benchmark_group(format!("encode{ext}"));
        for dim in [(320, 240), (640, 480), (1280, 720), (1920, 1080)].iter() {
            let img = gradient(dim.0, dim.1);
            group.bench_with_input(format!("{}x{}", dim.0, dim.1), &img, |b, img| {
                b.iter(|| img.encode(ext))
            });
        }
    }
}

pub fn benchmark_decode(c: &mut Criterion) {
    for ext in [".jpg", ".png"] {
        let mut group = c.benchmark_group(format!("decode{ext}"));
        for dim in [(320, 240), (640, 480), (1920, 1080)].iter() {
            let encoded = gradient(dim.0, dim.1).encode(ext).unwrap();
            group.bench_with_input(format!("{}x{}", dim.0, dim.1), &encoded, |b, bytes| {
                b.iter(|| Mat::decode(bytes))
            });
        }
    }
}

criterion_group!(benches, benchmark_encode, benchmark_decode);
criterion_main!(benches);
