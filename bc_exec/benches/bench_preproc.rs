//! # Frame Preprocessor Benchmark

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bc_lib::preproc::{FramePreprocessor, Params};
use comms_if::eqpt::sensor::{FrameImage, SensorFrame};

fn preproc_benchmark(c: &mut Criterion) {
    // ---- Build a camera sized frame ----

    let (width, height) = (640u32, 320u32);
    let data = (0..width * height * 4).map(|i| (i % 253) as u8).collect();

    let frame = SensorFrame {
        timestamp: Utc::now(),
        image: FrameImage {
            width,
            height,
            channels: 4,
            data,
        },
        speed_kmh: 28.0,
        heading_rad: 0.3,
        proximity_m: vec![std::f64::INFINITY; 180],
    };

    let preproc = FramePreprocessor::new(Params::default()).unwrap();

    c.bench_function("preproc_transform_640x320", |b| {
        b.iter(|| preproc.transform(black_box(&frame)).unwrap())
    });
}

criterion_group!(benches, preproc_benchmark);
criterion_main!(benches);
