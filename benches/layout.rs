// CLASSIFICATION: COMMUNITY
// Filename: layout.rs v0.2
// Date Modified: 2027-01-17
// Author: Lukas Bower

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use canaryguard::layout::{BufferLayout, ImageDesc, ImageFormat, ImageKind, ImageLayout};

fn bench_layout(c: &mut Criterion) {
    let desc = ImageDesc {
        kind: ImageKind::Dim3,
        width: 128,
        height: 128,
        depth: 16,
        array_size: 1,
        row_pitch: 0,
        slice_pitch: 0,
    };
    let fmt = ImageFormat {
        channels: 4,
        channel_bytes: 1,
    };
    let layout = ImageLayout::new(&desc, fmt.element_size());

    c.bench_function("image_slab_enumeration", |b| {
        b.iter(|| black_box(&layout).slabs().len())
    });

    c.bench_function("image_poison_fill", |b| {
        b.iter(|| black_box(&layout).build_poisoned(None, &desc).len())
    });

    c.bench_function("buffer_poison_fill", |b| {
        let data = vec![7u8; 1 << 20];
        let l = BufferLayout::new(data.len(), false);
        b.iter(|| black_box(&l).build_poisoned(Some(&data)).len())
    });
}

criterion_group!(benches, bench_layout);
criterion_main!(benches);
