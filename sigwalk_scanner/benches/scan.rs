use criterion::{criterion_group, criterion_main, Criterion};
use sigwalk_scanner::*;

fn image(c: &mut Criterion) {
    use rand::prelude::*;
    let size = 64 * 1024 * 1024;
    let mut data: Vec<u8> = Vec::with_capacity(size);
    let mut rng = StdRng::seed_from_u64(0);

    let needle = b"\x49\x63\xc8\x48\x8d\x14\x40\x48\x8b\x05\x10\x20\x30\x40\x48\x8b\x0c\xc8\x48\x8d\x04\xd1";

    data.extend((0..size - needle.len() - 1).map(|_| rng.gen::<u8>()));
    data.extend(needle);
    data.push(0);

    let pattern = Pattern::new("49 63 C8 48 8D 14 40 48 8B 05 ? ? ? ? 48 8B 0C C8 48 8D 04 D1");

    assert_eq!(pattern.find(&data), Some(size - needle.len() - 1));

    c.bench_function("64M find", |b| b.iter(|| pattern.find(&data)));
}

fn decode(c: &mut Criterion) {
    let blob = cipher::encode(&"48 8B C4 48 89 58 ? 48 89 70 ? ".repeat(64));

    c.bench_function("decode scalar", |b| {
        b.iter(|| {
            let mut buffer = blob.clone();
            cipher::apply_scalar(&mut buffer);
            buffer
        })
    });
    c.bench_function("decode", |b| b.iter(|| cipher::decode(&blob)));
}

criterion_group!(benches, image, decode);
criterion_main!(benches);
