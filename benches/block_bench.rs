use archive7::block::PLAIN_SIZE;
use archive7::crypto::{open, seal};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_block_codec(c: &mut Criterion) {
    let secret = [7u8; 32];
    let plain = vec![0xabu8; PLAIN_SIZE];
    c.bench_function("seal_block", |b| b.iter(|| seal(&secret, black_box(&plain))));

    let sealed = seal(&secret, &plain).unwrap();
    c.bench_function("open_block", |b| b.iter(|| open(&secret, black_box(&sealed))));
}

criterion_group!(benches, bench_block_codec);
criterion_main!(benches);
