//! Benchmarks for strata-crypto block codecs

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_crypto::{
    padding_stage, BlockCodec, CtrStage, ExpectLength, FileKey, Pipeline, SeededRandom,
    DEFAULT_BLOCK_SIZE,
};

fn bench_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codecs");
    let key = FileKey::generate(&SeededRandom::new(0));

    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024].iter() {
        let data = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        for (label, codec) in [
            ("gcm", BlockCodec::Gcm { block_size: DEFAULT_BLOCK_SIZE }),
            ("crc32c", BlockCodec::Checksum),
        ] {
            group.bench_with_input(BenchmarkId::new(format!("{label}-encode"), size), &data, |b, data| {
                b.iter(|| {
                    Pipeline::new()
                        .then_boxed(codec.encoder(Some(&key), 0).unwrap())
                        .apply(data)
                        .unwrap()
                })
            });

            let encoded = Pipeline::new()
                .then_boxed(codec.encoder(Some(&key), 0).unwrap())
                .apply(&data)
                .unwrap();
            group.bench_with_input(BenchmarkId::new(format!("{label}-decode"), size), &encoded, |b, encoded| {
                b.iter(|| {
                    Pipeline::new()
                        .then_boxed(codec.decoder(Some(&key), 0).unwrap())
                        .apply(encoded)
                        .unwrap()
                })
            });
        }
    }

    group.finish();
}

/// Length check, concealment padding and framing, as files are written
fn bench_write_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_pipeline");
    let rng = SeededRandom::new(1);
    let key = FileKey::generate(&rng);

    for size in [1_000_000u64, 10_000_000] {
        let data = vec![0u8; size as usize];
        group.throughput(Throughput::Bytes(size));

        for (label, codec) in [
            ("gcm", BlockCodec::Gcm { block_size: DEFAULT_BLOCK_SIZE }),
            ("crc32c", BlockCodec::Checksum),
        ] {
            group.bench_with_input(BenchmarkId::new(label, size), &data, |b, data| {
                b.iter(|| {
                    let mut pipeline = Pipeline::new()
                        .then(ExpectLength::new(size))
                        .then(padding_stage(size, &rng));
                    if codec == BlockCodec::Checksum {
                        pipeline = pipeline.then(CtrStage::new(&key, 0));
                    }
                    pipeline
                        .then_boxed(codec.encoder(Some(&key), 0).unwrap())
                        .apply(data)
                        .unwrap()
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_codecs, bench_write_pipeline);
criterion_main!(benches);
