use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use distill_bits::{BitVector, Permutation};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

fn bench_range_parity(c: &mut Criterion) {
    let mut rng = ChaCha12Rng::seed_from_u64(1);
    let key = BitVector::random(&mut rng, 1 << 20);

    let mut group = c.benchmark_group("range_parity");
    for size in [64usize, 1024, 65536, 1 << 20] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("{size}_bits"), |b| {
            b.iter(|| key.parity_range(black_box(0), black_box(size)))
        });
    }
    group.finish();
}

fn bench_permutation_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("permutation_derive");
    for size in [10_000usize, 100_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("{size}_indices"), |b| {
            b.iter(|| Permutation::derive(black_box(0xABCD), black_box(size)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_range_parity, bench_permutation_derive);
criterion_main!(benches);
