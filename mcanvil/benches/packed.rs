use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::prelude::*;

use mcanvil::codec::packed;

const RANDOM_SEED: u64 = 42;
const SECTION_BLOCK_COUNT: usize = 4096;

/// Generate a section's worth of palette indices for a palette of
/// `palette_len` entries.
fn gen_indices(palette_len: usize, rng: &mut StdRng) -> Vec<u16> {
    (0..SECTION_BLOCK_COUNT)
        .map(|_| rng.random_range(0..palette_len) as u16)
        .collect()
}

fn bench_unpack(c: &mut Criterion) {
    // Palette sizes spanning the interesting index widths: the 4-bit
    // minimum, a straddling-heavy 5-bit case, and a large 9-bit palette
    for palette_len in [16usize, 30, 400] {
        let mut group = c.benchmark_group(format!("unpack/palette={palette_len}"));
        let bits = packed::bits_for(palette_len, 4);
        let mut rng = StdRng::seed_from_u64(RANDOM_SEED);
        let indices = gen_indices(palette_len, &mut rng);

        for padded in [false, true] {
            let words = packed::pack(&indices, bits, padded);
            group.bench_with_input(
                BenchmarkId::from_parameter(if padded { "padded" } else { "straddling" }),
                &words,
                |b, words| {
                    b.iter(|| {
                        packed::unpack(black_box(words), bits, SECTION_BLOCK_COUNT, padded)
                            .unwrap()
                    })
                },
            );
        }
        group.finish();
    }
}

fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack/palette=30");
    let bits = packed::bits_for(30, 4);
    let mut rng = StdRng::seed_from_u64(RANDOM_SEED);
    let indices = gen_indices(30, &mut rng);

    for padded in [false, true] {
        group.bench_with_input(
            BenchmarkId::from_parameter(if padded { "padded" } else { "straddling" }),
            &indices,
            |b, indices| b.iter(|| packed::pack(black_box(indices), bits, padded)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_unpack, bench_pack);
criterion_main!(benches);
