use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;

use scoregen::linear::{AffineScore, FactorScore};
use scoregen::sampler::{EulerMaruyama, EulerMaruyamaConfig};
use scoregen::score::ModelScore;
use scoregen::sde::VariancePreserving;

fn bench_sampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("euler_maruyama");
    group.sample_size(20);

    let sde = VariancePreserving::default();
    let cfg = EulerMaruyamaConfig {
        steps: 100,
        ..Default::default()
    };

    for &d in &[2usize, 8, 32] {
        // Untrained models still cost the same per step.
        let affine = AffineScore::new_zeros(d);
        let mut factor = FactorScore::new_identity(d, 0.5);
        factor.mu = Array2::from_shape_fn(factor.mu.raw_dim(), |(p, k)| (p + k) as f32 * 0.01);

        let affine_score = ModelScore::new(&affine, &sde, true);
        let factor_score = ModelScore::new(&factor, &sde, true);

        group.bench_with_input(BenchmarkId::new("affine", format!("n256_d{d}")), &d, |b, &d| {
            let sampler = EulerMaruyama::new(&sde, &affine_score, cfg).unwrap();
            b.iter(|| sampler.sample(256, d, 0).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("factor", format!("n256_d{d}")), &d, |b, &d| {
            let sampler = EulerMaruyama::new(&sde, &factor_score, cfg).unwrap();
            b.iter(|| sampler.sample(256, d, 0).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sampler);
criterion_main!(benches);
