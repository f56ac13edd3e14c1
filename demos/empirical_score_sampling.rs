//! Sample from a two-cluster point cloud with the exact score of its noised empirical measure.
//!
//! Run with `RUST_LOG=scoregen=debug` to see the sampler's logs.

use ndarray::{array, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use scoregen::empirical::EmpiricalScore;
use scoregen::gaussian::DiagGaussian;
use scoregen::metrics::{count_non_finite, sample_moments, score_mse};
use scoregen::sampler::{EulerMaruyama, EulerMaruyamaConfig};
use scoregen::sde::{OrnsteinUhlenbeck, Sde};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sde = OrnsteinUhlenbeck;
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    // Two tight clusters at (+2, +2) and (-2, -2).
    let left = DiagGaussian::isotropic(array![-2.0f32, -2.0], 0.2).unwrap();
    let right = DiagGaussian::isotropic(array![2.0f32, 2.0], 0.2).unwrap();
    let data = ndarray::concatenate(
        ndarray::Axis(0),
        &[left.sample(64, &mut rng).view(), right.sample(64, &mut rng).view()],
    )
    .unwrap();

    let empirical = EmpiricalScore::new(data.clone(), sde).unwrap();

    // At late times the noised empirical measure is close to the prior.
    let probe: Array2<f32> = sde.sample_prior(256, 2, &mut rng);
    let prior_score = |x: &ndarray::ArrayView2<f32>, _t: f32| x.mapv(|v| -v);
    for &t in &[0.1f32, 0.5, 1.0, 3.0] {
        let mse = score_mse(&empirical, &prior_score, &probe.view(), t).unwrap();
        println!("t={t:>4}: mse(empirical score, prior score) = {mse:.4}");
    }

    let sampler = EulerMaruyama::new(
        &sde,
        &empirical,
        EulerMaruyamaConfig {
            steps: 500,
            ..Default::default()
        },
    )
    .unwrap();
    let xs = sampler.sample(512, 2, 7).unwrap();

    let (data_mean, data_var) = sample_moments(&data.view()).unwrap();
    let (mean, var) = sample_moments(&xs.view()).unwrap();
    let upper = xs.rows().into_iter().filter(|r| r[0] > 0.0).count();
    println!("data:    mean={data_mean:.3} var={data_var:.3}");
    println!("samples: mean={mean:.3} var={var:.3}");
    println!("fraction in the upper cluster: {:.3}", upper as f32 / xs.nrows() as f32);
    println!("non-finite entries: {}", count_non_finite(&xs.view()));
}
