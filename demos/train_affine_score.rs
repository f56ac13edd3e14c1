//! Train the two ndarray score models on a Gaussian and compare them with its exact score.

use ndarray::array;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use scoregen::config::ExperimentConfig;
use scoregen::gaussian::DiagGaussian;
use scoregen::linear::{AffineScore, FactorScore};
use scoregen::metrics::{sample_moments, score_mse};
use scoregen::ode::{probability_flow_sample, OdeMethod};
use scoregen::sampler::EulerMaruyama;
use scoregen::score::ModelScore;
use scoregen::sde::Sde;
use scoregen::train::train_score_model_streaming;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[sde]
kind = "vp"

[train]
epochs = 3000
batch_size = 128
lr = 0.01
log_every = 500

[sampler]
steps = 500
"#;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = ExperimentConfig::from_toml_str(CONFIG).unwrap();
    let sde = cfg.sde;
    let target = DiagGaussian::new(array![1.0f32, -0.5], array![0.25f32, 1.5]).unwrap();
    let exact = target.marginal_score(&sde);
    let draw = |rng: &mut ChaCha8Rng| target.sample(cfg.train.batch_size, rng);

    let mut affine = AffineScore::new_zeros(2);
    let mut factor = FactorScore::new_identity(2, 0.5);
    let ra = train_score_model_streaming(&mut affine, draw, &sde, &cfg.loss, &cfg.train).unwrap();
    let rf = train_score_model_streaming(&mut factor, draw, &sde, &cfg.loss, &cfg.train).unwrap();
    println!("affine loss: {:.4} -> {:.4}", ra.head_mean(50), ra.tail_mean(50));
    println!("factor loss: {:.4} -> {:.4}", rf.head_mean(50), rf.tail_mean(50));

    let affine_score = ModelScore::new(&affine, &sde, cfg.loss.score_scaling);
    let factor_score = ModelScore::new(&factor, &sde, cfg.loss.score_scaling);
    let probe = target.sample(512, &mut ChaCha8Rng::seed_from_u64(99));
    for &t in &[0.05f32, 0.25, 0.5, 1.0] {
        let xt = probe.mapv(|v| v * sde.mean_coeff(t));
        println!(
            "t={t:>4}: mse affine={:.4} factor={:.4}",
            score_mse(&affine_score, &exact, &xt.view(), t).unwrap(),
            score_mse(&factor_score, &exact, &xt.view(), t).unwrap(),
        );
    }

    let sampler = EulerMaruyama::new(&sde, &affine_score, cfg.sampler).unwrap();
    let xs = sampler.sample(2_000, 2, 1).unwrap();
    let (mean, var) = sample_moments(&xs.view()).unwrap();
    println!("SDE samples: mean={mean:.3} var={var:.3} (target mean={:.3} var={:.3})", target.mean, target.var);

    let x_t = sde.sample_prior(2_000, 2, &mut ChaCha8Rng::seed_from_u64(2));
    let ys = probability_flow_sample(&sde, &affine_score, &x_t, 200, cfg.sampler.t_min, OdeMethod::Heun).unwrap();
    let (mean, var) = sample_moments(&ys.view()).unwrap();
    println!("ODE samples: mean={mean:.3} var={var:.3}");
}
