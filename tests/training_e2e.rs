use ndarray::{array, Array2, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use scoregen::config::ExperimentConfig;
use scoregen::gaussian::DiagGaussian;
use scoregen::linear::{AffineScore, FactorScore};
use scoregen::loss::{score_matching_loss, ScoreMatchingConfig};
use scoregen::metrics::score_mse;
use scoregen::sampler::EulerMaruyama;
use scoregen::score::{ModelScore, ScoreModel};
use scoregen::sde::{OrnsteinUhlenbeck, Sde};
use scoregen::train::{train_score_model, train_score_model_streaming, TrainConfig};

fn zero_score(x: &ArrayView2<f32>, _t: f32) -> Array2<f32> {
    Array2::zeros(x.raw_dim())
}

/// Points from the time-`t` marginal of `target`.
fn marginal_points<S: Sde>(target: &DiagGaussian, sde: &S, t: f32, n: usize, seed: u64) -> Array2<f32> {
    let a = sde.mean_coeff(t);
    let s2 = sde.marginal_std(t).powi(2);
    let marginal = DiagGaussian::new(
        target.mean.mapv(|m| a * m),
        target.var.mapv(|v| a * a * v + s2),
    )
    .unwrap();
    marginal.sample(n, &mut ChaCha8Rng::seed_from_u64(seed))
}

fn check_learns_gaussian_score<M: ScoreModel>(mut model: M, name: &str) {
    let sde = OrnsteinUhlenbeck;
    let target = DiagGaussian::new(array![1.0f32, -0.5], array![0.25f32, 1.5]).unwrap();
    let loss_cfg = ScoreMatchingConfig::default();
    let cfg = TrainConfig {
        epochs: 3_000,
        batch_size: 128,
        lr: 2e-2,
        seed: 11,
        log_every: 0,
    };
    let report = train_score_model_streaming(
        &mut model,
        |rng: &mut ChaCha8Rng| target.sample(128, rng),
        &sde,
        &loss_cfg,
        &cfg,
    )
    .unwrap();
    assert!(
        report.tail_mean(200) < 0.8 * report.head_mean(50),
        "{name}: loss {} -> {}",
        report.head_mean(50),
        report.tail_mean(200)
    );

    let exact = target.marginal_score(&sde);
    let learned = ModelScore::new(&model, &sde, loss_cfg.score_scaling);
    for &t in &[0.3f32, 0.5, 0.8] {
        let xs = marginal_points(&target, &sde, t, 1_000, 5);
        let trained = score_mse(&learned, &exact, &xs.view(), t).unwrap();
        let baseline = score_mse(&zero_score, &exact, &xs.view(), t).unwrap();
        assert!(
            trained < 0.5 * baseline,
            "{name} at t={t}: trained mse {trained} vs zero-score mse {baseline}"
        );
    }
}

#[test]
fn affine_score_learns_the_gaussian_score() {
    check_learns_gaussian_score(AffineScore::new_zeros(2), "affine");
}

#[test]
fn factor_score_learns_the_gaussian_score() {
    check_learns_gaussian_score(FactorScore::new_identity(2, 0.5), "factor");
}

#[test]
fn training_from_a_config_file_then_sampling() {
    let toml = r#"
        [sde]
        kind = "vp"

        [train]
        epochs = 300
        batch_size = 64
        lr = 0.02
        seed = 4
        log_every = 0

        [sampler]
        steps = 200
    "#;
    let path = std::env::temp_dir().join(format!("scoregen-e2e-{}.toml", std::process::id()));
    std::fs::write(&path, toml).unwrap();
    let cfg = ExperimentConfig::from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    let target = DiagGaussian::isotropic(array![1.0f32, -1.0], 0.4).unwrap();
    let data = target.sample(512, &mut ChaCha8Rng::seed_from_u64(0));
    let mut model = AffineScore::new_zeros(2);

    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let before = score_matching_loss(&cfg.sde, &model, &data.view(), &cfg.loss, &mut rng).unwrap();
    let report = train_score_model(&mut model, &data.view(), &cfg.sde, &cfg.loss, &cfg.train).unwrap();
    assert_eq!(report.epoch_losses.len(), 300);
    assert!(report.epoch_losses.iter().all(|l| l.is_finite()));

    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let after = score_matching_loss(&cfg.sde, &model, &data.view(), &cfg.loss, &mut rng).unwrap();
    assert!(after < before, "loss {before} -> {after}");

    let score = ModelScore::new(&model, &cfg.sde, cfg.loss.score_scaling);
    let xs = EulerMaruyama::new(&cfg.sde, &score, cfg.sampler)
        .unwrap()
        .sample(1_000, 2, 3)
        .unwrap();
    let (mean, _) = scoregen::metrics::sample_moments(&xs.view()).unwrap();
    for k in 0..2 {
        assert!((mean[k] - target.mean[k]).abs() < 0.35, "mean={mean}");
    }
}
