#[cfg(not(feature = "burn"))]
fn main() {
    eprintln!("This example requires the `burn` feature.");
    eprintln!("Run: cargo run --example burn_train_score_net --features burn");
}

#[cfg(feature = "burn")]
fn main() {
    use burn_core::module::AutodiffModule;
    use burn_core::tensor::backend::Backend;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use scoregen::burn_score::{
        train_score_net, BurnBackend, InferenceBackend, MatrixScoreNet, NetScore, DEFAULT_HIDDEN,
    };
    use scoregen::gaussian::DiagGaussian;
    use scoregen::loss::ScoreMatchingConfig;
    use scoregen::metrics::sample_moments;
    use scoregen::sampler::{EulerMaruyama, EulerMaruyamaConfig};
    use scoregen::sde::VariancePreserving;
    use scoregen::train::TrainConfig;

    tracing_subscriber::fmt().init();

    let device = <BurnBackend as Backend>::Device::default();
    let sde = VariancePreserving::default();
    let target = DiagGaussian::isotropic(array![1.0f32, -1.0], 0.5).unwrap();
    let data = target.sample(1_024, &mut ChaCha8Rng::seed_from_u64(0));

    let model = MatrixScoreNet::<BurnBackend>::new(&device, 2, DEFAULT_HIDDEN);
    let cfg = TrainConfig {
        epochs: 100,
        batch_size: 128,
        lr: 1e-3,
        seed: 2023,
        log_every: 10,
    };
    let loss_cfg = ScoreMatchingConfig::default();
    let (model, report) = train_score_net(model, &data.view(), &sde, &loss_cfg, &cfg, &device).unwrap();
    println!("loss: {:.4} -> {:.4}", report.head_mean(5), report.tail_mean(5));

    let eval = model.valid();
    let score = NetScore::<InferenceBackend, _, _>::new(&eval, &sde, loss_cfg.score_scaling, Default::default());
    let sampler = EulerMaruyama::new(
        &sde,
        &score,
        EulerMaruyamaConfig {
            steps: 300,
            ..Default::default()
        },
    )
    .unwrap();
    let xs = sampler.sample(1_000, 2, 5).unwrap();
    let (mean, var) = sample_moments(&xs.view()).unwrap();
    println!("samples: mean={mean:.3} var={var:.3}");
}
