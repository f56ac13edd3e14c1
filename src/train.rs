//! Score-matching training loops.
//!
//! The model is borrowed mutably for the duration of the loop; nothing else carries state
//! between epochs except the RNG, which is seeded from the config.

use crate::loss::{loss_and_output_grad, perturb, ScoreMatchingConfig};
use crate::score::ScoreModel;
use crate::sde::Sde;
use crate::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Number of epochs (passes over the data, or fresh batches in the streaming loop).
    pub epochs: usize,
    /// Minibatch size (clamped to the data size).
    pub batch_size: usize,
    /// SGD learning rate.
    pub lr: f32,
    /// RNG seed.
    pub seed: u64,
    /// Log the mean epoch loss every `log_every` epochs (0 disables logging).
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            batch_size: 32,
            lr: 1e-2,
            seed: 2023,
            log_every: 10,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.lr > 0.0) || !self.lr.is_finite() {
            return Err(Error::Domain("lr must be positive and finite"));
        }
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(Error::Domain("epochs and batch_size must be >= 1"));
        }
        Ok(())
    }
}

/// Per-epoch mean losses.
#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub epoch_losses: Vec<f32>,
}

impl TrainReport {
    /// Mean of the first `k` epoch losses.
    pub fn head_mean(&self, k: usize) -> f32 {
        mean(&self.epoch_losses[..k.min(self.epoch_losses.len())])
    }

    /// Mean of the last `k` epoch losses.
    pub fn tail_mean(&self, k: usize) -> f32 {
        let n = self.epoch_losses.len();
        mean(&self.epoch_losses[n - k.min(n)..])
    }
}

fn mean(xs: &[f32]) -> f32 {
    if xs.is_empty() {
        return f32::NAN;
    }
    xs.iter().map(|&x| x as f64).sum::<f64>() as f32 / xs.len() as f32
}

/// One SGD step on a minibatch; returns the loss before the update.
pub fn train_step<S: Sde, M: ScoreModel>(
    model: &mut M,
    sde: &S,
    batch: &ArrayView2<f32>,
    loss_cfg: &ScoreMatchingConfig,
    lr: f32,
    rng: &mut impl rand::Rng,
) -> Result<f32> {
    let pb = perturb(sde, batch, loss_cfg, rng)?;
    let out = model.eval(&pb.xt.view(), &pb.ts);
    let (loss, grad) = loss_and_output_grad(sde, &pb, &out.view(), loss_cfg)?;
    model.sgd_step(&pb.xt.view(), &pb.ts, &grad.view(), lr);
    Ok(loss)
}

/// Train `model` on a fixed data set by denoising score matching.
///
/// Each epoch draws a fresh permutation, splits it into `len / batch_size` minibatches (the
/// incomplete tail is skipped) and takes one SGD step per minibatch.
pub fn train_score_model<S: Sde, M: ScoreModel>(
    model: &mut M,
    data: &ArrayView2<f32>,
    sde: &S,
    loss_cfg: &ScoreMatchingConfig,
    cfg: &TrainConfig,
) -> Result<TrainReport> {
    cfg.validate()?;
    loss_cfg.validate(sde)?;
    let n = data.nrows();
    if n == 0 || data.ncols() == 0 {
        return Err(Error::Domain("data must be non-empty"));
    }
    if data.ncols() != model.dim() {
        return Err(Error::Shape("data width must match model dimension"));
    }

    let batch_size = cfg.batch_size.min(n);
    let steps_per_epoch = n / batch_size;
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let mut perm: Vec<usize> = (0..n).collect();
    let mut report = TrainReport {
        epoch_losses: Vec::with_capacity(cfg.epochs),
    };

    tracing::info!(
        n,
        d = data.ncols(),
        batch_size,
        steps_per_epoch,
        epochs = cfg.epochs,
        "starting score matching"
    );

    for epoch in 0..cfg.epochs {
        perm.shuffle(&mut rng);
        let mut sum = 0.0f64;
        for chunk in perm.chunks_exact(batch_size) {
            let batch: Array2<f32> = data.select(Axis(0), chunk);
            sum += train_step(model, sde, &batch.view(), loss_cfg, cfg.lr, &mut rng)? as f64;
        }
        let epoch_loss = (sum / steps_per_epoch as f64) as f32;
        report.epoch_losses.push(epoch_loss);
        log_epoch(cfg, epoch, epoch_loss);
    }
    Ok(report)
}

/// Train on a fresh batch per epoch from `draw_batch` (one SGD step per epoch).
///
/// This is the loop to use when the data distribution can be sampled directly, e.g. a known
/// Gaussian whose score is available in closed form.
pub fn train_score_model_streaming<S: Sde, M: ScoreModel>(
    model: &mut M,
    mut draw_batch: impl FnMut(&mut ChaCha8Rng) -> Array2<f32>,
    sde: &S,
    loss_cfg: &ScoreMatchingConfig,
    cfg: &TrainConfig,
) -> Result<TrainReport> {
    cfg.validate()?;
    loss_cfg.validate(sde)?;
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let mut report = TrainReport {
        epoch_losses: Vec::with_capacity(cfg.epochs),
    };
    tracing::info!(epochs = cfg.epochs, "starting streaming score matching");

    for epoch in 0..cfg.epochs {
        let batch = draw_batch(&mut rng);
        if batch.ncols() != model.dim() {
            return Err(Error::Shape("batch width must match model dimension"));
        }
        let loss = train_step(model, sde, &batch.view(), loss_cfg, cfg.lr, &mut rng)?;
        report.epoch_losses.push(loss);
        log_epoch(cfg, epoch, loss);
    }
    Ok(report)
}

pub(crate) fn log_epoch(cfg: &TrainConfig, epoch: usize, loss: f32) {
    if cfg.log_every > 0 && epoch % cfg.log_every == 0 {
        tracing::info!(epoch, loss, "epoch");
    }
    if !loss.is_finite() {
        tracing::warn!(epoch, loss, "non-finite training loss");
    }
}
