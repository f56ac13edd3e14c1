//! Denoising score matching.
//!
//! For data \(x_0\), time \(t\) and noise \(z \sim \mathcal N(0, I)\), the perturbed point
//! \(x_t = a(t) x_0 + \sigma(t) z\) has conditional score \(-z / \sigma(t)\). The model score
//! \(s_\theta(x_t, t)\) is regressed onto it:
//!
//! - without likelihood weighting: \(e = z + \sigma(t)\,s_\theta\) (the \(\sigma^2\)-weighted loss),
//! - with likelihood weighting: \(e = z/\sigma(t) + s_\theta\), per-row loss times \(g(t)^2\).
//!
//! Per-row loss is `mean_k e²` (`reduce_mean`) or `½ Σ_k e²`; the batch loss is the row mean.

use crate::score::{scale_rows, ScoreModel};
use crate::sde::{standard_normal, Sde};
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Options for the score-matching objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreMatchingConfig {
    /// Read the model output `o` as predicted noise: \(s = -o / \sigma(t)\).
    pub score_scaling: bool,
    /// Use the likelihood weighting \(g(t)^2\) instead of the \(\sigma(t)^2\) weighting.
    pub likelihood_weighting: bool,
    /// Average squared errors over coordinates (otherwise half-sum).
    pub reduce_mean: bool,
    /// Draw one time for the whole batch instead of one per row.
    pub pointwise_t: bool,
    /// Lower end of the training time range; avoids \(\sigma(0) = 0\).
    pub t_min: f32,
}

impl Default for ScoreMatchingConfig {
    fn default() -> Self {
        Self {
            score_scaling: true,
            likelihood_weighting: false,
            reduce_mean: true,
            pointwise_t: false,
            t_min: 1e-5,
        }
    }
}

impl ScoreMatchingConfig {
    pub fn validate<S: Sde>(&self, sde: &S) -> Result<()> {
        if !(self.t_min > 0.0) || !(self.t_min < sde.terminal_time()) {
            return Err(Error::Domain("t_min must lie in (0, T)"));
        }
        Ok(())
    }
}

/// A minibatch pushed through the forward SDE.
#[derive(Debug, Clone)]
pub struct PerturbedBatch {
    /// Perturbed states \(x_t\), `(n, d)`.
    pub xt: Array2<f32>,
    /// Times, one per row.
    pub ts: Vec<f32>,
    /// The noise \(z\) used for each row.
    pub noise: Array2<f32>,
    /// \(\sigma(t)\) per row.
    pub stds: Array1<f32>,
}

/// Draw times and noise for `batch` and form \(x_t\).
pub fn perturb<S: Sde>(
    sde: &S,
    batch: &ArrayView2<f32>,
    cfg: &ScoreMatchingConfig,
    rng: &mut impl rand::Rng,
) -> Result<PerturbedBatch> {
    let n = batch.nrows();
    if n == 0 || batch.ncols() == 0 {
        return Err(Error::Domain("batch must be non-empty"));
    }
    let t_max = sde.terminal_time();
    let span = t_max - cfg.t_min;
    let ts: Vec<f32> = if cfg.pointwise_t {
        let u: f32 = rng.random();
        vec![cfg.t_min + span * u; n]
    } else {
        (0..n)
            .map(|_| {
                let u: f32 = rng.random();
                cfg.t_min + span * u
            })
            .collect()
    };

    let noise = standard_normal(n, batch.ncols(), rng);
    let (means, stds) = sde.marginal_prob(batch, &ts)?;
    let mut xt = means;
    for (i, mut row) in xt.rows_mut().into_iter().enumerate() {
        row.scaled_add(stds[i], &noise.row(i));
    }
    Ok(PerturbedBatch {
        xt,
        ts,
        noise,
        stds,
    })
}

/// Loss value and \(\partial L / \partial o\) for model outputs `out` on a perturbed batch.
pub fn loss_and_output_grad<S: Sde>(
    sde: &S,
    pb: &PerturbedBatch,
    out: &ArrayView2<f32>,
    cfg: &ScoreMatchingConfig,
) -> Result<(f32, Array2<f32>)> {
    let (n, d) = pb.xt.dim();
    if out.dim() != (n, d) {
        return Err(Error::Shape("model output must match the perturbed batch"));
    }

    let score = scale_rows(&out.to_owned(), &pb.stds, cfg.score_scaling);
    let mut grad = Array2::<f32>::zeros((n, d));
    let mut total = 0.0f64;

    for i in 0..n {
        let std = pb.stds[i];
        let weight = if cfg.likelihood_weighting {
            sde.diffusion(pb.ts[i]).powi(2)
        } else {
            1.0
        };
        // d(row loss)/d(e_k) = reduce_scale * e_k, with row loss = (reduce_scale / 2) * sum e^2
        let reduce_scale = if cfg.reduce_mean { 2.0 / d as f32 } else { 1.0 };
        // de/ds and ds/do
        let de_ds = if cfg.likelihood_weighting { 1.0 } else { std };
        let ds_do = if cfg.score_scaling { -1.0 / std } else { 1.0 };

        let mut row = 0.0f64;
        for k in 0..d {
            let z = pb.noise[[i, k]];
            let e = if cfg.likelihood_weighting {
                z / std + score[[i, k]]
            } else {
                z + std * score[[i, k]]
            };
            row += (e as f64) * (e as f64);
            grad[[i, k]] = weight * reduce_scale * e * de_ds * ds_do / n as f32;
        }
        let row = if cfg.reduce_mean {
            row / d as f64
        } else {
            0.5 * row
        };
        total += weight as f64 * row;
    }
    Ok(((total / n as f64) as f32, grad))
}

/// Evaluate the loss of `model` on one freshly perturbed batch (no update).
pub fn score_matching_loss<S: Sde, M: ScoreModel>(
    sde: &S,
    model: &M,
    batch: &ArrayView2<f32>,
    cfg: &ScoreMatchingConfig,
    rng: &mut impl rand::Rng,
) -> Result<f32> {
    if batch.ncols() != model.dim() {
        return Err(Error::Shape("batch width must match model dimension"));
    }
    let pb = perturb(sde, batch, cfg, rng)?;
    let out = model.eval(&pb.xt.view(), &pb.ts);
    let (loss, _grad) = loss_and_output_grad(sde, &pb, &out.view(), cfg)?;
    Ok(loss)
}
