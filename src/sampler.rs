//! Reverse-time Euler–Maruyama sampling.
//!
//! Starting from \(x_T\) drawn from the prior, the reverse SDE is integrated backwards with a
//! fixed step \(\Delta t = (T - t_{\min}) / \text{steps}\):
//! \[
//! r = f(x,t) - g(t)^2 s(x,t),\qquad
//! \bar x = x - r\,\Delta t,\qquad
//! x \leftarrow \bar x + g(t)\sqrt{\Delta t}\,z .
//! \]
//!
//! There is no adaptive stepping and no error control. An unstable score makes the state blow
//! up; the sampler does not stop it (it logs one warning).

use crate::metrics::count_non_finite;
use crate::score::{check_score_dim, ScoreFn};
use crate::sde::{standard_normal, Sde};
use crate::{Error, Result};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Sampler settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EulerMaruyamaConfig {
    /// Number of reverse steps.
    pub steps: usize,
    /// Time at which integration stops (`0 <= t_min < T`).
    pub t_min: f32,
    /// Return the noise-free mean \(\bar x\) of the final step.
    pub denoise: bool,
}

impl Default for EulerMaruyamaConfig {
    fn default() -> Self {
        Self {
            steps: 1_000,
            t_min: 1e-3,
            denoise: true,
        }
    }
}

/// Euler–Maruyama integrator for the reverse-time SDE of `sde` driven by `score`.
pub struct EulerMaruyama<'a, S, F> {
    sde: &'a S,
    score: &'a F,
    cfg: EulerMaruyamaConfig,
}

impl<'a, S: Sde, F: ScoreFn> EulerMaruyama<'a, S, F> {
    pub fn new(sde: &'a S, score: &'a F, cfg: EulerMaruyamaConfig) -> Result<Self> {
        if cfg.steps == 0 {
            return Err(Error::Domain("steps must be >= 1"));
        }
        if !(cfg.t_min >= 0.0) || !(cfg.t_min < sde.terminal_time()) {
            return Err(Error::Domain("t_min must lie in [0, T)"));
        }
        Ok(Self { sde, score, cfg })
    }

    pub fn config(&self) -> &EulerMaruyamaConfig {
        &self.cfg
    }

    #[inline]
    fn dt(&self) -> f32 {
        (self.sde.terminal_time() - self.cfg.t_min) / self.cfg.steps as f32
    }

    /// Draw `n` samples of dimension `d`, starting from the prior.
    pub fn sample(&self, n: usize, d: usize, seed: u64) -> Result<Array2<f32>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x = self.sde.sample_prior(n, d, &mut rng);
        self.run(x, &mut rng, None)
    }

    /// Integrate from caller-supplied terminal states `x_T`.
    pub fn sample_from(&self, x_terminal: &Array2<f32>, seed: u64) -> Result<Array2<f32>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.run(x_terminal.clone(), &mut rng, None)
    }

    /// Like [`Self::sample`], but returns every state: `x_T`, then one entry per step.
    ///
    /// The last entry is the same array `sample` would return.
    pub fn sample_trajectory(&self, n: usize, d: usize, seed: u64) -> Result<Vec<Array2<f32>>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x = self.sde.sample_prior(n, d, &mut rng);
        let mut traj = Vec::with_capacity(self.cfg.steps + 1);
        traj.push(x.clone());
        self.run(x, &mut rng, Some(&mut traj))?;
        Ok(traj)
    }

    fn run(
        &self,
        mut x: Array2<f32>,
        rng: &mut ChaCha8Rng,
        mut traj: Option<&mut Vec<Array2<f32>>>,
    ) -> Result<Array2<f32>> {
        let (n, d) = x.dim();
        if n == 0 || d == 0 {
            return Err(Error::Domain("x_T must be non-empty"));
        }
        check_score_dim(self.score, d)?;
        let t_max = self.sde.terminal_time();
        let dt = self.dt();
        let sqrt_dt = dt.sqrt();
        tracing::debug!(n, d, steps = self.cfg.steps, dt, "euler-maruyama start");

        let mut warned = false;
        for k in 0..self.cfg.steps {
            let t = t_max - k as f32 * dt;
            let g = self.sde.diffusion(t);
            let score = self.score.score(&x.view(), t);
            if score.dim() != (n, d) {
                return Err(Error::Shape("score output must match the state shape"));
            }

            // x_mean = x - (f - g^2 s) dt
            let drift = self.sde.drift_batch(&x.view(), t);
            let mut x_mean = x;
            x_mean.scaled_add(-dt, &drift);
            x_mean.scaled_add(g * g * dt, &score);

            // The noise is drawn even when g == 0 so the RNG stream does not depend on g.
            let z = standard_normal(n, d, rng);
            let last = k + 1 == self.cfg.steps;
            x = if last && self.cfg.denoise {
                x_mean
            } else {
                let mut next = x_mean;
                next.scaled_add(g * sqrt_dt, &z);
                next
            };

            if !warned && count_non_finite(&x.view()) > 0 {
                tracing::warn!(step = k, t, "non-finite values in sampler state");
                warned = true;
            }
            if let Some(traj) = traj.as_deref_mut() {
                traj.push(x.clone());
            }
        }
        Ok(x)
    }
}
