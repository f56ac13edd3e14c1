//! Empirical score of a noised sample set.
//!
//! For samples \(y_1,\dots,y_J\) the forward SDE turns the empirical distribution into a Gaussian
//! mixture at time `t`:
//! \[
//! \hat p_t(x) \propto \frac1J \sum_j \exp\!\Big(-\frac{\|x - a(t) y_j\|^2}{2\sigma(t)^2}\Big),
//! \qquad
//! \nabla_x \log \hat p_t(x) = \sum_j w_j\,\frac{a(t) y_j - x}{\sigma(t)^2},
//! \]
//! with softmax weights \(w\). Everything goes through a max-shifted log-sum-exp so the
//! weights stay finite for small \(\sigma(t)\).
//!
//! Cost is `O(J·d)` per query point. This is for small sample sets (dozens to a few thousand).

use crate::score::ScoreFn;
use crate::sde::Sde;
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// The exact score of the noised empirical distribution of `samples`.
#[derive(Debug, Clone)]
pub struct EmpiricalScore<S> {
    samples: Array2<f32>,
    sde: S,
}

/// Numerically stable \(\log \sum_j e^{v_j}\). Returns `-inf` for an empty slice.
pub fn log_sum_exp(v: &ArrayView1<f32>) -> f32 {
    let m = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !m.is_finite() {
        return m;
    }
    let s: f64 = v.iter().map(|&x| ((x - m) as f64).exp()).sum();
    m + s.ln() as f32
}

impl<S: Sde> EmpiricalScore<S> {
    pub fn new(samples: Array2<f32>, sde: S) -> Result<Self> {
        if samples.nrows() == 0 || samples.ncols() == 0 {
            return Err(Error::Domain("samples must be non-empty"));
        }
        Ok(Self { samples, sde })
    }

    pub fn samples(&self) -> &Array2<f32> {
        &self.samples
    }

    pub fn dim(&self) -> usize {
        self.samples.ncols()
    }

    /// Gaussian potentials \(-\|x - a(t) y_j\|^2 / (2\sigma^2)\), one per sample.
    fn potentials(&self, x: &ArrayView1<f32>, t: f32) -> Array1<f32> {
        let a = self.sde.mean_coeff(t);
        let std = self.sde.marginal_std(t);
        let inv_two_var = 1.0 / (2.0 * std * std);
        let mut pot = Array1::<f32>::zeros(self.samples.nrows());
        for (j, y) in self.samples.rows().into_iter().enumerate() {
            let mut s = 0.0f32;
            for k in 0..x.len() {
                let r = x[k] - a * y[k];
                s += r * r;
            }
            pot[j] = -s * inv_two_var;
        }
        pot
    }

    /// Empirical log density \(\log \hat p_t(x)\), without the Gaussian normalizing constant.
    pub fn log_density(&self, x: &ArrayView1<f32>, t: f32) -> Result<f32> {
        if x.len() != self.dim() {
            return Err(Error::Shape("x length must match sample dimension"));
        }
        let pot = self.potentials(x, t);
        Ok(log_sum_exp(&pot.view()) - (self.samples.nrows() as f32).ln())
    }

    /// Score at a single point.
    pub fn score_point(&self, x: &ArrayView1<f32>, t: f32) -> Result<Array1<f32>> {
        if x.len() != self.dim() {
            return Err(Error::Shape("x length must match sample dimension"));
        }
        Ok(self.score_point_unchecked(x, t))
    }

    fn score_point_unchecked(&self, x: &ArrayView1<f32>, t: f32) -> Array1<f32> {
        let d = self.dim();
        let a = self.sde.mean_coeff(t);
        let std = self.sde.marginal_std(t);
        let inv_var = 1.0 / (std * std);

        let pot = self.potentials(x, t);
        let lse = log_sum_exp(&pot.view());

        // Accumulate sum_j w_j * a y_j in f64, then subtract x (weights sum to 1).
        let mut acc = vec![0.0f64; d];
        for (j, y) in self.samples.rows().into_iter().enumerate() {
            let w = ((pot[j] - lse) as f64).exp();
            for k in 0..d {
                acc[k] += w * (a * y[k]) as f64;
            }
        }
        let mut out = Array1::<f32>::zeros(d);
        for k in 0..d {
            out[k] = (acc[k] as f32 - x[k]) * inv_var;
        }
        out
    }

    /// Batched score with shape checking.
    pub fn score_batch(&self, xs: &ArrayView2<f32>, t: f32) -> Result<Array2<f32>> {
        if xs.ncols() != self.dim() {
            return Err(Error::Shape("xs width must match sample dimension"));
        }
        Ok(self.score(xs, t))
    }
}

impl<S: Sde> ScoreFn for EmpiricalScore<S> {
    fn score(&self, xs: &ArrayView2<f32>, t: f32) -> Array2<f32> {
        debug_assert_eq!(xs.ncols(), self.dim());
        let mut out = Array2::<f32>::zeros(xs.raw_dim());
        for (i, x) in xs.rows().into_iter().enumerate() {
            out.row_mut(i).assign(&self.score_point_unchecked(&x, t));
        }
        out
    }

    fn dim(&self) -> Option<usize> {
        Some(self.samples.ncols())
    }
}
