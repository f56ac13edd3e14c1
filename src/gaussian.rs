//! Analytic scores for Gaussian data.
//!
//! If \(x_0 \sim \mathcal N(m, \operatorname{diag}(v))\) and the forward SDE has marginal
//! \(\mathcal N(a(t)x_0, \sigma(t)^2 I)\), then
//! \[
//! x_t \sim \mathcal N\big(a m,\ \operatorname{diag}(a^2 v + \sigma^2)\big),\qquad
//! \nabla \log p_t(x) = -\frac{x - a m}{a^2 v + \sigma^2}.
//! \]
//! This is the ground truth used to check learned scores.

use crate::score::ScoreFn;
use crate::sde::Sde;
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use rand_distr::{Distribution, StandardNormal};

/// A diagonal Gaussian data distribution.
#[derive(Debug, Clone)]
pub struct DiagGaussian {
    pub mean: Array1<f32>,
    pub var: Array1<f32>,
}

impl DiagGaussian {
    pub fn new(mean: Array1<f32>, var: Array1<f32>) -> Result<Self> {
        if mean.len() != var.len() {
            return Err(Error::Shape("mean and var must have the same length"));
        }
        if mean.is_empty() {
            return Err(Error::Domain("dimension must be >= 1"));
        }
        if var.iter().any(|&v| !(v > 0.0) || !v.is_finite()) {
            return Err(Error::Domain("var must be positive and finite"));
        }
        Ok(Self { mean, var })
    }

    /// Isotropic cluster `N(mean, std² I)`.
    pub fn isotropic(mean: Array1<f32>, std: f32) -> Result<Self> {
        let var = Array1::from_elem(mean.len(), std * std);
        Self::new(mean, var)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn sample(&self, n: usize, rng: &mut impl rand::Rng) -> Array2<f32> {
        let d = self.dim();
        let mut out = Array2::<f32>::zeros((n, d));
        for i in 0..n {
            for k in 0..d {
                let z: f32 = StandardNormal.sample(rng);
                out[[i, k]] = self.mean[k] + self.var[k].sqrt() * z;
            }
        }
        out
    }

    /// The score of this distribution pushed through `sde` to time `t`.
    pub fn marginal_score<'a, S: Sde>(&'a self, sde: &'a S) -> GaussianMarginalScore<'a, S> {
        GaussianMarginalScore { data: self, sde }
    }
}

/// Exact score of a [`DiagGaussian`] under a forward SDE.
pub struct GaussianMarginalScore<'a, S> {
    data: &'a DiagGaussian,
    sde: &'a S,
}

impl<S: Sde> ScoreFn for GaussianMarginalScore<'_, S> {
    fn score(&self, xs: &ArrayView2<f32>, t: f32) -> Array2<f32> {
        let a = self.sde.mean_coeff(t);
        let s2 = self.sde.marginal_std(t).powi(2);
        let mut out = Array2::<f32>::zeros(xs.raw_dim());
        for i in 0..xs.nrows() {
            for k in 0..xs.ncols() {
                let var_t = a * a * self.data.var[k] + s2;
                out[[i, k]] = -(xs[[i, k]] - a * self.data.mean[k]) / var_t;
            }
        }
        out
    }

    fn dim(&self) -> Option<usize> {
        Some(self.data.dim())
    }
}
