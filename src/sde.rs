//! Forward SDEs with Gaussian transition kernels.
//!
//! Every SDE here is linear in `x`:
//! \[
//! dx = f(x,t)\,dt + g(t)\,dW, \qquad x_t \mid x_0 \sim \mathcal N\big(a(t)\,x_0,\ \sigma(t)^2 I\big).
//! \]
//!
//! The marginal is exposed as the pair `(mean_coeff(t), marginal_std(t))`, so callers can form the
//! mean pointwise (`marginal_mean`) or for a whole batch with one `t` per row (`marginal_prob`).

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// A forward SDE whose transition kernel from `t = 0` is an isotropic Gaussian.
pub trait Sde {
    /// Forward drift \(f(x,t)\) for one state vector.
    fn drift(&self, x: &ArrayView1<f32>, t: f32) -> Array1<f32>;

    /// Diffusion coefficient \(g(t)\).
    fn diffusion(&self, t: f32) -> f32;

    /// Marginal mean scale \(a(t)\), so that \(\mathbb E[x_t \mid x_0] = a(t) x_0\).
    fn mean_coeff(&self, t: f32) -> f32;

    /// Marginal standard deviation \(\sigma(t)\).
    fn marginal_std(&self, t: f32) -> f32;

    /// Terminal time `T` at which the prior is (approximately) reached.
    fn terminal_time(&self) -> f32 {
        1.0
    }

    /// Draw `n` samples of dimension `d` from the prior at time `T`.
    ///
    /// The default is the standard normal, which is the stationary law of every SDE in this module.
    fn sample_prior(&self, n: usize, d: usize, rng: &mut impl rand::Rng) -> Array2<f32>
    where
        Self: Sized,
    {
        standard_normal(n, d, rng)
    }

    /// Drift for a batch of states sharing one time `t`.
    fn drift_batch(&self, xs: &ArrayView2<f32>, t: f32) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros(xs.raw_dim());
        for (i, row) in xs.rows().into_iter().enumerate() {
            out.row_mut(i).assign(&self.drift(&row, t));
        }
        out
    }

    /// Pointwise marginal `(mean, std)` of \(x_t\) given \(x_0\).
    fn marginal_mean(&self, x0: &ArrayView1<f32>, t: f32) -> (Array1<f32>, f32) {
        let a = self.mean_coeff(t);
        (x0.mapv(|v| a * v), self.marginal_std(t))
    }

    /// Batched marginal: row `i` of `x0s` is evaluated at `ts[i]`.
    ///
    /// Returns `(means (n×d), stds (n))`.
    fn marginal_prob(&self, x0s: &ArrayView2<f32>, ts: &[f32]) -> Result<(Array2<f32>, Array1<f32>)> {
        if x0s.nrows() != ts.len() {
            return Err(Error::Shape("ts length must match x0s.nrows()"));
        }
        let mut means = x0s.to_owned();
        let mut stds = Array1::<f32>::zeros(ts.len());
        for (i, &t) in ts.iter().enumerate() {
            let a = self.mean_coeff(t);
            means.row_mut(i).mapv_inplace(|v| a * v);
            stds[i] = self.marginal_std(t);
        }
        Ok((means, stds))
    }
}

pub(crate) fn standard_normal(n: usize, d: usize, rng: &mut impl rand::Rng) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((n, d));
    for v in out.iter_mut() {
        *v = StandardNormal.sample(rng);
    }
    out
}

/// Ornstein–Uhlenbeck process \(dx = -x\,dt + \sqrt 2\,dW\).
///
/// Marginal: \(a(t) = e^{-t}\), \(\sigma(t) = \sqrt{1 - e^{-2t}}\); stationary law \(\mathcal N(0, I)\).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrnsteinUhlenbeck;

impl Sde for OrnsteinUhlenbeck {
    fn drift(&self, x: &ArrayView1<f32>, _t: f32) -> Array1<f32> {
        x.mapv(|v| -v)
    }

    fn diffusion(&self, _t: f32) -> f32 {
        core::f32::consts::SQRT_2
    }

    fn mean_coeff(&self, t: f32) -> f32 {
        (-t).exp()
    }

    fn marginal_std(&self, t: f32) -> f32 {
        // 1 - e^{-2t} via expm1 keeps precision for small t.
        (-(-2.0 * t).exp_m1()).max(0.0).sqrt()
    }
}

/// Variance-preserving SDE with a linear noise schedule
/// \(\beta(t) = \beta_{\min} + t(\beta_{\max} - \beta_{\min})\):
/// \[
/// dx = -\tfrac12 \beta(t) x\,dt + \sqrt{\beta(t)}\,dW.
/// \]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariancePreserving {
    pub beta_min: f32,
    pub beta_max: f32,
}

impl Default for VariancePreserving {
    fn default() -> Self {
        Self {
            beta_min: 0.1,
            beta_max: 20.0,
        }
    }
}

impl VariancePreserving {
    #[inline]
    pub fn beta(&self, t: f32) -> f32 {
        self.beta_min + t * (self.beta_max - self.beta_min)
    }

    /// \(\log a(t) = -\tfrac14 t^2 (\beta_{\max} - \beta_{\min}) - \tfrac12 t \beta_{\min}\).
    #[inline]
    fn log_mean_coeff(&self, t: f32) -> f32 {
        -0.25 * t * t * (self.beta_max - self.beta_min) - 0.5 * t * self.beta_min
    }
}

impl Sde for VariancePreserving {
    fn drift(&self, x: &ArrayView1<f32>, t: f32) -> Array1<f32> {
        let c = -0.5 * self.beta(t);
        x.mapv(|v| c * v)
    }

    fn diffusion(&self, t: f32) -> f32 {
        self.beta(t).max(0.0).sqrt()
    }

    fn mean_coeff(&self, t: f32) -> f32 {
        self.log_mean_coeff(t).exp()
    }

    fn marginal_std(&self, t: f32) -> f32 {
        (-(2.0 * self.log_mean_coeff(t)).exp_m1()).max(0.0).sqrt()
    }
}

/// Named SDE choice, used by configs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SdeKind {
    #[default]
    Ou,
    Vp {
        #[serde(default = "default_beta_min")]
        beta_min: f32,
        #[serde(default = "default_beta_max")]
        beta_max: f32,
    },
}

fn default_beta_min() -> f32 {
    VariancePreserving::default().beta_min
}

fn default_beta_max() -> f32 {
    VariancePreserving::default().beta_max
}

impl SdeKind {
    /// Look up an SDE by name (`"OU"`, `"VP"`, case-insensitive) with default parameters.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ou" | "ornstein-uhlenbeck" => Ok(Self::Ou),
            "vp" | "variance-preserving" => {
                let vp = VariancePreserving::default();
                Ok(Self::Vp {
                    beta_min: vp.beta_min,
                    beta_max: vp.beta_max,
                })
            }
            other => Err(Error::Config(format!("unknown SDE name: {other:?}"))),
        }
    }
}

impl Sde for SdeKind {
    fn drift(&self, x: &ArrayView1<f32>, t: f32) -> Array1<f32> {
        match *self {
            SdeKind::Ou => OrnsteinUhlenbeck.drift(x, t),
            SdeKind::Vp { beta_min, beta_max } => {
                VariancePreserving { beta_min, beta_max }.drift(x, t)
            }
        }
    }

    fn diffusion(&self, t: f32) -> f32 {
        match *self {
            SdeKind::Ou => OrnsteinUhlenbeck.diffusion(t),
            SdeKind::Vp { beta_min, beta_max } => {
                VariancePreserving { beta_min, beta_max }.diffusion(t)
            }
        }
    }

    fn mean_coeff(&self, t: f32) -> f32 {
        match *self {
            SdeKind::Ou => OrnsteinUhlenbeck.mean_coeff(t),
            SdeKind::Vp { beta_min, beta_max } => {
                VariancePreserving { beta_min, beta_max }.mean_coeff(t)
            }
        }
    }

    fn marginal_std(&self, t: f32) -> f32 {
        match *self {
            SdeKind::Ou => OrnsteinUhlenbeck.marginal_std(t),
            SdeKind::Vp { beta_min, beta_max } => {
                VariancePreserving { beta_min, beta_max }.marginal_std(t)
            }
        }
    }
}
