//! Simple parametric score models with hand-derived gradients.
//!
//! Both models are affine in `x` with coefficients that are linear in the augmented time
//! features \(\psi(t) = [t - \tfrac12,\ \cos 2\pi t,\ 1]\):
//!
//! - [`AffineScore`]: \(o = M(t)^\top [1; x]\), `M(t)` of shape `(d+1) × d`,
//! - [`FactorScore`]: \(o = L(t) L(t)^\top x + \mu(t)\).
//!
//! These are intentionally boring baselines: enough structure to fit Gaussian-like data and to
//! test the training loop, without importing an autodiff framework. The `burn` feature swaps
//! the linear time maps for MLPs.

use crate::score::{time_embedding, ScoreModel};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};

/// Number of time features in \(\psi(t)\).
pub const TIME_FEATURES: usize = 3;

#[inline]
pub fn time_features(t: f32) -> [f32; TIME_FEATURES] {
    let [a, b] = time_embedding(t);
    [a, b, 1.0]
}

/// Dense matrix-times-state-plus-offset score:
///
/// \[
/// o_i(x, t) = \sum_{j=0}^{d} \sum_{p} W_{i,\,jP + p}\ \tilde x_j\ \psi_p(t),
/// \qquad \tilde x = [1; x],
/// \]
///
/// where `W` is a `d × (d+1)P` matrix (`P = 3` time features).
#[derive(Debug, Clone)]
pub struct AffineScore {
    /// Parameters `W` with shape `(d, (d+1)·P)`.
    pub w: Array2<f32>,
}

impl AffineScore {
    pub fn new_zeros(d: usize) -> Self {
        Self {
            w: Array2::zeros((d, (d + 1) * TIME_FEATURES)),
        }
    }

    pub fn d(&self) -> usize {
        self.w.nrows()
    }

    /// Features \(\tilde x \otimes \psi(t)\).
    fn features(x: &ArrayView1<f32>, t: f32) -> Array1<f32> {
        let psi = time_features(t);
        let mut f = Array1::<f32>::zeros((x.len() + 1) * TIME_FEATURES);
        for p in 0..TIME_FEATURES {
            f[p] = psi[p];
        }
        for j in 0..x.len() {
            for p in 0..TIME_FEATURES {
                f[(j + 1) * TIME_FEATURES + p] = x[j] * psi[p];
            }
        }
        f
    }

    /// The effective `(d+1) × d` matrix `M(t)`; row 0 is the offset.
    pub fn matrix_at(&self, t: f32) -> Array2<f32> {
        let d = self.d();
        let psi = time_features(t);
        let mut m = Array2::<f32>::zeros((d + 1, d));
        for i in 0..d {
            for j in 0..=d {
                let mut s = 0.0f32;
                for p in 0..TIME_FEATURES {
                    s += self.w[[i, j * TIME_FEATURES + p]] * psi[p];
                }
                m[[j, i]] = s;
            }
        }
        m
    }
}

impl ScoreModel for AffineScore {
    fn dim(&self) -> usize {
        self.d()
    }

    fn eval(&self, xs: &ArrayView2<f32>, ts: &[f32]) -> Array2<f32> {
        debug_assert_eq!(xs.ncols(), self.d());
        debug_assert_eq!(xs.nrows(), ts.len());
        let mut out = Array2::<f32>::zeros((xs.nrows(), self.d()));
        for (n, x) in xs.rows().into_iter().enumerate() {
            let f = Self::features(&x, ts[n]);
            out.row_mut(n).assign(&self.w.dot(&f));
        }
        out
    }

    fn sgd_step(&mut self, xs: &ArrayView2<f32>, ts: &[f32], grad_out: &ArrayView2<f32>, lr: f32) {
        debug_assert_eq!(grad_out.dim(), (xs.nrows(), self.d()));
        // dW[i, f] = sum_n g[n, i] * feat_n[f]
        let mut grad = Array2::<f32>::zeros(self.w.raw_dim());
        for (n, x) in xs.rows().into_iter().enumerate() {
            let f = Self::features(&x, ts[n]);
            let g = grad_out.row(n);
            for i in 0..self.d() {
                let gi = g[i];
                if gi == 0.0 {
                    continue;
                }
                grad.row_mut(i).scaled_add(gi, &f);
            }
        }
        self.w.scaled_add(-lr, &grad);
    }
}

/// Factor score \(o = L(t) L(t)^\top x + \mu(t)\), with
/// \(L(t) = \sum_p \psi_p(t) L_p\) and \(\mu(t) = \sum_p \psi_p(t) m_p\).
///
/// `L(t)` is a full `d × d` factor (not constrained to be triangular), so \(L L^\top\) is
/// symmetric positive semi-definite.
#[derive(Debug, Clone)]
pub struct FactorScore {
    /// Factor components, shape `(P, d, d)`.
    pub l: Array3<f32>,
    /// Offset components, shape `(P, d)`.
    pub mu: Array2<f32>,
}

impl FactorScore {
    /// Start from \(L(t) = \text{scale}\cdot I\) and \(\mu = 0\).
    ///
    /// A zero factor is a stationary point of the loss (all `L` gradients vanish), so the
    /// constant component is seeded with a scaled identity.
    pub fn new_identity(d: usize, scale: f32) -> Self {
        let mut l = Array3::<f32>::zeros((TIME_FEATURES, d, d));
        for k in 0..d {
            l[[TIME_FEATURES - 1, k, k]] = scale;
        }
        Self {
            l,
            mu: Array2::zeros((TIME_FEATURES, d)),
        }
    }

    pub fn d(&self) -> usize {
        self.mu.ncols()
    }

    /// `(L(t), μ(t))`.
    pub fn factor_at(&self, t: f32) -> (Array2<f32>, Array1<f32>) {
        let psi = time_features(t);
        let d = self.d();
        let mut l = Array2::<f32>::zeros((d, d));
        let mut mu = Array1::<f32>::zeros(d);
        for p in 0..TIME_FEATURES {
            l.scaled_add(psi[p], &self.l.index_axis(Axis(0), p));
            mu.scaled_add(psi[p], &self.mu.row(p));
        }
        (l, mu)
    }
}

impl ScoreModel for FactorScore {
    fn dim(&self) -> usize {
        self.d()
    }

    fn eval(&self, xs: &ArrayView2<f32>, ts: &[f32]) -> Array2<f32> {
        debug_assert_eq!(xs.ncols(), self.d());
        debug_assert_eq!(xs.nrows(), ts.len());
        let mut out = Array2::<f32>::zeros((xs.nrows(), self.d()));
        for (n, x) in xs.rows().into_iter().enumerate() {
            let (l, mu) = self.factor_at(ts[n]);
            let u = l.t().dot(&x);
            out.row_mut(n).assign(&(l.dot(&u) + &mu));
        }
        out
    }

    fn sgd_step(&mut self, xs: &ArrayView2<f32>, ts: &[f32], grad_out: &ArrayView2<f32>, lr: f32) {
        let d = self.d();
        debug_assert_eq!(grad_out.dim(), (xs.nrows(), d));

        let mut grad_l = Array3::<f32>::zeros(self.l.raw_dim());
        let mut grad_mu = Array2::<f32>::zeros(self.mu.raw_dim());
        for (n, x) in xs.rows().into_iter().enumerate() {
            let psi = time_features(ts[n]);
            let (l, _mu) = self.factor_at(ts[n]);
            let g = grad_out.row(n);
            let u = l.t().dot(&x);
            let ltg = l.t().dot(&g);

            // dLoss/dL[a, b] = g_a u_b + x_a (L^T g)_b
            let mut gl = Array2::<f32>::zeros((d, d));
            for a in 0..d {
                for b in 0..d {
                    gl[[a, b]] = g[a] * u[b] + x[a] * ltg[b];
                }
            }
            for p in 0..TIME_FEATURES {
                grad_l.index_axis_mut(Axis(0), p).scaled_add(psi[p], &gl);
                grad_mu.row_mut(p).scaled_add(psi[p], &g);
            }
        }
        self.l.scaled_add(-lr, &grad_l);
        self.mu.scaled_add(-lr, &grad_mu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, StandardNormal};

    /// Loss = sum(o ⊙ c) for a fixed c, so dLoss/do = c.
    fn linear_functional<M: ScoreModel>(m: &M, xs: &Array2<f32>, ts: &[f32], c: &Array2<f32>) -> f64 {
        let o = m.eval(&xs.view(), ts);
        o.iter().zip(c.iter()).map(|(&a, &b)| (a * b) as f64).sum()
    }

    fn normal(rng: &mut ChaCha8Rng) -> f32 {
        StandardNormal.sample(rng)
    }

    fn random_matrix(n: usize, d: usize, rng: &mut ChaCha8Rng) -> Array2<f32> {
        let mut m = Array2::<f32>::zeros((n, d));
        for v in m.iter_mut() {
            *v = normal(rng);
        }
        m
    }

    #[test]
    fn affine_matrix_at_agrees_with_eval() {
        let mut m = AffineScore::new_zeros(2);
        for (i, v) in m.w.iter_mut().enumerate() {
            *v = (i as f32 * 0.37).sin();
        }
        let x = array![[0.4f32, -1.2]];
        let t = 0.3f32;
        let o = m.eval(&x.view(), &[t]);
        let mt = m.matrix_at(t);
        for i in 0..2 {
            let expected = mt[[0, i]] + mt[[1, i]] * x[[0, 0]] + mt[[2, i]] * x[[0, 1]];
            assert!((o[[0, i]] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn factor_output_is_psd_quadratic_form() {
        let m = FactorScore::new_identity(3, 0.5);
        let x = array![[1.0f32, -2.0, 0.5]];
        let o = m.eval(&x.view(), &[0.7]);
        // L = 0.5 I -> o = 0.25 x.
        for k in 0..3 {
            assert!((o[[0, k]] - 0.25 * x[[0, k]]).abs() < 1e-6);
        }
        // x^T L L^T x >= 0
        let q: f32 = (0..3).map(|k| o[[0, k]] * x[[0, k]]).sum();
        assert!(q >= 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 24,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_sgd_step_follows_directional_derivative(
            d in 1usize..4,
            n in 1usize..5,
            seed in any::<u64>(),
        ) {
            // A tiny SGD step on a linear probe loss must decrease it by ~ lr * ||grad||^2.
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let xs = random_matrix(n, d, &mut rng);
            let c = random_matrix(n, d, &mut rng);
            let ts: Vec<f32> = (0..n).map(|i| (i as f32 + 0.5) / n as f32).collect();
            let lr = 1e-3f32;

            let mut affine = AffineScore::new_zeros(d);
            for v in affine.w.iter_mut() {
                *v = 0.3 * normal(&mut rng);
            }
            let before = linear_functional(&affine, &xs, &ts, &c);
            let mut stepped = affine.clone();
            stepped.sgd_step(&xs.view(), &ts, &c.view(), lr);
            let after = linear_functional(&stepped, &xs, &ts, &c);
            let dw = (&affine.w - &stepped.w) / lr;
            let g2: f64 = dw.iter().map(|&v| (v as f64) * (v as f64)).sum();
            prop_assert!(((before - after) - lr as f64 * g2).abs() <= 1e-3 + 1e-2 * lr as f64 * g2);

            let mut factor = FactorScore::new_identity(d, 0.8);
            for v in factor.l.iter_mut() {
                *v += 0.2 * normal(&mut rng);
            }
            let before = linear_functional(&factor, &xs, &ts, &c);
            let mut stepped = factor.clone();
            stepped.sgd_step(&xs.view(), &ts, &c.view(), lr);
            let after = linear_functional(&stepped, &xs, &ts, &c);
            let dl = (&factor.l - &stepped.l) / lr;
            let dmu = (&factor.mu - &stepped.mu) / lr;
            let g2: f64 = dl.iter().chain(dmu.iter()).map(|&v| (v as f64) * (v as f64)).sum();
            // Quadratic in L, so allow a second-order remainder.
            prop_assert!(before - after >= 0.5 * lr as f64 * g2 - 1e-3, "factor probe did not decrease: {} -> {}", before, after);
        }
    }
}
