//! Score functions: anything that maps `(x, t)` to an estimate of \(\nabla_x \log p_t(x)\).

use crate::sde::Sde;
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};

/// A (batched) score estimate.
///
/// `xs` has shape `(n, d)`; all rows share the time `t`. The output has the same shape.
pub trait ScoreFn {
    fn score(&self, xs: &ArrayView2<f32>, t: f32) -> Array2<f32>;

    /// State dimension the score is defined on, if it is fixed.
    ///
    /// Closures report `None` and are only checked after evaluation.
    fn dim(&self) -> Option<usize> {
        None
    }
}

impl<F> ScoreFn for F
where
    F: Fn(&ArrayView2<f32>, f32) -> Array2<f32>,
{
    fn score(&self, xs: &ArrayView2<f32>, t: f32) -> Array2<f32> {
        self(xs, t)
    }
}

/// `Err(Shape)` when `score` has a fixed dimension different from `d`.
pub(crate) fn check_score_dim<F: ScoreFn + ?Sized>(score: &F, d: usize) -> Result<()> {
    match score.dim() {
        Some(k) if k != d => Err(Error::Shape("state width must match the score dimension")),
        _ => Ok(()),
    }
}

/// Two-dimensional time embedding \(\phi(t) = (t - \tfrac12,\ \cos 2\pi t)\).
#[inline]
pub fn time_embedding(t: f32) -> [f32; 2] {
    [t - 0.5, (2.0 * core::f32::consts::PI * t).cos()]
}

/// A parametric model of the score (or of the scaled noise, see [`ModelScore`]).
///
/// Gradients are hand-derived: `sgd_step` receives \(\partial L / \partial\,\text{output}\) and
/// applies one in-place SGD update to the parameters.
pub trait ScoreModel {
    /// State dimension `d`.
    fn dim(&self) -> usize;

    /// Evaluate on a batch; row `i` of `xs` uses time `ts[i]`.
    fn eval(&self, xs: &ArrayView2<f32>, ts: &[f32]) -> Array2<f32>;

    /// One SGD step given the loss gradient w.r.t. the output of [`ScoreModel::eval`].
    fn sgd_step(&mut self, xs: &ArrayView2<f32>, ts: &[f32], grad_out: &ArrayView2<f32>, lr: f32);
}

/// Adapter turning a [`ScoreModel`] into a [`ScoreFn`].
///
/// With `score_scaling`, the model output `o` is read as predicted noise and the score is
/// \(-o / \sigma(t)\); otherwise the output is the score itself.
pub struct ModelScore<'a, M, S> {
    pub model: &'a M,
    pub sde: &'a S,
    pub score_scaling: bool,
}

impl<'a, M: ScoreModel, S: Sde> ModelScore<'a, M, S> {
    pub fn new(model: &'a M, sde: &'a S, score_scaling: bool) -> Self {
        Self {
            model,
            sde,
            score_scaling,
        }
    }
}

impl<M: ScoreModel, S: Sde> ScoreFn for ModelScore<'_, M, S> {
    fn score(&self, xs: &ArrayView2<f32>, t: f32) -> Array2<f32> {
        let ts = vec![t; xs.nrows()];
        let out = self.model.eval(xs, &ts);
        if self.score_scaling {
            let std = self.sde.marginal_std(t);
            out.mapv(|o| -o / std)
        } else {
            out
        }
    }

    fn dim(&self) -> Option<usize> {
        Some(self.model.dim())
    }
}

/// Output-to-score conversion shared by the loss and [`ModelScore`], per row.
pub(crate) fn scale_rows(out: &Array2<f32>, stds: &Array1<f32>, score_scaling: bool) -> Array2<f32> {
    if !score_scaling {
        return out.clone();
    }
    let mut s = out.clone();
    for (i, mut row) in s.rows_mut().into_iter().enumerate() {
        let inv = -1.0 / stds[i];
        row.mapv_inplace(|o| o * inv);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sde::OrnsteinUhlenbeck;
    use ndarray::array;

    struct Doubling;

    impl ScoreModel for Doubling {
        fn dim(&self) -> usize {
            2
        }
        fn eval(&self, xs: &ArrayView2<f32>, _ts: &[f32]) -> Array2<f32> {
            xs.mapv(|v| 2.0 * v)
        }
        fn sgd_step(&mut self, _: &ArrayView2<f32>, _: &[f32], _: &ArrayView2<f32>, _: f32) {}
    }

    #[test]
    fn time_embedding_endpoints() {
        let [a, b] = time_embedding(0.0);
        assert_eq!(a, -0.5);
        assert!((b - 1.0).abs() < 1e-6);
        let [a, b] = time_embedding(0.5);
        assert_eq!(a, 0.0);
        assert!((b + 1.0).abs() < 1e-6);
    }

    #[test]
    fn closures_are_score_fns() {
        let f = |xs: &ArrayView2<f32>, _t: f32| xs.mapv(|v| -v);
        let x = array![[1.0f32, -2.0]];
        assert_eq!(f.score(&x.view(), 0.3), array![[-1.0f32, 2.0]]);
    }

    #[test]
    fn model_score_applies_noise_scaling() {
        let sde = OrnsteinUhlenbeck;
        let x = array![[1.0f32, -2.0]];
        let t = 0.4;
        let std = sde.marginal_std(t);

        let raw = ModelScore::new(&Doubling, &sde, false).score(&x.view(), t);
        assert_eq!(raw, array![[2.0f32, -4.0]]);

        let scaled = ModelScore::new(&Doubling, &sde, true).score(&x.view(), t);
        assert!((scaled[[0, 0]] + 2.0 / std).abs() < 1e-5);
        assert!((scaled[[0, 1]] - 4.0 / std).abs() < 1e-5);
    }
}
