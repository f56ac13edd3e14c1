//! Checks on generated samples and on score estimates.
//!
//! Moments use the biased `1/n` variance; the score error is a plain mean over all entries.

use crate::score::{check_score_dim, ScoreFn};
use crate::{Error, Result};
use ndarray::{Array1, ArrayView2};

/// Per-coordinate sample mean and (biased, `1/n`) variance.
pub fn sample_moments(xs: &ArrayView2<f32>) -> Result<(Array1<f32>, Array1<f32>)> {
    let n = xs.nrows();
    let d = xs.ncols();
    if n == 0 || d == 0 {
        return Err(Error::Domain("xs must be non-empty"));
    }
    let mut mean = vec![0.0f64; d];
    for row in xs.rows() {
        for k in 0..d {
            mean[k] += row[k] as f64;
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }
    let mut var = vec![0.0f64; d];
    for row in xs.rows() {
        for k in 0..d {
            let r = row[k] as f64 - mean[k];
            var[k] += r * r;
        }
    }
    let mean = Array1::from_iter(mean.into_iter().map(|v| v as f32));
    let var = Array1::from_iter(var.into_iter().map(|v| (v / n as f64) as f32));
    Ok((mean, var))
}

/// Mean squared difference between two score functions on the points `xs` at time `t`.
///
/// Averaged over all `n × d` entries.
pub fn score_mse<A: ScoreFn, B: ScoreFn>(a: &A, b: &B, xs: &ArrayView2<f32>, t: f32) -> Result<f32> {
    if xs.nrows() == 0 || xs.ncols() == 0 {
        return Err(Error::Domain("xs must be non-empty"));
    }
    check_score_dim(a, xs.ncols())?;
    check_score_dim(b, xs.ncols())?;
    let sa = a.score(xs, t);
    let sb = b.score(xs, t);
    if sa.dim() != xs.dim() || sb.dim() != xs.dim() {
        return Err(Error::Shape("score outputs must match the query shape"));
    }
    let mut s = 0.0f64;
    for (&u, &v) in sa.iter().zip(sb.iter()) {
        let r = (u - v) as f64;
        s += r * r;
    }
    Ok((s / sa.len() as f64) as f32)
}

/// Number of non-finite entries (NaN or ±inf).
pub fn count_non_finite(xs: &ArrayView2<f32>) -> usize {
    xs.iter().filter(|v| !v.is_finite()).count()
}
