//! Burn-backed (opt-in) neural score networks.
//!
//! This module is **additive**: it trains MLP score networks with Burn autodiff + Adam, while
//! the perturbation step, configs and samplers stay the ndarray ones. Randomness is drawn from
//! a seeded `ChaCha8Rng` on the host and uploaded, so training is reproducible given the
//! network initialization.
//!
//! Three parameterizations, all conditioned on \(\phi(t) = (t - \tfrac12, \cos 2\pi t)\):
//!
//! - [`MlpScoreNet`]: raw MLP on `[x, φ(t)]`,
//! - [`MatrixScoreNet`]: MLP(φ) → `M(t)` of shape `(d+1) × d`, output `M(t)ᵀ [1; x]`,
//! - [`FactorScoreNet`]: MLP(φ) → `(L(t), μ(t))`, output `L Lᵀ x + μ`.

use burn_core as burn;

use burn::module::{AutodiffModule, Module};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_nn::{Linear, LinearConfig};
use burn_optim::{AdamConfig, GradientsParams, Optimizer};
use ndarray::{Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::loss::{perturb, PerturbedBatch, ScoreMatchingConfig};
use crate::score::ScoreFn;
use crate::sde::Sde;
use crate::train::{log_epoch, TrainConfig, TrainReport};
use crate::{Error, Result};

/// Default burn backend for training: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// Backend of a trained network after `.valid()`.
pub type InferenceBackend = NdArray<f32>;

/// Hidden width used by the original experiments.
pub const DEFAULT_HIDDEN: usize = 256;

/// A network producing a `(batch, d)` output from states `x: [batch, d]` and times `t: [batch, 1]`.
pub trait ScoreNetwork<B: Backend> {
    fn dim(&self) -> usize;
    fn forward(&self, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// \(\phi(t)\) for a `[batch, 1]` column of times; returns `[batch, 2]`.
pub fn time_embedding<B: Backend>(t: Tensor<B, 2>) -> Tensor<B, 2> {
    let shifted = t.clone().sub_scalar(0.5);
    let periodic = t.mul_scalar(2.0 * core::f32::consts::PI).cos();
    Tensor::cat(vec![shifted, periodic], 1)
}

/// `in → hidden → hidden → hidden → out` with ReLU between layers.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    hidden: Vec<Linear<B>>,
    out: Linear<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn new(device: &B::Device, d_in: usize, hidden: usize, d_out: usize) -> Self {
        let hidden_layers = vec![
            LinearConfig::new(d_in, hidden).init(device),
            LinearConfig::new(hidden, hidden).init(device),
            LinearConfig::new(hidden, hidden).init(device),
        ];
        let out = LinearConfig::new(hidden, d_out).init(device);
        Self {
            hidden: hidden_layers,
            out,
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut h = x;
        for layer in &self.hidden {
            h = relu(layer.forward(h));
        }
        self.out.forward(h)
    }
}

/// Raw MLP score network on `[x, φ(t)]`.
#[derive(Module, Debug)]
pub struct MlpScoreNet<B: Backend> {
    mlp: Mlp<B>,
    d: usize,
}

impl<B: Backend> MlpScoreNet<B> {
    pub fn new(device: &B::Device, d: usize, hidden: usize) -> Self {
        Self {
            mlp: Mlp::new(device, d + 2, hidden, d),
            d,
        }
    }
}

impl<B: Backend> ScoreNetwork<B> for MlpScoreNet<B> {
    fn dim(&self) -> usize {
        self.d
    }

    fn forward(&self, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2> {
        let feats = Tensor::cat(vec![x, time_embedding(t)], 1);
        self.mlp.forward(feats)
    }
}

/// Dense matrix-times-state-plus-offset: \(o = M(t)^\top [1; x]\).
#[derive(Module, Debug)]
pub struct MatrixScoreNet<B: Backend> {
    mlp: Mlp<B>,
    d: usize,
}

impl<B: Backend> MatrixScoreNet<B> {
    pub fn new(device: &B::Device, d: usize, hidden: usize) -> Self {
        Self {
            mlp: Mlp::new(device, 2, hidden, (d + 1) * d),
            d,
        }
    }

    /// `M(t)` as `[batch, d+1, d]`; row 0 multiplies the constant feature.
    pub fn matrix(&self, t: Tensor<B, 2>) -> Tensor<B, 3> {
        let b = t.dims()[0];
        self.mlp
            .forward(time_embedding(t))
            .reshape([b, self.d + 1, self.d])
    }
}

impl<B: Backend> ScoreNetwork<B> for MatrixScoreNet<B> {
    fn dim(&self) -> usize {
        self.d
    }

    fn forward(&self, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2> {
        let b = x.dims()[0];
        let m = self.matrix(t);
        let ones = Tensor::<B, 2>::ones([b, 1], &x.device());
        let xt = Tensor::cat(vec![ones, x], 1).reshape([b, 1, self.d + 1]);
        xt.matmul(m).reshape([b, self.d])
    }
}

/// Factor parameterization: \(o = L(t) L(t)^\top x + \mu(t)\).
#[derive(Module, Debug)]
pub struct FactorScoreNet<B: Backend> {
    mlp: Mlp<B>,
    d: usize,
}

impl<B: Backend> FactorScoreNet<B> {
    pub fn new(device: &B::Device, d: usize, hidden: usize) -> Self {
        Self {
            mlp: Mlp::new(device, 2, hidden, (d + 1) * d),
            d,
        }
    }
}

impl<B: Backend> ScoreNetwork<B> for FactorScoreNet<B> {
    fn dim(&self) -> usize {
        self.d
    }

    fn forward(&self, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2> {
        let b = x.dims()[0];
        let d = self.d;
        let h = self
            .mlp
            .forward(time_embedding(t))
            .reshape([b, d + 1, d]);
        let l = h.clone().slice([0..b, 0..d, 0..d]);
        let mu = h.slice([0..b, d..d + 1, 0..d]).reshape([b, d]);

        // u = (L^T x)^T as [b, 1, d], then L u as [b, d, 1].
        let u = x.reshape([b, 1, d]).matmul(l.clone());
        let s = l.matmul(u.reshape([b, d, 1]));
        s.reshape([b, d]) + mu
    }
}

fn ndarray_to_burn_2<B: Backend>(device: &B::Device, x: &ArrayView2<f32>) -> Tensor<B, 2> {
    let (n, d) = x.dim();
    let data = TensorData::new(x.iter().copied().collect::<Vec<f32>>(), [n, d]);
    Tensor::from_data(data, device)
}

/// Broadcast one value per row to a full `[n, d]` tensor (host side).
fn per_row<B: Backend>(device: &B::Device, vals: &[f32], d: usize) -> Tensor<B, 2> {
    let n = vals.len();
    let mut flat = Vec::with_capacity(n * d);
    for &v in vals {
        flat.extend(std::iter::repeat(v).take(d));
    }
    Tensor::from_data(TensorData::new(flat, [n, d]), device)
}

/// Score-matching loss of `model` on an already perturbed batch (same formula as
/// [`crate::loss::loss_and_output_grad`]). Returns a scalar tensor.
pub fn score_matching_loss_burn<B: Backend, M: ScoreNetwork<B>, S: Sde>(
    model: &M,
    sde: &S,
    pb: &PerturbedBatch,
    cfg: &ScoreMatchingConfig,
    device: &B::Device,
) -> Tensor<B, 1> {
    let (n, d) = pb.xt.dim();
    let xt = ndarray_to_burn_2::<B>(device, &pb.xt.view());
    let t = Tensor::from_data(TensorData::new(pb.ts.clone(), [n, 1]), device);
    let noise = ndarray_to_burn_2::<B>(device, &pb.noise.view());
    let stds = per_row::<B>(device, &pb.stds.to_vec(), d);

    let out = model.forward(xt, t);
    let score = if cfg.score_scaling {
        out.neg().div(stds.clone())
    } else {
        out
    };
    let e = if cfg.likelihood_weighting {
        noise.div(stds) + score
    } else {
        noise + stds.mul(score)
    };
    let sq = e.powf_scalar(2.0);
    let rows = if cfg.reduce_mean {
        sq.mean_dim(1)
    } else {
        sq.sum_dim(1).mul_scalar(0.5)
    };
    let rows = if cfg.likelihood_weighting {
        let g2: Vec<f32> = pb.ts.iter().map(|&t| sde.diffusion(t).powi(2)).collect();
        rows.mul(per_row::<B>(device, &g2, 1))
    } else {
        rows
    };
    rows.mean()
}

fn scalar_of<B: Backend>(x: Tensor<B, 1>) -> Result<f32> {
    x.into_data()
        .to_vec::<f32>()
        .ok()
        .and_then(|v| v.first().copied())
        .ok_or(Error::Domain("loss tensor did not convert to f32"))
}

/// Train a score network with Adam on a fixed data set.
///
/// Same epoch structure as [`crate::train::train_score_model`]: a fresh permutation per
/// epoch, the incomplete tail skipped, one optimizer step per minibatch. Returns the trained
/// model and the per-epoch mean losses.
pub fn train_score_net<M, S>(
    mut model: M,
    data: &ArrayView2<f32>,
    sde: &S,
    loss_cfg: &ScoreMatchingConfig,
    cfg: &TrainConfig,
    device: &<BurnBackend as Backend>::Device,
) -> Result<(M, TrainReport)>
where
    M: AutodiffModule<BurnBackend> + ScoreNetwork<BurnBackend>,
    S: Sde,
{
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
    let mut optim = AdamConfig::new().init::<BurnBackend, M>();
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let mut perm: Vec<usize> = (0..n).collect();
    let mut report = TrainReport {
        epoch_losses: Vec::with_capacity(cfg.epochs),
    };

    tracing::info!(n, batch_size, steps_per_epoch, epochs = cfg.epochs, "starting burn score matching");

    for epoch in 0..cfg.epochs {
        perm.shuffle(&mut rng);
        let mut sum = 0.0f64;
        for chunk in perm.chunks_exact(batch_size) {
            let batch: Array2<f32> = data.select(Axis(0), chunk);
            let pb = perturb(sde, &batch.view(), loss_cfg, &mut rng)?;
            let loss = score_matching_loss_burn(&model, sde, &pb, loss_cfg, device);
            sum += scalar_of(loss.clone())? as f64;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.lr as f64, model, grads);
        }
        let epoch_loss = (sum / steps_per_epoch as f64) as f32;
        report.epoch_losses.push(epoch_loss);
        log_epoch(cfg, epoch, epoch_loss);
    }
    Ok((model, report))
}

/// Adapter so a (typically `.valid()`) network drives the samplers.
pub struct NetScore<'a, B: Backend, M, S> {
    model: &'a M,
    sde: &'a S,
    score_scaling: bool,
    device: B::Device,
}

impl<'a, B: Backend, M: ScoreNetwork<B>, S: Sde> NetScore<'a, B, M, S> {
    pub fn new(model: &'a M, sde: &'a S, score_scaling: bool, device: B::Device) -> Self {
        Self {
            model,
            sde,
            score_scaling,
            device,
        }
    }
}

impl<B: Backend, M: ScoreNetwork<B>, S: Sde> ScoreFn for NetScore<'_, B, M, S> {
    fn score(&self, xs: &ArrayView2<f32>, t: f32) -> Array2<f32> {
        let (n, d) = xs.dim();
        let x = ndarray_to_burn_2::<B>(&self.device, xs);
        let tt = Tensor::<B, 2>::full([n, 1], t, &self.device);
        let out = self.model.forward(x, tt);
        let flat = out
            .into_data()
            .to_vec::<f32>()
            .expect("score tensor to_vec");
        let out = Array2::from_shape_vec((n, d), flat).expect("score tensor shape");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussian::DiagGaussian;
    use crate::sampler::{EulerMaruyama, EulerMaruyamaConfig};
    use crate::sde::OrnsteinUhlenbeck;
    use ndarray::array;

    fn device() -> <BurnBackend as Backend>::Device {
        <BurnBackend as Backend>::Device::default()
    }

    #[test]
    fn burn_score_net_shapes_smoke() {
        let device = device();
        let batch = 5usize;
        let d = 3usize;
        let x = Tensor::<BurnBackend, 2>::zeros([batch, d], &device);
        let t = Tensor::<BurnBackend, 2>::full([batch, 1], 0.3, &device);

        let mlp = MlpScoreNet::<BurnBackend>::new(&device, d, 8);
        assert_eq!(mlp.forward(x.clone(), t.clone()).dims(), [batch, d]);
        let matrix = MatrixScoreNet::<BurnBackend>::new(&device, d, 8);
        assert_eq!(matrix.forward(x.clone(), t.clone()).dims(), [batch, d]);
        assert_eq!(matrix.matrix(t.clone()).dims(), [batch, d + 1, d]);
        let factor = FactorScoreNet::<BurnBackend>::new(&device, d, 8);
        assert_eq!(factor.forward(x, t).dims(), [batch, d]);
    }

    #[test]
    fn burn_loss_matches_ndarray_loss() {
        // Same perturbed batch and network outputs -> same scalar, for every option combination.
        let device = <InferenceBackend as Backend>::Device::default();
        let sde = OrnsteinUhlenbeck;
        let net = MlpScoreNet::<InferenceBackend>::new(&device, 2, 8);
        let batch = array![[1.0f32, -1.0], [0.5, 2.0], [-0.3, 0.1]];
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for &score_scaling in &[false, true] {
            for &likelihood_weighting in &[false, true] {
                for &reduce_mean in &[false, true] {
                    let cfg = ScoreMatchingConfig {
                        score_scaling,
                        likelihood_weighting,
                        reduce_mean,
                        pointwise_t: true,
                        t_min: 0.1,
                    };
                    let pb = perturb(&sde, &batch.view(), &cfg, &mut rng).unwrap();
                    let burn_loss =
                        scalar_of(score_matching_loss_burn(&net, &sde, &pb, &cfg, &device)).unwrap();

                    let x = ndarray_to_burn_2::<InferenceBackend>(&device, &pb.xt.view());
                    let t = Tensor::from_data(TensorData::new(pb.ts.clone(), [3, 1]), &device);
                    let flat = net.forward(x, t).into_data().to_vec::<f32>().unwrap();
                    let out = Array2::from_shape_vec((3, 2), flat).unwrap();
                    let (nd_loss, _) =
                        crate::loss::loss_and_output_grad(&sde, &pb, &out.view(), &cfg).unwrap();
                    assert!(
                        (burn_loss - nd_loss).abs() <= 1e-4 * (1.0 + nd_loss.abs()),
                        "{cfg:?}: burn={burn_loss} ndarray={nd_loss}"
                    );
                }
            }
        }
    }

    #[test]
    fn net_score_applies_score_scaling() {
        let device = <InferenceBackend as Backend>::Device::default();
        let sde = OrnsteinUhlenbeck;
        let net = FactorScoreNet::<InferenceBackend>::new(&device, 2, 8);
        let xs = array![[0.3f32, -0.7], [1.0, 2.0]];
        let raw = NetScore::<InferenceBackend, _, _>::new(&net, &sde, false, device.clone()).score(&xs.view(), 0.4);
        let scaled = NetScore::<InferenceBackend, _, _>::new(&net, &sde, true, device).score(&xs.view(), 0.4);
        let std = sde.marginal_std(0.4);
        for (r, s) in raw.iter().zip(scaled.iter()) {
            assert!((s + r / std).abs() <= 1e-5 * (1.0 + r.abs() / std));
        }
    }

    #[test]
    fn burn_training_reduces_loss_and_drives_sampler() {
        let device = device();
        let sde = OrnsteinUhlenbeck;
        let target = DiagGaussian::isotropic(array![1.5f32, -0.5], 0.3).unwrap();
        let data = target.sample(256, &mut ChaCha8Rng::seed_from_u64(1));

        let model = MatrixScoreNet::<BurnBackend>::new(&device, 2, 32);
        let cfg = TrainConfig {
            epochs: 60,
            batch_size: 64,
            lr: 3e-3,
            seed: 9,
            log_every: 0,
        };
        let loss_cfg = ScoreMatchingConfig::default();
        let (model, report) =
            train_score_net(model, &data.view(), &sde, &loss_cfg, &cfg, &device).unwrap();
        assert!(
            report.tail_mean(10) < report.head_mean(3),
            "loss did not decrease: head={} tail={}",
            report.head_mean(3),
            report.tail_mean(10)
        );

        let eval = model.valid();
        let score = NetScore::<InferenceBackend, _, _>::new(&eval, &sde, true, Default::default());
        let sampler = EulerMaruyama::new(
            &sde,
            &score,
            EulerMaruyamaConfig {
                steps: 100,
                ..Default::default()
            },
        )
        .unwrap();
        let xs = sampler.sample(64, 2, 3).unwrap();
        assert!(xs.iter().all(|v| v.is_finite()));
    }
}
