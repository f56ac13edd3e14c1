//! Experiment configuration loaded from TOML.
//!
//! Every section is optional; missing fields take the library defaults.
//!
//! ```toml
//! [sde]
//! kind = "vp"
//! beta_max = 10.0
//!
//! [loss]
//! likelihood_weighting = true
//!
//! [train]
//! epochs = 500
//! batch_size = 64
//!
//! [sampler]
//! steps = 500
//! ```

use crate::loss::ScoreMatchingConfig;
use crate::sampler::EulerMaruyamaConfig;
use crate::sde::{Sde, SdeKind};
use crate::train::TrainConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub sde: SdeKind,
    pub loss: ScoreMatchingConfig,
    pub train: TrainConfig,
    pub sampler: EulerMaruyamaConfig,
}

impl ExperimentConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: ExperimentConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::read_to_string(path)?;
        Self::from_toml_str(&file)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Cross-section checks that serde alone cannot express.
    pub fn validate(&self) -> Result<()> {
        self.train.validate()?;
        self.loss.validate(&self.sde)?;
        if self.sampler.steps == 0 {
            return Err(Error::Domain("sampler steps must be >= 1"));
        }
        let t_min = self.sampler.t_min;
        if !(t_min >= 0.0) || !(t_min < self.sde.terminal_time()) {
            return Err(Error::Domain("sampler t_min must lie in [0, T)"));
        }
        Ok(())
    }
}
