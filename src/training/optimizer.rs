//! AdamW optimizer and per-step learning-rate schedule

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_nn::optim::{Optimizer, ParamsAdamW};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

/// AdamW optimizer configuration
#[derive(Debug, Clone)]
pub struct AdamWConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 3e-5,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

/// AdamW over every variable in a `VarMap`
pub struct AdamW {
    inner: candle_nn::optim::AdamW,
    lr: f64,
    step_count: usize,
}

impl AdamW {
    pub fn new(var_map: &VarMap, config: AdamWConfig) -> Result<Self> {
        let params = ParamsAdamW {
            lr: config.lr,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: config.weight_decay,
        };

        let vars = var_map.all_vars();
        tracing::debug!("AdamW over {} variables", vars.len());
        let inner = candle_nn::optim::AdamW::new(vars, params)?;

        Ok(Self {
            inner,
            lr: config.lr,
            step_count: 0,
        })
    }

    /// Apply one update from computed gradients
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.inner.step(grads)?;
        self.step_count += 1;
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
        self.inner.set_learning_rate(lr);
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }
}

/// Shape of the decay after warmup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Linear decay to zero
    #[default]
    Linear,
    /// Half-cosine decay to zero
    Cosine,
}

impl std::str::FromStr for ScheduleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "cosine" => Ok(Self::Cosine),
            _ => Err(anyhow::anyhow!("Invalid schedule: {}. Valid options: linear, cosine", s)),
        }
    }
}

/// Linear warmup followed by linear or cosine decay, stepped once per batch
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    current_step: usize,
    kind: ScheduleKind,
}

impl LearningRateScheduler {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize, kind: ScheduleKind) -> Self {
        Self {
            base_lr,
            warmup_steps: warmup_steps.min(total_steps),
            total_steps,
            current_step: 0,
            kind,
        }
    }

    /// Learning rate for the current step
    pub fn get_lr(&self) -> f64 {
        if self.current_step < self.warmup_steps {
            return self.base_lr * (self.current_step as f64 / self.warmup_steps as f64);
        }

        let decay_steps = self.total_steps - self.warmup_steps;
        if decay_steps == 0 {
            return self.base_lr;
        }

        let progress =
            ((self.current_step - self.warmup_steps) as f64 / decay_steps as f64).min(1.0);
        match self.kind {
            ScheduleKind::Linear => self.base_lr * (1.0 - progress),
            ScheduleKind::Cosine => {
                self.base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
            }
        }
    }

    /// Advance one step and return the new learning rate
    pub fn step(&mut self) -> f64 {
        self.current_step += 1;
        self.get_lr()
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }
}
