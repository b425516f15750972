use anyhow::{Result, ensure};
use burn::config::Config;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Schedule {
    /// subtract `decay` every step
    Linear,
    /// multiply by `1 - decay` every step
    Exponential,
}

#[derive(Config, Debug)]
pub struct ExplorationConfig {
    #[config(default = 1.0)]
    pub start: f32,

    /// exploration rate floor
    #[config(default = 0.1)]
    pub min: f32,

    #[config(default = 5e-7)]
    pub decay: f32,

    #[config(default = "Schedule::Linear")]
    pub schedule: Schedule,
}

impl ExplorationConfig {
    pub fn init(&self) -> Result<Epsilon> {
        ensure!(
            (0.0..=1.0).contains(&self.min) && (self.min..=1.0).contains(&self.start),
            "exploration must satisfy 0 <= min <= start <= 1 (min {}, start {})",
            self.min,
            self.start
        );
        ensure!(
            (0.0..=1.0).contains(&self.decay),
            "exploration decay {} is outside of [0, 1]",
            self.decay
        );

        Ok(Epsilon {
            start: self.start,
            min: self.min,
            decay: self.decay,
            schedule: self.schedule,
            steps: 0,
        })
    }
}

/// Exploration rate for epsilon-greedy action selection, evaluated in
/// closed form from the number of decay steps taken.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Epsilon {
    start: f32,
    min: f32,
    decay: f32,
    schedule: Schedule,
    steps: u64,
}

impl Epsilon {
    pub fn value(&self) -> f32 {
        let start = f64::from(self.start);
        let decay = f64::from(self.decay);
        let steps = self.steps as f64;

        let value = match self.schedule {
            Schedule::Linear => start - decay * steps,
            Schedule::Exponential => start * (1.0 - decay).powf(steps),
        };

        value.max(f64::from(self.min)) as f32
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn step(&mut self) {
        self.steps += 1;
    }
}
