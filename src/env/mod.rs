use std::str::FromStr;

use anyhow::{Result, anyhow};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

pub mod catch;
pub mod frame_stack;

pub use catch::{Catch, CatchConfig};
pub use frame_stack::FrameStack;

/// Extra information reported alongside every step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Info {
    /// the episode was cut short by a step limit rather than ending naturally
    pub truncated: bool,
    /// frames played in the current episode
    pub frame: usize,
}

#[derive(Clone, Debug)]
pub struct Step {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub info: Info,
}

/// A game the agent can interact with.
///
/// Observations are flat `f32` buffers laid out channel-major according to
/// [`Environment::observation_shape`]. Any preprocessing (frame stacking,
/// grayscale, resizing) happens behind this interface.
pub trait Environment {
    fn reset(&mut self) -> Vec<f32>;

    /// Applies `action` and advances the game by one step.
    ///
    /// Panics when `action >= self.num_actions()`.
    fn step(&mut self, action: usize) -> Step;

    fn num_actions(&self) -> usize;

    /// `[channels, height, width]`
    fn observation_shape(&self) -> [usize; 3];

    fn observation_size(&self) -> usize {
        self.observation_shape().iter().product()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum EnvId {
    #[strum(serialize = "Catch-v0")]
    Catch,
    #[strum(serialize = "CatchMini-v0")]
    CatchMini,
}

impl EnvId {
    pub fn config(&self) -> CatchConfig {
        match self {
            EnvId::Catch => CatchConfig::new(),
            EnvId::CatchMini => CatchConfig::new()
                .with_height(36)
                .with_width(36)
                .with_rows(6)
                .with_columns(6),
        }
    }
}

/// Builds the environment registered under `name`, seeded with `seed`.
pub fn make(name: &str, seed: u64) -> Result<Box<dyn Environment>> {
    let id = EnvId::from_str(name).map_err(|_| {
        let known: Vec<String> = EnvId::iter().map(|id| id.to_string()).collect();
        anyhow!("unknown environment `{name}` (known: {})", known.join(", "))
    })?;

    Ok(Box::new(id.config().init(seed)?))
}
