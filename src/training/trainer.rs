use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, ensure};
use burn::{
    config::Config,
    optim::{RmsProp, adaptor::OptimizerAdaptor},
    tensor::backend::AutodiffBackend,
};
use log::{debug, info};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::{
    env::{self, Environment, Step},
    model::dqn::DuelingDqn,
};

use super::{
    agent::{Agent, AgentConfig},
    checkpoint::{Checkpoint, Tag},
    data::Transition,
};

#[derive(Config)]
pub struct TrainingConfig {
    /// environment id, see [`env::EnvId`]
    pub env: String,

    /// checkpoints and the run configuration are written here
    pub artifact_dir: String,

    #[config(default = "AgentConfig::new()")]
    pub agent: AgentConfig,

    /// environment transitions to collect, summed over all environments
    #[config(default = 1_000_000)]
    pub total_steps: usize,

    /// environments stepped in lockstep
    #[config(default = 32)]
    pub n_envs: usize,

    /// resume from the latest checkpoint instead of starting fresh
    #[config(default = true)]
    pub continue_training: bool,

    #[config(default = 0x12C0FFEE)]
    pub seed: u64,

    /// episodes averaged for the rolling score
    #[config(default = 100)]
    pub score_window: usize,

    /// global steps between progress lines
    #[config(default = 1_000)]
    pub log_every: usize,

    /// global steps between `latest` checkpoints
    #[config(default = 10_000)]
    pub save_every: usize,
}

impl TrainingConfig {
    pub fn init<B: AutodiffBackend>(self, device: B::Device) -> Result<Trainer<B>> {
        Trainer::new(self, device)
    }
}

/// Episode bookkeeping persisted with every checkpoint, so a resumed run
/// keeps comparing averages over the same window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct TrainerState {
    episodes: usize,
    best_score: Option<f32>,
    /// most recent episode scores, oldest first
    scores: VecDeque<f32>,
}

impl TrainerState {
    /// Adds a finished episode and returns the rolling average over at most
    /// `window` episodes.
    fn record(&mut self, score: f32, window: usize) -> f32 {
        self.episodes += 1;

        self.scores.push_back(score);
        while self.scores.len() > window {
            self.scores.pop_front();
        }

        self.average_score().unwrap_or(score)
    }

    fn improves(&self, average: f32) -> bool {
        self.best_score.is_none_or(|best| average > best)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Summary {
    pub episodes: usize,
    pub env_steps: usize,
    pub learn_steps: usize,
    pub best_score: Option<f32>,
    pub last_loss: Option<f32>,
}

pub struct Trainer<B>
where
    B: AutodiffBackend,
{
    config: TrainingConfig,
    envs: Vec<Box<dyn Environment>>,
    agent: Agent<B, OptimizerAdaptor<RmsProp, DuelingDqn<B>, B>>,
    checkpoint: Checkpoint,
    state: TrainerState,
}

impl<B> Trainer<B>
where
    B: AutodiffBackend,
{
    pub fn new(config: TrainingConfig, device: B::Device) -> Result<Self> {
        ensure!(config.n_envs > 0, "at least one environment is required");
        ensure!(config.score_window > 0, "score window must be positive");
        ensure!(
            config.log_every > 0 && config.save_every > 0,
            "log and save intervals must be positive"
        );

        let envs = (0..config.n_envs)
            .map(|ndx| env::make(&config.env, config.seed.wrapping_add(ndx as u64)))
            .collect::<Result<Vec<_>>>()?;
        let input_shape = envs[0].observation_shape();
        let num_actions = envs[0].num_actions();

        let checkpoint = Checkpoint::new(&config.artifact_dir, &config.env);
        checkpoint.create()?;

        B::seed(config.seed);

        let mut agent = config
            .agent
            .init::<B>(input_shape, num_actions, device, config.seed)?;
        let mut state = TrainerState::default();

        if config.continue_training {
            agent = agent.load(&checkpoint, Tag::Latest).with_context(|| {
                format!(
                    "cannot resume {} from {:?} (disable continue-training to start fresh)",
                    config.env,
                    checkpoint.dir()
                )
            })?;
            state = checkpoint.read(Tag::Latest, "trainer")?;

            info!(
                "resumed {} after {} learning steps, {} episodes (epsilon {:.3})",
                config.env,
                agent.steps().to_formatted_string(&Locale::en),
                state.episodes.to_formatted_string(&Locale::en),
                agent.epsilon()
            );
        } else {
            info!(
                "training {} from scratch: observation {:?}, {} actions",
                config.env, input_shape, num_actions
            );
        }

        config
            .save(checkpoint.dir().join(format!("{}-train.json", config.env)))
            .context("failed to save the training config")?;

        Ok(Self {
            config,
            envs,
            agent,
            checkpoint,
            state,
        })
    }

    pub fn agent(&self) -> &Agent<B, OptimizerAdaptor<RmsProp, DuelingDqn<B>, B>> {
        &self.agent
    }

    /// Steps every environment once per global step and learns once per
    /// global step, until `total_steps` transitions were collected.
    pub fn run(mut self) -> Result<Summary> {
        let n_envs = self.envs.len();
        let mut observations: Vec<Vec<f32>> =
            self.envs.iter_mut().map(|env| env.reset()).collect();
        let mut scores = vec![0.0f32; n_envs];
        let mut finished = Vec::new();

        let mut env_steps = 0;
        let mut global_step = 0;
        let mut last_loss = None;
        let start = Instant::now();

        while env_steps < self.config.total_steps {
            let actions = {
                let observations: Vec<&[f32]> = observations.iter().map(Vec::as_slice).collect();
                self.agent.choose_actions(&observations)
            };

            for (ndx, env) in self.envs.iter_mut().enumerate() {
                let Step {
                    observation,
                    reward,
                    done,
                    info,
                } = env.step(actions[ndx]);
                scores[ndx] += reward;

                let episode_over = done || info.truncated;
                let next = match episode_over {
                    true => env.reset(),
                    false => observation.clone(),
                };
                let state = std::mem::replace(&mut observations[ndx], next);

                self.agent.store_transition(Transition {
                    state,
                    action: actions[ndx],
                    reward,
                    next_state: observation,
                    done,
                });

                if episode_over {
                    finished.push(std::mem::take(&mut scores[ndx]));
                }
            }

            env_steps += n_envs;
            global_step += 1;

            if let Some(loss) = self.agent.learn() {
                last_loss = Some(loss);
            }

            for score in finished.drain(..) {
                self.finish_episode(score)?;
            }

            if global_step % self.config.log_every == 0 {
                self.log_progress(env_steps, last_loss, start.elapsed());
            }

            if global_step % self.config.save_every == 0 {
                self.save(Tag::Latest)?;
            }
        }

        self.save(Tag::Latest)?;
        self.log_progress(env_steps, last_loss, start.elapsed());

        Ok(Summary {
            episodes: self.state.episodes,
            env_steps,
            learn_steps: self.agent.steps(),
            best_score: self.state.best_score,
            last_loss,
        })
    }

    fn finish_episode(&mut self, score: f32) -> Result<()> {
        let average = self.state.record(score, self.config.score_window);
        debug!(
            "episode {} finished with score {score:.1} (average {average:.2})",
            self.state.episodes
        );

        if self.agent.steps() > 0 && self.state.improves(average) {
            info!(
                "average score improved to {average:.2} after {} episodes",
                self.state.episodes.to_formatted_string(&Locale::en)
            );

            self.state.best_score = Some(average);
            self.save(Tag::Best)?;
        }

        Ok(())
    }

    fn save(&self, tag: Tag) -> Result<()> {
        self.agent.save(&self.checkpoint, tag)?;
        self.checkpoint.write(tag, "trainer", &self.state)
    }

    fn log_progress(&self, env_steps: usize, loss: Option<f32>, elapsed: Duration) {
        let loss = loss.map_or(String::from("-"), |loss| format!("{loss:.4}"));
        let average = self
            .state
            .average_score()
            .map_or(String::from("-"), |average| format!("{average:.2}"));
        let rate = env_steps as f64 / elapsed.as_secs_f64().max(1e-9);

        info!(
            "[{} / {}] episodes {} | average score {} | epsilon {:.3} | loss {} | {:.0} steps/s",
            env_steps.to_formatted_string(&Locale::en),
            self.config.total_steps.to_formatted_string(&Locale::en),
            self.state.episodes.to_formatted_string(&Locale::en),
            average,
            self.agent.epsilon(),
            loss,
            rate,
        );
    }
}
