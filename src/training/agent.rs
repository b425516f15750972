use anyhow::{Context, Result, anyhow, ensure};
use burn::{
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    optim::{GradientsParams, Optimizer, RmsProp, RmsPropConfig, adaptor::OptimizerAdaptor},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{backend::AutodiffBackend, cast::ToElement},
    train::TrainOutput,
};
use log::{debug, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::model::{
    Model, Train,
    dqn::{DuelingDqn, ModelConfig},
};

use super::{
    checkpoint::{Checkpoint, Tag},
    data::{Batch, ReplayBuffer, Transition},
    exploration::{Epsilon, ExplorationConfig},
};

#[derive(Config)]
pub struct AgentConfig {
    #[config(default = "ModelConfig::new()")]
    pub model: ModelConfig,

    #[config(default = "RmsPropConfig::new()")]
    pub optimizer: RmsPropConfig,

    #[config(default = 3e-4)]
    pub lr: f64,

    /// discount future rewards
    #[config(default = 0.99)]
    pub gamma: f32,

    #[config(default = "ExplorationConfig::new()")]
    pub exploration: ExplorationConfig,

    #[config(default = 32)]
    pub batch_size: usize,

    /// replay buffer capacity
    #[config(default = 300_000)]
    pub memory_size: usize,

    /// learning steps between two target network synchronizations
    #[config(default = 1_000)]
    pub target_update: usize,
}

impl AgentConfig {
    pub fn init<B>(
        &self,
        input_shape: [usize; 3],
        num_actions: usize,
        device: B::Device,
        seed: u64,
    ) -> Result<Agent<B, OptimizerAdaptor<RmsProp, DuelingDqn<B>, B>>>
    where
        B: AutodiffBackend,
    {
        Agent::new(self, input_shape, num_actions, device, seed)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct AgentState {
    epsilon: Epsilon,
    steps: usize,
}

/// Double-DQN target: the online network picks the next action, the target
/// network values it. Terminal transitions get the bare reward.
pub fn double_q_target<B: Backend>(
    rewards: Tensor<B, 2>,
    dones: Tensor<B, 2>,
    online_next: Tensor<B, 2>,
    target_next: Tensor<B, 2>,
    gamma: f32,
) -> Tensor<B, 2> {
    let best = online_next.argmax(1);
    let bootstrap = target_next
        .gather(1, best)
        .mask_fill(dones.greater_elem(0.5), 0.0);

    rewards + bootstrap * gamma
}

/// Epsilon-greedy agent owning the online and target networks and the
/// replay buffer.
///
/// The target network lives on the inner (non-autodiff) backend, so it can
/// never receive gradients; it only changes through [`Agent::sync_target`].
pub struct Agent<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DuelingDqn<B>, B>,
{
    online: DuelingDqn<B>,
    target: DuelingDqn<B::InnerBackend>,
    optimizer: O,
    memory: ReplayBuffer,
    epsilon: Epsilon,
    rng: StdRng,
    lr: f64,
    gamma: f32,
    batch_size: usize,
    target_update: usize,
    device: B::Device,
    steps: usize,
}

impl<B> Agent<B, OptimizerAdaptor<RmsProp, DuelingDqn<B>, B>>
where
    B: AutodiffBackend,
{
    pub fn new(
        config: &AgentConfig,
        input_shape: [usize; 3],
        num_actions: usize,
        device: B::Device,
        seed: u64,
    ) -> Result<Self> {
        ensure!(config.batch_size > 0, "batch size must be positive");
        ensure!(
            config.batch_size <= config.memory_size,
            "batch size {} exceeds the replay buffer capacity {}",
            config.batch_size,
            config.memory_size
        );
        ensure!(config.target_update > 0, "target update interval must be positive");
        ensure!(
            (0.0..=1.0).contains(&config.gamma),
            "discount {} is outside of [0, 1]",
            config.gamma
        );

        let online = config.model.init::<B>(input_shape, num_actions, &device)?;

        Ok(Self {
            target: online.valid(),
            online,
            optimizer: config.optimizer.init(),
            memory: ReplayBuffer::new(config.memory_size),
            epsilon: config.exploration.init()?,
            rng: StdRng::seed_from_u64(seed),
            lr: config.lr,
            gamma: config.gamma,
            batch_size: config.batch_size,
            target_update: config.target_update,
            device,
            steps: 0,
        })
    }
}

impl<B, O> Agent<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DuelingDqn<B>, B>,
{
    pub fn online(&self) -> &DuelingDqn<B> {
        &self.online
    }

    pub fn target(&self) -> &DuelingDqn<B::InnerBackend> {
        &self.target
    }

    pub fn memory(&self) -> &ReplayBuffer {
        &self.memory
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon.value()
    }

    /// Number of gradient updates applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn num_actions(&self) -> usize {
        self.online.num_actions()
    }

    pub fn choose_action(&mut self, observation: &[f32]) -> usize {
        self.choose_actions(&[observation])[0]
    }

    /// Epsilon-greedy choice for each observation; greedy choices share a
    /// single forward pass.
    pub fn choose_actions(&mut self, observations: &[&[f32]]) -> Vec<usize> {
        let size: usize = self.online.input_shape().iter().product();
        for observation in observations {
            assert_eq!(
                observation.len(),
                size,
                "observation does not match the network input {:?}",
                self.online.input_shape()
            );
        }

        let explore: Vec<bool> = observations
            .iter()
            .map(|_| self.rng.random::<f32>() < self.epsilon.value())
            .collect();

        let greedy = match explore.iter().all(|explore| *explore) {
            true => Vec::new(),
            false => self.greedy(observations),
        };

        let num_actions = self.num_actions();
        explore
            .into_iter()
            .enumerate()
            .map(|(ndx, explore)| match explore {
                true => self.rng.random_range(0..num_actions),
                false => greedy[ndx],
            })
            .collect()
    }

    fn greedy(&self, observations: &[&[f32]]) -> Vec<usize> {
        let model = self.online.valid();
        let input = model.normalize(observations, &self.device);

        model
            .forward(input)
            .argmax(1)
            .into_data()
            .iter::<B::IntElem>()
            .map(|action| action.to_usize())
            .collect()
    }

    pub fn store_transition(&mut self, transition: Transition) {
        let size: usize = self.online.input_shape().iter().product();

        assert!(
            transition.action < self.num_actions(),
            "action {} is outside of 0..{}",
            transition.action,
            self.num_actions()
        );
        assert_eq!(transition.state.len(), size, "state does not match the network input");
        assert_eq!(
            transition.next_state.len(),
            size,
            "next state does not match the network input"
        );

        self.memory.store(transition);
    }

    /// Runs one learning step and returns its loss, or `None` while the
    /// replay buffer holds less than a batch.
    pub fn learn(&mut self) -> Option<f32> {
        if self.memory.len() < self.batch_size {
            return None;
        }

        let batch = {
            let sample = self.memory.sample(self.batch_size, &mut self.rng).ok()?;
            Batch::<B>::collate(&sample, self.online.input_shape(), &self.device)
        };

        let output = self.train_step(&batch);
        let loss = output.item.into_scalar().to_f32();
        if !loss.is_finite() {
            warn!("non-finite loss {loss} at learning step {}", self.steps);
        }

        self.fit(output.grads);

        Some(loss)
    }

    /// Copies the online parameters into the target network.
    pub fn sync_target(&mut self) {
        let snapshot = self.online.valid().into_record();
        self.target = self.target.clone().load_record(snapshot);

        debug!("target network synchronized at learning step {}", self.steps);
    }

    pub fn save(&self, checkpoint: &Checkpoint, tag: Tag) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        self.online
            .clone()
            .save_file(checkpoint.path(tag, "online"), &recorder)
            .map_err(|err| anyhow!("failed to save the online network: {err:?}"))?;
        self.target
            .clone()
            .save_file(checkpoint.path(tag, "target"), &recorder)
            .map_err(|err| anyhow!("failed to save the target network: {err:?}"))?;
        Recorder::<B>::record(
            &recorder,
            self.optimizer.to_record(),
            checkpoint.path(tag, "optim"),
        )
        .map_err(|err| anyhow!("failed to save the optimizer state: {err:?}"))?;

        let state = AgentState {
            epsilon: self.epsilon,
            steps: self.steps,
        };
        checkpoint.write(tag, "agent", &state)
    }

    /// Restores networks, optimizer state and counters saved by [`Agent::save`].
    pub fn load(mut self, checkpoint: &Checkpoint, tag: Tag) -> Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        self.online = self
            .online
            .load_file(checkpoint.path(tag, "online"), &recorder, &self.device)
            .map_err(|err| anyhow!("failed to load the online network: {err:?}"))?;
        self.target = self
            .target
            .load_file(checkpoint.path(tag, "target"), &recorder, &self.device)
            .map_err(|err| anyhow!("failed to load the target network: {err:?}"))?;

        let record: O::Record =
            Recorder::<B>::load(&recorder, checkpoint.path(tag, "optim"), &self.device)
                .map_err(|err| anyhow!("failed to load the optimizer state: {err:?}"))?;
        self.optimizer = self.optimizer.load_record(record);

        let state: AgentState = checkpoint
            .read(tag, "agent")
            .context("failed to load the agent state")?;
        self.epsilon = state.epsilon;
        self.steps = state.steps;

        Ok(self)
    }
}

impl<B, O> Train<Tensor<B, 1>> for Agent<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DuelingDqn<B>, B>,
{
    type Batch = Batch<B>;

    fn train_step(&self, batch: &Batch<B>) -> TrainOutput<Tensor<B, 1>> {
        let q = self.online.forward(batch.states.clone());
        let predicted = q.gather(1, batch.actions.clone());

        let target = {
            let next_states = batch.next_states.clone().inner();
            let online_next = self.online.valid().forward(next_states.clone());
            let target_next = self.target.forward(next_states);

            double_q_target(
                batch.rewards.clone().inner(),
                batch.dones.clone().inner(),
                online_next,
                target_next,
                self.gamma,
            )
        };

        let loss = MseLoss::new().forward(predicted, Tensor::from_inner(target), Reduction::Mean);

        TrainOutput::new(&self.online, loss.backward(), loss)
    }

    fn fit(&mut self, grads: GradientsParams) {
        self.online = self.optimizer.step(self.lr, self.online.clone(), grads);
        self.steps += 1;
        self.epsilon.step();

        if self.steps % self.target_update == 0 {
            self.sync_target();
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    use super::*;
    use crate::model::dqn::ConvLayerConfig;

    type B = Autodiff<NdArray>;

    fn config() -> AgentConfig {
        AgentConfig::new()
            .with_model(
                ModelConfig::new()
                    .with_conv(vec![ConvLayerConfig::new(4, 3, 1)])
                    .with_hidden_size(16),
            )
            .with_batch_size(4)
            .with_memory_size(16)
    }

    fn transition(action: usize) -> Transition {
        Transition {
            state: vec![0.25; 72],
            action,
            reward: 1.0,
            next_state: vec![0.5; 72],
            done: false,
        }
    }

    #[test]
    fn terminal_target_is_the_reward() {
        let device = Default::default();

        let rewards = Tensor::<NdArray, 2>::from_floats([[0.5], [-1.0]], &device);
        let dones = Tensor::<NdArray, 2>::from_floats([[1.0], [1.0]], &device);
        let online_next = Tensor::<NdArray, 2>::from_floats([[1.0, 5.0, 2.0], [3.0, 0.0, 1.0]], &device);
        let target_next =
            Tensor::<NdArray, 2>::from_floats([[1e9, 3.0, 100.0], [f32::MAX, 7.0, 1.0]], &device);

        let target: Vec<f32> = double_q_target(rewards, dones, online_next, target_next, 0.9)
            .into_data()
            .iter()
            .collect();

        assert_eq!(target, vec![0.5, -1.0]);
    }

    #[test]
    fn online_selects_target_evaluates() {
        let device = Default::default();

        let rewards = Tensor::<NdArray, 2>::from_floats([[0.5], [0.0]], &device);
        let dones = Tensor::<NdArray, 2>::from_floats([[0.0], [0.0]], &device);
        let online_next = Tensor::<NdArray, 2>::from_floats([[1.0, 5.0, 2.0], [3.0, 0.0, 1.0]], &device);
        let target_next = Tensor::<NdArray, 2>::from_floats([[10.0, 2.0, 100.0], [4.0, 8.0, 9.0]], &device);

        let target: Vec<f32> = double_q_target(rewards, dones, online_next, target_next, 0.5)
            .into_data()
            .iter()
            .collect();

        // action 1 valued 2.0 by the target network, not the target's own max of 100.0
        assert_eq!(target, vec![1.5, 2.0]);
    }

    #[test]
    fn greedy_when_epsilon_is_zero() {
        let config = config().with_exploration(ExplorationConfig::new().with_start(0.0).with_min(0.0));
        let mut agent = config.init::<B>([2, 6, 6], 3, Default::default(), 1).unwrap();

        let observation = vec![0.1; 72];
        let first = agent.choose_action(&observation);

        for _ in 0..10 {
            assert_eq!(agent.choose_action(&observation), first);
        }
        assert_eq!(agent.greedy(&[&observation]), vec![first]);
    }

    #[test]
    fn random_actions_stay_in_range() {
        let mut agent = config().init::<B>([2, 6, 6], 3, Default::default(), 2).unwrap();
        let observation = vec![0.1; 72];
        let observations = vec![observation.as_slice(); 8];

        let actions: Vec<usize> = (0..50).flat_map(|_| agent.choose_actions(&observations)).collect();

        assert!(actions.iter().all(|action| *action < 3));
        assert!((0..3).all(|action| actions.contains(&action)));
    }

    #[test]
    #[should_panic(expected = "outside of 0..3")]
    fn out_of_range_action_fails_fast() {
        let mut agent = config().init::<B>([2, 6, 6], 3, Default::default(), 3).unwrap();

        agent.store_transition(transition(3));
    }

    #[test]
    #[should_panic(expected = "observation does not match")]
    fn malformed_observation_fails_fast() {
        let mut agent = config().init::<B>([2, 6, 6], 3, Default::default(), 4).unwrap();

        agent.choose_action(&[0.0; 10]);
    }

    #[test]
    fn learn_waits_for_a_full_batch() {
        let mut agent = config().init::<B>([2, 6, 6], 3, Default::default(), 5).unwrap();

        for _ in 0..3 {
            agent.store_transition(transition(0));
            assert!(agent.learn().is_none());
        }

        agent.store_transition(transition(1));
        assert!(agent.learn().is_some());
        assert_eq!(agent.steps(), 1);
    }

    #[test]
    fn epsilon_decays_with_learning_steps() {
        let config = config().with_exploration(ExplorationConfig::new().with_decay(0.1));
        let mut agent = config.init::<B>([2, 6, 6], 3, Default::default(), 6).unwrap();

        (0..4).for_each(|action| agent.store_transition(transition(action % 3)));
        assert_eq!(agent.epsilon(), 1.0);

        agent.learn();
        agent.learn();

        assert!((agent.epsilon() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn invalid_config() {
        let device = Default::default();

        assert!(config().with_batch_size(32).init::<B>([2, 6, 6], 3, device, 0).is_err());
        assert!(config().with_target_update(0).init::<B>([2, 6, 6], 3, Default::default(), 0).is_err());
        assert!(config().init::<B>([2, 2, 2], 3, Default::default(), 0).is_err());
    }
}
