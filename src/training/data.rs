use anyhow::{Result, ensure};
use burn::prelude::*;
use rand::{Rng, seq::index};
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub done: bool,
}

/// Fixed-capacity circular store of transitions. Once full, every insert
/// overwrites the oldest entry.
pub struct ReplayBuffer {
    buffer: Vec<Transition>,
    capacity: usize,
    cursor: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be positive");

        Self {
            buffer: Vec::with_capacity(capacity.min(1 << 16)),
            capacity,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn store(&mut self, transition: Transition) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(transition);
        } else {
            self.buffer[self.cursor] = transition;
        }

        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Stored transitions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        let (newer, older) = match self.buffer.len() < self.capacity {
            true => (&self.buffer[..], &self.buffer[..0]),
            false => self.buffer.split_at(self.cursor),
        };

        older.iter().chain(newer)
    }

    /// Draws `batch_size` distinct transitions uniformly at random.
    pub fn sample<R>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<&Transition>>
    where
        R: Rng + ?Sized,
    {
        ensure!(
            batch_size <= self.buffer.len(),
            "cannot sample {batch_size} transitions from a buffer holding {}",
            self.buffer.len()
        );

        Ok(index::sample(rng, self.buffer.len(), batch_size)
            .into_iter()
            .map(|ndx| &self.buffer[ndx])
            .collect())
    }
}

#[derive(Clone, Debug)]
pub struct Batch<B>
where
    B: Backend,
{
    pub states: Tensor<B, 4>,
    pub actions: Tensor<B, 2, Int>,
    pub rewards: Tensor<B, 2>,
    pub dones: Tensor<B, 2>,
    pub next_states: Tensor<B, 4>,
}

impl<B> Batch<B>
where
    B: Backend,
{
    pub fn collate(sample: &[&Transition], shape: [usize; 3], device: &B::Device) -> Self {
        let [channels, height, width] = shape;
        let dims = [sample.len(), channels, height, width];

        let observations = |select: fn(&Transition) -> &[f32]| {
            let data: Vec<f32> = sample
                .par_iter()
                .flat_map_iter(|transition| select(transition).iter().copied())
                .collect();

            Tensor::<B, 4>::from_data(TensorData::new(data, dims), device)
        };

        let column = |data: Vec<f32>| {
            Tensor::<B, 2>::from_data(TensorData::new(data, [sample.len(), 1]), device)
        };

        let actions: Vec<i64> = sample.iter().map(|item| item.action as i64).collect();

        Self {
            states: observations(|item| &item.state),
            actions: Tensor::from_data(TensorData::new(actions, [sample.len(), 1]), device),
            rewards: column(sample.iter().map(|item| item.reward).collect()),
            dones: column(sample.iter().map(|item| item.done as u8 as f32).collect()),
            next_states: observations(|item| &item.next_state),
        }
    }
}
