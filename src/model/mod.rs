use burn::{optim::GradientsParams, prelude::*, train::TrainOutput};

pub mod dqn;

pub trait Model<B>
where
    B: Backend,
{
    /// `[channels, height, width]` of a single observation
    fn input_shape(&self) -> [usize; 3];
    fn num_actions(&self) -> usize;

    fn normalize(&self, observations: &[&[f32]], device: &B::Device) -> Tensor<B, 4>;
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2>;
}

pub trait Train<Item> {
    type Batch;

    fn train_step(&self, batch: &Self::Batch) -> TrainOutput<Item>;

    fn fit(&mut self, grads: GradientsParams);
}
