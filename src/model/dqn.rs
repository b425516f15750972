use anyhow::{Result, ensure};
use burn::{
    nn::{
        Linear, LinearConfig, Relu,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
};

use super::Model;

#[derive(Config, Debug)]
pub struct ConvLayerConfig {
    pub channels: usize,
    pub kernel: usize,
    pub stride: usize,
}

/// Convolution stack from the Nature DQN paper, sized for 84x84 inputs.
fn nature_conv() -> Vec<ConvLayerConfig> {
    vec![
        ConvLayerConfig::new(32, 8, 4),
        ConvLayerConfig::new(64, 4, 2),
        ConvLayerConfig::new(64, 3, 1),
    ]
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = "nature_conv()")]
    pub conv: Vec<ConvLayerConfig>,

    #[config(default = 512)]
    pub hidden_size: usize,
}

impl ModelConfig {
    pub fn init<B: Backend>(
        &self,
        input_shape: [usize; 3],
        num_actions: usize,
        device: &B::Device,
    ) -> Result<DuelingDqn<B>> {
        DuelingDqn::new(self, input_shape, num_actions, device)
    }

    /// Number of features the conv stack produces for one observation.
    pub fn flattened_size(&self, input_shape: [usize; 3]) -> Result<usize> {
        let [channels, height, width] = input_shape;
        ensure!(
            channels > 0 && height > 0 && width > 0,
            "empty input shape {input_shape:?}"
        );

        let (channels, height, width) =
            self.conv
                .iter()
                .try_fold((channels, height, width), |(_, height, width), layer| {
                    ensure!(
                        layer.stride > 0 && layer.kernel > 0,
                        "invalid conv layer {layer:?}"
                    );
                    ensure!(
                        height >= layer.kernel && width >= layer.kernel,
                        "input shape {input_shape:?} is too small for a {0}x{0} kernel",
                        layer.kernel
                    );

                    Ok((
                        layer.channels,
                        (height - layer.kernel) / layer.stride + 1,
                        (width - layer.kernel) / layer.stride + 1,
                    ))
                })?;

        Ok(channels * height * width)
    }
}

/// Dueling Q-network: a shared convolutional torso feeding a state-value
/// stream and an action-advantage stream.
#[derive(Module, Debug)]
pub struct DuelingDqn<B: Backend> {
    conv: Vec<Conv2d<B>>,
    fc: Linear<B>,
    activation: Relu,
    advantage: Linear<B>,
    value: Linear<B>,
    channels: usize,
    height: usize,
    width: usize,
}

impl<B> DuelingDqn<B>
where
    B: Backend,
{
    pub fn new(
        config: &ModelConfig,
        input_shape: [usize; 3],
        num_actions: usize,
        device: &B::Device,
    ) -> Result<Self> {
        ensure!(num_actions > 0, "the action space is empty");

        let flattened = config.flattened_size(input_shape)?;
        let [channels, height, width] = input_shape;

        let conv = config
            .conv
            .iter()
            .scan(channels, |channels_in, layer| {
                let conv = Conv2dConfig::new(
                    [*channels_in, layer.channels],
                    [layer.kernel, layer.kernel],
                )
                .with_stride([layer.stride, layer.stride])
                .init(device);

                *channels_in = layer.channels;
                Some(conv)
            })
            .collect();

        let fc = LinearConfig::new(flattened, config.hidden_size).init(device);
        let advantage = LinearConfig::new(config.hidden_size, num_actions).init(device);
        let value = LinearConfig::new(config.hidden_size, 1).init(device);

        Ok(Self {
            conv,
            fc,
            activation: Relu::new(),
            advantage,
            value,
            channels,
            height,
            width,
        })
    }

    /// Flat copy of every parameter, in declaration order.
    pub fn parameters(&self) -> Vec<f32> {
        fn flat<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
            tensor.into_data().iter::<f32>().collect()
        }

        let mut params = Vec::new();

        for conv in &self.conv {
            params.extend(flat(conv.weight.val()));
            if let Some(bias) = &conv.bias {
                params.extend(flat(bias.val()));
            }
        }

        for linear in [&self.fc, &self.advantage, &self.value] {
            params.extend(flat(linear.weight.val()));
            if let Some(bias) = &linear.bias {
                params.extend(flat(bias.val()));
            }
        }

        params
    }
}

/// Combines the two streams into Q-values.
///
/// The advantage is centred on its mean so that V and A are identifiable:
/// shifting every advantage by the same constant leaves Q unchanged.
pub fn dueling<B: Backend>(value: Tensor<B, 2>, advantage: Tensor<B, 2>) -> Tensor<B, 2> {
    value + (advantage.clone() - advantage.mean_dim(1))
}

impl<B> Model<B> for DuelingDqn<B>
where
    B: Backend,
{
    fn input_shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    fn num_actions(&self) -> usize {
        self.advantage.weight.dims()[1]
    }

    fn normalize(&self, observations: &[&[f32]], device: &B::Device) -> Tensor<B, 4> {
        let size = self.channels * self.height * self.width;

        let data: Vec<f32> = observations
            .iter()
            .flat_map(|observation| {
                assert_eq!(
                    observation.len(),
                    size,
                    "observation does not match the network input {:?}",
                    self.input_shape()
                );
                observation.iter().copied()
            })
            .collect();

        let shape = [observations.len(), self.channels, self.height, self.width];
        Tensor::from_data(TensorData::new(data, shape), device)
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let [_, channels, height, width] = input.dims();
        assert_eq!(
            [channels, height, width],
            self.input_shape(),
            "input does not match the network input shape"
        );

        let x = self
            .conv
            .iter()
            .fold(input, |x, conv| self.activation.forward(conv.forward(x)));
        let x = x.flatten::<2>(1, 3);
        let x = self.activation.forward(self.fc.forward(x));

        let advantage = self.advantage.forward(x.clone());
        let value = self.value.forward(x);

        dueling(value, advantage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn tiny() -> ModelConfig {
        ModelConfig::new()
            .with_conv(vec![ConvLayerConfig::new(4, 3, 1)])
            .with_hidden_size(16)
    }

    #[test]
    fn nature_flattened_size() {
        let config = ModelConfig::new();

        assert_eq!(config.flattened_size([4, 84, 84]).unwrap(), 64 * 7 * 7);
        assert_eq!(config.flattened_size([4, 36, 36]).unwrap(), 64);
        assert!(config.flattened_size([4, 35, 35]).is_err());
    }

    #[test]
    fn forward_shape() {
        let device = Default::default();
        let model = tiny().init::<B>([2, 6, 6], 5, &device).unwrap();

        let observations = vec![vec![0.5; 72]; 3];
        let observations: Vec<&[f32]> = observations.iter().map(Vec::as_slice).collect();
        let input = model.normalize(&observations, &device);
        let q = model.forward(input);

        assert_eq!(q.dims(), [3, 5]);
        assert_eq!(model.num_actions(), 5);
    }

    #[test]
    #[should_panic(expected = "observation does not match")]
    fn malformed_observation() {
        let device = Default::default();
        let model = tiny().init::<B>([2, 6, 6], 5, &device).unwrap();

        let observation = [0.0; 71];
        model.normalize(&[&observation[..]], &device);
    }

    #[test]
    #[should_panic(expected = "input does not match")]
    fn mismatched_input_shape() {
        let device = Default::default();
        let model = tiny().init::<B>([2, 6, 6], 5, &device).unwrap();

        model.forward(Tensor::zeros([1, 1, 6, 6], &device));
    }

    #[test]
    fn shifted_advantage_gives_same_q() {
        let device = Default::default();

        let value = Tensor::<B, 2>::from_floats([[2.0], [-1.0]], &device);
        let advantage = Tensor::<B, 2>::from_floats([[1.0, 2.0, 3.0], [-4.0, 0.0, 7.0]], &device);
        let shifted = advantage.clone().add_scalar(4.0);

        let q: Vec<f32> = dueling(value.clone(), advantage).into_data().iter().collect();
        let q_shifted: Vec<f32> = dueling(value, shifted).into_data().iter().collect();

        assert_eq!(q, vec![1.0, 2.0, 3.0, -6.0, -2.0, 5.0]);
        assert_eq!(q, q_shifted);
    }

    #[test]
    fn parameters_cover_every_layer() {
        let device = Default::default();
        let model = tiny().init::<B>([2, 6, 6], 5, &device).unwrap();

        // conv 4*2*3*3 + 4, fc 64*16 + 16, advantage 16*5 + 5, value 16 + 1
        assert_eq!(model.parameters().len(), 76 + 1040 + 85 + 17);
    }
}
