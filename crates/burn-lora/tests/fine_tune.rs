use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use burn_lora::{LowRankAdaptable, LowRankLinear, LowRankLinearConfig};

pub type TestBackend = burn::backend::NdArray<f32>;
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

type B = TestAutodiffBackend;

const BASE: [[f32; 4]; 3] = [
    [0.5, -1.0, 0.0, 2.0],
    [1.0, 1.0, 1.0, 1.0],
    [-0.5, 0.25, 3.0, 0.0],
];

fn layer(device: &<B as burn::tensor::backend::Backend>::Device) -> LowRankLinear<B> {
    LowRankLinearConfig::new(4, 3)
        .with_alpha(2.0)
        .with_rank(Some(2))
        .init_with(
            Tensor::from_data(BASE, device),
            Tensor::from_data([0.1, 0.2, 0.3], device),
        )
        .unwrap()
}

fn train(mut layer: LowRankLinear<B>, steps: usize) -> LowRankLinear<B> {
    let device = Default::default();
    let mut optim = SgdConfig::new().init();
    let input = Tensor::<B, 2>::from_data(
        [[1.0, 2.0, 3.0, 4.0], [-1.0, 0.5, 0.0, 2.0]],
        &device,
    );
    let target = Tensor::<B, 2>::from_data([[1.0, 0.0, -1.0], [0.0, 2.0, 1.0]], &device);

    for _ in 0..steps {
        let output = layer.forward(input.clone());
        let loss = (output - target.clone()).powf_scalar(2.0).mean();
        let grads = GradientsParams::from_grads(loss.backward(), &layer);
        layer = optim.step(0.01, layer, grads);
    }

    layer
}

fn abs_sum<const D: usize>(tensor: Tensor<TestBackend, D>) -> f32 {
    tensor.abs().sum().into_scalar().elem()
}

#[test]
fn base_is_bit_identical_after_training() {
    let device = Default::default();
    let layer = train(layer(&device), 5);

    layer
        .base()
        .into_data()
        .assert_eq(&TensorData::from(BASE), true);
}

#[test]
fn factors_and_bias_are_updated() {
    let device = Default::default();
    let initial = layer(&device);
    let lora_a = initial.lora_a().inner();
    let bias = initial.bias().inner();

    let trained = train(initial, 3);

    assert!(abs_sum(trained.lora_b().inner()) > 0.0);
    assert!(abs_sum(trained.lora_a().inner() - lora_a) > 0.0);
    assert!(abs_sum(trained.bias().inner() - bias) > 0.0);
}

#[test]
fn training_reduces_loss() {
    let device = Default::default();
    let input = Tensor::<TestBackend, 2>::from_data(
        [[1.0, 2.0, 3.0, 4.0], [-1.0, 0.5, 0.0, 2.0]],
        &device,
    );
    let target = Tensor::<TestBackend, 2>::from_data([[1.0, 0.0, -1.0], [0.0, 2.0, 1.0]], &device);
    let loss = |layer: &LowRankLinear<TestBackend>| -> f32 {
        (layer.forward(input.clone()) - target.clone())
            .powf_scalar(2.0)
            .mean()
            .into_scalar()
            .elem()
    };

    let initial = layer(&device);
    let before = loss(&initial.valid());
    let trained = train(initial, 20);
    let after = loss(&trained.valid());

    assert!(after < before, "loss went from {before} to {after}");
}

#[test]
fn merged_layer_keeps_trained_behavior() {
    let device = Default::default();
    let trained = train(layer(&device), 4).valid();
    let input = Tensor::<TestBackend, 3>::from_data(
        [[[0.0, 1.0, 0.0, -1.0]], [[2.0, 2.0, 2.0, 2.0]]],
        &device,
    );

    let expected = trained.forward(input.clone());
    let merged = trained.merge();

    merged
        .forward(input)
        .into_data()
        .assert_approx_eq::<f32>(&expected.into_data(), Default::default());
}

#[test]
fn wrapped_linear_trains_without_touching_its_weight() {
    let device = Default::default();
    let linear = burn::nn::LinearConfig::new(4, 3).init::<B>(&device);
    let weight = linear.weight.val().transpose().into_data();
    let layer = linear
        .with_low_rank(&LowRankLinearConfig::new(4, 3).with_rank(Some(2)))
        .unwrap();

    assert_eq!(layer.num_params() - layer.num_trainable_params(), 12);

    let trained = train(layer, 3);

    trained.base().into_data().assert_eq(&weight, true);
}
