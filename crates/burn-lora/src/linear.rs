use alloc::format;
use alloc::vec::Vec;

use burn::module::{Content, DisplaySettings, Module, ModuleDisplay, Param};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

use crate::{LowRankError, ParamEntry, ParamKind, ParamRegistry, TrainableParams};

/// Applies a frozen linear transformation plus a trainable low-rank correction to the
/// incoming data:
///
/// `O = I·Wᵀ + (alpha / rank)·I·(A·B)ᵀ + b`
///
/// Only `A`, `B` and the bias `b` receive gradients; `W` is never updated. Since `B` starts at
/// zero, a freshly built layer computes exactly the wrapped transformation.
///
/// Should be created with [LowRankLinearConfig](crate::LowRankLinearConfig).
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct LowRankLinear<B: Backend> {
    /// Frozen weight of shape `[d_output, d_input]`.
    pub(crate) base: Param<Tensor<B, 2>>,
    /// Trainable factor of shape `[d_output, rank]`.
    pub(crate) lora_a: Param<Tensor<B, 2>>,
    /// Trainable factor of shape `[rank, d_input]`.
    pub(crate) lora_b: Param<Tensor<B, 2>>,
    /// Trainable bias of shape `[d_output]`.
    pub(crate) bias: Param<Tensor<B, 1>>,
    pub(crate) d_input: usize,
    pub(crate) d_output: usize,
    pub(crate) rank: usize,
    pub(crate) alpha: f64,
    pub(crate) scaling: f64,
}

impl<B: Backend> ModuleDisplay for LowRankLinear<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        let alpha = format!("{}", self.alpha);

        content
            .add("d_input", &self.d_input)
            .add("d_output", &self.d_output)
            .add("rank", &self.rank)
            .add("alpha", &alpha)
            .optional()
    }
}

impl<B: Backend> LowRankLinear<B> {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[..., d_input]`
    /// - output: `[..., d_output]`
    ///
    /// # Panics
    ///
    /// If the last dimension of the input is not `d_input`. See
    /// [try_forward](Self::try_forward) for a fallible version.
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match self.try_forward(input) {
            Ok(output) => output,
            Err(err) => panic!("{err}"),
        }
    }

    /// Applies the forward pass, returning an error when the input has the wrong size.
    pub fn try_forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Result<Tensor<B, D>, LowRankError> {
        let dims = input.dims();

        if dims[D - 1] != self.d_input {
            let mut expected = dims;
            expected[D - 1] = self.d_input;
            return Err(LowRankError::shape_mismatch("input", &expected, &dims));
        }

        if D == 1 {
            // Insert and remove an extra batch dimension for the batch matmul to work.
            return Ok(self.forward_batched::<2>(input.unsqueeze()).flatten(0, 1));
        }

        Ok(self.forward_batched(input))
    }

    fn forward_batched<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let base = self.base.val().transpose().unsqueeze();
        let correction = self
            .lora_a
            .val()
            .matmul(self.lora_b.val())
            .transpose()
            .unsqueeze();

        let output = input.clone().matmul(base) + input.matmul(correction).mul_scalar(self.scaling);

        output + self.bias.val().unsqueeze()
    }

    /// The scaled correction `(alpha / rank)·A·B`, of shape `[d_output, d_input]`.
    pub fn delta_weight(&self) -> Tensor<B, 2> {
        self.lora_a
            .val()
            .matmul(self.lora_b.val())
            .mul_scalar(self.scaling)
    }

    /// Fold the correction into the frozen weight and return a plain [linear](Linear) layer
    /// computing the same transformation.
    pub fn merge(self) -> Linear<B> {
        let weight = (self.base.val() + self.delta_weight())
            .transpose()
            .detach();
        let bias = self.bias.val().detach();

        log::info!(
            "Merging rank {} correction into a [{}, {}] linear layer",
            self.rank,
            self.d_input,
            self.d_output,
        );

        let mut linear = LinearConfig::new(self.d_input, self.d_output)
            .with_initializer(Initializer::Zeros)
            .init(&weight.device());
        linear.weight = Param::from_tensor(weight);
        linear.bias = Some(Param::from_tensor(bias));

        linear
    }

    /// Record every parameter of the layer, trainable ones first.
    ///
    /// Names are `lora_a`, `lora_b`, `bias` and `base`.
    pub fn register_params<R: ParamRegistry>(&self, registry: &mut R) {
        registry.register(ParamEntry::new(
            "lora_a",
            self.lora_a.id,
            param_shape(&self.lora_a),
            ParamKind::Trainable,
        ));
        registry.register(ParamEntry::new(
            "lora_b",
            self.lora_b.id,
            param_shape(&self.lora_b),
            ParamKind::Trainable,
        ));
        registry.register(ParamEntry::new(
            "bias",
            self.bias.id,
            [self.d_output].to_vec(),
            ParamKind::Trainable,
        ));
        registry.register(ParamEntry::new(
            "base",
            self.base.id,
            param_shape(&self.base),
            ParamKind::Frozen,
        ));
    }

    /// The parameters an optimizer should update.
    pub fn trainable_params(&self) -> TrainableParams {
        let mut registry = TrainableParams::new();
        self.register_params(&mut registry);
        registry
    }

    /// Number of trainable scalars: both factors and the bias.
    pub fn num_trainable_params(&self) -> usize {
        self.d_output * self.rank + self.rank * self.d_input + self.d_output
    }

    /// The frozen weight, `[d_output, d_input]`.
    pub fn base(&self) -> Tensor<B, 2> {
        self.base.val()
    }

    /// The `[d_output, rank]` factor.
    pub fn lora_a(&self) -> Tensor<B, 2> {
        self.lora_a.val()
    }

    /// The `[rank, d_input]` factor.
    pub fn lora_b(&self) -> Tensor<B, 2> {
        self.lora_b.val()
    }

    /// The bias, `[d_output]`.
    pub fn bias(&self) -> Tensor<B, 1> {
        self.bias.val()
    }

    /// Rank of the decomposition.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Scaling numerator.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Factor applied to the correction, `alpha / rank`.
    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// Size of the input features.
    pub fn d_input(&self) -> usize {
        self.d_input
    }

    /// Size of the output features.
    pub fn d_output(&self) -> usize {
        self.d_output
    }
}

fn param_shape<B: Backend>(param: &Param<Tensor<B, 2>>) -> Vec<usize> {
    param.val().dims().to_vec()
}
