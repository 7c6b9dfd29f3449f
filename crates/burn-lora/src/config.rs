use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

use crate::{LowRankError, LowRankLinear, ParamRegistry};

/// Configuration to create a [low-rank linear](LowRankLinear) layer around a frozen weight,
/// using the [init_with function](LowRankLinearConfig::init_with).
#[derive(Config, Debug)]
pub struct LowRankLinearConfig {
    /// The size of the input features.
    pub d_input: usize,
    /// The size of the output features.
    pub d_output: usize,
    /// Numerator of the scaling applied to the low-rank correction.
    #[config(default = 1.0)]
    pub alpha: f64,
    /// Rank of the decomposition.
    ///
    /// When `None`, half of the smallest layer dimension is used.
    pub rank: Option<usize>,
    /// Initializer for the `[d_output, rank]` factor. The `[rank, d_input]` factor always
    /// starts at zero.
    #[config(default = "Initializer::KaimingUniform{gain:1.0/3.0f64.sqrt(),fan_out_only:false}")]
    pub initializer: Initializer,
}

/// Resolve the decomposition rank of a `[d_output, d_input]` weight.
///
/// An unspecified rank defaults to `min(d_input, d_output) / 2`. A rank of zero, requested or
/// defaulted, is rejected.
pub fn resolve_rank(
    rank: Option<usize>,
    d_input: usize,
    d_output: usize,
) -> Result<usize, LowRankError> {
    let rank = rank.unwrap_or(usize::min(d_input, d_output) / 2);

    if rank == 0 {
        return Err(LowRankError::InvalidRank {
            rank,
            d_input,
            d_output,
        });
    }

    Ok(rank)
}

impl LowRankLinearConfig {
    /// The rank the layer will be built with.
    pub fn resolved_rank(&self) -> Result<usize, LowRankError> {
        resolve_rank(self.rank, self.d_input, self.d_output)
    }

    /// The factor applied to the low-rank correction, `alpha / rank`.
    pub fn scaling(&self) -> Result<f64, LowRankError> {
        Ok(self.alpha / self.resolved_rank()? as f64)
    }

    /// Initialize a [low-rank linear](LowRankLinear) layer.
    ///
    /// # Params
    ///
    /// - base: the frozen weight, `[d_output, d_input]`.
    /// - bias: the initial bias, `[d_output]`. It stays trainable.
    ///
    /// The layer lives on the device of `base`.
    pub fn init_with<B: Backend>(
        &self,
        base: Tensor<B, 2>,
        bias: Tensor<B, 1>,
    ) -> Result<LowRankLinear<B>, LowRankError> {
        let rank = self.resolved_rank()?;

        let base_dims = base.dims();
        if base_dims != [self.d_output, self.d_input] {
            return Err(LowRankError::shape_mismatch(
                "base",
                &[self.d_output, self.d_input],
                &base_dims,
            ));
        }

        let bias_dims = bias.dims();
        if bias_dims != [self.d_output] {
            return Err(LowRankError::shape_mismatch(
                "bias",
                &[self.d_output],
                &bias_dims,
            ));
        }

        let device = base.device();
        let scaling = self.alpha / rank as f64;

        // Fan-in of a `[d_output, rank]` matrix is its column count.
        let lora_a = self.initializer.init_with(
            [self.d_output, rank],
            Some(rank),
            Some(self.d_output),
            &device,
        );
        let lora_b = Initializer::Zeros.init([rank, self.d_input], &device);

        log::debug!(
            "Low-rank linear [{}, {}] with rank {rank} and scaling {scaling}",
            self.d_output,
            self.d_input,
        );

        Ok(LowRankLinear {
            base: Param::from_tensor(base).no_grad(),
            lora_a,
            lora_b,
            bias: Param::from_tensor(bias),
            d_input: self.d_input,
            d_output: self.d_output,
            rank,
            alpha: self.alpha,
            scaling,
        })
    }

    /// Initialize a layer and record its parameters in `registry`.
    pub fn init_registered<B: Backend, R: ParamRegistry>(
        &self,
        base: Tensor<B, 2>,
        bias: Tensor<B, 1>,
        registry: &mut R,
    ) -> Result<LowRankLinear<B>, LowRankError> {
        let layer = self.init_with(base, bias)?;
        layer.register_params(registry);

        Ok(layer)
    }
}
