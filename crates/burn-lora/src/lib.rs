#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Low-rank adaptation (LoRA) of dense linear layers.
//!
//! LoRA fine-tunes a pretrained linear layer by freezing its weight and learning a small
//! additive correction expressed as the product of two low-rank matrices. During the forward
//! pass:
//!
//! ```text
//! output = x @ Wᵀ + (x @ (A @ B)ᵀ) * scaling + bias
//! ```
//!
//! Where:
//! - `W` is the frozen weight, `[d_output, d_input]`
//! - `A` has shape `[d_output, rank]`, Kaiming-uniform initialized
//! - `B` has shape `[rank, d_input]`, zero initialized
//! - `scaling = alpha / rank`
//!
//! Because `B` starts at zero, a freshly adapted layer reproduces the wrapped layer exactly.
//!
//! # Usage
//!
//! ```ignore
//! use burn::nn::LinearConfig;
//! use burn_lora::{LowRankAdaptable, LowRankLinearConfig};
//!
//! // Wrap a pretrained weight and bias.
//! let layer = LowRankLinearConfig::new(768, 768)
//!     .with_alpha(16.0)
//!     .with_rank(Some(8))
//!     .init_with(weight, bias)?;
//!
//! // Or adapt an existing linear layer.
//! let linear = LinearConfig::new(768, 768).init(&device);
//! let layer = linear.with_low_rank(&LowRankLinearConfig::new(768, 768))?;
//!
//! // Only A, B and the bias are trainable.
//! let output = layer.forward(input);
//!
//! // Fold the correction back into a plain linear layer for inference.
//! let merged = layer.merge();
//! ```

#[macro_use]
extern crate derive_new;

extern crate alloc;

mod config;
mod error;
mod linear;
mod registry;

pub use config::{LowRankLinearConfig, resolve_rank};
pub use error::LowRankError;
pub use linear::LowRankLinear;
pub use registry::{ParamEntry, ParamKind, ParamRegistry, TrainableParams};

use burn::module::Module;
use burn::nn::Linear;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Backend for test cases
#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;

/// Backend for autodiff test cases
#[cfg(test)]
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

/// Layers that can be wrapped with a low-rank correction.
///
/// The wrapped layer keeps the original transformation frozen and adds trainable low-rank
/// factors on top of it.
pub trait LowRankAdaptable<B: Backend>: Module<B> + Sized {
    /// Returns the layer dimensions: `(d_input, d_output)`.
    fn adapter_dims(&self) -> (usize, usize);

    /// Consume the layer and wrap it with a low-rank correction.
    ///
    /// The dimensions declared by `config` must match [adapter_dims](Self::adapter_dims).
    fn with_low_rank(self, config: &LowRankLinearConfig)
    -> Result<LowRankLinear<B>, LowRankError>;
}

impl<B: Backend> LowRankAdaptable<B> for Linear<B> {
    fn adapter_dims(&self) -> (usize, usize) {
        let [d_input, d_output] = self.weight.val().dims();
        (d_input, d_output)
    }

    fn with_low_rank(
        self,
        config: &LowRankLinearConfig,
    ) -> Result<LowRankLinear<B>, LowRankError> {
        let (d_input, d_output) = self.adapter_dims();
        if (config.d_input, config.d_output) != (d_input, d_output) {
            return Err(LowRankError::ShapeMismatch {
                name: "linear",
                expected: [config.d_input, config.d_output].to_vec(),
                actual: [d_input, d_output].to_vec(),
            });
        }

        // Burn stores linear weights as `[d_input, d_output]`.
        let weight = self.weight.val().transpose().detach();
        let bias = match self.bias {
            Some(bias) => bias.val().detach(),
            None => Tensor::zeros([d_output], &weight.device()),
        };

        config.init_with(weight, bias)
    }
}
