use alloc::vec::Vec;

/// Errors raised while building or evaluating a [low-rank linear](crate::LowRankLinear) layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LowRankError {
    /// A tensor does not have the shape implied by the layer dimensions.
    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which tensor was checked.
        name: &'static str,
        /// Shape implied by the layer dimensions.
        expected: Vec<usize>,
        /// Shape that was provided.
        actual: Vec<usize>,
    },

    /// The decomposition rank resolved to zero.
    #[error(
        "Invalid rank {rank} for a [{d_output}, {d_input}] weight, the rank must be at least 1"
    )]
    InvalidRank {
        /// The resolved rank.
        rank: usize,
        /// Input dimension of the layer.
        d_input: usize,
        /// Output dimension of the layer.
        d_output: usize,
    },
}

impl LowRankError {
    pub(crate) fn shape_mismatch(name: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            name,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
