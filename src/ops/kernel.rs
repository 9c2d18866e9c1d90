use std::fmt::Debug;

use strum_macros::{AsRefStr, Display, EnumString};

use crate::ops::nn::conv_params::ConvParams;
use crate::ops::tensor::ConvElement;

/// Which kernel variant computes a convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum KernelVariant {
    /// Shape-agnostic nested-loop kernel
    #[strum(serialize = "reference")]
    Reference,
    /// Lane-parallel kernel specialized for 5x5 filters
    #[strum(serialize = "vectorized_5x5")]
    Vectorized5x5,
}

/// A forward convolution strategy.
///
/// Implementations compute one batch element at a time: `input` holds one
/// padded input volume (`params.in_padded.size()` elements), `output` one
/// output volume (`params.output.size()` elements), and `weights` / `bias` are
/// the full parameter buffers. Every element of `output` is overwritten.
pub trait Conv2DKernel<T: ConvElement>: Send + Sync + Debug {
    fn variant(&self) -> KernelVariant;

    /// Human-readable name used in logs
    fn name(&self) -> &'static str;

    fn convolve_sample(
        &self,
        input: &[T],
        weights: &[T],
        bias: &[T],
        output: &mut [T],
        params: &ConvParams,
    );
}
