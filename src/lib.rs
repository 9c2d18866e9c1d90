pub mod error;
pub mod ops;
pub mod simd;
pub mod execution;

// Re-export commonly used types
pub use error::{Error, Result};
pub use ops::tensor::{ConvElement, DataType, Tensor, TensorView, TensorViewMut};
pub use ops::kernel::{Conv2DKernel, KernelVariant};
pub use ops::nn::conv::{conv2d, kernel_for, pad_input, run_kernel, select_kernel, ReferenceKernel};
pub use ops::nn::conv5x5::Vectorized5x5;
pub use ops::nn::conv_params::{
    conv_out_length, ConvParams, ConvParamsBuilder, ConvShapes, Padding, Shape3d,
};
pub use ops::nn::connection_table::ConnectionTable;
pub use execution::context::{ExecutionContext, ExecutionOptions, KernelPreference};
pub use simd::{detect_simd, SimdLevel};
