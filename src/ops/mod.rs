pub mod kernel;
pub mod tensor;

pub mod prelude {
    pub use super::kernel::{Conv2DKernel, KernelVariant};
    pub use super::nn::conv::{conv2d, pad_input, select_kernel, ReferenceKernel};
    pub use super::nn::conv_params::{ConvParams, Padding, Shape3d};
    pub use super::nn::connection_table::ConnectionTable;
    pub use super::tensor::{ConvElement, DataType, Shape, Tensor};
}

pub use kernel::{Conv2DKernel, KernelVariant};
pub use tensor::{ConvElement, DataType, Shape, Tensor, TensorView, TensorViewMut};

// Module files for nn subdirectory
pub mod nn {
    pub mod conv;
    pub mod conv5x5;
    pub mod conv_params;
    pub mod connection_table;
}
