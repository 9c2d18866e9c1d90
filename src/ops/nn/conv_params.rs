//! # Convolution parameter block
//!
//! [`ConvParams`] describes one convolution configuration: the unpadded and
//! padded input volumes, the filter bank, the output volume, the strides, the
//! bias flag, and the channel connectivity. It is built once per layer
//! configuration and shared read-only by every forward call and every worker.
//!
//! ## Layouts
//!
//! All volumes are channel-major, row-major planes (`[channel][y][x]`):
//!
//! ```text
//! index(y, x, channel) = (height * channel + y) * width + x
//! ```
//!
//! The filter bank is `[output_channel][input_channel][filter_row][filter_col]`,
//! described here as a [`Shape3d`] whose depth is `in_channels * out_channels`.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};
use crate::ops::nn::connection_table::ConnectionTable;

/// Width, height, and channel count of one volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape3d {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Shape3d {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self { width, height, depth }
    }

    /// Elements in one channel plane
    #[inline]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// Elements in the whole volume
    #[inline]
    pub const fn size(&self) -> usize {
        self.width * self.height * self.depth
    }

    #[inline]
    pub const fn get_index(&self, y: usize, x: usize, channel: usize) -> usize {
        (self.height * channel + y) * self.width + x
    }
}

/// How the input is padded before the filter slides over it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// No padding; the output shrinks by `window - 1`
    #[default]
    Valid,
    /// Pad by `window - 1` so that a unit-stride output keeps the input size
    Same,
}

/// The four volumes of a convolution, as taken by [`ConvParams::from_shapes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvShapes {
    pub input: Shape3d,
    pub in_padded: Shape3d,
    pub weight: Shape3d,
    pub output: Shape3d,
}

/// Immutable descriptor of one convolution invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    pub input: Shape3d,
    pub in_padded: Shape3d,
    pub weight: Shape3d,
    pub output: Shape3d,
    pub stride_h: usize,
    pub stride_w: usize,
    pub has_bias: bool,
    pub table: ConnectionTable,
    pub padding: Padding,
}

impl ConvParams {
    pub fn builder() -> ConvParamsBuilder {
        ConvParamsBuilder::default()
    }

    /// Assemble a parameter block from already-computed shapes.
    ///
    /// Checks that the shapes are mutually consistent: the padded input is at
    /// least the input, the output matches the filter walk over the padded
    /// input, the filter bank covers every channel pair, and the table is
    /// `output.depth x input.depth`.
    pub fn from_shapes(
        shapes: ConvShapes,
        stride_w: usize,
        stride_h: usize,
        has_bias: bool,
        table: ConnectionTable,
    ) -> Result<Self> {
        let ConvShapes { input, in_padded, weight, output } = shapes;
        let padding = if in_padded == input { Padding::Valid } else { Padding::Same };
        let params = Self {
            input,
            in_padded,
            weight,
            output,
            stride_h,
            stride_w,
            has_bias,
            table,
            padding,
        };
        params.validate()?;
        Ok(params)
    }

    /// Elements of the filter bank
    pub fn weight_len(&self) -> usize {
        self.weight.size()
    }

    /// Elements of the bias vector (zero when bias is disabled)
    pub fn bias_len(&self) -> usize {
        if self.has_bias {
            self.output.depth
        } else {
            0
        }
    }

    /// Offset of the `(output_channel, input_channel)` filter in the weight buffer
    #[inline]
    pub fn filter_offset(&self, out_channel: usize, in_channel: usize) -> usize {
        self.weight.get_index(0, 0, self.in_padded.depth * out_channel + in_channel)
    }

    fn validate(&self) -> Result<()> {
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(Error::InvalidParameter(format!(
                "strides must be at least 1, got h={} w={}",
                self.stride_h, self.stride_w
            )));
        }
        let volumes = [("input", &self.input), ("weight", &self.weight), ("output", &self.output)];
        for (name, shape) in volumes {
            if shape.size() == 0 {
                return Err(Error::InvalidParameter(format!("{} shape {:?} is empty", name, shape)));
            }
        }
        if self.in_padded.depth != self.input.depth
            || self.in_padded.width < self.input.width
            || self.in_padded.height < self.input.height
        {
            return Err(Error::ShapeMismatch(format!(
                "padded input {:?} does not contain input {:?}",
                self.in_padded, self.input
            )));
        }
        if self.weight.width > self.in_padded.width || self.weight.height > self.in_padded.height {
            return Err(Error::ShapeMismatch(format!(
                "filter {}x{} is larger than the padded input {}x{}",
                self.weight.width, self.weight.height, self.in_padded.width, self.in_padded.height
            )));
        }
        let out_w = conv_out_length(self.in_padded.width, self.weight.width, self.stride_w);
        let out_h = conv_out_length(self.in_padded.height, self.weight.height, self.stride_h);
        if self.output.width != out_w || self.output.height != out_h {
            return Err(Error::ShapeMismatch(format!(
                "output {}x{} does not match expected {}x{}",
                self.output.width, self.output.height, out_w, out_h
            )));
        }
        if self.weight.depth != self.input.depth * self.output.depth {
            return Err(Error::ShapeMismatch(format!(
                "weight depth {} does not equal in_channels x out_channels = {}",
                self.weight.depth,
                self.input.depth * self.output.depth
            )));
        }
        if self.table.out_channels() != self.output.depth
            || self.table.in_channels() != self.input.depth
        {
            return Err(Error::ShapeMismatch(format!(
                "connection table is {}x{}, expected {}x{}",
                self.table.out_channels(),
                self.table.in_channels(),
                self.output.depth,
                self.input.depth
            )));
        }
        Ok(())
    }
}

/// Number of filter positions along one axis of a padded input
#[inline]
pub fn conv_out_length(padded_length: usize, window: usize, stride: usize) -> usize {
    (padded_length - window) / stride + 1
}

/// Builder for [`ConvParams`] from layer-level settings
#[derive(Debug, Clone)]
pub struct ConvParamsBuilder {
    in_width: usize,
    in_height: usize,
    in_channels: usize,
    window_width: usize,
    window_height: usize,
    out_channels: usize,
    padding: Padding,
    stride_w: usize,
    stride_h: usize,
    has_bias: bool,
    table: Option<ConnectionTable>,
}

impl Default for ConvParamsBuilder {
    fn default() -> Self {
        Self {
            in_width: 0,
            in_height: 0,
            in_channels: 1,
            window_width: 5,
            window_height: 5,
            out_channels: 1,
            padding: Padding::Valid,
            stride_w: 1,
            stride_h: 1,
            has_bias: true,
            table: None,
        }
    }
}

impl ConvParamsBuilder {
    /// Unpadded input width, height, and channel count
    pub fn input(mut self, width: usize, height: usize, channels: usize) -> Self {
        self.in_width = width;
        self.in_height = height;
        self.in_channels = channels;
        self
    }

    /// Filter window size
    pub fn window(mut self, width: usize, height: usize) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    pub fn out_channels(mut self, out_channels: usize) -> Self {
        self.out_channels = out_channels;
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Horizontal and vertical stride
    pub fn stride(mut self, stride_w: usize, stride_h: usize) -> Self {
        self.stride_w = stride_w;
        self.stride_h = stride_h;
        self
    }

    pub fn bias(mut self, has_bias: bool) -> Self {
        self.has_bias = has_bias;
        self
    }

    /// Channel connectivity; fully connected when not set
    pub fn table(mut self, table: ConnectionTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn build(self) -> Result<ConvParams> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::InvalidParameter("filter window must be non-empty".to_string()));
        }
        if self.stride_w == 0 || self.stride_h == 0 {
            return Err(Error::InvalidParameter(format!(
                "strides must be at least 1, got w={} h={}",
                self.stride_w, self.stride_h
            )));
        }

        let input = Shape3d::new(self.in_width, self.in_height, self.in_channels);
        let in_padded = match self.padding {
            Padding::Valid => input,
            Padding::Same => Shape3d::new(
                self.in_width + self.window_width - 1,
                self.in_height + self.window_height - 1,
                self.in_channels,
            ),
        };
        if self.window_width > in_padded.width || self.window_height > in_padded.height {
            return Err(Error::ShapeMismatch(format!(
                "filter {}x{} is larger than the padded input {}x{}",
                self.window_width, self.window_height, in_padded.width, in_padded.height
            )));
        }
        let output = Shape3d::new(
            conv_out_length(in_padded.width, self.window_width, self.stride_w),
            conv_out_length(in_padded.height, self.window_height, self.stride_h),
            self.out_channels,
        );
        let weight = Shape3d::new(
            self.window_width,
            self.window_height,
            self.in_channels * self.out_channels,
        );
        let table = self
            .table
            .unwrap_or_else(|| ConnectionTable::full(self.out_channels, self.in_channels));

        let params = ConvParams {
            input,
            in_padded,
            weight,
            output,
            stride_h: self.stride_h,
            stride_w: self.stride_w,
            has_bias: self.has_bias,
            table,
            padding: self.padding,
        };
        params.validate()?;
        Ok(params)
    }
}
