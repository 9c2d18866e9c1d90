//! Output-channel × input-channel connectivity.
//!
//! A cleared entry means the pair contributes nothing to the output sum; the
//! kernels skip its multiply-accumulate entirely rather than multiplying by zero.
//! Grouped and sparse (LeNet-style) convolutions are expressed this way.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTable {
    out_channels: usize,
    in_channels: usize,
    /// Row-major `[out][in]`
    connected: Vec<bool>,
}

impl ConnectionTable {
    /// Every output channel reads every input channel
    pub fn full(out_channels: usize, in_channels: usize) -> Self {
        Self {
            out_channels,
            in_channels,
            connected: vec![true; out_channels * in_channels],
        }
    }

    /// Build from a row-major `[out][in]` mask
    pub fn from_bools(out_channels: usize, in_channels: usize, mask: &[bool]) -> Result<Self> {
        if mask.len() != out_channels * in_channels {
            return Err(Error::ShapeMismatch(format!(
                "connection mask has {} entries, expected {} x {} = {}",
                mask.len(),
                out_channels,
                in_channels,
                out_channels * in_channels
            )));
        }
        Ok(Self {
            out_channels,
            in_channels,
            connected: mask.to_vec(),
        })
    }

    /// Build from a predicate over `(output_channel, input_channel)`
    pub fn from_fn(
        out_channels: usize,
        in_channels: usize,
        f: impl Fn(usize, usize) -> bool,
    ) -> Self {
        let connected = (0..out_channels)
            .flat_map(|o| (0..in_channels).map(move |i| (o, i)))
            .map(|(o, i)| f(o, i))
            .collect();
        Self {
            out_channels,
            in_channels,
            connected,
        }
    }

    /// Block-diagonal table: output channel group `g` reads only input channel group `g`
    pub fn grouped(groups: usize, out_channels: usize, in_channels: usize) -> Result<Self> {
        if groups == 0 || out_channels % groups != 0 || in_channels % groups != 0 {
            return Err(Error::InvalidParameter(format!(
                "channels must be divisible by groups: input={}, output={}, groups={}",
                in_channels, out_channels, groups
            )));
        }
        let out_per_group = out_channels / groups;
        let in_per_group = in_channels / groups;
        Ok(Self::from_fn(out_channels, in_channels, |o, i| {
            o / out_per_group == i / in_per_group
        }))
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    #[inline]
    pub fn is_connected(&self, out_channel: usize, in_channel: usize) -> bool {
        debug_assert!(out_channel < self.out_channels && in_channel < self.in_channels);
        self.connected[out_channel * self.in_channels + in_channel]
    }

    /// Input channels feeding `out_channel`, ascending
    pub fn connected_inputs(&self, out_channel: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.in_channels).filter(move |&i| self.is_connected(out_channel, i))
    }

    /// True when every pair is connected
    pub fn is_full(&self) -> bool {
        self.connected.iter().all(|&c| c)
    }
}
