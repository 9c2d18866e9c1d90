use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};
use crate::ops::kernel::Conv2DKernel;
use crate::ops::nn::conv::{kernel_for, run_kernel, ReferenceKernel};
use crate::ops::nn::conv_params::ConvParams;
use crate::ops::tensor::{ConvElement, Tensor};

/// Which kernels a context may dispatch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum KernelPreference {
    /// Vectorized kernel when the filter shape and CPU allow it (default)
    #[default]
    #[strum(serialize = "auto")]
    Auto,
    /// Always run the reference kernel
    #[strum(serialize = "reference_only")]
    ReferenceOnly,
}

/// Options for convolution execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Number of threads to use (0 = use the global rayon pool)
    pub thread_count: usize,
    /// Fan batch elements out over the thread pool
    pub parallelize: bool,
    /// Kernel selection policy
    pub kernel_preference: KernelPreference,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            thread_count: 0,
            parallelize: true,
            kernel_preference: KernelPreference::Auto,
        }
    }
}

impl ExecutionOptions {
    /// Create a new execution options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of threads to use
    pub fn set_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Enable or disable batch parallelism
    pub fn enable_parallelism(mut self, enable: bool) -> Self {
        self.parallelize = enable;
        self
    }

    /// Set the kernel selection policy
    pub fn set_kernel_preference(mut self, preference: KernelPreference) -> Self {
        self.kernel_preference = preference;
        self
    }

    /// Parse options from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load options from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

/// Runs convolutions under a fixed set of [`ExecutionOptions`]
pub struct ExecutionContext {
    /// Options for execution
    options: ExecutionOptions,
    /// Dedicated thread pool when `thread_count` is set
    thread_pool: Option<rayon::ThreadPool>,
}

impl ExecutionContext {
    /// Create a new execution context
    pub fn new(options: ExecutionOptions) -> Result<Self> {
        let thread_pool = if options.thread_count > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.thread_count)
                .thread_name(|i| format!("conv-worker-{}", i))
                .build()
                .map_err(|e| Error::ThreadPool(e.to_string()))?;
            debug!("created thread pool with {} threads", options.thread_count);
            Some(pool)
        } else {
            None
        };

        Ok(Self { options, thread_pool })
    }

    /// Get execution options
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Get thread pool
    pub fn thread_pool(&self) -> Option<&rayon::ThreadPool> {
        self.thread_pool.as_ref()
    }

    /// Kernel this context would dispatch to for `params`
    pub fn kernel_for<T: ConvElement>(&self, params: &ConvParams) -> &'static dyn Conv2DKernel<T> {
        static REFERENCE: ReferenceKernel = ReferenceKernel;

        match self.options.kernel_preference {
            KernelPreference::Auto => kernel_for::<T>(params),
            KernelPreference::ReferenceOnly => &REFERENCE,
        }
    }

    /// Forward convolution over a batch under this context's options
    pub fn conv2d<T: ConvElement>(
        &self,
        input: &Tensor<T>,
        weights: &Tensor<T>,
        bias: &Tensor<T>,
        output: &mut Tensor<T>,
        params: &ConvParams,
    ) -> Result<()> {
        let kernel = self.kernel_for::<T>(params);
        let parallelize = self.options.parallelize;
        debug!("context conv2d: {} kernel, parallelize={}", kernel.name(), parallelize);

        match &self.thread_pool {
            Some(pool) => pool.install(|| {
                run_kernel(kernel, input, weights, bias, output, params, parallelize)
            }),
            None => run_kernel(kernel, input, weights, bias, output, params, parallelize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::kernel::KernelVariant;
    use std::io::Write;

    #[test]
    fn test_options_builder() {
        let options = ExecutionOptions::new()
            .set_thread_count(2)
            .enable_parallelism(false)
            .set_kernel_preference(KernelPreference::ReferenceOnly);
        assert_eq!(options.thread_count, 2);
        assert!(!options.parallelize);
        assert_eq!(options.kernel_preference, KernelPreference::ReferenceOnly);
        assert_eq!(options.kernel_preference.to_string(), "reference_only");
    }

    #[test]
    fn test_options_from_json() {
        let json = r#"{"thread_count": 3, "kernel_preference": "reference_only"}"#;
        let options = ExecutionOptions::from_json(json).unwrap();
        assert_eq!(options.thread_count, 3);
        assert!(options.parallelize);
        assert_eq!(options.kernel_preference, KernelPreference::ReferenceOnly);

        let negative = ExecutionOptions::from_json(r#"{"thread_count": -1}"#);
        assert!(matches!(negative, Err(Error::JsonError(_))));
    }

    #[test]
    fn test_options_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"parallelize": false}}"#).unwrap();

        let options = ExecutionOptions::from_file(file.path()).unwrap();
        assert!(!options.parallelize);
        assert_eq!(options.kernel_preference, KernelPreference::Auto);

        let missing = ExecutionOptions::from_file("/nonexistent/options.json");
        assert!(matches!(missing, Err(Error::IoError(_))));
    }

    #[test]
    fn test_context_conv2d() {
        let options = ExecutionOptions::new().set_thread_count(2);
        let context = ExecutionContext::new(options).unwrap();
        assert_eq!(context.thread_pool().map(|p| p.current_num_threads()), Some(2));

        let params = ConvParams::builder().input(9, 9, 1).window(5, 5).build().unwrap();
        let input = Tensor::<f32>::filled(&[3, 1, 9, 9], 1.0);
        let weights = Tensor::<f32>::filled(&[1, 1, 5, 5], 1.0);
        let bias = Tensor::<f32>::filled(&[1], 1.0);
        let mut output = Tensor::<f32>::zeros(&[3, 1, 5, 5]);

        context.conv2d(&input, &weights, &bias, &mut output, &params).unwrap();
        assert!(output.as_slice().iter().all(|&v| v == 26.0));
    }

    #[test]
    fn test_reference_only_preference() {
        let options =
            ExecutionOptions::new().set_kernel_preference(KernelPreference::ReferenceOnly);
        let context = ExecutionContext::new(options).unwrap();
        let params = ConvParams::builder().input(9, 9, 1).window(5, 5).build().unwrap();
        assert_eq!(context.kernel_for::<f32>(&params).variant(), KernelVariant::Reference);
    }
}
