pub mod context;

pub use context::{ExecutionContext, ExecutionOptions, KernelPreference};
