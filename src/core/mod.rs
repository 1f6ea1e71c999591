pub mod outcome;
pub mod utils;

pub use outcome::{ExecutionRequest, ExecutionResult, Mode};
