pub mod cli;
pub mod config;
pub mod error;
pub mod response;

pub mod file_processing;
pub mod handlers;
pub mod models;
pub mod services;

#[cfg(test)]
mod testing;

pub use error::{AppError, AppResult};
pub use models::{Analysis, CureIt, Sample, Task};
pub use services::{ProgressEvent, VxCubeApi};
