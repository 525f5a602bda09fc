//! Orchestration of the DESIGNER diffusion MRI preprocessing pipeline over mrtrix3, FSL
//! and the DESIGNER matlab routines.

pub mod error;
pub mod config;
pub mod gradient;
pub mod nifti;
pub mod series;
pub mod tools;
pub mod matlab;
pub mod workspace;
pub mod pipeline;

pub mod denoise;
pub mod degibbs;
pub mod prealign;
pub mod eddy;
pub mod biascorrect;
pub mod smooth;
pub mod export;

#[cfg(test)]
mod test_runner;

pub use config::{DesignerArgs, DesignerParams};
pub use error::{DesignerError, Result};
pub use pipeline::designer_exec;
