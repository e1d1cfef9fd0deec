//! Line, branch, and field coverage of JVM classes
//!
//! Classes are instrumented by [`modification::ClassModification`] so that running them calls
//! the static hooks of [`modification::DATA_RECORDING_CLASS`]. Those calls land in [`TestRun`],
//! which records them into the [`CoverageData`] registered during instrumentation.

pub mod config;
pub mod data;
pub mod data_items;
pub mod lines;
pub mod modification;
mod test_run;

pub use config::CoverageConfig;
pub use data::{CoverageData, FileCoverageData, PerFileCoverage};
pub use test_run::TestRun;
