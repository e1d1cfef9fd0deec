//! Deciding which classes get instrumented, and instrumenting them
//!
//! [`ClassModification`] is the entry point, called with the bytes of each class as it gets
//! loaded. It asks [`ClassSelection`] whether the class is measured at all, then runs it through a
//! [`CoverageModifier`], which rewrites every method with a [`MethodModifier`] adding probes where
//! [`CfgTracking`] says they are needed. What was done is kept in a [`ModificationCache`] shared
//! by everything that modifies classes during a run.

mod cache;
mod cfg_tracking;
mod class_modification;
mod class_selection;
mod classes_not_loaded;
mod coverage_modifier;
mod method_modifier;

pub use cache::{ClassKey, ModificationCache};
pub use cfg_tracking::CfgTracking;
pub use class_modification::ClassModification;
pub use class_selection::{ClassPattern, ClassSelection, ClassSource};
pub use classes_not_loaded::ClassesNotLoaded;
pub use coverage_modifier::{CoverageModifier, ModificationContext};
pub use method_modifier::{MethodModifier, DATA_RECORDING_CLASS};
