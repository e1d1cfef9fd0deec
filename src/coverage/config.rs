use std::env;

/// Environment variable with the comma-separated globs of classes to instrument
pub const CLASSES_VAR: &str = "COVERAGE_CLASSES";

/// Environment variable with the comma-separated globs of classes to leave alone
pub const EXCLUDES_VAR: &str = "COVERAGE_EXCLUDES";

/// Value of the classes setting that restricts coverage to classes actually loaded
pub const LOADED_ONLY: &str = "loaded";

/// Settings of the coverage instrumentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageConfig {
    /// Classes to instrument, as comma-separated globs, or [`LOADED_ONLY`]
    ///
    /// When unset, every class that doesn't come from a library jar (or a test output
    /// directory) is instrumented.
    pub classes: Option<String>,

    /// Classes to never instrument, as comma-separated globs
    pub excludes: Option<String>,

    /// Compute `StackMapTable` frames for every rewritten method, even for class file versions
    /// that don't need them
    pub compute_frames: bool,
}

impl CoverageConfig {
    /// Read the settings from the environment, where empty variables count as unset
    pub fn from_env() -> CoverageConfig {
        CoverageConfig {
            classes: non_empty_var(CLASSES_VAR),
            excludes: non_empty_var(EXCLUDES_VAR),
            compute_frames: false,
        }
    }

    /// Override settings with the ones that are set in `other`
    pub fn overridden_by(mut self, other: CoverageConfig) -> CoverageConfig {
        if other.classes.is_some() {
            self.classes = other.classes;
        }
        if other.excludes.is_some() {
            self.excludes = other.excludes;
        }
        self.compute_frames |= other.compute_frames;
        self
    }

    pub fn is_loaded_only(&self) -> bool {
        self.classes.as_deref() == Some(LOADED_ONLY)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}
