use crate::coverage::data_items::PerFileDataCoverage;
use crate::coverage::lines::PerFileLineCoverage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Rounded percentage of covered items, or `-1` when there is nothing to cover
pub fn percentage(covered: u32, total: u32) -> i32 {
    if total == 0 {
        return -1;
    }
    (100.0 * f64::from(covered) / f64::from(total) + 0.5) as i32
}

/// Some kind of coverage measured over a source file
pub trait PerFileCoverage {
    fn total_items(&self) -> u32;

    fn covered_items(&self) -> u32;

    fn coverage_percentage(&self) -> i32 {
        percentage(self.covered_items(), self.total_items())
    }
}

/// All coverage data for one source file
#[derive(Debug)]
pub struct FileCoverageData {
    /// Position in the registry, which probes use to find this file quickly
    pub index: usize,
    pub line_coverage: PerFileLineCoverage,
    pub data_coverage: PerFileDataCoverage,

    /// Short tag for the kind of the top-level type in the file (`cls`, `itf`, `exc`, ...)
    kind_of_top_level_type: Mutex<Option<String>>,

    /// Modification time of the class file, used to decide whether a previous run can be merged
    last_modified: AtomicU64,

    loaded_after_test_completion: bool,
}

impl FileCoverageData {
    fn new(index: usize, kind_of_top_level_type: Option<&str>, after_completion: bool) -> Self {
        FileCoverageData {
            index,
            line_coverage: PerFileLineCoverage::new(),
            data_coverage: PerFileDataCoverage::new(),
            kind_of_top_level_type: Mutex::new(kind_of_top_level_type.map(str::to_owned)),
            last_modified: AtomicU64::new(0),
            loaded_after_test_completion: after_completion,
        }
    }

    pub fn kind_of_top_level_type(&self) -> Option<String> {
        self.kind_of_top_level_type.lock().clone()
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified.load(Ordering::Relaxed)
    }

    pub fn set_last_modified(&self, last_modified: u64) {
        self.last_modified.store(last_modified, Ordering::Relaxed);
    }

    pub fn was_loaded_after_test_completion(&self) -> bool {
        self.loaded_after_test_completion
    }

    fn merge_with_data_from_previous_test_run(&self, previous: &FileCoverageData) {
        self.line_coverage
            .merge_information(&previous.line_coverage);
        self.data_coverage
            .merge_information(&previous.data_coverage);
    }
}

impl PerFileCoverage for FileCoverageData {
    fn total_items(&self) -> u32 {
        self.line_coverage.total_items() + self.data_coverage.total_items()
    }

    fn covered_items(&self) -> u32 {
        self.line_coverage.covered_items() + self.data_coverage.covered_items()
    }
}

#[derive(Debug, Default)]
struct Registry {
    by_name: HashMap<String, Arc<FileCoverageData>>,

    /// Files by index, which stays stable for the life of the registry
    indexed: Vec<Arc<FileCoverageData>>,
}

/// Registry of coverage data for every source file seen so far
///
/// This is shared (as an `Arc`) between the instrumentation pass, which registers files and
/// lines, and the probes, which record executions.
#[derive(Debug, Default)]
pub struct CoverageData {
    registry: RwLock<Registry>,
    terminated: AtomicBool,
}

impl CoverageData {
    pub fn new() -> CoverageData {
        CoverageData::default()
    }

    /// Find the data for a source file, adding it if this is the first class seen from the file
    ///
    /// Nested classes come from the same source file as their outer class, so the file may
    /// already be registered.
    pub fn get_or_add_file(
        &self,
        file: &str,
        kind_of_top_level_type: Option<&str>,
    ) -> Arc<FileCoverageData> {
        if let Some(data) = self.registry.read().by_name.get(file) {
            if let Some(kind) = kind_of_top_level_type {
                *data.kind_of_top_level_type.lock() = Some(kind.to_owned());
            }
            return data.clone();
        }

        let mut registry = self.registry.write();
        if let Some(data) = registry.by_name.get(file) {
            return data.clone();
        }
        let data = Arc::new(FileCoverageData::new(
            registry.indexed.len(),
            kind_of_top_level_type,
            self.is_terminated(),
        ));
        registry.indexed.push(data.clone());
        registry.by_name.insert(file.to_owned(), data.clone());
        log::debug!("Registered source file '{}' at index {}", file, data.index);
        data
    }

    pub fn file_data(&self, file: &str) -> Option<Arc<FileCoverageData>> {
        self.registry.read().by_name.get(file).cloned()
    }

    pub fn file_data_at(&self, index: usize) -> Option<Arc<FileCoverageData>> {
        self.registry.read().indexed.get(index).cloned()
    }

    /// Source files and their data, sorted by file name
    pub fn files(&self) -> Vec<(String, Arc<FileCoverageData>)> {
        let mut files: Vec<_> = self
            .registry
            .read()
            .by_name
            .iter()
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().by_name.is_empty()
    }

    /// Forget the files registered so far
    ///
    /// Indices handed out to instrumented code stay valid, so probes from classes that are
    /// still running keep working.
    pub fn clear(&self) {
        self.registry.write().by_name.clear();
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }

    /// Coverage over the source files whose names start with a prefix (or over all files)
    pub fn percentage(&self, file_name_prefix: Option<&str>) -> i32 {
        let registry = self.registry.read();
        let mut covered = 0;
        let mut total = 0;
        for (file, data) in &registry.by_name {
            if file_name_prefix.map_or(true, |prefix| file.starts_with(prefix)) {
                covered += data.covered_items();
                total += data.total_items();
            }
        }
        percentage(covered, total)
    }

    /// Smallest coverage of any one file, ignoring files loaded after the tests completed
    pub fn smallest_per_file_percentage(&self) -> Option<i32> {
        self.registry
            .read()
            .by_name
            .values()
            .filter(|data| !data.was_loaded_after_test_completion())
            .map(|data| data.coverage_percentage())
            .filter(|&percentage| percentage >= 0)
            .min()
    }

    /// Fold in the data of a previous run
    ///
    /// Files only seen in the previous run are carried over. Files seen in both are merged when
    /// their class files have not changed in between.
    pub fn merge(&self, previous: &CoverageData) {
        if std::ptr::eq(self, previous) {
            return;
        }
        let previous_files: Vec<_> = previous
            .registry
            .read()
            .by_name
            .iter()
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect();

        let mut registry = self.registry.write();
        for (file, previous_data) in previous_files {
            match registry.by_name.get(&file) {
                None => {
                    registry.by_name.insert(file, previous_data);
                }
                Some(data) => {
                    let last_modified = data.last_modified();
                    if last_modified > 0 && last_modified == previous_data.last_modified() {
                        data.merge_with_data_from_previous_test_run(&previous_data);
                    }
                }
            }
        }
    }
}
