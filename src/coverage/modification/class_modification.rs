use crate::coverage::config::CoverageConfig;
use crate::coverage::data::CoverageData;
use crate::coverage::modification::cache::{ClassKey, ModificationCache};
use crate::coverage::modification::class_selection::{ClassSelection, ClassSource};
use crate::coverage::modification::coverage_modifier::{CoverageModifier, ModificationContext};
use crate::jvm::{ClassPathHierarchy, Error};
use parking_lot::Mutex;
use std::sync::Arc;

/// Entry point deciding on, and carrying out, the instrumentation of classes as they get loaded
///
/// A class is instrumented at most once per class loader: asking again returns the bytes produced
/// the first time. Classes that can't be instrumented are left alone, with `None` returned so the
/// caller keeps the original bytes.
#[derive(Debug)]
pub struct ClassModification {
    selection: ClassSelection,
    cache: Arc<ModificationCache>,
    coverage_data: Arc<CoverageData>,
    hierarchy: ClassPathHierarchy,

    /// Class path locations of modified classes, keeping the deepest of nested locations
    unique_locations: Mutex<Vec<ClassSource>>,
}

impl ClassModification {
    pub fn new(
        config: CoverageConfig,
        cache: Arc<ModificationCache>,
        coverage_data: Arc<CoverageData>,
    ) -> ClassModification {
        ClassModification {
            selection: ClassSelection::new(config),
            cache,
            coverage_data,
            hierarchy: ClassPathHierarchy::with_jdk(),
            unique_locations: Mutex::new(vec![]),
        }
    }

    /// Look super classes up in the given hierarchy when merging types in computed frames
    ///
    /// By default, super classes come from the JDK class library and the locations of the
    /// classes being instrumented.
    pub fn with_hierarchy(mut self, hierarchy: ClassPathHierarchy) -> ClassModification {
        self.hierarchy = hierarchy;
        self
    }

    pub fn hierarchy(&self) -> &ClassPathHierarchy {
        &self.hierarchy
    }

    pub fn selection(&self) -> &ClassSelection {
        &self.selection
    }

    pub fn cache(&self) -> &Arc<ModificationCache> {
        &self.cache
    }

    pub fn coverage_data(&self) -> &Arc<CoverageData> {
        &self.coverage_data
    }

    /// Whether class files that never got loaded should be looked for, once tests are done
    pub fn should_consider_classes_not_loaded(&self) -> bool {
        !self.selection.loaded_only()
    }

    pub fn is_to_be_considered_for_coverage(&self, class_name: &str, source: &ClassSource) -> bool {
        let key = ClassKey::new(class_name, source.loader_id);
        !self.cache.is_modified(&key) && self.is_selected(&key, source)
    }

    fn is_selected(&self, key: &ClassKey, source: &ClassSource) -> bool {
        self.cache
            .decision(key, || self.selection.is_selected(&key.name, source))
    }

    /// Instrument a class for coverage, returning `None` if it must be left unmodified
    pub fn modify_class(
        &self,
        class_name: &str,
        source: &ClassSource,
        original: &[u8],
    ) -> Option<Arc<[u8]>> {
        let key = ClassKey::new(class_name, source.loader_id);
        if let Some(modified) = self.cache.modified_bytes(&key) {
            log::debug!("Reusing instrumented bytecode of {}", class_name);
            return Some(modified);
        }
        if !self.is_selected(&key, source) {
            return None;
        }

        let result = match self.cache.take_nested(&key) {
            Some(nested) => Ok(nested.to_vec()),
            None => self.modify_class_for_coverage(source, original),
        };
        match result {
            Ok(modified) => {
                log::debug!("Instrumented {}", class_name);
                let modified = self.cache.record_modified(key, modified);
                self.register_modified_class(source);
                Some(modified)
            }
            Err(Error::VisitInterrupted) => {
                log::debug!("Class {} is not eligible for coverage", class_name);
                None
            }
            Err(err) => {
                log::warn!("Leaving {} unmodified: {}", class_name, err);
                None
            }
        }
    }

    fn modify_class_for_coverage(
        &self,
        source: &ClassSource,
        original: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if let Some(location) = &source.location {
            self.hierarchy.add_location(location);
        }
        let context = ModificationContext {
            cache: &self.cache,
            coverage_data: &self.coverage_data,
            hierarchy: &self.hierarchy,
            loader_id: source.loader_id,
            class_directory: source.class_directory(),
            compute_frames: self.selection.config().compute_frames,
        };
        CoverageModifier::new(context).modify(original.to_vec())
    }

    /// Remember where a modified class came from, unless a location inside it is already known
    fn register_modified_class(&self, source: &ClassSource) {
        let new_path = match &source.location {
            Some(location) => location,
            None => return,
        };

        let mut locations = self.unique_locations.lock();
        for i in (0..locations.len()).rev() {
            let previous_path = match &locations[i].location {
                Some(location) => location,
                None => continue,
            };
            if previous_path.starts_with(new_path) {
                return;
            }
            if new_path.starts_with(previous_path) {
                locations[i] = source.clone();
                return;
            }
        }
        locations.push(source.clone());
    }

    pub fn unique_locations(&self) -> Vec<ClassSource> {
        self.unique_locations.lock().clone()
    }
}
