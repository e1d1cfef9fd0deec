use crate::coverage::modification::class_modification::ClassModification;
use crate::coverage::modification::class_selection::ClassSource;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Finds the classes that should be measured too, but never got loaded
///
/// Such classes are still instrumented, so that their lines show up in the coverage data as never
/// executed instead of being missing altogether.
pub struct ClassesNotLoaded<'m> {
    modification: &'m ClassModification,
}

impl<'m> ClassesNotLoaded<'m> {
    pub fn new(modification: &'m ClassModification) -> ClassesNotLoaded<'m> {
        ClassesNotLoaded { modification }
    }

    /// Instrument the unloaded classes found in the directories classes were loaded from
    ///
    /// Returns the names of the classes instrumented.
    pub fn gather_coverage_data(&self) -> Vec<String> {
        if !self.modification.should_consider_classes_not_loaded() {
            return vec![];
        }

        let mut gathered = vec![];
        for source in self.modification.unique_locations() {
            if let Some(directory) = source.class_directory() {
                gathered.extend(self.scan_directory(directory, &source));
            }
        }
        gathered
    }

    /// Instrument the classes under a class directory that are selected but not yet modified
    pub fn scan_directory(&self, directory: &Path, source: &ClassSource) -> Vec<String> {
        let mut gathered = vec![];
        let class_files = WalkDir::new(directory)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in class_files {
            let class_name = match class_name_of(directory, entry.path()) {
                Some(class_name) => class_name,
                None => continue,
            };
            if !self
                .modification
                .is_to_be_considered_for_coverage(&class_name, source)
            {
                continue;
            }

            match fs::read(entry.path()) {
                Ok(bytes) => {
                    if self
                        .modification
                        .modify_class(&class_name, source, &bytes)
                        .is_some()
                    {
                        gathered.push(class_name);
                    }
                }
                Err(err) => log::warn!("Failed to read {:?}: {}", entry.path(), err),
            }
        }
        gathered
    }
}

/// Binary name of the class in a class file, from its path relative to the class directory
fn class_name_of(directory: &Path, class_file: &Path) -> Option<String> {
    let relative = class_file.strip_prefix(directory).ok()?;
    let relative = relative.to_str()?.strip_suffix(".class")?;
    if relative.is_empty() {
        return None;
    }
    Some(relative.replace(['/', '\\'], "."))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn class_names_from_paths() {
        let root = Path::new("/work/classes");
        assert_eq!(
            class_name_of(root, Path::new("/work/classes/com/acme/Widget.class")).as_deref(),
            Some("com.acme.Widget")
        );
        assert_eq!(
            class_name_of(root, Path::new("/work/classes/Top$1.class")).as_deref(),
            Some("Top$1")
        );
        assert_eq!(class_name_of(root, Path::new("/work/classes/notes.txt")), None);
        assert_eq!(class_name_of(root, Path::new("/elsewhere/A.class")), None);
    }
}
