use crate::coverage::config::CoverageConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Where the bytes of a class came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassSource {
    /// Class path entry (directory or jar) the class was found in, if it came from a file at all
    pub location: Option<PathBuf>,

    /// Identity of the class loader (or other namespace) the class is defined in
    pub loader_id: u64,
}

impl ClassSource {
    pub fn new(location: impl Into<PathBuf>, loader_id: u64) -> ClassSource {
        ClassSource {
            location: Some(location.into()),
            loader_id,
        }
    }

    /// Class generated in memory, with no location
    pub fn generated(loader_id: u64) -> ClassSource {
        ClassSource {
            location: None,
            loader_id,
        }
    }

    /// Directory holding class files, if the location is one
    pub fn class_directory(&self) -> Option<&Path> {
        self.location
            .as_deref()
            .filter(|location| !is_jar(location) && location.is_dir())
    }
}

fn is_jar(location: &Path) -> bool {
    location.extension().map_or(false, |ext| ext == "jar")
}

/// Libraries and test output are not measured unless classes are selected explicitly
fn is_from_external_library(location: &Path) -> bool {
    let path = location.to_string_lossy().replace('\\', "/");
    let path = path.trim_end_matches('/');
    is_jar(location) || path.ends_with("/.cp") || path.ends_with("/test-classes")
}

/// Classes of test frameworks (and of this tool's runtime) are never instrumented
fn is_ineligible_for_selection(class_name: &str) -> bool {
    const FRAMEWORK_PREFIXES: [&str; 6] = [
        "mockit.",
        "org.hamcrest.",
        "org.junit.",
        "junit.",
        "org.testng.",
        "org.apache.maven.surefire.",
    ];
    class_name.starts_with('[')
        || FRAMEWORK_PREFIXES
            .iter()
            .any(|prefix| class_name.starts_with(prefix))
        || is_externally_generated_subclass(class_name)
}

/// Subclasses generated by proxy libraries, like `Foo$$EnhancerByCGLIB$$12ab`
fn is_externally_generated_subclass(class_name: &str) -> bool {
    match class_name.find('$') {
        Some(p) if p > 0 && class_name[p + 1..].starts_with('$') => {
            class_name.contains("_$$_javassist_")
                || class_name.contains("_$$_jvst")
                || class_name.contains("CGLIB$$")
        }
        _ => false,
    }
}

/// Test classes are named `...Test`, or nested in one
fn is_test_class_name(class_name: &str) -> bool {
    class_name.match_indices("Test").any(|(p, _)| {
        let rest = &class_name[p + 4..];
        p > 0 && (rest.is_empty() || rest.len() > 1 && rest.starts_with('$'))
    })
}

/// Set of class name patterns, any one of which may match
///
/// Patterns are globs: `*` matches any run of characters, `?` any one character, and everything
/// else (including `.`) only itself. A pattern containing a backslash is a regular expression
/// instead, used as is.
#[derive(Debug, Clone)]
pub struct ClassPattern {
    regex: Regex,
}

impl ClassPattern {
    /// Parse comma-separated patterns, returning `None` if there are none
    ///
    /// Regular expressions that don't compile are logged and left out.
    pub fn parse(patterns: &str) -> Option<ClassPattern> {
        let alternatives: Vec<String> = patterns
            .split(',')
            .filter(|pattern| !pattern.is_empty())
            .filter_map(|pattern| {
                if !pattern.contains('\\') {
                    return Some(glob_to_regex(pattern));
                }
                match Regex::new(pattern) {
                    Ok(_) => Some(pattern.to_owned()),
                    Err(err) => {
                        log::warn!("Ignoring class pattern {:?}: {}", pattern, err);
                        None
                    }
                }
            })
            .map(|regex| format!("(?:{})", regex))
            .collect();
        if alternatives.is_empty() {
            return None;
        }

        let combined = format!("^(?:{})$", alternatives.join("|"));
        match Regex::new(&combined) {
            Ok(regex) => Some(ClassPattern { regex }),
            Err(err) => {
                log::warn!("Ignoring class patterns {:?}: {}", patterns, err);
                None
            }
        }
    }

    /// Whether the whole of the class name matches one of the patterns
    pub fn matches(&self, class_name: &str) -> bool {
        self.regex.is_match(class_name)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut expression = String::with_capacity(pattern.len() * 2);
    let mut buf = [0; 4];
    for c in pattern.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            c => expression.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    expression
}

#[derive(Debug)]
struct Selection {
    loaded_only: bool,
    include: Option<ClassPattern>,
    exclude: Option<ClassPattern>,
}

/// Decides which classes get instrumented for coverage
///
/// Class names are binary names with dots (`com.acme.Widget$Part`). The configuration is only
/// parsed the first time it is needed.
#[derive(Debug)]
pub struct ClassSelection {
    config: CoverageConfig,
    selection: OnceLock<Selection>,
}

impl ClassSelection {
    pub fn new(config: CoverageConfig) -> ClassSelection {
        ClassSelection {
            config,
            selection: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    fn selection(&self) -> &Selection {
        self.selection.get_or_init(|| {
            let classes = self.config.classes.as_deref().unwrap_or("");
            let loaded_only = self.config.is_loaded_only();
            let selection = Selection {
                loaded_only,
                include: if loaded_only {
                    None
                } else {
                    ClassPattern::parse(classes)
                },
                exclude: ClassPattern::parse(self.config.excludes.as_deref().unwrap_or("")),
            };
            log::debug!("Class selection: {:?}", selection);
            selection
        })
    }

    /// Only measure classes that get loaded, instead of also scanning for classes that never are
    pub fn loaded_only(&self) -> bool {
        self.selection().loaded_only
    }

    pub fn is_selected(&self, class_name: &str, source: &ClassSource) -> bool {
        if class_name.is_empty() || is_ineligible_for_selection(class_name) {
            return false;
        }
        let location = match &source.location {
            Some(location) => location,
            None => return false,
        };

        let selection = self.selection();
        let excluded = selection
            .exclude
            .as_ref()
            .map_or(false, |exclude| exclude.matches(class_name));
        if excluded || is_test_class_name(class_name) {
            return false;
        }

        match &selection.include {
            Some(include) => include.matches(class_name),
            None => !is_from_external_library(location),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn selection(classes: Option<&str>, excludes: Option<&str>) -> ClassSelection {
        ClassSelection::new(CoverageConfig {
            classes: classes.map(str::to_owned),
            excludes: excludes.map(str::to_owned),
            compute_frames: false,
        })
    }

    #[test]
    fn glob_patterns() {
        let pattern = ClassPattern::parse("com.acme.*,org.?oo.Bar").unwrap();
        assert!(pattern.matches("com.acme.Widget"));
        assert!(pattern.matches("com.acme.sub.Widget$1"));
        assert!(!pattern.matches("com.acmeX"));
        assert!(!pattern.matches("comXacme.Widget"));
        assert!(pattern.matches("org.foo.Bar"));
        assert!(pattern.matches("org.zoo.Bar"));
        assert!(!pattern.matches("org.foo.Bar2"));
    }

    #[test]
    fn escaped_patterns() {
        let pattern = ClassPattern::parse("com\\.acme\\..*Service").unwrap();
        assert!(pattern.matches("com.acme.UserService"));
        assert!(pattern.matches("com.acme.Service"));
        assert!(!pattern.matches("comXacme.UserService"));
        assert!(!pattern.matches("com.acme.UserServices"));
    }

    #[test]
    fn escaped_patterns_are_regular_expressions() {
        let alternation = ClassPattern::parse("com\\.acme\\.(Foo|Bar)").unwrap();
        assert!(alternation.matches("com.acme.Foo"));
        assert!(alternation.matches("com.acme.Bar"));
        assert!(!alternation.matches("com.acme.Baz"));

        let class = ClassPattern::parse("com\\.acme\\.[A-Z]\\w*").unwrap();
        assert!(class.matches("com.acme.Widget"));
        assert!(!class.matches("com.acme.widget"));
        assert!(!class.matches("com.acme.sub.Widget"));

        let repeated = ClassPattern::parse("com\\.acme\\..+Impl").unwrap();
        assert!(repeated.matches("com.acme.FooImpl"));
        assert!(!repeated.matches("com.acme.Impl"));

        let star = ClassPattern::parse("com\\.acme\\.Ab*").unwrap();
        assert!(star.matches("com.acme.Abbb"));
        assert!(star.matches("com.acme.A"));
        assert!(!star.matches("com.acme.AbXyz"));
    }

    #[test]
    fn globs_and_expressions_mix() {
        let pattern = ClassPattern::parse("org.acme.*,com\\.acme\\.Widget(\\$.*)?").unwrap();
        assert!(pattern.matches("org.acme.Anything"));
        assert!(pattern.matches("com.acme.Widget"));
        assert!(pattern.matches("com.acme.Widget$Part"));
        assert!(!pattern.matches("com.acme.Widgets"));

        let nested = ClassPattern::parse("com.acme.Widget$*").unwrap();
        assert!(nested.matches("com.acme.Widget$1"));
        assert!(!nested.matches("com.acme.Widget"));
    }

    #[test]
    fn invalid_expressions_are_left_out() {
        assert!(ClassPattern::parse("com\\.acme\\.(Foo").is_none());
        let pattern = ClassPattern::parse("com\\.acme\\.[,org.acme.*").unwrap();
        assert!(pattern.matches("org.acme.Thing"));
    }

    #[test]
    fn empty_patterns() {
        assert!(ClassPattern::parse("").is_none());
        assert!(ClassPattern::parse(",,").is_none());
    }

    #[test]
    fn test_classes() {
        assert!(is_test_class_name("com.acme.WidgetTest"));
        assert!(is_test_class_name("com.acme.WidgetTest$Nested"));
        assert!(!is_test_class_name("Test"));
        assert!(!is_test_class_name("com.acme.WidgetTest$"));
        assert!(!is_test_class_name("com.acme.Testing"));
        assert!(is_test_class_name("com.TestSupport$TestHelperTest"));
    }

    #[test]
    fn generated_subclasses() {
        assert!(is_externally_generated_subclass(
            "com.acme.Widget$$EnhancerByCGLIB$$1a2b"
        ));
        assert!(!is_externally_generated_subclass("com.acme.Widget$Inner"));
    }

    #[test]
    fn default_selection_skips_libraries() {
        let selection = selection(None, None);
        let classes = ClassSource::new("/work/target/classes", 0);
        let jar = ClassSource::new("/repo/lib/dep.jar", 0);
        let tests = ClassSource::new("/work/target/test-classes/", 0);

        assert!(selection.is_selected("com.acme.Widget", &classes));
        assert!(!selection.is_selected("com.acme.Widget", &jar));
        assert!(!selection.is_selected("com.acme.Widget", &tests));
        assert!(!selection.is_selected("com.acme.WidgetTest", &classes));
        assert!(!selection.is_selected("org.junit.Assert", &classes));
        assert!(!selection.is_selected("com.acme.Widget", &ClassSource::generated(0)));
        assert!(!selection.loaded_only());
    }

    #[test]
    fn explicit_selection_includes_jars() {
        let selection = selection(Some("com.acme.*"), Some("com.acme.gen.*"));
        let jar = ClassSource::new("/repo/lib/acme.jar", 0);
        assert!(selection.is_selected("com.acme.Widget", &jar));
        assert!(!selection.is_selected("com.acme.gen.Stub", &jar));
        assert!(!selection.is_selected("org.other.Thing", &jar));
    }

    #[test]
    fn loaded_only_selection() {
        let selection = selection(Some("loaded"), None);
        assert!(selection.loaded_only());
        let classes = ClassSource::new("/work/classes", 0);
        assert!(selection.is_selected("com.acme.Widget", &classes));
    }
}
