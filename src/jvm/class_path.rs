use crate::jvm::class_file::BytecodeReader;
use crate::jvm::code::{ClassHierarchy, ClassInfo};
use crate::jvm::{ClassAccessFlags, Error};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Header in front of the zip content of a `.jmod` file
const JMOD_HEADER: [u8; 4] = *b"JM\x01\x00";

/// Read the super class of a class, and whether it is an interface, from its class file
pub fn read_class_info(bytes: Vec<u8>) -> Result<ClassInfo, Error> {
    let mut reader = BytecodeReader::new(bytes)?;
    reader.code_index = reader.header();
    let access_flags = ClassAccessFlags::from_bits_truncate(reader.read_u16()?);
    let _this_class = reader.read_class()?;
    let super_class = reader.read_class()?;
    Ok(ClassInfo {
        super_class: super_class.map(|name| name.to_string()),
        is_interface: access_flags.contains(ClassAccessFlags::INTERFACE),
    })
}

/// Home directory of the JDK, from `JAVA_HOME` or else from the `java` found on the `PATH`
pub fn java_home() -> Option<PathBuf> {
    if let Some(home) = env::var_os("JAVA_HOME").filter(|home| !home.is_empty()) {
        return Some(PathBuf::from(home));
    }
    let executable = if cfg!(windows) { "java.exe" } else { "java" };
    let path = env::var_os("PATH")?;
    let java = env::split_paths(&path)
        .map(|dir| dir.join(executable))
        .find(|java| java.is_file())?;
    let java = fs::canonicalize(java).ok()?;
    java.parent()?.parent().map(Path::to_path_buf)
}

/// Files holding the classes of the Java class library: `rt.jar` up to Java 8, module files after
///
/// `java.base` comes first, since it holds the classes asked about most.
pub fn jdk_class_library(java_home: &Path) -> Vec<PathBuf> {
    for rt in [java_home.join("jre/lib/rt.jar"), java_home.join("lib/rt.jar")] {
        if rt.is_file() {
            return vec![rt];
        }
    }

    let mut modules: Vec<PathBuf> = match fs::read_dir(java_home.join("jmods")) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension() == Some(OsStr::new("jmod")))
            .collect(),
        Err(_) => vec![],
    };
    modules.sort_by_key(|module| (module.file_stem() != Some(OsStr::new("java.base")), module.clone()));
    modules
}

/// Zip content of a `.jmod` file, with positions shifted past the header
struct JmodContent {
    file: File,
}

impl Read for JmodContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for JmodContent {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let header_len = JMOD_HEADER.len() as u64;
        let pos = match pos {
            SeekFrom::Start(offset) => SeekFrom::Start(offset + header_len),
            other => other,
        };
        let absolute = self.file.seek(pos)?;
        absolute.checked_sub(header_len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek into the jmod header")
        })
    }
}

enum Archive {
    Jar(ZipArchive<File>),
    Jmod(ZipArchive<JmodContent>),
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes).ok()?;
    Some(bytes)
}

enum Entry {
    Directory(PathBuf),

    /// Jar or module file, opened the first time a class is looked up in it
    Archive {
        path: PathBuf,
        is_jmod: bool,
        archive: Option<Archive>,
        unreadable: bool,
    },
}

impl Entry {
    fn path(&self) -> &Path {
        match self {
            Entry::Directory(path) => path,
            Entry::Archive { path, .. } => path,
        }
    }

    fn find_class(&mut self, internal_name: &str) -> Option<Vec<u8>> {
        match self {
            Entry::Directory(path) => fs::read(path.join(format!("{}.class", internal_name))).ok(),
            Entry::Archive {
                path,
                is_jmod,
                archive,
                unreadable,
            } => {
                if archive.is_none() && !*unreadable {
                    *archive = open_archive(path, *is_jmod);
                    *unreadable = archive.is_none();
                }
                match archive.as_mut()? {
                    Archive::Jar(jar) => read_entry(jar, &format!("{}.class", internal_name)),
                    Archive::Jmod(jmod) => {
                        read_entry(jmod, &format!("classes/{}.class", internal_name))
                    }
                }
            }
        }
    }
}

fn open_archive(path: &Path, is_jmod: bool) -> Option<Archive> {
    let opened = File::open(path).map_err(|err| err.to_string()).and_then(|mut file| {
        if is_jmod {
            let mut header = [0; 4];
            file.read_exact(&mut header).map_err(|err| err.to_string())?;
            if header != JMOD_HEADER {
                return Err(String::from("not a jmod file"));
            }
            ZipArchive::new(JmodContent { file })
                .map(Archive::Jmod)
                .map_err(|err| err.to_string())
        } else {
            ZipArchive::new(file)
                .map(Archive::Jar)
                .map_err(|err| err.to_string())
        }
    });
    match opened {
        Ok(archive) => Some(archive),
        Err(err) => {
            log::warn!("Failed to open {:?}: {}", path, err);
            None
        }
    }
}

/// Ordered locations where class files are looked up: directories, jars, and JDK module files
#[derive(Default)]
pub struct ClassPath {
    entries: Vec<Entry>,
}

impl ClassPath {
    pub fn new() -> ClassPath {
        ClassPath::default()
    }

    /// Add the class library of the JDK found in the environment, if there is one
    pub fn with_jdk(mut self) -> ClassPath {
        let library = java_home()
            .map(|home| jdk_class_library(&home))
            .unwrap_or_default();
        if library.is_empty() {
            log::debug!("No JDK class library found, JDK classes merge into java/lang/Object");
        }
        for location in library {
            self.add(&location);
        }
        self
    }

    /// Add a class directory, `.jar`, or `.jmod`, returning whether it wasn't there already
    pub fn add(&mut self, location: &Path) -> bool {
        if self.entries.iter().any(|entry| entry.path() == location) {
            return false;
        }
        let extension = location.extension().and_then(OsStr::to_str);
        let entry = match extension {
            Some("jar") | Some("zip") | Some("jmod") => Entry::Archive {
                path: location.to_path_buf(),
                is_jmod: extension == Some("jmod"),
                archive: None,
                unreadable: false,
            },
            _ if location.is_dir() => Entry::Directory(location.to_path_buf()),
            _ => return false,
        };
        self.entries.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes of the first class file found for a class, by internal name
    pub fn find_class(&mut self, internal_name: &str) -> Option<Vec<u8>> {
        self.entries
            .iter_mut()
            .find_map(|entry| entry.find_class(internal_name))
    }
}

impl fmt::Debug for ClassPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(Entry::path))
            .finish()
    }
}

/// Class hierarchy read from class files on a class path, as needed
///
/// What was read is remembered, including classes that couldn't be found. Classes can also be
/// registered up front, which takes precedence over the class path.
#[derive(Debug, Default)]
pub struct ClassPathHierarchy {
    known: Mutex<HashMap<String, Option<ClassInfo>>>,
    class_path: Mutex<ClassPath>,
}

impl ClassPathHierarchy {
    pub fn new(class_path: ClassPath) -> ClassPathHierarchy {
        ClassPathHierarchy {
            known: Mutex::new(HashMap::new()),
            class_path: Mutex::new(class_path),
        }
    }

    /// Hierarchy over the JDK class library found in the environment
    pub fn with_jdk() -> ClassPathHierarchy {
        ClassPathHierarchy::new(ClassPath::new().with_jdk())
    }

    pub fn insert(&self, name: &str, super_name: Option<&str>, is_interface: bool) {
        let info = ClassInfo {
            super_class: super_name.map(str::to_owned),
            is_interface,
        };
        self.known.lock().insert(name.to_owned(), Some(info));
    }

    /// Look classes up in one more location, retrying those that couldn't be found so far
    pub fn add_location(&self, location: &Path) {
        if self.class_path.lock().add(location) {
            log::debug!("Looking up super classes in {:?}", location);
            self.known.lock().retain(|_, info| info.is_some());
        }
    }

    pub fn class_path_len(&self) -> usize {
        self.class_path.lock().len()
    }
}

impl ClassHierarchy for ClassPathHierarchy {
    fn class_info(&self, name: &str) -> Option<ClassInfo> {
        if let Some(info) = self.known.lock().get(name) {
            return info.clone();
        }

        let bytes = self.class_path.lock().find_class(name);
        let info = match bytes.map(read_class_info) {
            Some(Ok(info)) => Some(info),
            Some(Err(err)) => {
                log::debug!("Unreadable class file for {}: {}", name, err);
                None
            }
            None => {
                log::debug!("Class {} is not on the class path", name);
                None
            }
        };
        self.known.lock().insert(name.to_owned(), info.clone());
        info
    }
}
