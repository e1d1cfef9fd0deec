use bytecov::coverage::modification::{ClassModification, ClassSource, ClassesNotLoaded, ModificationCache};
use bytecov::coverage::{CoverageConfig, CoverageData};
use bytecov::jvm::{self, ClassPathHierarchy, ClassReader};

use clap::{command, Arg, ArgAction, ArgMatches, Command};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use walkdir::WalkDir;

fn selection_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("classes")
                .long("classes")
                .value_name("GLOBS")
                .help("Comma-separated globs of classes to instrument, or `loaded`"),
        )
        .arg(
            Arg::new("excludes")
                .long("excludes")
                .value_name("GLOBS")
                .help("Comma-separated globs of classes to leave alone"),
        )
        .arg(
            Arg::new("compute frames")
                .long("compute-frames")
                .action(ArgAction::SetTrue)
                .help("Compute stack map frames even for class versions that don't need them"),
        )
        .arg(
            Arg::new("class path")
                .long("class-path")
                .value_name("PATH")
                .help("Directories and jars holding the super classes of instrumented classes"),
        )
}

/// Super classes are looked up in the JDK, then in the `--class-path` entries
fn hierarchy_from(matches: &ArgMatches) -> ClassPathHierarchy {
    let hierarchy = ClassPathHierarchy::with_jdk();
    if let Some(class_path) = matches.get_one::<String>("class path") {
        for location in std::env::split_paths(class_path) {
            hierarchy.add_location(&location);
        }
    }
    hierarchy
}

fn main() -> Result<(), jvm::Error> {
    env_logger::init();

    let matches = command!()
        .about("Instruments JVM class files for line, branch, and field coverage")
        .subcommand_required(true)
        .subcommand(
            selection_args(Command::new("instrument"))
                .about("Instrument class files, writing them under an output directory")
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_name("DIRECTORY")
                        .default_value("out")
                        .help("Sets the output directory"),
                )
                .arg(
                    Arg::new("INPUT")
                        .help("Class files, or directories of class files")
                        .required(true)
                        .num_args(1..),
                ),
        )
        .subcommand(
            selection_args(Command::new("scan"))
                .about("Instrument the selected classes of a class directory, and list their lines")
                .arg(
                    Arg::new("DIRECTORY")
                        .help("Root of a class directory")
                        .required(true),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("instrument", sub_matches)) => instrument(sub_matches),
        Some(("scan", sub_matches)) => scan(sub_matches),
        _ => Ok(()),
    }
}

fn config_from(matches: &ArgMatches) -> CoverageConfig {
    CoverageConfig::from_env().overridden_by(CoverageConfig {
        classes: matches.get_one::<String>("classes").cloned(),
        excludes: matches.get_one::<String>("excludes").cloned(),
        compute_frames: matches.get_flag("compute frames"),
    })
}

/// Class file found under an input, along with the class path entry it belongs to
struct ClassFile {
    root: PathBuf,
    path: PathBuf,
    bytes: Vec<u8>,
    internal_name: String,
}

fn find_class_files(input: &Path) -> Vec<(PathBuf, PathBuf)> {
    if input.is_file() {
        let root = input.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        return vec![(root, input.to_path_buf())];
    }
    WalkDir::new(input)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|e| e.is_file() && e.extension().map_or(false, |ex| ex == "class"))
        .map(|path| (input.to_path_buf(), path))
        .collect()
}

fn instrument(matches: &ArgMatches) -> Result<(), jvm::Error> {
    let config = config_from(matches);
    log::debug!("Coverage configuration: {:?}", config);
    let output_path: PathBuf = matches
        .get_one::<String>("output")
        .map_or_else(|| PathBuf::from("out"), PathBuf::from);

    // Read everything first, so that frames can be computed knowing all super classes
    let mut class_files = vec![];
    let hierarchy = hierarchy_from(matches);
    for input in matches.get_many::<String>("INPUT").into_iter().flatten() {
        for (root, path) in find_class_files(Path::new(input)) {
            log::info!("Reading '{}'", path.display());
            let bytes = fs::read(&path)?;
            let reader = ClassReader::new(bytes.clone())?;
            hierarchy.insert(
                &reader.this_class,
                reader.super_class.as_deref(),
                reader.is_interface(),
            );
            class_files.push(ClassFile {
                root,
                path,
                bytes,
                internal_name: reader.this_class.to_string(),
            });
        }
    }

    let modification = ClassModification::new(
        config,
        Arc::new(ModificationCache::new()),
        Arc::new(CoverageData::new()),
    )
    .with_hierarchy(hierarchy);

    let stdout = StandardStream::stdout(ColorChoice::Auto);
    let mut instrumented = 0;
    for class_file in &class_files {
        let class_name = class_file.internal_name.replace('/', ".");
        let source = ClassSource::new(&class_file.root, 0);
        let modified = modification.modify_class(&class_name, &source, &class_file.bytes);

        let output_file = output_path.join(format!("{}.class", class_file.internal_name));
        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent)?;
        }
        log::info!("Writing '{}'", output_file.display());
        let (color, summary) = match &modified {
            Some(bytes) => {
                instrumented += 1;
                fs::write(&output_file, bytes)?;
                (Some(Color::Green), b"INSTRUMENTED".as_ref())
            }
            None => {
                fs::write(&output_file, &class_file.bytes)?;
                (None, b"COPIED".as_ref())
            }
        };
        log::debug!("{} came from {:?}", class_name, class_file.path);
        print_outcome(&stdout, &class_name, color, summary)?;
    }

    log::info!(
        "Instrumented {} of {} classes, over {} source files",
        instrumented,
        class_files.len(),
        modification.coverage_data().files().len()
    );
    Ok(())
}

fn scan(matches: &ArgMatches) -> Result<(), jvm::Error> {
    let config = config_from(matches);
    let directory: PathBuf = matches
        .get_one::<String>("DIRECTORY")
        .map_or_else(PathBuf::new, PathBuf::from);

    let modification = ClassModification::new(
        config,
        Arc::new(ModificationCache::new()),
        Arc::new(CoverageData::new()),
    )
    .with_hierarchy(hierarchy_from(matches));
    let source = ClassSource::new(&directory, 0);
    let gathered = ClassesNotLoaded::new(&modification).scan_directory(&directory, &source);

    let stdout = StandardStream::stdout(ColorChoice::Auto);
    for class_name in &gathered {
        print_outcome(&stdout, class_name, Some(Color::Green), b"INSTRUMENTED")?;
    }

    let mut s = stdout.lock();
    for (file, data) in modification.coverage_data().files() {
        writeln!(
            s,
            "{}: {} executable lines, {} fields",
            file,
            data.line_coverage.executable_line_count(),
            data.data_coverage.all_fields().len()
        )?;
    }
    Ok(())
}

fn print_outcome(
    stdout: &StandardStream,
    class_name: &str,
    color: Option<Color>,
    summary: &[u8],
) -> io::Result<()> {
    let mut s = stdout.lock();
    s.write_all(b" - ")?;
    s.set_color(ColorSpec::new().set_bold(true))?;
    s.write_all(class_name.as_bytes())?;
    s.set_color(ColorSpec::new().set_dimmed(true))?;
    s.write_all(b" [")?;
    match color {
        Some(color) => s.set_color(ColorSpec::new().set_fg(Some(color)))?,
        None => s.set_color(ColorSpec::new().set_dimmed(true))?,
    }
    s.write_all(summary)?;
    s.set_color(ColorSpec::new().set_dimmed(true))?;
    s.write_all(b"]\n")?;
    s.reset()
}
