use crate::coverage::data::{CoverageData, FileCoverageData};
use crate::coverage::modification::cache::{ClassKey, ModificationCache};
use crate::coverage::modification::method_modifier::MethodModifier;
use crate::jvm::code::{ClassHierarchy, MethodWriter};
use crate::jvm::{
    ByteVector, ClassAccessFlags, ClassReader, ClassWriter, Error, FieldAccessFlags,
    InnerClassAccessFlags, InnerClassInfo, MethodAccessFlags, MethodInfo,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Methods with at least this much code get 32 bit forward jumps, since probes can more than
/// quadruple the size of short lines
const WIDE_JUMPS_FROM_CODE_LENGTH: usize = 4096;

/// What a class is modified against: where results go, and where nested classes come from
#[derive(Clone, Copy)]
pub struct ModificationContext<'c> {
    pub cache: &'c ModificationCache,
    pub coverage_data: &'c CoverageData,
    pub hierarchy: &'c dyn ClassHierarchy,

    /// Class loader the class is being defined in
    pub loader_id: u64,

    /// Directory the class file was read from, where its nested classes can be found
    pub class_directory: Option<&'c Path>,

    /// Compute frames for every rewritten method, not just for versions that require them
    pub compute_frames: bool,
}

/// Kind of a top-level type, as recorded with its source file
fn kind_of_java_type(access_flags: ClassAccessFlags, super_class: Option<&str>) -> &'static str {
    if access_flags.contains(ClassAccessFlags::ANNOTATION) {
        "ant"
    } else if access_flags.contains(ClassAccessFlags::INTERFACE) {
        "itf"
    } else if access_flags.contains(ClassAccessFlags::ENUM) {
        "enm"
    } else if access_flags.contains(ClassAccessFlags::ABSTRACT) {
        "absCls"
    } else if super_class.map_or(false, |s| s.ends_with("Exception") || s.ends_with("Error")) {
        "exc"
    } else {
        "cls"
    }
}

/// Class rewriter adding coverage probes to every method with code
///
/// Nested classes found in the same class directory are instrumented along with their outer
/// class, sharing its source file, and their bytes are kept in the [`ModificationCache`] until
/// they get loaded themselves.
///
/// Classes that are not eligible for coverage (synthetic classes, annotations, classes without
/// a `.java` source file, test classes) fail with [`Error::VisitInterrupted`].
pub struct CoverageModifier<'c> {
    context: ModificationContext<'c>,
    internal_class_name: String,
    simple_class_name: String,
    source_file_name: String,
    file_data: Option<Arc<FileCoverageData>>,
    for_inner_class: bool,
    for_enum_class: bool,
    kind_of_top_level_type: Option<&'static str>,
}

impl<'c> CoverageModifier<'c> {
    pub fn new(context: ModificationContext<'c>) -> CoverageModifier<'c> {
        CoverageModifier {
            context,
            internal_class_name: String::new(),
            simple_class_name: String::new(),
            source_file_name: String::new(),
            file_data: None,
            for_inner_class: false,
            for_enum_class: false,
            kind_of_top_level_type: None,
        }
    }

    /// Modifier for a class nested in the one `outer` is modifying, recording into the same file
    fn for_inner_class(outer: &CoverageModifier<'c>, inner_name: &str) -> CoverageModifier<'c> {
        CoverageModifier {
            context: outer.context,
            internal_class_name: outer.internal_class_name.clone(),
            simple_class_name: inner_name.to_owned(),
            source_file_name: outer.source_file_name.clone(),
            file_data: outer.file_data.clone(),
            for_inner_class: true,
            for_enum_class: false,
            kind_of_top_level_type: outer.kind_of_top_level_type,
        }
    }

    /// Source file the class was compiled from, relative to the source root
    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    pub fn file_data(&self) -> Option<&Arc<FileCoverageData>> {
        self.file_data.as_ref()
    }

    /// Instrument a class file, returning the rewritten bytes
    pub fn modify(&mut self, bytes: Vec<u8>) -> Result<Vec<u8>, Error> {
        let reader = ClassReader::new(bytes)?;
        self.visit_class(&reader)?;
        self.visit_source(&reader)?;

        let mut writer = ClassWriter::new(&reader)?;
        for inner_class in &reader.inner_classes {
            self.visit_inner_class(inner_class);
        }
        if let Some(file_data) = &self.file_data {
            for field in &reader.fields {
                let skipped = field
                    .access_flags
                    .intersects(FieldAccessFlags::FINAL | FieldAccessFlags::SYNTHETIC);
                if !skipped {
                    let is_static = field.access_flags.contains(FieldAccessFlags::STATIC);
                    file_data
                        .data_coverage
                        .add_field(&self.simple_class_name, &field.name, is_static);
                }
            }
        }
        for method in &reader.methods {
            self.visit_method(&reader, &mut writer, method)?;
        }
        writer.to_bytes(&reader)
    }

    fn visit_class(&mut self, reader: &ClassReader) -> Result<(), Error> {
        if reader.access_flags.contains(ClassAccessFlags::SYNTHETIC) {
            return Err(Error::VisitInterrupted);
        }

        let name: &str = &reader.this_class;
        let nested_type = name.find('$').map_or(false, |p| p > 0);
        if !nested_type && self.kind_of_top_level_type.is_none() {
            self.kind_of_top_level_type = Some(kind_of_java_type(
                reader.access_flags,
                reader.super_class.as_deref(),
            ));
        }
        self.for_enum_class = reader.access_flags.contains(ClassAccessFlags::ENUM);

        if !self.for_inner_class {
            self.internal_class_name = name.to_owned();
            match name.rfind('/') {
                Some(p) => {
                    self.simple_class_name = name[p + 1..].to_owned();
                    self.source_file_name = name[..p + 1].to_owned();
                }
                None => {
                    self.simple_class_name = name.to_owned();
                    self.source_file_name = String::new();
                }
            }
        }
        Ok(())
    }

    fn visit_source(&mut self, reader: &ClassReader) -> Result<(), Error> {
        let source_file = match reader.source_file.as_deref() {
            Some(file) if file.ends_with(".java") => file,
            _ => return Err(Error::VisitInterrupted),
        };

        if !self.for_inner_class {
            if reader.access_flags.contains(ClassAccessFlags::ANNOTATION) {
                return Err(Error::VisitInterrupted);
            }
            self.source_file_name.push_str(source_file);
            self.file_data = Some(
                self.context
                    .coverage_data
                    .get_or_add_file(&self.source_file_name, self.kind_of_top_level_type),
            );
        }
        Ok(())
    }

    /// Whether the class named by an `InnerClasses` entry sits inside the class being modified
    fn is_nested_inside_class_being_modified(&self, inner_class: &InnerClassInfo) -> bool {
        let class_name: &str = inner_class
            .outer_class
            .as_deref()
            .unwrap_or(&inner_class.inner_class);
        let outer_class_name = match class_name.find('$') {
            Some(p) => &class_name[..p],
            None => class_name,
        };
        outer_class_name == self.internal_class_name
    }

    fn visit_inner_class(&self, inner_class: &InnerClassInfo) {
        let access_flags = InnerClassAccessFlags::from_bits_truncate(inner_class.access_flags);
        if self.for_inner_class
            || access_flags.is_synthetic_or_enum()
            || !self.is_nested_inside_class_being_modified(inner_class)
        {
            return;
        }

        let inner_class_name = inner_class.inner_class.replace('/', ".");
        let key = ClassKey::new(inner_class_name, self.context.loader_id);
        if self.context.cache.contains_nested(&key) {
            return;
        }

        let directory = match self.context.class_directory {
            Some(directory) => directory,
            None => return,
        };
        let path = directory.join(format!("{}.class", inner_class.inner_class));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("No class file for {} at {:?}: {}", key.name, path, err);
                return;
            }
        };

        let inner_name = inner_class.inner_name.as_deref().unwrap_or("");
        let mut inner_modifier = CoverageModifier::for_inner_class(self, inner_name);
        match inner_modifier.modify(bytes) {
            Ok(modified) => {
                log::debug!("Instrumented nested class {}", key.name);
                self.context.cache.insert_nested_if_absent(key, modified);
            }
            Err(Error::VisitInterrupted) => {
                log::debug!("Nested class {} is not eligible for coverage", key.name)
            }
            Err(err) => log::warn!("Failed to instrument nested class {}: {}", key.name, err),
        }
    }

    fn visit_method(
        &self,
        reader: &ClassReader,
        writer: &mut ClassWriter,
        method: &MethodInfo,
    ) -> Result<(), Error> {
        let file_data = match &self.file_data {
            Some(file_data) => file_data,
            None => return writer.copy_method(reader, method),
        };
        let is_enum_initializer = self.for_enum_class && &*method.header.name == "<clinit>";
        if method.header.access_flags.contains(MethodAccessFlags::SYNTHETIC)
            || is_enum_initializer
            || method.code.is_none()
        {
            return writer.copy_method(reader, method);
        }

        match self.modify_method(reader, writer, method, file_data) {
            Ok(method_info) => writer.add_method(&method_info),
            Err(err @ (Error::BranchOffsetOverflow(_) | Error::MethodCodeTooLarge(_))) => {
                log::warn!(
                    "Leaving {}.{}{} unmodified: {}",
                    reader.this_class,
                    method.header.name,
                    method.header.descriptor,
                    err
                );
                writer.copy_method(reader, method)?;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Rewrite a method with coverage probes, returning its `method_info`
    fn modify_method(
        &self,
        reader: &ClassReader,
        writer: &mut ClassWriter,
        method: &MethodInfo,
        file_data: &FileCoverageData,
    ) -> Result<ByteVector, Error> {
        let compute_frames = reader.version.requires_frames() || self.context.compute_frames;
        let mut method_writer = MethodWriter::new(
            writer.pool(),
            self.context.hierarchy,
            &reader.this_class,
            method.header.clone(),
            compute_frames,
        )?;
        if reader.code_length(method)? >= WIDE_JUMPS_FROM_CODE_LENGTH {
            method_writer = method_writer.with_wide_jumps();
        }
        for attribute in &method.other_attributes {
            let info = reader.bytes((attribute.offset, attribute.offset + attribute.length))?;
            method_writer.add_raw_attribute(attribute.name_index, info);
        }

        let mut modifier = MethodModifier::new(method_writer, &self.source_file_name, file_data);
        reader.accept_method(method, &mut modifier)?;
        modifier.finish()
    }
}
