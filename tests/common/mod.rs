//! Hand assembly of class files, for feeding known bytes through the reader and the instrumentation

#![allow(dead_code)]

pub mod verifier;

use bytecov::jvm::class_file::MAGIC;
use bytecov::jvm::ByteVector;
use std::collections::HashMap;

pub const ILOAD_1: u8 = 0x1B;
pub const ALOAD_0: u8 = 0x2A;
pub const ALOAD_1: u8 = 0x2B;

/// Big-endian bytes of a constant pool index or offset
pub fn u2(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Body of a `Code` attribute
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,

    /// `(start_pc, line)` entries of the `LineNumberTable`
    pub lines: Vec<(u16, u16)>,
}

struct InnerClass {
    inner_class: u16,
    outer_class: u16,
    inner_name: u16,
    access_flags: u16,
}

pub struct ClassAssembler {
    major_version: u16,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    pool: ByteVector,
    pool_count: u16,
    entries: HashMap<(u8, String), u16>,
    fields: ByteVector,
    field_count: u16,
    methods: ByteVector,
    method_count: u16,
    source_file: Option<u16>,
    inner_classes: Vec<InnerClass>,
}

impl ClassAssembler {
    pub fn new(name: &str, super_name: &str, access_flags: u16, major_version: u16) -> Self {
        let mut class = ClassAssembler {
            major_version,
            access_flags,
            this_class: 0,
            super_class: 0,
            pool: ByteVector::new(),
            pool_count: 1,
            entries: HashMap::new(),
            fields: ByteVector::new(),
            field_count: 0,
            methods: ByteVector::new(),
            method_count: 0,
            source_file: None,
            inner_classes: vec![],
        };
        class.this_class = class.class(name);
        class.super_class = class.class(super_name);
        class
    }

    fn entry(&mut self, tag: u8, key: String, body: &[u8]) -> u16 {
        if let Some(&index) = self.entries.get(&(tag, key.clone())) {
            return index;
        }
        let index = self.pool_count;
        self.pool.put_byte(tag).put_byte_array(body);
        self.pool_count += 1;
        self.entries.insert((tag, key), index);
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        let mut body = ByteVector::new();
        body.put_utf8(value).unwrap();
        self.entry(1, value.to_owned(), body.data())
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.entry(7, name.to_owned(), &u2(name_index))
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value_index = self.utf8(value);
        self.entry(8, value.to_owned(), &u2(value_index))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut body = u2(name_index).to_vec();
        body.extend_from_slice(&u2(descriptor_index));
        self.entry(12, format!("{}:{}", name, descriptor), &body)
    }

    fn member_ref(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        let mut body = u2(class_index).to_vec();
        body.extend_from_slice(&u2(name_and_type));
        self.entry(tag, format!("{}.{}:{}", owner, name, descriptor), &body)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(9, owner, name, descriptor)
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(10, owner, name, descriptor)
    }

    pub fn field(&mut self, access_flags: u16, name: &str, descriptor: &str) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields
            .put_short(access_flags)
            .put_short(name_index)
            .put_short(descriptor_index)
            .put_short(0);
        self.field_count += 1;
    }

    /// Add a method, with runtime-visible annotations of the given types (without elements)
    pub fn method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Option<Code>,
        annotations: &[&str],
    ) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let attribute_count = code.is_some() as u16 + !annotations.is_empty() as u16;
        let mut method = ByteVector::new();
        method
            .put_short(access_flags)
            .put_short(name_index)
            .put_short(descriptor_index)
            .put_short(attribute_count);

        if let Some(code) = code {
            let code_name = self.utf8("Code");
            let line_table_name = self.utf8("LineNumberTable");
            let line_table_length = if code.lines.is_empty() {
                0
            } else {
                6 + 2 + 4 * code.lines.len()
            };
            let length = 2 + 2 + 4 + code.code.len() + 2 + 2 + line_table_length;
            method
                .put_short(code_name)
                .put_int(length as i32)
                .put_short(code.max_stack)
                .put_short(code.max_locals)
                .put_int(code.code.len() as i32)
                .put_byte_array(&code.code)
                .put_short(0)
                .put_short(!code.lines.is_empty() as u16);
            if !code.lines.is_empty() {
                method
                    .put_short(line_table_name)
                    .put_int((2 + 4 * code.lines.len()) as i32)
                    .put_short(code.lines.len() as u16);
                for (start, line) in &code.lines {
                    method.put_short(*start).put_short(*line);
                }
            }
        }

        if !annotations.is_empty() {
            let attribute_name = self.utf8("RuntimeVisibleAnnotations");
            method
                .put_short(attribute_name)
                .put_int((2 + 4 * annotations.len()) as i32)
                .put_short(annotations.len() as u16);
            for annotation in annotations {
                let type_index = self.utf8(annotation);
                method.put_short(type_index).put_short(0);
            }
        }

        self.methods.put_byte_vector(&method);
        self.method_count += 1;
    }

    pub fn source_file(&mut self, file: &str) {
        self.utf8("SourceFile");
        self.source_file = Some(self.utf8(file));
    }

    pub fn inner_class(
        &mut self,
        inner_class: &str,
        outer_class: Option<&str>,
        inner_name: Option<&str>,
        access_flags: u16,
    ) {
        self.utf8("InnerClasses");
        let inner_class = self.class(inner_class);
        let outer_class = outer_class.map_or(0, |outer| self.class(outer));
        let inner_name = inner_name.map_or(0, |name| self.utf8(name));
        self.inner_classes.push(InnerClass {
            inner_class,
            outer_class,
            inner_name,
            access_flags,
        });
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = ByteVector::new();
        out.put_int(MAGIC as i32)
            .put_short(0)
            .put_short(self.major_version)
            .put_short(self.pool_count)
            .put_byte_vector(&self.pool)
            .put_short(self.access_flags)
            .put_short(self.this_class)
            .put_short(self.super_class)
            .put_short(0)
            .put_short(self.field_count)
            .put_byte_vector(&self.fields)
            .put_short(self.method_count)
            .put_byte_vector(&self.methods);

        let attribute_count =
            self.source_file.is_some() as u16 + !self.inner_classes.is_empty() as u16;
        out.put_short(attribute_count);
        if let Some(source_file) = self.source_file {
            let name = self.entries[&(1, "SourceFile".to_owned())];
            out.put_short(name).put_int(2).put_short(source_file);
        }
        if !self.inner_classes.is_empty() {
            let name = self.entries[&(1, "InnerClasses".to_owned())];
            out.put_short(name)
                .put_int((2 + 8 * self.inner_classes.len()) as i32)
                .put_short(self.inner_classes.len() as u16);
            for inner in &self.inner_classes {
                out.put_short(inner.inner_class)
                    .put_short(inner.outer_class)
                    .put_short(inner.inner_name)
                    .put_short(inner.access_flags);
            }
        }
        out.into_inner()
    }
}
