use crate::jvm::class_file::{ConstantPool, MAGIC};
use crate::jvm::{ByteVector, ClassReader, Error, MethodInfo};

/// Writer for a transformed version of a class that was read with [`ClassReader`]
///
/// The constant pool starts out as a copy of the original pool, so the class header, fields,
/// untouched methods, and class attributes are all copied as is. Rewritten methods add whatever
/// constants they need to the end of the pool. The `BootstrapMethods` attribute is regenerated
/// from the pool, since rewritten methods may have added call sites.
#[derive(Debug)]
pub struct ClassWriter {
    pool: ConstantPool,
    method_count: u16,
    methods: ByteVector,
}

impl ClassWriter {
    pub fn new(reader: &ClassReader) -> Result<ClassWriter, Error> {
        Ok(ClassWriter {
            pool: ConstantPool::copy_from(reader.bytecode())?,
            method_count: 0,
            methods: ByteVector::with_capacity(1024),
        })
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub fn method_count(&self) -> u16 {
        self.method_count
    }

    /// Copy a method over from the original class, without decoding it
    pub fn copy_method(&mut self, reader: &ClassReader, method: &MethodInfo) -> Result<(), Error> {
        self.methods.put_byte_array(reader.bytes(method.range)?);
        self.method_count += 1;
        Ok(())
    }

    /// Add a method serialized by a [`crate::jvm::code::MethodWriter`]
    pub fn add_method(&mut self, method_info: &ByteVector) {
        self.methods.put_byte_vector(method_info);
        self.method_count += 1;
    }

    pub fn to_bytes(mut self, reader: &ClassReader) -> Result<Vec<u8>, Error> {
        let bootstrap_methods_name = if self.pool.has_bootstrap_methods() {
            Some(self.pool.new_utf8("BootstrapMethods")?)
        } else {
            None
        };

        let mut out = ByteVector::with_capacity(reader.bytecode().code().len() + 256);
        out.put_int(MAGIC as i32)
            .put_short(reader.version.minor_version)
            .put_short(reader.version.major_version);
        self.pool.put(&mut out);
        out.put_byte_array(reader.bytes(reader.header_range)?)
            .put_byte_array(reader.bytes(reader.fields_range)?)
            .put_short(self.method_count)
            .put_byte_vector(&self.methods);

        let attribute_count = reader.attributes.len() + bootstrap_methods_name.is_some() as usize;
        out.put_short(attribute_count as u16);
        for attribute in &reader.attributes {
            out.put_short(attribute.name_index)
                .put_int(attribute.length as i32)
                .put_byte_array(
                    reader.bytes((attribute.offset, attribute.offset + attribute.length))?,
                );
        }
        if let Some(name_index) = bootstrap_methods_name {
            self.pool.put_bootstrap_methods(name_index, &mut out);
        }

        Ok(out.into_inner())
    }
}
