use crate::jvm::class_file::constants::*;
use crate::jvm::class_file::BytecodeReader;
use crate::jvm::{ByteVector, Error};
use std::collections::HashMap;

/// Class file constants pool builder
///
/// The pool is append only. Every `new_*` method returns the index of an existing equal entry if
/// there is one, or appends a new entry. When a class is being rewritten, the pool starts out as a
/// verbatim copy of the original one so that every index used by untouched parts of the class
/// stays valid.
#[derive(Debug)]
pub struct ConstantPool {
    /// Serialized entries (without the leading count)
    entries: ByteVector,

    /// Index that the next entry will get
    next_index: u16,

    index: HashMap<Constant, u16>,

    /// Serialized `BootstrapMethods` entries (without the leading count)
    bootstrap_methods: ByteVector,
    bootstrap_method_count: u16,
    bootstrap_index: HashMap<(u16, Vec<u16>), u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: ByteVector::with_capacity(256),
            next_index: 1,
            index: HashMap::new(),
            bootstrap_methods: ByteVector::new(),
            bootstrap_method_count: 0,
            bootstrap_index: HashMap::new(),
        }
    }

    /// Make a pool whose entries start out identical to those of an existing class file
    pub fn copy_from(reader: &BytecodeReader) -> Result<ConstantPool, Error> {
        let mut pool = ConstantPool::new();
        let (start, end) = reader.constant_pool_range();
        pool.entries.put_byte_array(reader.bytes(start, end - start)?);
        pool.next_index = reader.item_count();

        let mut item_index = 1;
        while item_index < reader.item_count() {
            let constant = reader.read_constant(item_index)?;
            let width = constant.width();
            pool.index.entry(constant).or_insert(item_index);
            item_index += width;
        }

        if let Some(methods) = reader.bootstrap_methods() {
            for (method_ref, arguments, raw) in methods {
                pool.bootstrap_methods.put_byte_array(raw);
                pool.bootstrap_index
                    .entry((method_ref, arguments))
                    .or_insert(pool.bootstrap_method_count);
                pool.bootstrap_method_count += 1;
            }
        }

        Ok(pool)
    }

    /// Number of slots in the pool, as written in the class file header
    pub fn count(&self) -> u16 {
        self.next_index
    }

    pub fn has_bootstrap_methods(&self) -> bool {
        self.bootstrap_method_count > 0
    }

    /// Push a constant into the constant pool, provided there is space for it
    fn push_constant(&mut self, constant: Constant) -> Result<u16, Error> {
        if let Some(index) = self.index.get(&constant) {
            return Ok(*index);
        }

        // The largest valid index is 65535, and some constants take two spaces
        let index = self.next_index;
        let next_index = index
            .checked_add(constant.width())
            .ok_or(Error::ConstantPoolOverflow)?;

        constant.put(&mut self.entries)?;
        self.next_index = next_index;
        self.index.insert(constant, index);
        Ok(index)
    }

    pub fn new_utf8(&mut self, string: &str) -> Result<u16, Error> {
        let key = Constant::Utf8(string.to_owned());
        self.push_constant(key)
    }

    /// Class constant, from an internal name or an array descriptor
    pub fn new_class(&mut self, internal_name: &str) -> Result<u16, Error> {
        let name = self.new_utf8(internal_name)?;
        self.push_constant(Constant::Class(name))
    }

    pub fn new_string(&mut self, string: &str) -> Result<u16, Error> {
        let utf8 = self.new_utf8(string)?;
        self.push_constant(Constant::String(utf8))
    }

    pub fn new_integer(&mut self, value: i32) -> Result<u16, Error> {
        self.push_constant(Constant::Integer(value))
    }

    pub fn new_float(&mut self, value: f32) -> Result<u16, Error> {
        self.push_constant(Constant::Float(value.to_bits()))
    }

    pub fn new_long(&mut self, value: i64) -> Result<u16, Error> {
        self.push_constant(Constant::Long(value))
    }

    pub fn new_double(&mut self, value: f64) -> Result<u16, Error> {
        self.push_constant(Constant::Double(value.to_bits()))
    }

    pub fn new_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, Error> {
        let name = self.new_utf8(name)?;
        let descriptor = self.new_utf8(descriptor)?;
        self.push_constant(Constant::NameAndType(name, descriptor))
    }

    pub fn new_field(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, Error> {
        let class = self.new_class(owner)?;
        let name_and_type = self.new_name_and_type(name, descriptor)?;
        self.push_constant(Constant::FieldRef(class, name_and_type))
    }

    pub fn new_method(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<u16, Error> {
        let class = self.new_class(owner)?;
        let name_and_type = self.new_name_and_type(name, descriptor)?;
        self.push_constant(Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        })
    }

    pub fn new_method_type(&mut self, descriptor: &str) -> Result<u16, Error> {
        let descriptor = self.new_utf8(descriptor)?;
        self.push_constant(Constant::MethodType(descriptor))
    }

    pub fn new_method_handle(&mut self, handle: &Handle) -> Result<u16, Error> {
        let member = if handle.kind.is_field() {
            self.new_field(&handle.owner, &handle.name, &handle.descriptor)?
        } else {
            self.new_method(
                &handle.owner,
                &handle.name,
                &handle.descriptor,
                handle.is_interface,
            )?
        };
        self.push_constant(Constant::MethodHandle(handle.kind, member))
    }

    pub fn new_module(&mut self, name: &str) -> Result<u16, Error> {
        let name = self.new_utf8(name)?;
        self.push_constant(Constant::Module(name))
    }

    pub fn new_package(&mut self, name: &str) -> Result<u16, Error> {
        let name = self.new_utf8(name)?;
        self.push_constant(Constant::Package(name))
    }

    /// Entry in the `BootstrapMethods` table, returning its index in that table
    pub fn new_bootstrap_method(
        &mut self,
        bootstrap_method: &Handle,
        arguments: &[ConstValue],
    ) -> Result<u16, Error> {
        let method_ref = self.new_method_handle(bootstrap_method)?;
        let arguments = arguments
            .iter()
            .map(|argument| self.new_const(argument))
            .collect::<Result<Vec<u16>, Error>>()?;

        let key = (method_ref, arguments);
        if let Some(index) = self.bootstrap_index.get(&key) {
            return Ok(*index);
        }

        self.bootstrap_methods
            .put_short(key.0)
            .put_short(key.1.len() as u16);
        for argument in &key.1 {
            self.bootstrap_methods.put_short(*argument);
        }
        let index = self.bootstrap_method_count;
        self.bootstrap_method_count += 1;
        self.bootstrap_index.insert(key, index);
        Ok(index)
    }

    pub fn new_invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        arguments: &[ConstValue],
    ) -> Result<u16, Error> {
        let bootstrap_method = self.new_bootstrap_method(bootstrap_method, arguments)?;
        let name_and_type = self.new_name_and_type(name, descriptor)?;
        self.push_constant(Constant::InvokeDynamic {
            bootstrap_method,
            name_and_type,
        })
    }

    pub fn new_dynamic(&mut self, dynamic: &ConstantDynamic) -> Result<u16, Error> {
        let bootstrap_method =
            self.new_bootstrap_method(&dynamic.bootstrap_method, &dynamic.bootstrap_arguments)?;
        let name_and_type = self.new_name_and_type(&dynamic.name, &dynamic.descriptor)?;
        self.push_constant(Constant::Dynamic {
            bootstrap_method,
            name_and_type,
        })
    }

    /// Entry for a loadable constant
    pub fn new_const(&mut self, value: &ConstValue) -> Result<u16, Error> {
        match value {
            ConstValue::Integer(i) => self.new_integer(*i),
            ConstValue::Float(f) => self.new_float(*f),
            ConstValue::Long(l) => self.new_long(*l),
            ConstValue::Double(d) => self.new_double(*d),
            ConstValue::String(s) => self.new_string(s),
            ConstValue::Class(c) => self.new_class(c),
            ConstValue::MethodType(d) => self.new_method_type(d),
            ConstValue::MethodHandle(h) => self.new_method_handle(h),
            ConstValue::Dynamic(d) => self.new_dynamic(d),
        }
    }

    /// Write `constant_pool_count` followed by the entries
    pub fn put(&self, out: &mut ByteVector) {
        out.put_short(self.next_index)
            .put_byte_vector(&self.entries);
    }

    /// Size of the `BootstrapMethods` attribute (including its 6 byte header)
    pub fn bootstrap_methods_size(&self) -> usize {
        8 + self.bootstrap_methods.len()
    }

    /// Write the `BootstrapMethods` attribute
    ///
    /// The attribute name must have been registered (see [`Self::new_utf8`]) before the pool itself
    /// was written.
    pub fn put_bootstrap_methods(&self, name_index: u16, out: &mut ByteVector) {
        out.put_short(name_index)
            .put_int(2 + self.bootstrap_methods.len() as i32)
            .put_short(self.bootstrap_method_count)
            .put_byte_vector(&self.bootstrap_methods);
    }
}
