use crate::jvm::class_file::constants::*;
use crate::jvm::{modified_utf8, Error};
use std::cell::RefCell;
use std::rc::Rc;

/// Magic header bytes at the front of every class file
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Cursor-based reader over the bytes of a class file
///
/// The constant pool is scanned once up front: the offset of every entry is recorded, so that
/// entries can then be decoded on demand. Decoded `CONSTANT_Utf8` entries are memoized, and asking
/// twice for the same index returns the same `Rc` (see [`Rc::ptr_eq`]).
///
/// Long and double entries take two slots; only the first slot has an offset.
#[derive(Debug)]
pub struct BytecodeReader {
    code: Vec<u8>,

    /// Offset of each entry's payload (just after the tag byte), indexed by pool index
    items: Vec<usize>,

    /// Offset of the first byte after the constant pool
    header: usize,

    strings: RefCell<Vec<Option<Rc<str>>>>,

    /// Reusable buffer for decoding strings, sized for the longest one in the pool
    scratch: RefCell<Vec<u16>>,

    /// Offset of the `BootstrapMethods` table body (after its count), once known
    bootstrap_methods: Option<usize>,

    /// Position of the next cursor read
    pub code_index: usize,
}

impl BytecodeReader {
    pub fn new(code: Vec<u8>) -> Result<BytecodeReader, Error> {
        let mut reader = BytecodeReader {
            code,
            items: vec![],
            header: 0,
            strings: RefCell::new(vec![]),
            scratch: RefCell::new(vec![]),
            bootstrap_methods: None,
            code_index: 0,
        };

        let magic = reader.read_i32()? as u32;
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        reader.code_index = 8;
        let item_count = reader.read_u16()? as usize;
        reader.items = vec![0; item_count.max(1)];

        let max_string_size = reader.read_constant_pool_items()?;
        reader.header = reader.code_index;
        reader.strings = RefCell::new(vec![None; item_count.max(1)]);
        reader.scratch = RefCell::new(Vec::with_capacity(max_string_size));
        Ok(reader)
    }

    /// Record where each entry starts, returning the length of the longest string
    fn read_constant_pool_items(&mut self) -> Result<usize, Error> {
        let mut max_string_size = 0;
        let mut item_index = 1;

        while item_index < self.items.len() {
            let tag_offset = self.code_index;
            let tag = self.read_u8()?;
            self.items[item_index] = self.code_index;

            let size = match tag {
                FIELD_REF | METHOD_REF | INTERFACE_METHOD_REF | INTEGER | FLOAT | NAME_AND_TYPE
                | DYNAMIC | INVOKE_DYNAMIC => 4,
                LONG | DOUBLE => {
                    item_index += 1;
                    8
                }
                UTF8 => {
                    let len = self.u16_at(self.code_index)? as usize;
                    max_string_size = max_string_size.max(len);
                    2 + len
                }
                METHOD_HANDLE => 3,
                MODULE | PACKAGE | CLASS | STRING | METHOD_TYPE => 2,
                _ => {
                    return Err(Error::UnknownConstantTag {
                        tag,
                        offset: tag_offset,
                    })
                }
            };

            self.bytes(self.code_index, size)?;
            self.code_index += size;
            item_index += 1;
        }

        Ok(max_string_size)
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// `constant_pool_count` from the header (one more than the largest index)
    pub fn item_count(&self) -> u16 {
        self.items.len() as u16
    }

    /// Offset of the first byte after the constant pool (the class access flags)
    pub fn header(&self) -> usize {
        self.header
    }

    /// Byte range covering all the constant pool entries
    pub fn constant_pool_range(&self) -> (usize, usize) {
        (10, self.header)
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], Error> {
        self.code
            .get(offset..offset + len)
            .ok_or(Error::Truncated {
                offset,
                needed: len,
            })
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], Error> {
        let mut array = [0; N];
        array.copy_from_slice(self.bytes(offset, N)?);
        Ok(array)
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8, Error> {
        Ok(self.array::<1>(offset)?[0])
    }

    pub fn i8_at(&self, offset: usize) -> Result<i8, Error> {
        Ok(self.u8_at(offset)? as i8)
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.array(offset)?))
    }

    pub fn i16_at(&self, offset: usize) -> Result<i16, Error> {
        Ok(i16::from_be_bytes(self.array(offset)?))
    }

    pub fn i32_at(&self, offset: usize) -> Result<i32, Error> {
        Ok(i32::from_be_bytes(self.array(offset)?))
    }

    pub fn i64_at(&self, offset: usize) -> Result<i64, Error> {
        Ok(i64::from_be_bytes(self.array(offset)?))
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let value = self.u8_at(self.code_index)?;
        self.code_index += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let value = self.u16_at(self.code_index)?;
        self.code_index += 2;
        Ok(value)
    }

    pub fn read_i16(&mut self) -> Result<i16, Error> {
        let value = self.i16_at(self.code_index)?;
        self.code_index += 2;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let value = self.i32_at(self.code_index)?;
        self.code_index += 4;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        let value = self.i64_at(self.code_index)?;
        self.code_index += 8;
        Ok(value)
    }

    /// Offset of an entry's payload, checking that the entry has the expected tag
    fn item(&self, index: u16, expected: &'static [u8], name: &'static str) -> Result<usize, Error> {
        let offset = match self.items.get(index as usize) {
            Some(&offset) if index != 0 && offset != 0 => offset,
            _ => return Err(Error::InvalidConstantIndex { index, expected: name }),
        };
        if !expected.is_empty() && !expected.contains(&self.code[offset - 1]) {
            return Err(Error::InvalidConstantIndex { index, expected: name });
        }
        Ok(offset)
    }

    /// Tag byte of a constant pool entry
    pub fn item_tag(&self, index: u16) -> Result<u8, Error> {
        let offset = self.item(index, &[], "constant")?;
        Ok(self.code[offset - 1])
    }

    /// Decode (or fetch from the cache) a `CONSTANT_Utf8` entry
    pub fn read_utf8_item(&self, index: u16) -> Result<Rc<str>, Error> {
        if let Some(Some(cached)) = self.strings.borrow().get(index as usize) {
            return Ok(cached.clone());
        }

        let offset = self.item(index, &[UTF8], "Utf8")?;
        let len = self.u16_at(offset)? as usize;
        let bytes = self.bytes(offset + 2, len)?;
        let decoded: Rc<str> = {
            let mut scratch = self.scratch.borrow_mut();
            Rc::from(modified_utf8::decode(bytes, &mut scratch))
        };
        self.strings.borrow_mut()[index as usize] = Some(decoded.clone());
        Ok(decoded)
    }

    /// Read the `Utf8` entry whose index is stored at `offset` (`None` for index 0)
    pub fn read_utf8_at(&self, offset: usize) -> Result<Option<Rc<str>>, Error> {
        match self.u16_at(offset)? {
            0 => Ok(None),
            index => self.read_utf8_item(index).map(Some),
        }
    }

    pub fn read_utf8(&mut self) -> Result<Option<Rc<str>>, Error> {
        let value = self.read_utf8_at(self.code_index)?;
        self.code_index += 2;
        Ok(value)
    }

    /// Name of a `CONSTANT_Class` entry
    pub fn read_class_item(&self, index: u16) -> Result<Rc<str>, Error> {
        let offset = self.item(index, &[CLASS], "Class")?;
        self.read_utf8_item(self.u16_at(offset)?)
    }

    /// Read the class name whose `Class` entry index is stored at `offset` (`None` for index 0)
    pub fn read_class_at(&self, offset: usize) -> Result<Option<Rc<str>>, Error> {
        match self.u16_at(offset)? {
            0 => Ok(None),
            index => self.read_class_item(index).map(Some),
        }
    }

    pub fn read_class(&mut self) -> Result<Option<Rc<str>>, Error> {
        let value = self.read_class_at(self.code_index)?;
        self.code_index += 2;
        Ok(value)
    }

    pub fn read_name_and_type(&self, index: u16) -> Result<(Rc<str>, Rc<str>), Error> {
        let offset = self.item(index, &[NAME_AND_TYPE], "NameAndType")?;
        let name = self.read_utf8_item(self.u16_at(offset)?)?;
        let descriptor = self.read_utf8_item(self.u16_at(offset + 2)?)?;
        Ok((name, descriptor))
    }

    /// Owner, name, descriptor, and whether the owner is an interface
    pub fn read_member_ref(&self, index: u16) -> Result<MemberRef, Error> {
        let offset = self.item(
            index,
            &[FIELD_REF, METHOD_REF, INTERFACE_METHOD_REF],
            "member reference",
        )?;
        let owner = self.read_class_item(self.u16_at(offset)?)?;
        let (name, descriptor) = self.read_name_and_type(self.u16_at(offset + 2)?)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            is_interface: self.code[offset - 1] == INTERFACE_METHOD_REF,
        })
    }

    pub fn read_method_handle(&self, index: u16) -> Result<Handle, Error> {
        let offset = self.item(index, &[METHOD_HANDLE], "MethodHandle")?;
        let kind = HandleKind::from_tag(self.u8_at(offset)?)?;
        let member = self.read_member_ref(self.u16_at(offset + 1)?)?;
        Ok(Handle {
            kind,
            owner: member.owner.to_string(),
            name: member.name.to_string(),
            descriptor: member.descriptor.to_string(),
            is_interface: member.is_interface,
        })
    }

    /// Decode a loadable constant (the operand of `ldc` or a bootstrap method argument)
    pub fn read_const(&self, index: u16) -> Result<ConstValue, Error> {
        let offset = self.item(index, &[], "loadable constant")?;
        let value = match self.code[offset - 1] {
            INTEGER => ConstValue::Integer(self.i32_at(offset)?),
            FLOAT => ConstValue::Float(f32::from_bits(self.i32_at(offset)? as u32)),
            LONG => ConstValue::Long(self.i64_at(offset)?),
            DOUBLE => ConstValue::Double(f64::from_bits(self.i64_at(offset)? as u64)),
            CLASS => ConstValue::Class(self.read_class_item(index)?.to_string()),
            STRING => ConstValue::String(self.read_utf8_item(self.u16_at(offset)?)?.to_string()),
            METHOD_TYPE => {
                ConstValue::MethodType(self.read_utf8_item(self.u16_at(offset)?)?.to_string())
            }
            METHOD_HANDLE => ConstValue::MethodHandle(self.read_method_handle(index)?),
            DYNAMIC => {
                let (bootstrap_method, name, descriptor) = self.read_dynamic_parts(offset)?;
                let (handle, bootstrap_arguments) = self.read_bootstrap_method(bootstrap_method)?;
                ConstValue::Dynamic(Box::new(ConstantDynamic {
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                    bootstrap_method: handle,
                    bootstrap_arguments,
                }))
            }
            tag => {
                return Err(Error::UnknownConstantTag {
                    tag,
                    offset: offset - 1,
                })
            }
        };
        Ok(value)
    }

    fn read_dynamic_parts(&self, offset: usize) -> Result<(u16, Rc<str>, Rc<str>), Error> {
        let bootstrap_method = self.u16_at(offset)?;
        let (name, descriptor) = self.read_name_and_type(self.u16_at(offset + 2)?)?;
        Ok((bootstrap_method, name, descriptor))
    }

    /// Name, descriptor, and bootstrap method index of a `CONSTANT_InvokeDynamic` entry
    pub fn read_invoke_dynamic(&self, index: u16) -> Result<(u16, Rc<str>, Rc<str>), Error> {
        let offset = self.item(index, &[INVOKE_DYNAMIC], "InvokeDynamic")?;
        self.read_dynamic_parts(offset)
    }

    /// Raw form of an entry, with references left as indices
    pub fn read_constant(&self, index: u16) -> Result<Constant, Error> {
        let offset = self.item(index, &[], "constant")?;
        let tag = self.code[offset - 1];
        let u16_at = |delta: usize| self.u16_at(offset + delta);
        let constant = match tag {
            UTF8 => Constant::Utf8(self.read_utf8_item(index)?.to_string()),
            INTEGER => Constant::Integer(self.i32_at(offset)?),
            FLOAT => Constant::Float(self.i32_at(offset)? as u32),
            LONG => Constant::Long(self.i64_at(offset)?),
            DOUBLE => Constant::Double(self.i64_at(offset)? as u64),
            CLASS => Constant::Class(u16_at(0)?),
            STRING => Constant::String(u16_at(0)?),
            FIELD_REF => Constant::FieldRef(u16_at(0)?, u16_at(2)?),
            METHOD_REF | INTERFACE_METHOD_REF => Constant::MethodRef {
                class: u16_at(0)?,
                name_and_type: u16_at(2)?,
                is_interface: tag == INTERFACE_METHOD_REF,
            },
            NAME_AND_TYPE => Constant::NameAndType(u16_at(0)?, u16_at(2)?),
            METHOD_HANDLE => {
                let kind = HandleKind::from_tag(self.u8_at(offset)?)?;
                Constant::MethodHandle(kind, u16_at(1)?)
            }
            METHOD_TYPE => Constant::MethodType(u16_at(0)?),
            DYNAMIC => Constant::Dynamic {
                bootstrap_method: u16_at(0)?,
                name_and_type: u16_at(2)?,
            },
            INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_method: u16_at(0)?,
                name_and_type: u16_at(2)?,
            },
            MODULE => Constant::Module(u16_at(0)?),
            PACKAGE => Constant::Package(u16_at(0)?),
            tag => {
                return Err(Error::UnknownConstantTag {
                    tag,
                    offset: offset - 1,
                })
            }
        };
        Ok(constant)
    }

    /// Note where the body of the `BootstrapMethods` attribute starts (just past its count)
    pub fn set_bootstrap_methods(&mut self, offset: usize) {
        self.bootstrap_methods = Some(offset);
    }

    /// Every bootstrap method as method handle index, argument indices, and raw bytes
    pub fn bootstrap_methods(&self) -> Option<Vec<(u16, Vec<u16>, &[u8])>> {
        let start = self.bootstrap_methods?;
        let count = self.u16_at(start - 2).ok()?;
        let mut methods = Vec::with_capacity(count as usize);
        let mut offset = start;
        for _ in 0..count {
            let method_ref = self.u16_at(offset).ok()?;
            let argument_count = self.u16_at(offset + 2).ok()? as usize;
            let arguments = (0..argument_count)
                .map(|i| self.u16_at(offset + 4 + 2 * i))
                .collect::<Result<Vec<u16>, Error>>()
                .ok()?;
            let len = 4 + 2 * argument_count;
            methods.push((method_ref, arguments, self.bytes(offset, len).ok()?));
            offset += len;
        }
        Some(methods)
    }

    /// Bootstrap method handle and arguments of an entry of the `BootstrapMethods` table
    pub fn read_bootstrap_method(&self, index: u16) -> Result<(Handle, Vec<ConstValue>), Error> {
        let start = self.bootstrap_methods.ok_or(Error::InvalidConstantIndex {
            index,
            expected: "bootstrap method",
        })?;
        let mut offset = start;
        for _ in 0..index {
            offset += 4 + 2 * self.u16_at(offset + 2)? as usize;
        }
        let handle = self.read_method_handle(self.u16_at(offset)?)?;
        let argument_count = self.u16_at(offset + 2)? as usize;
        let arguments = (0..argument_count)
            .map(|i| self.read_const(self.u16_at(offset + 4 + 2 * i)?))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok((handle, arguments))
    }
}

/// Symbolic reference to a field or method
#[derive(Debug, Clone)]
pub struct MemberRef {
    pub owner: Rc<str>,
    pub name: Rc<str>,
    pub descriptor: Rc<str>,
    pub is_interface: bool,
}
