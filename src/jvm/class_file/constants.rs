use crate::jvm::class_file::Serialize;
use crate::jvm::modified_utf8;
use crate::jvm::Error;
use byteorder::WriteBytesExt;
use std::fmt;

pub const UTF8: u8 = 1;
pub const INTEGER: u8 = 3;
pub const FLOAT: u8 = 4;
pub const LONG: u8 = 5;
pub const DOUBLE: u8 = 6;
pub const CLASS: u8 = 7;
pub const STRING: u8 = 8;
pub const FIELD_REF: u8 = 9;
pub const METHOD_REF: u8 = 10;
pub const INTERFACE_METHOD_REF: u8 = 11;
pub const NAME_AND_TYPE: u8 = 12;
pub const METHOD_HANDLE: u8 = 15;
pub const METHOD_TYPE: u8 = 16;
pub const DYNAMIC: u8 = 17;
pub const INVOKE_DYNAMIC: u8 = 18;
pub const MODULE: u8 = 19;
pub const PACKAGE: u8 = 20;

/// Constant pool entry, with references to other entries as raw indices
///
/// Floating point payloads are kept as their bit patterns so that entries can be compared and
/// hashed for deduplication (`NaN` payloads included).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef { class: u16, name_and_type: u16, is_interface: bool },
    NameAndType(u16, u16),
    MethodHandle(HandleKind, u16),
    MethodType(u16),
    Dynamic { bootstrap_method: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap_method: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl Constant {
    /// Number of constant pool slots the entry occupies
    pub fn width(&self) -> u16 {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    /// Write the entry, returning an error for strings that can't be encoded
    pub fn put(&self, out: &mut crate::jvm::ByteVector) -> Result<(), Error> {
        if let Constant::Utf8(string) = self {
            out.put_byte(UTF8).put_utf8(string)?;
        } else {
            self.serialize(out)?;
        }
        Ok(())
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                UTF8.serialize(writer)?;
                let buffer = modified_utf8::encode(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                INTEGER.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(bits) => {
                FLOAT.serialize(writer)?;
                bits.serialize(writer)?;
            }
            Constant::Long(long) => {
                LONG.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(bits) => {
                DOUBLE.serialize(writer)?;
                (*bits as i64).serialize(writer)?;
            }
            Constant::Class(name) => {
                CLASS.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(utf8) => {
                STRING.serialize(writer)?;
                utf8.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                FIELD_REF.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let tag = if *is_interface {
                    INTERFACE_METHOD_REF
                } else {
                    METHOD_REF
                };
                tag.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType(name, descriptor) => {
                NAME_AND_TYPE.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle(kind, member) => {
                METHOD_HANDLE.serialize(writer)?;
                (*kind as u8).serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType(descriptor) => {
                METHOD_TYPE.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                DYNAMIC.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                INVOKE_DYNAMIC.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::Module(name) => {
                MODULE.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                PACKAGE.serialize(writer)?;
                name.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Reference kind of a method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl HandleKind {
    pub fn from_tag(tag: u8) -> Result<HandleKind, Error> {
        Ok(match tag {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => return Err(Error::IllegalMethodHandleTag(other)),
        })
    }

    pub fn is_field(&self) -> bool {
        (*self as u8) <= 4
    }
}

/// Symbolic method handle, as used for `ldc` operands and bootstrap methods
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: HandleKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

/// Dynamically-computed constant (`CONSTANT_Dynamic`)
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDynamic {
    pub name: String,
    pub descriptor: String,
    pub bootstrap_method: Handle,
    pub bootstrap_arguments: Vec<ConstValue>,
}

/// Loadable constant value, as used by `ldc` instructions and bootstrap method arguments
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),

    /// Class literal, given by internal name (or array descriptor)
    Class(String),

    /// Method type, given by its method descriptor
    MethodType(String),
    MethodHandle(Handle),
    Dynamic(Box<ConstantDynamic>),
}

impl ConstValue {
    /// Does this constant take two stack slots (and need `ldc2_w`)?
    pub fn is_wide(&self) -> bool {
        match self {
            ConstValue::Long(_) | ConstValue::Double(_) => true,
            ConstValue::Dynamic(dynamic) => {
                matches!(dynamic.descriptor.as_bytes().first(), Some(b'J' | b'D'))
            }
            _ => false,
        }
    }
}

impl From<&str> for ConstValue {
    fn from(string: &str) -> ConstValue {
        ConstValue::String(string.to_owned())
    }
}

impl From<i32> for ConstValue {
    fn from(integer: i32) -> ConstValue {
        ConstValue::Integer(integer)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Integer(i) => write!(f, "{}", i),
            ConstValue::Float(x) => write!(f, "{}f", x),
            ConstValue::Long(l) => write!(f, "{}L", l),
            ConstValue::Double(d) => write!(f, "{}d", d),
            ConstValue::String(s) => write!(f, "{:?}", s),
            ConstValue::Class(c) => write!(f, "{}.class", c),
            ConstValue::MethodType(d) => write!(f, "MethodType{}", d),
            ConstValue::MethodHandle(h) => write!(f, "{}.{}{}", h.owner, h.name, h.descriptor),
            ConstValue::Dynamic(d) => write!(f, "dynamic {}:{}", d.name, d.descriptor),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::ByteVector;

    #[test]
    fn handle_kinds() {
        assert_eq!(HandleKind::from_tag(6).unwrap(), HandleKind::InvokeStatic);
        assert!(HandleKind::from_tag(4).unwrap().is_field());
        assert!(!HandleKind::from_tag(9).unwrap().is_field());
        assert!(matches!(
            HandleKind::from_tag(10),
            Err(Error::IllegalMethodHandleTag(10))
        ));
        assert!(matches!(
            HandleKind::from_tag(0),
            Err(Error::IllegalMethodHandleTag(0))
        ));
    }

    #[test]
    fn serialized_entries() {
        let mut out = ByteVector::new();
        Constant::Utf8("Hi".to_owned()).put(&mut out).unwrap();
        Constant::Integer(-1).put(&mut out).unwrap();
        Constant::MethodRef {
            class: 2,
            name_and_type: 3,
            is_interface: true,
        }
        .put(&mut out)
        .unwrap();
        Constant::Double(1.5f64.to_bits()).put(&mut out).unwrap();
        assert_eq!(
            out.data(),
            &[
                1, 0, 2, b'H', b'i', 3, 0xFF, 0xFF, 0xFF, 0xFF, 11, 0, 2, 0, 3, 6, 0x3F, 0xF8, 0,
                0, 0, 0, 0, 0
            ]
        );
    }

    #[test]
    fn wide_constants() {
        assert!(ConstValue::Long(1).is_wide());
        assert!(ConstValue::Double(1.0).is_wide());
        assert!(!ConstValue::Float(1.0).is_wide());
        assert!(!ConstValue::from("x").is_wide());
    }
}
