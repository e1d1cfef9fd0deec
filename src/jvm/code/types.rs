use crate::jvm::class_file::Serialize;
use crate::jvm::descriptors::{BaseType, FieldType, Width};
use byteorder::WriteBytesExt;
use std::rc::Rc;

/// These types are from [this hierarchy][0]
///
/// While frames are being computed, classes are names (`Rc<str>`) and uninitialized values carry
/// the offset of their `new` instruction along with the class being allocated. When serialized,
/// both are plain `u16` (a class constant index and a code offset).
///
/// Values of type `long` or `double` take two slots in a computed frame: the type itself followed
/// by `Top`. The extra slot is dropped when the frame is written out.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot (unset local, or second half of a `long`/`double`)
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type, by internal name (arrays use their descriptor)
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not been called
    Uninitialized(U),
}

/// Uninitialized object, while frames are being computed
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Uninitialized {
    /// Offset of the `new` instruction
    pub offset: u32,

    /// Class being allocated
    pub class: Rc<str>,
}

/// Verification type used while computing frames
pub type ComputedType = VerificationType<Rc<str>, Uninitialized>;

/// Verification type ready to be written to a `StackMapTable`
pub type SerializableType = VerificationType<u16, u16>;

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type a reference type?
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object(_)
                | VerificationType::Uninitialized(_)
        )
    }

    pub fn map<C2, U2, E>(
        &self,
        mut map_class: impl FnMut(&Cls) -> Result<C2, E>,
        map_uninitialized: impl Fn(&U) -> U2,
    ) -> Result<VerificationType<C2, U2>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)?),
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Uninitialized(map_uninitialized(uninit))
            }
        })
    }
}

impl<Cls, U> Width for VerificationType<Cls, U> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl ComputedType {
    pub fn object(name: &str) -> ComputedType {
        VerificationType::Object(Rc::from(name))
    }

    /// Slots pushed for a value of the given type
    pub fn slots_of(field_type: &FieldType) -> Vec<ComputedType> {
        match field_type {
            FieldType::Base(BaseType::Long) => vec![VerificationType::Long, VerificationType::Top],
            FieldType::Base(BaseType::Double) => {
                vec![VerificationType::Double, VerificationType::Top]
            }
            FieldType::Base(BaseType::Float) => vec![VerificationType::Float],
            FieldType::Base(_) => vec![VerificationType::Integer],
            FieldType::Object(name) | FieldType::Array(name) => vec![ComputedType::object(name)],
        }
    }
}

/// Drop the `Top` slots that follow `long`/`double` values
pub fn compress(slots: &[ComputedType]) -> Vec<ComputedType> {
    let mut compressed = Vec::with_capacity(slots.len());
    let mut skip_next = false;
    for slot in slots {
        if skip_next {
            skip_next = false;
            if *slot == VerificationType::Top {
                continue;
            }
        }
        skip_next = slot.width() == 2;
        compressed.push(slot.clone());
    }
    compressed
}

/// Like [`compress`], but also without trailing `Top` locals
pub fn compress_locals(slots: &[ComputedType]) -> Vec<ComputedType> {
    let used = slots
        .iter()
        .rposition(|slot| *slot != VerificationType::Top)
        .map_or(0, |last| last + 1);
    compress(&slots[..used])
}

impl Serialize for SerializableType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}
