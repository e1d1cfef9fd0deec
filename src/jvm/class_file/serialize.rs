use byteorder::{BigEndian, WriteBytesExt};
use std::io::Result;

/// Encoding of the fixed-width pieces of class file structures that are built from typed values
/// (constant pool entries, `StackMapTable` frames, verification types)
///
/// Everything is big-endian. Structures write their own tag and length prefixes.
pub trait Serialize {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

macro_rules! big_endian {
    ($($int:ty => $write:ident),* $(,)?) => {
        $(
            impl Serialize for $int {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                    writer.$write::<BigEndian>(*self)
                }
            }
        )*
    };
}

big_endian! {
    u16 => write_u16,
    u32 => write_u32,
    i32 => write_i32,
    i64 => write_i64,
}
