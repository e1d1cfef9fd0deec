//! Constant pool reading and writing, and the other building blocks of the class file format

mod constant_pool;
mod constants;
mod reader;
mod serialize;
mod version;

pub use constant_pool::ConstantPool;
pub use constants::{ConstValue, Constant, ConstantDynamic, Handle, HandleKind};
pub use reader::{BytecodeReader, MemberRef, MAGIC};
pub use serialize::Serialize;
pub use version::Version;
