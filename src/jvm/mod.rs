//! Read, transform, and write JVM classes
//!
//! ### Rewriting a method
//!
//! A class is parsed with [`ClassReader`], which decodes the class structure but leaves method
//! bodies alone until they are replayed into a [`code::MethodVisitor`]. A [`ClassWriter`] seeded
//! from the reader keeps the original constant pool, so methods that are not touched get copied
//! over byte-for-byte:
//!
//! ```
//! use bytecov::jvm::code::{MethodWriter, ObjectHierarchy};
//! use bytecov::jvm::{ClassReader, ClassWriter, Error};
//!
//! fn rewrite_first_method(class_bytes: Vec<u8>) -> Result<Vec<u8>, Error> {
//!     let reader = ClassReader::new(class_bytes)?;
//!     let mut writer = ClassWriter::new(&reader)?;
//!     for (i, method) in reader.methods.iter().enumerate() {
//!         if i > 0 {
//!             writer.copy_method(&reader, method)?;
//!             continue;
//!         }
//!         let compute_frames = reader.version.requires_frames();
//!         let mut method_writer = MethodWriter::new(
//!             writer.pool(),
//!             &ObjectHierarchy,
//!             &reader.this_class,
//!             method.header.clone(),
//!             compute_frames,
//!         )?;
//!         reader.accept_method(method, &mut method_writer)?;
//!         let method_info = method_writer.finish()?;
//!         writer.add_method(&method_info);
//!     }
//!     writer.to_bytes(&reader)
//! }
//! ```

mod access_flags;
mod byte_vector;
pub mod class_file;
mod class_path;
mod class_reader;
mod class_writer;
pub mod code;
pub mod descriptors;
mod errors;
pub mod modified_utf8;
pub mod opcodes;

pub use access_flags::*;
pub use byte_vector::*;
pub use class_path::*;
pub use class_reader::*;
pub use class_writer::*;
pub use errors::*;
