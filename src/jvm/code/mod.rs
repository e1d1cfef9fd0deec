//! Method bodies: writing instructions, tracking control flow, and computing frames
//!
//! [`MethodWriter`] is the end of every method visitor chain. It encodes the instructions it is
//! given and builds the control flow graph of the method as it goes, which is then used to compute
//! the maximum stack size and the `StackMapTable` frames.

mod cfg;
mod debug_tables;
mod exception_handling;
mod frame;
mod label;
mod method_writer;
mod stack_map;
mod types;
mod visitor;

pub use cfg::CfgAnalysis;
pub use debug_tables::{LineNumberTableWriter, LocalVariableTableWriter};
pub use exception_handling::ExceptionHandling;
pub use frame::{ClassHierarchy, ClassInfo, Frame, ObjectHierarchy, OBJECT};
pub use label::{Label, Labels};
pub use method_writer::{MethodHeader, MethodWriter, MAX_CODE_LENGTH};
pub use stack_map::{StackMapFrame, StackMapTableWriter};
pub use types::{ComputedType, SerializableType, VerificationType};
pub use visitor::MethodVisitor;
