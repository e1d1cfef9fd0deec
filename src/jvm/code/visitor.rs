use crate::jvm::class_file::{ConstValue, Handle};
use crate::jvm::code::label::{Label, Labels};
use crate::jvm::Error;

/// Receiver of the events making up a method, in the order the class reader produces them
///
///   1. `visit_annotation` for each runtime-visible annotation on the method
///   2. `visit_try_catch_block` for each exception table entry
///   3. instructions, labels, and line numbers, in code order
///   4. `visit_local_variable` for each local variable table entry
///   5. `visit_max_stack`
///
/// Methods without code (abstract or native) only get the annotations.
///
/// Labels are allocated from the arena returned by [`MethodVisitor::labels`], which belongs to
/// the method being written. Any visitor returning [`Error::VisitInterrupted`] abandons the whole
/// class.
pub trait MethodVisitor {
    fn labels(&mut self) -> &mut Labels;

    fn visit_annotation(&mut self, descriptor: &str) -> Result<(), Error>;

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error>;

    fn visit_label(&mut self, label: Label) -> Result<(), Error>;

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error>;

    /// Instruction without operands
    fn visit_insn(&mut self, opcode: u8) -> Result<(), Error>;

    /// `bipush`, `sipush`, or `newarray`
    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<(), Error>;

    /// Load, store, or `ret` (always in the form with an explicit index)
    fn visit_var_insn(&mut self, opcode: u8, var_index: u16) -> Result<(), Error>;

    /// `new`, `anewarray`, `checkcast`, or `instanceof`
    fn visit_type_insn(&mut self, opcode: u8, class: &str) -> Result<(), Error>;

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error>;

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<(), Error>;

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[ConstValue],
    ) -> Result<(), Error>;

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<(), Error>;

    fn visit_ldc_insn(&mut self, value: &ConstValue) -> Result<(), Error>;

    fn visit_iinc_insn(&mut self, var_index: u16, increment: i16) -> Result<(), Error>;

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<(), Error>;

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<(), Error>;

    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dimensions: u8)
        -> Result<(), Error>;

    #[allow(clippy::too_many_arguments)]
    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<(), Error>;

    fn visit_max_stack(&mut self, max_stack: u16) -> Result<(), Error>;
}
