use crate::jvm::class_file::{ConstValue, ConstantPool, Handle};
use crate::jvm::code::cfg::CfgAnalysis;
use crate::jvm::code::debug_tables::{LineNumberTableWriter, LocalVariableTableWriter};
use crate::jvm::code::exception_handling::ExceptionHandling;
use crate::jvm::code::frame::{ClassHierarchy, Frame};
use crate::jvm::code::label::{Label, Labels};
use crate::jvm::code::stack_map::StackMapTableWriter;
use crate::jvm::code::visitor::MethodVisitor;
use crate::jvm::descriptors;
use crate::jvm::opcodes::*;
use crate::jvm::{ByteVector, Error, MethodAccessFlags};
use std::rc::Rc;

/// Largest code array a method may have
pub const MAX_CODE_LENGTH: usize = 65536;

/// Everything about a method except for its code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodHeader {
    pub access_flags: MethodAccessFlags,
    pub name: Rc<str>,
    pub descriptor: Rc<str>,

    /// Generic signature
    pub signature: Option<Rc<str>>,

    /// Classes in the `throws` clause
    pub exceptions: Vec<Rc<str>>,
}

impl MethodHeader {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        &*self.name == "<init>"
    }
}

/// Where a method writer is in the event grammar of [`MethodVisitor`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Annotations,
    Code,
    Done,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Annotations => "annotations",
            Phase::Code => "code",
            Phase::Done => "done",
        }
    }
}

/// Attribute copied over verbatim, whose name is already in the constant pool
#[derive(Debug, Clone)]
struct RawAttribute {
    name_index: u16,
    info: Vec<u8>,
}

/// Method writer, which encodes instructions as they are visited and assembles the `method_info`
///
/// The writer tracks the control flow graph of the code as it goes, so that once
/// [`MethodVisitor::visit_max_stack`] is called it can compute the maximum stack size and (if
/// frames are being computed) the `StackMapTable`. Constants are added to the class constant pool
/// it borrows.
pub struct MethodWriter<'a> {
    pool: &'a mut ConstantPool,
    hierarchy: &'a dyn ClassHierarchy,
    class_name: Rc<str>,
    header: MethodHeader,
    raw_attributes: Vec<RawAttribute>,

    phase: Phase,
    has_code: bool,

    /// Emit forward jumps with 32 bit offsets (`goto_w`), for methods that may outgrow 16 bits
    wide_jumps: bool,

    labels: Labels,
    code: ByteVector,
    cfg: CfgAnalysis,
    exception_handling: ExceptionHandling,
    line_numbers: LineNumberTableWriter,
    local_variables: LocalVariableTableWriter,
    stack_map: StackMapTableWriter,
}

impl<'a> MethodWriter<'a> {
    pub fn new(
        pool: &'a mut ConstantPool,
        hierarchy: &'a dyn ClassHierarchy,
        class_name: &str,
        header: MethodHeader,
        compute_frames: bool,
    ) -> Result<MethodWriter<'a>, Error> {
        let mut labels = Labels::new();
        let mut code = ByteVector::new();
        let cfg = CfgAnalysis::new(&mut labels, &mut code, compute_frames)?;

        let mut stack_map = StackMapTableWriter::new();
        let mut argument_slots = descriptors::arguments_and_return_sizes(&header.descriptor)? >> 2;
        if header.is_static() {
            argument_slots -= 1;
        }
        stack_map.update_max_locals(argument_slots as usize);

        Ok(MethodWriter {
            pool,
            hierarchy,
            class_name: Rc::from(class_name),
            header,
            raw_attributes: vec![],
            phase: Phase::Annotations,
            has_code: false,
            wide_jumps: false,
            labels,
            code,
            cfg,
            exception_handling: ExceptionHandling::new(),
            line_numbers: LineNumberTableWriter::new(),
            local_variables: LocalVariableTableWriter::new(),
            stack_map,
        })
    }

    /// Encode jumps to labels that aren't placed yet with `goto_w`, so they can reach past 32 KiB
    pub fn with_wide_jumps(mut self) -> MethodWriter<'a> {
        self.wide_jumps = true;
        self
    }

    pub fn header(&self) -> &MethodHeader {
        &self.header
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut *self.pool
    }

    /// Keep an attribute the writer doesn't otherwise produce (annotations, parameters, etc.)
    pub fn add_raw_attribute(&mut self, name_index: u16, info: &[u8]) {
        self.raw_attributes.push(RawAttribute {
            name_index,
            info: info.to_vec(),
        });
    }

    /// Bytecode emitted so far
    pub fn code(&self) -> &ByteVector {
        &self.code
    }

    /// First label of the basic block being written, if the current position is reachable
    pub fn current_block(&self) -> Option<Label> {
        self.cfg.current_block()
    }

    pub fn max_stack(&self) -> u16 {
        self.stack_map.max_stack()
    }

    pub fn max_locals(&self) -> u16 {
        self.stack_map.max_locals()
    }

    fn enter_code(&mut self, event: &'static str) -> Result<(), Error> {
        match self.phase {
            Phase::Annotations => {
                self.phase = Phase::Code;
                self.has_code = true;
                Ok(())
            }
            Phase::Code => Ok(()),
            Phase::Done => Err(Error::UnexpectedVisit {
                event,
                phase: self.phase.name(),
            }),
        }
    }

    fn update_max_locals(&mut self, opcode: u8, var_index: u16) {
        let slots = if is_wide_var_op(opcode) { 2 } else { 1 };
        self.stack_map.update_max_locals(var_index as usize + slots);
    }

    /// Compute frames and the maximum stack size from the control flow graph
    fn compute_all_frames(&mut self) -> Result<(), Error> {
        self.exception_handling
            .complete_control_flow_graph_with_frames(&mut self.labels);

        let initial = Frame::initial(
            &self.class_name,
            self.header.is_static(),
            self.header.is_constructor(),
            &self.header.descriptor,
        )?;
        self.stack_map.visit_first_frame(&initial, self.pool)?;
        let max_stack = self.cfg.compute_max_stack_size_from_frames(
            &mut self.labels,
            initial,
            &self.class_name,
            self.hierarchy,
        )?;
        self.stack_map.set_max_stack(max_stack);

        let blocks: Vec<Label> = self.cfg.blocks(&self.labels).collect();
        for block in blocks {
            if !self.labels.is_storing_frame(block) {
                continue;
            }
            let position = self.labels.position(block).ok_or(Error::UnresolvedLabel)?;
            let data = self.labels.get(block);
            if let Some(input) = data.frame.as_ref().and_then(|frame| frame.input.as_ref()) {
                self.stack_map.update_max_locals(input.locals.len());
                self.stack_map.visit_frame(position, input, self.pool)?;
            }
        }
        Ok(())
    }

    /// Serialize the `method_info` structure
    pub fn finish(self) -> Result<ByteVector, Error> {
        if self.phase == Phase::Code {
            return Err(Error::UnexpectedVisit {
                event: "end of method",
                phase: self.phase.name(),
            });
        }
        let MethodWriter {
            pool,
            header,
            raw_attributes,
            has_code,
            labels,
            code,
            exception_handling,
            line_numbers,
            local_variables,
            stack_map,
            ..
        } = self;

        let mut out = ByteVector::new();
        out.put_short(header.access_flags.bits())
            .put_short(pool.new_utf8(&header.name)?)
            .put_short(pool.new_utf8(&header.descriptor)?);

        let attribute_count = has_code as usize
            + !header.exceptions.is_empty() as usize
            + header.signature.is_some() as usize
            + raw_attributes.len();
        out.put_short(attribute_count as u16);

        if has_code {
            let code_name = pool.new_utf8("Code")?;
            let stack_map_name = if stack_map.has_frames() {
                pool.new_utf8("StackMapTable")?
            } else {
                0
            };
            let attribute_length = 12
                + code.len()
                + exception_handling.size()
                + local_variables.size()
                + line_numbers.size()
                + stack_map.size();
            let code_attribute_count = local_variables.attribute_count()
                + line_numbers.has_line_numbers() as u16
                + stack_map.has_frames() as u16;

            out.put_short(code_name)
                .put_int(attribute_length as i32)
                .put_short(stack_map.max_stack())
                .put_short(stack_map.max_locals())
                .put_int(code.len() as i32)
                .put_byte_vector(&code);
            exception_handling.put(&labels, &mut out)?;
            out.put_short(code_attribute_count);
            local_variables.put(&mut out);
            line_numbers.put(&mut out);
            stack_map.put(&mut out, stack_map_name);
        }

        if !header.exceptions.is_empty() {
            let name = pool.new_utf8("Exceptions")?;
            let classes = header
                .exceptions
                .iter()
                .map(|class| pool.new_class(class))
                .collect::<Result<Vec<u16>, Error>>()?;
            out.put_short(name)
                .put_int(2 + 2 * classes.len() as i32)
                .put_short(classes.len() as u16);
            for class in classes {
                out.put_short(class);
            }
        }

        if let Some(signature) = &header.signature {
            let name = pool.new_utf8("Signature")?;
            let signature = pool.new_utf8(signature)?;
            out.put_short(name).put_int(2).put_short(signature);
        }

        for attribute in &raw_attributes {
            out.put_short(attribute.name_index)
                .put_int(attribute.info.len() as i32)
                .put_byte_array(&attribute.info);
        }

        Ok(out)
    }
}

impl<'a> MethodVisitor for MethodWriter<'a> {
    fn labels(&mut self) -> &mut Labels {
        &mut self.labels
    }

    fn visit_annotation(&mut self, _descriptor: &str) -> Result<(), Error> {
        // Annotations are kept as raw attributes
        if self.phase != Phase::Annotations {
            return Err(Error::UnexpectedVisit {
                event: "annotation",
                phase: self.phase.name(),
            });
        }
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        self.enter_code("try-catch block")?;
        self.exception_handling
            .add_handler(self.pool, start, end, handler, catch_type)
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        self.enter_code("label")?;
        self.cfg.visit_label(&mut self.labels, &mut self.code, label)
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        self.enter_code("line number")?;
        self.line_numbers
            .add_line_number(self.pool, &self.labels, line, start)
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<(), Error> {
        self.enter_code("instruction")?;
        self.code.put_byte(opcode);
        self.cfg
            .zero_operand_insn(&mut self.labels, self.code.len(), opcode);
        Ok(())
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<(), Error> {
        self.enter_code("instruction")?;
        self.cfg.int_operand_insn(&mut self.labels, opcode, operand);
        if opcode == SIPUSH {
            self.code.put12(opcode, operand as u16);
        } else {
            self.code.put11(opcode, operand as u8);
        }
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, var_index: u16) -> Result<(), Error> {
        self.enter_code("instruction")?;
        self.cfg.var_insn(&mut self.labels, opcode, var_index);

        if let Some(short_form) = short_var_form(opcode, var_index) {
            self.code.put_byte(short_form);
        } else if var_index >= 256 {
            self.code.put_byte(WIDE).put12(opcode, var_index);
        } else {
            self.code.put11(opcode, var_index as u8);
        }

        // Stores change the locals seen by exception handlers, which need a fresh block
        if opcode >= ISTORE && self.cfg.computes_frames() && self.exception_handling.has_handlers()
        {
            let label = self.labels.new_label();
            self.visit_label(label)?;
        }

        self.update_max_locals(opcode, var_index);
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, class: &str) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let offset = self.code.len();
        let class_index = self.pool.new_class(class)?;
        self.code.put12(opcode, class_index);
        self.cfg.type_insn(&mut self.labels, opcode, class, offset);
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let field = self.pool.new_field(owner, name, descriptor)?;
        self.cfg.field_insn(&mut self.labels, opcode, descriptor)?;
        self.code.put12(opcode, field);
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let method = self.pool.new_method(owner, name, descriptor, is_interface)?;
        self.cfg
            .invoke_insn(&mut self.labels, opcode, owner, name, descriptor)?;

        if opcode == INVOKEINTERFACE {
            let argument_slots = descriptors::arguments_and_return_sizes(descriptor)? >> 2;
            self.code
                .put12(opcode, method)
                .put11(argument_slots as u8, 0);
        } else {
            self.code.put12(opcode, method);
        }
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[ConstValue],
    ) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let call_site =
            self.pool
                .new_invoke_dynamic(name, descriptor, bootstrap_method, bootstrap_arguments)?;
        self.cfg
            .invoke_insn(&mut self.labels, INVOKEDYNAMIC, "", name, descriptor)?;
        self.code.put12(INVOKEDYNAMIC, call_site).put_short(0);
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let opcode = match opcode {
            GOTO_W => GOTO,
            JSR_W => JSR,
            other => other,
        };
        let next_insn = self.cfg.jump_insn(&mut self.labels, opcode, label);

        let too_far = match self.labels.position(label) {
            Some(position) => (position as i64 - self.code.len() as i64) < i16::MIN as i64,
            None => self.wide_jumps,
        };
        if too_far {
            match opcode {
                GOTO => {
                    self.code.put_byte(GOTO_W);
                }
                JSR => {
                    self.code.put_byte(JSR_W);
                }
                _ => {
                    // `ifXX L` becomes `ifNOTXX +8; goto_w L`
                    let negated = negate_jump(opcode).ok_or(Error::UnknownOpcode {
                        opcode,
                        offset: self.code.len(),
                    })?;
                    if let Some(next_insn) = next_insn {
                        self.labels.mark_target(next_insn);
                    }
                    self.code.put_byte(negated).put_short(8).put_byte(GOTO_W);
                }
            }
            let source = self.code.len() - 1;
            self.labels.put(label, &mut self.code, source, true);
        } else {
            self.code.put_byte(opcode);
            let source = self.code.len() - 1;
            self.labels.put(label, &mut self.code, source, false);
        }

        self.cfg
            .after_jump(&mut self.labels, &mut self.code, opcode, next_insn)
    }

    fn visit_ldc_insn(&mut self, value: &ConstValue) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let index = self.pool.new_const(value)?;
        self.cfg.ldc_insn(&mut self.labels, value)?;
        if value.is_wide() {
            self.code.put12(LDC2_W, index);
        } else if index >= 256 {
            self.code.put12(LDC_W, index);
        } else {
            self.code.put11(LDC, index as u8);
        }
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var_index: u16, increment: i16) -> Result<(), Error> {
        self.enter_code("instruction")?;
        self.cfg.iinc_insn(&mut self.labels, var_index);
        if var_index > 255 || increment > 127 || increment < -128 {
            self.code
                .put_byte(WIDE)
                .put12(IINC, var_index)
                .put_short(increment as u16);
        } else {
            self.code
                .put_byte(IINC)
                .put11(var_index as u8, increment as u8);
        }
        self.update_max_locals(IINC, var_index);
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let source = self.code.len();
        self.code.put_byte(TABLESWITCH).round_up_length();
        self.labels.put(default, &mut self.code, source, true);
        self.code.put_int(min).put_int(max);
        for &label in labels {
            self.labels.put(label, &mut self.code, source, true);
        }
        self.cfg.switch_insn(
            &mut self.labels,
            self.code.len(),
            TABLESWITCH,
            default,
            labels,
        );
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let source = self.code.len();
        self.code.put_byte(LOOKUPSWITCH).round_up_length();
        self.labels.put(default, &mut self.code, source, true);
        self.code.put_int(labels.len() as i32);
        for (&key, &label) in keys.iter().zip(labels) {
            self.code.put_int(key);
            self.labels.put(label, &mut self.code, source, true);
        }
        self.cfg.switch_insn(
            &mut self.labels,
            self.code.len(),
            LOOKUPSWITCH,
            default,
            labels,
        );
        Ok(())
    }

    fn visit_multi_anew_array_insn(
        &mut self,
        descriptor: &str,
        dimensions: u8,
    ) -> Result<(), Error> {
        self.enter_code("instruction")?;
        let class = self.pool.new_class(descriptor)?;
        self.cfg
            .multianewarray_insn(&mut self.labels, descriptor, dimensions);
        self.code.put12(MULTIANEWARRAY, class).put_byte(dimensions);
        Ok(())
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<(), Error> {
        self.enter_code("local variable")?;
        let used = self.local_variables.add_local_variable(
            self.pool,
            &self.labels,
            name,
            descriptor,
            signature,
            start,
            end,
            index,
        )?;
        self.stack_map.update_max_locals(used);
        Ok(())
    }

    fn visit_max_stack(&mut self, max_stack: u16) -> Result<(), Error> {
        self.enter_code("max stack")?;
        if self.code.len() > MAX_CODE_LENGTH {
            return Err(Error::MethodCodeTooLarge(self.code.len()));
        }

        if self.cfg.computes_frames() {
            self.compute_all_frames()?;
        } else {
            self.exception_handling
                .complete_control_flow_graph(&mut self.labels);
            let computed = self.cfg.compute_max_stack_size(&mut self.labels);
            self.stack_map.set_max_stack(computed.max(max_stack as u32));
        }

        self.phase = Phase::Done;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::frame::ObjectHierarchy;
    use crate::jvm::{ClassPath, ClassPathHierarchy};

    fn header(access_flags: MethodAccessFlags, name: &str, descriptor: &str) -> MethodHeader {
        MethodHeader {
            access_flags,
            name: Rc::from(name),
            descriptor: Rc::from(descriptor),
            signature: None,
            exceptions: vec![],
        }
    }

    fn static_method(descriptor: &str) -> MethodHeader {
        header(MethodAccessFlags::STATIC, "m", descriptor)
    }

    #[test]
    fn short_and_wide_variable_forms() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("()V"), false)
                .unwrap();
        writer.visit_var_insn(ILOAD, 2).unwrap();
        writer.visit_var_insn(LSTORE, 7).unwrap();
        writer.visit_var_insn(ALOAD, 300).unwrap();
        writer.visit_iinc_insn(1, 1).unwrap();
        writer.visit_iinc_insn(1, 1000).unwrap();
        assert_eq!(
            writer.code().data(),
            &[
                ILOAD_0 + 2,
                LSTORE,
                7,
                WIDE,
                ALOAD,
                0x01,
                0x2C,
                IINC,
                1,
                1,
                WIDE,
                IINC,
                0,
                1,
                0x03,
                0xE8
            ]
        );
        assert_eq!(writer.max_locals(), 301);
    }

    #[test]
    fn max_stack_in_stack_mode_uses_declared_floor() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("()I"), false)
                .unwrap();
        writer.visit_insn(ICONST_1).unwrap();
        writer.visit_insn(IRETURN).unwrap();
        writer.visit_max_stack(4).unwrap();
        assert_eq!(writer.max_stack(), 4);

        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("()J"), false)
                .unwrap();
        writer.visit_insn(LCONST_1).unwrap();
        writer.visit_insn(LRETURN).unwrap();
        writer.visit_max_stack(0).unwrap();
        assert_eq!(writer.max_stack(), 2);
    }

    #[test]
    fn backward_conditional_jump_is_widened() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("(I)V"), false)
                .unwrap();
        let head = writer.labels().new_label();
        writer.visit_label(head).unwrap();
        for _ in 0..40000 {
            writer.visit_insn(NOP).unwrap();
        }
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_jump_insn(IFEQ, head).unwrap();
        writer.visit_insn(RETURN).unwrap();

        let code = writer.code().data();
        let jump = 40001;
        assert_eq!(code[jump], IFNE);
        assert_eq!(&code[jump + 1..jump + 3], &[0, 8]);
        assert_eq!(code[jump + 3], GOTO_W);
        let offset = i32::from_be_bytes([
            code[jump + 4],
            code[jump + 5],
            code[jump + 6],
            code[jump + 7],
        ]);
        assert_eq!(offset, -(jump as i32 + 3));
        assert_eq!(code[jump + 8], RETURN);
    }

    #[test]
    fn forward_jumps_can_be_wide() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("(I)V"), true)
                .unwrap()
                .with_wide_jumps();
        let exit = writer.labels().new_label();
        let head = writer.labels().new_label();
        writer.visit_label(head).unwrap();
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_jump_insn(IFEQ, exit).unwrap();
        for _ in 0..40000 {
            writer.visit_insn(NOP).unwrap();
        }
        writer.visit_jump_insn(GOTO, head).unwrap();
        writer.visit_label(exit).unwrap();
        writer.visit_insn(RETURN).unwrap();
        writer.visit_max_stack(0).unwrap();

        let code = writer.code().data();
        assert_eq!(&code[1..4], &[IFNE, 0, 8]);
        assert_eq!(code[4], GOTO_W);
        let exit_position = 9 + 40000 + 5;
        assert_eq!(&code[5..9], &(exit_position as i32 - 4).to_be_bytes());

        // The backward jump is far too, but it is already known to be
        let back = 9 + 40000;
        assert_eq!(code[back], GOTO_W);
        assert_eq!(&code[back + 1..back + 5], &(-(back as i32)).to_be_bytes());
        assert_eq!(code[exit_position], RETURN);
        assert!(writer.finish().is_ok());
    }

    #[test]
    fn narrow_forward_jumps_overflow() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("(I)V"), false)
                .unwrap();
        let exit = writer.labels().new_label();
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_jump_insn(IFEQ, exit).unwrap();
        for _ in 0..40000 {
            writer.visit_insn(NOP).unwrap();
        }
        assert!(matches!(
            writer.visit_label(exit),
            Err(Error::BranchOffsetOverflow(40000..=40010))
        ));
    }

    #[test]
    fn switch_operands_are_aligned() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("(I)V"), false)
                .unwrap();
        let default = writer.labels().new_label();
        let case = writer.labels().new_label();
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer
            .visit_table_switch_insn(0, 0, default, &[case])
            .unwrap();
        writer.visit_label(case).unwrap();
        writer.visit_label(default).unwrap();
        writer.visit_insn(RETURN).unwrap();

        let code = writer.code().data();
        assert_eq!(code[1], TABLESWITCH);
        assert_eq!(&code[2..4], &[0, 0]);
        // default, low, high, one case, all relative to the opcode at offset 1
        assert_eq!(&code[4..8], &19i32.to_be_bytes());
        assert_eq!(&code[8..16], &[0; 8]);
        assert_eq!(&code[16..20], &19i32.to_be_bytes());
        assert_eq!(code.len(), 21);
    }

    #[test]
    fn frames_are_computed_for_loops() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("(I)I"), true)
                .unwrap();
        let head = writer.labels().new_label();
        let exit = writer.labels().new_label();

        writer.visit_insn(ICONST_0).unwrap();
        writer.visit_var_insn(ISTORE, 1).unwrap();
        writer.visit_label(head).unwrap();
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_jump_insn(IFLE, exit).unwrap();
        writer.visit_var_insn(ILOAD, 1).unwrap();
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_insn(IADD).unwrap();
        writer.visit_var_insn(ISTORE, 1).unwrap();
        writer.visit_iinc_insn(0, -1).unwrap();
        writer.visit_jump_insn(GOTO, head).unwrap();
        writer.visit_label(exit).unwrap();
        writer.visit_var_insn(ILOAD, 1).unwrap();
        writer.visit_insn(IRETURN).unwrap();
        writer.visit_max_stack(0).unwrap();

        assert_eq!(writer.max_stack(), 2);
        assert_eq!(writer.max_locals(), 2);
        let method = writer.finish().unwrap();
        let bytes = method.data();

        // access, name, descriptor, one attribute (Code)
        assert_eq!(&bytes[0..2], &[0, 8]);
        assert_eq!(&bytes[6..8], &[0, 1]);
        let code_length = u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]);
        assert_eq!(code_length, 18);
        let attribute_length = u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        assert_eq!(attribute_length as usize, bytes.len() - 14);

        // No handlers, then one attribute: the StackMapTable with frames at `head` and `exit`
        let after_code = 22 + code_length as usize;
        assert_eq!(&bytes[after_code..after_code + 4], &[0, 0, 0, 1]);
        let frame_count = &bytes[after_code + 10..after_code + 12];
        assert_eq!(frame_count, &[0, 2]);
    }

    /// `static Number m(boolean b) { return b ? Integer.valueOf(1) : Long.valueOf(2); }`
    fn boxed_number_frames(hierarchy: &dyn ClassHierarchy) -> (Vec<u8>, ConstantPool) {
        let mut pool = ConstantPool::new();
        let mut writer = MethodWriter::new(
            &mut pool,
            hierarchy,
            "A",
            static_method("(Z)Ljava/lang/Number;"),
            true,
        )
        .unwrap();
        let long = writer.labels().new_label();
        let end = writer.labels().new_label();

        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_jump_insn(IFEQ, long).unwrap();
        writer.visit_insn(ICONST_1).unwrap();
        writer
            .visit_method_insn(
                INVOKESTATIC,
                "java/lang/Integer",
                "valueOf",
                "(I)Ljava/lang/Integer;",
                false,
            )
            .unwrap();
        writer.visit_jump_insn(GOTO, end).unwrap();
        writer.visit_label(long).unwrap();
        writer.visit_insn(ICONST_2).unwrap();
        writer.visit_insn(I2L).unwrap();
        writer
            .visit_method_insn(
                INVOKESTATIC,
                "java/lang/Long",
                "valueOf",
                "(J)Ljava/lang/Long;",
                false,
            )
            .unwrap();
        writer.visit_label(end).unwrap();
        writer.visit_insn(ARETURN).unwrap();
        writer.visit_max_stack(0).unwrap();
        let method = writer.finish().unwrap().into_inner();
        (method, pool)
    }

    #[test]
    fn merged_references_use_the_common_super_class() {
        let hierarchy = ClassPathHierarchy::new(ClassPath::new());
        hierarchy.insert("java/lang/Integer", Some("java/lang/Number"), false);
        hierarchy.insert("java/lang/Long", Some("java/lang/Number"), false);
        hierarchy.insert("java/lang/Number", Some("java/lang/Object"), false);

        // The last frame is `same_locals_1_stack_item` with the merged branch results
        let (method, mut pool) = boxed_number_frames(&hierarchy);
        let number = pool.new_class("java/lang/Number").unwrap();
        let last_frame = &method[method.len() - 4..];
        assert!((64..128).contains(&last_frame[0]));
        assert_eq!(&last_frame[1..], &[7, (number >> 8) as u8, number as u8]);

        let (method, mut pool) = boxed_number_frames(&ObjectHierarchy);
        let object = pool.new_class("java/lang/Object").unwrap();
        assert_eq!(
            &method[method.len() - 3..],
            &[7, (object >> 8) as u8, object as u8]
        );
    }

    #[test]
    fn events_after_max_stack_are_rejected() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("()V"), false)
                .unwrap();
        writer.visit_insn(RETURN).unwrap();
        writer.visit_max_stack(0).unwrap();
        assert!(matches!(
            writer.visit_insn(NOP),
            Err(Error::UnexpectedVisit { phase: "done", .. })
        ));
        assert!(matches!(
            writer.visit_annotation("LA;"),
            Err(Error::UnexpectedVisit { .. })
        ));
    }

    #[test]
    fn unfinished_code_is_rejected() {
        let mut pool = ConstantPool::new();
        let mut writer =
            MethodWriter::new(&mut pool, &ObjectHierarchy, "A", static_method("()V"), false)
                .unwrap();
        writer.visit_insn(RETURN).unwrap();
        assert!(matches!(
            writer.finish(),
            Err(Error::UnexpectedVisit { phase: "code", .. })
        ));
    }

    #[test]
    fn abstract_methods_have_only_declared_attributes() {
        let mut pool = ConstantPool::new();
        let mut method = header(MethodAccessFlags::ABSTRACT, "run", "()V");
        method.exceptions = vec![Rc::from("java/io/IOException")];
        method.signature = Some(Rc::from("<T:Ljava/lang/Object;>()V"));
        let writer = MethodWriter::new(&mut pool, &ObjectHierarchy, "A", method, false).unwrap();
        let bytes = writer.finish().unwrap();
        let bytes = bytes.data();
        assert_eq!(&bytes[6..8], &[0, 2]);
        // Exceptions (2 + 4 + 2 + 2) then Signature (2 + 4 + 2)
        assert_eq!(bytes.len(), 8 + 10 + 8);
    }
}
