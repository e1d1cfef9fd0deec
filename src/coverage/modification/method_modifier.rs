use crate::coverage::data::FileCoverageData;
use crate::coverage::modification::cfg_tracking::CfgTracking;
use crate::jvm::class_file::{ConstValue, Handle};
use crate::jvm::code::{Label, Labels, MethodVisitor, MethodWriter};
use crate::jvm::opcodes::*;
use crate::jvm::{ByteVector, Error};

/// Class holding the static methods that probes call
pub const DATA_RECORDING_CLASS: &str = "mockit/coverage/TestRun";

const STATIC_FIELD_HOOK: &str = "(Ljava/lang/String;Ljava/lang/String;)V";
const INSTANCE_FIELD_HOOK: &str = "(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)V";

/// Method visitor adding coverage probes to the code it forwards to a [`MethodWriter`]
///
/// Each line gets a `lineExecuted` call at its start, each side of a conditional jump gets a
/// `branchExecuted` call, and accesses to fields with coverage data get a `fieldRead` or
/// `fieldAssigned` call.
pub struct MethodModifier<'w, 'a> {
    writer: MethodWriter<'w>,
    source_file_name: &'a str,
    file_data: &'a FileCoverageData,
    cfg_tracking: CfgTracking<'a>,
    found_interesting_instruction: bool,
    current_line: u32,
}

impl<'w, 'a> MethodModifier<'w, 'a> {
    pub fn new(
        writer: MethodWriter<'w>,
        source_file_name: &'a str,
        file_data: &'a FileCoverageData,
    ) -> MethodModifier<'w, 'a> {
        MethodModifier {
            writer,
            source_file_name,
            file_data,
            cfg_tracking: CfgTracking::new(&file_data.line_coverage),
            found_interesting_instruction: false,
            current_line: 0,
        }
    }

    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    /// Settle the lines of the branches found, and serialize the rewritten method
    pub fn finish(mut self) -> Result<ByteVector, Error> {
        self.cfg_tracking
            .resolve_branch_lines(MethodVisitor::labels(&mut self.writer));
        self.writer.finish()
    }

    fn file_index(&self) -> i32 {
        self.file_data.index as i32
    }

    fn push_current_line(&mut self) -> Result<(), Error> {
        if self.current_line <= i16::MAX as u32 {
            self.writer
                .visit_int_insn(SIPUSH, self.current_line as i32)
        } else {
            self.writer
                .visit_ldc_insn(&ConstValue::Integer(self.current_line as i32))
        }
    }

    fn generate_call_to_register_line_execution(&mut self) -> Result<(), Error> {
        self.writer.visit_int_insn(SIPUSH, self.file_index())?;
        self.push_current_line()?;
        self.writer.visit_method_insn(
            INVOKESTATIC,
            DATA_RECORDING_CLASS,
            "lineExecuted",
            "(II)V",
            false,
        )
    }

    fn generate_calls_to_register_branch_target_execution(
        &mut self,
        branch_indices: Vec<usize>,
    ) -> Result<(), Error> {
        for branch_index in branch_indices {
            self.writer.visit_int_insn(SIPUSH, self.file_index())?;
            self.push_current_line()?;
            self.writer.visit_int_insn(SIPUSH, branch_index as i32)?;
            self.writer.visit_method_insn(
                INVOKESTATIC,
                DATA_RECORDING_CLASS,
                "branchExecuted",
                "(III)V",
                false,
            )?;
        }
        Ok(())
    }

    fn generate_call_to_register_branch_target_execution_if_pending(
        &mut self,
    ) -> Result<(), Error> {
        let pending = self.cfg_tracking.take_pending_branches(self.current_line);
        self.generate_calls_to_register_branch_target_execution(pending)
    }

    /// Copy the owning instance of an instance field under the operands of the field instruction
    fn generate_code_to_save_instance_reference_on_the_stack(
        &mut self,
        get_field: bool,
        size2: bool,
    ) -> Result<(), Error> {
        if get_field {
            return self.writer.visit_insn(DUP);
        }

        // ..., instance, value => ..., instance, instance, value
        if size2 {
            self.writer.visit_insn(DUP2_X1)?;
            self.writer.visit_insn(POP2)?;
            self.writer.visit_insn(DUP_X2)?;
            self.writer.visit_insn(DUP_X2)?;
        } else {
            self.writer.visit_insn(DUP_X1)?;
            self.writer.visit_insn(POP)?;
            self.writer.visit_insn(DUP_X1)?;
            self.writer.visit_insn(DUP_X1)?;
        }
        self.writer.visit_insn(POP)
    }

    fn generate_call_to_register_field_coverage(
        &mut self,
        get_field: bool,
        is_static: bool,
        size2: bool,
        class_and_field: &str,
    ) -> Result<(), Error> {
        // ..., instance, value => ..., value, instance
        if !is_static && get_field {
            if size2 {
                self.writer.visit_insn(DUP2_X1)?;
                self.writer.visit_insn(POP2)?;
            } else {
                self.writer.visit_insn(DUP_X1)?;
                self.writer.visit_insn(POP)?;
            }
        }

        self.writer
            .visit_ldc_insn(&ConstValue::String(self.source_file_name.to_owned()))?;
        self.writer
            .visit_ldc_insn(&ConstValue::String(class_and_field.to_owned()))?;

        let hook = if get_field { "fieldRead" } else { "fieldAssigned" };
        let descriptor = if is_static {
            STATIC_FIELD_HOOK
        } else {
            INSTANCE_FIELD_HOOK
        };
        self.writer
            .visit_method_insn(INVOKESTATIC, DATA_RECORDING_CLASS, hook, descriptor, false)
    }
}

fn is_default_return_value(opcode: u8) -> bool {
    matches!(
        opcode,
        ACONST_NULL | ICONST_0 | LCONST_0 | FCONST_0 | DCONST_0
    )
}

impl<'w, 'a> MethodVisitor for MethodModifier<'w, 'a> {
    fn labels(&mut self) -> &mut Labels {
        self.writer.labels()
    }

    fn visit_annotation(&mut self, descriptor: &str) -> Result<(), Error> {
        let is_test_method =
            descriptor.starts_with("Lorg/junit/") || descriptor.starts_with("Lorg/testng/");
        if is_test_method {
            return Err(Error::VisitInterrupted);
        }
        self.writer.visit_annotation(descriptor)
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer
            .visit_try_catch_block(start, end, handler, catch_type)
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        self.writer.visit_label(label)?;
        self.cfg_tracking
            .after_new_label(self.current_line, label, self.writer.labels());
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        let line = line as u32;
        self.file_data.line_coverage.add_line(line);
        self.current_line = line;
        self.cfg_tracking.start_new_line();
        self.generate_call_to_register_line_execution()?;
        self.writer.visit_line_number(line as u16, start)
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<(), Error> {
        let is_return = (IRETURN..=RETURN).contains(&opcode);
        if !is_return && !is_default_return_value(opcode) {
            self.found_interesting_instruction = true;
        }

        if is_return
            && !self.found_interesting_instruction
            && self.cfg_tracking.has_only_one_label_being_visited()
        {
            self.file_data
                .line_coverage
                .mark_line_as_unreachable(self.current_line);
        } else {
            let pending = self
                .cfg_tracking
                .before_no_operand_instruction(opcode, self.current_line);
            self.generate_calls_to_register_branch_target_execution(pending)?;
        }

        self.writer.visit_insn(opcode)
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<(), Error> {
        self.found_interesting_instruction = true;
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer.visit_int_insn(opcode, operand)
    }

    fn visit_var_insn(&mut self, opcode: u8, var_index: u16) -> Result<(), Error> {
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer.visit_var_insn(opcode, var_index)
    }

    fn visit_type_insn(&mut self, opcode: u8, class: &str) -> Result<(), Error> {
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer.visit_type_insn(opcode, class)
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        let get_field = opcode == GETSTATIC || opcode == GETFIELD;
        let is_static = opcode == PUTSTATIC || opcode == GETSTATIC;
        let size2 = descriptor.starts_with('J') || descriptor.starts_with('D');

        let mut class_and_field = None;
        if !owner.starts_with("java/") {
            let simple_owner = owner.rsplit('/').next().unwrap_or(owner);
            let candidate = format!("{}.{}", simple_owner, name);
            if self
                .file_data
                .data_coverage
                .is_field_with_coverage_data(&candidate)
            {
                if !is_static {
                    self.generate_code_to_save_instance_reference_on_the_stack(get_field, size2)?;
                }
                class_and_field = Some(candidate);
            }
        }

        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer
            .visit_field_insn(opcode, owner, name, descriptor)?;

        if opcode == GETSTATIC && name == "$assertionsDisabled" {
            self.cfg_tracking.register_assert_found_in_current_line();
        }

        if let Some(class_and_field) = class_and_field {
            self.generate_call_to_register_field_coverage(
                get_field,
                is_static,
                size2,
                &class_and_field,
            )?;
        }
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
        // The static initializer of a class with `assert` statements asks for the assertion
        // status, on a line that would otherwise always look partially covered
        if opcode == INVOKEVIRTUAL && owner == "java/lang/Class" && name == "desiredAssertionStatus"
        {
            self.cfg_tracking.register_assert_found_in_current_line();
        }

        if opcode != INVOKESPECIAL || descriptor != "()V" {
            self.found_interesting_instruction = true;
        }

        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer
            .visit_method_insn(opcode, owner, name, descriptor, is_interface)?;
        self.cfg_tracking
            .after_method_instruction(opcode, owner, name);
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[ConstValue],
    ) -> Result<(), Error> {
        self.writer.visit_invoke_dynamic_insn(
            name,
            descriptor,
            bootstrap_method,
            bootstrap_arguments,
        )
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<(), Error> {
        let jump_source = self.writer.current_block();
        self.writer.visit_jump_insn(opcode, label)?;

        if opcode == GOTO {
            self.cfg_tracking.after_goto();
        } else if let Some(jump_source) = jump_source {
            let pending = self.cfg_tracking.after_conditional_jump(
                self.current_line,
                self.writer.labels(),
                jump_source,
                label,
            );
            self.generate_calls_to_register_branch_target_execution(pending)?;
        }
        Ok(())
    }

    fn visit_ldc_insn(&mut self, value: &ConstValue) -> Result<(), Error> {
        self.found_interesting_instruction = true;
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer.visit_ldc_insn(value)
    }

    fn visit_iinc_insn(&mut self, var_index: u16, increment: i16) -> Result<(), Error> {
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer.visit_iinc_insn(var_index, increment)
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<(), Error> {
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer
            .visit_table_switch_insn(min, max, default, labels)
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<(), Error> {
        self.cfg_tracking.before_lookup_switch_instruction();
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer.visit_lookup_switch_insn(default, keys, labels)
    }

    fn visit_multi_anew_array_insn(
        &mut self,
        descriptor: &str,
        dimensions: u8,
    ) -> Result<(), Error> {
        self.generate_call_to_register_branch_target_execution_if_pending()?;
        self.writer
            .visit_multi_anew_array_insn(descriptor, dimensions)
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
        self.writer
            .visit_local_variable(name, descriptor, signature, start, end, index)
    }

    fn visit_max_stack(&mut self, max_stack: u16) -> Result<(), Error> {
        if max_stack > 1 {
            self.file_data
                .line_coverage
                .mark_line_as_reachable(self.current_line);
        }
        self.writer.visit_max_stack(max_stack)
    }
}
