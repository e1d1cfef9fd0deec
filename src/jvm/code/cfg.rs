use crate::jvm::class_file::ConstValue;
use crate::jvm::code::frame::{BlockFrame, ClassHierarchy, Frame, FrameInsn};
use crate::jvm::code::label::{Edge, EdgeKind, Label, Labels};
use crate::jvm::code::types::{ComputedType, VerificationType};
use crate::jvm::descriptors::{self, FieldType, ParseDescriptor};
use crate::jvm::opcodes::*;
use crate::jvm::{ByteVector, Error};
use std::collections::HashSet;
use std::rc::Rc;

/// Control flow graph of a method, built up while its instructions are written
///
/// There is one node per basic block, represented by the label of its first instruction, and one
/// edge per jump (or fall-through, or exception handler) between blocks. Blocks are also chained
/// together in the order they were visited through [`LabelData::successor`].
///
/// The graph serves to compute the maximum stack size. In stack mode only the relative stack size
/// changes of each block are tracked. In frame mode, the instructions of each block are recorded
/// so that the types of locals and stack entries can be computed for every block, which yields
/// both the maximum stack size and the frames of the `StackMapTable`.
///
/// [`LabelData::successor`]: crate::jvm::code::label::LabelData
#[derive(Debug)]
pub struct CfgAnalysis {
    compute_frames: bool,
    first_block: Label,
    previous_block: Option<Label>,

    /// `None` after an unconditional transfer of control, until the next label
    current_block: Option<Label>,

    /// Stack size after the last instruction, relative to the start of the current block
    stack_size: i32,

    /// Maximum of `stack_size` in the current block
    max_stack_size: i32,
}

impl CfgAnalysis {
    pub fn new(
        labels: &mut Labels,
        code: &mut ByteVector,
        compute_frames: bool,
    ) -> Result<CfgAnalysis, Error> {
        let first_block = labels.new_label();
        labels.mark_pushed(first_block);
        let mut cfg = CfgAnalysis {
            compute_frames,
            first_block,
            previous_block: None,
            current_block: None,
            stack_size: 0,
            max_stack_size: 0,
        };
        cfg.visit_label(labels, code, first_block)?;
        Ok(cfg)
    }

    pub fn first_block(&self) -> Label {
        self.first_block
    }

    pub fn current_block(&self) -> Option<Label> {
        self.current_block
    }

    pub fn computes_frames(&self) -> bool {
        self.compute_frames
    }

    fn record(&self, labels: &mut Labels, insn: FrameInsn) {
        if let Some(current) = self.current_block {
            if let Some(frame) = labels.get_mut(current).frame.as_mut() {
                frame.insns.push(insn);
            }
        }
    }

    fn update_stack_size(&mut self, size_variation: i32) {
        self.stack_size += size_variation;
        self.max_stack_size = self.max_stack_size.max(self.stack_size);
    }

    fn add_successor(&self, labels: &mut Labels, kind: EdgeKind, successor: Label) {
        if let Some(current) = self.current_block {
            labels
                .get_mut(current)
                .edges
                .push(Edge { kind, successor });
        }
    }

    /// End the current block, which has no successor (return, throw, goto, switch)
    fn no_successor(&mut self, labels: &mut Labels, code_len: usize) {
        if self.compute_frames {
            let label = labels.new_label();
            labels.get_mut(label).frame = Some(Box::default());
            labels.resolve_at(label, code_len);
            if let Some(previous) = self.previous_block {
                labels.get_mut(previous).successor = Some(label);
            }
            self.previous_block = Some(label);
        } else if let Some(current) = self.current_block {
            labels.get_mut(current).output_stack_max = self.max_stack_size;
        }
        self.current_block = None;
    }

    pub fn zero_operand_insn(&mut self, labels: &mut Labels, code_len: usize, opcode: u8) {
        if self.current_block.is_none() {
            return;
        }
        if self.compute_frames {
            self.record(labels, FrameInsn::Insn(opcode));
        } else {
            self.update_stack_size(stack_size_delta(opcode).unwrap_or(0));
        }
        if is_return(opcode) || opcode == ATHROW {
            self.no_successor(labels, code_len);
        }
    }

    pub fn int_operand_insn(&mut self, labels: &mut Labels, opcode: u8, operand: i32) {
        if self.current_block.is_none() {
            return;
        }
        if self.compute_frames {
            self.record(labels, FrameInsn::Int(opcode, operand));
        } else if opcode != NEWARRAY {
            self.update_stack_size(1);
        }
    }

    pub fn var_insn(&mut self, labels: &mut Labels, opcode: u8, var_index: u16) {
        if self.current_block.is_none() {
            return;
        }
        if self.compute_frames {
            self.record(labels, FrameInsn::Var(opcode, var_index));
        } else {
            self.update_stack_size(stack_size_delta(opcode).unwrap_or(0));
        }
    }

    pub fn type_insn(&mut self, labels: &mut Labels, opcode: u8, class: &str, offset: usize) {
        if self.current_block.is_none() {
            return;
        }
        if self.compute_frames {
            self.record(
                labels,
                FrameInsn::Type {
                    opcode,
                    class: Rc::from(class),
                    offset: offset as u32,
                },
            );
        } else if opcode == NEW {
            self.update_stack_size(1);
        }
    }

    pub fn field_insn(
        &mut self,
        labels: &mut Labels,
        opcode: u8,
        descriptor: &str,
    ) -> Result<(), Error> {
        if self.current_block.is_none() {
            return Ok(());
        }
        if self.compute_frames {
            self.record(
                labels,
                FrameInsn::Field {
                    opcode,
                    descriptor: Rc::from(descriptor),
                },
            );
        } else {
            let double_size = descriptors::field_width(descriptor) == 2;
            let size_variation = match opcode {
                GETSTATIC if double_size => 2,
                GETSTATIC => 1,
                PUTSTATIC if double_size => -2,
                PUTSTATIC => -1,
                GETFIELD if double_size => 1,
                GETFIELD => 0,
                PUTFIELD if double_size => -3,
                PUTFIELD => -2,
                other => return Err(Error::FieldAccessOpcode(other)),
            };
            self.update_stack_size(size_variation);
        }
        Ok(())
    }

    pub fn invoke_insn(
        &mut self,
        labels: &mut Labels,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        if self.current_block.is_none() {
            return Ok(());
        }
        if self.compute_frames {
            self.record(
                labels,
                FrameInsn::Invoke {
                    opcode,
                    owner: Rc::from(owner),
                    is_init: name == "<init>",
                    descriptor: Rc::from(descriptor),
                },
            );
        } else {
            let arg_size = descriptors::arguments_and_return_sizes(descriptor)? as i32;
            let mut size_variation = -(arg_size >> 2) + (arg_size & 0x03);
            if opcode == INVOKESTATIC || opcode == INVOKEDYNAMIC {
                size_variation += 1;
            }
            self.update_stack_size(size_variation);
        }
        Ok(())
    }

    /// Record a jump, returning the label to place right after it (if frames are computed and the
    /// jump is conditional)
    pub fn jump_insn(&mut self, labels: &mut Labels, opcode: u8, label: Label) -> Option<Label> {
        self.current_block?;
        if self.compute_frames {
            self.record(labels, FrameInsn::Insn(opcode));
            let first = labels.first(label);
            labels.mark_target(first);
            self.add_successor(labels, EdgeKind::Normal, label);
            if opcode != GOTO {
                return Some(labels.new_label());
            }
        } else {
            // Jumps only pop, so the maximum is unaffected
            self.stack_size += stack_size_delta(opcode).unwrap_or(0);
            self.add_successor(labels, EdgeKind::StackSize(self.stack_size), label);
        }
        None
    }

    /// Update the current block once a jump instruction has been written
    pub fn after_jump(
        &mut self,
        labels: &mut Labels,
        code: &mut ByteVector,
        opcode: u8,
        next_insn: Option<Label>,
    ) -> Result<(), Error> {
        if self.current_block.is_some() {
            if let Some(next_insn) = next_insn {
                self.visit_label(labels, code, next_insn)?;
            }
            if opcode == GOTO {
                self.no_successor(labels, code.len());
            }
        }
        Ok(())
    }

    /// Place a label at the current position, starting a new basic block unless it is a debug label
    pub fn visit_label(
        &mut self,
        labels: &mut Labels,
        code: &mut ByteVector,
        label: Label,
    ) -> Result<(), Error> {
        labels.resolve(label, code)?;
        if labels.is_debug(label) {
            return Ok(());
        }

        if self.compute_frames {
            if let Some(current) = self.current_block {
                if labels.position(label) == labels.position(current) {
                    // Successive labels, do not start a new basic block
                    labels.absorb_target(current, label);
                    labels.get_mut(label).first = Some(current);
                    return Ok(());
                }
                self.add_successor(labels, EdgeKind::Normal, label);
            }

            self.current_block = Some(label);
            if labels.get(label).frame.is_none() {
                labels.get_mut(label).frame = Some(Box::new(BlockFrame::default()));
            }

            if let Some(previous) = self.previous_block {
                if labels.position(label) == labels.position(previous) {
                    labels.absorb_target(previous, label);
                    let data = labels.get_mut(label);
                    data.frame = None;
                    data.first = Some(previous);
                    self.current_block = Some(previous);
                    return Ok(());
                }
                labels.get_mut(previous).successor = Some(label);
            }
        } else {
            if let Some(current) = self.current_block {
                labels.get_mut(current).output_stack_max = self.max_stack_size;
                self.add_successor(labels, EdgeKind::StackSize(self.stack_size), label);
            }

            self.current_block = Some(label);
            self.stack_size = 0;
            self.max_stack_size = 0;

            if let Some(previous) = self.previous_block {
                labels.get_mut(previous).successor = Some(label);
            }
        }

        self.previous_block = Some(label);
        Ok(())
    }

    pub fn ldc_insn(&mut self, labels: &mut Labels, value: &ConstValue) -> Result<(), Error> {
        if self.current_block.is_none() {
            return Ok(());
        }
        if self.compute_frames {
            let pushed = match value {
                ConstValue::Integer(_) => vec![VerificationType::Integer],
                ConstValue::Float(_) => vec![VerificationType::Float],
                ConstValue::Long(_) => vec![VerificationType::Long, VerificationType::Top],
                ConstValue::Double(_) => vec![VerificationType::Double, VerificationType::Top],
                ConstValue::String(_) => vec![ComputedType::object("java/lang/String")],
                ConstValue::Class(_) => vec![ComputedType::object("java/lang/Class")],
                ConstValue::MethodType(_) => {
                    vec![ComputedType::object("java/lang/invoke/MethodType")]
                }
                ConstValue::MethodHandle(_) => {
                    vec![ComputedType::object("java/lang/invoke/MethodHandle")]
                }
                ConstValue::Dynamic(dynamic) => {
                    ComputedType::slots_of(&FieldType::parse(&dynamic.descriptor)?)
                }
            };
            self.record(labels, FrameInsn::Push(pushed));
        } else {
            self.update_stack_size(if value.is_wide() { 2 } else { 1 });
        }
        Ok(())
    }

    pub fn iinc_insn(&mut self, labels: &mut Labels, var_index: u16) {
        if self.current_block.is_some() && self.compute_frames {
            self.record(labels, FrameInsn::Iinc(var_index));
        }
    }

    pub fn switch_insn(
        &mut self,
        labels: &mut Labels,
        code_len: usize,
        opcode: u8,
        default: Label,
        cases: &[Label],
    ) {
        if self.current_block.is_none() {
            return;
        }
        if self.compute_frames {
            self.record(labels, FrameInsn::Insn(opcode));
            for &label in std::iter::once(&default).chain(cases) {
                self.add_successor(labels, EdgeKind::Normal, label);
                let first = labels.first(label);
                labels.mark_target(first);
            }
        } else {
            self.stack_size -= 1;
            for &label in std::iter::once(&default).chain(cases) {
                self.add_successor(labels, EdgeKind::StackSize(self.stack_size), label);
            }
        }
        self.no_successor(labels, code_len);
    }

    pub fn multianewarray_insn(&mut self, labels: &mut Labels, descriptor: &str, dimensions: u8) {
        if self.current_block.is_none() {
            return;
        }
        if self.compute_frames {
            self.record(
                labels,
                FrameInsn::MultiANewArray {
                    descriptor: Rc::from(descriptor),
                    dimensions,
                },
            );
        } else {
            self.stack_size += 1 - dimensions as i32;
        }
    }

    /// Compute the maximum stack size from the relative stack sizes of the blocks
    ///
    /// Blocks are explored depth-first from the first block. Each block gets its absolute input
    /// stack size the first time it is reached. Exception handlers always start with just the
    /// exception on the stack.
    pub fn compute_max_stack_size(&self, labels: &mut Labels) -> u32 {
        let mut max = 0;
        let mut stack = vec![self.first_block];

        while let Some(label) = stack.pop() {
            let start = labels.get(label).input_stack_top;
            max = max.max(start + labels.get(label).output_stack_max);

            for edge in labels.get(label).edges.clone() {
                let successor = edge.successor;
                if !labels.is_pushed(successor) {
                    labels.get_mut(successor).input_stack_top = match edge.kind {
                        EdgeKind::Exception => 1,
                        EdgeKind::StackSize(size) => start + size,
                        _ => start,
                    };
                    labels.mark_pushed(successor);
                    stack.push(successor);
                }
            }
        }

        max.max(0) as u32
    }

    /// Compute the input frame of every reachable block, returning the maximum stack size
    ///
    /// This is a fix-point: starting from the first block, every block whose input frame changed
    /// is simulated again and its output merged into its successors, until nothing changes.
    /// Reachable jump targets get marked as needing a frame in the `StackMapTable`.
    pub fn compute_max_stack_size_from_frames(
        &self,
        labels: &mut Labels,
        initial_frame: Frame,
        this_class: &Rc<str>,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<u32, Error> {
        if let Some(block) = labels.get_mut(self.first_block).frame.as_mut() {
            block.input = Some(initial_frame);
        }

        let mut max = 0;
        let mut changed = vec![self.first_block];
        let mut queued: HashSet<Label> = changed.iter().copied().collect();

        while let Some(label) = changed.pop() {
            queued.remove(&label);

            if labels.is_target(label) {
                labels.mark_storing_frame(label);
            }
            labels.mark_reachable(label);

            let (input, output, block_max) = {
                let block = labels.get(label).frame.as_ref().ok_or(Error::UnresolvedLabel)?;
                let input = block.input.clone().unwrap_or_default();
                let mut output = input.clone();
                let mut block_max = output.stack.len();
                for insn in &block.insns {
                    output.execute(insn, this_class)?;
                    block_max = block_max.max(output.stack.len());
                }
                (input, output, block_max)
            };
            max = max.max(block_max);

            for edge in labels.get(label).edges.clone() {
                let successor = labels.first(edge.successor);
                let incoming = match &edge.kind {
                    EdgeKind::Catch(class) => Frame {
                        locals: input.locals.clone(),
                        stack: vec![VerificationType::Object(class.clone())],
                    },
                    _ => output.clone(),
                };

                if !labels.is_resolved(successor) {
                    return Err(Error::UnresolvedLabel);
                }
                let block = labels
                    .get_mut(successor)
                    .frame
                    .get_or_insert_with(Box::default);
                if incoming.merge_into(&mut block.input, hierarchy)? && queued.insert(successor) {
                    changed.push(successor);
                }
            }
        }

        Ok(max as u32)
    }

    /// Blocks in the order they were visited
    pub fn blocks<'a>(&self, labels: &'a Labels) -> impl Iterator<Item = Label> + 'a {
        std::iter::successors(Some(self.first_block), move |&label| {
            labels.get(label).successor
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::frame::ObjectHierarchy;

    fn emit(code: &mut ByteVector, opcode: u8) {
        code.put_byte(opcode);
    }

    #[test]
    fn stack_mode_straight_line() {
        let mut labels = Labels::new();
        let mut code = ByteVector::new();
        let mut cfg = CfgAnalysis::new(&mut labels, &mut code, false).unwrap();

        for op in [ICONST_1, ICONST_1, IADD] {
            cfg.zero_operand_insn(&mut labels, code.len(), op);
            emit(&mut code, op);
        }
        cfg.invoke_insn(&mut labels, INVOKESTATIC, "A", "m", "(I)J").unwrap();
        emit(&mut code, INVOKESTATIC);
        cfg.zero_operand_insn(&mut labels, code.len(), LRETURN);
        emit(&mut code, LRETURN);

        assert_eq!(cfg.current_block(), None);
        assert_eq!(cfg.compute_max_stack_size(&mut labels), 2);
    }

    #[test]
    fn stack_mode_branches_and_handlers() {
        let mut labels = Labels::new();
        let mut code = ByteVector::new();
        let mut cfg = CfgAnalysis::new(&mut labels, &mut code, false).unwrap();
        let handler = labels.new_label();
        let target = labels.new_label();

        // iload_0; ifeq target; lconst_0; lconst_0; pop2; pop2; target: return
        cfg.var_insn(&mut labels, ILOAD, 0);
        emit(&mut code, 26);
        let next = cfg.jump_insn(&mut labels, IFEQ, target);
        assert!(next.is_none());
        emit(&mut code, IFEQ);
        let at = code.len() - 1;
        labels.put(target, &mut code, at, false);
        cfg.after_jump(&mut labels, &mut code, IFEQ, next).unwrap();
        for op in [LCONST_0, LCONST_0, POP2, POP2] {
            cfg.zero_operand_insn(&mut labels, code.len(), op);
            emit(&mut code, op);
        }
        cfg.visit_label(&mut labels, &mut code, target).unwrap();
        cfg.zero_operand_insn(&mut labels, code.len(), RETURN);
        emit(&mut code, RETURN);

        // Handler block: astore_1, aload_1, aload_1, athrow
        cfg.visit_label(&mut labels, &mut code, handler).unwrap();
        cfg.var_insn(&mut labels, ASTORE, 1);
        cfg.var_insn(&mut labels, ALOAD, 1);
        cfg.var_insn(&mut labels, ALOAD, 1);
        cfg.zero_operand_insn(&mut labels, code.len(), ATHROW);

        let first = cfg.first_block();
        labels.get_mut(first).edges.push(Edge {
            kind: EdgeKind::Exception,
            successor: handler,
        });

        assert_eq!(cfg.compute_max_stack_size(&mut labels), 4);
        assert_eq!(labels.get(handler).input_stack_top, 1);
        assert_eq!(labels.get(target).input_stack_top, 0);
    }

    #[test]
    fn frame_mode_merges_successive_labels() {
        let mut labels = Labels::new();
        let mut code = ByteVector::new();
        let mut cfg = CfgAnalysis::new(&mut labels, &mut code, true).unwrap();
        let first = cfg.first_block();

        let l1 = labels.new_label();
        let l2 = labels.new_label();
        cfg.visit_label(&mut labels, &mut code, l1).unwrap();
        cfg.visit_label(&mut labels, &mut code, l2).unwrap();
        assert_eq!(labels.first(l1), first);
        assert_eq!(labels.first(l2), first);

        cfg.zero_operand_insn(&mut labels, code.len(), RETURN);
        emit(&mut code, RETURN);
        assert_eq!(cfg.current_block(), None);
        assert_eq!(cfg.blocks(&labels).count(), 2);
    }

    #[test]
    fn frame_mode_loop() {
        // static int f(int n) { int s = 0; while (n > 0) { s += n; n--; } return s; }
        let mut labels = Labels::new();
        let mut code = ByteVector::new();
        let mut cfg = CfgAnalysis::new(&mut labels, &mut code, true).unwrap();
        let head = labels.new_label();
        let exit = labels.new_label();

        cfg.zero_operand_insn(&mut labels, code.len(), ICONST_0);
        emit(&mut code, ICONST_0);
        cfg.var_insn(&mut labels, ISTORE, 1);
        emit(&mut code, 60);

        cfg.visit_label(&mut labels, &mut code, head).unwrap();
        cfg.var_insn(&mut labels, ILOAD, 0);
        emit(&mut code, 26);
        let next = cfg.jump_insn(&mut labels, IFLE, exit);
        emit(&mut code, IFLE);
        let at = code.len() - 1;
        labels.put(exit, &mut code, at, false);
        cfg.after_jump(&mut labels, &mut code, IFLE, next).unwrap();

        cfg.var_insn(&mut labels, ILOAD, 1);
        cfg.var_insn(&mut labels, ILOAD, 0);
        cfg.zero_operand_insn(&mut labels, code.len(), IADD);
        cfg.var_insn(&mut labels, ISTORE, 1);
        cfg.iinc_insn(&mut labels, 0);
        code.put_byte(27).put_byte(26).put_byte(IADD).put_byte(60);
        code.put_byte(IINC).put11(0, 0xFF);
        let after = cfg.jump_insn(&mut labels, GOTO, head);
        assert!(after.is_none());
        emit(&mut code, GOTO);
        let at = code.len() - 1;
        labels.put(head, &mut code, at, false);
        cfg.after_jump(&mut labels, &mut code, GOTO, after).unwrap();

        cfg.visit_label(&mut labels, &mut code, exit).unwrap();
        cfg.var_insn(&mut labels, ILOAD, 1);
        cfg.zero_operand_insn(&mut labels, code.len(), IRETURN);

        let this: Rc<str> = Rc::from("A");
        let initial = Frame::initial("A", true, false, "(I)I").unwrap();
        let max = cfg
            .compute_max_stack_size_from_frames(&mut labels, initial, &this, &ObjectHierarchy)
            .unwrap();
        assert_eq!(max, 2);

        // The exit label shares its block with the one opened after the `goto`
        let exit_block = labels.first(exit);
        assert_ne!(exit_block, exit);
        assert!(labels.is_storing_frame(head));
        assert!(labels.is_storing_frame(exit_block));
        assert!(!labels.is_storing_frame(cfg.first_block()));
        let exit_frame = labels.get(exit_block).frame.as_ref().unwrap().input.clone().unwrap();
        assert_eq!(
            exit_frame.locals,
            vec![VerificationType::Integer, VerificationType::Integer]
        );
    }
}
