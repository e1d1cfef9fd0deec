use crate::jvm::code::frame::BlockFrame;
use crate::jvm::{ByteVector, Error};
use bitflags::bitflags;
use std::rc::Rc;

/// Handle to a position in the bytecode of a method, which may not be known yet
///
/// Labels are allocated from (and only meaningful for) the [`Labels`] arena of one method. Besides
/// marking jump targets, the first label of each basic block carries the control flow graph data
/// for that block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

bitflags! {
    #[derive(Default)]
    struct LabelFlags: u8 {
        /// Only used for debug attributes (line numbers, local variables)
        const DEBUG = 1;

        /// Position is known
        const RESOLVED = 2;

        /// Already pushed on the stack-size worklist
        const PUSHED = 4;

        /// Target of a jump (or exception handler)
        const TARGET = 8;

        /// A frame must be written in the `StackMapTable` for this block
        const STORE_FRAME = 16;

        /// Block was reached during frame computation
        const REACHABLE = 32;
    }
}

/// Kind of control-flow edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// Fall-through or jump, when frames are computed
    Normal,

    /// Edge to an exception handler catching the given class, when frames are computed
    Catch(Rc<str>),

    /// Fall-through or jump carrying the stack size relative to the start of the source block
    StackSize(i32),

    /// Edge to an exception handler, which always starts with only the exception on the stack
    Exception,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub kind: EdgeKind,
    pub successor: Label,
}

/// Reference to a label from an instruction emitted before the label was resolved
#[derive(Debug, Copy, Clone)]
struct ForwardReference {
    /// Position of the instruction opcode, which offsets are relative to
    source: usize,

    /// Position of the offset bytes to patch
    reference: usize,

    wide: bool,
}

#[derive(Debug, Default)]
pub(crate) struct LabelData {
    flags: LabelFlags,
    position: u32,

    /// Source line of the instruction at this label (0 if unknown)
    pub line: u32,

    /// Line of the jump instruction this label is the source or target of (0 if none)
    pub jump_target_line: u32,

    forward_references: Vec<ForwardReference>,

    /// Next basic block, in the order blocks were visited
    pub successor: Option<Label>,

    /// Outgoing edges of the block starting at this label
    pub edges: Vec<Edge>,

    /// Label of the block this label was merged into (labels at the same position share a block)
    pub first: Option<Label>,

    /// Absolute stack size on entry to the block
    pub input_stack_top: i32,

    /// Maximum stack size reached in the block, relative to `input_stack_top`
    pub output_stack_max: i32,

    /// Frame data, when frames are computed
    pub frame: Option<Box<BlockFrame>>,
}

/// Arena of the labels of one method
#[derive(Debug, Default)]
pub struct Labels {
    labels: Vec<LabelData>,
}

impl Labels {
    pub fn new() -> Labels {
        Labels::default()
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(LabelData::default());
        label
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub(crate) fn get(&self, label: Label) -> &LabelData {
        &self.labels[label.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, label: Label) -> &mut LabelData {
        &mut self.labels[label.0 as usize]
    }

    fn has(&self, label: Label, flag: LabelFlags) -> bool {
        self.get(label).flags.contains(flag)
    }

    fn set(&mut self, label: Label, flag: LabelFlags) {
        self.get_mut(label).flags.insert(flag);
    }

    /// Position in the code, if the label has been visited
    pub fn position(&self, label: Label) -> Option<u32> {
        let data = self.get(label);
        if data.flags.contains(LabelFlags::RESOLVED) {
            Some(data.position)
        } else {
            None
        }
    }

    pub fn is_resolved(&self, label: Label) -> bool {
        self.has(label, LabelFlags::RESOLVED)
    }

    pub fn is_debug(&self, label: Label) -> bool {
        self.has(label, LabelFlags::DEBUG)
    }

    pub fn mark_debug(&mut self, label: Label) {
        self.set(label, LabelFlags::DEBUG)
    }

    pub fn line(&self, label: Label) -> u32 {
        self.get(label).line
    }

    pub fn set_line(&mut self, label: Label, line: u32) {
        self.get_mut(label).line = line;
    }

    pub fn jump_target_line(&self, label: Label) -> u32 {
        self.get(label).jump_target_line
    }

    pub fn set_jump_target_line(&mut self, label: Label, line: u32) {
        self.get_mut(label).jump_target_line = line;
    }

    pub fn is_target(&self, label: Label) -> bool {
        self.has(label, LabelFlags::TARGET)
    }

    pub fn mark_target(&mut self, label: Label) {
        self.set(label, LabelFlags::TARGET)
    }

    /// Propagate the target flag of `other` onto `label`
    pub(crate) fn absorb_target(&mut self, label: Label, other: Label) {
        if self.is_target(other) {
            self.mark_target(label);
        }
    }

    pub(crate) fn is_pushed(&self, label: Label) -> bool {
        self.has(label, LabelFlags::PUSHED)
    }

    pub(crate) fn mark_pushed(&mut self, label: Label) {
        self.set(label, LabelFlags::PUSHED)
    }

    pub fn is_storing_frame(&self, label: Label) -> bool {
        self.has(label, LabelFlags::STORE_FRAME)
    }

    pub(crate) fn mark_storing_frame(&mut self, label: Label) {
        self.set(label, LabelFlags::STORE_FRAME)
    }

    pub fn is_reachable(&self, label: Label) -> bool {
        self.has(label, LabelFlags::REACHABLE)
    }

    pub(crate) fn mark_reachable(&mut self, label: Label) {
        self.set(label, LabelFlags::REACHABLE)
    }

    /// First label of the basic block this label belongs to
    pub fn first(&self, label: Label) -> Label {
        self.get(label).first.unwrap_or(label)
    }

    /// Emit a reference to the label, as an offset relative to `source`
    ///
    /// If the label is not resolved yet, placeholder bytes are written and patched once the label
    /// gets resolved.
    pub fn put(&mut self, label: Label, code: &mut ByteVector, source: usize, wide: bool) {
        if let Some(position) = self.position(label) {
            let offset = position as i64 - source as i64;
            if wide {
                code.put_int(offset as i32);
            } else {
                code.put_short(offset as i16 as u16);
            }
        } else {
            let reference = code.len();
            self.get_mut(label).forward_references.push(ForwardReference {
                source,
                reference,
                wide,
            });
            if wide {
                code.put_int(-1);
            } else {
                code.put_short(0xFFFF);
            }
        }
    }

    /// Fix the label at the current end of `code`, patching every earlier reference to it
    pub fn resolve(&mut self, label: Label, code: &mut ByteVector) -> Result<(), Error> {
        let position = code.len();
        let data = self.get_mut(label);
        data.flags.insert(LabelFlags::RESOLVED);
        data.position = position as u32;

        for fwd in std::mem::take(&mut data.forward_references) {
            let offset = (position - fwd.source) as i64;
            if fwd.wide {
                code.set_int(fwd.reference, offset as i32);
            } else if offset > i16::MAX as i64 {
                return Err(Error::BranchOffsetOverflow(offset));
            } else {
                code.set_short(fwd.reference, offset as u16);
            }
        }
        Ok(())
    }

    /// Bind a label to a position without patching anything (used for synthetic block boundaries)
    pub(crate) fn resolve_at(&mut self, label: Label, position: usize) {
        let data = self.get_mut(label);
        data.flags.insert(LabelFlags::RESOLVED);
        data.position = position as u32;
    }
}
