use crate::jvm::class_file::{ConstantPool, Serialize};
use crate::jvm::code::frame::Frame;
use crate::jvm::code::types::{self, ComputedType, SerializableType};
use crate::jvm::{ByteVector, Error};
use byteorder::WriteBytesExt;

/// One entry of a `StackMapTable`, in the most compact form that describes it
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, PartialEq)]
pub enum StackMapFrame {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    SameLocalsNoStack { offset_delta: u16 },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: u16,
        stack: SerializableType,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    ///
    /// Note: `chopped_k` must be in the range 1 to 3 inclusive
    /// Tags: 248-250
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// Frame is like the previous frame, but with extra locals
    /// Tags: 252-254
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<SerializableType>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    Full {
        offset_delta: u16,
        locals: Vec<SerializableType>,
        stack: Vec<SerializableType>,
    },
}

impl StackMapFrame {
    /// Pick the frame variant for the given locals and stack, knowing the previous frame's locals
    pub fn compressed(
        offset_delta: u16,
        locals: Vec<SerializableType>,
        stack: Vec<SerializableType>,
        previous_locals: &[SerializableType],
    ) -> StackMapFrame {
        match stack.len() {
            0 => {
                let this_len = locals.len();
                let prev_len = previous_locals.len();
                let common_prefix = locals
                    .iter()
                    .zip(previous_locals.iter())
                    .all(|(t1, t2)| t1 == t2);

                if common_prefix && this_len <= prev_len && prev_len - this_len < 4 {
                    return if this_len == prev_len {
                        StackMapFrame::SameLocalsNoStack { offset_delta }
                    } else {
                        StackMapFrame::ChopLocalsNoStack {
                            offset_delta,
                            chopped_k: (prev_len - this_len) as u8,
                        }
                    };
                }
                if common_prefix && this_len > prev_len && this_len - prev_len < 4 {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: locals[prev_len..].to_vec(),
                    };
                }
            }
            1 if locals.as_slice() == previous_locals => {
                if let Some(top) = stack.last().cloned() {
                    return StackMapFrame::SameLocalsOneStack {
                        offset_delta,
                        stack: top,
                    };
                }
            }
            _ => (),
        }

        StackMapFrame::Full {
            offset_delta,
            locals,
            stack,
        }
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and `same_locals_1_stack_item_frame_extended`
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            // `chop_frame`
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                assert!(
                    0 < *chopped_k && *chopped_k < 4,
                    "ChopLocalsNoStack chops 1-3 locals"
                );
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            // `append_frame`
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                let added_k = locals.len();
                assert!(
                    0 < added_k && added_k < 4,
                    "AppendLocalsNoStack adds 1-3 locals"
                );
                (251 + added_k as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            // `full_frame`
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                (locals.len() as u16).serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
                (stack.len() as u16).serialize(writer)?;
                for entry in stack {
                    entry.serialize(writer)?;
                }
            }
        };
        Ok(())
    }
}

/// Accumulates the `StackMapTable` of a method, along with its `max_stack` and `max_locals`
#[derive(Debug, Default)]
pub struct StackMapTableWriter {
    max_stack: u16,
    max_locals: u16,

    /// Offset and locals of the last frame written (the implicit first frame has no offset)
    previous_offset: Option<u32>,
    previous_locals: Vec<SerializableType>,

    frame_count: u16,
    frames: ByteVector,
}

fn to_serializable(
    slots: &[ComputedType],
    pool: &mut ConstantPool,
) -> Result<Vec<SerializableType>, Error> {
    slots
        .iter()
        .map(|slot| slot.map(|class| pool.new_class(class), |uninit| uninit.offset as u16))
        .collect()
}

impl StackMapTableWriter {
    pub fn new() -> StackMapTableWriter {
        StackMapTableWriter::default()
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn set_max_stack(&mut self, max_stack: u32) {
        self.max_stack = max_stack.min(u16::MAX as u32) as u16;
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    /// Make sure `max_locals` covers the first `n` local variable slots
    pub fn update_max_locals(&mut self, n: usize) {
        let n = n.min(u16::MAX as usize) as u16;
        if n > self.max_locals {
            self.max_locals = n;
        }
    }

    pub fn has_frames(&self) -> bool {
        self.frame_count > 0
    }

    /// Record the implicit frame on entry to the method, which later frames are relative to
    pub fn visit_first_frame(&mut self, frame: &Frame, pool: &mut ConstantPool) -> Result<(), Error> {
        self.update_max_locals(frame.locals.len());
        self.previous_locals = to_serializable(&types::compress_locals(&frame.locals), pool)?;
        Ok(())
    }

    /// Append the frame for the block starting at the given offset
    pub fn visit_frame(
        &mut self,
        offset: u32,
        frame: &Frame,
        pool: &mut ConstantPool,
    ) -> Result<(), Error> {
        let locals = to_serializable(&types::compress_locals(&frame.locals), pool)?;
        let stack = to_serializable(&types::compress(&frame.stack), pool)?;
        let offset_delta = match self.previous_offset {
            None => offset,
            Some(previous) => offset - previous - 1,
        };

        let entry = StackMapFrame::compressed(
            offset_delta as u16,
            locals.clone(),
            stack,
            &self.previous_locals,
        );
        entry.serialize(&mut self.frames)?;

        self.frame_count += 1;
        self.previous_offset = Some(offset);
        self.previous_locals = locals;
        Ok(())
    }

    /// Size of the attribute, including its 6 byte header (0 if there are no frames)
    pub fn size(&self) -> usize {
        if self.has_frames() {
            8 + self.frames.len()
        } else {
            0
        }
    }

    pub fn put(&self, out: &mut ByteVector, name_index: u16) {
        if self.has_frames() {
            out.put_short(name_index)
                .put_int(2 + self.frames.len() as i32)
                .put_short(self.frame_count)
                .put_byte_vector(&self.frames);
        }
    }
}
