use crate::jvm::code::types::{self, ComputedType, VerificationType};
use crate::jvm::descriptors::{FieldType, MethodDescriptor, ParseDescriptor};
use crate::jvm::opcodes::*;
use crate::jvm::{Error, FrameErrorKind};
use std::rc::Rc;

/// Super class of a class, and whether it is an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub super_class: Option<String>,
    pub is_interface: bool,
}

pub const OBJECT: &str = "java/lang/Object";

/// Answers subtyping questions needed to merge frames
///
/// When two paths join with different object types in the same slot, the merged frame needs the
/// most precise class both are assignable to. Classes that can't be found are treated as direct
/// subclasses of `java/lang/Object`.
pub trait ClassHierarchy {
    /// Super class of a class, if the class can be found
    fn class_info(&self, name: &str) -> Option<ClassInfo>;

    fn common_super_class(&self, type1: &str, type2: &str) -> Rc<str> {
        if type1 == type2 {
            return Rc::from(type1);
        }
        if type1.starts_with('[') || type2.starts_with('[') {
            return Rc::from(OBJECT);
        }

        let ancestors1 = match ancestors(self, type1) {
            Some(ancestors) => ancestors,
            None => return Rc::from(OBJECT),
        };
        let ancestors2 = match ancestors(self, type2) {
            Some(ancestors) => ancestors,
            None => return Rc::from(OBJECT),
        };
        ancestors2
            .into_iter()
            .find(|class| ancestors1.contains(class))
            .map_or_else(|| Rc::from(OBJECT), Rc::from)
    }
}

/// Class followed by its super classes, up to (not including) `java/lang/Object`
///
/// Interfaces have no ancestors to share, so they give `None`.
fn ancestors<H: ClassHierarchy + ?Sized>(hierarchy: &H, name: &str) -> Option<Vec<String>> {
    let mut chain: Vec<String> = vec![];
    let mut current = Some(name.to_owned());
    while let Some(class) = current {
        if class == OBJECT || chain.contains(&class) {
            break;
        }
        current = match hierarchy.class_info(&class) {
            Some(info) if info.is_interface => return None,
            Some(info) => info.super_class,
            None => None,
        };
        chain.push(class);
    }
    Some(chain)
}

/// Hierarchy that knows nothing, and merges all distinct classes into `java/lang/Object`
#[derive(Debug, Default, Copy, Clone)]
pub struct ObjectHierarchy;

impl ClassHierarchy for ObjectHierarchy {
    fn class_info(&self, _name: &str) -> Option<ClassInfo> {
        None
    }
}

/// Instruction as recorded for frame computation
///
/// Only the information needed to simulate the instruction's effect on locals and stack is kept.
/// Load and store instructions are in their explicit form (`ILOAD`, not `ILOAD_0`).
#[derive(Debug, Clone)]
pub enum FrameInsn {
    Insn(u8),
    Int(u8, i32),
    Var(u8, u16),
    Iinc(u16),
    Type {
        opcode: u8,
        class: Rc<str>,

        /// Offset of the instruction, for `new`
        offset: u32,
    },
    Field {
        opcode: u8,
        descriptor: Rc<str>,
    },
    Invoke {
        opcode: u8,
        owner: Rc<str>,
        is_init: bool,
        descriptor: Rc<str>,
    },

    /// Constant load
    Push(Vec<ComputedType>),
    MultiANewArray {
        descriptor: Rc<str>,
        dimensions: u8,
    },
}

/// Frame data attached to the first label of a basic block
#[derive(Debug, Default)]
pub struct BlockFrame {
    /// Frame on entry to the block, once known
    pub input: Option<Frame>,

    /// Instructions of the block
    pub insns: Vec<FrameInsn>,
}

/// Types of the local variables and operand stack at some point in a method
///
/// `long` and `double` values take two slots, the second of which is `Top`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub locals: Vec<ComputedType>,
    pub stack: Vec<ComputedType>,
}

impl Frame {
    /// Frame on entry to a method
    pub fn initial(
        class_name: &str,
        is_static: bool,
        is_constructor: bool,
        descriptor: &str,
    ) -> Result<Frame, Error> {
        let mut locals = vec![];
        if !is_static {
            if is_constructor && class_name != OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(ComputedType::object(class_name));
            }
        }
        for parameter in MethodDescriptor::parse(descriptor)?.parameters {
            locals.extend(ComputedType::slots_of(&parameter));
        }
        Ok(Frame {
            locals,
            stack: vec![],
        })
    }

    fn push(&mut self, t: ComputedType) {
        self.stack.push(t);
    }

    fn push_wide(&mut self, t: ComputedType) {
        self.stack.push(t);
        self.stack.push(VerificationType::Top);
    }

    fn push_descriptor(&mut self, descriptor: &str) -> Result<(), Error> {
        if descriptor != "V" {
            let field_type = FieldType::parse(descriptor)?;
            self.stack.extend(ComputedType::slots_of(&field_type));
        }
        Ok(())
    }

    fn pop(&mut self, opcode: u8) -> Result<ComputedType, FrameErrorKind> {
        self.stack.pop().ok_or(FrameErrorKind::EmptyStack { opcode })
    }

    fn pop_n(&mut self, n: usize, opcode: u8) -> Result<(), FrameErrorKind> {
        if self.stack.len() < n {
            return Err(FrameErrorKind::EmptyStack { opcode });
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }

    fn get_local(&self, index: u16) -> ComputedType {
        self.locals
            .get(index as usize)
            .cloned()
            .unwrap_or(VerificationType::Top)
    }

    fn set_local(&mut self, index: u16, t: ComputedType) {
        let index = index as usize;
        let wide = matches!(t, VerificationType::Long | VerificationType::Double);
        let needed = index + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VerificationType::Top);
        }

        // Overwriting the second half of a long/double invalidates the first half
        if index > 0
            && matches!(
                self.locals[index - 1],
                VerificationType::Long | VerificationType::Double
            )
        {
            self.locals[index - 1] = VerificationType::Top;
        }
        self.locals[index] = t;
        if wide {
            self.locals[index + 1] = VerificationType::Top;
        }
    }

    /// Replace every occurrence of an uninitialized value once its constructor has been called
    fn initialize(&mut self, uninitialized: &ComputedType, initialized: ComputedType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == uninitialized {
                *slot = initialized.clone();
            }
        }
    }

    /// Simulate the effect of one instruction
    pub fn execute(&mut self, insn: &FrameInsn, this_class: &Rc<str>) -> Result<(), Error> {
        use VerificationType::*;

        match insn {
            FrameInsn::Insn(opcode) => self.execute_simple(*opcode)?,

            FrameInsn::Int(opcode, operand) => {
                if *opcode == NEWARRAY {
                    self.pop(*opcode)?;
                    let descriptor = match operand {
                        4 => "[Z",
                        5 => "[C",
                        6 => "[F",
                        7 => "[D",
                        8 => "[B",
                        9 => "[S",
                        10 => "[I",
                        _ => "[J",
                    };
                    self.push(ComputedType::object(descriptor));
                } else {
                    self.push(Integer);
                }
            }

            FrameInsn::Var(opcode, var) => match *opcode {
                ILOAD => self.push(Integer),
                LLOAD => self.push_wide(Long),
                FLOAD => self.push(Float),
                DLOAD => self.push_wide(Double),
                ALOAD => self.push(self.get_local(*var)),
                ISTORE | FSTORE | ASTORE => {
                    let value = self.pop(*opcode)?;
                    self.set_local(*var, value);
                }
                LSTORE | DSTORE => {
                    self.pop(*opcode)?;
                    let value = self.pop(*opcode)?;
                    self.set_local(*var, value);
                }
                _ => return Err(FrameErrorKind::Subroutine.into()),
            },

            FrameInsn::Iinc(var) => self.set_local(*var, Integer),

            FrameInsn::Type {
                opcode,
                class,
                offset,
            } => match *opcode {
                NEW => self.push(Uninitialized(types::Uninitialized {
                    offset: *offset,
                    class: class.clone(),
                })),
                ANEWARRAY => {
                    self.pop(*opcode)?;
                    let descriptor = if class.starts_with('[') {
                        format!("[{}", class)
                    } else {
                        format!("[L{};", class)
                    };
                    self.push(ComputedType::object(&descriptor));
                }
                CHECKCAST => {
                    self.pop(*opcode)?;
                    self.push(Object(class.clone()));
                }
                _ => {
                    self.pop(*opcode)?;
                    self.push(Integer);
                }
            },

            FrameInsn::Field { opcode, descriptor } => match *opcode {
                GETSTATIC => self.push_descriptor(descriptor)?,
                PUTSTATIC => self.pop_n(crate::jvm::descriptors::field_width(descriptor), *opcode)?,
                GETFIELD => {
                    self.pop(*opcode)?;
                    self.push_descriptor(descriptor)?;
                }
                PUTFIELD => {
                    self.pop_n(crate::jvm::descriptors::field_width(descriptor) + 1, *opcode)?
                }
                other => return Err(Error::FieldAccessOpcode(other)),
            },

            FrameInsn::Invoke {
                opcode,
                owner,
                is_init,
                descriptor,
            } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                self.pop_n(parsed.parameter_length(), *opcode)?;
                if *opcode != INVOKESTATIC && *opcode != INVOKEDYNAMIC {
                    let receiver = self.pop(*opcode)?;
                    if *opcode == INVOKESPECIAL && *is_init {
                        let initialized = match &receiver {
                            UninitializedThis => Object(this_class.clone()),
                            Uninitialized(uninit) => Object(uninit.class.clone()),
                            _ => Object(owner.clone()),
                        };
                        self.initialize(&receiver, initialized);
                    }
                }
                if let Some(return_type) = &parsed.return_type {
                    self.stack.extend(ComputedType::slots_of(return_type));
                }
            }

            FrameInsn::Push(slots) => self.stack.extend(slots.iter().cloned()),

            FrameInsn::MultiANewArray {
                descriptor,
                dimensions,
            } => {
                self.pop_n(*dimensions as usize, MULTIANEWARRAY)?;
                self.push(Object(descriptor.clone()));
            }
        }
        Ok(())
    }

    fn execute_simple(&mut self, opcode: u8) -> Result<(), FrameErrorKind> {
        use VerificationType::*;

        match opcode {
            NOP | GOTO | RETURN => (),
            ACONST_NULL => self.push(Null),
            ICONST_M1..=ICONST_5 => self.push(Integer),
            LCONST_0 | LCONST_1 => self.push_wide(Long),
            FCONST_0..=FCONST_2 => self.push(Float),
            DCONST_0 | DCONST_1 => self.push_wide(Double),

            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop_n(2, opcode)?;
                self.push(Integer);
            }
            LALOAD => {
                self.pop_n(2, opcode)?;
                self.push_wide(Long);
            }
            FALOAD => {
                self.pop_n(2, opcode)?;
                self.push(Float);
            }
            DALOAD => {
                self.pop_n(2, opcode)?;
                self.push_wide(Double);
            }
            AALOAD => {
                self.pop(opcode)?;
                let element = match self.pop(opcode)? {
                    Object(array) if array.starts_with("[[") => Object(Rc::from(&array[1..])),
                    Object(array) if array.starts_with("[L") && array.ends_with(';') => {
                        Object(Rc::from(&array[2..array.len() - 1]))
                    }
                    Null => Null,
                    _ => ComputedType::object(OBJECT),
                };
                self.push(element);
            }

            LASTORE | DASTORE => self.pop_n(4, opcode)?,
            IASTORE..=SASTORE => self.pop_n(3, opcode)?,

            POP => self.pop_n(1, opcode)?,
            POP2 => self.pop_n(2, opcode)?,
            DUP => {
                let v1 = self.pop(opcode)?;
                self.push(v1.clone());
                self.push(v1);
            }
            DUP_X1 => {
                let v1 = self.pop(opcode)?;
                let v2 = self.pop(opcode)?;
                self.stack.extend([v1.clone(), v2, v1]);
            }
            DUP_X2 => {
                let v1 = self.pop(opcode)?;
                let v2 = self.pop(opcode)?;
                let v3 = self.pop(opcode)?;
                self.stack.extend([v1.clone(), v3, v2, v1]);
            }
            DUP2 => {
                let v1 = self.pop(opcode)?;
                let v2 = self.pop(opcode)?;
                self.stack.extend([v2.clone(), v1.clone(), v2, v1]);
            }
            DUP2_X1 => {
                let v1 = self.pop(opcode)?;
                let v2 = self.pop(opcode)?;
                let v3 = self.pop(opcode)?;
                self.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
            }
            DUP2_X2 => {
                let v1 = self.pop(opcode)?;
                let v2 = self.pop(opcode)?;
                let v3 = self.pop(opcode)?;
                let v4 = self.pop(opcode)?;
                self.stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
            }
            SWAP => {
                let v1 = self.pop(opcode)?;
                let v2 = self.pop(opcode)?;
                self.stack.extend([v1, v2]);
            }

            // Binary arithmetic, cycling through int/long/float/double
            IADD..=DREM => match (opcode - IADD) % 4 {
                0 => {
                    self.pop_n(2, opcode)?;
                    self.push(Integer);
                }
                1 => {
                    self.pop_n(4, opcode)?;
                    self.push_wide(Long);
                }
                2 => {
                    self.pop_n(2, opcode)?;
                    self.push(Float);
                }
                _ => {
                    self.pop_n(4, opcode)?;
                    self.push_wide(Double);
                }
            },
            INEG | FNEG => {
                let value = self.pop(opcode)?;
                self.push(value);
            }
            LNEG | DNEG => (),
            ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
                self.pop_n(2, opcode)?;
                self.push(Integer);
            }
            LSHL | LSHR | LUSHR => {
                self.pop_n(3, opcode)?;
                self.push_wide(Long);
            }
            LAND | LOR | LXOR => {
                self.pop_n(4, opcode)?;
                self.push_wide(Long);
            }

            I2L | F2L => {
                self.pop(opcode)?;
                self.push_wide(Long);
            }
            I2F => {
                self.pop(opcode)?;
                self.push(Float);
            }
            I2D | F2D => {
                self.pop(opcode)?;
                self.push_wide(Double);
            }
            L2I | D2I => {
                self.pop_n(2, opcode)?;
                self.push(Integer);
            }
            L2F | D2F => {
                self.pop_n(2, opcode)?;
                self.push(Float);
            }
            L2D => {
                self.pop_n(2, opcode)?;
                self.push_wide(Double);
            }
            D2L => {
                self.pop_n(2, opcode)?;
                self.push_wide(Long);
            }
            F2I | I2B | I2C | I2S => {
                self.pop(opcode)?;
                self.push(Integer);
            }

            LCMP | DCMPL | DCMPG => {
                self.pop_n(4, opcode)?;
                self.push(Integer);
            }
            FCMPL | FCMPG => {
                self.pop_n(2, opcode)?;
                self.push(Integer);
            }

            IFEQ..=IFLE | IFNULL | IFNONNULL | TABLESWITCH | LOOKUPSWITCH => {
                self.pop_n(1, opcode)?
            }
            IF_ICMPEQ..=IF_ACMPNE => self.pop_n(2, opcode)?,
            JSR | RET | JSR_W => return Err(FrameErrorKind::Subroutine),

            IRETURN | FRETURN | ARETURN | ATHROW | MONITORENTER | MONITOREXIT => {
                self.pop_n(1, opcode)?
            }
            LRETURN | DRETURN => self.pop_n(2, opcode)?,
            ARRAYLENGTH => {
                self.pop(opcode)?;
                self.push(Integer);
            }

            _ => (),
        }
        Ok(())
    }

    /// Merge this frame into the input frame of a successor block
    ///
    /// Returns whether the successor's input frame changed (and so needs to be processed again).
    pub fn merge_into(
        &self,
        target: &mut Option<Frame>,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<bool, FrameErrorKind> {
        if target.is_none() {
            *target = Some(self.clone());
            return Ok(true);
        }
        let existing = match target.as_mut() {
            Some(existing) => existing,
            None => return Ok(false),
        };

        if existing.stack.len() != self.stack.len() {
            return Err(FrameErrorKind::StackHeightMismatch {
                expected: existing.stack.len(),
                found: self.stack.len(),
            });
        }

        let locals_len = existing.locals.len().min(self.locals.len());
        let mut locals: Vec<ComputedType> = (0..locals_len)
            .map(|i| merge_types(&existing.locals[i], &self.locals[i], hierarchy))
            .collect();

        // A long/double whose second half was lost is unusable
        for i in 0..locals.len() {
            if matches!(locals[i], VerificationType::Long | VerificationType::Double)
                && locals.get(i + 1) != Some(&VerificationType::Top)
            {
                locals[i] = VerificationType::Top;
            }
        }

        let stack = existing
            .stack
            .iter()
            .zip(self.stack.iter())
            .map(|(t1, t2)| merge_types(t1, t2, hierarchy))
            .collect();

        let merged = Frame { locals, stack };
        if merged == *existing {
            Ok(false)
        } else {
            *existing = merged;
            Ok(true)
        }
    }
}

/// Most precise type both given types are assignable to
pub fn merge_types(
    t1: &ComputedType,
    t2: &ComputedType,
    hierarchy: &dyn ClassHierarchy,
) -> ComputedType {
    use VerificationType::*;

    match (t1, t2) {
        _ if t1 == t2 => t1.clone(),
        (Null, Object(_)) => t2.clone(),
        (Object(_), Null) => t1.clone(),
        (Object(c1), Object(c2)) => Object(hierarchy.common_super_class(c1, c2)),
        _ => Top,
    }
}
