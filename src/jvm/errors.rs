use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Modified UTF-8 encoding of a string is longer than the `u16` length prefix allows
    StringTooLong { encoded_length: usize },

    /// Constant pool entry with a tag this reader does not know about
    UnknownConstantTag { tag: u8, offset: usize },

    /// Method handle reference kind outside of the `1..=9` range
    IllegalMethodHandleTag(u8),

    /// Constant pool index does not point at an entry of the expected kind
    InvalidConstantIndex { index: u16, expected: &'static str },

    /// There is no more room in the constant pool
    ConstantPoolOverflow,

    /// Method bytecode exceeds the 65536 byte limit
    MethodCodeTooLarge(usize),

    /// Forward jump is too far for the 2-byte offset of its instruction
    BranchOffsetOverflow(i64),

    /// Class file does not start with `0xCAFEBABE`
    BadMagic(u32),

    /// Tried to read past the end of the class file
    Truncated { offset: usize, needed: usize },

    /// Bytecode contains an opcode that isn't defined
    UnknownOpcode { opcode: u8, offset: usize },

    /// Type or method descriptor could not be parsed
    InvalidDescriptor(String),

    /// Field instruction with an opcode that isn't a field access
    FieldAccessOpcode(u8),

    /// Method events arrived in an order the writer does not accept
    UnexpectedVisit {
        event: &'static str,
        phase: &'static str,
    },

    /// Label used by an instruction or table was never placed in the code
    UnresolvedLabel,

    /// Frames could not be computed for a method body
    FrameComputation(FrameErrorKind),

    /// Visitation of a class or method was abandoned on purpose
    ///
    /// This is a control-flow signal for classes or methods which are not eligible for
    /// modification. The caller is expected to leave the original bytes untouched.
    VisitInterrupted,

    IoError(std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameErrorKind {
    /// Instruction pops more values than the stack holds
    EmptyStack { opcode: u8 },

    /// Two paths reach the same block with different stack heights
    StackHeightMismatch { expected: usize, found: usize },

    /// `jsr`/`ret` subroutines can't be described by stack map frames
    Subroutine,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StringTooLong { encoded_length } => write!(
                f,
                "UTF8 string too large: {} encoded bytes exceeds the 65535 byte limit",
                encoded_length
            ),
            Error::UnknownConstantTag { tag, offset } => {
                write!(f, "Unknown constant pool tag {} at offset {}", tag, offset)
            }
            Error::IllegalMethodHandleTag(tag) => write!(f, "Illegal method-handle tag: {}", tag),
            Error::InvalidConstantIndex { index, expected } => {
                write!(f, "Constant pool index {} is not a {}", index, expected)
            }
            Error::ConstantPoolOverflow => write!(f, "Constant pool overflow"),
            Error::MethodCodeTooLarge(len) => {
                write!(f, "Method code too large! ({} bytes)", len)
            }
            Error::BranchOffsetOverflow(offset) => {
                write!(f, "Jump offset {} does not fit in 16 bits", offset)
            }
            Error::BadMagic(magic) => write!(f, "Not a class file (magic 0x{:08X})", magic),
            Error::Truncated { offset, needed } => write!(
                f,
                "Class file truncated: {} bytes needed at offset {}",
                needed, offset
            ),
            Error::UnknownOpcode { opcode, offset } => {
                write!(f, "Unknown opcode 0x{:02X} at offset {}", opcode, offset)
            }
            Error::InvalidDescriptor(desc) => write!(f, "Invalid descriptor: {}", desc),
            Error::FieldAccessOpcode(opcode) => {
                write!(f, "Unknown field access opcode: {}", opcode)
            }
            Error::UnexpectedVisit { event, phase } => {
                write!(f, "Unexpected {} while the method is in its {} phase", event, phase)
            }
            Error::UnresolvedLabel => write!(f, "Label was never placed in the code"),
            Error::FrameComputation(kind) => write!(f, "Failed to compute frames: {:?}", kind),
            Error::VisitInterrupted => write!(f, "Visit interrupted"),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<FrameErrorKind> for Error {
    fn from(kind: FrameErrorKind) -> Error {
        Error::FrameComputation(kind)
    }
}
