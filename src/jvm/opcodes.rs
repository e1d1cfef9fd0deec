//! JVM opcode numbering, instruction categories, and the stack effect of fixed-size instructions
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-6.html#jvms-6.5

pub const NOP: u8 = 0;
pub const ACONST_NULL: u8 = 1;
pub const ICONST_M1: u8 = 2;
pub const ICONST_0: u8 = 3;
pub const ICONST_1: u8 = 4;
pub const ICONST_2: u8 = 5;
pub const ICONST_5: u8 = 8;
pub const LCONST_0: u8 = 9;
pub const LCONST_1: u8 = 10;
pub const FCONST_0: u8 = 11;
pub const FCONST_2: u8 = 13;
pub const DCONST_0: u8 = 14;
pub const DCONST_1: u8 = 15;
pub const BIPUSH: u8 = 16;
pub const SIPUSH: u8 = 17;
pub const LDC: u8 = 18;
pub const LDC_W: u8 = 19;
pub const LDC2_W: u8 = 20;
pub const ILOAD: u8 = 21;
pub const LLOAD: u8 = 22;
pub const FLOAD: u8 = 23;
pub const DLOAD: u8 = 24;
pub const ALOAD: u8 = 25;
pub const ILOAD_0: u8 = 26;
pub const ALOAD_3: u8 = 45;
pub const IALOAD: u8 = 46;
pub const LALOAD: u8 = 47;
pub const FALOAD: u8 = 48;
pub const DALOAD: u8 = 49;
pub const AALOAD: u8 = 50;
pub const BALOAD: u8 = 51;
pub const CALOAD: u8 = 52;
pub const SALOAD: u8 = 53;
pub const ISTORE: u8 = 54;
pub const LSTORE: u8 = 55;
pub const FSTORE: u8 = 56;
pub const DSTORE: u8 = 57;
pub const ASTORE: u8 = 58;
pub const ISTORE_0: u8 = 59;
pub const ASTORE_3: u8 = 78;
pub const IASTORE: u8 = 79;
pub const LASTORE: u8 = 80;
pub const DASTORE: u8 = 82;
pub const SASTORE: u8 = 86;
pub const POP: u8 = 87;
pub const POP2: u8 = 88;
pub const DUP: u8 = 89;
pub const DUP_X1: u8 = 90;
pub const DUP_X2: u8 = 91;
pub const DUP2: u8 = 92;
pub const DUP2_X1: u8 = 93;
pub const DUP2_X2: u8 = 94;
pub const SWAP: u8 = 95;
pub const IADD: u8 = 96;
pub const LADD: u8 = 97;
pub const FADD: u8 = 98;
pub const DADD: u8 = 99;
pub const DREM: u8 = 115;
pub const INEG: u8 = 116;
pub const LNEG: u8 = 117;
pub const FNEG: u8 = 118;
pub const DNEG: u8 = 119;
pub const ISHL: u8 = 120;
pub const LSHL: u8 = 121;
pub const ISHR: u8 = 122;
pub const LSHR: u8 = 123;
pub const IUSHR: u8 = 124;
pub const LUSHR: u8 = 125;
pub const IAND: u8 = 126;
pub const LAND: u8 = 127;
pub const IOR: u8 = 128;
pub const LOR: u8 = 129;
pub const IXOR: u8 = 130;
pub const LXOR: u8 = 131;
pub const IINC: u8 = 132;
pub const I2L: u8 = 133;
pub const I2F: u8 = 134;
pub const I2D: u8 = 135;
pub const L2I: u8 = 136;
pub const L2F: u8 = 137;
pub const L2D: u8 = 138;
pub const F2I: u8 = 139;
pub const F2L: u8 = 140;
pub const F2D: u8 = 141;
pub const D2I: u8 = 142;
pub const D2L: u8 = 143;
pub const D2F: u8 = 144;
pub const I2B: u8 = 145;
pub const I2C: u8 = 146;
pub const I2S: u8 = 147;
pub const LCMP: u8 = 148;
pub const FCMPL: u8 = 149;
pub const FCMPG: u8 = 150;
pub const DCMPL: u8 = 151;
pub const DCMPG: u8 = 152;
pub const IFEQ: u8 = 153;
pub const IFNE: u8 = 154;
pub const IFLT: u8 = 155;
pub const IFGE: u8 = 156;
pub const IFGT: u8 = 157;
pub const IFLE: u8 = 158;
pub const IF_ICMPEQ: u8 = 159;
pub const IF_ICMPNE: u8 = 160;
pub const IF_ICMPLT: u8 = 161;
pub const IF_ICMPGE: u8 = 162;
pub const IF_ICMPGT: u8 = 163;
pub const IF_ICMPLE: u8 = 164;
pub const IF_ACMPEQ: u8 = 165;
pub const IF_ACMPNE: u8 = 166;
pub const GOTO: u8 = 167;
pub const JSR: u8 = 168;
pub const RET: u8 = 169;
pub const TABLESWITCH: u8 = 170;
pub const LOOKUPSWITCH: u8 = 171;
pub const IRETURN: u8 = 172;
pub const LRETURN: u8 = 173;
pub const FRETURN: u8 = 174;
pub const DRETURN: u8 = 175;
pub const ARETURN: u8 = 176;
pub const RETURN: u8 = 177;
pub const GETSTATIC: u8 = 178;
pub const PUTSTATIC: u8 = 179;
pub const GETFIELD: u8 = 180;
pub const PUTFIELD: u8 = 181;
pub const INVOKEVIRTUAL: u8 = 182;
pub const INVOKESPECIAL: u8 = 183;
pub const INVOKESTATIC: u8 = 184;
pub const INVOKEINTERFACE: u8 = 185;
pub const INVOKEDYNAMIC: u8 = 186;
pub const NEW: u8 = 187;
pub const NEWARRAY: u8 = 188;
pub const ANEWARRAY: u8 = 189;
pub const ARRAYLENGTH: u8 = 190;
pub const ATHROW: u8 = 191;
pub const CHECKCAST: u8 = 192;
pub const INSTANCEOF: u8 = 193;
pub const MONITORENTER: u8 = 194;
pub const MONITOREXIT: u8 = 195;
pub const WIDE: u8 = 196;
pub const MULTIANEWARRAY: u8 = 197;
pub const IFNULL: u8 = 198;
pub const IFNONNULL: u8 = 199;
pub const GOTO_W: u8 = 200;
pub const JSR_W: u8 = 201;

/// Conditional jumps paired with the jump taken on the opposite condition
///
/// Used when a backward jump is too far for a 16-bit offset and has to be rewritten as a short
/// jump over a `goto_w`.
pub const NEGATED_JUMPS: [(u8, u8); 8] = [
    (IFEQ, IFNE),
    (IFLT, IFGE),
    (IFGT, IFLE),
    (IF_ICMPEQ, IF_ICMPNE),
    (IF_ICMPLT, IF_ICMPGE),
    (IF_ICMPGT, IF_ICMPLE),
    (IF_ACMPEQ, IF_ACMPNE),
    (IFNULL, IFNONNULL),
];

/// Opcode of the jump whose condition is the logical negation of the given jump's condition
pub fn negate_jump(opcode: u8) -> Option<u8> {
    NEGATED_JUMPS.iter().find_map(|&(a, b)| {
        if a == opcode {
            Some(b)
        } else if b == opcode {
            Some(a)
        } else {
            None
        }
    })
}

/// Is this one of the `xreturn` instructions?
pub fn is_return(opcode: u8) -> bool {
    (IRETURN..=RETURN).contains(&opcode)
}

/// Does this instruction end a basic block without falling through?
pub fn ends_block(opcode: u8) -> bool {
    is_return(opcode) || opcode == ATHROW
}

/// Do the 1-byte `xload_n`/`xstore_n` forms exist for this opcode?
pub fn short_var_form(opcode: u8, var_index: u16) -> Option<u8> {
    if var_index >= 4 {
        return None;
    }
    let idx = var_index as u8;
    if (ILOAD..=ALOAD).contains(&opcode) {
        Some(ILOAD_0 + ((opcode - ILOAD) << 2) + idx)
    } else if (ISTORE..=ASTORE).contains(&opcode) {
        Some(ISTORE_0 + ((opcode - ISTORE) << 2) + idx)
    } else {
        None
    }
}

/// Expand an implicit-index `xload_n`/`xstore_n` into its explicit opcode and index
pub fn expand_short_var_form(opcode: u8) -> Option<(u8, u16)> {
    if (ILOAD_0..=ALOAD_3).contains(&opcode) {
        let rel = opcode - ILOAD_0;
        Some((ILOAD + (rel >> 2), (rel & 3) as u16))
    } else if (ISTORE_0..=ASTORE_3).contains(&opcode) {
        let rel = opcode - ISTORE_0;
        Some((ISTORE + (rel >> 2), (rel & 3) as u16))
    } else {
        None
    }
}

/// Is the local slot accessed by this load/store opcode two slots wide?
pub fn is_wide_var_op(opcode: u8) -> bool {
    matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE)
}

/// Operand layout of an instruction, as needed to decode it from a code array
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InsnKind {
    /// No operands
    NoArg,

    /// `xload_n`/`xstore_n`, the local index is part of the opcode
    ImplicitVar,

    /// `bipush` or `newarray`
    SignedByte,

    /// `sipush`
    SignedShort,

    /// Load/store/ret with a 1-byte local index
    Var,

    /// `new`, `anewarray`, `checkcast`, `instanceof`
    Type,

    Field,
    Method,
    InterfaceMethod,
    InvokeDynamic,

    /// Branches with a 16-bit offset
    Jump,

    /// Branches with a 32-bit offset
    JumpWide,

    Ldc,

    /// `ldc_w` and `ldc2_w`
    LdcWide,
    Iinc,
    TableSwitch,
    LookupSwitch,
    Wide,
    MultiANewArray,
}

/// Classify an opcode by its operand layout (`None` for undefined opcodes)
pub fn insn_kind(opcode: u8) -> Option<InsnKind> {
    use InsnKind::*;
    let kind = match opcode {
        NOP..=DCONST_1 => NoArg,
        BIPUSH | NEWARRAY => SignedByte,
        SIPUSH => SignedShort,
        LDC => Ldc,
        LDC_W | LDC2_W => LdcWide,
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Var,
        ILOAD_0..=ALOAD_3 | ISTORE_0..=ASTORE_3 => ImplicitVar,
        IALOAD..=SALOAD | IASTORE..=LXOR | I2L..=DCMPG => NoArg,
        IINC => Iinc,
        IFEQ..=JSR | IFNULL | IFNONNULL => Jump,
        GOTO_W | JSR_W => JumpWide,
        TABLESWITCH => TableSwitch,
        LOOKUPSWITCH => LookupSwitch,
        IRETURN..=RETURN | ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => NoArg,
        GETSTATIC..=PUTFIELD => Field,
        INVOKEVIRTUAL..=INVOKESTATIC => Method,
        INVOKEINTERFACE => InterfaceMethod,
        INVOKEDYNAMIC => InvokeDynamic,
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Type,
        WIDE => Wide,
        MULTIANEWARRAY => MultiANewArray,
        _ => return None,
    };
    Some(kind)
}

/// Change in operand stack size (in slots) caused by an instruction whose effect does not depend on
/// its operands
///
/// Field, invoke, `ldc`, and `multianewarray` instructions have operand-dependent effects and
/// return `None` here.
pub fn stack_size_delta(opcode: u8) -> Option<i32> {
    let delta = match opcode {
        NOP => 0,
        ACONST_NULL..=ICONST_5 => 1,
        LCONST_0 | LCONST_1 => 2,
        FCONST_0..=FCONST_2 => 1,
        DCONST_0 | DCONST_1 => 2,
        BIPUSH | SIPUSH => 1,
        ILOAD | FLOAD | ALOAD => 1,
        LLOAD | DLOAD => 2,
        ILOAD_0..=ALOAD_3 => match (opcode - ILOAD_0) >> 2 {
            1 | 3 => 2,
            _ => 1,
        },
        IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => -1,
        LALOAD | DALOAD => 0,
        ISTORE | FSTORE | ASTORE => -1,
        LSTORE | DSTORE => -2,
        ISTORE_0..=ASTORE_3 => match (opcode - ISTORE_0) >> 2 {
            1 | 3 => -2,
            _ => -1,
        },
        LASTORE | DASTORE => -4,
        IASTORE..=SASTORE => -3,
        POP => -1,
        POP2 => -2,
        DUP | DUP_X1 | DUP_X2 => 1,
        DUP2 | DUP2_X1 | DUP2_X2 => 2,
        SWAP => 0,

        // add, sub, mul, div, rem
        IADD..=DREM => match (opcode - IADD) & 1 {
            1 => -2,
            _ => -1,
        },
        INEG..=DNEG => 0,
        ISHL..=LUSHR => -1,
        IAND | IOR | IXOR => -1,
        LAND | LOR | LXOR => -2,
        IINC => 0,
        I2L | I2D | F2L | F2D => 1,
        L2I | L2F | D2I | D2F => -1,
        I2F | L2D | F2I | D2L | I2B | I2C | I2S => 0,
        LCMP | DCMPL | DCMPG => -3,
        FCMPL | FCMPG => -1,
        IFEQ..=IFLE | IFNULL | IFNONNULL => -1,
        IF_ICMPEQ..=IF_ACMPNE => -2,
        GOTO | GOTO_W | RET => 0,
        JSR | JSR_W => 1,
        TABLESWITCH | LOOKUPSWITCH => -1,
        IRETURN | FRETURN | ARETURN => -1,
        LRETURN | DRETURN => -2,
        RETURN => 0,
        NEW => 1,
        NEWARRAY | ANEWARRAY | ARRAYLENGTH | CHECKCAST | INSTANCEOF => 0,
        ATHROW | MONITORENTER | MONITOREXIT => -1,
        _ => return None,
    };
    Some(delta)
}
