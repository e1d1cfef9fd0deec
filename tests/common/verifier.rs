//! Operand stack type checking of straight-line methods, following the verifier's rules for
//! value categories

use bytecov::jvm::class_file::{ConstValue, Handle};
use bytecov::jvm::code::{Label, Labels, MethodVisitor};
use bytecov::jvm::descriptors::{BaseType, FieldType, MethodDescriptor, ParseDescriptor};
use bytecov::jvm::opcodes::*;
use bytecov::jvm::{ClassReader, Error};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl Kind {
    fn words(self) -> usize {
        match self {
            Kind::Long | Kind::Double => 2,
            _ => 1,
        }
    }

    fn of(field_type: &FieldType) -> Kind {
        match field_type {
            FieldType::Base(BaseType::Long) => Kind::Long,
            FieldType::Base(BaseType::Double) => Kind::Double,
            FieldType::Base(BaseType::Float) => Kind::Float,
            FieldType::Base(_) => Kind::Int,
            _ => Kind::Ref,
        }
    }

    fn of_descriptor(descriptor: &str) -> Kind {
        Kind::of(&FieldType::parse(descriptor).unwrap())
    }
}

/// Tracks the types on the operand stack and in locals, panicking on the first mismatch
pub struct StackChecker {
    method: String,
    labels: Labels,
    locals: Vec<Option<Kind>>,
    stack: Vec<Kind>,
    max_words: usize,
    returned: bool,

    /// `owner.name` of every method invoked, in order
    pub calls: Vec<String>,
}

impl StackChecker {
    pub fn new(method: &str, is_static: bool, descriptor: &str) -> StackChecker {
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let mut locals = vec![];
        if !is_static {
            locals.push(Some(Kind::Ref));
        }
        for parameter in &descriptor.parameters {
            let kind = Kind::of(parameter);
            locals.push(Some(kind));
            if kind.words() == 2 {
                locals.push(None);
            }
        }
        StackChecker {
            method: method.to_owned(),
            labels: Labels::new(),
            locals,
            stack: vec![],
            max_words: 0,
            returned: false,
            calls: vec![],
        }
    }

    fn words(&self) -> usize {
        self.stack.iter().map(|kind| kind.words()).sum()
    }

    fn push(&mut self, kind: Kind) {
        assert!(!self.returned, "{}: code after return", self.method);
        self.stack.push(kind);
        self.max_words = self.max_words.max(self.words());
    }

    fn push_all(&mut self, kinds: &[Kind]) {
        for kind in kinds {
            self.push(*kind);
        }
    }

    fn pop(&mut self, expected: Kind) {
        let actual = self.stack.pop();
        assert_eq!(actual, Some(expected), "{}: operand type", self.method);
    }

    /// Pop values spanning exactly `words` stack words, never splitting a long or double
    fn take_words(&mut self, words: usize) -> Vec<Kind> {
        let mut taken = vec![];
        let mut total = 0;
        while total < words {
            let kind = self
                .stack
                .pop()
                .unwrap_or_else(|| panic!("{}: stack underflow", self.method));
            total += kind.words();
            taken.insert(0, kind);
        }
        assert_eq!(total, words, "{}: category 2 value split", self.method);
        taken
    }

    /// `top` words are copied under the `under` words below them
    fn dup(&mut self, top: usize, under: usize) {
        let copied = self.take_words(top);
        let skipped = self.take_words(under);
        self.push_all(&copied);
        self.push_all(&skipped);
        self.push_all(&copied);
    }

    fn invoke(&mut self, descriptor: &str, has_receiver: bool) {
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        for parameter in descriptor.parameters.iter().rev() {
            self.pop(Kind::of(parameter));
        }
        if has_receiver {
            self.pop(Kind::Ref);
        }
        if let Some(return_type) = &descriptor.return_type {
            self.push(Kind::of(return_type));
        }
    }

    fn unsupported(&self, what: &str) -> ! {
        panic!("{}: {} in straight-line code", self.method, what)
    }
}

impl MethodVisitor for StackChecker {
    fn labels(&mut self) -> &mut Labels {
        &mut self.labels
    }

    fn visit_annotation(&mut self, _descriptor: &str) -> Result<(), Error> {
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        _start: Label,
        _end: Label,
        _handler: Label,
        _catch_type: Option<&str>,
    ) -> Result<(), Error> {
        self.unsupported("exception handler")
    }

    fn visit_label(&mut self, _label: Label) -> Result<(), Error> {
        Ok(())
    }

    fn visit_line_number(&mut self, _line: u16, _start: Label) -> Result<(), Error> {
        Ok(())
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<(), Error> {
        match opcode {
            NOP => (),
            ACONST_NULL => self.push(Kind::Ref),
            ICONST_M1..=ICONST_5 => self.push(Kind::Int),
            LCONST_0 | LCONST_1 => self.push(Kind::Long),
            FCONST_0..=FCONST_2 => self.push(Kind::Float),
            DCONST_0 | DCONST_1 => self.push(Kind::Double),
            IADD | IAND | IOR => {
                self.pop(Kind::Int);
                self.pop(Kind::Int);
                self.push(Kind::Int);
            }
            LADD | LAND | LOR => {
                self.pop(Kind::Long);
                self.pop(Kind::Long);
                self.push(Kind::Long);
            }
            I2L => {
                self.pop(Kind::Int);
                self.push(Kind::Long);
            }
            L2I => {
                self.pop(Kind::Long);
                self.push(Kind::Int);
            }
            POP => {
                self.take_words(1);
            }
            POP2 => {
                self.take_words(2);
            }
            DUP => self.dup(1, 0),
            DUP_X1 => self.dup(1, 1),
            DUP_X2 => self.dup(1, 2),
            DUP2 => self.dup(2, 0),
            DUP2_X1 => self.dup(2, 1),
            DUP2_X2 => self.dup(2, 2),
            SWAP => {
                let top = self.take_words(1);
                let below = self.take_words(1);
                self.push_all(&top);
                self.push_all(&below);
            }
            IRETURN | LRETURN | FRETURN | DRETURN | ARETURN | RETURN => {
                match opcode {
                    IRETURN => self.pop(Kind::Int),
                    LRETURN => self.pop(Kind::Long),
                    FRETURN => self.pop(Kind::Float),
                    DRETURN => self.pop(Kind::Double),
                    ARETURN => self.pop(Kind::Ref),
                    _ => (),
                }
                self.returned = true;
            }
            other => self.unsupported(&format!("opcode {}", other)),
        }
        Ok(())
    }

    fn visit_int_insn(&mut self, opcode: u8, _operand: i32) -> Result<(), Error> {
        match opcode {
            BIPUSH | SIPUSH => self.push(Kind::Int),
            other => self.unsupported(&format!("opcode {}", other)),
        }
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, var_index: u16) -> Result<(), Error> {
        let index = var_index as usize;
        let (kind, is_load) = match opcode {
            ILOAD => (Kind::Int, true),
            LLOAD => (Kind::Long, true),
            FLOAD => (Kind::Float, true),
            DLOAD => (Kind::Double, true),
            ALOAD => (Kind::Ref, true),
            ISTORE => (Kind::Int, false),
            LSTORE => (Kind::Long, false),
            FSTORE => (Kind::Float, false),
            DSTORE => (Kind::Double, false),
            ASTORE => (Kind::Ref, false),
            other => self.unsupported(&format!("opcode {}", other)),
        };
        if is_load {
            assert_eq!(
                self.locals.get(index).copied().flatten(),
                Some(kind),
                "{}: local {}",
                self.method,
                index
            );
            self.push(kind);
        } else {
            self.pop(kind);
            let needed = index + kind.words();
            if self.locals.len() < needed {
                self.locals.resize(needed, None);
            }
            self.locals[index] = Some(kind);
            if kind.words() == 2 {
                self.locals[index + 1] = None;
            }
        }
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, _class: &str) -> Result<(), Error> {
        match opcode {
            NEW => self.push(Kind::Ref),
            CHECKCAST => {
                self.pop(Kind::Ref);
                self.push(Kind::Ref);
            }
            other => self.unsupported(&format!("opcode {}", other)),
        }
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        _owner: &str,
        _name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        let kind = Kind::of_descriptor(descriptor);
        match opcode {
            GETSTATIC => self.push(kind),
            PUTSTATIC => self.pop(kind),
            GETFIELD => {
                self.pop(Kind::Ref);
                self.push(kind);
            }
            _ => {
                self.pop(kind);
                self.pop(Kind::Ref);
            }
        }
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        _is_interface: bool,
    ) -> Result<(), Error> {
        self.invoke(descriptor, opcode != INVOKESTATIC);
        self.calls.push(format!("{}.{}", owner, name));
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        _name: &str,
        descriptor: &str,
        _bootstrap_method: &Handle,
        _bootstrap_arguments: &[ConstValue],
    ) -> Result<(), Error> {
        self.invoke(descriptor, false);
        Ok(())
    }

    fn visit_jump_insn(&mut self, _opcode: u8, _label: Label) -> Result<(), Error> {
        self.unsupported("jump")
    }

    fn visit_ldc_insn(&mut self, value: &ConstValue) -> Result<(), Error> {
        let kind = match value {
            ConstValue::Integer(_) => Kind::Int,
            ConstValue::Float(_) => Kind::Float,
            ConstValue::Long(_) => Kind::Long,
            ConstValue::Double(_) => Kind::Double,
            ConstValue::Dynamic(dynamic) => Kind::of_descriptor(&dynamic.descriptor),
            _ => Kind::Ref,
        };
        self.push(kind);
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var_index: u16, _increment: i16) -> Result<(), Error> {
        assert_eq!(
            self.locals.get(var_index as usize).copied().flatten(),
            Some(Kind::Int),
            "{}: iinc local",
            self.method
        );
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        _min: i32,
        _max: i32,
        _default: Label,
        _labels: &[Label],
    ) -> Result<(), Error> {
        self.unsupported("switch")
    }

    fn visit_lookup_switch_insn(
        &mut self,
        _default: Label,
        _keys: &[i32],
        _labels: &[Label],
    ) -> Result<(), Error> {
        self.unsupported("switch")
    }

    fn visit_multi_anew_array_insn(
        &mut self,
        _descriptor: &str,
        _dimensions: u8,
    ) -> Result<(), Error> {
        self.unsupported("multianewarray")
    }

    fn visit_local_variable(
        &mut self,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _start: Label,
        _end: Label,
        _index: u16,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn visit_max_stack(&mut self, max_stack: u16) -> Result<(), Error> {
        assert!(self.returned, "{}: falls off the end of the code", self.method);
        assert!(
            self.max_words <= max_stack as usize,
            "{}: needs {} stack words, declares {}",
            self.method,
            self.max_words,
            max_stack
        );
        Ok(())
    }
}

/// Check every method with code in a class, returning the methods each one invokes
pub fn check_class(class_bytes: &[u8]) -> Vec<(String, Vec<String>)> {
    let reader = ClassReader::new(class_bytes.to_vec()).unwrap();
    let mut checked = vec![];
    for method in reader.methods.iter().filter(|method| method.code.is_some()) {
        let header = &method.header;
        let mut checker = StackChecker::new(&header.name, header.is_static(), &header.descriptor);
        reader.accept_method(method, &mut checker).unwrap();
        checked.push((header.name.to_string(), checker.calls));
    }
    checked
}
