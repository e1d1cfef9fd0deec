use crate::jvm::class_file::{BytecodeReader, Version};
use crate::jvm::code::{Label, Labels, MethodHeader, MethodVisitor};
use crate::jvm::opcodes::{self, InsnKind, GOTO, GOTO_W, IINC, JSR, JSR_W};
use crate::jvm::{ClassAccessFlags, Error, FieldAccessFlags, MethodAccessFlags};
use std::collections::HashMap;
use std::rc::Rc;

/// Attribute of a class, field, or method, located in the class file bytes
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name: Rc<str>,
    pub name_index: u16,

    /// Offset of the attribute body, just past its length
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name: Rc<str>,
    pub descriptor: Rc<str>,

    /// Byte range of the whole `field_info`
    pub range: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub header: MethodHeader,

    /// Descriptors of the runtime-visible annotations on the method
    pub annotations: Vec<Rc<str>>,

    /// Offset of the body of the `Code` attribute, if there is one
    pub code: Option<usize>,

    /// Attributes other than `Code`, `Exceptions`, and `Signature`
    pub other_attributes: Vec<AttributeInfo>,

    /// Byte range of the whole `method_info`
    pub range: (usize, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassInfo {
    pub inner_class: Rc<str>,
    pub outer_class: Option<Rc<str>>,
    pub inner_name: Option<Rc<str>>,
    pub access_flags: u16,
}

/// Parsed view of a class file
///
/// Only the structure needed to rewrite a class is decoded up front: names and flags of the class
/// and its members, and where each member and attribute sits in the bytes. Method bodies are
/// decoded on demand, by replaying them into a [`MethodVisitor`] with [`ClassReader::accept_method`].
#[derive(Debug)]
pub struct ClassReader {
    bytecode: BytecodeReader,
    pub version: Version,
    pub access_flags: ClassAccessFlags,

    /// Internal name of the class (empty if the class file doesn't name one)
    pub this_class: Rc<str>,
    pub super_class: Option<Rc<str>>,
    pub interfaces: Vec<Rc<str>>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub source_file: Option<Rc<str>>,
    pub inner_classes: Vec<InnerClassInfo>,

    /// Descriptors of the runtime-visible annotations on the class
    pub annotations: Vec<Rc<str>>,

    /// Class attributes other than `BootstrapMethods`
    pub attributes: Vec<AttributeInfo>,

    /// Byte ranges of the class header (access flags up to the interfaces) and of the fields
    pub header_range: (usize, usize),
    pub fields_range: (usize, usize),
}

impl ClassReader {
    pub fn new(bytes: Vec<u8>) -> Result<ClassReader, Error> {
        let mut bytecode = BytecodeReader::new(bytes)?;
        let version = Version {
            minor_version: bytecode.u16_at(4)?,
            major_version: bytecode.u16_at(6)?,
        };

        bytecode.code_index = bytecode.header();
        let header_start = bytecode.code_index;
        let access_flags = ClassAccessFlags::from_bits_truncate(bytecode.read_u16()?);
        let this_class = bytecode.read_class()?.unwrap_or_else(|| Rc::from(""));
        let super_class = bytecode.read_class()?;
        let interface_count = bytecode.read_u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            if let Some(interface) = bytecode.read_class()? {
                interfaces.push(interface);
            }
        }
        let header_range = (header_start, bytecode.code_index);

        let fields_start = bytecode.code_index;
        let field_count = bytecode.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let start = bytecode.code_index;
            let access_flags = FieldAccessFlags::from_bits_truncate(bytecode.read_u16()?);
            let name = read_name(&mut bytecode)?;
            let descriptor = read_name(&mut bytecode)?;
            read_attributes(&mut bytecode)?;
            fields.push(FieldInfo {
                access_flags,
                name,
                descriptor,
                range: (start, bytecode.code_index),
            });
        }
        let fields_range = (fields_start, bytecode.code_index);

        let method_count = bytecode.read_u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(read_method(&mut bytecode)?);
        }

        let mut source_file = None;
        let mut inner_classes = vec![];
        let mut annotations = vec![];
        let mut attributes = vec![];
        for attribute in read_attributes(&mut bytecode)? {
            match &*attribute.name {
                "BootstrapMethods" => {
                    bytecode.set_bootstrap_methods(attribute.offset + 2);
                    continue;
                }
                "SourceFile" => source_file = bytecode.read_utf8_at(attribute.offset)?,
                "InnerClasses" => inner_classes = read_inner_classes(&bytecode, &attribute)?,
                "RuntimeVisibleAnnotations" => {
                    annotations = read_annotation_types(&bytecode, attribute.offset)?
                }
                _ => (),
            }
            attributes.push(attribute);
        }

        Ok(ClassReader {
            bytecode,
            version,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            source_file,
            inner_classes,
            annotations,
            attributes,
            header_range,
            fields_range,
        })
    }

    pub fn bytecode(&self) -> &BytecodeReader {
        &self.bytecode
    }

    /// Raw bytes in the given range of the class file
    pub fn bytes(&self, (start, end): (usize, usize)) -> Result<&[u8], Error> {
        self.bytecode.bytes(start, end - start)
    }

    /// Length of the bytecode of a method (0 for methods without code)
    pub fn code_length(&self, method: &MethodInfo) -> Result<usize, Error> {
        match method.code {
            Some(offset) => Ok(self.bytecode.i32_at(offset + 4)? as u32 as usize),
            None => Ok(0),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Replay the annotations and code of a method into a visitor
    pub fn accept_method(
        &self,
        method: &MethodInfo,
        visitor: &mut dyn MethodVisitor,
    ) -> Result<(), Error> {
        for annotation in &method.annotations {
            visitor.visit_annotation(annotation)?;
        }
        if let Some(offset) = method.code {
            CodeReplay::new(&self.bytecode, offset)?.accept(visitor)?;
        }
        Ok(())
    }
}

fn read_name(bytecode: &mut BytecodeReader) -> Result<Rc<str>, Error> {
    let offset = bytecode.code_index;
    bytecode.read_utf8()?.ok_or(Error::InvalidConstantIndex {
        index: bytecode.u16_at(offset).unwrap_or(0),
        expected: "Utf8",
    })
}

fn read_attributes(bytecode: &mut BytecodeReader) -> Result<Vec<AttributeInfo>, Error> {
    let count = bytecode.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = bytecode.u16_at(bytecode.code_index)?;
        let name = read_name(bytecode)?;
        let length = bytecode.read_i32()? as u32 as usize;
        let offset = bytecode.code_index;
        bytecode.bytes(offset, length)?;
        bytecode.code_index += length;
        attributes.push(AttributeInfo {
            name,
            name_index,
            offset,
            length,
        });
    }
    Ok(attributes)
}

fn read_method(bytecode: &mut BytecodeReader) -> Result<MethodInfo, Error> {
    let start = bytecode.code_index;
    let access_flags = MethodAccessFlags::from_bits_truncate(bytecode.read_u16()?);
    let name = read_name(bytecode)?;
    let descriptor = read_name(bytecode)?;

    let mut header = MethodHeader {
        access_flags,
        name,
        descriptor,
        signature: None,
        exceptions: vec![],
    };
    let mut annotations = vec![];
    let mut code = None;
    let mut other_attributes = vec![];

    for attribute in read_attributes(bytecode)? {
        match &*attribute.name {
            "Code" => code = Some(attribute.offset),
            "Signature" => header.signature = bytecode.read_utf8_at(attribute.offset)?,
            "Exceptions" => {
                let count = bytecode.u16_at(attribute.offset)?;
                for i in 0..count as usize {
                    if let Some(class) = bytecode.read_class_at(attribute.offset + 2 + 2 * i)? {
                        header.exceptions.push(class);
                    }
                }
            }
            other => {
                if other == "RuntimeVisibleAnnotations" {
                    annotations = read_annotation_types(bytecode, attribute.offset)?;
                }
                other_attributes.push(attribute);
            }
        }
    }

    Ok(MethodInfo {
        header,
        annotations,
        code,
        other_attributes,
        range: (start, bytecode.code_index),
    })
}

fn read_inner_classes(
    bytecode: &BytecodeReader,
    attribute: &AttributeInfo,
) -> Result<Vec<InnerClassInfo>, Error> {
    let count = bytecode.u16_at(attribute.offset)? as usize;
    let mut inner_classes = Vec::with_capacity(count);
    for i in 0..count {
        let entry = attribute.offset + 2 + 8 * i;
        if let Some(inner_class) = bytecode.read_class_at(entry)? {
            inner_classes.push(InnerClassInfo {
                inner_class,
                outer_class: bytecode.read_class_at(entry + 2)?,
                inner_name: bytecode.read_utf8_at(entry + 4)?,
                access_flags: bytecode.u16_at(entry + 6)?,
            });
        }
    }
    Ok(inner_classes)
}

/// Type descriptors of the annotations in a `RuntimeVisibleAnnotations` attribute
fn read_annotation_types(bytecode: &BytecodeReader, offset: usize) -> Result<Vec<Rc<str>>, Error> {
    let count = bytecode.u16_at(offset)?;
    let mut types = Vec::with_capacity(count as usize);
    let mut offset = offset + 2;
    for _ in 0..count {
        if let Some(descriptor) = bytecode.read_utf8_at(offset)? {
            types.push(descriptor);
        }
        offset = skip_annotation(bytecode, offset)?;
    }
    Ok(types)
}

/// Offset just past the annotation starting at `offset`
fn skip_annotation(bytecode: &BytecodeReader, offset: usize) -> Result<usize, Error> {
    let pairs = bytecode.u16_at(offset + 2)?;
    let mut offset = offset + 4;
    for _ in 0..pairs {
        offset = skip_element_value(bytecode, offset + 2)?;
    }
    Ok(offset)
}

fn skip_element_value(bytecode: &BytecodeReader, offset: usize) -> Result<usize, Error> {
    Ok(match bytecode.u8_at(offset)? {
        b'e' => offset + 5,
        b'@' => skip_annotation(bytecode, offset + 1)?,
        b'[' => {
            let count = bytecode.u16_at(offset + 1)?;
            let mut offset = offset + 3;
            for _ in 0..count {
                offset = skip_element_value(bytecode, offset)?;
            }
            offset
        }
        _ => offset + 3,
    })
}

/// Labels of a method body, by bytecode offset
struct LabelTable {
    labels: Vec<Option<Label>>,
}

impl LabelTable {
    fn get(&self, offset: usize) -> Option<Label> {
        self.labels.get(offset).copied().flatten()
    }

    fn slot(&mut self, offset: usize) -> Result<&mut Option<Label>, Error> {
        self.labels
            .get_mut(offset)
            .ok_or(Error::Truncated { offset, needed: 1 })
    }

    /// Label at an offset, creating it if needed
    fn create(&mut self, arena: &mut Labels, offset: usize) -> Result<Label, Error> {
        Ok(*self.slot(offset)?.get_or_insert_with(|| arena.new_label()))
    }

    /// Label at an offset, creating it as a debug-only label if needed
    fn create_debug(&mut self, arena: &mut Labels, offset: usize) -> Result<Label, Error> {
        let slot = self.slot(offset)?;
        if let Some(label) = slot {
            return Ok(*label);
        }
        let label = arena.new_label();
        arena.mark_debug(label);
        *slot = Some(label);
        Ok(label)
    }
}

struct LocalVariable {
    name: Rc<str>,
    descriptor: Rc<str>,
    start: usize,
    length: usize,
    index: u16,
}

/// Decoder of one `Code` attribute
struct CodeReplay<'r> {
    bytecode: &'r BytecodeReader,
    max_stack: u16,

    /// Offset of the first instruction in the class file
    start: usize,
    length: usize,

    /// Exception table and attributes, past the code array
    exception_table: usize,
    attributes: Vec<AttributeInfo>,
}

impl<'r> CodeReplay<'r> {
    fn new(bytecode: &'r BytecodeReader, offset: usize) -> Result<CodeReplay<'r>, Error> {
        let max_stack = bytecode.u16_at(offset)?;
        let length = bytecode.i32_at(offset + 4)? as u32 as usize;
        let start = offset + 8;
        bytecode.bytes(start, length)?;

        let exception_table = start + length;
        let handler_count = bytecode.u16_at(exception_table)? as usize;

        let attributes_offset = exception_table + 2 + 8 * handler_count;
        let count = bytecode.u16_at(attributes_offset)?;
        let mut attributes = Vec::with_capacity(count as usize);
        let mut cursor = attributes_offset + 2;
        for _ in 0..count {
            let name_index = bytecode.u16_at(cursor)?;
            let name = bytecode.read_utf8_item(name_index)?;
            let attribute_length = bytecode.i32_at(cursor + 2)? as u32 as usize;
            attributes.push(AttributeInfo {
                name,
                name_index,
                offset: cursor + 6,
                length: attribute_length,
            });
            cursor += 6 + attribute_length;
        }

        Ok(CodeReplay {
            bytecode,
            max_stack,
            start,
            length,
            exception_table,
            attributes,
        })
    }

    fn u8(&self, offset: usize) -> Result<u8, Error> {
        self.bytecode.u8_at(self.start + offset)
    }

    fn u16(&self, offset: usize) -> Result<u16, Error> {
        self.bytecode.u16_at(self.start + offset)
    }

    fn i32(&self, offset: usize) -> Result<i32, Error> {
        self.bytecode.i32_at(self.start + offset)
    }

    /// Absolute offset of a jump target
    fn target(&self, offset: usize, delta: i32) -> Result<usize, Error> {
        let target = offset as i64 + delta as i64;
        if target < 0 || target > self.length as i64 {
            return Err(Error::Truncated {
                offset: self.start + offset,
                needed: delta.unsigned_abs() as usize,
            });
        }
        Ok(target as usize)
    }

    fn opcode_and_kind(&self, offset: usize) -> Result<(u8, InsnKind), Error> {
        let opcode = self.u8(offset)?;
        let kind = opcodes::insn_kind(opcode).ok_or(Error::UnknownOpcode { opcode, offset })?;
        Ok((opcode, kind))
    }

    /// Length of the instruction at `offset`, along with the offsets it can jump to
    fn scan(&self, offset: usize, targets: &mut Vec<usize>) -> Result<usize, Error> {
        use InsnKind::*;
        let (_, kind) = self.opcode_and_kind(offset)?;
        Ok(match kind {
            NoArg | ImplicitVar => 1,
            SignedByte | Var | Ldc => 2,
            SignedShort | Type | Field | Method | LdcWide | Iinc => 3,
            MultiANewArray => 4,
            InterfaceMethod | InvokeDynamic => 5,
            Jump => {
                targets.push(self.target(offset, self.u16(offset + 1)? as i16 as i32)?);
                3
            }
            JumpWide => {
                targets.push(self.target(offset, self.i32(offset + 1)?)?);
                5
            }
            Wide if self.u8(offset + 1)? == IINC => 6,
            Wide => 4,
            TableSwitch => {
                let operands = switch_operands(offset);
                targets.push(self.target(offset, self.i32(operands)?)?);
                let low = self.i32(operands + 4)? as i64;
                let high = self.i32(operands + 8)? as i64;
                let count = (high - low + 1).max(0) as usize;
                for case in 0..count {
                    targets.push(self.target(offset, self.i32(operands + 12 + 4 * case)?)?);
                }
                operands + 12 + 4 * count - offset
            }
            LookupSwitch => {
                let operands = switch_operands(offset);
                targets.push(self.target(offset, self.i32(operands)?)?);
                let count = self.i32(operands + 4)?.max(0) as usize;
                for case in 0..count {
                    targets.push(self.target(offset, self.i32(operands + 12 + 8 * case)?)?);
                }
                operands + 8 + 8 * count - offset
            }
        })
    }

    fn accept(&self, visitor: &mut dyn MethodVisitor) -> Result<(), Error> {
        let mut table = LabelTable {
            labels: vec![None; self.length + 1],
        };

        // Labels for jump targets
        let mut targets = vec![];
        let mut offset = 0;
        while offset < self.length {
            offset += self.scan(offset, &mut targets)?;
        }
        for target in targets {
            table.create(visitor.labels(), target)?;
        }

        // Labels for exception handlers
        let handler_count = self.bytecode.u16_at(self.exception_table)? as usize;
        let mut handlers = Vec::with_capacity(handler_count);
        for i in 0..handler_count {
            let entry = self.exception_table + 2 + 8 * i;
            let start = table.create(visitor.labels(), self.bytecode.u16_at(entry)? as usize)?;
            let end = table.create(visitor.labels(), self.bytecode.u16_at(entry + 2)? as usize)?;
            let handler =
                table.create(visitor.labels(), self.bytecode.u16_at(entry + 4)? as usize)?;
            let catch_type = self.bytecode.read_class_at(entry + 6)?;
            handlers.push((start, end, handler, catch_type));
        }

        // Debug labels, for line numbers and local variables
        let mut lines: HashMap<usize, Vec<u16>> = HashMap::new();
        let mut variables = vec![];
        let mut signatures: HashMap<(usize, u16), Rc<str>> = HashMap::new();
        for attribute in &self.attributes {
            let count = self.bytecode.u16_at(attribute.offset)? as usize;
            match &*attribute.name {
                "LineNumberTable" => {
                    for i in 0..count {
                        let entry = attribute.offset + 2 + 4 * i;
                        let start = self.bytecode.u16_at(entry)? as usize;
                        let line = self.bytecode.u16_at(entry + 2)?;
                        let label = table.create_debug(visitor.labels(), start)?;
                        if visitor.labels().line(label) == 0 {
                            visitor.labels().set_line(label, line as u32);
                        }
                        lines.entry(start).or_default().push(line);
                    }
                }
                "LocalVariableTable" | "LocalVariableTypeTable" => {
                    let is_type_table = &*attribute.name == "LocalVariableTypeTable";
                    for i in 0..count {
                        let entry = attribute.offset + 2 + 10 * i;
                        let start = self.bytecode.u16_at(entry)? as usize;
                        let length = self.bytecode.u16_at(entry + 2)? as usize;
                        let name = self.bytecode.read_utf8_item(self.bytecode.u16_at(entry + 4)?)?;
                        let descriptor =
                            self.bytecode.read_utf8_item(self.bytecode.u16_at(entry + 6)?)?;
                        let index = self.bytecode.u16_at(entry + 8)?;
                        if is_type_table {
                            signatures.insert((start, index), descriptor);
                        } else {
                            table.create_debug(visitor.labels(), start)?;
                            table.create_debug(visitor.labels(), start + length)?;
                            variables.push(LocalVariable {
                                name,
                                descriptor,
                                start,
                                length,
                                index,
                            });
                        }
                    }
                }
                _ => (),
            }
        }

        for (start, end, handler, catch_type) in handlers {
            visitor.visit_try_catch_block(start, end, handler, catch_type.as_deref())?;
        }

        let mut offset = 0;
        while offset < self.length {
            self.visit_position(visitor, &table, &lines, offset)?;
            offset += self.visit_insn(visitor, &table, offset)?;
        }
        self.visit_position(visitor, &table, &lines, self.length)?;

        for variable in &variables {
            let start = table.get(variable.start).ok_or(Error::UnresolvedLabel)?;
            let end = table
                .get(variable.start + variable.length)
                .ok_or(Error::UnresolvedLabel)?;
            let signature = signatures.get(&(variable.start, variable.index));
            visitor.visit_local_variable(
                &variable.name,
                &variable.descriptor,
                signature.map(|signature| &**signature),
                start,
                end,
                variable.index,
            )?;
        }

        visitor.visit_max_stack(self.max_stack)
    }

    fn visit_position(
        &self,
        visitor: &mut dyn MethodVisitor,
        table: &LabelTable,
        lines: &HashMap<usize, Vec<u16>>,
        offset: usize,
    ) -> Result<(), Error> {
        if let Some(label) = table.get(offset) {
            visitor.visit_label(label)?;
            for &line in lines.get(&offset).into_iter().flatten() {
                visitor.visit_line_number(line, label)?;
            }
        }
        Ok(())
    }

    fn label(&self, table: &LabelTable, offset: usize, delta: i32) -> Result<Label, Error> {
        table
            .get(self.target(offset, delta)?)
            .ok_or(Error::UnresolvedLabel)
    }

    /// Replay the instruction at `offset`, returning its length
    fn visit_insn(
        &self,
        visitor: &mut dyn MethodVisitor,
        table: &LabelTable,
        offset: usize,
    ) -> Result<usize, Error> {
        use InsnKind::*;
        let bytecode = self.bytecode;
        let (opcode, kind) = self.opcode_and_kind(offset)?;
        let length = match kind {
            NoArg => {
                visitor.visit_insn(opcode)?;
                1
            }
            ImplicitVar => {
                let (opcode, index) = opcodes::expand_short_var_form(opcode)
                    .ok_or(Error::UnknownOpcode { opcode, offset })?;
                visitor.visit_var_insn(opcode, index)?;
                1
            }
            SignedByte => {
                let operand = if opcode == opcodes::NEWARRAY {
                    self.u8(offset + 1)? as i32
                } else {
                    self.u8(offset + 1)? as i8 as i32
                };
                visitor.visit_int_insn(opcode, operand)?;
                2
            }
            SignedShort => {
                visitor.visit_int_insn(opcode, self.u16(offset + 1)? as i16 as i32)?;
                3
            }
            Var => {
                visitor.visit_var_insn(opcode, self.u8(offset + 1)? as u16)?;
                2
            }
            Type => {
                let class = bytecode.read_class_item(self.u16(offset + 1)?)?;
                visitor.visit_type_insn(opcode, &class)?;
                3
            }
            Field | Method | InterfaceMethod => {
                let member = bytecode.read_member_ref(self.u16(offset + 1)?)?;
                if kind == Field {
                    visitor.visit_field_insn(opcode, &member.owner, &member.name, &member.descriptor)?;
                } else {
                    visitor.visit_method_insn(
                        opcode,
                        &member.owner,
                        &member.name,
                        &member.descriptor,
                        member.is_interface,
                    )?;
                }
                if kind == InterfaceMethod {
                    5
                } else {
                    3
                }
            }
            InvokeDynamic => {
                let (bootstrap_index, name, descriptor) =
                    bytecode.read_invoke_dynamic(self.u16(offset + 1)?)?;
                let (handle, arguments) = bytecode.read_bootstrap_method(bootstrap_index)?;
                visitor.visit_invoke_dynamic_insn(&name, &descriptor, &handle, &arguments)?;
                5
            }
            Jump => {
                let label = self.label(table, offset, self.u16(offset + 1)? as i16 as i32)?;
                visitor.visit_jump_insn(opcode, label)?;
                3
            }
            JumpWide => {
                let label = self.label(table, offset, self.i32(offset + 1)?)?;
                let opcode = match opcode {
                    GOTO_W => GOTO,
                    JSR_W => JSR,
                    other => other,
                };
                visitor.visit_jump_insn(opcode, label)?;
                5
            }
            Ldc => {
                let value = bytecode.read_const(self.u8(offset + 1)? as u16)?;
                visitor.visit_ldc_insn(&value)?;
                2
            }
            LdcWide => {
                let value = bytecode.read_const(self.u16(offset + 1)?)?;
                visitor.visit_ldc_insn(&value)?;
                3
            }
            Iinc => {
                let index = self.u8(offset + 1)? as u16;
                let increment = self.u8(offset + 2)? as i8 as i16;
                visitor.visit_iinc_insn(index, increment)?;
                3
            }
            Wide => {
                let opcode = self.u8(offset + 1)?;
                let index = self.u16(offset + 2)?;
                if opcode == IINC {
                    visitor.visit_iinc_insn(index, self.u16(offset + 4)? as i16)?;
                    6
                } else {
                    visitor.visit_var_insn(opcode, index)?;
                    4
                }
            }
            TableSwitch => {
                let operands = switch_operands(offset);
                let default = self.label(table, offset, self.i32(operands)?)?;
                let low = self.i32(operands + 4)?;
                let high = self.i32(operands + 8)?;
                let count = (high as i64 - low as i64 + 1).max(0) as usize;
                let labels = (0..count)
                    .map(|case| self.label(table, offset, self.i32(operands + 12 + 4 * case)?))
                    .collect::<Result<Vec<Label>, Error>>()?;
                visitor.visit_table_switch_insn(low, high, default, &labels)?;
                operands + 12 + 4 * count - offset
            }
            LookupSwitch => {
                let operands = switch_operands(offset);
                let default = self.label(table, offset, self.i32(operands)?)?;
                let count = self.i32(operands + 4)?.max(0) as usize;
                let mut keys = Vec::with_capacity(count);
                let mut labels = Vec::with_capacity(count);
                for case in 0..count {
                    let pair = operands + 8 + 8 * case;
                    keys.push(self.i32(pair)?);
                    labels.push(self.label(table, offset, self.i32(pair + 4)?)?);
                }
                visitor.visit_lookup_switch_insn(default, &keys, &labels)?;
                operands + 8 + 8 * count - offset
            }
            MultiANewArray => {
                let class = bytecode.read_class_item(self.u16(offset + 1)?)?;
                visitor.visit_multi_anew_array_insn(&class, self.u8(offset + 3)?)?;
                4
            }
        };
        Ok(length)
    }
}

/// Offset of the 4-byte aligned operands of a switch whose opcode is at `offset`
fn switch_operands(offset: usize) -> usize {
    (offset + 4) & !3
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn switch_padding() {
        assert_eq!(switch_operands(0), 4);
        assert_eq!(switch_operands(1), 4);
        assert_eq!(switch_operands(3), 4);
        assert_eq!(switch_operands(4), 8);
    }
}
