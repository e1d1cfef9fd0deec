use crate::jvm::Error;
use std::iter::Peekable;
use std::str::Chars;

/// Number of local variable or operand stack slots a value occupies
pub trait Width {
    fn width(&self) -> usize;
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self, Error> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)
            .ok_or_else(|| Error::InvalidDescriptor(source.to_owned()))?;
        match chars.next() {
            None => Ok(ret),
            Some(_) => Err(Error::InvalidDescriptor(source.to_owned())),
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Option<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl BaseType {
    fn from_char(c: char) -> Option<BaseType> {
        Some(match c {
            'B' => BaseType::Byte,
            'C' => BaseType::Char,
            'D' => BaseType::Double,
            'F' => BaseType::Float,
            'I' => BaseType::Int,
            'J' => BaseType::Long,
            'S' => BaseType::Short,
            'Z' => BaseType::Boolean,
            _ => return None,
        })
    }
}

/// Type of a field, local variable, or method parameter
///
/// Reference types keep their internal form: a class name such as `java/lang/String`, or a full
/// array descriptor such as `[[I`. This is the same form used by `CONSTANT_Class` entries.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Object(String),
    Array(String),
}

impl FieldType {
    /// Internal name of a reference type (as used in `CONSTANT_Class`)
    pub fn internal_name(&self) -> Option<&str> {
        match self {
            FieldType::Base(_) => None,
            FieldType::Object(name) | FieldType::Array(name) => Some(name),
        }
    }
}

impl Width for FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base) => base.width(),
            _ => 1,
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Option<Self> {
        match source.next()? {
            'L' => {
                let mut class_name = String::new();
                loop {
                    match source.next()? {
                        ';' => return Some(FieldType::Object(class_name)),
                        c => class_name.push(c),
                    }
                }
            }
            '[' => {
                let mut descriptor = String::from("[");
                while source.next_if_eq(&'[').is_some() {
                    descriptor.push('[');
                }
                match FieldType::parse_from(source)? {
                    FieldType::Base(base) => {
                        let c = match base {
                            BaseType::Byte => 'B',
                            BaseType::Char => 'C',
                            BaseType::Double => 'D',
                            BaseType::Float => 'F',
                            BaseType::Int => 'I',
                            BaseType::Long => 'J',
                            BaseType::Short => 'S',
                            BaseType::Boolean => 'Z',
                        };
                        descriptor.push(c);
                    }
                    FieldType::Object(name) => {
                        descriptor.push('L');
                        descriptor.push_str(&name);
                        descriptor.push(';');
                    }
                    FieldType::Array(_) => return None,
                }
                Some(FieldType::Array(descriptor))
            }
            c => BaseType::from_char(c).map(FieldType::Base),
        }
    }
}

/// Method descriptor, such as `(ILjava/lang/String;)V`
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,

    /// `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Number of local slots the parameters take up (not counting `this`)
    pub fn parameter_length(&self) -> usize {
        self.parameters.iter().map(Width::width).sum()
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Option<Self> {
        if source.next()? != '(' {
            return None;
        }
        let mut parameters = vec![];
        while source.next_if_eq(&')').is_none() {
            parameters.push(FieldType::parse_from(source)?);
        }
        let return_type = if source.next_if_eq(&'V').is_some() {
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };
        Some(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

/// Packed sizes of the arguments and return value of a method descriptor
///
/// The result is `(argument_slots + 1) << 2 | return_slots`, where the `+ 1` accounts for an
/// implicit `this` argument. Invocation instructions need both numbers to adjust the stack size.
pub fn arguments_and_return_sizes(descriptor: &str) -> Result<u32, Error> {
    let parsed = MethodDescriptor::parse(descriptor)?;
    let return_size = parsed.return_type.as_ref().map_or(0, Width::width);
    Ok(((parsed.parameter_length() as u32 + 1) << 2) | return_size as u32)
}

/// Width of a field descriptor: 2 for `long`/`double`, 1 otherwise
pub fn field_width(descriptor: &str) -> usize {
    match descriptor.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_field_types() {
        assert_eq!(FieldType::parse("I").unwrap(), FieldType::Base(BaseType::Int));
        assert_eq!(
            FieldType::parse("Ljava/lang/String;").unwrap(),
            FieldType::Object("java/lang/String".to_owned())
        );
        assert_eq!(
            FieldType::parse("[[Ljava/lang/Object;").unwrap(),
            FieldType::Array("[[Ljava/lang/Object;".to_owned())
        );
        assert_eq!(FieldType::parse("[J").unwrap().internal_name(), Some("[J"));
        assert!(FieldType::parse("Ljava/lang/String").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(FieldType::parse("V").is_err());
    }

    #[test]
    fn parse_method_descriptors() {
        let desc = MethodDescriptor::parse("(IJ[DLjava/lang/String;)Z").unwrap();
        assert_eq!(desc.parameters.len(), 4);
        assert_eq!(desc.parameter_length(), 5);
        assert_eq!(desc.return_type, Some(FieldType::Base(BaseType::Boolean)));

        let void = MethodDescriptor::parse("()V").unwrap();
        assert!(void.parameters.is_empty());
        assert_eq!(void.return_type, None);

        assert!(MethodDescriptor::parse("(I").is_err());
    }

    #[test]
    fn packed_sizes() {
        assert_eq!(arguments_and_return_sizes("()V").unwrap(), 1 << 2);
        assert_eq!(arguments_and_return_sizes("(II)V").unwrap(), 3 << 2);
        assert_eq!(arguments_and_return_sizes("(JLjava/lang/Object;)D").unwrap(), (4 << 2) | 2);
        assert_eq!(field_width("J"), 2);
        assert_eq!(field_width("Ljava/lang/Long;"), 1);
    }
}
