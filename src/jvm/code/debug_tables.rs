use crate::jvm::class_file::ConstantPool;
use crate::jvm::code::label::{Label, Labels};
use crate::jvm::descriptors;
use crate::jvm::{ByteVector, Error};

/// `LineNumberTable` attribute of a `Code` attribute
#[derive(Debug, Default)]
pub struct LineNumberTableWriter {
    name_index: u16,
    count: u16,
    entries: Option<ByteVector>,
}

impl LineNumberTableWriter {
    pub fn new() -> LineNumberTableWriter {
        LineNumberTableWriter::default()
    }

    pub fn add_line_number(
        &mut self,
        pool: &mut ConstantPool,
        labels: &Labels,
        line: u16,
        start: Label,
    ) -> Result<(), Error> {
        let position = labels.position(start).ok_or(Error::UnresolvedLabel)?;
        if self.entries.is_none() {
            self.name_index = pool.new_utf8("LineNumberTable")?;
        }
        self.count += 1;
        self.entries
            .get_or_insert_with(ByteVector::new)
            .put_short(position as u16)
            .put_short(line);
        Ok(())
    }

    pub fn has_line_numbers(&self) -> bool {
        self.entries.is_some()
    }

    pub fn size(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| 8 + entries.len())
    }

    pub fn put(&self, out: &mut ByteVector) {
        if let Some(entries) = &self.entries {
            out.put_short(self.name_index)
                .put_int(2 + entries.len() as i32)
                .put_short(self.count)
                .put_byte_vector(entries);
        }
    }
}

#[derive(Debug, Default)]
struct LocalTable {
    name_index: u16,
    count: u16,
    entries: ByteVector,
}

impl LocalTable {
    fn size(&self) -> usize {
        8 + self.entries.len()
    }

    fn put(&self, out: &mut ByteVector) {
        out.put_short(self.name_index)
            .put_int(2 + self.entries.len() as i32)
            .put_short(self.count)
            .put_byte_vector(&self.entries);
    }
}

/// `LocalVariableTable` and `LocalVariableTypeTable` attributes of a `Code` attribute
///
/// Variables with a generic signature go in both tables.
#[derive(Debug, Default)]
pub struct LocalVariableTableWriter {
    variables: Option<LocalTable>,
    variable_types: Option<LocalTable>,
}

impl LocalVariableTableWriter {
    pub fn new() -> LocalVariableTableWriter {
        LocalVariableTableWriter::default()
    }

    /// Add a local variable, returning the number of local slots up to and including it
    #[allow(clippy::too_many_arguments)]
    pub fn add_local_variable(
        &mut self,
        pool: &mut ConstantPool,
        labels: &Labels,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<usize, Error> {
        let start = labels.position(start).ok_or(Error::UnresolvedLabel)?;
        let end = labels.position(end).ok_or(Error::UnresolvedLabel)?;
        let length = end.saturating_sub(start);

        if let Some(signature) = signature {
            if self.variable_types.is_none() {
                self.variable_types = Some(LocalTable {
                    name_index: pool.new_utf8("LocalVariableTypeTable")?,
                    ..LocalTable::default()
                });
            }
            let table = self.variable_types.get_or_insert_with(LocalTable::default);
            table
                .entries
                .put_short(start as u16)
                .put_short(length as u16)
                .put_short(pool.new_utf8(name)?)
                .put_short(pool.new_utf8(signature)?)
                .put_short(index);
            table.count += 1;
        }

        if self.variables.is_none() {
            self.variables = Some(LocalTable {
                name_index: pool.new_utf8("LocalVariableTable")?,
                ..LocalTable::default()
            });
        }
        let table = self.variables.get_or_insert_with(LocalTable::default);
        table
            .entries
            .put_short(start as u16)
            .put_short(length as u16)
            .put_short(pool.new_utf8(name)?)
            .put_short(pool.new_utf8(descriptor)?)
            .put_short(index);
        table.count += 1;

        Ok(index as usize + descriptors::field_width(descriptor))
    }

    pub fn size(&self) -> usize {
        self.variables.as_ref().map_or(0, LocalTable::size)
            + self.variable_types.as_ref().map_or(0, LocalTable::size)
    }

    pub fn attribute_count(&self) -> u16 {
        self.variables.is_some() as u16 + self.variable_types.is_some() as u16
    }

    pub fn put(&self, out: &mut ByteVector) {
        for table in self.variables.iter().chain(self.variable_types.iter()) {
            table.put(out);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_numbers() {
        let mut pool = ConstantPool::new();
        let mut labels = Labels::new();
        let mut code = ByteVector::new();
        let mut writer = LineNumberTableWriter::new();
        assert_eq!(writer.size(), 0);

        let start = labels.new_label();
        code.put_byte(0).put_byte(0);
        labels.resolve(start, &mut code).unwrap();
        writer.add_line_number(&mut pool, &labels, 42, start).unwrap();
        assert!(writer.has_line_numbers());

        let mut out = ByteVector::new();
        writer.put(&mut out);
        assert_eq!(out.data(), &[0, 1, 0, 0, 0, 6, 0, 1, 0, 2, 0, 42]);
        assert_eq!(writer.size(), out.len());
    }

    #[test]
    fn local_variables_with_signatures() {
        let mut pool = ConstantPool::new();
        let mut labels = Labels::new();
        let mut code = ByteVector::new();
        let start = labels.new_label();
        let end = labels.new_label();
        labels.resolve(start, &mut code).unwrap();
        code.put_byte(0).put_byte(0).put_byte(0);
        labels.resolve(end, &mut code).unwrap();

        let mut writer = LocalVariableTableWriter::new();
        let next = writer
            .add_local_variable(&mut pool, &labels, "x", "J", None, start, end, 1)
            .unwrap();
        assert_eq!(next, 3);
        assert_eq!(writer.attribute_count(), 1);

        writer
            .add_local_variable(
                &mut pool,
                &labels,
                "list",
                "Ljava/util/List;",
                Some("Ljava/util/List<Ljava/lang/String;>;"),
                start,
                end,
                3,
            )
            .unwrap();
        assert_eq!(writer.attribute_count(), 2);

        let mut out = ByteVector::new();
        writer.put(&mut out);
        assert_eq!(writer.size(), out.len());
        assert_eq!(writer.size(), (8 + 2 * 10) + (8 + 10));
    }

    #[test]
    fn unresolved_labels_are_rejected() {
        let mut pool = ConstantPool::new();
        let mut labels = Labels::new();
        let label = labels.new_label();
        let mut writer = LineNumberTableWriter::new();
        assert!(matches!(
            writer.add_line_number(&mut pool, &labels, 1, label),
            Err(Error::UnresolvedLabel)
        ));
    }
}
