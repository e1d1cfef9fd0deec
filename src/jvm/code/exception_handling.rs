use crate::jvm::class_file::ConstantPool;
use crate::jvm::code::label::{Edge, EdgeKind, Label, Labels};
use crate::jvm::{ByteVector, Error};
use std::rc::Rc;

#[derive(Debug)]
struct ExceptionHandler {
    start: Label,
    end: Label,
    handler: Label,

    /// Class caught, or `None` for `finally`-style handlers catching everything
    catch_type: Option<Rc<str>>,

    /// Constant pool index of `catch_type` (0 when it is `None`)
    type_index: u16,
}

/// Exception table of a method
#[derive(Debug, Default)]
pub struct ExceptionHandling {
    handlers: Vec<ExceptionHandler>,
}

impl ExceptionHandling {
    pub fn new() -> ExceptionHandling {
        ExceptionHandling::default()
    }

    pub fn add_handler(
        &mut self,
        pool: &mut ConstantPool,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        let type_index = match catch_type {
            None => 0,
            Some(class) => pool.new_class(class)?,
        };
        self.handlers.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type: catch_type.map(Rc::from),
            type_index,
        });
        Ok(())
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Add edges to the handlers, when frames are computed
    ///
    /// Every block in a protected range gets an edge typed by the class caught, and every handler
    /// becomes a jump target (so it gets a frame).
    pub fn complete_control_flow_graph_with_frames(&self, labels: &mut Labels) {
        for handler in &self.handlers {
            let target = labels.first(handler.handler);
            let start = labels.first(handler.start);
            let end = labels.first(handler.end);
            let catch_type = handler
                .catch_type
                .clone()
                .unwrap_or_else(|| Rc::from("java/lang/Throwable"));

            labels.mark_target(target);
            add_handler_as_successor(labels, EdgeKind::Catch(catch_type), target, start, end);
        }
    }

    /// Add edges to the handlers, when only the maximum stack size is computed
    pub fn complete_control_flow_graph(&self, labels: &mut Labels) {
        for handler in &self.handlers {
            add_handler_as_successor(
                labels,
                EdgeKind::Exception,
                handler.handler,
                handler.start,
                handler.end,
            );
        }
    }

    /// Size of the exception table entries
    pub fn size(&self) -> usize {
        8 * self.handlers.len()
    }

    /// Write the exception table, preceded by its length
    pub fn put(&self, labels: &Labels, out: &mut ByteVector) -> Result<(), Error> {
        out.put_short(self.handlers.len() as u16);
        for handler in &self.handlers {
            let position = |label| labels.position(label).ok_or(Error::UnresolvedLabel);
            out.put_short(position(handler.start)? as u16)
                .put_short(position(handler.end)? as u16)
                .put_short(position(handler.handler)? as u16)
                .put_short(handler.type_index);
        }
        Ok(())
    }
}

/// Add an edge to `handler` from every block between `start` (inclusive) and `end` (exclusive)
fn add_handler_as_successor(
    labels: &mut Labels,
    kind: EdgeKind,
    handler: Label,
    start: Label,
    end: Label,
) {
    let mut block = Some(start);
    while let Some(current) = block {
        if current == end {
            break;
        }
        let data = labels.get_mut(current);
        data.edges.push(Edge {
            kind: kind.clone(),
            successor: handler,
        });
        block = data.successor;
    }
}
