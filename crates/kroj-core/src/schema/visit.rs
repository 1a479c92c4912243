//! Read-only traversal of a resolved schema.
//!
//! [`ResolvedSchema::walk`] drives a [`SchemaVisitor`] over every file in
//! load order, and within each file over its messages (nested ones
//! depth-first, map entries included), their fields and then the enums.

use super::{Enum, Field, Message, ResolvedSchema, SchemaFile};

/// Callbacks invoked while walking a schema.
///
/// Every method defaults to a no-op, so a visitor only implements what it
/// cares about.
///
/// # Example
///
/// ```
/// use kroj_core::{Message, ResolvedSchema, SchemaVisitor};
///
/// struct Names(Vec<String>);
///
/// impl SchemaVisitor for Names {
///     fn visit_message(&mut self, _schema: &ResolvedSchema, message: &Message) {
///         self.0.push(message.full_name().to_string());
///     }
/// }
/// ```
pub trait SchemaVisitor {
    /// Called once per file before its contents
    fn visit_file(&mut self, schema: &ResolvedSchema, file: &SchemaFile) {
        let _ = (schema, file);
    }

    /// Called for every message, nested ones included
    fn visit_message(&mut self, schema: &ResolvedSchema, message: &Message) {
        let _ = (schema, message);
    }

    /// Called for every field after its message
    fn visit_field(&mut self, schema: &ResolvedSchema, message: &Message, field: &Field) {
        let _ = (schema, message, field);
    }

    /// Called for every enum, nested ones included
    fn visit_enum(&mut self, schema: &ResolvedSchema, enum_type: &Enum) {
        let _ = (schema, enum_type);
    }
}

/// A visitor that counts schema elements
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsVisitor {
    /// Number of files
    pub file_count: usize,
    /// Number of messages, map entries excluded
    pub message_count: usize,
    /// Number of fields
    pub field_count: usize,
    /// Number of enums
    pub enum_count: usize,
    /// Number of map fields
    pub map_count: usize,
}

impl SchemaVisitor for StatsVisitor {
    fn visit_file(&mut self, _schema: &ResolvedSchema, _file: &SchemaFile) {
        self.file_count += 1;
    }

    fn visit_message(&mut self, _schema: &ResolvedSchema, message: &Message) {
        if !message.is_map_entry() {
            self.message_count += 1;
        }
    }

    fn visit_field(&mut self, schema: &ResolvedSchema, message: &Message, field: &Field) {
        if message.is_map_entry() {
            return;
        }
        self.field_count += 1;
        if schema.message_type(field).is_some_and(Message::is_map_entry) {
            self.map_count += 1;
        }
    }

    fn visit_enum(&mut self, _schema: &ResolvedSchema, _enum_type: &Enum) {
        self.enum_count += 1;
    }
}

impl ResolvedSchema {
    /// Walks every file of the schema with `visitor`
    pub fn walk(&self, visitor: &mut dyn SchemaVisitor) {
        for file in &self.files {
            visitor.visit_file(self, file);
            for &id in &file.messages {
                self.walk_message(&self[id], visitor);
            }
            for &id in &file.enums {
                visitor.visit_enum(self, &self[id]);
            }
        }
    }

    fn walk_message(&self, message: &Message, visitor: &mut dyn SchemaVisitor) {
        visitor.visit_message(self, message);
        for field in &message.fields {
            visitor.visit_field(self, message, field);
        }
        for &id in &message.nested_messages {
            self.walk_message(&self[id], visitor);
        }
        for &id in &message.nested_enums {
            visitor.visit_enum(self, &self[id]);
        }
    }
}
