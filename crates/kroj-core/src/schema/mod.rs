//! Resolved, immutable schema.
//!
//! A [`ResolvedSchema`] is the query surface a wire codec works against.
//! Messages, enums and files live in arenas and refer to each other through
//! copyable ids ([`MessageId`], [`EnumId`], [`FileId`]), so every type
//! reference is a concrete handle rather than a name.
//!
//! Field lookups by number and by name are backed by hash indices built once
//! during resolution. Nothing in a schema is mutated after construction, so
//! it can be shared behind an `Arc` and read from any number of threads.
//!
//! ```
//! # use kroj_core::{ResolvedSchema, FieldType};
//! fn describe(schema: &ResolvedSchema) {
//!     if let Some(circle) = schema.message("shapes.Circle") {
//!         for field in circle.fields() {
//!             if let FieldType::Message(id) = field.field_type() {
//!                 println!("{} -> {}", field.name(), schema[id].full_name());
//!             }
//!         }
//!     }
//! }
//! ```

mod export;
mod render;
mod visit;

use crate::descriptor::{EnumValueDescriptor, ReservedRange, ScalarKind, Syntax};
use crate::error::{Error, Result};
use crate::reader::WireType;
use std::collections::HashMap;
use std::ops::Index;

pub use render::RenderConfig;
pub use visit::{SchemaVisitor, StatsVisitor};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Position in the owning schema's arena
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Handle to a message in a [`ResolvedSchema`]
    MessageId
);
arena_id!(
    /// Handle to an enum in a [`ResolvedSchema`]
    EnumId
);
arena_id!(
    /// Handle to a file in a [`ResolvedSchema`]
    FileId
);

/// A named type in the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A message type
    Message(MessageId),
    /// An enum type
    Enum(EnumId),
}

/// How many values a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Proto2 `optional` or proto3 `optional` (explicit presence)
    Optional,
    /// Proto2 `required`
    Required,
    /// `repeated`, including map fields
    Repeated,
    /// Proto3 field without a label (implicit presence)
    Singular,
}

/// Type of a field with every reference bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A scalar value
    Scalar(ScalarKind),
    /// An embedded message
    Message(MessageId),
    /// A proto2 group
    Group(MessageId),
    /// An enum value
    Enum(EnumId),
}

impl FieldType {
    /// Wire type used for a single, unpacked value
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldType::Scalar(kind) => kind.wire_type(),
            FieldType::Message(_) => WireType::Len,
            FieldType::Group(_) => WireType::StartGroup,
            FieldType::Enum(_) => WireType::Varint,
        }
    }
}

/// A field of a resolved message
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) number: u32,
    pub(crate) cardinality: Cardinality,
    pub(crate) field_type: FieldType,
    pub(crate) json_name: Option<String>,
    pub(crate) default_value: Option<String>,
    pub(crate) oneof_index: Option<usize>,
    pub(crate) packed: bool,
    pub(crate) packed_option: Option<bool>,
    pub(crate) proto3_optional: bool,
}

impl Field {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field number
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Cardinality
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Resolved type
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Whether the field is repeated (maps included)
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }

    /// Whether repeated values are written packed
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Explicit JSON name, if one was declared
    pub fn json_name(&self) -> Option<&str> {
        self.json_name.as_deref()
    }

    /// Proto2 default value in text form
    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    /// Index into the owning message's [`Message::oneofs`]
    pub fn oneof_index(&self) -> Option<usize> {
        self.oneof_index
    }

    /// Whether this is a proto3 `optional` field
    pub fn is_proto3_optional(&self) -> bool {
        self.proto3_optional
    }

    /// Wire type of the field as it appears in an encoded message
    pub fn wire_type(&self) -> WireType {
        if self.packed {
            WireType::Len
        } else {
            self.field_type.wire_type()
        }
    }
}

/// A resolved message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub(crate) id: MessageId,
    pub(crate) full_name: String,
    pub(crate) name: String,
    pub(crate) file: FileId,
    pub(crate) parent: Option<MessageId>,
    pub(crate) fields: Vec<Field>,
    pub(crate) by_number: HashMap<u32, usize>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) nested_messages: Vec<MessageId>,
    pub(crate) nested_enums: Vec<EnumId>,
    pub(crate) oneofs: Vec<String>,
    pub(crate) map_entry: bool,
    pub(crate) reserved_ranges: Vec<ReservedRange>,
    pub(crate) reserved_names: Vec<String>,
}

impl Message {
    /// Handle of this message
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Fully-qualified name without a leading dot
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Simple name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring file
    pub fn file(&self) -> FileId {
        self.file
    }

    /// Enclosing message for nested types
    pub fn parent(&self) -> Option<MessageId> {
        self.parent
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by number
    pub fn field(&self, number: u32) -> Option<&Field> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Looks up a field by name
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Nested messages in declaration order
    pub fn nested_messages(&self) -> &[MessageId] {
        &self.nested_messages
    }

    /// Nested enums in declaration order
    pub fn nested_enums(&self) -> &[EnumId] {
        &self.nested_enums
    }

    /// Oneof names
    pub fn oneofs(&self) -> &[String] {
        &self.oneofs
    }

    /// Whether this is a synthetic map entry
    pub fn is_map_entry(&self) -> bool {
        self.map_entry
    }

    /// Reserved number ranges, end exclusive
    pub fn reserved_ranges(&self) -> &[ReservedRange] {
        &self.reserved_ranges
    }

    /// Reserved field names
    pub fn reserved_names(&self) -> &[String] {
        &self.reserved_names
    }
}

/// A resolved enum
#[derive(Debug, Clone, PartialEq)]
pub struct Enum {
    pub(crate) id: EnumId,
    pub(crate) full_name: String,
    pub(crate) name: String,
    pub(crate) file: FileId,
    pub(crate) parent: Option<MessageId>,
    pub(crate) values: Vec<EnumValueDescriptor>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) by_number: HashMap<i32, usize>,
    pub(crate) allow_alias: bool,
}

impl Enum {
    /// Handle of this enum
    pub fn id(&self) -> EnumId {
        self.id
    }

    /// Fully-qualified name without a leading dot
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Simple name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring file
    pub fn file(&self) -> FileId {
        self.file
    }

    /// Enclosing message for nested enums
    pub fn parent(&self) -> Option<MessageId> {
        self.parent
    }

    /// Values in declaration order
    pub fn values(&self) -> &[EnumValueDescriptor] {
        &self.values
    }

    /// Looks up a value by name
    pub fn value_by_name(&self, name: &str) -> Option<&EnumValueDescriptor> {
        self.by_name.get(name).map(|&i| &self.values[i])
    }

    /// Looks up a value by number; aliases yield the first declared name
    pub fn value_by_number(&self, number: i32) -> Option<&EnumValueDescriptor> {
        self.by_number.get(&number).map(|&i| &self.values[i])
    }

    /// Whether aliases are allowed
    pub fn allow_alias(&self) -> bool {
        self.allow_alias
    }
}

/// A file of a resolved schema
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFile {
    pub(crate) id: FileId,
    pub(crate) name: String,
    pub(crate) package: String,
    pub(crate) syntax: Syntax,
    pub(crate) dependencies: Vec<String>,
    pub(crate) public_dependencies: Vec<usize>,
    pub(crate) messages: Vec<MessageId>,
    pub(crate) enums: Vec<EnumId>,
}

impl SchemaFile {
    /// Handle of this file
    pub fn id(&self) -> FileId {
        self.id
    }

    /// File name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package, empty for none
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Declared syntax
    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    /// Imported file names
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Indices into [`dependencies`](Self::dependencies) that are public
    pub fn public_dependencies(&self) -> &[usize] {
        &self.public_dependencies
    }

    /// Top-level messages
    pub fn messages(&self) -> &[MessageId] {
        &self.messages
    }

    /// Top-level enums
    pub fn enums(&self) -> &[EnumId] {
        &self.enums
    }
}

/// Immutable schema with every type reference bound
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchema {
    pub(crate) files: Vec<SchemaFile>,
    pub(crate) messages: Vec<Message>,
    pub(crate) enums: Vec<Enum>,
    pub(crate) types: HashMap<String, TypeRef>,
    pub(crate) root: Option<MessageId>,
}

impl ResolvedSchema {
    /// Files in load order
    pub fn files(&self) -> &[SchemaFile] {
        &self.files
    }

    /// Looks up a file by name
    pub fn file(&self, name: &str) -> Option<&SchemaFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// All messages, nested ones included, in id order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// All enums in id order
    pub fn enums(&self) -> &[Enum] {
        &self.enums
    }

    /// Looks up a type by fully-qualified name; a leading `.` is accepted
    pub fn lookup(&self, full_name: &str) -> Option<TypeRef> {
        let name = full_name.strip_prefix('.').unwrap_or(full_name);
        self.types.get(name).copied()
    }

    /// Looks up a message by fully-qualified name
    pub fn message(&self, full_name: &str) -> Option<&Message> {
        match self.lookup(full_name)? {
            TypeRef::Message(id) => self.get_message(id),
            TypeRef::Enum(_) => None,
        }
    }

    /// Looks up an enum by fully-qualified name
    pub fn enum_type(&self, full_name: &str) -> Option<&Enum> {
        match self.lookup(full_name)? {
            TypeRef::Enum(id) => self.get_enum(id),
            TypeRef::Message(_) => None,
        }
    }

    /// Looks up a message by id
    pub fn get_message(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(id.index())
    }

    /// Looks up an enum by id
    pub fn get_enum(&self, id: EnumId) -> Option<&Enum> {
        self.enums.get(id.index())
    }

    /// Looks up a file by id
    pub fn get_file(&self, id: FileId) -> Option<&SchemaFile> {
        self.files.get(id.index())
    }

    /// Looks up a message nested directly inside `parent` by simple name
    pub fn nested_message(&self, parent: &Message, name: &str) -> Option<&Message> {
        parent
            .nested_messages
            .iter()
            .filter_map(|&id| self.get_message(id))
            .find(|m| m.name == name)
    }

    /// Looks up an enum nested directly inside `parent` by simple name
    pub fn nested_enum(&self, parent: &Message, name: &str) -> Option<&Enum> {
        parent
            .nested_enums
            .iter()
            .filter_map(|&id| self.get_enum(id))
            .find(|e| e.name == name)
    }

    /// Message type of a message or group field
    pub fn message_type(&self, field: &Field) -> Option<&Message> {
        match field.field_type {
            FieldType::Message(id) | FieldType::Group(id) => self.get_message(id),
            _ => None,
        }
    }

    /// Enum type of an enum field
    pub fn enum_of(&self, field: &Field) -> Option<&Enum> {
        match field.field_type {
            FieldType::Enum(id) => self.get_enum(id),
            _ => None,
        }
    }

    /// Root message: the first top-level message unless overridden
    pub fn root(&self) -> Option<&Message> {
        self.root.and_then(|id| self.get_message(id))
    }

    /// Returns a copy of this schema rooted at `full_name`
    pub fn with_root_type(&self, full_name: &str) -> Result<ResolvedSchema> {
        let id = self
            .message(full_name)
            .map(Message::id)
            .ok_or_else(|| Error::UnknownType {
                name: full_name.to_string(),
            })?;
        let mut schema = self.clone();
        schema.root = Some(id);
        Ok(schema)
    }
}

impl Index<MessageId> for ResolvedSchema {
    type Output = Message;

    fn index(&self, id: MessageId) -> &Message {
        &self.messages[id.index()]
    }
}

impl Index<EnumId> for ResolvedSchema {
    type Output = Enum;

    fn index(&self, id: EnumId) -> &Enum {
        &self.enums[id.index()]
    }
}

impl Index<FileId> for ResolvedSchema {
    type Output = SchemaFile;

    fn index(&self, id: FileId) -> &SchemaFile {
        &self.files[id.index()]
    }
}
