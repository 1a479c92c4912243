//! Unresolved descriptor model.
//!
//! These types mirror what a descriptor-set container (or the schema
//! generator) declares, before any cross-file reference is bound. Type
//! references are still plain names here; the [`Resolver`](crate::Resolver)
//! turns a [`FileDescriptorSet`] into a [`ResolvedSchema`](crate::ResolvedSchema).

use crate::error::{Error, Result};
use crate::reader::WireType;

/// Proto syntax version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    /// Proto2 syntax
    #[default]
    Proto2,
    /// Proto3 syntax
    Proto3,
}

impl Syntax {
    /// Returns the syntax declaration string
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }

    /// Parses the `syntax` string of a file descriptor.
    ///
    /// An empty string means proto2, as protoc omits the field for proto2 files.
    pub fn parse(file: &str, value: &str) -> Result<Self> {
        match value {
            "" | "proto2" => Ok(Syntax::Proto2),
            "proto3" => Ok(Syntax::Proto3),
            _ => Err(Error::UnsupportedSyntax {
                file: file.to_string(),
                syntax: value.to_string(),
            }),
        }
    }
}

/// Scalar value kinds, numbered as in `FieldDescriptorProto.Type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int64`
    Int64,
    /// `uint64`
    Uint64,
    /// `int32`
    Int32,
    /// `fixed64`
    Fixed64,
    /// `fixed32`
    Fixed32,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `bytes`
    Bytes,
    /// `uint32`
    Uint32,
    /// `sfixed32`
    Sfixed32,
    /// `sfixed64`
    Sfixed64,
    /// `sint32`
    Sint32,
    /// `sint64`
    Sint64,
}

impl ScalarKind {
    /// Maps a `FieldDescriptorProto.Type` number to a scalar kind.
    ///
    /// Returns `None` for group, message, enum and unknown numbers.
    pub fn from_type_number(number: i32) -> Option<Self> {
        Some(match number {
            1 => ScalarKind::Double,
            2 => ScalarKind::Float,
            3 => ScalarKind::Int64,
            4 => ScalarKind::Uint64,
            5 => ScalarKind::Int32,
            6 => ScalarKind::Fixed64,
            7 => ScalarKind::Fixed32,
            8 => ScalarKind::Bool,
            9 => ScalarKind::String,
            12 => ScalarKind::Bytes,
            13 => ScalarKind::Uint32,
            15 => ScalarKind::Sfixed32,
            16 => ScalarKind::Sfixed64,
            17 => ScalarKind::Sint32,
            18 => ScalarKind::Sint64,
            _ => return None,
        })
    }

    /// Returns the `FieldDescriptorProto.Type` number
    pub fn type_number(&self) -> i32 {
        match self {
            ScalarKind::Double => 1,
            ScalarKind::Float => 2,
            ScalarKind::Int64 => 3,
            ScalarKind::Uint64 => 4,
            ScalarKind::Int32 => 5,
            ScalarKind::Fixed64 => 6,
            ScalarKind::Fixed32 => 7,
            ScalarKind::Bool => 8,
            ScalarKind::String => 9,
            ScalarKind::Bytes => 12,
            ScalarKind::Uint32 => 13,
            ScalarKind::Sfixed32 => 15,
            ScalarKind::Sfixed64 => 16,
            ScalarKind::Sint32 => 17,
            ScalarKind::Sint64 => 18,
        }
    }

    /// Returns the keyword used in `.proto` source
    pub fn proto_name(&self) -> &'static str {
        match self {
            ScalarKind::Double => "double",
            ScalarKind::Float => "float",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Int32 => "int32",
            ScalarKind::Fixed64 => "fixed64",
            ScalarKind::Fixed32 => "fixed32",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Sfixed32 => "sfixed32",
            ScalarKind::Sfixed64 => "sfixed64",
            ScalarKind::Sint32 => "sint32",
            ScalarKind::Sint64 => "sint64",
        }
    }

    /// Wire type used for a single value of this kind
    pub fn wire_type(&self) -> WireType {
        match self {
            ScalarKind::Double | ScalarKind::Fixed64 | ScalarKind::Sfixed64 => WireType::I64,
            ScalarKind::Float | ScalarKind::Fixed32 | ScalarKind::Sfixed32 => WireType::I32,
            ScalarKind::String | ScalarKind::Bytes => WireType::Len,
            _ => WireType::Varint,
        }
    }

    /// Whether repeated values of this kind may use packed encoding
    pub fn is_packable(&self) -> bool {
        self.wire_type() != WireType::Len
    }

    /// Whether this kind may be used as a map key
    pub fn is_valid_map_key(&self) -> bool {
        !matches!(
            self,
            ScalarKind::Double | ScalarKind::Float | ScalarKind::Bytes
        )
    }
}

/// Field label as declared on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Label {
    /// `LABEL_OPTIONAL` (also the proto3 default)
    #[default]
    Optional,
    /// `LABEL_REQUIRED`
    Required,
    /// `LABEL_REPEATED`
    Repeated,
}

impl Label {
    /// Maps a `FieldDescriptorProto.Label` number
    pub fn from_number(number: i32) -> Option<Self> {
        match number {
            1 => Some(Label::Optional),
            2 => Some(Label::Required),
            3 => Some(Label::Repeated),
            _ => None,
        }
    }

    /// Returns the `FieldDescriptorProto.Label` number
    pub fn number(&self) -> i32 {
        match self {
            Label::Optional => 1,
            Label::Required => 2,
            Label::Repeated => 3,
        }
    }
}

/// Kind announced alongside a named type reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKind {
    /// `TYPE_MESSAGE`
    Message,
    /// `TYPE_GROUP`
    Group,
    /// `TYPE_ENUM`
    Enum,
}

/// Declared type of a field before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    /// A scalar value
    Scalar(ScalarKind),
    /// A reference to a message or enum by (possibly partial) name.
    ///
    /// `kind` is `None` when the producer only supplied a type name, as
    /// parsers do before linking.
    Named {
        /// Type name, absolute when it starts with `.`
        name: String,
        /// Declared kind, if any
        kind: Option<NamedKind>,
    },
}

/// A field of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Field number as declared; range checks happen during resolution
    pub number: i32,
    /// Declared label
    pub label: Label,
    /// Declared type
    pub declared_type: DeclaredType,
    /// Proto2 default value in text form
    pub default_value: Option<String>,
    /// Explicit JSON name
    pub json_name: Option<String>,
    /// Index into the owning message's oneofs
    pub oneof_index: Option<i32>,
    /// Explicit `packed` option
    pub packed: Option<bool>,
    /// Proto3 `optional` keyword (synthetic oneof)
    pub proto3_optional: bool,
}

impl FieldDescriptor {
    /// Creates a field with the given name, number and type
    pub fn new(name: impl Into<String>, number: i32, declared_type: DeclaredType) -> Self {
        Self {
            name: name.into(),
            number,
            label: Label::Optional,
            declared_type,
            default_value: None,
            json_name: None,
            oneof_index: None,
            packed: None,
            proto3_optional: false,
        }
    }

    /// Sets the label
    pub fn label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }
}

/// Reserved range of field numbers, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedRange {
    /// First reserved number
    pub start: i32,
    /// One past the last reserved number
    pub end: i32,
}

/// A message definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageDescriptor {
    /// Simple (unqualified) name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDescriptor>,
    /// Nested message definitions
    pub nested_messages: Vec<MessageDescriptor>,
    /// Nested enum definitions
    pub nested_enums: Vec<EnumDescriptor>,
    /// Oneof names, indexed by `FieldDescriptor::oneof_index`
    pub oneofs: Vec<String>,
    /// Synthetic map entry message
    pub map_entry: bool,
    /// Reserved number ranges
    pub reserved_ranges: Vec<ReservedRange>,
    /// Reserved field names
    pub reserved_names: Vec<String>,
}

impl MessageDescriptor {
    /// Creates an empty message with the given simple name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A single enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueDescriptor {
    /// Value name
    pub name: String,
    /// Integer value
    pub number: i32,
}

/// An enum definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumDescriptor {
    /// Simple (unqualified) name
    pub name: String,
    /// Values in declaration order
    pub values: Vec<EnumValueDescriptor>,
    /// Whether several names may share one number
    pub allow_alias: bool,
}

/// One `.proto` file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDescriptor {
    /// File name, e.g. `google/protobuf/timestamp.proto`
    pub name: String,
    /// Package, empty for none
    pub package: String,
    /// Imported file names in declaration order
    pub dependencies: Vec<String>,
    /// Indices into `dependencies` that are `import public`
    pub public_dependencies: Vec<usize>,
    /// Declared syntax
    pub syntax: Syntax,
    /// Top-level messages
    pub messages: Vec<MessageDescriptor>,
    /// Top-level enums
    pub enums: Vec<EnumDescriptor>,
}

impl FileDescriptor {
    /// Creates an empty file with the given name and package
    pub fn new(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            ..Default::default()
        }
    }
}

/// Files loaded together, prior to resolution.
///
/// Order is irrelevant to resolution but preserved so that ids and rendered
/// output are reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDescriptorSet {
    /// Files in load order
    pub files: Vec<FileDescriptor>,
}

impl FileDescriptorSet {
    /// Creates a set from files
    pub fn new(files: Vec<FileDescriptor>) -> Self {
        Self { files }
    }

    /// Looks up a file by name
    pub fn file(&self, name: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Appends the files of `other`.
    ///
    /// A file already present with identical content is skipped, which is
    /// how shared imports shipped in several sets collapse into one.
    pub fn merge(&mut self, other: FileDescriptorSet) -> Result<()> {
        for file in other.files {
            match self.file(&file.name) {
                Some(existing) if *existing == file => {
                    tracing::trace!("Skipping duplicate file {}", file.name);
                }
                Some(_) => {
                    return Err(Error::DuplicateFileName { file: file.name });
                }
                None => self.files.push(file),
            }
        }
        Ok(())
    }
}
