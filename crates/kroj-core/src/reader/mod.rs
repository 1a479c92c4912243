//! Binary descriptor-set decoding.
//!
//! [`DescriptorBinaryReader`] turns a serialized
//! `google.protobuf.FileDescriptorSet` (as written by
//! `protoc --descriptor_set_out`) or a single `FileDescriptorProto` into the
//! unresolved [`FileDescriptorSet`] model.
//!
//! ## Decoding rules
//!
//! - Each nesting level is read as a flat sequence of tag/value records.
//! - Tags the reader does not know are skipped, so containers written by
//!   newer producers still decode.
//! - A known tag with the wrong wire type, a length running past the end of
//!   its enclosing record, or a missing required sub-field is a
//!   [`Error::MalformedDescriptor`] naming the enclosing file/message/field.

mod wire;

use crate::descriptor::{
    DeclaredType, EnumDescriptor, EnumValueDescriptor, FieldDescriptor, FileDescriptor,
    FileDescriptorSet, Label, MessageDescriptor, NamedKind, ReservedRange, ScalarKind, Syntax,
};
use crate::error::{Error, Result};
use tracing::{debug, trace};
use wire::{packed_varints, WireReader, WireValue};

pub use wire::{decode_varint, WireType};

// FileDescriptorSet
const SET_FILE: u32 = 1;

// FileDescriptorProto
const FILE_NAME: u32 = 1;
const FILE_PACKAGE: u32 = 2;
const FILE_DEPENDENCY: u32 = 3;
const FILE_MESSAGE_TYPE: u32 = 4;
const FILE_ENUM_TYPE: u32 = 5;
const FILE_PUBLIC_DEPENDENCY: u32 = 10;
const FILE_SYNTAX: u32 = 12;

// DescriptorProto
const MESSAGE_NAME: u32 = 1;
const MESSAGE_FIELD: u32 = 2;
const MESSAGE_NESTED_TYPE: u32 = 3;
const MESSAGE_ENUM_TYPE: u32 = 4;
const MESSAGE_OPTIONS: u32 = 7;
const MESSAGE_ONEOF_DECL: u32 = 8;
const MESSAGE_RESERVED_RANGE: u32 = 9;
const MESSAGE_RESERVED_NAME: u32 = 10;
const MESSAGE_OPTIONS_MAP_ENTRY: u32 = 7;

// FieldDescriptorProto
const FIELD_NAME: u32 = 1;
const FIELD_NUMBER: u32 = 3;
const FIELD_LABEL: u32 = 4;
const FIELD_TYPE: u32 = 5;
const FIELD_TYPE_NAME: u32 = 6;
const FIELD_DEFAULT_VALUE: u32 = 7;
const FIELD_OPTIONS: u32 = 8;
const FIELD_ONEOF_INDEX: u32 = 9;
const FIELD_JSON_NAME: u32 = 10;
const FIELD_PROTO3_OPTIONAL: u32 = 17;
const FIELD_OPTIONS_PACKED: u32 = 2;

// EnumDescriptorProto / EnumValueDescriptorProto
const ENUM_NAME: u32 = 1;
const ENUM_VALUE: u32 = 2;
const ENUM_OPTIONS: u32 = 3;
const ENUM_OPTIONS_ALLOW_ALIAS: u32 = 2;
const ENUM_VALUE_NAME: u32 = 1;
const ENUM_VALUE_NUMBER: u32 = 2;

// Generic name/range sub-messages
const ONEOF_NAME: u32 = 1;
const RANGE_START: u32 = 1;
const RANGE_END: u32 = 2;

// FieldDescriptorProto.Type values that name another descriptor
const TYPE_GROUP: i32 = 10;
const TYPE_MESSAGE: i32 = 11;
const TYPE_ENUM: i32 = 14;

/// Configuration for the reader
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Maximum message nesting depth before the input is rejected
    pub max_depth: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

impl ReaderConfig {
    /// Creates a new reader config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Decoder for binary descriptor containers
#[derive(Debug, Clone, Default)]
pub struct DescriptorBinaryReader {
    config: ReaderConfig,
}

impl DescriptorBinaryReader {
    /// Creates a reader with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reader with custom configuration
    pub fn with_config(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Decodes a serialized `FileDescriptorSet`
    pub fn read_set(&self, data: &[u8]) -> Result<FileDescriptorSet> {
        debug!("Decoding descriptor set of {} bytes", data.len());

        let mut reader = WireReader::new(data);
        let mut files = Vec::new();

        while let Some((number, value)) = reader.next_field()? {
            match number {
                SET_FILE => {
                    let (bytes, offset) = expect_len(value, number, reader.offset())?;
                    let index = files.len();
                    let file = self
                        .decode_file(bytes, offset)
                        .map_err(|e| e.within(&format!("file #{}", index)))?;
                    files.push(file);
                }
                _ => trace!("Skipping unknown set field {}", number),
            }
        }

        debug!("Decoded {} file descriptor(s)", files.len());
        Ok(FileDescriptorSet::new(files))
    }

    /// Decodes a single serialized `FileDescriptorProto`
    pub fn read_file(&self, data: &[u8]) -> Result<FileDescriptor> {
        self.decode_file(data, 0)
    }

    fn decode_file(&self, data: &[u8], base: usize) -> Result<FileDescriptor> {
        let mut reader = WireReader::at(data, base);
        let mut file = FileDescriptor::default();
        let mut name = None;
        let mut syntax = String::new();
        let mut messages = Vec::new();
        let mut enums = Vec::new();

        while let Some((number, value)) = reader.next_field()? {
            let offset = reader.offset();
            match number {
                FILE_NAME => name = Some(expect_string(value, number, offset)?),
                FILE_PACKAGE => file.package = expect_string(value, number, offset)?,
                FILE_DEPENDENCY => file
                    .dependencies
                    .push(expect_string(value, number, offset)?),
                FILE_MESSAGE_TYPE => messages.push(expect_len(value, number, offset)?),
                FILE_ENUM_TYPE => enums.push(expect_len(value, number, offset)?),
                FILE_PUBLIC_DEPENDENCY => {
                    for index in expect_varints(value, number, offset)? {
                        file.public_dependencies.push(index as usize);
                    }
                }
                FILE_SYNTAX => syntax = expect_string(value, number, offset)?,
                _ => trace!("Skipping unknown file field {}", number),
            }
        }

        // Children are decoded after the scan so errors can name the file.
        file.name = name.ok_or_else(|| Error::malformed(base, "file descriptor has no name"))?;
        let scope = format!("file '{}'", file.name);

        file.syntax = Syntax::parse(&file.name, &syntax)?;
        for (bytes, offset) in messages {
            let message = self
                .decode_message(bytes, offset, 1)
                .map_err(|e| e.within(&scope))?;
            file.messages.push(message);
        }
        for (bytes, offset) in enums {
            file.enums
                .push(decode_enum(bytes, offset).map_err(|e| e.within(&scope))?);
        }
        for &index in &file.public_dependencies {
            if index >= file.dependencies.len() {
                return Err(Error::malformed(
                    base,
                    format!("public dependency index {} is out of range", index),
                )
                .within(&scope));
            }
        }

        trace!(
            "Decoded file {} ({} messages, {} enums)",
            file.name,
            file.messages.len(),
            file.enums.len()
        );
        Ok(file)
    }

    fn decode_message(&self, data: &[u8], base: usize, depth: usize) -> Result<MessageDescriptor> {
        if depth > self.config.max_depth {
            return Err(Error::malformed(
                base,
                format!("message nesting exceeds {} levels", self.config.max_depth),
            ));
        }

        let mut reader = WireReader::at(data, base);
        let mut message = MessageDescriptor::default();
        let mut name = None;
        let mut fields = Vec::new();
        let mut nested = Vec::new();
        let mut enums = Vec::new();

        while let Some((number, value)) = reader.next_field()? {
            let offset = reader.offset();
            match number {
                MESSAGE_NAME => name = Some(expect_string(value, number, offset)?),
                MESSAGE_FIELD => fields.push(expect_len(value, number, offset)?),
                MESSAGE_NESTED_TYPE => nested.push(expect_len(value, number, offset)?),
                MESSAGE_ENUM_TYPE => enums.push(expect_len(value, number, offset)?),
                MESSAGE_OPTIONS => {
                    let (bytes, at) = expect_len(value, number, offset)?;
                    message.map_entry = read_bool_option(bytes, at, MESSAGE_OPTIONS_MAP_ENTRY)?
                        .unwrap_or(false);
                }
                MESSAGE_ONEOF_DECL => {
                    let (bytes, at) = expect_len(value, number, offset)?;
                    message.oneofs.push(read_name(bytes, at, ONEOF_NAME, "oneof")?);
                }
                MESSAGE_RESERVED_RANGE => {
                    let (bytes, at) = expect_len(value, number, offset)?;
                    message.reserved_ranges.push(read_range(bytes, at)?);
                }
                MESSAGE_RESERVED_NAME => message
                    .reserved_names
                    .push(expect_string(value, number, offset)?),
                _ => trace!("Skipping unknown message field {}", number),
            }
        }

        message.name = name.ok_or_else(|| Error::malformed(base, "message has no name"))?;
        let scope = format!("message '{}'", message.name);

        for (bytes, offset) in fields {
            message
                .fields
                .push(decode_field(bytes, offset).map_err(|e| e.within(&scope))?);
        }
        for (bytes, offset) in nested {
            let child = self
                .decode_message(bytes, offset, depth + 1)
                .map_err(|e| e.within(&scope))?;
            message.nested_messages.push(child);
        }
        for (bytes, offset) in enums {
            message
                .nested_enums
                .push(decode_enum(bytes, offset).map_err(|e| e.within(&scope))?);
        }

        Ok(message)
    }
}

fn decode_field(data: &[u8], base: usize) -> Result<FieldDescriptor> {
    let mut reader = WireReader::at(data, base);
    let mut name = None;
    let mut number = None;
    let mut label = None;
    let mut type_number = None;
    let mut type_name = None;
    let mut default_value = None;
    let mut json_name = None;
    let mut oneof_index = None;
    let mut packed = None;
    let mut proto3_optional = false;

    while let Some((tag, value)) = reader.next_field()? {
        let offset = reader.offset();
        match tag {
            FIELD_NAME => name = Some(expect_string(value, tag, offset)?),
            FIELD_NUMBER => number = Some(expect_varint(value, tag, offset)? as i32),
            FIELD_LABEL => label = Some(expect_varint(value, tag, offset)? as i32),
            FIELD_TYPE => type_number = Some(expect_varint(value, tag, offset)? as i32),
            FIELD_TYPE_NAME => type_name = Some(expect_string(value, tag, offset)?),
            FIELD_DEFAULT_VALUE => default_value = Some(expect_string(value, tag, offset)?),
            FIELD_OPTIONS => {
                let (bytes, at) = expect_len(value, tag, offset)?;
                packed = read_bool_option(bytes, at, FIELD_OPTIONS_PACKED)?;
            }
            FIELD_ONEOF_INDEX => oneof_index = Some(expect_varint(value, tag, offset)? as i32),
            FIELD_JSON_NAME => json_name = Some(expect_string(value, tag, offset)?),
            FIELD_PROTO3_OPTIONAL => proto3_optional = expect_varint(value, tag, offset)? != 0,
            _ => trace!("Skipping unknown field-descriptor field {}", tag),
        }
    }

    let name = name.ok_or_else(|| Error::malformed(base, "field has no name"))?;
    let scope = format!("field '{}'", name);
    let number =
        number.ok_or_else(|| Error::malformed(base, "field has no number").within(&scope))?;

    let label = match label {
        None => Label::Optional,
        Some(n) => Label::from_number(n).ok_or_else(|| {
            Error::malformed(base, format!("unknown label {}", n)).within(&scope)
        })?,
    };

    let declared_type = match (type_number, type_name) {
        (Some(n), type_name) => match ScalarKind::from_type_number(n) {
            Some(kind) => DeclaredType::Scalar(kind),
            None => {
                let kind = match n {
                    TYPE_GROUP => NamedKind::Group,
                    TYPE_MESSAGE => NamedKind::Message,
                    TYPE_ENUM => NamedKind::Enum,
                    _ => {
                        return Err(Error::malformed(base, format!("unknown field type {}", n))
                            .within(&scope))
                    }
                };
                let name = type_name.ok_or_else(|| {
                    Error::malformed(base, format!("field type {} requires a type name", n))
                        .within(&scope)
                })?;
                DeclaredType::Named {
                    name,
                    kind: Some(kind),
                }
            }
        },
        (None, Some(name)) => DeclaredType::Named { name, kind: None },
        (None, None) => {
            return Err(Error::malformed(base, "field declares no type").within(&scope))
        }
    };

    Ok(FieldDescriptor {
        name,
        number,
        label,
        declared_type,
        default_value,
        json_name,
        oneof_index,
        packed,
        proto3_optional,
    })
}

fn decode_enum(data: &[u8], base: usize) -> Result<EnumDescriptor> {
    let mut reader = WireReader::at(data, base);
    let mut descriptor = EnumDescriptor::default();
    let mut name = None;
    let mut values = Vec::new();

    while let Some((number, value)) = reader.next_field()? {
        let offset = reader.offset();
        match number {
            ENUM_NAME => name = Some(expect_string(value, number, offset)?),
            ENUM_VALUE => values.push(expect_len(value, number, offset)?),
            ENUM_OPTIONS => {
                let (bytes, at) = expect_len(value, number, offset)?;
                descriptor.allow_alias =
                    read_bool_option(bytes, at, ENUM_OPTIONS_ALLOW_ALIAS)?.unwrap_or(false);
            }
            _ => trace!("Skipping unknown enum field {}", number),
        }
    }

    descriptor.name = name.ok_or_else(|| Error::malformed(base, "enum has no name"))?;
    let scope = format!("enum '{}'", descriptor.name);

    for (bytes, offset) in values {
        descriptor
            .values
            .push(decode_enum_value(bytes, offset).map_err(|e| e.within(&scope))?);
    }

    Ok(descriptor)
}

fn decode_enum_value(data: &[u8], base: usize) -> Result<EnumValueDescriptor> {
    let mut reader = WireReader::at(data, base);
    let mut name = None;
    let mut number = None;

    while let Some((tag, value)) = reader.next_field()? {
        let offset = reader.offset();
        match tag {
            ENUM_VALUE_NAME => name = Some(expect_string(value, tag, offset)?),
            ENUM_VALUE_NUMBER => number = Some(expect_varint(value, tag, offset)? as i32),
            _ => trace!("Skipping unknown enum-value field {}", tag),
        }
    }

    let name = name.ok_or_else(|| Error::malformed(base, "enum value has no name"))?;
    let number = number.ok_or_else(|| {
        Error::malformed(base, "enum value has no number").within(&format!("value '{}'", name))
    })?;
    Ok(EnumValueDescriptor { name, number })
}

/// Reads a single bool from an options message, ignoring everything else
fn read_bool_option(data: &[u8], base: usize, option: u32) -> Result<Option<bool>> {
    let mut reader = WireReader::at(data, base);
    let mut result = None;
    while let Some((number, value)) = reader.next_field()? {
        if number == option {
            result = Some(expect_varint(value, number, reader.offset())? != 0);
        }
    }
    Ok(result)
}

fn read_name(data: &[u8], base: usize, tag: u32, what: &str) -> Result<String> {
    let mut reader = WireReader::at(data, base);
    let mut name = None;
    while let Some((number, value)) = reader.next_field()? {
        if number == tag {
            name = Some(expect_string(value, number, reader.offset())?);
        }
    }
    name.ok_or_else(|| Error::malformed(base, format!("{} has no name", what)))
}

fn read_range(data: &[u8], base: usize) -> Result<ReservedRange> {
    let mut reader = WireReader::at(data, base);
    let mut range = ReservedRange { start: 0, end: 0 };
    while let Some((number, value)) = reader.next_field()? {
        match number {
            RANGE_START => range.start = expect_varint(value, number, reader.offset())? as i32,
            RANGE_END => range.end = expect_varint(value, number, reader.offset())? as i32,
            _ => {}
        }
    }
    Ok(range)
}

fn wrong_wire_type(value: WireValue<'_>, number: u32, expected: WireType, offset: usize) -> Error {
    Error::malformed(
        offset,
        format!(
            "field {} has wire type {:?}, expected {:?}",
            number,
            value.wire_type(),
            expected
        ),
    )
}

fn expect_len(value: WireValue<'_>, number: u32, offset: usize) -> Result<(&[u8], usize)> {
    match value {
        WireValue::Len { bytes, offset } => Ok((bytes, offset)),
        other => Err(wrong_wire_type(other, number, WireType::Len, offset)),
    }
}

fn expect_varint(value: WireValue<'_>, number: u32, offset: usize) -> Result<u64> {
    match value {
        WireValue::Varint(v) => Ok(v),
        other => Err(wrong_wire_type(other, number, WireType::Varint, offset)),
    }
}

/// Accepts both packed and unpacked encodings of a repeated varint
fn expect_varints(value: WireValue<'_>, number: u32, offset: usize) -> Result<Vec<u64>> {
    match value {
        WireValue::Varint(v) => Ok(vec![v]),
        WireValue::Len { bytes, offset } => packed_varints(bytes, offset),
        other => Err(wrong_wire_type(other, number, WireType::Varint, offset)),
    }
}

fn expect_string(value: WireValue<'_>, number: u32, offset: usize) -> Result<String> {
    let (bytes, at) = expect_len(value, number, offset)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::malformed(at, format!("field {} is not valid UTF-8", number)))
}
