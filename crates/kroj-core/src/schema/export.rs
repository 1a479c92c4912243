//! Conversion to the prost descriptor types.
//!
//! External codecs built on `prost-reflect` consume a [`DescriptorPool`];
//! [`ResolvedSchema::to_descriptor_pool`] produces one from the resolved
//! schema, with every type name written absolute.

use super::{Cardinality, Enum, Field, FieldType, Message, ResolvedSchema, SchemaFile};
use crate::descriptor::Syntax;
use crate::error::{Error, Result};
use prost::Message as _;
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    descriptor_proto, DescriptorProto, EnumDescriptorProto, EnumOptions,
    EnumValueDescriptorProto, FieldDescriptorProto, FieldOptions, FileDescriptorProto,
    FileDescriptorSet, MessageOptions, OneofDescriptorProto,
};

impl ResolvedSchema {
    /// Converts the schema to a `google.protobuf.FileDescriptorSet`
    pub fn to_file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.files.iter().map(|f| self.file_proto(f)).collect(),
        }
    }

    /// Builds a prost-reflect pool holding every file of the schema
    pub fn to_descriptor_pool(&self) -> Result<DescriptorPool> {
        let bytes = self.to_file_descriptor_set().encode_to_vec();
        DescriptorPool::decode(bytes.as_slice()).map_err(|e| {
            Error::descriptor_build(format!("failed to decode descriptor pool: {}", e))
        })
    }

    fn file_proto(&self, file: &SchemaFile) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(file.name.clone()),
            package: (!file.package.is_empty()).then(|| file.package.clone()),
            dependency: file.dependencies.clone(),
            public_dependency: file.public_dependencies.iter().map(|&i| i as i32).collect(),
            message_type: file
                .messages
                .iter()
                .map(|&id| self.message_proto(&self[id], file.syntax))
                .collect(),
            enum_type: file.enums.iter().map(|&id| enum_proto(&self[id])).collect(),
            syntax: match file.syntax {
                Syntax::Proto2 => None,
                Syntax::Proto3 => Some("proto3".to_string()),
            },
            ..Default::default()
        }
    }

    fn message_proto(&self, message: &Message, syntax: Syntax) -> DescriptorProto {
        DescriptorProto {
            name: Some(message.name.clone()),
            field: message
                .fields
                .iter()
                .map(|f| self.field_proto(f, syntax))
                .collect(),
            nested_type: message
                .nested_messages
                .iter()
                .map(|&id| self.message_proto(&self[id], syntax))
                .collect(),
            enum_type: message
                .nested_enums
                .iter()
                .map(|&id| enum_proto(&self[id]))
                .collect(),
            oneof_decl: message
                .oneofs
                .iter()
                .map(|name| OneofDescriptorProto {
                    name: Some(name.clone()),
                    options: None,
                })
                .collect(),
            options: message.map_entry.then(|| MessageOptions {
                map_entry: Some(true),
                ..Default::default()
            }),
            reserved_range: message
                .reserved_ranges
                .iter()
                .map(|r| descriptor_proto::ReservedRange {
                    start: Some(r.start),
                    end: Some(r.end),
                })
                .collect(),
            reserved_name: message.reserved_names.clone(),
            ..Default::default()
        }
    }

    fn field_proto(&self, field: &Field, syntax: Syntax) -> FieldDescriptorProto {
        let label = match field.cardinality {
            Cardinality::Repeated => Label::Repeated,
            Cardinality::Required => Label::Required,
            Cardinality::Optional | Cardinality::Singular => Label::Optional,
        };
        let (r#type, type_name) = match field.field_type {
            FieldType::Scalar(kind) => (kind.type_number(), None),
            FieldType::Message(id) => (Type::Message as i32, Some(&self[id].full_name)),
            FieldType::Group(id) => (Type::Group as i32, Some(&self[id].full_name)),
            FieldType::Enum(id) => (Type::Enum as i32, Some(&self[id].full_name)),
        };

        FieldDescriptorProto {
            name: Some(field.name.clone()),
            number: Some(field.number as i32),
            label: Some(label as i32),
            r#type: Some(r#type),
            type_name: type_name.map(|name| format!(".{}", name)),
            default_value: field.default_value.clone(),
            oneof_index: field.oneof_index.map(|i| i as i32),
            json_name: field.json_name.clone(),
            options: field.packed_option.map(|packed| FieldOptions {
                packed: Some(packed),
                ..Default::default()
            }),
            proto3_optional: (syntax == Syntax::Proto3 && field.proto3_optional).then_some(true),
            ..Default::default()
        }
    }
}

fn enum_proto(enum_type: &Enum) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(enum_type.name.clone()),
        value: enum_type
            .values
            .iter()
            .map(|v| EnumValueDescriptorProto {
                name: Some(v.name.clone()),
                number: Some(v.number),
                options: None,
            })
            .collect(),
        options: enum_type.allow_alias.then(|| EnumOptions {
            allow_alias: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}
