//! `.proto` source rendering.
//!
//! Renders each file of a [`ResolvedSchema`] back to protobuf source text:
//! syntax, package, imports, messages (with nested types, oneofs, map fields
//! and reserved declarations) and enums. Type references are always written
//! fully qualified with a leading `.`, so the output never depends on scoping.
//! Synthetic map entry messages are folded into `map<K, V>` fields.

use super::{Cardinality, Enum, Field, FieldType, FileId, Message, ResolvedSchema};
use crate::descriptor::{ReservedRange, ScalarKind, Syntax};
use crate::MAX_FIELD_NUMBER;
use std::fmt::{self, Write};

/// Configuration for `.proto` rendering
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Indentation string (default: 2 spaces)
    pub indent_str: String,
    /// Sort fields by number
    pub sort_fields: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent_str: "  ".to_string(),
            sort_fields: false,
        }
    }
}

impl RenderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }

    /// Sets whether to sort fields by number
    pub fn sort_fields(mut self, sort: bool) -> Self {
        self.sort_fields = sort;
        self
    }
}

impl ResolvedSchema {
    /// Renders one file with the default configuration
    pub fn render_file(&self, id: FileId) -> String {
        self.render_file_with(id, &RenderConfig::default())
    }

    /// Renders one file
    pub fn render_file_with(&self, id: FileId, config: &RenderConfig) -> String {
        let mut output = String::new();
        // Writing into a String never fails
        let _ = self.write_file(id, &mut output, config);
        output
    }

    /// Renders every file, returning `(file name, source)` pairs in load order
    pub fn render(&self, config: &RenderConfig) -> Vec<(String, String)> {
        self.files
            .iter()
            .map(|file| (file.name.clone(), self.render_file_with(file.id, config)))
            .collect()
    }

    /// Writes the rendered file to `w`
    pub fn write_file(&self, id: FileId, w: &mut impl Write, config: &RenderConfig) -> fmt::Result {
        ProtoRenderer::new(self, w, config).write_file(id)
    }
}

struct ProtoRenderer<'a, W: Write> {
    schema: &'a ResolvedSchema,
    writer: &'a mut W,
    config: &'a RenderConfig,
    indent_level: usize,
}

impl<'a, W: Write> ProtoRenderer<'a, W> {
    fn new(schema: &'a ResolvedSchema, writer: &'a mut W, config: &'a RenderConfig) -> Self {
        Self {
            schema,
            writer,
            config,
            indent_level: 0,
        }
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn write_indent(&mut self) -> fmt::Result {
        for _ in 0..self.indent_level {
            write!(self.writer, "{}", self.config.indent_str)?;
        }
        Ok(())
    }

    fn writeln(&mut self, s: &str) -> fmt::Result {
        self.write_indent()?;
        writeln!(self.writer, "{}", s)
    }

    fn write_file(&mut self, id: FileId) -> fmt::Result {
        let schema = self.schema;
        let file = &schema[id];

        writeln!(self.writer, "syntax = \"{}\";", file.syntax.as_str())?;
        writeln!(self.writer)?;

        if !file.package.is_empty() {
            writeln!(self.writer, "package {};", file.package)?;
            writeln!(self.writer)?;
        }

        if !file.dependencies.is_empty() {
            for (i, dependency) in file.dependencies.iter().enumerate() {
                let modifier = if file.public_dependencies.contains(&i) {
                    "public "
                } else {
                    ""
                };
                writeln!(self.writer, "import {}\"{}\";", modifier, dependency)?;
            }
            writeln!(self.writer)?;
        }

        for &message in &file.messages {
            self.write_message(&schema[message], file.syntax)?;
        }
        for &enum_id in &file.enums {
            self.write_enum(&schema[enum_id])?;
        }
        Ok(())
    }

    fn write_message(&mut self, message: &Message, syntax: Syntax) -> fmt::Result {
        let schema = self.schema;

        self.write_indent()?;
        writeln!(self.writer, "message {} {{", message.name)?;
        self.indent();

        self.write_reserved(message)?;

        for &nested in &message.nested_messages {
            let nested = &schema[nested];
            // Map entries are written as map<K, V> fields
            if !nested.map_entry {
                self.write_message(nested, syntax)?;
            }
        }
        for &nested in &message.nested_enums {
            self.write_enum(&schema[nested])?;
        }

        let mut fields: Vec<&Field> = message.fields.iter().collect();
        if self.config.sort_fields {
            fields.sort_by_key(|f| f.number);
        }

        for (index, name) in message.oneofs.iter().enumerate() {
            let members: Vec<&Field> = fields
                .iter()
                .copied()
                .filter(|f| f.oneof_index == Some(index) && !f.proto3_optional)
                .collect();
            if members.is_empty() {
                continue;
            }
            self.write_indent()?;
            writeln!(self.writer, "oneof {} {{", name)?;
            self.indent();
            for field in members {
                self.write_indent()?;
                writeln!(
                    self.writer,
                    "{} {} = {};",
                    self.type_name(field.field_type),
                    field.name,
                    field.number
                )?;
            }
            self.dedent();
            self.writeln("}")?;
        }

        for field in fields {
            let in_real_oneof = field.oneof_index.is_some() && !field.proto3_optional;
            if !in_real_oneof {
                self.write_field(field, syntax)?;
            }
        }

        self.dedent();
        self.writeln("}")?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn write_reserved(&mut self, message: &Message) -> fmt::Result {
        if !message.reserved_names.is_empty() {
            let names: Vec<String> = message
                .reserved_names
                .iter()
                .map(|n| format!("\"{}\"", escape_string(n)))
                .collect();
            self.write_indent()?;
            writeln!(self.writer, "reserved {};", names.join(", "))?;
        }

        if !message.reserved_ranges.is_empty() {
            let ranges: Vec<String> = message.reserved_ranges.iter().map(format_range).collect();
            self.write_indent()?;
            writeln!(self.writer, "reserved {};", ranges.join(", "))?;
        }
        Ok(())
    }

    fn map_entry(&self, field: &Field) -> Option<&'a Message> {
        let schema = self.schema;
        match field.field_type {
            FieldType::Message(id) if field.cardinality == Cardinality::Repeated => {
                Some(&schema[id]).filter(|m| m.map_entry)
            }
            _ => None,
        }
    }

    fn write_field(&mut self, field: &Field, syntax: Syntax) -> fmt::Result {
        self.write_indent()?;

        if let Some(entry) = self.map_entry(field) {
            if let (Some(key), Some(value)) = (entry.field(1), entry.field(2)) {
                return writeln!(
                    self.writer,
                    "map<{}, {}> {} = {};",
                    self.type_name(key.field_type),
                    self.type_name(value.field_type),
                    field.name,
                    field.number
                );
            }
        }

        let label = match field.cardinality {
            Cardinality::Repeated => "repeated ",
            Cardinality::Required => "required ",
            Cardinality::Optional => "optional ",
            Cardinality::Singular => "",
        };
        write!(
            self.writer,
            "{}{} {} = {}",
            label,
            self.type_name(field.field_type),
            field.name,
            field.number
        )?;
        self.write_field_options(field, syntax)?;
        writeln!(self.writer, ";")
    }

    fn write_field_options(&mut self, field: &Field, syntax: Syntax) -> fmt::Result {
        let mut options = Vec::new();

        if syntax == Syntax::Proto2 {
            if let Some(default) = &field.default_value {
                let formatted = match field.field_type {
                    FieldType::Scalar(ScalarKind::String) | FieldType::Scalar(ScalarKind::Bytes) => {
                        format!("\"{}\"", escape_string(default))
                    }
                    _ => default.clone(),
                };
                options.push(format!("default = {}", formatted));
            }
        }

        if let Some(json_name) = &field.json_name {
            if *json_name != to_lower_camel_case(&field.name) {
                options.push(format!("json_name = \"{}\"", escape_string(json_name)));
            }
        }

        if let Some(packed) = field.packed_option {
            options.push(format!("packed = {}", packed));
        }

        if !options.is_empty() {
            write!(self.writer, " [{}]", options.join(", "))?;
        }
        Ok(())
    }

    fn write_enum(&mut self, enum_type: &Enum) -> fmt::Result {
        self.write_indent()?;
        writeln!(self.writer, "enum {} {{", enum_type.name)?;
        self.indent();

        if enum_type.allow_alias {
            self.writeln("option allow_alias = true;")?;
        }
        for value in &enum_type.values {
            self.write_indent()?;
            writeln!(self.writer, "{} = {};", value.name, value.number)?;
        }

        self.dedent();
        self.writeln("}")?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn type_name(&self, field_type: FieldType) -> String {
        match field_type {
            FieldType::Scalar(kind) => kind.proto_name().to_string(),
            FieldType::Message(id) | FieldType::Group(id) => {
                format!(".{}", self.schema[id].full_name)
            }
            FieldType::Enum(id) => format!(".{}", self.schema[id].full_name),
        }
    }
}

fn format_range(range: &ReservedRange) -> String {
    // End is exclusive; widen so `end - 1` cannot overflow
    let last = i64::from(range.end) - 1;
    if i64::from(range.start) == last {
        range.start.to_string()
    } else if last == i64::from(MAX_FIELD_NUMBER) {
        format!("{} to max", range.start)
    } else {
        format!("{} to {}", range.start, last)
    }
}

/// Escape a string for proto syntax
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ if c.is_ascii_control() => {
                result.push_str(&format!("\\x{:02x}", c as u8));
            }
            _ => result.push(c),
        }
    }
    result
}

/// Convert a snake_case name to lowerCamelCase
pub(crate) fn to_lower_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}
