//! Schema synthesis from native type shapes.
//!
//! [`SchemaGenerator`] walks a [`Shape`] depth-first and emits one message per
//! distinct object name, one enum per distinct enum name and a nested
//! `<Name>Entry` message per map property. The result is an ordinary
//! [`FileDescriptorSet`] that goes through the same registry and resolver as
//! a loaded container, so generated and loaded schemas are indistinguishable.
//!
//! ## Field numbering
//!
//! Properties with an explicit number keep it. The remaining properties, in
//! declaration order, take the lowest numbers not yet used, starting at 1.
//! Hints outside the valid range or colliding with another hint are errors.

mod shape;

use crate::descriptor::{
    DeclaredType, EnumDescriptor, EnumValueDescriptor, FieldDescriptor, FileDescriptor,
    FileDescriptorSet, Label, MessageDescriptor, NamedKind, Syntax,
};
use crate::error::{Error, Result};
use crate::registry::qualify;
use crate::resolver::{is_valid_field_number, Resolver};
use crate::schema::ResolvedSchema;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub use shape::{EnumShape, EnumValueShape, ObjectShape, Property, ProtoShape, Shape};

/// Configuration for schema generation
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Package of the generated file, empty for none
    pub package: String,
    /// File name; defaults to `<Root>.proto`
    pub file_name: Option<String>,
    /// Syntax of the generated file
    pub syntax: Syntax,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            package: String::new(),
            file_name: None,
            syntax: Syntax::Proto3,
        }
    }
}

impl GeneratorConfig {
    /// Creates a new generator config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the package
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    /// Sets the file name
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Sets the syntax
    pub fn syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }
}

/// Builds schemas from native type shapes
#[derive(Debug, Clone, Default)]
pub struct SchemaGenerator {
    config: GeneratorConfig,
}

impl SchemaGenerator {
    /// Creates a generator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator with custom configuration
    pub fn with_config(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generates the schema of `T`
    pub fn generate<T: ProtoShape>(&self) -> Result<ResolvedSchema> {
        self.generate_from_shape(&T::shape())
    }

    /// Generates the schema of a shape whose root is an object
    pub fn generate_from_shape(&self, shape: &Shape) -> Result<ResolvedSchema> {
        let set = self.descriptor_set(shape)?;
        let schema = Resolver::new().resolve(&set)?;
        debug!(
            "Generated {} messages and {} enums",
            schema.messages().len(),
            schema.enums().len()
        );
        Ok(schema)
    }

    /// Builds the unresolved descriptor set for a shape
    pub fn descriptor_set(&self, shape: &Shape) -> Result<FileDescriptorSet> {
        let Shape::Object(root) = shape else {
            return Err(Error::invalid_generated(
                "<root>",
                format!("root must be an object, found {}", shape.kind_name()),
            ));
        };

        let mut builder = Builder {
            config: &self.config,
            known: HashMap::new(),
            enum_values: HashMap::new(),
            messages: Vec::new(),
            enums: Vec::new(),
        };
        builder.object(root, root.name())?;

        let file = FileDescriptor {
            name: self
                .config
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.proto", root.name())),
            package: self.config.package.clone(),
            syntax: self.config.syntax,
            messages: builder.messages,
            enums: builder.enums,
            ..Default::default()
        };
        Ok(FileDescriptorSet::new(vec![file]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Known {
    Message,
    Enum,
}

struct Builder<'c> {
    config: &'c GeneratorConfig,
    known: HashMap<String, Known>,
    /// Enum value name to its enum; values share the package scope
    enum_values: HashMap<String, String>,
    messages: Vec<MessageDescriptor>,
    enums: Vec<EnumDescriptor>,
}

impl Builder<'_> {
    fn absolute(&self, name: &str) -> String {
        format!(".{}", qualify(&self.config.package, name))
    }

    /// Returns true if `name` still needs to be emitted
    fn claim(&mut self, name: &str, kind: Known, path: &str) -> Result<bool> {
        if let Some(owner) = self.enum_values.get(name) {
            return Err(Error::invalid_generated(
                path,
                format!("'{}' is already a value of enum '{}'", name, owner),
            ));
        }
        match self.known.get(name) {
            None => {
                self.known.insert(name.to_string(), kind);
                Ok(true)
            }
            Some(&existing) if existing == kind => Ok(false),
            Some(_) => Err(Error::invalid_generated(
                path,
                format!("'{}' names both a message and an enum", name),
            )),
        }
    }

    fn object(&mut self, object: &ObjectShape, path: &str) -> Result<String> {
        let name = object.name();
        check_identifier(name, path)?;
        let type_name = self.absolute(name);
        if !self.claim(name, Known::Message, path)? {
            return Ok(type_name);
        }

        // Registered before the properties so recursive references terminate
        let index = self.messages.len();
        self.messages.push(MessageDescriptor::new(name));

        let properties = object.properties();
        let numbers = assign_numbers(&properties, path)?;

        let mut fields = Vec::with_capacity(properties.len());
        let mut entries: Vec<MessageDescriptor> = Vec::new();
        let mut entry_owners: HashMap<String, &str> = HashMap::new();
        for (property, number) in properties.iter().zip(numbers) {
            let path = format!("{}.{}", path, property.name);
            check_identifier(&property.name, &path)?;

            let field = match &property.shape {
                Shape::Array(element) => {
                    let declared = self.element(element, &format!("{}.elem", path))?;
                    FieldDescriptor::new(&property.name, number, declared).label(Label::Repeated)
                }
                Shape::Map { key, value } => {
                    let entry = self.map_entry(&property.name, key, value, &path)?;
                    if let Some(other) = entry_owners.insert(entry.name.clone(), &property.name) {
                        return Err(Error::invalid_generated(
                            path,
                            format!("map entry '{}' is also generated for '{}'", entry.name, other),
                        ));
                    }
                    let declared = DeclaredType::Named {
                        name: format!("{}.{}", type_name, entry.name),
                        kind: Some(NamedKind::Message),
                    };
                    entries.push(entry);
                    FieldDescriptor::new(&property.name, number, declared).label(Label::Repeated)
                }
                single => {
                    let declared = self.element(single, &path)?;
                    let label = if property.required && self.config.syntax == Syntax::Proto2 {
                        Label::Required
                    } else {
                        Label::Optional
                    };
                    FieldDescriptor::new(&property.name, number, declared).label(label)
                }
            };
            fields.push(field);
        }

        let message = &mut self.messages[index];
        message.fields = fields;
        message.nested_messages = entries;
        Ok(type_name)
    }

    /// Type of a single value; collections are rejected here
    fn element(&mut self, shape: &Shape, path: &str) -> Result<DeclaredType> {
        match shape {
            Shape::Scalar(kind) => Ok(DeclaredType::Scalar(*kind)),
            Shape::Object(object) => Ok(DeclaredType::Named {
                name: self.object(object, path)?,
                kind: Some(NamedKind::Message),
            }),
            Shape::Enum(enum_shape) => Ok(DeclaredType::Named {
                name: self.enumeration(enum_shape, path)?,
                kind: Some(NamedKind::Enum),
            }),
            Shape::Array(_) | Shape::Map { .. } => Err(Error::invalid_generated(
                path,
                format!("nested {} is not supported", shape.kind_name()),
            )),
        }
    }

    fn map_entry(
        &mut self,
        property: &str,
        key: &Shape,
        value: &Shape,
        path: &str,
    ) -> Result<MessageDescriptor> {
        let key_path = format!("{}.key", path);
        let key_type = match key {
            Shape::Scalar(kind) if kind.is_valid_map_key() => DeclaredType::Scalar(*kind),
            other => {
                return Err(Error::invalid_generated(
                    key_path,
                    format!(
                        "map keys must be integral, bool or string scalars, found {}",
                        describe(other)
                    ),
                ))
            }
        };
        let value_type = self.element(value, &format!("{}.value", path))?;

        let mut entry = MessageDescriptor::new(format!("{}Entry", to_upper_camel_case(property)));
        entry.map_entry = true;
        entry.fields = vec![
            FieldDescriptor::new("key", 1, key_type),
            FieldDescriptor::new("value", 2, value_type),
        ];
        Ok(entry)
    }

    fn enumeration(&mut self, shape: &EnumShape, path: &str) -> Result<String> {
        check_identifier(&shape.name, path)?;
        let type_name = self.absolute(&shape.name);
        if !self.claim(&shape.name, Known::Enum, path)? {
            return Ok(type_name);
        }
        if shape.values.is_empty() {
            return Err(Error::invalid_generated(path, format!("enum '{}' has no values", shape.name)));
        }

        let mut seen = HashMap::with_capacity(shape.values.len());
        let mut values = Vec::with_capacity(shape.values.len());
        for (ordinal, value) in shape.values.iter().enumerate() {
            let value_path = format!("{}.{}", path, value.name);
            check_identifier(&value.name, &value_path)?;
            if self.known.contains_key(&value.name) {
                return Err(Error::invalid_generated(
                    value_path,
                    format!("value '{}' clashes with a type of the same name", value.name),
                ));
            }
            if let Some(owner) = self.enum_values.get(&value.name) {
                return Err(Error::invalid_generated(
                    value_path,
                    format!("value '{}' is already declared by enum '{}'", value.name, owner),
                ));
            }
            let number = match value.number {
                Some(number) => number,
                None => i32::try_from(ordinal).map_err(|_| {
                    Error::invalid_generated(&value_path, "too many enum values")
                })?,
            };
            if let Some(first) = seen.insert(number, value.name.as_str()) {
                return Err(Error::invalid_generated(
                    value_path,
                    format!("number {} is already used by '{}'", number, first),
                ));
            }
            self.enum_values
                .insert(value.name.clone(), shape.name.clone());
            values.push(EnumValueDescriptor {
                name: value.name.clone(),
                number,
            });
        }
        if self.config.syntax == Syntax::Proto3 && values[0].number != 0 {
            return Err(Error::invalid_generated(
                path,
                format!("first value of enum '{}' must be 0 in proto3", shape.name),
            ));
        }

        self.enums.push(EnumDescriptor {
            name: shape.name.clone(),
            values,
            allow_alias: false,
        });
        Ok(type_name)
    }
}

fn describe(shape: &Shape) -> String {
    match shape {
        Shape::Scalar(kind) => kind.proto_name().to_string(),
        other => other.kind_name().to_string(),
    }
}

/// Pairs every property with its field number
fn assign_numbers(properties: &[Property], object: &str) -> Result<Vec<i32>> {
    let mut names = HashSet::with_capacity(properties.len());
    let mut used = HashSet::with_capacity(properties.len());

    for property in properties {
        let path = format!("{}.{}", object, property.name);
        if !names.insert(property.name.as_str()) {
            return Err(Error::invalid_generated(path, "duplicate property name"));
        }
        if let Some(number) = property.number {
            if !is_valid_field_number(number as i64) {
                return Err(Error::invalid_generated(
                    path,
                    format!("field number {} is out of range", number),
                ));
            }
            if !used.insert(number) {
                return Err(Error::invalid_generated(
                    path,
                    format!("field number {} is used more than once", number),
                ));
            }
        }
    }

    let mut next = 1u32;
    let mut numbers = Vec::with_capacity(properties.len());
    for property in properties {
        let number = match property.number {
            Some(number) => number,
            None => {
                while used.contains(&next) || !is_valid_field_number(next as i64) {
                    next += 1;
                }
                used.insert(next);
                next
            }
        };
        numbers.push(number as i32);
    }
    Ok(numbers)
}

fn check_identifier(name: &str, path: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_generated(
            path,
            format!("'{}' is not a valid identifier", name),
        ))
    }
}

fn to_upper_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = true;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ScalarKind;
    use crate::schema::{Cardinality, FieldType};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct Order;

    impl ProtoShape for Order {
        fn shape() -> Shape {
            Shape::Object(ObjectShape::new("Order", || {
                vec![
                    Property::of::<String>("id").number(5),
                    Property::of::<Vec<LineItem>>("items"),
                    Property::of::<HashMap<String, u32>>("item_counts"),
                    Property::new("status", Shape::Enum(EnumShape::new("Status", ["OPEN", "CLOSED"]))),
                    Property::of::<Option<Box<Order>>>("parent"),
                ]
            }))
        }
    }

    struct LineItem;

    impl ProtoShape for LineItem {
        fn shape() -> Shape {
            Shape::Object(ObjectShape::new("LineItem", || {
                vec![
                    Property::of::<f64>("price").required(true),
                    Property::of::<Order>("order"),
                ]
            }))
        }
    }

    fn object(name: &'static str, properties: Vec<Property>) -> Shape {
        Shape::Object(ObjectShape::new(name, move || properties.clone()))
    }

    #[test]
    fn test_generate_order() {
        let generator = SchemaGenerator::with_config(GeneratorConfig::new().package("shop"));
        let schema = generator.generate::<Order>().unwrap();

        assert_eq!(schema.files()[0].name(), "Order.proto");
        let order = schema.root().unwrap();
        assert_eq!(order.full_name(), "shop.Order");

        let numbers: Vec<(&str, u32)> = order.fields().iter().map(|f| (f.name(), f.number())).collect();
        assert_eq!(
            numbers,
            vec![("id", 5), ("items", 1), ("item_counts", 2), ("status", 3), ("parent", 4)]
        );

        let items = order.field_by_name("items").unwrap();
        assert_eq!(items.cardinality(), Cardinality::Repeated);
        let line_item = schema.message_type(items).unwrap();
        assert_eq!(line_item.full_name(), "shop.LineItem");
        assert_eq!(
            line_item.field_by_name("order").unwrap().field_type(),
            FieldType::Message(order.id())
        );
        assert_eq!(
            order.field_by_name("parent").unwrap().field_type(),
            FieldType::Message(order.id())
        );

        let counts = schema.message_type(order.field_by_name("item_counts").unwrap()).unwrap();
        assert_eq!(counts.full_name(), "shop.Order.ItemCountsEntry");
        assert!(counts.is_map_entry());
        assert_eq!(
            counts.field(2).unwrap().field_type(),
            FieldType::Scalar(ScalarKind::Uint32)
        );

        let status = schema.enum_of(order.field_by_name("status").unwrap()).unwrap();
        assert_eq!(status.value_by_name("CLOSED").unwrap().number, 1);
    }

    #[test]
    fn test_required_depends_on_syntax() {
        let proto3 = SchemaGenerator::new().generate::<LineItem>().unwrap();
        let price = proto3.root().unwrap().field_by_name("price").unwrap();
        assert_eq!(price.cardinality(), Cardinality::Singular);

        let proto2 = SchemaGenerator::with_config(GeneratorConfig::new().syntax(Syntax::Proto2))
            .generate::<LineItem>()
            .unwrap();
        let price = proto2.root().unwrap().field_by_name("price").unwrap();
        assert_eq!(price.cardinality(), Cardinality::Required);
    }

    #[test]
    fn test_mutually_recursive_objects_emit_once() {
        let schema = SchemaGenerator::new().generate::<LineItem>().unwrap();
        assert_eq!(schema.messages().len(), 3); // LineItem, Order, Order.ItemCountsEntry
        assert_eq!(schema.enums().len(), 1);
    }

    #[test]
    fn test_hint_collisions_and_range() {
        let shape = object(
            "Bad",
            vec![
                Property::of::<i32>("a").number(2),
                Property::of::<i32>("b").number(2),
            ],
        );
        let err = SchemaGenerator::new().generate_from_shape(&shape).unwrap_err();
        match err {
            Error::InvalidGeneratedSchema { path, .. } => assert_eq!(path, "Bad.b"),
            other => panic!("unexpected error: {:?}", other),
        }

        let shape = object("Bad", vec![Property::of::<i32>("a").number(19_500)]);
        assert!(SchemaGenerator::new().generate_from_shape(&shape).is_err());
    }

    #[test]
    fn test_unhinted_numbers_fill_gaps() {
        let shape = object(
            "Gaps",
            vec![
                Property::of::<i32>("a"),
                Property::of::<i32>("b").number(1),
                Property::of::<i32>("c"),
            ],
        );
        let schema = SchemaGenerator::new().generate_from_shape(&shape).unwrap();
        let root = schema.root().unwrap();
        assert_eq!(root.field_by_name("a").unwrap().number(), 2);
        assert_eq!(root.field_by_name("b").unwrap().number(), 1);
        assert_eq!(root.field_by_name("c").unwrap().number(), 3);
    }

    #[test]
    fn test_unsupported_shapes() {
        let generator = SchemaGenerator::new();

        let err = generator.generate::<Vec<String>>().unwrap_err();
        assert!(matches!(err, Error::InvalidGeneratedSchema { .. }));

        let nested = object("Grid", vec![Property::of::<Vec<Vec<i32>>>("cells")]);
        match generator.generate_from_shape(&nested).unwrap_err() {
            Error::InvalidGeneratedSchema { path, .. } => assert_eq!(path, "Grid.cells.elem"),
            other => panic!("unexpected error: {:?}", other),
        }

        let float_keys = object("Lookup", vec![Property::of::<HashMap<String, i32>>("ok"), Property::new(
            "bad",
            Shape::map(Shape::Scalar(ScalarKind::Double), Shape::Scalar(ScalarKind::Int32)),
        )]);
        match generator.generate_from_shape(&float_keys).unwrap_err() {
            Error::InvalidGeneratedSchema { path, .. } => assert_eq!(path, "Lookup.bad.key"),
            other => panic!("unexpected error: {:?}", other),
        }

        let empty = object("E", vec![Property::new("e", Shape::Enum(EnumShape::new("Nothing", Vec::<String>::new())))]);
        assert!(generator.generate_from_shape(&empty).is_err());

        let bad_name = object("Has Space", vec![]);
        assert!(generator.generate_from_shape(&bad_name).is_err());

        let duplicate = object("Dup", vec![Property::of::<i32>("x"), Property::of::<u64>("x")]);
        assert!(generator.generate_from_shape(&duplicate).is_err());
    }

    #[test]
    fn test_nested_failures_report_full_path() {
        let child = object("Child", vec![Property::of::<Vec<Vec<i32>>>("x")]);
        let root = object("Root", vec![Property::new("child", child)]);
        match SchemaGenerator::new().generate_from_shape(&root).unwrap_err() {
            Error::InvalidGeneratedSchema { path, .. } => assert_eq!(path, "Root.child.x.elem"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_enum_values_share_package_scope() {
        let color = Shape::Enum(EnumShape::new("Color", ["UNKNOWN", "RED"]));
        let size = Shape::Enum(EnumShape::new("Size", ["UNKNOWN", "BIG"]));
        let root = object("Root", vec![Property::new("color", color.clone()), Property::new("size", size)]);
        match SchemaGenerator::new().generate_from_shape(&root).unwrap_err() {
            Error::InvalidGeneratedSchema { path, details } => {
                assert_eq!(path, "Root.size.UNKNOWN");
                assert!(details.contains("Color"), "{}", details);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // A value may not share its name with a message either
        let clash = Shape::Enum(EnumShape::new("Kind", ["Root"]));
        let root = object("Root", vec![Property::new("kind", clash)]);
        assert!(matches!(
            SchemaGenerator::new().generate_from_shape(&root),
            Err(Error::InvalidGeneratedSchema { .. })
        ));

        let later = object("Later", vec![]);
        let root = object("Root", vec![Property::new("color", color), Property::new("red", object("RED", vec![Property::new("l", later)]))]);
        match SchemaGenerator::new().generate_from_shape(&root).unwrap_err() {
            Error::InvalidGeneratedSchema { path, .. } => assert_eq!(path, "Root.red"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_distinct_enum_values_export_cleanly() {
        let color = Shape::Enum(EnumShape::new("Color", ["COLOR_UNKNOWN", "RED"]));
        let size = Shape::Enum(EnumShape::new("Size", ["SIZE_UNKNOWN", "BIG"]));
        let root = object("Root", vec![Property::new("color", color), Property::new("size", size)]);
        let schema = SchemaGenerator::new().generate_from_shape(&root).unwrap();
        assert!(schema.to_descriptor_pool().is_ok());
    }

    #[test]
    fn test_map_entry_names_must_be_distinct() {
        let root = object(
            "Root",
            vec![
                Property::of::<HashMap<String, i32>>("foo_bar"),
                Property::of::<HashMap<String, i32>>("fooBar"),
            ],
        );
        match SchemaGenerator::new().generate_from_shape(&root).unwrap_err() {
            Error::InvalidGeneratedSchema { path, details } => {
                assert_eq!(path, "Root.fooBar");
                assert!(details.contains("FooBarEntry"), "{}", details);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_file_name_override() {
        let generator = SchemaGenerator::with_config(GeneratorConfig::new().file_name("gen/order.proto"));
        let schema = generator.generate::<Order>().unwrap();
        assert!(schema.file("gen/order.proto").is_some());
    }

    #[test]
    fn test_upper_camel_case() {
        assert_eq!(to_upper_camel_case("item_counts"), "ItemCounts");
        assert_eq!(to_upper_camel_case("tags"), "Tags");
    }
}
