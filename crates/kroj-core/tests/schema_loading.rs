//! End-to-end loading, resolution and generation scenarios.

use kroj_core::generator::{EnumShape, ObjectShape, Property};
use kroj_core::{
    Error, FieldType, GeneratorConfig, ImportPolicy, LoaderConfig, ProtoMapper, ProtoShape,
    ScalarKind, SchemaLoader, Shape, Source,
};
use pretty_assertions::assert_eq;
use prost::Message;
use prost_reflect::{DynamicMessage, MapKey, Value};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

fn scalar(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        ..Default::default()
    }
}

fn reference(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::Message as i32),
        type_name: Some(type_name.into()),
        ..Default::default()
    }
}

fn message(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field,
        ..Default::default()
    }
}

fn file(name: &str, package: &str, imports: &[&str], messages: Vec<DescriptorProto>) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.into()),
        package: Some(package.into()),
        dependency: imports.iter().map(|s| s.to_string()).collect(),
        message_type: messages,
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

fn encode(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}

fn common() -> FileDescriptorProto {
    file(
        "common.proto",
        "common",
        &[],
        vec![message(
            "Point",
            vec![scalar("x", 1, Type::Int32), scalar("y", 2, Type::Int32)],
        )],
    )
}

fn shapes() -> FileDescriptorProto {
    file(
        "shapes.proto",
        "shapes",
        &["common.proto"],
        vec![message(
            "Circle",
            vec![
                reference("center", 1, ".common.Point"),
                scalar("radius", 2, Type::Int32),
            ],
        )],
    )
}

#[test]
fn shapes_resolve_against_common() {
    let loader = SchemaLoader::new();
    let schema = loader
        .load_sources(&[
            Source::from(encode(vec![shapes()])),
            Source::from(encode(vec![common()])),
        ])
        .unwrap();

    let point = schema.message("common.Point").unwrap();
    let circle = schema.message("shapes.Circle").unwrap();
    assert_eq!(circle.field(1).unwrap().field_type(), FieldType::Message(point.id()));
    assert_eq!(
        circle.field(2).unwrap().field_type(),
        FieldType::Scalar(ScalarKind::Int32)
    );
    assert_eq!(circle.field_by_name("radius").unwrap().number(), 2);
    assert_eq!(schema.root().unwrap().full_name(), "shapes.Circle");
}

#[test]
fn shapes_without_common_is_missing_import() {
    let loader = SchemaLoader::new();
    let err = loader.load_bytes(encode(vec![shapes()])).unwrap_err();
    match &err {
        Error::MissingImport { file, import } => {
            assert_eq!(file, "shapes.proto");
            assert_eq!(import, "common.proto");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let text = err.to_string();
    assert!(text.contains("shapes") && text.contains("common"));
    assert_eq!(loader.cached_len(), 0);
}

#[test]
fn every_reference_is_bound_within_the_schema() {
    let mut outer = message(
        "Outer",
        vec![reference("inner", 1, "Inner"), reference("center", 2, "common.Point")],
    );
    outer.nested_type = vec![message("Inner", vec![reference("back", 1, "Outer")])];
    let bytes = encode(vec![
        common(),
        shapes(),
        file("nested.proto", "common.deep", &["common.proto"], vec![outer]),
    ]);

    let schema = SchemaLoader::new().load_bytes(bytes).unwrap();
    let mut bound = 0;
    for message in schema.messages() {
        for field in message.fields() {
            match field.field_type() {
                FieldType::Message(id) | FieldType::Group(id) => {
                    assert!(schema.get_message(id).is_some());
                    bound += 1;
                }
                FieldType::Enum(id) => {
                    assert!(schema.get_enum(id).is_some());
                    bound += 1;
                }
                FieldType::Scalar(_) => {}
            }
        }
    }
    assert_eq!(bound, 4);

    let inner = schema.message("common.deep.Outer.Inner").unwrap();
    let outer = schema.message("common.deep.Outer").unwrap();
    assert_eq!(inner.field(1).unwrap().field_type(), FieldType::Message(outer.id()));
    assert_eq!(
        schema.message_type(outer.field(2).unwrap()).unwrap().full_name(),
        "common.Point"
    );
}

#[test]
fn warm_cache_skips_decoding() {
    let loader = SchemaLoader::new();
    let bytes = encode(vec![common()]);

    let first = loader.load_bytes(bytes.clone()).unwrap();
    let second = loader.load_bytes(bytes).unwrap();
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));

    let stats = loader.stats();
    assert_eq!(stats.decodes, 1);
    assert_eq!(stats.resolutions, 1);
    assert_eq!(stats.cache_hits, 1);
}

#[test]
fn stream_loads_resolve_and_share_the_content_entry() {
    let bytes = encode(vec![shapes(), common()]);
    let mapper = ProtoMapper::new();

    let streamed = mapper.load_descriptor_set_reader(bytes.as_slice()).unwrap();
    let circle = streamed.message("shapes.Circle").unwrap();
    assert_eq!(
        streamed.message_type(circle.field(1).unwrap()).unwrap().full_name(),
        "common.Point"
    );
    assert_eq!(streamed.root().unwrap().full_name(), "shapes.Circle");

    let loader = mapper.descriptor_loader();
    let from_bytes = loader.load_bytes(bytes).unwrap();
    assert!(Arc::ptr_eq(&streamed, &from_bytes));

    let stats = loader.stats();
    assert_eq!(stats.decodes, 1);
    assert_eq!(stats.cache_hits, 1);
}

#[test]
fn concurrent_first_loads_decode_once() {
    let loader = SchemaLoader::new();
    let bytes = encode(vec![shapes(), common()]);

    let schemas: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| loader.load_bytes(bytes.clone()).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(schemas.windows(2).all(|w| w[0] == w[1]));
    let stats = loader.stats();
    assert_eq!(stats.decodes, 1);
    assert_eq!(stats.resolutions, 1);
    assert_eq!(stats.cache_hits, 7);
}

#[test]
fn path_loads_share_one_entry() {
    let mut temp = tempfile::NamedTempFile::new().unwrap();
    temp.write_all(&encode(vec![common()])).unwrap();
    temp.flush().unwrap();

    let mapper = ProtoMapper::new();
    let first = mapper.load_descriptor_set_path(temp.path()).unwrap();
    let second = mapper.load_descriptor_set_path(temp.path()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(mapper.descriptor_loader().stats().decodes, 1);

    let missing = temp.path().with_extension("absent");
    let err = mapper.load_descriptor_set_path(&missing).unwrap_err();
    assert!(err.is_source_error());
}

#[test]
fn import_ambiguity_follows_policy() {
    let bytes = encode(vec![
        file(
            "main.proto",
            "app",
            &["first.proto", "second.proto"],
            vec![message("Holder", vec![reference("shared", 1, "Shared")])],
        ),
        file("first.proto", "first", &[], vec![message("Shared", vec![])]),
        file("second.proto", "second", &[], vec![message("Shared", vec![])]),
    ]);

    let schema = SchemaLoader::new().load_bytes(bytes.clone()).unwrap();
    let holder = schema.message("app.Holder").unwrap();
    assert_eq!(
        schema.message_type(holder.field(1).unwrap()).unwrap().full_name(),
        "first.Shared"
    );

    let strict = SchemaLoader::with_config(
        LoaderConfig::new().import_policy(ImportPolicy::RejectAmbiguous),
    );
    match strict.load_bytes(bytes).unwrap_err() {
        Error::AmbiguousTypeReference { candidates, .. } => {
            assert_eq!(candidates, vec!["first.Shared", "second.Shared"]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn duplicate_type_name_produces_no_schema() {
    let bytes = encode(vec![
        common(),
        file("again.proto", "common", &[], vec![message("Point", vec![])]),
    ]);
    let loader = SchemaLoader::new();
    assert!(matches!(
        loader.load_bytes(bytes),
        Err(Error::DuplicateTypeName { ref name, .. }) if name == "common.Point"
    ));
    assert_eq!(loader.cached_len(), 0);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Unit {
    Celsius,
    Kelvin,
}

impl ProtoShape for Unit {
    fn shape() -> Shape {
        Shape::Enum(EnumShape::new("Unit", ["CELSIUS", "KELVIN"]))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Reading {
    sensor: String,
    samples: Vec<f64>,
    labels: HashMap<String, i64>,
    unit: Unit,
    next: Option<Box<Reading>>,
}

impl ProtoShape for Reading {
    fn shape() -> Shape {
        Shape::Object(ObjectShape::new("Reading", || {
            vec![
                Property::of::<String>("sensor"),
                Property::of::<Vec<f64>>("samples"),
                Property::of::<HashMap<String, i64>>("labels"),
                Property::of::<Unit>("unit"),
                Property::of::<Option<Box<Reading>>>("next"),
            ]
        }))
    }
}

fn to_dynamic(reading: &Reading, descriptor: &prost_reflect::MessageDescriptor) -> DynamicMessage {
    let mut message = DynamicMessage::new(descriptor.clone());
    message.set_field_by_name("sensor", Value::String(reading.sensor.clone()));
    message.set_field_by_name(
        "samples",
        Value::List(reading.samples.iter().copied().map(Value::F64).collect()),
    );
    message.set_field_by_name(
        "labels",
        Value::Map(
            reading
                .labels
                .iter()
                .map(|(k, v)| (MapKey::String(k.clone()), Value::I64(*v)))
                .collect(),
        ),
    );
    message.set_field_by_name("unit", Value::EnumNumber(reading.unit as i32));
    if let Some(next) = &reading.next {
        message.set_field_by_name("next", Value::Message(to_dynamic(next, descriptor)));
    }
    message
}

fn from_dynamic(message: &DynamicMessage) -> Reading {
    let field = |name: &str| message.get_field_by_name(name).unwrap().into_owned();
    let labels = field("labels")
        .as_map()
        .unwrap()
        .iter()
        .map(|(k, v)| match k {
            MapKey::String(k) => (k.clone(), v.as_i64().unwrap()),
            other => panic!("unexpected key {:?}", other),
        })
        .collect();
    let unit = match field("unit").as_enum_number().unwrap() {
        0 => Unit::Celsius,
        1 => Unit::Kelvin,
        other => panic!("unexpected unit {}", other),
    };
    let next = message
        .has_field_by_name("next")
        .then(|| Box::new(from_dynamic(field("next").as_message().unwrap())));

    Reading {
        sensor: field("sensor").as_str().unwrap().to_string(),
        samples: field("samples")
            .as_list()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect(),
        labels,
        unit,
        next,
    }
}

#[test]
fn generated_schema_round_trips_an_instance() {
    let mapper =
        ProtoMapper::new().with_generator_config(GeneratorConfig::new().package("telemetry"));
    let schema = mapper.generate_schema_for::<Reading>().unwrap();
    assert_eq!(schema.root().unwrap().full_name(), "telemetry.Reading");

    let pool = schema.to_descriptor_pool().unwrap();
    let descriptor = pool.get_message_by_name("telemetry.Reading").unwrap();

    let reading = Reading {
        sensor: "boiler".into(),
        samples: vec![21.5, 22.0, 22.75],
        labels: HashMap::from([("site".to_string(), 4), ("rack".to_string(), -2)]),
        unit: Unit::Kelvin,
        next: Some(Box::new(Reading {
            sensor: "intake".into(),
            samples: vec![],
            labels: HashMap::new(),
            unit: Unit::Celsius,
            next: None,
        })),
    };

    let bytes = to_dynamic(&reading, &descriptor).encode_to_vec();
    let decoded = DynamicMessage::decode(descriptor, bytes.as_slice()).unwrap();
    assert_eq!(from_dynamic(&decoded), reading);
}
