//! Cross-reference resolution.
//!
//! [`Resolver`] runs once over a complete [`FileDescriptorSet`]: it checks
//! that every import is present, registers all types, binds every named
//! field type to a concrete handle and validates numbering. Because the
//! whole set is registered before any field is bound, forward references
//! (within a file or across files) resolve like any other.
//!
//! Resolution is all-or-nothing: the first violation aborts and no schema is
//! produced.

use crate::descriptor::{DeclaredType, FieldDescriptor, FileDescriptorSet, Label, NamedKind, Syntax};
use crate::error::{Error, Result};
use crate::registry::{ImportPolicy, Lookup, MessageEntry, TypeRegistry};
use crate::schema::{
    Cardinality, Enum, EnumId, Field, FieldType, FileId, Message, MessageId, ResolvedSchema,
    SchemaFile, TypeRef,
};
use crate::MAX_FIELD_NUMBER;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;
use tracing::{debug, trace};

/// Field numbers reserved for the protobuf implementation
pub const RESERVED_FIELD_NUMBERS: RangeInclusive<u32> = 19_000..=19_999;

/// Which imported files a reference may see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportVisibility {
    /// The referencing file plus every transitively imported file
    #[default]
    Transitive,
    /// The referencing file, its direct imports and their public re-exports
    DirectAndPublic,
}

/// Configuration for the resolver
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    /// Tie-break for names declared by several imports
    pub import_policy: ImportPolicy,
    /// Import visibility rule
    pub import_visibility: ImportVisibility,
}

impl ResolverConfig {
    /// Creates a new resolver config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the import ambiguity policy
    pub fn import_policy(mut self, policy: ImportPolicy) -> Self {
        self.import_policy = policy;
        self
    }

    /// Sets the import visibility rule
    pub fn import_visibility(mut self, visibility: ImportVisibility) -> Self {
        self.import_visibility = visibility;
        self
    }
}

/// Binds type references of a descriptor set
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    config: ResolverConfig,
}

/// Returns true if `number` may be used for a field
pub fn is_valid_field_number(number: i64) -> bool {
    (1..=MAX_FIELD_NUMBER as i64).contains(&number)
        && !RESERVED_FIELD_NUMBERS.contains(&(number as u32))
}

impl Resolver {
    /// Creates a resolver with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver with custom configuration
    pub fn with_config(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolves a complete set into an immutable schema
    pub fn resolve(&self, set: &FileDescriptorSet) -> Result<ResolvedSchema> {
        debug!("Resolving {} file(s)", set.files.len());

        let visibility = self.visibility(set)?;
        let registry = TypeRegistry::build(set)?;

        let mut types = HashMap::with_capacity(registry.len());

        let mut enums = Vec::with_capacity(registry.enums.len());
        for (index, entry) in registry.enums.iter().enumerate() {
            let id = EnumId::new(index);
            types.insert(entry.full_name.clone(), TypeRef::Enum(id));
            enums.push(build_enum(id, entry)?);
        }

        let mut messages = Vec::with_capacity(registry.messages.len());
        for (index, entry) in registry.messages.iter().enumerate() {
            let id = MessageId::new(index);
            types.insert(entry.full_name.clone(), TypeRef::Message(id));
            let visible = &visibility[entry.file];
            messages.push(self.build_message(&registry, id, entry, set.files[entry.file].syntax, visible)?);
        }

        let files: Vec<SchemaFile> = set
            .files
            .iter()
            .zip(registry.files.iter())
            .enumerate()
            .map(|(index, (file, entry))| SchemaFile {
                id: FileId::new(index),
                name: file.name.clone(),
                package: file.package.clone(),
                syntax: file.syntax,
                dependencies: file.dependencies.clone(),
                public_dependencies: file.public_dependencies.clone(),
                messages: entry.messages.clone(),
                enums: entry.enums.clone(),
            })
            .collect();

        let root = default_root(&files);

        debug!(
            "Resolved {} messages and {} enums",
            messages.len(),
            enums.len()
        );
        Ok(ResolvedSchema {
            files,
            messages,
            enums,
            types,
            root,
        })
    }

    /// Computes, for every file, the files its references may see.
    ///
    /// The referencing file comes first, imports follow in breadth-first
    /// import order.
    fn visibility(&self, set: &FileDescriptorSet) -> Result<Vec<Vec<usize>>> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(set.files.len());
        for (i, file) in set.files.iter().enumerate() {
            if index.insert(file.name.as_str(), i).is_some() {
                return Err(Error::DuplicateFileName {
                    file: file.name.clone(),
                });
            }
        }

        let mut imports = Vec::with_capacity(set.files.len());
        for file in &set.files {
            let mut resolved = Vec::with_capacity(file.dependencies.len());
            for dependency in &file.dependencies {
                let target = index.get(dependency.as_str()).ok_or_else(|| Error::MissingImport {
                    file: file.name.clone(),
                    import: dependency.clone(),
                })?;
                resolved.push(*target);
            }
            imports.push(resolved);
        }

        let visible = (0..set.files.len())
            .map(|file| match self.config.import_visibility {
                ImportVisibility::Transitive => {
                    walk_imports(file, |f| imports[f].iter().copied().collect())
                }
                ImportVisibility::DirectAndPublic => {
                    let public = |f: usize| -> Vec<usize> {
                        set.files[f]
                            .public_dependencies
                            .iter()
                            .filter_map(|&d| imports[f].get(d).copied())
                            .collect()
                    };
                    let mut seen = vec![file];
                    for &direct in &imports[file] {
                        for reachable in walk_imports(direct, public) {
                            if !seen.contains(&reachable) {
                                seen.push(reachable);
                            }
                        }
                    }
                    seen
                }
            })
            .collect();

        Ok(visible)
    }

    fn build_message(
        &self,
        registry: &TypeRegistry<'_>,
        id: MessageId,
        entry: &MessageEntry<'_>,
        syntax: Syntax,
        visible: &[usize],
    ) -> Result<Message> {
        let descriptor = entry.descriptor;
        let mut fields = Vec::with_capacity(descriptor.fields.len());
        let mut by_number: HashMap<u32, usize> = HashMap::with_capacity(descriptor.fields.len());
        let mut by_name: HashMap<String, usize> = HashMap::with_capacity(descriptor.fields.len());

        for range in &descriptor.reserved_ranges {
            let end = i64::from(range.end);
            if range.start < 1 || end <= i64::from(range.start) || end > i64::from(MAX_FIELD_NUMBER) + 1 {
                return Err(Error::malformed(
                    0,
                    format!("reserved range {} to {} (exclusive) is invalid", range.start, range.end),
                )
                .within(&format!("message '{}'", entry.full_name)));
            }
        }

        for field in &descriptor.fields {
            if !is_valid_field_number(field.number as i64) {
                return Err(Error::InvalidFieldNumber {
                    message: entry.full_name.clone(),
                    field: field.name.clone(),
                    number: field.number as i64,
                });
            }
            let number = field.number as u32;

            if let Some(&existing) = by_number.get(&number) {
                let first: &Field = &fields[existing];
                return Err(Error::DuplicateFieldNumber {
                    message: entry.full_name.clone(),
                    number,
                    first: first.name.clone(),
                    second: field.name.clone(),
                });
            }
            if by_name.contains_key(&field.name) {
                return Err(Error::DuplicateFieldName {
                    message: entry.full_name.clone(),
                    field: field.name.clone(),
                });
            }

            let oneof_index = match field.oneof_index {
                None => None,
                Some(i) if i >= 0 && (i as usize) < descriptor.oneofs.len() => Some(i as usize),
                Some(i) => {
                    return Err(Error::malformed(0, format!("oneof index {} is out of range", i))
                        .within(&format!("message '{}' > field '{}'", entry.full_name, field.name)))
                }
            };

            let field_type = self.resolve_type(registry, entry, field, visible)?;
            let cardinality = cardinality(field, syntax);
            let packed = cardinality == Cardinality::Repeated
                && match field_type {
                    FieldType::Scalar(kind) => kind.is_packable(),
                    FieldType::Enum(_) => true,
                    _ => false,
                }
                && field.packed.unwrap_or(syntax == Syntax::Proto3);

            by_number.insert(number, fields.len());
            by_name.insert(field.name.clone(), fields.len());
            fields.push(Field {
                name: field.name.clone(),
                number,
                cardinality,
                field_type,
                json_name: field.json_name.clone(),
                default_value: field.default_value.clone(),
                oneof_index,
                packed,
                packed_option: field.packed,
                proto3_optional: field.proto3_optional,
            });
        }

        trace!("Resolved message {} ({} fields)", entry.full_name, fields.len());
        Ok(Message {
            id,
            full_name: entry.full_name.clone(),
            name: descriptor.name.clone(),
            file: FileId::new(entry.file),
            parent: entry.parent,
            fields,
            by_number,
            by_name,
            nested_messages: entry.nested_messages.clone(),
            nested_enums: entry.nested_enums.clone(),
            oneofs: descriptor.oneofs.clone(),
            map_entry: descriptor.map_entry,
            reserved_ranges: descriptor.reserved_ranges.clone(),
            reserved_names: descriptor.reserved_names.clone(),
        })
    }

    fn resolve_type(
        &self,
        registry: &TypeRegistry<'_>,
        entry: &MessageEntry<'_>,
        field: &FieldDescriptor,
        visible: &[usize],
    ) -> Result<FieldType> {
        let (name, kind) = match &field.declared_type {
            DeclaredType::Scalar(kind) => return Ok(FieldType::Scalar(*kind)),
            DeclaredType::Named { name, kind } => (name, *kind),
        };

        let mismatch = |found: TypeRef, expected: &'static str| Error::TypeKindMismatch {
            message: entry.full_name.clone(),
            field: field.name.clone(),
            type_name: registry.full_name(found).to_string(),
            expected,
        };

        match registry.lookup(&entry.full_name, name, visible, self.config.import_policy) {
            Lookup::Found(found @ TypeRef::Message(id)) => match kind {
                Some(NamedKind::Enum) => Err(mismatch(found, "an enum")),
                Some(NamedKind::Group) => Ok(FieldType::Group(id)),
                _ => Ok(FieldType::Message(id)),
            },
            Lookup::Found(found @ TypeRef::Enum(id)) => match kind {
                Some(NamedKind::Message) | Some(NamedKind::Group) => {
                    Err(mismatch(found, "a message"))
                }
                _ => Ok(FieldType::Enum(id)),
            },
            Lookup::Ambiguous(candidates) => Err(Error::AmbiguousTypeReference {
                message: entry.full_name.clone(),
                field: field.name.clone(),
                type_name: name.clone(),
                candidates: candidates
                    .into_iter()
                    .map(|c| registry.full_name(c).to_string())
                    .collect(),
            }),
            Lookup::NotFound => Err(Error::UnresolvedTypeReference {
                message: entry.full_name.clone(),
                field: field.name.clone(),
                type_name: name.clone(),
            }),
        }
    }
}

fn cardinality(field: &FieldDescriptor, syntax: Syntax) -> Cardinality {
    match field.label {
        Label::Repeated => Cardinality::Repeated,
        Label::Required => Cardinality::Required,
        Label::Optional if syntax == Syntax::Proto3 && !field.proto3_optional => {
            Cardinality::Singular
        }
        Label::Optional => Cardinality::Optional,
    }
}

/// Breadth-first walk from `start`, `start` first, each file once
fn walk_imports(start: usize, next: impl Fn(usize) -> Vec<usize>) -> Vec<usize> {
    let mut order = vec![start];
    let mut seen: HashSet<usize> = HashSet::from([start]);
    let mut queue: VecDeque<usize> = next(start).into();

    while let Some(file) = queue.pop_front() {
        if seen.insert(file) {
            order.push(file);
            queue.extend(next(file));
        }
    }
    order
}

fn build_enum(id: EnumId, entry: &crate::registry::EnumEntry<'_>) -> Result<Enum> {
    let descriptor = entry.descriptor;
    let mut by_name = HashMap::with_capacity(descriptor.values.len());
    let mut by_number: HashMap<i32, usize> = HashMap::with_capacity(descriptor.values.len());

    for (index, value) in descriptor.values.iter().enumerate() {
        by_name.entry(value.name.clone()).or_insert(index);
        match by_number.get(&value.number) {
            Some(&first) if !descriptor.allow_alias => {
                return Err(Error::DuplicateEnumValue {
                    enum_name: entry.full_name.clone(),
                    number: value.number,
                    first: descriptor.values[first].name.clone(),
                    second: value.name.clone(),
                });
            }
            Some(_) => {}
            None => {
                by_number.insert(value.number, index);
            }
        }
    }

    Ok(Enum {
        id,
        full_name: entry.full_name.clone(),
        name: descriptor.name.clone(),
        file: FileId::new(entry.file),
        parent: entry.parent,
        values: descriptor.values.clone(),
        by_name,
        by_number,
        allow_alias: descriptor.allow_alias,
    })
}

/// First top-level message of the first file that declares any
fn default_root(files: &[SchemaFile]) -> Option<MessageId> {
    files.iter().find_map(|f| f.messages.first().copied())
}
