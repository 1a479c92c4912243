//! Global type registry.
//!
//! [`TypeRegistry`] indexes every message and enum of a
//! [`FileDescriptorSet`] by fully-qualified name and assigns the arena ids
//! the resolved schema will use. Ids follow declaration order: files in set
//! order, and within a file each top-level message followed by its nested
//! types (pre-order), then the top-level enums.
//!
//! ## Partial-name lookup
//!
//! [`TypeRegistry::lookup`] applies protobuf scoping:
//!
//! 1. A name starting with `.` is absolute.
//! 2. Otherwise the name is tried in the scope of the referencing message,
//!    then each enclosing scope outward through the package to the root.
//!    The first visible match wins.
//! 3. Failing that, each imported file's top-level names (relative to that
//!    file's package) are tried in import order.
//!
//! Two imports declaring the same relative name is settled by
//! [`ImportPolicy`]. The default, first-import-wins, is
//! implementation-defined behavior; callers that need protoc's strictness
//! should select [`ImportPolicy::RejectAmbiguous`].

use crate::descriptor::{EnumDescriptor, FileDescriptorSet, MessageDescriptor};
use crate::error::{Error, Result};
use crate::schema::{EnumId, MessageId, TypeRef};
use std::collections::HashMap;
use tracing::trace;

/// Tie-break for a name found in more than one imported file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportPolicy {
    /// The earliest import in declaration order wins
    #[default]
    FirstImportWins,
    /// Several candidates fail with `AmbiguousTypeReference`
    RejectAmbiguous,
}

/// Outcome of a partial-name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Exactly one descriptor was selected
    Found(TypeRef),
    /// Several imports declare the name and the policy rejects ambiguity
    Ambiguous(Vec<TypeRef>),
    /// No visible descriptor has the name
    NotFound,
}

#[derive(Debug)]
pub(crate) struct MessageEntry<'s> {
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) parent: Option<MessageId>,
    pub(crate) descriptor: &'s MessageDescriptor,
    pub(crate) nested_messages: Vec<MessageId>,
    pub(crate) nested_enums: Vec<EnumId>,
}

#[derive(Debug)]
pub(crate) struct EnumEntry<'s> {
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) parent: Option<MessageId>,
    pub(crate) descriptor: &'s EnumDescriptor,
}

#[derive(Debug, Default)]
pub(crate) struct FileEntry {
    pub(crate) messages: Vec<MessageId>,
    pub(crate) enums: Vec<EnumId>,
}

/// Fully-qualified name index over a descriptor set
#[derive(Debug)]
pub struct TypeRegistry<'s> {
    set: &'s FileDescriptorSet,
    pub(crate) messages: Vec<MessageEntry<'s>>,
    pub(crate) enums: Vec<EnumEntry<'s>>,
    pub(crate) files: Vec<FileEntry>,
    by_name: HashMap<String, TypeRef>,
}

/// Joins a scope and a name with `.`, omitting an empty scope
pub(crate) fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

impl<'s> TypeRegistry<'s> {
    /// Registers every type of the set.
    ///
    /// Fails with [`Error::DuplicateTypeName`] when two declarations share a
    /// fully-qualified name.
    pub fn build(set: &'s FileDescriptorSet) -> Result<Self> {
        let mut registry = Self {
            set,
            messages: Vec::new(),
            enums: Vec::new(),
            files: Vec::with_capacity(set.files.len()),
            by_name: HashMap::new(),
        };

        for (index, file) in set.files.iter().enumerate() {
            let mut entry = FileEntry::default();
            for message in &file.messages {
                let id = registry.register_message(index, &file.package, None, message)?;
                entry.messages.push(id);
            }
            for descriptor in &file.enums {
                let id = registry.register_enum(index, &file.package, None, descriptor)?;
                entry.enums.push(id);
            }
            registry.files.push(entry);
        }

        trace!(
            "Registered {} messages and {} enums from {} files",
            registry.messages.len(),
            registry.enums.len(),
            set.files.len()
        );
        Ok(registry)
    }

    fn insert(&mut self, full_name: &str, file: usize, type_ref: TypeRef) -> Result<()> {
        if let Some(&existing) = self.by_name.get(full_name) {
            return Err(Error::DuplicateTypeName {
                name: full_name.to_string(),
                first_file: self.set.files[self.file_of(existing)].name.clone(),
                second_file: self.set.files[file].name.clone(),
            });
        }
        self.by_name.insert(full_name.to_string(), type_ref);
        Ok(())
    }

    fn register_message(
        &mut self,
        file: usize,
        scope: &str,
        parent: Option<MessageId>,
        descriptor: &'s MessageDescriptor,
    ) -> Result<MessageId> {
        let full_name = qualify(scope, &descriptor.name);
        let id = MessageId::new(self.messages.len());
        self.insert(&full_name, file, TypeRef::Message(id))?;
        self.messages.push(MessageEntry {
            full_name: full_name.clone(),
            file,
            parent,
            descriptor,
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
        });

        for nested in &descriptor.nested_messages {
            let child = self.register_message(file, &full_name, Some(id), nested)?;
            self.messages[id.index()].nested_messages.push(child);
        }
        for nested in &descriptor.nested_enums {
            let child = self.register_enum(file, &full_name, Some(id), nested)?;
            self.messages[id.index()].nested_enums.push(child);
        }
        Ok(id)
    }

    fn register_enum(
        &mut self,
        file: usize,
        scope: &str,
        parent: Option<MessageId>,
        descriptor: &'s EnumDescriptor,
    ) -> Result<EnumId> {
        let full_name = qualify(scope, &descriptor.name);
        let id = EnumId::new(self.enums.len());
        self.insert(&full_name, file, TypeRef::Enum(id))?;
        self.enums.push(EnumEntry {
            full_name,
            file,
            parent,
            descriptor,
        });
        Ok(id)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the set declares no types
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Exact lookup by fully-qualified name (no leading dot)
    pub fn get(&self, full_name: &str) -> Option<TypeRef> {
        self.by_name.get(full_name).copied()
    }

    /// Fully-qualified name of a registered type
    pub fn full_name(&self, type_ref: TypeRef) -> &str {
        match type_ref {
            TypeRef::Message(id) => &self.messages[id.index()].full_name,
            TypeRef::Enum(id) => &self.enums[id.index()].full_name,
        }
    }

    /// Index of the declaring file within the set
    pub fn file_of(&self, type_ref: TypeRef) -> usize {
        match type_ref {
            TypeRef::Message(id) => self.messages[id.index()].file,
            TypeRef::Enum(id) => self.enums[id.index()].file,
        }
    }

    fn visible_match(&self, candidate: &str, visible: &[usize]) -> Option<TypeRef> {
        self.get(candidate)
            .filter(|&found| visible.contains(&self.file_of(found)))
    }

    /// Resolves a possibly partial type name.
    ///
    /// `scope` is the fully-qualified name of the referencing message;
    /// `visible` lists the files the reference may see, the referencing
    /// file first and then its imports in import order.
    pub fn lookup(
        &self,
        scope: &str,
        name: &str,
        visible: &[usize],
        policy: ImportPolicy,
    ) -> Lookup {
        if let Some(absolute) = name.strip_prefix('.') {
            return match self.visible_match(absolute, visible) {
                Some(found) => Lookup::Found(found),
                None => Lookup::NotFound,
            };
        }

        let mut current = scope;
        loop {
            if let Some(found) = self.visible_match(&qualify(current, name), visible) {
                return Lookup::Found(found);
            }
            if current.is_empty() {
                break;
            }
            current = current.rsplit_once('.').map_or("", |(outer, _)| outer);
        }

        let mut candidates = Vec::new();
        for &file in visible.iter().skip(1) {
            let candidate = qualify(&self.set.files[file].package, name);
            if let Some(found) = self.get(&candidate) {
                if self.file_of(found) == file && !candidates.contains(&found) {
                    candidates.push(found);
                }
            }
        }

        match (candidates.len(), policy) {
            (0, _) => Lookup::NotFound,
            (1, _) | (_, ImportPolicy::FirstImportWins) => Lookup::Found(candidates[0]),
            (_, ImportPolicy::RejectAmbiguous) => Lookup::Ambiguous(candidates),
        }
    }
}
