//! Descriptor-set loading with a per-identity cache.
//!
//! [`SchemaLoader`] drives the load path: acquire bytes, decode the
//! container, merge separately supplied import sets, resolve. Results are
//! cached by [`SourceId`]:
//!
//! - a warm hit clones an `Arc` without touching the source,
//! - concurrent first loads of one identity decode and resolve exactly once,
//! - failures are returned to every waiter and never cached.
//!
//! Each identity owns a slot holding a `OnceLock` plus an init mutex. The map
//! lock is only held long enough to fetch or insert the slot, so loads of
//! different identities proceed in parallel.

mod source;

use crate::descriptor::FileDescriptorSet;
use crate::error::{Error, Result};
use crate::reader::{DescriptorBinaryReader, ReaderConfig};
use crate::registry::ImportPolicy;
use crate::resolver::{ImportVisibility, Resolver, ResolverConfig};
use crate::schema::ResolvedSchema;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tracing::{debug, trace};

use source::read_file;

pub use source::{FileUrlLocator, Locator, Source, SourceId};

/// Configuration for the loader
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Whether resolved schemas are cached per source identity
    pub cache_enabled: bool,
    /// Largest accepted source in bytes
    pub max_source_size: usize,
    /// Tie-break for names declared by several imports
    pub import_policy: ImportPolicy,
    /// Import visibility rule
    pub import_visibility: ImportVisibility,
    /// Maximum message nesting depth in a container
    pub max_depth: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            max_source_size: 64 * 1024 * 1024, // 64 MB
            import_policy: ImportPolicy::default(),
            import_visibility: ImportVisibility::default(),
            max_depth: ReaderConfig::default().max_depth,
        }
    }
}

impl LoaderConfig {
    /// Creates a new loader config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the cache
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the source size limit
    pub fn max_source_size(mut self, size: usize) -> Self {
        self.max_source_size = size;
        self
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

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Counters describing the work a loader has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Containers decoded
    pub decodes: usize,
    /// Descriptor sets resolved
    pub resolutions: usize,
    /// Loads answered from the cache
    pub cache_hits: usize,
}

#[derive(Debug, Default)]
struct Slot {
    value: OnceLock<Arc<ResolvedSchema>>,
    init: Mutex<()>,
}

/// Loads and caches resolved schemas
#[derive(Debug)]
pub struct SchemaLoader {
    config: LoaderConfig,
    reader: DescriptorBinaryReader,
    resolver: Resolver,
    locator: Arc<dyn Locator>,
    cache: RwLock<HashMap<SourceId, Arc<Slot>>>,
    decodes: AtomicUsize,
    resolutions: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl Default for SchemaLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaLoader {
    /// Creates a loader with default configuration
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    /// Creates a loader with custom configuration
    pub fn with_config(config: LoaderConfig) -> Self {
        let reader =
            DescriptorBinaryReader::with_config(ReaderConfig::new().max_depth(config.max_depth));
        let resolver = Resolver::with_config(
            ResolverConfig::new()
                .import_policy(config.import_policy)
                .import_visibility(config.import_visibility),
        );
        let locator = Arc::new(FileUrlLocator::with_max_size(config.max_source_size));
        Self {
            config,
            reader,
            resolver,
            locator,
            cache: RwLock::new(HashMap::new()),
            decodes: AtomicUsize::new(0),
            resolutions: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    /// Replaces the locator used for URL sources
    pub fn with_locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = locator;
        self
    }

    /// Returns the configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Loads a container held in memory
    pub fn load_bytes(&self, bytes: impl Into<Bytes>) -> Result<Arc<ResolvedSchema>> {
        let bytes = bytes.into();
        self.check_size("<bytes in memory>", bytes.len())?;
        self.cached(SourceId::content(&bytes), || self.decode_and_resolve(&[bytes.clone()]))
    }

    /// Loads a container from a stream, read to the end
    pub fn load_reader(&self, reader: impl Read) -> Result<Arc<ResolvedSchema>> {
        let limit = self.config.max_source_size;
        let mut buffer = Vec::new();
        reader
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut buffer)
            .map_err(|e| Error::source_unavailable("<stream>", e))?;
        self.check_size("<stream>", buffer.len())?;
        self.load_bytes(buffer)
    }

    /// Loads a container file
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<Arc<ResolvedSchema>> {
        let path = path.as_ref();
        let id = SourceId::path(path)?;
        self.cached(id, || {
            let bytes = self.acquire(&Source::Path(path.to_path_buf()))?;
            self.decode_and_resolve(&[bytes])
        })
    }

    /// Loads a container through the locator
    pub fn load_url(&self, url: &str) -> Result<Arc<ResolvedSchema>> {
        self.cached(SourceId::Url(url.to_string()), || {
            let bytes = self.acquire(&Source::Url(url.to_string()))?;
            self.decode_and_resolve(&[bytes])
        })
    }

    /// Loads a primary container together with separately supplied imports.
    ///
    /// The sets are merged in order before resolution; identical files
    /// shipped in several sets collapse into one. A single source shares its
    /// cache entry with the matching `load_*` call.
    pub fn load_sources(&self, sources: &[Source]) -> Result<Arc<ResolvedSchema>> {
        let mut ids = sources
            .iter()
            .map(SourceId::of)
            .collect::<Result<Vec<_>>>()?;
        let id = match ids.len() {
            0 => {
                return Err(Error::source_unavailable(
                    "<no sources>",
                    io::Error::new(io::ErrorKind::InvalidInput, "at least one source is required"),
                ))
            }
            1 => ids.remove(0),
            _ => SourceId::Composite(ids),
        };

        self.cached(id, || {
            let parts = sources
                .iter()
                .map(|source| self.acquire(source))
                .collect::<Result<Vec<_>>>()?;
            self.decode_and_resolve(&parts)
        })
    }

    /// Decodes a source without resolving it
    pub fn read_descriptor_set(&self, source: &Source) -> Result<FileDescriptorSet> {
        let bytes = self.acquire(source)?;
        self.decode(&bytes)
    }

    /// Returns a snapshot of the counters
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            decodes: self.decodes.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Number of cached schemas
    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.value.get().is_some())
            .count()
    }

    /// Drops every cached schema
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn check_size(&self, identity: &str, size: usize) -> Result<()> {
        if size > self.config.max_source_size {
            return Err(Error::SourceTooLarge {
                identity: identity.to_string(),
                size,
                limit: self.config.max_source_size,
            });
        }
        Ok(())
    }

    fn acquire(&self, source: &Source) -> Result<Bytes> {
        let bytes = match source {
            Source::Bytes(bytes) => bytes.clone(),
            Source::Path(path) => read_file(
                path,
                &path.display().to_string(),
                self.config.max_source_size,
            )?,
            Source::Url(url) => self.locator.open(url)?,
        };
        self.check_size(&source.describe(), bytes.len())?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<FileDescriptorSet> {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        self.reader.read_set(bytes)
    }

    fn decode_and_resolve(&self, parts: &[Bytes]) -> Result<ResolvedSchema> {
        let mut set = FileDescriptorSet::default();
        for part in parts {
            set.merge(self.decode(part)?)?;
        }
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        self.resolver.resolve(&set)
    }

    fn slot(&self, id: &SourceId) -> Arc<Slot> {
        if let Some(slot) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return slot.clone();
        }
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone()
    }

    fn cached(
        &self,
        id: SourceId,
        load: impl FnOnce() -> Result<ResolvedSchema>,
    ) -> Result<Arc<ResolvedSchema>> {
        if !self.config.cache_enabled {
            return load().map(Arc::new);
        }

        let slot = self.slot(&id);
        if let Some(schema) = slot.value.get() {
            trace!("Cache hit for {}", id);
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(schema.clone());
        }

        let _guard = slot.init.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have finished while we waited
        if let Some(schema) = slot.value.get() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(schema.clone());
        }

        debug!("Loading {}", id);
        match load() {
            Ok(schema) => {
                let schema = Arc::new(schema);
                let _ = slot.value.set(schema.clone());
                Ok(schema)
            }
            Err(e) => {
                self.evict_empty(&id, &slot);
                Err(e)
            }
        }
    }

    /// Drops a slot whose load failed, unless it was replaced or filled
    fn evict_empty(&self, id: &SourceId, slot: &Arc<Slot>) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let unused = cache
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.value.get().is_none());
        if unused {
            cache.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    fn set_bytes(files: Vec<FileDescriptorProto>) -> Vec<u8> {
        prost_types::FileDescriptorSet { file: files }.encode_to_vec()
    }

    fn common() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("common.proto".into()),
            package: Some("common".into()),
            message_type: vec![DescriptorProto {
                name: Some("Point".into()),
                field: vec![FieldDescriptorProto {
                    name: Some("x".into()),
                    number: Some(1),
                    label: Some(Label::Optional as i32),
                    r#type: Some(Type::Int32 as i32),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn shapes() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("shapes.proto".into()),
            package: Some("shapes".into()),
            dependency: vec!["common.proto".into()],
            message_type: vec![DescriptorProto {
                name: Some("Circle".into()),
                field: vec![FieldDescriptorProto {
                    name: Some("center".into()),
                    number: Some(1),
                    label: Some(Label::Optional as i32),
                    r#type: Some(Type::Message as i32),
                    type_name: Some(".common.Point".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_bytes_are_cached_by_content() {
        let loader = SchemaLoader::new();
        let bytes = set_bytes(vec![common()]);

        let first = loader.load_bytes(bytes.clone()).unwrap();
        let second = loader.load_bytes(bytes).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            loader.stats(),
            LoaderStats {
                decodes: 1,
                resolutions: 1,
                cache_hits: 1
            }
        );

        loader.clear_cache();
        assert_eq!(loader.cached_len(), 0);
        let third = loader.load_bytes(set_bytes(vec![common()])).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn test_disabled_cache_reloads() {
        let loader = SchemaLoader::with_config(LoaderConfig::new().cache_enabled(false));
        let bytes = set_bytes(vec![common()]);
        loader.load_bytes(bytes.clone()).unwrap();
        loader.load_bytes(bytes).unwrap();
        assert_eq!(loader.stats().decodes, 2);
        assert_eq!(loader.cached_len(), 0);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let loader = SchemaLoader::new();
        let bytes = set_bytes(vec![shapes()]);
        for _ in 0..2 {
            let err = loader.load_bytes(bytes.clone()).unwrap_err();
            assert!(matches!(err, Error::MissingImport { .. }));
        }
        assert_eq!(loader.stats().decodes, 2);
        assert_eq!(loader.stats().cache_hits, 0);
    }

    #[test]
    fn test_load_sources_merges_imports() {
        let loader = SchemaLoader::new();
        let schema = loader
            .load_sources(&[
                Source::from(set_bytes(vec![shapes()])),
                Source::from(set_bytes(vec![common()])),
            ])
            .unwrap();
        assert_eq!(schema.root().unwrap().full_name(), "shapes.Circle");
        assert!(schema.message("common.Point").is_some());

        assert!(loader.load_sources(&[]).is_err());
    }

    #[test]
    fn test_source_size_limit() {
        let loader = SchemaLoader::with_config(LoaderConfig::new().max_source_size(4));
        let bytes = set_bytes(vec![common()]);
        assert!(matches!(
            loader.load_bytes(bytes.clone()),
            Err(Error::SourceTooLarge { limit: 4, .. })
        ));
        assert!(matches!(
            loader.load_reader(bytes.as_slice()),
            Err(Error::SourceTooLarge { size: 5, .. })
        ));
    }

    #[test]
    fn test_failed_loads_leave_no_slots() {
        let loader = SchemaLoader::new();
        for i in 0..100u8 {
            // Field 1 declared as LEN with a length past the end of the buffer
            assert!(loader.load_bytes(vec![0x0A, 0x7F, i]).is_err());
        }
        assert!(loader.load_bytes(set_bytes(vec![shapes()])).is_err());
        assert_eq!(loader.cache.read().unwrap().len(), 0);

        loader.load_bytes(set_bytes(vec![common()])).unwrap();
        assert_eq!(loader.cache.read().unwrap().len(), 1);
        assert_eq!(loader.cached_len(), 1);
    }

    #[test]
    fn test_path_and_url_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.pb");
        let bytes = set_bytes(vec![common()]);
        std::fs::write(&path, &bytes).unwrap();

        let limit = bytes.len() - 1;
        let loader = SchemaLoader::with_config(LoaderConfig::new().max_source_size(limit));
        assert!(matches!(
            loader.load_path(&path),
            Err(Error::SourceTooLarge { size, .. }) if size == bytes.len()
        ));
        let url = url::Url::from_file_path(&path).unwrap();
        assert!(matches!(
            loader.load_url(url.as_str()),
            Err(Error::SourceTooLarge { .. })
        ));
        assert_eq!(loader.stats().decodes, 0);

        let roomy = SchemaLoader::with_config(LoaderConfig::new().max_source_size(bytes.len()));
        assert!(roomy.load_path(&path).is_ok());
    }

    #[test]
    fn test_load_path_and_url_share_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.pb");
        std::fs::write(&path, set_bytes(vec![common()])).unwrap();

        let loader = SchemaLoader::new();
        let by_path = loader.load_path(&path).unwrap();
        let again = loader.load_path(dir.path().join(".").join("common.pb")).unwrap();
        assert!(Arc::ptr_eq(&by_path, &again));

        let url = format!("file://{}", path.display());
        let by_url = loader.load_url(&url).unwrap();
        assert_eq!(*by_path, *by_url);
        assert_eq!(loader.stats().decodes, 2);

        let missing = loader.load_path(dir.path().join("missing.pb")).unwrap_err();
        assert!(missing.is_source_error());
    }

    #[test]
    fn test_read_descriptor_set_is_unresolved() {
        let loader = SchemaLoader::new();
        let set = loader
            .read_descriptor_set(&Source::from(set_bytes(vec![shapes()])))
            .unwrap();
        assert_eq!(set.files.len(), 1);
        assert_eq!(set.files[0].dependencies, vec!["common.proto".to_string()]);
    }
}
