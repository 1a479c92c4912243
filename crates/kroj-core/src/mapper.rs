//! The owning entry point.
//!
//! A [`ProtoMapper`] holds configuration and lazily builds exactly one
//! [`SchemaLoader`], and therefore one cache, for its lifetime. Dropping the
//! mapper drops the loader and everything it cached.

use crate::error::Result;
use crate::generator::{GeneratorConfig, ProtoShape, SchemaGenerator, Shape};
use crate::loader::{LoaderConfig, Locator, SchemaLoader, Source};
use crate::schema::ResolvedSchema;
use bytes::Bytes;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Loads and generates schemas, sharing one loader cache
#[derive(Debug, Default)]
pub struct ProtoMapper {
    loader_config: LoaderConfig,
    locator: Option<Arc<dyn Locator>>,
    generator: SchemaGenerator,
    loader: OnceLock<SchemaLoader>,
}

impl ProtoMapper {
    /// Creates a mapper with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration of the loader built on first use
    pub fn with_loader_config(mut self, config: LoaderConfig) -> Self {
        self.loader_config = config;
        self
    }

    /// Sets the locator for URL sources
    pub fn with_locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Sets the generator configuration
    pub fn with_generator_config(mut self, config: GeneratorConfig) -> Self {
        self.generator = SchemaGenerator::with_config(config);
        self
    }

    /// Returns the loader, building it on the first call.
    ///
    /// Concurrent first calls observe the same instance.
    pub fn descriptor_loader(&self) -> &SchemaLoader {
        self.loader.get_or_init(|| {
            debug!("Creating schema loader");
            let loader = SchemaLoader::with_config(self.loader_config.clone());
            match &self.locator {
                Some(locator) => loader.with_locator(Arc::clone(locator)),
                None => loader,
            }
        })
    }

    /// Loads a descriptor-set file
    pub fn load_descriptor_set_path(&self, path: impl AsRef<Path>) -> Result<Arc<ResolvedSchema>> {
        self.descriptor_loader().load_path(path)
    }

    /// Loads a descriptor set through the locator
    pub fn load_descriptor_set_url(&self, url: &str) -> Result<Arc<ResolvedSchema>> {
        self.descriptor_loader().load_url(url)
    }

    /// Loads a descriptor set from a stream
    pub fn load_descriptor_set_reader(&self, reader: impl Read) -> Result<Arc<ResolvedSchema>> {
        self.descriptor_loader().load_reader(reader)
    }

    /// Loads a descriptor set held in memory
    pub fn load_descriptor_set_bytes(&self, bytes: impl Into<Bytes>) -> Result<Arc<ResolvedSchema>> {
        self.descriptor_loader().load_bytes(bytes)
    }

    /// Loads a primary descriptor set with separately supplied imports
    pub fn load_sources(&self, sources: &[Source]) -> Result<Arc<ResolvedSchema>> {
        self.descriptor_loader().load_sources(sources)
    }

    /// Generates the schema of `T`; never cached
    pub fn generate_schema_for<T: ProtoShape>(&self) -> Result<ResolvedSchema> {
        self.generator.generate::<T>()
    }

    /// Generates the schema of an explicit shape; never cached
    pub fn generate_schema_for_shape(&self, shape: &Shape) -> Result<ResolvedSchema> {
        self.generator.generate_from_shape(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::generator::{ObjectShape, Property};

    #[derive(Debug)]
    struct MemoryLocator(Bytes);

    impl Locator for MemoryLocator {
        fn open(&self, url: &str) -> Result<Bytes> {
            match url {
                "mem://set" => Ok(self.0.clone()),
                _ => Err(Error::source_unavailable(
                    url,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such entry"),
                )),
            }
        }
    }

    #[test]
    fn test_loader_is_built_once() {
        let mapper = ProtoMapper::new();
        let first: *const SchemaLoader = mapper.descriptor_loader();
        let second: *const SchemaLoader = mapper.descriptor_loader();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_first_access_shares_loader() {
        let mapper = ProtoMapper::new();
        let addresses: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| mapper.descriptor_loader() as *const SchemaLoader as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_custom_locator() {
        let set = prost_types::FileDescriptorSet {
            file: vec![prost_types::FileDescriptorProto {
                name: Some("empty.proto".into()),
                ..Default::default()
            }],
        };
        let bytes = Bytes::from(prost::Message::encode_to_vec(&set));
        let mapper = ProtoMapper::new().with_locator(Arc::new(MemoryLocator(bytes)));

        let schema = mapper.load_descriptor_set_url("mem://set").unwrap();
        assert!(schema.file("empty.proto").is_some());
        assert!(mapper.load_descriptor_set_url("mem://other").is_err());
        assert_eq!(mapper.descriptor_loader().stats().decodes, 1);
    }

    #[test]
    fn test_generate_is_not_cached() {
        let mapper = ProtoMapper::new()
            .with_generator_config(GeneratorConfig::new().package("demo"));
        let shape = Shape::Object(ObjectShape::new("Ping", || {
            vec![Property::of::<u64>("sequence")]
        }));
        let first = mapper.generate_schema_for_shape(&shape).unwrap();
        let second = mapper.generate_schema_for_shape(&shape).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.root().unwrap().full_name(), "demo.Ping");
        assert_eq!(mapper.descriptor_loader().stats(), Default::default());
    }
}
