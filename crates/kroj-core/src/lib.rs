//! # kroj-core
//!
//! Protocol Buffers schema resolution and descriptor loading.
//!
//! This crate turns schema sources into a fully resolved, queryable
//! [`ResolvedSchema`] that a wire codec can use to read and write messages
//! field by field. Two sources are supported:
//!
//! - Compiled descriptor sets (`protoc --descriptor_set_out`), decoded by the
//!   [`reader`], indexed by the [`registry`] and bound by the [`resolver`].
//! - Native Rust types that describe their structure through
//!   [`ProtoShape`], turned into a schema by the [`generator`].
//!
//! ## Architecture
//!
//! - [`reader`]: Binary descriptor-set decoding
//! - [`descriptor`]: Unresolved descriptor model
//! - [`registry`]: Fully-qualified name index and partial-name lookup
//! - [`resolver`]: Reference binding and validation
//! - [`schema`]: The immutable resolved schema
//! - [`loader`]: Source acquisition and caching
//! - [`generator`]: Schema synthesis from native shapes
//! - [`mapper`]: The owning entry point
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use kroj_core::ProtoMapper;
//!
//! let mapper = ProtoMapper::new();
//! let schema = mapper.load_descriptor_set_path("shapes.pb")?;
//!
//! let circle = schema.message("shapes.Circle").expect("declared in shapes.proto");
//! for field in circle.fields() {
//!     println!("{} = {} ({:?})", field.name(), field.number(), field.field_type());
//! }
//! # Ok::<(), kroj_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod descriptor;
pub mod error;
pub mod generator;
pub mod loader;
pub mod mapper;
pub mod reader;
pub mod registry;
pub mod resolver;
pub mod schema;

// Re-export primary types for convenience
pub use descriptor::{FileDescriptorSet, ScalarKind, Syntax};
pub use error::{Error, Result};
pub use generator::{GeneratorConfig, ProtoShape, SchemaGenerator, Shape};
pub use loader::{LoaderConfig, LoaderStats, Locator, SchemaLoader, Source, SourceId};
pub use mapper::ProtoMapper;
pub use reader::{DescriptorBinaryReader, ReaderConfig};
pub use registry::{ImportPolicy, TypeRegistry};
pub use resolver::{ImportVisibility, Resolver, ResolverConfig};
pub use schema::{
    Cardinality, Enum, EnumId, Field, FieldType, FileId, Message, MessageId, RenderConfig,
    ResolvedSchema, SchemaFile, SchemaVisitor, StatsVisitor, TypeRef,
};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
/// Used for `reserved X to max` ranges
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;
