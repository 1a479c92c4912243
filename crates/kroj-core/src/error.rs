//! Error types for the kroj-core library.
//!
//! Every load or generate operation either produces a complete
//! [`ResolvedSchema`](crate::ResolvedSchema) or fails with one of these
//! variants. Variants name the offending file, message, field or native
//! type path so a failure can be diagnosed without re-running with tracing.

use thiserror::Error;

/// Result type alias for kroj operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all kroj operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The byte source could not be opened or read
    #[error("source '{identity}' is unavailable: {source}")]
    SourceUnavailable {
        /// Path, URL or description of the source
        identity: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The byte source exceeds the configured size limit
    #[error("source '{identity}' is {size} bytes, limit is {limit}")]
    SourceTooLarge {
        /// Path, URL or description of the source
        identity: String,
        /// Actual size in bytes
        size: usize,
        /// Configured maximum
        limit: usize,
    },

    /// The binary container violates the descriptor grammar
    #[error("malformed descriptor{} at offset {offset}: {details}", format_context(.context))]
    MalformedDescriptor {
        /// Enclosing file/message/field path, empty at top level
        context: String,
        /// Byte offset in the container where decoding failed
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Unsupported proto syntax version
    #[error("file '{file}' declares unsupported syntax '{syntax}'")]
    UnsupportedSyntax {
        /// File declaring the syntax
        file: String,
        /// The unsupported syntax string
        syntax: String,
    },

    /// Two different files share a name
    #[error("file '{file}' is supplied twice with different contents")]
    DuplicateFileName {
        /// The clashing file name
        file: String,
    },

    /// Two types share a fully-qualified name
    #[error("type '{name}' is declared in both '{first_file}' and '{second_file}'")]
    DuplicateTypeName {
        /// Fully-qualified type name
        name: String,
        /// File of the first declaration
        first_file: String,
        /// File of the second declaration
        second_file: String,
    },

    /// Two fields of one message share a number
    #[error("message '{message}' uses field number {number} for both '{first}' and '{second}'")]
    DuplicateFieldNumber {
        /// Fully-qualified message name
        message: String,
        /// The shared number
        number: u32,
        /// First field name
        first: String,
        /// Second field name
        second: String,
    },

    /// Two fields of one message share a name
    #[error("message '{message}' declares field '{field}' more than once")]
    DuplicateFieldName {
        /// Fully-qualified message name
        message: String,
        /// The repeated field name
        field: String,
    },

    /// Two values of one enum share a number without `allow_alias`
    #[error("enum '{enum_name}' uses number {number} for both '{first}' and '{second}'")]
    DuplicateEnumValue {
        /// Fully-qualified enum name
        enum_name: String,
        /// The shared number
        number: i32,
        /// First value name
        first: String,
        /// Second value name
        second: String,
    },

    /// Field number outside the valid range
    #[error(
        "field '{field}' of message '{message}' has invalid number {number}: must be between 1 and {} excluding 19000-19999",
        crate::MAX_FIELD_NUMBER
    )]
    InvalidFieldNumber {
        /// Fully-qualified message name
        message: String,
        /// Field name
        field: String,
        /// The invalid number
        number: i64,
    },

    /// A file imports a file that is not part of the set
    #[error("file '{file}' imports '{import}', which was not supplied")]
    MissingImport {
        /// The dependent file
        file: String,
        /// The absent import
        import: String,
    },

    /// A field's type name matches no visible descriptor
    #[error("field '{field}' of message '{message}' refers to unknown type '{type_name}'")]
    UnresolvedTypeReference {
        /// Fully-qualified message name
        message: String,
        /// Field name
        field: String,
        /// The declared type name
        type_name: String,
    },

    /// A field's type name matches several imported descriptors
    #[error(
        "field '{field}' of message '{message}' refers to ambiguous type '{type_name}' (candidates: {})",
        .candidates.join(", ")
    )]
    AmbiguousTypeReference {
        /// Fully-qualified message name
        message: String,
        /// Field name
        field: String,
        /// The declared type name
        type_name: String,
        /// Every matching fully-qualified name, in import order
        candidates: Vec<String>,
    },

    /// A field's declared kind disagrees with the descriptor it names
    #[error("field '{field}' of message '{message}' expects {expected} but '{type_name}' is not one")]
    TypeKindMismatch {
        /// Fully-qualified message name
        message: String,
        /// Field name
        field: String,
        /// The resolved type name
        type_name: String,
        /// "a message" or "an enum"
        expected: &'static str,
    },

    /// Lookup of a named type that is not in the schema
    #[error("schema has no message named '{name}'")]
    UnknownType {
        /// The requested name
        name: String,
    },

    /// A native type shape cannot be expressed as a schema
    #[error("cannot generate schema for '{path}': {details}")]
    InvalidGeneratedSchema {
        /// Native type path, e.g. `Order.items.price`
        path: String,
        /// What is wrong with it
        details: String,
    },

    /// Failed to build a prost-reflect descriptor pool from the schema
    #[error("failed to build descriptor pool: {0}")]
    DescriptorBuild(String),
}

fn format_context(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" in {}", context)
    }
}

impl Error {
    /// Creates a new source unavailable error
    pub fn source_unavailable(identity: impl Into<String>, source: std::io::Error) -> Self {
        Self::SourceUnavailable {
            identity: identity.into(),
            source,
        }
    }

    /// Creates a new malformed descriptor error without context
    pub fn malformed(offset: usize, details: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            context: String::new(),
            offset,
            details: details.into(),
        }
    }

    /// Creates a new generation error
    pub fn invalid_generated(path: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidGeneratedSchema {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Creates a new descriptor build error
    pub fn descriptor_build(msg: impl Into<String>) -> Self {
        Self::DescriptorBuild(msg.into())
    }

    /// Prefixes the context of a malformed descriptor error.
    ///
    /// Other variants pass through unchanged.
    pub fn within(self, scope: &str) -> Self {
        match self {
            Self::MalformedDescriptor {
                context,
                offset,
                details,
            } => {
                let context = if context.is_empty() {
                    scope.to_string()
                } else {
                    format!("{} > {}", scope, context)
                };
                Self::MalformedDescriptor {
                    context,
                    offset,
                    details,
                }
            }
            other => other,
        }
    }

    /// Returns true if the failure happened while acquiring bytes.
    ///
    /// These are the only errors a caller may reasonably retry; everything
    /// else is a property of the schema itself.
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::SourceTooLarge { .. }
        )
    }
}
