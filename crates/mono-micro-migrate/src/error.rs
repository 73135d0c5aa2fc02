//! Error types for the migration library.

use thiserror::Error;

use crate::core::Id;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Plan error (invalid YAML, missing fields, bad references, cycles).
    #[error("Plan error: {0}")]
    Config(String),

    /// Source read failed before any rows were produced.
    #[error("Source error: {0}")]
    Source(String),

    /// Target store operation failed below the load protocol.
    #[error("Target store error: {0}")]
    Target(String),

    /// Extracted rows violate a structural expectation of the source schema.
    #[error("Source data error for entity {entity}: {message}")]
    SourceData { entity: String, message: String },

    /// A row could not be converted into its target shape.
    #[error("Transform failed for entity {entity}: {message}")]
    Transform { entity: String, message: String },

    /// A cross-reference pointed at an old id with no allocated new id.
    ///
    /// Always fatal for the entity: it means allocation and resolution
    /// phases overlapped, or a dependency was never migrated.
    #[error("No identity mapping for entity {entity}, set {set}, old id {old_id}")]
    MissingMapping {
        entity: String,
        set: String,
        old_id: Id,
    },

    /// A destination write (clear, insert, or sequence resync) failed.
    #[error("Load failed for entity {entity}, collection {collection}: {message}")]
    Load {
        entity: String,
        collection: String,
        message: String,
    },

    /// Post-load verification found the destination inconsistent.
    #[error("Integrity check failed for entity {entity}: {message}")]
    Integrity { entity: String, message: String },

    /// The external identity service could not be queried.
    #[error("Lookup failed for {entity_kind}: {message}")]
    Lookup {
        entity_kind: String,
        message: String,
    },

    /// Report sink rejected a stage outcome.
    #[error("Report sink error: {0}")]
    Report(String),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a SourceData error.
    pub fn source_data(entity: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SourceData {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a Transform error.
    pub fn transform(entity: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transform {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a MissingMapping error.
    pub fn missing_mapping(entity: impl Into<String>, set: impl Into<String>, old_id: Id) -> Self {
        MigrateError::MissingMapping {
            entity: entity.into(),
            set: set.into(),
            old_id,
        }
    }

    /// Create a Load error for a specific collection.
    pub fn load(
        entity: impl Into<String>,
        collection: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::Load {
            entity: entity.into(),
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Create an Integrity error.
    pub fn integrity(entity: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Integrity {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a Lookup error.
    pub fn lookup(entity_kind: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Lookup {
            entity_kind: entity_kind.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_mapping_display() {
        let err = MigrateError::missing_mapping("placements", "placements", Id::Int(42));
        let msg = format!("{}", err);
        assert!(msg.contains("placements"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_load_error_context() {
        let err = MigrateError::load("users", "users", "connection reset");
        match err {
            MigrateError::Load {
                entity, collection, ..
            } => {
                assert_eq!(entity, "users");
                assert_eq!(collection, "users");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "plan.yaml");
        let err = MigrateError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error"));
        assert!(detailed.contains("Caused by"));
    }
}
