//! Schema registry file loading
//!
//! The registry is read once at startup from YAML (`.yaml`/`.yml`) or JSON
//! and checked for consistency before it is handed out.

use std::path::Path;

use crate::errors::{io_error, Result};
use catalog_core::errors::{ExError, ExErrorKind};
use catalog_core::{RegistryDocument, SchemaRegistry};

/// Serialization formats understood by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    Yaml,
    Json,
}

impl SchemaFormat {
    /// Format implied by a file extension; JSON when there is none
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                SchemaFormat::Yaml
            }
            _ => SchemaFormat::Json,
        }
    }
}

/// Load and check a registry file
///
/// # Errors
///
/// `Io` if the file cannot be read, `Serialization` if it does not parse,
/// `InvalidSchema` if the declarations are inconsistent.
pub fn load_registry<P: AsRef<Path>>(path: P) -> Result<SchemaRegistry> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| io_error("load_registry", e))?;
    let registry = parse_registry(&text, SchemaFormat::from_path(path))?;
    tracing::debug!(
        path = %path.display(),
        version = registry.version(),
        "Loaded schema registry"
    );
    Ok(registry)
}

/// Parse and check a registry document
///
/// # Errors
///
/// `Serialization` if the text does not parse, `InvalidSchema` if the
/// declarations are inconsistent.
pub fn parse_registry(text: &str, format: SchemaFormat) -> Result<SchemaRegistry> {
    let doc: RegistryDocument = match format {
        SchemaFormat::Yaml => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        SchemaFormat::Json => serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?,
    };
    SchemaRegistry::try_from(doc).map_err(|e| ExError::from(e).with_op("load_registry"))
}

fn parse_error(message: String) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op("load_registry")
        .with_message(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
version: "2016-09"
types:
  Person:
    fields:
      name: {kind: string, required: true}
      orcid: {kind: string, nullable: true}
    natural_key: [orcid]
  CreativeWork:
    fields:
      title: {kind: string, required: true}
      author: {kind: reference, relation_targets: [person]}
"#;

    #[test]
    fn test_yaml_registry() {
        let reg = parse_registry(YAML, SchemaFormat::Yaml).unwrap();
        assert_eq!(reg.version(), "2016-09");
        assert_eq!(
            reg.referrers_of("Person"),
            vec![("CreativeWork".to_string(), "author".to_string())]
        );
    }

    #[test]
    fn test_inconsistent_registry_is_invalid_schema() {
        let yaml = YAML.replace("[person]", "[Agent]");
        let err = parse_registry(&yaml, SchemaFormat::Yaml).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidSchema);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SchemaFormat::from_path(Path::new("s.YML")), SchemaFormat::Yaml);
        assert_eq!(SchemaFormat::from_path(Path::new("s.json")), SchemaFormat::Json);
    }
}
