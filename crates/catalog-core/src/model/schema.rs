//! Schema registry
//!
//! The registry is supplied by the surrounding system as data: a versioned
//! map from entity type to field specs. It is validated once when built and
//! is immutable afterwards. Type lookup is case-insensitive; every lookup
//! answers with the declared spelling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{CatalogError, Result};

/// Field names a schema may not declare
const RESERVED_FIELDS: &[&str] = &["extra", "same_as"];

/// Value kind of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Boolean,
    Integer,
    Choice { choices: Vec<String> },
    Reference,
    ReferenceList,
}

impl FieldKind {
    pub fn is_relation(&self) -> bool {
        matches!(self, FieldKind::Reference | FieldKind::ReferenceList)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Choice { .. } => "choice",
            FieldKind::Reference => "reference",
            FieldKind::ReferenceList => "reference_list",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Declaration of one field on an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Whether the empty string is an acceptable value
    #[serde(default)]
    pub allow_blank: bool,
    /// Types a reference in this field may point at
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relation_targets: Vec<String>,
    /// Whether merges of a target rewrite this field
    #[serde(default = "default_true")]
    pub redirect_on_merge: bool,
}

impl FieldSpec {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            nullable: false,
            default: None,
            allow_blank: false,
            relation_targets: Vec::new(),
            redirect_on_merge: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn targets(mut self, targets: &[&str]) -> Self {
        self.relation_targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn no_redirect(mut self) -> Self {
        self.redirect_on_merge = false;
        self
    }

    /// A graph node must carry this field
    pub fn is_mandatory(&self) -> bool {
        self.required && !self.nullable && self.default.is_none()
    }

    /// Whether a reference to `type_name` is legal in this field
    pub fn accepts_target(&self, type_name: &str) -> bool {
        self.relation_targets
            .iter()
            .any(|t| t.eq_ignore_ascii_case(type_name))
    }
}

/// Declaration of one entity type
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeSpec {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    /// Scalar fields whose values together identify an entity of this type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub natural_key: Vec<String>,
}

impl TypeSpec {
    pub fn with_field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    pub fn with_natural_key(mut self, fields: &[&str]) -> Self {
        self.natural_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Digest of the natural key of an entity with the given scalar values
    ///
    /// `None` when the type declares no natural key or any key field is
    /// absent or null.
    pub fn natural_key_digest(
        &self,
        entity_type: &str,
        values: &BTreeMap<String, serde_json::Value>,
    ) -> Option<String> {
        if self.natural_key.is_empty() {
            return None;
        }
        let mut key = serde_json::Map::new();
        for field in &self.natural_key {
            match values.get(field) {
                None | Some(serde_json::Value::Null) => return None,
                Some(v) => {
                    key.insert(field.clone(), v.clone());
                }
            }
        }
        let canonical = serde_json::json!({ "type": entity_type, "key": key }).to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Some(hex::encode(hasher.finalize()))
    }
}

/// Registry as written in a schema file, before consistency checks
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryDocument {
    pub version: String,
    pub types: BTreeMap<String, TypeSpec>,
}

/// Versioned registry of entity types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegistryDocument")]
pub struct SchemaRegistry {
    version: String,
    types: BTreeMap<String, TypeSpec>,
}

impl TryFrom<RegistryDocument> for SchemaRegistry {
    type Error = CatalogError;

    fn try_from(doc: RegistryDocument) -> Result<Self> {
        SchemaRegistry::new(doc.version, doc.types)
    }
}

fn invalid(reason: String) -> CatalogError {
    CatalogError::InvalidSchema { reason }
}

impl SchemaRegistry {
    /// Build a registry, checking it for internal consistency
    ///
    /// Relation targets are rewritten to the declared spelling of the
    /// target type.
    ///
    /// # Errors
    ///
    /// `InvalidSchema` when a type or field declaration is inconsistent.
    pub fn new(version: impl Into<String>, mut types: BTreeMap<String, TypeSpec>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(invalid("registry version must not be empty".to_string()));
        }
        if types.is_empty() {
            return Err(invalid("registry declares no types".to_string()));
        }

        let names: Vec<String> = types.keys().cloned().collect();
        for (i, a) in names.iter().enumerate() {
            if let Some(b) = names[i + 1..].iter().find(|b| b.eq_ignore_ascii_case(a)) {
                return Err(invalid(format!(
                    "types '{}' and '{}' differ only by case",
                    a, b
                )));
            }
        }
        let canonical = |name: &str| names.iter().find(|n| n.eq_ignore_ascii_case(name)).cloned();

        for (type_name, spec) in types.iter_mut() {
            for (field_name, field) in spec.fields.iter_mut() {
                let at = format!("{}.{}", type_name, field_name);
                if field_name.starts_with('@') || RESERVED_FIELDS.contains(&field_name.as_str()) {
                    return Err(invalid(format!("{}: field name is reserved", at)));
                }
                if let FieldKind::Choice { choices } = &field.kind {
                    if choices.is_empty() {
                        return Err(invalid(format!("{}: choice field has no choices", at)));
                    }
                }
                if field.kind.is_relation() {
                    if field.relation_targets.is_empty() {
                        return Err(invalid(format!("{}: relation has no targets", at)));
                    }
                    if field.default.is_some() {
                        return Err(invalid(format!("{}: relation cannot have a default", at)));
                    }
                    let mut resolved = Vec::with_capacity(field.relation_targets.len());
                    for target in &field.relation_targets {
                        let name = canonical(target).ok_or_else(|| {
                            invalid(format!("{}: unknown relation target '{}'", at, target))
                        })?;
                        resolved.push(name);
                    }
                    field.relation_targets = resolved;
                } else if !field.relation_targets.is_empty() {
                    return Err(invalid(format!(
                        "{}: {} field cannot declare relation targets",
                        at,
                        field.kind.name()
                    )));
                }
            }

            for key_field in &spec.natural_key {
                match spec.fields.get(key_field) {
                    None => {
                        return Err(invalid(format!(
                            "{}: natural key field '{}' is not declared",
                            type_name, key_field
                        )))
                    }
                    Some(f) if f.kind.is_relation() => {
                        return Err(invalid(format!(
                            "{}: natural key field '{}' must be scalar",
                            type_name, key_field
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self { version, types })
    }

    /// Parse and validate a registry from JSON
    ///
    /// # Errors
    ///
    /// `Serialization` on malformed JSON, `InvalidSchema` on inconsistency.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CatalogError::Serialization {
            message: format!("invalid schema registry: {}", e),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Declared spelling of a type name, matched case-insensitively
    pub fn resolve_type(&self, name: &str) -> Option<&str> {
        if let Some((k, _)) = self.types.get_key_value(name) {
            return Some(k.as_str());
        }
        self.types
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    pub fn type_spec(&self, name: &str) -> Option<&TypeSpec> {
        self.resolve_type(name).and_then(|k| self.types.get(k))
    }

    /// Field declarations for a type
    pub fn fields_for(&self, name: &str) -> Option<&BTreeMap<String, FieldSpec>> {
        self.type_spec(name).map(|t| &t.fields)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Every `(type, field)` a merge of `name` entities must redirect
    ///
    /// This is the declared participation list: relation fields that target
    /// `name` and have not opted out with `redirect_on_merge: false`.
    pub fn referrers_of(&self, name: &str) -> Vec<(String, String)> {
        let Some(target) = self.resolve_type(name) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (type_name, spec) in &self.types {
            for (field_name, field) in &spec.fields {
                if field.kind.is_relation()
                    && field.redirect_on_merge
                    && field.relation_targets.iter().any(|t| t == target)
                {
                    out.push((type_name.clone(), field_name.clone()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let mut types = BTreeMap::new();
        types.insert(
            "Person".to_string(),
            TypeSpec::default()
                .with_field("name", FieldSpec::new(FieldKind::String).required())
                .with_field("orcid", FieldSpec::new(FieldKind::String).nullable())
                .with_natural_key(&["orcid"]),
        );
        types.insert(
            "CreativeWork".to_string(),
            TypeSpec::default()
                .with_field("title", FieldSpec::new(FieldKind::String).required())
                .with_field(
                    "author",
                    FieldSpec::new(FieldKind::Reference).targets(&["person"]),
                )
                .with_field(
                    "reviewers",
                    FieldSpec::new(FieldKind::ReferenceList)
                        .targets(&["Person"])
                        .no_redirect(),
                ),
        );
        SchemaRegistry::new("v1", types).unwrap()
    }

    #[test]
    fn test_type_lookup_is_case_insensitive() {
        let reg = registry();
        assert_eq!(reg.resolve_type("PERSON"), Some("Person"));
        assert_eq!(reg.resolve_type("creativework"), Some("CreativeWork"));
        assert_eq!(reg.resolve_type("Agent"), None);
    }

    #[test]
    fn test_relation_targets_are_canonicalized() {
        let reg = registry();
        let author = &reg.fields_for("CreativeWork").unwrap()["author"];
        assert_eq!(author.relation_targets, vec!["Person".to_string()]);
    }

    #[test]
    fn test_referrers_skip_opted_out_fields() {
        let reg = registry();
        assert_eq!(
            reg.referrers_of("person"),
            vec![("CreativeWork".to_string(), "author".to_string())]
        );
    }

    #[test]
    fn test_unknown_relation_target_rejected() {
        let mut types = BTreeMap::new();
        types.insert(
            "Work".to_string(),
            TypeSpec::default()
                .with_field("by", FieldSpec::new(FieldKind::Reference).targets(&["Agent"])),
        );
        assert!(matches!(
            SchemaRegistry::new("v1", types),
            Err(CatalogError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_relation_natural_key_rejected() {
        let mut types = BTreeMap::new();
        types.insert(
            "Work".to_string(),
            TypeSpec::default()
                .with_field("by", FieldSpec::new(FieldKind::Reference).targets(&["Work"]))
                .with_natural_key(&["by"]),
        );
        assert!(SchemaRegistry::new("v1", types).is_err());
    }

    #[test]
    fn test_natural_key_digest_requires_every_key_field() {
        let reg = registry();
        let person = reg.type_spec("Person").unwrap();
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), serde_json::json!("A. Smith"));
        assert_eq!(person.natural_key_digest("Person", &values), None);

        values.insert("orcid".to_string(), serde_json::json!("0000-0001"));
        let a = person.natural_key_digest("Person", &values).unwrap();
        values.insert("name".to_string(), serde_json::json!("Alice Smith"));
        let b = person.natural_key_digest("Person", &values).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_registry_from_json() {
        let json = r#"{
            "version": "2016-09",
            "types": {
                "Tag": {
                    "fields": {
                        "name": {"kind": "string", "required": true},
                        "scheme": {"kind": "choice", "choices": ["local", "mesh"]}
                    },
                    "natural_key": ["name"]
                }
            }
        }"#;
        let reg = SchemaRegistry::from_json_str(json).unwrap();
        assert_eq!(reg.version(), "2016-09");
        let scheme = &reg.fields_for("tag").unwrap()["scheme"];
        assert!(scheme.redirect_on_merge);
        assert!(matches!(scheme.kind, FieldKind::Choice { .. }));
    }
}
