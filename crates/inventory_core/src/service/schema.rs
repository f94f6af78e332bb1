//! Injected JSON Schema rule cache.
//!
//! # Responsibility
//! - Hold compiled payload schemas per resource/reporter type.
//! - Validate reporter payloads before a transaction opens.
//!
//! # Invariants
//! - Lookups are case-insensitive.
//! - An exact `(resource_type, reporter_type)` rule wins over a
//!   resource-type-wide rule, which wins over the default rule.
//! - An empty payload is checked as `{}`; a schema with required
//!   properties therefore rejects it.

use crate::model::representation::Representation;
use crate::service::collaborators::{SchemaValidator, SchemaViolation};
use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

/// Used when nothing is registered: any object with at least one property.
static NON_EMPTY_OBJECT: Lazy<Result<SchemaRule, SchemaCompileError>> =
    Lazy::new(|| SchemaRule::compile(json!({"type": "object", "minProperties": 1})));

/// Schema document that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCompileError {
    pub message: String,
}

impl Display for SchemaCompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid schema: {}", self.message)
    }
}

impl Error for SchemaCompileError {}

/// Compiled payload schema for one resource/reporter type.
#[derive(Clone)]
pub struct SchemaRule {
    source: Value,
    validator: Arc<Validator>,
}

impl Debug for SchemaRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRule")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl PartialEq for SchemaRule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl SchemaRule {
    pub fn compile(schema: Value) -> Result<Self, SchemaCompileError> {
        let validator = jsonschema::validator_for(&schema).map_err(|err| SchemaCompileError {
            message: err.to_string(),
        })?;
        Ok(Self {
            source: schema,
            validator: Arc::new(validator),
        })
    }

    /// Parses and compiles a schema document held as text.
    pub fn from_json_str(schema: &str) -> Result<Self, SchemaCompileError> {
        let value = serde_json::from_str(schema).map_err(|err| SchemaCompileError {
            message: err.to_string(),
        })?;
        Self::compile(value)
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Whether an empty payload passes this schema.
    pub fn allows_empty_data(&self) -> bool {
        self.validator.is_valid(&json!({}))
    }

    fn check(&self, data: &Representation) -> Result<(), String> {
        let instance = data.to_value();
        let errors: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|err| format!("data{}: {}", err.instance_path, err))
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors.join("; ");
        if data.is_empty() {
            return Err(format!("data: cannot be empty ({joined})"));
        }
        Err(joined)
    }
}

type RuleKey = (String, Option<String>);

/// Rule cache owned by the service that uses it.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    rules: RwLock<HashMap<RuleKey, SchemaRule>>,
    /// `None` falls back to requiring a non-empty object.
    default_rule: Option<SchemaRule>,
}

impl SchemaRegistry {
    pub fn new(default_rule: SchemaRule) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            default_rule: Some(default_rule),
        }
    }

    /// Registers a rule; `reporter_type = None` covers every reporter.
    pub fn register(&self, resource_type: &str, reporter_type: Option<&str>, rule: SchemaRule) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rule_key(resource_type, reporter_type), rule);
    }

    pub fn remove(&self, resource_type: &str, reporter_type: Option<&str>) -> Option<SchemaRule> {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&rule_key(resource_type, reporter_type))
    }

    pub fn clear(&self) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Registered rule for one resource/reporter type pair, if any.
    pub fn rule_for(&self, resource_type: &str, reporter_type: &str) -> Option<SchemaRule> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules
            .get(&rule_key(resource_type, Some(reporter_type)))
            .or_else(|| rules.get(&rule_key(resource_type, None)))
            .cloned()
    }

    fn effective_rule(&self, resource_type: &str, reporter_type: &str) -> Result<SchemaRule, String> {
        if let Some(rule) = self.rule_for(resource_type, reporter_type) {
            return Ok(rule);
        }
        match &self.default_rule {
            Some(rule) => Ok(rule.clone()),
            None => NON_EMPTY_OBJECT.clone().map_err(|err| err.to_string()),
        }
    }
}

impl SchemaValidator for SchemaRegistry {
    fn validate(
        &self,
        resource_type: &str,
        reporter_type: &str,
        data: &Representation,
    ) -> Result<(), SchemaViolation> {
        self.effective_rule(resource_type, reporter_type)
            .and_then(|rule| rule.check(data))
            .map_err(|message| SchemaViolation {
                resource_type: resource_type.to_string(),
                reporter_type: reporter_type.to_string(),
                message,
            })
    }
}

fn rule_key(resource_type: &str, reporter_type: Option<&str>) -> RuleKey {
    (
        resource_type.to_ascii_lowercase(),
        reporter_type.map(str::to_ascii_lowercase),
    )
}

#[cfg(test)]
mod tests {
    use super::{SchemaRegistry, SchemaRule};
    use crate::model::representation::Representation;
    use crate::service::collaborators::SchemaValidator;
    use serde_json::json;

    fn data(value: serde_json::Value) -> Representation {
        Representation::from_value(value).expect("object payload")
    }

    fn host_schema() -> SchemaRule {
        SchemaRule::compile(json!({
            "type": "object",
            "properties": {
                "satellite_id": {"type": "string"},
                "cpu_count": {"type": "integer", "minimum": 1}
            },
            "required": ["satellite_id"]
        }))
        .expect("schema compiles")
    }

    #[test]
    fn default_rule_rejects_empty_payloads() {
        let registry = SchemaRegistry::default();
        let violation = registry
            .validate("host", "hbi", &Representation::default())
            .expect_err("empty payload must fail");
        assert!(violation.message.starts_with("data: cannot be empty"));
        registry
            .validate("host", "hbi", &data(json!({"a": 1})))
            .expect("non-empty payload passes");
    }

    #[test]
    fn registered_schema_reports_every_violation() {
        let registry = SchemaRegistry::default();
        registry.register("host", None, host_schema());

        let violation = registry
            .validate("host", "hbi", &data(json!({"cpu_count": 0})))
            .expect_err("missing key and bad minimum");
        assert!(violation.message.contains("satellite_id"));
        assert!(violation.message.contains("data/cpu_count"));

        registry
            .validate("host", "hbi", &data(json!({"satellite_id": "s-1", "cpu_count": 4})))
            .expect("conforming payload passes");
    }

    #[test]
    fn empty_data_allowance_follows_the_schema() {
        let open = SchemaRule::compile(json!({"type": "object"})).expect("schema compiles");
        assert!(open.allows_empty_data());
        assert!(!host_schema().allows_empty_data());

        let registry = SchemaRegistry::default();
        registry.register("host", None, host_schema());
        registry.register("HOST", Some("HBI"), open);

        registry
            .validate("host", "hbi", &Representation::default())
            .expect("exact rule allows empty data");
        let violation = registry
            .validate("host", "acm", &Representation::default())
            .expect_err("resource-wide rule requires satellite_id");
        assert!(violation.message.starts_with("data: cannot be empty"));

        registry.clear();
        assert_eq!(registry.rule_for("host", "acm"), None);
    }

    #[test]
    fn invalid_schema_documents_are_rejected() {
        let error = SchemaRule::compile(json!({"type": "not-a-type"}))
            .expect_err("unknown type must not compile");
        assert!(error.to_string().starts_with("invalid schema"));
        assert!(SchemaRule::from_json_str("{not json").is_err());
        let parsed = SchemaRule::from_json_str(r#"{"type": "object"}"#).expect("valid text");
        assert_eq!(parsed.source(), &json!({"type": "object"}));
    }
}
