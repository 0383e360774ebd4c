use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{FilterError, Result};
use crate::registry::{FieldKind, MessageRegistry, NamedMessage};

/// Condition on a field's current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Equals(String),
}

impl Predicate {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Predicate::Equals(expected) => value == expected,
        }
    }
}

/// Rewrites `message_type` when `field` satisfies `when`.
///
/// The replacement is a fresh message of the same type with only `field` set
/// to `replacement`; every other field is left at its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRule {
    pub message_type: String,
    pub field: String,
    pub when: Predicate,
    pub replacement: String,
}

impl MutationRule {
    pub fn equals(
        message_type: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        MutationRule {
            message_type: message_type.into(),
            field: field.into(),
            when: Predicate::Equals(expected.into()),
            replacement: replacement.into(),
        }
    }
}

/// Built-in rules: `alice` becomes `bob` on the way in, `hi carol` becomes
/// `hi sally` on the way out.
pub fn default_rules(request_type: &str, response_type: &str) -> Vec<MutationRule> {
    vec![
        MutationRule::equals(request_type, "name", "alice", "bob"),
        MutationRule::equals(response_type, "message", "hi carol", "hi sally"),
    ]
}

/// Reads a JSON array of rules.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<MutationRule>> {
    let raw = std::fs::read(path.as_ref())?;
    let rules: Vec<MutationRule> = serde_json::from_slice(&raw)?;
    log::info!(
        "Loaded {} mutation rules from {}",
        rules.len(),
        path.as_ref().display()
    );
    Ok(rules)
}

/// Process-wide rule set, fixed after startup.
#[derive(Debug, Clone)]
pub struct MutationPolicy {
    registry: Arc<MessageRegistry>,
    rules: Vec<MutationRule>,
}

impl MutationPolicy {
    /// Checks every rule against the registry so lookups cannot fail later.
    pub fn new(registry: Arc<MessageRegistry>, rules: Vec<MutationRule>) -> Result<Self> {
        for rule in &rules {
            let schema = registry.resolve(&rule.message_type)?;
            let field = schema.field(&rule.field)?;
            if field.kind != FieldKind::String {
                return Err(FilterError::Config(format!(
                    "rule on {}.{} targets a {:?} field, only string fields can be rewritten",
                    rule.message_type, rule.field, field.kind
                )));
            }
            if field.repeated {
                return Err(FilterError::Config(format!(
                    "rule on {}.{} targets a repeated field",
                    rule.message_type, rule.field
                )));
            }
            log::debug!("Mutation rule accepted: {:?}", rule);
        }
        Ok(MutationPolicy { registry, rules })
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn rules(&self) -> &[MutationRule] {
        &self.rules
    }

    /// Runs every rule for the message's type, in registration order. Each
    /// rule sees the output of the one before it.
    pub fn apply(&self, message: NamedMessage) -> Result<(NamedMessage, bool)> {
        let mut message = message;
        let mut changed = false;
        let type_name = message.type_name().to_string();

        for rule in self.rules.iter().filter(|rule| rule.message_type == type_name) {
            let hit = rule.when.matches(&message.get_str(&rule.field)?);
            if !hit {
                continue;
            }

            let mut replacement = self.registry.new_instance(message.schema());
            replacement.set_str(&rule.field, rule.replacement.as_str())?;
            log::info!("Rewriting {} into {}", message, replacement);
            message = replacement;
            changed = true;
        }

        Ok((message, changed))
    }
}
