/*!
 * Tool registry.
 *
 * Maps tool names to executors plus their activation state. Reads vastly
 * outnumber writes (activation changes only), so the whole table sits
 * behind a read-mostly lock. Executors must not reach back into runner
 * state; everything they need arrives through `execute`.
 */

use async_trait::async_trait;
use rcrt_core::models::ToolDescriptor;
use rcrt_client::{SecretRef, SecretValue};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;
use tracing::warn;

const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Decrypted secrets for exactly one invocation. Dropped (and scrubbed)
/// when the execution returns.
#[derive(Default)]
pub struct ToolSecrets {
    values: HashMap<String, SecretValue>,
}

impl ToolSecrets {
    pub fn insert(&mut self, name: String, value: SecretValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.expose())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn execute(&self, input: JsonValue, secrets: &ToolSecrets) -> anyhow::Result<JsonValue>;
}

pub struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
    pub descriptor: ToolDescriptor,
    pub active: bool,
    pub inactive_reason: Option<String>,
    pub secret_refs: Vec<SecretRef>,
    pub semaphore: Arc<Semaphore>,
    validator: Option<Arc<jsonschema::Validator>>,
}

impl RegisteredTool {
    /// Validate an input value against the tool's input schema. A schema
    /// that failed to compile at registration accepts everything.
    pub fn validate_input(&self, input: &JsonValue) -> Result<(), String> {
        match &self.validator {
            Some(validator) => validator
                .validate(input)
                .map_err(|e| format!("input does not match schema: {}", e)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    tools: HashMap<String, Arc<RegisteredTool>>,
    // Registration order drives the initial catalog publish order.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor();
        let name = descriptor.name.clone();

        let validator = match jsonschema::validator_for(&descriptor.input_schema) {
            Ok(v) => Some(Arc::new(v)),
            Err(e) => {
                warn!("tool '{}' input schema does not compile ({}), accepting any input", name, e);
                None
            }
        };

        let max_in_flight = descriptor.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT).max(1);
        let registered = Arc::new(RegisteredTool {
            tool,
            descriptor,
            active: false,
            inactive_reason: Some("awaiting secret resolution".to_string()),
            secret_refs: Vec::new(),
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            validator,
        });

        let mut inner = self.inner.write().expect("registry lock");
        if inner.tools.insert(name.clone(), registered).is_some() {
            warn!("overwriting duplicate tool registration '{}'", name);
        } else {
            inner.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.inner.read().expect("registry lock").tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().expect("registry lock").order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_active(&self, name: &str, secret_refs: Vec<SecretRef>) {
        self.update_entry(name, |reg| {
            reg.active = true;
            reg.inactive_reason = None;
            reg.secret_refs = secret_refs.clone();
        });
    }

    pub fn set_inactive(&self, name: &str, reason: &str) {
        self.update_entry(name, |reg| {
            reg.active = false;
            reg.inactive_reason = Some(reason.to_string());
            reg.secret_refs = Vec::new();
        });
    }

    pub fn set_all_inactive(&self, reason: &str) {
        for name in self.names() {
            self.set_inactive(&name, reason);
        }
    }

    fn update_entry(&self, name: &str, apply: impl Fn(&mut RegisteredTool)) {
        let mut inner = self.inner.write().expect("registry lock");
        if let Some(existing) = inner.tools.get(name) {
            let mut replacement = RegisteredTool {
                tool: existing.tool.clone(),
                descriptor: existing.descriptor.clone(),
                active: existing.active,
                inactive_reason: existing.inactive_reason.clone(),
                secret_refs: existing.secret_refs.clone(),
                semaphore: existing.semaphore.clone(),
                validator: existing.validator.clone(),
            };
            apply(&mut replacement);
            inner.tools.insert(name.to_string(), Arc::new(replacement));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcrt_core::models::{RequiredSecret, SecretScope};
    use serde_json::json;

    struct FakeTool {
        name: &'static str,
        schema: JsonValue,
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: self.name.to_string(),
                description: "fake".into(),
                category: "test".into(),
                input_schema: self.schema.clone(),
                output_schema: json!({"type": "object"}),
                examples: vec![],
                required_secrets: vec![RequiredSecret {
                    name: "api-key".into(),
                    scope_type: SecretScope::Global,
                    scope_id: None,
                }],
                max_in_flight: Some(2),
            }
        }

        async fn execute(&self, input: JsonValue, _secrets: &ToolSecrets) -> anyhow::Result<JsonValue> {
            Ok(input)
        }
    }

    #[test]
    fn tools_register_inactive_until_secrets_resolve() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool {
            name: "fake",
            schema: json!({"type": "object"}),
        }));

        let reg = registry.get("fake").unwrap();
        assert!(!reg.active);
        assert!(reg.inactive_reason.is_some());

        registry.set_active("fake", vec![]);
        let reg = registry.get("fake").unwrap();
        assert!(reg.active);
        assert!(reg.inactive_reason.is_none());
    }

    #[test]
    fn registration_order_is_preserved() {
        let registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(FakeTool {
                name,
                schema: json!(true),
            }));
        }
        assert_eq!(registry.names(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn input_validation_uses_the_declared_schema() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool {
            name: "strict",
            schema: json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }),
        }));

        let reg = registry.get("strict").unwrap();
        assert!(reg.validate_input(&json!({"message": "hi"})).is_ok());
        assert!(reg.validate_input(&json!({})).is_err());
        assert!(reg.validate_input(&json!({"message": 42})).is_err());
    }

    #[test]
    fn max_in_flight_sizes_the_semaphore() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool {
            name: "fake",
            schema: json!(true),
        }));
        let reg = registry.get("fake").unwrap();
        assert_eq!(reg.semaphore.available_permits(), 2);
    }
}
