//! Request-shape validation for the action protocol (spec.md §4.1/§7),
//! backed by JSON Schema so each action's required fields are declared
//! data, not hand-rolled `if`-chains.

use std::collections::HashMap;

use jsonschema::Validator;
use serde_json::json;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Authorize,
    Get,
    Set,
    Subscribe,
    Unsubscribe,
    GetMetaData,
    UpdateMetaData,
    UpdateVssTree,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Authorize => "authorize",
            Action::Get => "get",
            Action::Set => "set",
            Action::Subscribe => "subscribe",
            Action::Unsubscribe => "unsubscribe",
            Action::GetMetaData => "getMetaData",
            Action::UpdateMetaData => "updateMetaData",
            Action::UpdateVssTree => "updateVSSTree",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorize" => Some(Action::Authorize),
            "get" => Some(Action::Get),
            "set" => Some(Action::Set),
            "subscribe" => Some(Action::Subscribe),
            "unsubscribe" => Some(Action::Unsubscribe),
            "getMetaData" => Some(Action::GetMetaData),
            "updateMetaData" => Some(Action::UpdateMetaData),
            "updateVSSTree" => Some(Action::UpdateVssTree),
            _ => None,
        }
    }

    fn all() -> [Action; 8] {
        [
            Action::Authorize,
            Action::Get,
            Action::Set,
            Action::Subscribe,
            Action::Unsubscribe,
            Action::GetMetaData,
            Action::UpdateMetaData,
            Action::UpdateVssTree,
        ]
    }

    fn schema(self) -> serde_json::Value {
        let base = json!({
            "type": "object",
            "required": ["action", "requestId"],
            "properties": {
                "action": { "const": self.as_str() },
                "requestId": { "type": "string", "minLength": 1 },
            },
        });
        let serde_json::Value::Object(mut obj) = base else {
            unreachable!()
        };
        let required = obj
            .get_mut("required")
            .and_then(|v| v.as_array_mut())
            .unwrap();
        let properties = obj
            .get_mut("properties")
            .and_then(|v| v.as_object_mut())
            .unwrap();
        match self {
            Action::Authorize => {
                required.push(json!("tokens"));
                properties.insert("tokens".into(), json!({ "type": "string", "minLength": 1 }));
            }
            Action::Get => {
                required.push(json!("path"));
                properties.insert("path".into(), json!({ "type": "string", "minLength": 1 }));
                // Supplemented from the original REST v1 shim's
                // `getSignal(..., bool as_string)` parameter (spec.md §9).
                properties.insert("valueInString".into(), json!({ "type": "boolean" }));
            }
            Action::Subscribe | Action::GetMetaData => {
                required.push(json!("path"));
                properties.insert("path".into(), json!({ "type": "string", "minLength": 1 }));
            }
            Action::Unsubscribe => {
                required.push(json!("subscriptionId"));
                properties.insert(
                    "subscriptionId".into(),
                    json!({ "type": "string", "minLength": 1 }),
                );
            }
            Action::Set => {
                required.push(json!("path"));
                required.push(json!("value"));
                properties.insert("path".into(), json!({ "type": "string", "minLength": 1 }));
                properties.insert("value".into(), json!({}));
            }
            Action::UpdateMetaData => {
                required.push(json!("path"));
                required.push(json!("metadata"));
                properties.insert("path".into(), json!({ "type": "string", "minLength": 1 }));
                properties.insert("metadata".into(), json!({ "type": "object" }));
            }
            Action::UpdateVssTree => {
                required.push(json!("tree"));
                properties.insert("tree".into(), json!({ "type": "object" }));
            }
        }
        serde_json::Value::Object(obj)
    }
}

/// Compiles and holds one [`Validator`] per [`Action`], built once at
/// startup.
pub struct RequestValidator {
    schemas: HashMap<Action, Validator>,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestValidator {
    #[must_use]
    pub fn new() -> Self {
        let schemas = Action::all()
            .into_iter()
            .map(|action| {
                let validator = jsonschema::validator_for(&action.schema())
                    .expect("built-in action schema is always valid");
                (action, validator)
            })
            .collect();
        Self { schemas }
    }

    /// Identify the action and validate the request body against its
    /// schema in one step.
    pub fn validate(&self, body: &serde_json::Value) -> Result<Action, ValidationError> {
        let action_str = body
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ValidationError::SchemaViolation("missing 'action'".to_owned()))?;
        let action = Action::parse(action_str)
            .ok_or_else(|| ValidationError::UnknownAction(action_str.to_owned()))?;
        let validator = &self.schemas[&action];
        validator
            .validate(body)
            .map_err(|e| ValidationError::SchemaViolation(e.to_string()))?;
        Ok(action)
    }

    /// Best-effort `requestId` extraction, used to echo an id back even
    /// on a validation failure (spec.md §7).
    #[must_use]
    pub fn try_extract_request_id(body: &serde_json::Value) -> Option<String> {
        body.get("requestId")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_a_well_formed_get() {
        let v = RequestValidator::new();
        let body = json!({"action": "get", "requestId": "1", "path": "Vehicle.Speed"});
        assert_eq!(v.validate(&body).unwrap(), Action::Get);
    }

    #[test]
    fn rejects_set_without_value() {
        let v = RequestValidator::new();
        let body = json!({"action": "set", "requestId": "1", "path": "Vehicle.Speed"});
        assert!(v.validate(&body).is_err());
    }

    #[test]
    fn rejects_unknown_action() {
        let v = RequestValidator::new();
        let body = json!({"action": "explode", "requestId": "1"});
        assert!(matches!(
            v.validate(&body).unwrap_err(),
            ValidationError::UnknownAction(_)
        ));
    }

    #[test]
    fn extracts_request_id_even_when_invalid() {
        let body = json!({"action": "get", "requestId": "abc"});
        assert_eq!(
            RequestValidator::try_extract_request_id(&body),
            Some("abc".to_owned())
        );
    }
}
