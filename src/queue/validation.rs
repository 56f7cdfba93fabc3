use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::CreateActionRequest;

/// Payload fields each built-in action type must carry.
pub fn required_fields(action_type: &str) -> &'static [&'static str] {
    match action_type {
        "entity_state_change" => &["entity_id", "state"],
        "service_call" => &["domain", "service"],
        "scene_activation" => &["scene_id"],
        "automation_trigger" => &["automation_id"],
        "notification_send" => &["message"],
        "system_command" => &["command"],
        "script_execution" => &["script_path"],
        "bulk_operation" => &["operations"],
        _ => &[],
    }
}

pub fn validate_payload(action_type: &str, payload: &Value) -> Result<(), String> {
    let Some(fields) = payload.as_object() else {
        return Err("payload must be a JSON object".to_string());
    };
    for field in required_fields(action_type) {
        if fields.get(*field).is_none_or(Value::is_null) {
            return Err(format!("payload field '{field}' is required for {action_type}"));
        }
    }
    Ok(())
}

/// Request-level rules checked before anything is written.
pub fn validate_request(request: &CreateActionRequest, now: DateTime<Utc>) -> Result<(), String> {
    if request.action_type.trim().is_empty() {
        return Err("action_type is required".to_string());
    }
    if request.deadline.is_some_and(|d| d <= now) {
        return Err("deadline must be in the future".to_string());
    }
    if request.max_retries.is_some_and(|r| r < 0) {
        return Err("max_retries must not be negative".to_string());
    }
    if request.timeout_seconds.is_some_and(|t| t <= 0) {
        return Err("timeout_seconds must be positive".to_string());
    }
    validate_payload(&request.action_type, &request.payload)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_or_null_fields_are_rejected() {
        let err = validate_payload("entity_state_change", &json!({})).unwrap_err();
        assert!(err.contains("entity_id"));

        let err = validate_payload("entity_state_change", &json!({ "entity_id": "light.a", "state": null }))
            .unwrap_err();
        assert!(err.contains("state"));

        assert!(validate_payload("entity_state_change", &json!({ "entity_id": "light.a", "state": "on" })).is_ok());
    }

    #[test]
    fn payload_must_be_an_object() {
        assert!(validate_payload("scene_activation", &json!("evening")).is_err());
        assert!(validate_payload("custom_type", &Value::Null).is_err());
        assert!(validate_payload("custom_type", &json!({})).is_ok());
    }

    #[test]
    fn request_rules() {
        let now = Utc::now();
        let mut request = CreateActionRequest::new("scene_activation", json!({ "scene_id": "evening" }));
        assert!(validate_request(&request, now).is_ok());

        request.deadline = Some(now - TimeDelta::seconds(1));
        assert!(validate_request(&request, now).is_err());

        request.deadline = None;
        request.max_retries = Some(-1);
        assert!(validate_request(&request, now).is_err());

        request.max_retries = Some(0);
        request.timeout_seconds = Some(0);
        assert!(validate_request(&request, now).is_err());
    }
}
