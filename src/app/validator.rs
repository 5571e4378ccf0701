use serde_json::Value;

/// Structural/profile validation oracle. Returns one message per violation.
pub trait ResourceValidator: Send + Sync {
    fn validate(&self, resource: &Value, profile: Option<&str>) -> Vec<String>;
}

/// Minimal checks used when no profile-aware validator is configured.
#[derive(Debug, Default)]
pub struct StructuralValidator;

impl ResourceValidator for StructuralValidator {
    fn validate(&self, resource: &Value, profile: Option<&str>) -> Vec<String> {
        let object = match resource.as_object() {
            Some(object) => object,
            None => return vec!["Resource is not a JSON object".to_owned()],
        };
        let mut errors = Vec::new();
        match object.get("resourceType") {
            Some(Value::String(kind)) if !kind.is_empty() => {}
            _ => errors.push("Resource has no resourceType".to_owned()),
        }
        if let Some(id) = object.get("id") {
            if !id.as_str().map_or(false, is_valid_id) {
                errors.push(format!("Resource id {} is not a valid id", id));
            }
        }
        if let Some(profile) = profile {
            let declared = object
                .get("meta")
                .and_then(|meta| meta.get("profile"))
                .and_then(Value::as_array)
                .map_or(false, |profiles| {
                    profiles.iter().any(|value| value.as_str() == Some(profile))
                });
            if !declared {
                errors.push(format!("Resource does not declare profile {}", profile));
            }
        }
        errors
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
