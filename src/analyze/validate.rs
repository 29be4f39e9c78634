//! Strict validation of reasoning-service responses.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{Analysis, AnalysisMethod, Impact};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("response is not a JSON object: {0}")]
    NotJson(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("field `{field}` has unknown label {value:?}")]
    BadLabel { field: &'static str, value: String },
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

/// Parses and validates a raw response. Markdown fences and surrounding prose
/// are tolerated; anything else about the shape is not.
pub fn parse_analysis(raw: &str) -> Result<Analysis, ValidationError> {
    let body = json_body(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|e| ValidationError::NotJson(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(ValidationError::NotJson("top-level value is not an object".into()));
    };

    let summary = required_str(&obj, "summary")?;
    let key_features = str_list(&obj, "key_features", true)?;
    let impact = label(&obj, "impact")?;
    let recommended_action = required_str(&obj, "recommended_action")?;
    let threat_level = label(&obj, "threat_level")?;
    let opportunities = str_list(&obj, "opportunities", false)?;
    let strategic_implication = match obj.get("strategic_implication") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => return Err(ValidationError::WrongType("strategic_implication")),
    };
    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("confidence")),
        Some(v) => v.as_f64().ok_or(ValidationError::WrongType("confidence"))?,
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::ConfidenceOutOfRange(confidence));
    }

    Ok(Analysis {
        summary,
        key_features,
        impact,
        recommended_action,
        threat_level,
        opportunities,
        strategic_implication,
        confidence: confidence as f32,
        method: AnalysisMethod::Reasoning,
    }
    .bounded())
}

/// Strips ```json fences or leading/trailing prose around the outermost object.
fn json_body(raw: &str) -> &str {
    let t = raw.trim();
    match (t.find('{'), t.rfind('}')) {
        (Some(start), Some(end)) if end > start => &t[start..=end],
        _ => t,
    }
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(ValidationError::MissingField(field)),
        Some(_) => Err(ValidationError::WrongType(field)),
    }
}

fn str_list(
    obj: &Map<String, Value>,
    field: &'static str,
    required: bool,
) -> Result<Vec<String>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) if required => Err(ValidationError::MissingField(field)),
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or(ValidationError::WrongType(field))
            })
            .collect(),
        Some(_) => Err(ValidationError::WrongType(field)),
    }
}

fn label(obj: &Map<String, Value>, field: &'static str) -> Result<Impact, ValidationError> {
    let raw = match obj.get(field) {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) => s,
        Some(_) => return Err(ValidationError::WrongType(field)),
    };
    Impact::parse_label(raw).ok_or_else(|| ValidationError::BadLabel {
        field,
        value: raw.clone(),
    })
}
