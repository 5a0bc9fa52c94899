use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Body of `POST /generate-learning-path`
/// Every field is optional; a missing `childId` is reported by the interpreter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub child_id: Option<String>,
    #[serde(default)]
    pub observations: Option<Vec<Observation>>,
    #[serde(default)]
    pub interests: Option<Vec<String>>,
    #[serde(default)]
    pub document_content: Option<String>,
}

/// Parent/teacher observation as stored by the web client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default, alias = "text")]
    pub content: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<String>,
}

/// A recommended activity, as handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub date: String,
    pub completed: bool,
    pub skill_area: String,
    pub location: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Activity as the model wrote it. Nothing is trusted, nothing is required.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivity {
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(default, rename = "type", alias = "activityType", deserialize_with = "lenient_text")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub date: Option<String>,
    #[serde(default, alias = "skill_area", deserialize_with = "lenient_text")]
    pub skill_area: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub source: Option<String>,
}

impl From<Activity> for RawActivity {
    fn from(activity: Activity) -> Self {
        Self {
            title: Some(activity.title),
            kind: Some(activity.kind),
            description: Some(activity.description),
            date: Some(activity.date),
            skill_area: Some(activity.skill_area),
            location: Some(activity.location),
            source: Some(activity.source),
        }
    }
}

/// Strings and numbers are kept as text, anything else is dropped
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Why the built-in activities were returned instead of model output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    UnparseableResponse,
    UpstreamFailure,
}

/// Successful response of the generate endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPlan {
    pub activities: Vec<Activity>,
    pub message: String,
    /// True only when the upstream call itself failed
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

impl LearningPlan {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Body of `PATCH /children/{child_id}/activities/{activity_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub completed: bool,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Most recent plan saved for a child
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPath {
    pub id: Uuid,
    pub child_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub plan: LearningPlan,
}
