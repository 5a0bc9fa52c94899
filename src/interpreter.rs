//! Activity-plan interpreter
//! Turns free-form model text into a non-empty, fully populated activity list.
//! Nothing downstream of the upstream call is allowed to fail the request.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gemini::{TextGenerator, UpstreamError};
use crate::models::{Activity, FallbackReason, GenerateRequest, LearningPlan, RawActivity};
use crate::prompt::build_prompt;

static DATE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern compiles"));

pub const DEFAULT_KIND: &str = "Activity";
pub const DEFAULT_DESCRIPTION: &str =
    "A hands-on learning activity matched to your child's interests.";
pub const DEFAULT_SKILL_AREA: &str = "General Development";
pub const DEFAULT_LOCATION: &str = "Geneva, Switzerland";
pub const DEFAULT_SOURCE: &str = "Geneva Activities";

pub const MODEL_MESSAGE: &str = "Successfully generated learning path";
pub const UNPARSEABLE_MESSAGE: &str =
    "Generated fallback learning path: the AI response could not be interpreted";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Child ID is required")]
    MissingIdentifier,
    #[error("GEMINI_API_KEY is not configured")]
    MissingCredential,
    #[error("Gemini API error: {0}")]
    Upstream(UpstreamError),
}

/// Where in the model text the activity array was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionShape {
    /// The whole (trimmed) text is the array
    WholeText,
    /// Inside a ``` or ```json fence
    CodeFence,
    /// Surrounded by prose
    Embedded,
}

/// Finds the first JSON array in `text` that holds at least one usable
/// activity object.
///
/// Every `[` is a candidate start; the array is decoded as a prefix of the
/// remaining text so trailing prose or a closing fence does not matter.
/// Non-object elements and objects with none of the activity fields are
/// skipped.
pub fn extract_activities(text: &str) -> Option<(Vec<RawActivity>, ExtractionShape)> {
    let text = text.trim();

    for (start, _) in text.match_indices('[') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<Vec<serde_json::Value>>();
        let Some(Ok(items)) = stream.next() else {
            continue;
        };

        let activities: Vec<RawActivity> = items
            .into_iter()
            .filter(|item| item.is_object())
            .filter_map(|item| serde_json::from_value::<RawActivity>(item).ok())
            .filter(|raw| !raw.is_blank())
            .collect();

        if !activities.is_empty() {
            return Some((activities, shape_at(text, start)));
        }
    }

    None
}

fn shape_at(text: &str, start: usize) -> ExtractionShape {
    if start == 0 {
        ExtractionShape::WholeText
    } else if text[..start].matches("```").count() % 2 == 1 {
        ExtractionShape::CodeFence
    } else {
        ExtractionShape::Embedded
    }
}

impl RawActivity {
    fn is_blank(&self) -> bool {
        [
            &self.title,
            &self.kind,
            &self.description,
            &self.date,
            &self.skill_area,
            &self.location,
            &self.source,
        ]
        .iter()
        .all(|field| filled(field).is_none())
    }
}

fn filled(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn is_valid_date(value: &str) -> bool {
    DATE_SHAPE.is_match(value) && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// `today + 7 + index * 3` days
pub fn default_date(today: NaiveDate, index: usize) -> String {
    let offset = 7 + (index as i64) * 3;
    (today + Duration::days(offset)).format("%Y-%m-%d").to_string()
}

/// Backfills every field, assigns `seed + index` ids and clears `completed`.
pub fn normalize(raw: Vec<RawActivity>, seed: i64, today: NaiveDate) -> Vec<Activity> {
    raw.into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let date = filled(&raw.date)
                .filter(|d| is_valid_date(d))
                .unwrap_or_else(|| default_date(today, index));

            Activity {
                id: seed + index as i64,
                title: filled(&raw.title).unwrap_or_else(|| format!("Activity {}", index + 1)),
                kind: filled(&raw.kind).unwrap_or_else(|| DEFAULT_KIND.to_string()),
                description: filled(&raw.description)
                    .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                date,
                completed: false,
                skill_area: filled(&raw.skill_area)
                    .unwrap_or_else(|| DEFAULT_SKILL_AREA.to_string()),
                location: filled(&raw.location).unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
                source: filled(&raw.source).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                memo: None,
            }
        })
        .collect()
}

/// Built-in plan used whenever model output is unavailable
pub fn fallback_activities() -> Vec<RawActivity> {
    let entry = |title: &str, kind: &str, description: &str, skill_area: &str, location: &str| {
        RawActivity {
            title: Some(title.to_string()),
            kind: Some(kind.to_string()),
            description: Some(description.to_string()),
            date: None,
            skill_area: Some(skill_area.to_string()),
            location: Some(location.to_string()),
            source: Some(DEFAULT_SOURCE.to_string()),
        }
    };

    vec![
        entry(
            "Young Scientists Discovery Workshop",
            "Workshop",
            "Hands-on experiments with magnets, water and light where children test their own \
             questions and record what they observe, guided by museum educators.",
            "Scientific Thinking",
            "Musée d'histoire des sciences, Geneva",
        ),
        entry(
            "Children's Art Studio Afternoon",
            "Workshop",
            "An open studio where children explore painting, collage and clay, then present \
             their work to the group to practise describing their ideas.",
            "Creativity",
            "MAMCO Geneva",
        ),
        entry(
            "Junior Multi-Sport Discovery Day",
            "Event",
            "A morning of football, athletics and team games that builds coordination, \
             turn-taking and confidence in a friendly, non-competitive setting.",
            "Physical Development",
            "Centre sportif du Bout-du-Monde, Geneva",
        ),
    ]
}

/// Hands out ids that never repeat within the process.
///
/// Seeded from the wall clock in milliseconds; a batch of `n` activities
/// reserves `n` consecutive values.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicI64,
}

impl IdAllocator {
    pub fn reserve(&self, count: usize) -> i64 {
        let now = Utc::now().timestamp_millis();
        let count = count.max(1) as i64;
        let mut base = now;

        let _ = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                base = now.max(last + 1);
                Some(base + count - 1)
            });

        base
    }
}

/// Runs prompt construction, the upstream call, extraction and normalization.
#[derive(Clone)]
pub struct Interpreter {
    generator: Option<Arc<dyn TextGenerator>>,
    ids: Arc<IdAllocator>,
    strict_upstream: bool,
}

impl Interpreter {
    /// `generator` is `None` when no credential is configured
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, strict_upstream: bool) -> Self {
        Self {
            generator,
            ids: Arc::new(IdAllocator::default()),
            strict_upstream,
        }
    }

    pub async fn plan(&self, request: &GenerateRequest) -> Result<LearningPlan, PlanError> {
        self.plan_on(request, Utc::now().date_naive()).await
    }

    pub async fn plan_on(
        &self,
        request: &GenerateRequest,
        today: NaiveDate,
    ) -> Result<LearningPlan, PlanError> {
        let child_id = request
            .child_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(PlanError::MissingIdentifier)?;

        let Some(generator) = &self.generator else {
            warn!(child_id, "GEMINI_API_KEY is not configured");
            return Err(PlanError::MissingCredential);
        };
        debug!(child_id, "Gemini credential configured");

        let prompt = build_prompt(
            request.interests.as_deref().unwrap_or_default(),
            request.observations.as_deref().unwrap_or_default(),
            request.document_content.as_deref(),
        );

        let (raw, reason, message) = match generator.generate(&prompt).await {
            Ok(text) => match extract_activities(&text) {
                Some((raw, shape)) => {
                    info!(child_id, ?shape, count = raw.len(), "parsed activities from model output");
                    (raw, None, MODEL_MESSAGE.to_string())
                }
                None => {
                    warn!(child_id, raw_text = %text, "no activities in model output, using fallback");
                    (
                        fallback_activities(),
                        Some(FallbackReason::UnparseableResponse),
                        UNPARSEABLE_MESSAGE.to_string(),
                    )
                }
            },
            Err(err) if err.is_call_failure() => {
                if self.strict_upstream {
                    return Err(PlanError::Upstream(err));
                }
                warn!(child_id, error = %err, "Gemini call failed, using fallback");
                (
                    fallback_activities(),
                    Some(FallbackReason::UpstreamFailure),
                    format!("Generated fallback learning path: the AI service failed ({err})"),
                )
            }
            Err(err) => {
                warn!(child_id, error = %err, "unusable Gemini response, using fallback");
                (
                    fallback_activities(),
                    Some(FallbackReason::UnparseableResponse),
                    UNPARSEABLE_MESSAGE.to_string(),
                )
            }
        };

        let seed = self.ids.reserve(raw.len());
        Ok(LearningPlan {
            activities: normalize(raw, seed, today),
            message,
            degraded: reason == Some(FallbackReason::UpstreamFailure),
            fallback_reason: reason,
        })
    }
}
