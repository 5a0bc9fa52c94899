use crate::models::Observation;

pub const DEFAULT_INTERESTS: &str = "sports, science, art";
pub const DEFAULT_OBSERVATION: &str = "The child is curious and enjoys exploring new activities.";
pub const EMPTY_OBSERVATION: &str = "No details recorded.";

const INSTRUCTION: &str =
    "Generate a personalized learning path for a child with the following information:";

const CLOSING: &str = r#"Based on this information, create a tailored learning path with exactly 3 activities that:
1. Are specifically located in Geneva, Switzerland
2. Include actual local resources, especially from https://www.parentville.ch/
3. Match the child's interests and developmental needs
4. Provide specific details for each activity including:
   - Activity title
   - Activity type (Workshop, Event, Course, etc.)
   - Description (60-80 words)
   - Location (specific Geneva venue)
   - Date (within the next 4 weeks)
   - Skill area being developed
   - Source (where this activity was found)

Format the response as a JSON array with the following structure for each activity:
[
  {
    "title": "Activity name",
    "type": "Activity type",
    "description": "Activity description",
    "date": "YYYY-MM-DD",
    "location": "Specific Geneva location",
    "skillArea": "Main skill developed",
    "source": "Website or source name"
  }
]

Return ONLY the JSON array, with no additional text before or after it."#;

/// Builds the prompt sent upstream. Pure function of its inputs.
pub fn build_prompt(
    interests: &[String],
    observations: &[Observation],
    document_content: Option<&str>,
) -> String {
    let mut prompt = String::from(INSTRUCTION);

    let interests: Vec<&str> = interests
        .iter()
        .map(|i| i.trim())
        .filter(|i| !i.is_empty())
        .collect();
    if interests.is_empty() {
        prompt.push_str(&format!("\n\nInterests: {DEFAULT_INTERESTS}"));
    } else {
        prompt.push_str(&format!("\n\nInterests: {}", interests.join(", ")));
    }

    prompt.push_str("\n\nParent/Teacher Observations:");
    if observations.is_empty() {
        prompt.push_str(&format!("\n- {DEFAULT_OBSERVATION}"));
    } else {
        for obs in observations {
            let text = obs
                .content
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(EMPTY_OBSERVATION);
            prompt.push_str(&format!("\n- {text}"));
        }
    }

    if let Some(doc) = document_content.filter(|d| !d.trim().is_empty()) {
        prompt.push_str(&format!("\n\nAdditional Information from Documents:\n{doc}"));
    }

    prompt.push_str("\n\n");
    prompt.push_str(CLOSING);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(text: Option<&str>) -> Observation {
        Observation {
            content: text.map(str::to_string),
            created_at: None,
        }
    }

    #[test]
    fn test_placeholders_when_empty() {
        let prompt = build_prompt(&[], &[], None);

        assert!(prompt.starts_with(INSTRUCTION));
        assert!(prompt.contains("Interests: sports, science, art"));
        assert!(prompt.contains(&format!("- {DEFAULT_OBSERVATION}")));
        assert!(!prompt.contains("Additional Information"));
        assert!(prompt.ends_with("with no additional text before or after it."));
    }

    #[test]
    fn test_interests_and_observations() {
        let interests = vec!["dinosaurs".to_string(), "music".to_string()];
        let observations = vec![obs(Some("Builds towers all day")), obs(None), obs(Some("  "))];

        let prompt = build_prompt(&interests, &observations, None);

        assert!(prompt.contains("Interests: dinosaurs, music"));
        assert!(prompt.contains("- Builds towers all day"));
        assert_eq!(prompt.matches(&format!("- {EMPTY_OBSERVATION}")).count(), 2);
        assert!(!prompt.contains(DEFAULT_OBSERVATION));
    }

    #[test]
    fn test_document_content_verbatim() {
        let prompt = build_prompt(&[], &[], Some("Report card:\nExcellent at reading"));
        assert!(prompt.contains("Additional Information from Documents:\nReport card:\nExcellent at reading"));

        let blank = build_prompt(&[], &[], Some("   "));
        assert!(!blank.contains("Additional Information"));
    }

    #[test]
    fn test_closing_block_requests_exactly_three() {
        let prompt = build_prompt(&[], &[], None);
        assert!(prompt.contains("Geneva, Switzerland"));
        assert!(prompt.contains("exactly 3 activities"));
        for field in ["title", "type", "description", "date", "location", "skillArea", "source"] {
            assert!(prompt.contains(&format!("\"{field}\"")), "missing {field}");
        }
    }

    #[test]
    fn test_deterministic() {
        let interests = vec!["chess".to_string()];
        let a = build_prompt(&interests, &[obs(Some("x"))], Some("doc"));
        let b = build_prompt(&interests, &[obs(Some("x"))], Some("doc"));
        assert_eq!(a, b);
    }
}
