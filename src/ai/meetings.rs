use super::gateway::AiGateway;
use super::prompts::{DISCOVERY_MEETING_SYSTEM, MEETING_SYSTEM, SPACE_CHAT_SYSTEM};
use super::structured::extract_json_block;
use super::GenerateRequest;
use crate::errors::{AppError, AppResult};
use crate::models::{MeetingInsight, MeetingSpace, MeetingType};
use serde_json::{Map, Value};

pub const NO_INSIGHTS_REPLY: &str = "I don't have any processed meeting information for this space yet.";
const MEETING_SEPARATOR: &str = "\n\n====================\n\n";

/// Turns a transcript into a [`MeetingInsight`] with the prompt for `meeting_type`.
pub async fn process_meeting_transcript(
    gateway: &AiGateway,
    transcript: &str,
    meeting_type: MeetingType,
) -> AppResult<MeetingInsight> {
    let transcript = transcript.trim();
    if transcript.is_empty() {
        return Err(AppError::InvalidInput("Transcript is empty.".to_string()));
    }

    let system = match meeting_type {
        MeetingType::Discovery => DISCOVERY_MEETING_SYSTEM,
        MeetingType::Normal => MEETING_SYSTEM,
    };
    let request = GenerateRequest::new("MEETING_SUMMARY", transcript)
        .with_system(system)
        .with_temperature(0.2);
    let generation = gateway.generate(request).await?;
    parse_insight(&generation.text)
}

pub(crate) fn parse_insight(raw: &str) -> AppResult<MeetingInsight> {
    let block = extract_json_block(raw)
        .ok_or_else(|| AppError::Parse("Meeting summarization returned no JSON".to_string()))?;
    let parsed: Value = serde_json::from_str(block)
        .map_err(|error| AppError::Parse(format!("Invalid JSON returned from meeting summarization: {}", error)))?;
    let object = parsed
        .as_object()
        .ok_or_else(|| AppError::Parse("Meeting summarization returned no JSON object".to_string()))?;

    Ok(MeetingInsight {
        summary: object
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        participants: list_field(object, &["participants", "attendees", "people"]).unwrap_or_default(),
        key_learnings: list_field(object, &["keyLearnings", "key_learnings"]).unwrap_or_default(),
        follow_ups: list_field(object, &["followUps", "follow_ups"]),
        open_questions: list_field(object, &["openQuestions", "open_questions"]),
        feature_requests: list_field(object, &["featureRequests", "feature_requests"]),
        problem_signals: list_field(object, &["problemSignals", "problem_signals"]),
    })
}

/// First key present with an array value; non-string entries are skipped.
fn list_field(object: &Map<String, Value>, keys: &[&str]) -> Option<Vec<String>> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
}

/// Plain-text digest of every processed meeting in the space.
pub fn build_insight_context(space: &MeetingSpace) -> String {
    space
        .records
        .iter()
        .filter_map(|record| record.insight.as_ref().map(|insight| (record, insight)))
        .enumerate()
        .map(|(index, (record, insight))| {
            let learnings = if insight.key_learnings.is_empty() {
                "None".to_string()
            } else {
                insight.key_learnings.join("\n")
            };
            let mut sections = vec![
                format!("MEETING {}", index + 1),
                format!("Title: {}", record.title),
                format!("Date: {}", record.date),
                String::new(),
                "KEY LEARNINGS:".to_string(),
                learnings,
            ];
            let optional = [
                ("FOLLOW-UPS:", &insight.follow_ups),
                ("OPEN QUESTIONS:", &insight.open_questions),
                ("FEATURE REQUESTS:", &insight.feature_requests),
                ("PROBLEM SIGNALS:", &insight.problem_signals),
            ];
            for (heading, items) in optional {
                if let Some(items) = items.as_ref().filter(|items| !items.is_empty()) {
                    sections.push(String::new());
                    sections.push(heading.to_string());
                    sections.push(items.join("\n"));
                }
            }
            sections.join("\n")
        })
        .collect::<Vec<_>>()
        .join(MEETING_SEPARATOR)
}

/// Answers a question from the processed insights of a space.
pub async fn chat_with_space(gateway: &AiGateway, query: &str, space: &MeetingSpace) -> AppResult<String> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::InvalidInput("Question is empty.".to_string()));
    }

    let context = build_insight_context(space);
    if context.trim().is_empty() {
        return Ok(NO_INSIGHTS_REPLY.to_string());
    }

    let request = GenerateRequest::new("SPACE_CHAT", format!("Context:\n{}\n\nQuestion:\n{}", context, query))
        .with_system(SPACE_CHAT_SYSTEM)
        .with_temperature(0.2);
    Ok(gateway.generate(request).await?.text)
}

#[cfg(test)]
mod tests {
    use super::{build_insight_context, chat_with_space, parse_insight, process_meeting_transcript, NO_INSIGHTS_REPLY};
    use crate::ai::gateway::testing::{ok, scripted_gateway};
    use crate::errors::AppError;
    use crate::models::{MeetingInsight, MeetingRecord, MeetingSpace, MeetingType, SpaceCategory};
    use chrono::Utc;

    fn record(title: &str, insight: Option<MeetingInsight>) -> MeetingRecord {
        MeetingRecord {
            id: format!("r-{}", title),
            title: title.to_string(),
            date: "2025-03-11".to_string(),
            transcript: "...".to_string(),
            notes: None,
            meeting_type: MeetingType::Normal,
            insight,
            created_at: Utc::now(),
        }
    }

    fn space(records: Vec<MeetingRecord>) -> MeetingSpace {
        MeetingSpace {
            id: "s1".to_string(),
            name: "Acme".to_string(),
            description: String::new(),
            category: SpaceCategory::Client,
            color: "#fff".to_string(),
            records,
            space_notes: vec![],
        }
    }

    #[test]
    fn insight_accepts_aliases_and_snake_case() {
        let insight = parse_insight(
            r#"Here: {"summary": "ok", "attendees": ["Ann", 3], "key_learnings": ["a"], "problem_signals": ["slow"]}"#,
        )
        .expect("insight");
        assert_eq!(insight.participants, vec!["Ann".to_string()]);
        assert_eq!(insight.key_learnings, vec!["a".to_string()]);
        assert_eq!(insight.problem_signals, Some(vec!["slow".to_string()]));
        assert!(insight.follow_ups.is_none());
    }

    #[test]
    fn insight_without_json_is_a_parse_error() {
        assert!(matches!(parse_insight("no json"), Err(AppError::Parse(_))));
        assert!(matches!(parse_insight("{oops}"), Err(AppError::Parse(_))));
    }

    #[test]
    fn context_lists_only_processed_meetings() {
        let insight = MeetingInsight {
            key_learnings: vec![],
            follow_ups: Some(vec!["send deck".to_string()]),
            feature_requests: Some(vec![]),
            ..MeetingInsight::default()
        };
        let context = build_insight_context(&space(vec![
            record("Raw", None),
            record("Kickoff", Some(insight.clone())),
            record("Review", Some(insight)),
        ]));
        assert!(context.starts_with("MEETING 1\nTitle: Kickoff\nDate: 2025-03-11\n\nKEY LEARNINGS:\nNone"));
        assert!(context.contains("FOLLOW-UPS:\nsend deck"));
        assert!(!context.contains("FEATURE REQUESTS"));
        assert!(!context.contains("Raw"));
        assert_eq!(context.matches("====================").count(), 1);
    }

    #[tokio::test]
    async fn chat_without_insights_skips_the_backend() {
        let (gateway, backend) = scripted_gateway(vec![]);
        let reply = chat_with_space(&gateway, "what happened?", &space(vec![record("Raw", None)]))
            .await
            .expect("reply");
        assert_eq!(reply, NO_INSIGHTS_REPLY);
        assert!(backend.requests().is_empty());
        assert!(matches!(
            chat_with_space(&gateway, "  ", &space(vec![])).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn discovery_meetings_use_the_discovery_prompt() {
        let (gateway, backend) = scripted_gateway(vec![ok(r#"{"summary": "s", "featureRequests": ["sso"]}"#)]);
        let insight = process_meeting_transcript(&gateway, " we need SSO ", MeetingType::Discovery)
            .await
            .expect("insight");
        assert_eq!(insight.feature_requests, Some(vec!["sso".to_string()]));
        let request = &backend.requests()[0];
        assert_eq!(request.prompt, "we need SSO");
        assert!(request.system.as_deref().unwrap_or_default().contains("featureRequests"));
        assert_eq!(request.temperature, Some(0.2));
    }
}
