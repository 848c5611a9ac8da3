use super::gateway::AiGateway;
use super::prompts::{SPACE_AGENT_SYSTEM, SPACE_SUGGESTIONS_SYSTEM};
use super::GenerateRequest;
use crate::errors::AppResult;
use crate::models::{MeetingInsight, MeetingSpace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const EMPTY_SPACE_ANSWER: &str = "This space does not contain any meetings or notes yet.";
pub const BACKEND_DOWN_ANSWER: &str = "The AI backend is unavailable right now (quota or network). Try again later.";
const MAX_SUGGESTIONS: usize = 5;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static LIST_NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[\).\s-]*").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMeeting {
    pub id: String,
    pub title: String,
    pub date: String,
    pub transcript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNote {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// Everything the agent is allowed to see about one space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceAgentContext {
    pub meetings: Vec<ContextMeeting>,
    pub notes: Vec<ContextNote>,
}

impl SpaceAgentContext {
    pub fn is_empty(&self) -> bool {
        self.meetings.is_empty() && self.notes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SpaceAgentCitation {
    Meeting { id: String, title: String, date: String },
    Note { id: String, title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceAgentResponse {
    pub answer: String,
    pub based_on: Vec<SpaceAgentCitation>,
    pub confidence: Confidence,
}

impl SpaceAgentResponse {
    fn canned(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            based_on: Vec::new(),
            confidence: Confidence::Low,
        }
    }
}

fn normalize_text(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn flatten_insight(insight: &MeetingInsight) -> String {
    let lists = [
        Some(&insight.key_learnings),
        insight.follow_ups.as_ref(),
        insight.open_questions.as_ref(),
        insight.feature_requests.as_ref(),
        insight.problem_signals.as_ref(),
    ];
    lists
        .into_iter()
        .flatten()
        .flatten()
        .map(String::as_str)
        .chain(std::iter::once(insight.summary.as_str()))
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pure view of a space for the agent. Text fields are whitespace-collapsed.
pub fn build_space_context(space: &MeetingSpace) -> SpaceAgentContext {
    SpaceAgentContext {
        meetings: space
            .records
            .iter()
            .map(|record| ContextMeeting {
                id: record.id.clone(),
                title: record.title.clone(),
                date: record.date.clone(),
                transcript: normalize_text(&record.transcript),
                insight: record
                    .insight
                    .as_ref()
                    .map(|insight| normalize_text(&flatten_insight(insight))),
            })
            .collect(),
        notes: space
            .space_notes
            .iter()
            .map(|note| ContextNote {
                id: note.id.clone(),
                title: note.title.clone(),
                content: normalize_text(&note.content),
            })
            .collect(),
    }
}

/// Sources the answer names explicitly. Blank titles and dates never match.
pub fn extract_citations(answer: &str, context: &SpaceAgentContext) -> Vec<SpaceAgentCitation> {
    let mentions = |needle: &str| !needle.trim().is_empty() && answer.contains(needle);

    let meetings = context
        .meetings
        .iter()
        .filter(|meeting| mentions(&meeting.title) || mentions(&meeting.date))
        .map(|meeting| SpaceAgentCitation::Meeting {
            id: meeting.id.clone(),
            title: meeting.title.clone(),
            date: meeting.date.clone(),
        });
    let notes = context
        .notes
        .iter()
        .filter(|note| mentions(&note.title))
        .map(|note| SpaceAgentCitation::Note {
            id: note.id.clone(),
            title: note.title.clone(),
        });
    meetings.chain(notes).collect()
}

/// Answers `question` from the space's meetings and notes only.
pub async fn execute_space_agent(gateway: &AiGateway, space: &MeetingSpace, question: &str) -> SpaceAgentResponse {
    let context = build_space_context(space);
    if context.is_empty() {
        return SpaceAgentResponse::canned(EMPTY_SPACE_ANSWER);
    }

    let serialized = serde_json::to_string_pretty(&context).unwrap_or_default();
    let request = GenerateRequest::new(
        "SPACE_AGENT",
        format!(
            "SPACE CONTEXT (authoritative):\n{}\n\nUSER QUESTION:\n{}",
            serialized,
            question.trim()
        ),
    )
    .with_system(SPACE_AGENT_SYSTEM);

    let metadata = json!({
        "spaceId": space.id,
        "meetingCount": context.meetings.len(),
        "noteCount": context.notes.len(),
    });
    let answer = match gateway.generate_with_metadata(request, metadata).await {
        Ok(generation) => generation.text,
        Err(error) => {
            tracing::warn!(space_id = %space.id, error = %error, "space agent backend failed");
            return SpaceAgentResponse::canned(BACKEND_DOWN_ANSWER);
        }
    };

    let based_on = extract_citations(&answer, &context);
    let referenced_meetings = based_on
        .iter()
        .filter_map(|citation| match citation {
            SpaceAgentCitation::Meeting { id, .. } => Some(id.as_str()),
            SpaceAgentCitation::Note { .. } => None,
        })
        .collect::<Vec<_>>();
    tracing::debug!(
        space_id = %space.id,
        question = %question,
        meeting_count = context.meetings.len(),
        note_count = context.notes.len(),
        referenced_meetings = ?referenced_meetings,
        "space agent answered"
    );

    let confidence = if based_on.is_empty() {
        Confidence::Medium
    } else {
        Confidence::High
    };
    SpaceAgentResponse {
        answer: answer.trim().to_string(),
        based_on,
        confidence,
    }
}

/// Up to five short questions worth asking about the space.
pub async fn suggest_space_questions(gateway: &AiGateway, space: &MeetingSpace) -> AppResult<Vec<String>> {
    let context = build_space_context(space);
    if context.is_empty() {
        return Ok(Vec::new());
    }

    let serialized = serde_json::to_string_pretty(&context).unwrap_or_default();
    let request = GenerateRequest::new(
        "SPACE_SUGGESTIONS",
        format!(
            "SPACE CONTEXT:\n{}\n\nTASK:\nSuggest 3-5 short, high-value questions a user could ask about this space.",
            serialized
        ),
    )
    .with_system(SPACE_SUGGESTIONS_SYSTEM);
    let generation = gateway.generate(request).await?;
    Ok(normalize_questions(&generation.text))
}

pub(crate) fn normalize_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| LIST_NUMBERING.replace(line.trim(), "").trim().to_string())
        .filter(|line| !line.is_empty())
        .take(MAX_SUGGESTIONS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        build_space_context, execute_space_agent, normalize_questions, suggest_space_questions, Confidence,
        SpaceAgentCitation, BACKEND_DOWN_ANSWER, EMPTY_SPACE_ANSWER,
    };
    use crate::ai::gateway::testing::{ok, scripted_gateway};
    use crate::errors::AppError;
    use crate::models::{MeetingInsight, MeetingRecord, MeetingSpace, MeetingType, SpaceCategory, SpaceNotePage};
    use chrono::Utc;

    fn space() -> MeetingSpace {
        MeetingSpace {
            id: "space-1".to_string(),
            name: "Platform".to_string(),
            description: String::new(),
            category: SpaceCategory::Tech,
            color: "#000".to_string(),
            records: vec![MeetingRecord {
                id: "m1".to_string(),
                title: "Kickoff".to_string(),
                date: "2025-01-10".to_string(),
                transcript: "  we   agreed\n\n on   Postgres ".to_string(),
                notes: None,
                meeting_type: MeetingType::Normal,
                insight: Some(MeetingInsight {
                    summary: "Chose a database".to_string(),
                    key_learnings: vec!["Postgres".to_string()],
                    follow_ups: Some(vec!["Write ADR".to_string()]),
                    ..MeetingInsight::default()
                }),
                created_at: Utc::now(),
            }],
            space_notes: vec![SpaceNotePage {
                id: "n1".to_string(),
                title: "Glossary".to_string(),
                content: "ADR:\tdecision record".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }],
        }
    }

    fn empty_space() -> MeetingSpace {
        MeetingSpace {
            records: vec![],
            space_notes: vec![],
            ..space()
        }
    }

    #[test]
    fn context_is_normalized_and_flattened() {
        let context = build_space_context(&space());
        assert_eq!(context.meetings[0].transcript, "we agreed on Postgres");
        assert_eq!(
            context.meetings[0].insight.as_deref(),
            Some("Postgres Write ADR Chose a database")
        );
        assert_eq!(context.notes[0].content, "ADR: decision record");
    }

    #[tokio::test]
    async fn empty_space_gets_a_low_confidence_answer() {
        let (gateway, backend) = scripted_gateway(vec![]);
        let response = execute_space_agent(&gateway, &empty_space(), "anything?").await;
        assert_eq!(response.answer, EMPTY_SPACE_ANSWER);
        assert_eq!(response.confidence, Confidence::Low);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn cited_answers_are_high_confidence() {
        let (gateway, backend) = scripted_gateway(vec![ok(" In the Kickoff you picked Postgres; see Glossary. ")]);
        let response = execute_space_agent(&gateway, &space(), "Which database?").await;
        assert_eq!(response.answer, "In the Kickoff you picked Postgres; see Glossary.");
        assert_eq!(response.confidence, Confidence::High);
        assert_eq!(response.based_on.len(), 2);
        assert!(matches!(&response.based_on[0], SpaceAgentCitation::Meeting { id, .. } if id == "m1"));
        assert!(matches!(&response.based_on[1], SpaceAgentCitation::Note { id, .. } if id == "n1"));
        let prompt = &backend.requests()[0].prompt;
        assert!(prompt.starts_with("SPACE CONTEXT (authoritative):\n"));
        assert!(prompt.ends_with("USER QUESTION:\nWhich database?"));
    }

    #[tokio::test]
    async fn uncited_answers_are_medium_and_failures_are_canned() {
        let (gateway, _) = scripted_gateway(vec![
            ok("Probably fine."),
            Err(AppError::Quota("HTTP 429".to_string())),
        ]);
        let response = execute_space_agent(&gateway, &space(), "Is it fine?").await;
        assert_eq!(response.confidence, Confidence::Medium);
        assert!(response.based_on.is_empty());

        let response = execute_space_agent(&gateway, &space(), "Again?").await;
        assert_eq!(response.answer, BACKEND_DOWN_ANSWER);
        assert_eq!(response.confidence, Confidence::Low);
    }

    #[test]
    fn questions_lose_numbering_and_are_capped() {
        let questions = normalize_questions("1. What was decided?\n2) Who owns ADR\n\n3 - Open risks\n- keep\nA\nB\nC");
        assert_eq!(
            questions,
            vec!["What was decided?", "Who owns ADR", "Open risks", "- keep", "A"]
        );
    }

    #[tokio::test]
    async fn empty_space_has_no_suggestions() {
        let (gateway, backend) = scripted_gateway(vec![]);
        assert!(suggest_space_questions(&gateway, &empty_space()).await.expect("none").is_empty());
        assert!(backend.requests().is_empty());
    }
}
