use super::gateway::AiGateway;
use super::prompts::{BLOOD_WORK_ANALYSIS_SYSTEM, BLOOD_WORK_EXTRACTION_SYSTEM, WORKOUT_EXTRACTION_SYSTEM};
use super::structured::{parse_json_block, parse_structured};
use super::{GenerateRequest, InlineImage};
use crate::errors::{AppError, AppResult};
use crate::models::{generate_id, BloodWorkRecord, HealthSource, LabFlag, LabValue, WorkoutRecord, WorkoutType};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};

pub const NO_VALUES_SUMMARY: &str = "No lab values extracted from the document.";
pub const DEFAULT_ANALYSIS_SUMMARY: &str = "Analysis completed.";
pub const ANALYSIS_FAILED_SUMMARY: &str = "Unable to generate detailed analysis.";

static ANALYSIS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": ["string", "null"] },
            "flags": { "type": "array", "items": { "type": "string" } }
        }
    })
});

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBloodWork {
    pub lab_name: Option<String>,
    pub test_date: Option<String>,
    pub lab_values: Vec<LabValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BloodWorkAnalysis {
    pub summary: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedWorkout {
    pub workout_type: WorkoutType,
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub pace: Option<String>,
    pub calories: Option<f64>,
    pub date: Option<String>,
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn parse_reply(raw: &str) -> AppResult<Value> {
    parse_json_block(raw).ok_or_else(|| AppError::Parse("Failed to parse AI response as JSON".to_string()))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Numbers may arrive as JSON numbers or numeric strings; zero counts as missing.
fn positive_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (number.is_finite() && number != 0.0).then_some(number)
}

fn parse_lab_value(value: &Value) -> Option<LabValue> {
    let name = non_empty_str(value.get("name"))?;
    let reading = match value.get("value")? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    Some(LabValue {
        name,
        value: reading,
        unit: value.get("unit").and_then(Value::as_str).unwrap_or_default().to_string(),
        reference_range: non_empty_str(value.get("referenceRange")),
        flag: value
            .get("flag")
            .and_then(|flag| serde_json::from_value::<LabFlag>(flag.clone()).ok()),
    })
}

pub(crate) fn parse_blood_work(raw: &str) -> AppResult<ExtractedBloodWork> {
    let parsed = parse_reply(raw)?;
    let lab_values = parsed
        .get("labValues")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(parse_lab_value).collect())
        .unwrap_or_default();
    Ok(ExtractedBloodWork {
        lab_name: non_empty_str(parsed.get("labName")),
        test_date: non_empty_str(parsed.get("testDate")),
        lab_values,
    })
}

pub(crate) fn parse_analysis(raw: &str) -> Option<BloodWorkAnalysis> {
    let reply: AnalysisReply = match parse_structured(raw, &ANALYSIS_SCHEMA, "Blood work analysis") {
        Ok(reply) => reply,
        Err(error) => {
            tracing::warn!(error = %error, "unusable blood work analysis");
            return None;
        }
    };
    let summary = reply
        .summary
        .map(|summary| summary.trim().to_string())
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| DEFAULT_ANALYSIS_SUMMARY.to_string());
    Some(BloodWorkAnalysis {
        summary,
        flags: reply.flags,
    })
}

pub(crate) fn parse_workout(raw: &str) -> AppResult<ExtractedWorkout> {
    let parsed = parse_reply(raw)?;
    let workout_type = parsed
        .get("type")
        .and_then(|kind| serde_json::from_value::<WorkoutType>(kind.clone()).ok())
        .unwrap_or_default();
    Ok(ExtractedWorkout {
        workout_type,
        distance: positive_number(parsed.get("distance")),
        duration: positive_number(parsed.get("duration")),
        pace: non_empty_str(parsed.get("pace")),
        calories: positive_number(parsed.get("calories")),
        date: non_empty_str(parsed.get("date")),
    })
}

/// Summary and flags for extracted values. Never fails; zero values skip the backend.
pub async fn analyze_blood_work(gateway: &AiGateway, lab_values: &[LabValue]) -> BloodWorkAnalysis {
    if lab_values.is_empty() {
        return BloodWorkAnalysis {
            summary: NO_VALUES_SUMMARY.to_string(),
            flags: Vec::new(),
        };
    }

    let values = serde_json::to_string_pretty(lab_values).unwrap_or_default();
    let request = GenerateRequest::new("ANALYSIS", format!("Lab Results:\n{}", values))
        .with_system(BLOOD_WORK_ANALYSIS_SYSTEM);
    let analysis = match gateway.generate(request).await {
        Ok(generation) => parse_analysis(&generation.text),
        Err(error) => {
            tracing::warn!(error = %error, "blood work analysis failed");
            None
        }
    };
    analysis.unwrap_or_else(|| BloodWorkAnalysis {
        summary: ANALYSIS_FAILED_SUMMARY.to_string(),
        flags: Vec::new(),
    })
}

/// Reads a lab report (PDF or image) into a new record with an AI analysis.
pub async fn extract_blood_work(gateway: &AiGateway, file: &InlineImage) -> AppResult<BloodWorkRecord> {
    let source_type = if file.is_pdf() {
        HealthSource::Pdf
    } else {
        HealthSource::Image
    };
    tracing::info!(file = %file.file_name, "extracting blood work");

    let request = GenerateRequest::new("VISION", format!("Extract the lab values from {}.", file.file_name))
        .with_system(BLOOD_WORK_EXTRACTION_SYSTEM)
        .with_image(file.clone());
    let generation = gateway.generate(request).await?;
    let extracted = parse_blood_work(&generation.text)?;
    let analysis = analyze_blood_work(gateway, &extracted.lab_values).await;

    Ok(BloodWorkRecord {
        id: generate_id(),
        date: extracted.test_date.unwrap_or_else(today),
        lab_name: extracted.lab_name,
        source_type,
        source_file_name: Some(file.file_name.clone()),
        lab_values: extracted.lab_values,
        ai_analysis: Some(analysis.summary),
        ai_flags: Some(analysis.flags),
        notes: None,
        created_at: Utc::now(),
    })
}

/// Reads a workout screenshot into a new record.
pub async fn extract_workout(gateway: &AiGateway, file: &InlineImage) -> AppResult<WorkoutRecord> {
    tracing::info!(file = %file.file_name, "extracting workout");
    let request = GenerateRequest::new("FITNESS", format!("Extract the workout shown in {}.", file.file_name))
        .with_system(WORKOUT_EXTRACTION_SYSTEM)
        .with_image(file.clone());
    let generation = gateway.generate(request).await?;
    let extracted = parse_workout(&generation.text)?;

    Ok(WorkoutRecord {
        id: generate_id(),
        date: extracted.date.unwrap_or_else(today),
        workout_type: extracted.workout_type,
        distance: extracted.distance,
        duration: extracted.duration,
        pace: extracted.pace,
        calories: extracted.calories,
        source_type: HealthSource::Image,
        source_file_name: Some(file.file_name.clone()),
        notes: None,
        created_at: Utc::now(),
    })
}
