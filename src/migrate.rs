//! Turns whatever was read from the state file into a valid [`AppState`].
//!
//! Nothing in here fails: wrong shapes collapse to defaults, entries without an
//! id are dropped, and legacy enum values are mapped onto the current ones.

use crate::models::{
    clamp_sidebar_width, clamp_zoom, AppState, DateKey, Goal, HealthData, MeetingSpace, OneOnOneItem,
    Person, PersonId, Settings, Task, TaskCategory, TaskPriority, TaskStatus, CURRENT_STATE_VERSION,
    DEFAULT_SIDEBAR_WIDTH, DEFAULT_TASK_TITLE, DEFAULT_ZOOM,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub fn migrate(raw: &Value) -> AppState {
    let empty = Map::new();
    let root = raw.as_object().unwrap_or(&empty);

    let tasks = array_field(root, "tasks")
        .iter()
        .filter_map(coerce_task)
        .collect::<Vec<_>>();
    let people = array_field(root, "people")
        .iter()
        .filter_map(coerce_person)
        .collect::<Vec<_>>();
    let goals = array_field(root, "goals")
        .iter()
        .filter_map(coerce_goal)
        .collect::<Vec<_>>();
    let meeting_spaces = array_field(root, "meetingSpaces")
        .iter()
        .filter_map(|value| lenient::<MeetingSpace>(value, "meeting space"))
        .collect::<Vec<_>>();

    let mut one_on_ones: BTreeMap<PersonId, Vec<OneOnOneItem>> = BTreeMap::new();
    if let Some(Value::Object(buckets)) = root.get("oneOnOnes") {
        for (person_id, items) in buckets {
            let Value::Array(items) = items else {
                continue;
            };
            let items = items
                .iter()
                .filter_map(|item| coerce_one_on_one(item, person_id))
                .collect::<Vec<_>>();
            one_on_ones.insert(person_id.clone(), items);
        }
    }

    let health = match root.get("health") {
        Some(value @ Value::Object(_)) => coerce_health(value),
        _ => HealthData::default(),
    };

    AppState {
        version: CURRENT_STATE_VERSION,
        tasks,
        people,
        one_on_ones,
        goals,
        settings: coerce_settings(root.get("settings")),
        meeting_spaces,
        health,
        hydrated: false,
    }
}

fn array_field<'a>(root: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    match root.get(key) {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

fn coerce_settings(raw: Option<&Value>) -> Settings {
    let Some(Value::Object(settings)) = raw else {
        return Settings::default();
    };

    let zoom = settings
        .get("zoom")
        .and_then(parse_number)
        .filter(|value| *value != 0.0)
        .unwrap_or(DEFAULT_ZOOM);
    let sidebar_open = match settings.get("sidebarOpen") {
        Some(Value::Bool(open)) => *open,
        _ => true,
    };
    let sidebar_width = match settings.get("sidebarWidth") {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(DEFAULT_SIDEBAR_WIDTH),
        _ => DEFAULT_SIDEBAR_WIDTH,
    };

    Settings {
        zoom: clamp_zoom(zoom),
        sidebar_open,
        sidebar_width: clamp_sidebar_width(sidebar_width),
    }
}

/// Numbers, numeric strings and booleans parse; anything else is "not a number".
fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
    .filter(|value| value.is_finite())
}

fn coerce_task(value: &Value) -> Option<Task> {
    let object = value.as_object()?;
    let id = string_field(object, "id")?;
    Some(Task {
        id,
        title: string_field(object, "title").unwrap_or_else(|| DEFAULT_TASK_TITLE.to_string()),
        content: string_field(object, "content").unwrap_or_default(),
        date: string_field(object, "date")
            .and_then(|raw| DateKey::parse(&raw))
            .unwrap_or(DateKey::Inbox),
        status: string_field(object, "status")
            .and_then(|raw| TaskStatus::from_legacy(&raw))
            .unwrap_or_default(),
        priority: string_field(object, "priority")
            .and_then(|raw| TaskPriority::from_legacy(&raw))
            .unwrap_or_default(),
        category: string_field(object, "category")
            .and_then(|raw| TaskCategory::parse(&raw))
            .unwrap_or_default(),
        created_at: timestamp_field(object, "createdAt"),
    })
}

fn coerce_person(value: &Value) -> Option<Person> {
    let object = value.as_object()?;
    Some(Person {
        id: string_field(object, "id")?,
        name: string_field(object, "name").unwrap_or_default(),
        avatar_color: string_field(object, "avatarColor").unwrap_or_default(),
        sort_order: integer_field(object, "sortOrder").unwrap_or(0),
    })
}

fn coerce_one_on_one(value: &Value, bucket: &str) -> Option<OneOnOneItem> {
    let object = value.as_object()?;
    Some(OneOnOneItem {
        id: string_field(object, "id")?,
        // The bucket key is authoritative for ownership.
        person_id: bucket.to_string(),
        content: string_field(object, "content").unwrap_or_default(),
        is_completed: matches!(object.get("isCompleted"), Some(Value::Bool(true))),
        created_at: timestamp_field(object, "createdAt"),
    })
}

fn coerce_goal(value: &Value) -> Option<Goal> {
    let object = value.as_object()?;
    let created_at = timestamp_field(object, "createdAt");
    Some(Goal {
        id: string_field(object, "id")?,
        title: string_field(object, "title").unwrap_or_default(),
        description: string_field(object, "description").unwrap_or_default(),
        color: string_field(object, "color").unwrap_or_default(),
        progress: object
            .get("progress")
            .and_then(parse_number)
            .map(|value| value.clamp(0.0, 100.0).round() as u8)
            .unwrap_or(0),
        start_date: string_field(object, "startDate").unwrap_or_default(),
        end_date: string_field(object, "endDate").unwrap_or_default(),
        created_at,
        updated_at: object
            .get("updatedAt")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(created_at),
        sort_order: integer_field(object, "sort_order")
            .or_else(|| integer_field(object, "sortOrder"))
            .unwrap_or(0),
    })
}

fn coerce_health(value: &Value) -> HealthData {
    let empty = Map::new();
    let object = value.as_object().unwrap_or(&empty);
    let blood_work_records = array_field(object, "bloodWorkRecords")
        .iter()
        .filter_map(|value| lenient(value, "blood work record"))
        .collect();
    let workout_records = array_field(object, "workoutRecords")
        .iter()
        .filter_map(|value| lenient(value, "workout record"))
        .collect();
    let personal_profile = object
        .get("personalProfile")
        .and_then(|value| lenient(value, "personal profile"));
    HealthData {
        blood_work_records,
        workout_records,
        personal_profile,
    }
}

fn lenient<T: serde::de::DeserializeOwned>(value: &Value, what: &str) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            tracing::warn!(error = %error, kind = what, "dropping malformed entry during migration");
            None
        }
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn integer_field(object: &Map<String, Value>, key: &str) -> Option<i64> {
    object
        .get(key)
        .and_then(parse_number)
        .map(|value| value.round() as i64)
}

fn timestamp_field(object: &Map<String, Value>, key: &str) -> DateTime<Utc> {
    object
        .get(key)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::migrate;
    use crate::models::{DateKey, Settings, TaskPriority, TaskStatus, CURRENT_STATE_VERSION};
    use serde_json::json;

    #[test]
    fn non_object_input_yields_defaults() {
        for raw in [json!(null), json!(42), json!("state"), json!([1, 2, 3])] {
            let state = migrate(&raw);
            assert_eq!(state.version, CURRENT_STATE_VERSION);
            assert!(state.tasks.is_empty());
            assert_eq!(state.settings, Settings::default());
            assert!(!state.hydrated);
        }
    }

    #[test]
    fn version_is_forced_to_current() {
        let state = migrate(&json!({ "version": 1 }));
        assert_eq!(state.version, CURRENT_STATE_VERSION);
        let state = migrate(&json!({ "version": "ninety" }));
        assert_eq!(state.version, CURRENT_STATE_VERSION);
    }

    #[test]
    fn wrong_collection_shapes_become_empty() {
        let state = migrate(&json!({
            "tasks": { "t1": {} },
            "people": "nobody",
            "oneOnOnes": [ { "id": "x" } ],
            "goals": 7
        }));
        assert!(state.tasks.is_empty());
        assert!(state.people.is_empty());
        assert!(state.one_on_ones.is_empty());
        assert!(state.goals.is_empty());
    }

    #[test]
    fn legacy_task_values_are_mapped() {
        let state = migrate(&json!({
            "tasks": [
                { "id": "a", "content": "<p>x</p>", "date": "2024-05-01", "status": "maybe", "priority": "high", "category": "personal", "createdAt": "2024-05-01T10:00:00Z" },
                { "id": "b", "status": "in_progress", "priority": "p2" },
                { "content": "no id, dropped" }
            ]
        }));
        assert_eq!(state.tasks.len(), 2);
        assert_eq!(state.tasks[0].status, TaskStatus::Todo);
        assert_eq!(state.tasks[0].priority, TaskPriority::P1);
        assert_eq!(state.tasks[0].title, "New Task");
        assert_eq!(state.tasks[1].status, TaskStatus::InProgress);
        assert_eq!(state.tasks[1].date, DateKey::Inbox);
    }

    #[test]
    fn numeric_settings_are_parsed_and_clamped() {
        let state = migrate(&json!({
            "settings": { "zoom": "1.25", "sidebarOpen": "yes", "sidebarWidth": "300" }
        }));
        assert_eq!(state.settings.zoom, 1.25);
        assert!(state.settings.sidebar_open);
        assert_eq!(state.settings.sidebar_width, 260.0);

        let state = migrate(&json!({
            "settings": { "zoom": "huge", "sidebarOpen": false, "sidebarWidth": 9000 }
        }));
        assert_eq!(state.settings.zoom, 1.0);
        assert!(!state.settings.sidebar_open);
        assert_eq!(state.settings.sidebar_width, 400.0);
    }

    #[test]
    fn one_on_one_items_take_owner_from_bucket() {
        let state = migrate(&json!({
            "oneOnOnes": {
                "p1": [ { "id": "n1", "personId": "someone-else", "content": "hi", "isCompleted": "true" } ],
                "p2": "broken"
            }
        }));
        assert_eq!(state.one_on_ones.len(), 1);
        let item = &state.one_on_ones["p1"][0];
        assert_eq!(item.person_id, "p1");
        assert!(!item.is_completed);
    }

    #[test]
    fn migration_is_idempotent() {
        let raw = json!({
            "version": 2,
            "tasks": [ { "id": "a", "title": "Plan", "date": "2025-01-06", "status": "done", "priority": "low" } ],
            "people": [ { "id": "p", "name": "Sam", "avatarColor": "bg-red-500", "sortOrder": 2 } ],
            "oneOnOnes": { "p": [ { "id": "n", "content": "note", "isCompleted": true, "createdAt": "2025-01-01T00:00:00Z" } ] },
            "goals": [ { "id": "g", "title": "Ship", "progress": 140, "sort_order": 1 } ],
            "settings": { "zoom": 3 },
            "meetingSpaces": [ { "id": "s", "name": "Team" }, { "name": "no id" } ],
            "health": { "workoutRecords": [ { "id": "w", "date": "2025-01-01", "type": "run", "sourceType": "manual", "createdAt": "2025-01-01T00:00:00Z" } ] }
        });
        let once = migrate(&raw);
        let twice = migrate(&serde_json::to_value(&once).expect("serialize"));
        assert_eq!(once, twice);
        assert_eq!(once.goals[0].progress, 100);
        assert_eq!(once.settings.zoom, 2.0);
        assert_eq!(once.meeting_spaces.len(), 1);
        assert_eq!(once.health.workout_records.len(), 1);
    }
}
