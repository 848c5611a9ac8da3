use super::{Store, WriteReceipt};
use crate::models::{
    clamp_sidebar_width, clamp_zoom, generate_id, BloodWorkRecord, DateKey, Goal, GoalPatch,
    MeetingInsight, MeetingRecord, MeetingSpace, OneOnOneItem, OneOnOnePatch, Person, PersonPatch,
    PersonalProfile, RemoteSnapshot, SpaceCategory, SpaceNotePage, Task, TaskCategory, TaskPatch,
    WorkoutRecord,
};
use crate::sync::Change;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const AVATAR_COLORS: &[&str] = &[
    "bg-red-500",
    "bg-orange-500",
    "bg-amber-500",
    "bg-yellow-500",
    "bg-lime-500",
    "bg-green-500",
    "bg-emerald-500",
    "bg-teal-500",
    "bg-cyan-500",
    "bg-sky-500",
    "bg-blue-500",
    "bg-indigo-500",
    "bg-violet-500",
    "bg-purple-500",
    "bg-fuchsia-500",
    "bg-pink-500",
    "bg-rose-500",
];

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

fn random_avatar_color() -> String {
    AVATAR_COLORS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("bg-blue-500")
        .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<SpaceCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Monday-start week containing `date`, as seven column keys.
pub fn week_of(date: NaiveDate) -> [DateKey; 7] {
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    std::array::from_fn(|offset| DateKey::Day(monday + Duration::days(offset as i64)))
}

impl Store {
    // ─── Tasks ───────────────────────────────────────────────────────────

    /// Adds a placeholder task to a column and returns it for the editor to open.
    pub fn create_task(&self, date: DateKey, category: TaskCategory) -> (Task, WriteReceipt) {
        let task = Task::placeholder(date, category);
        let receipt = self.add_task(task.clone());
        (task, receipt)
    }

    pub fn add_task(&self, task: Task) -> WriteReceipt {
        self.commit(|state, outbox| {
            state.tasks.push(task.clone());
            outbox.push(Change::InsertTask(task));
        })
        .1
    }

    pub fn update_task(&self, id: &str, patch: TaskPatch) -> WriteReceipt {
        self.commit(|state, outbox| {
            if let Some(task) = state.tasks.iter_mut().find(|task| task.id == id) {
                patch.apply(task);
                if !patch.is_empty() {
                    outbox.push(Change::UpdateTask {
                        id: id.to_string(),
                        patch,
                    });
                }
            }
        })
        .1
    }

    pub fn move_task(&self, id: &str, date: DateKey) -> WriteReceipt {
        self.update_task(
            id,
            TaskPatch {
                date: Some(date),
                ..TaskPatch::default()
            },
        )
    }

    pub fn delete_task(&self, id: &str) -> WriteReceipt {
        self.commit(|state, outbox| {
            state.tasks.retain(|task| task.id != id);
            outbox.push(Change::DeleteTask { id: id.to_string() });
        })
        .1
    }

    pub fn tasks_on(&self, date: DateKey) -> Vec<Task> {
        self.select(|state| {
            state
                .tasks
                .iter()
                .filter(|task| task.date == date)
                .cloned()
                .collect()
        })
    }

    pub fn inbox_tasks(&self) -> Vec<Task> {
        self.tasks_on(DateKey::Inbox)
    }

    pub fn inbox_count(&self) -> usize {
        self.select(|state| state.tasks.iter().filter(|task| task.date.is_inbox()).count())
    }

    /// Case-insensitive match over titles and the text of task bodies.
    pub fn search_tasks(&self, query: &str) -> Vec<Task> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.select(|state| {
            state
                .tasks
                .iter()
                .filter(|task| {
                    task.title.to_lowercase().contains(&needle)
                        || HTML_TAG
                            .replace_all(&task.content, " ")
                            .to_lowercase()
                            .contains(&needle)
                })
                .cloned()
                .collect()
        })
    }

    // ─── Goals ───────────────────────────────────────────────────────────

    /// Appends a goal at the end of the list (`sort_order` = current count).
    pub fn add_goal(&self, goal: Goal) -> (Goal, WriteReceipt) {
        self.commit(|state, outbox| {
            let mut goal = goal;
            goal.sort_order = state.goals.len() as i64;
            goal.progress = goal.progress.min(100);
            state.goals.push(goal.clone());
            outbox.push(Change::InsertGoal(goal.clone()));
            goal
        })
    }

    pub fn update_goal(&self, id: &str, patch: GoalPatch) -> WriteReceipt {
        let updated_at = Utc::now();
        self.commit(|state, outbox| {
            if let Some(goal) = state.goals.iter_mut().find(|goal| goal.id == id) {
                patch.apply(goal);
                goal.updated_at = updated_at;
                outbox.push(Change::UpdateGoal {
                    id: id.to_string(),
                    patch,
                    updated_at,
                });
            }
        })
        .1
    }

    pub fn delete_goal(&self, id: &str) -> WriteReceipt {
        self.commit(|state, outbox| {
            state.goals.retain(|goal| goal.id != id);
            outbox.push(Change::DeleteGoal { id: id.to_string() });
        })
        .1
    }

    /// Renumbers goals in the given order; goals not listed keep their relative order after them.
    pub fn reorder_goals(&self, ordered_ids: &[String]) -> WriteReceipt {
        let updated_at = Utc::now();
        self.commit(|state, outbox| {
            let goals = std::mem::take(&mut state.goals);
            state.goals = reorder_by_ids(goals, ordered_ids, |goal| goal.id.as_str());
            for (index, goal) in state.goals.iter_mut().enumerate() {
                let index = index as i64;
                if goal.sort_order != index {
                    goal.sort_order = index;
                    outbox.push(Change::UpdateGoal {
                        id: goal.id.clone(),
                        patch: GoalPatch {
                            sort_order: Some(index),
                            ..GoalPatch::default()
                        },
                        updated_at,
                    });
                }
            }
        })
        .1
    }

    /// Replaces the goal list wholesale; nothing is mirrored.
    pub fn load_goals(&self, goals: Vec<Goal>) -> WriteReceipt {
        self.mutate(|state| state.goals = goals)
    }

    // ─── People ──────────────────────────────────────────────────────────

    pub fn add_person(&self, name: &str, avatar_color: Option<String>) -> (Person, WriteReceipt) {
        let avatar_color = avatar_color
            .filter(|color| !color.trim().is_empty())
            .unwrap_or_else(random_avatar_color);
        self.commit(|state, outbox| {
            let max_order = state.people.iter().map(|person| person.sort_order).max().unwrap_or(0);
            let person = Person {
                id: generate_id(),
                name: name.trim().to_string(),
                avatar_color,
                sort_order: max_order + 1,
            };
            state.people.push(person.clone());
            outbox.push(Change::InsertPerson(person.clone()));
            person
        })
    }

    pub fn edit_person(&self, id: &str, patch: PersonPatch) -> WriteReceipt {
        self.commit(|state, outbox| {
            if let Some(person) = state.people.iter_mut().find(|person| person.id == id) {
                patch.apply(person);
                outbox.push(Change::UpdatePerson {
                    id: id.to_string(),
                    patch,
                });
            }
        })
        .1
    }

    /// Unknown ids are ignored; people missing from the list go last.
    pub fn reorder_people(&self, ordered_ids: &[String]) -> WriteReceipt {
        self.commit(|state, outbox| {
            let people = std::mem::take(&mut state.people);
            state.people = reorder_by_ids(people, ordered_ids, |person| person.id.as_str());
            for (index, person) in state.people.iter_mut().enumerate() {
                let index = index as i64;
                if person.sort_order != index {
                    person.sort_order = index;
                    outbox.push(Change::UpdatePerson {
                        id: person.id.clone(),
                        patch: PersonPatch {
                            sort_order: Some(index),
                            ..PersonPatch::default()
                        },
                    });
                }
            }
        })
        .1
    }

    /// Removes the person and exactly their 1:1 bucket.
    pub fn delete_person(&self, id: &str) -> WriteReceipt {
        self.commit(|state, outbox| {
            state.people.retain(|person| person.id != id);
            for note in state.one_on_ones.remove(id).unwrap_or_default() {
                outbox.push(Change::DeleteOneOnOne { id: note.id });
            }
            outbox.push(Change::DeletePerson { id: id.to_string() });
        })
        .1
    }

    // ─── 1:1 notes ───────────────────────────────────────────────────────

    /// New notes go to the top of the person's bucket.
    pub fn add_one_on_one_item(&self, person_id: &str, content: &str) -> (OneOnOneItem, WriteReceipt) {
        let item = OneOnOneItem {
            id: generate_id(),
            person_id: person_id.to_string(),
            content: content.to_string(),
            is_completed: false,
            created_at: Utc::now(),
        };
        let (_, receipt) = self.commit(|state, outbox| {
            state
                .one_on_ones
                .entry(person_id.to_string())
                .or_default()
                .insert(0, item.clone());
            outbox.push(Change::InsertOneOnOne(item.clone()));
        });
        (item, receipt)
    }

    pub fn update_one_on_one_item(&self, id: &str, patch: OneOnOnePatch) -> WriteReceipt {
        self.commit(|state, outbox| {
            let mut found = false;
            for item in state.one_on_ones.values_mut().flatten() {
                if item.id == id {
                    patch.apply(item);
                    found = true;
                }
            }
            if found {
                outbox.push(Change::UpdateOneOnOne {
                    id: id.to_string(),
                    patch,
                });
            }
        })
        .1
    }

    pub fn delete_one_on_one_item(&self, id: &str) -> WriteReceipt {
        self.commit(|state, outbox| {
            for items in state.one_on_ones.values_mut() {
                items.retain(|item| item.id != id);
            }
            outbox.push(Change::DeleteOneOnOne { id: id.to_string() });
        })
        .1
    }

    pub fn note_count(&self, person_id: &str) -> usize {
        self.select(|state| state.one_on_ones.get(person_id).map_or(0, Vec::len))
    }

    // ─── Settings ────────────────────────────────────────────────────────

    pub fn set_zoom(&self, zoom: f64) -> WriteReceipt {
        self.mutate(|state| state.settings.zoom = clamp_zoom(zoom))
    }

    pub fn set_sidebar_open(&self, open: bool) -> WriteReceipt {
        self.mutate(|state| state.settings.sidebar_open = open)
    }

    pub fn set_sidebar_width(&self, width: f64) -> WriteReceipt {
        self.mutate(|state| state.settings.sidebar_width = clamp_sidebar_width(width))
    }

    // ─── Meeting hub ─────────────────────────────────────────────────────

    pub fn add_space(
        &self,
        name: &str,
        description: &str,
        category: SpaceCategory,
        color: &str,
    ) -> (MeetingSpace, WriteReceipt) {
        let space = MeetingSpace {
            id: generate_id(),
            name: name.trim().to_string(),
            description: description.to_string(),
            category,
            color: color.to_string(),
            records: Vec::new(),
            space_notes: Vec::new(),
        };
        let receipt = self.mutate(|state| state.meeting_spaces.push(space.clone()));
        (space, receipt)
    }

    pub fn update_space(&self, id: &str, patch: SpacePatch) -> WriteReceipt {
        self.mutate(|state| {
            if let Some(space) = state.meeting_spaces.iter_mut().find(|space| space.id == id) {
                if let Some(name) = patch.name {
                    space.name = name;
                }
                if let Some(description) = patch.description {
                    space.description = description;
                }
                if let Some(category) = patch.category {
                    space.category = category;
                }
                if let Some(color) = patch.color {
                    space.color = color;
                }
            }
        })
    }

    pub fn delete_space(&self, id: &str) -> WriteReceipt {
        self.mutate(|state| state.meeting_spaces.retain(|space| space.id != id))
    }

    /// Newest record first.
    pub fn add_meeting_record(&self, space_id: &str, record: MeetingRecord) -> WriteReceipt {
        self.mutate(|state| {
            if let Some(space) = state.meeting_spaces.iter_mut().find(|space| space.id == space_id) {
                space.records.insert(0, record);
            }
        })
    }

    pub fn set_meeting_insight(
        &self,
        space_id: &str,
        record_id: &str,
        insight: MeetingInsight,
    ) -> WriteReceipt {
        self.mutate(|state| {
            let record = state
                .meeting_spaces
                .iter_mut()
                .filter(|space| space.id == space_id)
                .flat_map(|space| space.records.iter_mut())
                .find(|record| record.id == record_id);
            if let Some(record) = record {
                record.insight = Some(insight);
            }
        })
    }

    pub fn delete_meeting_record(&self, space_id: &str, record_id: &str) -> WriteReceipt {
        self.mutate(|state| {
            if let Some(space) = state.meeting_spaces.iter_mut().find(|space| space.id == space_id) {
                space.records.retain(|record| record.id != record_id);
            }
        })
    }

    /// Replaces the page with the same id (refreshing `updated_at`) or appends it.
    pub fn upsert_space_note(&self, space_id: &str, note: SpaceNotePage) -> WriteReceipt {
        self.mutate(|state| {
            let Some(space) = state.meeting_spaces.iter_mut().find(|space| space.id == space_id) else {
                return;
            };
            match space.space_notes.iter_mut().find(|page| page.id == note.id) {
                Some(page) => {
                    page.title = note.title;
                    page.content = note.content;
                    page.updated_at = Utc::now();
                }
                None => space.space_notes.push(note),
            }
        })
    }

    pub fn find_space(&self, id: &str) -> Option<MeetingSpace> {
        self.select(|state| state.meeting_spaces.iter().find(|space| space.id == id).cloned())
    }

    // ─── Health ──────────────────────────────────────────────────────────

    pub fn add_blood_work(&self, record: BloodWorkRecord) -> WriteReceipt {
        self.mutate(|state| state.health.blood_work_records.insert(0, record))
    }

    pub fn delete_blood_work(&self, id: &str) -> WriteReceipt {
        self.mutate(|state| state.health.blood_work_records.retain(|record| record.id != id))
    }

    pub fn add_workout(&self, record: WorkoutRecord) -> WriteReceipt {
        self.mutate(|state| state.health.workout_records.insert(0, record))
    }

    pub fn delete_workout(&self, id: &str) -> WriteReceipt {
        self.mutate(|state| state.health.workout_records.retain(|record| record.id != id))
    }

    pub fn set_personal_profile(&self, profile: PersonalProfile) -> WriteReceipt {
        self.mutate(|state| state.health.personal_profile = Some(profile))
    }

    // ─── Remote hydration ────────────────────────────────────────────────

    /// Replaces the mirrored entities with rows read back from the remote store.
    pub fn apply_remote_snapshot(&self, snapshot: RemoteSnapshot) -> WriteReceipt {
        let RemoteSnapshot {
            tasks,
            mut goals,
            mut people,
            one_on_ones,
        } = snapshot;
        goals.sort_by_key(|goal| goal.sort_order);
        people.sort_by_key(|person| person.sort_order);

        let mut grouped: BTreeMap<String, Vec<OneOnOneItem>> = BTreeMap::new();
        for item in one_on_ones {
            grouped.entry(item.person_id.clone()).or_default().push(item);
        }

        self.mutate(|state| {
            state.tasks = tasks;
            state.goals = goals;
            state.people = people;
            state.one_on_ones = grouped;
        })
    }
}

fn reorder_by_ids<T>(items: Vec<T>, ordered_ids: &[String], id_of: impl Fn(&T) -> &str) -> Vec<T> {
    let mut remaining = items.into_iter().map(Some).collect::<Vec<_>>();
    let mut ordered = Vec::with_capacity(remaining.len());
    for wanted in ordered_ids {
        let position = remaining
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|item| id_of(item) == wanted));
        if let Some(item) = position.and_then(|index| remaining[index].take()) {
            ordered.push(item);
        }
    }
    ordered.extend(remaining.into_iter().flatten());
    ordered
}

#[cfg(test)]
mod tests {
    use super::{reorder_by_ids, week_of};
    use crate::bridge::MemoryBridge;
    use crate::models::{DateKey, OneOnOnePatch, RemoteSnapshot, TaskCategory, TaskPatch, TaskStatus};
    use crate::store::Store;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn store() -> Store {
        Store::new(Arc::new(MemoryBridge::new()), "state.json")
    }

    #[tokio::test]
    async fn task_lifecycle() {
        let store = store();
        let day = DateKey::parse("2025-03-10").expect("date");
        let (task, _) = store.create_task(day, TaskCategory::Work);
        assert_eq!(task.title, "New Task");
        assert_eq!(store.tasks_on(day).len(), 1);

        store.update_task(
            &task.id,
            TaskPatch {
                title: Some("Quarterly plan".to_string()),
                content: Some("<p>Draft <b>budget</b></p>".to_string()),
                status: Some(TaskStatus::InProgress),
                ..TaskPatch::default()
            },
        );
        assert_eq!(store.search_tasks("BUDGET").len(), 1);
        assert_eq!(store.search_tasks("quarterly").len(), 1);
        assert!(store.search_tasks("b>").is_empty());

        store.move_task(&task.id, DateKey::Inbox);
        assert_eq!(store.inbox_count(), 1);
        assert!(store.tasks_on(day).is_empty());

        store.delete_task(&task.id).confirmed().await.expect("write");
        assert!(store.snapshot().tasks.is_empty());
    }

    #[tokio::test]
    async fn delete_person_removes_only_their_bucket() {
        let store = store();
        let (alice, _) = store.add_person("Alice", None);
        let (bob, _) = store.add_person("Bob", Some("bg-rose-500".to_string()));
        assert!(bob.sort_order > alice.sort_order);
        assert!(!alice.avatar_color.is_empty());

        store.add_one_on_one_item(&alice.id, "first");
        let (latest, _) = store.add_one_on_one_item(&alice.id, "second");
        store.add_one_on_one_item(&bob.id, "bob note");
        assert_eq!(store.snapshot().one_on_ones[&alice.id][0].id, latest.id);

        store.delete_person(&alice.id).confirmed().await.expect("write");
        let state = store.snapshot();
        assert_eq!(state.people.len(), 1);
        assert!(!state.one_on_ones.contains_key(&alice.id));
        assert_eq!(store.note_count(&bob.id), 1);
    }

    #[tokio::test]
    async fn notes_can_be_completed_and_removed() {
        let store = store();
        let (person, _) = store.add_person("Sam", None);
        let (item, _) = store.add_one_on_one_item(&person.id, "raise");
        store.update_one_on_one_item(
            &item.id,
            OneOnOnePatch {
                is_completed: Some(true),
                ..OneOnOnePatch::default()
            },
        );
        assert!(store.snapshot().one_on_ones[&person.id][0].is_completed);
        store.delete_one_on_one_item(&item.id);
        assert_eq!(store.note_count(&person.id), 0);
    }

    #[tokio::test]
    async fn settings_setters_clamp() {
        let store = store();
        store.set_zoom(7.0);
        store.set_sidebar_width(10.0);
        let settings = store.snapshot().settings;
        assert_eq!(settings.zoom, 2.0);
        assert_eq!(settings.sidebar_width, 200.0);
    }

    #[tokio::test]
    async fn reorder_people_ignores_unknown_ids() {
        let store = store();
        let (a, _) = store.add_person("A", None);
        let (b, _) = store.add_person("B", None);
        store.reorder_people(&[b.id.clone(), "ghost".to_string(), a.id.clone()]);
        let people = store.snapshot().people;
        assert_eq!(people[0].id, b.id);
        assert_eq!(people[0].sort_order, 0);
        assert_eq!(people[1].sort_order, 1);
    }

    #[tokio::test]
    async fn remote_snapshot_is_sorted_and_grouped() {
        let store = store();
        let (a, _) = store.add_person("A", None);
        let (b, _) = store.add_person("B", None);
        let (note, _) = store.add_one_on_one_item(&a.id, "x");
        let mut people = store.snapshot().people;
        people[0].sort_order = 9;
        store.apply_remote_snapshot(RemoteSnapshot {
            people,
            one_on_ones: vec![note],
            ..RemoteSnapshot::default()
        });
        let state = store.snapshot();
        assert_eq!(state.people[0].id, b.id);
        assert_eq!(state.one_on_ones[&a.id].len(), 1);
    }

    #[test]
    fn week_starts_on_monday() {
        let thursday = NaiveDate::from_ymd_opt(2025, 3, 13).expect("date");
        let week = week_of(thursday);
        assert_eq!(week[0].to_string(), "2025-03-10");
        assert_eq!(week[6].to_string(), "2025-03-16");
    }

    #[test]
    fn reorder_keeps_unlisted_items_last() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ordered = reorder_by_ids(items, &["c".to_string()], |item| item.as_str());
        assert_eq!(ordered, vec!["c", "a", "b"]);
    }
}
