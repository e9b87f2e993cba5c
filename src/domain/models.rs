use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_ACCENT: &str = "#7c3aed";

/// Owner identity as resolved by the session gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }

    pub fn user_id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    #[serde(deserialize_with = "flag")]
    pub done: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "task.title")
    }
}

/// Partial update over a task; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub done: Option<bool>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.done.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            validate_non_empty(title, "title")?;
        }
        Ok(())
    }

    pub fn merge(&self, current: &Task) -> Result<Task, String> {
        let merged = Task {
            title: self
                .title
                .as_deref()
                .map(|title| title.trim().to_string())
                .unwrap_or_else(|| current.title.clone()),
            done: self.done.unwrap_or(current.done),
            ..current.clone()
        };
        merged.validate()?;
        Ok(merged)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
}

impl Event {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "event.title")?;
        validate_range(self.start, self.end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
}

impl NewEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "title")?;
        validate_range(self.start, self.end)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<DateTime<Utc>>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.start.is_none() && self.end.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            validate_non_empty(title, "title")?;
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            validate_range(start, end)?;
        }
        Ok(())
    }

    /// Coalesces the patch over `current`; the merged range must still be valid.
    pub fn merge(&self, current: &Event) -> Result<Event, String> {
        let merged = Event {
            title: self
                .title
                .as_deref()
                .map(|title| title.trim().to_string())
                .unwrap_or_else(|| current.title.clone()),
            start: self.start.unwrap_or(current.start),
            end: self.end.unwrap_or(current.end),
            ..current.clone()
        };
        merged.validate()?;
        Ok(merged)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub user_id: String,
    pub accent: String,
    #[serde(deserialize_with = "flag")]
    pub dark: bool,
}

impl Settings {
    pub fn default_for(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id().to_string(),
            accent: DEFAULT_ACCENT.to_string(),
            dark: false,
        }
    }

    pub fn theme(&self) -> ThemeSettings {
        ThemeSettings {
            accent: self.accent.clone(),
            dark: self.dark,
        }
    }
}

/// The display preferences a client keeps locally, without the owner key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThemeSettings {
    pub accent: String,
    #[serde(deserialize_with = "flag")]
    pub dark: bool,
}

impl Default for ThemeSettings {
    fn default() -> Self {
        Self {
            accent: DEFAULT_ACCENT.to_string(),
            dark: false,
        }
    }
}

/// Events whose start falls on `day` as seen from `timezone`.
pub fn events_on_day(events: &[Event], day: NaiveDate, timezone: Tz) -> Vec<Event> {
    events
        .iter()
        .filter(|event| {
            let local = event.start.with_timezone(&timezone);
            local.year() == day.year() && local.month() == day.month() && local.day() == day.day()
        })
        .cloned()
        .collect()
}

/// Accepts `#rrggbb` in any case and returns it lower-cased.
pub fn normalize_accent(value: &str) -> Result<String, String> {
    let value = value.trim();
    let Some(digits) = value.strip_prefix('#') else {
        return Err("accent must be a #rrggbb color".to_string());
    };
    if digits.len() != 6 || !digits.chars().all(|candidate| candidate.is_ascii_hexdigit()) {
        return Err("accent must be a #rrggbb color".to_string());
    }
    Ok(value.to_ascii_lowercase())
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), String> {
    if end <= start {
        return Err("end must be after start".to_string());
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Int(i64),
}

impl From<FlagRepr> for bool {
    fn from(value: FlagRepr) -> Self {
        match value {
            FlagRepr::Bool(flag) => flag,
            FlagRepr::Int(number) => number != 0,
        }
    }
}

/// Booleans arrive either as JSON booleans or as 0/1 integers.
pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    FlagRepr::deserialize(deserializer).map(bool::from)
}

pub fn optional_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<FlagRepr>::deserialize(deserializer)?.map(bool::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_task() -> Task {
        Task {
            id: 7,
            user_id: "user-a".to_string(),
            title: "Read".to_string(),
            done: false,
            created_at: fixed_time("2026-02-16T08:00:00Z"),
        }
    }

    fn sample_event(id: i64, start: &str, end: &str) -> Event {
        Event {
            id,
            user_id: "user-a".to_string(),
            title: format!("event-{id}"),
            start: fixed_time(start),
            end: fixed_time(end),
        }
    }

    #[test]
    fn task_patch_rejects_blank_title() {
        let patch = TaskPatch {
            title: Some("   ".to_string()),
            done: None,
        };
        assert!(patch.validate().is_err());
        assert!(patch.merge(&sample_task()).is_err());
    }

    #[test]
    fn empty_task_patch_is_a_noop_merge() {
        let task = sample_task();
        let patch = TaskPatch::default();
        assert!(patch.is_empty());
        assert_eq!(patch.merge(&task).expect("merge"), task);
    }

    proptest! {
        #[test]
        fn task_patch_leaves_absent_fields_unchanged(
            title in "[A-Za-z][A-Za-z0-9 ]{0,20}",
            done in any::<bool>(),
            patch_title in any::<bool>(),
        ) {
            let mut task = sample_task();
            task.done = done;
            let patch = if patch_title {
                TaskPatch { title: Some(title.clone()), done: None }
            } else {
                TaskPatch { title: None, done: Some(!done) }
            };

            let merged = patch.merge(&task).expect("merge");
            if patch_title {
                prop_assert_eq!(merged.title, title.trim().to_string());
                prop_assert_eq!(merged.done, done);
            } else {
                prop_assert_eq!(merged.title, task.title.clone());
                prop_assert_eq!(merged.done, !done);
            }
            prop_assert_eq!(merged.id, task.id);
            prop_assert_eq!(merged.created_at, task.created_at);
        }
    }

    #[test]
    fn event_patch_validates_the_merged_range() {
        let event = sample_event(1, "2026-02-16T09:00:00Z", "2026-02-16T10:00:00Z");
        let moves_start_past_end = EventPatch {
            start: Some(fixed_time("2026-02-16T11:00:00Z")),
            ..EventPatch::default()
        };
        assert!(moves_start_past_end.validate().is_ok());
        assert!(moves_start_past_end.merge(&event).is_err());

        let shifts_both = EventPatch {
            start: Some(fixed_time("2026-02-16T11:00:00Z")),
            end: Some(fixed_time("2026-02-16T12:00:00Z")),
            ..EventPatch::default()
        };
        let merged = shifts_both.merge(&event).expect("merge");
        assert_eq!(merged.title, event.title);
        assert_eq!(merged.end, fixed_time("2026-02-16T12:00:00Z"));
    }

    #[test]
    fn new_event_requires_end_after_start() {
        let event = NewEvent {
            title: "Standup".to_string(),
            start: fixed_time("2026-02-16T09:00:00Z"),
            end: fixed_time("2026-02-16T09:00:00Z"),
        };
        assert!(event.validate().is_err());
    }

    #[test]
    fn accent_must_be_six_hex_digits() {
        assert_eq!(normalize_accent(" #7C3AED ").expect("valid"), "#7c3aed");
        assert!(normalize_accent("7c3aed").is_err());
        assert!(normalize_accent("#7c3ae").is_err());
        assert!(normalize_accent("#7c3aez").is_err());
    }

    #[test]
    fn flags_accept_booleans_and_integers() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": 1,
            "user_id": "user-a",
            "title": "Read",
            "done": 1,
            "created_at": 1_771_228_800_000_i64
        }))
        .expect("integer flag");
        assert!(task.done);

        let patch: TaskPatch =
            serde_json::from_value(serde_json::json!({ "done": 0 })).expect("integer patch");
        assert_eq!(patch.done, Some(false));

        let patch: TaskPatch =
            serde_json::from_value(serde_json::json!({ "done": true })).expect("bool patch");
        assert_eq!(patch.done, Some(true));

        let patch: TaskPatch =
            serde_json::from_value(serde_json::json!({ "title": "x" })).expect("absent flag");
        assert_eq!(patch.done, None);
    }

    #[test]
    fn events_on_day_uses_local_calendar_day() {
        let events = vec![
            sample_event(1, "2026-02-16T09:00:00Z", "2026-02-16T10:00:00Z"),
            sample_event(2, "2026-02-16T23:30:00Z", "2026-02-17T00:30:00Z"),
            sample_event(3, "2026-02-17T09:00:00Z", "2026-02-17T10:00:00Z"),
        ];
        let day = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");

        let utc = events_on_day(&events, day, chrono_tz::UTC);
        assert_eq!(utc.iter().map(|event| event.id).collect::<Vec<_>>(), vec![1, 2]);

        // 23:30Z is already the 17th in Tokyo.
        let tokyo = events_on_day(&events, day, chrono_tz::Asia::Tokyo);
        assert_eq!(tokyo.iter().map(|event| event.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn events_on_day_matches_the_selected_day_only() {
        let start = chrono_tz::Europe::Berlin
            .with_ymd_and_hms(2026, 3, 10, 9, 0, 0)
            .single()
            .expect("unambiguous")
            .with_timezone(&Utc);
        let event = Event {
            id: 5,
            user_id: "user-a".to_string(),
            title: "Review".to_string(),
            start,
            end: start + chrono::Duration::hours(1),
        };
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).expect("valid date");
        let next_day = day.succ_opt().expect("next day");

        assert_eq!(
            events_on_day(std::slice::from_ref(&event), day, chrono_tz::Europe::Berlin).len(),
            1
        );
        assert!(events_on_day(&[event], next_day, chrono_tz::Europe::Berlin).is_empty());
    }
}
