//! Schedule data model and the responsiveness curve.

use crate::tasks::TaskNode;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How long finished activities linger before pruning.
const ACTIVITY_RETENTION_DAYS: i64 = 2;

/// One block of the agent's day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleActivity {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub activity_name: String,
    #[serde(default)]
    pub description: String,
}

impl ScheduleActivity {
    /// Build an activity from a `schedule` task's parameters.
    pub fn from_task(task: &TaskNode) -> Result<Self, String> {
        let start_time = task
            .param_str("start_time")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or("schedule task missing or invalid 'start_time'")?;
        let end_time = task
            .param_str("end_time")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or("schedule task missing or invalid 'end_time'")?;
        if end_time <= start_time {
            return Err("schedule activity ends before it starts".into());
        }
        let activity_name = task
            .param_str("activity_name")
            .or_else(|| task.param_str("name"))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or("schedule task missing 'activity_name'")?
            .to_string();
        Ok(Self {
            id: task.id.clone(),
            start_time,
            end_time,
            activity_name,
            description: task.param_str("description").unwrap_or_default().to_string(),
        })
    }

    fn overlaps(&self, other: &ScheduleActivity) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

/// The agent's schedule: non-overlapping activities in its timezone.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schedule {
    pub timezone: String,
    #[serde(default)]
    pub last_extended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activities: Vec<ScheduleActivity>,
}

impl Schedule {
    pub fn new(timezone: &str) -> Self {
        Self {
            timezone: timezone.to_string(),
            last_extended: None,
            activities: Vec::new(),
        }
    }

    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Current activity, time remaining in it, and the next one.
    pub fn current_activity(
        &self,
        now: DateTime<Utc>,
    ) -> (
        Option<&ScheduleActivity>,
        Option<chrono::Duration>,
        Option<&ScheduleActivity>,
    ) {
        let current = self
            .activities
            .iter()
            .find(|a| a.start_time <= now && now < a.end_time);
        let remaining = current.map(|a| a.end_time - now);
        let next = self
            .activities
            .iter()
            .filter(|a| a.start_time > now)
            .min_by_key(|a| a.start_time);
        (current, remaining, next)
    }

    /// Insert or replace by id, rejecting overlaps with other activities.
    pub fn upsert_activity(&mut self, activity: ScheduleActivity) -> Result<(), String> {
        if let Some(clash) = self
            .activities
            .iter()
            .find(|existing| existing.id != activity.id && existing.overlaps(&activity))
        {
            return Err(format!(
                "activity '{}' overlaps existing '{}'",
                activity.activity_name, clash.activity_name
            ));
        }
        match self.activities.iter_mut().find(|a| a.id == activity.id) {
            Some(slot) => *slot = activity,
            None => self.activities.push(activity),
        }
        self.activities.sort_by_key(|a| a.start_time);
        Ok(())
    }

    /// Drop activities that ended long ago. Called on save.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::days(ACTIVITY_RETENTION_DAYS);
        self.activities.retain(|a| a.end_time >= cutoff);
    }

    /// How many days the schedule still covers from `now`.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> f64 {
        self.activities
            .iter()
            .map(|a| a.end_time)
            .max()
            .map(|end| (end - now).num_seconds().max(0) as f64 / 86_400.0)
            .unwrap_or(0.0)
    }
}

/// Scalar in [0, 1] from the current activity. Zero suppresses reception
/// entirely (unread scans and planning turns).
pub fn responsiveness(current: Option<&ScheduleActivity>) -> f32 {
    let Some(activity) = current else {
        return 1.0;
    };
    let name = activity.activity_name.to_ascii_lowercase();
    if name.contains("sleep") || name.contains("do not disturb") {
        0.0
    } else {
        1.0
    }
}
