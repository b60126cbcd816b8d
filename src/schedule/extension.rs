//! Extending a schedule through the model when it runs low.

use super::model::{Schedule, ScheduleActivity};
use crate::error::Result;
use crate::llm::{LlmProvider, parse_task_list};
use crate::prompt::loader::{PromptLoader, substitute};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Extension triggers when less than this many days remain.
const EXTENSION_THRESHOLD_DAYS: f64 = 1.0;

/// How many recent activities are replayed as context.
const RECENT_ACTIVITY_CONTEXT: usize = 10;

pub fn needs_extension(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    schedule.days_remaining(now) < EXTENSION_THRESHOLD_DAYS
}

/// Ask the model for new activities up to midnight of the day after next,
/// applying each returned `schedule` task. Overlapping activities are
/// rejected individually; the rest still land. Returns how many applied.
pub async fn extend_schedule(
    schedule: &mut Schedule,
    llm: &dyn LlmProvider,
    prompts: &PromptLoader,
    agent_name: &str,
    daily_schedule_description: &str,
    agent_instructions: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let tz = schedule.tz();
    let start = schedule
        .activities
        .iter()
        .map(|a| a.end_time)
        .max()
        .unwrap_or(now)
        .max(now);

    // Midnight (local) of the day after next, so at least a full day of
    // coverage always exists.
    let local_start = start.with_timezone(&tz);
    let end = (local_start + chrono::Duration::days(2))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_local_timezone(tz)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(start + chrono::Duration::days(2));

    let system_prompt = build_extension_prompt(
        schedule,
        prompts,
        agent_name,
        daily_schedule_description,
        agent_instructions,
        local_start,
        end.with_timezone(&tz),
        now,
    )?;

    let reply = llm
        .query_structured(
            &system_prompt,
            &now.with_timezone(&tz).to_rfc3339(),
            "direct",
            &[],
            &["schedule".to_string(), "think".to_string()],
        )
        .await?;

    let tasks = parse_task_list(&reply)?;
    let mut applied = 0;
    for task in &tasks {
        match task.kind.as_str() {
            "schedule" => match ScheduleActivity::from_task(task) {
                Ok(activity) => match schedule.upsert_activity(activity) {
                    Ok(()) => applied += 1,
                    Err(error) => {
                        warn!(agent = agent_name, %error, "rejected overlapping activity")
                    }
                },
                Err(error) => warn!(agent = agent_name, %error, "bad schedule task"),
            },
            "think" => {}
            other => warn!(agent = agent_name, kind = other, "unexpected task in schedule reply"),
        }
    }

    schedule.last_extended = Some(now);
    schedule.prune(now);
    info!(
        agent = agent_name,
        applied,
        days_remaining = schedule.days_remaining(now),
        "extended schedule"
    );
    Ok(applied)
}

#[allow(clippy::too_many_arguments)]
fn build_extension_prompt(
    schedule: &Schedule,
    prompts: &PromptLoader,
    agent_name: &str,
    daily_schedule_description: &str,
    agent_instructions: &str,
    start: DateTime<chrono_tz::Tz>,
    end: DateTime<chrono_tz::Tz>,
    now: DateTime<Utc>,
) -> Result<String> {
    let instructions_prompt = prompts.load_for_agent("Instructions-Schedule", Some(agent_name))?;

    let mut parts = vec![format!(
        "# Instruction\n\n\
         You are extending your daily schedule. Create schedule entries starting from {start}.\n\
         The schedule should extend until {end} (midnight of the day after next).\n\
         Make sure activities do not overlap and cover the whole range.\n\
         If the last activity is sleep, continue it past the end time until the normal wake time."
    )];
    parts.push(instructions_prompt);

    if !daily_schedule_description.trim().is_empty() {
        parts.push(format!(
            "## Your Typical Schedule and Preferences\n\n{daily_schedule_description}"
        ));
    }

    let cutoff = now - chrono::Duration::days(3);
    let recent: Vec<&ScheduleActivity> = schedule
        .activities
        .iter()
        .filter(|a| a.end_time >= cutoff)
        .collect();
    if !recent.is_empty() {
        let tz = schedule.tz();
        let lines: Vec<String> = recent
            .iter()
            .rev()
            .take(RECENT_ACTIVITY_CONTEXT)
            .rev()
            .map(|a| {
                format!(
                    "- {} ({} - {}): {}",
                    a.activity_name,
                    a.start_time.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
                    a.end_time.with_timezone(&tz).format("%H:%M"),
                    a.description
                )
            })
            .collect();
        parts.push(format!("## Recent Schedule Context\n\n{}", lines.join("\n")));
    }

    if !agent_instructions.trim().is_empty() {
        parts.push(format!("# Agent Instructions\n\n{agent_instructions}"));
    }

    Ok(substitute(&parts.join("\n\n"), agent_name, "Schedule Extension"))
}
