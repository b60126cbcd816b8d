//! `schedule`: immediate task adding one activity to the agent's day.

use super::registry::HandlerCtx;
use crate::error::{Result, TaskError};
use crate::schedule::{Schedule, ScheduleActivity};
use crate::tasks::TaskNode;
use tracing::info;

pub async fn handle(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let activity =
        ScheduleActivity::from_task(task).map_err(TaskError::Permanent)?;

    let now = ctx.deps.clock.now();
    let mut schedule = match ctx.deps.storage.load_schedule(ctx.agent_id).await? {
        Some(schedule) => schedule,
        None => Schedule::new(ctx.agent.definition.timezone().name()),
    };

    schedule
        .upsert_activity(activity.clone())
        .map_err(TaskError::Permanent)?;
    schedule.prune(now);
    ctx.deps.storage.save_schedule(ctx.agent_id, &schedule, now).await?;

    info!(
        agent = %ctx.agent.name(),
        activity = %activity.activity_name,
        start = %activity.start_time,
        "added schedule activity"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::ctx_fixture;
    use crate::tasks::graph::Params;
    use chrono::Utc;
    use serde_json::Value;

    fn schedule_task(id: &str, start_h: i64, end_h: i64, name: &str) -> TaskNode {
        let base = Utc::now();
        let mut params = Params::new();
        params.insert(
            "start_time".into(),
            Value::from((base + chrono::Duration::hours(start_h)).to_rfc3339()),
        );
        params.insert(
            "end_time".into(),
            Value::from((base + chrono::Duration::hours(end_h)).to_rfc3339()),
        );
        params.insert("activity_name".into(), Value::from(name));
        TaskNode::new("schedule", params).with_id(id)
    }

    #[tokio::test]
    async fn upserts_activity_into_stored_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _transport) = ctx_fixture(dir.path()).await;

        handle(&ctx, &schedule_task("act-1", 1, 2, "lunch")).await.unwrap();
        let schedule = ctx.deps.storage.load_schedule(1).await.unwrap().unwrap();
        assert_eq!(schedule.activities.len(), 1);
        assert_eq!(schedule.activities[0].activity_name, "lunch");
    }

    #[tokio::test]
    async fn overlapping_activity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _transport) = ctx_fixture(dir.path()).await;

        handle(&ctx, &schedule_task("act-1", 1, 3, "lunch")).await.unwrap();
        let err = handle(&ctx, &schedule_task("act-2", 2, 4, "clash")).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
