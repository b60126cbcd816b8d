//! The `received` handler: one full planning turn for a conversation.
//!
//! Gate, fetch history, enrich media, assemble the system prompt, query
//! the model, run the retrieval sub-loop, execute immediate tasks inline,
//! then attach the surviving actions to the graph behind typing waits.

use super::registry::{HandlerCtx, HandlerRegistry};
use crate::chat::{ChatMessage, ChatTransport};
use crate::config::{
    FETCHED_RESOURCE_LIFETIME_SECS, MAX_RETRIEVALS_PER_TURN, TYPING_CHARS_PER_SEC,
    TYPING_DELAY_CEILING_SECS, TYPING_DELAY_FLOOR_SECS, URL_FETCH_TIMEOUT,
};
use crate::agent::agent_responsiveness;
use crate::error::{Result, TaskError};
use crate::llm::{ChatTurn, LlmProvider, assign_generated_ids, dedupe_by_identifier, parse_task_list};
use crate::media::injector::{MediaContext, format_message_for_prompt, inject_media_descriptions};
use crate::prompt::builder::{PromptSections, SpecificSignals, build_specific_instructions, is_conversation_start};
use crate::prompt::catalog::{build_media_catalog, build_sticker_catalog};
use crate::prompt::channel_details::build_channel_details_section;
use crate::prompt::loader::substitute;
use crate::storage::EntryTable;
use crate::tasks::{TaskNode, make_typing_wait, make_wait_task};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kinds that go over the wire and get a typing wait in front of them.
fn is_outbound(kind: &str) -> bool {
    matches!(kind, "send" | "sticker" | "send_media")
}

/// Typing delay for an outbound task, from its text length.
fn typing_delay_secs(task: &TaskNode) -> u64 {
    let text = task
        .param_str("message")
        .or_else(|| task.param_str("text"))
        .unwrap_or("");
    if text.is_empty() {
        return TYPING_DELAY_FLOOR_SECS;
    }
    let simulated = (text.chars().count() as f64 / TYPING_CHARS_PER_SEC).ceil() as u64;
    simulated.clamp(TYPING_DELAY_FLOOR_SECS, TYPING_DELAY_CEILING_SECS)
}

pub async fn handle(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let agent = &ctx.agent;
    let deps = &ctx.deps;
    let now = deps.clock.now();

    // An agent looking at its own Saved Messages has nothing to plan.
    if ctx.channel_id == ctx.agent_id {
        return Ok(());
    }
    if agent_responsiveness(agent, deps).await <= 0.0 {
        debug!(agent = %agent.name(), channel = ctx.channel_id, "unresponsive; skipping turn");
        return Ok(());
    }
    // In DMs, let the partner finish typing before planning a reply.
    if !ctx.is_group_chat {
        if let Some(remaining) = deps.typing.remaining_window(ctx.agent_id, ctx.channel_id, now) {
            debug!(agent = %agent.name(), channel = ctx.channel_id, "partner is typing; re-queueing");
            requeue_behind_wait(ctx, &task.id, remaining, now);
            return Ok(());
        }
    }

    let transport = agent
        .transport()
        .ok_or_else(|| TaskError::Transient("transport not connected".into()))?;

    // History, newest first.
    let mut history = transport
        .recent_messages(ctx.channel_id, agent.llm.history_size())
        .await?;
    if let Err(error) = transport
        .send_read_acknowledge(
            ctx.channel_id,
            task.param_bool("clear_mentions"),
            task.param_bool("clear_reactions"),
        )
        .await
    {
        debug!(agent = %agent.name(), %error, "read acknowledge failed");
    }

    // First-contact resets.
    let highest_summarized = deps
        .storage
        .highest_summarized_id(ctx.agent_id, ctx.channel_id)
        .await?;
    let is_start = is_conversation_start(&history, highest_summarized);
    if is_start {
        if agent.definition.reset_on_first_message {
            deps.storage
                .clear_entries(EntryTable::Plans, ctx.agent_id, Some(ctx.channel_id))
                .await?;
            deps.storage.clear_summaries(ctx.agent_id, ctx.channel_id).await?;
        } else if agent.definition.clear_summaries_on_first_message {
            deps.storage.clear_summaries(ctx.agent_id, ctx.channel_id).await?;
        }
    }

    // Make sure every media item in view has a cached description.
    inject_media_descriptions(
        &mut history,
        &MediaContext {
            chain: agent.media_chain(),
            transport: Some(transport.as_ref()),
            llm: Some(agent.llm.as_ref()),
            budget: Some(&deps.budget),
            now,
        },
    )
    .await;

    let fetched = fetched_resources_snapshot(ctx);
    let system_prompt =
        build_system_prompt(ctx, task, is_start, &fetched, transport.as_ref(), now).await?;
    let turns = render_history(agent.media_chain(), &history, &fetched, now).await;

    // Per-conversation model override, falling back to the agent default.
    let llm = conversation_llm(ctx).await;
    let registry = HandlerRegistry::standard();
    let chat_type = if ctx.is_group_chat { "group" } else { "direct" };
    let now_local = now.with_timezone(&agent.definition.timezone()).to_rfc3339();

    // Prohibited-content and malformed replies surface as transient
    // errors; the retry machinery injects a wait and re-enters here.
    let reply = llm
        .query_structured(&system_prompt, &now_local, chat_type, &turns, &registry.allowed_kinds())
        .await?;
    let tasks = parse_task_list(&reply)?;
    info!(
        agent = %agent.name(),
        channel = ctx.channel_id,
        tasks = tasks.len(),
        "planned turn"
    );

    let tasks = process_retrieve_tasks(ctx, tasks, &fetched).await?;

    // think / remember / schedule run inline and drop out of the plan.
    let mut remaining = Vec::new();
    for planned in tasks {
        if registry.dispatch_immediate(ctx, &planned).await? {
            continue;
        }
        remaining.push(planned);
    }

    let mut planned = dedupe_by_identifier(remaining);
    assign_generated_ids(&mut planned);
    attach_planned_tasks(ctx, &task.id, planned);
    deps.persist_queue();
    Ok(())
}

/// Re-queue the received task behind a short wait covering the remaining
/// typing window.
fn requeue_behind_wait(
    ctx: &HandlerCtx,
    task_id: &str,
    remaining: std::time::Duration,
    now: DateTime<Utc>,
) {
    let remaining = remaining.max(std::time::Duration::from_secs(1));
    let mut queue = ctx.deps.queue.lock().expect("work queue poisoned");
    let Some(graph) = queue.graph_mut(&ctx.graph_id) else {
        return;
    };
    let until = now + chrono::Duration::from_std(remaining).expect("window fits");
    let mut wait = make_wait_task(0, false);
    wait.params
        .insert("until".to_string(), Value::String(until.to_rfc3339()));
    wait.params.remove("duration");
    let wait_id = wait.id.clone();
    graph.add_task(wait);
    if let Some(received) = graph.get_mut(task_id) {
        received.depends_on.push(wait_id);
        received.status = crate::tasks::TaskStatus::Pending;
    }
}

fn fetched_resources_snapshot(ctx: &HandlerCtx) -> BTreeMap<String, String> {
    let queue = ctx.deps.queue.lock().expect("work queue poisoned");
    queue
        .graph(&ctx.graph_id)
        .map(|graph| graph.context.fetched_resources.clone())
        .unwrap_or_default()
}

/// Model override for this conversation, if one is stored and usable.
async fn conversation_llm(ctx: &HandlerCtx) -> Arc<dyn LlmProvider> {
    match ctx
        .deps
        .storage
        .conversation_model(ctx.agent_id, ctx.channel_id)
        .await
    {
        Ok(Some(model)) => {
            match crate::llm::provider_for_model(Some(&model), &ctx.deps.config.llm_keys) {
                Ok(provider) => provider,
                Err(error) => {
                    warn!(model = %model, %error, "conversation model override unusable; using default");
                    ctx.agent.llm.clone()
                }
            }
        }
        Ok(None) => ctx.agent.llm.clone(),
        Err(error) => {
            warn!(%error, "conversation model lookup failed; using default");
            ctx.agent.llm.clone()
        }
    }
}

/// Render history into model turns, oldest first, with fetched resources
/// appended as context turns.
async fn render_history(
    chain: &dyn crate::media::MediaSource,
    history: &[ChatMessage],
    fetched: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(history.len() + fetched.len());
    for message in history.iter().rev() {
        let content = format_message_for_prompt(message, chain, now).await;
        if content.is_empty() {
            continue;
        }
        if message.outgoing {
            turns.push(ChatTurn::agent(content));
        } else {
            let sender = message
                .sender_name
                .clone()
                .or_else(|| message.sender_id.map(|id| id.to_string()))
                .unwrap_or_else(|| "unknown".to_string());
            turns.push(ChatTurn::partner(format!(
                "{sender} (message_id {}): {content}",
                message.id
            )));
        }
    }
    for (url, content) in fetched {
        turns.push(ChatTurn::partner(format!("Content of {url}:\n{content}")));
    }
    turns
}

async fn build_system_prompt(
    ctx: &HandlerCtx,
    task: &TaskNode,
    is_start: bool,
    fetched: &BTreeMap<String, String>,
    transport: &dyn ChatTransport,
    now: DateTime<Utc>,
) -> Result<String> {
    let agent = &ctx.agent;
    let deps = &ctx.deps;

    let reaction_ids = task.reaction_message_ids();
    let signals = SpecificSignals {
        is_conversation_start: is_start,
        xsend_intent: task.param_str("xsend_intent"),
        target_message_id: task.param_i64("message_id"),
        reaction_message_ids: &reaction_ids,
    };

    let mut sections = PromptSections {
        specific_instructions: build_specific_instructions(&signals),
        provider_prompt: agent.system_prompt(deps.prompts.as_ref())?,
        ..Default::default()
    };

    // The schedule role only joins when the schedule resource is actually
    // in context and parses.
    if agent.has_role_prompt("Task-Schedule") {
        let schedule_in_context = fetched
            .get("file:schedule.json")
            .map(|raw| serde_json::from_str::<Value>(raw).is_ok())
            .unwrap_or(false);
        if schedule_in_context {
            sections
                .role_prompts
                .push(deps.prompts.load_for_agent("Task-Schedule", Some(agent.name()))?);
        }
    }

    sections.sticker_catalog = build_sticker_catalog(
        &agent.catalog_stickers(),
        transport.is_premium(),
        agent.media_chain(),
        now,
    )
    .await;
    sections.media_catalog =
        build_media_catalog(&agent.saved_media_items(), agent.media_chain(), now).await;

    // Memory: conversation notes plus agent-global memories.
    let mut memory_lines = Vec::new();
    for entry in deps
        .storage
        .list_entries(EntryTable::Notes, ctx.agent_id, Some(ctx.channel_id))
        .await?
    {
        memory_lines.push(format!("- [{}] {}", entry.id, entry.content));
    }
    for entry in deps
        .storage
        .list_entries(EntryTable::Memories, ctx.agent_id, None)
        .await?
    {
        memory_lines.push(format!("- [{}] {}", entry.id, entry.content));
    }
    if !memory_lines.is_empty() {
        sections.memories = Some(format!("# Memory\n\n{}", memory_lines.join("\n")));
    }

    let tz = agent.definition.timezone();
    sections.current_time = format!(
        "# Current Time\n\nIt is now {}.",
        now.with_timezone(&tz).format("%A, %B %-d %Y, %-I:%M %p (%Z)")
    );

    if agent.definition.daily_schedule_description.is_some() {
        if let Some(schedule) = deps.storage.load_schedule(ctx.agent_id).await? {
            sections.current_activity = build_activity_section(&schedule, now);
        }
    }

    let mut partner_name = ctx.channel_id.to_string();
    if let Some(entity) = agent.entity(ctx.channel_id).await {
        partner_name = entity.display_name();
        let mut entity = entity;
        if entity.photo_description.is_none() {
            entity.photo_description = deps
                .storage
                .profile_photo_description(ctx.agent_id, ctx.channel_id)
                .await?;
        }
        sections.channel_details =
            Some(build_channel_details_section(&entity, ctx.is_group_chat));
    }

    let summaries = deps.storage.summaries(ctx.agent_id, ctx.channel_id).await?;
    if !summaries.is_empty() {
        let mut text = String::from("# Conversation Summary\n\n");
        for row in &summaries {
            text.push_str(&row.content);
            text.push('\n');
        }
        if agent.has_role_prompt("Task-Summarize") {
            let highest = summaries.iter().filter_map(|row| row.last_message_id).max();
            text.push_str(&format!(
                "\n({} summaries; highest summarized message_id: {})",
                summaries.len(),
                highest.map(|id| id.to_string()).unwrap_or_else(|| "none".into())
            ));
        }
        sections.summary = Some(text);
    }

    Ok(substitute(&sections.assemble(), agent.name(), &partner_name))
}

/// The "# Current Activity" block.
fn build_activity_section(schedule: &crate::schedule::Schedule, now: DateTime<Utc>) -> Option<String> {
    let tz = schedule.tz();
    let (current, remaining, next) = schedule.current_activity(now);
    let mut text = String::from("# Current Activity\n\n");
    match current {
        Some(activity) => {
            text.push_str(&format!(
                "You are currently: {} ({} - {})\n{}\n",
                activity.activity_name,
                activity.start_time.with_timezone(&tz).format("%-I:%M %p"),
                activity.end_time.with_timezone(&tz).format("%-I:%M %p"),
                activity.description
            ));
            if let Some(remaining) = remaining {
                let minutes = remaining.num_minutes();
                if minutes >= 60 {
                    text.push_str(&format!(
                        "Time remaining: {} hour(s) and {} minute(s)\n",
                        minutes / 60,
                        minutes % 60
                    ));
                } else {
                    text.push_str(&format!("Time remaining: {minutes} minute(s)\n"));
                }
            }
        }
        None => {
            let upcoming = next?;
            text.push_str(&format!(
                "Next activity: {} (starts at {})\n{}\n",
                upcoming.activity_name,
                upcoming.start_time.with_timezone(&tz).format("%-I:%M %p"),
                upcoming.description
            ));
        }
    }
    if let Some(upcoming) = next {
        if current.is_some() {
            text.push_str(&format!(
                "Next activity: {} (starts at {})\n",
                upcoming.activity_name,
                upcoming.start_time.with_timezone(&tz).format("%-I:%M %p")
            ));
        }
    }
    text.push_str("\nYou can retrieve your full schedule by accessing: file:schedule.json\n");
    Some(text)
}

/// Fetch new `retrieve` URLs, park them in the graph context behind a
/// preserve-wait, and raise a transient error so the turn re-runs with
/// the content in view. Already-fetched URLs do not re-trigger.
async fn process_retrieve_tasks(
    ctx: &HandlerCtx,
    tasks: Vec<TaskNode>,
    already_fetched: &BTreeMap<String, String>,
) -> Result<Vec<TaskNode>> {
    let mut normalized = Vec::new();
    let mut requested_urls: Vec<String> = Vec::new();
    for task in tasks {
        if task.kind != "retrieve" {
            normalized.push(task);
            continue;
        }
        let urls = normalize_urls(task.params.get("urls"));
        if urls.is_empty() {
            warn!(agent = %ctx.agent.name(), "retrieve task without valid URLs; dropping");
            continue;
        }
        requested_urls.extend(urls);
    }
    if requested_urls.is_empty() {
        return Ok(normalized);
    }

    let mut to_fetch: Vec<String> = Vec::new();
    for url in requested_urls {
        if already_fetched.contains_key(&url) || to_fetch.contains(&url) {
            continue;
        }
        if to_fetch.len() >= MAX_RETRIEVALS_PER_TURN {
            break;
        }
        to_fetch.push(url);
    }
    if to_fetch.is_empty() {
        info!(agent = %ctx.agent.name(), "all requested URLs already retrieved");
        return Ok(normalized);
    }

    let now = ctx.deps.clock.now();
    let mut fetched = Vec::new();
    for url in &to_fetch {
        let content = fetch_resource(ctx, url).await;
        info!(agent = %ctx.agent.name(), url = %url, bytes = content.len(), "retrieved resource");
        if let Err(error) = ctx
            .deps
            .storage
            .log_task(
                ctx.agent_id,
                ctx.channel_id,
                "retrieve",
                Some(url.as_str()),
                None,
                None,
                now,
            )
            .await
        {
            debug!(%error, "failed to log retrieval");
        }
        fetched.push((url.clone(), content));
    }

    {
        let mut queue = ctx.deps.queue.lock().expect("work queue poisoned");
        if let Some(graph) = queue.graph_mut(&ctx.graph_id) {
            graph.context.fetched_resources.extend(fetched);
            graph.add_task(make_wait_task(FETCHED_RESOURCE_LIFETIME_SECS, true));
        }
    }
    ctx.deps.persist_queue();

    Err(TaskError::Transient("retrieved new context; replaying planning turn".into()).into())
}

fn normalize_urls(raw: Option<&Value>) -> Vec<String> {
    let candidates: Vec<String> = match raw {
        Some(Value::Array(urls)) => urls
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(url)) => vec![url.clone()],
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| {
            url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file:")
        })
        .collect()
}

/// Resolve one resource. `file:schedule.json` is virtual and served from
/// the schedule store; HTTP fetch failures become error placeholders so a
/// single bad URL cannot wedge the turn.
async fn fetch_resource(ctx: &HandlerCtx, url: &str) -> String {
    if let Some(name) = url.strip_prefix("file:") {
        if name == "schedule.json" {
            return match ctx.deps.storage.load_schedule(ctx.agent_id).await {
                Ok(Some(schedule)) => {
                    serde_json::to_string_pretty(&schedule).unwrap_or_else(|e| e.to_string())
                }
                Ok(None) => "{}".to_string(),
                Err(error) => format!("Error retrieving {url}: {error}"),
            };
        }
        return format!("Error retrieving {url}: unknown file resource");
    }

    let client = reqwest::Client::new();
    let result = client.get(url).timeout(URL_FETCH_TIMEOUT).send().await;
    match result {
        Ok(response) => match response.text().await {
            Ok(text) => text,
            Err(error) => format!("Error retrieving {url}: {error}"),
        },
        Err(error) => format!("Error retrieving {url}: {error}"),
    }
}

/// Attach the planned tasks to the graph. Outbound tasks each get a
/// typing wait and are chained so delivery follows plan order.
fn attach_planned_tasks(ctx: &HandlerCtx, received_id: &str, planned: Vec<TaskNode>) {
    if planned.is_empty() {
        return;
    }
    let mut queue = ctx.deps.queue.lock().expect("work queue poisoned");
    let Some(graph) = queue.graph_mut(&ctx.graph_id) else {
        return;
    };

    let mut prev_outbound: Option<String> = None;
    for mut task in planned {
        if task.depends_on.is_empty() {
            task.depends_on.push(received_id.to_string());
        }
        if is_outbound(&task.kind) {
            let mut wait = make_typing_wait(typing_delay_secs(&task));
            match &prev_outbound {
                Some(prev) => wait.depends_on.push(prev.clone()),
                None => wait.depends_on.push(received_id.to_string()),
            }
            task.depends_on.push(wait.id.clone());
            prev_outbound = Some(task.id.clone());
            graph.add_task(wait);
        }
        graph.add_task(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{ScriptedLlm, ctx_fixture_with};
    use crate::tasks::graph::{GraphContext, Params, TaskGraph, TaskStatus};
    use crate::tasks::{ReceivedInsert, insert_received_task};

    /// Seed the queue with a received task for (1, 2) and return its id.
    fn seed_received(ctx: &mut HandlerCtx) -> TaskNode {
        let mut queue = ctx.deps.queue.lock().unwrap();
        let mut insert = ReceivedInsert::new(1, 2);
        insert.message_id = Some(42);
        let task_id = insert_received_task(&mut queue, insert);
        let graph = queue.graph_for_conversation(1, 2).unwrap();
        ctx.graph_id = graph.id.clone();
        let mut task = graph.get(&task_id).unwrap().clone();
        task.status = TaskStatus::Active;
        task
    }

    fn graph_tasks(ctx: &HandlerCtx) -> Vec<TaskNode> {
        ctx.deps
            .queue
            .lock()
            .unwrap()
            .graph(&ctx.graph_id)
            .map(|graph| graph.tasks.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn plans_send_behind_typing_wait() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[r#"[{"kind": "send", "message": "hello back"}]"#]);
        let (mut ctx, transport) = ctx_fixture_with(dir.path(), llm).await;
        transport.add_history(crate::chat::ChatMessage::text_message(
            42,
            2,
            2,
            "hi",
            Utc::now(),
        ));
        let task = seed_received(&mut ctx);

        handle(&ctx, &task).await.unwrap();

        let tasks = graph_tasks(&ctx);
        let send = tasks.iter().find(|t| t.kind == "send").expect("send planned");
        assert_eq!(send.param_str("message"), Some("hello back"));
        // One typing wait guards the send.
        let wait = tasks
            .iter()
            .find(|t| t.is_wait() && t.typing_flag())
            .expect("typing wait");
        assert!(wait.wait_duration_secs().unwrap() >= 2.0);
        assert!(send.depends_on.contains(&wait.id));
        // The conversation was acknowledged as read.
        assert!(transport.calls().iter().any(|call| matches!(
            call,
            crate::chat::testing::TransportCall::ReadAck { peer: 2, .. }
        )));
    }

    #[tokio::test]
    async fn outbound_tasks_chain_in_plan_order() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[
            r#"[{"kind": "send", "id": "a", "message": "first"},
                {"kind": "send", "id": "b", "message": "second"}]"#,
        ]);
        let (mut ctx, transport) = ctx_fixture_with(dir.path(), llm).await;
        transport.add_history(crate::chat::ChatMessage::text_message(42, 2, 2, "hi", Utc::now()));
        let task = seed_received(&mut ctx);

        handle(&ctx, &task).await.unwrap();

        let tasks = graph_tasks(&ctx);
        let sends: Vec<&TaskNode> = tasks.iter().filter(|t| t.kind == "send").collect();
        assert_eq!(sends.len(), 2);
        let first = sends.iter().find(|t| t.param_str("message") == Some("first")).unwrap();
        let second = sends.iter().find(|t| t.param_str("message") == Some("second")).unwrap();
        // The second send's wait depends on the first send.
        let second_wait_id = second
            .depends_on
            .iter()
            .find(|dep| tasks.iter().any(|t| &t.id == *dep && t.is_wait()))
            .unwrap();
        let second_wait = tasks.iter().find(|t| &t.id == second_wait_id).unwrap();
        assert!(second_wait.depends_on.contains(&first.id));
    }

    #[tokio::test]
    async fn retrieval_fetches_then_retries() {
        let dir = tempfile::tempdir().unwrap();
        // First turn asks for the schedule file, the retry turn replies.
        let llm = ScriptedLlm::new(&[
            r#"[{"kind": "retrieve", "urls": ["file:schedule.json"]}]"#,
            r#"[{"kind": "send", "message": "summary"}]"#,
        ]);
        let (mut ctx, transport) = ctx_fixture_with(dir.path(), llm.clone()).await;
        transport.add_history(crate::chat::ChatMessage::text_message(42, 2, 2, "hi", Utc::now()));
        let task = seed_received(&mut ctx);

        // First attempt raises a transient error after fetching.
        let err = handle(&ctx, &task).await.unwrap_err();
        assert!(err.is_retryable());

        {
            let queue = ctx.deps.queue.lock().unwrap();
            let graph = queue.graph(&ctx.graph_id).unwrap();
            assert!(graph.context.fetched_resources.contains_key("file:schedule.json"));
            // A preserve-wait keeps the resource alive across replans.
            assert!(graph
                .tasks
                .iter()
                .any(|t| t.is_wait() && t.preserve()));
        }

        // Retry plans exactly one send.
        handle(&ctx, &task).await.unwrap();
        let tasks = graph_tasks(&ctx);
        assert_eq!(tasks.iter().filter(|t| t.kind == "send").count(), 1);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn already_fetched_urls_do_not_loop() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[
            r#"[{"kind": "retrieve", "urls": ["file:schedule.json"]},
                {"kind": "send", "message": "done"}]"#,
        ]);
        let (mut ctx, transport) = ctx_fixture_with(dir.path(), llm).await;
        transport.add_history(crate::chat::ChatMessage::text_message(42, 2, 2, "hi", Utc::now()));
        let task = seed_received(&mut ctx);

        // Pre-seed the resource as already fetched.
        {
            let mut queue = ctx.deps.queue.lock().unwrap();
            let graph = queue.graph_mut(&ctx.graph_id).unwrap();
            graph
                .context
                .fetched_resources
                .insert("file:schedule.json".into(), "{}".into());
        }

        // No retry: the send goes straight through.
        handle(&ctx, &task).await.unwrap();
        let tasks = graph_tasks(&ctx);
        assert_eq!(tasks.iter().filter(|t| t.kind == "send").count(), 1);
    }

    #[tokio::test]
    async fn immediate_tasks_run_inline_and_are_elided() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[
            r#"[{"kind": "think", "content": "they sound cheerful"},
                {"kind": "remember", "id": "m1", "content": "likes hiking"},
                {"kind": "send", "message": "nice!"}]"#,
        ]);
        let (mut ctx, transport) = ctx_fixture_with(dir.path(), llm).await;
        transport.add_history(crate::chat::ChatMessage::text_message(42, 2, 2, "hi", Utc::now()));
        let task = seed_received(&mut ctx);

        handle(&ctx, &task).await.unwrap();

        let tasks = graph_tasks(&ctx);
        assert!(!tasks.iter().any(|t| t.kind == "think" || t.kind == "remember"));
        assert_eq!(tasks.iter().filter(|t| t.kind == "send").count(), 1);
        // The memory landed in storage.
        let memories = ctx
            .deps
            .storage
            .list_entries(EntryTable::Memories, 1, None)
            .await
            .unwrap();
        assert_eq!(memories.len(), 1);
    }

    #[tokio::test]
    async fn own_channel_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::empty();
        let (mut ctx, _transport) = ctx_fixture_with(dir.path(), llm.clone()).await;
        ctx.channel_id = 1; // same as agent id
        let task = TaskNode::new("received", Params::new());
        handle(&ctx, &task).await.unwrap();
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn partner_typing_requeues_behind_wait() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::empty();
        let (mut ctx, _transport) = ctx_fixture_with(dir.path(), llm.clone()).await;
        let task = seed_received(&mut ctx);
        // Mark the received task active in the graph, as the tick would.
        {
            let mut queue = ctx.deps.queue.lock().unwrap();
            let graph = queue.graph_mut(&ctx.graph_id).unwrap();
            graph.get_mut(&task.id).unwrap().status = TaskStatus::Active;
        }
        ctx.deps
            .typing
            .mark_partner_typing(1, 2, ctx.deps.clock.now());

        handle(&ctx, &task).await.unwrap();

        // No model call; the task is pending again behind a fresh wait.
        assert_eq!(llm.call_count(), 0);
        let queue = ctx.deps.queue.lock().unwrap();
        let graph = queue.graph(&ctx.graph_id).unwrap();
        let received = graph.get(&task.id).unwrap();
        assert_eq!(received.status, TaskStatus::Pending);
        assert!(received
            .depends_on
            .iter()
            .any(|dep| graph.get(dep).is_some_and(|t| t.is_wait())));
    }

    #[tokio::test]
    async fn asleep_agent_skips_the_turn() {
        use crate::agent::testing::{agent_fixture_with_definition, test_definition};
        use crate::chat::testing::RecordingTransport;

        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::empty();
        let mut definition = test_definition("Wendy");
        definition.daily_schedule_description = Some("Sleeps at night.".into());
        let (agent, deps) =
            agent_fixture_with_definition(dir.path(), llm.clone(), definition).await;
        agent.set_transport(std::sync::Arc::new(RecordingTransport::new(1)));
        let mut ctx = HandlerCtx {
            agent,
            deps,
            graph_id: String::new(),
            agent_id: 1,
            channel_id: 2,
            is_group_chat: false,
        };

        let now = ctx.deps.clock.now();
        let mut schedule = crate::schedule::Schedule::new("UTC");
        schedule
            .upsert_activity(crate::schedule::ScheduleActivity {
                id: "sleep".into(),
                start_time: now - chrono::Duration::hours(1),
                end_time: now + chrono::Duration::hours(7),
                activity_name: "sleeping".into(),
                description: String::new(),
            })
            .unwrap();
        ctx.deps.storage.save_schedule(1, &schedule, now).await.unwrap();

        let task = seed_received(&mut ctx);
        handle(&ctx, &task).await.unwrap();

        // The gate short-circuits before any model call or planning.
        assert_eq!(llm.call_count(), 0);
        let tasks = graph_tasks(&ctx);
        assert!(tasks.iter().all(|t| t.is_received()));
    }

    #[tokio::test]
    async fn typing_delay_scales_with_text_length() {
        let mut params = Params::new();
        params.insert("message".into(), Value::from("x".repeat(250)));
        let long = TaskNode::new("send", params);
        assert_eq!(typing_delay_secs(&long), 10);

        let mut params = Params::new();
        params.insert("message".into(), Value::from("hi"));
        let short = TaskNode::new("send", params);
        assert_eq!(typing_delay_secs(&short), 2);

        let sticker = TaskNode::new("sticker", Params::new());
        assert_eq!(typing_delay_secs(&sticker), 2);

        let mut params = Params::new();
        params.insert("message".into(), Value::from("y".repeat(10_000)));
        let huge = TaskNode::new("send", params);
        assert_eq!(typing_delay_secs(&huge), 30);
    }

    #[tokio::test]
    async fn malformed_reply_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&["this is not json"]);
        let (mut ctx, transport) = ctx_fixture_with(dir.path(), llm).await;
        transport.add_history(crate::chat::ChatMessage::text_message(42, 2, 2, "hi", Utc::now()));
        let task = seed_received(&mut ctx);

        let err = handle(&ctx, &task).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn graph_context_default_builds() {
        // Guard: the context used by the pipeline round-trips.
        let graph = TaskGraph::new(GraphContext {
            agent_id: 1,
            channel_id: 2,
            ..Default::default()
        });
        assert!(graph.is_complete());
    }
}
