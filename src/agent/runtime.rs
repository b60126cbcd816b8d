//! Per-agent event loop: connect, subscribe, scan, handle updates.

use super::incoming::handle_incoming_message;
use super::scan::scan_unread_messages;
use super::{Agent, AgentDeps};
use crate::chat::{ChatEvent, ChatTransport as _};
use crate::error::ChatError;
use futures::StreamExt as _;
use sha2::{Digest as _, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause before retrying a failed authentication; the admin console may
/// log the agent in out-of-band meanwhile.
const AUTH_RETRY: Duration = Duration::from_secs(30);

/// Pause before reconnecting after a dropped transport.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Deterministic 0–5 s offset from the agent name, spreading API bursts
/// when many agents start at once.
pub fn stagger_delay(agent_name: &str) -> Duration {
    let digest = Sha256::digest(agent_name.as_bytes());
    let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    Duration::from_millis(u64::from(word % 5000))
}

/// Drive one agent until it is disabled: authenticate, subscribe, scan,
/// and consume updates, reconnecting forever on failure.
pub async fn run_agent_loop(agent: Arc<Agent>, deps: AgentDeps) {
    info!(agent = %agent.name(), "agent runtime starting");
    loop {
        if agent.is_disabled() {
            info!(agent = %agent.name(), "agent disabled; runtime exiting");
            if let Some(transport) = agent.transport() {
                let _ = transport.disconnect().await;
            }
            agent.clear_transport_and_caches();
            return;
        }

        // (Re)connect when we have no live transport.
        let transport = match agent.transport().filter(|t| t.is_connected()) {
            Some(transport) => transport,
            None => {
                agent.clear_transport_and_caches();
                match deps
                    .connector
                    .connect(
                        agent.name(),
                        &agent.definition.phone,
                        &deps.config.sessions_dir(),
                    )
                    .await
                {
                    Ok(transport) => {
                        agent.set_transport(transport.clone());
                        info!(
                            agent = %agent.name(),
                            agent_id = transport.self_id(),
                            "authenticated"
                        );
                        transport
                    }
                    Err(ChatError::NotAuthorized) => {
                        debug!(
                            agent = %agent.name(),
                            "not authenticated yet; retrying in {}s",
                            AUTH_RETRY.as_secs()
                        );
                        deps.clock.sleep(AUTH_RETRY).await;
                        continue;
                    }
                    Err(error) => {
                        warn!(agent = %agent.name(), %error, "connect failed");
                        deps.clock.sleep(AUTH_RETRY).await;
                        continue;
                    }
                }
            }
        };

        let mut events = match transport.subscribe().await {
            Ok(events) => events,
            Err(error) => {
                warn!(agent = %agent.name(), %error, "subscribe failed");
                agent.clear_transport_and_caches();
                deps.clock.sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };

        // Stagger the initial sweep so a fleet start does not flood the
        // API with parallel history requests.
        deps.clock.sleep(stagger_delay(agent.name())).await;
        if agent.is_disabled() {
            continue;
        }
        if let Err(error) = scan_unread_messages(&agent, &deps).await {
            warn!(agent = %agent.name(), %error, "initial scan failed");
        }

        // Consume updates until the stream ends or the agent is disabled.
        loop {
            if agent.is_disabled() {
                break;
            }
            match events.next().await {
                Some(ChatEvent::NewMessage(message)) => {
                    if let Err(error) = handle_incoming_message(&agent, &deps, message).await {
                        warn!(agent = %agent.name(), %error, "incoming message handling failed");
                    }
                }
                Some(ChatEvent::PartnerTyping { user_id }) => {
                    if let Some(agent_id) = agent.agent_id() {
                        if user_id != agent_id {
                            deps.typing
                                .mark_partner_typing(agent_id, user_id, deps.clock.now());
                        }
                    }
                }
                Some(ChatEvent::DialogsChanged) => {
                    debug!(agent = %agent.name(), "dialog update; rescanning");
                    if let Err(error) = scan_unread_messages(&agent, &deps).await {
                        warn!(agent = %agent.name(), %error, "rescan failed");
                    }
                }
                Some(ChatEvent::Disconnected) | None => {
                    warn!(
                        agent = %agent.name(),
                        "transport disconnected; reconnecting in {}s",
                        RECONNECT_BACKOFF.as_secs()
                    );
                    break;
                }
            }
        }

        agent.clear_transport_and_caches();
        deps.clock.sleep(RECONNECT_BACKOFF).await;
    }
}

/// Periodic scan across all agents, staggered per agent.
pub async fn run_periodic_scan(deps: AgentDeps, interval: Duration) {
    deps.clock.sleep(interval / 9).await;
    loop {
        for agent in deps.registry.all() {
            if agent.is_disabled() {
                continue;
            }
            let connected = agent
                .transport()
                .map(|t| t.is_connected())
                .unwrap_or(false);
            if !connected {
                continue;
            }
            deps.clock.sleep(stagger_delay(agent.name())).await;
            if let Err(error) = scan_unread_messages(agent, &deps).await {
                warn!(agent = %agent.name(), %error, "periodic scan failed");
            }
        }
        deps.clock.sleep(interval).await;
    }
}
