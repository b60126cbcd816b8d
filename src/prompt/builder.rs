//! Specific-instructions logic and full system prompt assembly.

use crate::MessageId;
use crate::chat::ChatMessage;

/// Signals that decide which specific-instructions variant leads (and
/// closes) the system prompt.
#[derive(Debug, Default)]
pub struct SpecificSignals<'a> {
    pub is_conversation_start: bool,
    pub xsend_intent: Option<&'a str>,
    pub target_message_id: Option<MessageId>,
    pub reaction_message_ids: &'a [MessageId],
}

/// Conversation-start detection: short visible history, nothing from the
/// agent, and nothing already summarized.
pub fn is_conversation_start(
    messages: &[ChatMessage],
    highest_summarized_id: Option<MessageId>,
) -> bool {
    if let Some(summarized) = highest_summarized_id {
        if messages.iter().any(|m| m.id <= summarized) {
            return false;
        }
    }
    if messages.len() >= 5 {
        return false;
    }
    !messages.iter().any(|m| m.outgoing)
}

/// The "# Instruction" block. Cross-channel intents outrank the start-of-
/// conversation variant; a fresh target message outranks reactions.
pub fn build_specific_instructions(signals: &SpecificSignals<'_>) -> String {
    let mut text = String::from(
        "\n# Instruction\n\n\
         You are acting as a user participating in chats on Telegram.\n\
         Your response should take into account the following:\n\n",
    );
    let mut any = false;

    if let Some(intent) = signals.xsend_intent {
        text.push_str(
            "## Cross-channel Trigger (`xsend`)\n\n\
             Begin your response with a `think` task, and react to the following intent,\n\
             which was sent by you from another channel as an instruction *to yourself*.\n\n",
        );
        text.push_str(&format!("```\n{intent}\n```\n"));
        any = true;
    }

    if signals.is_conversation_start && !any {
        text.push_str(
            "## New Conversation\n\n\
             This is the start of a new conversation.\n\
             Follow the instructions in the section `## Start Of Conversation`.\n",
        );
        any = true;
    }

    if let Some(message_id) = signals.target_message_id {
        text.push_str(&format!(
            "## Target Message\n\n\
             You are looking at this conversation because the message \
             with message_id {message_id} was newly received.\n\
             React to it if appropriate.\n"
        ));
        any = true;
    } else if !signals.reaction_message_ids.is_empty() {
        if signals.reaction_message_ids.len() == 1 {
            text.push_str(&format!(
                "## Reaction Received\n\n\
                 Someone reacted to your message with message_id {}.\n\
                 Consider responding to acknowledge the reaction or continue the conversation.\n",
                signals.reaction_message_ids[0]
            ));
        } else {
            let ids = signals
                .reaction_message_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!(
                "## Multiple Reactions Received\n\n\
                 People reacted to {} of your messages (message_ids: {ids}).\n\
                 Consider responding to acknowledge the reactions or continue the conversation.\n",
                signals.reaction_message_ids.len()
            ));
        }
        any = true;
    }

    if !any {
        text.push_str(
            "## Conversation Continuation\n\n\
             You are looking at this conversation and might need to continue it.\n\
             React to it if appropriate.\n",
        );
    }

    text
}

/// All prompt sections in assembly order. The specific instructions are
/// repeated at the end to anchor the model's latest-context attention.
#[derive(Debug, Default)]
pub struct PromptSections {
    pub specific_instructions: String,
    pub provider_prompt: String,
    pub agent_instructions: String,
    pub role_prompts: Vec<String>,
    pub sticker_catalog: Option<String>,
    pub media_catalog: Option<String>,
    pub memories: Option<String>,
    pub current_time: String,
    pub current_activity: Option<String>,
    pub channel_details: Option<String>,
    pub summary: Option<String>,
}

impl PromptSections {
    pub fn assemble(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.push(&self.specific_instructions);
        parts.push(&self.provider_prompt);
        parts.push(&self.agent_instructions);
        for role in &self.role_prompts {
            parts.push(role);
        }
        for optional in [
            &self.sticker_catalog,
            &self.media_catalog,
            &self.memories,
        ] {
            if let Some(section) = optional.as_deref() {
                parts.push(section);
            }
        }
        parts.push(&self.current_time);
        for optional in [&self.current_activity, &self.channel_details, &self.summary] {
            if let Some(section) = optional.as_deref() {
                parts.push(section);
            }
        }
        parts.push(&self.specific_instructions);

        parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
