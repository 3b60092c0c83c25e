//! Turning a conversation into what each model family expects.

use serde::Serialize;

use super::InferenceRequest;
use crate::state::ChatRole;

const BOS: &str = "<s>";
const EOS: &str = "</s>";
const INST_OPEN: &str = "[INST]";
const INST_CLOSE: &str = "[/INST]";

/// Build an instruction-framed prompt for raw text-generation models.
///
/// User turns (and the new message) are wrapped in `[INST] ... [/INST]`;
/// assistant turns pass through as plain text closed by `</s>`.
pub fn instruction_prompt(request: &InferenceRequest) -> String {
    let mut prompt = String::from(BOS);

    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(system.trim());
        prompt.push('\n');
    }

    for msg in &request.history {
        match msg.role {
            ChatRole::User => {
                prompt.push_str(&format!("{} {} {}", INST_OPEN, msg.content, INST_CLOSE));
            }
            ChatRole::Assistant => {
                prompt.push_str(&msg.content);
                prompt.push_str(EOS);
            }
        }
    }

    prompt.push_str(&format!("{} {} {}", INST_OPEN, request.message, INST_CLOSE));
    prompt
}

/// Role-tagged message as sent to chat-style endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

/// Build a role-tagged message list: optional system message, history, new message.
pub fn role_messages(request: &InferenceRequest) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(request.history.len() + 2);

    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push(WireMessage {
            role: "system",
            content: system.trim().to_string(),
        });
    }

    out.extend(request.history.iter().map(|m| WireMessage {
        role: m.role.as_str(),
        content: m.content.clone(),
    }));

    out.push(WireMessage {
        role: ChatRole::User.as_str(),
        content: request.message.clone(),
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::GenerationParams;
    use crate::state::ChatMessage;

    fn request(system: Option<&str>, history: Vec<ChatMessage>, message: &str) -> InferenceRequest {
        InferenceRequest {
            system_prompt: system.map(str::to_string),
            history,
            message: message.to_string(),
            params: GenerationParams::default(),
        }
    }

    #[test]
    fn test_instruction_prompt_first_turn() {
        let req = request(None, vec![], "Hi there");
        assert_eq!(instruction_prompt(&req), "<s>[INST] Hi there [/INST]");
    }

    #[test]
    fn test_instruction_prompt_with_history_and_system() {
        let req = request(
            Some("Be brief."),
            vec![ChatMessage::user("One?"), ChatMessage::assistant("1")],
            "Two?",
        );
        assert_eq!(
            instruction_prompt(&req),
            "<s>Be brief.\n[INST] One? [/INST]1</s>[INST] Two? [/INST]"
        );
    }

    #[test]
    fn test_blank_system_prompt_is_skipped() {
        let req = request(Some("   "), vec![], "x");
        assert_eq!(instruction_prompt(&req), "<s>[INST] x [/INST]");
        assert_eq!(role_messages(&req).len(), 1);
    }

    #[test]
    fn test_role_messages_order() {
        let req = request(
            Some("sys"),
            vec![ChatMessage::user("a"), ChatMessage::assistant("b")],
            "c",
        );
        let roles: Vec<&str> = role_messages(&req).iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(role_messages(&req).last().unwrap().content, "c");
    }
}
