//! Pre-processing agents that run ahead of engine routing.

pub mod extraction;
pub mod generic;
pub mod intent;
pub mod planner;
pub mod rewriter;

use crate::llm::ChatMessage;
use crate::models::TurnMessage;

/// Convert recent conversation history into provider-neutral messages.
/// Only user/assistant turns are forwarded.
pub fn history_messages(history: &[TurnMessage], last_n: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(last_n);
    history[start..]
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> TurnMessage {
        TurnMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn test_history_window_and_role_filter() {
        let history = vec![
            turn("user", "one"),
            turn("assistant", "two"),
            turn("system", "hidden"),
            turn("user", "three"),
        ];
        let messages = history_messages(&history, 3);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "two");
        assert_eq!(messages[1].content, "three");
    }
}
