//! Transcript pruning between tool-calling iterations.
//!
//! A long tool session appends two messages per call (the assistant message
//! carrying the calls and the tool-role replies), so the transcript grows
//! linearly with tool use. Pruning keeps:
//!
//! 1. the system prompt (index 0),
//! 2. every message preceding the first assistant-with-tool-calls message
//!    (the untouched conversational prefix),
//! 3. the last `keep_exchanges` complete exchanges, where one exchange is an
//!    assistant-with-tool-calls message together with everything up to the
//!    next one (its tool-role replies).
//!
//! A tool-role reply is never dropped without its paired assistant message;
//! providers reject orphan tool replies.

use chadbot_core::chat::ChatMessage;

/// Prunes `messages` in place, keeping the conversational prefix and the
/// last `keep_exchanges` tool exchanges. No-op while the transcript holds
/// `keep_exchanges` or fewer exchanges.
pub fn prune_history(messages: &mut Vec<ChatMessage>, keep_exchanges: usize) {
    // Indices of every assistant-with-tool-calls message; each starts one
    // exchange that runs until the next start (or the end).
    let starts: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.has_tool_calls())
        .map(|(i, _)| i)
        .collect();

    if starts.len() <= keep_exchanges {
        return;
    }

    let prefix_end = starts[0];
    let keep_from = starts[starts.len() - keep_exchanges];
    messages.drain(prefix_end..keep_from);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chadbot_core::chat::{Role, ToolCall};

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "noop".into(),
            arguments: Default::default(),
        }
    }

    /// system + user, then `n` exchanges of one call each.
    fn transcript(n: usize) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system("preamble"),
            ChatMessage::user("question"),
        ];
        for i in 0..n {
            let id = format!("t{i}");
            messages.push(ChatMessage::assistant_with_calls("", vec![call(&id)]));
            messages.push(ChatMessage::tool(format!("result {i}"), id));
        }
        messages
    }

    fn assert_no_orphan_tools(messages: &[ChatMessage]) {
        for (i, m) in messages.iter().enumerate() {
            if m.role == Role::Tool {
                let paired = messages[..i].iter().any(|prev| {
                    prev.has_tool_calls()
                        && prev
                            .tool_calls
                            .iter()
                            .any(|c| Some(&c.id) == m.tool_call_id.as_ref())
                });
                assert!(paired, "tool reply at {i} lost its assistant message");
            }
        }
    }

    #[test]
    fn under_threshold_is_untouched() {
        let mut messages = transcript(3);
        let before = messages.clone();
        prune_history(&mut messages, 10);
        assert_eq!(messages, before);
    }

    #[test]
    fn keeps_prefix_and_last_exchanges() {
        let mut messages = transcript(15);
        prune_history(&mut messages, 10);

        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        // 2 prefix messages + 10 exchanges of 2 messages each.
        assert_eq!(messages.len(), 22);
        // The surviving exchanges are the most recent ones.
        assert_eq!(messages[2].tool_calls[0].id, "t5");
        assert_eq!(messages.last().unwrap().content, "result 14");
        assert_no_orphan_tools(&messages);
    }

    #[test]
    fn multi_call_exchanges_stay_paired() {
        let mut messages = vec![ChatMessage::system("p"), ChatMessage::user("q")];
        for i in 0..5 {
            let a = format!("a{i}");
            let b = format!("b{i}");
            messages.push(ChatMessage::assistant_with_calls("", vec![call(&a), call(&b)]));
            messages.push(ChatMessage::tool("ra", a));
            messages.push(ChatMessage::tool("rb", b));
        }
        prune_history(&mut messages, 2);

        // 2 prefix + 2 exchanges of 3.
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[0].role, Role::System);
        assert_no_orphan_tools(&messages);
    }

    #[test]
    fn transcript_without_tool_calls_is_untouched() {
        let mut messages = vec![
            ChatMessage::system("p"),
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
        ];
        let before = messages.clone();
        prune_history(&mut messages, 0);
        assert_eq!(messages, before);
    }
}
