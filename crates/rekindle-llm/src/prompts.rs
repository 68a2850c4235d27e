//! Prompt builders for the analysis calls, plus a tolerant extractor for the
//! JSON objects the model is asked to reply with.

use rekindle_common::ChatTurn;

/// Render turns as `role: content` lines, oldest first.
pub fn conversation_text(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn personality_analysis_prompt(
    current_personality: Option<&str>,
    message_count: u64,
    summary: Option<&str>,
    turns: &[ChatTurn],
) -> String {
    format!(
        r#"You are analyzing a chat conversation to determine if the AI agent's personality should be updated.

Current personality prompt: "{current}"
Message count: {message_count}
Session summary: {summary}

Recent conversation:
{conversation}

Based on this conversation, analyze:
1. Is the current personality appropriate for the user's needs?
2. What communication style does the user prefer? (formal/casual, detailed/concise, etc.)
3. Are there any patterns in the conversation that suggest a different personality would work better?
4. Would updating the personality improve the user experience?

Consider:
- User's language style and formality
- Topics being discussed
- Level of detail the user prefers
- Whether the user seems satisfied with current responses
- Consistency of conversation topics

Respond ONLY with a JSON object in this exact format:
{{"should_update": true/false, "reason": "explanation", "suggested_personality": "new personality prompt or null", "confidence": 0.0-1.0}}

The suggested_personality should be a clear, concise prompt that describes how the AI should behave."#,
        current = current_personality.unwrap_or("(none)"),
        summary = summary.unwrap_or("(none)"),
        conversation = conversation_text(turns),
    )
}

pub fn proactive_decision_prompt(
    summary: Option<&str>,
    message_count: u64,
    minutes_inactive: f64,
    turns: &[ChatTurn],
) -> String {
    format!(
        r#"You are analyzing a chat conversation to decide whether the AI should proactively continue the conversation.

Current summary: {summary}
Message count: {message_count}
Minutes inactive: {minutes_inactive:.1}

Recent conversation:
{conversation}

Based on this information, decide whether the AI should:
1. 'continue' - proactively continue the current topic with a relevant follow-up
2. 'new_topic' - suggest starting a new related topic
3. 'wait' - wait for the user to respond

Consider:
- Is the conversation at a natural stopping point?
- Are there unanswered questions or incomplete thoughts?
- Would a follow-up add value or feel pushy?

Respond ONLY with a JSON object in this exact format:
{{"action": "continue|new_topic|wait", "reason": "brief explanation", "suggested_message": "message to send or null"}}"#,
        summary = summary.unwrap_or("(none)"),
        conversation = conversation_text(turns),
    )
}

pub fn summary_prompt(existing_summary: Option<&str>, turns: &[ChatTurn]) -> String {
    match existing_summary {
        Some(existing) => format!(
            r#"You are summarizing a chat conversation. The previous summary was:
"{existing}"

New messages since then:
{conversation}

Please provide an updated summary (1-2 sentences, max 100 characters) that captures the main topic of the conversation. Return only the summary text, nothing else."#,
            conversation = conversation_text(turns),
        ),
        None => format!(
            r#"You are summarizing a chat conversation. Here are the messages:
{conversation}

Please provide a brief summary (1-2 sentences, max 100 characters) that captures the main topic of the conversation. Return only the summary text, nothing else."#,
            conversation = conversation_text(turns),
        ),
    }
}

/// Pull the first JSON object out of a completion. Models wrap their answer
/// in code fences or prose often enough that strict parsing is a losing game.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed)
        && value.is_object()
    {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<serde_json::Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rekindle_common::{ChatTurn, SessionId};

    fn turns() -> Vec<ChatTurn> {
        let session = SessionId::new();
        vec![
            ChatTurn::user(session.clone(), "can you keep answers shorter?"),
            ChatTurn::assistant(session, "Sure, will do."),
        ]
    }

    #[test]
    fn conversation_text_renders_roles_in_order() {
        let text = conversation_text(&turns());
        assert_eq!(
            text,
            "user: can you keep answers shorter?\nassistant: Sure, will do."
        );
    }

    #[test]
    fn personality_prompt_embeds_context() {
        let prompt =
            personality_analysis_prompt(Some("Be verbose."), 24, Some("style chat"), &turns());
        assert!(prompt.contains("Current personality prompt: \"Be verbose.\""));
        assert!(prompt.contains("Message count: 24"));
        assert!(prompt.contains("Session summary: style chat"));
        assert!(prompt.contains("\"should_update\""));
    }

    #[test]
    fn proactive_prompt_formats_minutes() {
        let prompt = proactive_decision_prompt(None, 10, 42.25, &turns());
        assert!(prompt.contains("Minutes inactive: 42.2"));
        assert!(prompt.contains("Current summary: (none)"));
        assert!(prompt.contains("'new_topic'"));
    }

    #[test]
    fn extract_json_object_parses_bare_json() {
        let value = extract_json_object(r#"{"should_update": false}"#).unwrap();
        assert_eq!(value["should_update"], false);
    }

    #[test]
    fn extract_json_object_strips_fences_and_prose() {
        let text = "Here is my analysis:\n```json\n{\"action\": \"continue\", \"reason\": \"open question\"}\n```\nHope that helps!";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["action"], "continue");
    }

    #[test]
    fn extract_json_object_rejects_non_objects() {
        assert!(extract_json_object("just some text").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("{broken").is_none());
    }
}
