//! Folds `tool`-role results and assistant `tool_calls` into plain-text-with-XML turns,
//! since the upstream model has no native concept of either.
//!
//! This runs after the dialect adapter has produced a canonical request and before the
//! prompt injector adds the tool-use instruction, matching the order every message in the
//! conversation was actually produced in: a tool result only makes sense once the turn
//! that asked for tools has already been rewritten the same way in an earlier request.

use serde_json::Value;

use crate::canonical::{CanonicalArguments, CanonicalBlock, CanonicalContent, CanonicalMessage, CanonicalRole};
use crate::id_map::IdMap;

/// Rewrites every message in place, dropping `tool`-role messages that lack the id or
/// content needed to reconstruct a result block.
pub fn rewrite_messages(
    messages: Vec<CanonicalMessage>,
    sentinel: &str,
    id_map: &IdMap,
    convert_developer_to_system: bool,
) -> Vec<CanonicalMessage> {
    messages.into_iter().filter_map(|msg| rewrite_message(msg, sentinel, id_map, convert_developer_to_system)).collect()
}

fn rewrite_message(
    msg: CanonicalMessage,
    sentinel: &str,
    id_map: &IdMap,
    convert_developer_to_system: bool,
) -> Option<CanonicalMessage> {
    match msg.role {
        CanonicalRole::Tool => rewrite_tool_result(msg, id_map),
        CanonicalRole::Assistant if msg.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty()) => {
            Some(rewrite_assistant_tool_calls(msg, sentinel))
        }
        CanonicalRole::Developer if convert_developer_to_system => {
            Some(CanonicalMessage { role: CanonicalRole::System, ..msg })
        }
        _ => Some(msg),
    }
}

fn rewrite_tool_result(msg: CanonicalMessage, id_map: &IdMap) -> Option<CanonicalMessage> {
    let Some(tool_call_id) = msg.tool_call_id.clone() else {
        log::debug!("dropping tool-role message: missing tool_call_id");
        return None;
    };

    let content = content_text(&msg.content);
    if content.is_empty() {
        log::debug!("dropping tool-role message {tool_call_id}: empty content");
        return None;
    }

    let formatted = match id_map.get(&tool_call_id) {
        Some(record) => format!(
            "Tool execution result:\n- Tool name: {}\n- Execution result:\n<tool_result>\n{content}\n</tool_result>",
            record.name
        ),
        None => format!("Tool execution result:\n- Execution result:\n<tool_result>\n{content}\n</tool_result>"),
    };

    Some(CanonicalMessage {
        role: CanonicalRole::User,
        content: CanonicalContent::Text(formatted),
        tool_calls: None,
        tool_call_id: None,
    })
}

fn rewrite_assistant_tool_calls(msg: CanonicalMessage, sentinel: &str) -> CanonicalMessage {
    let tool_calls = msg.tool_calls.unwrap_or_default();
    let prior_text = content_text(&msg.content);

    let mut rendered = String::new();
    if !prior_text.is_empty() {
        rendered.push_str(&prior_text);
        rendered.push_str("\n\n");
    }

    rendered.push_str(sentinel);
    rendered.push_str("\n<function_calls>\n");

    for call in &tool_calls {
        rendered.push_str("<function_call>\n<tool>");
        rendered.push_str(&call.function.name);
        rendered.push_str("</tool>\n<args>\n");
        rendered.push_str(&render_args(&call.function.arguments));
        rendered.push_str("</args>\n</function_call>\n");
    }

    rendered.push_str("</function_calls>");

    CanonicalMessage { role: CanonicalRole::Assistant, content: CanonicalContent::Text(rendered), tool_calls: None, tool_call_id: None }
}

/// Renders arguments as `<key>json_value</key>` pairs. A string that is itself valid JSON
/// is decoded first; one that isn't is wrapped as `{"raw_arguments": "..."}` so at least one
/// key/value pair is always emitted.
fn render_args(args: &CanonicalArguments) -> String {
    let value = match args {
        CanonicalArguments::Value(v) => v.clone(),
        CanonicalArguments::String(s) => serde_json::from_str::<Value>(s).unwrap_or_else(|_| {
            let mut map = serde_json::Map::new();
            map.insert("raw_arguments".to_string(), Value::String(s.clone()));
            Value::Object(map)
        }),
    };

    let Value::Object(map) = value else {
        return String::new();
    };

    let mut out = String::new();
    for (key, val) in map {
        out.push('<');
        out.push_str(&key);
        out.push('>');
        out.push_str(&serde_json::to_string(&val).unwrap_or_default());
        out.push_str("</");
        out.push_str(&key);
        out.push_str(">\n");
    }
    out
}

fn content_text(content: &CanonicalContent) -> String {
    match content {
        CanonicalContent::Text(text) => text.clone(),
        CanonicalContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                CanonicalBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::canonical::{CanonicalFunctionCall, CanonicalToolCall};

    const SENTINEL: &str = "<Function_Ab12_Start/>";

    fn text_msg(role: CanonicalRole, text: &str) -> CanonicalMessage {
        CanonicalMessage { role, content: CanonicalContent::Text(text.to_string()), tool_calls: None, tool_call_id: None }
    }

    #[test]
    fn tool_result_with_no_id_is_dropped() {
        let id_map = IdMap::new(10, Duration::from_secs(60));
        let msg = CanonicalMessage { role: CanonicalRole::Tool, content: CanonicalContent::Text("42".to_string()), tool_calls: None, tool_call_id: None };
        assert!(rewrite_message(msg, SENTINEL, &id_map, true).is_none());
    }

    #[test]
    fn tool_result_is_rewritten_to_user_message_with_name() {
        let id_map = IdMap::new(10, Duration::from_secs(60));
        id_map.store("call_1", "get_weather", json!({"city": "nyc"}), "");

        let msg = CanonicalMessage {
            role: CanonicalRole::Tool,
            content: CanonicalContent::Text("72F and sunny".to_string()),
            tool_calls: None,
            tool_call_id: Some("call_1".to_string()),
        };

        let rewritten = rewrite_message(msg, SENTINEL, &id_map, true).unwrap();
        assert_eq!(rewritten.role, CanonicalRole::User);
        let CanonicalContent::Text(text) = rewritten.content else { panic!("expected text content") };
        assert!(text.contains("get_weather"));
        assert!(text.contains("72F and sunny"));
    }

    #[test]
    fn assistant_tool_calls_render_sentinel_and_xml() {
        let id_map = IdMap::new(10, Duration::from_secs(60));
        let msg = CanonicalMessage {
            role: CanonicalRole::Assistant,
            content: CanonicalContent::Text(String::new()),
            tool_calls: Some(vec![CanonicalToolCall {
                id: "call_1".to_string(),
                function: CanonicalFunctionCall { name: "get_weather".to_string(), arguments: CanonicalArguments::String("{\"city\":\"Paris\"}".to_string()) },
            }]),
            tool_call_id: None,
        };

        let rewritten = rewrite_message(msg, SENTINEL, &id_map, true).unwrap();
        let CanonicalContent::Text(text) = rewritten.content else { panic!("expected text content") };
        assert!(text.contains(SENTINEL));
        assert!(text.contains("<tool>get_weather</tool>"));
        assert!(text.contains("<city>\"Paris\"</city>"));
        assert!(rewritten.tool_calls.is_none());
    }

    #[test]
    fn non_json_string_arguments_wrap_as_raw_arguments() {
        let rendered = render_args(&CanonicalArguments::String("not json".to_string()));
        assert_eq!(rendered, "<raw_arguments>\"not json\"</raw_arguments>\n");
    }

    #[test]
    fn developer_message_converts_to_system_when_enabled() {
        let id_map = IdMap::new(10, Duration::from_secs(60));
        let msg = text_msg(CanonicalRole::Developer, "be terse");
        let rewritten = rewrite_message(msg, SENTINEL, &id_map, true).unwrap();
        assert_eq!(rewritten.role, CanonicalRole::System);
    }

    #[test]
    fn developer_message_passes_through_when_disabled() {
        let id_map = IdMap::new(10, Duration::from_secs(60));
        let msg = text_msg(CanonicalRole::Developer, "be terse");
        let rewritten = rewrite_message(msg, SENTINEL, &id_map, false).unwrap();
        assert_eq!(rewritten.role, CanonicalRole::Developer);
    }

    #[test]
    fn plain_messages_pass_through_unchanged() {
        let id_map = IdMap::new(10, Duration::from_secs(60));
        let msg = text_msg(CanonicalRole::User, "hello");
        let rewritten = rewrite_message(msg, SENTINEL, &id_map, true).unwrap();
        assert_eq!(rewritten.role, CanonicalRole::User);
    }
}
