//! Non-streaming extraction of `function_calls` XML from a completed assistant message.

use std::collections::HashMap;

use serde_json::Value;

/// A single parsed tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    /// Tool name, as written inside `<tool>`.
    pub name: String,
    /// Argument key/value pairs, each value coerced to JSON where possible.
    pub args: HashMap<String, Value>,
}

/// Repeatedly strips balanced `<think>…</think>` spans, tracking nesting depth so inner
/// `<think>` tags don't confuse the scan. An unterminated `<think>` at the tail is left
/// intact (its depth never returns to zero). Used only to produce a parsing view of the
/// text — never returned to the client.
pub fn strip_think(text: &str) -> String {
    let mut out = text.to_string();

    loop {
        let Some(start) = out.find("<think>") else { break };

        let mut pos = start + 7;
        let mut depth: i32 = 1;

        while pos < out.len() && depth > 0 {
            if out[pos..].starts_with("<think>") {
                depth += 1;
                pos += 7;
            } else if out[pos..].starts_with("</think>") {
                depth -= 1;
                pos += 8;
            } else {
                let ch_len = out[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
                pos += ch_len;
            }
        }

        if depth == 0 {
            out = format!("{}{}", &out[..start], &out[pos..]);
        } else {
            break;
        }
    }

    out
}

/// Extracts the first lazy match of `<tag>...</tag>` starting at or after `from`, returning
/// the inner content and the byte offset just past the closing tag.
fn extract_tag<'a>(haystack: &'a str, tag: &str, from: usize) -> Option<(&'a str, usize)> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let start = haystack[from..].find(open.as_str())? + from + open.len();
    let end = haystack[start..].find(close.as_str())? + start;

    Some((&haystack[start..end], end + close.len()))
}

/// Extracts every `<key>value</key>` pair inside `args_content`, where `key` is any run of
/// characters excluding whitespace, `>`, and `/` (admitting hyphen-prefixed keys like `-i`),
/// and the closing tag must repeat the same key text. Rust's `regex` crate has no
/// backreferences, so this pairing is hand-scanned rather than expressed as one pattern.
/// Later occurrences of a duplicate key override earlier ones.
fn extract_arg_pairs(args_content: &str) -> HashMap<String, Value> {
    let mut args = HashMap::new();
    let bytes = args_content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        let Some(tag_end) = args_content[i + 1..].find('>').map(|p| p + i + 1) else {
            break;
        };

        let tag = &args_content[i + 1..tag_end];
        if tag.is_empty() || tag.contains(char::is_whitespace) || tag.contains('/') {
            i += 1;
            continue;
        }

        let close_tag = format!("</{tag}>");
        let value_start = tag_end + 1;
        let Some(close_offset) = args_content[value_start..].find(close_tag.as_str()) else {
            i += 1;
            continue;
        };

        let value = &args_content[value_start..value_start + close_offset];
        args.insert(tag.to_string(), coerce_value(value));

        i = value_start + close_offset + close_tag.len();
    }

    args
}

/// Attempts to decode `value` as JSON; falls back to the raw string on failure.
fn coerce_value(value: &str) -> Value {
    serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

/// Computes the text a client should see once a completed assistant message has yielded a
/// tool call: everything before the last sentinel occurrence outside a `<think>` span,
/// trimmed of trailing whitespace. Only meaningful once [`parse_function_calls`] has already
/// confirmed such an occurrence exists; falls back to `text` unchanged otherwise.
pub fn visible_prefix(text: &str, sentinel: &str) -> String {
    let mut depth: u32 = 0;
    let mut last_at = None;
    let mut idx = 0;

    while idx < text.len() {
        let rest = &text[idx..];

        if rest.starts_with("<think>") {
            depth += 1;
            idx += "<think>".len();
            continue;
        }
        if rest.starts_with("</think>") {
            depth = depth.saturating_sub(1);
            idx += "</think>".len();
            continue;
        }
        if depth == 0 && rest.starts_with(sentinel) {
            last_at = Some(idx);
            idx += sentinel.len();
            continue;
        }

        let ch_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        idx += ch_len;
    }

    match last_at {
        Some(pos) => text[..pos].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Recovers the tool calls the model emitted, given the full assistant text and the process's
/// trigger sentinel. Returns `None` if the sentinel is absent, if no `<function_calls>` block
/// follows the last sentinel occurrence, or if every call block inside it lacks a `<tool>` tag.
pub fn parse_function_calls(text: &str, sentinel: &str) -> Option<Vec<ParsedCall>> {
    if !text.contains(sentinel) {
        return None;
    }

    let cleaned = strip_think(text);

    let last_signal = cleaned.rmatch_indices(sentinel).next()?.0;
    let after_signal = &cleaned[last_signal..];

    let (calls_block, _) = extract_tag(after_signal, "function_calls", 0)?;

    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some((call_block, next)) = extract_tag(calls_block, "function_call", cursor) {
        cursor = next;

        let Some((name, _)) = extract_tag(call_block, "tool", 0) else {
            continue;
        };

        let args = match extract_tag(call_block, "args", 0) {
            Some((args_content, _)) => extract_arg_pairs(args_content),
            None => HashMap::new(),
        };

        calls.push(ParsedCall { name: name.trim().to_string(), args });
    }

    if calls.is_empty() { None } else { Some(calls) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "<Function_Ab12_Start/>";

    #[test]
    fn absent_sentinel_returns_none() {
        assert_eq!(parse_function_calls("just text", SENTINEL), None);
    }

    #[test]
    fn single_call_extracted() {
        let text = format!(
            "Sure, let me check.\n{SENTINEL}\n<function_calls><function_call><tool>get_weather</tool><args><city>\"nyc\"</city></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].args.get("city"), Some(&Value::String("nyc".to_string())));
    }

    #[test]
    fn multiple_calls_preserve_order() {
        let text = format!(
            "{SENTINEL}<function_calls><function_call><tool>a</tool><args></args></function_call><function_call><tool>b</tool><args></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn only_last_sentinel_counts() {
        let text = format!(
            "thinking about {SENTINEL} earlier\n{SENTINEL}<function_calls><function_call><tool>real</tool><args></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "real");
    }

    #[test]
    fn sentinel_inside_think_block_is_stripped_before_search() {
        let text = format!(
            "<think>{SENTINEL} don't call anything</think>{SENTINEL}<function_calls><function_call><tool>x</tool><args></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "x");
    }

    #[test]
    fn missing_tool_tag_skips_block_silently() {
        let text = format!(
            "{SENTINEL}<function_calls><function_call><args></args></function_call><function_call><tool>ok</tool><args></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn duplicate_arg_key_last_wins() {
        let text = format!(
            "{SENTINEL}<function_calls><function_call><tool>f</tool><args><x>1</x><x>2</x></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls[0].args.get("x"), Some(&Value::Number(2.into())));
    }

    #[test]
    fn hyphenated_arg_keys_are_supported() {
        let text = format!(
            "{SENTINEL}<function_calls><function_call><tool>grep</tool><args><-i>true</-i><-C>\"3\"</-C></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls[0].args.get("-i"), Some(&Value::Bool(true)));
        assert_eq!(calls[0].args.get("-C"), Some(&Value::String("3".to_string())));
    }

    #[test]
    fn non_json_value_stays_a_string() {
        let text = format!(
            "{SENTINEL}<function_calls><function_call><tool>f</tool><args><note>hello world</note></args></function_call></function_calls>"
        );

        let calls = parse_function_calls(&text, SENTINEL).unwrap();
        assert_eq!(calls[0].args.get("note"), Some(&Value::String("hello world".to_string())));
    }

    #[test]
    fn missing_function_calls_block_returns_none() {
        let text = format!("{SENTINEL} but then nothing structured follows");
        assert_eq!(parse_function_calls(&text, SENTINEL), None);
    }

    #[test]
    fn visible_prefix_cuts_at_last_sentinel() {
        let text = format!("Here's the answer.\n\n{SENTINEL}\n<function_calls></function_calls>");
        assert_eq!(visible_prefix(&text, SENTINEL), "Here's the answer.");
    }

    #[test]
    fn visible_prefix_ignores_sentinel_inside_think_block() {
        let text = format!("<think>{SENTINEL} maybe</think>visible text\n{SENTINEL}<function_calls></function_calls>");
        assert_eq!(visible_prefix(&text, SENTINEL), format!("<think>{SENTINEL} maybe</think>visible text"));
    }

    #[test]
    fn visible_prefix_falls_back_to_original_without_sentinel() {
        let text = "no sentinel here";
        assert_eq!(visible_prefix(text, SENTINEL), text);
    }

    #[test]
    fn nested_think_blocks_are_fully_stripped() {
        let text = "<think>outer <think>inner</think> still outer</think>visible";
        assert_eq!(strip_think(text), "visible");
    }

    #[test]
    fn unterminated_think_block_is_left_intact() {
        let text = "before <think>never closed";
        assert_eq!(strip_think(text), text);
    }

    #[test]
    fn think_block_with_multi_byte_characters_does_not_panic() {
        let text = "<think>思考中 🤔 なにか考える</think>visible";
        assert_eq!(strip_think(text), "visible");
    }
}
