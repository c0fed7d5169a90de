//! Builds the tool-use instruction preamble and the per-process trigger sentinel that
//! together retrofit function calling onto a model with no native support for it.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::Value;

use crate::canonical::{CanonicalContent, CanonicalFunction, CanonicalMessage, CanonicalRole, CanonicalRequest, CanonicalTool, CanonicalToolChoice, CanonicalToolChoiceMode};

const DEFAULT_TEMPLATE: &str = "\
You have access to the following tools. When, and only when, you need to call one or more \
of them, emit the trigger signal below verbatim on its own line, immediately followed by a \
`<function_calls>` block, and write nothing after `</function_calls>`.

Trigger signal: {trigger_signal}

Format:
{trigger_signal}
<function_calls>
<function_call>
<tool>tool_name</tool>
<args>
<param_name>value</param_name>
</args>
</function_call>
</function_calls>

Include more than one <function_call> block inside the same <function_calls> block if you
need to call more than one tool in this turn. Never call a tool whose result already
appears earlier in this conversation as a tool execution result.

Available tools:

{tools_list}
";

/// Generates a fresh per-process trigger sentinel: `<Function_XXXX_Start/>`, where `XXXX`
/// is four characters drawn from `[A-Za-z0-9]`. Regenerated once per process start so a
/// client can never predict or pre-seed the signal the model is instructed to emit.
pub fn generate_sentinel() -> String {
    let suffix: String = rand::rng().sample_iter(Alphanumeric).take(4).map(char::from).collect();
    format!("<Function_{suffix}_Start/>")
}

/// Inserts the tool-use instruction as the first message of the request and clears `tools`
/// / `tool_choice`, which have no meaning on the upstream's native wire format once the
/// instruction has taken their place. A no-op when `tools` is absent or empty.
pub fn inject(request: &mut CanonicalRequest, sentinel: &str, optimize_prompt: bool, custom_template: Option<&str>) {
    let Some(tools) = request.tools.take() else { return };
    if tools.is_empty() {
        return;
    }

    let mut instruction = render(&tools, sentinel, optimize_prompt, custom_template);
    if let Some(suffix) = tool_choice_suffix(request.tool_choice.as_ref()) {
        instruction.push_str(&suffix);
    }
    request.tool_choice = None;

    request.messages.insert(
        0,
        CanonicalMessage { role: CanonicalRole::System, content: CanonicalContent::Text(instruction), tool_calls: None, tool_call_id: None },
    );
}

/// Renders the full instruction text for a fixed set of tools and sentinel, substituting
/// `{tools_list}` and `{trigger_signal}` into `custom_template` if given, else the default.
pub fn render(tools: &[CanonicalTool], sentinel: &str, optimize_prompt: bool, custom_template: Option<&str>) -> String {
    let template = custom_template.unwrap_or(DEFAULT_TEMPLATE);
    let tools_list = render_tool_list(tools, optimize_prompt);
    template.replace("{tools_list}", &tools_list).replace("{trigger_signal}", sentinel)
}

fn tool_choice_suffix(choice: Option<&CanonicalToolChoice>) -> Option<String> {
    match choice {
        Some(CanonicalToolChoice::Mode(CanonicalToolChoiceMode::None)) => Some("\nDo not call any tool this turn.".to_string()),
        Some(CanonicalToolChoice::Specific { function }) => {
            Some(format!("\nYou must call only the tool named `{}` this turn.", function.name))
        }
        Some(CanonicalToolChoice::Mode(CanonicalToolChoiceMode::Auto | CanonicalToolChoiceMode::Required)) | None => None,
    }
}

fn render_tool_list(tools: &[CanonicalTool], optimize: bool) -> String {
    tools.iter().map(|t| render_tool(&t.function, optimize)).collect::<Vec<_>>().join("\n\n")
}

fn render_tool(function: &CanonicalFunction, optimize: bool) -> String {
    if optimize { render_tool_condensed(function) } else { render_tool_detailed(function) }
}

fn render_tool_condensed(function: &CanonicalFunction) -> String {
    let names: Vec<&str> =
        function.parameters.get("properties").and_then(Value::as_object).map(|p| p.keys().map(String::as_str).collect()).unwrap_or_default();

    format!("- {}({}): {}", function.name, names.join(", "), function.description)
}

fn render_tool_detailed(function: &CanonicalFunction) -> String {
    let mut out = format!("### {}\n{}\n", function.name, function.description);

    let properties = function.parameters.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = function
        .parameters
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(props) = properties else {
        out.push_str("Parameters: none\n");
        return out;
    };

    let summary: Vec<String> = props
        .iter()
        .map(|(name, schema)| format!("{name} ({})", schema.get("type").and_then(Value::as_str).unwrap_or("any")))
        .collect();
    out.push_str(&format!("Parameters: {}\n", summary.join(", ")));

    if !required.is_empty() {
        out.push_str(&format!("Required: {}\n", required.join(", ")));
    }

    for (name, schema) in props {
        out.push_str(&render_param_detail(name, schema, required.contains(&name.as_str())));
    }

    out
}

fn render_param_detail(name: &str, schema: &Value, required: bool) -> String {
    let mut line = format!("- {name}:");

    if let Some(ty) = schema.get("type").and_then(Value::as_str) {
        line.push_str(&format!(" type={ty}"));
    }
    line.push_str(&format!(" required={required}"));

    if let Some(desc) = schema.get("description").and_then(Value::as_str) {
        line.push_str(&format!(" — {desc}"));
    }
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        line.push_str(&format!(" enum=[{}]", values.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")));
    }
    if let Some(default) = schema.get("default") {
        line.push_str(&format!(" default={default}"));
    }
    if let Some(examples) = schema.get("examples").and_then(Value::as_array) {
        line.push_str(&format!(" examples=[{}]", examples.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")));
    }
    for (key, label) in [("minimum", "min"), ("maximum", "max"), ("minLength", "minLength"), ("maxLength", "maxLength")] {
        if let Some(v) = schema.get(key) {
            line.push_str(&format!(" {label}={v}"));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        line.push_str(&format!(" pattern={pattern}"));
    }
    if let Some(format) = schema.get("format").and_then(Value::as_str) {
        line.push_str(&format!(" format={format}"));
    }
    if let Some(items_ty) = schema.get("items").and_then(|i| i.get("type")).and_then(Value::as_str) {
        line.push_str(&format!(" items.type={items_ty}"));
    }
    if let Some(unique) = schema.get("uniqueItems").and_then(Value::as_bool) {
        line.push_str(&format!(" uniqueItems={unique}"));
    }

    line.push('\n');
    line
}
