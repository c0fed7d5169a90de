use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use toml::Value;

use crate::Config;

/// Loads, expands, deserializes, and validates a configuration file.
pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_env_placeholders(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

/// Validates the invariants a loaded configuration must hold.
pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.upstream_services.is_empty() {
        bail!(indoc! {r#"
            No upstream services configured. The proxy requires at least one upstream
            completion backend to function.

            Example configuration:

              [[upstream_services]]
              name = "openai"
              base_url = "https://api.openai.com/v1"
              api_key = "{{ env.OPENAI_API_KEY }}"
              models = ["gpt-4o"]
        "#});
    }

    validate_alias_collisions(config)?;

    if config.features.model_passthrough && config.upstream_services.iter().all(|s| !s.is_usable()) {
        bail!(indoc! {r#"
            features.model_passthrough is enabled but no upstream service has a usable
            (non-empty) api_key. Passthrough mode broadcasts every request to all usable
            upstreams by priority, so at least one must be configured with a key.
        "#});
    }

    if let Some(template) = config.features.prompt_template.as_deref() {
        let missing_tools_list = !template.contains("{tools_list}");
        let missing_trigger_signal = !template.contains("{trigger_signal}");

        if missing_tools_list || missing_trigger_signal {
            bail!(
                "features.prompt_template must contain the literal placeholders {{tools_list}} and \
                 {{trigger_signal}}, found missing: tools_list={missing_tools_list} trigger_signal={missing_trigger_signal}"
            );
        }
    }

    if config.client_authentication.allowed_keys.is_empty() && !config.features.key_passthrough {
        bail!(indoc! {r#"
            client_authentication.allowed_keys is empty and features.key_passthrough is not
            enabled. Every request would be rejected. Either configure at least one allowed
            key or enable key_passthrough.
        "#});
    }

    Ok(())
}

/// An alias name (the part before `:` in a `models` entry) must not collide with any plain,
/// non-aliased model name declared anywhere in the configuration — across every service, not
/// just the one declaring the alias.
fn validate_alias_collisions(config: &Config) -> anyhow::Result<()> {
    let mut aliases = HashSet::new();
    let mut plain_models = HashSet::new();

    for service in &config.upstream_services {
        for entry in &service.models {
            match crate::UpstreamServiceConfig::split_alias(entry) {
                (Some(alias), _) => {
                    aliases.insert(alias.to_string());
                }
                (None, model) => {
                    plain_models.insert(model.to_string());
                }
            }
        }
    }

    if let Some(collision) = aliases.intersection(&plain_models).next() {
        bail!(
            "Model alias \"{collision}\" collides with a plain (non-aliased) model name of the \
             same name declared elsewhere in the configuration. Aliases and plain model names \
             share a single namespace across all upstream services."
        );
    }

    Ok(())
}

/// Recursively walks a raw TOML value, expanding `{{ env.VAR }}` placeholders found in any
/// string leaf. Fails loudly, naming the offending field path, if a referenced variable is
/// unset.
///
/// The teacher's workspace carries an in-workspace `serde-dynamic-string` crate for this exact
/// purpose, but only its `Cargo.toml` survived retrieval — its source was unavailable, so the
/// expansion is hand-written here instead of copied.
fn expand_env_placeholders<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match expand_one(s) {
            Ok(expanded) => *s = expanded,
            Err(err) => {
                let mut p = String::new();

                for segment in path.iter() {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]").unwrap(),
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_placeholders(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_placeholders(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

/// Expands every `{{ env.VAR }}` occurrence in a single string.
fn expand_one(input: &str) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            out.push_str(rest);
            return Ok(out);
        };

        out.push_str(&rest[..start]);

        let placeholder = rest[start + 2..start + end].trim();
        let Some(var_name) = placeholder.strip_prefix("env.").map(str::trim) else {
            return Err(format!("unsupported placeholder syntax: '{{{{{placeholder}}}}}'"));
        };

        let value = std::env::var(var_name).map_err(|_| format!("environment variable '{var_name}' is not set"))?;
        out.push_str(&value);

        rest = &rest[start + end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}
