//! Feature toggles for the function-calling transformation pipeline.

use serde::Deserialize;

/// Feature toggles controlling the function-calling transformation pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturesConfig {
    /// Whether the prompt injector, message rewriter, and streaming/non-streaming parsers run
    /// at all. Individual upstream services may override this via
    /// [`crate::UpstreamServiceConfig::inject_function_calling`].
    pub enable_function_calling: bool,
    /// Rename `developer`-role messages to `system` before dispatch.
    pub convert_developer_to_system: bool,
    /// A custom tool-use instruction template. Must contain the literal placeholders
    /// `{tools_list}` and `{trigger_signal}`; validated at load time.
    pub prompt_template: Option<String>,
    /// Forward the client's bearer token to the upstream verbatim instead of checking it
    /// against [`crate::ClientAuthConfig::allowed_keys`].
    pub key_passthrough: bool,
    /// Bypass the model→upstream map and broadcast to every usable upstream by priority.
    pub model_passthrough: bool,
    /// Log filter string, e.g. `info` or `toolify_core=debug,info`.
    pub log_level: String,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            enable_function_calling: true,
            convert_developer_to_system: true,
            prompt_template: None,
            key_passthrough: false,
            model_passthrough: false,
            log_level: "info".to_string(),
        }
    }
}
