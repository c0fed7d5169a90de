//! Resolves a client-requested model name to an ordered list of candidate upstreams, and
//! classifies upstream HTTP failures as failover-eligible or not.

use std::collections::HashMap;

use config::{Config, UpstreamServiceConfig};
use rand::Rng;

use crate::error::ProxyError;

/// The outcome of resolving a requested model: the upstreams to try, in order, and the
/// model name to actually send to the first of them (after alias resolution).
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Candidate upstreams, highest priority first. Already filtered to usable services.
    pub upstreams: Vec<UpstreamServiceConfig>,
    /// The model name to place in the outgoing request, after alias resolution.
    pub effective_model: String,
}

/// Built once from a loaded [`Config`]; holds the `model_mapping` and `alias_mapping`
/// described by the routing algorithm so a lookup never re-walks every service's model list.
pub struct UpstreamRouter {
    services: Vec<UpstreamServiceConfig>,
    model_mapping: HashMap<String, Vec<usize>>,
    alias_mapping: HashMap<String, Vec<String>>,
    model_passthrough: bool,
}

impl UpstreamRouter {
    /// Builds the routing maps from the configuration's upstream service list.
    pub fn new(config: &Config) -> Self {
        let services = config.upstream_services.clone();
        let mut model_mapping: HashMap<String, Vec<usize>> = HashMap::new();
        let mut alias_mapping: HashMap<String, Vec<String>> = HashMap::new();

        for (idx, service) in services.iter().enumerate() {
            for entry in &service.models {
                model_mapping.entry(entry.clone()).or_default().push(idx);

                if let (Some(alias), _) = UpstreamServiceConfig::split_alias(entry) {
                    alias_mapping.entry(alias.to_string()).or_default().push(entry.clone());
                }
            }
        }

        for indices in model_mapping.values_mut() {
            indices.sort_by_key(|&i| std::cmp::Reverse(services[i].priority));
        }

        Self { services, model_mapping, alias_mapping, model_passthrough: config.features.model_passthrough }
    }

    /// Resolves `requested_model` to an ordered candidate list.
    ///
    /// In passthrough mode every usable service is a candidate, tried in priority order,
    /// with the client's requested model sent unmodified. Otherwise: if the name is a
    /// declared alias, one of its model entries is chosen uniformly at random; the entry
    /// (alias-prefixed or not) is then looked up directly in `model_mapping`. A name with no
    /// mapping at all falls back to the configured default service, if any.
    pub fn find_upstream(&self, requested_model: &str) -> Result<RoutingDecision, ProxyError> {
        if self.model_passthrough {
            let mut candidates: Vec<UpstreamServiceConfig> = self.services.iter().filter(|s| s.is_usable()).cloned().collect();
            candidates.sort_by_key(|s| std::cmp::Reverse(s.priority));

            return if candidates.is_empty() {
                Err(ProxyError::NoUpstreamsConfigured)
            } else {
                Ok(RoutingDecision { upstreams: candidates, effective_model: requested_model.to_string() })
            };
        }

        let entry = match self.alias_mapping.get(requested_model) {
            Some(entries) if !entries.is_empty() => entries[rand::rng().random_range(0..entries.len())].clone(),
            _ => requested_model.to_string(),
        };

        match self.model_mapping.get(&entry) {
            Some(indices) => {
                let upstreams: Vec<UpstreamServiceConfig> =
                    indices.iter().map(|&i| self.services[i].clone()).filter(|s| s.is_usable()).collect();

                if upstreams.is_empty() {
                    return Err(ProxyError::ModelNotConfigured(requested_model.to_string()));
                }

                let (_, model) = UpstreamServiceConfig::split_alias(&entry);
                Ok(RoutingDecision { upstreams, effective_model: model.to_string() })
            }
            None => match self.default_service() {
                Some(service) => {
                    let (_, model) = UpstreamServiceConfig::split_alias(&entry);
                    Ok(RoutingDecision { upstreams: vec![service.clone()], effective_model: model.to_string() })
                }
                None => Err(ProxyError::ModelNotConfigured(requested_model.to_string())),
            },
        }
    }

    fn default_service(&self) -> Option<&UpstreamServiceConfig> {
        self.services.iter().filter(|s| s.is_default && s.is_usable()).max_by_key(|s| s.priority)
    }
}

/// Whether an upstream HTTP response or transport failure should advance to the next
/// candidate upstream, or be forwarded to the client immediately as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverAction {
    /// Try the next upstream in the candidate list, if any.
    Retry,
    /// Stop and forward this outcome to the client unchanged: the request itself is at
    /// fault, so retrying elsewhere would not help.
    Fail,
}

/// Classifies an upstream HTTP status code per the unary failover policy: `400`/`401`/`403`
/// indicate the request itself is invalid or unauthorized and are never retried elsewhere;
/// everything else (`429`, `5xx`, and anything unexpected) is treated as transient.
pub fn classify_status(status: u16) -> FailoverAction {
    match status {
        400 | 401 | 403 => FailoverAction::Fail,
        _ => FailoverAction::Retry,
    }
}

#[cfg(test)]
mod tests {
    use config::ClientAuthConfig;
    use secrecy::SecretString;

    use super::*;

    fn service(name: &str, priority: i32, models: &[&str], is_default: bool) -> UpstreamServiceConfig {
        UpstreamServiceConfig {
            name: name.to_string(),
            base_url: format!("https://{name}.example.com"),
            api_key: Some(SecretString::from(format!("key-{name}"))),
            models: models.iter().map(|m| m.to_string()).collect(),
            model_mapping: Default::default(),
            description: String::new(),
            is_default,
            priority,
            inject_function_calling: None,
            optimize_prompt: false,
        }
    }

    fn config(services: Vec<UpstreamServiceConfig>, model_passthrough: bool) -> Config {
        let mut config = Config { upstream_services: services, client_authentication: ClientAuthConfig::default(), ..Default::default() };
        config.features.model_passthrough = model_passthrough;
        config
    }

    #[test]
    fn plain_model_name_resolves_by_priority() {
        let cfg = config(vec![service("low", 1, &["gpt-4o"], false), service("high", 10, &["gpt-4o"], false)], false);
        let router = UpstreamRouter::new(&cfg);

        let decision = router.find_upstream("gpt-4o").unwrap();
        assert_eq!(decision.effective_model, "gpt-4o");
        assert_eq!(decision.upstreams[0].name, "high");
        assert_eq!(decision.upstreams[1].name, "low");
    }

    #[test]
    fn alias_resolves_through_entry_to_real_model() {
        let cfg = config(vec![service("a", 1, &["fast:gpt-4o-mini"], false)], false);
        let router = UpstreamRouter::new(&cfg);

        let decision = router.find_upstream("fast").unwrap();
        assert_eq!(decision.effective_model, "gpt-4o-mini");
        assert_eq!(decision.upstreams.len(), 1);
    }

    #[test]
    fn unmapped_model_falls_back_to_default_service() {
        let cfg = config(vec![service("fallback", 1, &["gpt-4o"], true)], false);
        let router = UpstreamRouter::new(&cfg);

        let decision = router.find_upstream("unknown-model").unwrap();
        assert_eq!(decision.upstreams[0].name, "fallback");
        assert_eq!(decision.effective_model, "unknown-model");
    }

    #[test]
    fn unmapped_model_with_no_default_is_an_error() {
        let cfg = config(vec![service("a", 1, &["gpt-4o"], false)], false);
        let router = UpstreamRouter::new(&cfg);
        assert!(router.find_upstream("unknown-model").is_err());
    }

    #[test]
    fn passthrough_broadcasts_every_usable_service_by_priority() {
        let cfg = config(vec![service("low", 1, &[], false), service("high", 10, &[], false)], true);
        let router = UpstreamRouter::new(&cfg);

        let decision = router.find_upstream("whatever-the-client-asked-for").unwrap();
        assert_eq!(decision.effective_model, "whatever-the-client-asked-for");
        assert_eq!(decision.upstreams.len(), 2);
        assert_eq!(decision.upstreams[0].name, "high");
    }

    #[test]
    fn unusable_services_are_excluded_from_candidates() {
        let mut unusable = service("no-key", 100, &["gpt-4o"], false);
        unusable.api_key = None;
        let cfg = config(vec![unusable, service("usable", 1, &["gpt-4o"], false)], false);
        let router = UpstreamRouter::new(&cfg);

        let decision = router.find_upstream("gpt-4o").unwrap();
        assert_eq!(decision.upstreams.len(), 1);
        assert_eq!(decision.upstreams[0].name, "usable");
    }

    #[test]
    fn alias_resolution_reaches_every_mapped_model_over_many_requests() {
        let cfg = config(vec![service("a", 1, &["fast:model-a", "fast:model-b"], false)], false);
        let router = UpstreamRouter::new(&cfg);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let decision = router.find_upstream("fast").unwrap();
            seen.insert(decision.effective_model);
        }

        assert_eq!(seen, std::collections::HashSet::from(["model-a".to_string(), "model-b".to_string()]));
    }

    #[test]
    fn classify_status_distinguishes_client_from_transient_errors() {
        assert_eq!(classify_status(400), FailoverAction::Fail);
        assert_eq!(classify_status(401), FailoverAction::Fail);
        assert_eq!(classify_status(403), FailoverAction::Fail);
        assert_eq!(classify_status(404), FailoverAction::Retry);
        assert_eq!(classify_status(429), FailoverAction::Retry);
        assert_eq!(classify_status(500), FailoverAction::Retry);
        assert_eq!(classify_status(503), FailoverAction::Retry);
    }
}
