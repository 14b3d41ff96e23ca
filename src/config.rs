//! Session configuration keys and defaults.

use std::collections::HashMap;

/// Config key whose value is forced onto every remote tool call.
pub const NAMESPACE: &str = "namespace";

/// Namespace used when nothing is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Environment variable overriding the default namespace.
pub const NAMESPACE_ENV: &str = "OPSAGENT_NAMESPACE";

/// Default session configuration. The namespace comes from
/// `OPSAGENT_NAMESPACE` when set.
#[must_use]
pub fn default_config() -> HashMap<String, String> {
    let namespace =
        std::env::var(NAMESPACE_ENV).unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
    HashMap::from([(NAMESPACE.to_string(), namespace)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_namespace() {
        let config = default_config();
        assert!(config.contains_key(NAMESPACE));
    }
}
