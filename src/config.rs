//! Runtime configuration.

use tracing::warn;

use crate::marshal::ConversionPolicy;

/// Environment variable holding the label namespace.
pub const NAMESPACE_VAR: &str = "TCLMPI_NAMESPACE";

/// Environment variable holding the initial conversion policy.
pub const CONVERSION_VAR: &str = "TCLMPI_CONVERSION";

/// Settings a [`Context`](crate::Context) starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Prefix of every group and request label, e.g. `tclmpi` in `tclmpi::comm0`
    pub namespace: String,
    /// Conversion policy in effect after `init`
    pub conversion: ConversionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            namespace: "tclmpi".to_string(),
            conversion: ConversionPolicy::default(),
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    ///
    /// Unset or invalid variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(ns) = lookup(NAMESPACE_VAR) {
            let ns = ns.trim();
            if is_valid_namespace(ns) {
                config.namespace = ns.to_string();
            } else {
                warn!(value = ns, "ignoring invalid {NAMESPACE_VAR}");
            }
        }

        if let Some(policy) = lookup(CONVERSION_VAR) {
            match policy.trim().parse() {
                Ok(policy) => config.conversion = policy,
                Err(err) => warn!(%err, "ignoring invalid {CONVERSION_VAR}"),
            }
        }

        config
    }
}

fn is_valid_namespace(ns: &str) -> bool {
    !ns.is_empty()
        && !ns.starts_with(':')
        && !ns.ends_with(':')
        && ns
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.namespace, "tclmpi");
        assert_eq!(config.conversion, ConversionPolicy::Fail);
    }

    #[test]
    fn reads_both_variables() {
        let config = Config::from_lookup(lookup(&[
            (NAMESPACE_VAR, "app::mpi"),
            (CONVERSION_VAR, "tclmpi::tozero"),
        ]));
        assert_eq!(config.namespace, "app::mpi");
        assert_eq!(config.conversion, ConversionPolicy::ToZero);

        let config = Config::from_lookup(lookup(&[(CONVERSION_VAR, " abort ")]));
        assert_eq!(config.conversion, ConversionPolicy::Abort);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            (NAMESPACE_VAR, "has space"),
            (CONVERSION_VAR, "ignore"),
        ]));
        assert_eq!(config, Config::default());
        let config = Config::from_lookup(lookup(&[(NAMESPACE_VAR, "::lead")]));
        assert_eq!(config.namespace, "tclmpi");
    }
}
