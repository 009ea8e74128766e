//! Validation of a loaded configuration.

use std::net::SocketAddr;

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{CoreConfig, SourceMode};

/// Reject settings the core cannot run with.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first offending field.
pub fn validate(config: &CoreConfig) -> ConfigResult<()> {
    let engine = &config.engine;
    if engine.worker_count == 0 {
        return Err(ConfigError::invalid("engine.worker_count", None, "must_be_positive"));
    }
    if engine.sub_task_size == 0 {
        return Err(ConfigError::invalid("engine.sub_task_size", None, "must_be_positive"));
    }
    if engine.fetch_timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "engine.fetch_timeout_secs",
            None,
            "must_be_positive",
        ));
    }
    if config.event_capacity == 0 {
        return Err(ConfigError::invalid("event_capacity", None, "must_be_positive"));
    }
    if let SourceMode::Remote { endpoint } = &config.source {
        let url = Url::parse(endpoint)
            .map_err(|_| ConfigError::invalid("source.endpoint", Some(endpoint.clone()), "invalid_url"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "source.endpoint",
                Some(endpoint.clone()),
                "unsupported_scheme",
            ));
        }
    }
    if let Some(bind) = &config.service_bind {
        bind.parse::<SocketAddr>()
            .map_err(|_| ConfigError::invalid("service_bind", Some(bind.clone()), "invalid_socket_addr"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_are_rejected() {
        let mut config = CoreConfig::default();
        config.engine.worker_count = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                field: "engine.worker_count",
                ..
            })
        ));

        let mut config = CoreConfig::default();
        config.engine.sub_task_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn remote_endpoint_must_be_http() {
        let mut config = CoreConfig::default();
        config.source = SourceMode::Remote {
            endpoint: "not a url".into(),
        };
        assert!(validate(&config).is_err());

        config.source = SourceMode::Remote {
            endpoint: "ftp://example.test".into(),
        };
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                reason: "unsupported_scheme",
                ..
            })
        ));

        config.source = SourceMode::Remote {
            endpoint: "https://recs.example.test".into(),
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn service_bind_must_be_socket_addr() {
        let mut config = CoreConfig::default();
        config.service_bind = Some("localhost".into());
        assert!(validate(&config).is_err());
        config.service_bind = Some("127.0.0.1:7070".into());
        assert!(validate(&config).is_ok());
    }
}
