//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    ChorusConfig, CircuitBreakerConfig, LogOutput, LoggingConfig, PlatformConfig,
    RateLimitConfig, RetryConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &ChorusConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;

    let resilience = &config.resilience;
    validate_sections(
        "resilience",
        resilience.retry.as_ref(),
        resilience.rate_limit.as_ref(),
        resilience.circuit_breaker.as_ref(),
        resilience.timeout_ms,
    )?;

    for (name, platform) in &config.platforms {
        validate_platform(name, platform)?;
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    for module in logging.filters.keys() {
        if module.trim().is_empty() {
            return Err(ConfigError::validation("Log filter module cannot be empty"));
        }
    }
    Ok(())
}

fn validate_platform(name: &str, platform: &PlatformConfig) -> ConfigResult<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidPlatformName(name.to_string()));
    }
    validate_sections(
        &format!("platforms.{name}"),
        platform.retry.as_ref(),
        platform.rate_limit.as_ref(),
        platform.circuit_breaker.as_ref(),
        platform.timeout_ms,
    )
}

fn validate_sections(
    scope: &str,
    retry: Option<&RetryConfig>,
    rate_limit: Option<&RateLimitConfig>,
    breaker: Option<&CircuitBreakerConfig>,
    timeout_ms: Option<u64>,
) -> ConfigResult<()> {
    if let Some(retry) = retry {
        validate_retry(scope, retry)?;
    }
    if let Some(rate_limit) = rate_limit {
        validate_rate_limit(scope, rate_limit)?;
    }
    if let Some(breaker) = breaker {
        validate_breaker(scope, breaker)?;
    }
    if timeout_ms == Some(0) {
        return Err(ConfigError::validation(format!(
            "{scope}.timeout_ms must be greater than 0"
        )));
    }
    Ok(())
}

fn validate_retry(scope: &str, retry: &RetryConfig) -> ConfigResult<()> {
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(ConfigError::validation(format!(
            "{scope}.retry.max_delay_ms must be greater than or equal to base_delay_ms"
        )));
    }
    Ok(())
}

fn validate_rate_limit(scope: &str, rate_limit: &RateLimitConfig) -> ConfigResult<()> {
    if rate_limit.concurrency == 0 {
        return Err(ConfigError::validation(format!(
            "{scope}.rate_limit.concurrency must be greater than 0"
        )));
    }
    if !(rate_limit.rate.is_finite() && rate_limit.rate > 0.0) {
        return Err(ConfigError::validation(format!(
            "{scope}.rate_limit.rate must be a positive number"
        )));
    }
    Ok(())
}

fn validate_breaker(scope: &str, breaker: &CircuitBreakerConfig) -> ConfigResult<()> {
    if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
        return Err(ConfigError::validation(format!(
            "{scope}.circuit_breaker thresholds must be greater than 0"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn with_platform(name: &str, platform: PlatformConfig) -> ChorusConfig {
        ChorusConfig {
            platforms: BTreeMap::from([(name.to_string(), platform)]),
            ..ChorusConfig::default()
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&ChorusConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_platform_names() {
        for name in ["", "my platform"] {
            let config = with_platform(name, PlatformConfig::default());
            assert!(matches!(
                validate_config(&config),
                Err(ConfigError::InvalidPlatformName(_))
            ));
        }
    }

    #[test]
    fn test_rejects_inverted_retry_delays() {
        let mut config = ChorusConfig::default();
        config.resilience.retry = Some(RetryConfig {
            base_delay_ms: 5000,
            max_delay_ms: 1000,
            ..RetryConfig::default()
        });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("resilience.retry"));
    }

    #[test]
    fn test_rejects_zero_rate_in_platform_override() {
        let config = with_platform(
            "loopback",
            PlatformConfig {
                rate_limit: Some(RateLimitConfig {
                    concurrency: 1,
                    rate: 0.0,
                }),
                ..PlatformConfig::default()
            },
        );
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("platforms.loopback.rate_limit.rate"));
    }

    #[test]
    fn test_rejects_zero_thresholds_and_timeout() {
        let mut config = ChorusConfig::default();
        config.resilience.circuit_breaker = Some(CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        });
        assert!(validate_config(&config).is_err());

        let mut config = ChorusConfig::default();
        config.resilience.timeout_ms = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = ChorusConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
