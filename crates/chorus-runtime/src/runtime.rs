//! Runtime orchestration.
//!
//! The runtime owns the loaded configuration and a [`Dispatcher`]. Adapters
//! are registered by type: the runtime looks up their platform table, skips
//! disabled platforms, builds the [`AdapterConfig`](chorus_core::AdapterConfig),
//! initializes the adapter and hands it to the dispatcher.
//!
//! ```rust,ignore
//! use chorus_runtime::ChorusRuntime;
//!
//! let runtime = ChorusRuntime::builder()
//!     .config_file("config/chorus.toml")
//!     .build()?;
//!
//! runtime.register_adapter::<LoopbackAdapter>().await?;
//! runtime.dispatcher().on(|msg| async move { Ok(()) });
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chorus_core::{ConfigurableAdapter, Dispatcher};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::{ChorusConfig, ConfigLoader, ConfigResult};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Owns configuration and the dispatcher for one process.
pub struct ChorusRuntime {
    config: ChorusConfig,
    dispatcher: Dispatcher,
    running: AtomicBool,
}

impl ChorusRuntime {
    /// Loads configuration from the default locations, falling back to
    /// defaults if loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new().load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config ({e}), using defaults");
            ChorusConfig::default()
        });
        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from loaded configuration and initializes logging
    /// from it.
    pub fn from_config(config: &ChorusConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            platforms = config.platforms.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            dispatcher: Dispatcher::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ChorusConfig {
        &self.config
    }

    /// The dispatcher adapters are registered with.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registered platform ids, sorted.
    pub fn platforms(&self) -> Vec<String> {
        self.dispatcher.platforms()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Creates, initializes and registers an adapter of type `A`.
    ///
    /// Returns `None` when `platforms.<A::name()>.enabled` is false. A
    /// platform without a table runs with empty settings and the global
    /// resilience defaults.
    pub async fn register_adapter<A>(&self) -> RuntimeResult<Option<Arc<A>>>
    where
        A: ConfigurableAdapter,
    {
        let platform = A::name();

        if !self.config.is_enabled(platform) {
            info!(platform, "Platform disabled, skipping adapter");
            return Ok(None);
        }
        if !self.config.platforms.contains_key(platform) {
            warn!(platform, "No configuration found for platform, using defaults");
        }

        let adapter_config = self.config.adapter_config(platform);
        let adapter = A::from_config(&adapter_config)?;
        adapter
            .init(&adapter_config)
            .await
            .map_err(|e| RuntimeError::adapter_init(platform, e))?;

        if let Some(previous) = self.dispatcher.register_adapter(platform, adapter.clone())
            && let Err(e) = previous.destroy().await
        {
            warn!(platform, error = %e, "Failed to destroy replaced adapter");
        }

        debug!(platform, "Adapter initialized");
        Ok(Some(adapter))
    }

    /// Runs until Ctrl+C or SIGTERM, then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start();
        info!("Chorus runtime is now running. Press Ctrl+C to stop.");

        let waited = wait_for_shutdown().await;
        self.shutdown().await;
        waited
    }

    /// Runs until `shutdown` completes, then shuts down.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start();
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }

    fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return;
        }
        let platforms = self.platforms();
        if platforms.is_empty() {
            warn!("Starting with no registered adapters");
        }
        info!(platforms = ?platforms, "Runtime started");
    }

    /// Destroys every adapter. Failures are logged and do not stop the
    /// others from being destroyed.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        info!("Stopping Chorus runtime");

        let failures = self.dispatcher.destroy_all().await;
        if failures.is_empty() {
            info!("Runtime stopped");
        } else {
            let platforms: Vec<_> = failures.iter().map(|(p, _)| p.as_str()).collect();
            error!(failed = ?platforms, "Runtime stopped with adapter shutdown errors");
        }
    }
}

impl Default for ChorusRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        result?;
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return Ok(());
            }
            Err(e) => debug!(error = %e, "SIGTERM handler unavailable"),
        }
    }

    signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
    info!("Received Ctrl+C, shutting down");
    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`ChorusRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: ChorusConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<ChorusRuntime> {
        let config = self.config_loader.load()?;
        Ok(ChorusRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;
    use chorus_adapter_loopback::LoopbackAdapter;
    use chorus_core::{Adapter, ChorusError, Content, SendOptions};
    use serde_json::json;
    use std::time::Duration;

    fn config_with(platform: PlatformConfig) -> ChorusConfig {
        let mut config = ChorusConfig::default();
        config.platforms.insert("loopback".into(), platform);
        config
    }

    #[tokio::test]
    async fn test_register_enabled_adapter() {
        let runtime = ChorusRuntime::from_config(&config_with(PlatformConfig {
            settings: json!({ "self_id": "runtime-bot" }),
            ..PlatformConfig::default()
        }));

        let adapter = runtime
            .register_adapter::<LoopbackAdapter>()
            .await
            .unwrap()
            .expect("enabled platform");
        assert_eq!(runtime.platforms(), vec!["loopback"]);

        runtime
            .dispatcher()
            .send("loopback", "chat-1", Content::text("hi"), SendOptions::default())
            .await
            .unwrap();
        let sent = adapter.outbox();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender_id, "runtime-bot");
    }

    #[tokio::test]
    async fn test_disabled_platform_is_skipped() {
        let runtime = ChorusRuntime::from_config(&config_with(PlatformConfig {
            enabled: false,
            ..PlatformConfig::default()
        }));

        let adapter = runtime.register_adapter::<LoopbackAdapter>().await.unwrap();
        assert!(adapter.is_none());
        assert!(runtime.platforms().is_empty());
    }

    #[tokio::test]
    async fn test_bad_settings_fail_registration() {
        let runtime = ChorusRuntime::from_config(&config_with(PlatformConfig {
            settings: json!({ "self_id": 42 }),
            ..PlatformConfig::default()
        }));

        let err = runtime.register_adapter::<LoopbackAdapter>().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Adapter(ChorusError::Configuration { .. })));
        assert!(runtime.platforms().is_empty());
    }

    #[tokio::test]
    async fn test_run_until_shuts_adapters_down() {
        let runtime = ChorusRuntime::from_config(&ChorusConfig::default());
        let adapter = runtime
            .register_adapter::<LoopbackAdapter>()
            .await
            .unwrap()
            .unwrap();

        runtime
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();

        assert!(!runtime.is_running());
        assert!(runtime.platforms().is_empty());
        let err = adapter
            .send("chat", Content::text("late"), SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
