//! The weft runtime: configuration, one-time resolution, request dispatch
//! and shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use weft_runtime::WeftRuntime;
//!
//! let mut runtime = WeftRuntime::builder()
//!     .config_file("config/weft.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.bind_config(&GREETING)?;
//! runtime.app_mut()?.register(&GREETER, greeter_plugin());
//!
//! runtime.start().await?;
//! let ctx = runtime.handle(Context::new()).await?;
//! runtime.stop().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{Instrument, debug, debug_span, error, info, warn};
use weft_core::{App, Context, ResolvedApp, Token};

use crate::config::{ConfigError, ConfigLoader, ConfigResult, WeftConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

enum State {
    /// Accepting registrations.
    Configuring(App),
    Running(Arc<ResolvedApp>),
    Stopped,
    /// Resolution failed; the app is gone.
    Failed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Configuring(_) => "configuring",
            Self::Running(_) => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

/// Runtime statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    pub running: bool,
    /// Requests dispatched since start.
    pub requests: u64,
    /// Plugins instantiated at start; zero before.
    pub plugins: usize,
    pub middleware: usize,
}

/// Owns an [`App`] through its lifecycle.
///
/// Registrations go through [`app_mut`](Self::app_mut) until
/// [`start`](Self::start) resolves the app.  After that the runtime serves
/// requests concurrently through [`handle`](Self::handle) until
/// [`stop`](Self::stop) runs the plugins' cleanup hooks.
pub struct WeftRuntime {
    config: WeftConfig,
    state: RwLock<State>,
    requests: AtomicU64,
}

impl WeftRuntime {
    /// Creates a runtime from the configuration found in the current
    /// directory, falling back to defaults.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                WeftConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from `config` and initializes logging from it.
    pub fn from_config(config: &WeftConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            plugin_sections = config.plugins.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            state: RwLock::new(State::Configuring(App::new())),
            requests: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    /// The app under construction.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AlreadyStarted`] once [`start`](Self::start) has run.
    pub fn app_mut(&mut self) -> RuntimeResult<&mut App> {
        match self.state.get_mut() {
            State::Configuring(app) => Ok(app),
            _ => Err(RuntimeError::AlreadyStarted),
        }
    }

    /// Configures `token` with the settings under `plugins.<token name>`.
    ///
    /// A missing section is an error for required tokens; for optional
    /// tokens nothing is registered and dependents receive `None`.
    pub fn bind_config<T>(&mut self, token: &Token<T>) -> RuntimeResult<()>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let section = format!("plugins.{}", token.name());
        let Some(raw) = self.config.plugin(token.name()) else {
            if token.is_optional() {
                debug!(section = %section, "No configuration for optional token");
                return Ok(());
            }
            return Err(ConfigError::missing_section(section).into());
        };

        let value: T = serde_json::from_value(raw.clone()).map_err(|e| ConfigError::Deserialize {
            section: section.clone(),
            message: e.to_string(),
        })?;
        self.app_mut()?.configure(token, value);
        debug!(section = %section, "Bound configuration section");
        Ok(())
    }

    /// Resolves the app.  Calling it again while running is a no-op.
    ///
    /// # Errors
    ///
    /// The resolution error; the runtime is unusable afterwards.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut state = self.state.write().await;
        match std::mem::replace(&mut *state, State::Failed) {
            State::Configuring(app) => match app.resolve() {
                Ok(resolved) => {
                    let stats = resolved.stats();
                    *state = State::Running(Arc::new(resolved));
                    info!(
                        plugins = stats.plugins,
                        middleware = stats.middleware,
                        "Runtime started"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Failed to start runtime");
                    Err(e.into())
                }
            },
            State::Running(resolved) => {
                *state = State::Running(resolved);
                warn!("Runtime is already running");
                Ok(())
            }
            other => {
                let name = other.name();
                *state = other;
                warn!(state = name, "Runtime cannot be restarted");
                Err(RuntimeError::AlreadyStarted)
            }
        }
    }

    /// The resolved app, while running.
    pub async fn resolved(&self) -> Option<Arc<ResolvedApp>> {
        match &*self.state.read().await {
            State::Running(resolved) => Some(Arc::clone(resolved)),
            _ => None,
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(&*self.state.read().await, State::Running(_))
    }

    /// Dispatches one request through the composed middleware chain.
    pub async fn handle(&self, ctx: Context) -> RuntimeResult<Arc<Context>> {
        let resolved = self.resolved().await.ok_or(RuntimeError::NotRunning)?;
        let request = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let span = debug_span!("request", request, context = ctx.id().get());

        resolved
            .simulate(ctx)
            .instrument(span)
            .await
            .map_err(RuntimeError::Dispatch)
    }

    /// Runs every plugin's cleanup hook.  A no-op unless running.
    pub async fn stop(&self) -> RuntimeResult<()> {
        let resolved = {
            let mut state = self.state.write().await;
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(resolved) => resolved,
                other => {
                    *state = other;
                    warn!("Runtime is not running");
                    return Ok(());
                }
            }
        };

        info!("Stopping weft runtime");
        resolved.cleanup().await?;
        info!(requests = self.requests.load(Ordering::Relaxed), "Runtime stopped");
        Ok(())
    }

    /// Starts, waits for Ctrl+C (or SIGTERM on unix), then stops.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("weft runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await?;
        self.stop().await
    }

    /// Starts, waits for `shutdown`, then stops.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    pub async fn stats(&self) -> RuntimeStats {
        let (running, app_stats) = match &*self.state.read().await {
            State::Running(resolved) => (true, Some(resolved.stats())),
            _ => (false, None),
        };
        RuntimeStats {
            running,
            requests: self.requests.load(Ordering::Relaxed),
            plugins: app_stats.map_or(0, |s| s.plugins),
            middleware: app_stats.map_or(0, |s| s.middleware),
        }
    }
}

impl Default for WeftRuntime {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(RuntimeError::Signal)?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(RuntimeError::Signal)?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`WeftRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<WeftConfig>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
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

    /// Merges `config` over the defaults, below files and environment.
    pub fn merge(mut self, config: WeftConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is, skipping every other source.
    pub fn config(mut self, config: WeftConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loads and validates the configuration, then builds the runtime.
    pub fn build(self) -> ConfigResult<WeftRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        validate_config(&config)?;
        Ok(WeftRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
