//! Run orchestration: load config, set up logging, run every service.
//!
//! A run moves through these states, never looping back:
//!
//! ```text
//! Init → ConfigLoading → LogInit → Dispatch → Running → Drained → ShutdownDelay → Exited
//! ```
//!
//! A failure while loading configuration or initializing logging ends the run
//! before any service starts. An empty registry ends it at `Dispatch`. During
//! `Running` each service gets its own OS thread; a failing or panicking
//! service affects nobody else, and the run waits for all of them.

use crate::cli::Cli;
use crate::config::{Config, ConfigAggregator, FlagSource};
use crate::error::{ConfigError, LogError};
use crate::logging::{LogConfig, LogSink, TracingSink};
use crate::registry::{ServiceMain, ServiceRegistry, ServiceSnapshot};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::subscriber::NoSubscriber;
use tracing::{Dispatch, Span, debug, error, info, info_span};

/// Pause between the last service stopping and the run returning, giving
/// asynchronous log writers time to drain.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Orchestration states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Init,
    ConfigLoading,
    LogInit,
    Dispatch,
    Running,
    Drained,
    ShutdownDelay,
    Exited,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::ConfigLoading => "config_loading",
            RunState::LogInit => "log_init",
            RunState::Dispatch => "dispatch",
            RunState::Running => "running",
            RunState::Drained => "drained",
            RunState::ShutdownDelay => "shutdown_delay",
            RunState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// How a single service ended.
#[derive(Debug)]
pub enum ServiceStatus {
    /// The entry point returned `Ok`.
    Stopped,
    /// The entry point returned an error, or its thread could not be started.
    Failed(anyhow::Error),
    /// The entry point panicked; holds the panic message.
    Panicked(String),
}

impl ServiceStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ServiceStatus::Stopped)
    }
}

#[derive(Debug)]
pub struct ServiceReport {
    pub name: String,
    pub status: ServiceStatus,
    pub elapsed: Duration,
}

/// Which exit path a run took.
///
/// Nothing here is an error for the caller: startup failures are already
/// logged, and the process is expected to exit normally either way.
#[derive(Debug)]
pub enum RunOutcome {
    ConfigFailed(ConfigError),
    LogInitFailed(LogError),
    /// The registry was empty.
    NothingToRun,
    /// Every service ran and returned; one report per service, in name order.
    Completed(Vec<ServiceReport>),
}

impl RunOutcome {
    /// The last state entered before `Exited`.
    pub fn last_state(&self) -> RunState {
        match self {
            RunOutcome::ConfigFailed(_) => RunState::ConfigLoading,
            RunOutcome::LogInitFailed(_) => RunState::LogInit,
            RunOutcome::NothingToRun => RunState::Dispatch,
            RunOutcome::Completed(_) => RunState::ShutdownDelay,
        }
    }

    pub fn reports(&self) -> &[ServiceReport] {
        match self {
            RunOutcome::Completed(reports) => reports,
            _ => &[],
        }
    }

    pub fn report(&self, name: &str) -> Option<&ServiceReport> {
        self.reports().iter().find(|r| r.name == name)
    }

    /// Services that did not stop cleanly.
    pub fn failed(&self) -> impl Iterator<Item = &ServiceReport> {
        self.reports().iter().filter(|r| !r.status.is_ok())
    }
}

/// Drives one run over a registry.
pub struct Orchestrator<'r> {
    tag: String,
    config_path: PathBuf,
    aggregator: ConfigAggregator,
    registry: &'r ServiceRegistry,
    sink: Box<dyn LogSink>,
    shutdown_grace: Duration,
}

impl Orchestrator<'static> {
    /// Orchestrator over the global registry.
    ///
    /// The tag is upper-cased; environment variables prefixed with
    /// `<TAG>_` feed the configuration.
    pub fn new(tag: &str, config_path: impl Into<PathBuf>) -> Self {
        Self::with_registry(tag, config_path, ServiceRegistry::global())
    }

    /// Orchestrator over the global registry, configured from parsed
    /// command-line arguments.
    pub fn from_cli(tag: &str, cli: Cli) -> Self {
        let orchestrator = Self::new(tag, cli.config.unwrap_or_default());
        let aggregator = ConfigAggregator::new(orchestrator.aggregator.env_prefix())
            .with_flags(FlagSource::new(cli.flags));
        orchestrator.aggregator(aggregator)
    }
}

impl<'r> Orchestrator<'r> {
    pub fn with_registry(
        tag: &str,
        config_path: impl Into<PathBuf>,
        registry: &'r ServiceRegistry,
    ) -> Self {
        let tag = tag.to_uppercase();
        let aggregator = ConfigAggregator::new(format!("{tag}_"));
        Self {
            tag,
            config_path: config_path.into(),
            aggregator,
            registry,
            sink: Box::new(TracingSink),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Replace the configuration aggregator (env prefix, flags).
    pub fn aggregator(mut self, aggregator: ConfigAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Override the pause after all services stop. Defaults to [`SHUTDOWN_GRACE`].
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn env_prefix(&self) -> &str {
        self.aggregator.env_prefix()
    }

    /// Run every registered service to completion.
    pub fn run(&self) -> RunOutcome {
        enter(RunState::Init);
        enter(RunState::ConfigLoading);
        let config = match self.aggregator.load(&self.config_path) {
            Ok(config) => config,
            Err(err) => {
                self.startup_failed(RunState::ConfigLoading, &err);
                return RunOutcome::ConfigFailed(err);
            }
        };

        enter(RunState::LogInit);
        let initialized =
            LogConfig::from_config(&config).and_then(|log_config| self.sink.init(&log_config));
        if let Err(err) = initialized {
            self.startup_failed(RunState::LogInit, &err);
            return RunOutcome::LogInitFailed(err);
        }

        let span = info_span!("app", tag = %self.tag);
        let _entered = span.enter();

        enter(RunState::Dispatch);
        let services = self.registry.snapshot();
        if services.is_empty() {
            info!("Run nothing, exit");
            enter(RunState::Exited);
            return RunOutcome::NothingToRun;
        }

        enter(RunState::Running);
        let reports = dispatch(&config, &services);

        enter(RunState::Drained);
        let failed = reports.iter().filter(|r| !r.status.is_ok()).count();
        info!(services = reports.len(), failed, "All services stopped");
        self.sink.flush();

        enter(RunState::ShutdownDelay);
        thread::sleep(self.shutdown_grace);

        enter(RunState::Exited);
        RunOutcome::Completed(reports)
    }

    fn startup_failed(&self, state: RunState, err: &dyn std::error::Error) {
        error!(tag = %self.tag, %state, error = %err, "Startup failed");
        // Without a subscriber the event above went nowhere.
        if tracing::dispatcher::get_default(|d| d.is::<NoSubscriber>()) {
            eprintln!("[{}] startup failed during {state}: {err}", self.tag);
        }
        enter(RunState::Exited);
    }
}

fn enter(state: RunState) {
    debug!(%state, "Entering state");
}

/// Fan out one thread per service, then wait for all of them.
fn dispatch(config: &Config, services: &ServiceSnapshot) -> Vec<ServiceReport> {
    let dispatcher = tracing::dispatcher::get_default(Dispatch::clone);
    let parent = Span::current();

    thread::scope(|scope| {
        let spawned: Vec<_> = services
            .iter()
            .map(|(name, main)| {
                let dispatcher = dispatcher.clone();
                let parent = parent.clone();
                let handle = thread::Builder::new()
                    .name(format!("svc-{name}"))
                    .spawn_scoped(scope, move || {
                        tracing::dispatcher::with_default(&dispatcher, || {
                            info_span!(parent: &parent, "service", name = %name)
                                .in_scope(|| run_service(name, main, config))
                        })
                    });
                (name, handle)
            })
            .collect();

        spawned
            .into_iter()
            .map(|(name, handle)| match handle {
                Ok(handle) => handle.join().unwrap_or_else(|payload| ServiceReport {
                    name: name.to_string(),
                    status: ServiceStatus::Panicked(panic_message(payload.as_ref())),
                    elapsed: Duration::ZERO,
                }),
                Err(err) => {
                    error!(service = %name, error = %err, "Failed to start service thread");
                    ServiceReport {
                        name: name.to_string(),
                        status: ServiceStatus::Failed(
                            anyhow::Error::new(err).context("failed to start service thread"),
                        ),
                        elapsed: Duration::ZERO,
                    }
                }
            })
            .collect()
    })
}

fn run_service(name: &str, main: &ServiceMain, config: &Config) -> ServiceReport {
    info!("Service running");
    let started = Instant::now();

    let status = match panic::catch_unwind(AssertUnwindSafe(|| main.as_ref()(config))) {
        Ok(Ok(())) => ServiceStatus::Stopped,
        Ok(Err(err)) => {
            error!(error = %format!("{err:#}"), "Service failed");
            ServiceStatus::Failed(err)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "Service panicked");
            ServiceStatus::Panicked(message)
        }
    };

    let elapsed = started.elapsed();
    info!(
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "Service stopped"
    );
    ServiceReport {
        name: name.to_string(),
        status,
        elapsed,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
