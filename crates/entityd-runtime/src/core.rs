//! The `entityd.core` plugin.
//!
//! Owns the pieces every other plugin builds on: assembling and parsing
//! the command line (`entityd_cmdline_parse`, folding every plugin's
//! `entityd_addoption` contribution), and driving the main loop — one
//! collection cycle per tick until shutdown, with a health heartbeat after
//! each completed cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::{Arg, ArgAction, Command, value_parser};
use tracing::{debug, info};

use entityd_framework::{
    CmdlineParseHook, Config, HookBinding, HookError, HookPoint, HookResult, MainLoopHook,
    OptionsHook, Plugin, PluginManager, Session, SessionFinishHook,
};

use crate::health::Health;
use crate::monitor::Monitor;

/// Time between collection cycles.
///
/// A cycle that overruns the period is followed immediately by the next
/// one; cycles never overlap.
pub const CYCLE_PERIOD: Duration = Duration::from_secs(60);

/// Core plugin: command line and main loop.
pub struct CorePlugin {
    health: Health,
}

impl CorePlugin {
    pub fn new() -> Self {
        CorePlugin {
            health: Health::from_platform_dirs(),
        }
    }

    /// Uses a specific health marker, mainly for tests.
    pub fn with_health(health: Health) -> Self {
        CorePlugin { health }
    }
}

impl Default for CorePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OptionsHook for CorePlugin {
    async fn add_options(&self, cmd: Command) -> HookResult<Command> {
        Ok(cmd
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("N")
                    .value_parser(value_parser!(u8).range(0..=100))
                    .help("Log verbosity (0-100): 10=DEBUG, 20=INFO, 30=WARNING, 40=ERROR, 50=CRITICAL"),
            )
            .arg(
                Arg::new("trace")
                    .long("trace")
                    .action(ArgAction::SetTrue)
                    .help("Trace the plugin manager actions"),
            )
            .arg(
                Arg::new("disable")
                    .long("disable")
                    .value_name("PLUGIN")
                    .action(ArgAction::Append)
                    .help("Suppress matching plugins at startup (glob patterns allowed)"),
            )
            .arg(
                Arg::new("declentity-dir")
                    .long("declentity-dir")
                    .value_name("DIR")
                    .value_parser(value_parser!(std::path::PathBuf))
                    .help("Directory holding declarative entity files"),
            )
            .arg(
                Arg::new("dot")
                    .long("dot")
                    .value_name("PATH")
                    .value_parser(value_parser!(std::path::PathBuf))
                    .help("Write a DOT graph of each collection cycle"),
            )
            .arg(
                Arg::new("dot-foreign")
                    .long("dot-foreign")
                    .value_name("MODE")
                    .value_parser(["default", "ueid", "ueid-short", "exclude"])
                    .help("How cross-cycle references appear in DOT output"),
            )
            .arg(
                Arg::new("dot-pretty")
                    .long("dot-pretty")
                    .action(ArgAction::SetTrue)
                    .help("Indent DOT output"),
            ))
    }
}

#[async_trait]
impl CmdlineParseHook for CorePlugin {
    /// Builds the command, folds in every plugin's options and parses.
    ///
    /// `--help` and `--version` print and exit the process directly; any
    /// other parse failure is reported as a configuration error.
    async fn cmdline_parse(
        &self,
        pm: &PluginManager,
        argv: &[String],
    ) -> HookResult<Option<Config>> {
        let cmd = Command::new("entityd")
            .about("Entity monitoring agent")
            .version(env!("CARGO_PKG_VERSION"));
        let cmd = pm
            .hooks()
            .add_options
            .fold(cmd, |hook, cmd| async move { hook.add_options(cmd).await })
            .await?;

        match cmd.try_get_matches_from(argv) {
            Ok(matches) => Ok(Some(Config::new(matches))),
            Err(err) => match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    err.exit();
                }
                _ => {
                    let _ = err.print();
                    Err(HookError::new("invalid command line"))
                }
            },
        }
    }
}

#[async_trait]
impl MainLoopHook for CorePlugin {
    async fn main_loop(&self, session: &Arc<Session>) -> HookResult<Option<()>> {
        let Some(monitor) = session.service::<Monitor>("monitor") else {
            return Err(HookError::new("monitor service unavailable"));
        };

        let token = session.shutdown_token();
        let mut interval = tokio::time::interval(CYCLE_PERIOD);
        info!(period = ?CYCLE_PERIOD, "collection loop running");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let started = Instant::now();
            monitor.collect_entities(session).await;
            self.health.heartbeat();
            debug!(elapsed = ?started.elapsed(), "collection cycle took");
        }

        info!("collection loop drained");
        Ok(Some(()))
    }
}

#[async_trait]
impl SessionFinishHook for CorePlugin {
    async fn session_finish(&self, _session: &Arc<Session>) -> HookResult<()> {
        self.health.die();
        Ok(())
    }
}

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        "entityd.core"
    }

    fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
        vec![
            HookBinding::new(HookPoint::AddOptions(self.clone())),
            HookBinding::new(HookPoint::CmdlineParse(self.clone())),
            HookBinding::new(HookPoint::MainLoop(self.clone())),
            HookBinding::new(HookPoint::SessionFinish(self.clone())),
        ]
    }
}
