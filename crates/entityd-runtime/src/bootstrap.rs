//! Process bootstrap.
//!
//! [`run`] is the whole life of the agent: install logging, build the
//! plugin manager, register the builtin plugins (minus anything matched by
//! `--disable`), then walk the hook phases — parse the command line,
//! configure, start the session, hand control to the main loop, and drain.
//!
//! Exit codes: 0 for an orderly shutdown, 1 for a fatal startup error,
//! 130 when a signal interrupted the run.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use entityd_collector_host::HostPlugin;
use entityd_framework::{PluginManager, Session};
use entityd_transport::EntitySender;

use crate::core::CorePlugin;
use crate::kvstore::KvStorePlugin;
use crate::logging::LoggingBuilder;
use crate::monitor::MonitorPlugin;

/// Exit code for an interrupted run.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Runs the agent to completion and returns the process exit code.
pub async fn run(argv: Vec<String>) -> u8 {
    init_logging(&argv);

    let pm = Arc::new(PluginManager::new());
    pm.set_register_callback(Arc::new(|pm, name| {
        Box::pin(fire_plugin_registered(pm, name))
    }));

    register_builtins(&pm, &disable_patterns(&argv)).await;

    // ── Parse ────────────────────────────────────────────────────────────
    let pm_for_parse = pm.clone();
    let argv = Arc::new(argv);
    let parse_argv = argv.clone();
    let config = match pm
        .hooks()
        .cmdline_parse
        .call_first(move |hook| {
            let pm = pm_for_parse.clone();
            let argv = parse_argv.clone();
            async move { hook.cmdline_parse(&pm, &argv).await }
        })
        .await
    {
        Ok(Some(config)) => Arc::new(config),
        Ok(None) => {
            error!("no plugin parsed the command line; is entityd.core disabled?");
            return 1;
        }
        Err(err) => {
            error!(error = %err, "command line parsing failed");
            return 1;
        }
    };

    // ── Configure ────────────────────────────────────────────────────────
    let configure_result = pm
        .hooks()
        .configure
        .call_unit(|hook| {
            let config = config.clone();
            async move { hook.configure(&config).await }
        })
        .await;
    if let Err(err) = configure_result {
        error!(error = %err, "plugin configuration failed");
        return 1;
    }

    // ── Session ──────────────────────────────────────────────────────────
    let session = Session::new(pm.clone(), config);
    tokio::spawn(wait_for_signals(session.clone()));

    let start_result = pm
        .hooks()
        .session_start
        .call_unit(|hook| {
            let session = session.clone();
            async move { hook.session_start(&session).await }
        })
        .await;
    if let Err(err) = start_result {
        error!(error = %err, "session start failed");
        return 1;
    }
    info!("session started");

    // ── Main loop ────────────────────────────────────────────────────────
    let loop_result = pm
        .hooks()
        .main_loop
        .call_first(|hook| {
            let session = session.clone();
            async move { hook.main_loop(&session).await }
        })
        .await;
    match loop_result {
        Ok(Some(())) => {}
        Ok(None) => warn!("no plugin drove the main loop"),
        Err(err) => error!(error = %err, "main loop failed"),
    }

    // ── Drain ────────────────────────────────────────────────────────────
    let finish_result = pm
        .hooks()
        .session_finish
        .call_unit(|hook| {
            let session = session.clone();
            async move { hook.session_finish(&session).await }
        })
        .await;
    if let Err(err) = finish_result {
        warn!(error = %err, "session finish reported an error");
    }
    info!("session finished");

    if session.was_interrupted() {
        EXIT_INTERRUPTED
    } else {
        0
    }
}

async fn fire_plugin_registered(pm: &PluginManager, name: &str) {
    let result = pm
        .hooks()
        .plugin_registered
        .call_unit(|hook| async move { hook.plugin_registered(pm, name).await })
        .await;
    if let Err(err) = result {
        warn!(plugin = %name, error = %err, "entityd_plugin_registered hook failed");
    }
}

/// Registers the builtin plugins, honouring `--disable` patterns.
///
/// A plugin that fails to register is dropped with an error; the agent
/// carries on with the rest.
async fn register_builtins(pm: &Arc<PluginManager>, disabled: &[String]) {
    macro_rules! builtin {
        ($plugin:expr) => {
            let plugin = Arc::new($plugin);
            let name = entityd_framework::Plugin::name(plugin.as_ref()).to_string();
            if is_disabled(&name, disabled) {
                info!(plugin = %name, "plugin disabled");
            } else if let Err(err) = pm.register(plugin).await {
                error!(plugin = %name, error = %err, "failed to register plugin");
            }
        };
    }

    builtin!(CorePlugin::new());
    builtin!(KvStorePlugin::new());
    builtin!(EntitySender::new());
    builtin!(MonitorPlugin::new());
    builtin!(HostPlugin::new());
}

/// Matches a plugin name against the `--disable` patterns.
///
/// Patterns are globs tested against the full dotted name and against its
/// final segment, so both `--disable 'entityd.host'` and `--disable host`
/// work. An invalid pattern falls back to literal comparison.
pub fn is_disabled(name: &str, patterns: &[String]) -> bool {
    let short = name.rsplit('.').next().unwrap_or(name);
    patterns.iter().any(|pattern| match glob::Pattern::new(pattern) {
        Ok(glob) => glob.matches(name) || glob.matches(short),
        Err(_) => pattern == name || pattern == short,
    })
}

/// Pulls `--disable` values out of the raw command line.
///
/// Runs before clap: disabled plugins must never register, but the full
/// parser only exists after registration.
pub fn disable_patterns(argv: &[String]) -> Vec<String> {
    let mut patterns = Vec::new();
    let mut args = argv.iter();
    while let Some(arg) = args.next() {
        if arg == "--disable" {
            if let Some(value) = args.next() {
                patterns.push(value.clone());
            }
        } else if let Some(value) = arg.strip_prefix("--disable=") {
            patterns.push(value.to_string());
        }
    }
    patterns
}

/// Reads `--log-level`/`-l` ahead of parsing, for logging setup.
fn scan_log_level(argv: &[String]) -> Option<u8> {
    let mut args = argv.iter();
    while let Some(arg) = args.next() {
        if arg == "-l" || arg == "--log-level" {
            if let Some(value) = args.next() {
                return value.parse().ok();
            }
        } else if let Some(value) = arg.strip_prefix("--log-level=") {
            return value.parse().ok();
        }
    }
    None
}

fn init_logging(argv: &[String]) {
    let mut builder = LoggingBuilder::new().with_numeric_level(scan_log_level(argv).unwrap_or(20));
    if argv.iter().any(|arg| arg == "--trace") {
        builder = builder.directive("entityd_framework=trace");
    }
    // Tolerate an installed subscriber (tests, embedding).
    let _ = builder.try_init();
}

/// Blocks until SIGINT or SIGTERM, then interrupts the session.
async fn wait_for_signals(session: Arc<Session>) {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler");
                if signal::ctrl_c().await.is_ok() {
                    info!("received interrupt, shutting down");
                    session.interrupt();
                }
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => info!("received interrupt, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
        session.interrupt();
    }

    #[cfg(not(unix))]
    {
        if signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
            session.interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn disable_patterns_support_both_forms() {
        let argv = strings(&["entityd", "--disable", "entityd.host", "--disable=docker*"]);
        assert_eq!(disable_patterns(&argv), ["entityd.host", "docker*"]);
    }

    #[test]
    fn disable_matches_full_name_and_segment() {
        let patterns = strings(&["host"]);
        assert!(is_disabled("entityd.host", &patterns));
        assert!(!is_disabled("entityd.kvstore", &patterns));

        let globs = strings(&["entityd.k*"]);
        assert!(is_disabled("entityd.kvstore", &globs));
        assert!(!is_disabled("entityd.host", &globs));

        let broken = strings(&["[oops"]);
        assert!(is_disabled("[oops", &broken));
        assert!(!is_disabled("entityd.host", &broken));
    }

    #[test]
    fn log_level_scan_handles_both_forms() {
        assert_eq!(scan_log_level(&strings(&["entityd", "-l", "10"])), Some(10));
        assert_eq!(
            scan_log_level(&strings(&["entityd", "--log-level=30"])),
            Some(30)
        );
        assert_eq!(scan_log_level(&strings(&["entityd"])), None);
    }
}
