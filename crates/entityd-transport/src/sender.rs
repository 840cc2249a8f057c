//! The `entityd.sender` plugin.
//!
//! Pushes encoded updates to the model builder over a CURVE-authenticated
//! PUSH socket. The transport is fire-and-forget: sends never block, and a
//! full outbound buffer costs the queued messages rather than the cycle —
//! the socket is discarded with a warning and re-created on the next send.

use std::sync::Arc;

use async_trait::async_trait;
use clap::{Arg, ArgAction, Command, value_parser};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use entityd_core::EntityUpdate;
use entityd_framework::{
    DEFAULT_DEST, DEFAULT_KEYDIR, HookBinding, HookError, HookPoint, HookResult, OptionsHook,
    Plugin, SendEntityHook, Session, SessionFinishHook, SessionStartHook,
};

use crate::codec;
use crate::keys::{self, CurveKeys, KeyError};
use crate::optimiser::StreamOptimiser;

/// Outbound high-water mark, in messages.
const SNDHWM: i32 = 500;

/// How long a closing socket may flush residual frames, in milliseconds.
const CLOSE_LINGER_MS: i32 = 500;

/// Transport errors.
#[derive(Debug, Error)]
pub enum SendError {
    /// `send_entity` was called outside a started session.
    #[error("sender session has not started")]
    NotStarted,

    /// Key material could not be loaded.
    #[error(transparent)]
    Keys(#[from] KeyError),

    /// The messaging layer failed.
    #[error("transport: {0}")]
    Socket(#[from] zmq::Error),
}

struct SenderState {
    context: zmq::Context,
    socket: Option<zmq::Socket>,
    keys: Option<CurveKeys>,
    dest: String,
    optimiser: Option<StreamOptimiser>,
}

impl SenderState {
    /// Creates the socket on first use: bounded send buffer, no linger,
    /// curve client auth, connected to the configured destination.
    fn ensure_socket(&mut self) -> Result<(), SendError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let keys = self.keys.as_ref().ok_or(SendError::NotStarted)?;
        debug!(dest = %self.dest, "creating sender socket");
        let socket = self.context.socket(zmq::PUSH)?;
        socket.set_sndhwm(SNDHWM)?;
        socket.set_linger(0)?;
        socket.set_curve_publickey(&keys.client_public)?;
        socket.set_curve_secretkey(&keys.client_secret)?;
        socket.set_curve_serverkey(&keys.server_public)?;
        socket.connect(&self.dest)?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Pushes one message without blocking.
    ///
    /// A full buffer or socket failure discards the socket (dropping its
    /// queue); the next send starts over with a fresh one.
    fn send_frames(&mut self, payload: &[u8]) -> Result<(), SendError> {
        self.ensure_socket()?;
        let result = match &self.socket {
            Some(socket) => {
                socket.send_multipart([codec::PROTOCOL_VERSION, payload], zmq::DONTWAIT)
            }
            None => return Err(SendError::NotStarted),
        };
        match result {
            Ok(()) => Ok(()),
            Err(zmq::Error::EAGAIN) => {
                warn!("could not send, message buffers are full; discarding buffer");
                self.socket = None;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "send failed; discarding socket");
                self.socket = None;
                Ok(())
            }
        }
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            if let Err(err) = socket.set_linger(CLOSE_LINGER_MS) {
                warn!(error = %err, "failed to set close linger");
            }
        }
    }
}

/// Plugin sending entity updates to the model builder.
pub struct EntitySender {
    state: Mutex<SenderState>,
}

impl EntitySender {
    pub fn new() -> Self {
        EntitySender {
            state: Mutex::new(SenderState {
                context: zmq::Context::new(),
                socket: None,
                keys: None,
                dest: DEFAULT_DEST.to_string(),
                optimiser: None,
            }),
        }
    }
}

impl Default for EntitySender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OptionsHook for EntitySender {
    async fn add_options(&self, cmd: Command) -> HookResult<Command> {
        Ok(cmd
            .arg(
                Arg::new("dest")
                    .long("dest")
                    .value_name("ADDR")
                    .default_value(DEFAULT_DEST)
                    .help("Address of the modeld destination"),
            )
            .arg(
                Arg::new("keydir")
                    .long("keydir")
                    .value_name("DIR")
                    .value_parser(value_parser!(std::path::PathBuf))
                    .default_value(DEFAULT_KEYDIR)
                    .help("Directory holding the curve key material"),
            )
            .arg(
                Arg::new("stream-optimise")
                    .long("stream-optimise")
                    .action(ArgAction::SetTrue)
                    .help("Send only changed attributes between full refreshes"),
            )
            .arg(
                Arg::new("stream-optimise-frequency")
                    .long("stream-optimise-frequency")
                    .value_name("N")
                    .value_parser(value_parser!(u32).range(1..))
                    .default_value("5")
                    .help("Cycles between full attribute refreshes"),
            ))
    }
}

#[async_trait]
impl SessionStartHook for EntitySender {
    /// Loads the key material and arms the optimiser.
    ///
    /// Missing or unreadable keys are fatal: without them no socket can
    /// ever authenticate.
    async fn session_start(&self, session: &Arc<Session>) -> HookResult<()> {
        let config = session.config();
        let keys = keys::load_keys(&config.keydir()).map_err(HookError::new)?;

        let mut state = self.state.lock();
        state.keys = Some(keys);
        state.dest = config.dest();
        state.optimiser = config
            .stream_optimise()
            .then(|| StreamOptimiser::new(config.stream_optimise_frequency()));
        Ok(())
    }
}

#[async_trait]
impl SessionFinishHook for EntitySender {
    /// Closes the socket, allowing a short linger to flush queued frames.
    async fn session_finish(&self, _session: &Arc<Session>) -> HookResult<()> {
        self.state.lock().close();
        Ok(())
    }
}

#[async_trait]
impl SendEntityHook for EntitySender {
    async fn send_entity(&self, _session: &Arc<Session>, entity: &EntityUpdate) -> HookResult<()> {
        let mut state = self.state.lock();

        let mut outgoing = entity.clone();
        if let Some(optimiser) = state.optimiser.as_mut() {
            optimiser.apply(&mut outgoing);
        }

        let payload = match codec::encode(&outgoing) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(ueid = %outgoing.ueid(), error = %err, "update not encodable; skipping");
                return Ok(());
            }
        };

        state.send_frames(&payload).map_err(HookError::new)
    }
}

impl Plugin for EntitySender {
    fn name(&self) -> &str {
        "entityd.sender"
    }

    fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
        vec![
            HookBinding::new(HookPoint::AddOptions(self.clone())),
            HookBinding::new(HookPoint::SessionStart(self.clone())),
            HookBinding::new(HookPoint::SessionFinish(self.clone())),
            HookBinding::new(HookPoint::SendEntity(self.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use clap::Command;
    use entityd_core::traits;
    use entityd_framework::{Config, PluginManager};

    use super::*;
    use crate::keys::write_test_keydir;

    async fn started_sender(dir: &std::path::Path, extra: &[&str]) -> (EntitySender, Arc<Session>) {
        write_test_keydir(dir);
        let sender = EntitySender::new();
        let cmd = sender.add_options(Command::new("entityd")).await.unwrap();

        let keydir = dir.to_str().unwrap();
        let mut argv = vec!["entityd", "--keydir", keydir];
        argv.extend_from_slice(extra);
        let config = Arc::new(Config::new(cmd.get_matches_from(argv)));

        let session = Session::new(Arc::new(PluginManager::new()), config);
        sender.session_start(&session).await.unwrap();
        (sender, session)
    }

    fn update() -> EntityUpdate {
        let mut update = EntityUpdate::new("Host");
        update.attrs.set("fqdn", "h1", &[traits::ENTITY_ID]);
        update
    }

    #[tokio::test]
    async fn missing_keys_fail_session_start() {
        let sender = EntitySender::new();
        let cmd = sender.add_options(Command::new("entityd")).await.unwrap();
        let config = Arc::new(Config::new(cmd.get_matches_from([
            "entityd",
            "--keydir",
            "/nonexistent/keys",
        ])));
        let session = Session::new(Arc::new(PluginManager::new()), config);
        assert!(sender.session_start(&session).await.is_err());
    }

    #[tokio::test]
    async fn backpressure_recycles_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing listens on the destination, so frames pile up in the
        // outbound pipe until the high-water mark forces a non-blocking
        // send to fail.
        let (sender, session) =
            started_sender(dir.path(), &["--dest", "tcp://127.0.0.1:19719"]).await;

        let mut dropped = false;
        for _ in 0..(SNDHWM as usize * 4) {
            sender.send_entity(&session, &update()).await.unwrap();
            if sender.state.lock().socket.is_none() {
                dropped = true;
                break;
            }
        }
        assert!(dropped, "buffer never filled");

        // The next send starts over with a fresh socket.
        sender.send_entity(&session, &update()).await.unwrap();
        assert!(sender.state.lock().socket.is_some());
    }

    #[tokio::test]
    async fn session_finish_drops_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (sender, session) =
            started_sender(dir.path(), &["--dest", "tcp://127.0.0.1:19720"]).await;

        sender.send_entity(&session, &update()).await.unwrap();
        assert!(sender.state.lock().socket.is_some());

        sender.session_finish(&session).await.unwrap();
        assert!(sender.state.lock().socket.is_none());
    }

    #[tokio::test]
    async fn optimised_sends_shrink_steady_state_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let (sender, session) = started_sender(
            dir.path(),
            &["--dest", "tcp://127.0.0.1:19721", "--stream-optimise"],
        )
        .await;

        for _ in 0..3 {
            sender.send_entity(&session, &update()).await.unwrap();
        }
        // The optimiser remembered the attribute baseline for the UEID.
        let state = sender.state.lock();
        assert!(state.optimiser.is_some());
    }
}
