//! Per-connection control loop.
//!
//! A session moves `Connecting -> Active -> Closed`. It registers the
//! connection, sends the onboarding snapshot, announces the player, turns
//! movement messages into registry updates and broadcasts, and cleans up on
//! every exit path.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionError, ConnectionHandle, ConnectionReader},
    dispatcher::Dispatcher,
    message::{ClientEvent, PlayerId, ServerEvent, decode_frame},
    registry::Registry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

pub struct Session {
    id: PlayerId,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    state: SessionState,
}

impl Session {
    pub fn new(id: PlayerId, registry: Arc<Registry>, dispatcher: Dispatcher) -> Self {
        Self {
            id,
            registry,
            dispatcher,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the connection until it fails, then cleans up.
    pub async fn run(mut self, connection: Connection) -> SessionState {
        let (handle, mut reader) = connection.split();

        match self.activate(&handle).await {
            Ok(()) => {
                let reason = self.read_loop(&mut reader).await;
                debug!(player = %self.id, %reason, "read loop ended");
            }
            Err(error) => {
                warn!(player = %self.id, %error, "failed to send current players");
            }
        }

        self.close(&handle).await;
        self.state
    }

    /// Registers the connection and sends the onboarding snapshot before any
    /// broadcast can reach it, then announces the new player.
    async fn activate(&mut self, handle: &ConnectionHandle) -> Result<(), ConnectionError> {
        let mut writer = handle.lock().await;
        let players = self.registry.register(self.id.clone(), handle.clone()).await;
        self.state = SessionState::Active;

        let joined = players.get(&self.id).cloned();
        info!(player = %self.id, online = players.len(), "player joined");

        let onboarding = ServerEvent::CurrentPlayers {
            players,
            my_id: self.id.clone(),
        };
        let frame = onboarding
            .to_frame()
            .map_err(|error| ConnectionError::Transport(Box::new(error)))?;
        writer.write_message(frame).await?;
        drop(writer);

        if let Some(state) = joined {
            self.dispatcher.publish(ServerEvent::PlayerJoined(state));
        }
        Ok(())
    }

    async fn read_loop(&mut self, reader: &mut ConnectionReader) -> ConnectionError {
        loop {
            let frame = match reader.read_message().await {
                Ok(frame) => frame,
                Err(error) => return error,
            };

            match decode_frame(&frame) {
                Ok(event) => self.handle_event(event).await,
                Err(error) => debug!(player = %self.id, %error, "discarding message"),
            }
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::PlayerMoved { x, y, facing } => {
                if let Some(state) = self.registry.update_position(&self.id, x, y, facing).await {
                    self.dispatcher.publish(ServerEvent::PlayerMoved(state));
                }
            }
        }
    }

    async fn close(&mut self, handle: &ConnectionHandle) {
        if self.state == SessionState::Closed {
            return;
        }
        let was_active = self.state == SessionState::Active;
        self.state = SessionState::Closed;
        if !was_active {
            return;
        }

        self.registry.unregister(&self.id).await;
        handle.close().await;
        let online = self.registry.len().await;
        info!(player = %self.id, online, "player left");
        self.dispatcher.publish(ServerEvent::PlayerLeft {
            id: self.id.clone(),
        });
    }
}
