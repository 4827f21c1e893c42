//! Per-connection protocol state machine
//!
//! A [`SessionProtocol`] owns one session from open to close:
//!
//! 1. **Connecting**: attach to the bus, subscribe to the player's own and
//!    realm topics, mark the player online, send the realm snapshot.
//! 2. **Open**: receive one frame at a time, decode it and dispatch on the
//!    message. Rejections are logged and the loop continues; any other error
//!    ends the session.
//! 3. **Closing**: detach from the bus, mark the player offline and save it.
//!    Runs on every exit path. A failed save is logged, not raised.
//! 4. **Closed**.
//!
//! Frames arrive through a [`FrameSource`] so the loop does not care whether
//! it is reading a WebSocket or a scripted test feed.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::bus::{PubSubBus, Topic};
use crate::config::ServerConfig;
use crate::error::{NetworkError, ProtocolError, RealmkeepError, Result};
use crate::game::entity::{Entity, EntityId};
use crate::game::realm::RealmId;
use crate::net::session::{Session, SessionId, SessionState};
use crate::protocol::frame::Frame;
use crate::protocol::messages::{Message, RealmSnapshot};
use crate::protocol::viewport::{self, ViewportState};
use crate::store::{GameStore, Handle};

/// Inbound frame feed for one session
pub trait FrameSource: Send {
    /// Next raw frame; `None` once the peer has closed
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Vec<u8>>>>;
}

/// Per-session limits taken from the server configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_frame_size: usize,
    pub max_viewport_regions: usize,
    pub resend_avatar: bool,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            max_viewport_regions: config.max_viewport_regions,
            resend_avatar: config.resend_avatar,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Everything a message handler can reach for one session
pub struct SessionContext {
    pub session: Arc<Session>,
    pub player: Handle<Entity>,
    pub realm_id: RealmId,
    pub store: Arc<GameStore>,
    pub bus: Arc<PubSubBus>,
    pub settings: SessionSettings,
    pub viewport: ViewportState,
}

impl SessionContext {
    /// Resolve the session's player entity. It must exist and be a player.
    pub async fn open(
        session: Arc<Session>,
        store: Arc<GameStore>,
        bus: Arc<PubSubBus>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let player = store.entities().load(session.player_id).await?;
        let (is_player, realm_id) = {
            let entity = player.read();
            (entity.is_player(), entity.realm_id)
        };
        if !is_player {
            return Err(RealmkeepError::rejected(format!(
                "entity {} is not a player",
                session.player_id
            )));
        }
        Ok(Self {
            session,
            player,
            realm_id,
            store,
            bus,
            settings,
            viewport: ViewportState::default(),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    pub fn player_id(&self) -> EntityId {
        self.player.id()
    }

    /// Encode and queue one message
    pub async fn send(&self, origin: Option<EntityId>, message: impl Into<Message>) -> Result<()> {
        let frame = message.into().to_frame(origin).encode();
        self.session.send(frame).await
    }

    pub fn subscribe(&self, topic: Topic) -> bool {
        self.bus.subscribe(self.session.id, topic)
    }

    pub fn unsubscribe(&self, topic: Topic) -> bool {
        self.bus.unsubscribe(self.session.id, topic)
    }
}

/// The receive loop and lifecycle of one session
pub struct SessionProtocol<S: FrameSource> {
    ctx: SessionContext,
    source: S,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<S: FrameSource> SessionProtocol<S> {
    pub fn new(ctx: SessionContext, source: S) -> Self {
        Self {
            ctx,
            source,
            shutdown: None,
        }
    }

    /// End the receive loop when the server shuts down
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Run the session to completion. Cleanup always runs before returning.
    pub async fn run(mut self) -> Result<()> {
        let outcome = match self.on_open().await {
            Ok(()) => self.receive_loop().await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => debug!(session_id = self.ctx.session_id(), "Session ended"),
            Err(e) => warn!(session_id = self.ctx.session_id(), error = %e, "Session ended with error"),
        }

        self.on_close().await;
        outcome
    }

    async fn on_open(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        ctx.bus.attach(ctx.session_id(), ctx.session.outbound());
        ctx.subscribe(Topic::Entity(ctx.player_id()));
        ctx.subscribe(Topic::Realm(ctx.realm_id));

        if let Some(player) = ctx.player.write().player_mut() {
            player.online = true;
        }
        ctx.store.entities().save(&ctx.player).await?;

        let realm = ctx.store.realms().load(ctx.realm_id).await?;
        let snapshot = RealmSnapshot::from(&*realm.read());
        ctx.send(None, snapshot).await?;

        if !ctx.session.transition_state(SessionState::Connecting, SessionState::Open) {
            return Err(ProtocolError::Inconsistent(format!(
                "session {} left Connecting before open completed",
                ctx.session_id()
            ))
            .into());
        }
        info!(
            session_id = ctx.session_id(),
            player_id = %ctx.player_id(),
            realm_id = %ctx.realm_id,
            "Session open"
        );
        Ok(())
    }

    async fn next_inbound(&mut self) -> Result<Option<Vec<u8>>> {
        match &mut self.shutdown {
            Some(shutdown) => tokio::select! {
                frame = self.source.next_frame() => frame,
                _ = shutdown.recv() => Ok(None),
            },
            None => self.source.next_frame().await,
        }
    }

    async fn receive_loop(&mut self) -> Result<()> {
        loop {
            let Some(raw) = self.next_inbound().await? else {
                return Ok(());
            };
            if !self.ctx.session.is_active() {
                return Ok(());
            }
            self.ctx.session.touch();

            match self.handle_frame(&raw).await {
                Ok(()) => {}
                Err(e) if e.is_rejection() => {
                    warn!(session_id = self.ctx.session_id(), error = %e, "Rejected message");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_frame(&mut self, raw: &[u8]) -> Result<()> {
        if raw.len() > self.ctx.settings.max_frame_size {
            return Err(ProtocolError::PacketTooLarge {
                size: raw.len(),
                max: self.ctx.settings.max_frame_size,
            }
            .into());
        }
        let frame = Frame::decode(raw)?;
        let message = Message::decode(&frame)?;
        self.dispatch(frame.origin, message).await
    }

    async fn dispatch(&mut self, origin: Option<EntityId>, message: Message) -> Result<()> {
        if let Some(origin) = origin {
            if origin != self.ctx.player_id() {
                return Err(RealmkeepError::rejected(format!(
                    "{} claims origin {} but session controls {}",
                    message.name(),
                    origin,
                    self.ctx.player_id()
                )));
            }
        }
        match message {
            Message::ViewportUpdate(update) => {
                viewport::handle_viewport(&mut self.ctx, update).await?;
                Ok(())
            }
            other => Err(ProtocolError::UnexpectedMessage {
                state: self.ctx.session.state().to_string(),
                message: other.name().to_string(),
            }
            .into()),
        }
    }

    async fn on_close(&mut self) {
        let ctx = &self.ctx;
        ctx.session.set_state(SessionState::Closing);

        let topics = ctx.bus.detach(ctx.session_id());

        if let Some(player) = ctx.player.write().player_mut() {
            player.online = false;
        }
        if let Err(e) = ctx.store.entities().save(&ctx.player).await {
            error!(
                session_id = ctx.session_id(),
                player_id = %ctx.player_id(),
                error = %e,
                "Failed to persist player on close"
            );
        }

        ctx.session.set_state(SessionState::Closed);
        info!(
            session_id = ctx.session_id(),
            topics = topics,
            "Session closed"
        );
    }
}

/// Connection-level failures that only mean the peer went away
pub fn is_disconnect(error: &RealmkeepError) -> bool {
    matches!(error, RealmkeepError::Network(NetworkError::ConnectionClosed))
}
