use crate::config::ClientConfig;
use crate::error::RoomError;
use crate::media::MediaDevices;
use crate::room::{LocalIdentity, RoomCommand, RoomEvent, RoomSnapshot, SessionOrchestrator};
use crate::signaling::SignalingContext;
use crate::transport::{RtcTransportFactory, TransportConfig, TransportFactory};
use meshroom_core::RoomId;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Handle the presentation layer drives the room through. Cheap to clone; the
/// orchestrator task stops once every handle is dropped or `shutdown` is called.
#[derive(Clone)]
pub struct RoomController {
    commands: mpsc::Sender<RoomCommand>,
    events: broadcast::Sender<RoomEvent>,
    snapshot: watch::Receiver<RoomSnapshot>,
}

impl RoomController {
    /// Spawns `orchestrator` on the current runtime.
    pub fn spawn<F, D>(orchestrator: SessionOrchestrator<F, D>) -> (Self, JoinHandle<()>)
    where
        F: TransportFactory,
        D: MediaDevices,
    {
        let (tx, rx) = mpsc::channel(64);
        let events = orchestrator.event_sender();
        let snapshot = orchestrator.watch_snapshot();
        let task = tokio::spawn(orchestrator.run(rx));

        let controller = Self {
            commands: tx,
            events,
            snapshot,
        };
        (controller, task)
    }

    /// Wires a WebSocket relay and native WebRTC transports from `config`.
    pub fn connect<D: MediaDevices>(
        identity: LocalIdentity,
        config: ClientConfig,
        devices: D,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let factory = RtcTransportFactory::new(TransportConfig {
            ice_servers: config.ice_servers.clone(),
        })?;
        let signaling = SignalingContext::connect(&config.signaling_url, config.reconnect_delay);
        info!(url = %config.signaling_url, user = %identity.user_id, "Connecting to relay");

        let orchestrator = SessionOrchestrator::new(identity, config, factory, devices, signaling);
        Ok(Self::spawn(orchestrator))
    }

    pub async fn join(&self, room_id: impl Into<RoomId>) -> Result<(), RoomError> {
        let room_id = room_id.into();
        self.request(|reply| RoomCommand::Join { room_id, reply })
            .await?
    }

    pub async fn toggle_video(&self) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::ToggleVideo { reply })
            .await?
    }

    pub async fn toggle_audio(&self) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::ToggleAudio { reply })
            .await?
    }

    pub async fn toggle_screen_share(&self) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::ToggleScreenShare { reply })
            .await?
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), RoomError> {
        let text = text.into();
        self.request(|reply| RoomCommand::SendChat { text, reply })
            .await?
    }

    pub async fn leave(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Leave { reply }).await
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> RoomCommand,
    ) -> Result<R, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| RoomError::OrchestratorStopped)?;
        rx.await.map_err(|_| RoomError::OrchestratorStopped)
    }
}
