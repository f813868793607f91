use crate::media::{LocalTrack, TrackKind};
use crate::transport::{
    PeerKey, PeerTransport, RemoteTrackInfo, TrackSwap, TransportConfig, TransportEvent,
    TransportFactory, TransportState,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use meshroom_core::{IceCandidate, SdpKind, SessionDescription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds webrtc-rs peer connections sharing one media engine setup.
pub struct RtcTransportFactory {
    api: API,
    config: TransportConfig,
}

impl RtcTransportFactory {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    type Transport = RtcTransport;

    async fn create(
        &self,
        key: PeerKey,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<RtcTransport> {
        let rtc_config = RTCConfiguration {
            ice_servers: self
                .config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .context("Failed to create peer connection")?,
        );

        RtcTransport::wire_callbacks(&peer_connection, &key, &events);

        Ok(RtcTransport {
            key,
            peer_connection,
            video_sender: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct RtcTransport {
    key: PeerKey,
    peer_connection: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    closed: AtomicBool,
}

impl RtcTransport {
    fn wire_callbacks(
        pc: &Arc<RTCPeerConnection>,
        key: &PeerKey,
        events: &mpsc::Sender<TransportEvent>,
    ) {
        let state_tx = events.clone();
        let key_state = key.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            let key = key_state.clone();

            Box::pin(async move {
                info!("Peer connection state for {}: {:?}", key, s);
                let _ = tx
                    .send(TransportEvent::ConnectionState(key, map_peer_state(s)))
                    .await;
            })
        }));

        let ice_state_tx = events.clone();
        let key_ice_state = key.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let tx = ice_state_tx.clone();
            let key = key_ice_state.clone();

            Box::pin(async move {
                debug!("ICE connection state for {}: {:?}", key, s);
                let _ = tx.send(TransportEvent::IceState(key, map_ice_state(s))).await;
            })
        }));

        let ice_tx = events.clone();
        let key_ice = key.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let key = key_ice.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate = IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                };
                let _ = tx
                    .send(TransportEvent::CandidateGenerated(key, candidate))
                    .await;
            })
        }));

        let track_tx = events.clone();
        let key_track = key.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();
                let key = key_track.clone();

                Box::pin(async move {
                    let info = RemoteTrackInfo {
                        track_id: track.id(),
                        stream_id: track.stream_id(),
                        kind: match track.kind() {
                            RTPCodecType::Audio => TrackKind::Audio,
                            _ => TrackKind::Video,
                        },
                    };
                    info!("Remote {:?} track {} from {}", info.kind, info.track_id, key);

                    tokio::spawn(drain_remote_track(key.clone(), track));
                    let _ = tx.send(TransportEvent::RemoteTrack(key, info)).await;
                })
            },
        ));
    }

    fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
        let rtc = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        rtc.context("Invalid session description")
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn attach_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .with_context(|| format!("Failed to attach track {}", track.id()))?;

        if track.kind() == TrackKind::Video {
            *self.video_sender.lock().await = Some(sender);
        }
        debug!("Attached {} to {}", track.id(), self.key);
        Ok(())
    }

    async fn replace_video_track(&self, track: Option<Arc<LocalTrack>>) -> Result<TrackSwap> {
        let sender = self.video_sender.lock().await.clone();

        match (sender, track) {
            (Some(sender), track) => {
                let rtc = track
                    .as_ref()
                    .map(|t| t.rtc_track() as Arc<dyn TrackLocal + Send + Sync>);
                sender
                    .replace_track(rtc)
                    .await
                    .context("Failed to replace video track")?;
                Ok(TrackSwap::Replaced)
            }
            (None, Some(track)) => {
                self.attach_track(track).await?;
                Ok(TrackSwap::Added)
            }
            (None, None) => Ok(TrackSwap::Unchanged),
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .context("Failed to create offer")?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .context("Failed to create answer")?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = Self::to_rtc_description(desc)?;
        self.peer_connection.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = Self::to_rtc_description(desc)?;
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .context("Failed to add ICE candidate")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

async fn drain_remote_track(key: PeerKey, track: Arc<TrackRemote>) {
    let mut packets: u64 = 0;
    while track.read_rtp().await.is_ok() {
        packets += 1;
        if packets % 500 == 0 {
            trace!("{} packets received on {} from {}", packets, track.id(), key);
        }
    }
    debug!("Remote track {} from {} ended after {} packets", track.id(), key, packets);
}

fn map_peer_state(s: RTCPeerConnectionState) -> TransportState {
    match s {
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}

fn map_ice_state(s: RTCIceConnectionState) -> TransportState {
    match s {
        RTCIceConnectionState::Checking => TransportState::Checking,
        RTCIceConnectionState::Connected => TransportState::Connected,
        RTCIceConnectionState::Completed => TransportState::Completed,
        RTCIceConnectionState::Disconnected => TransportState::Disconnected,
        RTCIceConnectionState::Failed => TransportState::Failed,
        RTCIceConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}
