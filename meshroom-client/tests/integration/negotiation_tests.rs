use meshroom_client::room::{LocalIdentity, RoomEvent, RoomPhase, SessionOrchestrator};
use meshroom_client::session::NegotiationState;
use meshroom_client::transport::{RemoteTrackInfo, TransportEvent};
use meshroom_client::media::TrackKind;
use meshroom_client::{ClientConfig, MediaConstraints, SyntheticDevices};
use meshroom_core::{IceCandidate, Participant, RoomId, SessionDescription, SignalMessage, UserId};
use tokio::sync::mpsc;

use crate::utils::{MockTransportFactory, RecordingChannel, TransportCall, init_tracing};

struct Harness {
    orch: SessionOrchestrator<MockTransportFactory, SyntheticDevices>,
    factory: MockTransportFactory,
    outbound: RecordingChannel,
    _inbound: mpsc::Sender<meshroom_client::ChannelEvent>,
}

async fn joined_as(local: &str, existing: &[&str]) -> Harness {
    joined_with(local, existing, ClientConfig::default()).await
}

async fn joined_with(local: &str, existing: &[&str], config: ClientConfig) -> Harness {
    init_tracing();
    let factory = MockTransportFactory::new();
    let (outbound, signaling, inbound) = RecordingChannel::context();
    let identity = LocalIdentity {
        user_id: UserId::from(local),
        display_name: local.to_owned(),
    };
    let mut orch = SessionOrchestrator::new(
        identity,
        config,
        factory.clone(),
        SyntheticDevices::default(),
        signaling,
    );

    orch.join(RoomId::from("lab")).await.unwrap();
    let participants = existing
        .iter()
        .map(|id| Participant::new(UserId::from(*id), id.to_uppercase()))
        .collect();
    orch.dispatch(SignalMessage::RoomJoined { participants }).await;
    assert_eq!(orch.phase(), RoomPhase::Joined);

    Harness {
        orch,
        factory,
        outbound,
        _inbound: inbound,
    }
}

fn camera_less() -> ClientConfig {
    ClientConfig {
        media: MediaConstraints {
            video: false,
            audio: true,
        },
        ..ClientConfig::default()
    }
}

fn user_joined(id: &str) -> SignalMessage {
    SignalMessage::UserJoined(Participant::new(UserId::from(id), id.to_uppercase()))
}

fn user_left(id: &str) -> SignalMessage {
    SignalMessage::UserLeft {
        user_id: UserId::from(id),
    }
}

fn offer_from(from: &str, to: &str, sdp: &str) -> SignalMessage {
    SignalMessage::Offer {
        offer: SessionDescription::offer(sdp),
        to: UserId::from(to),
        from: UserId::from(from),
    }
}

fn answer_from(from: &str, to: &str, sdp: &str) -> SignalMessage {
    SignalMessage::Answer {
        answer: SessionDescription::answer(sdp),
        to: UserId::from(to),
        from: UserId::from(from),
    }
}

fn candidate_from(from: &str, to: &str, n: u16) -> SignalMessage {
    let mut candidate = IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"));
    candidate.sdp_mid = Some("0".to_owned());
    candidate.sdp_m_line_index = Some(0);
    SignalMessage::IceCandidate {
        candidate,
        to: UserId::from(to),
        from: UserId::from(from),
    }
}

fn state_of(h: &Harness, user: &str) -> Option<NegotiationState> {
    h.orch.registry().get(&UserId::from(user)).map(|s| s.state())
}

#[tokio::test]
async fn test_joiner_offers_to_every_existing_participant() {
    let h = joined_as("dave", &["bob", "carol"]).await;

    let offers = h.outbound.sent_of_kind("offer");
    assert_eq!(offers.len(), 2);
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::HaveLocalOffer));
    assert_eq!(state_of(&h, "carol"), Some(NegotiationState::HaveLocalOffer));

    // Audio goes in before video so both m-lines are in the first offer.
    let bob = h.factory.latest_for(&UserId::from("bob")).unwrap();
    let kinds: Vec<TrackKind> = bob.attached().into_iter().map(|(_, k)| k).collect();
    assert_eq!(kinds, vec![TrackKind::Audio, TrackKind::Video]);
}

#[tokio::test]
async fn test_candidate_before_offer_is_buffered_then_flushed() {
    let mut h = joined_as("alice", &[]).await;

    h.orch
        .dispatch(SignalMessage::UserJoined(Participant::new(
            UserId::from("bob"),
            "Bob",
        )))
        .await;
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::New));
    assert!(h.outbound.sent_of_kind("offer").is_empty());

    h.orch.dispatch(candidate_from("bob", "alice", 1)).await;
    h.orch.dispatch(candidate_from("bob", "alice", 2)).await;

    let transport = h.factory.latest_for(&UserId::from("bob")).unwrap();
    assert!(transport.remote_candidates().is_empty());
    assert_eq!(h.orch.snapshot().sessions[0].pending_candidates, 2);

    h.orch.dispatch(offer_from("bob", "alice", "offer-from-bob")).await;

    let calls = transport.calls();
    let set_remote = calls
        .iter()
        .position(|c| matches!(c, TransportCall::SetRemote(_)))
        .unwrap();
    let first_candidate = calls
        .iter()
        .position(|c| matches!(c, TransportCall::AddCandidate(_)))
        .unwrap();
    assert!(set_remote < first_candidate);
    assert_eq!(transport.remote_candidates().len(), 2);
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));

    let answers = h.outbound.sent_of_kind("answer");
    assert_eq!(answers.len(), 1);
    assert!(matches!(
        &answers[0],
        SignalMessage::Answer { to, from, .. } if to.as_str() == "bob" && from.as_str() == "alice"
    ));
}

#[tokio::test]
async fn test_duplicate_answer_is_ignored() {
    let mut h = joined_as("alice", &["bob"]).await;

    h.orch.dispatch(answer_from("bob", "alice", "answer-1")).await;
    h.orch.dispatch(answer_from("bob", "alice", "answer-1")).await;

    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));
    let transport = h.factory.latest_for(&UserId::from("bob")).unwrap();
    assert_eq!(transport.remote_descriptions().len(), 1);
    assert!(!transport.is_closed());
}

#[tokio::test]
async fn test_late_candidate_after_user_left_is_noop() {
    let mut h = joined_as("alice", &["bob"]).await;
    let transport = h.factory.latest_for(&UserId::from("bob")).unwrap();

    h.orch
        .dispatch(SignalMessage::UserLeft {
            user_id: UserId::from("bob"),
        })
        .await;
    assert!(transport.is_closed());
    let calls_after_leave = transport.calls().len();

    h.orch.dispatch(candidate_from("bob", "alice", 7)).await;
    h.orch.dispatch(answer_from("bob", "alice", "late")).await;

    assert!(h.orch.registry().is_empty());
    assert!(h.orch.roster().is_empty());
    assert_eq!(transport.calls().len(), calls_after_leave);
    assert_eq!(h.factory.created().len(), 1);
}

#[tokio::test]
async fn test_late_offer_from_departed_participant_is_dropped() {
    let mut h = joined_as("alice", &["bob"]).await;
    h.orch.dispatch(user_left("bob")).await;
    h.outbound.clear();

    h.orch.dispatch(offer_from("bob", "alice", "late")).await;
    h.orch.dispatch(candidate_from("bob", "alice", 3)).await;

    assert!(h.orch.roster().is_empty());
    assert!(h.orch.registry().is_empty());
    assert_eq!(h.factory.created_for(&UserId::from("bob")), 1);
    assert!(h.outbound.sent().is_empty());

    // Announced again by the relay, bob is reachable as usual.
    h.orch.dispatch(user_joined("bob")).await;
    h.orch.dispatch(offer_from("bob", "alice", "fresh")).await;
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));
    assert_eq!(h.outbound.sent_of_kind("answer").len(), 1);
}

#[tokio::test]
async fn test_reannounced_participant_gets_fresh_session() {
    let mut h = joined_as("alice", &[]).await;
    h.orch.dispatch(user_joined("bob")).await;
    h.orch.dispatch(offer_from("bob", "alice", "o1")).await;
    let first = h.factory.latest_for(&UserId::from("bob")).unwrap();
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));

    h.orch.dispatch(user_joined("bob")).await;

    assert!(first.is_closed());
    assert_eq!(h.factory.created_for(&UserId::from("bob")), 2);
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::New));
    assert_eq!(h.orch.roster().len(), 1);

    h.orch.dispatch(offer_from("bob", "alice", "fresh-pc-offer")).await;

    let second = h.factory.latest_for(&UserId::from("bob")).unwrap();
    assert_eq!(first.remote_descriptions().len(), 1);
    assert_eq!(
        second.remote_descriptions(),
        vec![SessionDescription::offer("fresh-pc-offer")]
    );
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));
}

#[tokio::test]
async fn test_roster_counts_joins_minus_leaves() {
    let mut h = joined_as("alice", &["bob"]).await;

    for msg in [
        user_joined("carol"),
        user_joined("carol"),
        user_left("bob"),
        user_left("bob"),
        user_left("zoe"),
        user_joined("dan"),
        user_left("carol"),
        user_joined("bob"),
    ] {
        h.orch.dispatch(msg).await;
    }

    let ids: Vec<String> = h.orch.roster().user_ids().iter().map(|u| u.to_string()).collect();
    assert_eq!(ids, vec!["bob", "dan"]);
    assert_eq!(h.orch.registry().len(), 2);
    assert!(h.orch.registry().contains(&UserId::from("dan")));
    assert!(!h.orch.registry().contains(&UserId::from("carol")));
}

#[tokio::test]
async fn test_user_left_for_unknown_user_is_noop() {
    let mut h = joined_as("alice", &["bob"]).await;

    h.orch
        .dispatch(SignalMessage::UserLeft {
            user_id: UserId::from("zoe"),
        })
        .await;

    assert_eq!(h.orch.roster().len(), 1);
    assert_eq!(h.orch.registry().len(), 1);
}

#[tokio::test]
async fn test_message_addressed_to_someone_else_is_dropped() {
    let mut h = joined_as("alice", &[]).await;

    h.orch.dispatch(offer_from("bob", "carol", "not-for-alice")).await;

    assert!(h.orch.registry().is_empty());
    assert!(h.factory.created().is_empty());
    assert!(h.outbound.sent_of_kind("answer").is_empty());
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let mut h = joined_as("alice", &[]).await;

    h.orch.handle_frame("{not json").await;
    h.orch.handle_frame(r#"{"type":"teleport","userId":"bob"}"#).await;
    h.orch.handle_frame("   ").await;
    assert_eq!(h.orch.phase(), RoomPhase::Joined);

    h.orch
        .handle_frame(r#"{"type":"user-joined","userId":"bob","userName":"Bob"}"#)
        .await;
    assert!(h.orch.roster().contains(&UserId::from("bob")));
}

#[tokio::test]
async fn test_offer_from_unknown_user_adds_placeholder() {
    let mut h = joined_as("alice", &[]).await;
    let mut events = h.orch.subscribe();

    h.orch.dispatch(offer_from("bob", "alice", "surprise")).await;

    let bob = h.orch.roster().get(&UserId::from("bob")).cloned().unwrap();
    assert_eq!(bob.display_name, "bob");
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));
    assert!(matches!(
        events.try_recv(),
        Ok(RoomEvent::ParticipantJoined(p)) if p.user_id.as_str() == "bob"
    ));
}

#[tokio::test]
async fn test_glare_smaller_id_keeps_its_offer() {
    let mut h = joined_as("alice", &["bob"]).await;
    h.outbound.clear();

    h.orch.dispatch(offer_from("bob", "alice", "crossing")).await;

    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::HaveLocalOffer));
    assert!(h.outbound.sent_of_kind("answer").is_empty());
    assert_eq!(h.factory.created_for(&UserId::from("bob")), 1);
}

#[tokio::test]
async fn test_glare_larger_id_yields_to_remote_offer() {
    let mut h = joined_as("zed", &["bob"]).await;
    h.outbound.clear();
    let first = h.factory.latest_for(&UserId::from("bob")).unwrap();

    h.orch.dispatch(offer_from("bob", "zed", "crossing")).await;

    assert!(first.is_closed());
    assert_eq!(h.factory.created_for(&UserId::from("bob")), 2);
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));
    assert_eq!(h.outbound.sent_of_kind("answer").len(), 1);

    let session = h.orch.registry().get(&UserId::from("bob")).unwrap();
    assert!(session.key().epoch > first.key().epoch);
}

#[tokio::test]
async fn test_events_from_replaced_session_are_dropped() {
    let mut h = joined_as("zed", &["bob"]).await;
    let stale = h.factory.latest_for(&UserId::from("bob")).unwrap();
    h.orch.dispatch(offer_from("bob", "zed", "crossing")).await;
    h.outbound.clear();

    let info = RemoteTrackInfo {
        track_id: "ghost".to_owned(),
        stream_id: "ghost-stream".to_owned(),
        kind: TrackKind::Video,
    };
    h.orch
        .handle_transport_event(TransportEvent::RemoteTrack(stale.key().clone(), info))
        .await;
    h.orch
        .handle_transport_event(TransportEvent::CandidateGenerated(
            stale.key().clone(),
            IceCandidate::new("candidate:stale"),
        ))
        .await;

    let session = h.orch.registry().get(&UserId::from("bob")).unwrap();
    assert!(session.remote_stream().is_none());
    assert!(h.outbound.sent().is_empty());
}

#[tokio::test]
async fn test_local_candidates_are_relayed_to_the_peer() {
    let mut h = joined_as("alice", &["bob"]).await;
    let key = h.factory.latest_for(&UserId::from("bob")).unwrap().key().clone();

    h.orch
        .handle_transport_event(TransportEvent::CandidateGenerated(
            key,
            IceCandidate::new("candidate:1 1 udp 1 192.168.1.2 4000 typ host"),
        ))
        .await;

    let relayed = h.outbound.sent_of_kind("ice-candidate");
    assert_eq!(relayed.len(), 1);
    assert!(matches!(
        &relayed[0],
        SignalMessage::IceCandidate { to, from, .. } if to.as_str() == "bob" && from.as_str() == "alice"
    ));
}

#[tokio::test]
async fn test_remote_track_surfaces_once_per_track() {
    let mut h = joined_as("alice", &["bob"]).await;
    let mut events = h.orch.subscribe();
    let key = h.factory.latest_for(&UserId::from("bob")).unwrap().key().clone();

    for _ in 0..2 {
        let info = RemoteTrackInfo {
            track_id: "bob-cam".to_owned(),
            stream_id: "bob-stream".to_owned(),
            kind: TrackKind::Video,
        };
        h.orch
            .handle_transport_event(TransportEvent::RemoteTrack(key.clone(), info))
            .await;
    }

    assert!(matches!(
        events.try_recv(),
        Ok(RoomEvent::RemoteStream { user_id, track }) if user_id.as_str() == "bob" && track.track_id == "bob-cam"
    ));
    assert!(events.try_recv().is_err());
    let stream = h
        .orch
        .registry()
        .get(&UserId::from("bob"))
        .and_then(|s| s.remote_stream())
        .cloned()
        .unwrap();
    assert_eq!(stream.tracks.len(), 1);
}

#[tokio::test]
async fn test_renegotiation_offer_on_connected_session() {
    let mut h = joined_as("alice", &[]).await;
    h.orch.dispatch(offer_from("bob", "alice", "first")).await;
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));

    h.orch.dispatch(offer_from("bob", "alice", "second")).await;

    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));
    assert_eq!(h.outbound.sent_of_kind("answer").len(), 2);
    let transport = h.factory.latest_for(&UserId::from("bob")).unwrap();
    assert_eq!(transport.remote_descriptions().len(), 2);
    assert_eq!(h.factory.created().len(), 1);
}

#[tokio::test]
async fn test_failed_negotiation_only_affects_that_peer() {
    let mut h = joined_as("alice", &["bob", "carol"]).await;
    let mut events = h.orch.subscribe();
    let bob = h.factory.latest_for(&UserId::from("bob")).unwrap();
    bob.fail_next("set-remote");

    h.orch.dispatch(answer_from("bob", "alice", "broken")).await;
    h.orch.dispatch(answer_from("carol", "alice", "fine")).await;

    assert!(bob.is_closed());
    assert_eq!(state_of(&h, "bob"), None);
    assert!(h.orch.roster().contains(&UserId::from("bob")));
    assert_eq!(state_of(&h, "carol"), Some(NegotiationState::Connected));
    assert!(matches!(events.try_recv(), Ok(RoomEvent::Notice(_))));
}

#[tokio::test]
async fn test_room_full_error_tears_down() {
    init_tracing();
    let factory = MockTransportFactory::new();
    let (outbound, signaling, _inbound) = RecordingChannel::context();
    let mut orch = SessionOrchestrator::new(
        LocalIdentity::new("late"),
        ClientConfig::default(),
        factory.clone(),
        SyntheticDevices::default(),
        signaling,
    );
    let mut events = orch.subscribe();

    orch.join(RoomId::from("lab")).await.unwrap();
    assert!(orch.media().is_acquired());
    assert_eq!(outbound.sent_of_kind("join").len(), 1);

    orch.dispatch(SignalMessage::RoomError {
        message: "Room is full".to_owned(),
    })
    .await;

    assert_eq!(orch.phase(), RoomPhase::RoomFull);
    assert!(orch.registry().is_empty());
    assert!(!orch.media().is_acquired());
    assert!(factory.created().is_empty());

    let mut saw_full = false;
    while let Ok(event) = events.try_recv() {
        saw_full |= matches!(event, RoomEvent::RoomFull);
    }
    assert!(saw_full);

    // Late relay traffic after the refusal creates nothing.
    let local = orch.identity().user_id.clone();
    orch.dispatch(offer_from("bob", local.as_str(), "late")).await;
    assert!(factory.created().is_empty());
}

#[tokio::test]
async fn test_other_room_error_while_joining_returns_to_idle() {
    init_tracing();
    let (_outbound, signaling, _inbound) = RecordingChannel::context();
    let mut orch = SessionOrchestrator::new(
        LocalIdentity::new("alice"),
        ClientConfig::default(),
        MockTransportFactory::new(),
        SyntheticDevices::default(),
        signaling,
    );

    orch.join(RoomId::from("lab")).await.unwrap();
    orch.dispatch(SignalMessage::RoomError {
        message: "room closed".to_owned(),
    })
    .await;

    assert_eq!(orch.phase(), RoomPhase::Idle);
    assert!(!orch.media().is_acquired());
}

fn offer_answer_order(h: &Harness) -> Vec<&'static str> {
    h.outbound
        .sent()
        .iter()
        .map(|m| m.kind())
        .filter(|k| *k == "offer" || *k == "answer")
        .collect()
}

#[tokio::test]
async fn test_share_before_first_offer_renegotiates_after_answering() {
    let mut h = joined_with("alice", &[], camera_less()).await;
    h.orch.dispatch(user_joined("bob")).await;

    assert!(h.orch.toggle_screen_share().await.unwrap());
    assert!(h.outbound.sent_of_kind("offer").is_empty());

    h.orch.dispatch(offer_from("bob", "alice", "audio-only")).await;

    assert_eq!(offer_answer_order(&h), vec!["answer", "offer"]);
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::HaveLocalOffer));
    assert_eq!(h.factory.created_for(&UserId::from("bob")), 1);
}

#[tokio::test]
async fn test_share_during_pending_offer_renegotiates_after_answer() {
    let mut h = joined_with("alice", &["bob"], camera_less()).await;
    assert_eq!(h.outbound.sent_of_kind("offer").len(), 1);

    h.orch.toggle_screen_share().await.unwrap();
    assert_eq!(h.outbound.sent_of_kind("offer").len(), 1);

    h.orch.dispatch(answer_from("bob", "alice", "a1")).await;
    assert_eq!(h.outbound.sent_of_kind("offer").len(), 2);
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::HaveLocalOffer));

    // The renegotiation round leaves nothing pending.
    h.orch.dispatch(answer_from("bob", "alice", "a2")).await;
    assert_eq!(state_of(&h, "bob"), Some(NegotiationState::Connected));
    assert_eq!(h.outbound.sent_of_kind("offer").len(), 2);
}
