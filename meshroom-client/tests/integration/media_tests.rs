use meshroom_client::RoomError;
use meshroom_client::room::RoomEvent;
use meshroom_core::SignalMessage;

use crate::utils::{MemoryRelay, TestPeer, eventually, init_tracing};

async fn connected_pair(relay: &MemoryRelay) -> (TestPeer, TestPeer) {
    let a = TestPeer::spawn(relay, "Alice");
    let b = TestPeer::spawn(relay, "Bob");
    a.controller.join("media").await.unwrap();
    b.controller.join("media").await.unwrap();
    a.wait_connected_to(&[&b.user_id]).await;
    b.wait_connected_to(&[&a.user_id]).await;
    (a, b)
}

fn count_from(relay: &MemoryRelay, peer: &TestPeer, kind: &str) -> usize {
    relay
        .received_from(peer.relay.id())
        .iter()
        .filter(|m| m.kind() == kind)
        .count()
}

#[tokio::test]
async fn test_toggle_video_broadcasts_once_without_renegotiating() {
    init_tracing();
    let relay = MemoryRelay::new();
    let (a, mut b) = connected_pair(&relay).await;
    let transport = a.factory.latest_for(&b.user_id).unwrap();
    let calls_before = transport.calls().len();
    let offers_before = count_from(&relay, &a, "offer");

    let enabled = a.controller.toggle_video().await.unwrap();

    assert!(!enabled);
    let local = a.snapshot().local_media;
    assert!(!local.video_enabled);
    assert!(!local.video_track.unwrap().is_enabled());

    let update = b
        .next_event("video update", |e| matches!(e, RoomEvent::ParticipantUpdated(_)))
        .await;
    assert!(matches!(update, RoomEvent::ParticipantUpdated(p) if !p.video_enabled && p.audio_enabled));

    assert_eq!(count_from(&relay, &a, "toggle-video"), 1);
    assert_eq!(count_from(&relay, &a, "offer"), offers_before);
    assert_eq!(transport.calls().len(), calls_before);

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn test_toggle_audio_round_trip() {
    init_tracing();
    let relay = MemoryRelay::new();
    let (a, b) = connected_pair(&relay).await;

    assert!(!a.controller.toggle_audio().await.unwrap());
    assert!(a.controller.toggle_audio().await.unwrap());

    b.wait_until("audio back on", |s| {
        s.participants.iter().any(|p| p.user_id == a.user_id && p.audio_enabled)
    })
    .await;
    let toggles: Vec<bool> = relay
        .received_from(a.relay.id())
        .into_iter()
        .filter_map(|m| match m {
            SignalMessage::ToggleAudio { enabled, .. } => Some(enabled),
            _ => None,
        })
        .collect();
    assert_eq!(toggles, vec![false, true]);

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn test_screen_share_swaps_video_on_every_session_and_restores_camera() {
    init_tracing();
    let relay = MemoryRelay::new();
    let a = TestPeer::spawn(&relay, "Presenter");
    let b = TestPeer::spawn(&relay, "Bob");
    let c = TestPeer::spawn(&relay, "Cat");
    for peer in [&a, &b, &c] {
        peer.controller.join("demo").await.unwrap();
    }
    a.wait_connected_to(&[&b.user_id, &c.user_id]).await;

    let camera = a.snapshot().local_media.video_track.unwrap();
    let microphone = a.snapshot().local_media.audio_track.unwrap();

    assert!(a.controller.toggle_screen_share().await.unwrap());

    let screen = a.snapshot().local_media.video_track.unwrap();
    assert_ne!(screen.id(), camera.id());
    assert!(a.snapshot().local_media.screen_sharing);
    for peer in [&b, &c] {
        let transport = a.factory.latest_for(&peer.user_id).unwrap();
        assert_eq!(transport.current_video().as_deref(), Some(screen.id()));
    }
    b.wait_until("presenter flagged", |s| {
        s.participants.iter().any(|p| p.user_id == a.user_id && p.screen_sharing)
    })
    .await;

    assert!(!a.controller.toggle_screen_share().await.unwrap());

    let restored = a.snapshot().local_media.video_track.unwrap();
    assert_eq!(restored.id(), camera.id());
    assert!(screen.is_ended());
    assert!(!camera.is_ended());
    assert_eq!(a.devices.camera_opens(), 1);
    for peer in [&b, &c] {
        let transport = a.factory.latest_for(&peer.user_id).unwrap();
        assert_eq!(transport.current_video().as_deref(), Some(camera.id()));
        assert_eq!(
            transport.replacements(),
            vec![Some(screen.id().to_owned()), Some(camera.id().to_owned())]
        );
    }
    let same_mic = a.snapshot().local_media.audio_track.unwrap();
    assert_eq!(same_mic.id(), microphone.id());
    assert!(same_mic.is_enabled());

    c.wait_until("presenter unflagged", |s| {
        s.participants.iter().any(|p| p.user_id == a.user_id && !p.screen_sharing)
    })
    .await;
    assert_eq!(count_from(&relay, &a, "start-screen-share"), 1);
    assert_eq!(count_from(&relay, &a, "stop-screen-share"), 1);

    c.shutdown().await;
    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_screen_share_changes_nothing() {
    init_tracing();
    let relay = MemoryRelay::new();
    let (a, b) = connected_pair(&relay).await;
    a.devices.set_deny_display(true);
    let camera = a.snapshot().local_media.video_track.unwrap();

    let result = a.controller.toggle_screen_share().await;

    assert!(matches!(result, Err(RoomError::ScreenShareDenied)));
    let local = a.snapshot().local_media;
    assert!(!local.screen_sharing);
    assert_eq!(local.video_track.unwrap().id(), camera.id());
    assert!(a.factory.latest_for(&b.user_id).unwrap().replacements().is_empty());
    assert_eq!(count_from(&relay, &a, "start-screen-share"), 0);

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn test_capture_ended_externally_restores_camera() {
    init_tracing();
    let relay = MemoryRelay::new();
    let (a, b) = connected_pair(&relay).await;
    let camera = a.snapshot().local_media.video_track.unwrap();

    a.controller.toggle_screen_share().await.unwrap();
    assert!(a.devices.end_display_capture().await);

    let snapshot = a
        .wait_until("screen share ended", |s| !s.local_media.screen_sharing)
        .await;
    assert_eq!(snapshot.local_media.video_track.unwrap().id(), camera.id());

    let transport = a.factory.latest_for(&b.user_id).unwrap();
    eventually("camera back on the sender", || {
        transport.current_video().as_deref() == Some(camera.id())
    })
    .await;
    eventually("stop broadcast", || count_from(&relay, &a, "stop-screen-share") == 1).await;

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn test_video_off_survives_screen_share() {
    init_tracing();
    let relay = MemoryRelay::new();
    let (a, b) = connected_pair(&relay).await;

    a.controller.toggle_video().await.unwrap();
    a.controller.toggle_screen_share().await.unwrap();
    a.controller.toggle_screen_share().await.unwrap();

    let local = a.snapshot().local_media;
    assert!(!local.video_enabled);
    assert!(!local.video_track.unwrap().is_enabled());

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn test_screen_share_without_camera_renegotiates() {
    init_tracing();
    let relay = MemoryRelay::new();
    let config = meshroom_client::ClientConfig {
        media: meshroom_client::MediaConstraints {
            video: false,
            audio: true,
        },
        ..Default::default()
    };
    let a = TestPeer::spawn_with(&relay, "no-cam", Default::default(), config);
    let b = TestPeer::spawn(&relay, "Bob");
    a.controller.join("talk").await.unwrap();
    b.controller.join("talk").await.unwrap();
    a.wait_connected_to(&[&b.user_id]).await;
    let answers_before = count_from(&relay, &b, "answer");
    let offers_before = count_from(&relay, &a, "offer");

    a.controller.toggle_screen_share().await.unwrap();

    // A new video sender needs a fresh offer/answer round on the same session.
    eventually("renegotiation answered", || {
        count_from(&relay, &b, "answer") > answers_before
    })
    .await;
    assert!(count_from(&relay, &a, "offer") > offers_before);
    a.wait_connected_to(&[&b.user_id]).await;
    assert_eq!(b.factory.created_for(&a.user_id), 1);

    b.shutdown().await;
    a.shutdown().await;
}
