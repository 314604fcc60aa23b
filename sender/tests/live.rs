#![cfg(unix)]

mod support;

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use support::{config, get_head, next_event, MockRenderer};
use sender::{CastEvent, CastKind, CastingSession, Config, Resolution, SessionState};
use tokio::io::AsyncReadExt;

/// An "encoder" that starts fine but never opens its inputs.
fn stalled_encoder(dir: &std::path::Path) -> (String, std::path::PathBuf) {
    let script = dir.join("fake-ffmpeg");
    let pid_file = dir.join("encoder.pid");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    (script.display().to_string(), pid_file)
}

#[tokio::test]
async fn encoder_attach_timeout_fails_the_cast() {
    let dir = tempfile::tempdir().unwrap();
    let (encoder, pid_file) = stalled_encoder(dir.path());
    let renderer = MockRenderer::start(None).await;

    let session = CastingSession::new(Config {
        encoder_program: encoder,
        hardware_encoder: Some(false),
        resolution: Some(Resolution {
            width: 64,
            height: 48,
        }),
        video_attach_timeout_ms: 300,
        ..config()
    })
    .unwrap();
    let mut events = session.subscribe();

    let url = session.start_screen(&renderer.device()).await.unwrap();
    assert!(url.ends_with("/live.ts"));
    assert_eq!(next_event(&mut events).await, CastEvent::Started { url: url.clone() });
    assert_eq!(session.state().await, SessionState::Active(CastKind::Live));

    // Play the part of the renderer fetching the stream
    let (mut stream, head) = get_head(&url).await.unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\nContent-Type: video/mpeg\r\n"));

    match next_event(&mut events).await {
        CastEvent::Error { message } => assert!(message.contains("did not attach"), "{message}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(session.state().await, SessionState::Idle);

    // The client connection is closed instead of hanging
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    #[cfg(target_os = "linux")]
    {
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_dir = format!("/proc/{}", pid.trim());
        assert!(!std::path::Path::new(&proc_dir).exists(), "encoder still running");
    }
    #[cfg(not(target_os = "linux"))]
    let _ = pid_file;

    // A failed cast leaves nothing to stop
    assert!(!session.stop().await);
}
