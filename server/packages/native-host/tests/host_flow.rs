mod common;

use std::sync::Arc;

use common::BrowserPort;
use media_fetch_host::framing::FramingError;
use media_fetch_host::spawner::ExitReason;
use media_fetch_host::testing::FakeSpawner;
use serde_json::{json, Value};

const KEY: &str = "https://x/a.m3u8";

fn start_message() -> Value {
    json!({
        "type": "start-download",
        "toolPath": "/usr/bin/yt-dlp",
        "formatId": "299",
        "url": KEY,
        "outputPath": "/out",
        "filename": "v.mp4"
    })
}

fn port() -> (BrowserPort, FakeSpawner) {
    let spawner = FakeSpawner::new();
    (BrowserPort::spawn(Arc::new(spawner.clone())), spawner)
}

#[tokio::test]
async fn clean_eof_ends_host_successfully() {
    let (port, _spawner) = port();
    let (result, trailing) = port.finish().await;
    assert!(result.is_ok());
    assert!(trailing.is_empty());
}

#[tokio::test]
async fn unknown_type_is_answered_and_loop_continues() {
    let (mut port, spawner) = port();
    let response = port.request(json!({"type": "host:reboot"})).await;
    assert_eq!(
        response,
        json!({"ok": false, "error": "unknown message type", "code": "unknown_command"})
    );

    let response = port
        .request(json!({"type": "cancel-download", "url": KEY}))
        .await;
    assert_eq!(response["kind"], "cancel-download");
    assert_eq!(spawner.spawned_count(), 0);

    let (result, _) = port.finish().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn missing_field_is_a_local_failure() {
    let (mut port, _spawner) = port();
    let response = port
        .request(json!({"type": "check-format", "url": KEY}))
        .await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["kind"], "check-format");
    assert_eq!(response["code"], "invalid_request");
    let error = response["error"].as_str().unwrap();
    assert!(error.contains("toolPath"), "{error}");
}

#[tokio::test]
async fn download_reports_progress_then_completion() {
    let (mut port, spawner) = port();
    let ack = port.request(start_message()).await;
    assert_eq!(
        ack,
        json!({
            "ok": true,
            "kind": "start-download",
            "message": "download started",
            "key": KEY,
            "filepath": "/out/v.mp4"
        })
    );

    let mut child = spawner.take_spawned().expect("download child spawned");
    child.stdout("[download] Destination: /out/v.mp4\n");
    child.stdout("[download]  45.0% of 1.68GiB at 5.21MiB/s ETA 02:35\n");
    child.exit(ExitReason::Code(0));

    let events = port.events_until_complete(KEY).await;
    assert_eq!(
        events,
        vec![
            json!({
                "type": "progress",
                "key": KEY,
                "percent": 45.0,
                "output": "[download]  45.0% of 1.68GiB at 5.21MiB/s ETA 02:35"
            }),
            json!({
                "type": "complete",
                "key": KEY,
                "success": true,
                "filepath": "/out/v.mp4"
            }),
        ]
    );

    // The key is free again once the download completed.
    let again = port.request(start_message()).await;
    assert_eq!(again["ok"], true);
}

#[tokio::test]
async fn failed_download_reports_exit_code() {
    let (mut port, spawner) = port();
    port.request(start_message()).await;
    let mut child = spawner.take_spawned().unwrap();
    child.stderr("ERROR: unable to download video data: HTTP Error 403\n");
    child.exit(ExitReason::Code(1));

    let events = port.events_until_complete(KEY).await;
    assert_eq!(
        events,
        vec![json!({
            "type": "complete",
            "key": KEY,
            "success": false,
            "error": "download failed (code=1)"
        })]
    );
}

#[tokio::test]
async fn second_start_for_active_key_conflicts() {
    let (mut port, spawner) = port();
    assert_eq!(port.request(start_message()).await["ok"], true);

    let response = port.request(start_message()).await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["code"], "conflict");
    assert_eq!(spawner.spawned_count(), 1);
}

#[tokio::test]
async fn cancel_terminates_and_reports_cancelled() {
    let (mut port, spawner) = port();
    port.request(start_message()).await;
    let mut child = spawner.take_spawned().unwrap();

    let ack = port
        .request(json!({"type": "cancel-download", "url": KEY}))
        .await;
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["message"], "download cancelled");
    assert!(child.terminate_requested());

    child.exit(ExitReason::Signal(Some(15)));
    let events = port.events_until_complete(KEY).await;
    assert_eq!(
        events.last().unwrap(),
        &json!({"type": "complete", "key": KEY, "success": false, "error": "cancelled"})
    );

    let response = port
        .request(json!({"type": "cancel-download", "url": KEY}))
        .await;
    assert_eq!(response["error"], "no active download found");
    assert_eq!(response["code"], "not_found");
}

#[tokio::test]
async fn legacy_aliases_are_accepted() {
    let (mut port, spawner) = port();
    let ack = port
        .request(json!({
            "type": "host:ytdlp-download",
            "ytdlpPath": "yt-dlp",
            "formatId": "22",
            "url": KEY,
            "outputPath": "/out",
            "filename": "v.mp4"
        }))
        .await;
    assert_eq!(ack["kind"], "start-download");
    assert_eq!(spawner.spawned_count(), 1);
}

#[tokio::test]
async fn eof_terminates_active_downloads() {
    let (mut port, spawner) = port();
    port.request(start_message()).await;
    let mut child = spawner.take_spawned().unwrap();

    let (result, _) = port.finish().await;
    assert!(result.is_ok());
    assert!(child.terminate_requested());
}

#[tokio::test]
async fn truncated_frame_is_fatal() {
    let (mut port, _spawner) = port();
    let mut frame = 100u32.to_le_bytes().to_vec();
    frame.extend_from_slice(b"{\"type\":");
    port.send_raw(&frame).await;

    let (result, trailing) = port.finish().await;
    assert!(matches!(
        result,
        Err(FramingError::TruncatedBody { expected: 100, .. })
    ));
    assert_eq!(trailing.len(), 1);
    assert_eq!(trailing[0]["ok"], false);
    assert!(trailing[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("fatal: "));
}

#[tokio::test]
async fn invalid_json_is_fatal() {
    let (mut port, _spawner) = port();
    let body = b"not json";
    let mut frame = (body.len() as u32).to_le_bytes().to_vec();
    frame.extend_from_slice(body);
    port.send_raw(&frame).await;

    let fatal = port.recv().await;
    assert_eq!(fatal["ok"], false);
    let (result, trailing) = port.finish().await;
    assert!(matches!(result, Err(FramingError::InvalidJson(_))));
    assert!(trailing.is_empty());
}

#[tokio::test]
async fn oversized_inbound_frame_is_fatal() {
    let spawner = FakeSpawner::new();
    let config = media_fetch_host::HostConfig {
        max_frame_bytes: 16,
        ..Default::default()
    };
    let mut port = BrowserPort::spawn_with(config, Arc::new(spawner));
    port.send(json!({"type": "list", "path": "/a/rather/long/path"}))
        .await;

    let fatal = port.recv().await;
    assert_eq!(fatal["ok"], false);
    let (result, _) = port.finish().await;
    assert!(matches!(result, Err(FramingError::TooLarge { max: 16, .. })));
}
