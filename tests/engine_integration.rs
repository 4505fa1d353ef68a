//! End-to-end engine tests against the simulated device
//!
//! Each test scripts the hardware doubles, injects the user's input events
//! and runs the orchestrator until it asks the host to act. The sleep
//! double wakes with `Shutdown` once its script runs dry, which terminates
//! every run cleanly.

use crossbeam_channel::{unbounded, Sender};
use std::sync::Arc;
use tempfile::TempDir;

use tutorglass::audio::{ClipStore, PlaybackEngine};
use tutorglass::config::EngineConfig;
use tutorglass::hal::{Device, HttpResponse, NvsStore, WakeEvent};
use tutorglass::input::InputEvent;
use tutorglass::net::{COOKIE_KEY, EMAIL_KEY, PASSWORD_KEY};
use tutorglass::sim::{
    SimAudioOutput, SimButtonPin, SimCamera, SimHttp, SimLed, SimNvs, SimOta, SimSleep,
    SimTouchPads, SimWifi,
};
use tutorglass::state::{EngineOutcome, Orchestrator, PENDING_CAPTURE_KEY};

struct Rig {
    orchestrator: Orchestrator,
    events: Sender<InputEvent>,
    camera: Arc<SimCamera>,
    wifi: Arc<SimWifi>,
    http: Arc<SimHttp>,
    nvs: Arc<SimNvs>,
    sleep: Arc<SimSleep>,
    _clip_dir: TempDir,
}

/// Build the engine on a full set of doubles. Credentials are seeded before
/// construction because the session loads them from the store at boot.
fn rig() -> Rig {
    let audio = Arc::new(SimAudioOutput::new());
    let touch = Arc::new(SimTouchPads::new());
    let button = Arc::new(SimButtonPin::new());
    let camera = Arc::new(SimCamera::new());
    let wifi = Arc::new(SimWifi::new());
    let http = Arc::new(SimHttp::new());
    let nvs = Arc::new(SimNvs::new());
    let ota = Arc::new(SimOta::new());
    let sleep = Arc::new(SimSleep::new());
    let led = Arc::new(SimLed::new());

    nvs.write_string(EMAIL_KEY, "student@example.com").unwrap();
    nvs.write_string(PASSWORD_KEY, "hunter2").unwrap();
    nvs.write_string(COOKIE_KEY, "session=ok").unwrap();

    let device = Device {
        audio: audio.clone(),
        touch,
        button,
        camera: camera.clone(),
        wifi: wifi.clone(),
        http: http.clone(),
        nvs: nvs.clone(),
        ota,
        sleep: sleep.clone(),
        led,
    };

    let engine = Arc::new(PlaybackEngine::new(audio));
    let clip_dir = TempDir::new().unwrap();
    let clips = ClipStore::new(clip_dir.path().to_path_buf());
    let (tx, rx) = unbounded();

    let mut config = EngineConfig::default();
    config.network.poll_wait_ms = 1;
    config.audio.answer_repeat_window_ticks = 2;
    config.network.db_poll_limit = 3;

    Rig {
        orchestrator: Orchestrator::new(device, engine, clips, rx, config),
        events: tx,
        camera,
        wifi,
        http,
        nvs,
        sleep,
        _clip_dir: clip_dir,
    }
}

fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
        set_cookie: None,
    }
}

/// Script the camera with warm-up discards plus the kept frame
fn script_capture(camera: &SimCamera, kept: Vec<u8>) {
    for _ in 0..5 {
        camera.push_frame(vec![0xAA; 16]);
    }
    camera.push_frame(kept);
}

#[test]
fn test_full_question_cycle_reaches_answer_and_sleeps() {
    let mut rig = rig();

    // Menu: forward to Submit Question, select, then one touch wake
    rig.events.send(InputEvent::Forward).unwrap();
    rig.events.send(InputEvent::SinglePress).unwrap();
    rig.sleep.push_wake(WakeEvent::Touch);

    script_capture(&rig.camera, vec![0xFF; 1024]);

    rig.http.push_get(response(200, "{}")); // validate-session
    rig.http
        .push_image(response(200, r#"{"documentId":"doc-42"}"#));
    rig.http
        .push_get(response(200, r#"{"status":"pending"}"#));
    rig.http
        .push_get(response(200, r#"{"status":"answered","ttsKey":"tts-42"}"#));
    rig.http.push_download(vec![0x10, 0x00, 0x20, 0x00]);

    let outcome = rig.orchestrator.run().unwrap();
    assert_eq!(outcome, EngineOutcome::Shutdown);

    // The captured frame went up unmodified
    assert_eq!(rig.http.uploaded_frames(), vec![vec![0xFF; 1024]]);
    // Cleanup ran: capture intent cleared, Wi-Fi down, slept twice
    assert_eq!(rig.nvs.read_u8(PENDING_CAPTURE_KEY).unwrap(), Some(0));
    assert!(!rig.wifi.is_connected());
    assert_eq!(rig.sleep.sleep_count(), 2);
}

#[test]
fn test_restart_resumes_interrupted_capture() {
    let mut rig = rig();

    // A previous run persisted the capture intent before restarting
    rig.nvs.write_u8(PENDING_CAPTURE_KEY, 1).unwrap();

    script_capture(&rig.camera, vec![0xBB; 256]);
    rig.http.push_get(response(200, "{}"));
    rig.http
        .push_image(response(200, r#"{"documentId":"doc-7"}"#));
    rig.http
        .push_get(response(200, r#"{"status":"answered","ttsKey":"tts-7"}"#));
    rig.http.push_download(vec![0x01, 0x00]);

    let outcome = rig.orchestrator.run().unwrap();
    assert_eq!(outcome, EngineOutcome::Shutdown);

    // Capture ran without any menu interaction; only the cleanup sleep
    assert!(rig.camera.capture_count() > 0);
    assert_eq!(rig.sleep.sleep_count(), 1);
    assert_eq!(rig.nvs.read_u8(PENDING_CAPTURE_KEY).unwrap(), Some(0));
}

#[test]
fn test_poll_exhaustion_abandons_submission_and_sleeps() {
    let mut rig = rig();

    rig.events.send(InputEvent::Forward).unwrap();
    rig.events.send(InputEvent::SinglePress).unwrap();
    rig.sleep.push_wake(WakeEvent::Touch);

    script_capture(&rig.camera, vec![0xCC; 512]);
    rig.http.push_get(response(200, "{}"));
    rig.http
        .push_image(response(200, r#"{"documentId":"doc-9"}"#));
    // Never answered: the poll bound (3) trips and the engine gives up
    for _ in 0..4 {
        rig.http
            .push_get(response(200, r#"{"status":"unanswered"}"#));
    }

    let outcome = rig.orchestrator.run().unwrap();
    assert_eq!(outcome, EngineOutcome::Shutdown);
    assert_eq!(rig.sleep.sleep_count(), 2);
}

#[test]
fn test_expired_session_triggers_login_then_upload() {
    let mut rig = rig();

    rig.events.send(InputEvent::Forward).unwrap();
    rig.events.send(InputEvent::SinglePress).unwrap();
    rig.sleep.push_wake(WakeEvent::Touch);

    script_capture(&rig.camera, vec![0xDD; 100]);

    // First validation rejects the stale cookie; login issues a fresh one
    rig.http.push_get(response(401, "{}"));
    rig.http.push_post(HttpResponse {
        status: 200,
        body: "{}".to_string(),
        set_cookie: Some("session=fresh".to_string()),
    });
    rig.http.push_get(response(200, "{}"));
    rig.http
        .push_image(response(200, r#"{"documentId":"doc-3"}"#));
    rig.http
        .push_get(response(200, r#"{"status":"answered","ttsKey":"tts-3"}"#));
    rig.http.push_download(vec![0x02, 0x00]);

    let outcome = rig.orchestrator.run().unwrap();
    assert_eq!(outcome, EngineOutcome::Shutdown);

    // The refreshed cookie was persisted for the next boot
    assert_eq!(
        rig.nvs.read_string(COOKIE_KEY).unwrap().as_deref(),
        Some("session=fresh")
    );
    assert_eq!(rig.http.uploaded_frames().len(), 1);
}

#[test]
fn test_capture_failures_exhaust_into_restart_request() {
    let mut rig = rig();

    rig.events.send(InputEvent::Forward).unwrap();
    rig.events.send(InputEvent::SinglePress).unwrap();
    rig.sleep.push_wake(WakeEvent::Touch);

    // No scripted frames: every capture attempt fails

    let outcome = rig.orchestrator.run().unwrap();
    assert_eq!(outcome, EngineOutcome::Restart);

    // The capture intent survives so the next boot resumes capturing,
    // and the adjusted exponent was persisted for the camera re-init
    assert_eq!(rig.nvs.read_u8(PENDING_CAPTURE_KEY).unwrap(), Some(1));
    assert_eq!(
        rig.nvs.read_u8(tutorglass::policy::EXPONENT_KEY).unwrap(),
        Some(3)
    );
}

#[test]
fn test_wifi_outage_mid_question_cleans_up_and_sleeps() {
    let mut rig = rig();

    rig.events.send(InputEvent::Forward).unwrap();
    rig.events.send(InputEvent::SinglePress).unwrap();
    rig.sleep.push_wake(WakeEvent::Touch);

    script_capture(&rig.camera, vec![0xEE; 64]);
    // The collaborator exhausts its internal retries and reports failure
    rig.wifi.fail_next_connects(1);

    let outcome = rig.orchestrator.run().unwrap();
    assert_eq!(outcome, EngineOutcome::Shutdown);

    // Nothing was uploaded and the device went back to sleep
    assert!(rig.http.uploaded_frames().is_empty());
    assert_eq!(rig.sleep.sleep_count(), 2);
}
