//! Host-side engine runner
//!
//! Binds the orchestration engine to the simulated device and walks it
//! through one scripted submit-question cycle. On real hardware the same
//! engine is bound to the vendor drivers instead; the scripted run is
//! useful for exercising the whole workflow during development.

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::time::Duration;

use tutorglass::audio::{ClipStore, PlaybackEngine};
use tutorglass::config;
use tutorglass::hal::{Device, HttpResponse, PadStatus, WakeEvent};
use tutorglass::input::{ButtonMonitor, TouchMonitor};
use tutorglass::net::{COOKIE_KEY, EMAIL_KEY, PASSWORD_KEY};
use tutorglass::sim::{
    SimAudioOutput, SimButtonPin, SimCamera, SimHttp, SimLed, SimNvs, SimOta, SimSleep,
    SimTouchPads, SimWifi,
};
use tutorglass::state::{EngineOutcome, Orchestrator};

fn main() -> Result<()> {
    tutorglass::init_logging();
    tracing::info!("Tutorglass engine starting (simulated device)");

    let mut cfg = config::get_config();
    // The demo run should not sit in real poll waits
    cfg.network.poll_wait_ms = cfg.network.poll_wait_ms.min(100);
    cfg.audio.answer_repeat_window_ticks = cfg.audio.answer_repeat_window_ticks.min(100);

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

    script_question_cycle(&camera, &http, &nvs, &sleep)?;

    let device = Device {
        audio: audio.clone(),
        touch: touch.clone(),
        button: button.clone(),
        camera,
        wifi,
        http,
        nvs,
        ota,
        sleep,
        led,
    };

    let engine = Arc::new(PlaybackEngine::new(audio));
    let clip_dir = cfg
        .audio
        .clip_dir
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("clips"));
    let clips = ClipStore::new(clip_dir);

    let (event_tx, event_rx) = unbounded();
    let _touch_monitor = TouchMonitor::spawn(
        touch.clone(),
        engine.clone(),
        event_tx.clone(),
        cfg.touch.clone(),
    )
    .context("Touch monitor failed to start")?;
    let _button_monitor = ButtonMonitor::spawn(button.clone(), event_tx, cfg.button.clone());

    // Scripted user: browse forward to the Submit Question entry, then
    // select it with a single press
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        touch.inject_status(PadStatus {
            forward: true,
            backward: false,
        });
        std::thread::sleep(Duration::from_millis(500));
        button.press();
        std::thread::sleep(Duration::from_millis(30));
        button.release();
    });

    let mut orchestrator = Orchestrator::new(device, engine, clips, event_rx, cfg);
    match orchestrator.run().context("Engine run failed")? {
        EngineOutcome::Shutdown => tracing::info!("Engine shut down cleanly"),
        EngineOutcome::Restart => tracing::info!("Engine requested a device restart"),
    }
    Ok(())
}

/// Script one full happy-path question cycle through the doubles
fn script_question_cycle(
    camera: &SimCamera,
    http: &SimHttp,
    nvs: &SimNvs,
    sleep: &SimSleep,
) -> Result<()> {
    use tutorglass::hal::NvsStore;

    nvs.write_string(EMAIL_KEY, "student@example.com")?;
    nvs.write_string(PASSWORD_KEY, "correct-horse")?;
    nvs.write_string(COOKIE_KEY, "session=stale")?;

    // Wake once for the question; the queue then runs dry and the next
    // sleep shuts the engine down
    sleep.push_wake(WakeEvent::Touch);

    // Warm-up frames plus the kept capture
    for _ in 0..5 {
        camera.push_frame(vec![0xAA; 128]);
    }
    camera.push_frame(vec![0xFF; 4096]);

    http.push_get(HttpResponse {
        status: 200,
        body: "{}".to_string(),
        set_cookie: None,
    });
    http.push_image(HttpResponse {
        status: 200,
        body: r#"{"documentId":"demo-doc"}"#.to_string(),
        set_cookie: None,
    });
    http.push_get(HttpResponse {
        status: 200,
        body: r#"{"status":"pending"}"#.to_string(),
        set_cookie: None,
    });
    http.push_get(HttpResponse {
        status: 200,
        body: r#"{"status":"answered","ttsKey":"demo-tts"}"#.to_string(),
        set_cookie: None,
    });

    // A short synthetic answer: 16-bit little-endian PCM
    let answer: Vec<u8> = (0..8000i16)
        .flat_map(|i| ((i % 256) * 64).to_le_bytes())
        .collect();
    http.push_download(answer);

    Ok(())
}
