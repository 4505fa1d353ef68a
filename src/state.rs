//! Orchestration state machine
//!
//! A single-threaded control loop ticking every 10 ms. Each tick consumes at
//! most one semantic input event and runs the handler for the active state;
//! handlers drive the playback engine for voice cues and call out to the
//! hardware collaborators synchronously. Every state carries a one-shot
//! "entered" flag so cue playback and counter resets fire exactly once per
//! visit, however many ticks the state is revisited before its exit
//! condition is met. Bounded-retry exhaustion always funnels into
//! `SubmitQuestionComplete`, the cleanup state, never a crash.

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{ClipStore, CueId, PlaybackEngine};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::hal::{Device, Frame, WakeEvent};
use crate::input::InputEvent;
use crate::led::LedController;
use crate::net::{question_status, RemoteSession, SessionCheck, TutorApi};
use crate::policy::{CaptureQualityPolicy, CaptureVerdict};

/// Control loop cadence
const TICK: Duration = Duration::from_millis(10);

/// Home menu entries: index 0 selects Settings, index 1 Submit Question
const MENU_ENTRIES: usize = 2;

/// NVS key marking a capture the user asked for but the device has not yet
/// completed; set before capture begins and cleared once a frame is held,
/// so a restart (camera reconfiguration) resumes straight into capture.
pub const PENDING_CAPTURE_KEY: &str = "pending_capture";

/// The workflow states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    Home,
    ConnectWifi,
    SubmitQuestion,
    Settings,
    ValidateSession,
    CapturePic,
    PicIssue,
    UploadPic,
    PollDb,
    DownloadTts,
    PlaybackAnswer,
    SubmitQuestionComplete,
}

/// How a run of the engine ended; the host acts on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Reboot required (OTA flashed, or camera settings changed)
    Restart,
    /// Clean shutdown requested through the sleep collaborator
    Shutdown,
}

/// The top-level controller
pub struct Orchestrator {
    device: Device,
    engine: Arc<PlaybackEngine>,
    clips: ClipStore,
    events: Receiver<InputEvent>,
    config: EngineConfig,
    api: TutorApi,
    session: RemoteSession,
    policy: CaptureQualityPolicy,
    led: LedController,

    state: ApplicationState,
    entered: bool,
    menu_index: usize,
    wifi_up: bool,
    frame: Option<Frame>,
    answer: Option<Vec<i16>>,
    validate_attempts: u32,
    reauth_attempts: u32,
    capture_attempts: u32,
    poll_attempts: u32,
    download_attempts: u32,
    answer_wait_ticks: u32,
}

impl Orchestrator {
    pub fn new(
        device: Device,
        engine: Arc<PlaybackEngine>,
        clips: ClipStore,
        events: Receiver<InputEvent>,
        config: EngineConfig,
    ) -> Self {
        let api = TutorApi::new(device.http.clone());
        let session = RemoteSession::load(device.nvs.as_ref());
        let policy = CaptureQualityPolicy::load(device.nvs.as_ref());
        let led = LedController::new(device.led.clone());

        Self {
            device,
            engine,
            clips,
            events,
            config,
            api,
            session,
            policy,
            led,
            state: ApplicationState::Home,
            entered: false,
            menu_index: 0,
            wifi_up: false,
            frame: None,
            answer: None,
            validate_attempts: 0,
            reauth_attempts: 0,
            capture_attempts: 0,
            poll_attempts: 0,
            download_attempts: 0,
            answer_wait_ticks: 0,
        }
    }

    /// Currently active state
    pub fn state(&self) -> ApplicationState {
        self.state
    }

    /// Run the control loop until the host must act
    pub fn run(&mut self) -> Result<EngineOutcome, EngineError> {
        self.play_cue(CueId::Welcome);
        self.play_cue(CueId::HomeInstructions);

        if self.pending_capture() {
            tracing::info!("State: resuming interrupted capture after restart");
            self.transition(ApplicationState::CapturePic);
        }

        loop {
            std::thread::sleep(TICK);
            let event = self.events.try_recv().ok();
            if let Some(outcome) = self.step(event)? {
                tracing::info!("State: engine finished with {:?}", outcome);
                return Ok(outcome);
            }
        }
    }

    /// Run one tick: dispatch to the active state's handler
    fn step(&mut self, event: Option<InputEvent>) -> Result<Option<EngineOutcome>, EngineError> {
        match self.state {
            ApplicationState::Home => self.on_home(event),
            ApplicationState::ConnectWifi => self.on_connect_wifi(event),
            ApplicationState::SubmitQuestion => self.on_submit_question(),
            ApplicationState::Settings => self.on_settings(event),
            ApplicationState::ValidateSession => self.on_validate_session(),
            ApplicationState::CapturePic => self.on_capture_pic(),
            ApplicationState::PicIssue => self.on_pic_issue(),
            ApplicationState::UploadPic => self.on_upload_pic(),
            ApplicationState::PollDb => self.on_poll_db(),
            ApplicationState::DownloadTts => self.on_download_tts(),
            ApplicationState::PlaybackAnswer => self.on_playback_answer(event),
            ApplicationState::SubmitQuestionComplete => self.on_complete(),
        }
    }

    fn transition(&mut self, next: ApplicationState) {
        tracing::info!("State: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.entered = false;
    }

    /// Play a voice cue with its table gain; cue failures are logged and the
    /// workflow carries on without the prompt.
    fn play_cue(&self, cue: CueId) {
        let spec = cue.spec();
        match self.clips.load(cue) {
            Ok(samples) => {
                if let Err(e) = self.engine.submit((*samples).clone(), spec.gain, spec.stoppable) {
                    tracing::error!("State: failed to play {:?}: {}", cue, e);
                }
            }
            Err(e) => tracing::error!("State: failed to load {:?}: {}", cue, e),
        }
    }

    fn pending_capture(&self) -> bool {
        match self.device.nvs.read_u8(PENDING_CAPTURE_KEY) {
            Ok(value) => value == Some(1),
            Err(e) => {
                tracing::warn!("State: failed to read pending-capture flag: {}", e);
                false
            }
        }
    }

    fn set_pending_capture(&self, pending: bool) {
        let value = u8::from(pending);
        if let Err(e) = self.device.nvs.write_u8(PENDING_CAPTURE_KEY, value) {
            tracing::warn!("State: failed to persist pending-capture flag: {}", e);
        }
    }

    // --- State handlers ---

    fn on_home(&mut self, event: Option<InputEvent>) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.menu_index = 0;
            self.session.clear_question();
        }

        match event {
            Some(InputEvent::Forward) => {
                self.menu_index = (self.menu_index + 1) % MENU_ENTRIES;
                self.play_menu_cue();
            }
            Some(InputEvent::Backward) => {
                self.menu_index = (self.menu_index + MENU_ENTRIES - 1) % MENU_ENTRIES;
                self.play_menu_cue();
            }
            Some(InputEvent::SinglePress) => {
                tracing::info!("State: menu selection {}", self.menu_index);
                match self.menu_index {
                    0 => self.transition(ApplicationState::Settings),
                    _ => self.transition(ApplicationState::SubmitQuestion),
                }
            }
            Some(InputEvent::DoublePress) => {
                // OTA attempt; a flashed image needs a reboot to take effect
                self.play_cue(CueId::ReturningHome);
                match self.device.ota.stage_and_flash() {
                    Ok(()) => {
                        tracing::info!("State: OTA staged, restarting");
                        return Ok(Some(EngineOutcome::Restart));
                    }
                    Err(e) => tracing::error!("State: OTA failed: {}", e),
                }
            }
            None => {}
        }
        Ok(None)
    }

    fn play_menu_cue(&self) {
        match self.menu_index {
            0 => self.play_cue(CueId::TutorSettings),
            _ => self.play_cue(CueId::SubmitAQuestion),
        }
    }

    fn on_settings(
        &mut self,
        event: Option<InputEvent>,
    ) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.play_cue(CueId::TutorSettings);
        }

        if event == Some(InputEvent::DoublePress) {
            self.play_cue(CueId::ReturningHome);
            self.transition(ApplicationState::Home);
        }
        Ok(None)
    }

    fn on_submit_question(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if self.entered {
            return Ok(None);
        }
        self.entered = true;

        self.play_cue(CueId::LookAtQuestion);
        self.play_cue(CueId::ConserveBattery);
        self.led.off();

        // Final blocking operation of the cycle: the core suspends here
        // until the user touches a pad
        match self.device.sleep.light_sleep_until_touch()? {
            WakeEvent::Touch => {
                tracing::info!("State: touch wake, starting capture");
                self.set_pending_capture(true);
                // The wake touch also queued pad interrupts; they are not
                // menu input
                while self.events.try_recv().is_ok() {}
                self.transition(ApplicationState::CapturePic);
                Ok(None)
            }
            WakeEvent::Shutdown => Ok(Some(EngineOutcome::Shutdown)),
        }
    }

    fn on_connect_wifi(
        &mut self,
        event: Option<InputEvent>,
    ) -> Result<Option<EngineOutcome>, EngineError> {
        if event == Some(InputEvent::DoublePress) {
            // User abort
            tracing::info!("State: Wi-Fi connect aborted by user");
            if let Err(e) = self.device.wifi.disconnect() {
                tracing::warn!("State: Wi-Fi disconnect failed: {}", e);
            }
            self.wifi_up = false;
            self.led.off();
            self.play_cue(CueId::ReturningHome);
            self.transition(ApplicationState::Home);
            return Ok(None);
        }

        if !self.entered {
            self.entered = true;
            self.play_cue(CueId::AttemptWifiConn);
            self.led.start_blink();
        }

        // Blocking; the collaborator retries internally up to its bound
        match self.device.wifi.connect() {
            Ok(()) => {
                self.wifi_up = true;
                self.led.set_steady(true);
                self.transition(ApplicationState::ValidateSession);
            }
            Err(e) => {
                tracing::warn!("State: Wi-Fi connect failed: {}", e);
                if let Err(e) = self.device.wifi.disconnect() {
                    tracing::warn!("State: Wi-Fi disconnect failed: {}", e);
                }
                self.wifi_up = false;
                self.led.off();
                self.play_cue(CueId::WifiDisconnected);
                if self.frame.is_some() {
                    // Mid-question: clean up and go back to sleep
                    self.transition(ApplicationState::SubmitQuestionComplete);
                } else {
                    self.play_cue(CueId::ReturningHome);
                    self.transition(ApplicationState::Home);
                }
            }
        }
        Ok(None)
    }

    fn on_validate_session(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.validate_attempts = 0;
        }

        match self.api.validate(&self.session) {
            Ok(SessionCheck::Valid) => {
                if self.frame.is_some() {
                    self.transition(ApplicationState::UploadPic);
                } else {
                    self.transition(ApplicationState::CapturePic);
                }
            }
            Ok(SessionCheck::AuthRequired) => {
                self.validate_attempts += 1;
                if self.validate_attempts > self.config.network.validate_retry_limit {
                    self.fail_submission("session validation retries exhausted");
                    return Ok(None);
                }
                match self.api.login(&mut self.session, self.device.nvs.as_ref()) {
                    Ok(true) => {} // re-validate next tick with the fresh cookie
                    Ok(false) => self.fail_submission("login rejected"),
                    Err(e) => tracing::warn!("State: login failed: {}", e),
                }
            }
            Ok(SessionCheck::Forbidden) => {
                tracing::warn!("State: session forbidden, returning home");
                self.play_cue(CueId::ReturningHome);
                self.transition(ApplicationState::Home);
            }
            Ok(SessionCheck::Transient) => self.note_validate_failure("transient status"),
            Err(e) => self.note_validate_failure(&e.to_string()),
        }
        Ok(None)
    }

    fn note_validate_failure(&mut self, reason: &str) {
        tracing::warn!("State: session validation failed: {}", reason);
        self.validate_attempts += 1;
        if self.validate_attempts > self.config.network.validate_retry_limit {
            self.fail_submission("session validation retries exhausted");
        }
    }

    fn on_capture_pic(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.capture_attempts = 0;
            if let Err(e) = self.device.camera.power(true) {
                tracing::error!("State: camera power-on failed: {}", e);
                self.fail_submission("camera unavailable");
                return Ok(None);
            }
        }

        if let Err(e) = self.device.camera.set_quality(self.policy.quality()) {
            tracing::warn!("State: failed to set capture quality: {}", e);
        }

        // Discard frames while the sensor settles on the new exposure
        for _ in 0..self.config.capture.warmup_frames {
            let _ = self.device.camera.capture();
        }

        match self.device.camera.capture() {
            Ok(frame) if !frame.is_empty() => {
                tracing::info!("State: captured frame ({} bytes)", frame.len());
                self.policy.record_success(self.device.nvs.as_ref());
                self.frame = Some(frame);
                if let Err(e) = self.device.camera.power(false) {
                    tracing::warn!("State: camera power-off failed: {}", e);
                }
                self.set_pending_capture(false);
                self.play_cue(CueId::CaptureBeep);
                if self.wifi_up {
                    self.transition(ApplicationState::UploadPic);
                } else {
                    self.transition(ApplicationState::ConnectWifi);
                }
            }
            result => {
                if let Err(e) = result {
                    tracing::warn!("State: capture failed: {}", e);
                } else {
                    tracing::warn!("State: capture produced an empty frame");
                }
                self.capture_attempts += 1;
                match self.policy.record_failure(self.device.nvs.as_ref()) {
                    CaptureVerdict::NeedsBetterLighting => {
                        let _ = self.device.camera.power(false);
                        self.transition(ApplicationState::PicIssue);
                    }
                    CaptureVerdict::Adjusted => {
                        if self.capture_attempts >= self.config.capture.retry_limit {
                            // Encoder settings only take effect after a full
                            // camera re-init; restart with the capture intent
                            // persisted so the next boot resumes here
                            tracing::warn!(
                                "State: capture retries exhausted, restarting with quality {}",
                                self.policy.quality()
                            );
                            self.set_pending_capture(true);
                            let _ = self.device.camera.power(false);
                            self.led.off();
                            return Ok(Some(EngineOutcome::Restart));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    fn on_pic_issue(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.play_cue(CueId::NeedsBetterLighting);
        }
        self.transition(ApplicationState::SubmitQuestionComplete);
        Ok(None)
    }

    fn on_upload_pic(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
        }

        let frame = match self.frame.clone() {
            Some(frame) => frame,
            None => {
                tracing::error!("State: no frame to upload");
                self.transition(ApplicationState::SubmitQuestionComplete);
                return Ok(None);
            }
        };

        match self.api.upload_frame(&frame, &mut self.session) {
            // 409 means the service already holds this frame; both carry
            // the document id
            Ok(200) | Ok(409) => {
                self.reauth_attempts = 0;
                self.play_cue(CueId::QuestionSubmitted);
                self.transition(ApplicationState::PollDb);
            }
            Ok(400) | Ok(401) => {
                // Bounded: a service that keeps rejecting the upload while
                // validating the session would otherwise ping-pong the two
                // states forever
                self.reauth_attempts += 1;
                if self.reauth_attempts > self.config.network.validate_retry_limit {
                    self.fail_submission("upload authorisation retries exhausted");
                } else {
                    tracing::warn!("State: upload rejected, re-validating session");
                    self.transition(ApplicationState::ValidateSession);
                }
            }
            Ok(status) => {
                tracing::error!("State: upload failed with status {}", status);
                self.fail_submission("upload rejected");
            }
            Err(e) => {
                tracing::error!("State: upload failed: {}", e);
                self.fail_submission("upload failed");
            }
        }
        Ok(None)
    }

    fn on_poll_db(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.poll_attempts = 0;
            self.play_cue(CueId::PleaseWait);
        }

        if self.poll_attempts >= self.config.network.db_poll_limit {
            self.fail_submission("question status polls exhausted");
            return Ok(None);
        }

        match self.api.poll_status(&mut self.session) {
            Ok(status) if status == question_status::ANSWERED => {
                tracing::info!("State: question answered");
                self.transition(ApplicationState::DownloadTts);
            }
            Ok(status)
                if status == question_status::PENDING
                    || status == question_status::UNANSWERED =>
            {
                self.poll_attempts += 1;
                std::thread::sleep(Duration::from_millis(self.config.network.poll_wait_ms));
            }
            Ok(status) => {
                // expired / canceled / issue
                tracing::warn!("State: question reached terminal status {:?}", status);
                self.fail_submission("question not answered");
            }
            Err(e) => {
                tracing::warn!("State: status poll failed: {}", e);
                self.poll_attempts += 1;
                std::thread::sleep(Duration::from_millis(self.config.network.poll_wait_ms));
            }
        }
        Ok(None)
    }

    fn on_download_tts(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.download_attempts = 0;
        }

        match self.api.download_tts(&self.session) {
            Ok(samples) => {
                tracing::info!("State: answer downloaded ({} samples)", samples.len());
                self.answer = Some(samples);
                self.transition(ApplicationState::PlaybackAnswer);
            }
            Err(e) => {
                tracing::warn!("State: answer download failed: {}", e);
                self.download_attempts += 1;
                if self.download_attempts >= self.config.network.download_retry_limit {
                    self.fail_submission("answer download retries exhausted");
                }
            }
        }
        Ok(None)
    }

    fn on_playback_answer(
        &mut self,
        event: Option<InputEvent>,
    ) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
            self.answer_wait_ticks = 0;

            let answer = match &self.answer {
                Some(answer) => answer.clone(),
                None => {
                    tracing::error!("State: no answer to play");
                    self.transition(ApplicationState::SubmitQuestionComplete);
                    return Ok(None);
                }
            };
            if let Err(e) =
                self.engine
                    .submit(answer, self.config.audio.answer_gain, true)
            {
                tracing::error!("State: failed to play answer: {}", e);
            }
            self.play_cue(CueId::RepeatAnswer);
            return Ok(None);
        }

        match event {
            Some(InputEvent::Forward) | Some(InputEvent::Backward) => {
                // Replay request: re-run the entry action
                tracing::info!("State: replaying answer");
                self.entered = false;
            }
            _ => {
                self.answer_wait_ticks += 1;
                if self.answer_wait_ticks >= self.config.audio.answer_repeat_window_ticks {
                    self.transition(ApplicationState::SubmitQuestionComplete);
                }
            }
        }
        Ok(None)
    }

    fn on_complete(&mut self) -> Result<Option<EngineOutcome>, EngineError> {
        if !self.entered {
            self.entered = true;
        }

        self.frame = None;
        self.answer = None;
        self.reauth_attempts = 0;
        self.session.clear_question();
        self.set_pending_capture(false);
        self.led.off();
        if self.wifi_up {
            if let Err(e) = self.device.wifi.disconnect() {
                tracing::warn!("State: Wi-Fi disconnect failed: {}", e);
            }
            self.wifi_up = false;
        }

        self.transition(ApplicationState::SubmitQuestion);
        Ok(None)
    }

    /// Give up on the current submission: cue the failure and head for the
    /// cleanup state.
    fn fail_submission(&mut self, reason: &str) {
        tracing::warn!("State: submission abandoned: {}", reason);
        self.play_cue(CueId::SubmissionProblem);
        self.transition(ApplicationState::SubmitQuestionComplete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::hal::{HttpResponse, NvsStore};
    use crate::sim::{
        SimAudioOutput, SimButtonPin, SimCamera, SimHttp, SimLed, SimNvs, SimOta, SimSleep,
        SimTouchPads, SimWifi,
    };
    use crossbeam_channel::{unbounded, Sender};
    use tempfile::TempDir;

    struct TestRig {
        orchestrator: Orchestrator,
        events: Sender<InputEvent>,
        http: Arc<SimHttp>,
        camera: Arc<SimCamera>,
        nvs: Arc<SimNvs>,
        sleep: Arc<SimSleep>,
        wifi: Arc<SimWifi>,
        ota: Arc<SimOta>,
        _clip_dir: TempDir,
    }

    fn test_rig() -> TestRig {
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

        let device = Device {
            audio: audio.clone(),
            touch,
            button,
            camera: camera.clone(),
            wifi: wifi.clone(),
            http: http.clone(),
            nvs: nvs.clone(),
            ota: ota.clone(),
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

        let orchestrator = Orchestrator::new(device, engine, clips, rx, config);

        TestRig {
            orchestrator,
            events: tx,
            http,
            camera,
            nvs,
            sleep,
            wifi,
            ota,
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

    #[test]
    fn test_menu_index_one_single_press_enters_submit_question() {
        let mut rig = test_rig();
        rig.orchestrator
            .step(Some(InputEvent::Forward))
            .unwrap();
        assert_eq!(rig.orchestrator.menu_index, 1);

        rig.orchestrator
            .step(Some(InputEvent::SinglePress))
            .unwrap();
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestion
        );
    }

    #[test]
    fn test_menu_index_wraps_both_directions() {
        let mut rig = test_rig();
        rig.orchestrator.step(None).unwrap();
        rig.orchestrator
            .step(Some(InputEvent::Backward))
            .unwrap();
        assert_eq!(rig.orchestrator.menu_index, 1);
        rig.orchestrator
            .step(Some(InputEvent::Forward))
            .unwrap();
        assert_eq!(rig.orchestrator.menu_index, 0);
    }

    #[test]
    fn test_home_single_press_default_index_enters_settings() {
        let mut rig = test_rig();
        rig.orchestrator
            .step(Some(InputEvent::SinglePress))
            .unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::Settings);

        // Double press returns home
        rig.orchestrator.step(None).unwrap();
        rig.orchestrator
            .step(Some(InputEvent::DoublePress))
            .unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::Home);
    }

    #[test]
    fn test_home_double_press_flashes_ota_and_requests_restart() {
        let mut rig = test_rig();
        let outcome = rig
            .orchestrator
            .step(Some(InputEvent::DoublePress))
            .unwrap();
        assert_eq!(outcome, Some(EngineOutcome::Restart));
        assert_eq!(rig.ota.flash_count(), 1);
    }

    #[test]
    fn test_failed_ota_stays_home() {
        let mut rig = test_rig();
        rig.ota.set_succeed(false);
        let outcome = rig
            .orchestrator
            .step(Some(InputEvent::DoublePress))
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(rig.orchestrator.state(), ApplicationState::Home);
    }

    #[test]
    fn test_submit_question_sleeps_then_captures_on_touch_wake() {
        let mut rig = test_rig();
        rig.sleep.push_wake(WakeEvent::Touch);
        rig.orchestrator.transition(ApplicationState::SubmitQuestion);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.sleep.sleep_count(), 1);
        assert_eq!(rig.orchestrator.state(), ApplicationState::CapturePic);
        assert_eq!(rig.nvs.read_u8(PENDING_CAPTURE_KEY).unwrap(), Some(1));
    }

    #[test]
    fn test_capture_success_clears_pending_and_connects() {
        let mut rig = test_rig();
        rig.camera.push_frame(vec![0xFF; 64]);
        // Warm-up discards pull from the same queue; pad it
        for _ in 0..5 {
            rig.camera.push_frame(vec![0xAA; 8]);
        }
        rig.orchestrator.transition(ApplicationState::CapturePic);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::ConnectWifi);
        assert!(rig.orchestrator.frame.is_some());
        assert_eq!(rig.nvs.read_u8(PENDING_CAPTURE_KEY).unwrap(), Some(0));
        // The sensor is powered down once the frame is held, and the visit
        // applied the base encoder quality
        assert!(!rig.camera.is_powered());
        assert_eq!(rig.camera.qualities(), vec![6]);
    }

    #[test]
    fn test_capture_retries_exhausted_requests_restart() {
        let mut rig = test_rig();
        // Every capture (warm-up and kept) fails: queue stays empty
        rig.orchestrator.transition(ApplicationState::CapturePic);

        let mut outcome = None;
        for _ in 0..10 {
            outcome = rig.orchestrator.step(None).unwrap();
            if outcome.is_some() {
                break;
            }
        }
        assert_eq!(outcome, Some(EngineOutcome::Restart));
        assert_eq!(rig.nvs.read_u8(PENDING_CAPTURE_KEY).unwrap(), Some(1));
        // The exponent moved once per failed attempt, and each retry applied
        // the policy's stepped-up quality before capturing
        assert_eq!(rig.orchestrator.policy.exponent(), 3);
        assert_eq!(rig.camera.qualities(), vec![6, 8, 11]);
        assert!(!rig.camera.is_powered());
    }

    #[test]
    fn test_capture_at_ceiling_reports_lighting_issue() {
        let mut rig = test_rig();
        rig.nvs
            .write_u8(crate::policy::EXPONENT_KEY, 5)
            .unwrap();
        rig.orchestrator.policy = CaptureQualityPolicy::load(rig.nvs.as_ref());
        rig.orchestrator.transition(ApplicationState::CapturePic);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::PicIssue);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestionComplete
        );
    }

    #[test]
    fn test_validate_forbidden_returns_home() {
        let mut rig = test_rig();
        rig.http.push_get(response(403, "{}"));
        rig.orchestrator.transition(ApplicationState::ValidateSession);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::Home);
    }

    #[test]
    fn test_validate_with_frame_goes_to_upload() {
        let mut rig = test_rig();
        rig.orchestrator.frame = Some(Frame { bytes: vec![1] });
        rig.http.push_get(response(200, "{}"));
        rig.orchestrator.transition(ApplicationState::ValidateSession);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::UploadPic);
    }

    #[test]
    fn test_validate_without_frame_goes_to_capture() {
        let mut rig = test_rig();
        rig.http.push_get(response(200, "{}"));
        rig.orchestrator.transition(ApplicationState::ValidateSession);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::CapturePic);
    }

    #[test]
    fn test_validate_retries_exhausted_funnel_to_cleanup() {
        let mut rig = test_rig();
        // No scripted responses: every validate errors out
        rig.orchestrator.transition(ApplicationState::ValidateSession);

        for _ in 0..10 {
            if rig.orchestrator.state() != ApplicationState::ValidateSession {
                break;
            }
            rig.orchestrator.step(None).unwrap();
        }
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestionComplete
        );
    }

    #[test]
    fn test_upload_auth_failure_revalidates() {
        let mut rig = test_rig();
        rig.orchestrator.frame = Some(Frame { bytes: vec![1] });
        rig.http.push_image(response(401, "{}"));
        rig.orchestrator.transition(ApplicationState::UploadPic);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::ValidateSession
        );
    }

    #[test]
    fn test_persistent_upload_rejection_funnels_to_cleanup() {
        let mut rig = test_rig();
        rig.orchestrator.frame = Some(Frame { bytes: vec![1] });
        // The service keeps rejecting the upload with 401 while still
        // answering 200 on validation; the re-auth bound must break the
        // UploadPic/ValidateSession cycle
        for _ in 0..10 {
            rig.http.push_image(response(401, "{}"));
            rig.http.push_get(response(200, "{}"));
        }
        rig.orchestrator.transition(ApplicationState::UploadPic);

        for _ in 0..30 {
            if rig.orchestrator.state() == ApplicationState::SubmitQuestionComplete {
                break;
            }
            rig.orchestrator.step(None).unwrap();
        }
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestionComplete
        );
    }

    #[test]
    fn test_poll_limit_exhaustion_is_not_an_infinite_loop() {
        let mut rig = test_rig();
        rig.orchestrator.session.doc_id = Some("doc-1".to_string());
        let limit = rig.orchestrator.config.network.db_poll_limit;
        for _ in 0..=limit {
            rig.http
                .push_get(response(200, r#"{"status":"pending"}"#));
        }
        rig.orchestrator.transition(ApplicationState::PollDb);

        for _ in 0..=(limit + 1) {
            if rig.orchestrator.state() == ApplicationState::SubmitQuestionComplete {
                break;
            }
            rig.orchestrator.step(None).unwrap();
        }
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestionComplete
        );
    }

    #[test]
    fn test_poll_terminal_status_abandons_submission() {
        let mut rig = test_rig();
        rig.orchestrator.session.doc_id = Some("doc-1".to_string());
        rig.http
            .push_get(response(200, r#"{"status":"expired"}"#));
        rig.orchestrator.transition(ApplicationState::PollDb);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestionComplete
        );
    }

    #[test]
    fn test_answer_replay_on_touch() {
        let mut rig = test_rig();
        rig.orchestrator.answer = Some(vec![100i16; 2000]);
        rig.orchestrator.transition(ApplicationState::PlaybackAnswer);

        rig.orchestrator.step(None).unwrap(); // entry: plays answer
        rig.orchestrator
            .step(Some(InputEvent::Forward))
            .unwrap(); // replay request
        assert!(!rig.orchestrator.entered);
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::PlaybackAnswer
        );

        // Without further touches the state times out into cleanup
        rig.orchestrator.step(None).unwrap(); // re-entry
        rig.orchestrator.step(None).unwrap();
        rig.orchestrator.step(None).unwrap();
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestionComplete
        );
    }

    #[test]
    fn test_complete_tears_down_and_heads_for_sleep() {
        let mut rig = test_rig();
        rig.orchestrator.frame = Some(Frame { bytes: vec![1] });
        rig.orchestrator.answer = Some(vec![1i16]);
        rig.orchestrator.wifi_up = true;
        rig.orchestrator.transition(ApplicationState::SubmitQuestionComplete);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::SubmitQuestion);
        assert!(rig.orchestrator.frame.is_none());
        assert!(rig.orchestrator.answer.is_none());
        assert!(!rig.orchestrator.wifi_up);
        assert_eq!(rig.wifi.disconnect_count(), 1);
    }

    #[test]
    fn test_wifi_failure_mid_question_sleeps_instead_of_home() {
        let mut rig = test_rig();
        rig.orchestrator.frame = Some(Frame { bytes: vec![1] });
        rig.wifi.fail_next_connects(1);
        rig.orchestrator.transition(ApplicationState::ConnectWifi);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(
            rig.orchestrator.state(),
            ApplicationState::SubmitQuestionComplete
        );
    }

    #[test]
    fn test_wifi_failure_without_question_returns_home() {
        let mut rig = test_rig();
        rig.wifi.fail_next_connects(1);
        rig.orchestrator.transition(ApplicationState::ConnectWifi);

        rig.orchestrator.step(None).unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::Home);
    }

    #[test]
    fn test_wifi_double_press_aborts_to_home() {
        let mut rig = test_rig();
        rig.orchestrator.transition(ApplicationState::ConnectWifi);
        rig.orchestrator
            .step(Some(InputEvent::DoublePress))
            .unwrap();
        assert_eq!(rig.orchestrator.state(), ApplicationState::Home);
        assert!(!rig.orchestrator.wifi_up);
        let _ = rig.events;
    }
}
