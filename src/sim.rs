//! Scripted host-side implementations of the hardware contracts
//!
//! These doubles let the whole engine run on a development machine: tests
//! script them with canned frames, HTTP responses and wake events, and the
//! demo binary walks one submit-question cycle through them. Interrupt
//! sources are modelled as channel sends, matching the flag-and-enqueue
//! discipline the real ISRs follow.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::audio::BLOCK_SAMPLES;
use crate::error::EngineError;
use crate::hal::{
    AudioOutput, ButtonPin, Camera, Frame, HttpClient, HttpResponse, NvsStore, Ota, Pad,
    PadStatus, SleepControl, StatusLed, TouchPads, Wifi, WakeEvent,
};

/// I2S double: meters out one block notification per transmitted block
pub struct SimAudioOutput {
    block_tx: Sender<()>,
    block_rx: Receiver<()>,
    last_written: Mutex<Vec<i16>>,
    block_interval: Mutex<Duration>,
    running: std::sync::Arc<AtomicBool>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    blocks_delivered: std::sync::Arc<AtomicUsize>,
    fail_start: AtomicBool,
}

impl Default for SimAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAudioOutput {
    pub fn new() -> Self {
        let (block_tx, block_rx) = unbounded();
        Self {
            block_tx,
            block_rx,
            last_written: Mutex::new(Vec::new()),
            block_interval: Mutex::new(Duration::ZERO),
            running: std::sync::Arc::new(AtomicBool::new(false)),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            blocks_delivered: std::sync::Arc::new(AtomicUsize::new(0)),
            fail_start: AtomicBool::new(false),
        }
    }

    /// Delay between block notifications; zero delivers them immediately
    pub fn set_block_interval(&self, interval: Duration) {
        *self.block_interval.lock() = interval;
    }

    /// Make the next `start` call fail, modelling a dead peripheral
    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn last_written(&self) -> Vec<i16> {
        self.last_written.lock().clone()
    }

    pub fn last_written_len(&self) -> usize {
        self.last_written.lock().len()
    }

    /// Highest number of sessions the peripheral saw open at once
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Block notifications raised so far, across all sessions
    pub fn blocks_delivered(&self) -> usize {
        self.blocks_delivered.load(Ordering::SeqCst)
    }
}

impl AudioOutput for SimAudioOutput {
    fn start(&self) -> Result<(), EngineError> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(EngineError::HardwareIo(
                "Simulated I2S start failure".to_string(),
            ));
        }
        self.running.store(true, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, samples: &[i16]) -> Result<(), EngineError> {
        *self.last_written.lock() = samples.to_vec();

        let blocks = samples.len().div_ceil(BLOCK_SAMPLES);
        let interval = *self.block_interval.lock();
        let tx = self.block_tx.clone();
        let running = self.running.clone();
        let delivered = self.blocks_delivered.clone();
        std::thread::spawn(move || {
            for _ in 0..blocks {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
                if !running.load(Ordering::SeqCst) || tx.send(()).is_err() {
                    break;
                }
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::SeqCst);
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    fn block_events(&self) -> Receiver<()> {
        self.block_rx.clone()
    }
}

/// Touch pad double with settable raw readings and injectable interrupts
pub struct SimTouchPads {
    raw: Mutex<HashMap<u8, u16>>,
    thresholds: Mutex<HashMap<u8, u16>>,
    status_tx: Sender<PadStatus>,
    status_rx: Receiver<PadStatus>,
}

fn pad_key(pad: Pad) -> u8 {
    match pad {
        Pad::Forward => 0,
        Pad::Backward => 1,
    }
}

impl Default for SimTouchPads {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTouchPads {
    pub fn new() -> Self {
        let (status_tx, status_rx) = unbounded();
        Self {
            raw: Mutex::new(HashMap::new()),
            thresholds: Mutex::new(HashMap::new()),
            status_tx,
            status_rx,
        }
    }

    pub fn set_raw(&self, pad: Pad, value: u16) {
        self.raw.lock().insert(pad_key(pad), value);
    }

    /// Deliver a threshold interrupt as the ISR would
    pub fn inject_status(&self, status: PadStatus) {
        let _ = self.status_tx.send(status);
    }

    pub fn threshold(&self, pad: Pad) -> Option<u16> {
        self.thresholds.lock().get(&pad_key(pad)).copied()
    }
}

impl TouchPads for SimTouchPads {
    fn read_raw(&self, pad: Pad) -> Result<u16, EngineError> {
        Ok(self.raw.lock().get(&pad_key(pad)).copied().unwrap_or(300))
    }

    fn set_threshold(&self, pad: Pad, threshold: u16) -> Result<(), EngineError> {
        self.thresholds.lock().insert(pad_key(pad), threshold);
        Ok(())
    }

    fn status_events(&self) -> Receiver<PadStatus> {
        self.status_rx.clone()
    }
}

/// Button double: `press` sets the level and raises a falling edge.
///
/// The edge channel is bounded(1) as the real ISR's is; an edge raised while
/// one is already queued is dropped, matching the hardware's behaviour.
pub struct SimButtonPin {
    pressed: AtomicBool,
    edge_tx: Sender<()>,
    edge_rx: Receiver<()>,
}

impl Default for SimButtonPin {
    fn default() -> Self {
        Self::new()
    }
}

impl SimButtonPin {
    pub fn new() -> Self {
        let (edge_tx, edge_rx) = crossbeam_channel::bounded(1);
        Self {
            pressed: AtomicBool::new(false),
            edge_tx,
            edge_rx,
        }
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
        let _ = self.edge_tx.try_send(());
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::SeqCst);
    }
}

impl ButtonPin for SimButtonPin {
    fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }

    fn edge_events(&self) -> Receiver<()> {
        self.edge_rx.clone()
    }
}

/// Camera double scripted with a queue of capture results
pub struct SimCamera {
    results: Mutex<VecDeque<Result<Frame, EngineError>>>,
    powered: AtomicBool,
    qualities: Mutex<Vec<u8>>,
    captures: AtomicUsize,
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCamera {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            powered: AtomicBool::new(false),
            qualities: Mutex::new(Vec::new()),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn push_result(&self, result: Result<Frame, EngineError>) {
        self.results.lock().push_back(result);
    }

    pub fn push_frame(&self, bytes: Vec<u8>) {
        self.push_result(Ok(Frame { bytes }));
    }

    pub fn push_failure(&self) {
        self.push_result(Err(EngineError::Capture(
            "Simulated capture failure".to_string(),
        )));
    }

    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    /// Quality values applied before captures, in order
    pub fn qualities(&self) -> Vec<u8> {
        self.qualities.lock().clone()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl Camera for SimCamera {
    fn power(&self, on: bool) -> Result<(), EngineError> {
        self.powered.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn set_quality(&self, quality: u8) -> Result<(), EngineError> {
        self.qualities.lock().push(quality);
        Ok(())
    }

    fn capture(&self) -> Result<Frame, EngineError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.results.lock().pop_front().unwrap_or_else(|| {
            Err(EngineError::Capture("No scripted frame".to_string()))
        })
    }
}

/// Wi-Fi double: fails the first `fail_count` connect calls
pub struct SimWifi {
    fail_count: AtomicUsize,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl Default for SimWifi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWifi {
    pub fn new() -> Self {
        Self {
            fail_count: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.fail_count.store(count, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Wifi for SimWifi {
    fn connect(&self) -> Result<(), EngineError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_count.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_count.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::network_transport(
                "Simulated Wi-Fi timeout".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), EngineError> {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// HTTP double scripted with per-endpoint response queues
pub struct SimHttp {
    gets: Mutex<VecDeque<HttpResponse>>,
    posts: Mutex<VecDeque<HttpResponse>>,
    downloads: Mutex<VecDeque<Vec<u8>>>,
    images: Mutex<VecDeque<HttpResponse>>,
    uploaded: Mutex<Vec<Vec<u8>>>,
}

impl Default for SimHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHttp {
    pub fn new() -> Self {
        Self {
            gets: Mutex::new(VecDeque::new()),
            posts: Mutex::new(VecDeque::new()),
            downloads: Mutex::new(VecDeque::new()),
            images: Mutex::new(VecDeque::new()),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    pub fn push_get(&self, response: HttpResponse) {
        self.gets.lock().push_back(response);
    }

    pub fn push_post(&self, response: HttpResponse) {
        self.posts.lock().push_back(response);
    }

    pub fn push_download(&self, bytes: Vec<u8>) {
        self.downloads.lock().push_back(bytes);
    }

    pub fn push_image(&self, response: HttpResponse) {
        self.images.lock().push_back(response);
    }

    /// Frames the engine uploaded, in order
    pub fn uploaded_frames(&self) -> Vec<Vec<u8>> {
        self.uploaded.lock().clone()
    }
}

fn no_response() -> EngineError {
    EngineError::network_transport("No scripted response".to_string())
}

impl HttpClient for SimHttp {
    fn get(
        &self,
        _path: &str,
        _query: &[(&str, &str)],
        _cookie: Option<&str>,
    ) -> Result<HttpResponse, EngineError> {
        self.gets.lock().pop_front().ok_or_else(no_response)
    }

    fn post(&self, _path: &str, _form: &[(&str, &str)]) -> Result<HttpResponse, EngineError> {
        self.posts.lock().pop_front().ok_or_else(no_response)
    }

    fn download(&self, _path: &str, _query: &[(&str, &str)]) -> Result<Vec<u8>, EngineError> {
        self.downloads.lock().pop_front().ok_or_else(no_response)
    }

    fn send_image(&self, bytes: &[u8], _cookie: Option<&str>) -> Result<HttpResponse, EngineError> {
        self.uploaded.lock().push(bytes.to_vec());
        self.images.lock().pop_front().ok_or_else(no_response)
    }
}

/// In-memory NVS double
pub struct SimNvs {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl Default for SimNvs {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNvs {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }
}

impl NvsStore for SimNvs {
    fn read_u8(&self, key: &str) -> Result<Option<u8>, EngineError> {
        Ok(self.store.lock().get(key).and_then(|v| v.first().copied()))
    }

    fn write_u8(&self, key: &str, value: u8) -> Result<(), EngineError> {
        self.store.lock().insert(key.to_string(), vec![value]);
        Ok(())
    }

    fn read_string(&self, key: &str) -> Result<Option<String>, EngineError> {
        Ok(self
            .store
            .lock()
            .get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned()))
    }

    fn write_string(&self, key: &str, value: &str) -> Result<(), EngineError> {
        self.store
            .lock()
            .insert(key.to_string(), value.as_bytes().to_vec());
        Ok(())
    }

    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.store.lock().get(key).cloned())
    }

    fn write_blob(&self, key: &str, value: &[u8]) -> Result<(), EngineError> {
        self.store.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// OTA double
pub struct SimOta {
    succeed: AtomicBool,
    flashes: AtomicUsize,
}

impl Default for SimOta {
    fn default() -> Self {
        Self::new()
    }
}

impl SimOta {
    pub fn new() -> Self {
        Self {
            succeed: AtomicBool::new(true),
            flashes: AtomicUsize::new(0),
        }
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn flash_count(&self) -> usize {
        self.flashes.load(Ordering::SeqCst)
    }
}

impl Ota for SimOta {
    fn stage_and_flash(&self) -> Result<(), EngineError> {
        self.flashes.fetch_add(1, Ordering::SeqCst);
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::HardwareIo(
                "Simulated OTA failure".to_string(),
            ))
        }
    }
}

/// Sleep double scripted with a queue of wake events; an empty queue wakes
/// with `Shutdown` so test runs terminate.
pub struct SimSleep {
    wakes: Mutex<VecDeque<WakeEvent>>,
    sleeps: AtomicUsize,
}

impl Default for SimSleep {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSleep {
    pub fn new() -> Self {
        Self {
            wakes: Mutex::new(VecDeque::new()),
            sleeps: AtomicUsize::new(0),
        }
    }

    pub fn push_wake(&self, wake: WakeEvent) {
        self.wakes.lock().push_back(wake);
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl SleepControl for SimSleep {
    fn light_sleep_until_touch(&self) -> Result<WakeEvent, EngineError> {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .wakes
            .lock()
            .pop_front()
            .unwrap_or(WakeEvent::Shutdown))
    }
}

/// LED double counting pin writes
pub struct SimLed {
    on: AtomicBool,
    toggles: AtomicUsize,
}

impl Default for SimLed {
    fn default() -> Self {
        Self::new()
    }
}

impl SimLed {
    pub fn new() -> Self {
        Self {
            on: AtomicBool::new(false),
            toggles: AtomicUsize::new(0),
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn toggle_count(&self) -> usize {
        self.toggles.load(Ordering::SeqCst)
    }
}

impl StatusLed for SimLed {
    fn set(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
        self.toggles.fetch_add(1, Ordering::SeqCst);
    }
}
