//! Hardware collaborator contracts
//!
//! The orchestration engine drives every peripheral and external service
//! through the narrow traits defined here: the I2S audio output, the two
//! capacitive touch pads, the home button GPIO, the camera, Wi-Fi, the HTTP
//! client for the tutoring service, NVS key/value persistence, OTA flashing,
//! light sleep and the status LED. Production firmware binds these to vendor
//! drivers; the `sim` module binds them to scripted host-side doubles.
//!
//! Interrupt-context implementations must restrict themselves to flag sets
//! and channel sends; all decision logic lives in task context.

use crossbeam_channel::Receiver;
use std::sync::Arc;

use crate::error::EngineError;

/// A captured camera frame (JPEG bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Response from the tutoring service
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Value of a Set-Cookie header, when the service issued one
    pub set_cookie: Option<String>,
}

/// Which of the two touch pads a reading or event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pad {
    Forward,
    Backward,
}

/// Pad status snapshot delivered by the touch threshold interrupt.
///
/// The ISR reads the status register, packs it into this struct and sends it
/// on the status channel; it does no classification of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct PadStatus {
    pub forward: bool,
    pub backward: bool,
}

/// Cause of a wake-up from light sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    /// A touch pad woke the device; the user wants to interact
    Touch,
    /// The host asked the engine to shut down cleanly
    Shutdown,
}

/// The I2S playback peripheral.
///
/// `write` queues a full padded buffer for DMA transmission; the peripheral
/// reports each transmitted block on the `block_events` channel. The playback
/// engine's completion task counts those notifications to detect the end of
/// a clip.
pub trait AudioOutput: Send + Sync {
    fn start(&self) -> Result<(), EngineError>;
    fn write(&self, samples: &[i16]) -> Result<(), EngineError>;
    fn stop(&self) -> Result<(), EngineError>;
    /// One `()` per transmitted DMA block
    fn block_events(&self) -> Receiver<()>;
}

/// The two capacitive touch pads
pub trait TouchPads: Send + Sync {
    /// Raw capacitance reading; lower values mean a finger is closer
    fn read_raw(&self, pad: Pad) -> Result<u16, EngineError>;
    /// Arm the hardware threshold interrupt for a pad
    fn set_threshold(&self, pad: Pad, threshold: u16) -> Result<(), EngineError>;
    /// ISR-delivered status snapshots, one per threshold crossing
    fn status_events(&self) -> Receiver<PadStatus>;
}

/// The home button GPIO
pub trait ButtonPin: Send + Sync {
    /// Level read: true while the button is held down
    fn is_pressed(&self) -> bool;
    /// One `()` per falling edge, enqueued by the ISR
    fn edge_events(&self) -> Receiver<()>;
}

/// The question camera
pub trait Camera: Send + Sync {
    fn power(&self, on: bool) -> Result<(), EngineError>;
    /// JPEG encoder quality parameter; larger values compress harder
    fn set_quality(&self, quality: u8) -> Result<(), EngineError>;
    fn capture(&self) -> Result<Frame, EngineError>;
}

/// Wi-Fi station management; `connect` retries internally up to its bound
pub trait Wifi: Send + Sync {
    fn connect(&self) -> Result<(), EngineError>;
    fn disconnect(&self) -> Result<(), EngineError>;
}

/// HTTP client for the tutoring service
pub trait HttpClient: Send + Sync {
    fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cookie: Option<&str>,
    ) -> Result<HttpResponse, EngineError>;
    fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<HttpResponse, EngineError>;
    fn download(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, EngineError>;
    /// Multipart upload of a captured frame
    fn send_image(&self, bytes: &[u8], cookie: Option<&str>) -> Result<HttpResponse, EngineError>;
}

/// NVS-style key/value persistence surviving reboots
pub trait NvsStore: Send + Sync {
    fn read_u8(&self, key: &str) -> Result<Option<u8>, EngineError>;
    fn write_u8(&self, key: &str, value: u8) -> Result<(), EngineError>;
    fn read_string(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn write_string(&self, key: &str, value: &str) -> Result<(), EngineError>;
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError>;
    fn write_blob(&self, key: &str, value: &[u8]) -> Result<(), EngineError>;
}

/// OTA update: flash a staged firmware image into the boot partition
pub trait Ota: Send + Sync {
    fn stage_and_flash(&self) -> Result<(), EngineError>;
}

/// Light-sleep entry; blocks the calling task until a wake event
pub trait SleepControl: Send + Sync {
    fn light_sleep_until_touch(&self) -> Result<WakeEvent, EngineError>;
}

/// The status LED pin
pub trait StatusLed: Send + Sync {
    fn set(&self, on: bool);
}

/// All collaborator handles the engine needs, bound at startup
#[derive(Clone)]
pub struct Device {
    pub audio: Arc<dyn AudioOutput>,
    pub touch: Arc<dyn TouchPads>,
    pub button: Arc<dyn ButtonPin>,
    pub camera: Arc<dyn Camera>,
    pub wifi: Arc<dyn Wifi>,
    pub http: Arc<dyn HttpClient>,
    pub nvs: Arc<dyn NvsStore>,
    pub ota: Arc<dyn Ota>,
    pub sleep: Arc<dyn SleepControl>,
    pub led: Arc<dyn StatusLed>,
}
