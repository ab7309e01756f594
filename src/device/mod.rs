//! Acquisition Unit Capability
//!
//! The recorder never talks to the vendor transport directly. Everything it
//! needs from the acquisition unit (session management, register access, page
//! and extension-record retrieval) goes through the [`Device`] trait so the
//! pipeline can run against real hardware or against [`sim::SimulatedDevice`].
//!
//! # Design Philosophy
//!
//! - Async (uses #[async_trait]) so pacing and reconnect waits never block
//!   the runtime
//! - One exclusive owner: methods take `&mut self`, the recorder hands the
//!   device down to the fetchers and the writer for the duration of a call
//! - Uses [`DeviceResult`] so every failure carries a translated
//!   [`DeviceErrorCode`]

pub mod error;
pub mod sim;

pub use error::{DeviceError, DeviceErrorCode, DeviceResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Socket behaviour used when opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Connect with blocking sockets; the driver decides how long to wait.
    #[default]
    Blocking,
    /// Connect with non-blocking sockets and an explicit timeout.
    NonBlocking,
}

/// Page streams the unit produces, one fetcher per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// Low frequency side scan.
    LowFrequency,
    /// High frequency side scan.
    HighFrequency,
    /// Raw (phase) bathymetry.
    RawBathy,
    /// Processed bathymetry.
    ProcessedBathy,
}

impl ChannelType {
    /// Page type identifier used by the driver.
    pub fn page_type(self) -> u32 {
        match self {
            Self::LowFrequency => 21,
            Self::HighFrequency => 22,
            Self::RawBathy => 23,
            Self::ProcessedBathy => 24,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LowFrequency => "lf",
            Self::HighFrequency => "hf",
            Self::RawBathy => "raw_bathy",
            Self::ProcessedBathy => "proc_bathy",
        };
        write!(f, "{}", label)
    }
}

/// Availability of a requested page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// The page is ready to be fetched.
    Ready,
    /// Nothing available yet for the requested ping.
    NoData,
    /// The requested ping has already been discarded by the unit.
    Old,
}

/// Answer to a page availability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// Availability of the page.
    pub status: PageStatus,
    /// Size of the page in bytes when `status` is `Ready`.
    pub byte_count: u32,
}

impl PageInfo {
    /// Shorthand for "no page yet".
    pub fn no_data() -> Self {
        Self {
            status: PageStatus::NoData,
            byte_count: 0,
        }
    }
}

/// Vendor extension records appended to the first bathymetry page of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataRecordId {
    /// Bathymetry calibration.
    Calibration,
    /// Bathymetry engineering settings.
    Engineering,
    /// Bathymetry processing settings.
    Processing,
}

impl MetadataRecordId {
    /// Splice order of the records.
    pub const ALL: [MetadataRecordId; 3] = [Self::Calibration, Self::Engineering, Self::Processing];

    /// Record identifier as stored in the record header.
    pub fn record_id(self) -> u32 {
        match self {
            Self::Calibration => crate::sdfx::RECORD_ID_BATHY_CAL,
            Self::Engineering => crate::sdfx::RECORD_ID_BATHY_ENG_SETTINGS,
            Self::Processing => crate::sdfx::RECORD_ID_BATHY_PROC_SETTINGS,
        }
    }
}

impl fmt::Display for MetadataRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Calibration => "BATHY_CAL",
            Self::Engineering => "BATHY_ENG_SETTINGS",
            Self::Processing => "BATHY_PROC_SETTINGS",
        };
        write!(f, "{}", label)
    }
}

/// Directory operation requested together with the recording settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathAction {
    /// Nothing to do.
    #[default]
    None,
    /// Start recording into `file_path`.
    Set,
    /// Create `file_path`, then record into it.
    CreateAndSet,
    /// Remove `file_path` if it is empty.
    DeleteEmpty,
}

impl PathAction {
    /// Decode the raw register value; unknown values mean "nothing to do".
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Set,
            2 => Self::CreateAndSet,
            3 => Self::DeleteEmpty,
            _ => Self::None,
        }
    }

    /// Raw register value.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Set => 1,
            Self::CreateAndSet => 2,
            Self::DeleteEmpty => 3,
        }
    }
}

/// Recording settings owned by the unit (written by the configuration tool).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordSettings {
    /// Settings layout version.
    pub version: u32,
    /// Whether recording is enabled.
    pub record_mode: bool,
    /// Output format selector (only SDF exists).
    pub file_format: u32,
    /// Pings per file before rotation; 0 disables rotation.
    pub pings_per_file: u32,
    /// Explicit request to start a new file.
    pub new_file: bool,
    /// Diagnostic level of the unit.
    pub diag_level: u32,
    /// Prefix of recording file names.
    pub file_prefix: String,
    /// Raw directory action, see [`PathAction::from_raw`].
    pub path_action: u32,
    /// Output directory.
    pub file_path: String,
}

impl RecordSettings {
    /// Decoded directory action.
    pub fn path_action(&self) -> PathAction {
        PathAction::from_raw(self.path_action)
    }
}

impl fmt::Display for RecordSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version={} record_mode={} file_format={} pings_per_file={} new_file={} \
             diag_level={} file_prefix={:?} path_action={} file_path={:?}",
            self.version,
            self.record_mode,
            self.file_format,
            self.pings_per_file,
            self.new_file,
            self.diag_level,
            self.file_prefix,
            self.path_action,
            self.file_path
        )
    }
}

/// Recorder status reported back to the unit with every settings query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStatus {
    /// Status layout version.
    pub version: u32,
    /// Used space on the recording volume, in percent.
    pub hard_disk_percent: u32,
    /// Set once the volume crossed the disk-full threshold.
    pub hard_disk_full: bool,
    /// Name of the file currently being recorded.
    pub file_name: String,
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self {
            version: 14,
            hard_disk_percent: 0,
            hard_disk_full: false,
            file_name: String::new(),
        }
    }
}

/// Capability: Sonar Page Acquisition
///
/// Everything the recording pipeline consumes from the acquisition unit.
///
/// # Contract
/// - `connect` opens (or re-opens) the single session; an `AlreadyConnected`
///   code still leaves a usable session
/// - `disconnect` is infallible and idempotent
/// - `page_info` must be followed by `fetch_page` with the reported byte count
///   before the next `page_info` for the page to be retrieved
/// - a request for ping number 0 means "the latest ping available"
/// - `metadata_record` fills a buffer of `metadata_record_size` bytes; the
///   record's own header carries the authoritative (possibly smaller) length
#[async_trait]
pub trait Device: Send {
    /// Open a session with the unit at `address`.
    async fn connect(
        &mut self,
        address: &str,
        mode: TransportMode,
        timeout: Duration,
    ) -> DeviceResult<()>;

    /// Close the current session, if any.
    async fn disconnect(&mut self);

    /// Query availability of the page of `channel` for `ping_number`.
    async fn page_info(&mut self, channel: ChannelType, ping_number: u32)
        -> DeviceResult<PageInfo>;

    /// Copy the page announced by the last `page_info` into `buf`.
    async fn fetch_page(&mut self, buf: &mut [u8]) -> DeviceResult<()>;

    /// Framing mode register: which page streams are produced per ping.
    async fn framing_mode(&mut self) -> DeviceResult<u32>;

    /// Time between pings.
    async fn ping_interval(&mut self) -> DeviceResult<Duration>;

    /// Report `status` and read back the current recording settings.
    async fn record_info(&mut self, status: &RecordStatus) -> DeviceResult<RecordSettings>;

    /// Overwrite the recording settings.
    async fn set_record_info(&mut self, settings: &RecordSettings) -> DeviceResult<()>;

    /// Block size reported for an extension record.
    async fn metadata_record_size(&mut self, id: MetadataRecordId) -> DeviceResult<u32>;

    /// Copy an extension record into `buf`.
    async fn metadata_record(&mut self, id: MetadataRecordId, buf: &mut [u8])
        -> DeviceResult<()>;
}
