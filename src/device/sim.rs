//! Simulated Acquisition Unit
//!
//! Deterministic in-process stand-in for the acquisition unit, used by the
//! test suite and by `sonar-recorder --simulate`.
//!
//! # Behaviour
//!
//! - Each channel keeps a retained window of pages (default 64). Pings that
//!   fell out of the window are reported as `Old`; a request for ping 0
//!   returns the newest page; a request past the newest page is `NoData`;
//!   otherwise the first retained page at or after the requested ping is
//!   served.
//! - Pages are either scripted with [`SimulatedDevice::push_page`] or, in
//!   free-running mode, synthesised at one ping per ping interval for every
//!   channel the framing mode enables.
//! - Faults can be scripted per operation, fired once or after a number of
//!   successful calls, and connection attempts can be refused.
//!
//! All clones share state, so a test can keep a handle while the recorder
//! owns another.

use super::{
    ChannelType, Device, DeviceError, DeviceErrorCode, DeviceResult, MetadataRecordId,
    PageInfo, PageStatus, RecordSettings, RecordStatus, TransportMode,
};
use crate::page::{
    ChannelMask, PageHeader, PageTimestamp, CAPABILITY_BATHY, FRAMING_LF, FRAMING_RAW_BATHY,
    PAGE_HEADER_SIZE, WRITE_ORDER,
};
use crate::sdfx::{end_record, RecordHeader, HEADER_VERSION, REC_HEADER_SIZE};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default number of pages retained per channel.
pub const DEFAULT_RETAINED_PAGES: usize = 64;

/// Timestamp stamped on pages built by [`synthetic_page`].
pub fn default_timestamp() -> PageTimestamp {
    PageTimestamp {
        year: 2024,
        month: 3,
        day: 9,
        hour: 14,
        minute: 5,
        second: 59,
        hundredths: 0,
    }
}

/// Build a well-formed page: header, `data_len` bytes of channel data and an
/// extension region holding only the END record.
pub fn synthetic_page(
    channel: ChannelType,
    ping_number: u32,
    data_len: usize,
    bathy_capable: bool,
) -> Vec<u8> {
    synthetic_page_at(channel, ping_number, data_len, bathy_capable, default_timestamp())
}

/// [`synthetic_page`] with an explicit creation timestamp.
pub fn synthetic_page_at(
    channel: ChannelType,
    ping_number: u32,
    data_len: usize,
    bathy_capable: bool,
    timestamp: PageTimestamp,
) -> Vec<u8> {
    let extension_size = 4 + REC_HEADER_SIZE;
    let total = PAGE_HEADER_SIZE + data_len + extension_size;
    let mut page = vec![0u8; total];

    let header = PageHeader {
        number_bytes: total as u32,
        page_version: channel.page_version(),
        ping_number,
        header_size: PAGE_HEADER_SIZE as u32,
        sdf_extension_size: extension_size as u32,
        capability_mask: if bathy_capable { CAPABILITY_BATHY } else { 0 },
        timestamp,
        ..Default::default()
    };
    header.encode_into(&mut page);

    // recognisable channel data: ping number and channel id
    for (i, byte) in page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + data_len]
        .iter_mut()
        .enumerate()
    {
        *byte = (ping_number as usize + i + channel.page_type() as usize) as u8;
    }

    let ext_start = total - extension_size;
    page[ext_start..ext_start + 4].copy_from_slice(&(extension_size as u32).to_le_bytes());
    page[total - REC_HEADER_SIZE..].copy_from_slice(&end_record());
    page
}

/// Build a metadata record whose header declares `num_bytes`.
pub fn synthetic_record(id: MetadataRecordId, num_bytes: usize) -> Vec<u8> {
    let mut record = vec![0u8; num_bytes.max(REC_HEADER_SIZE)];
    let header = RecordHeader {
        record_id: id.record_id(),
        record_num_bytes: num_bytes as u32,
        header_version: HEADER_VERSION,
        record_version: 1,
    };
    record[..REC_HEADER_SIZE].copy_from_slice(&header.encode());
    for (i, byte) in record[REC_HEADER_SIZE..].iter_mut().enumerate() {
        *byte = (i as u8) ^ (id.record_id() as u8);
    }
    record
}

/// When a scripted fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTrigger {
    /// On the next call of the operation.
    Once,
    /// After this many further successful calls of the operation.
    AfterSuccesses(u32),
}

#[derive(Debug, Clone)]
struct ScriptedFault {
    operation: &'static str,
    code: DeviceErrorCode,
    remaining_ok: u32,
}

#[derive(Debug, Clone)]
struct FreeRun {
    started: Instant,
    interval: Duration,
    generated: u32,
    data_len: usize,
    bathy_capable: bool,
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    last_mode: Option<TransportMode>,
    retained: usize,
    pages: HashMap<ChannelType, VecDeque<(u32, Vec<u8>)>>,
    announced: Option<Vec<u8>>,
    framing_mode: u32,
    ping_interval: Option<Duration>,
    settings: RecordSettings,
    last_status: Option<RecordStatus>,
    records: HashMap<MetadataRecordId, (u32, Vec<u8>)>,
    faults: Vec<ScriptedFault>,
    connect_refusals: u32,
    calls: HashMap<&'static str, u32>,
    free_run: Option<FreeRun>,
    rng: ChaCha8Rng,
}

impl SimState {
    fn new(seed: u64) -> Self {
        let mut records = HashMap::new();
        records.insert(
            MetadataRecordId::Calibration,
            (128, synthetic_record(MetadataRecordId::Calibration, 96)),
        );
        records.insert(
            MetadataRecordId::Engineering,
            (64, synthetic_record(MetadataRecordId::Engineering, 48)),
        );
        records.insert(
            MetadataRecordId::Processing,
            (64, synthetic_record(MetadataRecordId::Processing, 64)),
        );
        Self {
            connected: false,
            last_mode: None,
            retained: DEFAULT_RETAINED_PAGES,
            pages: HashMap::new(),
            announced: None,
            framing_mode: FRAMING_LF | FRAMING_RAW_BATHY,
            ping_interval: Some(Duration::from_millis(100)),
            settings: RecordSettings::default(),
            last_status: None,
            records,
            faults: Vec::new(),
            connect_refusals: 0,
            calls: HashMap::new(),
            free_run: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn enter(&mut self, operation: &'static str) -> DeviceResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if let Some(pos) = self.faults.iter().position(|f| f.operation == operation) {
            let fault = &mut self.faults[pos];
            if fault.remaining_ok == 0 {
                let code = fault.code;
                self.faults.remove(pos);
                return Err(DeviceError::new(operation, code));
            }
            fault.remaining_ok -= 1;
        }
        Ok(())
    }

    fn require_session(&self, operation: &'static str) -> DeviceResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::new(operation, DeviceErrorCode::NoConnection))
        }
    }

    fn retain(&mut self, channel: ChannelType, ping_number: u32, page: Vec<u8>) {
        let retained = self.retained;
        let window = self.pages.entry(channel).or_default();
        let at = window.partition_point(|(p, _)| *p <= ping_number);
        window.insert(at, (ping_number, page));
        while window.len() > retained {
            window.pop_front();
        }
    }

    fn generate_due_pings(&mut self) {
        let Some(run) = self.free_run.as_mut() else {
            return;
        };
        let interval_ms = run.interval.as_millis().max(1);
        let due = (run.started.elapsed().as_millis() / interval_ms + 1) as u32;
        let (from, data_len, bathy) = (run.generated, run.data_len, run.bathy_capable);
        if due <= from {
            return;
        }
        run.generated = due;

        let mask = ChannelMask::from_framing(self.framing_mode, bathy);
        let now = chrono::Local::now().naive_local();
        for ping in from + 1..=due {
            for channel in WRITE_ORDER {
                if !mask.contains(channel) {
                    continue;
                }
                let mut page = synthetic_page_at(
                    channel,
                    ping,
                    data_len,
                    bathy,
                    PageTimestamp::from_datetime(now),
                );
                let noise: u32 = self.rng.gen();
                let n = data_len.min(4);
                page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + n]
                    .copy_from_slice(&noise.to_le_bytes()[..n]);
                self.retain(channel, ping, page);
            }
        }
        debug!(from = from + 1, to = due, "simulator generated pings");
    }
}

/// Cloneable handle over a simulated acquisition unit.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedDevice")
            .field("connected", &state.connected)
            .field("framing_mode", &state.framing_mode)
            .field("free_running", &state.free_run.is_some())
            .finish()
    }
}

impl SimulatedDevice {
    /// Empty device: no pages, default metadata records, LF + raw bathy framing.
    pub fn new() -> Self {
        Self::with_seed(0x5EED)
    }

    /// Empty device whose synthesised channel data uses `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(seed))),
        }
    }

    /// Device that synthesises one ping every `interval`, starting now.
    pub fn free_running(interval: Duration, data_len: usize, bathy_capable: bool) -> Self {
        let device = Self::new();
        {
            let mut state = device.state.lock();
            state.ping_interval = Some(interval);
            state.free_run = Some(FreeRun {
                started: Instant::now(),
                interval,
                generated: 0,
                data_len,
                bathy_capable,
            });
        }
        device
    }

    /// Make a page available on `channel`.
    pub fn push_page(&self, channel: ChannelType, page: Vec<u8>) {
        let ping = PageHeader::decode(&page).map(|h| h.ping_number).unwrap_or(0);
        self.state.lock().retain(channel, ping, page);
    }

    /// Drop every retained page of every channel.
    pub fn clear_pages(&self) {
        self.state.lock().pages.clear();
    }

    pub fn set_retained_pages(&self, retained: usize) {
        self.state.lock().retained = retained.max(1);
    }

    pub fn set_framing_mode(&self, framing_mode: u32) {
        self.state.lock().framing_mode = framing_mode;
    }

    /// `None` makes `ping_interval` fail with `UnsupportedCommand`.
    pub fn set_ping_interval(&self, interval: Option<Duration>) {
        self.state.lock().ping_interval = interval;
    }

    pub fn set_settings(&self, settings: RecordSettings) {
        self.state.lock().settings = settings;
    }

    pub fn settings(&self) -> RecordSettings {
        self.state.lock().settings.clone()
    }

    /// Last status reported by the recorder.
    pub fn last_status(&self) -> Option<RecordStatus> {
        self.state.lock().last_status.clone()
    }

    /// Serve `record` for `id`, padded to `block_size`.
    pub fn set_metadata_record(&self, id: MetadataRecordId, block_size: u32, record: Vec<u8>) {
        self.state.lock().records.insert(id, (block_size, record));
    }

    /// Script a device fault for `operation`.
    pub fn inject_fault(
        &self,
        operation: &'static str,
        trigger: FaultTrigger,
        code: DeviceErrorCode,
    ) {
        let remaining_ok = match trigger {
            FaultTrigger::Once => 0,
            FaultTrigger::AfterSuccesses(n) => n,
        };
        self.state.lock().faults.push(ScriptedFault {
            operation,
            code,
            remaining_ok,
        });
    }

    /// Refuse the next `attempts` connection attempts with `NoConnection`.
    pub fn refuse_connections(&self, attempts: u32) {
        self.state.lock().connect_refusals = attempts;
    }

    /// Number of calls made to `operation` so far.
    pub fn calls(&self, operation: &str) -> u32 {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn last_transport_mode(&self) -> Option<TransportMode> {
        self.state.lock().last_mode
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    async fn connect(
        &mut self,
        address: &str,
        mode: TransportMode,
        _timeout: Duration,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.enter("connect")?;
        state.last_mode = Some(mode);
        if state.connect_refusals > 0 {
            state.connect_refusals -= 1;
            return Err(DeviceError::new("connect", DeviceErrorCode::NoConnection));
        }
        if state.connected {
            return Err(DeviceError::new("connect", DeviceErrorCode::AlreadyConnected));
        }
        debug!(address, ?mode, "simulator session opened");
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock();
        *state.calls.entry("disconnect").or_insert(0) += 1;
        state.connected = false;
        state.announced = None;
    }

    async fn page_info(
        &mut self,
        channel: ChannelType,
        ping_number: u32,
    ) -> DeviceResult<PageInfo> {
        let mut state = self.state.lock();
        state.enter("page_info")?;
        state.require_session("page_info")?;
        state.generate_due_pings();

        let Some(window) = state.pages.get(&channel).filter(|w| !w.is_empty()) else {
            return Ok(PageInfo::no_data());
        };
        let first = window.front().map(|(p, _)| *p).unwrap_or(0);
        let found = if ping_number == 0 {
            window.back().map(|(_, page)| page.clone())
        } else if ping_number < first {
            return Ok(PageInfo {
                status: PageStatus::Old,
                byte_count: 0,
            });
        } else {
            window
                .iter()
                .find(|(p, _)| *p >= ping_number)
                .map(|(_, page)| page.clone())
        };

        match found {
            Some(page) => {
                let byte_count = page.len() as u32;
                state.announced = Some(page);
                Ok(PageInfo {
                    status: PageStatus::Ready,
                    byte_count,
                })
            }
            None => Ok(PageInfo::no_data()),
        }
    }

    async fn fetch_page(&mut self, buf: &mut [u8]) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.enter("fetch_page")?;
        state.require_session("fetch_page")?;
        let page = state
            .announced
            .take()
            .ok_or_else(|| DeviceError::new("fetch_page", DeviceErrorCode::DeviceReportedFailure))?;
        let n = page.len().min(buf.len());
        buf[..n].copy_from_slice(&page[..n]);
        Ok(())
    }

    async fn framing_mode(&mut self) -> DeviceResult<u32> {
        let mut state = self.state.lock();
        state.enter("framing_mode")?;
        state.require_session("framing_mode")?;
        Ok(state.framing_mode)
    }

    async fn ping_interval(&mut self) -> DeviceResult<Duration> {
        let mut state = self.state.lock();
        state.enter("ping_interval")?;
        state.require_session("ping_interval")?;
        state
            .ping_interval
            .ok_or_else(|| DeviceError::new("ping_interval", DeviceErrorCode::UnsupportedCommand))
    }

    async fn record_info(&mut self, status: &RecordStatus) -> DeviceResult<RecordSettings> {
        let mut state = self.state.lock();
        state.enter("record_info")?;
        state.require_session("record_info")?;
        state.last_status = Some(status.clone());
        Ok(state.settings.clone())
    }

    async fn set_record_info(&mut self, settings: &RecordSettings) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.enter("set_record_info")?;
        state.require_session("set_record_info")?;
        state.settings = settings.clone();
        Ok(())
    }

    async fn metadata_record_size(&mut self, id: MetadataRecordId) -> DeviceResult<u32> {
        let mut state = self.state.lock();
        state.enter("metadata_record_size")?;
        state.require_session("metadata_record_size")?;
        state
            .records
            .get(&id)
            .map(|(block, _)| *block)
            .ok_or_else(|| {
                DeviceError::new("metadata_record_size", DeviceErrorCode::UnknownRecordType)
            })
    }

    async fn metadata_record(&mut self, id: MetadataRecordId, buf: &mut [u8]) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.enter("metadata_record")?;
        state.require_session("metadata_record")?;
        let (_, record) = state
            .records
            .get(&id)
            .ok_or_else(|| DeviceError::new("metadata_record", DeviceErrorCode::UnknownRecordType))?;
        if buf.len() < record.len() {
            return Err(DeviceError::new(
                "metadata_record",
                DeviceErrorCode::BufferTooSmall,
            ));
        }
        buf.fill(0);
        buf[..record.len()].copy_from_slice(record);
        Ok(())
    }
}

/// Calendar date used when a test needs a page stamped on a given second.
pub fn timestamp_at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> PageTimestamp {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(PageTimestamp::from_datetime)
        .unwrap_or_default()
}
