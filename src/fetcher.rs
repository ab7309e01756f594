//! Per-channel page polling.
//!
//! One [`PageFetcher`] exists per channel. Each call to
//! [`PageFetcher::fetch_page`] asks the unit for the ping after the last one
//! seen on that channel and, if it is ready, pulls it into a buffer that only
//! ever grows.

use crate::device::{ChannelType, Device, PageStatus};
use crate::error::{RecorderError, RecorderResult};
use crate::page::{PageHeader, PAGE_HEADER_SIZE};
use tracing::{debug, warn};

/// Polls one channel of the acquisition unit.
#[derive(Debug)]
pub struct PageFetcher {
    channel: ChannelType,
    /// Ping number of the last page fetched; `None` requests the latest.
    last_ping: Option<u32>,
    buf: Vec<u8>,
    header: Option<PageHeader>,
}

impl PageFetcher {
    pub fn new(channel: ChannelType) -> Self {
        Self {
            channel,
            last_ping: None,
            buf: Vec::new(),
            header: None,
        }
    }

    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    pub fn last_ping(&self) -> Option<u32> {
        self.last_ping
    }

    /// Current capacity of the fetch buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.len()
    }

    /// Forget the cursor; the next fetch requests the latest ping.
    pub fn reset(&mut self) {
        self.last_ping = None;
        self.header = None;
    }

    /// Ping number the next fetch asks for (0 = latest).
    fn next_request(&self) -> u32 {
        self.last_ping.map_or(0, |n| n.wrapping_add(1))
    }

    /// Try to fetch the next page of this channel.
    ///
    /// Returns `Ok(false)` when nothing was fetched: no page is available,
    /// the unit dropped the requested ping (the cursor is reset to "latest"),
    /// or the page carried an unknown extension record type.
    ///
    /// # Errors
    /// - `Device` for any other driver fault; the session must be re-established
    /// - `MalformedPage` when the page is shorter than its header or than the
    ///   length its header declares
    pub async fn fetch_page<D: Device + ?Sized>(&mut self, device: &mut D) -> RecorderResult<bool> {
        let request = self.next_request();
        let info = match device.page_info(self.channel, request).await {
            Ok(info) => info,
            Err(e) if e.is_skippable() => {
                warn!(channel = %self.channel, ping = request, error = %e, "Skipping page");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        match info.status {
            PageStatus::NoData => return Ok(false),
            PageStatus::Old => {
                debug!(channel = %self.channel, ping = request, "Requested ping is gone, jumping to latest");
                self.last_ping = None;
                return Ok(false);
            }
            PageStatus::Ready => {}
        }

        let count = info.byte_count as usize;
        if count == 0 {
            return Ok(false);
        }
        if count > self.buf.len() {
            self.buf.resize(count, 0);
        }
        self.header = None;

        if let Err(e) = device.fetch_page(&mut self.buf[..count]).await {
            if e.is_skippable() {
                warn!(channel = %self.channel, ping = request, error = %e, "Skipping page");
                return Ok(false);
            }
            return Err(e.into());
        }

        if count < PAGE_HEADER_SIZE {
            return Err(RecorderError::MalformedPage(format!(
                "{} page of {} bytes is shorter than its header",
                self.channel, count
            )));
        }
        let header = PageHeader::decode(&self.buf[..count])?;
        if header.number_bytes as usize > count {
            return Err(RecorderError::MalformedPage(format!(
                "{} ping {} declares {} bytes but {} were fetched",
                self.channel, header.ping_number, header.number_bytes, count
            )));
        }

        debug!(
            channel = %self.channel,
            ping = header.ping_number,
            number_bytes = header.number_bytes,
            "Fetched page"
        );
        self.last_ping = Some(header.ping_number);
        self.header = Some(header);
        Ok(true)
    }

    /// The last fetched page, cut to its declared length.
    ///
    /// `None` unless the last fetch produced a page with a ping number above 0.
    pub fn page(&self) -> Option<&[u8]> {
        let header = self.header.as_ref()?;
        if header.ping_number == 0 {
            return None;
        }
        Some(&self.buf[..header.number_bytes as usize])
    }

    pub fn header(&self) -> Option<&PageHeader> {
        self.header.as_ref()
    }
}
