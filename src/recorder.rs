//! The recorder loop.
//!
//! [`Recorder`] owns one device session, one [`PageFetcher`] per channel and
//! the [`PageWriter`]. Each iteration:
//!
//! 1. resyncs the recording settings and reports status
//! 2. if recording, drains every channel (LF, raw bathy, processed bathy, HF)
//!    and hands each page to the writer
//! 3. flushes the write cache
//! 4. naps for whatever is left of one ping interval
//!
//! Device faults tear the session down and bring it back up with every fetcher
//! cursor reset. Local filesystem faults end the session.

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::{Disposition, RecorderError, RecorderResult};
use crate::fetcher::PageFetcher;
use crate::page::WRITE_ORDER;
use crate::shutdown::Shutdown;
use crate::writer::PageWriter;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Drives one acquisition unit into recording files until shut down.
pub struct Recorder<D: Device> {
    device: D,
    config: DeviceConfig,
    fetchers: Vec<PageFetcher>,
    writer: PageWriter,
    shutdown: Shutdown,
    reconnects: u32,
}

impl<D: Device> Recorder<D> {
    pub fn new(device: D, config: DeviceConfig, writer: PageWriter, shutdown: Shutdown) -> Self {
        Self {
            device,
            config,
            fetchers: WRITE_ORDER.into_iter().map(PageFetcher::new).collect(),
            writer,
            shutdown,
            reconnects: 0,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn writer(&self) -> &PageWriter {
        &self.writer
    }

    pub fn fetchers(&self) -> &[PageFetcher] {
        &self.fetchers
    }

    /// Sessions re-established after a device fault.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Record until shutdown is requested or a fatal error occurs.
    ///
    /// On both paths the recording file is closed and the session
    /// disconnected before returning. Pings still waiting in the reassembly
    /// queue are not written.
    pub async fn run(&mut self) -> RecorderResult<()> {
        info!(
            address = %self.config.address,
            transport = ?self.config.transport,
            "Starting recorder"
        );

        if !self.connect().await {
            info!("Shutdown requested before the unit answered");
            self.finish().await;
            return Ok(());
        }

        while !self.shutdown.is_cancelled() {
            let started = Instant::now();

            if let Err(e) = self.iteration().await {
                match e.disposition() {
                    Disposition::Reconnect => {
                        error!(error = %e, "Device session lost, reconnecting");
                        if !self.reconnect().await {
                            break;
                        }
                        continue;
                    }
                    Disposition::DropPage => {
                        debug!(error = %e, "Iteration cut short");
                    }
                    Disposition::Fatal => {
                        error!(error = %e, "Recording stopped");
                        self.finish().await;
                        return Err(e);
                    }
                }
            }

            let nap = match self.device.ping_interval().await {
                Ok(interval) => interval.saturating_sub(started.elapsed()),
                Err(e) => {
                    debug!(error = %e, "Ping interval unavailable");
                    self.config.fallback_nap()
                }
            };
            if !self.shutdown.sleep(nap).await {
                break;
            }
        }

        info!("Shutdown requested, stopping recorder");
        self.finish().await;
        Ok(())
    }

    async fn iteration(&mut self) -> RecorderResult<()> {
        self.writer.update(&mut self.device).await?;
        if !self.writer.is_recording() {
            return Ok(());
        }

        for fetcher in self.fetchers.iter_mut() {
            while fetcher.fetch_page(&mut self.device).await? {
                let Some(page) = fetcher.page() else {
                    continue;
                };
                match self.writer.write_page(&mut self.device, page).await {
                    Ok(()) => {}
                    Err(e @ RecorderError::DiskFull { .. }) => {
                        debug!(channel = %fetcher.channel(), error = %e, "Dropping page");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.writer.flush().await
    }

    /// Connect, retrying until the unit answers. Returns `false` if shutdown
    /// was requested first.
    async fn connect(&mut self) -> bool {
        let mut failures = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                return false;
            }
            let result = self
                .device
                .connect(
                    &self.config.address,
                    self.config.transport,
                    self.config.connect_timeout(),
                )
                .await;
            match result {
                Ok(()) => break,
                Err(e) if e.is_connected_ok() => {
                    debug!(error = %e, "Session already open");
                    break;
                }
                Err(e) => {
                    self.device.disconnect().await;
                    failures += 1;
                    if failures == 1 {
                        warn!(address = %self.config.address, error = %e, "Alarm raised: acquisition unit unreachable");
                    } else {
                        debug!(attempt = failures, error = %e, "Connect attempt failed");
                    }
                    if !self.shutdown.sleep(self.config.reconnect_backoff()).await {
                        return false;
                    }
                }
            }
        }

        if failures > 0 {
            info!(attempts = failures + 1, "Alarm lowered: acquisition unit connected");
        } else {
            info!(address = %self.config.address, "Connected to acquisition unit");
        }
        self.shutdown.sleep(self.config.connect_settle()).await
    }

    async fn reconnect(&mut self) -> bool {
        self.device.disconnect().await;
        for fetcher in self.fetchers.iter_mut() {
            fetcher.reset();
        }
        self.reconnects += 1;
        self.connect().await
    }

    async fn finish(&mut self) {
        if let Err(e) = self.writer.close().await {
            error!(error = %e, "Failed to close recording file");
        }
        self.device.disconnect().await;
    }
}
