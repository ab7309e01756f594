//! Recording file writer.
//!
//! [`PageWriter`] owns everything between a fetched page and the bytes on
//! disk:
//!
//! - the recording settings mirrored from the unit, resynced every iteration
//! - the recording file lifecycle (open, append-reopen, rotation, checkpoint)
//! - disk-pressure monitoring
//! - ping reassembly through [`policy::Policy`]
//! - the bathymetry metadata splice on the first bathy pages of a file
//! - the write cache
//!
//! # File format
//!
//! A recording file is an append-only sequence of entries, each a 4-byte
//! all-ones marker followed by one page. Within a ping the pages are written
//! LF, raw bathy, processed bathy, HF; pings are written in ascending order.
//! The file name is `<prefix><YYYYMMDDHHMMSS>.<extension>`, taken from the
//! creation time of the first page written to it.

pub mod cache;
pub mod disk;
pub mod policy;

use crate::config::WriterConfig;
use crate::device::{ChannelType, Device, PathAction, RecordSettings, RecordStatus};
use crate::error::{RecorderError, RecorderResult};
use crate::page::{ChannelMask, PageHeader};
use crate::sdfx::{self, SpliceOutcome};
use cache::WriteCache;
use disk::{DiskProbe, SystemDiskProbe};
use policy::{Policy, ReleasedPing};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::{debug, info, warn};

/// Marker preceding every page in a recording file.
pub const PAGE_MARKER: [u8; 4] = [0xFF; 4];

/// Writes reassembled pings to rotating recording files.
pub struct PageWriter {
    config: WriterConfig,
    probe: Box<dyn DiskProbe>,
    policy: Policy,
    cache: WriteCache,
    /// Settings as last reported by the unit.
    settings: RecordSettings,
    synced: bool,
    status: RecordStatus,
    /// Directory action still to perform before the next write.
    pending_path_action: PathAction,
    framing_mode: u32,
    last_framing: Option<u32>,
    file: Option<File>,
    /// Path of the current recording file; `None` makes the next write
    /// start a new file.
    file_path: Option<PathBuf>,
    /// Pings written to the current file.
    num_pings: u32,
    last_checkpoint: u32,
    splice_raw: bool,
    splice_proc: bool,
}

impl std::fmt::Debug for PageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriter")
            .field("settings", &self.settings)
            .field("status", &self.status)
            .field("file_path", &self.file_path)
            .field("num_pings", &self.num_pings)
            .field("queued_pings", &self.policy.queue().len())
            .field("cached_bytes", &self.cache.len())
            .finish()
    }
}

impl PageWriter {
    /// Writer measuring disk usage through the operating system.
    pub fn new(config: WriterConfig) -> Self {
        Self::with_probe(config, SystemDiskProbe::new())
    }

    /// Writer measuring disk usage through `probe`.
    pub fn with_probe<P: DiskProbe + 'static>(config: WriterConfig, probe: P) -> Self {
        Self {
            policy: Policy::new(config.queue_capacity),
            cache: WriteCache::new(config.cache_bytes),
            probe: Box::new(probe),
            config,
            settings: RecordSettings::default(),
            synced: false,
            status: RecordStatus::default(),
            pending_path_action: PathAction::None,
            framing_mode: 0,
            last_framing: None,
            file: None,
            file_path: None,
            num_pings: 0,
            last_checkpoint: 0,
            splice_raw: false,
            splice_proc: false,
        }
    }

    pub fn settings(&self) -> &RecordSettings {
        &self.settings
    }

    pub fn status(&self) -> &RecordStatus {
        &self.status
    }

    /// Whether the unit asks for pages to be recorded.
    pub fn is_recording(&self) -> bool {
        self.settings.record_mode
    }

    /// Path of the current (or last) recording file, if a file is held.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn is_file_open(&self) -> bool {
        self.file.is_some()
    }

    /// Pings written to the current file.
    pub fn num_pings(&self) -> u32 {
        self.num_pings
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn cached_bytes(&self) -> usize {
        self.cache.len()
    }

    /// Report status to the unit, resync settings and apply what changed.
    ///
    /// With unchanged settings this only checks disk pressure and the
    /// per-file ping limit. A change can stop recording, force a new file,
    /// or schedule a directory action for the next write.
    pub async fn update<D: Device + ?Sized>(&mut self, device: &mut D) -> RecorderResult<()> {
        let settings = device.record_info(&self.status).await?;
        let framing = device.framing_mode().await?;
        self.framing_mode = framing;
        let framing_changed = self.last_framing.is_some_and(|prev| prev != framing);
        self.last_framing = Some(framing);

        self.refresh_disk_usage();
        if self.status.hard_disk_full && self.file.is_some() {
            warn!(
                percent = self.status.hard_disk_percent,
                threshold = self.config.disk_full_percent,
                "Recording volume full, stopping recording"
            );
            self.close().await?;
        }

        if framing_changed {
            info!(framing_mode = framing, "Framing mode changed, starting a new file");
            self.rotate().await?;
        }

        if self.synced && settings == self.settings {
            if self.rotation_due() {
                self.rotate().await?;
            }
            return Ok(());
        }

        info!(settings = %settings, "Recording settings changed");

        if self.settings.record_mode && !settings.record_mode {
            info!("Recording turned off");
            self.close().await?;
        }
        if settings.new_file {
            self.rotate().await?;
        }

        let action = settings.path_action();
        match action {
            PathAction::None => {}
            PathAction::Set | PathAction::CreateAndSet => self.rotate().await?,
            PathAction::DeleteEmpty => remove_empty_dir(Path::new(&settings.file_path)).await,
        }
        self.pending_path_action = action;
        self.settings = settings;
        self.synced = true;

        if self.rotation_due() {
            self.rotate().await?;
        }
        Ok(())
    }

    /// Hand a fetched page to the writer.
    ///
    /// Opens a recording file if none is open, then buffers the page until its
    /// ping can be written.
    ///
    /// # Errors
    /// - `DiskFull` when a file had to be opened on a full volume; the page
    ///   is dropped
    /// - `CreateDirectory` / `FileOpen` / `Io` for local filesystem faults
    /// - `Device` / `MalformedRecord` if the metadata records cannot be read;
    ///   the released pings stay queued and are written by a later release
    pub async fn write_page<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        page: &[u8],
    ) -> RecorderResult<()> {
        let header = PageHeader::decode(page)?;

        if std::mem::take(&mut self.pending_path_action) == PathAction::CreateAndSet {
            create_dir(Path::new(&self.settings.file_path)).await?;
        }

        let Some(channel) = header.channel() else {
            warn!(
                ping = header.ping_number,
                page_version = header.page_version,
                "Dropping page of unknown variant"
            );
            return Ok(());
        };

        self.ensure_file(&header).await?;

        let mask = ChannelMask::from_framing(self.framing_mode, header.is_bathy_capable());
        let outcome = self
            .policy
            .push(header.ping_number, channel, page.to_vec(), mask);

        if let Some(evicted) = outcome.evicted {
            warn!(ping = evicted, "Ping queue full, forcing oldest ping out");
        }
        if outcome.late {
            warn!(ping = header.ping_number, variant = %channel, "Dropping page of a ping already written");
        }
        if outcome.duplicate {
            debug!(ping = header.ping_number, variant = %channel, "Replaced duplicate page");
        }

        let mut released = outcome.released.into_iter();
        while let Some(mut ping) = released.next() {
            if let Err(e) = self.splice_ping(device, &mut ping).await {
                // nothing of this ping reached the cache; keep it and the
                // rest of the batch queued for the next release
                let unwritten: Vec<ReleasedPing> = std::iter::once(ping).chain(released).collect();
                warn!(
                    ping = unwritten[0].ping_number,
                    queued = unwritten.len(),
                    error = %e,
                    "Metadata splice failed, pings kept queued"
                );
                self.policy.restore(unwritten);
                return Err(e);
            }
            self.append_ping(&ping).await?;
        }
        Ok(())
    }

    /// Write the cache to the file, then checkpoint if due.
    pub async fn flush(&mut self) -> RecorderResult<()> {
        if let Some(file) = self.file.as_mut() {
            self.cache.flush(file).await?;
        }

        let interval = self.config.checkpoint_interval_pings;
        if interval > 0
            && self.num_pings > 0
            && self.num_pings % interval == 0
            && self.num_pings != self.last_checkpoint
            && self.file.is_some()
        {
            self.last_checkpoint = self.num_pings;
            debug!(pings = self.num_pings, "Checkpointing recording file");
            self.close().await?;
            match self.open_existing().await {
                Err(RecorderError::DiskFull { percent, .. }) => {
                    warn!(percent, "Recording volume full, file left closed");
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Flush and sync the current file, then close it. The file name is kept,
    /// so the next write appends to it.
    pub async fn close(&mut self) -> RecorderResult<()> {
        if let Some(mut file) = self.file.take() {
            self.cache.flush(&mut file).await?;
            file.sync_all().await?;
            if let Some(path) = &self.file_path {
                info!(file = %path.display(), pings = self.num_pings, "Closed recording file");
            }
        }
        Ok(())
    }

    /// Close the current file and make the next write start a new one.
    async fn rotate(&mut self) -> RecorderResult<()> {
        self.close().await?;
        self.file_path = None;
        Ok(())
    }

    fn rotation_due(&self) -> bool {
        let limit = self.settings.pings_per_file;
        limit > 0 && self.file_path.is_some() && self.num_pings >= limit
    }

    fn output_dir(&self) -> Option<&Path> {
        let dir = self.settings.file_path.as_str();
        (!dir.is_empty()).then(|| Path::new(dir))
    }

    fn refresh_disk_usage(&mut self) -> u32 {
        let dir = self.output_dir().map(Path::to_path_buf);
        let percent = self.probe.used_percent(dir.as_deref());
        self.status.hard_disk_percent = percent;
        self.status.hard_disk_full = percent >= self.config.disk_full_percent;
        percent
    }

    fn check_disk_space(&mut self) -> RecorderResult<()> {
        let percent = self.refresh_disk_usage();
        if self.status.hard_disk_full {
            return Err(RecorderError::DiskFull {
                percent,
                threshold: self.config.disk_full_percent,
            });
        }
        Ok(())
    }

    async fn ensure_file(&mut self, header: &PageHeader) -> RecorderResult<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if self.file_path.is_some() {
            return self.open_existing().await;
        }
        self.open_new(header).await
    }

    /// Reopen the held file name in append mode.
    async fn open_existing(&mut self) -> RecorderResult<()> {
        let Some(path) = self.file_path.clone() else {
            return Ok(());
        };
        self.check_disk_space()?;
        self.file = Some(open_append(&path).await?);
        debug!(file = %path.display(), "Reopened recording file");
        Ok(())
    }

    /// Open a file named after the creation time of `header`.
    async fn open_new(&mut self, header: &PageHeader) -> RecorderResult<()> {
        self.check_disk_space()?;

        let name = self.file_name_for(header);
        let path = match self.output_dir() {
            Some(dir) => dir.join(&name),
            None => PathBuf::from(&name),
        };
        self.file = Some(open_append(&path).await?);
        info!(file = %path.display(), ping = header.ping_number, "Opened recording file");

        self.status.file_name = name;
        self.file_path = Some(path);
        self.num_pings = 0;
        self.last_checkpoint = 0;
        self.splice_raw = true;
        self.splice_proc = true;
        Ok(())
    }

    fn file_name_for(&self, header: &PageHeader) -> String {
        let stamp = header.timestamp.to_datetime().unwrap_or_else(|| {
            warn!(
                ping = header.ping_number,
                timestamp = ?header.timestamp,
                "Page carries an invalid timestamp, naming file after the local clock"
            );
            chrono::Local::now().naive_local()
        });
        format!(
            "{}{}.{}",
            self.settings.file_prefix,
            stamp.format("%Y%m%d%H%M%S"),
            self.config.file_extension
        )
    }

    /// Splice the metadata records into the first terminated raw and
    /// processed bathy pages of the file.
    ///
    /// The records are read before any page is touched, so a failed read
    /// leaves the ping exactly as released.
    async fn splice_ping<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        ping: &mut ReleasedPing,
    ) -> RecorderResult<()> {
        let mut targets = Vec::new();
        for (i, (channel, page)) in ping.pages.iter().enumerate() {
            let armed = match channel {
                ChannelType::RawBathy => self.splice_raw,
                ChannelType::ProcessedBathy => self.splice_proc,
                _ => continue,
            };
            if !armed {
                continue;
            }
            if sdfx::is_terminated(page)? {
                targets.push(i);
            } else {
                warn!(
                    ping = ping.ping_number,
                    variant = %channel,
                    "Extension region not terminated, writing page without metadata"
                );
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let records = sdfx::load_bathy_records(device).await?;
        for i in targets {
            let (channel, page) = &mut ping.pages[i];
            if let SpliceOutcome::Spliced {
                number_bytes,
                sdf_extension_size,
            } = sdfx::splice_metadata(page, &records)?
            {
                match channel {
                    ChannelType::RawBathy => self.splice_raw = false,
                    _ => self.splice_proc = false,
                }
                info!(
                    ping = ping.ping_number,
                    variant = %channel,
                    number_bytes,
                    sdf_extension_size,
                    "Spliced bathymetry metadata"
                );
            }
        }
        Ok(())
    }

    async fn append_ping(&mut self, ping: &ReleasedPing) -> RecorderResult<()> {
        if !ping.complete {
            debug!(ping = ping.ping_number, "Writing incomplete ping");
        }

        let file = self.file.as_mut().ok_or_else(|| {
            RecorderError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no recording file open",
            ))
        })?;
        for (_, page) in &ping.pages {
            self.cache.write(file, &PAGE_MARKER).await?;
            self.cache.write(file, page).await?;
        }
        self.num_pings += 1;
        Ok(())
    }
}

async fn open_append(path: &Path) -> RecorderResult<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o666);
    options
        .open(path)
        .await
        .map_err(|source| RecorderError::FileOpen {
            path: path.to_path_buf(),
            source,
        })
}

async fn create_dir(dir: &Path) -> RecorderResult<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(0o777);
    match builder.create(dir).await {
        Ok(()) => {
            info!(dir = %dir.display(), "Created recording directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!(dir = %dir.display(), "Recording directory already exists");
            Ok(())
        }
        Err(source) => Err(RecorderError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

async fn remove_empty_dir(dir: &Path) {
    match tokio::fs::remove_dir(dir).await {
        Ok(()) => info!(dir = %dir.display(), "Removed empty directory"),
        Err(e) => debug!(dir = %dir.display(), error = %e, "Directory not removed"),
    }
}
