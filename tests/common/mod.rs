//! Shared helpers for the recorder integration tests.
#![allow(dead_code)]

use sonar_recorder::config::{DeviceConfig, WriterConfig};
use sonar_recorder::device::sim::SimulatedDevice;
use sonar_recorder::device::{ChannelType, RecordSettings};
use sonar_recorder::page::PageHeader;
use sonar_recorder::shutdown::{self, ShutdownTrigger};
use sonar_recorder::writer::disk::FixedDiskProbe;
use sonar_recorder::writer::PAGE_MARKER;
use sonar_recorder::{PageWriter, Recorder, RecorderResult};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

pub type RunHandle = JoinHandle<(RecorderResult<()>, Recorder<SimulatedDevice>)>;

/// Recording enabled into `dir` with the given rotation size.
pub fn recording_settings(dir: &Path, pings_per_file: u32) -> RecordSettings {
    RecordSettings {
        record_mode: true,
        pings_per_file,
        file_prefix: "run_".into(),
        file_path: dir.to_string_lossy().into_owned(),
        ..Default::default()
    }
}

/// Start a recorder over `device` on its own task.
pub fn start(device: &SimulatedDevice, probe: &FixedDiskProbe) -> (ShutdownTrigger, RunHandle) {
    start_with(device, probe, WriterConfig::default())
}

pub fn start_with(
    device: &SimulatedDevice,
    probe: &FixedDiskProbe,
    writer_config: WriterConfig,
) -> (ShutdownTrigger, RunHandle) {
    let (trigger, token) = shutdown::channel();
    let writer = PageWriter::with_probe(writer_config, probe.clone());
    let mut recorder = Recorder::new(device.clone(), DeviceConfig::default(), writer, token);
    let handle = tokio::spawn(async move {
        let result = recorder.run().await;
        (result, recorder)
    });
    (trigger, handle)
}

/// Request shutdown and wait for the recorder to return.
pub async fn stop(
    trigger: ShutdownTrigger,
    handle: RunHandle,
) -> (RecorderResult<()>, Recorder<SimulatedDevice>) {
    trigger.trigger();
    handle.await.unwrap()
}

/// Recording files in `dir`, sorted by name.
pub fn recording_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sdf"))
        .collect();
    files.sort();
    files
}

/// Parse a recording file into its page headers, checking every marker.
pub fn read_entries(path: &Path) -> Vec<PageHeader> {
    let bytes = std::fs::read(path).unwrap();
    let mut entries = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        assert_eq!(bytes[at..at + 4], PAGE_MARKER, "missing marker at offset {at}");
        let header = PageHeader::decode(&bytes[at + 4..]).unwrap();
        at += 4 + header.number_bytes as usize;
        entries.push(header);
    }
    assert_eq!(at, bytes.len(), "trailing bytes in {}", path.display());
    entries
}

/// `(ping, channel)` for every entry of a recording file.
pub fn ping_channels(path: &Path) -> Vec<(u32, ChannelType)> {
    read_entries(path)
        .iter()
        .map(|h| (h.ping_number, h.channel().unwrap()))
        .collect()
}

/// Ping numbers of a recording file, one per entry.
pub fn pings(path: &Path) -> Vec<u32> {
    read_entries(path).iter().map(|h| h.ping_number).collect()
}
