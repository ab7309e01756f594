//! End-to-end recording through the recorder loop and the device simulator.

mod common;

use common::*;
use sonar_recorder::config::WriterConfig;
use sonar_recorder::device::sim::{synthetic_page, synthetic_page_at, timestamp_at, SimulatedDevice};
use sonar_recorder::device::ChannelType;
use sonar_recorder::page::{FRAMING_LF, FRAMING_RAW_BATHY};
use sonar_recorder::sdfx::{
    parse_extension, RECORD_ID_BATHY_CAL, RECORD_ID_BATHY_ENG_SETTINGS,
    RECORD_ID_BATHY_PROC_SETTINGS, RECORD_ID_END,
};
use sonar_recorder::writer::disk::FixedDiskProbe;
use std::time::Duration;

const LF: ChannelType = ChannelType::LowFrequency;
const RAW: ChannelType = ChannelType::RawBathy;
const PROC: ChannelType = ChannelType::ProcessedBathy;

fn push_ping(device: &SimulatedDevice, ping: u32, channels: &[ChannelType]) {
    for &channel in channels {
        device.push_page(channel, synthetic_page(channel, ping, 24, true));
    }
}

#[tokio::test(start_paused = true)]
async fn pings_are_written_in_fixed_variant_order() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::new();
    device.set_framing_mode(FRAMING_LF | FRAMING_RAW_BATHY);
    device.set_settings(recording_settings(dir.path(), 0));
    push_ping(&device, 1, &[PROC, LF, RAW]);

    let probe = FixedDiskProbe::new(20);
    let (trigger, handle) = start(&device, &probe);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // arrival order inside a ping does not matter
    push_ping(&device, 2, &[RAW, PROC, LF]);
    push_ping(&device, 3, &[LF, PROC, RAW]);
    push_ping(&device, 4, &[PROC, RAW, LF]);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let (result, _) = stop(trigger, handle).await;
    result.unwrap();

    let files = recording_files(dir.path());
    assert_eq!(files.len(), 1);
    let expected: Vec<(u32, ChannelType)> = (1..=4)
        .flat_map(|ping| [(ping, LF), (ping, RAW), (ping, PROC)])
        .collect();
    assert_eq!(ping_channels(&files[0]), expected);
}

#[tokio::test(start_paused = true)]
async fn first_bathy_pages_of_a_file_carry_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::new();
    device.set_framing_mode(FRAMING_LF | FRAMING_RAW_BATHY);
    device.set_settings(recording_settings(dir.path(), 0));
    push_ping(&device, 1, &[LF, RAW, PROC]);

    let probe = FixedDiskProbe::new(20);
    let (trigger, handle) = start(&device, &probe);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    push_ping(&device, 2, &[LF, RAW, PROC]);
    tokio::time::sleep(Duration::from_millis(500)).await;
    stop(trigger, handle).await.0.unwrap();

    let files = recording_files(dir.path());
    let bytes = std::fs::read(&files[0]).unwrap();
    let entries = read_entries(&files[0]);
    let plain = synthetic_page(RAW, 1, 24, true).len() as u32;

    let mut offset = 0;
    for (i, header) in entries.iter().enumerate() {
        let page = &bytes[offset + 4..offset + 4 + header.number_bytes as usize];
        let ids: Vec<u32> = parse_extension(page)
            .unwrap()
            .iter()
            .map(|r| r.header.record_id)
            .collect();
        let first_ping_bathy = header.ping_number == 1 && header.channel() != Some(LF);
        if first_ping_bathy {
            assert_eq!(
                ids,
                vec![
                    RECORD_ID_BATHY_CAL,
                    RECORD_ID_BATHY_ENG_SETTINGS,
                    RECORD_ID_BATHY_PROC_SETTINGS,
                    RECORD_ID_END
                ],
                "entry {i}"
            );
            assert!(header.number_bytes > plain);
        } else {
            assert_eq!(ids, vec![RECORD_ID_END], "entry {i}");
            assert_eq!(header.number_bytes, plain);
        }
        offset += 4 + header.number_bytes as usize;
    }
    // one read of the three records serves both bathy pages of ping 1
    assert_eq!(device.calls("metadata_record"), 3);
}

#[tokio::test(start_paused = true)]
async fn files_rotate_after_pings_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::new();
    device.set_framing_mode(FRAMING_LF);
    device.set_settings(recording_settings(dir.path(), 2));
    let lf_at = |ping: u32| synthetic_page_at(LF, ping, 16, false, timestamp_at(2024, 7, 1, 8, 30, ping));
    device.push_page(LF, lf_at(1));

    let probe = FixedDiskProbe::new(20);
    let (trigger, handle) = start(&device, &probe);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    for ping in 2..=5 {
        device.push_page(LF, lf_at(ping));
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    stop(trigger, handle).await.0.unwrap();

    let files = recording_files(dir.path());
    let names: Vec<String> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "run_20240701083001.sdf",
            "run_20240701083003.sdf",
            "run_20240701083005.sdf"
        ]
    );
    assert_eq!(pings(&files[0]), vec![1, 2]);
    assert_eq!(pings(&files[1]), vec![3, 4]);
    assert_eq!(pings(&files[2]), vec![5]);
}

#[tokio::test(start_paused = true)]
async fn disk_full_pauses_and_resumes_recording() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::new();
    device.set_framing_mode(FRAMING_LF);
    device.set_settings(recording_settings(dir.path(), 0));
    push_ping(&device, 1, &[LF]);

    let probe = FixedDiskProbe::new(40);
    let (trigger, handle) = start(&device, &probe);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    probe.set(97);
    tokio::time::sleep(Duration::from_millis(300)).await;
    push_ping(&device, 2, &[LF]);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = device.last_status().unwrap();
    assert!(status.hard_disk_full);
    assert_eq!(status.hard_disk_percent, 97);

    probe.set(60);
    tokio::time::sleep(Duration::from_millis(300)).await;
    push_ping(&device, 3, &[LF]);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (result, recorder) = stop(trigger, handle).await;
    result.unwrap();
    assert_eq!(recorder.reconnects(), 0);
    assert!(!recorder.writer().status().hard_disk_full);

    let files = recording_files(dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(pings(&files[0]), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn full_queue_forces_out_incomplete_pings_once() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::new();
    device.set_retained_pages(100);
    // raw bathy is framed but never arrives
    device.set_framing_mode(FRAMING_LF | FRAMING_RAW_BATHY);
    device.set_settings(recording_settings(dir.path(), 0));
    device.push_page(LF, synthetic_page(LF, 1, 8, false));

    let probe = FixedDiskProbe::new(20);
    let (trigger, handle) = start(&device, &probe);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    for ping in 2..=60 {
        device.push_page(LF, synthetic_page(LF, ping, 8, false));
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let (result, recorder) = stop(trigger, handle).await;
    result.unwrap();
    assert_eq!(recorder.writer().policy().queue().len(), 50);

    let files = recording_files(dir.path());
    assert_eq!(pings(&files[0]), (1..=10).collect::<Vec<u32>>());
}

#[tokio::test(start_paused = true)]
async fn recording_off_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::new();
    let mut settings = recording_settings(dir.path(), 0);
    settings.record_mode = false;
    device.set_settings(settings);
    push_ping(&device, 1, &[LF, RAW]);

    let probe = FixedDiskProbe::new(20);
    let (trigger, handle) = start(&device, &probe);
    tokio::time::sleep(Duration::from_secs(2)).await;
    stop(trigger, handle).await.0.unwrap();

    assert!(recording_files(dir.path()).is_empty());
    assert_eq!(device.calls("page_info"), 0);
    assert!(!device.is_connected());
}

#[tokio::test(start_paused = true)]
async fn free_running_device_records_continuously() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::free_running(Duration::from_millis(100), 64, true);
    device.set_settings(recording_settings(dir.path(), 0));

    let probe = FixedDiskProbe::new(20);
    let (trigger, handle) = start_with(
        &device,
        &probe,
        WriterConfig {
            checkpoint_interval_pings: 5,
            ..Default::default()
        },
    );
    tokio::time::sleep(Duration::from_secs(4)).await;
    let (result, recorder) = stop(trigger, handle).await;
    result.unwrap();
    assert!(!recorder.writer().is_file_open());

    let mut written = Vec::new();
    for file in recording_files(dir.path()) {
        written.extend(ping_channels(&file));
    }
    assert!(written.len() >= 3 * 10, "only {} entries", written.len());

    // every ping complete, pings ascending, variants in fixed order
    for chunk in written.chunks(3) {
        let ping = chunk[0].0;
        assert_eq!(chunk, [(ping, LF), (ping, RAW), (ping, PROC)]);
    }
    let numbers: Vec<u32> = written.chunks(3).map(|c| c[0].0).collect();
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));
}
