//! Sonar page header model.
//!
//! A page is one channel's data for a ping. It starts with a fixed 64-byte
//! little-endian header followed by channel data and a trailing extension
//! region. All access goes through [`PageHeader::decode`] and
//! [`PageHeader::encode_into`]; nothing reinterprets the page buffer in place.

use crate::device::ChannelType;
use crate::error::{RecorderError, RecorderResult};
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

/// Size of the fixed page header.
pub const PAGE_HEADER_SIZE: usize = 64;

/// Capability bit advertising that the sonar head produces bathymetry.
pub const CAPABILITY_BATHY: u32 = 0x10;

pub const PAGE_VERSION_LF: u32 = 3501;
pub const PAGE_VERSION_HF: u32 = 3502;
pub const PAGE_VERSION_RAW_BATHY: u32 = 3503;
pub const PAGE_VERSION_PROC_BATHY: u32 = 3511;

/// Framing mode bits read from the device.
pub const FRAMING_LF: u32 = 0x1;
pub const FRAMING_HF: u32 = 0x2;
pub const FRAMING_RAW_BATHY: u32 = 0x4;

/// Order in which a ping's pages are written to disk.
pub const WRITE_ORDER: [ChannelType; 4] = [
    ChannelType::LowFrequency,
    ChannelType::RawBathy,
    ChannelType::ProcessedBathy,
    ChannelType::HighFrequency,
];

const OFF_NUMBER_BYTES: usize = 0;
const OFF_PAGE_VERSION: usize = 4;
const OFF_PING_NUMBER: usize = 8;
const OFF_HEADER_SIZE: usize = 12;
const OFF_SDF_EXTENSION_SIZE: usize = 16;
const OFF_CAPABILITY_MASK: usize = 20;
const OFF_YEAR: usize = 24;
const OFF_MONTH: usize = 26;
const OFF_ERROR_FLAGS: usize = 32;
const OFF_PITCH: usize = 36;
const OFF_ROLL: usize = 40;
const OFF_ALTITUDE: usize = 44;

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(buf, offset))
}

impl ChannelType {
    /// Page header version stamped on pages of this channel.
    pub fn page_version(self) -> u32 {
        match self {
            Self::LowFrequency => PAGE_VERSION_LF,
            Self::HighFrequency => PAGE_VERSION_HF,
            Self::RawBathy => PAGE_VERSION_RAW_BATHY,
            Self::ProcessedBathy => PAGE_VERSION_PROC_BATHY,
        }
    }

    /// Channel of a page header version, `None` for versions this recorder
    /// does not store.
    pub fn from_page_version(version: u32) -> Option<Self> {
        match version {
            PAGE_VERSION_LF => Some(Self::LowFrequency),
            PAGE_VERSION_HF => Some(Self::HighFrequency),
            PAGE_VERSION_RAW_BATHY => Some(Self::RawBathy),
            PAGE_VERSION_PROC_BATHY => Some(Self::ProcessedBathy),
            _ => None,
        }
    }

    /// Bit of this channel in a [`ChannelMask`].
    pub fn mask_bit(self) -> u8 {
        match self {
            Self::LowFrequency => 1,
            Self::HighFrequency => 2,
            Self::RawBathy => 4,
            Self::ProcessedBathy => 8,
        }
    }

    /// Bathymetry pages get the vendor metadata spliced in.
    pub fn is_bathy(self) -> bool {
        matches!(self, Self::RawBathy | Self::ProcessedBathy)
    }
}

/// Set of channels a ping is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask(u8);

impl ChannelMask {
    /// Mask implied by the device framing mode and the head's bathy capability.
    ///
    /// Processed bathymetry is never selected by the framing mode itself: the
    /// unit produces it whenever raw bathymetry is framed on a bathy-capable head.
    pub fn from_framing(framing_mode: u32, bathy_capable: bool) -> Self {
        let mut bits = (framing_mode & (FRAMING_LF | FRAMING_HF | FRAMING_RAW_BATHY)) as u8;
        if bathy_capable && framing_mode & FRAMING_RAW_BATHY != 0 {
            bits |= ChannelType::ProcessedBathy.mask_bit();
        }
        Self(bits)
    }

    pub fn from_channels(channels: &[ChannelType]) -> Self {
        Self(channels.iter().fold(0, |acc, c| acc | c.mask_bit()))
    }

    pub fn contains(self, channel: ChannelType) -> bool {
        self.0 & channel.mask_bit() != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = WRITE_ORDER
            .iter()
            .filter(|c| self.contains(**c))
            .map(|c| c.to_string())
            .collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Creation time of a page, as stamped by the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl PageTimestamp {
    /// Calendar value, `None` if the unit stamped an impossible date.
    pub fn to_datetime(self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))?
            .and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
    }

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            year: u16::try_from(dt.year()).unwrap_or(0),
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            hundredths: (dt.nanosecond() / 10_000_000).min(99) as u8,
        }
    }
}

/// Decoded page header.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PageHeader {
    /// Declared total page length (N).
    pub number_bytes: u32,
    pub page_version: u32,
    pub ping_number: u32,
    pub header_size: u32,
    /// Length of the trailing extension region (S).
    pub sdf_extension_size: u32,
    pub capability_mask: u32,
    pub timestamp: PageTimestamp,
    pub error_flags: u32,
    pub pitch: f32,
    pub roll: f32,
    pub altitude: f32,
}

impl PageHeader {
    /// Decode the header at the start of `buf`.
    ///
    /// # Errors
    /// `MalformedPage` if `buf` is shorter than a header or the declared
    /// length is smaller than a header.
    pub fn decode(buf: &[u8]) -> RecorderResult<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(RecorderError::MalformedPage(format!(
                "{} bytes is shorter than a {}-byte header",
                buf.len(),
                PAGE_HEADER_SIZE
            )));
        }
        let header = Self {
            number_bytes: read_u32(buf, OFF_NUMBER_BYTES),
            page_version: read_u32(buf, OFF_PAGE_VERSION),
            ping_number: read_u32(buf, OFF_PING_NUMBER),
            header_size: read_u32(buf, OFF_HEADER_SIZE),
            sdf_extension_size: read_u32(buf, OFF_SDF_EXTENSION_SIZE),
            capability_mask: read_u32(buf, OFF_CAPABILITY_MASK),
            timestamp: PageTimestamp {
                year: read_u16(buf, OFF_YEAR),
                month: buf[OFF_MONTH],
                day: buf[OFF_MONTH + 1],
                hour: buf[OFF_MONTH + 2],
                minute: buf[OFF_MONTH + 3],
                second: buf[OFF_MONTH + 4],
                hundredths: buf[OFF_MONTH + 5],
            },
            error_flags: read_u32(buf, OFF_ERROR_FLAGS),
            pitch: read_f32(buf, OFF_PITCH),
            roll: read_f32(buf, OFF_ROLL),
            altitude: read_f32(buf, OFF_ALTITUDE),
        };
        if (header.number_bytes as usize) < PAGE_HEADER_SIZE {
            return Err(RecorderError::MalformedPage(format!(
                "ping {} declares {} bytes, less than its header",
                header.ping_number, header.number_bytes
            )));
        }
        Ok(header)
    }

    /// Write this header over the first [`PAGE_HEADER_SIZE`] bytes of `buf`.
    /// Reserved bytes are left untouched.
    pub fn encode_into(&self, buf: &mut [u8]) {
        write_u32(buf, OFF_NUMBER_BYTES, self.number_bytes);
        write_u32(buf, OFF_PAGE_VERSION, self.page_version);
        write_u32(buf, OFF_PING_NUMBER, self.ping_number);
        write_u32(buf, OFF_HEADER_SIZE, self.header_size);
        write_u32(buf, OFF_SDF_EXTENSION_SIZE, self.sdf_extension_size);
        write_u32(buf, OFF_CAPABILITY_MASK, self.capability_mask);
        buf[OFF_YEAR..OFF_YEAR + 2].copy_from_slice(&self.timestamp.year.to_le_bytes());
        buf[OFF_MONTH] = self.timestamp.month;
        buf[OFF_MONTH + 1] = self.timestamp.day;
        buf[OFF_MONTH + 2] = self.timestamp.hour;
        buf[OFF_MONTH + 3] = self.timestamp.minute;
        buf[OFF_MONTH + 4] = self.timestamp.second;
        buf[OFF_MONTH + 5] = self.timestamp.hundredths;
        write_u32(buf, OFF_ERROR_FLAGS, self.error_flags);
        write_u32(buf, OFF_PITCH, self.pitch.to_bits());
        write_u32(buf, OFF_ROLL, self.roll.to_bits());
        write_u32(buf, OFF_ALTITUDE, self.altitude.to_bits());
    }

    /// Channel this page belongs to, if it is one the recorder stores.
    pub fn channel(&self) -> Option<ChannelType> {
        ChannelType::from_page_version(self.page_version)
    }

    pub fn is_bathy_capable(&self) -> bool {
        self.capability_mask & CAPABILITY_BATHY != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PageHeader {
        PageHeader {
            number_bytes: 200,
            page_version: PAGE_VERSION_RAW_BATHY,
            ping_number: 100,
            header_size: PAGE_HEADER_SIZE as u32,
            sdf_extension_size: 20,
            capability_mask: CAPABILITY_BATHY,
            timestamp: PageTimestamp {
                year: 2024,
                month: 3,
                day: 9,
                hour: 14,
                minute: 5,
                second: 59,
                hundredths: 42,
            },
            error_flags: 0,
            pitch: 1.5,
            roll: -0.25,
            altitude: 12.0,
        }
    }

    #[test]
    fn test_decode_reads_encoded_fields() {
        let mut buf = vec![0u8; 200];
        let header = sample_header();
        header.encode_into(&mut buf);
        assert_eq!(PageHeader::decode(&buf).unwrap(), header);
        assert_eq!(header.channel(), Some(ChannelType::RawBathy));
        assert!(header.is_bathy_capable());
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let err = PageHeader::decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, RecorderError::MalformedPage(_)));
    }

    #[test]
    fn test_decode_rejects_undersized_declared_length() {
        let mut buf = vec![0u8; PAGE_HEADER_SIZE];
        let mut header = sample_header();
        header.number_bytes = 12;
        header.encode_into(&mut buf);
        assert!(PageHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_unknown_page_version_has_no_channel() {
        let mut header = sample_header();
        header.page_version = 9999;
        assert_eq!(header.channel(), None);
    }

    #[test]
    fn test_mask_from_framing() {
        let all = FRAMING_LF | FRAMING_HF | FRAMING_RAW_BATHY;
        assert_eq!(ChannelMask::from_framing(all, true).bits(), 0xF);
        assert_eq!(ChannelMask::from_framing(all, false).bits(), 0x7);
        // proc bathy needs raw bathy framed as well as the capability bit
        assert_eq!(ChannelMask::from_framing(FRAMING_LF, true).bits(), 0x1);

        let mask = ChannelMask::from_framing(FRAMING_LF | FRAMING_RAW_BATHY, true);
        assert!(mask.contains(ChannelType::ProcessedBathy));
        assert!(!mask.contains(ChannelType::HighFrequency));
        assert_eq!(mask.to_string(), "{lf,raw_bathy,proc_bathy}");
    }

    #[test]
    fn test_timestamp_to_datetime() {
        let ts = sample_header().timestamp;
        let dt = ts.to_datetime().unwrap();
        assert_eq!(dt.format("%Y%m%d%H%M%S").to_string(), "20240309140559");

        let bad = PageTimestamp {
            month: 13,
            ..ts
        };
        assert!(bad.to_datetime().is_none());
    }
}
