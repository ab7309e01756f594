//! Vendor extension records and the bathymetry metadata splice.
//!
//! The last `sdf_extension_size` (S) bytes of a page's declared length (N) are
//! its extension region:
//!
//! ```text
//! [page header][channel data][u32 copy of S][record][record]...[END record]
//! ```
//!
//! Each record starts with a 16-byte [`RecordHeader`] whose
//! `record_num_bytes` is the authoritative length of the record including the
//! header. The region always ends with a bare END record.
//!
//! The first raw and processed bathymetry pages of every recording file get
//! the unit's calibration, engineering and processing records spliced in
//! front of that END record, see [`splice_metadata`].

use crate::device::{Device, MetadataRecordId};
use crate::error::{RecorderError, RecorderResult};
use crate::page::{read_u32, write_u32, PageHeader, PAGE_HEADER_SIZE};

/// Size of an extension record header (and of the END record).
pub const REC_HEADER_SIZE: usize = 16;

pub const RECORD_ID_END: u32 = 0;
pub const RECORD_ID_BATHY_CAL: u32 = 0x4241_0001;
pub const RECORD_ID_BATHY_ENG_SETTINGS: u32 = 0x4241_0002;
pub const RECORD_ID_BATHY_PROC_SETTINGS: u32 = 0x4241_0003;

/// Only known record header layout.
pub const HEADER_VERSION: u16 = 1;

/// Size of the duplicated extension-size field opening the region.
const EXTENSION_SIZE_FIELD: usize = 4;

/// Extension record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_id: u32,
    pub record_num_bytes: u32,
    pub header_version: u16,
    pub record_version: u16,
}

impl RecordHeader {
    /// Header of the END record.
    pub fn end() -> Self {
        Self {
            record_id: RECORD_ID_END,
            record_num_bytes: REC_HEADER_SIZE as u32,
            header_version: HEADER_VERSION,
            record_version: 1,
        }
    }

    /// Decode the record header at the start of `buf`, `None` if it is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < REC_HEADER_SIZE {
            return None;
        }
        Some(Self {
            record_id: read_u32(buf, 0),
            record_num_bytes: read_u32(buf, 4),
            header_version: u16::from_le_bytes([buf[8], buf[9]]),
            record_version: u16::from_le_bytes([buf[10], buf[11]]),
        })
    }

    pub fn encode(&self) -> [u8; REC_HEADER_SIZE] {
        let mut out = [0u8; REC_HEADER_SIZE];
        write_u32(&mut out, 0, self.record_id);
        write_u32(&mut out, 4, self.record_num_bytes);
        out[8..10].copy_from_slice(&self.header_version.to_le_bytes());
        out[10..12].copy_from_slice(&self.record_version.to_le_bytes());
        out
    }

    pub fn is_end(&self) -> bool {
        self.record_id == RECORD_ID_END
    }
}

/// Bytes of a fresh END record.
pub fn end_record() -> [u8; REC_HEADER_SIZE] {
    RecordHeader::end().encode()
}

/// One record found while walking an extension region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpan {
    pub header: RecordHeader,
    /// Offset of the record in the page.
    pub offset: usize,
}

/// Walk the extension region of `page`, up to and including its END record.
///
/// # Errors
/// `MalformedPage` when the region does not fit the declared page length, a
/// record overruns the region, or no END record is found.
pub fn parse_extension(page: &[u8]) -> RecorderResult<Vec<RecordSpan>> {
    let header = PageHeader::decode(page)?;
    let (start, end) = extension_bounds(&header, page.len())?;

    let mut spans = Vec::new();
    let mut offset = start + EXTENSION_SIZE_FIELD;
    while offset < end {
        let record = RecordHeader::decode(&page[offset..end]).ok_or_else(|| {
            RecorderError::MalformedPage(format!(
                "truncated record header at offset {} of ping {}",
                offset, header.ping_number
            ))
        })?;
        let len = record.record_num_bytes as usize;
        if len < REC_HEADER_SIZE || offset + len > end {
            return Err(RecorderError::MalformedPage(format!(
                "record 0x{:08x} at offset {} declares {} bytes",
                record.record_id, offset, len
            )));
        }
        spans.push(RecordSpan {
            header: record,
            offset,
        });
        if record.is_end() {
            return Ok(spans);
        }
        offset += len;
    }
    Err(RecorderError::MalformedPage(format!(
        "extension region of ping {} has no END record",
        header.ping_number
    )))
}

fn extension_bounds(header: &PageHeader, available: usize) -> RecorderResult<(usize, usize)> {
    let n = header.number_bytes as usize;
    let s = header.sdf_extension_size as usize;
    if n > available {
        return Err(RecorderError::MalformedPage(format!(
            "ping {} declares {} bytes but only {} are present",
            header.ping_number, n, available
        )));
    }
    if s < EXTENSION_SIZE_FIELD + REC_HEADER_SIZE || s > n.saturating_sub(PAGE_HEADER_SIZE) {
        return Err(RecorderError::MalformedPage(format!(
            "ping {} has an extension region of {} bytes in a {}-byte page",
            header.ping_number, s, n
        )));
    }
    Ok((n - s, n))
}

/// Reduce a metadata record read from the device to its declared length.
///
/// The device pads records to the block size it reports; the record header
/// carries the real length.
///
/// # Errors
/// `MalformedRecord` if the declared length is shorter than a record header
/// or longer than the block that was read.
pub fn trim_record(id: MetadataRecordId, mut block: Vec<u8>) -> RecorderResult<Vec<u8>> {
    let header = RecordHeader::decode(&block).ok_or_else(|| {
        RecorderError::MalformedRecord(format!("{} block of {} bytes", id, block.len()))
    })?;
    let len = header.record_num_bytes as usize;
    if len < REC_HEADER_SIZE || len > block.len() {
        return Err(RecorderError::MalformedRecord(format!(
            "{} declares {} bytes in a {}-byte block",
            id,
            len,
            block.len()
        )));
    }
    block.truncate(len);
    Ok(block)
}

/// Read the three bathymetry metadata records from the device, trimmed and
/// in splice order.
pub async fn load_bathy_records<D: Device + ?Sized>(device: &mut D) -> RecorderResult<Vec<Vec<u8>>> {
    let mut records = Vec::with_capacity(MetadataRecordId::ALL.len());
    for id in MetadataRecordId::ALL {
        let size = device.metadata_record_size(id).await? as usize;
        let mut block = vec![0u8; size];
        device.metadata_record(id, &mut block).await?;
        records.push(trim_record(id, block)?);
    }
    Ok(records)
}

/// Whether the extension region of `page` ends in an END record.
///
/// # Errors
/// `MalformedPage` if the declared geometry does not fit the buffer.
pub fn is_terminated(page: &[u8]) -> RecorderResult<bool> {
    let header = PageHeader::decode(page)?;
    let (_, n) = extension_bounds(&header, page.len())?;
    Ok(RecordHeader::decode(&page[n - REC_HEADER_SIZE..n]).is_some_and(|r| r.is_end()))
}

/// Result of a splice attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceOutcome {
    /// Records were spliced; new header values.
    Spliced {
        number_bytes: u32,
        sdf_extension_size: u32,
    },
    /// The page's extension region does not end in an END record.
    NotTerminated,
}

/// Splice `records` in front of the END record of `page`.
///
/// With N the declared page length and S the extension size:
/// - the buffer is cut to its first N − 16 bytes, dropping the END record
/// - the records and a fresh END record are appended
/// - `number_bytes` becomes the new buffer length and `sdf_extension_size`
///   becomes S − 16 + appended, written both in the header and in the
///   duplicated field at offset N − S
///
/// A page whose region does not end in an END record is left untouched.
///
/// # Errors
/// `MalformedPage` if the declared geometry does not fit the buffer.
pub fn splice_metadata(page: &mut Vec<u8>, records: &[Vec<u8>]) -> RecorderResult<SpliceOutcome> {
    let mut header = PageHeader::decode(page)?;
    let (ext_start, n) = extension_bounds(&header, page.len())?;
    let end_offset = n - REC_HEADER_SIZE;

    if !is_terminated(page)? {
        return Ok(SpliceOutcome::NotTerminated);
    }

    page.truncate(end_offset);
    let before = page.len();
    for record in records {
        page.extend_from_slice(record);
    }
    page.extend_from_slice(&end_record());
    let appended = page.len() - before;

    let number_bytes = u32::try_from(page.len())
        .map_err(|_| RecorderError::MalformedPage(format!("spliced page of {} bytes", page.len())))?;
    let sdf_extension_size =
        header.sdf_extension_size - REC_HEADER_SIZE as u32 + appended as u32;

    header.number_bytes = number_bytes;
    header.sdf_extension_size = sdf_extension_size;
    header.encode_into(page);
    write_u32(page, ext_start, sdf_extension_size);

    Ok(SpliceOutcome::Spliced {
        number_bytes,
        sdf_extension_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{synthetic_page, synthetic_record};
    use crate::device::ChannelType;

    #[test]
    fn test_end_record_layout() {
        let end = end_record();
        assert_eq!(read_u32(&end, 0), 0);
        assert_eq!(read_u32(&end, 4), 16);
        assert_eq!(RecordHeader::decode(&end), Some(RecordHeader::end()));
    }

    #[test]
    fn test_trim_record_cuts_padding() {
        let mut block = synthetic_record(MetadataRecordId::Calibration, 40);
        block.resize(128, 0xAA);
        let trimmed = trim_record(MetadataRecordId::Calibration, block).unwrap();
        assert_eq!(trimmed.len(), 40);
    }

    #[test]
    fn test_trim_record_rejects_overlong_declaration() {
        let mut block = synthetic_record(MetadataRecordId::Engineering, 64);
        block.truncate(32);
        let err = trim_record(MetadataRecordId::Engineering, block).unwrap_err();
        assert!(matches!(err, RecorderError::MalformedRecord(_)));
    }

    #[test]
    fn test_splice_round_trip() {
        let mut page = synthetic_page(ChannelType::RawBathy, 7, 100, true);
        let original = PageHeader::decode(&page).unwrap();
        let n = original.number_bytes as usize;
        let s = original.sdf_extension_size as usize;

        let records = vec![
            synthetic_record(MetadataRecordId::Calibration, 40),
            synthetic_record(MetadataRecordId::Engineering, 24),
            synthetic_record(MetadataRecordId::Processing, 52),
        ];
        let appended = 40 + 24 + 52 + REC_HEADER_SIZE;

        let outcome = splice_metadata(&mut page, &records).unwrap();
        let header = PageHeader::decode(&page).unwrap();

        assert_eq!(page.len(), n - REC_HEADER_SIZE + appended);
        assert_eq!(header.number_bytes as usize, page.len());
        assert_eq!(
            header.sdf_extension_size as usize,
            s - REC_HEADER_SIZE + appended
        );
        assert_eq!(
            outcome,
            SpliceOutcome::Spliced {
                number_bytes: header.number_bytes,
                sdf_extension_size: header.sdf_extension_size,
            }
        );
        assert_eq!(
            page[n - s..n - s + 4],
            header.sdf_extension_size.to_le_bytes()
        );
        // channel data is untouched
        assert_eq!(header.ping_number, original.ping_number);

        let spans = parse_extension(&page).unwrap();
        let ids: Vec<u32> = spans.iter().map(|r| r.header.record_id).collect();
        assert_eq!(
            ids,
            vec![
                RECORD_ID_BATHY_CAL,
                RECORD_ID_BATHY_ENG_SETTINGS,
                RECORD_ID_BATHY_PROC_SETTINGS,
                RECORD_ID_END
            ]
        );
        let lens: Vec<u32> = spans.iter().map(|r| r.header.record_num_bytes).collect();
        assert_eq!(lens, vec![40, 24, 52, 16]);
        let last = spans.last().unwrap();
        assert_eq!(last.offset + REC_HEADER_SIZE, page.len());
    }

    #[test]
    fn test_splice_leaves_unterminated_page_alone() {
        let mut page = synthetic_page(ChannelType::ProcessedBathy, 3, 64, true);
        let n = page.len();
        // clobber the END record id
        write_u32(&mut page, n - REC_HEADER_SIZE, 0xDEAD_BEEF);
        let before = page.clone();

        let outcome = splice_metadata(&mut page, &[synthetic_record(MetadataRecordId::Calibration, 20)])
            .unwrap();
        assert_eq!(outcome, SpliceOutcome::NotTerminated);
        assert_eq!(page, before);
        assert!(!is_terminated(&page).unwrap());
        assert!(is_terminated(&synthetic_page(ChannelType::ProcessedBathy, 3, 64, true)).unwrap());
    }

    #[test]
    fn test_parse_extension_rejects_overrun() {
        let mut page = synthetic_page(ChannelType::RawBathy, 1, 32, true);
        let n = page.len();
        write_u32(&mut page, n - REC_HEADER_SIZE + 4, 400);
        assert!(parse_extension(&page).is_err());
    }
}
