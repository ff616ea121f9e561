//! Batch-boundary recovery: locate the end of the well-formed prefix.
//!
//! # How it works
//!
//! The scanner walks forward from offset 0, parsing each self-delimiting
//! batch header and seeking past the announced payload. It needs no index
//! and no prior state. The walk stops at a clean EOF on a batch boundary,
//! or earlier when the remaining bytes cannot hold the batch a header
//! announces — that remainder is a damaged trailer left by an interrupted
//! append.
//!
//! Two consumers share the walk:
//!
//! - the first-write validator, which truncates a damaged trailer and
//!   positions the append offset at the last valid boundary;
//! - [`scan_file`], a read-only diagnostic that reports every well-formed
//!   batch without modifying the file.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};
use crate::frame::BatchHeader;

/// One well-formed batch located by a scan.
#[derive(Debug, Clone)]
pub struct ScannedBatch {
    /// Absolute byte offset of the batch header.
    pub offset: u64,
    pub header: BatchHeader,
}

impl ScannedBatch {
    pub fn frame_len(&self) -> u64 {
        self.header.frame_len()
    }
}

/// Report produced by a full scan.
#[derive(Debug)]
pub struct ScanReport {
    pub batches: Vec<ScannedBatch>,
    /// Byte length of the well-formed prefix.
    pub valid_len: u64,
    pub file_len: u64,
    /// Bytes past `valid_len` exist but do not form a whole batch.
    pub truncated_tail: bool,
}

impl ScanReport {
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{} batch(es), {}/{} bytes well-formed{}",
            self.batches.len(),
            self.valid_len,
            self.file_len,
            if self.truncated_tail {
                ", damaged trailer"
            } else {
                ""
            },
        )
    }
}

/// Walk every batch header in `file` from offset 0.
///
/// Corruption is encoded in the report (`truncated_tail`), never as an
/// error; only genuine I/O failures propagate.
pub(crate) fn scan_handle(file: &mut File) -> io::Result<ScanReport> {
    let file_len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    let mut batches = Vec::new();
    let mut pos = 0u64;
    let mut truncated_tail = false;

    loop {
        let header = match BatchHeader::read(&mut *file) {
            Ok(Some(h)) => h,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                truncated_tail = true;
                break;
            }
            Err(e) => return Err(e),
        };
        let frame_len = header.frame_len();
        if pos + frame_len > file_len {
            truncated_tail = true;
            break;
        }
        file.seek(SeekFrom::Start(pos + frame_len))?;
        batches.push(ScannedBatch {
            offset: pos,
            header,
        });
        pos += frame_len;
    }

    Ok(ScanReport {
        batches,
        valid_len: pos,
        file_len,
        truncated_tail,
    })
}

/// Scan the file at `path` read-only and report its batches.
pub fn scan_file(path: impl AsRef<Path>) -> Result<ScanReport> {
    let mut file =
        File::open(path.as_ref()).map_err(|e| Error::io("open file for scan", e))?;
    scan_handle(&mut file).map_err(|e| Error::validate("scan batches", e))
}

/// First-write validation: truncate any damaged trailer and leave the file
/// offset at the end of the last well-formed batch, so appends never
/// interleave into the committed prefix.
pub(crate) fn validate(file: &mut File) -> Result<()> {
    let report = scan_handle(file).map_err(|e| Error::validate("scan existing batches", e))?;
    if report.truncated_tail {
        file.set_len(report.valid_len)
            .map_err(|e| Error::validate("truncate damaged trailer", e))?;
    }
    file.seek(SeekFrom::Start(report.valid_len))
        .map_err(|e| Error::validate("seek to append offset", e))?;
    Ok(())
}
