//! Three-stage streaming reader shared by every iteration mode.
//!
//! ```text
//!   S1 framer (thread)      S2 decoders (threads)      S3 callback (caller)
//!   sequential reads   ──▶  codec decode + project ──▶ reorder + deliver
//!                 bounded queue               bounded queue
//! ```
//!
//! S1 owns the only read handle: it parses headers, reads the blobs the
//! delivery mode needs, and seeks past the rest. S2 fans decoding out over
//! the available cores. S3 runs on the iterating thread, restores on-disk
//! order through a sequence-numbered reorder buffer, and invokes the user
//! callback exactly once per batch — invocations never overlap.
//!
//! Cancellation: a `false` from the callback flips the shared flag and
//! drops S3's receiver; upstream stages observe a failed send or the flag
//! and exit. Errors: the first failure from any stage is latched, all
//! stages wind down, and the latched error is returned after the threads
//! are joined. EOF on a batch boundary is normal termination; running out
//! of bytes mid-batch is `Truncated`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel as xchan;
use serde_json::Value;

use crate::codec::Codec;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::BatchHeader;
use crate::schema::Projection;

/// What each batch materializes for the callback stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    MetaOnly,
    Projected,
    Full,
}

impl Delivery {
    fn wants_meta(self) -> bool {
        !matches!(self, Delivery::Projected)
    }

    fn wants_columns(self) -> bool {
        !matches!(self, Delivery::MetaOnly)
    }
}

/// Raw bytes for one batch, produced by the framer.
struct RawBatch {
    seq: u64,
    meta: Option<Vec<u8>>,
    /// `(set index, blob)` for each set the projection touches.
    sets: Vec<(usize, Vec<u8>)>,
}

/// Decoded output for one batch, handed to the callback adapter in
/// on-disk order.
pub(crate) struct DecodedBatch {
    seq: u64,
    pub(crate) meta: Option<Value>,
    /// Per-batch column arrays in projection order.
    pub(crate) columns: Option<Vec<Value>>,
}

/// Queue depth between stages; bounds memory while keeping the decoders fed.
const QUEUE_DEPTH: usize = 1024;

/// Drive the pipeline over the file at `path`, feeding each decoded batch
/// to `sink` in append order. `sink` returning `Ok(false)` terminates early.
pub(crate) fn run<F>(
    path: &Path,
    codec: Codec,
    delivery: Delivery,
    projection: Projection,
    mut sink: F,
) -> Result<()>
where
    F: FnMut(DecodedBatch) -> Result<bool>,
{
    let file = File::open(path).map_err(|e| Error::io("open file for iteration", e))?;

    let projection = Arc::new(projection);
    let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    let cancelled = Arc::new(AtomicBool::new(false));

    let (raw_tx, raw_rx) = xchan::bounded::<RawBatch>(QUEUE_DEPTH);
    let (out_tx, out_rx) = xchan::bounded::<DecodedBatch>(QUEUE_DEPTH);

    // S1 — framer: the only reader of the handle.
    let framer = {
        let error = Arc::clone(&first_error);
        let stop = Arc::clone(&cancelled);
        let projection = Arc::clone(&projection);
        thread::spawn(move || {
            if let Err(e) = frame_batches(file, delivery, &projection, &raw_tx, &stop) {
                latch(&error, e);
            }
            // raw_tx drops here; decoders drain and exit.
        })
    };

    // S2 — decoders, one per core.
    let workers: Vec<_> = (0..decoder_count())
        .map(|_| {
            let rx = raw_rx.clone();
            let tx = out_tx.clone();
            let error = Arc::clone(&first_error);
            let stop = Arc::clone(&cancelled);
            let projection = Arc::clone(&projection);
            thread::spawn(move || {
                for raw in rx.iter() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match decode_batch(codec, delivery, &projection, raw) {
                        Ok(item) => {
                            if tx.send(item).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            latch(&error, e);
                            stop.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    drop(raw_rx);
    drop(out_tx);

    // S3 — reorder buffer + serialized delivery on the calling thread.
    let mut pending: BTreeMap<u64, DecodedBatch> = BTreeMap::new();
    let mut next_seq = 0u64;
    let mut stopped_early = false;
    let mut sink_error: Option<Error> = None;

    'deliver: while let Ok(item) = out_rx.recv() {
        pending.insert(item.seq, item);
        while let Some(item) = pending.remove(&next_seq) {
            next_seq += 1;
            match sink(item) {
                Ok(true) => {}
                Ok(false) => {
                    stopped_early = true;
                    break 'deliver;
                }
                Err(e) => {
                    sink_error = Some(e);
                    break 'deliver;
                }
            }
        }
    }

    // Unblock upstream senders, then wait the stages out.
    cancelled.store(true, Ordering::Relaxed);
    drop(out_rx);
    let _ = framer.join();
    for worker in workers {
        let _ = worker.join();
    }

    if stopped_early {
        return Ok(());
    }
    if let Some(e) = sink_error {
        return Err(e);
    }
    let result = match first_error.lock().unwrap().take() {
        Some(e) => Err(e),
        None => Ok(()),
    };
    result
}

fn decoder_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn latch(slot: &Mutex<Option<Error>>, err: Error) {
    let mut slot = slot.lock().unwrap();
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// S1 body: sequential framing over a fresh read-only handle.
fn frame_batches(
    mut file: File,
    delivery: Delivery,
    projection: &Projection,
    tx: &xchan::Sender<RawBatch>,
    stop: &AtomicBool,
) -> Result<()> {
    let file_len = file
        .metadata()
        .map_err(|e| Error::io("stat file", e))?
        .len();
    let mut pos = 0u64;
    let mut seq = 0u64;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        let header = match BatchHeader::read(&mut file) {
            Ok(Some(h)) => h,
            Ok(None) => return Ok(()), // clean EOF on a batch boundary
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::truncated("short batch header"))
            }
            Err(e) => return Err(Error::io("read batch header", e)),
        };
        pos += header.header_len();
        if pos + header.payload_len() > file_len {
            return Err(Error::truncated("batch payload extends past end of file"));
        }

        let meta = if delivery.wants_meta() {
            Some(read_blob(&mut file, header.meta_len)?)
        } else {
            seek_past(&mut file, header.meta_len as u64, "skip meta")?;
            None
        };
        pos += header.meta_len as u64;

        let mut sets = Vec::new();
        if delivery.wants_columns() {
            for (idx, &len) in header.set_lens.iter().enumerate() {
                // The frame's own set count rules skipping; the projection
                // mask only covers sets the registry knows.
                if projection.to_decode.get(idx).copied().unwrap_or(false) {
                    sets.push((idx, read_blob(&mut file, len)?));
                } else {
                    seek_past(&mut file, len as u64, "skip column set")?;
                }
                pos += len as u64;
            }
        } else {
            let skip: u64 = header.set_lens.iter().map(|&l| l as u64).sum();
            seek_past(&mut file, skip, "skip column sets")?;
            pos += skip;
        }

        if tx.send(RawBatch { seq, meta, sets }).is_err() {
            return Ok(()); // receivers gone — cancelled downstream
        }
        seq += 1;
    }
}

fn read_blob(file: &mut File, len: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::truncated("short blob read")
        } else {
            Error::io("read blob", e)
        }
    })?;
    Ok(buf)
}

fn seek_past(file: &mut File, len: u64, context: &str) -> Result<()> {
    file.seek(SeekFrom::Current(len as i64))
        .map_err(|e| Error::io(context, e))?;
    Ok(())
}

/// S2 body: decode one batch's blobs and project the requested columns.
fn decode_batch(
    codec: Codec,
    delivery: Delivery,
    projection: &Projection,
    raw: RawBatch,
) -> Result<DecodedBatch> {
    let meta = match raw.meta {
        Some(bytes) => Some(
            codec
                .decode::<Value>(&bytes)
                .map_err(|e| Error::codec("decode meta", e))?,
        ),
        None => None,
    };

    let columns = if delivery.wants_columns() {
        let mut cols: Vec<Value> = vec![Value::Null; projection.columns.len()];
        for (set_idx, bytes) in &raw.sets {
            let value: Value = codec
                .decode(bytes)
                .map_err(|e| Error::codec("decode column set", e))?;
            let obj = match value {
                Value::Object(map) => map,
                _ => {
                    return Err(Error::new(
                        ErrorKind::Codec,
                        "column set payload is not a map",
                    ))
                }
            };
            // Lookup stays non-destructive: the same column may be
            // requested more than once.
            for (pos, name) in projection.columns.iter().enumerate() {
                if projection.set_of[pos] == *set_idx {
                    cols[pos] = obj.get(name).cloned().ok_or_else(|| {
                        Error::new(
                            ErrorKind::Codec,
                            format!("column set payload missing column {name}"),
                        )
                    })?;
                }
            }
        }
        Some(cols)
    } else {
        None
    };

    Ok(DecodedBatch {
        seq: raw.seq,
        meta,
        columns,
    })
}
