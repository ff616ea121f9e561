//! High-level [`ColumnFile`] API: open, append, iterate.
//!
//! ```no_run
//! use colfile::{ColumnFile, ColumnSet};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! #[allow(non_snake_case)]
//! struct Row {
//!     Host: String,
//!     Hits: u64,
//! }
//!
//! let file = ColumnFile::open("access.col", |i| match i {
//!     0 => Some(ColumnSet::new(["Host"])),
//!     1 => Some(ColumnSet::new(["Hits"])),
//!     _ => None,
//! })?;
//!
//! file.append(
//!     &[Row { Host: "a".into(), Hits: 1 }, Row { Host: "b".into(), Hits: 2 }],
//!     &"window-0",
//! )?;
//!
//! file.iter(&["Hits"], |cols| {
//!     println!("hits this batch: {}", cols[0]);
//!     true
//! })?;
//! # Ok::<(), colfile::Error>(())
//! ```
//!
//! One handle owns the writable descriptor; every iteration call syncs and
//! then opens its own read-only handle, so readers always observe a durable
//! prefix and are never disturbed by later appends.

use std::collections::HashMap;
use std::fs::{File as FsFile, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::codec::{Codec, Compression};
use crate::error::{Error, Result};
use crate::frame::BatchHeader;
use crate::pipeline::{self, Delivery};
use crate::recovery;
use crate::schema::{ColumnSet, Schema};

// ── FileOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`ColumnFile::open_with`].
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Outer compression applied by the codec adapter. Part of the
    /// deployment contract: readers must open with the writer's choice.
    pub compression: Compression,
}

// ── ColumnFile ────────────────────────────────────────────────────────────────

struct Writer {
    file: FsFile,
    validated: bool,
}

/// An append-only columnar batch file.
pub struct ColumnFile {
    path: PathBuf,
    schema: Arc<Schema>,
    codec: Codec,
    writer: Mutex<Writer>,
}

impl ColumnFile {
    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Open `path` read+write (created if absent) with default options.
    ///
    /// `sets` is consulted as `sets(0)`, `sets(1)`, … until it returns
    /// `None`; the returned column sets define the file's schema.
    pub fn open<P, F>(path: P, sets: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(usize) -> Option<ColumnSet>,
    {
        Self::open_with(path, sets, FileOptions::default())
    }

    pub fn open_with<P, F>(path: P, sets: F, options: FileOptions) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(usize) -> Option<ColumnSet>,
    {
        let path = path.as_ref().to_owned();
        let schema = Schema::build(sets)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::io("open file", e))?;
        Ok(Self {
            path,
            schema: Arc::new(schema),
            codec: Codec::new(options.compression),
            writer: Mutex::new(Writer {
                file,
                validated: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Fsync the writable handle.
    pub fn sync(&self) -> Result<()> {
        let writer = self.writer.lock().unwrap();
        writer
            .file
            .sync_all()
            .map_err(|e| Error::io("sync file", e))
    }

    /// Close the handle. In-flight iterations hold their own read-only
    /// handles and are unaffected.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    // ── Write ────────────────────────────────────────────────────────────────

    /// Append one batch: `rows` pivoted into per-column arrays, plus an
    /// opaque `meta` value.
    ///
    /// Everything is encoded before any byte reaches the file, so encoding
    /// failures leave the file unchanged. An interrupted write can leave a
    /// partial trailing batch; the first append after reopen truncates it.
    pub fn append<R, M>(&self, rows: &[R], meta: &M) -> Result<()>
    where
        R: Serialize,
        M: Serialize,
    {
        let meta_bin = self
            .codec
            .encode(meta)
            .map_err(|e| Error::codec("encode meta", e))?;
        let columns = pivot(&self.schema, rows)?;
        let bins = encode_sets(&self.codec, &self.schema, columns)?;

        let header = BatchHeader {
            meta_len: blob_len(meta_bin.len(), "meta")?,
            set_lens: bins
                .iter()
                .map(|bin| blob_len(bin.len(), "column set"))
                .collect::<Result<_>>()?,
        };

        let mut writer = self.writer.lock().unwrap();
        if !writer.validated {
            recovery::validate(&mut writer.file)?;
            writer.validated = true;
        }
        header
            .write(&mut writer.file)
            .map_err(|e| Error::io("write batch header", e))?;
        writer
            .file
            .write_all(&meta_bin)
            .map_err(|e| Error::io("write meta", e))?;
        for bin in &bins {
            writer
                .file
                .write_all(bin)
                .map_err(|e| Error::io("write column set", e))?;
        }
        Ok(())
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// Visit every batch's metadata in append order. The callback returns
    /// `false` to stop early.
    pub fn iter_metas<M, F>(&self, mut cb: F) -> Result<()>
    where
        M: DeserializeOwned,
        F: FnMut(M) -> bool,
    {
        self.sync()?;
        let projection = self.schema.projection(&[])?;
        pipeline::run(
            &self.path,
            self.codec,
            Delivery::MetaOnly,
            projection,
            |batch| {
                let meta: M = serde_json::from_value(batch.meta.unwrap_or(Value::Null))
                    .map_err(|e| Error::codec("decode meta", e))?;
                Ok(cb(meta))
            },
        )
    }

    /// Visit every batch's projected columns in append order. Each callback
    /// receives one per-batch array per requested column, in `cols` order;
    /// column sets the projection does not touch are skipped on disk
    /// without being decoded.
    pub fn iter<F>(&self, cols: &[&str], mut cb: F) -> Result<()>
    where
        F: FnMut(&[Value]) -> bool,
    {
        self.sync()?;
        let projection = self.schema.projection(cols)?;
        pipeline::run(
            &self.path,
            self.codec,
            Delivery::Projected,
            projection,
            |batch| {
                let columns = batch.columns.unwrap_or_default();
                Ok(cb(&columns))
            },
        )
    }

    /// Visit metadata and projected columns together. Per batch, the
    /// metadata decodes into `M` and the requested columns into `C`, a
    /// map-shaped type whose fields are a subset of `cols`.
    pub fn iter_all<M, C, F>(&self, cols: &[&str], mut cb: F) -> Result<()>
    where
        M: DeserializeOwned,
        C: DeserializeOwned,
        F: FnMut(M, C) -> bool,
    {
        self.sync()?;
        let projection = self.schema.projection(cols)?;
        let names = projection.columns.clone();
        pipeline::run(
            &self.path,
            self.codec,
            Delivery::Full,
            projection,
            |batch| {
                let meta: M = serde_json::from_value(batch.meta.unwrap_or(Value::Null))
                    .map_err(|e| Error::codec("decode meta", e))?;
                let mut obj = serde_json::Map::new();
                for (name, column) in names.iter().zip(batch.columns.unwrap_or_default()) {
                    obj.insert(name.clone(), column);
                }
                let columns: C = serde_json::from_value(Value::Object(obj))
                    .map_err(|e| Error::codec("decode columns", e))?;
                Ok(cb(meta, columns))
            },
        )
    }

    /// Per-row sugar over [`iter`](Self::iter): the callback receives one
    /// value per requested column for each row in turn.
    pub fn iter_rows<F>(&self, cols: &[&str], mut cb: F) -> Result<()>
    where
        F: FnMut(&[Value]) -> bool,
    {
        let mut row: Vec<Value> = vec![Value::Null; cols.len()];
        self.iter(cols, |arrays| {
            let rows = arrays
                .first()
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            for i in 0..rows {
                for (j, array) in arrays.iter().enumerate() {
                    row[j] = array
                        .as_array()
                        .and_then(|a| a.get(i))
                        .cloned()
                        .unwrap_or(Value::Null);
                }
                if !cb(&row) {
                    return false;
                }
            }
            true
        })
    }
}

// ── Append internals ─────────────────────────────────────────────────────────

fn blob_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::schema(format!("{what} blob exceeds 4 GiB frame limit")))
}

/// Row-to-column pivot: serialize each row to a map once and pull every
/// declared column out by name.
fn pivot<R: Serialize>(schema: &Schema, rows: &[R]) -> Result<HashMap<String, Vec<Value>>> {
    let mut columns: HashMap<String, Vec<Value>> = schema
        .sets()
        .iter()
        .flat_map(|set| set.columns())
        .map(|name| (name.clone(), Vec::with_capacity(rows.len())))
        .collect();

    for row in rows {
        let value = serde_json::to_value(row).map_err(|e| Error::codec("serialize row", e))?;
        let obj = match value {
            Value::Object(map) => map,
            _ => return Err(Error::schema("row is not a map-shaped aggregate")),
        };
        for (name, array) in columns.iter_mut() {
            match obj.get(name) {
                Some(v) => array.push(v.clone()),
                None => {
                    return Err(Error::schema(format!("row is missing column {name}")));
                }
            }
        }
    }
    Ok(columns)
}

/// Build one value per column set (map of column name → array, declaration
/// order) and encode each.
fn encode_sets(
    codec: &Codec,
    schema: &Schema,
    mut columns: HashMap<String, Vec<Value>>,
) -> Result<Vec<Vec<u8>>> {
    let set_values: Vec<Value> = schema
        .sets()
        .iter()
        .map(|set| {
            let mut obj = serde_json::Map::new();
            for name in set.columns() {
                let array = columns.remove(name).unwrap_or_default();
                obj.insert(name.clone(), Value::Array(array));
            }
            Value::Object(obj)
        })
        .collect();

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        set_values
            .par_iter()
            .map(|value| {
                codec
                    .encode(value)
                    .map_err(|e| Error::codec("encode column set", e))
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        set_values
            .iter()
            .map(|value| {
                codec
                    .encode(value)
                    .map_err(|e| Error::codec("encode column set", e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::Serialize;

    #[derive(Serialize)]
    #[allow(non_snake_case)]
    struct Row {
        Foo: i64,
        Bar: String,
    }

    fn schema() -> Schema {
        Schema::build(|i| match i {
            0 => Some(ColumnSet::new(["Foo"])),
            1 => Some(ColumnSet::new(["Bar"])),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn pivot_builds_per_column_arrays() {
        let rows = [
            Row {
                Foo: 1,
                Bar: "A".into(),
            },
            Row {
                Foo: 2,
                Bar: "B".into(),
            },
        ];
        let columns = pivot(&schema(), &rows).unwrap();
        assert_eq!(columns["Foo"], vec![Value::from(1), Value::from(2)]);
        assert_eq!(columns["Bar"], vec![Value::from("A"), Value::from("B")]);
    }

    #[test]
    fn pivot_of_zero_rows_yields_empty_arrays() {
        let rows: [Row; 0] = [];
        let columns = pivot(&schema(), &rows).unwrap();
        assert!(columns["Foo"].is_empty());
        assert!(columns["Bar"].is_empty());
    }

    #[test]
    fn missing_column_is_a_schema_error() {
        #[derive(Serialize)]
        #[allow(non_snake_case)]
        struct Partial {
            Foo: i64,
        }
        let err = pivot(&schema(), &[Partial { Foo: 1 }]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn extra_attributes_are_ignored() {
        #[derive(Serialize)]
        #[allow(non_snake_case)]
        struct Wide {
            Foo: i64,
            Bar: String,
            Extra: bool,
        }
        let columns = pivot(
            &schema(),
            &[Wide {
                Foo: 7,
                Bar: "x".into(),
                Extra: true,
            }],
        )
        .unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns["Foo"], vec![Value::from(7)]);
    }

    #[test]
    fn scalar_row_is_a_schema_error() {
        let err = pivot(&schema(), &[5i64]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
