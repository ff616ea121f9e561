//! Append-only, record-oriented columnar batch files.
//!
//! A [`ColumnFile`] stores batches of rows pivoted into per-column arrays,
//! grouped into caller-declared [`ColumnSet`]s, each batch carrying an
//! opaque metadata value. Length-prefixed framing lets readers skip any
//! column set without decoding it; iteration streams batches through a
//! parallel decode pipeline while delivering callbacks in append order.

pub mod codec;
pub mod error;
pub mod file;
pub mod frame;
pub mod recovery;
pub mod schema;

mod pipeline;

pub use codec::{Codec, Compression};
pub use error::{Error, ErrorKind, Result};
pub use file::{ColumnFile, FileOptions};
pub use frame::BatchHeader;
pub use schema::{ColumnSet, Schema};

pub use serde_json::Value;
