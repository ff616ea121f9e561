//! Schema registry: column sets, name validation, projection masks.
//!
//! The registry is built once per open by enumerating the caller's factory
//! from index 0 until it returns `None`, and is immutable afterwards. Every
//! column name must live in exactly one set; the open fails otherwise.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::frame::MAX_COLUMN_SETS;

/// A declared group of columns stored and decoded as one unit on disk.
#[derive(Debug, Clone)]
pub struct ColumnSet {
    columns: Vec<String>,
}

impl ColumnSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Column names in declaration order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[derive(Debug)]
pub struct Schema {
    sets: Vec<ColumnSet>,
    /// column name → index of the set that declares it
    locations: HashMap<String, usize>,
}

impl Schema {
    /// Enumerate `factory(0)`, `factory(1)`, … until `None`.
    pub(crate) fn build<F>(factory: F) -> Result<Self>
    where
        F: Fn(usize) -> Option<ColumnSet>,
    {
        let mut sets = Vec::new();
        while let Some(set) = factory(sets.len()) {
            if sets.len() == MAX_COLUMN_SETS {
                return Err(Error::schema(format!(
                    "more than {MAX_COLUMN_SETS} column sets"
                )));
            }
            sets.push(set);
        }

        let mut locations = HashMap::new();
        for (idx, set) in sets.iter().enumerate() {
            for column in set.columns() {
                if locations.insert(column.clone(), idx).is_some() {
                    return Err(Error::schema(format!(
                        "column {column} declared in more than one set"
                    )));
                }
            }
        }

        Ok(Self { sets, locations })
    }

    pub fn sets(&self) -> &[ColumnSet] {
        &self.sets
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Resolve a projection request against the registry. Every referenced
    /// name must exist in exactly one set.
    pub(crate) fn projection(&self, cols: &[&str]) -> Result<Projection> {
        let mut columns = Vec::with_capacity(cols.len());
        let mut set_of = Vec::with_capacity(cols.len());
        let mut to_decode = vec![false; self.sets.len()];
        for &col in cols {
            let idx = *self
                .locations
                .get(col)
                .ok_or_else(|| Error::schema(format!("unknown column {col}")))?;
            columns.push(col.to_owned());
            set_of.push(idx);
            to_decode[idx] = true;
        }
        Ok(Projection {
            columns,
            set_of,
            to_decode,
        })
    }
}

/// A resolved projection: the requested columns in request order, which set
/// each lives in, and the per-set decode mask.
#[derive(Debug, Clone)]
pub(crate) struct Projection {
    pub columns: Vec<String>,
    pub set_of: Vec<usize>,
    pub to_decode: Vec<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn three_sets(i: usize) -> Option<ColumnSet> {
        match i {
            0 => Some(ColumnSet::new(["Foo"])),
            1 => Some(ColumnSet::new(["Bar", "Baz"])),
            2 => Some(ColumnSet::new(["Qux", "Quux"])),
            _ => None,
        }
    }

    #[test]
    fn builds_in_factory_order() {
        let schema = Schema::build(three_sets).unwrap();
        assert_eq!(schema.set_count(), 3);
        assert_eq!(schema.sets()[1].columns(), ["Bar", "Baz"]);
    }

    #[test]
    fn duplicate_column_across_sets_fails() {
        let err = Schema::build(|i| match i {
            0 => Some(ColumnSet::new(["Foo"])),
            1 => Some(ColumnSet::new(["Foo", "Bar"])),
            _ => None,
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn too_many_sets_fails() {
        let err = Schema::build(|i| {
            if i < 300 {
                Some(ColumnSet::new([format!("c{i}")]))
            } else {
                None
            }
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn projection_masks_touched_sets_only() {
        let schema = Schema::build(three_sets).unwrap();
        let proj = schema.projection(&["Foo", "Baz"]).unwrap();
        assert_eq!(proj.to_decode, [true, true, false]);
        assert_eq!(proj.set_of, [0, 1]);
        assert_eq!(proj.columns, ["Foo", "Baz"]);
    }

    #[test]
    fn unknown_column_fails() {
        let schema = Schema::build(three_sets).unwrap();
        let err = schema.projection(&["Nope"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn empty_projection_decodes_nothing() {
        let schema = Schema::build(three_sets).unwrap();
        let proj = schema.projection(&[]).unwrap();
        assert_eq!(proj.to_decode, [false, false, false]);
    }
}
