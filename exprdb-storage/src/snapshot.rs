// SPDX-License-Identifier: AGPL-3.0-or-later
// ExprDB - Sparse Expression Similarity Engine
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Versioned bincode snapshots
//!
//! Every persisted object is wrapped in a [`Snapshot`] envelope carrying the
//! format version and a kind tag, so that loading the wrong file or a file
//! written by an incompatible version fails with `Corruption` instead of
//! producing garbage.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use exprdb_core::{ExprError, Result, SNAPSHOT_VERSION};

#[derive(Serialize, Deserialize)]
struct Snapshot<T> {
    /// Version for forward compatibility
    version: u32,
    /// What the payload is, e.g. "ExpressionStore"
    kind: String,
    /// Timestamp of creation
    created_at: SystemTime,
    payload: T,
}

/// Write `payload` to `path`
pub fn write_snapshot<T: Serialize>(path: &Path, kind: &str, payload: &T) -> Result<()> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        kind: kind.to_string(),
        created_at: SystemTime::now(),
        payload,
    };

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &snapshot)?;
    writer.flush()?;
    Ok(())
}

/// Read a payload of the given kind from `path`
pub fn read_snapshot<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExprError::not_found(format!("snapshot {:?}", path))
        } else {
            ExprError::Io(e)
        }
    })?;
    let reader = BufReader::new(file);

    let snapshot: Snapshot<T> = bincode::deserialize_from(reader)
        .map_err(|e| ExprError::Corruption(format!("{:?}: {}", path, e)))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(ExprError::Corruption(format!(
            "{:?}: incompatible version {} (expected {})",
            path, snapshot.version, SNAPSHOT_VERSION
        )));
    }
    if snapshot.kind != kind {
        return Err(ExprError::Corruption(format!(
            "{:?}: holds a {} snapshot, expected {}",
            path, snapshot.kind, kind
        )));
    }
    Ok(snapshot.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.bin");
        write_snapshot(&path, "Values", &vec![1u32, 2, 3]).unwrap();
        let values: Vec<u32> = read_snapshot(&path, "Values").unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_wrong_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.bin");
        write_snapshot(&path, "Values", &vec![1u32]).unwrap();
        let err = read_snapshot::<Vec<u32>>(&path, "Other").unwrap_err();
        assert!(matches!(err, ExprError::Corruption(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_snapshot::<Vec<u32>>(&dir.path().join("absent.bin"), "Values").unwrap_err();
        assert!(matches!(err, ExprError::NotFound(_)));
    }

    #[test]
    fn test_garbage_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"\x01\x02").unwrap();
        let err = read_snapshot::<Vec<u32>>(&path, "Values").unwrap_err();
        assert!(matches!(err, ExprError::Corruption(_)));
    }
}
