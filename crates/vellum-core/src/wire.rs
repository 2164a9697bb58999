//! Wire format: tagged JSON arrays.
//!
//! An op serializes as `[tag, ...fields]` with numeric tags; an id as
//! `[author, seq]`; an address as `[startId, endId, [[author, seq], …]]`;
//! a document as `{"version": "v0", "ops": […]}`. These shapes are
//! load-bearing for interop with existing clients and are built and
//! parsed by hand as `serde_json::Value` — the formats are positional,
//! not struct-shaped.
//!
//! Tags 4 and 5 belonged to retired op kinds: they decode to nothing
//! (with a warning) and are never emitted. The object-shaped legacy
//! address is accepted on decode only.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::address::ContentAddress;
use crate::doc::Doc;
use crate::id::{Id, Side};
use crate::op::{
    DeleteOp, FormatOp, InsertOp, MultiOp, Op, RewindOp, SerializedDoc, ShowOp, SnapshotOp,
};

const TAG_INSERT: u64 = 0;
const TAG_DELETE: u64 = 1;
const TAG_FORMAT: u64 = 2;
const TAG_SNAPSHOT: u64 = 3;
const TAG_MULTI: u64 = 6;
const TAG_REWIND: u64 = 7;
const TAG_SHOW: u64 = 8;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid id")]
    InvalidId,
    #[error("invalid side: {0}")]
    InvalidSide(i64),
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid content address")]
    InvalidAddress,
    #[error("invalid document")]
    InvalidDocument,
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode_id(id: &Id) -> Value {
    Value::Array(vec![
        Value::String(id.author.clone()),
        Value::from(id.seq),
    ])
}

pub fn decode_id(v: &Value) -> Result<Id, WireError> {
    let arr = v.as_array().ok_or(WireError::InvalidId)?;
    if arr.len() != 2 {
        return Err(WireError::InvalidId);
    }
    let author = arr[0].as_str().ok_or(WireError::InvalidId)?;
    let seq = arr[1].as_i64().ok_or(WireError::InvalidId)?;
    Ok(Id::new(author, seq))
}

pub fn encode_address(addr: &ContentAddress) -> Value {
    let mut max_ids: Vec<Id> = addr
        .max_ids
        .iter()
        .map(|(a, s)| Id::new(a.clone(), *s))
        .collect();
    max_ids.sort();
    Value::Array(vec![
        encode_id(&addr.start_id),
        encode_id(&addr.end_id),
        Value::Array(max_ids.iter().map(encode_id).collect()),
    ])
}

pub fn decode_address(v: &Value) -> Result<ContentAddress, WireError> {
    if v.is_object() {
        return decode_legacy_address(v);
    }
    let arr = v.as_array().ok_or(WireError::InvalidAddress)?;
    if arr.len() != 3 {
        return Err(WireError::InvalidAddress);
    }
    let mut addr = ContentAddress {
        start_id: decode_id(&arr[0])?,
        end_id: decode_id(&arr[1])?,
        max_ids: Default::default(),
    };
    for entry in arr[2].as_array().ok_or(WireError::InvalidAddress)? {
        let id = decode_id(entry)?;
        addr.max_ids.insert(id.author, id.seq);
    }
    Ok(addr)
}

/// One-time import path for the pre-migration object shape:
/// `{"startID": [a, s], "endID": [a, s], "maxIDs": [{"key": a, "value": s}, …]}`.
fn decode_legacy_address(v: &Value) -> Result<ContentAddress, WireError> {
    let obj = v.as_object().ok_or(WireError::InvalidAddress)?;
    let mut addr = ContentAddress {
        start_id: decode_id(obj.get("startID").ok_or(WireError::InvalidAddress)?)?,
        end_id: decode_id(obj.get("endID").ok_or(WireError::InvalidAddress)?)?,
        max_ids: Default::default(),
    };
    let entries = obj
        .get("maxIDs")
        .and_then(Value::as_array)
        .ok_or(WireError::InvalidAddress)?;
    for entry in entries {
        let e = entry.as_object().ok_or(WireError::InvalidAddress)?;
        let author = e
            .get("key")
            .and_then(Value::as_str)
            .ok_or(WireError::InvalidAddress)?;
        let seq = e
            .get("value")
            .and_then(Value::as_i64)
            .ok_or(WireError::InvalidAddress)?;
        addr.max_ids.insert(author.to_string(), seq);
    }
    Ok(addr)
}

pub fn encode_op(op: &Op) -> Value {
    match op {
        Op::Insert(o) => Value::Array(vec![
            Value::from(TAG_INSERT),
            encode_id(&o.id),
            Value::String(o.text.clone()),
            encode_id(&o.parent_id),
            Value::from(o.side.as_i64()),
        ]),
        Op::Delete(o) => Value::Array(vec![
            Value::from(TAG_DELETE),
            encode_id(&o.id),
            encode_id(&o.target_id),
            Value::from(o.span),
        ]),
        Op::Format(o) => Value::Array(vec![
            Value::from(TAG_FORMAT),
            encode_id(&o.id),
            encode_id(&o.start_id),
            encode_id(&o.end_id),
            Value::Object(o.payload.clone()),
        ]),
        Op::Snapshot(o) => Value::Array(vec![
            Value::from(TAG_SNAPSHOT),
            encode_serialized(&o.document),
        ]),
        Op::Multi(o) => Value::Array(vec![
            Value::from(TAG_MULTI),
            encode_id(&op.id()),
            Value::Array(o.ops.iter().map(encode_op).collect()),
        ]),
        Op::Rewind(o) => Value::Array(vec![
            Value::from(TAG_REWIND),
            encode_id(&o.id),
            encode_address(&o.address),
            encode_address(&o.undo_address),
        ]),
        Op::Show(o) => Value::Array(vec![
            Value::from(TAG_SHOW),
            encode_id(&o.id),
            encode_id(&o.target_id),
            Value::from(o.span),
        ]),
    }
}

/// Decode one op row. Deprecated and unknown tags yield `Ok(None)` with
/// a warning so old histories still load.
pub fn decode_op(v: &Value) -> Result<Option<Op>, WireError> {
    let row = v.as_array().ok_or(WireError::InvalidOperation)?;
    if row.is_empty() {
        return Err(WireError::InvalidOperation);
    }
    let tag = row[0].as_u64().ok_or(WireError::InvalidOperation)?;

    let op = match tag {
        TAG_INSERT => {
            if row.len() != 5 {
                return Err(WireError::InvalidOperation);
            }
            let side_raw = row[4].as_i64().ok_or(WireError::InvalidOperation)?;
            Op::Insert(InsertOp {
                id: decode_id(&row[1])?,
                text: row[2]
                    .as_str()
                    .ok_or(WireError::InvalidOperation)?
                    .to_string(),
                parent_id: decode_id(&row[3])?,
                side: Side::from_i64(side_raw).ok_or(WireError::InvalidSide(side_raw))?,
            })
        }
        TAG_DELETE => {
            if !(3..=4).contains(&row.len()) {
                return Err(WireError::InvalidOperation);
            }
            Op::Delete(DeleteOp {
                id: decode_id(&row[1])?,
                target_id: decode_id(&row[2])?,
                span: match row.get(3) {
                    Some(s) => s.as_i64().ok_or(WireError::InvalidOperation)?,
                    None => 1,
                },
            })
        }
        TAG_FORMAT => {
            if row.len() != 5 {
                return Err(WireError::InvalidOperation);
            }
            Op::Format(FormatOp {
                id: decode_id(&row[1])?,
                start_id: decode_id(&row[2])?,
                end_id: decode_id(&row[3])?,
                payload: row[4]
                    .as_object()
                    .cloned()
                    .ok_or(WireError::InvalidOperation)?,
            })
        }
        TAG_SNAPSHOT => {
            if row.len() != 2 {
                return Err(WireError::InvalidOperation);
            }
            Op::Snapshot(SnapshotOp {
                id: Id::root(),
                document: decode_serialized(&row[1])?,
            })
        }
        TAG_MULTI => {
            if row.len() != 3 {
                return Err(WireError::InvalidOperation);
            }
            let rows = row[2].as_array().ok_or(WireError::InvalidOperation)?;
            let mut ops = Vec::with_capacity(rows.len());
            for r in rows {
                if let Some(op) = decode_op(r)? {
                    ops.push(op);
                }
            }
            Op::Multi(MultiOp { ops })
        }
        TAG_REWIND => {
            if row.len() != 4 {
                return Err(WireError::InvalidOperation);
            }
            Op::Rewind(RewindOp {
                id: decode_id(&row[1])?,
                address: decode_address(&row[2])?,
                undo_address: decode_address(&row[3])?,
            })
        }
        TAG_SHOW => {
            if row.len() != 4 {
                return Err(WireError::InvalidOperation);
            }
            Op::Show(ShowOp {
                id: decode_id(&row[1])?,
                target_id: decode_id(&row[2])?,
                span: row[3].as_i64().ok_or(WireError::InvalidOperation)?,
            })
        }
        other => {
            tracing::warn!(tag = other, "skipping op with deprecated or unknown tag");
            return Ok(None);
        }
    };
    Ok(Some(op))
}

pub fn encode_serialized(doc: &SerializedDoc) -> Value {
    let mut obj = Map::new();
    obj.insert(
        "version".to_string(),
        match &doc.version {
            Some(v) => Value::String(v.clone()),
            None => Value::Null,
        },
    );
    obj.insert(
        "ops".to_string(),
        Value::Array(doc.ops.iter().map(encode_op).collect()),
    );
    Value::Object(obj)
}

pub fn decode_serialized(v: &Value) -> Result<SerializedDoc, WireError> {
    let obj = v.as_object().ok_or(WireError::InvalidDocument)?;
    let version = match obj.get("version") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(_) => return Err(WireError::InvalidDocument),
    };
    let rows = obj
        .get("ops")
        .and_then(Value::as_array)
        .ok_or(WireError::InvalidDocument)?;
    let mut ops = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(op) = decode_op(row)? {
            ops.push(op);
        }
    }
    Ok(SerializedDoc { version, ops })
}

impl Doc {
    /// Current state as a versioned op list.
    pub fn serializable(&self) -> SerializedDoc {
        SerializedDoc {
            version: Some("v0".to_string()),
            ops: self.to_ops(),
        }
    }

    pub fn to_json(&self) -> String {
        encode_serialized(&self.serializable()).to_string()
    }

    /// Parse and replay a serialized document. Version-less documents
    /// are the legacy format and take the same replay path.
    pub fn from_json(author: impl Into<String>, data: &str) -> crate::error::Result<Doc> {
        let value: Value = serde_json::from_str(data).map_err(WireError::from)?;
        let serialized = decode_serialized(&value)?;
        let mut doc = Doc::new(author);
        doc.apply_serialized(&serialized);
        Ok(doc)
    }

    /// Bootstrap/compaction payload carrying this document's full state.
    pub fn new_snapshot_op(&self) -> SnapshotOp {
        SnapshotOp {
            id: Id::root(),
            document: self.serializable(),
        }
    }

    /// Independent copy built by replaying the export.
    pub fn deep_copy(&self) -> Doc {
        let mut out = Doc::new(self.author.clone());
        out.apply_serialized(&self.serializable());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_shape() {
        let id = Id::new("8cd8-dk", 3);
        assert_eq!(encode_id(&id).to_string(), r#"["8cd8-dk",3]"#);
        assert_eq!(decode_id(&encode_id(&id)).unwrap(), id);
    }

    #[test]
    fn insert_row_shape() {
        let op = Op::Insert(InsertOp {
            id: Id::new("8cd8-dk", 3),
            text: "H".to_string(),
            parent_id: Id::new("q", 1),
            side: Side::Right,
        });
        assert_eq!(
            encode_op(&op).to_string(),
            r#"[0,["8cd8-dk",3],"H",["q",1],1]"#
        );
        assert_eq!(decode_op(&encode_op(&op)).unwrap(), Some(op));
    }

    #[test]
    fn delete_span_defaults_to_one() {
        let v: Value = serde_json::from_str(r#"[1,["a",5],["b",0]]"#).unwrap();
        let Some(Op::Delete(op)) = decode_op(&v).unwrap() else {
            panic!("expected a delete");
        };
        assert_eq!(op.span, 1);
    }

    #[test]
    fn deprecated_tags_are_skipped() {
        for tag in [4, 5, 99] {
            let v: Value = serde_json::from_str(&format!(r#"[{tag},["a",0]]"#)).unwrap();
            assert_eq!(decode_op(&v).unwrap(), None);
        }
    }

    #[test]
    fn legacy_address_decodes() {
        let v: Value = serde_json::from_str(
            r#"{"startID":["root",0],"endID":["q",1],"maxIDs":[{"key":"a","value":7}]}"#,
        )
        .unwrap();
        let addr = decode_address(&v).unwrap();
        assert_eq!(addr.start_id, Id::root());
        assert_eq!(addr.end_id, Id::last());
        assert_eq!(addr.max_ids.get("a"), Some(&7));

        // The array shape round-trips; the object shape is import-only.
        let round = decode_address(&encode_address(&addr)).unwrap();
        assert_eq!(round, addr);
    }
}
