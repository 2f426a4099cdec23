//! Persisted catalog image: the logical and allocation layers only.
//!
//! Layout: magic, version, generation, id counter, then one section per
//! entity kind. Every record is length-prefixed; fields are written in
//! declared order, ids as 64-bit little-endian, strings as UTF-8 with a
//! 32-bit length prefix. Bytes after the last known field of a record come
//! from a newer format: they are retained and written back verbatim.

use crate::entities::*;
use crate::{CatalogError, Snapshot};
use polystore_primitives::{
    AdapterId, AllocationId, ColumnId, KeyId, NamespaceId, PartitionId, PlacementId, TableId,
};
use polystore_types::{Charset, Coercibility, Collation, Field, PolyType, PolyValue, Type};

const MAGIC: &[u8; 4] = b"PLYC";
const VERSION: u32 = 1;

const SEC_NAMESPACES: u8 = 1;
const SEC_TABLES: u8 = 2;
const SEC_KEYS: u8 = 3;
const SEC_PLACEMENTS: u8 = 4;
const SEC_ALLOC_COLUMNS: u8 = 5;
const SEC_PARTITIONS: u8 = 6;
const SEC_ALLOCATIONS: u8 = 7;

pub fn serialize(snapshot: &Snapshot, next_id: u64) -> Vec<u8> {
    let mut w = Writer::default();
    w.bytes(MAGIC);
    w.u32(VERSION);
    w.u64(snapshot.generation);
    w.u64(next_id);

    w.section(SEC_NAMESPACES, snapshot.namespaces.len(), |w| {
        for ns in snapshot.namespaces.values() {
            w.record(snapshot, SEC_NAMESPACES, ns.id.0, |w| {
                w.u64(ns.id.0);
                w.str(&ns.name);
                w.u8(ns.model.to_u8());
                w.u8(ns.case_sensitive as u8);
            });
        }
    });

    w.section(SEC_TABLES, snapshot.tables.len(), |w| {
        for t in snapshot.tables.values() {
            w.record(snapshot, SEC_TABLES, t.id.0, |w| {
                w.u64(t.id.0);
                w.u64(t.namespace_id.0);
                w.str(&t.name);
                w.opt_u64(t.primary_key.map(|k| k.0));
                w.u32(t.columns.len() as u32);
                for c in &t.columns {
                    w.u64(c.id.0);
                    w.str(&c.name);
                    w.u32(c.position);
                    w.ty(&c.ty);
                    w.u8(c.nullable as u8);
                    match &c.default {
                        Some(v) => {
                            w.u8(1);
                            w.value(v);
                        }
                        None => w.u8(0),
                    }
                }
            });
        }
    });

    w.section(SEC_KEYS, snapshot.keys.len(), |w| {
        for k in snapshot.keys.values() {
            w.record(snapshot, SEC_KEYS, k.id.0, |w| {
                w.u64(k.id.0);
                w.u64(k.table_id.0);
                w.u8(k.kind.to_u8());
                w.u32(k.column_ids.len() as u32);
                for c in &k.column_ids {
                    w.u64(c.0);
                }
            });
        }
    });

    w.section(SEC_PLACEMENTS, snapshot.placements.len(), |w| {
        for p in snapshot.placements.values() {
            w.record(snapshot, SEC_PLACEMENTS, p.id.0, |w| {
                w.u64(p.id.0);
                w.u64(p.table_id.0);
                w.u64(p.adapter_id.0);
            });
        }
    });

    w.section(SEC_ALLOC_COLUMNS, snapshot.allocation_columns.len(), |w| {
        for c in &snapshot.allocation_columns {
            w.record(snapshot, SEC_ALLOC_COLUMNS, alloc_col_key(c), |w| {
                w.u64(c.placement_id.0);
                w.u64(c.column_id.0);
                w.u32(c.position);
                w.u8(matches!(c.placement_type, PlacementType::Automatic) as u8);
            });
        }
    });

    w.section(SEC_PARTITIONS, snapshot.partitions.len(), |w| {
        for p in snapshot.partitions.values() {
            w.record(snapshot, SEC_PARTITIONS, p.id.0, |w| {
                w.u64(p.id.0);
                w.u64(p.table_id.0);
                w.u8(p.kind.to_u8());
                w.str(&p.qualifier);
            });
        }
    });

    w.section(SEC_ALLOCATIONS, snapshot.allocations.len(), |w| {
        for a in snapshot.allocations.values() {
            w.record(snapshot, SEC_ALLOCATIONS, a.id.0, |w| {
                w.u64(a.id.0);
                w.u64(a.placement_id.0);
                w.u64(a.partition_id.0);
                w.u64(a.adapter_id.0);
                w.u64(a.logical_id.0);
            });
        }
    });

    w.buf
}

pub fn deserialize(bytes: &[u8]) -> Result<(Snapshot, u64), CatalogError> {
    let mut r = Reader::new(bytes);
    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(CatalogError::Corrupt("bad magic".into()));
    }
    let version = r.u32()?;
    if version > VERSION {
        return Err(CatalogError::Corrupt(format!("image version {version} is newer than {VERSION}")));
    }
    let mut snapshot = Snapshot {
        generation: r.u64()?,
        ..Snapshot::default()
    };
    let next_id = r.u64()?;

    while !r.at_end() {
        let tag = r.u8()?;
        let count = r.u32()?;
        for _ in 0..count {
            let len = r.u32()? as usize;
            let mut rec = Reader::new(r.take(len)?);
            match tag {
                SEC_NAMESPACES => {
                    let id = NamespaceId(rec.u64()?);
                    let name = rec.str()?;
                    let model = DataModel::from_u8(rec.u8()?)
                        .ok_or_else(|| CatalogError::Corrupt("bad data model".into()))?;
                    let case_sensitive = rec.u8()? != 0;
                    keep_tail(&mut snapshot, SEC_NAMESPACES, id.0, &rec);
                    snapshot
                        .namespaces
                        .insert(id, LogicalNamespace { id, name, model, case_sensitive });
                }
                SEC_TABLES => {
                    let id = TableId(rec.u64()?);
                    let namespace_id = NamespaceId(rec.u64()?);
                    let name = rec.str()?;
                    let primary_key = rec.opt_u64()?.map(KeyId);
                    let n = rec.u32()?;
                    let mut columns = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        let col_id = ColumnId(rec.u64()?);
                        let col_name = rec.str()?;
                        let position = rec.u32()?;
                        let ty = rec.ty()?;
                        let nullable = rec.u8()? != 0;
                        let default = if rec.u8()? != 0 { Some(rec.value()?) } else { None };
                        columns.push(LogicalColumn {
                            id: col_id,
                            name: col_name,
                            position,
                            ty,
                            nullable,
                            default,
                        });
                    }
                    keep_tail(&mut snapshot, SEC_TABLES, id.0, &rec);
                    snapshot
                        .tables
                        .insert(id, LogicalTable { id, namespace_id, name, columns, primary_key });
                }
                SEC_KEYS => {
                    let id = KeyId(rec.u64()?);
                    let table_id = TableId(rec.u64()?);
                    let kind = KeyKind::from_u8(rec.u8()?)
                        .ok_or_else(|| CatalogError::Corrupt("bad key kind".into()))?;
                    let n = rec.u32()?;
                    let mut column_ids = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        column_ids.push(ColumnId(rec.u64()?));
                    }
                    keep_tail(&mut snapshot, SEC_KEYS, id.0, &rec);
                    snapshot.keys.insert(id, CatalogKey { id, table_id, column_ids, kind });
                }
                SEC_PLACEMENTS => {
                    let id = PlacementId(rec.u64()?);
                    let table_id = TableId(rec.u64()?);
                    let adapter_id = AdapterId(rec.u64()?);
                    keep_tail(&mut snapshot, SEC_PLACEMENTS, id.0, &rec);
                    snapshot.placements.insert(id, Placement { id, table_id, adapter_id });
                }
                SEC_ALLOC_COLUMNS => {
                    let placement_id = PlacementId(rec.u64()?);
                    let column_id = ColumnId(rec.u64()?);
                    let position = rec.u32()?;
                    let placement_type = if rec.u8()? != 0 {
                        PlacementType::Automatic
                    } else {
                        PlacementType::Manual
                    };
                    let col = AllocationColumn { placement_id, column_id, position, placement_type };
                    keep_tail(&mut snapshot, SEC_ALLOC_COLUMNS, alloc_col_key(&col), &rec);
                    snapshot.allocation_columns.push(col);
                }
                SEC_PARTITIONS => {
                    let id = PartitionId(rec.u64()?);
                    let table_id = TableId(rec.u64()?);
                    let kind = PartitionKind::from_u8(rec.u8()?)
                        .ok_or_else(|| CatalogError::Corrupt("bad partition kind".into()))?;
                    let qualifier = rec.str()?;
                    keep_tail(&mut snapshot, SEC_PARTITIONS, id.0, &rec);
                    snapshot.partitions.insert(id, Partition { id, table_id, kind, qualifier });
                }
                SEC_ALLOCATIONS => {
                    let id = AllocationId(rec.u64()?);
                    let placement_id = PlacementId(rec.u64()?);
                    let partition_id = PartitionId(rec.u64()?);
                    let adapter_id = AdapterId(rec.u64()?);
                    let logical_id = TableId(rec.u64()?);
                    keep_tail(&mut snapshot, SEC_ALLOCATIONS, id.0, &rec);
                    snapshot.allocations.insert(
                        id,
                        AllocationTable { id, placement_id, partition_id, adapter_id, logical_id },
                    );
                }
                other => return Err(CatalogError::Corrupt(format!("unknown section tag {other}"))),
            }
        }
    }
    Ok((snapshot, next_id))
}

/// Stable tail key for allocation columns, which carry no id of their own.
fn alloc_col_key(c: &AllocationColumn) -> u64 {
    (c.placement_id.0 << 32) | (c.column_id.0 & 0xffff_ffff)
}

fn keep_tail(snapshot: &mut Snapshot, section: u8, id: u64, rec: &Reader<'_>) {
    let rest = rec.rest();
    if !rest.is_empty() {
        snapshot.unknown_tails.insert((section, id), rest.into());
    }
}

// ---------------------------------------------------------------- writer

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn opt_u64(&mut self, v: Option<u64>) {
        match v {
            Some(v) => {
                self.u8(1);
                self.u64(v);
            }
            None => self.u8(0),
        }
    }

    fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn str(&mut self, v: &str) {
        self.u32(v.len() as u32);
        self.bytes(v.as_bytes());
    }

    fn section(&mut self, tag: u8, count: usize, body: impl FnOnce(&mut Writer)) {
        self.u8(tag);
        self.u32(count as u32);
        body(self);
    }

    /// Writes the known fields via `body`, appends any preserved
    /// newer-format tail, and length-prefixes the whole record.
    fn record(&mut self, snapshot: &Snapshot, section: u8, id: u64, body: impl FnOnce(&mut Writer)) {
        let mut inner = Writer::default();
        body(&mut inner);
        if let Some(tail) = snapshot.unknown_tails.get(&(section, id)) {
            inner.bytes(tail);
        }
        self.u32(inner.buf.len() as u32);
        self.buf.extend(inner.buf);
    }

    fn ty(&mut self, ty: &Type) {
        self.u8(type_tag(ty.tag));
        self.u8(ty.nullable as u8);
        match ty.precision {
            Some(p) => {
                self.u8(1);
                self.u32(p);
            }
            None => self.u8(0),
        }
        match ty.scale {
            Some(s) => {
                self.u8(1);
                self.u32(s);
            }
            None => self.u8(0),
        }
        self.u8(match ty.charset {
            None => 0,
            Some(Charset::Utf8) => 1,
            Some(Charset::Latin1) => 2,
        });
        match &ty.collation {
            Some(c) => {
                self.u8(1);
                self.str(&c.name);
                self.u8(match c.coercibility {
                    Coercibility::None => 0,
                    Coercibility::Coercible => 1,
                    Coercibility::Implicit => 2,
                    Coercibility::Explicit => 3,
                });
            }
            None => self.u8(0),
        }
        match &ty.element {
            Some(e) => {
                self.u8(1);
                self.ty(e);
            }
            None => self.u8(0),
        }
        self.u32(ty.fields.len() as u32);
        for f in &ty.fields {
            self.str(&f.name);
            self.ty(&f.ty);
        }
    }

    fn value(&mut self, v: &PolyValue) {
        match v {
            PolyValue::Null => self.u8(0),
            PolyValue::Bool(b) => {
                self.u8(1);
                self.u8(*b as u8);
            }
            PolyValue::Int(i) => {
                self.u8(2);
                self.u64(*i as u64);
            }
            PolyValue::Decimal(m, s) => {
                self.u8(3);
                self.bytes(&m.to_le_bytes());
                self.u32(*s);
            }
            PolyValue::Float(f) => {
                self.u8(4);
                self.u64(f.to_bits());
            }
            PolyValue::Str(s) => {
                self.u8(5);
                self.str(s);
            }
            PolyValue::Date(d) => {
                self.u8(6);
                self.u32(*d as u32);
            }
            PolyValue::Time(t) => {
                self.u8(7);
                self.u64(*t as u64);
            }
            PolyValue::Timestamp(t) => {
                self.u8(8);
                self.u64(*t as u64);
            }
            PolyValue::IntervalYm(m) => {
                self.u8(9);
                self.u32(*m as u32);
            }
            PolyValue::IntervalDs(ms) => {
                self.u8(10);
                self.u64(*ms as u64);
            }
            PolyValue::Array(items) => {
                self.u8(11);
                self.u32(items.len() as u32);
                for item in items {
                    self.value(item);
                }
            }
            PolyValue::Row(items) => {
                self.u8(12);
                self.u32(items.len() as u32);
                for item in items {
                    self.value(item);
                }
            }
        }
    }
}

// ---------------------------------------------------------------- reader

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CatalogError> {
        if self.pos + n > self.buf.len() {
            return Err(CatalogError::Corrupt("unexpected end of image".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CatalogError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CatalogError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, CatalogError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn opt_u64(&mut self) -> Result<Option<u64>, CatalogError> {
        if self.u8()? != 0 {
            Ok(Some(self.u64()?))
        } else {
            Ok(None)
        }
    }

    fn str(&mut self) -> Result<String, CatalogError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CatalogError::Corrupt("invalid UTF-8".into()))
    }

    fn ty(&mut self) -> Result<Type, CatalogError> {
        let tag = type_from_tag(self.u8()?)?;
        let mut ty = Type::of(tag);
        ty.nullable = self.u8()? != 0;
        ty.precision = if self.u8()? != 0 { Some(self.u32()?) } else { None };
        ty.scale = if self.u8()? != 0 { Some(self.u32()?) } else { None };
        ty.charset = match self.u8()? {
            0 => None,
            1 => Some(Charset::Utf8),
            2 => Some(Charset::Latin1),
            other => return Err(CatalogError::Corrupt(format!("bad charset tag {other}"))),
        };
        ty.collation = if self.u8()? != 0 {
            let name = self.str()?;
            let coercibility = match self.u8()? {
                0 => Coercibility::None,
                1 => Coercibility::Coercible,
                2 => Coercibility::Implicit,
                3 => Coercibility::Explicit,
                other => return Err(CatalogError::Corrupt(format!("bad coercibility {other}"))),
            };
            Some(Collation { name: name.into(), coercibility })
        } else {
            None
        };
        ty.element = if self.u8()? != 0 {
            Some(Box::new(self.ty()?))
        } else {
            None
        };
        let n = self.u32()?;
        let mut fields = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let name = self.str()?;
            fields.push(Field::new(name, self.ty()?));
        }
        ty.fields = fields;
        Ok(ty)
    }

    fn value(&mut self) -> Result<PolyValue, CatalogError> {
        Ok(match self.u8()? {
            0 => PolyValue::Null,
            1 => PolyValue::Bool(self.u8()? != 0),
            2 => PolyValue::Int(self.u64()? as i64),
            3 => {
                let m = i128::from_le_bytes(self.take(16)?.try_into().unwrap());
                PolyValue::Decimal(m, self.u32()?)
            }
            4 => PolyValue::Float(f64::from_bits(self.u64()?)),
            5 => PolyValue::Str(self.str()?.into()),
            6 => PolyValue::Date(self.u32()? as i32),
            7 => PolyValue::Time(self.u64()? as i64),
            8 => PolyValue::Timestamp(self.u64()? as i64),
            9 => PolyValue::IntervalYm(self.u32()? as i32),
            10 => PolyValue::IntervalDs(self.u64()? as i64),
            11 => {
                let n = self.u32()?;
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(self.value()?);
                }
                PolyValue::Array(items)
            }
            12 => {
                let n = self.u32()?;
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(self.value()?);
                }
                PolyValue::Row(items)
            }
            other => return Err(CatalogError::Corrupt(format!("bad value tag {other}"))),
        })
    }
}

fn type_tag(tag: PolyType) -> u8 {
    match tag {
        PolyType::Boolean => 0,
        PolyType::TinyInt => 1,
        PolyType::SmallInt => 2,
        PolyType::Integer => 3,
        PolyType::BigInt => 4,
        PolyType::Decimal => 5,
        PolyType::Real => 6,
        PolyType::Double => 7,
        PolyType::Char => 8,
        PolyType::VarChar => 9,
        PolyType::Date => 10,
        PolyType::Time => 11,
        PolyType::Timestamp => 12,
        PolyType::IntervalYearMonth => 13,
        PolyType::IntervalDaySecond => 14,
        PolyType::Array => 15,
        PolyType::Multiset => 16,
        PolyType::Row => 17,
        PolyType::Any => 18,
        PolyType::Null => 19,
    }
}

fn type_from_tag(tag: u8) -> Result<PolyType, CatalogError> {
    Ok(match tag {
        0 => PolyType::Boolean,
        1 => PolyType::TinyInt,
        2 => PolyType::SmallInt,
        3 => PolyType::Integer,
        4 => PolyType::BigInt,
        5 => PolyType::Decimal,
        6 => PolyType::Real,
        7 => PolyType::Double,
        8 => PolyType::Char,
        9 => PolyType::VarChar,
        10 => PolyType::Date,
        11 => PolyType::Time,
        12 => PolyType::Timestamp,
        13 => PolyType::IntervalYearMonth,
        14 => PolyType::IntervalDaySecond,
        15 => PolyType::Array,
        16 => PolyType::Multiset,
        17 => PolyType::Row,
        18 => PolyType::Any,
        19 => PolyType::Null,
        other => return Err(CatalogError::Corrupt(format!("bad type tag {other}"))),
    })
}
