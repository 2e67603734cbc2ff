//! # Image Codec
//!
//! Single-file serialization of an engine: schema, payloads and (optionally)
//! field grids.
//!
//! ## Format
//!
//! ```text
//! Image (little-endian)
//! ├── magic: b"MYCO"
//! ├── version: u32
//! ├── width, height: u32
//! ├── flags: u32 (bit 0: field grids present)
//! ├── tables: u32 count
//! │   └── id: u32, name: str, columns: [str], foreign keys: [(str, u32)]
//! ├── payloads: u64 count
//! │   └── id: i64, table: u32, position: opt(f32, f32), dangling: u8,
//! │       fields: [(str, value)], references: [(str, u32, opt(i64), u8)]
//! └── grids (if flagged): signal, attractant, repellent, reinforcement,
//!     then u32 count of table signatures; each grid is
//!     decay/diffusion/max (f32) + width*height cells (f32)
//! ```
//!
//! Strings are u32-length-prefixed UTF-8. Values are a tag byte followed by
//! the payload for that tag. Only insertion order is ever iterated, so the
//! same state always encodes to the same bytes.

use crate::core::config::{grid_size_ok, FieldParams, MAX_GRID_CELLS};
use crate::core::schema::ForeignKeyDecl;
use crate::core::{Field, ForeignKey, MycoError, MycoResult, Payload, Position, Schema, Table, TableId, Value};
use crate::ports::PayloadStore;
use crate::swarm::{FieldSet, GridField};

/// File magic
pub const MAGIC: &[u8; 4] = b"MYCO";

/// Current format version
pub const FORMAT_VERSION: u32 = 1;

const FLAG_FIELDS: u32 = 1;

/// Everything read back from an image
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: usize,
    pub height: usize,
    pub schema: Schema,
    pub payloads: Vec<Payload>,
    pub fields: Option<FieldSet>,
}

// ============================================================================
// Encoding
// ============================================================================

fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_value(buf: &mut Vec<u8>, value: &Value) {
    put_u8(buf, value.tag());
    match value {
        Value::Null => {}
        Value::Integer(i) => put_i64(buf, *i),
        Value::Real(f) => buf.extend_from_slice(&f.to_le_bytes()),
        Value::Text(s) => put_str(buf, s),
    }
}

fn put_grid(buf: &mut Vec<u8>, grid: &GridField) {
    let params = grid.params();
    put_f32(buf, params.decay);
    put_f32(buf, params.diffusion);
    put_f32(buf, params.max);
    for v in grid.data() {
        put_f32(buf, *v);
    }
}

/// Serialize an engine state
pub fn encode(
    width: usize,
    height: usize,
    schema: &Schema,
    store: &dyn PayloadStore,
    fields: Option<&FieldSet>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    put_u32(&mut buf, FORMAT_VERSION);
    put_u32(&mut buf, width as u32);
    put_u32(&mut buf, height as u32);
    put_u32(&mut buf, if fields.is_some() { FLAG_FIELDS } else { 0 });

    put_u32(&mut buf, schema.len() as u32);
    for table in schema.tables() {
        put_u32(&mut buf, table.id.0);
        put_str(&mut buf, &table.name);
        put_u32(&mut buf, table.columns.len() as u32);
        for column in &table.columns {
            put_str(&mut buf, column);
        }
        put_u32(&mut buf, table.foreign_keys.len() as u32);
        for fk in &table.foreign_keys {
            put_str(&mut buf, &fk.column);
            put_u32(&mut buf, fk.parent.0);
        }
    }

    put_u64(&mut buf, store.len() as u64);
    for p in store.iter() {
        put_i64(&mut buf, p.id);
        put_u32(&mut buf, p.table.0);
        match p.position {
            Some(pos) => {
                put_u8(&mut buf, 1);
                put_f32(&mut buf, pos.x);
                put_f32(&mut buf, pos.y);
            }
            None => put_u8(&mut buf, 0),
        }
        put_u8(&mut buf, p.dangling as u8);
        put_u32(&mut buf, p.fields.len() as u32);
        for field in &p.fields {
            put_str(&mut buf, &field.name);
            put_value(&mut buf, &field.value);
        }
        put_u32(&mut buf, p.foreign_keys.len() as u32);
        for fk in &p.foreign_keys {
            put_str(&mut buf, &fk.column);
            put_u32(&mut buf, fk.parent_table.0);
            match fk.parent_id {
                Some(id) => {
                    put_u8(&mut buf, 1);
                    put_i64(&mut buf, id);
                }
                None => put_u8(&mut buf, 0),
            }
            put_u8(&mut buf, fk.settled as u8);
        }
    }

    if let Some(fields) = fields {
        put_grid(&mut buf, &fields.signal);
        put_grid(&mut buf, &fields.attractant);
        put_grid(&mut buf, &fields.repellent);
        put_grid(&mut buf, &fields.reinforcement);
        put_u32(&mut buf, fields.signatures.len() as u32);
        for sig in &fields.signatures {
            put_grid(&mut buf, sig);
        }
    }
    buf
}

// ============================================================================
// Decoding
// ============================================================================

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> MycoResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| MycoError::LoadFailure(format!("truncated image at byte {}", self.offset)))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> MycoResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> MycoResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn flag(&mut self) -> MycoResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(MycoError::LoadFailure(format!("bad flag byte {}", other))),
        }
    }

    fn u32(&mut self) -> MycoResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> MycoResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> MycoResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> MycoResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> MycoResult<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// A count that cannot exceed the bytes left (each item takes >= 1 byte)
    fn count(&mut self, wide: bool) -> MycoResult<usize> {
        let n = if wide { self.u64()? as usize } else { self.u32()? as usize };
        if n > self.data.len() - self.offset {
            return Err(MycoError::LoadFailure(format!("implausible count {}", n)));
        }
        Ok(n)
    }

    fn string(&mut self) -> MycoResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| MycoError::LoadFailure(format!("bad utf-8: {}", e)))
    }

    fn value(&mut self) -> MycoResult<Value> {
        match self.u8()? {
            0 => Ok(Value::Null),
            1 => Ok(Value::Integer(self.i64()?)),
            2 => Ok(Value::Real(self.f64()?)),
            3 => Ok(Value::Text(self.string()?)),
            tag => Err(MycoError::LoadFailure(format!("unknown value tag {}", tag))),
        }
    }

    fn grid(&mut self, width: usize, height: usize) -> MycoResult<GridField> {
        let params = FieldParams::new(self.f32()?, self.f32()?, self.f32()?);
        let cells = width * height;
        let mut data = Vec::with_capacity(cells.min(self.data.len() / 4));
        for _ in 0..cells {
            data.push(self.f32()?);
        }
        GridField::from_data(width, height, params, data)
            .ok_or_else(|| MycoError::LoadFailure("field grid size mismatch".into()))
    }
}

/// Deserialize an image
pub fn decode(bytes: &[u8]) -> MycoResult<DecodedImage> {
    let mut r = Reader { data: bytes, offset: 0 };
    if r.take(4).map_err(|_| MycoError::LoadFailure("not an image".into()))? != MAGIC {
        return Err(MycoError::LoadFailure("bad magic".into()));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(MycoError::VersionMismatch {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let width = r.u32()? as usize;
    let height = r.u32()? as usize;
    if width == 0 || height == 0 {
        return Err(MycoError::LoadFailure("zero grid size".into()));
    }
    if !grid_size_ok(width, height) {
        return Err(MycoError::LoadFailure(format!(
            "grid {}x{} exceeds {} cells",
            width, height, MAX_GRID_CELLS
        )));
    }
    let flags = r.u32()?;

    let mut schema = Schema::new();
    let table_count = r.count(false)?;
    for expected in 0..table_count {
        let id = r.u32()?;
        if id as usize != expected {
            return Err(MycoError::LoadFailure(format!("table id {} out of order", id)));
        }
        let mut table = Table::new(TableId(id), r.string()?);
        for _ in 0..r.count(false)? {
            table.columns.push(r.string()?);
        }
        for _ in 0..r.count(false)? {
            let column = r.string()?;
            let parent = TableId(r.u32()?);
            table.foreign_keys.push(ForeignKeyDecl { column, parent });
        }
        schema.push_table(table);
    }

    let payload_count = r.count(true)?;
    let mut payloads = Vec::with_capacity(payload_count);
    for _ in 0..payload_count {
        let id = r.i64()?;
        let table = TableId(r.u32()?);
        if schema.table(table).is_none() {
            return Err(MycoError::LoadFailure(format!("payload {} names unknown table {}", id, table)));
        }
        let position = if r.flag()? {
            Some(Position::new(r.f32()?, r.f32()?))
        } else {
            None
        };
        let dangling = r.flag()?;
        let mut fields = Vec::new();
        for _ in 0..r.count(false)? {
            let name = r.string()?;
            fields.push(Field::new(name, r.value()?));
        }
        let mut payload = Payload::new(table, id, fields);
        payload.position = position;
        payload.dangling = dangling;
        for _ in 0..r.count(false)? {
            let column = r.string()?;
            let parent_table = TableId(r.u32()?);
            let parent_id = if r.flag()? { Some(r.i64()?) } else { None };
            let mut fk = ForeignKey::new(column, parent_table, parent_id);
            fk.settled = r.flag()?;
            payload.foreign_keys.push(fk);
        }
        payloads.push(payload);
    }

    let fields = if flags & FLAG_FIELDS != 0 {
        let signal = r.grid(width, height)?;
        let attractant = r.grid(width, height)?;
        let repellent = r.grid(width, height)?;
        let reinforcement = r.grid(width, height)?;
        let mut signatures = Vec::new();
        for _ in 0..r.count(false)? {
            signatures.push(r.grid(width, height)?);
        }
        Some(FieldSet {
            signal,
            attractant,
            repellent,
            reinforcement,
            signatures,
            density: GridField::new(width, height, FieldParams::new(0.0, 0.0, f32::MAX)),
        })
    } else {
        None
    };

    if r.offset != bytes.len() {
        return Err(MycoError::LoadFailure(format!(
            "{} trailing bytes",
            bytes.len() - r.offset
        )));
    }

    Ok(DecodedImage {
        width,
        height,
        schema,
        payloads,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryStore;
    use crate::core::config::FieldConfig;

    fn sample() -> (Schema, MemoryStore) {
        let mut schema = Schema::new();
        let artist = schema.add_table("Artist");
        let album = schema.add_table("Album");
        schema.table_mut(artist).unwrap().columns = vec!["ArtistId".into(), "Name".into()];
        schema.table_mut(album).unwrap().columns = vec!["AlbumId".into(), "Title".into(), "ArtistId".into()];
        schema.table_mut(album).unwrap().declare_foreign_key("ArtistId", artist);

        let mut store = MemoryStore::new();
        let mut a = Payload::new(artist, 5, vec![Field::new("ArtistId", 5i64), Field::new("Name", "AC/DC")]);
        a.position = Some(Position::new(3.5, 7.25));
        store.insert(a);
        let mut b = Payload::new(
            album,
            1,
            vec![
                Field::new("AlbumId", 1i64),
                Field::new("Title", "Let There Be Rock"),
                Field::new("Price", 0.99),
                Field::new("Note", Value::Null),
            ],
        );
        let mut fk = ForeignKey::new("ArtistId", artist, Some(5));
        fk.settled = true;
        b.foreign_keys.push(fk);
        b.foreign_keys.push(ForeignKey::new("GenreId", artist, None));
        b.dangling = true;
        store.insert(b);
        (schema, store)
    }

    #[test]
    fn test_round_trip() {
        let (schema, store) = sample();
        let bytes = encode(16, 16, &schema, &store, None);
        let image = decode(&bytes).unwrap();

        assert_eq!((image.width, image.height), (16, 16));
        assert_eq!(image.schema, schema);
        let original: Vec<Payload> = store.iter().cloned().collect();
        assert_eq!(image.payloads, original);
        assert!(image.fields.is_none());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let (schema, store) = sample();
        let first = encode(16, 16, &schema, &store, None);
        assert_eq!(first, encode(16, 16, &schema, &store, None));

        let image = decode(&first).unwrap();
        let mut again = MemoryStore::new();
        for p in image.payloads {
            again.insert(p);
        }
        assert_eq!(encode(16, 16, &image.schema, &again, None), first);
    }

    #[test]
    fn test_fields_round_trip() {
        let (schema, store) = sample();
        let mut fields = FieldSet::new(4, 4, 2, &FieldConfig::default());
        fields.signal.deposit(Position::new(1.0, 2.0), 3.0);
        fields.signatures[1].deposit(Position::new(3.0, 3.0), 1.5);

        let bytes = encode(4, 4, &schema, &store, Some(&fields));
        let decoded = decode(&bytes).unwrap().fields.unwrap();
        assert_eq!(decoded.signal, fields.signal);
        assert_eq!(decoded.signatures, fields.signatures);
        assert_eq!(decoded.reinforcement.params(), fields.reinforcement.params());
    }

    #[test]
    fn test_bad_magic() {
        let err = decode(b"NOPE\x01\x00\x00\x00").unwrap_err();
        assert!(matches!(err, MycoError::LoadFailure(_)));
        assert!(matches!(decode(b"MY").unwrap_err(), MycoError::LoadFailure(_)));
    }

    #[test]
    fn test_version_mismatch() {
        let (schema, store) = sample();
        let mut bytes = encode(8, 8, &schema, &store, None);
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, MycoError::VersionMismatch { found: 99, expected: FORMAT_VERSION }));
        assert!(err.is_load_failure());
    }

    #[test]
    fn test_implausible_grid_size() {
        let header = |width: u32, height: u32| {
            let mut bytes = MAGIC.to_vec();
            // version, size, flags, no tables, no payloads (u64)
            for word in [FORMAT_VERSION, width, height, 0, 0, 0, 0] {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
            bytes
        };
        for (w, h) in [(200_000, 200_000), (u32::MAX, u32::MAX), (4097, 1024)] {
            let err = decode(&header(w, h)).unwrap_err();
            assert!(matches!(&err, MycoError::LoadFailure(msg) if msg.contains("exceeds")), "{w}x{h}: {err}");
        }
        // An empty image at the cap is still fine
        assert_eq!(decode(&header(2048, 2048)).unwrap().width, 2048);
    }

    #[test]
    fn test_truncated_and_trailing() {
        let (schema, store) = sample();
        let bytes = encode(8, 8, &schema, &store, None);
        for cut in [10, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(decode(&bytes[..cut]), Err(MycoError::LoadFailure(_))));
        }
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(decode(&longer), Err(MycoError::LoadFailure(_))));
    }
}
