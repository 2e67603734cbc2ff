//! # C ABI
//!
//! `extern "C"` surface over [`MycoDb`] for the C client and the shell.
//!
//! Conventions:
//! - A handle is an opaque `*mut MycoDb` from `myco_db_create`.
//! - Strings in are NUL-terminated UTF-8.
//! - Strings out go into caller buffers, always NUL-terminated and truncated
//!   to fit. Truncation records `BufferTooSmall` as the last error.
//! - A null handle makes every call fail (`false` / `-1`).
//! - Failures return `false` / `-1` and set the handle's last error.
//!
//! Payload indices are positions in the combined view (base store plus
//! pending changes).

use std::ffi::{c_char, CStr};
use std::path::Path;

use tracing::warn;

use crate::core::{MycoError, Position, Value};
use crate::engine::MycoDb;

/// Payload summary returned by `myco_db_get_payload`.
/// `table_id == -1` marks an index out of range.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MycoPayloadInfo {
    pub id: i64,
    pub table_id: i32,
    /// NaN when the payload has no position yet
    pub x: f32,
    pub y: f32,
    pub field_count: i32,
    pub fk_count: i32,
}

impl MycoPayloadInfo {
    const MISSING: Self = Self {
        id: -1,
        table_id: -1,
        x: f32::NAN,
        y: f32::NAN,
        field_count: 0,
        fk_count: 0,
    };
}

// ============================================================================
// Helpers
// ============================================================================

unsafe fn handle<'a>(db: *mut MycoDb) -> Option<&'a mut MycoDb> {
    db.as_mut()
}

/// Borrow a C string argument, recording an error when it is null or not UTF-8
unsafe fn arg<'a>(db: &mut MycoDb, ptr: *const c_char, what: &str) -> Option<&'a str> {
    if ptr.is_null() {
        db.set_last_error(&MycoError::MalformedQuery(format!("{} is null", what)));
        return None;
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            db.set_last_error(&MycoError::MalformedQuery(format!("{} is not valid UTF-8", what)));
            None
        }
    }
}

/// Copy `text` into a caller buffer. Returns the bytes written (without the
/// NUL) or -1 when there is no room at all.
unsafe fn write_text(db: Option<&mut MycoDb>, text: &str, out: *mut c_char, size: usize) -> i32 {
    if out.is_null() || size == 0 {
        return -1;
    }
    let bytes = text.as_bytes();
    let mut n = bytes.len().min(size - 1);
    // Never cut a UTF-8 sequence in half
    while !text.is_char_boundary(n) {
        n -= 1;
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), out as *mut u8, n);
    *out.add(n) = 0;
    if n < bytes.len() {
        warn!(needed = bytes.len() + 1, capacity = size, "Output truncated");
        if let Some(db) = db {
            db.set_last_error(&MycoError::BufferTooSmall {
                needed: bytes.len() + 1,
                capacity: size,
            });
        }
    }
    n as i32
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn table_name(db: &MycoDb, table_id: i32) -> Option<String> {
    let id = u32::try_from(table_id).ok()?;
    db.schema().name(crate::core::TableId(id)).map(str::to_string)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create an empty engine. Never returns null in practice; callers should
/// still check.
#[no_mangle]
pub extern "C" fn myco_db_create() -> *mut MycoDb {
    Box::into_raw(Box::new(MycoDb::new()))
}

/// # Safety
/// `db` must come from `myco_db_create` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn myco_db_destroy(db: *mut MycoDb) {
    if !db.is_null() {
        drop(Box::from_raw(db));
    }
}

/// Copy the last error message into `out`. An empty string means no error.
///
/// # Safety
/// `db` is null or a live handle; `out` points to `size` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_last_error(db: *mut MycoDb, out: *mut c_char, size: usize) -> i32 {
    match handle(db) {
        Some(db) => {
            let message = db.last_error().unwrap_or("").to_string();
            write_text(None, &message, out, size)
        }
        None => write_text(None, &MycoError::InvalidHandle.to_string(), out, size),
    }
}

// ============================================================================
// Persistence and ingestion
// ============================================================================

/// # Safety
/// `db` is null or a live handle; `path` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn myco_db_load_image(db: *mut MycoDb, path: *const c_char) -> bool {
    let Some(db) = handle(db) else { return false };
    let Some(path) = arg(db, path, "path") else { return false };
    db.load(Path::new(path)).is_ok()
}

/// # Safety
/// `db` is null or a live handle; `path` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn myco_db_save_image(db: *mut MycoDb, path: *const c_char) -> bool {
    let Some(db) = handle(db) else { return false };
    let Some(path) = arg(db, path, "path") else { return false };
    db.save(Path::new(path)).is_ok()
}

/// Replace the engine state with a SQL dump. `rules` may be null. Returns
/// the number of payloads placed by the swarm.
///
/// # Safety
/// `db` is null or a live handle; `dump` and a non-null `rules` are
/// NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn myco_db_ingest_sql(db: *mut MycoDb, dump: *const c_char, rules: *const c_char) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    let Some(dump) = arg(db, dump, "dump path") else { return -1 };
    let rules = if rules.is_null() {
        None
    } else {
        match arg(db, rules, "rules path") {
            Some(r) => Some(Path::new(r)),
            None => return -1,
        }
    };
    match db.ingest_sql(Path::new(dump), rules) {
        Ok(report) => count(report.placed),
        Err(_) => -1,
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Primary-key lookup without a center. Returns the hit count.
///
/// # Safety
/// `db` is null or a live handle; `table` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn myco_db_query_by_id(db: *mut MycoDb, table: *const c_char, id: i64, radius: f32) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    let Some(table) = arg(db, table, "table") else { return -1 };
    db.query_by_id(table, id, radius, None).map_or(-1, |rs| count(rs.len()))
}

/// Column-equality lookup without a center. `value` is parsed like a SQL
/// literal (quotes optional).
///
/// # Safety
/// `db` is null or a live handle; string arguments are NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn myco_db_query_by_column(
    db: *mut MycoDb,
    table: *const c_char,
    column: *const c_char,
    value: *const c_char,
    radius: f32,
) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    let Some(table) = arg(db, table, "table") else { return -1 };
    let Some(column) = arg(db, column, "column") else { return -1 };
    let Some(value) = arg(db, value, "value") else { return -1 };
    db.query_by_column(table, column, &Value::parse_loose(value), radius, None)
        .map_or(-1, |rs| count(rs.len()))
}

/// Primary-key lookup restricted to the circle at (`x`, `y`).
///
/// # Safety
/// `db` is null or a live handle; `table` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn myco_db_query_by_id_focused(
    db: *mut MycoDb,
    table: *const c_char,
    id: i64,
    x: f32,
    y: f32,
    radius: f32,
) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    let Some(table) = arg(db, table, "table") else { return -1 };
    db.query_by_id(table, id, radius, Some(Position::new(x, y)))
        .map_or(-1, |rs| count(rs.len()))
}

/// Column-equality lookup restricted to the circle at (`x`, `y`).
///
/// # Safety
/// `db` is null or a live handle; string arguments are NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn myco_db_query_by_column_focused(
    db: *mut MycoDb,
    table: *const c_char,
    column: *const c_char,
    value: *const c_char,
    x: f32,
    y: f32,
    radius: f32,
) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    let Some(table) = arg(db, table, "table") else { return -1 };
    let Some(column) = arg(db, column, "column") else { return -1 };
    let Some(value) = arg(db, value, "value") else { return -1 };
    db.query_by_column(table, column, &Value::parse_loose(value), radius, Some(Position::new(x, y)))
        .map_or(-1, |rs| count(rs.len()))
}

/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_result_count(db: *mut MycoDb) -> i32 {
    handle(db).map_or(-1, |db| count(db.result_count()))
}

/// Copy up to `max` result indices into `out`. Returns the number written.
///
/// # Safety
/// `db` is null or a live handle; `out` points to `max` writable `i32`s.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_result_indices(db: *mut MycoDb, out: *mut i32, max: i32) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    if out.is_null() || max < 0 {
        return -1;
    }
    let indices = db.result_indices();
    let n = indices.len().min(max as usize);
    for (i, index) in indices.iter().take(n).enumerate() {
        *out.add(i) = count(*index);
    }
    count(n)
}

/// View index of the first payload with this id, or -1.
///
/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_find_payload_by_id(db: *mut MycoDb, id: i64) -> i32 {
    handle(db)
        .and_then(|db| db.find_payload_by_id(id, None))
        .map_or(-1, count)
}

// ============================================================================
// Tables and payloads
// ============================================================================

/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_table_count(db: *mut MycoDb) -> i32 {
    handle(db).map_or(-1, |db| count(db.schema().len()))
}

/// # Safety
/// `db` is null or a live handle; `out` points to `size` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_table_name(db: *mut MycoDb, table_id: i32, out: *mut c_char, size: usize) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    match table_name(db, table_id) {
        Some(name) => write_text(Some(db), &name, out, size),
        None => {
            db.set_last_error(&MycoError::UnknownTable(format!("t{}", table_id)));
            -1
        }
    }
}

/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_payload_count(db: *mut MycoDb) -> i32 {
    handle(db).map_or(-1, |db| count(db.payload_count()))
}

/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_payload(db: *mut MycoDb, index: i32) -> MycoPayloadInfo {
    let Some(db) = handle(db) else {
        return MycoPayloadInfo::MISSING;
    };
    let payload = usize::try_from(index).ok().and_then(|i| db.payload_at(i));
    match payload {
        Some(p) => MycoPayloadInfo {
            id: p.id,
            table_id: p.table.0 as i32,
            x: p.position.map_or(f32::NAN, |pos| pos.x),
            y: p.position.map_or(f32::NAN, |pos| pos.y),
            field_count: count(p.fields.len()),
            fk_count: count(p.foreign_keys.len()),
        },
        None => {
            db.set_last_error(&MycoError::PayloadNotFound(format!("index {}", index)));
            MycoPayloadInfo::MISSING
        }
    }
}

/// Copy the payload's fields as `name=value` pairs joined by `; `.
///
/// # Safety
/// `db` is null or a live handle; `out` points to `size` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn myco_db_get_payload_raw(db: *mut MycoDb, index: i32, out: *mut c_char, size: usize) -> i32 {
    let Some(db) = handle(db) else { return -1 };
    let payload = usize::try_from(index).ok().and_then(|i| db.payload_at(i));
    match payload {
        Some(p) => write_text(Some(db), &p.raw_text(), out, size),
        None => {
            db.set_last_error(&MycoError::PayloadNotFound(format!("index {}", index)));
            -1
        }
    }
}

// ============================================================================
// Session and delta
// ============================================================================

/// Focus on the first payload with this id.
///
/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_goto(db: *mut MycoDb, id: i64) -> bool {
    handle(db).is_some_and(|db| db.goto(id, None).is_ok())
}

/// Merge pending changes. Returns the number of records applied.
///
/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_merge(db: *mut MycoDb) -> i32 {
    handle(db).map_or(-1, |db| count(db.merge().applied))
}

/// # Safety
/// `db` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn myco_db_undo(db: *mut MycoDb) -> bool {
    handle(db).is_some_and(|db| db.undo().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rules::IngestRules;
    use crate::adapters::sql_dump::parse_sql_dump;
    use crate::core::config::MycoConfig;
    use std::ffi::CString;
    use std::ptr;

    const DUMP: &str = r#"
        CREATE TABLE Artist (ArtistId INTEGER, Name TEXT);
        CREATE TABLE Album (AlbumId INTEGER, Title TEXT, ArtistId INTEGER);
        INSERT INTO Artist VALUES (5, 'AC/DC'), (6, 'Accept');
        INSERT INTO Album VALUES (1, 'For Those About To Rock', 5), (2, 'Balls to the Wall', 6);
    "#;

    fn saved_image(dir: &tempfile::TempDir) -> CString {
        let mut db = MycoDb::with_config(MycoConfig::new(32, 32).with_seed(3)).unwrap();
        db.ingest_dataset(&parse_sql_dump(DUMP).unwrap(), IngestRules::default(), None);
        let path = dir.path().join("music.myco");
        db.save(&path).unwrap();
        CString::new(path.to_str().unwrap()).unwrap()
    }

    fn last_error(db: *mut MycoDb) -> String {
        let mut buf = [0 as c_char; 128];
        unsafe { myco_db_get_last_error(db, buf.as_mut_ptr(), buf.len()) };
        unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
    }

    #[test]
    fn test_null_handle_fails_cleanly() {
        let table = CString::new("Album").unwrap();
        unsafe {
            assert_eq!(myco_db_query_by_id(ptr::null_mut(), table.as_ptr(), 1, 1.0), -1);
            assert_eq!(myco_db_get_result_count(ptr::null_mut()), -1);
            assert!(!myco_db_load_image(ptr::null_mut(), table.as_ptr()));
            let info = myco_db_get_payload(ptr::null_mut(), 0);
            assert_eq!((info.id, info.table_id), (-1, -1));
            myco_db_destroy(ptr::null_mut());
        }
        assert_eq!(last_error(ptr::null_mut()), "invalid engine handle");
    }

    #[test]
    fn test_load_query_and_read_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_image(&dir);
        let album = CString::new("Album").unwrap();
        let artist_id = CString::new("ArtistId").unwrap();
        let five = CString::new("5").unwrap();

        unsafe {
            let db = myco_db_create();
            assert!(myco_db_load_image(db, path.as_ptr()));
            assert_eq!(myco_db_get_table_count(db), 2);
            assert_eq!(myco_db_get_payload_count(db), 4);

            assert_eq!(myco_db_query_by_id(db, album.as_ptr(), 2, 0.0), 1);
            let mut indices = [0i32; 8];
            assert_eq!(myco_db_get_result_indices(db, indices.as_mut_ptr(), 8), 1);
            let info = myco_db_get_payload(db, indices[0]);
            assert_eq!((info.id, info.table_id, info.field_count), (2, 1, 3));
            assert_eq!(info.fk_count, 1);
            assert!(!info.x.is_nan());

            assert_eq!(myco_db_query_by_column(db, album.as_ptr(), artist_id.as_ptr(), five.as_ptr(), 2.0), 1);
            assert_eq!(myco_db_get_result_count(db), 1);

            // focused on the far corner: nothing within a tiny radius
            let hits = myco_db_query_by_id_focused(db, album.as_ptr(), 1, -100.0, -100.0, 0.5);
            assert_eq!(hits, 0);

            assert_eq!(myco_db_find_payload_by_id(db, 6), 1);
            assert_eq!(myco_db_find_payload_by_id(db, 404), -1);
            assert!(myco_db_goto(db, 5));
            assert!(!myco_db_undo(db));
            assert_eq!(last_error(db), "delta store is empty");
            myco_db_destroy(db);
        }
    }

    #[test]
    fn test_truncation_keeps_whole_characters() {
        let mut out = [0x7f as c_char; 3];
        unsafe {
            // 'ñ' is two bytes; only 'a' fits before the NUL
            assert_eq!(write_text(None, "añb", out.as_mut_ptr(), out.len()), 1);
            assert_eq!(CStr::from_ptr(out.as_ptr()).to_str().unwrap(), "a");
        }
        let mut wide = [0x7f as c_char; 4];
        unsafe {
            assert_eq!(write_text(None, "añb", wide.as_mut_ptr(), wide.len()), 3);
            assert_eq!(CStr::from_ptr(wide.as_ptr()).to_str().unwrap(), "añ");
        }
    }

    #[test]
    fn test_output_buffers_truncate_with_nul() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_image(&dir);
        unsafe {
            let db = myco_db_create();
            assert!(myco_db_load_image(db, path.as_ptr()));

            let mut name = [0x7f as c_char; 4];
            assert_eq!(myco_db_get_table_name(db, 0, name.as_mut_ptr(), name.len()), 3);
            assert_eq!(CStr::from_ptr(name.as_ptr()).to_str().unwrap(), "Art");
            assert!(last_error(db).starts_with("buffer too small"));

            let mut raw = [0 as c_char; 256];
            let n = myco_db_get_payload_raw(db, 0, raw.as_mut_ptr(), raw.len());
            assert!(n > 0);
            let text = CStr::from_ptr(raw.as_ptr()).to_str().unwrap();
            assert!(text.contains("Name=AC/DC"));

            assert_eq!(myco_db_get_table_name(db, 9, name.as_mut_ptr(), name.len()), -1);
            assert_eq!(myco_db_get_payload_raw(db, -1, raw.as_mut_ptr(), raw.len()), -1);
            assert_eq!(myco_db_get_table_name(db, 0, ptr::null_mut(), 0), -1);
            myco_db_destroy(db);
        }
    }

    #[test]
    fn test_bad_image_reports_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.myco");
        std::fs::write(&path, b"JUNKJUNKJUNK").unwrap();
        let path = CString::new(path.to_str().unwrap()).unwrap();
        unsafe {
            let db = myco_db_create();
            assert!(!myco_db_load_image(db, path.as_ptr()));
            assert!(last_error(db).starts_with("load failure"));
            myco_db_destroy(db);
        }
    }
}
