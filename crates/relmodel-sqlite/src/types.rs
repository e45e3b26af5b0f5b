//! Type encoding and decoding between relmodel values and SQLite.
//!
//! SQLite has five storage classes (INTEGER, REAL, TEXT, BLOB, NULL). Values
//! without a native class are stored as text: timestamps as ISO-8601, JSON
//! as its serialized form.

use crate::ffi;
use relmodel_core::Value;
use std::ffi::{CStr, c_int};

/// Bind a Value to a prepared statement parameter.
///
/// `Value::Default` has no meaning as a bound parameter and binds NULL.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: caller guarantees stmt and index are valid; text and blob
    // buffers are copied by SQLite (SQLITE_TRANSIENT) before returning
    unsafe {
        match value {
            Value::Null | Value::Default => libsqlite3_sys::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => libsqlite3_sys::sqlite3_bind_int(stmt, index, c_int::from(*b)),
            Value::Int(v) => libsqlite3_sys::sqlite3_bind_int(stmt, index, *v),
            Value::BigInt(v) => libsqlite3_sys::sqlite3_bind_int64(stmt, index, *v),
            Value::Double(v) => libsqlite3_sys::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => bind_text(stmt, index, s),
            Value::Bytes(b) => {
                let Ok(len) = c_int::try_from(b.len()) else {
                    return libsqlite3_sys::SQLITE_TOOBIG;
                };
                libsqlite3_sys::sqlite3_bind_blob(
                    stmt,
                    index,
                    b.as_ptr().cast(),
                    len,
                    ffi::SQLITE_TRANSIENT(),
                )
            }
            Value::Timestamp(micros) => bind_text(stmt, index, &micros_to_timestamp(*micros)),
            Value::Json(json) => bind_text(stmt, index, &json.to_string()),
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, text: &str) -> c_int {
    let Ok(len) = c_int::try_from(text.len()) else {
        return libsqlite3_sys::SQLITE_TOOBIG;
    };
    // SAFETY: caller guarantees stmt and index are valid
    unsafe {
        libsqlite3_sys::sqlite3_bind_text(
            stmt,
            index,
            text.as_ptr().cast(),
            len,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

/// Read a column value from a result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: caller guarantees stmt is positioned on a row; pointers returned
    // by the column accessors stay valid until the next step
    unsafe {
        match libsqlite3_sys::sqlite3_column_type(stmt, index) {
            libsqlite3_sys::SQLITE_INTEGER => {
                let v = libsqlite3_sys::sqlite3_column_int64(stmt, index);
                // Choose the smallest representation
                i32::try_from(v).map_or(Value::BigInt(v), Value::Int)
            }
            libsqlite3_sys::SQLITE_FLOAT => {
                Value::Double(libsqlite3_sys::sqlite3_column_double(stmt, index))
            }
            libsqlite3_sys::SQLITE_TEXT => {
                let ptr = libsqlite3_sys::sqlite3_column_text(stmt, index);
                let len = libsqlite3_sys::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() {
                    Value::Null
                } else {
                    let slice =
                        std::slice::from_raw_parts(ptr, usize::try_from(len).unwrap_or_default());
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }
            libsqlite3_sys::SQLITE_BLOB => {
                let ptr = libsqlite3_sys::sqlite3_column_blob(stmt, index);
                let len = usize::try_from(libsqlite3_sys::sqlite3_column_bytes(stmt, index))
                    .unwrap_or_default();
                if ptr.is_null() || len == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    Value::Bytes(std::slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec())
                }
            }
            _ => Value::Null,
        }
    }
}

/// Get the column name from a result.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller guarantees stmt and index are valid
    unsafe {
        let ptr = libsqlite3_sys::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            CStr::from_ptr(ptr).to_str().ok().map(String::from)
        }
    }
}

/// Convert microseconds since Unix epoch to an ISO-8601 UTC timestamp.
fn micros_to_timestamp(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let sub_micros = micros.rem_euclid(1_000_000);
    let days = secs.div_euclid(86_400);
    let secs_of_day = secs.rem_euclid(86_400);

    let (year, month, day) = civil_from_days(days);
    let time = format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60
    );

    if sub_micros > 0 {
        format!(
            "{:04}-{:02}-{:02}T{}.{:06}Z",
            year, month, day, time, sub_micros
        )
    } else {
        format!("{:04}-{:02}-{:02}T{}Z", year, month, day, time)
    }
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = u32::try_from(doy - (153 * mp + 2) / 5 + 1).unwrap_or(1);
    let month = u32::try_from(if mp < 10 { mp + 3 } else { mp - 9 }).unwrap_or(1);
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch() {
        assert_eq!(micros_to_timestamp(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_timestamp_with_fraction() {
        // 2024-02-29T12:30:05.000250Z
        let secs = 1_709_209_805_i64;
        assert_eq!(
            micros_to_timestamp(secs * 1_000_000 + 250),
            "2024-02-29T12:30:05.000250Z"
        );
    }

    #[test]
    fn test_before_epoch() {
        assert_eq!(micros_to_timestamp(-1_000_000), "1969-12-31T23:59:59Z");
    }

    #[test]
    fn test_civil_from_days() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(365), (1971, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
    }
}
