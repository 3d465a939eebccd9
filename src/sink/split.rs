//! Oversized-cell splitting.
//!
//! Spreadsheet cells hold at most [`MAX_CELL_BYTES`]. Longer values are cut
//! into [`SAFE_SLICE_BYTES`] pieces and spread across `name`, `name_2`,
//! `name_3`, ... Cuts happen on byte offsets; a multi-byte character that
//! straddles a cut is dropped rather than replaced.

/// Largest value that fits a single cell, in UTF-8 bytes.
pub const MAX_CELL_BYTES: usize = 50_000;
/// Chunk size used once a value exceeds [`MAX_CELL_BYTES`].
pub const SAFE_SLICE_BYTES: usize = 48_000;

/// Split `value` into `(column, chunk)` pairs.
///
/// Absent or empty values yield a single empty column. Values up to
/// [`MAX_CELL_BYTES`] are returned unchanged under `name`.
pub fn split_long_text(name: &str, value: Option<&str>) -> Vec<(String, String)> {
    let value = match value {
        Some(v) if !v.is_empty() => v,
        _ => return vec![(name.to_string(), String::new())],
    };

    let bytes = value.as_bytes();
    if bytes.len() <= MAX_CELL_BYTES {
        return vec![(name.to_string(), value.to_string())];
    }

    bytes
        .chunks(SAFE_SLICE_BYTES)
        .enumerate()
        .map(|(i, chunk)| {
            let column = if i == 0 {
                name.to_string()
            } else {
                format!("{}_{}", name, i + 1)
            };
            (column, decode_lenient(chunk))
        })
        .collect()
}

/// Decode UTF-8, silently dropping invalid and truncated sequences.
fn decode_lenient(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => bytes = &rest[len..],
                    // Truncated sequence at the end of the chunk.
                    None => return out,
                }
            }
        }
    }
}
