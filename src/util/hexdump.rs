//! Offset-annotated hex dump, used for both the constant pool and the
//! assembled instruction stream's diagnostic disassembly (spec.md §6).

use std::fmt::Write as _;

const COLS: usize = 8;

/// Format `bytes` as rows of `COLS` hex pairs, each row prefixed with its
/// starting offset (relative to `base_offset`), matching
/// `original_source/src/util/hexdump.h` column-for-column.
pub fn hexdump(bytes: &[u8], base_offset: usize) -> String {
    let mut out = String::new();
    for (row_start, chunk) in bytes.chunks(COLS).enumerate() {
        let _ = write!(out, "{:4x}: ", base_offset + row_start * COLS);
        for (i, byte) in chunk.iter().enumerate() {
            let _ = write!(out, "{byte:02x}");
            if i + 1 != chunk.len() {
                out.push(' ');
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_at_eight_columns() {
        let bytes: Vec<u8> = (0..10).collect();
        let dump = hexdump(&bytes, 0);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("   0: "));
        assert!(lines[1].starts_with("   8: "));
    }
}
