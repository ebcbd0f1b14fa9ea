//! A1 addresses and cell-key encodings.
//!
//! Cells live in the shared document under string keys. The canonical form is
//! `sheetId:row:col` with zero-based indices. Older clients wrote
//! `sheetId:row,col`, and tests commonly use the short `rNcM` form, which
//! always refers to the default sheet.

use std::fmt;

/// Convert zero-based (row, col) indices to an A1 address string.
pub fn index_to_a1(row: u32, col: u32) -> String {
    let mut col_index = col;
    let mut col_label = String::new();

    loop {
        let rem = (col_index % 26) as u8;
        col_label.push((b'A' + rem) as char);
        if col_index < 26 {
            break;
        }
        col_index = col_index / 26 - 1;
    }

    col_label.chars().rev().collect::<String>() + &(u64::from(row) + 1).to_string()
}

/// Parse an A1 address (absolute markers allowed) into zero-based
/// (row, col) indices. Returns `None` for malformed addresses and for
/// addresses past the last `u32` index.
pub fn a1_to_index(a1: &str) -> Option<(u32, u32)> {
    let mut col: u64 = 0;
    let mut row: u64 = 0;
    let mut saw_letter = false;
    let mut saw_digit = false;

    for ch in a1.trim().chars() {
        if ch == '$' {
            continue;
        }
        if ch.is_ascii_alphabetic() {
            if saw_digit {
                return None;
            }
            saw_letter = true;
            let upper = ch.to_ascii_uppercase() as u8;
            col = col
                .checked_mul(26)?
                .checked_add(u64::from(upper - b'A' + 1))?;
        } else if ch.is_ascii_digit() {
            saw_digit = true;
            row = row.checked_mul(10)?.checked_add(u64::from(ch as u8 - b'0'))?;
        } else {
            return None;
        }
    }

    if !saw_letter || !saw_digit || row == 0 || col == 0 {
        return None;
    }

    Some((u32::try_from(row - 1).ok()?, u32::try_from(col - 1).ok()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyEncoding {
    /// `sheetId:row:col`
    Canonical,
    /// `sheetId:row,col`
    LegacyComma,
    /// `rNcM` on the default sheet
    RowCol,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub sheet_id: String,
    pub row: u32,
    pub col: u32,
}

impl CellKey {
    pub fn new(sheet_id: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            row,
            col,
        }
    }

    pub fn a1(&self) -> String {
        index_to_a1(self.row, self.col)
    }

    /// Parses any supported key encoding. Unsupported keys yield `None`.
    pub fn parse(key: &str, default_sheet_id: &str) -> Option<(CellKey, KeyEncoding)> {
        if let Some(parsed) = parse_row_col(key) {
            return Some((CellKey::new(default_sheet_id, parsed.0, parsed.1), KeyEncoding::RowCol));
        }

        let (head, last) = key.rsplit_once(':')?;
        if let Some((row, col)) = last.split_once(',') {
            let row = parse_index(row)?;
            let col = parse_index(col)?;
            if head.is_empty() {
                return None;
            }
            return Some((CellKey::new(head, row, col), KeyEncoding::LegacyComma));
        }

        let col = parse_index(last)?;
        let (sheet, row) = head.rsplit_once(':')?;
        let row = parse_index(row)?;
        if sheet.is_empty() {
            return None;
        }
        Some((CellKey::new(sheet, row, col), KeyEncoding::Canonical))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sheet_id, self.row, self.col)
    }
}

fn parse_index(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_row_col(key: &str) -> Option<(u32, u32)> {
    let rest = key.strip_prefix('r')?;
    let (row, col) = rest.split_once('c')?;
    Some((parse_index(row)?, parse_index(col)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a1_examples() {
        assert_eq!(index_to_a1(0, 0), "A1");
        assert_eq!(index_to_a1(0, 25), "Z1");
        assert_eq!(index_to_a1(0, 26), "AA1");
        assert_eq!(index_to_a1(9, 51), "AZ10");
        assert_eq!(a1_to_index("$B$3"), Some((2, 1)));
        assert_eq!(a1_to_index("aa10"), Some((9, 26)));
        assert_eq!(a1_to_index("A0"), None);
        assert_eq!(a1_to_index("1A"), None);
    }

    #[test]
    fn test_a1_at_the_last_index() {
        let a1 = index_to_a1(u32::MAX, u32::MAX);
        assert_eq!(a1, "MWLQKWV4294967296");
        assert_eq!(a1_to_index(&a1), Some((u32::MAX, u32::MAX)));
        assert_eq!(a1_to_index("A4294967297"), None);
        assert_eq!(a1_to_index("MWLQKWW1"), None);
    }

    #[test]
    fn test_parse_key_encodings() {
        assert_eq!(
            CellKey::parse("Sheet1:2:3", "Sheet1"),
            Some((CellKey::new("Sheet1", 2, 3), KeyEncoding::Canonical))
        );
        assert_eq!(
            CellKey::parse("Sheet1:2,3", "Sheet1"),
            Some((CellKey::new("Sheet1", 2, 3), KeyEncoding::LegacyComma))
        );
        assert_eq!(
            CellKey::parse("r2c3", "Main"),
            Some((CellKey::new("Main", 2, 3), KeyEncoding::RowCol))
        );
    }

    #[test]
    fn test_sheet_ids_may_contain_colons() {
        assert_eq!(
            CellKey::parse("team:budget:0:1", "Sheet1"),
            Some((CellKey::new("team:budget", 0, 1), KeyEncoding::Canonical))
        );
    }

    #[test]
    fn test_unparsable_keys() {
        for key in ["", "Sheet1", "Sheet1:a:b", ":1:2", "r1", "rXc2", "Sheet1:-1:2", "Sheet1:1,x"] {
            assert_eq!(CellKey::parse(key, "Sheet1"), None, "{key}");
        }
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(CellKey::new("s", 4, 7).to_string(), "s:4:7");
    }
}
