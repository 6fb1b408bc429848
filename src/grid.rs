//! Grid Codec (C4): RLE-compressed dependency grid over an ordered key list.
//! Mirrors `cline_utils.dependency_system.core.dependency_grid`.

use std::collections::HashMap;
use thiserror::Error;

pub const DIAGONAL_CHAR: char = 'o';
pub const PLACEHOLDER_CHAR: char = 'p';
pub const EMPTY_CHAR: char = '.';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("index {index} out of range for row of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("cannot write '{ch}' to diagonal index {index}; diagonal must stay 'o'")]
    DiagonalOverwrite { index: usize, ch: char },
    #[error("cannot write 'o' to off-diagonal index {index}")]
    DiagonalLeak { index: usize },
    #[error("key '{0}' not present in the grid's key list")]
    UnknownKey(String),
    #[error("grid validation failed: {0}")]
    Invalid(String),
}

/// Priority for merge/conflict resolution. Higher wins; `o` has no priority
/// (it is immutable and only ever appears on the diagonal).
pub fn char_priority(ch: char) -> i32 {
    match ch {
        '.' => 0,
        'p' => 1,
        's' | 'S' => 2,
        'd' | '<' | '>' | 'x' | 'n' => 3,
        _ => -1,
    }
}

/// Compress a decompressed dependency string with run-length encoding.
/// Runs of length >= 3 of the same non-`o` character collapse to `char + count`;
/// shorter runs, and any run of `o`, are emitted literally.
pub fn compress(s: &str) -> String {
    if s.len() <= 3 {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut j = i + 1;
        while j < chars.len() && chars[j] == c {
            j += 1;
        }
        let run_len = j - i;
        if run_len >= 3 && c != DIAGONAL_CHAR {
            out.push(c);
            out.push_str(&run_len.to_string());
        } else {
            for _ in 0..run_len {
                out.push(c);
            }
        }
        i = j;
    }
    out
}

/// Decompress an RLE-encoded dependency string. A character immediately
/// followed by one or more digits expands to `char` repeated `digits` times;
/// anything else passes through verbatim.
pub fn decompress(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            let ch = chars[i];
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            let count: usize = chars[i + 1..j].iter().collect::<String>().parse().unwrap_or(0);
            for _ in 0..count {
                out.push(ch);
            }
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Get the character at `index` in the decompressed form of `s` without
/// fully materializing it.
pub fn get_char_at(s: &str, index: usize) -> Result<char, GridError> {
    let chars: Vec<char> = s.chars().collect();
    let mut decompressed_index = 0;
    let mut i = 0;
    while i < chars.len() {
        if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            let ch = chars[i];
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            let count: usize = chars[i + 1..j].iter().collect::<String>().parse().unwrap_or(0);
            if decompressed_index + count > index {
                return Ok(ch);
            }
            decompressed_index += count;
            i = j;
        } else {
            if decompressed_index == index {
                return Ok(chars[i]);
            }
            decompressed_index += 1;
            i += 1;
        }
    }
    Err(GridError::IndexOutOfRange {
        index,
        len: decompressed_index,
    })
}

/// Set the character at `index` and return the re-compressed row.
/// Diagonal-ness is inferred from the *current* character at `index`: if it
/// already holds `o`, only `o` may be written there, and vice versa — this
/// lets the CLI-level operation work from a bare string plus index, with no
/// separate key list to consult.
pub fn set_char_at(s: &str, index: usize, new_char: char) -> Result<String, GridError> {
    let decompressed = decompress(s);
    let len = decompressed.chars().count();
    if index >= len {
        return Err(GridError::IndexOutOfRange { index, len });
    }
    let mut chars: Vec<char> = decompressed.chars().collect();
    let current = chars[index];
    if current == DIAGONAL_CHAR && new_char != DIAGONAL_CHAR {
        return Err(GridError::DiagonalOverwrite {
            index,
            ch: new_char,
        });
    }
    if current != DIAGONAL_CHAR && new_char == DIAGONAL_CHAR {
        return Err(GridError::DiagonalLeak { index });
    }
    chars[index] = new_char;
    Ok(compress(&chars.into_iter().collect::<String>()))
}

/// The grid proper: an ordered key list plus one compressed row per key.
#[derive(Debug, Clone)]
pub struct Grid {
    pub keys: Vec<String>,
    rows: HashMap<String, String>,
}

impl Grid {
    /// Build a fresh grid: every cell a placeholder, diagonal `o`.
    pub fn new_placeholder(keys: Vec<String>) -> Self {
        let n = keys.len();
        let mut rows = HashMap::with_capacity(n);
        for (i, key) in keys.iter().enumerate() {
            let mut chars = vec![PLACEHOLDER_CHAR; n];
            chars[i] = DIAGONAL_CHAR;
            rows.insert(key.clone(), compress(&chars.into_iter().collect::<String>()));
        }
        Grid { keys, rows }
    }

    /// Construct from externally-provided (possibly partial) rows; missing
    /// rows are filled with placeholders.
    pub fn from_rows(keys: Vec<String>, mut rows: HashMap<String, String>) -> Self {
        let n = keys.len();
        for (i, key) in keys.iter().enumerate() {
            rows.entry(key.clone()).or_insert_with(|| {
                let mut chars = vec![PLACEHOLDER_CHAR; n];
                chars[i] = DIAGONAL_CHAR;
                compress(&chars.into_iter().collect::<String>())
            });
        }
        Grid { keys, rows }
    }

    pub fn row(&self, key: &str) -> Option<&str> {
        self.rows.get(key).map(|s| s.as_str())
    }

    pub fn rows_map(&self) -> &HashMap<String, String> {
        &self.rows
    }

    fn index_of(&self, key: &str) -> Result<usize, GridError> {
        self.keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| GridError::UnknownKey(key.to_string()))
    }

    /// Add/overwrite a dependency cell at `(source, target)`. Diagonal writes
    /// are rejected — self-dependency is structurally `o` and immutable.
    pub fn add_dependency(&mut self, source: &str, target: &str, ch: char) -> Result<(), GridError> {
        let src_idx = self.index_of(source)?;
        let tgt_idx = self.index_of(target)?;
        if src_idx == tgt_idx {
            return Err(GridError::DiagonalOverwrite {
                index: src_idx,
                ch,
            });
        }
        let row = self
            .rows
            .get(source)
            .cloned()
            .unwrap_or_else(|| compress(&PLACEHOLDER_CHAR.to_string().repeat(self.keys.len())));
        let new_row = set_char_at(&row, tgt_idx, ch)?;
        self.rows.insert(source.to_string(), new_row);
        Ok(())
    }

    pub fn remove_dependency(&mut self, source: &str, target: &str) -> Result<(), GridError> {
        let src_idx = self.index_of(source)?;
        let tgt_idx = self.index_of(target)?;
        if src_idx == tgt_idx {
            return Ok(());
        }
        let row = self
            .rows
            .get(source)
            .cloned()
            .unwrap_or_else(|| compress(&PLACEHOLDER_CHAR.to_string().repeat(self.keys.len())));
        let new_row = set_char_at(&row, tgt_idx, EMPTY_CHAR)?;
        self.rows.insert(source.to_string(), new_row);
        Ok(())
    }

    /// Dependencies from `source`, grouped by relationship character.
    pub fn dependencies_from(&self, source: &str) -> Result<HashMap<char, Vec<String>>, GridError> {
        let src_idx = self.index_of(source)?;
        let mut out: HashMap<char, Vec<String>> = HashMap::new();
        let Some(row) = self.rows.get(source) else {
            return Ok(out);
        };
        for (col_idx, target_key) in self.keys.iter().enumerate() {
            if col_idx == src_idx {
                continue;
            }
            let ch = get_char_at(row, col_idx)?;
            if ch == EMPTY_CHAR {
                continue;
            }
            out.entry(ch).or_default().push(target_key.clone());
        }
        Ok(out)
    }

    /// §4.4 validation: row/key agreement, full-length rows, correct diagonal.
    pub fn validate(&self) -> Result<(), GridError> {
        let n = self.keys.len();
        if n == 0 {
            return Ok(());
        }
        let expected: std::collections::HashSet<&str> =
            self.keys.iter().map(|s| s.as_str()).collect();
        let actual: std::collections::HashSet<&str> =
            self.rows.keys().map(|s| s.as_str()).collect();
        if expected != actual {
            let missing: Vec<&str> = expected.difference(&actual).copied().collect();
            let extra: Vec<&str> = actual.difference(&expected).copied().collect();
            return Err(GridError::Invalid(format!(
                "row/key mismatch — missing: {missing:?}, extra: {extra:?}"
            )));
        }
        for (idx, key) in self.keys.iter().enumerate() {
            let row = self.rows.get(key).expect("checked above");
            let decompressed = decompress(row);
            let len = decompressed.chars().count();
            if len != n {
                return Err(GridError::Invalid(format!(
                    "row '{key}' has length {len}, expected {n}"
                )));
            }
            let diag = decompressed.chars().nth(idx).unwrap();
            if diag != DIAGONAL_CHAR {
                return Err(GridError::Invalid(format!(
                    "row '{key}' has '{diag}' at diagonal index {idx}, expected 'o'"
                )));
            }
        }
        Ok(())
    }

    /// Render as `X k0 k1 ...` header plus one `key = row` line per key,
    /// in grid (= key list) order.
    pub fn format_display(&self) -> String {
        let mut out = format!("X {}", self.keys.join(" "));
        for key in &self.keys {
            let row = self
                .rows
                .get(key)
                .cloned()
                .unwrap_or_else(|| compress(&PLACEHOLDER_CHAR.to_string().repeat(self.keys.len())));
            out.push('\n');
            out.push_str(&format!("{key} = {row}"));
        }
        out
    }
}

/// Merge two suggestion characters for the same cell using the priority
/// table; `<` + `>` at equal priority collapses to `x`; ties otherwise keep
/// the incumbent.
pub fn merge_chars(incumbent: char, candidate: char) -> char {
    let (pi, pc) = (char_priority(incumbent), char_priority(candidate));
    if pc > pi {
        return candidate;
    }
    if pc == pi {
        let pair: std::collections::HashSet<char> = [incumbent, candidate].into_iter().collect();
        let lr: std::collections::HashSet<char> = ['<', '>'].into_iter().collect();
        if pair == lr {
            return 'x';
        }
    }
    incumbent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rle_round_trip_s1() {
        assert_eq!(decompress("p8do.3"), "ppppppppdo...");
        assert_eq!(compress("ppppppppdo..."), "p8do.3");
    }

    #[test]
    fn round_trip_any_alphabet_string() {
        for s in ["ababab", ".....", "sssSSSdddnnn<<<>>>xxx", "p", "pp", "ppp"] {
            assert_eq!(decompress(&compress(s)), s, "failed for {s}");
        }
    }

    #[test]
    fn alternating_stays_literal() {
        assert_eq!(compress("ababab"), "ababab");
    }

    #[test]
    fn single_key_grid_is_bare_o() {
        let g = Grid::new_placeholder(vec!["1A".to_string()]);
        assert_eq!(g.row("1A").unwrap(), "o");
        assert!(g.validate().is_ok());
    }

    #[test]
    fn set_diagonal_cell_rejected_s2() {
        assert!(set_char_at("oppppp", 0, 'x').is_err());
        assert!(set_char_at("pppppp", 0, 'o').is_err());
    }

    #[test]
    fn add_dependency_to_diagonal_rejected() {
        let mut g = Grid::new_placeholder(vec!["1A".into(), "1A1".into()]);
        assert!(g.add_dependency("1A", "1A", '>').is_err());
    }

    #[test]
    fn merge_opposite_arrows_becomes_x() {
        assert_eq!(merge_chars('<', '>'), 'x');
        assert_eq!(merge_chars('>', '<'), 'x');
    }

    #[test]
    fn merge_keeps_higher_priority() {
        assert_eq!(merge_chars('p', 'S'), 'S');
        assert_eq!(merge_chars('S', 'p'), 'S');
        assert_eq!(merge_chars('.', 's'), 's');
    }

    #[test]
    fn merge_equal_priority_non_arrow_keeps_incumbent() {
        assert_eq!(merge_chars('d', '>'), 'd');
    }

    #[test]
    fn all_placeholder_and_all_x_grids_validate() {
        let g = Grid::new_placeholder(vec!["1A".into(), "1A1".into(), "1A2".into()]);
        assert!(g.validate().is_ok());

        let mut g2 = g.clone();
        g2.add_dependency("1A", "1A1", 'x').unwrap();
        g2.add_dependency("1A1", "1A", 'x').unwrap();
        assert!(g2.validate().is_ok());
    }
}
