use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use core::fmt;

/// A half-open source region, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePos {
    pub line: u64,
    pub col: u64,
    pub end_line: u64,
    pub end_col: u64,
}

impl SourcePos {
    pub const START: SourcePos = SourcePos { line: 1, col: 1, end_line: 1, end_col: 1 };

    pub fn at(line: u64, col: u64, len: u64) -> Self {
        Self { line, col, end_line: line, end_col: col + len }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Locates identifiers in the original statement text.
///
/// The parse tree itself is position-free, so resolution errors find their
/// region by scanning the token stream for the offending word.
pub struct SourceMap {
    words: Vec<(String, SourcePos)>,
}

impl SourceMap {
    pub fn of(sql: &str) -> Self {
        let mut words = Vec::new();
        if let Ok(tokens) = Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize_with_location() {
            for t in tokens {
                if let Token::Word(word) = &t.token {
                    words.push((
                        word.value.clone(),
                        SourcePos::at(t.location.line, t.location.column, word.value.len() as u64),
                    ));
                }
            }
        }
        Self { words }
    }

    /// Position of the first occurrence of `ident`, or the statement start.
    pub fn pos_of(&self, ident: &str) -> SourcePos {
        self.words
            .iter()
            .find(|(w, _)| w.eq_ignore_ascii_case(ident))
            .map(|(_, p)| *p)
            .unwrap_or(SourcePos::START)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_identifier_positions() {
        let map = SourceMap::of("SELECT a\nFROM missing_table");
        let pos = map.pos_of("missing_table");
        assert_eq!((pos.line, pos.col), (2, 6));
        assert_eq!(pos.end_col, 6 + "missing_table".len() as u64);
    }

    #[test]
    fn unknown_word_falls_back_to_start() {
        let map = SourceMap::of("SELECT 1");
        assert_eq!(map.pos_of("nope"), SourcePos::START);
    }
}
