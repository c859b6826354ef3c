//! Minimal S-expression reader for netlist code blocks.
//!
//! Atoms are bare symbols or double-quoted strings. `;` starts a comment
//! that runs to the end of the line.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SExpError {
    #[error("unexpected end of input (unclosed list opened at line {line})")]
    UnclosedList { line: usize },
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected ')' at line {line}, column {column}")]
    UnbalancedClose { line: usize, column: usize },
    #[error("unterminated string starting at line {line}")]
    UnterminatedString { line: usize },
    #[error("trailing content after top-level expression at line {line}")]
    TrailingContent { line: usize },
    #[error("lists nested deeper than {max} levels at line {line}, column {column}")]
    TooDeep { line: usize, column: usize, max: usize },
}

/// Deepest list nesting the reader accepts. A real netlist needs four or five.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SExp {
    Atom(String),
    List(Vec<SExp>),
}

impl SExp {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExp::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExp]> {
        match self {
            SExp::List(items) => Some(items),
            _ => None,
        }
    }

    /// Head symbol of a list, e.g. `comp` for `(comp (ref R1))`.
    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_atom()
    }

    /// Items of a list after its head symbol.
    pub fn tail(&self) -> &[SExp] {
        match self {
            SExp::List(items) if !items.is_empty() => &items[1..],
            _ => &[],
        }
    }

    /// First child list whose head is `key`.
    pub fn get(&self, key: &str) -> Option<&SExp> {
        self.tail().iter().find(|item| item.head() == Some(key))
    }

    /// All child lists whose head is `key`, in source order.
    pub fn get_all(&self, key: &str) -> Vec<&SExp> {
        self.tail()
            .iter()
            .filter(|item| item.head() == Some(key))
            .collect()
    }

    /// Single atom value of `(key value)`.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.get(key)?.tail().first()?.as_atom()
    }

    /// All atom values of `(key v1 v2 ...)` children, flattened.
    pub fn values_of(&self, key: &str) -> Vec<&str> {
        self.get_all(key)
            .into_iter()
            .flat_map(|item| item.tail().iter().filter_map(|v| v.as_atom()))
            .collect()
    }
}

impl fmt::Display for SExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExp::Atom(s) => {
                let needs_quotes = s.is_empty()
                    || s.chars()
                        .any(|c| c.is_whitespace() || c == '(' || c == ')' || c == '"' || c == ';');
                if needs_quotes {
                    write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
                } else {
                    write!(f, "{}", s)
                }
            }
            SExp::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

pub struct SExpParser {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl SExpParser {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Parse exactly one top-level expression.
    pub fn parse(&mut self) -> Result<SExp, SExpError> {
        self.skip_trivia();
        if self.is_eof() {
            return Err(SExpError::UnexpectedEof);
        }
        let sexp = self.parse_sexp(0)?;
        self.skip_trivia();
        if !self.is_eof() {
            return Err(SExpError::TrailingContent { line: self.line });
        }
        Ok(sexp)
    }

    fn parse_sexp(&mut self, depth: usize) -> Result<SExp, SExpError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(SExpError::UnexpectedEof),
            Some('(') => self.parse_list(depth + 1),
            Some(')') => Err(SExpError::UnbalancedClose {
                line: self.line,
                column: self.column,
            }),
            Some('"') => self.parse_string(),
            Some(_) => Ok(self.parse_symbol()),
        }
    }

    fn parse_list(&mut self, depth: usize) -> Result<SExp, SExpError> {
        if depth > MAX_DEPTH {
            return Err(SExpError::TooDeep {
                line: self.line,
                column: self.column,
                max: MAX_DEPTH,
            });
        }
        let opened_at = self.line;
        self.advance();
        let mut items = Vec::new();

        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(SExpError::UnclosedList { line: opened_at }),
                Some(')') => {
                    self.advance();
                    return Ok(SExp::List(items));
                }
                Some(_) => items.push(self.parse_sexp(depth)?),
            }
        }
    }

    fn parse_string(&mut self) -> Result<SExp, SExpError> {
        let started_at = self.line;
        self.advance();
        let mut s = String::new();

        while let Some(ch) = self.advance() {
            match ch {
                '"' => return Ok(SExp::Atom(s)),
                '\\' => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(other) => s.push(other),
                    None => break,
                },
                _ => s.push(ch),
            }
        }

        Err(SExpError::UnterminatedString { line: started_at })
    }

    fn parse_symbol(&mut self) -> SExp {
        let mut s = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == '(' || ch == ')' || ch == '"' || ch == ';' {
                break;
            }
            s.push(ch);
            self.advance();
        }
        SExp::Atom(s)
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == ';' {
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_with_comments() {
        let mut parser = SExpParser::new("(a ; comment\n (b \"c d\") e)");
        let result = parser.parse().unwrap();
        assert_eq!(result.head(), Some("a"));
        assert_eq!(result.tail().len(), 2);
        assert_eq!(result.value_of("b"), Some("c d"));
    }

    #[test]
    fn test_get_all_preserves_order() {
        let mut parser = SExpParser::new("(nets (net (name A)) (other) (net (name B)))");
        let sexp = parser.parse().unwrap();
        let names: Vec<_> = sexp
            .get_all("net")
            .iter()
            .filter_map(|n| n.value_of("name"))
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_values_of_flattens() {
        let mut parser = SExpParser::new("(ports (input VIN EN) (output VOUT) (input AUX))");
        let sexp = parser.parse().unwrap();
        assert_eq!(sexp.values_of("input"), vec!["VIN", "EN", "AUX"]);
    }

    #[test]
    fn test_unclosed_list_reports_line() {
        let mut parser = SExpParser::new("(netlist\n (components\n");
        assert_eq!(
            parser.parse().unwrap_err(),
            SExpError::UnclosedList { line: 2 }
        );
    }

    #[test]
    fn test_unbalanced_close() {
        let mut parser = SExpParser::new("(a))");
        assert!(matches!(
            parser.parse(),
            Err(SExpError::TrailingContent { .. })
        ));
        let mut parser = SExpParser::new(")");
        assert!(matches!(
            parser.parse(),
            Err(SExpError::UnbalancedClose { line: 1, column: 1 })
        ));
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let ok = format!("{}{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(SExpParser::new(&ok).parse().is_ok());

        let deep = format!("(netlist {}", "(".repeat(200_000));
        assert!(matches!(
            SExpParser::new(&deep).parse(),
            Err(SExpError::TooDeep { line: 1, max: MAX_DEPTH, .. })
        ));
    }

    #[test]
    fn test_display_quotes_when_needed() {
        let sexp = SExp::List(vec![
            SExp::Atom("value".into()),
            SExp::Atom("10 uF".into()),
        ]);
        assert_eq!(sexp.to_string(), "(value \"10 uF\")");
    }
}
