//! Delimited line codec
//!
//! One row per physical line:
//! - cells separated by `,`
//! - `\`, LF and CR inside a cell written as `\\`, `\n`, `\r`
//! - cells that are empty or contain `,` or `"` are quoted, inner quotes doubled
//! - an empty unquoted cell is a null
//!
//! Cells are `Option<String>`: `None` is null, `Some("")` is empty text.

use thiserror::Error;

const DELIMITER: char = ',';
const QUOTE: char = '"';
const ESCAPE: char = '\\';

/// Malformed line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at column {column} (byte {offset})")]
pub struct LineError {
    /// 0-based cell index
    pub column: usize,
    /// Byte offset within the line
    pub offset: usize,
    /// What went wrong
    pub reason: &'static str,
}

/// Encodes cells as one line, including the trailing `\n`.
pub fn encode_line<S: AsRef<str>>(cells: &[Option<S>]) -> String {
    let mut line = String::with_capacity(cells.len() * 8);
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        if let Some(cell) = cell {
            encode_cell(&mut line, cell.as_ref());
        }
    }
    line.push('\n');
    line
}

fn encode_cell(line: &mut String, cell: &str) {
    let quoted = cell.is_empty() || cell.contains(DELIMITER) || cell.contains(QUOTE);
    if quoted {
        line.push(QUOTE);
    }
    for c in cell.chars() {
        match c {
            ESCAPE => line.push_str("\\\\"),
            '\n' => line.push_str("\\n"),
            '\r' => line.push_str("\\r"),
            QUOTE => line.push_str("\"\""),
            c => line.push(c),
        }
    }
    if quoted {
        line.push(QUOTE);
    }
}

/// Decodes one line into cells. A trailing `\n` or `\r\n` is ignored.
pub fn decode_line(line: &str) -> Result<Vec<Option<String>>, LineError> {
    let line = line
        .strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line);

    let mut cells = Vec::new();
    let mut chars = line.char_indices().peekable();
    let mut column = 0;

    loop {
        let mut cell = String::new();
        let mut present = false;
        let mut quoted = false;

        if let Some(&(_, QUOTE)) = chars.peek() {
            chars.next();
            quoted = true;
            present = true;
        }

        loop {
            match chars.next() {
                None => {
                    if quoted {
                        return Err(LineError {
                            column,
                            offset: line.len(),
                            reason: "unterminated quote",
                        });
                    }
                    cells.push(present.then_some(cell));
                    return Ok(cells);
                }
                Some((offset, ESCAPE)) => {
                    match chars.next() {
                        Some((_, ESCAPE)) => cell.push(ESCAPE),
                        Some((_, 'n')) => cell.push('\n'),
                        Some((_, 'r')) => cell.push('\r'),
                        _ => {
                            return Err(LineError {
                                column,
                                offset,
                                reason: "bad escape sequence",
                            })
                        }
                    }
                    present = true;
                }
                Some((offset, QUOTE)) => {
                    if !quoted {
                        return Err(LineError {
                            column,
                            offset,
                            reason: "quote inside unquoted cell",
                        });
                    }
                    if let Some(&(_, QUOTE)) = chars.peek() {
                        chars.next();
                        cell.push(QUOTE);
                        continue;
                    }
                    match chars.next() {
                        None => {
                            cells.push(Some(cell));
                            return Ok(cells);
                        }
                        Some((_, DELIMITER)) => {
                            cells.push(Some(cell));
                            break;
                        }
                        Some((offset, _)) => {
                            return Err(LineError {
                                column,
                                offset,
                                reason: "text after closing quote",
                            })
                        }
                    }
                }
                Some((_, DELIMITER)) if !quoted => {
                    cells.push(present.then_some(cell));
                    break;
                }
                Some((_, c)) => {
                    cell.push(c);
                    present = true;
                }
            }
        }
        column += 1;
    }
}
