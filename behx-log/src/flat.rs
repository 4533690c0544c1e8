//! Flat delimited form of the event log: one CSV row per record, each cell
//! written as `Name: value`.

use behx_core::EventRecord;

use crate::error::LogError;

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Renders every record as a CSV row.
pub fn write_flat<'a>(records: impl IntoIterator<Item = &'a EventRecord>) -> String {
    let mut out = String::new();
    for record in records {
        let row: Vec<String> = record
            .cells()
            .into_iter()
            .map(|(name, value)| quote_cell(&format!("{name}: {value}")))
            .collect();
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

fn quote_cell(cell: &str) -> String {
    if cell.contains([DELIMITER, QUOTE, '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// One parsed row: the `(name, value)` pairs in written order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    pub cells: Vec<(String, String)>,
}

impl FlatRow {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn kind(&self) -> Option<&str> {
        self.get("Type")
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(n, _)| n.as_str())
    }
}

/// Splits a flat log back into rows of `(name, value)` cells.
pub fn parse_flat(text: &str) -> Result<Vec<FlatRow>, LogError> {
    let mut rows = Vec::new();
    for (row, raw) in split_records(text)?.into_iter().enumerate() {
        let mut parsed = FlatRow::default();
        for cell in raw {
            let (name, value) = cell.split_once(": ").ok_or_else(|| LogError::Malformed {
                row,
                reason: format!("cell '{cell}' has no name"),
            })?;
            parsed.cells.push((name.to_string(), value.to_string()));
        }
        rows.push(parsed);
    }
    Ok(rows)
}

fn split_records(text: &str) -> Result<Vec<Vec<String>>, LogError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                QUOTE if chars.peek() == Some(&QUOTE) => {
                    chars.next();
                    cell.push(QUOTE);
                }
                QUOTE => quoted = false,
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            QUOTE if cell.is_empty() => quoted = true,
            DELIMITER => record.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            _ => cell.push(c),
        }
    }
    if quoted {
        return Err(LogError::Malformed {
            row: records.len(),
            reason: "unterminated quote".into(),
        });
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }
    Ok(records)
}
