//! Workbook codec: first worksheet in, single worksheet out.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use rcl_core::{RawTable, DATE_FORMAT};
use rust_xlsxwriter::{Format, Workbook};

use crate::AdapterError;

/// Reads the first worksheet; the first row is the header.
pub fn read_workbook(bytes: &[u8]) -> Result<RawTable, AdapterError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AdapterError::Spreadsheet(format!("opening workbook: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AdapterError::Spreadsheet("workbook has no worksheets".into()))?
        .map_err(|e| AdapterError::Spreadsheet(format!("reading first worksheet: {e}")))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(RawTable::default());
    };
    let columns = header
        .iter()
        .map(|cell| cell_text(cell).unwrap_or_default())
        .collect::<Vec<_>>();

    let body = rows
        .map(|row| {
            let mut cells = row.iter().map(cell_text).collect::<Vec<_>>();
            cells.resize(columns.len(), None);
            cells
        })
        .filter(|cells| cells.iter().any(Option::is_some))
        .collect();

    Ok(RawTable::new(columns, body))
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .or_else(|| Some(cell.to_string())),
        Data::Error(_) => None,
        other => Some(other.to_string()),
    }
}

/// Writes a header row plus string cells; `None` leaves the cell blank.
pub fn write_workbook(
    columns: &[&str],
    rows: &[Vec<Option<String>>],
) -> Result<Vec<u8>, AdapterError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (col, name) in columns.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *name, &header_format)
            .map_err(|e| AdapterError::Spreadsheet(format!("writing header {name}: {e}")))?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            if let Some(value) = value {
                sheet
                    .write_string((row_idx + 1) as u32, col as u16, value.as_str())
                    .map_err(|e| {
                        AdapterError::Spreadsheet(format!(
                            "writing row {} column {}: {e}",
                            row_idx + 1,
                            columns.get(col).copied().unwrap_or("?")
                        ))
                    })?;
            }
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| AdapterError::Spreadsheet(format!("serializing workbook: {e}")))
}
