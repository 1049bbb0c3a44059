//! Renders one content record as a Word document.

use std::io::Cursor;

use docx_rs::{Docx, Paragraph, Run};

use crate::AdapterError;

/// Renders one paragraph per line into a `.docx` package.
pub fn render_docx(lines: &[String]) -> Result<Vec<u8>, AdapterError> {
    let docx = lines.iter().fold(Docx::new(), |docx, line| {
        docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(line.as_str())))
    });

    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|e| AdapterError::Document(e.to_string()))?;
    Ok(buffer.into_inner())
}
