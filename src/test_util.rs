use anyhow::Result;
use rust_xlsxwriter::Workbook;
use std::{fs, path::Path};

/// Write a one-sheet workbook with a header row and string cells.
pub fn write_xlsx(path: &Path, headers: &[&str], rows: &[Vec<&str>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    for (c, h) in headers.iter().enumerate() {
        ws.write_string(0, c as u16, *h)?;
    }
    for (r, row) in rows.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            ws.write_string(r as u32 + 1, c as u16, *v)?;
        }
    }
    wb.save(path)?;
    Ok(())
}

/// Write a CSV fixture from literal lines.
pub fn write_csv(path: &Path, lines: &[&str]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}
