use anyhow::{bail, Context, Result};
use calamine::{open_workbook, open_workbook_auto, Data, Reader, Sheets, Xlsx};
use chrono::NaiveTime;
use std::{fs::File, io::BufReader, path::Path};

use crate::table::{utils::format_number, RawTable};

/// Render one cell as text. Dates come out as ISO strings so downstream
/// parsing never has to know about Excel serials.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => format_number(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) if ndt.time() == NaiveTime::MIN => ndt.date().format("%Y-%m-%d").to_string(),
            Some(ndt) => ndt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format_number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{e:?}"),
    }
}

/// Read the first worksheet of a workbook into a [`RawTable`]. The first
/// non-empty row is the header; fully empty rows are dropped.
/// Format detection by extension is case-sensitive in calamine, so upper-case
/// `.XLSX` exports are opened as xlsx explicitly.
fn open_sheets(path: &Path) -> Result<Sheets<BufReader<File>>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let opened = match ext.as_deref() {
        Some("xlsx") | Some("xlsm") => open_workbook::<Xlsx<_>, _>(path).map(Sheets::Xlsx)?,
        _ => open_workbook_auto(path)?,
    };
    Ok(opened)
}

pub fn read_first_sheet(path: &Path) -> Result<RawTable> {
    let mut workbook =
        open_sheets(path).with_context(|| format!("opening workbook {}", path.display()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet) = sheet_names.first() else {
        bail!("workbook {} has no sheets", path.display());
    };

    let range = workbook
        .worksheet_range(sheet)
        .with_context(|| format!("reading sheet '{}' of {}", sheet, path.display()))?;

    let mut rows = range
        .rows()
        .map(|r| r.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|r| r.iter().any(|c| !c.is_empty()));

    let Some(headers) = rows.next() else {
        bail!("sheet '{}' of {} is empty", sheet, path.display());
    };

    let mut table = RawTable::new(headers);
    for row in rows {
        table.push_row(row);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use tempfile::tempdir;

    #[test]
    fn reads_header_and_rows() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("sheet.xlsx");

        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_string(0, 0, "OfficeLocation")?;
        ws.write_string(0, 1, "Deskcount")?;
        ws.write_string(1, 0, "A")?;
        ws.write_number(1, 1, 10.0)?;
        // row 2 left blank on purpose
        ws.write_string(3, 0, "B")?;
        ws.write_number(3, 1, 12.5)?;
        wb.save(&path)?;

        let t = read_first_sheet(&path)?;
        assert_eq!(t.headers, vec!["OfficeLocation", "Deskcount"]);
        assert_eq!(t.rows, vec![vec!["A", "10"], vec!["B", "12.5"]]);
        Ok(())
    }

    #[test]
    fn unreadable_workbook_is_an_error() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("broken.xlsx");
        std::fs::write(&path, b"definitely not a zip")?;
        assert!(read_first_sheet(&path).is_err());
        Ok(())
    }
}
