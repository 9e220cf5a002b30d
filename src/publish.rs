// src/publish.rs
//
// Fact tables → Snappy-compressed Parquet, one file per table.

use anyhow::{Context, Result};
use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use crate::config::Layout;
use crate::facts::{self, FactOccupancy, FactOccupancyAggregated};

/// Which fact tables `publish` writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum PublishTarget {
    Aggregated,
    Detail,
    Both,
}

// days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn date32(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn key(k: Option<u32>) -> Option<i32> {
    k.and_then(|v| i32::try_from(v).ok())
}

fn count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub fn detail_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("date_key", DataType::Int32, true),
        Field::new("location_key", DataType::Int32, true),
        Field::new("lob_key", DataType::Int32, true),
        Field::new("date", DataType::Date32, false),
        Field::new("office_location", DataType::Utf8, false),
        Field::new("line_of_business", DataType::Utf8, false),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        Field::new("is_weekend", DataType::Boolean, false),
        Field::new("attendance_count", DataType::Int64, false),
        Field::new("deskcount", DataType::Int64, true),
        Field::new("occupancy_rate", DataType::Float64, true),
        Field::new("is_hybrid_day", DataType::Boolean, false),
    ]))
}

pub fn aggregated_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("date_key", DataType::Int32, true),
        Field::new("location_key", DataType::Int32, true),
        Field::new("date", DataType::Date32, false),
        Field::new("office_location", DataType::Utf8, false),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        Field::new("is_weekend", DataType::Boolean, false),
        Field::new("attendance_count", DataType::Int64, false),
        Field::new("deskcount", DataType::Int64, true),
        Field::new("occupancy_rate", DataType::Float64, true),
        Field::new("is_hybrid_day", DataType::Boolean, false),
    ]))
}

pub fn detail_batch(rows: &[FactOccupancy]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from_iter(rows.iter().map(|r| key(r.date_key)))),
        Arc::new(Int32Array::from_iter(rows.iter().map(|r| key(r.location_key)))),
        Arc::new(Int32Array::from_iter(rows.iter().map(|r| key(r.lob_key)))),
        Arc::new(Date32Array::from_iter_values(rows.iter().map(|r| date32(r.date)))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.office_location))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.line_of_business))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.year))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.month as i32))),
        Arc::new(BooleanArray::from_iter(rows.iter().map(|r| Some(r.is_weekend)))),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| count(r.attendance_count)))),
        Arc::new(Int64Array::from_iter(rows.iter().map(|r| r.deskcount.map(count)))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.occupancy_rate))),
        Arc::new(BooleanArray::from_iter(rows.iter().map(|r| Some(r.is_hybrid_day)))),
    ];
    RecordBatch::try_new(detail_schema(), columns).context("building FactOccupancy record batch")
}

pub fn aggregated_batch(rows: &[FactOccupancyAggregated]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from_iter(rows.iter().map(|r| key(r.date_key)))),
        Arc::new(Int32Array::from_iter(rows.iter().map(|r| key(r.location_key)))),
        Arc::new(Date32Array::from_iter_values(rows.iter().map(|r| date32(r.date)))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.office_location))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.year))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.month as i32))),
        Arc::new(BooleanArray::from_iter(rows.iter().map(|r| Some(r.is_weekend)))),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| count(r.attendance_count)))),
        Arc::new(Int64Array::from_iter(rows.iter().map(|r| r.deskcount.map(count)))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.occupancy_rate))),
        Arc::new(BooleanArray::from_iter(rows.iter().map(|r| Some(r.is_hybrid_day)))),
    ];
    RecordBatch::try_new(aggregated_schema(), columns)
        .context("building FactOccupancyAggregated record batch")
}

/// Write one batch to `<dir>/<table>.parquet`. The file is written next to
/// its final name and renamed into place once closed.
pub fn write_parquet(dir: &Path, table: &str, batch: &RecordBatch) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating publish directory {}", dir.display()))?;
    let final_path = dir.join(format!("{}.parquet", table));
    let tmp_path = dir.join(format!("{}.parquet.tmp", table));

    let file = File::create(&tmp_path)
        .with_context(|| format!("creating {}", tmp_path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(props))
        .with_context(|| format!("creating Arrow writer for {}", table))?;
    writer
        .write(batch)
        .with_context(|| format!("writing {} batch", table))?;
    writer
        .close()
        .with_context(|| format!("closing Arrow writer for {}", table))?;

    fs::rename(&tmp_path, &final_path).with_context(|| {
        format!(
            "renaming {} to {}",
            tmp_path.display(),
            final_path.display()
        )
    })?;
    info!(table, rows = batch.num_rows(), output = %final_path.display(), "published");
    Ok(final_path)
}

/// Publish the selected fact tables from their CSVs into `out_dir`.
#[tracing::instrument(skip(layout))]
pub fn publish(layout: &Layout, out_dir: &Path, target: PublishTarget) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if matches!(target, PublishTarget::Aggregated | PublishTarget::Both) {
        let rows = facts::aggregated::load(layout)?;
        let batch = aggregated_batch(&rows)?;
        written.push(write_parquet(out_dir, facts::aggregated::TABLE, &batch)?);
    }
    if matches!(target, PublishTarget::Detail | PublishTarget::Both) {
        let rows = facts::occupancy::load(layout)?;
        let batch = detail_batch(&rows)?;
        written.push(write_parquet(out_dir, facts::occupancy::TABLE, &batch)?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn row(loc: &str, desks: Option<u64>) -> FactOccupancyAggregated {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        FactOccupancyAggregated {
            date_key: Some(20250102),
            location_key: None,
            date,
            office_location: loc.into(),
            year: 2025,
            month: 1,
            is_weekend: false,
            attendance_count: 3,
            deskcount: desks,
            occupancy_rate: crate::facts::occupancy_rate(3, desks),
            is_hybrid_day: true,
        }
    }

    #[test]
    fn date32_counts_from_unix_epoch() {
        assert_eq!(date32(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
        assert_eq!(date32(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()), 20090);
    }

    #[test]
    fn parquet_keeps_types_and_nulls() -> Result<()> {
        let tmp = tempdir()?;
        let batch = aggregated_batch(&[row("A", Some(10)), row("B", None)])?;
        let path = write_parquet(tmp.path(), "FactOccupancyAggregated", &batch)?;
        assert!(path.ends_with("FactOccupancyAggregated.parquet"));
        assert!(!tmp.path().join("FactOccupancyAggregated.parquet.tmp").exists());

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;
        let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<_, _>>()?;
        let back = &batches[0];
        assert_eq!(back.num_rows(), 2);
        assert_eq!(back.schema().field(2).data_type(), &DataType::Date32);

        let rate = back
            .column(9)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!((rate.value(0) - 0.3).abs() < 1e-12);
        assert!(rate.is_null(1));
        assert!(back.column(1).is_null(0));
        Ok(())
    }
}
