use arrow_array::RecordBatch;
use arrow_select::concat::concat_batches;
use geoparquet::writer::{
    GeoParquetRecordBatchEncoder, GeoParquetWriterEncoding, GeoParquetWriterOptionsBuilder,
};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::FareHexError;

/// Sibling path a file is written to before being renamed into place.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Runs `write` against the staging path and renames the result over `path`.
///
/// `path` only ever holds a complete file; a failed write leaves nothing
/// behind.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), FareHexError>
where
    F: FnOnce(File) -> Result<(), FareHexError>,
{
    let staging = staging_path(path);
    let result = File::create(&staging)
        .map_err(FareHexError::from)
        .and_then(write)
        .and_then(|_| fs::rename(&staging, path).map_err(FareHexError::from));
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

/// Write a RecordBatch to a plain Parquet file.
pub fn write_parquet(batch: &RecordBatch, path: impl AsRef<Path>) -> Result<(), FareHexError> {
    write_atomically(path.as_ref(), |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    })
}

/// Write a RecordBatch with a geometry column to GeoParquet (WKB encoding).
pub fn write_geoparquet(batch: &RecordBatch, path: impl AsRef<Path>) -> Result<(), FareHexError> {
    let schema = batch.schema();

    let options = GeoParquetWriterOptionsBuilder::default()
        .set_encoding(GeoParquetWriterEncoding::WKB)
        .build();

    let mut encoder = GeoParquetRecordBatchEncoder::try_new(&schema, &options)
        .map_err(|e| FareHexError::Parquet(e.to_string()))?;

    let encoded_batch = encoder
        .encode_record_batch(batch)
        .map_err(|e| FareHexError::Parquet(e.to_string()))?;

    let target_schema = encoder.target_schema();
    let kv_metadata = encoder
        .into_keyvalue()
        .map_err(|e| FareHexError::Parquet(e.to_string()))?;

    write_atomically(path.as_ref(), |file| {
        let mut writer = ArrowWriter::try_new(file, target_schema, None)?;
        writer.write(&encoded_batch)?;
        writer.append_key_value_metadata(kv_metadata);
        writer.finish()?;
        Ok(())
    })
}

/// Read every record batch of a Parquet file.
pub fn read_parquet(path: impl AsRef<Path>) -> Result<Vec<RecordBatch>, FareHexError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok(batches)
}

/// Read a whole Parquet file into one batch. An empty file yields an empty
/// batch with the file's schema.
pub fn read_parquet_table(path: impl AsRef<Path>) -> Result<RecordBatch, FareHexError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}
