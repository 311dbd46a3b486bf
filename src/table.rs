//! Table reassembly
//!
//! Concatenates decoded chunks into one record batch. Chunks written from the
//! same dataset normally share a schema; when they do not, the schemas are
//! merged (union of fields, first-seen order) and absent columns are filled
//! with nulls.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef};
use arrow::compute::concat_batches;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::error::{ChunkError, Result};

/// Zero-column, zero-row batch returned when nothing was read
pub fn empty_table() -> RecordBatch {
    RecordBatch::new_empty(Arc::new(Schema::empty()))
}

/// Merge the schemas of `batches` into one.
///
/// A field missing from any batch becomes nullable. Conflicting types for the
/// same field name are a `ChunkError::Schema`.
pub fn unify_schemas(batches: &[RecordBatch]) -> Result<SchemaRef> {
    let Some(first) = batches.first() else {
        return Ok(Arc::new(Schema::empty()));
    };
    if batches.iter().all(|b| b.schema() == first.schema()) {
        return Ok(first.schema());
    }

    let merged = Schema::try_merge(batches.iter().map(|b| b.schema().as_ref().clone()))
        .map_err(|e| ChunkError::Schema(e.to_string()))?;

    let fields: Vec<Field> = merged
        .fields()
        .iter()
        .map(|field| {
            let everywhere = batches
                .iter()
                .all(|b| b.schema().field_with_name(field.name()).is_ok());
            field
                .as_ref()
                .clone()
                .with_nullable(field.is_nullable() || !everywhere)
        })
        .collect();

    Ok(Arc::new(Schema::new_with_metadata(
        fields,
        merged.metadata().clone(),
    )))
}

/// Project `batch` onto `schema`, filling absent columns with nulls
pub fn align_batch(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    if batch.schema() == *schema {
        return Ok(batch.clone());
    }

    let rows = batch.num_rows();
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(column) => Arc::clone(column),
            None => new_null_array(field.data_type(), rows),
        })
        .collect();

    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

/// Concatenate batches in the given order into one batch
pub fn concat_batches_promoting(batches: &[RecordBatch]) -> Result<RecordBatch> {
    if batches.is_empty() {
        return Ok(empty_table());
    }

    let schema = unify_schemas(batches)?;
    let aligned = batches
        .iter()
        .map(|b| align_batch(b, &schema))
        .collect::<Result<Vec<_>>>()?;

    Ok(concat_batches(&schema, &aligned)?)
}

/// Names of columns whose values differ between two tables of equal schema
pub fn diff_columns(left: &RecordBatch, right: &RecordBatch) -> Vec<String> {
    let right_names: HashSet<&str> = right
        .schema_ref()
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect();

    left.schema_ref()
        .fields()
        .iter()
        .filter_map(|field| {
            let name = field.name();
            if !right_names.contains(name.as_str()) {
                return Some(name.clone());
            }
            let l = left.column_by_name(name)?;
            let r = right.column_by_name(name)?;
            if l.to_data() != r.to_data() {
                Some(name.clone())
            } else {
                None
            }
        })
        .collect()
}
