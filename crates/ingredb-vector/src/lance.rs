use anyhow::{Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Float64Type, Int32Type, Int64Type};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::DataType;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, DistanceType, Table};
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::debug;

use ingredb_core::traits::VectorIndex;
use ingredb_core::types::{Meta, VectorMatch};
use ingredb_core::Error;

const SKIPPED_COLUMNS: [&str; 4] = ["id", "vector", "_distance", "_rowid"];

/// Read-only handle on a LanceDB table. Owns a runtime so the synchronous
/// pipeline can drive lancedb's async API.
pub struct LanceVectorIndex { rt: Runtime, table: Table, table_name: String }

impl LanceVectorIndex {
    pub fn open(db_dir: &Path, table_name: &str) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        let uri = db_dir.to_string_lossy().to_string();
        let table = rt
            .block_on(async {
                let db = connect(&uri).execute().await?;
                db.open_table(table_name).execute().await
            })
            .with_context(|| format!("opening LanceDB table '{}' at {}", table_name, uri))?;
        debug!(table = table_name, "LanceDB table opened");
        Ok(Self { rt, table, table_name: table_name.to_string() })
    }

    pub fn table_name(&self) -> &str { &self.table_name }
}

impl VectorIndex for LanceVectorIndex {
    fn search_vec(&self, query_vec: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let batches: Vec<RecordBatch> = self.rt.block_on(async {
            let stream = self
                .table
                .vector_search(query_vec.to_vec())?
                .distance_type(DistanceType::Cosine)
                .limit(k)
                .execute()
                .await?;
            let batches: Vec<RecordBatch> = stream.try_collect().await?;
            Ok::<_, anyhow::Error>(batches)
        })?;
        let mut hits = Vec::new();
        for batch in &batches { hits.extend(batch_to_matches(batch)?); }
        debug!(table = %self.table_name, k, hits = hits.len(), "vector search");
        Ok(hits)
    }
}

fn batch_to_matches(batch: &RecordBatch) -> Result<Vec<VectorMatch>> {
    let ids = batch
        .column_by_name("id")
        .ok_or_else(|| Error::Index("vector table has no 'id' column".into()))?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<arrow_array::Float32Array>());
    let schema = batch.schema();
    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let id = cell_to_string(ids, i).unwrap_or_default();
        let score = distances.map_or(0.0, |d| 1.0 - d.value(i));
        let mut metadata = Meta::new();
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            if SKIPPED_COLUMNS.contains(&field.name().as_str()) { continue; }
            if let Some(value) = cell_to_string(column, i) { metadata.insert(field.name().clone(), value); }
        }
        out.push(VectorMatch { id, score, metadata });
    }
    Ok(out)
}

/// Renders a scalar cell as text. Nulls and non-scalar types yield `None`,
/// which leaves the key absent from the metadata map.
fn cell_to_string(column: &ArrayRef, i: usize) -> Option<String> {
    if column.is_null(i) { return None; }
    match column.data_type() {
        DataType::Utf8 => Some(column.as_string::<i32>().value(i).to_string()),
        DataType::LargeUtf8 => Some(column.as_string::<i64>().value(i).to_string()),
        DataType::Boolean => Some(column.as_boolean().value(i).to_string()),
        DataType::Int32 => Some(column.as_primitive::<Int32Type>().value(i).to_string()),
        DataType::Int64 => Some(column.as_primitive::<Int64Type>().value(i).to_string()),
        DataType::Float32 => Some(column.as_primitive::<Float32Type>().value(i).to_string()),
        DataType::Float64 => Some(column.as_primitive::<Float64Type>().value(i).to_string()),
        _ => None,
    }
}
