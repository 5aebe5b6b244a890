#[cfg(test)]
mod tests;

use anyhow::Context;
use arrow::array::{Array, FixedSizeListArray, Float32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::{KbError, Result};

const VECTOR_COLUMN: &str = "vector";
const DIMENSION_KEY: &str = "dimension";
const FORMAT_VERSION_KEY: &str = "format_version";
const FORMAT_VERSION: &str = "1";

/// Exact nearest-neighbor index over fixed-dimension vectors.
///
/// Vectors live in one row-major buffer; slot `i` is the `i`-th inserted vector.
/// Search is exhaustive, which is fine for library-scale collections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

/// One search hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Euclidean distance to the query
    pub distance: f32,
    pub slot: usize,
}

impl VectorIndex {
    /// Builds a new index from vectors in slot order.
    ///
    /// All vectors must share one non-zero dimension and contain only finite values.
    #[inline]
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Ok(Self::default());
        };

        let dimension = first.len();
        if dimension == 0 {
            return Err(KbError::InvalidArgument(
                "vectors must have at least one dimension".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(dimension * vectors.len());
        for (slot, vector) in vectors.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(KbError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(KbError::InvalidArgument(format!(
                    "vector in slot {} contains a non-finite value",
                    slot
                )));
            }
            data.extend(vector);
        }

        Ok(Self { dimension, data })
    }

    /// Dimension of the stored vectors, 0 for an empty index
    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        if slot >= self.len() {
            return None;
        }
        let start = slot * self.dimension;
        self.data.get(start..start + self.dimension)
    }

    /// Returns at most `k` slots ordered by ascending distance, ties broken by slot
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(KbError::InvalidArgument(
                "k must be greater than zero".to_string(),
            ));
        }

        if self.is_empty() {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(KbError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, vector)| (squared_euclidean(query, vector), slot))
            .collect();

        let by_distance_then_slot = |a: &(f32, usize), b: &(f32, usize)| -> Ordering {
            a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
        };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance_then_slot);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance_then_slot);

        Ok(scored
            .into_iter()
            .map(|(squared, slot)| Neighbor {
                distance: squared.sqrt(),
                slot,
            })
            .collect())
    }

    /// Writes the index as an Arrow IPC file and syncs it to disk
    #[inline]
    pub fn persist(&self, path: &Path) -> Result<()> {
        let list_size = self.dimension_i32()?;
        let schema = Arc::new(Self::schema(list_size));

        let file = File::create(path)
            .with_context(|| format!("Failed to create index file: {}", path.display()))?;
        let mut writer = FileWriter::try_new(BufWriter::new(file), &schema)
            .context("Failed to start Arrow IPC writer")?;

        if !self.is_empty() {
            let values = Arc::new(Float32Array::from(self.data.clone()));
            let list = FixedSizeListArray::try_new(Self::item_field(), list_size, values, None)
                .context("Failed to assemble vector column")?;
            let batch = RecordBatch::try_new(Arc::clone(&schema), vec![Arc::new(list)])
                .context("Failed to assemble vector batch")?;
            writer.write(&batch).context("Failed to write vector batch")?;
        }

        writer.finish().context("Failed to finish Arrow IPC file")?;
        let file = writer
            .into_inner()
            .context("Failed to flush Arrow IPC writer")?
            .into_inner()
            .map_err(|e| KbError::Io(e.into_error()))?;
        file.sync_all()?;

        debug!(
            "Persisted {} vectors ({} dims) to {}",
            self.len(),
            self.dimension,
            path.display()
        );
        Ok(())
    }

    /// Reads an index written by [`VectorIndex::persist`].
    ///
    /// Any structural problem is reported as [`KbError::IndexCorrupt`].
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let corrupt =
            |what: String| KbError::IndexCorrupt(format!("{}: {}", path.display(), what));

        let file = File::open(path)?;
        let reader = FileReader::try_new(BufReader::new(file), None)
            .map_err(|e| corrupt(format!("not an Arrow IPC file ({})", e)))?;

        let schema = reader.schema();
        let dimension: usize = schema
            .metadata()
            .get(DIMENSION_KEY)
            .ok_or_else(|| corrupt("missing dimension metadata".to_string()))?
            .parse()
            .map_err(|_| corrupt("unreadable dimension metadata".to_string()))?;

        match schema.metadata().get(FORMAT_VERSION_KEY).map(String::as_str) {
            Some(FORMAT_VERSION) => {}
            other => {
                return Err(corrupt(format!("unsupported format version {:?}", other)));
            }
        }

        let mut data = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| corrupt(format!("unreadable batch ({})", e)))?;
            let list = batch
                .column_by_name(VECTOR_COLUMN)
                .and_then(|column| column.as_any().downcast_ref::<FixedSizeListArray>())
                .ok_or_else(|| corrupt("missing vector column".to_string()))?;

            if list.value_length() as usize != dimension || list.null_count() > 0 {
                return Err(corrupt("vector column does not match dimension".to_string()));
            }

            for row in 0..list.len() {
                let row_values = list.value(row);
                let floats = row_values
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| corrupt("vector values are not f32".to_string()))?;
                if floats.null_count() > 0 {
                    return Err(corrupt(format!("null value in slot {}", data.len() / dimension)));
                }
                data.extend_from_slice(floats.values());
            }
        }

        if !data.is_empty() && dimension == 0 {
            return Err(corrupt("vectors present but dimension is zero".to_string()));
        }

        let index = Self {
            dimension: if data.is_empty() { 0 } else { dimension },
            data,
        };
        debug!(
            "Loaded {} vectors ({} dims) from {}",
            index.len(),
            index.dimension,
            path.display()
        );
        Ok(index)
    }

    fn dimension_i32(&self) -> Result<i32> {
        i32::try_from(self.dimension).map_err(|_| {
            KbError::InvalidArgument(format!("dimension {} is too large", self.dimension))
        })
    }

    fn item_field() -> Arc<Field> {
        Arc::new(Field::new("item", DataType::Float32, false))
    }

    fn schema(list_size: i32) -> Schema {
        let metadata = HashMap::from([
            (DIMENSION_KEY.to_string(), list_size.to_string()),
            (FORMAT_VERSION_KEY.to_string(), FORMAT_VERSION.to_string()),
        ]);
        Schema::new_with_metadata(
            vec![Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(Self::item_field(), list_size),
                false,
            )],
            metadata,
        )
    }
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}
