//! Customer feature table.
//!
//! Cells are kept as the raw CSV text and only turned into numbers when a
//! row is aligned to the model's feature list, so one unparsable column
//! never prevents the rest of the table from loading.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::CustomerId;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("column '{0}' is missing from the CSV file")]
    MissingIdColumn(String),

    #[error("expected feature columns missing from the dataset: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("value '{value}' in column '{column}' is not numeric")]
    NonNumeric { column: String, value: String },
}

/// What to do with a feature value that is not a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionPolicy {
    /// Substitute 0.0, like `to_numeric(errors="coerce").fillna(0)`.
    #[default]
    Zero,
    /// Fail the request.
    Reject,
}

impl FromStr for CoercionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(CoercionPolicy::Zero),
            "reject" => Ok(CoercionPolicy::Reject),
            other => Err(format!(
                "unknown coercion policy '{}' (expected 'zero' or 'reject')",
                other
            )),
        }
    }
}

/// Parses one cell. Empty, NaN, infinite and non-numeric text yield `None`.
pub fn coerce_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") {
        return Some(1.0);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Some(0.0);
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_identifier(raw: &str) -> Option<CustomerId> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<CustomerId>() {
        return Some(id);
    }
    // ids written by a float column, e.g. "100002.0"
    let float = raw.parse::<f64>().ok()?;
    (float.is_finite() && float.fract() == 0.0).then_some(float as CustomerId)
}

/// Column positions of the expected features, in feature order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    positions: Vec<usize>,
}

/// In-memory customer table indexed by the identifier column.
#[derive(Debug, Clone)]
pub struct CustomerDataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    id_column: String,
    /// `None` when the identifier column is absent from the header.
    index: Option<HashMap<CustomerId, usize>>,
}

impl CustomerDataset {
    pub fn from_path(path: &Path, id_column: &str) -> Result<Self, DatasetError> {
        let file = std::fs::File::open(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let dataset = Self::from_reader(file, id_column)?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            columns = dataset.columns.len(),
            "Customer dataset loaded"
        );
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R, id_column: &str) -> Result<Self, DatasetError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            // Short rows are padded with empty cells at alignment time
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = csv.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in csv.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let index = match columns.iter().position(|c| c == id_column) {
            Some(pos) => {
                let mut index = HashMap::with_capacity(rows.len());
                let mut unparsable = 0usize;
                for (row_idx, row) in rows.iter().enumerate() {
                    match row.get(pos).and_then(|cell| parse_identifier(cell)) {
                        // first occurrence wins
                        Some(id) => {
                            index.entry(id).or_insert(row_idx);
                        }
                        None => unparsable += 1,
                    }
                }
                if unparsable > 0 {
                    warn!(
                        column = id_column,
                        count = unparsable,
                        "Rows with an unparsable identifier are not addressable"
                    );
                }
                Some(index)
            }
            None => {
                warn!(column = id_column, "Identifier column not found in dataset header");
                None
            }
        };

        Ok(Self {
            columns,
            rows,
            id_column: id_column.to_string(),
            index,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row position of `id`, or `Ok(None)` when no customer matches.
    pub fn find(&self, id: CustomerId) -> Result<Option<usize>, DatasetError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| DatasetError::MissingIdColumn(self.id_column.clone()))?;
        Ok(index.get(&id).copied())
    }

    /// Addressable identifiers in file order, each listed once.
    pub fn identifiers(&self) -> Result<Vec<CustomerId>, DatasetError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| DatasetError::MissingIdColumn(self.id_column.clone()))?;
        let mut ids: Vec<(usize, CustomerId)> = index.iter().map(|(id, row)| (*row, *id)).collect();
        ids.sort_unstable();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    /// Raw cells of row `row` keyed by column name. Cells missing from a
    /// short row come back empty.
    pub fn record(&self, row: usize) -> BTreeMap<String, String> {
        let cells = self.rows.get(row);
        self.columns
            .iter()
            .enumerate()
            .map(|(pos, column)| {
                let cell = cells.and_then(|c| c.get(pos)).cloned().unwrap_or_default();
                (column.clone(), cell)
            })
            .collect()
    }

    /// Resolves `features` to column positions. Columns not listed are dropped.
    pub fn project(&self, features: &[String]) -> Result<Projection, DatasetError> {
        let mut positions = Vec::with_capacity(features.len());
        let mut missing = Vec::new();
        for feature in features {
            match self.columns.iter().position(|c| c == feature) {
                Some(pos) => positions.push(pos),
                None => missing.push(feature.clone()),
            }
        }
        if missing.is_empty() {
            Ok(Projection { positions })
        } else {
            Err(DatasetError::MissingColumns(missing))
        }
    }

    /// Numeric feature vector for row `row`, in projection order.
    pub fn align(
        &self,
        row: usize,
        projection: &Projection,
        policy: CoercionPolicy,
    ) -> Result<Vec<f64>, DatasetError> {
        let cells = &self.rows[row];
        projection
            .positions
            .iter()
            .map(|&pos| {
                let raw = cells.get(pos).map(String::as_str).unwrap_or("");
                match (coerce_value(raw), policy) {
                    (Some(v), _) => Ok(v),
                    (None, CoercionPolicy::Zero) => Ok(0.0),
                    (None, CoercionPolicy::Reject) => Err(DatasetError::NonNumeric {
                        column: self.columns[pos].clone(),
                        value: raw.to_string(),
                    }),
                }
            })
            .collect()
    }
}

/// Where each request gets its dataset from.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// Loaded once at startup and shared.
    Preloaded(Arc<CustomerDataset>),
    /// Re-read from disk on every request.
    PerRequest { path: PathBuf, id_column: String },
}

impl DatasetSource {
    pub fn get(&self) -> Result<Arc<CustomerDataset>, DatasetError> {
        match self {
            DatasetSource::Preloaded(dataset) => Ok(Arc::clone(dataset)),
            DatasetSource::PerRequest { path, id_column } => {
                debug!(path = %path.display(), "Reloading customer dataset");
                CustomerDataset::from_path(path, id_column).map(Arc::new)
            }
        }
    }

    /// Row count when the table is held in memory.
    pub fn preloaded_len(&self) -> Option<usize> {
        match self {
            DatasetSource::Preloaded(dataset) => Some(dataset.len()),
            DatasetSource::PerRequest { .. } => None,
        }
    }
}
