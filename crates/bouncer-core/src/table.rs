//! Tabular data collaborator behind the tabular reader.
//!
//! A provider opens a location URI and hands back a handle; the handle
//! reads one column of cell text at a time. Sheet indices are 0-based at
//! this boundary, column indices 1-based (the reader translates the
//! human-facing 1-based sheet number before calling).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::fetch::{FetchError, HttpFetcher};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("no table at {location}")]
    NotFound { location: String },
    #[error("sheet {sheet} out of range for {location}")]
    SheetOutOfRange { location: String, sheet: usize },
    #[error("column index {column} is out of range (columns are 1-based)")]
    InvalidColumn { column: usize },
    #[error("malformed grid document at {location}: {message}")]
    Malformed { location: String, message: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[async_trait]
pub trait TableProvider: Send + Sync {
    async fn open_table(&self, location: &str) -> Result<Box<dyn TableHandle>, TableError>;
}

#[async_trait]
pub trait TableHandle: Send + Sync {
    /// `sheet` is 0-based, `column` 1-based. Trailing empty cells are
    /// trimmed, interior gaps come back as empty strings.
    async fn read_column(&self, sheet: usize, column: usize) -> Result<Vec<String>, TableError>;
}

type Grid = Vec<Vec<String>>;

struct GridHandle {
    location: String,
    sheets: Arc<Vec<Grid>>,
}

#[async_trait]
impl TableHandle for GridHandle {
    async fn read_column(&self, sheet: usize, column: usize) -> Result<Vec<String>, TableError> {
        let grid = self
            .sheets
            .get(sheet)
            .ok_or_else(|| TableError::SheetOutOfRange {
                location: self.location.clone(),
                sheet,
            })?;
        let index = column
            .checked_sub(1)
            .ok_or(TableError::InvalidColumn { column })?;
        let mut cells: Vec<String> = grid
            .iter()
            .map(|row| row.get(index).cloned().unwrap_or_default())
            .collect();
        while cells.last().is_some_and(String::is_empty) {
            cells.pop();
        }
        Ok(cells)
    }
}

/// In-memory tables for tests and embedded fixtures.
#[derive(Default)]
pub struct StaticTables {
    tables: Mutex<HashMap<String, Arc<Vec<Grid>>>>,
}

impl StaticTables {
    pub async fn insert(&self, location: &str, sheets: Vec<Grid>) {
        let mut tables = self.tables.lock().await;
        tables.insert(location.to_string(), Arc::new(sheets));
    }
}

#[async_trait]
impl TableProvider for StaticTables {
    async fn open_table(&self, location: &str) -> Result<Box<dyn TableHandle>, TableError> {
        let tables = self.tables.lock().await;
        let sheets = tables
            .get(location)
            .cloned()
            .ok_or_else(|| TableError::NotFound {
                location: location.to_string(),
            })?;
        Ok(Box::new(GridHandle {
            location: location.to_string(),
            sheets,
        }))
    }
}

/// Grid documents served over HTTP as JSON: either `{"values": [[…]]}`
/// for a single sheet or `{"sheets": [{"values": [[…]]}, …]}`.
pub fn json_grid(fetcher: Arc<dyn HttpFetcher>) -> Arc<dyn TableProvider> {
    Arc::new(JsonGridTables { fetcher })
}

struct JsonGridTables {
    fetcher: Arc<dyn HttpFetcher>,
}

#[async_trait]
impl TableProvider for JsonGridTables {
    async fn open_table(&self, location: &str) -> Result<Box<dyn TableHandle>, TableError> {
        let body = self.fetcher.fetch(location, &[]).await?;
        let document: Value =
            serde_json::from_slice(&body).map_err(|error| TableError::Malformed {
                location: location.to_string(),
                message: error.to_string(),
            })?;
        let sheets = parse_grid_document(location, &document)?;
        Ok(Box::new(GridHandle {
            location: location.to_string(),
            sheets: Arc::new(sheets),
        }))
    }
}

fn parse_grid_document(location: &str, document: &Value) -> Result<Vec<Grid>, TableError> {
    if let Some(values) = document.get("values") {
        return Ok(vec![parse_grid(location, values)?]);
    }
    if let Some(sheets) = document.get("sheets").and_then(Value::as_array) {
        return sheets
            .iter()
            .map(|sheet| parse_grid(location, sheet.get("values").unwrap_or(&Value::Null)))
            .collect();
    }
    Err(TableError::Malformed {
        location: location.to_string(),
        message: "expected a \"values\" or \"sheets\" key".to_string(),
    })
}

fn parse_grid(location: &str, values: &Value) -> Result<Grid, TableError> {
    let rows = values.as_array().ok_or_else(|| TableError::Malformed {
        location: location.to_string(),
        message: "\"values\" must be an array of rows".to_string(),
    })?;
    rows.iter()
        .map(|row| {
            let cells = row.as_array().ok_or_else(|| TableError::Malformed {
                location: location.to_string(),
                message: "rows must be arrays of cells".to_string(),
            })?;
            Ok(cells.iter().map(cell_text).collect())
        })
        .collect()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}
