//! Whitelists kept in one column of a tabular document, optionally
//! gated by a row-aligned condition column.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::condition::{self, Condition, Scalar};
use crate::identity;
use crate::table::{TableHandle, TableProvider};

use super::{ReaderError, SourceReader, WhitelistSource};

/// Reader over grid documents opened through `provider`. A document is
/// opened once per location and its columns cached for the life of the
/// process, so the identity and condition columns of a check share one
/// fetch.
pub fn grid(provider: Arc<dyn TableProvider>) -> Arc<dyn SourceReader> {
    Arc::new(TabularReader {
        provider,
        cache: Mutex::new(HashMap::new()),
    })
}

struct TabularReader {
    provider: Arc<dyn TableProvider>,
    cache: Mutex<HashMap<String, TableEntry>>,
}

/// One opened document plus its column reads, keyed by (sheet, column).
struct TableEntry {
    handle: Arc<dyn TableHandle>,
    columns: HashMap<(usize, usize), Arc<Vec<String>>>,
}

impl TabularReader {
    /// `sheet` 0-based, `column` 1-based. The cache lock stays held
    /// across the open and read so concurrent checks share one fetch.
    async fn column(
        &self,
        location: &str,
        sheet: usize,
        column: usize,
    ) -> Result<Arc<Vec<String>>, ReaderError> {
        let mut cache = self.cache.lock().await;
        let entry = match cache.entry(location.to_string()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let handle: Arc<dyn TableHandle> =
                    Arc::from(self.provider.open_table(location).await?);
                vacant.insert(TableEntry {
                    handle,
                    columns: HashMap::new(),
                })
            }
        };
        if let Some(cells) = entry.columns.get(&(sheet, column)) {
            return Ok(cells.clone());
        }
        let cells = Arc::new(entry.handle.read_column(sheet, column).await?);
        entry.columns.insert((sheet, column), cells.clone());
        Ok(cells)
    }
}

#[async_trait]
impl SourceReader for TabularReader {
    async fn check_allowed(
        &self,
        source: &WhitelistSource,
        identity: &str,
    ) -> Result<bool, ReaderError> {
        let WhitelistSource::Table(params) = source else {
            return Err(ReaderError::SourceMismatch);
        };
        let sheet = to_index(params.sheet, "sheet")? - 1;
        let column = to_index(params.column, "column")?;
        let identities = self.column(&params.location, sheet, column).await?;
        let target = identity::normalize(identity);

        let Some(cond) = params.condition.as_ref() else {
            return Ok(identities
                .iter()
                .any(|cell| identity::normalize(cell) == target));
        };

        let cond_column = condition_column(cond)?;
        let Some(row) = identities
            .iter()
            .position(|cell| identity::normalize(cell) == target)
        else {
            return Ok(false);
        };
        let cond_cells = self.column(&params.location, sheet, cond_column).await?;
        // The first row carrying the identity decides; a row past the
        // end of the condition column counts as not allowed.
        match cond_cells.get(row) {
            Some(cell) => Ok(condition::check(cond, &Scalar::from(cell.as_str()), true)),
            None => Ok(false),
        }
    }

    fn supports_listing(&self) -> bool {
        true
    }

    async fn read_users(
        &self,
        source: &WhitelistSource,
        limit: usize,
    ) -> Result<Vec<String>, ReaderError> {
        let WhitelistSource::Table(params) = source else {
            return Err(ReaderError::SourceMismatch);
        };
        let sheet = to_index(params.sheet, "sheet")? - 1;
        let column = to_index(params.column, "column")?;
        let identities = self.column(&params.location, sheet, column).await?;
        Ok(identities
            .iter()
            .map(|cell| identity::normalize(cell))
            .filter(|member| !member.is_empty())
            .take(limit)
            .collect())
    }
}

fn to_index(value: i64, name: &'static str) -> Result<usize, ReaderError> {
    usize::try_from(value)
        .ok()
        .filter(|&index| index >= 1)
        .ok_or(ReaderError::IndexOutOfRange { name, value })
}

/// In tabular sources the condition's parameter names the 1-based
/// column holding the value to test.
fn condition_column(cond: &Condition) -> Result<usize, ReaderError> {
    cond.param
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|&column| column >= 1)
        .ok_or_else(|| ReaderError::ConditionColumn {
            param: cond.param.clone(),
        })
}
