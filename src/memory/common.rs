//! Shared plumbing for the store adapters: paging, row decoding, timestamp
//! encoding, and the best-effort wrapper for secondary-index writes.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, ValidationError};
use crate::index::vector::bytes_to_embedding;
use crate::memory::types::Metadata;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;

// ── Paging ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One page of a `find` query. `page` is 1-based; `page_size` is clamped to 1..=200.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
    pub sort_by: Option<String>,
    pub direction: SortDirection,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: None,
            direction: SortDirection::Desc,
        }
    }
}

impl PageRequest {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Default::default()
        }
    }

    pub fn sorted_by(mut self, column: &str, direction: SortDirection) -> Self {
        self.sort_by = Some(column.to_string());
        self.direction = direction;
        self
    }

    fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    pub include_deleted: bool,
}

impl FindOptions {
    pub fn including_deleted() -> Self {
        Self {
            include_deleted: true,
        }
    }
}

/// Inclusive time bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Accumulates `WHERE` clauses with positional `?` parameters.
#[derive(Default)]
pub(crate) struct Filters {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    /// `clause` must contain exactly one `?`.
    pub fn bind(&mut self, clause: &str, value: impl Into<Value>) {
        self.clauses.push(clause.to_string());
        self.values.push(value.into());
    }

    pub fn live_only(&mut self, include_deleted: bool) {
        if !include_deleted {
            self.raw("deleted_at IS NULL");
        }
    }

    /// Unpaged select with the accumulated filters.
    pub fn select<T>(
        &self,
        conn: &Connection,
        table: &str,
        columns: &str,
        order_by: &str,
        map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, StoreError> {
        let sql = format!(
            "SELECT {columns} FROM {table}{} ORDER BY {order_by}",
            self.where_sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(self.values.iter()), |row| map(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Pick the sort column from a whitelist; the first entry is the default.
pub(crate) fn resolve_sort<'a>(
    request: &PageRequest,
    whitelist: &[&'a str],
) -> Result<&'a str, ValidationError> {
    match &request.sort_by {
        None => Ok(whitelist[0]),
        Some(col) => whitelist
            .iter()
            .find(|allowed| **allowed == col.as_str())
            .copied()
            .ok_or_else(|| {
                let mut err = ValidationError::new();
                err.push(
                    "sort_by",
                    format!("must be one of: {}", whitelist.join(", ")),
                );
                err
            }),
    }
}

/// Run a filtered, sorted, paginated query over one table.
pub(crate) fn paged<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    filters: &Filters,
    sort_column: &str,
    request: &PageRequest,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Page<T>, StoreError> {
    let where_sql = filters.where_sql();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table}{where_sql}"),
        params_from_iter(filters.values.iter()),
        |row| row.get(0),
    )?;

    let page = request.effective_page();
    let page_size = request.effective_page_size();
    let offset = (page as i64 - 1) * page_size as i64;
    let dir = request.direction.as_sql();

    let sql = format!(
        "SELECT {columns} FROM {table}{where_sql} ORDER BY {sort_column} {dir}, id {dir} \
         LIMIT {page_size} OFFSET {offset}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(filters.values.iter()), |row| map(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total: total as usize,
        page,
        page_size,
    })
}

// ── Encoding ──────────────────────────────────────────────────────────────────

pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}

pub fn metadata_to_sql(metadata: &Metadata) -> Result<String, serde_json::Error> {
    serde_json::to_string(metadata)
}

/// Shallow merge: keys in `patch` overwrite keys in `base`.
pub fn merge_metadata(base: &mut Metadata, patch: Metadata) {
    for (k, v) in patch {
        base.insert(k, v);
    }
}

/// The deterministic stand-in written when the embedding provider fails.
pub fn placeholder_embedding(dimensions: usize) -> Vec<f32> {
    vec![0.0; dimensions]
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

pub(crate) fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_time(&s).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_time(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn metadata_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Metadata> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(s) if !s.is_empty() => serde_json::from_str(&s).map_err(|e| conversion_error(idx, e)),
        _ => Ok(Metadata::new()),
    }
}

pub(crate) fn embedding_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<f32>> {
    let bytes: Option<Vec<u8>> = row.get(idx)?;
    Ok(bytes.map(|b| bytes_to_embedding(&b)).unwrap_or_default())
}

// ── Secondary writes ─────────────────────────────────────────────────────────

/// Run a secondary-index write. Failures are logged and swallowed; returns
/// whether the write succeeded.
pub fn best_effort(
    record_id: &str,
    index: &'static str,
    op: &'static str,
    f: impl FnOnce() -> anyhow::Result<()>,
) -> bool {
    match f() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(record_id, index, op, error = %e, "secondary index write failed");
            false
        }
    }
}
