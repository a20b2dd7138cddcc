//! Extraction layer over the 1C:Retail Postgres mirror.
//!
//! The mirror keeps 1C's physical naming: accumulation registers are
//! `_AccumRgNNNNN` tables with numbered `_FldNNNNN` columns, reference
//! catalogs are `_ReferenceNNN`, and every stored date carries a fixed
//! +2000-year offset. The queries here map those columns back to named
//! fields and the date helpers shift values between the real and source
//! calendars.

use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "resa-adapters";

/// Years added to every date stored in the source database.
pub const SOURCE_YEAR_OFFSET: i32 = 2000;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("source database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Converts a serialized source timestamp to a real one by rewriting the
/// year digits. The offset is applied textually: shifting the parsed date
/// instead would require calendar arithmetic across two millennia, and the
/// source serializations are not uniform enough to parse before shifting.
///
/// Returns `None` for values without a 4+ digit year prefix or with an
/// unparseable remainder.
pub fn convert_source_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    let digits = raw.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits < 4 {
        return None;
    }
    let year: i32 = raw[..digits].parse().ok()?;
    let shifted = format!("{}{}", year - SOURCE_YEAR_OFFSET, &raw[digits..]);
    parse_real_timestamp(&shifted)
}

/// Date part of [`convert_source_date`].
pub fn convert_source_day(raw: &str) -> Option<NaiveDate> {
    convert_source_date(raw).map(|dt| dt.date())
}

fn parse_real_timestamp(value: &str) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Serializes a real date as a source-calendar query bound.
pub fn to_source_date(date: NaiveDate) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year() + SOURCE_YEAR_OFFSET,
        date.month(),
        date.day()
    )
}

/// End-of-day cutoff in the source calendar, for inclusive snapshot bounds.
pub fn to_source_day_end(date: NaiveDate) -> String {
    format!(
        "{:04}-{:02}-{:02}T23:59:59.999999",
        date.year() + SOURCE_YEAR_OFFSET,
        date.month(),
        date.day()
    )
}

/// Picks the store name for a sales row: the parent entity when the
/// warehouse has one, else the warehouse itself. Blank names count as
/// missing.
pub fn resolve_store(parent: Option<&str>, warehouse: Option<&str>) -> Option<String> {
    named(parent).or_else(|| named(warehouse))
}

fn named(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extraction range: inclusive start, exclusive end, either side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractWindow {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl ExtractWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(date: NaiveDate) -> Self {
        Self {
            since: Some(date),
            until: None,
        }
    }

    pub fn between(since: NaiveDate, until: NaiveDate) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
        }
    }
}

/// Sales register line as extracted, offset dates intact.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RawSaleRow {
    pub period: String,
    pub warehouse: Option<String>,
    pub parent_group: Option<String>,
    pub product: Option<String>,
    pub unit: Option<String>,
    pub quantity: Option<f64>,
    pub revenue: Option<f64>,
    pub recorder: Option<String>,
    pub line_no: Option<i64>,
}

/// Net stock position, store already parent-resolved in SQL.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RawStockRow {
    pub store: Option<String>,
    pub product: Option<String>,
    pub quantity: f64,
}

/// Daily visitor total per store, visit date still in the source calendar.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RawVisitorRow {
    pub visit_date: String,
    pub store: Option<String>,
    pub visitor_count: Option<f64>,
}

// Sales register _AccumRg53715: _Fld53725RRef → warehouse, _Fld53716RRef →
// product, _Fld53731 → quantity, _Fld53732 → revenue. The unit catalog hangs
// off the product catalog via _Fld9817RRef.
const SALES_QUERY: &str = "\
SELECT
    CAST(s._Period AS text) AS period,
    w._Description AS warehouse,
    m._Description AS parent_group,
    n._Description AS product,
    u._Description AS unit,
    CAST(s._Fld53731 AS float8) AS quantity,
    CAST(s._Fld53732 AS float8) AS revenue,
    upper(encode(s._RecorderRRef, 'hex')) AS recorder,
    CAST(s._LineNo AS bigint) AS line_no
FROM _AccumRg53715 s
INNER JOIN _Reference640 w ON s._Fld53725RRef = w._IDRRef
LEFT JOIN _Reference640 m ON w._ParentIDRRef = m._IDRRef
LEFT JOIN _Reference387 n ON s._Fld53716RRef = n._IDRRef
LEFT JOIN _Reference188 u ON n._Fld9817RRef = u._IDRRef";

fn sales_sql(window: ExtractWindow) -> String {
    let mut sql = String::from(SALES_QUERY);
    let mut bind = 0;
    if window.since.is_some() {
        bind += 1;
        sql.push_str(&format!("\nWHERE s._Period >= ${bind}::timestamp"));
    }
    if window.until.is_some() {
        bind += 1;
        let keyword = if bind == 1 { "WHERE" } else { "  AND" };
        sql.push_str(&format!("\n{keyword} s._Period < ${bind}::timestamp"));
    }
    sql.push_str("\nORDER BY s._Period");
    sql
}

// Stock register _AccumRg52568: _Fld52573RRef → store, _Fld52570RRef →
// product, _Fld52575 → quantity. _RecordKind 0 is receipt, anything else an
// expense, so balances are signed sums up to the cutoff.
const STOCK_QUERY: &str = "\
WITH stock AS (
    SELECT
        CAST(COALESCE(m._Description, w._Description) AS text) AS store,
        CAST(n._Description AS text) AS product,
        SUM(CASE WHEN s._RecordKind = 0 THEN s._Fld52575 ELSE -s._Fld52575 END) AS net
    FROM _AccumRg52568 s
    INNER JOIN _Reference640 w ON s._Fld52573RRef = w._IDRRef
    LEFT JOIN _Reference640 m ON w._ParentIDRRef = m._IDRRef
    INNER JOIN _Reference387 n ON s._Fld52570RRef = n._IDRRef
    WHERE s._Active = true
      AND s._Period <= $1::timestamp
    GROUP BY
        CAST(COALESCE(m._Description, w._Description) AS text),
        CAST(n._Description AS text)
    HAVING SUM(CASE WHEN s._RecordKind = 0 THEN s._Fld52575 ELSE -s._Fld52575 END) <> 0
)
SELECT store, product, CAST(net AS float8) AS quantity
FROM stock
ORDER BY store, product";

// Visitor register _AccumRg53554: _Fld53555RRef → counter's warehouse,
// _Fld53556 → visitor count. Counts are rolled up per day and store here so
// one row per (date, store) leaves the database.
const VISITORS_QUERY: &str = "\
SELECT
    CAST(CAST(v._Period AS date) AS text) AS visit_date,
    COALESCE(m._Description, w._Description) AS store,
    CAST(SUM(v._Fld53556) AS float8) AS visitor_count
FROM _AccumRg53554 v
INNER JOIN _Reference640 w ON v._Fld53555RRef = w._IDRRef
LEFT JOIN _Reference640 m ON w._ParentIDRRef = m._IDRRef
WHERE v._Active = true
  AND v._Period >= $1::timestamp
GROUP BY CAST(v._Period AS date), COALESCE(m._Description, w._Description)
ORDER BY visit_date, store";

/// Read side of the pipeline: a pooled connection to the mirror plus one
/// fetch per dataset.
pub struct OneCSource {
    pool: PgPool,
}

impl OneCSource {
    pub async fn connect(database_url: &str) -> Result<Self, AdapterError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fetch_sales(
        &self,
        window: ExtractWindow,
    ) -> Result<Vec<RawSaleRow>, AdapterError> {
        let sql = sales_sql(window);
        let mut query = sqlx::query_as::<_, RawSaleRow>(&sql);
        if let Some(since) = window.since {
            query = query.bind(to_source_date(since));
        }
        if let Some(until) = window.until {
            query = query.bind(to_source_date(until));
        }
        let rows = query.fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "fetched sales register rows");
        Ok(rows)
    }

    pub async fn fetch_stock(
        &self,
        snapshot_date: NaiveDate,
    ) -> Result<Vec<RawStockRow>, AdapterError> {
        let rows = sqlx::query_as::<_, RawStockRow>(STOCK_QUERY)
            .bind(to_source_day_end(snapshot_date))
            .fetch_all(&self.pool)
            .await?;
        debug!(rows = rows.len(), %snapshot_date, "fetched stock balances");
        Ok(rows)
    }

    pub async fn fetch_visitors(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<RawVisitorRow>, AdapterError> {
        let rows = sqlx::query_as::<_, RawVisitorRow>(VISITORS_QUERY)
            .bind(to_source_date(since))
            .fetch_all(&self.pool)
            .await?;
        debug!(rows = rows.len(), %since, "fetched visitor totals");
        Ok(rows)
    }
}
