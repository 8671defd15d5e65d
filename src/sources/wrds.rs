use crate::errors::{DataHubError, Result};
use crate::models::stock;
use crate::sources::base::RemoteSource;
use crate::util::arrow_utils::date32_from_naive;
use arrow::array::{ArrayRef, Date32Builder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use log::{debug, info, warn};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Row, TypeInfo};
use std::sync::Arc;

pub const WRDS_HOST: &str = "wrds-pgdata.wharton.upenn.edu";
pub const WRDS_PORT: u16 = 9737;
pub const WRDS_DATABASE: &str = "wrds";

/// CRSP daily stock file joined to the name history valid on each date,
/// restricted to common shares (share codes 10, 11) listed on NYSE, AMEX
/// or NASDAQ (exchange codes 1 to 3). `$1`/`$2` are the inclusive range.
pub const CRSP_DAILY_QUERY: &str = r#"
    SELECT
        dsf.date,
        dsf.permno::int8 AS permno,
        dsf.permco::int8 AS permco,
        msenames.exchcd::int8 AS exchcd,
        dsf.prc::float8 AS prc,
        dsf.bid::float8 AS bid,
        dsf.ask::float8 AS ask,
        dsf.shrout::float8 AS shrout,
        dsf.cfacpr::float8 AS cfacpr,
        dsf.cfacshr::float8 AS cfacshr,
        dsf.ret::float8 AS ret,
        dsf.retx::float8 AS retx
    FROM crsp.dsf AS dsf
    LEFT JOIN
        crsp.msenames AS msenames
    ON
        dsf.permno = msenames.permno AND
        msenames.namedt <= dsf.date AND
        dsf.date <= msenames.nameendt
    WHERE
        dsf.date BETWEEN $1 AND $2 AND
        msenames.shrcd IN (10, 11) AND
        msenames.exchcd BETWEEN 1 AND 3
"#;

#[derive(Debug, Clone)]
pub struct WrdsCredentials {
    pub username: String,
    /// Falls back to `PGPASSWORD` / `~/.pgpass` when unset.
    pub password: Option<String>,
}

impl WrdsCredentials {
    pub fn new(username: &str, password: Option<&str>) -> Self {
        Self {
            username: username.to_string(),
            password: password.map(str::to_string),
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(WRDS_HOST)
            .port(WRDS_PORT)
            .database(WRDS_DATABASE)
            .username(&self.username)
            .ssl_mode(PgSslMode::Require);

        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

/// A database session that has to be closed explicitly once used.
#[async_trait]
pub trait ScopedSession: Send + Sized {
    /// Runs `sql` with the dates bound in order as `$1`, `$2`, ...
    async fn query_batch(
        &mut self,
        sql: &str,
        params: &[NaiveDate],
        empty_schema: &SchemaRef,
    ) -> Result<RecordBatch>;

    async fn close(self) -> Result<()>;
}

/// Runs one query and closes the session whatever the outcome. A query
/// failure is returned ahead of a failure to close.
pub async fn query_then_close<S: ScopedSession>(
    mut session: S,
    sql: &str,
    params: &[NaiveDate],
    empty_schema: &SchemaRef,
) -> Result<RecordBatch> {
    let batch = session.query_batch(sql, params, empty_schema).await;
    let closed = session.close().await;

    let batch = batch?;
    closed?;
    Ok(batch)
}

/// One authenticated connection to WRDS.
///
/// Callers must finish with [`ScopedSession::close`], on the error path as
/// well; a session dropped without it still releases its socket.
pub struct WrdsSession {
    conn: Option<PgConnection>,
}

impl WrdsSession {
    pub async fn open(credentials: &WrdsCredentials) -> Result<Self> {
        info!("Connecting to WRDS as {}", credentials.username);
        let conn = PgConnection::connect_with(&credentials.connect_options()).await?;
        Ok(Self { conn: Some(conn) })
    }
}

#[async_trait]
impl ScopedSession for WrdsSession {
    async fn query_batch(
        &mut self,
        sql: &str,
        params: &[NaiveDate],
        empty_schema: &SchemaRef,
    ) -> Result<RecordBatch> {
        let conn = self.conn.as_mut()
            .ok_or_else(|| DataHubError::DataError("WRDS session already closed".to_string()))?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }

        // rows go straight into the column builders
        let mut rows = query.fetch(&mut *conn);
        let mut builder: Option<BatchBuilder> = None;
        while let Some(row) = rows.try_next().await? {
            if builder.is_none() {
                builder = Some(BatchBuilder::for_row(&row)?);
            }
            if let Some(builder) = builder.as_mut() {
                builder.append(&row)?;
            }
        }

        let batch = finish_batch(builder, empty_schema)?;
        debug!("WRDS query returned {} rows", batch.num_rows());
        Ok(batch)
    }

    async fn close(mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            debug!("WRDS session closed");
        }
        Ok(())
    }
}

impl Drop for WrdsSession {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            warn!("WRDS session dropped without close; connection released");
        }
    }
}

/// A fixed WRDS query over a date range, opening a fresh session per fetch.
pub struct WrdsSource {
    credentials: WrdsCredentials,
    query: &'static str,
    empty_schema: SchemaRef,
}

impl WrdsSource {
    pub fn crsp_daily_stock(credentials: WrdsCredentials) -> Self {
        Self {
            credentials,
            query: CRSP_DAILY_QUERY,
            empty_schema: Arc::new(stock::stock_schema()),
        }
    }
}

#[async_trait]
impl RemoteSource for WrdsSource {
    fn source_name(&self) -> &'static str {
        "WRDS"
    }

    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<RecordBatch> {
        info!("Querying WRDS for {} to {}", start, end);

        let session = WrdsSession::open(&self.credentials).await?;
        query_then_close(session, self.query, &[start, end], &self.empty_schema).await
    }
}

/// Postgres column types the CRSP pull knows how to carry into Arrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Date,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
}

impl ColumnKind {
    pub fn from_pg_type(name: &str) -> Result<Self> {
        match name {
            "DATE" => Ok(Self::Date),
            "INT2" => Ok(Self::Int2),
            "INT4" => Ok(Self::Int4),
            "INT8" => Ok(Self::Int8),
            "FLOAT4" => Ok(Self::Float4),
            "FLOAT8" => Ok(Self::Float8),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Ok(Self::Text),
            other => Err(DataHubError::DataError(format!(
                "Unsupported column type {}", other
            ))),
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            Self::Date => DataType::Date32,
            Self::Int2 | Self::Int4 | Self::Int8 => DataType::Int64,
            Self::Float4 | Self::Float8 => DataType::Float64,
            Self::Text => DataType::Utf8,
        }
    }

    /// Every pulled column is nullable, the same as in `stock_schema()`.
    pub fn field(self, name: &str) -> Field {
        Field::new(name, self.data_type(), true)
    }
}

enum ColumnBuilder {
    Date(Date32Builder),
    Int(ColumnKind, Int64Builder),
    Float(ColumnKind, Float64Builder),
    Text(StringBuilder),
}

impl ColumnBuilder {
    fn new(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Date => Self::Date(Date32Builder::new()),
            ColumnKind::Int2 | ColumnKind::Int4 | ColumnKind::Int8 => Self::Int(kind, Int64Builder::new()),
            ColumnKind::Float4 | ColumnKind::Float8 => Self::Float(kind, Float64Builder::new()),
            ColumnKind::Text => Self::Text(StringBuilder::new()),
        }
    }

    fn append(&mut self, row: &PgRow, i: usize) -> Result<()> {
        match self {
            Self::Date(b) => b.append_option(row.try_get::<Option<NaiveDate>, _>(i)?.map(date32_from_naive)),
            Self::Int(ColumnKind::Int2, b) => b.append_option(row.try_get::<Option<i16>, _>(i)?.map(i64::from)),
            Self::Int(ColumnKind::Int4, b) => b.append_option(row.try_get::<Option<i32>, _>(i)?.map(i64::from)),
            Self::Int(_, b) => b.append_option(row.try_get::<Option<i64>, _>(i)?),
            Self::Float(ColumnKind::Float4, b) => b.append_option(row.try_get::<Option<f32>, _>(i)?.map(f64::from)),
            Self::Float(_, b) => b.append_option(row.try_get::<Option<f64>, _>(i)?),
            Self::Text(b) => b.append_option(row.try_get::<Option<String>, _>(i)?),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            Self::Date(b) => Arc::new(b.finish()),
            Self::Int(_, b) => Arc::new(b.finish()),
            Self::Float(_, b) => Arc::new(b.finish()),
            Self::Text(b) => Arc::new(b.finish()),
        }
    }
}

/// Accumulates streamed rows into columns that follow the row metadata,
/// names included, so repeated names survive for the de-duplication step.
pub struct BatchBuilder {
    fields: Vec<Field>,
    columns: Vec<ColumnBuilder>,
}

impl BatchBuilder {
    pub fn for_row(row: &PgRow) -> Result<Self> {
        let mut fields = Vec::with_capacity(row.columns().len());
        let mut columns = Vec::with_capacity(row.columns().len());

        for column in row.columns() {
            let kind = ColumnKind::from_pg_type(column.type_info().name())?;
            fields.push(kind.field(column.name()));
            columns.push(ColumnBuilder::new(kind));
        }

        Ok(Self { fields, columns })
    }

    pub fn append(&mut self, row: &PgRow) -> Result<()> {
        for (i, column) in self.columns.iter_mut().enumerate() {
            column.append(row, i)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<RecordBatch> {
        let columns = self.columns.iter_mut().map(ColumnBuilder::finish).collect();
        Ok(RecordBatch::try_new(Arc::new(Schema::new(self.fields)), columns)?)
    }
}

/// With no rows there is no column metadata, so `empty_schema` stands in.
pub fn finish_batch(builder: Option<BatchBuilder>, empty_schema: &SchemaRef) -> Result<RecordBatch> {
    match builder {
        Some(builder) => builder.finish(),
        None => Ok(RecordBatch::new_empty(empty_schema.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn maps_crsp_column_types() {
        assert_eq!(ColumnKind::from_pg_type("DATE").unwrap().data_type(), DataType::Date32);
        assert_eq!(ColumnKind::from_pg_type("INT4").unwrap().data_type(), DataType::Int64);
        assert_eq!(ColumnKind::from_pg_type("FLOAT8").unwrap().data_type(), DataType::Float64);
        assert_eq!(ColumnKind::from_pg_type("VARCHAR").unwrap().data_type(), DataType::Utf8);
    }

    #[test]
    fn unknown_column_type_is_schema_drift() {
        assert!(matches!(
            ColumnKind::from_pg_type("NUMERIC"),
            Err(DataHubError::DataError(_))
        ));
    }

    #[test]
    fn empty_result_uses_stock_schema() {
        let schema: SchemaRef = Arc::new(stock::stock_schema());
        let batch = finish_batch(None, &schema).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), schema);
    }

    #[test]
    fn pulled_fields_match_stock_schema() {
        let schema = stock::stock_schema();
        assert_eq!(ColumnKind::Date.field(stock::DATE), *schema.field(0));
        assert_eq!(ColumnKind::Int8.field(stock::PERMNO), *schema.field(1));
        assert_eq!(ColumnKind::Int8.field(stock::EXCHCD), *schema.field(3));
        assert_eq!(ColumnKind::Float8.field(stock::SHROUT), *schema.field(7));
    }

    struct FakeSession {
        fail_query: bool,
        fail_close: bool,
        closed: Arc<AtomicBool>,
    }

    impl FakeSession {
        fn new(fail_query: bool, fail_close: bool) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            (Self { fail_query, fail_close, closed: closed.clone() }, closed)
        }
    }

    #[async_trait]
    impl ScopedSession for FakeSession {
        async fn query_batch(
            &mut self,
            _sql: &str,
            _params: &[NaiveDate],
            empty_schema: &SchemaRef,
        ) -> Result<RecordBatch> {
            if self.fail_query {
                return Err(DataHubError::DataError("relation crsp.dsf does not exist".to_string()));
            }
            Ok(RecordBatch::new_empty(empty_schema.clone()))
        }

        async fn close(self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(DataHubError::DatabaseError(sqlx::Error::Protocol("connection reset".to_string())));
            }
            Ok(())
        }
    }

    fn range() -> [NaiveDate; 2] {
        [
            NaiveDate::from_ymd_opt(2020, 2, 15).unwrap(),
            NaiveDate::from_ymd_opt(2020, 6, 30).unwrap(),
        ]
    }

    #[tokio::test]
    async fn failed_query_still_closes_session() {
        let schema: SchemaRef = Arc::new(stock::stock_schema());
        let (session, closed) = FakeSession::new(true, false);

        let result = query_then_close(session, CRSP_DAILY_QUERY, &range(), &schema).await;

        assert!(matches!(result, Err(DataHubError::DataError(_))));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn query_error_outranks_close_error() {
        let schema: SchemaRef = Arc::new(stock::stock_schema());
        let (session, closed) = FakeSession::new(true, true);

        let result = query_then_close(session, CRSP_DAILY_QUERY, &range(), &schema).await;

        assert!(matches!(result, Err(DataHubError::DataError(_))));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn close_error_surfaces_after_successful_query() {
        let schema: SchemaRef = Arc::new(stock::stock_schema());
        let (session, closed) = FakeSession::new(false, true);

        let result = query_then_close(session, CRSP_DAILY_QUERY, &range(), &schema).await;

        assert!(matches!(result, Err(DataHubError::DatabaseError(_))));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn successful_query_closes_and_returns_batch() {
        let schema: SchemaRef = Arc::new(stock::stock_schema());
        let (session, closed) = FakeSession::new(false, false);

        let batch = query_then_close(session, CRSP_DAILY_QUERY, &range(), &schema).await.unwrap();

        assert_eq!(batch.schema(), schema);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn query_filters_common_stock_on_three_exchanges() {
        assert!(CRSP_DAILY_QUERY.contains("msenames.shrcd IN (10, 11)"));
        assert!(CRSP_DAILY_QUERY.contains("msenames.exchcd BETWEEN 1 AND 3"));
        assert!(CRSP_DAILY_QUERY.contains("dsf.date BETWEEN $1 AND $2"));
    }

    #[test]
    fn password_is_optional() {
        let credentials = WrdsCredentials::new("jdoe", None);
        assert_eq!(credentials.username, "jdoe");
        assert!(credentials.password.is_none());
    }
}
