//! PostgreSQL backend over `tokio-postgres`.
//!
//! Each session owns one client and a current-thread Tokio runtime that drives
//! it; every call blocks on that runtime. A batch is a single `INSERT ... SELECT
//! FROM UNNEST(...)` with one array parameter per column, so the statement is
//! prepared once and the row count never changes the SQL text.

use super::{Backend, Connector};
use crate::config::PostgresConfig;
use crate::error::{LoadError, Result};
use crate::partition::WorkerId;
use crate::record::{COLUMNS, Record};
use chrono::NaiveDateTime;
use tokio::runtime::Runtime;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Statement};

/// Postgres array type each column is bound as, in [`COLUMNS`] order.
const PARAM_TYPES: [&str; 18] = [
    "timestamp", "int4", "timestamp", "int4", "float8", "int4", "text", "int4", "int4", "int4",
    "float8", "float8", "float8", "float8", "float8", "float8", "float8", "float8",
];

/// Build the batch insert statement for `table`.
#[must_use]
pub fn insert_sql(table: &str) -> String {
    let unnest = PARAM_TYPES
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("${}::{ty}[]", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) SELECT * FROM UNNEST({unnest})",
        COLUMNS.join(", ")
    )
}

/// Opens one PostgreSQL connection per worker.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    cfg: PostgresConfig,
}

impl PostgresConnector {
    #[must_use]
    pub fn new(cfg: PostgresConfig) -> Self {
        Self { cfg }
    }
}

impl Connector for PostgresConnector {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn connect(&self, worker: WorkerId) -> Result<Box<dyn Backend>> {
        Ok(Box::new(PostgresBackend::connect(&self.cfg, worker)?))
    }
}

pub struct PostgresBackend {
    worker: WorkerId,
    runtime: Runtime,
    client: Option<Client>,
    insert: Statement,
    in_transaction: bool,
}

impl PostgresBackend {
    /// Connect, apply session settings and prepare the insert statement.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Connection`] if the runtime cannot start, the
    /// server is unreachable, or the statement cannot be prepared (for
    /// example because the table does not exist).
    pub fn connect(cfg: &PostgresConfig, worker: WorkerId) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LoadError::connection(format!("cannot start runtime: {e}")))?;

        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(&cfg.url, NoTls))
            .map_err(LoadError::connection)?;
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(worker = %worker, error = %e, "postgres connection error");
            }
        });

        for setting in &cfg.settings {
            if let Err(e) = runtime.block_on(client.batch_execute(setting)) {
                tracing::warn!(worker = %worker, setting = %setting, error = %e, "session setting not applied");
            }
        }

        let insert = runtime
            .block_on(client.prepare(&insert_sql(&cfg.table)))
            .map_err(|e| LoadError::connection(format!("cannot prepare insert into {}: {e}", cfg.table)))?;

        tracing::debug!(worker = %worker, table = %cfg.table, "postgres session ready");
        Ok(Self {
            worker,
            runtime,
            client: Some(client),
            insert,
            in_transaction: false,
        })
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| LoadError::connection(format!("{} connection released", self.worker)))
    }

    fn simple(&self, sql: &str) -> Result<()> {
        let client = self.client()?;
        self.runtime.block_on(client.batch_execute(sql)).map_err(|e| {
            if client.is_closed() {
                LoadError::connection(e)
            } else {
                LoadError::batch(0, format!("{sql}: {e}"))
            }
        })
    }

    fn send(&mut self, records: &[Record]) -> Result<u64> {
        if !self.in_transaction {
            self.simple("BEGIN")?;
            self.in_transaction = true;
        }
        let cols = ColumnArrays::from_records(records);
        let params = cols.params();
        let client = self.client()?;
        self.runtime
            .block_on(client.execute(&self.insert, &params))
            .map_err(|e| {
                if client.is_closed() {
                    LoadError::connection(e)
                } else {
                    LoadError::batch(records.len(), e)
                }
            })
    }
}

impl Backend for PostgresBackend {
    fn insert_batch(&mut self, records: &[Record]) -> Result<()> {
        let written = self.send(records)?;
        if written != records.len() as u64 {
            return Err(LoadError::batch(
                records.len(),
                format!("server reported {written} rows"),
            ));
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.simple("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.simple("ROLLBACK")
    }

    fn probe(&mut self, record: &Record) -> Result<()> {
        let outcome = self.send(std::slice::from_ref(record));
        let rolled_back = self.rollback();
        outcome.and(rolled_back)
    }

    fn release(&mut self) -> Result<()> {
        if self.in_transaction {
            self.rollback()?;
        }
        // Dropping the client closes the connection task.
        self.client.take();
        Ok(())
    }
}

/// Column-major copy of a batch, one vector per bound array.
struct ColumnArrays {
    pickup: Vec<Option<NaiveDateTime>>,
    vendor: Vec<i32>,
    dropoff: Vec<Option<NaiveDateTime>>,
    passengers: Vec<i32>,
    distance: Vec<f64>,
    rate_code: Vec<i32>,
    flag: Vec<String>,
    pu_location: Vec<i32>,
    do_location: Vec<i32>,
    payment: Vec<i32>,
    fare: Vec<f64>,
    extra: Vec<f64>,
    mta_tax: Vec<f64>,
    tip: Vec<f64>,
    tolls: Vec<f64>,
    improvement: Vec<f64>,
    total: Vec<f64>,
    congestion: Vec<f64>,
}

impl ColumnArrays {
    fn from_records(records: &[Record]) -> Self {
        Self {
            pickup: records.iter().map(|r| r.pickup_datetime).collect(),
            vendor: records.iter().map(|r| i32::from(r.vendor_id)).collect(),
            dropoff: records.iter().map(|r| r.dropoff_datetime).collect(),
            passengers: records.iter().map(|r| i32::from(r.passenger_count)).collect(),
            distance: records.iter().map(|r| r.trip_distance).collect(),
            rate_code: records.iter().map(|r| i32::from(r.rate_code_id)).collect(),
            flag: records.iter().map(|r| r.store_and_fwd_flag.to_string()).collect(),
            pu_location: records.iter().map(|r| i32::from(r.pu_location_id)).collect(),
            do_location: records.iter().map(|r| i32::from(r.do_location_id)).collect(),
            payment: records.iter().map(|r| i32::from(r.payment_type)).collect(),
            fare: records.iter().map(|r| r.fare_amount).collect(),
            extra: records.iter().map(|r| r.extra).collect(),
            mta_tax: records.iter().map(|r| r.mta_tax).collect(),
            tip: records.iter().map(|r| r.tip_amount).collect(),
            tolls: records.iter().map(|r| r.tolls_amount).collect(),
            improvement: records.iter().map(|r| r.improvement_surcharge).collect(),
            total: records.iter().map(|r| r.total_amount).collect(),
            congestion: records.iter().map(|r| r.congestion_surcharge).collect(),
        }
    }

    fn params(&self) -> [&(dyn ToSql + Sync); 18] {
        [
            &self.pickup,
            &self.vendor,
            &self.dropoff,
            &self.passengers,
            &self.distance,
            &self.rate_code,
            &self.flag,
            &self.pu_location,
            &self.do_location,
            &self.payment,
            &self.fare,
            &self.extra,
            &self.mta_tax,
            &self.tip,
            &self.tolls,
            &self.improvement,
            &self.total,
            &self.congestion,
        ]
    }
}
