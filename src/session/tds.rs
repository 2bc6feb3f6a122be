//! [`Session`] over a live SQL Server connection (tiberius)
//!
//! The engine is synchronous, so the async driver runs on a private
//! current-thread runtime. Switching the target database reconnects with the
//! new initial catalog, which also works on the hosted edition where `USE`
//! cannot cross databases.

use std::future::Future;

use tiberius::{Client, ColumnData, Config, ToSql};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::{Param, Row, ScanFn, Session, SessionTarget, Value};
use crate::config::ConnectionConfig;
use crate::error::SessionError;

type SqlClient = Client<Compat<TcpStream>>;

pub struct TdsSession {
    runtime: Runtime,
    config: ConnectionConfig,
    client: Option<SqlClient>,
    database: String,
}

impl TdsSession {
    /// Open a session against the configured default database
    pub fn connect(config: ConnectionConfig) -> Result<Self, SessionError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let database = config.database.clone();
        let mut session = Self {
            runtime,
            config,
            client: None,
            database: database.clone(),
        };
        session.select(&SessionTarget::new(database))?;
        Ok(session)
    }

    fn select(&mut self, target: &SessionTarget) -> Result<(), SessionError> {
        if self.client.is_some() && self.database == target.database {
            return Ok(());
        }
        debug!(database = %target.database, host = %self.config.host, "Opening SQL Server connection");
        let config = tiberius_config(&self.config, &target.database);
        let client = self.runtime.block_on(with_deadline(target, open(config)))?;
        self.client = Some(client);
        self.database = target.database.clone();
        Ok(())
    }

    fn parts(&mut self) -> Result<(&Runtime, &mut SqlClient), SessionError> {
        let client = self.client.as_mut().ok_or_else(|| SessionError::Driver {
            message: "session is not connected".to_string(),
        })?;
        Ok((&self.runtime, client))
    }
}

impl Session for TdsSession {
    fn execute(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Param],
    ) -> Result<(), SessionError> {
        self.select(target)?;
        let (runtime, client) = self.parts()?;
        let result = runtime.block_on(with_deadline(target, async move {
            if params.is_empty() {
                client.simple_query(sql).await?.into_results().await?;
            } else {
                let text = with_declarations(sql, params);
                let values = bind(params);
                client.execute(text, &values).await?;
            }
            Ok::<_, SessionError>(())
        }));
        reset_on_timeout(&mut self.client, result)
    }

    fn query(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Param],
        scan: &mut ScanFn<'_>,
    ) -> Result<usize, SessionError> {
        self.select(target)?;
        let (runtime, client) = self.parts()?;
        let rows = runtime.block_on(with_deadline(target, async move {
            let rows = if params.is_empty() {
                client.simple_query(sql).await?.into_first_result().await?
            } else {
                let text = with_declarations(sql, params);
                let values = bind(params);
                client.query(text, &values).await?.into_first_result().await?
            };
            Ok::<_, SessionError>(rows)
        }));
        let rows = reset_on_timeout(&mut self.client, rows)?;

        let count = rows.len();
        for row in rows {
            scan(&convert_row(row))?;
        }
        Ok(count)
    }
}

fn tiberius_config(config: &ConnectionConfig, database: &str) -> Config {
    let mut tds = Config::new();
    tds.host(&config.host);
    tds.port(config.port);
    tds.authentication(tiberius::AuthMethod::sql_server(&config.user, &config.password));
    if config.trust_server_certificate {
        tds.trust_cert();
    }
    tds.database(database);
    tds
}

async fn open(config: Config) -> Result<SqlClient, SessionError> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Ok(Client::connect(config, tcp.compat_write()).await?)
}

async fn with_deadline<T, F>(target: &SessionTarget, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match target.deadline {
        Some(deadline) => {
            tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
                .await
                .map_err(|_| SessionError::Timeout {
                    database: target.database.clone(),
                })?
        }
        None => fut.await,
    }
}

/// A call abandoned at its deadline leaves the connection mid-stream; drop it
/// so the next call reconnects instead of reading stale tokens.
fn reset_on_timeout<C, T>(client: &mut Option<C>, result: Result<T, SessionError>) -> Result<T, SessionError> {
    if let Err(SessionError::Timeout { database }) = &result {
        debug!(%database, "Discarding connection after timeout");
        *client = None;
    }
    result
}

/// tiberius binds positional `@P1..@Pn`; named parameters are declared from
/// them in a prologue so statement text can keep using `@name`.
fn with_declarations(sql: &str, params: &[Param]) -> String {
    let mut text = String::new();
    for (i, param) in params.iter().enumerate() {
        let sql_type = match param.value {
            Value::Int(_) => "bigint",
            Value::Bytes(_) => "varbinary(max)",
            Value::Bool(_) => "bit",
            Value::Text(_) | Value::Null => "nvarchar(max)",
        };
        text.push_str(&format!("DECLARE @{} {} = @P{};\n", param.name, sql_type, i + 1));
    }
    text.push_str(sql);
    text
}

fn bind(params: &[Param]) -> Vec<&dyn ToSql> {
    params
        .iter()
        .map(|param| match &param.value {
            Value::Null => &None::<&'static str> as &dyn ToSql,
            Value::Int(v) => v as &dyn ToSql,
            Value::Text(s) => s as &dyn ToSql,
            Value::Bytes(b) => b as &dyn ToSql,
            Value::Bool(b) => b as &dyn ToSql,
        })
        .collect()
}

fn convert_row(row: tiberius::Row) -> Row {
    Row::new(row.into_iter().map(convert_column).collect())
}

fn convert_column(data: ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| Value::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| Value::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| Value::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.map(|s| Value::Text(s.into_owned())),
        ColumnData::Binary(v) => v.map(|b| Value::Bytes(b.into_owned())),
        ColumnData::Guid(v) => v.map(|g| Value::Text(g.to_string())),
        other => Some(Value::Text(format!("{:?}", other))),
    };
    value.unwrap_or(Value::Null)
}
