//! SQL Server connections over TDS (tiberius)
//!
//! tiberius is async; each connection owns a current-thread runtime and
//! blocks on it, so callers see a plain synchronous [`SqlConnection`].

use tiberius::error::Error as TdsError;
use tiberius::{AuthMethod, Client, ColumnData, ColumnType, Config, Row, ToSql};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{ConnectionFactory, DbError, DbRow, DbValue, ExecutedColumn, SqlConnection};

type SqlClient = Client<Compat<TcpStream>>;

/// SQL Server connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub trust_cert: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            user: "sa".to_string(),
            password: String::new(),
            database: "master".to_string(),
            trust_cert: true,
        }
    }
}

impl ConnectionSettings {
    /// Load settings from environment variables (and `.env`, if present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        Self {
            host: std::env::var("SQL_SERVER_HOST").unwrap_or(defaults.host),
            port: std::env::var("SQL_SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            user: std::env::var("SQL_SERVER_USER").unwrap_or(defaults.user),
            password: std::env::var("SQL_SERVER_PASSWORD").unwrap_or(defaults.password),
            database: std::env::var("SQL_SERVER_DATABASE").unwrap_or(defaults.database),
            trust_cert: std::env::var("SQL_SERVER_TRUST_CERT")
                .map(|v| !v.eq_ignore_ascii_case("false") && v != "0")
                .unwrap_or(defaults.trust_cert),
        }
    }

    /// Create a tiberius client config
    pub fn to_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        config.database(&self.database);
        if self.trust_cert {
            config.trust_cert();
        }
        config
    }
}

/// A blocking SQL Server connection.
pub struct TdsConnection {
    runtime: Runtime,
    client: SqlClient,
}

impl TdsConnection {
    pub fn connect(config: Config) -> Result<Self, DbError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DbError::new(format!("Failed to start I/O runtime: {}", e)))?;

        let client = runtime
            .block_on(async {
                let tcp = TcpStream::connect(config.get_addr()).await?;
                tcp.set_nodelay(true)?;
                Client::connect(config, tcp.compat_write()).await
            })
            .map_err(map_error)?;

        Ok(Self { runtime, client })
    }
}

impl SqlConnection for TdsConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        let client = &mut self.client;
        self.runtime
            .block_on(async move { client.simple_query(sql).await?.into_results().await })
            .map(|_| ())
            .map_err(map_error)
    }

    fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<DbRow>, DbError> {
        let client = &mut self.client;
        let rows = self
            .runtime
            .block_on(async move {
                let params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
                client.query(sql, &params).await?.into_first_result().await
            })
            .map_err(map_error)?;

        Ok(rows.into_iter().map(convert_row).collect())
    }

    fn describe_columns(&mut self, sql: &str) -> Result<Vec<ExecutedColumn>, DbError> {
        let client = &mut self.client;
        self.runtime
            .block_on(async move {
                let mut stream = client.simple_query(sql).await?;
                let columns = stream
                    .columns()
                    .await?
                    .map(|columns| {
                        columns
                            .iter()
                            .map(|c| ExecutedColumn {
                                name: c.name().to_string(),
                                type_name: column_type_name(c.column_type()).to_string(),
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                stream.into_results().await?;
                Ok(columns)
            })
            .map_err(map_error)
    }
}

/// Opens [`TdsConnection`]s from a shared client config.
#[derive(Clone)]
pub struct TdsConnectionFactory {
    config: Config,
}

impl TdsConnectionFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self::new(settings.to_config())
    }

    /// Parse an ADO.NET style connection string.
    pub fn from_ado_string(connection_string: &str) -> Result<Self, DbError> {
        Config::from_ado_string(connection_string)
            .map(Self::new)
            .map_err(map_error)
    }

    pub fn connect_tds(&self) -> Result<TdsConnection, DbError> {
        TdsConnection::connect(self.config.clone())
    }
}

impl ConnectionFactory for TdsConnectionFactory {
    fn connect(&self) -> Result<Box<dyn SqlConnection>, DbError> {
        Ok(Box::new(self.connect_tds()?))
    }
}

fn map_error(err: TdsError) -> DbError {
    match err {
        TdsError::Server(token) => DbError::server(token.code(), token.message()),
        other => DbError::new(other.to_string()),
    }
}

fn convert_row(row: Row) -> DbRow {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = row.into_iter().map(convert_value);
    DbRow::new(names.into_iter().zip(values).collect())
}

fn convert_value(data: ColumnData<'static>) -> DbValue {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| DbValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| DbValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| DbValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(DbValue::Int),
        ColumnData::F32(v) => v.map(|v| DbValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(DbValue::Float),
        ColumnData::Bit(v) => v.map(DbValue::Bool),
        ColumnData::String(v) => v.map(|s| DbValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| DbValue::Text(g.to_string())),
        _ => None,
    };
    value.unwrap_or(DbValue::Null)
}

/// System type name for a TDS column type.
///
/// Nullable variable-length encodings (`Intn`, `Floatn`, ...) do not carry
/// their width here, so they map to the most common member of their family.
fn column_type_name(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Null => "sql_variant",
        ColumnType::Bit | ColumnType::Bitn => "bit",
        ColumnType::Int1 => "tinyint",
        ColumnType::Int2 => "smallint",
        ColumnType::Int4 | ColumnType::Intn => "int",
        ColumnType::Int8 => "bigint",
        ColumnType::Float4 => "real",
        ColumnType::Float8 | ColumnType::Floatn => "float",
        ColumnType::Money | ColumnType::Money4 => "money",
        ColumnType::Datetime4 => "smalldatetime",
        ColumnType::Datetime | ColumnType::Datetimen => "datetime",
        ColumnType::Daten => "date",
        ColumnType::Timen => "time",
        ColumnType::Datetime2 => "datetime2",
        ColumnType::DatetimeOffsetn => "datetimeoffset",
        ColumnType::Guid => "uniqueidentifier",
        ColumnType::Decimaln => "decimal",
        ColumnType::Numericn => "numeric",
        ColumnType::BigVarBin => "varbinary",
        ColumnType::BigBinary => "binary",
        ColumnType::BigVarChar => "varchar",
        ColumnType::BigChar => "char",
        ColumnType::NVarchar => "nvarchar",
        ColumnType::NChar => "nchar",
        ColumnType::Xml => "xml",
        ColumnType::Udt => "udt",
        ColumnType::Text => "text",
        ColumnType::Image => "image",
        ColumnType::NText => "ntext",
        ColumnType::SSVariant => "sql_variant",
        #[allow(unreachable_patterns)]
        _ => "sql_variant",
    }
}
