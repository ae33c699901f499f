//! 数据库初始化流程
//!
//! 先连接到数据库服务器（不指定库），检查目标库是否存在，
//! 不存在则创建；随后在目标库上执行迁移脚本，新库额外执行种子脚本。

use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, Executor, MySqlConnection, PgConnection};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::provider::{validate_database_name, Provider, StatementFailure};
use crate::script::split_statements;

/// 数据库连接设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// 数据库类型（"mysql" 或 "postgres"）
    pub provider: String,
    /// 主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub user: String,
    /// 密码
    pub password: String,
    /// 数据库名
    pub database_name: String,
}

/// 初始化结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// 新建数据库，已执行迁移与种子脚本
    Created,
    /// 数据库已存在，仅执行迁移脚本
    Migrated,
}

/// 创建并初始化 Controller 数据库
pub async fn create_controller_database(settings: &DatabaseSettings) -> Result<BootstrapOutcome> {
    let provider: Provider = settings.provider.parse()?;
    validate_database_name(&settings.database_name)?;

    match provider {
        Provider::MySql => bootstrap_mysql(settings).await,
        Provider::Postgres => bootstrap_postgres(settings).await,
    }
}

/// 已建立的数据库连接
enum Conn {
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

impl Conn {
    async fn execute(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error> {
        match self {
            Conn::MySql(conn) => conn.execute(sql).await.map(|_| ()),
            Conn::Postgres(conn) => conn.execute(sql).await.map(|_| ()),
        }
    }

    async fn has_rows(&mut self, sql: &str) -> std::result::Result<bool, sqlx::Error> {
        match self {
            Conn::MySql(conn) => conn.fetch_optional(sql).await.map(|row| row.is_some()),
            Conn::Postgres(conn) => conn.fetch_optional(sql).await.map(|row| row.is_some()),
        }
    }

    async fn close(self) {
        let result = match self {
            Conn::MySql(conn) => conn.close().await,
            Conn::Postgres(conn) => conn.close().await,
        };
        if let Err(e) = result {
            debug!("关闭数据库连接失败: {}", e);
        }
    }
}

async fn bootstrap_mysql(settings: &DatabaseSettings) -> Result<BootstrapOutcome> {
    let provider = Provider::MySql;
    let options = MySqlConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password);

    let conn = MySqlConnection::connect_with(&options)
        .await
        .map_err(|source| connect_error(provider, source))?;
    let mut conn = Conn::MySql(conn);

    let outcome = async {
        let created = ensure_database(&mut conn, provider, &settings.database_name).await?;

        // MySQL 可在同一连接上切换数据库
        let use_db = format!("USE `{}`", settings.database_name);
        conn.execute(&use_db).await.map_err(Error::Switch)?;

        run_bootstrap_scripts(&mut conn, provider, &settings.database_name, created).await
    }
    .await;

    conn.close().await;
    outcome
}

async fn bootstrap_postgres(settings: &DatabaseSettings) -> Result<BootstrapOutcome> {
    let provider = Provider::Postgres;
    let options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .ssl_mode(PgSslMode::Disable);

    let server = PgConnection::connect_with(&options)
        .await
        .map_err(|source| connect_error(provider, source))?;
    let mut server = Conn::Postgres(server);
    let created = ensure_database(&mut server, provider, &settings.database_name).await;
    server.close().await;
    let created = created?;

    // PostgreSQL 需要新连接才能切换数据库
    let conn = PgConnection::connect_with(&options.database(&settings.database_name))
        .await
        .map_err(Error::Switch)?;
    let mut conn = Conn::Postgres(conn);

    let outcome = run_bootstrap_scripts(&mut conn, provider, &settings.database_name, created).await;
    conn.close().await;
    outcome
}

/// 确保数据库存在，返回是否为新建
async fn ensure_database(conn: &mut Conn, provider: Provider, database: &str) -> Result<bool> {
    let exists = conn
        .has_rows(&provider.exists_query(database))
        .await
        .map_err(Error::Query)?;
    if exists {
        return Ok(false);
    }

    conn.execute(&provider.create_query(database))
        .await
        .map_err(Error::Create)?;
    info!("数据库 {} 创建成功", database);
    Ok(true)
}

async fn run_bootstrap_scripts(
    conn: &mut Conn,
    provider: Provider,
    database: &str,
    created: bool,
) -> Result<BootstrapOutcome> {
    run_script(conn, provider, provider.migration_script()).await?;
    info!("数据库 {} 迁移脚本执行成功", database);

    if !created {
        info!("数据库 {} 已存在，仅执行迁移脚本", database);
        return Ok(BootstrapOutcome::Migrated);
    }

    run_script(conn, provider, provider.seed_script()).await?;
    info!("数据库 {} 种子数据写入成功", database);
    Ok(BootstrapOutcome::Created)
}

/// 逐条执行脚本，忽略重复执行导致的已知错误
async fn run_script(conn: &mut Conn, provider: Provider, script: &str) -> Result<()> {
    for statement in split_statements(script) {
        if let Err(err) = conn.execute(statement).await {
            let failure = StatementFailure::from_sqlx(&err);
            if provider.is_ignorable(&failure) {
                warn!("忽略已知的 {} 错误: {}", provider, failure.message);
                continue;
            }
            debug!("语句执行失败: {}", statement);
            return Err(Error::Statement(err));
        }
    }

    Ok(())
}

fn connect_error(provider: Provider, source: sqlx::Error) -> Error {
    Error::Connect {
        provider: provider.to_string(),
        source,
    }
}
