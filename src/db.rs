use crate::error::Result;
use chrono::Utc;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use std::borrow::Cow;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

/// Small persistent key-value store holding the client's session state.
#[derive(Debug, Clone)]
pub struct Store {
    pool: AnyPool,
    kind: DbKind,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let kind = db_kind_from_url(url);
        let pool = if url.contains(":memory:") {
            // Every in-memory connection is a separate database; pin a single one.
            AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect(url)
                .await?
        } else {
            AnyPoolOptions::new().max_connections(4).connect(url).await?
        };
        init_db(&pool, kind).await?;
        Ok(Self { pool, kind })
    }

    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn kind(&self) -> DbKind {
        self.kind
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let sql = rewrite_sql("SELECT value FROM kv_store WHERE key = ?", self.kind);
        let row = sqlx::query(sql.as_ref())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("value")?)),
            None => Ok(None),
        }
    }

    pub async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let sql = rewrite_sql(
            r#"INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value=excluded.value,
                updated_at=excluded.updated_at"#,
            self.kind,
        );
        sqlx::query(sql.as_ref())
            .bind(key)
            .bind(value)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn kv_delete(&self, key: &str) -> Result<()> {
        let sql = rewrite_sql("DELETE FROM kv_store WHERE key = ?", self.kind);
        sqlx::query(sql.as_ref())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn kv_delete_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.kv_delete(key).await?;
        }
        Ok(())
    }
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<()> {
    let stmts = [r#"CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at BIGINT NOT NULL
        )"#];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}
