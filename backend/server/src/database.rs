//! # SQLite
//!
//! Document store for every marketplace record.
//!
//! ## Requirements
//!
//! - Integrity rules live in the schema, not in read-then-write handler code
//! - One connection pair per client/lawyer
//! - One live appointment per lawyer, date and slot
//! - Topic names, emails and phones are unique
//!
//! ## Implementation
//!
//! - `sqlx` pool, schema applied idempotently at startup
//! - Ids are hyphenated UUID text, timestamps RFC 3339 text
//! - Rows are decoded by hand through the helpers below
use std::{str::FromStr, time::Duration};

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE,
        phone TEXT UNIQUE,
        role TEXT NOT NULL,
        location TEXT NOT NULL DEFAULT '',
        specialization TEXT NOT NULL DEFAULT '',
        experience INTEGER NOT NULL DEFAULT 0,
        fee INTEGER NOT NULL DEFAULT 0,
        about TEXT NOT NULL DEFAULT '',
        plan TEXT NOT NULL DEFAULT 'free',
        verified INTEGER NOT NULL DEFAULT 0,
        verification_status TEXT NOT NULL DEFAULT 'unverified',
        resume TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS users_role ON users (role)",
    "CREATE TABLE IF NOT EXISTS cases (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        field TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        budget TEXT NOT NULL DEFAULT '',
        posted_by TEXT NOT NULL REFERENCES users (id),
        posted_at TEXT NOT NULL,
        accepted_by TEXT REFERENCES users (id),
        accepted_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS connections (
        id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES users (id),
        lawyer_id TEXT NOT NULL REFERENCES users (id),
        status TEXT NOT NULL,
        initiated_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (client_id, lawyer_id)
    )",
    "CREATE TABLE IF NOT EXISTS appointments (
        id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES users (id),
        lawyer_id TEXT NOT NULL REFERENCES users (id),
        date TEXT NOT NULL,
        slot TEXT NOT NULL,
        notes TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        meeting_link TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS appointments_live_slot
        ON appointments (lawyer_id, date, slot)
        WHERE status IN ('pending', 'confirmed')",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        lawyer_id TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        sender TEXT NOT NULL,
        text TEXT NOT NULL,
        read INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_pair ON messages (client_id, lawyer_id)",
    "CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        author_id TEXT NOT NULL REFERENCES users (id),
        content TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL,
        media_url TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS post_likes (
        post_id TEXT NOT NULL REFERENCES posts (id),
        user_id TEXT NOT NULL REFERENCES users (id),
        PRIMARY KEY (post_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS post_comments (
        id TEXT PRIMARY KEY,
        post_id TEXT NOT NULL REFERENCES posts (id),
        user_id TEXT NOT NULL REFERENCES users (id),
        text TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS topics (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        count INTEGER NOT NULL DEFAULT 0,
        category TEXT NOT NULL DEFAULT 'Legal'
    )",
    "CREATE TABLE IF NOT EXISTS agreements (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users (id),
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        party_a TEXT NOT NULL DEFAULT '',
        party_b TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS payments (
        id TEXT PRIMARY KEY,
        order_id TEXT NOT NULL UNIQUE,
        payment_id TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users (id),
        amount INTEGER NOT NULL,
        plan TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        kind TEXT NOT NULL,
        starts_at TEXT NOT NULL,
        ends_at TEXT NOT NULL,
        status TEXT NOT NULL,
        lawyer_id TEXT,
        client_id TEXT,
        notes TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS inquiries (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        subject TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

pub async fn init_database(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    migrate(&pool).await?;

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Schema ready ({} statements)", SCHEMA.len());

    Ok(())
}

fn decode_error<E>(column: &str, source: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

pub fn get_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let raw: String = row.try_get(column)?;

    Uuid::parse_str(&raw).map_err(|e| decode_error(column, e))
}

pub fn get_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;

    raw.map(|raw| Uuid::parse_str(&raw).map_err(|e| decode_error(column, e)))
        .transpose()
}

/// Decodes a TEXT column into one of the `bank` string enums.
pub fn get_enum<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;

    raw.parse().map_err(|e| decode_error(column, e))
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    init_database("sqlite::memory:", 1).await.unwrap()
}
