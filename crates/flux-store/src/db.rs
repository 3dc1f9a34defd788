use rusqlite::Connection;

use crate::error::Result;

/// Initialise the `jobs` and `secrets` tables.
///
/// Safe to call on every startup: uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT    NOT NULL UNIQUE,
            code          TEXT    NOT NULL,
            requirements  TEXT    NOT NULL DEFAULT '',
            cron_exp      TEXT    NOT NULL,
            random_delay  INTEGER NOT NULL DEFAULT 0,
            is_active     INTEGER NOT NULL DEFAULT 1,
            last_run      TEXT,               -- local time or NULL
            last_status   TEXT,               -- Running/Success/Failed/Error
            last_log      TEXT    NOT NULL DEFAULT '[]'  -- JSON step array
        );

        CREATE TABLE IF NOT EXISTS secrets (
            id     INTEGER PRIMARY KEY AUTOINCREMENT,
            key    TEXT    NOT NULL UNIQUE,
            value  TEXT    NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Open a file-backed connection with WAL enabled and the schema in place.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    init_db(&conn)?;
    Ok(conn)
}
