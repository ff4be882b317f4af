use rusqlite::Connection;

/// Tables of the bench inventory. Column names follow the lab database so an
/// existing `simple.sqlite` opens without conversion.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jfw (
    id INTEGER PRIMARY KEY,
    name TEXT,
    ip TEXT,
    port INTEGER,
    location TEXT,
    status INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS mxa (
    id INTEGER PRIMARY KEY,
    name TEXT,
    ip TEXT,
    port INTEGER,
    location TEXT,
    jfw_port INTEGER,
    mxa_port INTEGER,
    status INTEGER DEFAULT 0,
    in_use INTEGER NOT NULL DEFAULT 0,
    lease_owner TEXT,
    lease_acquired_at TEXT
);

CREATE TABLE IF NOT EXISTS rf_matrix (
    id INTEGER PRIMARY KEY,
    name TEXT,
    ip TEXT,
    port INTEGER,
    status INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS lsu (
    id INTEGER PRIMARY KEY,
    name TEXT,
    ip TEXT
);

CREATE TABLE IF NOT EXISTS vendor (
    id INTEGER PRIMARY KEY,
    name TEXT,
    freq REAL,
    pci INTEGER,
    tech TEXT,
    BW TEXT,
    DLEARFCN INTEGER,
    ULEARFCN INTEGER,
    exp_atten REAL,
    atten REAL,
    rf_matrix_id INTEGER,
    rf_matrix_input_port TEXT,
    in_use INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pre_config_vendor (
    id INTEGER PRIMARY KEY,
    vendor_id INTEGER,
    rf_matrix_output_port TEXT,
    mxa_id INTEGER,
    lsu_id INTEGER,
    aggr_id INTEGER DEFAULT 0,
    tag TEXT
);

CREATE TABLE IF NOT EXISTS rf_matrix_db (
    id INTEGER PRIMARY KEY,
    rf_matrix_id INTEGER,
    port TEXT,
    jfw_id INTEGER,
    jfw_port INTEGER,
    CELLID INTEGER,
    input_device TEXT
);
";

/// Columns added to the `mxa` table for the lease. Lab databases created
/// before the lease existed get them through `ALTER TABLE`.
const LEASE_COLUMNS: &[(&str, &str)] = &[("lease_owner", "TEXT"), ("lease_acquired_at", "TEXT")];

pub fn bootstrap(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    for (column, ty) in LEASE_COLUMNS {
        if !has_column(conn, "mxa", column)? {
            tracing::info!(column, "adding lease column to mxa table");
            conn.execute_batch(&format!("ALTER TABLE mxa ADD COLUMN {column} {ty}"))?;
        }
    }
    // Lab databases predate the NOT NULL default on the busy flags.
    for table in ["mxa", "vendor"] {
        if !has_column(conn, table, "in_use")? {
            continue;
        }
        let n = conn.execute(&format!("UPDATE {table} SET in_use = 0 WHERE in_use IS NULL"), [])?;
        if n > 0 {
            tracing::info!(table, rows = n, "cleared NULL in_use flags");
        }
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name?.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
