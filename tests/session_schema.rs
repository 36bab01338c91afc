//! Session Schema Tests
//!
//! Verifies that the embedded bootstrap SQL produces the schema the
//! Diesel models are written against, and that the constraints the
//! repository relies on actually hold in SQLite.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{Connection, Result as SqliteResult};

const BOOTSTRAP_SQL: &str = include_str!("../src/repository/schema_sqlite.sql");

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnInfo {
    name: String,
    col_type: String,
    not_null: bool,
    default_value: Option<String>,
    primary_key: bool,
}

/// Extract table schemas from a SQLite connection
fn extract_tables(conn: &Connection) -> SqliteResult<BTreeMap<String, BTreeMap<String, ColumnInfo>>> {
    let mut tables = BTreeMap::new();

    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let table_names: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<SqliteResult<Vec<_>>>()?;

    for table_name in table_names {
        let mut columns = BTreeMap::new();
        let mut pragma = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table_name))?;
        let column_iter = pragma.query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                col_type: row.get::<_, String>(2)?.to_uppercase(),
                not_null: row.get(3)?,
                default_value: row.get(4)?,
                primary_key: row.get::<_, i32>(5)? > 0,
            })
        })?;
        for col in column_iter {
            let col = col?;
            columns.insert(col.name.clone(), col);
        }
        tables.insert(table_name, columns);
    }

    Ok(tables)
}

/// Extract (table, columns, unique) index tuples for semantic comparison
fn extract_indexes(conn: &Connection) -> SqliteResult<BTreeSet<(String, Vec<String>, bool)>> {
    let mut stmt = conn.prepare(
        "SELECT name, tbl_name, sql FROM sqlite_master WHERE type='index' AND sql IS NOT NULL ORDER BY name",
    )?;
    let index_iter = stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        let table: String = row.get(1)?;
        let sql: String = row.get(2)?;
        Ok((name, table, sql.to_uppercase().contains("UNIQUE")))
    })?;

    let mut indexes = BTreeSet::new();
    for result in index_iter {
        let (name, table, unique) = result?;
        let mut pragma = conn.prepare(&format!("PRAGMA index_info(\"{}\")", name))?;
        let columns: Vec<String> = pragma
            .query_map([], |row| row.get(2))?
            .collect::<SqliteResult<Vec<_>>>()?;
        indexes.insert((table, columns, unique));
    }

    Ok(indexes)
}

fn bootstrapped() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to open DB");
    conn.execute_batch(BOOTSTRAP_SQL)
        .expect("Failed to run bootstrap SQL");
    conn
}

#[test]
fn test_bootstrap_creates_expected_tables() {
    let conn = bootstrapped();
    let tables = extract_tables(&conn).expect("Failed to extract tables");

    let expected_sessions = [
        ("id", "TEXT", true),
        ("name", "TEXT", true),
        ("persona_id", "TEXT", true),
        ("created_at", "TEXT", true),
        ("last_accessed", "TEXT", true),
        ("data", "TEXT", true),
    ];
    let expected_tabs = [
        ("id", "TEXT", true),
        ("session_id", "TEXT", true),
        ("url", "TEXT", true),
        ("title", "TEXT", true),
        ("persona_id", "TEXT", true),
        ("created_at", "TEXT", true),
        ("last_accessed", "TEXT", true),
        ("history", "TEXT", true),
        ("scroll_position", "INTEGER", true),
        ("zoom_factor", "REAL", true),
    ];

    for (table, expected) in [
        ("sessions", &expected_sessions[..]),
        ("tabs", &expected_tabs[..]),
    ] {
        let columns = tables
            .get(table)
            .unwrap_or_else(|| panic!("Missing table: {}", table));
        assert_eq!(
            columns.len(),
            expected.len(),
            "Unexpected column count in {}",
            table
        );
        for (name, col_type, not_null) in expected {
            let col = columns
                .get(*name)
                .unwrap_or_else(|| panic!("Missing column: {}.{}", table, name));
            assert_eq!(&col.col_type, col_type, "Type mismatch in {}.{}", table, name);
            assert_eq!(
                col.not_null, *not_null,
                "NOT NULL mismatch in {}.{}",
                table, name
            );
        }
        assert!(
            columns.get("id").is_some_and(|c| c.primary_key),
            "{} must be keyed on id",
            table
        );
    }
}

#[test]
fn test_bootstrap_is_idempotent() {
    let conn = bootstrapped();
    // Re-running the bootstrap against an initialized database must be a no-op
    conn.execute_batch(BOOTSTRAP_SQL)
        .expect("Second bootstrap run failed");
    let tables = extract_tables(&conn).expect("Failed to extract tables");
    assert_eq!(tables.len(), 2);
}

#[test]
fn test_expected_indexes_exist() {
    let conn = bootstrapped();
    let indexes = extract_indexes(&conn).expect("Failed to extract indexes");

    assert!(
        indexes.contains(&("tabs".to_string(), vec!["session_id".to_string()], false)),
        "Missing index on tabs.session_id"
    );
    assert!(
        indexes.contains(&(
            "sessions".to_string(),
            vec!["last_accessed".to_string()],
            false
        )),
        "Missing index on sessions.last_accessed"
    );
}

#[test]
fn test_defaults_apply() {
    let conn = bootstrapped();
    conn.execute(
        "INSERT INTO sessions (id, name, persona_id, created_at, last_accessed)
         VALUES ('s1', 'test', 'anonymous', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        [],
    )
    .expect("Failed to insert session");
    conn.execute(
        "INSERT INTO tabs (id, session_id, url, persona_id, created_at, last_accessed)
         VALUES ('t1', 's1', 'https://example.com', 'anonymous',
                 '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        [],
    )
    .expect("Failed to insert tab");

    let data: String = conn
        .query_row("SELECT data FROM sessions WHERE id = 's1'", [], |row| {
            row.get(0)
        })
        .expect("Failed to read session data");
    assert_eq!(data, "{}");

    let (title, history, scroll, zoom): (String, String, i32, f64) = conn
        .query_row(
            "SELECT title, history, scroll_position, zoom_factor FROM tabs WHERE id = 't1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("Failed to read tab defaults");
    assert_eq!(title, "");
    assert_eq!(history, "[]");
    assert_eq!(scroll, 0);
    assert_eq!(zoom, 1.0);
}

#[test]
fn test_cascade_delete_removes_tabs() {
    let conn = bootstrapped();
    conn.execute_batch("PRAGMA foreign_keys = ON")
        .expect("Failed to enable foreign keys");

    conn.execute(
        "INSERT INTO sessions (id, name, persona_id, created_at, last_accessed)
         VALUES ('s1', 'test', 'anonymous', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        [],
    )
    .expect("Failed to insert session");
    for tab_id in ["t1", "t2"] {
        conn.execute(
            "INSERT INTO tabs (id, session_id, url, persona_id, created_at, last_accessed)
             VALUES (?1, 's1', 'https://example.com', 'anonymous',
                     '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
            [tab_id],
        )
        .expect("Failed to insert tab");
    }

    conn.execute("DELETE FROM sessions WHERE id = 's1'", [])
        .expect("Failed to delete session");

    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM tabs", [], |row| row.get(0))
        .expect("Failed to count tabs");
    assert_eq!(remaining, 0, "Cascade delete left orphaned tabs");
}
