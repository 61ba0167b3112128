//! Version-numbered schema migrations, tracked in `PRAGMA user_version`.

use crate::error::{Result, StoreError};
use rusqlite::Connection;
use tracing::info;

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create items and keystores",
        sql: r"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            active INTEGER NOT NULL,
            encrypted BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_items_active ON items(active);

        CREATE TABLE IF NOT EXISTS keystores (
            group_id TEXT PRIMARY KEY,
            uuid TEXT,
            salt BLOB NOT NULL,
            encrypted BLOB NOT NULL
        );
        ",
    },
    Migration {
        version: 2,
        description: "move legacy keystore to the default group, drop uuid, add generation",
        // A legacy row under the empty group wins over an existing default row.
        sql: r"
        CREATE TABLE keystores_v2 (
            group_id TEXT PRIMARY KEY,
            salt BLOB NOT NULL,
            encrypted BLOB NOT NULL,
            generation INTEGER NOT NULL DEFAULT 0
        );

        INSERT INTO keystores_v2 (group_id, salt, encrypted, generation)
            SELECT CASE WHEN group_id = '' THEN 'default' ELSE group_id END, salt, encrypted, 0
            FROM keystores
            WHERE group_id <> 'default'
               OR NOT EXISTS (SELECT 1 FROM keystores WHERE group_id = '');

        DROP TABLE keystores;
        ALTER TABLE keystores_v2 RENAME TO keystores;
        ",
    },
];

pub const LATEST_VERSION: u32 = 2;

const _: () = assert!(MIGRATIONS[MIGRATIONS.len() - 1].version == LATEST_VERSION);

/// Reads the on-disk schema version.
///
/// # Errors
/// Propagates database errors.
pub fn current_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

/// Applies every migration newer than the on-disk version, each in its own transaction.
///
/// Returns the resulting version.
///
/// # Errors
/// - [`StoreError::VersionMismatch`] if the file was written by a newer schema.
/// - Database errors from any migration step; earlier steps stay applied.
pub fn run(conn: &mut Connection) -> Result<u32> {
    let found = current_version(conn)?;
    if found > LATEST_VERSION {
        return Err(StoreError::VersionMismatch {
            found,
            expected: LATEST_VERSION,
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > found) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        info!(version = migration.version, "applied local db migration: {}", migration.description);
    }
    Ok(LATEST_VERSION)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rusqlite::{OptionalExtension, params};

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn
    }

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})")).unwrap();
        let names = stmt.query_map([], |r| r.get::<_, String>(1)).unwrap();
        names.map(|n| n.unwrap()).collect()
    }

    #[test]
    fn test_fresh_database_reaches_latest() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
        assert_eq!(run(&mut conn).unwrap(), LATEST_VERSION);
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
        assert!(columns(&conn, "keystores").contains(&"generation".to_string()));

        // Second run is a no-op
        assert_eq!(run(&mut conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn test_legacy_keystore_is_relocated_and_uuid_dropped() {
        let mut conn = legacy_db();
        conn.execute(
            "INSERT INTO keystores (group_id, uuid, salt, encrypted) VALUES ('', 'some-uuid', ?1, ?2)",
            params![b"salt".to_vec(), b"blob".to_vec()],
        )
        .unwrap();

        run(&mut conn).unwrap();

        assert!(!columns(&conn, "keystores").contains(&"uuid".to_string()));
        let legacy: Option<i64> = conn
            .query_row("SELECT 1 FROM keystores WHERE group_id = ''", [], |r| r.get(0))
            .optional()
            .unwrap();
        assert!(legacy.is_none());
        let (salt, blob, generation): (Vec<u8>, Vec<u8>, u64) = conn
            .query_row(
                "SELECT salt, encrypted, generation FROM keystores WHERE group_id = 'default'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(salt, b"salt");
        assert_eq!(blob, b"blob");
        assert_eq!(generation, 0);
    }

    #[test]
    fn test_legacy_row_wins_over_existing_default() {
        let mut conn = legacy_db();
        conn.execute_batch(
            "INSERT INTO keystores (group_id, uuid, salt, encrypted) VALUES ('', 'u', x'01', x'AA');
             INSERT INTO keystores (group_id, uuid, salt, encrypted) VALUES ('default', NULL, x'02', x'BB');
             INSERT INTO keystores (group_id, uuid, salt, encrypted) VALUES ('other', NULL, x'03', x'CC');",
        )
        .unwrap();

        run(&mut conn).unwrap();

        let blob: Vec<u8> = conn
            .query_row("SELECT encrypted FROM keystores WHERE group_id = 'default'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(blob, vec![0xAA]);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM keystores", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_newer_on_disk_version_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", LATEST_VERSION + 1).unwrap();
        let err = run(&mut conn).unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { found, .. } if found == LATEST_VERSION + 1));
    }
}
