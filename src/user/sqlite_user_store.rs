use super::user_models::{InteractionOutcome, Play, Share, UserRecord};
use super::user_store::UserRecordStore;
use crate::sqlite_column;
use crate::sqlite_persistence::{
    open_versioned, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
    DEFAULT_TIMESTAMP,
};
use anyhow::{Context, Result};
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// V 0
const USER_RECORD_TABLE_V_0: Table = Table {
    name: "user_record",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("user_name", &SqlType::Text, non_null = true),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("openness", &SqlType::Real, non_null = true),
        sqlite_column!("conscientiousness", &SqlType::Real, non_null = true),
        sqlite_column!("extraversion", &SqlType::Real, non_null = true),
        sqlite_column!("agreeableness", &SqlType::Real, non_null = true),
        sqlite_column!("neuroticism", &SqlType::Real, non_null = true),
        sqlite_column!(
            "plays",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "shares",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_user_record_created", "created"),
        ("idx_user_record_plays", "plays"),
    ],
    unique_constraints: &[],
};

const PLAY_TABLE_V_0: Table = Table {
    name: "play",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("player", &SqlType::Text, non_null = true),
        sqlite_column!(
            "played",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "user_record",
                foreign_column: "user_id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[&["player", "played"]],
};

const SHARE_TABLE_V_0: Table = Table {
    name: "share",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("sharer", &SqlType::Text, non_null = true),
        sqlite_column!(
            "shared",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "user_record",
                foreign_column: "user_id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[&["sharer", "shared"]],
};

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[USER_RECORD_TABLE_V_0, PLAY_TABLE_V_0, SHARE_TABLE_V_0],
    migration: None,
}];

const RECORD_COLUMNS: &str = "user_id, user_name, filename, openness, conscientiousness, \
     extraversion, agreeableness, neuroticism, plays, shares, created";

#[derive(Clone)]
pub struct SqliteUserRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserRecordStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = open_versioned(db_path, VERSIONED_SCHEMAS)?;
        Ok(SqliteUserRecordStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Stores the (actor, target) pair and bumps `counter_column` of the
    /// target, but only the first time the pair is seen.
    fn record_interaction(
        &self,
        table: &str,
        actor_column: &str,
        target_column: &str,
        counter_column: &str,
        actor: &str,
        target: &str,
    ) -> Result<InteractionOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let target_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM user_record WHERE user_id = ?1)",
            params![target],
            |row| row.get(0),
        )?;
        if !target_exists {
            return Ok(InteractionOutcome::UnknownTarget);
        }

        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
                table, actor_column, target_column
            ),
            params![actor, target],
        )?;
        if inserted == 0 {
            debug!("{} {} -> {} already recorded", table, actor, target);
            return Ok(InteractionOutcome::AlreadyRecorded);
        }

        tx.execute(
            &format!(
                "UPDATE user_record SET {0} = {0} + 1 WHERE user_id = ?1",
                counter_column
            ),
            params![target],
        )?;
        tx.commit()?;
        Ok(InteractionOutcome::Recorded)
    }
}

fn row_to_record(row: &Row) -> rusqlite::Result<UserRecord> {
    let created: i64 = row.get(10)?;
    Ok(UserRecord {
        user_id: row.get(0)?,
        user_name: row.get(1)?,
        track_file: row.get(2)?,
        openness: row.get(3)?,
        conscientiousness: row.get(4)?,
        extraversion: row.get(5)?,
        agreeableness: row.get(6)?,
        neuroticism: row.get(7)?,
        plays: row.get(8)?,
        shares: row.get(9)?,
        created: DateTime::from_timestamp(created, 0).unwrap_or_default(),
    })
}

fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl UserRecordStore for SqliteUserRecordStore {
    fn get(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM user_record WHERE user_id = ?1", RECORD_COLUMNS),
            params![user_id],
            row_to_record,
        )
        .optional()
        .with_context(|| format!("Failed to read user {}", user_id))
    }

    fn upsert(&self, record: &UserRecord) -> Result<UserRecord> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                &format!(
                    "INSERT INTO user_record ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                     ON CONFLICT(user_id) DO UPDATE SET \
                     user_name = excluded.user_name, \
                     filename = excluded.filename, \
                     openness = excluded.openness, \
                     conscientiousness = excluded.conscientiousness, \
                     extraversion = excluded.extraversion, \
                     agreeableness = excluded.agreeableness, \
                     neuroticism = excluded.neuroticism, \
                     plays = excluded.plays, \
                     shares = excluded.shares",
                    RECORD_COLUMNS
                ),
                params![
                    record.user_id,
                    record.user_name,
                    record.track_file,
                    record.openness,
                    record.conscientiousness,
                    record.extraversion,
                    record.agreeableness,
                    record.neuroticism,
                    record.plays,
                    record.shares,
                    record.created.timestamp(),
                ],
            )
            .with_context(|| format!("Failed to store user {}", record.user_id))?;
        }
        self.get(&record.user_id)?
            .with_context(|| format!("User {} missing right after upsert", record.user_id))
    }

    fn list_newest(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM user_record ORDER BY created DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                RECORD_COLUMNS
            ),
            params![limit as i64, offset as i64],
        )
    }

    fn list_hottest(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM user_record ORDER BY plays DESC, created DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                RECORD_COLUMNS
            ),
            params![limit as i64, offset as i64],
        )
    }

    fn search_by_name(&self, fragment: &str) -> Result<Vec<UserRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM user_record WHERE user_name LIKE '%' || ?1 || '%' ESCAPE '\\' \
                 ORDER BY user_name",
                RECORD_COLUMNS
            ),
            params![escape_like(fragment)],
        )
    }

    fn record_play(&self, play: &Play) -> Result<InteractionOutcome> {
        self.record_interaction("play", "player", "played", "plays", &play.player, &play.played)
    }

    fn record_share(&self, share: &Share) -> Result<InteractionOutcome> {
        self.record_interaction(
            "share",
            "sharer",
            "shared",
            "shares",
            &share.sharer,
            &share.shared,
        )
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM user_record", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality::PersonalityVector;
    use crate::user::UserListing;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn create_tmp_store() -> (SqliteUserRecordStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("users.db");
        let store = SqliteUserRecordStore::new(&db_path).unwrap();
        (store, temp_dir)
    }

    fn vector(v: f64) -> PersonalityVector {
        PersonalityVector {
            openness: v,
            conscientiousness: v,
            extraversion: v,
            agreeableness: v,
            neuroticism: v,
        }
    }

    fn record(id: &str, name: &str) -> UserRecord {
        UserRecord::new(id, name, format!("1_{}", name), vector(1.0))
    }

    #[test]
    fn get_missing_user_is_none() {
        let (store, _dir) = create_tmp_store();
        assert!(store.get("nobody").unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn upsert_then_get() {
        let (store, _dir) = create_tmp_store();
        let stored = store.upsert(&record("u1", "alice")).unwrap();

        assert_eq!(stored.user_name, "alice");
        assert_eq!(stored.track_file, "1_alice");
        assert_eq!(store.get("u1").unwrap(), Some(stored));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn upsert_replaces_fields_and_keeps_creation_date() {
        let (store, _dir) = create_tmp_store();
        let first = store.upsert(&record("u1", "alice")).unwrap();

        let mut updated = first.clone();
        updated.reevaluate("alicia", "1_alicia", vector(9.0));
        updated.created = Utc::now() + Duration::days(3);
        let stored = store.upsert(&updated).unwrap();

        assert_eq!(stored.user_name, "alicia");
        assert_eq!(stored.openness, 9.0);
        assert_eq!(stored.created, first.created);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn reopening_existing_db_validates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("users.db");
        {
            let store = SqliteUserRecordStore::new(&db_path).unwrap();
            store.upsert(&record("u1", "alice")).unwrap();
        }

        let reopened = SqliteUserRecordStore::new(&db_path).unwrap();
        assert!(reopened.get("u1").unwrap().is_some());
    }

    #[test]
    fn foreign_db_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("other.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE stuff (id INTEGER)", []).unwrap();
        }

        assert!(SqliteUserRecordStore::new(&db_path).is_err());
    }

    #[test]
    fn play_counts_once_per_pair() {
        let (store, _dir) = create_tmp_store();
        store.upsert(&record("u1", "alice")).unwrap();
        let play = Play {
            player: "u2".to_string(),
            played: "u1".to_string(),
        };

        assert_eq!(store.record_play(&play).unwrap(), InteractionOutcome::Recorded);
        assert_eq!(
            store.record_play(&play).unwrap(),
            InteractionOutcome::AlreadyRecorded
        );
        let other = Play {
            player: "u3".to_string(),
            played: "u1".to_string(),
        };
        assert_eq!(store.record_play(&other).unwrap(), InteractionOutcome::Recorded);

        assert_eq!(store.get("u1").unwrap().unwrap().plays, 2);
    }

    #[test]
    fn interaction_with_unknown_target() {
        let (store, _dir) = create_tmp_store();
        let share = Share {
            sharer: "u2".to_string(),
            shared: "ghost".to_string(),
        };

        assert_eq!(
            store.record_share(&share).unwrap(),
            InteractionOutcome::UnknownTarget
        );
    }

    #[test]
    fn share_bumps_shares_only() {
        let (store, _dir) = create_tmp_store();
        store.upsert(&record("u1", "alice")).unwrap();
        let share = Share {
            sharer: "u2".to_string(),
            shared: "u1".to_string(),
        };

        store.record_share(&share).unwrap();

        let stored = store.get("u1").unwrap().unwrap();
        assert_eq!(stored.shares, 1);
        assert_eq!(stored.plays, 0);
    }

    #[test]
    fn newest_and_hottest_listings() {
        let (store, _dir) = create_tmp_store();
        let now = Utc::now();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            let mut r = record(&format!("u{}", i), name);
            r.created = now - Duration::minutes(10 - i as i64);
            store.upsert(&r).unwrap();
        }
        for player in ["x", "y", "z"] {
            store
                .record_play(&Play {
                    player: player.to_string(),
                    played: "u1".to_string(),
                })
                .unwrap();
        }
        store
            .record_play(&Play {
                player: "x".to_string(),
                played: "u0".to_string(),
            })
            .unwrap();

        let newest: Vec<String> = store
            .list(&UserListing::Newest {
                offset: 1,
                limit: 2,
            })
            .unwrap()
            .into_iter()
            .map(|r| r.user_name)
            .collect();
        assert_eq!(newest, vec!["c", "b"]);

        let hottest: Vec<String> = store
            .list(&UserListing::Hottest {
                offset: 0,
                limit: 2,
            })
            .unwrap()
            .into_iter()
            .map(|r| r.user_name)
            .collect();
        assert_eq!(hottest, vec!["b", "a"]);
    }

    #[test]
    fn name_search_is_substring_and_escapes_wildcards() {
        let (store, _dir) = create_tmp_store();
        store.upsert(&record("u1", "alice")).unwrap();
        store.upsert(&record("u2", "malice")).unwrap();
        store.upsert(&record("u3", "bob")).unwrap();
        store.upsert(&record("u4", "50%_off")).unwrap();

        let names: Vec<String> = store
            .search_by_name("lic")
            .unwrap()
            .into_iter()
            .map(|r| r.user_name)
            .collect();
        assert_eq!(names, vec!["alice", "malice"]);

        assert_eq!(store.search_by_name("%").unwrap().len(), 1);
    }
}
