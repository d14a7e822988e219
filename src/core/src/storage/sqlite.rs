use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, types::Value, Connection, Row};

use super::types::{AccountFilter, AccountPatch, AccountRecord, ConfigRecord, NodeAccess};
use super::Store;

const ACCOUNT_COLUMNS: &str = "id, username, pass, con_pass, quota, download, upload, \
     expire_time, kick_util_time, device_no, role, node_access, deleted, login_at, con_at, \
     create_time, update_time";

/// SQLite-backed store for settings and accounts.
///
/// Uses a `Mutex<Connection>` for thread-safe interior mutability.
/// The database is created/migrated on `open()`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a sqlite database at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS config (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL DEFAULT '',
                remark      TEXT NOT NULL DEFAULT '',
                create_time INTEGER NOT NULL DEFAULT 0,
                update_time INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS account (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                username       TEXT NOT NULL UNIQUE,
                pass           TEXT NOT NULL DEFAULT '',
                con_pass       TEXT NOT NULL DEFAULT '',
                quota          INTEGER NOT NULL DEFAULT -1,
                download       INTEGER NOT NULL DEFAULT 0,
                upload         INTEGER NOT NULL DEFAULT 0,
                expire_time    INTEGER NOT NULL DEFAULT 253370736000000,
                kick_util_time INTEGER NOT NULL DEFAULT 0,
                device_no      INTEGER NOT NULL DEFAULT 3,
                role           TEXT NOT NULL DEFAULT 'user',
                deleted        INTEGER NOT NULL DEFAULT 0,
                login_at       INTEGER NOT NULL DEFAULT 0,
                con_at         INTEGER NOT NULL DEFAULT 0,
                create_time    INTEGER NOT NULL DEFAULT 0,
                update_time    INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_account_con_pass
                ON account (con_pass);
            ",
        )
        .map_err(|e| format!("migrate: {e}"))?;

        if let Err(e) = conn.execute(
            "ALTER TABLE account ADD COLUMN node_access INTEGER NOT NULL DEFAULT 1",
            [],
        ) {
            let msg = e.to_string().to_lowercase();
            if !msg.contains("duplicate column") {
                return Err(format!("migrate add account.node_access: {e}"));
            }
        }

        Ok(())
    }

    fn query_accounts(
        &self,
        filter: &AccountFilter,
        limit: Option<usize>,
        op: &str,
    ) -> Result<Vec<AccountRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut values = Vec::new();
        let clause = filter.to_sql(&mut values);
        let mut sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE {clause} ORDER BY id");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| format!("{op} prepare: {e}"))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), account_from_row)
            .map_err(|e| format!("{op} query: {e}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| format!("{op} row: {e}"))?);
        }
        Ok(out)
    }
}

impl Store for SqliteStore {
    fn get_config(&self, key: &str) -> Result<Option<ConfigRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT key, value, remark FROM config WHERE key = ?1")
            .map_err(|e| format!("get_config prepare: {e}"))?;

        let mut rows = stmt
            .query_map(params![key], config_from_row)
            .map_err(|e| format!("get_config query: {e}"))?;

        match rows.next() {
            Some(Ok(rec)) => Ok(Some(rec)),
            Some(Err(e)) => Err(format!("get_config row: {e}")),
            None => Ok(None),
        }
    }

    fn list_config(&self, keys: &[&str]) -> Result<Vec<ConfigRecord>, String> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let marks = vec!["?"; keys.len()].join(", ");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT key, value, remark FROM config WHERE key IN ({marks}) ORDER BY key"
            ))
            .map_err(|e| format!("list_config prepare: {e}"))?;
        let rows = stmt
            .query_map(params_from_iter(keys.iter()), config_from_row)
            .map_err(|e| format!("list_config query: {e}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| format!("list_config row: {e}"))?);
        }
        Ok(out)
    }

    fn list_config_excluding(&self, keys: &[&str]) -> Result<Vec<ConfigRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let sql = if keys.is_empty() {
            "SELECT key, value, remark FROM config ORDER BY key".to_string()
        } else {
            let marks = vec!["?"; keys.len()].join(", ");
            format!("SELECT key, value, remark FROM config WHERE key NOT IN ({marks}) ORDER BY key")
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| format!("list_config_excluding prepare: {e}"))?;
        let rows = stmt
            .query_map(params_from_iter(keys.iter()), config_from_row)
            .map_err(|e| format!("list_config_excluding query: {e}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| format!("list_config_excluding row: {e}"))?);
        }
        Ok(out)
    }

    fn upsert_config(&self, records: &[ConfigRecord]) -> Result<(), String> {
        let mut conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let tx = conn
            .transaction()
            .map_err(|e| format!("upsert_config begin: {e}"))?;
        let now = now_millis();
        for rec in records {
            tx.execute(
                "INSERT INTO config (key, value, remark, create_time, update_time)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    remark = excluded.remark,
                    update_time = excluded.update_time",
                params![rec.key, rec.value, rec.remark, now],
            )
            .map_err(|e| format!("upsert_config {}: {e}", rec.key))?;
        }
        tx.commit().map_err(|e| format!("upsert_config commit: {e}"))
    }

    fn update_config(&self, values: &[(&str, &str)]) -> Result<(), String> {
        let mut conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let tx = conn
            .transaction()
            .map_err(|e| format!("update_config begin: {e}"))?;
        let now = now_millis();
        for (key, value) in values {
            tx.execute(
                "INSERT INTO config (key, value, remark, create_time, update_time)
                 VALUES (?1, ?2, '', ?3, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    update_time = excluded.update_time",
                params![key, value, now],
            )
            .map_err(|e| format!("update_config {key}: {e}"))?;
        }
        tx.commit().map_err(|e| format!("update_config commit: {e}"))
    }

    fn seed_config(&self, records: &[ConfigRecord]) -> Result<(), String> {
        let mut conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let tx = conn
            .transaction()
            .map_err(|e| format!("seed_config begin: {e}"))?;
        let now = now_millis();
        for rec in records {
            tx.execute(
                "INSERT OR IGNORE INTO config (key, value, remark, create_time, update_time)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![rec.key, rec.value, rec.remark, now],
            )
            .map_err(|e| format!("seed_config {}: {e}", rec.key))?;
        }
        tx.commit().map_err(|e| format!("seed_config commit: {e}"))
    }

    fn get_account(&self, filter: &AccountFilter) -> Result<Option<AccountRecord>, String> {
        Ok(self
            .query_accounts(filter, Some(1), "get_account")?
            .into_iter()
            .next())
    }

    fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<AccountRecord>, String> {
        self.query_accounts(filter, None, "list_accounts")
    }

    fn update_accounts(&self, ids: &[i64], patch: &AccountPatch) -> Result<usize, String> {
        if ids.is_empty() || patch.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut values: Vec<Value> = Vec::new();
        let mut sets = patch.assignments(&mut values);
        sets.push("update_time = ?");
        values.push(Value::Integer(now_millis()));
        let marks = vec!["?"; ids.len()].join(", ");
        values.extend(ids.iter().map(|id| Value::Integer(*id)));

        let sql = format!(
            "UPDATE account SET {} WHERE id IN ({marks})",
            sets.join(", ")
        );
        conn.execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| format!("update_accounts: {e}"))
    }

    fn upsert_accounts(&self, records: &[AccountRecord]) -> Result<(), String> {
        let mut conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let tx = conn
            .transaction()
            .map_err(|e| format!("upsert_accounts begin: {e}"))?;
        let now = now_millis();
        for rec in records {
            let id = if rec.id > 0 { Some(rec.id) } else { None };
            let create_time = if rec.create_time > 0 { rec.create_time } else { now };
            tx.execute(
                "INSERT INTO account (id, username, pass, con_pass, quota, download, upload,
                    expire_time, kick_util_time, device_no, role, node_access, deleted,
                    login_at, con_at, create_time, update_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT(id) DO UPDATE SET
                    username = excluded.username,
                    pass = excluded.pass,
                    con_pass = excluded.con_pass,
                    quota = excluded.quota,
                    download = excluded.download,
                    upload = excluded.upload,
                    expire_time = excluded.expire_time,
                    kick_util_time = excluded.kick_util_time,
                    device_no = excluded.device_no,
                    role = excluded.role,
                    node_access = excluded.node_access,
                    deleted = excluded.deleted,
                    login_at = excluded.login_at,
                    con_at = excluded.con_at,
                    update_time = excluded.update_time",
                params![
                    id,
                    rec.username,
                    rec.pass,
                    rec.con_pass,
                    rec.quota,
                    rec.download,
                    rec.upload,
                    rec.expire_time,
                    rec.kick_util_time,
                    rec.device_no,
                    rec.role,
                    rec.node_access.as_level(),
                    rec.deleted,
                    rec.login_at,
                    rec.con_at,
                    create_time,
                    now,
                ],
            )
            .map_err(|e| format!("upsert_accounts {}: {e}", rec.username))?;
        }
        tx.commit()
            .map_err(|e| format!("upsert_accounts commit: {e}"))
    }

    fn add_account_traffic(
        &self,
        username: &str,
        download: i64,
        upload: i64,
    ) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "UPDATE account SET download = download + ?1, upload = upload + ?2, update_time = ?3
             WHERE username = ?4",
            params![download, upload, now_millis(), username],
        )
        .map_err(|e| format!("add_account_traffic: {e}"))?;
        Ok(())
    }

    fn reset_all_traffic(&self) -> Result<usize, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "UPDATE account SET download = 0, upload = 0, update_time = ?1",
            params![now_millis()],
        )
        .map_err(|e| format!("reset_all_traffic: {e}"))
    }
}

fn config_from_row(row: &Row<'_>) -> Result<ConfigRecord, rusqlite::Error> {
    Ok(ConfigRecord {
        key: row.get(0)?,
        value: row.get(1)?,
        remark: row.get(2)?,
    })
}

fn account_from_row(row: &Row<'_>) -> Result<AccountRecord, rusqlite::Error> {
    Ok(AccountRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        pass: row.get(2)?,
        con_pass: row.get(3)?,
        quota: row.get(4)?,
        download: row.get(5)?,
        upload: row.get(6)?,
        expire_time: row.get(7)?,
        kick_util_time: row.get(8)?,
        device_no: row.get(9)?,
        role: row.get(10)?,
        node_access: NodeAccess::from_level(row.get(11)?),
        deleted: row.get(12)?,
        login_at: row.get(13)?,
        con_at: row.get(14)?,
        create_time: row.get(15)?,
        update_time: row.get(16)?,
    })
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteStore {
        SqliteStore::open_memory().unwrap()
    }

    fn account(username: &str, access: NodeAccess) -> AccountRecord {
        AccountRecord {
            username: username.into(),
            pass: "pw".into(),
            con_pass: format!("{username}.pw"),
            node_access: access,
            ..Default::default()
        }
    }

    #[test]
    fn update_config_keeps_remark() {
        let store = make_store();
        store
            .upsert_config(&[ConfigRecord::new("h_ui_web_port", "8081", "web port")])
            .unwrap();
        store.update_config(&[("h_ui_web_port", "9090")]).unwrap();

        let rec = store.get_config("h_ui_web_port").unwrap().unwrap();
        assert_eq!(rec.value, "9090");
        assert_eq!(rec.remark, "web port");
    }

    #[test]
    fn seed_never_overwrites() {
        let store = make_store();
        store.update_config(&[("jwt_secret", "kept")]).unwrap();
        store
            .seed_config(&[
                ConfigRecord::new("jwt_secret", "fresh", ""),
                ConfigRecord::new("h_ui_web_port", "8081", ""),
            ])
            .unwrap();

        assert_eq!(store.get_config("jwt_secret").unwrap().unwrap().value, "kept");
        assert_eq!(
            store.get_config("h_ui_web_port").unwrap().unwrap().value,
            "8081"
        );
    }

    #[test]
    fn list_config_excluding_skips_keys() {
        let store = make_store();
        store
            .update_config(&[("a", "1"), ("b", "2"), ("c", "3")])
            .unwrap();
        let keys: Vec<String> = store
            .list_config_excluding(&["b"])
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(store.list_config(&["c", "b"]).unwrap().len(), 2);
        assert!(store.list_config(&[]).unwrap().is_empty());
    }

    #[test]
    fn new_accounts_are_stamped_with_wall_clock_millis() {
        let store = make_store();
        let before = chrono::Utc::now().timestamp_millis();
        store
            .upsert_accounts(&[account("alice", NodeAccess::PrimaryOnly)])
            .unwrap();
        let after = chrono::Utc::now().timestamp_millis();
        let alice = store
            .get_account(&AccountFilter::Username("alice".into()))
            .unwrap()
            .unwrap();
        assert!((before..=after).contains(&alice.create_time));
        assert!((before..=after).contains(&alice.update_time));
    }

    #[test]
    fn upsert_assigns_ids_then_replaces() {
        let store = make_store();
        store
            .upsert_accounts(&[account("alice", NodeAccess::Both)])
            .unwrap();
        let mut alice = store
            .get_account(&AccountFilter::Username("alice".into()))
            .unwrap()
            .unwrap();
        assert!(alice.id > 0);
        assert_eq!(alice.node_access, NodeAccess::Both);

        alice.quota = 1024;
        store.upsert_accounts(&[alice.clone()]).unwrap();
        let loaded = store.get_account(&AccountFilter::Id(alice.id)).unwrap().unwrap();
        assert_eq!(loaded.quota, 1024);
        assert_eq!(store.list_accounts(&AccountFilter::All).unwrap().len(), 1);
    }

    #[test]
    fn update_accounts_by_node_access() {
        let store = make_store();
        store
            .upsert_accounts(&[
                account("a", NodeAccess::Both),
                account("b", NodeAccess::Both),
                account("c", NodeAccess::PrimaryOnly),
            ])
            .unwrap();
        let ids: Vec<i64> = store
            .list_accounts(&AccountFilter::NodeAccess(NodeAccess::Both))
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids.len(), 2);

        let changed = store
            .update_accounts(
                &ids,
                &AccountPatch {
                    node_access: Some(NodeAccess::PrimaryOnly),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(changed, 2);
        assert!(store
            .list_accounts(&AccountFilter::NodeAccess(NodeAccess::Both))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn usable_filter_applies_quota_expiry_and_kick() {
        let store = make_store();
        let now = 1_000_000;
        let mut over_quota = account("quota", NodeAccess::PrimaryOnly);
        over_quota.quota = 100;
        over_quota.download = 60;
        over_quota.upload = 40;
        let mut expired = account("expired", NodeAccess::PrimaryOnly);
        expired.expire_time = now;
        let mut kicked = account("kicked", NodeAccess::PrimaryOnly);
        kicked.kick_util_time = now;
        let mut deleted = account("deleted", NodeAccess::PrimaryOnly);
        deleted.deleted = true;
        let ok = account("ok", NodeAccess::PrimaryOnly);
        store
            .upsert_accounts(&[over_quota, expired, kicked, deleted, ok])
            .unwrap();

        for name in ["quota", "expired", "kicked", "deleted"] {
            let hit = store
                .get_account(&AccountFilter::Usable {
                    con_pass: format!("{name}.pw"),
                    now,
                })
                .unwrap();
            assert!(hit.is_none(), "{name} should not be usable");
        }
        let hit = store
            .get_account(&AccountFilter::Usable {
                con_pass: "ok.pw".into(),
                now,
            })
            .unwrap();
        assert_eq!(hit.map(|a| a.username), Some("ok".to_string()));
    }

    #[test]
    fn traffic_accumulates_and_resets() {
        let store = make_store();
        store
            .upsert_accounts(&[account("alice", NodeAccess::PrimaryOnly)])
            .unwrap();
        store.add_account_traffic("alice", 10, 5).unwrap();
        store.add_account_traffic("alice", 1, 1).unwrap();
        store.add_account_traffic("nobody", 1, 1).unwrap();

        let alice = store
            .get_account(&AccountFilter::Username("alice".into()))
            .unwrap()
            .unwrap();
        assert_eq!((alice.download, alice.upload), (11, 6));

        assert_eq!(store.reset_all_traffic().unwrap(), 1);
        let alice = store
            .get_account(&AccountFilter::Username("alice".into()))
            .unwrap()
            .unwrap();
        assert_eq!(alice.used_bytes(), 0);
    }
}
