use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// One row of the settings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub remark: String,
}

impl ConfigRecord {
    pub fn new(key: &str, value: &str, remark: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            remark: remark.to_string(),
        }
    }
}

/// Which nodes an account may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAccess {
    PrimaryOnly,
    Both,
}

impl NodeAccess {
    pub fn as_level(&self) -> i64 {
        match self {
            Self::PrimaryOnly => 1,
            Self::Both => 2,
        }
    }

    /// Unknown levels read back as primary-only.
    pub fn from_level(level: i64) -> Self {
        match level {
            2 => Self::Both,
            _ => Self::PrimaryOnly,
        }
    }
}

/// Persisted account. Times are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// `0` asks the store to assign one on insert.
    pub id: i64,
    pub username: String,
    pub pass: String,
    /// Connection secret, `username.password`.
    pub con_pass: String,
    /// Bytes; negative means unlimited.
    pub quota: i64,
    pub download: i64,
    pub upload: i64,
    pub expire_time: i64,
    pub kick_util_time: i64,
    pub device_no: i64,
    pub role: String,
    pub node_access: NodeAccess,
    pub deleted: bool,
    pub login_at: i64,
    pub con_at: i64,
    pub create_time: i64,
    pub update_time: i64,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            id: 0,
            username: String::new(),
            pass: String::new(),
            con_pass: String::new(),
            quota: -1,
            download: 0,
            upload: 0,
            // 9999-01-01
            expire_time: 253_370_736_000_000,
            kick_util_time: 0,
            device_no: 3,
            role: "user".to_string(),
            node_access: NodeAccess::PrimaryOnly,
            deleted: false,
            login_at: 0,
            con_at: 0,
            create_time: 0,
            update_time: 0,
        }
    }
}

impl AccountRecord {
    pub fn used_bytes(&self) -> i64 {
        self.download.saturating_add(self.upload)
    }
}

/// Predicate over accounts, compiled to a SQL `WHERE` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountFilter {
    All,
    Id(i64),
    IdIn(Vec<i64>),
    Username(String),
    ConPass(String),
    NodeAccess(NodeAccess),
    NotDeleted,
    /// Matches the connection secret of an account that may connect at
    /// `now`: not deleted, under quota, not expired, not kicked.
    Usable { con_pass: String, now: i64 },
    And(Vec<AccountFilter>),
}

impl AccountFilter {
    pub(crate) fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            AccountFilter::All => "1 = 1".to_string(),
            AccountFilter::Id(id) => {
                params.push(Value::Integer(*id));
                "id = ?".to_string()
            }
            AccountFilter::IdIn(ids) => {
                if ids.is_empty() {
                    return "1 = 0".to_string();
                }
                let marks = vec!["?"; ids.len()].join(", ");
                params.extend(ids.iter().map(|id| Value::Integer(*id)));
                format!("id IN ({marks})")
            }
            AccountFilter::Username(name) => {
                params.push(Value::Text(name.clone()));
                "username = ?".to_string()
            }
            AccountFilter::ConPass(con_pass) => {
                params.push(Value::Text(con_pass.clone()));
                "con_pass = ?".to_string()
            }
            AccountFilter::NodeAccess(access) => {
                params.push(Value::Integer(access.as_level()));
                "node_access = ?".to_string()
            }
            AccountFilter::NotDeleted => "deleted = 0".to_string(),
            AccountFilter::Usable { con_pass, now } => {
                params.push(Value::Text(con_pass.clone()));
                params.push(Value::Integer(*now));
                params.push(Value::Integer(*now));
                "con_pass = ? AND deleted = 0 AND (quota < 0 OR quota > download + upload) \
                 AND ? < expire_time AND ? > kick_util_time"
                    .to_string()
            }
            AccountFilter::And(parts) => {
                if parts.is_empty() {
                    return "1 = 1".to_string();
                }
                let clauses: Vec<String> = parts
                    .iter()
                    .map(|part| format!("({})", part.to_sql(params)))
                    .collect();
                clauses.join(" AND ")
            }
        }
    }
}

/// Partial account update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub quota: Option<i64>,
    pub download: Option<i64>,
    pub upload: Option<i64>,
    pub expire_time: Option<i64>,
    pub kick_util_time: Option<i64>,
    pub device_no: Option<i64>,
    pub node_access: Option<NodeAccess>,
    pub deleted: Option<bool>,
    pub login_at: Option<i64>,
    pub con_at: Option<i64>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub(crate) fn assignments(&self, params: &mut Vec<Value>) -> Vec<&'static str> {
        let mut sets = Vec::new();
        let mut int = |column: &'static str, value: Option<i64>| {
            if let Some(v) = value {
                params.push(Value::Integer(v));
                sets.push(column);
            }
        };
        int("quota = ?", self.quota);
        int("download = ?", self.download);
        int("upload = ?", self.upload);
        int("expire_time = ?", self.expire_time);
        int("kick_util_time = ?", self.kick_util_time);
        int("device_no = ?", self.device_no);
        int("node_access = ?", self.node_access.map(|a| a.as_level()));
        int("deleted = ?", self.deleted.map(i64::from));
        int("login_at = ?", self.login_at);
        int("con_at = ?", self.con_at);
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_filter_collects_params_in_order() {
        let filter = AccountFilter::And(vec![
            AccountFilter::NodeAccess(NodeAccess::Both),
            AccountFilter::IdIn(vec![4, 5]),
        ]);
        let mut params = Vec::new();
        let sql = filter.to_sql(&mut params);
        assert_eq!(sql, "(node_access = ?) AND (id IN (?, ?))");
        assert_eq!(
            params,
            vec![Value::Integer(2), Value::Integer(4), Value::Integer(5)]
        );
    }

    #[test]
    fn empty_id_set_matches_nothing() {
        let mut params = Vec::new();
        assert_eq!(AccountFilter::IdIn(vec![]).to_sql(&mut params), "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn patch_only_sets_present_fields() {
        let patch = AccountPatch {
            kick_util_time: Some(10),
            node_access: Some(NodeAccess::PrimaryOnly),
            ..Default::default()
        };
        let mut params = Vec::new();
        let sets = patch.assignments(&mut params);
        assert_eq!(sets, vec!["kick_util_time = ?", "node_access = ?"]);
        assert_eq!(params, vec![Value::Integer(10), Value::Integer(1)]);
        assert!(AccountPatch::default().is_empty());
    }
}
