mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{AccountFilter, AccountPatch, AccountRecord, ConfigRecord, NodeAccess};

/// Abstract storage interface for settings and accounts.
///
/// All methods use `&self`; implementations handle interior mutability
/// (e.g. `Mutex<Connection>` for sqlite).
pub trait Store: Send + Sync + 'static {
    /// Get one setting by key.
    fn get_config(&self, key: &str) -> Result<Option<ConfigRecord>, String>;

    /// List the settings whose keys are in `keys`.
    fn list_config(&self, keys: &[&str]) -> Result<Vec<ConfigRecord>, String>;

    /// List every setting except those in `keys`.
    fn list_config_excluding(&self, keys: &[&str]) -> Result<Vec<ConfigRecord>, String>;

    /// Insert or replace whole records (value and remark).
    fn upsert_config(&self, records: &[ConfigRecord]) -> Result<(), String>;

    /// Set values by key in one transaction, keeping existing remarks.
    fn update_config(&self, values: &[(&str, &str)]) -> Result<(), String>;

    /// Insert records whose keys are absent; existing rows are untouched.
    fn seed_config(&self, records: &[ConfigRecord]) -> Result<(), String>;

    /// First account matching `filter`, lowest id first.
    fn get_account(&self, filter: &AccountFilter) -> Result<Option<AccountRecord>, String>;

    /// All accounts matching `filter`, ordered by id.
    fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<AccountRecord>, String>;

    /// Apply `patch` to the given ids; returns the number of rows changed.
    fn update_accounts(&self, ids: &[i64], patch: &AccountPatch) -> Result<usize, String>;

    /// Insert records with `id == 0`, replace the others by id.
    fn upsert_accounts(&self, records: &[AccountRecord]) -> Result<(), String>;

    /// Add collected byte counters to one account by username.
    fn add_account_traffic(&self, username: &str, download: i64, upload: i64)
        -> Result<(), String>;

    /// Zero download/upload of every account; returns rows changed.
    fn reset_all_traffic(&self) -> Result<usize, String>;
}
