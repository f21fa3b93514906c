//! The ban database.
//!
//! Permanent K-lines, D-lines, X-lines and resvs survive restarts in a
//! small SQLite table; temporary and propagated bans never touch disk.
//! The daemon replays the stored records into the address-match index at
//! startup, mirroring how the old tree consumed the bandb record stream.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::DbError;
use crate::access::{ConfItem, ConfKind};

/// Ban families as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredBanKind {
    Kline,
    Dline,
    Xline,
    Resv,
}

impl StoredBanKind {
    fn as_str(self) -> &'static str {
        match self {
            StoredBanKind::Kline => "K",
            StoredBanKind::Dline => "D",
            StoredBanKind::Xline => "X",
            StoredBanKind::Resv => "R",
        }
    }

    fn from_str(s: &str) -> Option<StoredBanKind> {
        match s {
            "K" => Some(StoredBanKind::Kline),
            "D" => Some(StoredBanKind::Dline),
            "X" => Some(StoredBanKind::Xline),
            "R" => Some(StoredBanKind::Resv),
            _ => None,
        }
    }
}

/// One persisted ban row.
#[derive(Debug, Clone)]
pub struct StoredBan {
    pub kind: StoredBanKind,
    pub user: Option<String>,
    pub host: String,
    pub reason: String,
    pub oper_reason: Option<String>,
    pub set_by: String,
    pub created: i64,
}

impl StoredBan {
    /// Materialize into a live conf record.
    pub fn to_conf(&self) -> ConfItem {
        let kind = match self.kind {
            StoredBanKind::Kline => ConfKind::Kline,
            StoredBanKind::Dline => ConfKind::Dline,
            StoredBanKind::Xline => ConfKind::Xline,
            StoredBanKind::Resv => {
                if solanum_proto::casemap::is_channel_name(&self.host) {
                    ConfKind::ResvChannel
                } else {
                    ConfKind::ResvNick
                }
            }
        };
        let mut conf = ConfItem::new(kind, self.user.clone(), self.host.clone(), self.reason.clone());
        conf.oper_reason = self.oper_reason.clone();
        conf.set_by = Some(self.set_by.clone());
        conf.created = self.created;
        conf
    }
}

/// Handle over the ban database pool.
#[derive(Clone)]
pub struct BanDb {
    pool: SqlitePool,
}

impl BanDb {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    pub async fn open(path: &str) -> Result<BanDb, DbError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(DbError::Sqlx)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bans (
                kind TEXT NOT NULL,
                user TEXT,
                host TEXT NOT NULL,
                reason TEXT NOT NULL,
                oper_reason TEXT,
                set_by TEXT NOT NULL,
                created INTEGER NOT NULL,
                PRIMARY KEY (kind, user, host)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(BanDb { pool })
    }

    /// Record a permanent ban.
    pub async fn add(
        &self,
        kind: StoredBanKind,
        set_by: &str,
        user: Option<&str>,
        host: &str,
        reason: &str,
        oper_reason: Option<&str>,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO bans (kind, user, host, reason, oper_reason, set_by, created)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(user)
        .bind(host)
        .bind(reason)
        .bind(oper_reason)
        .bind(set_by)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop a persisted ban. Returns whether a row existed.
    pub async fn del(
        &self,
        kind: StoredBanKind,
        user: Option<&str>,
        host: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM bans WHERE kind = ? AND user IS ? AND host = ?",
        )
        .bind(kind.as_str())
        .bind(user)
        .bind(host)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stream every stored ban, for startup replay.
    pub async fn load_all(&self) -> Result<Vec<StoredBan>, DbError> {
        let rows = sqlx::query_as::<
            _,
            (String, Option<String>, String, String, Option<String>, String, i64),
        >("SELECT kind, user, host, reason, oper_reason, set_by, created FROM bans")
        .fetch_all(&self.pool)
        .await?;

        let bans: Vec<StoredBan> = rows
            .into_iter()
            .filter_map(|(kind, user, host, reason, oper_reason, set_by, created)| {
                Some(StoredBan {
                    kind: StoredBanKind::from_str(&kind)?,
                    user,
                    host,
                    reason,
                    oper_reason,
                    set_by,
                    created,
                })
            })
            .collect();
        info!(count = bans.len(), "Loaded persisted bans");
        Ok(bans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_db() -> (BanDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bans.db");
        let db = BanDb::open(path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn test_add_load_roundtrip() {
        let (db, _dir) = temp_db().await;
        db.add(
            StoredBanKind::Kline,
            "oper",
            Some("*"),
            "bad.example.com",
            "spam",
            Some("ticket 42"),
        )
        .await
        .unwrap();
        db.add(StoredBanKind::Resv, "oper", None, "#services", "Reserved", None)
            .await
            .unwrap();

        let bans = db.load_all().await.unwrap();
        assert_eq!(bans.len(), 2);
        let kline = bans
            .iter()
            .find(|b| b.kind == StoredBanKind::Kline)
            .unwrap();
        assert_eq!(kline.host, "bad.example.com");
        assert_eq!(kline.oper_reason.as_deref(), Some("ticket 42"));
        assert_eq!(kline.to_conf().kind, ConfKind::Kline);
    }

    #[tokio::test]
    async fn test_del_removes_row() {
        let (db, _dir) = temp_db().await;
        db.add(StoredBanKind::Dline, "oper", None, "10.0.0.0/8", "bad net", None)
            .await
            .unwrap();
        assert!(db.del(StoredBanKind::Dline, None, "10.0.0.0/8").await.unwrap());
        assert!(!db.del(StoredBanKind::Dline, None, "10.0.0.0/8").await.unwrap());
        assert!(db.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_same_key() {
        let (db, _dir) = temp_db().await;
        db.add(StoredBanKind::Kline, "a", Some("*"), "h", "first", None)
            .await
            .unwrap();
        db.add(StoredBanKind::Kline, "b", Some("*"), "h", "second", None)
            .await
            .unwrap();
        let bans = db.load_all().await.unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].reason, "second");
    }
}
