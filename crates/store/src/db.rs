//! MongoDB-backed store.
//!
//! Operations are single-document and atomic; the bot never needs a
//! multi-document transaction. Every method returns `Error::Store` on
//! driver failure so callers can degrade (the permission oracle falls
//! back to config-only when the store is down).

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use futures_util::TryStreamExt;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use parking_lot::RwLock;

use herald_domain::{BotMode, Error, Jid, Result};

use crate::records::{JobRecord, SettingDoc};

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

fn store_err(e: mongodb::error::Error) -> Error {
    Error::Store(e.to_string())
}

struct Inner {
    client: Client,
    db: Database,
}

/// Handle to the document store. Cheap to clone via `Arc`; `reconnect`
/// swaps the underlying client atomically.
pub struct Store {
    uri: String,
    db_name: String,
    inner: RwLock<Arc<Inner>>,
}

impl Store {
    /// Connect and ensure the unique indexes exist.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let inner = Self::open(uri, db_name).await?;
        let store = Self {
            uri: uri.to_string(),
            db_name: db_name.to_string(),
            inner: RwLock::new(Arc::new(inner)),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn open(uri: &str, db_name: &str) -> Result<Inner> {
        let mut options = ClientOptions::parse(uri).await.map_err(store_err)?;
        options.server_selection_timeout = Some(QUERY_TIMEOUT);
        options.connect_timeout = Some(QUERY_TIMEOUT);
        let client = Client::with_options(options).map_err(store_err)?;
        let db = client.database(db_name);
        Ok(Inner { client, db })
    }

    fn db(&self) -> Database {
        self.inner.read().db.clone()
    }

    fn admins(&self) -> Collection<bson::Document> {
        self.db().collection("admins")
    }

    fn bans(&self) -> Collection<bson::Document> {
        self.db().collection("bans")
    }

    fn settings(&self) -> Collection<SettingDoc> {
        self.db().collection("settings")
    }

    fn jobs(&self) -> Collection<JobRecord> {
        self.db().collection("jobs")
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let unique = |keys: bson::Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        self.admins()
            .create_index(unique(doc! { "jid": 1 }))
            .await
            .map_err(store_err)?;
        self.bans()
            .create_index(unique(doc! { "jid": 1 }))
            .await
            .map_err(store_err)?;
        self.settings()
            .create_index(unique(doc! { "key": 1 }))
            .await
            .map_err(store_err)?;
        self.jobs()
            .create_index(unique(doc! { "job_id": 1 }))
            .await
            .map_err(store_err)?;
        Ok(())
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Round-trip ping.
    pub async fn ping(&self) -> Result<()> {
        self.db()
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    /// Replace the client with a fresh connection. Used by the health
    /// loop after a failed ping.
    pub async fn reconnect(&self) -> Result<()> {
        let fresh = Self::open(&self.uri, &self.db_name).await?;
        *self.inner.write() = Arc::new(fresh);
        tracing::info!(db = %self.db_name, "store client reconnected");
        Ok(())
    }

    /// Close the client. The driver drains its pool on drop; explicit
    /// shutdown keeps the exit sequence deterministic.
    pub async fn close(&self) {
        let inner = self.inner.read().clone();
        inner.client.clone().shutdown().await;
    }

    // ── Admins / bans ───────────────────────────────────────────────

    pub async fn is_admin(&self, jid: &Jid) -> Result<bool> {
        let found = self
            .admins()
            .find_one(doc! { "jid": jid.to_string() })
            .await
            .map_err(store_err)?;
        Ok(found.is_some())
    }

    pub async fn add_admin(&self, jid: &Jid) -> Result<bool> {
        let res = self
            .admins()
            .update_one(
                doc! { "jid": jid.to_string() },
                doc! { "$setOnInsert": { "jid": jid.to_string() } },
            )
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(res.upserted_id.is_some())
    }

    pub async fn remove_admin(&self, jid: &Jid) -> Result<bool> {
        let res = self
            .admins()
            .delete_one(doc! { "jid": jid.to_string() })
            .await
            .map_err(store_err)?;
        Ok(res.deleted_count > 0)
    }

    pub async fn is_banned(&self, jid: &Jid) -> Result<bool> {
        let found = self
            .bans()
            .find_one(doc! { "jid": jid.to_string() })
            .await
            .map_err(store_err)?;
        Ok(found.is_some())
    }

    pub async fn ban(&self, jid: &Jid) -> Result<bool> {
        let res = self
            .bans()
            .update_one(
                doc! { "jid": jid.to_string() },
                doc! { "$setOnInsert": { "jid": jid.to_string() } },
            )
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(res.upserted_id.is_some())
    }

    pub async fn unban(&self, jid: &Jid) -> Result<bool> {
        let res = self
            .bans()
            .delete_one(doc! { "jid": jid.to_string() })
            .await
            .map_err(store_err)?;
        Ok(res.deleted_count > 0)
    }

    // ── Bot mode ────────────────────────────────────────────────────

    /// The persisted bot mode, if one has been set.
    pub async fn bot_mode(&self) -> Result<Option<BotMode>> {
        let found = self
            .settings()
            .find_one(doc! { "key": "mode" })
            .await
            .map_err(store_err)?;
        Ok(found.and_then(|s| BotMode::parse(&s.value)))
    }

    pub async fn set_bot_mode(&self, mode: BotMode) -> Result<()> {
        self.settings()
            .update_one(
                doc! { "key": "mode" },
                doc! { "$set": { "key": "mode", "value": mode.to_string() } },
            )
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    // ── Scheduled-job records ───────────────────────────────────────

    /// Upsert a durable job record (keyed on `job_id`).
    pub async fn put_job(&self, record: &JobRecord) -> Result<()> {
        let payload = bson::to_document(record).map_err(|e| Error::Store(e.to_string()))?;
        self.jobs()
            .update_one(doc! { "job_id": &record.job_id }, doc! { "$set": payload })
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let res = self
            .jobs()
            .delete_one(doc! { "job_id": job_id })
            .await
            .map_err(store_err)?;
        Ok(res.deleted_count > 0)
    }

    /// All durable job records owned by one plugin.
    pub async fn jobs_for_plugin(&self, plugin: &str) -> Result<Vec<JobRecord>> {
        let cursor = self
            .jobs()
            .find(doc! { "plugin": plugin })
            .await
            .map_err(store_err)?;
        cursor.try_collect().await.map_err(store_err)
    }
}
