use std::{
    fmt,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use moka::{future::Cache, policy::EvictionPolicy, Expiry};
use tower_sessions::{
    cookie::time::OffsetDateTime,
    session::{Id, Record},
    session_store::{self, SessionStore},
};

const MAX_SESSIONS: u64 = 100_000;

/// In-process session records, each evicted once its expiry date passes.
#[derive(Clone)]
pub struct SessionCache {
    records: Cache<Id, Record>,
}

impl SessionCache {
    pub fn new(max_sessions: u64) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(max_sessions)
                // always admit new sessions, dropping the least recently used when full
                .eviction_policy(EvictionPolicy::lru())
                .expire_after(UntilExpiryDate)
                .build(),
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(MAX_SESSIONS)
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("sessions", &self.records.entry_count())
            .finish_non_exhaustive()
    }
}

struct UntilExpiryDate;

impl Expiry<Id, Record> for UntilExpiryDate {
    fn expire_after_create(&self, _id: &Id, record: &Record, _created_at: Instant) -> Option<Duration> {
        Some(time_left(record))
    }

    fn expire_after_update(
        &self,
        _id: &Id,
        record: &Record,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(time_left(record))
    }
}

fn time_left(record: &Record) -> Duration {
    Duration::try_from(record.expiry_date - OffsetDateTime::now_utc()).unwrap_or_default()
}

#[async_trait]
impl SessionStore for SessionCache {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        while self.records.contains_key(&record.id) {
            record.id = Id::default();
        }
        self.records.insert(record.id, record.clone()).await;
        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.records.insert(record.id, record.clone()).await;
        Ok(())
    }

    async fn load(&self, id: &Id) -> session_store::Result<Option<Record>> {
        Ok(self
            .records
            .get(id)
            .await
            .filter(|record| record.expiry_date > OffsetDateTime::now_utc()))
    }

    async fn delete(&self, id: &Id) -> session_store::Result<()> {
        self.records.invalidate(id).await;
        Ok(())
    }
}
