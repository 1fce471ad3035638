use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::{error::AppError, models::Subscription};

const SUBSCRIPTIONS: TableDefinition<&str, &str> = TableDefinition::new("subscriptions");

/// What the dispatcher needs from whoever owns the subscriptions.
pub trait SubscriptionStore: Send + Sync {
    fn list(&self) -> Result<Vec<Subscription>, AppError>;

    /// Deleting an id that is already gone is not an error.
    fn delete_by_id(&self, id: &str) -> Result<(), AppError>;
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: &str) -> Result<Self, AppError> {
        let db = if Path::new(path).exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };

        let write_txn = db.begin_write()?;
        write_txn.open_table(SUBSCRIPTIONS)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub fn generate_id(&self) -> Result<String, AppError> {
        for _ in 0..5 {
            let candidate = Uuid::new_v4()
                .to_string()
                .replace('-', "")
                .chars()
                .take(8)
                .collect::<String>();
            if self.get(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(AppError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "failed to allocate unique id",
        ))
    }

    pub fn put(&self, subscription: &Subscription) -> Result<(), AppError> {
        let value = serde_json::to_string(subscription)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SUBSCRIPTIONS)?;
            table.insert(subscription.id.as_str(), value.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Subscription>, AppError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTIONS)?;
        if let Some(value) = table.get(id)? {
            Ok(Some(serde_json::from_str(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn remove(&self, id: &str) -> Result<bool, AppError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SUBSCRIPTIONS)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

impl SubscriptionStore for RedbStore {
    fn list(&self) -> Result<Vec<Subscription>, AppError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTIONS)?;
        let mut subscriptions: Vec<Subscription> = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            subscriptions.push(serde_json::from_str(value.value())?);
        }
        Ok(subscriptions)
    }

    fn delete_by_id(&self, id: &str) -> Result<(), AppError> {
        self.remove(id).map(|_| ())
    }
}
