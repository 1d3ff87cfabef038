use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use std::error::Error;

use crate::utils::AppError;

pub const USERS: &str = "users";
pub const RESTAURANTS: &str = "restaurants";
pub const PLANS: &str = "plans";
pub const PAYMENTS: &str = "payments";
pub const COUNTERS: &str = "counters";

/// Reads `seq` from a counter document; int32 counters seeded by hand are accepted.
fn sequence_value(name: &str, counter: Option<Document>) -> Result<i64, AppError> {
    let counter =
        counter.ok_or_else(|| AppError::Internal(format!("Counter '{}' was not returned", name)))?;

    match counter.get("seq") {
        Some(Bson::Int64(n)) if *n > 0 => Ok(*n),
        Some(Bson::Int32(n)) if *n > 0 => Ok(i64::from(*n)),
        other => Err(AppError::Internal(format!(
            "Counter '{}' holds an unusable seq: {:?}",
            name, other
        ))),
    }
}

#[derive(Clone)]
pub struct MongoDB {
    db: Database,
}

impl MongoDB {
    pub async fn new(uri: &str) -> Result<Self, Box<dyn Error>> {
        let mut client_options = mongodb::options::ClientOptions::parse(uri).await?;

        // Connection pool
        client_options.max_pool_size = Some(20);
        client_options.min_pool_size = Some(2);
        client_options.max_idle_time = Some(std::time::Duration::from_secs(300));

        client_options.connect_timeout = Some(std::time::Duration::from_secs(5));
        client_options.server_selection_timeout = Some(std::time::Duration::from_secs(5));

        let db_name = client_options
            .default_database
            .clone()
            .unwrap_or_else(|| "qr_presence".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&db_name);

        // Test connection
        db.run_command(doc! { "ping": 1 }).await?;

        let mongodb = Self { db };
        mongodb.ensure_indexes().await?;

        Ok(mongodb)
    }

    /// Creates the indexes the billing queries rely on
    async fn ensure_indexes(&self) -> Result<(), Box<dyn Error>> {
        log::info!("🔧 Creating database indexes...");

        let unique = || IndexOptions::builder().unique(true).build();

        self.create_index(USERS, doc! { "email": 1 }, Some(unique())).await?;
        self.create_index(USERS, doc! { "user_id": 1 }, Some(unique())).await?;
        self.create_index(RESTAURANTS, doc! { "owner_id": 1 }, None).await?;
        self.create_index(
            RESTAURANTS,
            doc! { "subscription.status": 1, "subscription.end_date": 1 },
            None,
        )
        .await?;
        self.create_index(PLANS, doc! { "category": 1, "is_active": 1 }, None).await?;
        self.create_index(PAYMENTS, doc! { "user_id": 1, "created_at": -1 }, None).await?;
        self.create_index(PAYMENTS, doc! { "gateway_order_id": 1 }, Some(unique())).await?;
        self.create_index(
            PAYMENTS,
            doc! { "invoice_number": 1 },
            Some(IndexOptions::builder().unique(true).sparse(true).build()),
        )
        .await?;
        self.create_index(PAYMENTS, doc! { "gateway_payment_id": 1 }, None).await?;

        log::info!("✅ Database indexes ready");

        Ok(())
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: Option<IndexOptions>,
    ) -> Result<(), mongodb::error::Error> {
        let label = format!("{}({:?})", collection, keys.keys().collect::<Vec<_>>());
        let model = IndexModel::builder().keys(keys).options(options).build();

        match self.collection::<Document>(collection).create_index(model).await {
            Ok(_) => {
                log::info!("   ✅ Index ready: {}", label);
                Ok(())
            }
            // An index with the same keys but other options is left alone
            Err(e) if e.to_string().contains("already exists") => {
                log::debug!("   ℹ️  Index already exists: {}", label);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Atomically increments and returns the named counter.
    pub async fn next_sequence(&self, name: &str) -> Result<i64, AppError> {
        let counter = self
            .collection::<Document>(COUNTERS)
            .find_one_and_update(doc! { "_id": name }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?;

        sequence_value(name, counter)
    }

    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    /// Round-trips a ping to the server
    pub async fn health_check(&self) -> bool {
        self.db.run_command(doc! { "ping": 1 }).await.is_ok()
    }

    /// Handle that never reached a server; only for paths that skip the database.
    #[cfg(test)]
    pub async fn unconnected() -> Self {
        let mut options = mongodb::options::ClientOptions::parse("mongodb://127.0.0.1:1/qr_presence_test")
            .await
            .expect("valid test uri");
        options.server_selection_timeout = Some(std::time::Duration::from_millis(200));

        let client = Client::with_options(options).expect("test client");
        Self { db: client.database("qr_presence_test") }
    }
}

/// Live database for `#[ignore]`d tests, from `TEST_DATABASE_URL`.
#[cfg(test)]
pub(crate) async fn test_database() -> MongoDB {
    let uri = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "mongodb://127.0.0.1:27017/qr_presence_test".to_string());
    MongoDB::new(&uri).await.expect("TEST_DATABASE_URL must point at a running MongoDB")
}
