// ============================================================================
// mgocli Library
// ============================================================================

pub mod core;
pub mod connection;
pub mod facade;

pub use crate::core::{DbError, Result, TxnPhase};
pub use connection::{ClientConfig, SessionGuard, SessionStats, SessionTracker};
pub use facade::documents::Page;
pub use facade::transactions::{TxnOptions, TxnScope};

// Driver types that appear in this crate's signatures
pub use mongodb::bson;
pub use mongodb::results::{DeleteResult, UpdateResult};
pub use mongodb::{ClientSession, IndexModel};

use log::info;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, ReadPreference, SelectionCriteria};
use mongodb::Database;
use std::sync::Arc;

// ============================================================================
// High-level Client API
// ============================================================================

/// MongoDB client bound to one default database
///
/// Owns the driver's connection pool. Cloning is cheap and every clone
/// shares the pool and the session counters, so construct one client and
/// hand it to whatever needs it.
///
/// # Examples
///
/// ```no_run
/// use mgocli::{Client, bson, bson::doc};
///
/// # async fn demo() -> mgocli::Result<()> {
/// let client = Client::connect(
///     "mongodb://mongo1:27017,mongo2:27018,mongo3:27019/?replicaSet=rs0",
///     "shop",
/// )
/// .await?;
///
/// client.ping().await?;
/// client.insert_one("users", &doc! { "uid": 1, "name": "Alice" }).await?;
///
/// let user: Option<bson::Document> = client.find_one("users", doc! { "uid": 1 }).await?;
/// assert!(user.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: mongodb::Client,
    database: Database,
    config: Arc<ClientConfig>,
    sessions: SessionTracker,
}

impl Client {
    /// Connect with a connection string and a default database
    ///
    /// The driver connects lazily; use [`Client::ping`] to check the
    /// deployment is reachable.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        Self::connect_with_config(ClientConfig::new(uri, database)).await
    }

    /// Connect with custom configuration
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mgocli::{Client, ClientConfig};
    /// # use std::time::Duration;
    /// # async fn demo() -> mgocli::Result<()> {
    /// let config = ClientConfig::new("mongodb://localhost:27017", "shop")
    ///     .max_pool_size(20)
    ///     .transaction_timeout(Duration::from_secs(10));
    ///
    /// let client = Client::connect_with_config(config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect_with_config(config: ClientConfig) -> Result<Self> {
        config.validate().map_err(DbError::Config)?;

        let mut options = ClientOptions::parse(config.uri.as_str()).await?;
        if let Some(name) = &config.app_name {
            options.app_name = Some(name.clone());
        }
        if let Some(max) = config.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(min) = config.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(timeout) = config.connect_timeout {
            options.connect_timeout = Some(timeout);
        }
        if let Some(timeout) = config.server_selection_timeout {
            options.server_selection_timeout = Some(timeout);
        }

        let inner = mongodb::Client::with_options(options)?;
        let database = inner.database(&config.database);

        info!(
            "MongoDB client ready for {} (database '{}')",
            config.to_url(),
            config.database
        );

        Ok(Self {
            inner,
            database,
            config: Arc::new(config),
            sessions: SessionTracker::new(),
        })
    }

    /// Connect using a connection string whose path names the database
    ///
    /// Format: `mongodb://host1:port1,host2:port2/database?options`
    pub async fn connect_url(url: &str) -> Result<Self> {
        let config = ClientConfig::from_url(url).map_err(DbError::Config)?;
        Self::connect_with_config(config).await
    }

    /// Ping the primary, bounded by `ClientConfig::ping_timeout`
    pub async fn ping(&self) -> Result<()> {
        let limit = self.config.ping_timeout;
        let ping = async {
            self.inner
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
                .await
        };

        match tokio::time::timeout(limit, ping).await {
            Ok(reply) => {
                reply?;
                Ok(())
            }
            Err(_) => Err(DbError::Timeout {
                operation: "ping",
                after: limit,
            }),
        }
    }

    /// Shut the driver down
    ///
    /// Waits until sessions and cursors handed out by any clone are dropped.
    /// Other clones must not be used afterwards.
    pub async fn close(self) {
        info!("closing MongoDB client ({})", self.sessions.stats());
        self.inner.shutdown().await;
    }

    /// Default database handle
    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        &self.config.database
    }

    /// Typed collection in the default database, for driver calls this
    /// crate does not wrap
    pub fn collection<T: Send + Sync>(&self, name: &str) -> mongodb::Collection<T> {
        self.database.collection(name)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying driver client
    pub fn driver(&self) -> &mongodb::Client {
        &self.inner
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Start a session tracked by this client
    ///
    /// The session ends when the guard drops.
    pub async fn start_session(&self) -> Result<SessionGuard> {
        self.sessions.start(&self.inner).await
    }

    /// Session statistics
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mgocli::Client;
    /// # async fn demo(client: &Client) {
    /// let stats = client.stats();
    /// println!("Active sessions: {}", stats.active);
    /// # }
    /// ```
    pub fn stats(&self) -> SessionStats {
        self.sessions.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_connect_is_lazy() {
        let client = Client::connect("mongodb://127.0.0.1:1", "lazy").await.unwrap();

        assert_eq!(client.database_name(), "lazy");
        assert_eq!(client.database().name(), "lazy");
        assert_eq!(client.stats().opened, 0);
    }

    #[tokio::test]
    async fn test_client_invalid_config() {
        let result = Client::connect("http://localhost", "app").await;
        assert!(matches!(result, Err(DbError::Config(_))));

        let result = Client::connect("mongodb://localhost", "bad.name").await;
        assert!(matches!(result, Err(DbError::Config(_))));
    }

    #[tokio::test]
    async fn test_client_from_url() {
        let client = Client::connect_url("mongodb://127.0.0.1:1/inventory?appName=test")
            .await
            .unwrap();

        assert_eq!(client.database_name(), "inventory");
    }

    #[tokio::test]
    async fn test_clones_share_session_stats() {
        let client = Client::connect("mongodb://127.0.0.1:1", "app").await.unwrap();
        let clone = client.clone();

        let ticket = clone.sessions().ticket();
        assert_eq!(client.stats().active, 1);

        drop(ticket);
        assert_eq!(client.stats().active, 0);
    }
}
