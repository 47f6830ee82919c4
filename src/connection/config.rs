use crate::facade::transactions::TxnOptions;
use mongodb::options::ConnectionString;
use std::time::Duration;

const URI_ENV: &str = "MGOCLI_URI";
const DATABASE_ENV: &str = "MGOCLI_DATABASE";

/// Client configuration
///
/// Wraps a MongoDB connection string plus the default database every
/// operation runs against. Pool and timeout knobs left as `None` keep
/// whatever the connection string (or the driver) decides.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// MongoDB connection string
    pub uri: String,

    /// Default database name
    pub database: String,

    /// Application name reported to the server
    pub app_name: Option<String>,

    /// Maximum number of connections per server
    pub max_pool_size: Option<u32>,

    /// Minimum number of connections per server
    pub min_pool_size: Option<u32>,

    /// TCP connect timeout
    pub connect_timeout: Option<Duration>,

    /// How long the driver waits for a suitable server
    pub server_selection_timeout: Option<Duration>,

    /// Deadline for `Client::ping`
    pub ping_timeout: Duration,

    /// Deadline for a whole transaction (session start, callback, commit)
    pub transaction_timeout: Option<Duration>,

    /// Transaction options used when none are given per call
    pub transaction_options: TxnOptions,
}

impl ClientConfig {
    /// Create a new configuration
    pub fn new(uri: &str, database: &str) -> Self {
        Self {
            uri: uri.to_string(),
            database: database.to_string(),
            app_name: None,
            max_pool_size: None,
            min_pool_size: None,
            connect_timeout: None,
            server_selection_timeout: None,
            ping_timeout: Duration::from_secs(3),
            transaction_timeout: None,
            transaction_options: TxnOptions::default(),
        }
    }

    /// Set the default database
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the application name
    pub fn app_name(mut self, name: &str) -> Self {
        self.app_name = Some(name.to_string());
        self
    }

    /// Set maximum pool size
    pub fn max_pool_size(mut self, max: u32) -> Self {
        self.max_pool_size = Some(max);
        self
    }

    /// Set minimum pool size
    pub fn min_pool_size(mut self, min: u32) -> Self {
        self.min_pool_size = Some(min);
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set server selection timeout
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Set ping timeout
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Set transaction timeout
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    /// Set default transaction options
    pub fn transaction_options(mut self, options: TxnOptions) -> Self {
        self.transaction_options = options;
        self
    }

    /// Parse from connection string, taking the database from its path
    ///
    /// # Examples
    ///
    /// ```
    /// # use mgocli::ClientConfig;
    /// let config = ClientConfig::from_url(
    ///     "mongodb://mongo1:27017,mongo2:27018/shop?replicaSet=rs0"
    /// ).unwrap();
    /// assert_eq!(config.database, "shop");
    /// ```
    pub fn from_url(url: &str) -> Result<Self, String> {
        let database = parse_uri(url)?
            .default_database
            .filter(|db| !db.is_empty())
            .ok_or_else(|| "URL has no database path".to_string())?;

        Ok(Self::new(url, &database))
    }

    /// Build from `MGOCLI_URI` and `MGOCLI_DATABASE`
    ///
    /// `MGOCLI_DATABASE` may be omitted when the URI carries a database path.
    pub fn from_env() -> Result<Self, String> {
        let uri = std::env::var(URI_ENV).map_err(|_| format!("{URI_ENV} is not set"))?;

        match std::env::var(DATABASE_ENV) {
            Ok(database) if !database.is_empty() => Ok(Self::new(&uri, &database)),
            _ => Self::from_url(&uri),
        }
    }

    /// Connection string with the password hidden
    pub fn to_url(&self) -> String {
        let Some((scheme, rest)) = self.uri.split_once("://") else {
            return self.uri.clone();
        };

        let hosts_end = rest.find('/').unwrap_or(rest.len());
        match rest[..hosts_end].rfind('@') {
            Some(at) => {
                let user = rest[..at].split(':').next().unwrap_or_default();
                format!("{scheme}://{user}:***{}", &rest[at..])
            }
            None => self.uri.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        parse_uri(&self.uri)?;

        if self.database.is_empty() {
            return Err("Database name cannot be empty".to_string());
        }

        if let Some(bad) = self
            .database
            .chars()
            .find(|c| matches!(c, '/' | '\\' | '.' | ' ' | '"' | '$' | '\0'))
        {
            return Err(format!("Database name cannot contain {bad:?}"));
        }

        if self.max_pool_size == Some(0) {
            return Err("max_pool_size must be > 0".to_string());
        }

        if let (Some(min), Some(max)) = (self.min_pool_size, self.max_pool_size) {
            if min > max {
                return Err("min_pool_size cannot exceed max_pool_size".to_string());
            }
        }

        if self.ping_timeout.is_zero() {
            return Err("ping_timeout must be > 0".to_string());
        }

        Ok(())
    }
}

/// Parse with the driver's connection string grammar. SRV records are not
/// resolved here.
fn parse_uri(url: &str) -> Result<ConnectionString, String> {
    ConnectionString::parse(url).map_err(|e| format!("Invalid connection string: {e}"))
}
