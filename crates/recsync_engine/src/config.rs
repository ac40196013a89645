//! Configuration for sync engines.

/// Maximum number of records per upload POST.
pub const MAX_UPLOAD_RECORDS: usize = 50;
/// Download batch size used on mobile clients.
pub const MOBILE_BATCH_SIZE: usize = 50;
/// Maximum number of ids per DELETE request.
pub const DELETE_CHUNK_SIZE: usize = 100;
/// Score bump that asks the host for an immediate sync.
pub const SCORE_INCREMENT_XLARGE: u32 = 300;

/// Lifetime of a client record on the server: 21 days.
pub const CLIENTS_TTL: u64 = 1_814_400;
/// Interval after which the local client record is re-uploaded: 7 days.
pub const CLIENTS_TTL_REFRESH: u64 = 604_800;
/// Default lifetime of a send-tab record: 7 days.
pub const DEFAULT_TAB_STATE_TTL: u64 = 604_800;

/// Configuration for a single-collection engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine and collection name.
    pub name: String,
    /// Local schema version.
    pub version: u32,
    /// Maximum records per download GET. `None` means unbounded.
    pub batch_size: Option<usize>,
    /// Maximum ids fetched by the follow-up id listing. `None` means unbounded.
    pub download_limit: Option<usize>,
    /// Records per upload POST.
    pub max_upload_records: usize,
    /// Ids per DELETE request.
    pub delete_chunk_size: usize,
    /// Records processed between cooperative yields. Zero disables yielding.
    pub yield_interval: usize,
}

impl EngineConfig {
    /// Creates a configuration for the named collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            batch_size: None,
            download_limit: None,
            max_upload_records: MAX_UPLOAD_RECORDS,
            delete_chunk_size: DELETE_CHUNK_SIZE,
            yield_interval: 1,
        }
    }

    /// Sets the schema version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Caps each download GET at `size` records.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Caps the follow-up id listing at `limit` ids.
    pub fn with_download_limit(mut self, limit: usize) -> Self {
        self.download_limit = Some(limit);
        self
    }

    /// Sets the upload chunk size.
    pub fn with_max_upload_records(mut self, size: usize) -> Self {
        self.max_upload_records = size.max(1);
        self
    }

    /// Sets the DELETE chunk size.
    pub fn with_delete_chunk_size(mut self, size: usize) -> Self {
        self.delete_chunk_size = size.max(1);
        self
    }

    /// Sets the cooperative yield interval.
    pub fn with_yield_interval(mut self, interval: usize) -> Self {
        self.yield_interval = interval;
        self
    }

    /// Applies the mobile download batch size.
    pub fn for_mobile(self) -> Self {
        self.with_batch_size(MOBILE_BATCH_SIZE)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("engine")
    }
}

/// Configuration for the clients engine.
#[derive(Debug, Clone)]
pub struct ClientsConfig {
    /// Base engine configuration for the `clients` collection.
    pub engine: EngineConfig,
    /// TTL of uploaded client records, in seconds.
    pub record_ttl: u64,
    /// Forced re-upload interval for the local record, in seconds.
    pub refresh_interval: u64,
    /// Default TTL of send-tab records, in seconds.
    pub tab_state_ttl: u64,
    /// Application name used when synthesizing the local client name.
    pub app_name: String,
    /// Score added when a URI or tab is sent.
    pub send_score: u32,
}

impl ClientsConfig {
    /// Creates a configuration with the standard TTLs.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            engine: EngineConfig::new(recsync_protocol::CLIENTS_COLLECTION),
            record_ttl: CLIENTS_TTL,
            refresh_interval: CLIENTS_TTL_REFRESH,
            tab_state_ttl: DEFAULT_TAB_STATE_TTL,
            app_name: app_name.into(),
            send_score: SCORE_INCREMENT_XLARGE,
        }
    }

    /// Replaces the base engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the client record TTL.
    pub fn with_record_ttl(mut self, ttl: u64) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Sets the forced re-upload interval.
    pub fn with_refresh_interval(mut self, interval: u64) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the default send-tab TTL.
    pub fn with_tab_state_ttl(mut self, ttl: u64) -> Self {
        self.tab_state_ttl = ttl;
        self
    }
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self::new("recsync")
    }
}
