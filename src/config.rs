use anyhow::Result;
use std::time::Duration;

/// Tunables shared by the host and companion sides.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    // Companion cache
    pub page_size: usize,
    pub response_timeout: Duration,
    pub retention_margin: usize,
    pub max_cached_tracks: usize,

    // Host publisher
    pub debounce: Duration,

    // Artwork
    pub artwork_max_dimension: u32,
    pub artwork_quality: u8,
    pub artwork_cache_size: usize,
    pub artwork_ttl: Duration,

    // Transport
    pub max_payload_bytes: usize,
}

impl SyncConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            // Companion cache
            page_size: env_or("QUEUE_MIRROR_PAGE_SIZE", defaults.page_size)?,
            response_timeout: env_duration_or(
                "QUEUE_MIRROR_RESPONSE_TIMEOUT",
                defaults.response_timeout,
            )?,
            retention_margin: env_or("QUEUE_MIRROR_RETENTION_MARGIN", defaults.retention_margin)?,
            max_cached_tracks: env_or("QUEUE_MIRROR_MAX_CACHED_TRACKS", defaults.max_cached_tracks)?,

            // Host publisher
            debounce: env_duration_or("QUEUE_MIRROR_DEBOUNCE", defaults.debounce)?,

            // Artwork
            artwork_max_dimension: env_or(
                "QUEUE_MIRROR_ARTWORK_MAX_DIMENSION",
                defaults.artwork_max_dimension,
            )?,
            artwork_quality: env_or("QUEUE_MIRROR_ARTWORK_QUALITY", defaults.artwork_quality)?,
            artwork_cache_size: env_or("QUEUE_MIRROR_ARTWORK_CACHE_SIZE", defaults.artwork_cache_size)?,
            artwork_ttl: env_duration_or("QUEUE_MIRROR_ARTWORK_TTL", defaults.artwork_ttl)?,

            // Transport
            max_payload_bytes: env_or("QUEUE_MIRROR_MAX_PAYLOAD_BYTES", defaults.max_payload_bytes)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The page size must hold at least the initial window (7 tracks)
    /// - Timeouts and debounce windows must be non-zero, debounce at most 5s
    /// - The track bound must cover the displayed window plus its margin
    /// - JPEG quality must be within 1..=100
    pub fn validate(&self) -> Result<()> {
        if self.page_size < 7 {
            anyhow::bail!("Page size must be at least 7, got: {}", self.page_size);
        }

        if self.response_timeout.is_zero() {
            anyhow::bail!("Response timeout must be greater than 0");
        }

        if self.debounce.is_zero() || self.debounce > Duration::from_secs(5) {
            anyhow::bail!(
                "Debounce must be between 1ms and 5s, got: {}",
                humantime::format_duration(self.debounce)
            );
        }

        if self.max_cached_tracks < self.page_size * 3 {
            anyhow::bail!(
                "Max cached tracks ({}) must be at least three pages ({})",
                self.max_cached_tracks,
                self.page_size * 3
            );
        }

        if self.artwork_max_dimension == 0 {
            anyhow::bail!("Artwork max dimension must be greater than 0");
        }

        if !(1..=100).contains(&self.artwork_quality) {
            anyhow::bail!("Artwork quality must be between 1 and 100, got: {}", self.artwork_quality);
        }

        if self.artwork_cache_size == 0 {
            anyhow::bail!("Artwork cache size must be greater than 0");
        }

        if self.max_payload_bytes < 1024 {
            anyhow::bail!("Max payload must be at least 1KiB, got: {}", self.max_payload_bytes);
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Cache: page {}, timeout {}, retain ±{}, max {} tracks\n  \
            Publisher: debounce {}\n  \
            Artwork: {}px @ q{}, {} cached for {}\n  \
            Transport: {} bytes max payload",
            self.page_size,
            humantime::format_duration(self.response_timeout),
            self.retention_margin,
            self.max_cached_tracks,
            humantime::format_duration(self.debounce),
            self.artwork_max_dimension,
            self.artwork_quality,
            self.artwork_cache_size,
            humantime::format_duration(self.artwork_ttl),
            self.max_payload_bytes,
        )
    }
}

/// Default configuration values.
///
/// The payload limit mirrors the ~100KB cap of typical watch data channels.
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 7,
            response_timeout: Duration::from_secs(5),
            retention_margin: 14,
            max_cached_tracks: 64,

            debounce: Duration::from_millis(300),

            artwork_max_dimension: 400,
            artwork_quality: 80,
            artwork_cache_size: 64,
            artwork_ttl: Duration::from_secs(600),

            max_payload_bytes: 100 * 1024,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().parse()?),
        _ => Ok(default),
    }
}

fn env_duration_or(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(humantime::parse_duration(val.trim())?),
        _ => Ok(default),
    }
}
