use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Base URL used to build the public consultant links (no trailing slash).
    pub app_base_url: String,
    /// Per-request budget for paginated SGA searches, in seconds.
    pub sga_timeout_secs: u64,
    /// Page size for paginated SGA searches.
    pub sga_page_size: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            sga_timeout_secs: std::env::var("SGA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "180".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SGA_TIMEOUT_SECS must be a number of seconds"))?,
            sga_page_size: std::env::var("SGA_PAGE_SIZE")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SGA_PAGE_SIZE must be a positive number"))?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        if config.app_base_url.is_empty() {
            tracing::warn!("APP_BASE_URL not set; consultant links will be relative paths");
        } else {
            tracing::debug!("App base URL: {}", config.app_base_url);
        }
        tracing::debug!("SGA timeout: {}s", config.sga_timeout_secs);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
