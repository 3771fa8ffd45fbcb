use crate::error::{PipelineError, Result};

/// Runtime configuration, loaded from environment variables.
///
/// Required variables: `DATABASE_URL`, `SECRET_KEY`. Everything else falls
/// back to a development-friendly default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub app_name: String,
    pub app_description: String,
    pub app_version: String,

    pub allowed_origins: String,
    pub allowed_headers: String,
    pub allowed_methods: String,

    pub database_url: String,

    pub secret_key: String,
    pub timestamp_tolerance_seconds: i64,

    pub redis_host: String,
    pub redis_port: u16,

    pub be_base_url: String,
    pub bind_addr: String,

    pub concurrent_workers: usize,

    pub page_size: u32,
    pub default_page: u32,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| PipelineError::config("DATABASE_URL must be set"))?;
        let secret_key = std::env::var("SECRET_KEY")
            .map_err(|_| PipelineError::config("SECRET_KEY must be set"))?;

        let settings = Self {
            debug: env_parse("DEBUG", false),
            app_name: env_or("APP_NAME", "webhook-pipeline"),
            app_description: env_or(
                "APP_DESCRIPTION",
                "Webhook ingest and delivery pipeline",
            ),
            app_version: env_or("APP_VERSION", env!("CARGO_PKG_VERSION")),
            allowed_origins: env_or("ALLOWED_ORIGINS", "*"),
            allowed_headers: env_or("ALLOWED_HEADERS", "*"),
            allowed_methods: env_or("ALLOWED_METHODS", "*"),
            database_url,
            secret_key,
            timestamp_tolerance_seconds: env_parse("TIMESTAMP_TOLERANCE_SECONDS", 300),
            redis_host: env_or("REDIS_HOST", "127.0.0.1"),
            redis_port: env_parse("REDIS_PORT", 6379),
            be_base_url: env_or("BE_BASE_URL", "http://localhost:8000"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),
            concurrent_workers: env_parse("CONCURRENT_WORKERS", 4),
            page_size: env_parse("PAGE_SIZE", 10),
            default_page: env_parse("DEFAULT_PAGE", 1),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent_workers == 0 {
            return Err(PipelineError::config("CONCURRENT_WORKERS must be at least 1"));
        }
        if self.page_size == 0 || self.default_page == 0 {
            return Err(PipelineError::config(
                "PAGE_SIZE and DEFAULT_PAGE must be at least 1",
            ));
        }
        if self.timestamp_tolerance_seconds <= 0 {
            return Err(PipelineError::config(
                "TIMESTAMP_TOLERANCE_SECONDS must be positive",
            ));
        }
        Ok(())
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    /// Endpoint the delivery workers POST event payloads to.
    pub fn downstream_url(&self) -> String {
        format!(
            "{}/api/v1/webhooks/downstream/receive",
            self.be_base_url.trim_end_matches('/')
        )
    }

    pub fn allowed_origins_list(&self) -> Vec<String> {
        parse_cors_value(&self.allowed_origins)
    }

    pub fn allowed_headers_list(&self) -> Vec<String> {
        parse_cors_value(&self.allowed_headers)
    }

    pub fn allowed_methods_list(&self) -> Vec<String> {
        parse_cors_value(&self.allowed_methods)
    }
}

/// `"*"` anywhere means wildcard; otherwise a comma-separated list.
fn parse_cors_value(value: &str) -> Vec<String> {
    if value.contains('*') {
        vec!["*".to_string()]
    } else {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        debug: true,
        app_name: "webhook-pipeline".into(),
        app_description: "test".into(),
        app_version: "0.0.0".into(),
        allowed_origins: "*".into(),
        allowed_headers: "*".into(),
        allowed_methods: "*".into(),
        database_url: "postgres://localhost/webhooks_test".into(),
        secret_key: "test-secret".into(),
        timestamp_tolerance_seconds: 300,
        redis_host: "127.0.0.1".into(),
        redis_port: 6379,
        be_base_url: "http://localhost:8000".into(),
        bind_addr: "127.0.0.1:0".into(),
        concurrent_workers: 2,
        page_size: 10,
        default_page: 1,
    }
}
