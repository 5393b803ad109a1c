//! Typed configuration from environment variables.
//!
//! Loads once at startup. Rates, backend choice and the operation menu come
//! from the CLI; the environment only carries observability concerns.

#[derive(Debug)]
pub struct Config {
    /// Optional OTLP endpoint (e.g. "http://localhost:4317").
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Self {
        Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
        }
    }
}
