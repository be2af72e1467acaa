use std::time::Duration;

use crate::abuse::AbuseSettings;
use crate::email::EmailSettings;
use crate::nurture::NurtureSettings;
use crate::routing::{parse_routing_rules, RoutingRule};

const DEFAULT_IP_HASH_SALT: &str = "fiv-match-default-salt";
const DEFAULT_FROM_EMAIL: &str = "FIV Match <noreply@fivmatch.ro>";
const DEFAULT_RESEND_BASE_URL: &str = "https://api.resend.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub ip_hash_salt: String,
    /// Operator token for the admin routes.
    pub verify_token: String,
    /// Shared secret carried by the external nurture trigger.
    pub internal_cron_token: String,
    /// Fallback recipient when no routing rule matches a city.
    pub default_routing_email: String,
    pub routing_rules: Vec<RoutingRule>,
    pub monitor_email: Option<String>,
    pub email: EmailSettings,
    pub abuse: AbuseSettings,
    pub nurture: NurtureSettings,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))
        .and_then(|value| {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            Ok(value)
        })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn numeric<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = required("DATABASE_URL").and_then(|url| {
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
            }
            Ok(url)
        })?;

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let ip_hash_salt = optional("IP_HASH_SALT").unwrap_or_else(|| {
            tracing::warn!("IP_HASH_SALT not set, using built-in default salt");
            DEFAULT_IP_HASH_SALT.to_string()
        });

        let default_routing_email = required("CLINIC_LEADS_EMAIL")
            .or_else(|_| required("CLINIC_NOTIFICATION_EMAIL"))
            .map_err(|_| {
                anyhow::anyhow!(
                    "CLINIC_LEADS_EMAIL or CLINIC_NOTIFICATION_EMAIL environment variable required"
                )
            })?;

        let routing_rules = match optional("CLINIC_ROUTING_RULES") {
            Some(raw) => parse_routing_rules(&raw)?,
            None => Vec::new(),
        };

        let resend_base_url = optional("RESEND_BASE_URL")
            .unwrap_or_else(|| DEFAULT_RESEND_BASE_URL.to_string());
        if !resend_base_url.starts_with("http://") && !resend_base_url.starts_with("https://") {
            anyhow::bail!("RESEND_BASE_URL must start with http:// or https://");
        }

        let window_secs: u64 = numeric("RATE_LIMIT_WINDOW_SECS", 900)?;
        let max_per_window: u32 = numeric("RATE_LIMIT_MAX", 5)?;
        let min_fill_ms: i64 = numeric("MIN_FILL_TIME_MS", 3000)?;
        if window_secs == 0 || max_per_window == 0 {
            anyhow::bail!("RATE_LIMIT_WINDOW_SECS and RATE_LIMIT_MAX must be greater than zero");
        }

        let batch_size: i64 = numeric("NURTURE_BATCH_SIZE", 100)?;
        let concurrency: usize = numeric("NURTURE_CONCURRENCY", 8)?;
        if batch_size <= 0 || concurrency == 0 {
            anyhow::bail!("NURTURE_BATCH_SIZE and NURTURE_CONCURRENCY must be greater than zero");
        }

        let config = Self {
            database_url,
            port,
            ip_hash_salt,
            verify_token: required("VERIFY_TOKEN")?,
            internal_cron_token: required("INTERNAL_CRON_TOKEN")?,
            default_routing_email,
            routing_rules,
            monitor_email: optional("INTERNAL_LEADS_MONITOR_EMAIL"),
            email: EmailSettings {
                api_key: required("RESEND_API_KEY")?,
                from: optional("RESEND_FROM_EMAIL")
                    .unwrap_or_else(|| DEFAULT_FROM_EMAIL.to_string()),
                base_url: resend_base_url,
            },
            abuse: AbuseSettings {
                window: Duration::from_secs(window_secs),
                max_per_window,
                min_fill_ms,
            },
            nurture: NurtureSettings {
                batch_size,
                concurrency,
                dry_run: false,
            },
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Routing rules loaded: {}", config.routing_rules.len());
        tracing::debug!("Default routing email: {}", config.default_routing_email);
        if config.monitor_email.is_none() {
            tracing::info!("INTERNAL_LEADS_MONITOR_EMAIL not set, internal notifications disabled");
        }
        tracing::debug!(
            "Rate limit: {} per {}s, min fill time {}ms",
            config.abuse.max_per_window,
            window_secs,
            config.abuse.min_fill_ms
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
