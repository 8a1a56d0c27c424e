use arc_swap::ArcSwap;
use chrono::{Duration, FixedOffset, Offset, Utc};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::db::{CategoryMode, Database, DurationBucket, PriceRule};
use crate::error::{ServiceError, ServiceResult};
use crate::i18n::Language;

// ==================== Static Configuration (startup-only) ====================

/// Static configuration that cannot be changed at runtime
/// These settings affect server binding or require restart to change
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

// ==================== Dynamic Configuration (hot-reloadable) ====================

/// Dynamic configuration that can be updated at runtime via API
/// DB values override config file/env defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub i18n: I18nConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub access: AccessConfig,
}

/// Scheduling rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Minimum lead time between entering a start time and the start itself
    #[serde(default = "default_min_lead_minutes")]
    pub min_lead_minutes: i64,

    /// Requesters cannot cancel a booking closer than this to its start
    #[serde(default = "default_cancel_window_minutes")]
    pub cancel_window_minutes: i64,

    /// Length of a slot when the time input names no end time
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: i64,

    /// Offset of the wall clock users type times in (minutes east of UTC)
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl SchedulingConfig {
    pub fn min_lead(&self) -> Duration {
        Duration::minutes(self.min_lead_minutes)
    }

    pub fn cancel_window(&self) -> Duration {
        Duration::minutes(self.cancel_window_minutes)
    }

    pub fn default_duration(&self) -> Duration {
        Duration::minutes(self.default_duration_minutes)
    }

    /// Local wall-clock offset; out-of-range values fall back to UTC
    pub fn offset(&self) -> FixedOffset {
        let seconds = self.utc_offset_minutes.checked_mul(60);
        seconds.and_then(FixedOffset::east_opt).unwrap_or_else(|| {
            tracing::warn!(
                utc_offset_minutes = self.utc_offset_minutes,
                "Invalid UTC offset, using UTC"
            );
            Utc.fix()
        })
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_lead_minutes: default_min_lead_minutes(),
            cancel_window_minutes: default_cancel_window_minutes(),
            default_duration_minutes: default_duration_minutes(),
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

/// Settlement pricing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Durations at or under this many minutes use the short bucket
    #[serde(default = "default_short_max_minutes")]
    pub short_max_minutes: i64,

    /// Amount used when no price rule matches
    #[serde(default = "default_amount")]
    pub default_amount: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Rules seeded into the price rule table at startup
    #[serde(default = "default_price_rules")]
    pub rules: Vec<PriceRule>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            short_max_minutes: default_short_max_minutes(),
            default_amount: default_amount(),
            currency: default_currency(),
            rules: default_price_rules(),
        }
    }
}

/// Localization settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct I18nConfig {
    /// Language given to new profiles and used before a profile is known
    #[serde(default)]
    pub default_language: Language,
}

/// Out-of-band notification delivery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Endpoint receiving `{ "to": ..., "text": ... }` pushes. Unset means log only.
    #[serde(default)]
    pub push_url: Option<String>,
}

/// Role bootstrap
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// External identities registered as supervisors on first contact
    #[serde(default)]
    pub supervisor_ids: Vec<String>,
}

/// All valid setting keys for validation
pub const VALID_SETTING_KEYS: &[&str] = &[
    "scheduling.min_lead_minutes",
    "scheduling.cancel_window_minutes",
    "scheduling.default_duration_minutes",
    "scheduling.utc_offset_minutes",
    "pricing.short_max_minutes",
    "pricing.default_amount",
    "pricing.currency",
    "pricing.rules",
    "i18n.default_language",
    "notify.push_url",
    "access.supervisor_ids",
];

impl DynamicConfig {
    /// Get valid setting keys
    pub fn valid_keys() -> HashSet<&'static str> {
        VALID_SETTING_KEYS.iter().copied().collect()
    }

    /// Convert config to key-value map for API response
    pub fn to_key_value_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        // Scheduling settings
        map.insert(
            "scheduling.min_lead_minutes".to_string(),
            serde_json::json!(self.scheduling.min_lead_minutes),
        );
        map.insert(
            "scheduling.cancel_window_minutes".to_string(),
            serde_json::json!(self.scheduling.cancel_window_minutes),
        );
        map.insert(
            "scheduling.default_duration_minutes".to_string(),
            serde_json::json!(self.scheduling.default_duration_minutes),
        );
        map.insert(
            "scheduling.utc_offset_minutes".to_string(),
            serde_json::json!(self.scheduling.utc_offset_minutes),
        );

        // Pricing settings
        map.insert(
            "pricing.short_max_minutes".to_string(),
            serde_json::json!(self.pricing.short_max_minutes),
        );
        map.insert(
            "pricing.default_amount".to_string(),
            serde_json::json!(self.pricing.default_amount),
        );
        map.insert(
            "pricing.currency".to_string(),
            serde_json::Value::String(self.pricing.currency.clone()),
        );
        map.insert(
            "pricing.rules".to_string(),
            serde_json::to_value(&self.pricing.rules).unwrap_or_default(),
        );

        // Localization settings
        map.insert(
            "i18n.default_language".to_string(),
            serde_json::Value::String(self.i18n.default_language.to_string()),
        );

        // Notification settings
        map.insert(
            "notify.push_url".to_string(),
            serde_json::json!(self.notify.push_url),
        );

        // Access settings
        map.insert(
            "access.supervisor_ids".to_string(),
            serde_json::json!(self.access.supervisor_ids),
        );

        map
    }

    /// Apply DB setting overrides on top of file/env values
    pub fn merge_from_db(&mut self, settings: &HashMap<String, serde_json::Value>) {
        for (key, value) in settings {
            self.apply_setting(key, value);
        }
    }

    fn apply_setting(&mut self, key: &str, value: &serde_json::Value) {
        match key {
            // Scheduling settings
            "scheduling.min_lead_minutes" => {
                if let Some(v) = value.as_i64() {
                    self.scheduling.min_lead_minutes = v;
                }
            }
            "scheduling.cancel_window_minutes" => {
                if let Some(v) = value.as_i64() {
                    self.scheduling.cancel_window_minutes = v;
                }
            }
            "scheduling.default_duration_minutes" => {
                if let Some(v) = value.as_i64().filter(|v| *v > 0) {
                    self.scheduling.default_duration_minutes = v;
                }
            }
            "scheduling.utc_offset_minutes" => {
                match value.as_i64().filter(|v| v.abs() < MINUTES_PER_DAY) {
                    Some(v) => self.scheduling.utc_offset_minutes = v as i32,
                    None => tracing::warn!(%value, "Ignoring out-of-range scheduling.utc_offset_minutes"),
                }
            }

            // Pricing settings
            "pricing.short_max_minutes" => {
                if let Some(v) = value.as_i64() {
                    self.pricing.short_max_minutes = v;
                }
            }
            "pricing.default_amount" => {
                if let Some(v) = value.as_i64() {
                    self.pricing.default_amount = v;
                }
            }
            "pricing.currency" => {
                if let Some(v) = value.as_str() {
                    self.pricing.currency = v.to_string();
                }
            }
            "pricing.rules" => match serde_json::from_value(value.clone()) {
                Ok(rules) => self.pricing.rules = rules,
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed pricing.rules setting"),
            },

            // Localization settings
            "i18n.default_language" => {
                if let Some(lang) = value.as_str().and_then(|v| v.parse().ok()) {
                    self.i18n.default_language = lang;
                }
            }

            // Notification settings
            "notify.push_url" => {
                if value.is_null() {
                    self.notify.push_url = None;
                } else if let Some(v) = value.as_str() {
                    self.notify.push_url = Some(v.to_string());
                }
            }

            // Access settings
            "access.supervisor_ids" => match serde_json::from_value(value.clone()) {
                Ok(ids) => self.access.supervisor_ids = ids,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed access.supervisor_ids setting")
                }
            },

            _ => {
                tracing::warn!(key = %key, "Unknown setting key in merge_from_db");
            }
        }
    }
}

// ==================== RuntimeConfig (combines static + dynamic) ====================

/// Runtime configuration manager
/// Combines static config (startup-only) with dynamic config (hot-reloadable via ArcSwap)
pub struct RuntimeConfig {
    /// Static configuration (never changes after startup)
    pub static_config: StaticConfig,
    /// Dynamic configuration (can be hot-reloaded)
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    /// Build from already-loaded parts
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Get current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    /// Update dynamic config (atomic swap)
    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Load config from all sources with DB overrides
    pub fn load(static_config: StaticConfig, db: &Database) -> ServiceResult<Self> {
        // Load dynamic config defaults from env/file, then apply DB overrides
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);

        Ok(Self::new(static_config, dynamic))
    }

    /// Rebuild dynamic config from file/env defaults + DB and swap atomically
    pub fn reload_from_db(&self, db: &Database) -> ServiceResult<()> {
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);
        self.update_dynamic(dynamic);
        Ok(())
    }
}

// ==================== Config Loading Functions ====================

fn config_sources() -> ServiceResult<Config> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("SLOTBOOK")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("access.supervisor_ids"),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })
}

/// Load dynamic configuration from file and env vars (without DB overrides)
fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize dynamic config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_min_lead_minutes() -> i64 {
    60
}

fn default_cancel_window_minutes() -> i64 {
    30
}

fn default_duration_minutes() -> i64 {
    60
}

/// Offsets must stay strictly within one day
const MINUTES_PER_DAY: i64 = 24 * 60;

fn default_utc_offset_minutes() -> i32 {
    8 * 60 // Asia/Taipei, no DST
}

fn default_short_max_minutes() -> i64 {
    30
}

fn default_amount() -> i64 {
    800
}

fn default_currency() -> String {
    "TWD".to_string()
}

fn default_price_rules() -> Vec<PriceRule> {
    vec![
        PriceRule {
            bucket: DurationBucket::Short,
            category: CategoryMode::Online,
            amount: 500,
        },
        PriceRule {
            bucket: DurationBucket::Long,
            category: CategoryMode::Online,
            amount: 900,
        },
        PriceRule {
            bucket: DurationBucket::Short,
            category: CategoryMode::InPerson,
            amount: 600,
        },
        PriceRule {
            bucket: DurationBucket::Long,
            category: CategoryMode::InPerson,
            amount: 1100,
        },
    ]
}
