//! TOML configuration.
//!
//! Every section is optional; missing fields take the defaults below. The
//! bearer credential never lives in the file: `vault.api_key_env` names the
//! environment variable that holds it.
//!
//! ```toml
//! [vault]
//! base_url = "https://127.0.0.1:27124"
//! api_key_env = "VAULT_API_KEY"
//!
//! [boost]
//! path_rules = [{ prefix = "reference/", multiplier = 1.5 }]
//! tag_rules = [{ tag = "important", multiplier = 2.0 }]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::dedup::CanonicalStrategy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub boost: BoostConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Path prefix the aggregator scans (empty = whole vault).
    #[serde(default)]
    pub root: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            accept_invalid_certs: true,
            root: String::new(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://127.0.0.1:27124".to_string()
}
fn default_api_key_env() -> String {
    "VAULT_API_KEY".to_string()
}
fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

impl VaultConfig {
    /// Read the bearer credential from the configured environment variable.
    ///
    /// Returns `None` when the variable is unset or empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_fast_timeout_ms")]
    pub fast_timeout_ms: u64,
    #[serde(default = "default_medium_timeout_ms")]
    pub medium_timeout_ms: u64,
    #[serde(default = "default_slow_timeout_ms")]
    pub slow_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Response cache lifetime. `0` disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Upper bound on cached responses.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fast_timeout_ms: default_fast_timeout_ms(),
            medium_timeout_ms: default_medium_timeout_ms(),
            slow_timeout_ms: default_slow_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_fast_timeout_ms() -> u64 {
    2_000
}
fn default_medium_timeout_ms() -> u64 {
    10_000
}
fn default_slow_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_capacity() -> u64 {
    10_000
}
fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

impl TransportConfig {
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    /// Maximum number of bodies fetched during the content pass.
    #[serde(default = "default_scan_budget")]
    pub scan_budget: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            scan_budget: default_scan_budget(),
            concurrency: default_concurrency(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_scan_budget() -> usize {
    200
}
fn default_concurrency() -> usize {
    8
}
fn default_max_depth() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct RankingConfig {
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
    #[serde(default = "default_title_boost")]
    pub title_boost: f64,
    #[serde(default = "default_tags_boost")]
    pub tags_boost: f64,
    #[serde(default = "default_body_boost")]
    pub body_boost: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            title_boost: default_title_boost(),
            tags_boost: default_tags_boost(),
            body_boost: default_body_boost(),
        }
    }
}

fn default_k1() -> f64 {
    1.2
}
fn default_b() -> f64 {
    0.75
}
fn default_title_boost() -> f64 {
    3.0
}
fn default_tags_boost() -> f64 {
    2.0
}
fn default_body_boost() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BoostConfig {
    #[serde(default)]
    pub path_rules: Vec<PathRuleConfig>,
    #[serde(default)]
    pub tag_rules: Vec<TagRuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathRuleConfig {
    pub prefix: String,
    pub multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TagRuleConfig {
    pub tag: String,
    pub multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            strategy: default_strategy(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.9
}
fn default_strategy() -> String {
    "freshest".to_string()
}

impl DedupConfig {
    pub fn canonical_strategy(&self) -> Result<CanonicalStrategy> {
        self.strategy.parse()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Top-level deadline for a search run. `0` disables it.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            max_tokens: default_max_tokens(),
            chunk_size: default_chunk_size(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

fn default_limit() -> usize {
    20
}
fn default_max_tokens() -> usize {
    4_000
}
fn default_chunk_size() -> usize {
    512
}
fn default_deadline_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate vault
    if config.vault.base_url.trim().is_empty() {
        bail!("vault.base_url must not be empty");
    }
    let base = reqwest::Url::parse(&config.vault.base_url)
        .with_context(|| format!("vault.base_url is not a URL: {}", config.vault.base_url))?;
    if base.cannot_be_a_base() {
        bail!("vault.base_url cannot carry a path: {}", config.vault.base_url);
    }
    if config.vault.api_key_env.trim().is_empty() {
        bail!("vault.api_key_env must name an environment variable");
    }

    // Validate transport
    let t = &config.transport;
    if t.fast_timeout_ms == 0 || t.medium_timeout_ms == 0 || t.slow_timeout_ms == 0 {
        bail!("transport timeouts must be > 0");
    }
    if t.cache_capacity == 0 {
        bail!("transport.cache_capacity must be > 0");
    }
    if t.max_body_bytes == 0 {
        bail!("transport.max_body_bytes must be > 0");
    }

    if config.circuit_breaker.failure_threshold == 0 {
        bail!("circuit_breaker.failure_threshold must be >= 1");
    }

    if config.aggregation.concurrency == 0 {
        bail!("aggregation.concurrency must be >= 1");
    }

    // Validate ranking
    let r = &config.ranking;
    if !r.k1.is_finite() || r.k1 < 0.0 {
        bail!("ranking.k1 must be >= 0");
    }
    if !(0.0..=1.0).contains(&r.b) {
        bail!("ranking.b must be in [0.0, 1.0]");
    }
    for (name, value) in [
        ("title_boost", r.title_boost),
        ("tags_boost", r.tags_boost),
        ("body_boost", r.body_boost),
    ] {
        if !value.is_finite() || value <= 0.0 {
            bail!("ranking.{} must be > 0", name);
        }
    }

    // Validate boost rules
    for rule in &config.boost.path_rules {
        if !rule.multiplier.is_finite() || rule.multiplier <= 0.0 {
            bail!(
                "boost path rule '{}' has invalid multiplier {}",
                rule.prefix,
                rule.multiplier
            );
        }
    }
    for rule in &config.boost.tag_rules {
        if rule.tag.trim_start_matches('#').trim().is_empty() {
            bail!("boost tag rule must name a tag");
        }
        if !rule.multiplier.is_finite() || rule.multiplier <= 0.0 {
            bail!(
                "boost tag rule '{}' has invalid multiplier {}",
                rule.tag,
                rule.multiplier
            );
        }
    }

    // Validate dedup
    let threshold = config.dedup.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        bail!("dedup.similarity_threshold must be in (0.0, 1.0]");
    }
    config.dedup.canonical_strategy()?;

    // Validate search defaults
    if config.search.limit == 0 {
        bail!("search.limit must be >= 1");
    }
    if config.search.max_tokens == 0 {
        bail!("search.max_tokens must be > 0");
    }
    if config.search.chunk_size == 0 {
        bail!("search.chunk_size must be > 0");
    }

    Ok(())
}
