//! Environment configuration with validation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::voters::llm::LlmProvider;

/// Default voter priority: cheap/free tiers first, paid backups last
pub const DEFAULT_VOTER_PRIORITY: &str = "groq,gemini,openai,anthropic,xai";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub consensus: ConsensusConfig,
    pub resolution: ResolutionConfig,
    pub dispute: DisputePolicy,
    /// Voters in priority order
    pub voters: Vec<VoterSettings>,
    pub log_level: String,
}

/// How adapter calls are dispatched within one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Sequential,
    Parallel,
}

/// How collected votes are tallied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TallyMode {
    /// One voter, one vote
    #[default]
    Count,
    /// Buckets weighted by each voter's self-reported confidence
    ConfidenceWeighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(with = "humantime_serde")]
    pub voter_timeout: Duration,
    /// Caller-level bound on a whole attempt; votes returned before it still count
    #[serde(with = "humantime_serde", default)]
    pub overall_deadline: Option<Duration>,
    pub dispatch: DispatchMode,
    pub tally: TallyMode,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            voter_timeout: Duration::from_secs(30),
            overall_deadline: None,
            dispatch: DispatchMode::Sequential,
            tally: TallyMode::Count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Fraction of voters that must agree, in (0, 1]
    pub required_agreement: f64,
    /// Confidence (0-100) below which a resolution goes to the insurance backstop
    pub insurance_threshold: u8,
    /// How long a resolution attempt holds its market before a retry may take over
    #[serde(with = "humantime_serde")]
    pub attempt_lease: Duration,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            required_agreement: 0.8,
            insurance_threshold: 80,
            attempt_lease: Duration::from_secs(300),
        }
    }
}

/// Dispute finalization rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputePolicy {
    #[serde(with = "humantime_serde")]
    pub voting_period: Duration,
    /// Total stake below which a dispute is rejected for lack of quorum
    pub min_quorum_weight: Decimal,
    /// Total stake at which a dispute may be finalized before its deadline
    pub early_close_weight: Option<Decimal>,
    /// How long after resolution a finalized market may still be challenged
    #[serde(with = "humantime_serde")]
    pub dispute_window: Duration,
    /// Resolved markets at or above this confidence cannot be challenged
    pub confidence_ceiling: u8,
}

impl Default for DisputePolicy {
    fn default() -> Self {
        Self {
            voting_period: Duration::from_secs(24 * 3600),
            min_quorum_weight: Decimal::ZERO,
            early_close_weight: None,
            dispute_window: Duration::from_secs(48 * 3600),
            confidence_ceiling: 95,
        }
    }
}

/// Per-voter settings, one entry per configured LLM source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterSettings {
    pub id: String,
    pub provider: LlmProvider,
    pub enabled: bool,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl VoterSettings {
    /// Settings with provider defaults and no credentials
    pub fn for_provider(provider: LlmProvider) -> Self {
        Self {
            id: provider.id().to_string(),
            provider,
            enabled: true,
            api_key: None,
            model: provider.default_model().to_string(),
            base_url: provider.default_base_url().to_string(),
        }
    }

    fn from_env(provider: LlmProvider) -> Result<Self, ConfigError> {
        let prefix = provider.env_prefix();
        let defaults = Self::for_provider(provider);

        Ok(Self {
            enabled: parse_env(&format!("{}_ENABLED", prefix), true)?,
            api_key: env::var(format!("{}_API_KEY", prefix))
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: env::var(format!("{}_MODEL", prefix)).unwrap_or(defaults.model),
            base_url: env::var(format!("{}_BASE_URL", prefix)).unwrap_or(defaults.base_url),
            ..defaults
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            resolution: ResolutionConfig::default(),
            dispute: DisputePolicy::default(),
            voters: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_optional_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let dispatch = match env::var("CONSENSUS_DISPATCH")
            .unwrap_or_else(|_| "sequential".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "sequential" => DispatchMode::Sequential,
            "parallel" => DispatchMode::Parallel,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "CONSENSUS_DISPATCH".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let tally = match env::var("CONSENSUS_TALLY")
            .unwrap_or_else(|_| "count".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "count" => TallyMode::Count,
            "confidence_weighted" => TallyMode::ConfidenceWeighted,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "CONSENSUS_TALLY".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let voters = env::var("VOTER_PRIORITY")
            .unwrap_or_else(|_| DEFAULT_VOTER_PRIORITY.to_string())
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                let provider = id
                    .parse::<LlmProvider>()
                    .map_err(|_| ConfigError::UnknownVoter(id.to_string()))?;
                VoterSettings::from_env(provider)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            consensus: ConsensusConfig {
                voter_timeout: Duration::from_secs(parse_env("VOTER_TIMEOUT_SECS", 30u64)?),
                overall_deadline: parse_optional_env::<u64>("CONSENSUS_DEADLINE_SECS")?
                    .map(Duration::from_secs),
                dispatch,
                tally,
            },

            resolution: ResolutionConfig {
                required_agreement: parse_env("CONSENSUS_REQUIRED_AGREEMENT", 0.8f64)?,
                insurance_threshold: parse_env("INSURANCE_CONFIDENCE_THRESHOLD", 80u8)?,
                attempt_lease: Duration::from_secs(parse_env("RESOLUTION_ATTEMPT_LEASE_SECS", 300u64)?),
            },

            dispute: DisputePolicy {
                voting_period: Duration::from_secs(
                    parse_env("DISPUTE_VOTING_PERIOD_HOURS", 24u64)? * 3600,
                ),
                min_quorum_weight: parse_env("DISPUTE_MIN_QUORUM_WEIGHT", Decimal::ZERO)?,
                early_close_weight: parse_optional_env("DISPUTE_EARLY_CLOSE_WEIGHT")?,
                dispute_window: Duration::from_secs(parse_env("DISPUTE_WINDOW_HOURS", 48u64)? * 3600),
                confidence_ceiling: parse_env("DISPUTE_CONFIDENCE_CEILING", 95u8)?,
            },

            voters,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agreement = self.resolution.required_agreement;
        if !(agreement > 0.0 && agreement <= 1.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "required agreement must be in (0, 1], got {}",
                agreement
            )));
        }

        if self.resolution.insurance_threshold > 100 {
            return Err(ConfigError::InvalidConfig(
                "insurance threshold must be 0-100".to_string(),
            ));
        }

        if self.dispute.confidence_ceiling > 100 {
            return Err(ConfigError::InvalidConfig(
                "dispute confidence ceiling must be 0-100".to_string(),
            ));
        }

        if self.resolution.attempt_lease.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "resolution attempt lease must be greater than 0".to_string(),
            ));
        }

        if self.consensus.voter_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "voter timeout must be greater than 0".to_string(),
            ));
        }

        if self.dispute.voting_period.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "dispute voting period must be greater than 0".to_string(),
            ));
        }

        if self.dispute.min_quorum_weight.is_sign_negative() {
            return Err(ConfigError::InvalidConfig(
                "dispute quorum weight cannot be negative".to_string(),
            ));
        }

        if let Some(early) = self.dispute.early_close_weight {
            if early <= Decimal::ZERO {
                return Err(ConfigError::InvalidConfig(
                    "early close weight must be positive".to_string(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for voter in &self.voters {
            if !seen.insert(voter.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "voter {} listed more than once",
                    voter.id
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Unknown voter in VOTER_PRIORITY: {0}")]
    UnknownVoter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Create example .env file
pub fn create_env_example() -> String {
    r#"# Logging
LOG_LEVEL=info

# Consensus
CONSENSUS_REQUIRED_AGREEMENT=0.8
CONSENSUS_DISPATCH=sequential
CONSENSUS_TALLY=count
VOTER_TIMEOUT_SECS=30
# CONSENSUS_DEADLINE_SECS=90

# Resolution
INSURANCE_CONFIDENCE_THRESHOLD=80
RESOLUTION_ATTEMPT_LEASE_SECS=300

# Disputes
DISPUTE_VOTING_PERIOD_HOURS=24
DISPUTE_MIN_QUORUM_WEIGHT=0
# DISPUTE_EARLY_CLOSE_WEIGHT=10000
DISPUTE_WINDOW_HOURS=48
DISPUTE_CONFIDENCE_CEILING=95

# Voters, highest priority first
VOTER_PRIORITY=groq,gemini,openai,anthropic,xai
GROQ_API_KEY=
GEMINI_API_KEY=
OPENAI_API_KEY=
ANTHROPIC_API_KEY=
XAI_API_KEY=
# OPENAI_MODEL=gpt-4o-mini
# ANTHROPIC_ENABLED=false
"#
    .to_string()
}
