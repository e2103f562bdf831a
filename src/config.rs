use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{EntryCategory, Tier};

/// Engine configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Matrix branching factor W.
    pub matrix_width: u32,
    /// Absolute depth cap; nodes at this depth accept no children.
    pub matrix_depth: u32,
    /// Categories whose fresh appends trigger the commission calculator.
    pub commissionable_categories: Vec<EntryCategory>,
    /// Seed rule set, applied at startup only when the rules table is empty.
    pub commission_rule_seeds: Vec<RuleSeed>,
    /// Periodic reconciliation sweep interval; 0 disables the sweep.
    pub reconcile_interval_ms: i64,
}

/// One seeded commission level: `level:rate_bps[:min_tier]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSeed {
    pub level: u32,
    pub rate_bps: i64,
    pub min_tier: Tier,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

const DEFAULT_COMMISSION_RULES: &str = "1:1000,2:500,3:250";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let matrix_width = parse_positive_u32(&env_map, "MATRIX_WIDTH", 3)?;
        let matrix_depth = parse_positive_u32(&env_map, "MATRIX_DEPTH", 12)?;

        let commissionable_categories = match env_map.get("COMMISSIONABLE_CATEGORIES") {
            None => vec![EntryCategory::PurchaseDebit],
            Some(raw) => {
                let mut cats = Vec::new();
                for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let cat = EntryCategory::parse(part).ok_or_else(|| {
                        ConfigError::InvalidValue(
                            "COMMISSIONABLE_CATEGORIES".to_string(),
                            format!("unknown category {}", part),
                        )
                    })?;
                    if cat == EntryCategory::Commission || cat == EntryCategory::Reversal {
                        return Err(ConfigError::InvalidValue(
                            "COMMISSIONABLE_CATEGORIES".to_string(),
                            format!("{} cannot itself trigger commissions", part),
                        ));
                    }
                    cats.push(cat);
                }
                cats
            }
        };

        let commission_rule_seeds = parse_rule_seeds_from_map(&env_map)?;

        let reconcile_interval_ms = env_map
            .get("RECONCILE_INTERVAL_MS")
            .map(|s| s.as_str())
            .unwrap_or("0")
            .parse::<i64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "RECONCILE_INTERVAL_MS".to_string(),
                    "must be a valid i64".to_string(),
                )
            })?;

        Ok(Config {
            port,
            database_path,
            matrix_width,
            matrix_depth,
            commissionable_categories,
            commission_rule_seeds,
            reconcile_interval_ms,
        })
    }

    pub fn is_commissionable(&self, category: EntryCategory) -> bool {
        self.commissionable_categories.contains(&category)
    }
}

fn parse_positive_u32(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    let value = match env_map.get(key) {
        None => return Ok(default),
        Some(s) => s
            .parse::<u32>()
            .map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "must be a valid u32".to_string())
            })?,
    };
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be >= 1".to_string(),
        ));
    }
    Ok(value)
}

fn parse_rule_seeds_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<RuleSeed>, ConfigError> {
    let raw = if let Some(rules_str) = env_map.get("COMMISSION_RULES") {
        rules_str.clone()
    } else if let Some(file_path) = env_map.get("COMMISSION_RULES_FILE") {
        std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "COMMISSION_RULES_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?
    } else {
        DEFAULT_COMMISSION_RULES.to_string()
    };

    let mut seeds = Vec::new();
    for part in raw
        .split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        seeds.push(parse_rule_seed(part)?);
    }

    let mut levels: Vec<u32> = seeds.iter().map(|s| s.level).collect();
    levels.sort_unstable();
    levels.dedup();
    if levels.len() != seeds.len() {
        return Err(ConfigError::InvalidValue(
            "COMMISSION_RULES".to_string(),
            "duplicate level".to_string(),
        ));
    }

    Ok(seeds)
}

fn parse_rule_seed(part: &str) -> Result<RuleSeed, ConfigError> {
    let invalid = |msg: &str| {
        ConfigError::InvalidValue(
            "COMMISSION_RULES".to_string(),
            format!("{} in {:?}", msg, part),
        )
    };

    let mut fields = part.split(':');
    let level = fields
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|l| *l >= 1)
        .ok_or_else(|| invalid("level must be a positive integer"))?;
    let rate_bps = fields
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|b| *b > 0)
        .ok_or_else(|| invalid("rate_bps must be a positive integer"))?;
    let min_tier = match fields.next() {
        None => Tier::None,
        Some(t) => Tier::parse(t).ok_or_else(|| invalid("unknown tier"))?,
    };
    if fields.next().is_some() {
        return Err(invalid("too many fields"));
    }

    Ok(RuleSeed {
        level,
        rate_bps,
        min_tier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_missing_database_path() {
        let result = Config::from_env_map(HashMap::new());
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.matrix_width, 3);
        assert_eq!(config.matrix_depth, 12);
        assert_eq!(
            config.commissionable_categories,
            vec![EntryCategory::PurchaseDebit]
        );
        assert_eq!(config.commission_rule_seeds.len(), 3);
        assert_eq!(config.commission_rule_seeds[0].rate_bps, 1000);
        assert_eq!(config.reconcile_interval_ms, 0);
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_matrix_width_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("MATRIX_WIDTH".to_string(), "0".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "MATRIX_WIDTH"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_commissionable_categories_parsing() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "COMMISSIONABLE_CATEGORIES".to_string(),
            "purchase_debit, deposit".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert!(config.is_commissionable(EntryCategory::PurchaseDebit));
        assert!(config.is_commissionable(EntryCategory::Deposit));
        assert!(!config.is_commissionable(EntryCategory::Withdrawal));
    }

    #[test]
    fn test_commission_cannot_trigger_itself() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "COMMISSIONABLE_CATEGORIES".to_string(),
            "commission".to_string(),
        );
        assert!(Config::from_env_map(env_map).is_err());
    }

    #[test]
    fn test_rule_seed_parsing() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "COMMISSION_RULES".to_string(),
            "1:1000:none, 2:500:basic, 3:250:premium".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(
            config.commission_rule_seeds[1],
            RuleSeed {
                level: 2,
                rate_bps: 500,
                min_tier: Tier::Basic,
            }
        );
    }

    #[test]
    fn test_duplicate_rule_level_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("COMMISSION_RULES".to_string(), "1:1000,1:500".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "COMMISSION_RULES"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_malformed_rule_seed_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("COMMISSION_RULES".to_string(), "1:0".to_string());
        assert!(Config::from_env_map(env_map).is_err());

        let mut env_map = setup_required_env();
        env_map.insert("COMMISSION_RULES".to_string(), "1:100:gold".to_string());
        assert!(Config::from_env_map(env_map).is_err());
    }
}
