//! Runtime configuration: env overrides on top of the deployed defaults.

use std::path::{Path, PathBuf};

use alloy_primitives::{Address, U256};
use anyhow::Context;
use tracing::info;

use crate::genesis::{Genesis, ONE_TOKEN};
use crate::token::TaxPolicy;
use crate::AddressBook;

// ─────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deployer; also the treasury.
    pub owner: Address,
    pub tax: TaxPolicy,
    pub swap_tax_enabled: bool,
    pub swap_tax_threshold: U256,
    /// Per-roll fee, split 50/50 between treasury and board.
    pub roll_fee: U256,
    /// Fixed seed for reproducible rolls; entropy when unset.
    pub rng_seed: Option<u64>,
    /// JSON genesis to load instead of the built-in catalog.
    pub genesis_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            owner: Address::repeat_byte(0x01),
            tax: TaxPolicy::default(),
            swap_tax_enabled: false,
            swap_tax_threshold: U256::ZERO,
            roll_fee: U256::from(50u64) * ONE_TOKEN,
            rng_seed: None,
            genesis_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("DEGEN_OWNER")              { if let Ok(a) = v.parse() { c.owner = a; } }
        if let Ok(v) = std::env::var("DEGEN_BUY_TAX_BPS")        { if let Ok(b) = v.parse() { c.tax.buy_tax_bps = b; } }
        if let Ok(v) = std::env::var("DEGEN_SELL_TAX_BPS")       { if let Ok(b) = v.parse() { c.tax.sell_tax_bps = b; } }
        if let Ok(v) = std::env::var("DEGEN_SWAP_TAX_THRESHOLD") { if let Some(t) = parse_tokens(&v) { c.swap_tax_threshold = t; } }
        if let Ok(v) = std::env::var("DEGEN_ROLL_FEE")           { if let Some(f) = parse_tokens(&v) { c.roll_fee = f; } }
        if let Ok(v) = std::env::var("DEGEN_RNG_SEED")           { if let Ok(s) = v.parse() { c.rng_seed = Some(s); } }
        if let Ok(v) = std::env::var("DEGEN_SWAP_TAX_ENABLED") { c.swap_tax_enabled = v != "0" && v.to_lowercase() != "false"; }
        if let Ok(v) = std::env::var("DEGEN_GENESIS_PATH") { c.genesis_path = Some(PathBuf::from(v)); }
        c
    }

    pub fn address_book(&self) -> AddressBook {
        AddressBook::deterministic(self.owner)
    }

    /// The configured genesis file, or the built-in catalog.
    pub fn load_genesis(&self) -> anyhow::Result<Genesis> {
        match &self.genesis_path {
            Some(path) => load_genesis(path),
            None => Ok(Genesis::degenopoly()),
        }
    }
}

pub fn load_genesis(path: &Path) -> anyhow::Result<Genesis> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading genesis file {}", path.display()))?;
    let genesis: Genesis = serde_json::from_str(&raw)
        .with_context(|| format!("parsing genesis file {}", path.display()))?;
    info!(
        "📜 Genesis loaded from {} | nodes={} families={} cases={}",
        path.display(),
        genesis.nodes.len(),
        genesis.families.len(),
        genesis.cases.len()
    );
    Ok(genesis)
}

/// Whole or decimal token amount ("50", "12.5") in 18-decimal units.
pub fn parse_tokens(s: &str) -> Option<U256> {
    alloy_primitives::utils::parse_ether(s.trim()).ok()
}

// ─────────────────────────────────────────────────────────
// Simulation
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub players: usize,
    pub days: u64,
    pub rolls_per_day: u64,
    /// Tokens each player starts with.
    pub starting_tokens: U256,
    /// Tokens and base seeded into the pool at launch.
    pub pool_tokens: U256,
    pub pool_base: U256,
    /// Directory for the daily rolling log file; stdout only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            players: 4,
            days: 7,
            rolls_per_day: 3,
            starting_tokens: U256::from(2_000u64) * ONE_TOKEN,
            pool_tokens: U256::from(1_000_000u64) * ONE_TOKEN,
            pool_base: U256::from(100u64) * ONE_TOKEN,
            log_dir: None,
        }
    }
}

impl SimConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("DEGEN_SIM_PLAYERS")         { if let Ok(n) = v.parse() { c.players = n; } }
        if let Ok(v) = std::env::var("DEGEN_SIM_DAYS")            { if let Ok(n) = v.parse() { c.days = n; } }
        if let Ok(v) = std::env::var("DEGEN_SIM_ROLLS_PER_DAY")   { if let Ok(n) = v.parse() { c.rolls_per_day = n; } }
        if let Ok(v) = std::env::var("DEGEN_SIM_STARTING_TOKENS") { if let Some(t) = parse_tokens(&v) { c.starting_tokens = t; } }
        if let Ok(v) = std::env::var("DEGEN_LOG_DIR") { c.log_dir = Some(PathBuf::from(v)); }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let c = EngineConfig::default();
        assert_eq!(c.tax.buy_tax_bps, 500);
        assert_eq!(c.tax.sell_tax_bps, 2000);
        assert_eq!(c.roll_fee, parse_tokens("50").unwrap());
        assert!(!c.swap_tax_enabled);
        assert_eq!(c.address_book().treasury, c.owner);
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(parse_tokens(" 12.5 "), Some(U256::from(125u64) * ONE_TOKEN / U256::from(10u64)));
        assert_eq!(parse_tokens("abc"), None);
    }

    #[test]
    fn test_load_genesis_from_file() {
        let path = std::env::temp_dir().join(format!("degenopoly-genesis-{}.json", std::process::id()));
        let genesis = Genesis::degenopoly();
        std::fs::write(&path, serde_json::to_string_pretty(&genesis).unwrap()).unwrap();

        let config = EngineConfig {
            genesis_path: Some(path.clone()),
            ..EngineConfig::default()
        };
        assert_eq!(config.load_genesis().unwrap(), genesis);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_genesis_file_has_context() {
        let err = load_genesis(Path::new("/nonexistent/genesis.json")).unwrap_err();
        assert!(format!("{err:#}").contains("reading genesis file"));
    }
}
