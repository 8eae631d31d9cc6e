use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::num::Coin;
use crate::types::{Address, IdentityState};

/// Consensus constants. Every field is part of the deterministic state
/// transition; changing any of them forks the chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConf {
    pub block_reward: Coin,
    pub final_committee_reward: Coin,
    /// Share of a reward locked as stake, in percent.
    pub stake_reward_rate_percent: u32,
    pub stake_reward_rate_newbie_percent: u32,
    /// Share of collected fees destroyed each block, in percent.
    pub fee_burn_rate_percent: u32,
    pub staking_reward_percent: f32,
    pub candidate_reward_percent: f32,
    pub flip_reward_percent: f32,
    pub reports_reward_percent: f32,
    pub valid_invitation_reward_percent: f32,
    pub foundation_payouts_percent: f32,
    pub zero_wallet_percent: f32,
    pub first_invitation_reward_coef: f32,
    pub second_invitation_reward_coef: f32,
    pub third_invitation_reward_coef: f32,
    pub enable_upgrade10: bool,
    /// Pending online/offline switches apply at heights divisible by this.
    pub status_switch_range: u64,
    pub offline_penalty_duration_secs: u64,
    pub invites_percent: f32,
    pub min_shard_size: u32,
    pub max_shard_size: u32,
}

impl Default for ConsensusConf {
    fn default() -> Self {
        Self {
            block_reward: Coin::from_dna(1),
            final_committee_reward: Coin::from_dna(5),
            stake_reward_rate_percent: 20,
            stake_reward_rate_newbie_percent: 80,
            fee_burn_rate_percent: 90,
            staking_reward_percent: 0.18,
            candidate_reward_percent: 0.02,
            flip_reward_percent: 0.35,
            reports_reward_percent: 0.15,
            valid_invitation_reward_percent: 0.18,
            foundation_payouts_percent: 0.10,
            zero_wallet_percent: 0.02,
            first_invitation_reward_coef: 0.5,
            second_invitation_reward_coef: 0.3,
            third_invitation_reward_coef: 0.2,
            enable_upgrade10: true,
            status_switch_range: 10,
            offline_penalty_duration_secs: 3_600,
            invites_percent: 0.5,
            min_shard_size: 300,
            max_shard_size: 1_200,
        }
    }
}

impl ConsensusConf {
    /// Epoch-limited invite quota of the bootstrap identity.
    pub fn god_address_invites_count(&self, network_size: usize) -> u16 {
        ((network_size / 3) as u16).clamp(10, 500)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub consensus: ConsensusConf,
    pub genesis: GenesisConfig,
}

impl NodeConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| ChainError::Config(format!("unable to parse config: {err}")))
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ChainError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> ChainResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            consensus: ConsensusConf::default(),
            genesis: GenesisConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: String,
    pub god_address: String,
    pub first_ceremony_time: i64,
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            chain_id: "dna-local".to_string(),
            god_address: Address::default().to_string(),
            first_ceremony_time: 0,
            accounts: Vec::new(),
        }
    }
}

impl GenesisConfig {
    pub fn god_address_value(&self) -> ChainResult<Address> {
        self.god_address
            .parse()
            .map_err(|_| ChainError::Config("invalid genesis god address".to_string()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: String,
    #[serde(default)]
    pub balance: Option<String>,
    #[serde(default)]
    pub stake: Option<String>,
    #[serde(default)]
    pub state: Option<IdentityState>,
}

impl GenesisAccount {
    pub fn address_value(&self) -> ChainResult<Address> {
        self.address
            .parse()
            .map_err(|_| ChainError::Config("invalid genesis address".to_string()))
    }

    pub fn balance_value(&self) -> ChainResult<Coin> {
        parse_amount(self.balance.as_deref())
    }

    pub fn stake_value(&self) -> ChainResult<Coin> {
        parse_amount(self.stake.as_deref())
    }
}

fn parse_amount(value: Option<&str>) -> ChainResult<Coin> {
    match value {
        None => Ok(Coin::zero()),
        Some(text) => Coin::from_dna_str(text)
            .ok_or_else(|| ChainError::Config(format!("invalid genesis amount: {text}"))),
    }
}
