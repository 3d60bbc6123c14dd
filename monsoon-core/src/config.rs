//! Bridge configuration.

use anyhow::{Context, Result};
use std::env;

use crate::SESSION_TTL_SECS;

/// Bridge configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// RPC endpoint for the local chain.
    pub local_rpc_url: String,
    /// RPC endpoint for the remote chain.
    pub remote_rpc_url: String,
    /// Bridge contract address on the local chain.
    pub local_bridge_address: String,
    /// Bridge contract address on the remote chain.
    pub remote_bridge_address: String,
    /// Commitment tree depth, shared by both chains.
    pub tree_levels: u32,
    /// Deposit session lifetime in seconds.
    pub session_ttl_secs: u64,
    /// Session store path; in-memory when unset.
    pub session_db_path: Option<String>,
    /// Redemption store path; in-memory when unset.
    pub redemption_db_path: Option<String>,
    /// Operator payout key, 32 bytes of hex.
    pub operator_key: String,
}

impl BridgeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let local_rpc_url =
            env::var("MONSOON_LOCAL_RPC_URL").context("MONSOON_LOCAL_RPC_URL must be set")?;
        let remote_rpc_url =
            env::var("MONSOON_REMOTE_RPC_URL").context("MONSOON_REMOTE_RPC_URL must be set")?;
        let local_bridge_address = env::var("MONSOON_LOCAL_BRIDGE_ADDRESS")
            .context("MONSOON_LOCAL_BRIDGE_ADDRESS must be set")?;
        let remote_bridge_address = env::var("MONSOON_REMOTE_BRIDGE_ADDRESS")
            .context("MONSOON_REMOTE_BRIDGE_ADDRESS must be set")?;
        let operator_key =
            env::var("MONSOON_OPERATOR_KEY").context("MONSOON_OPERATOR_KEY must be set")?;

        let tree_levels: u32 = env::var("MONSOON_TREE_LEVELS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        let session_ttl_secs: u64 = env::var("MONSOON_SESSION_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(SESSION_TTL_SECS);

        let session_db_path = env::var("MONSOON_SESSION_DB").ok();
        let redemption_db_path = env::var("MONSOON_REDEMPTION_DB").ok();

        Ok(Self {
            local_rpc_url,
            remote_rpc_url,
            local_bridge_address,
            remote_bridge_address,
            tree_levels,
            session_ttl_secs,
            session_db_path,
            redemption_db_path,
            operator_key,
        })
    }
}
