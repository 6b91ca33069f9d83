//! Operator registry backed by configuration.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::config::StorageNodeConfig;
use crate::domain::{Operator, OperatorState};
use crate::error::{ConfigError, Result};
use crate::ports::OperatorRegistry;

/// Returns the same operator set for every reference block.
pub struct StaticOperatorRegistry {
    operators: Vec<Operator>,
}

impl StaticOperatorRegistry {
    pub fn new(operators: Vec<Operator>) -> Self {
        Self { operators }
    }

    pub fn from_config(config: &StorageNodeConfig) -> std::result::Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut operators = Vec::with_capacity(config.operators.len());
        for entry in &config.operators {
            let id = entry.operator_id()?;
            if !seen.insert(id) {
                return Err(ConfigError::InvalidOperator {
                    id: entry.id.clone(),
                    reason: "listed twice".into(),
                });
            }
            if entry.socket.trim().is_empty() {
                return Err(ConfigError::InvalidOperator {
                    id: entry.id.clone(),
                    reason: "socket must be specified".into(),
                });
            }
            operators.push(Operator {
                id,
                socket: entry.socket.clone(),
                public_key: entry.verifying_key()?,
                stakes: entry.stakes.iter().map(|s| (s.quorum, s.stake)).collect(),
            });
        }
        Ok(Self { operators })
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

#[async_trait]
impl OperatorRegistry for StaticOperatorRegistry {
    async fn operator_state(&self, block_number: u64) -> Result<OperatorState> {
        Ok(OperatorState::new(block_number, self.operators.clone()))
    }
}
