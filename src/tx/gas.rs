//! Gas price and gas limit selection

use crate::config::{FeeConfig, FeeStrategy};
use crate::error::RelayerResult;
use crate::ledger::LedgerClient;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Gas estimator for transactions
pub struct GasEstimator {
    config: FeeConfig,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Gas price for the next envelope.
    ///
    /// Fixed strategy uses the configured price as-is. Estimated strategy adds
    /// the buffer to the ledger's suggestion and caps it at `max_gas_price`.
    pub async fn get_gas_price(&self, ledger: &dyn LedgerClient) -> RelayerResult<GasPrice> {
        let price = match self.config.strategy {
            FeeStrategy::Fixed => self.config.gas_price(),
            FeeStrategy::Estimated => {
                let suggested = ledger.fee_price().await?;
                let buffer = suggested * self.config.gas_price_buffer_percent / 100;
                std::cmp::min(suggested + buffer, self.config.max_gas_price())
            }
        };

        let gas_price = match self.config.max_priority_fee() {
            Some(priority) => GasPrice::Eip1559 {
                max_fee_per_gas: price,
                max_priority_fee_per_gas: std::cmp::min(priority, price),
            },
            None => GasPrice::Legacy(price),
        };

        debug!("Gas price: {:?}", gas_price);
        Ok(gas_price)
    }

    /// Gas limit for `tx`: an explicit limit is only capped at the ceiling,
    /// otherwise the ledger estimate plus margin is used
    pub async fn get_gas_limit(
        &self,
        ledger: &dyn LedgerClient,
        tx: &TypedTransaction,
        explicit: Option<U256>,
    ) -> RelayerResult<U256> {
        let ceiling = self.config.gas_limit();

        if let Some(limit) = explicit {
            return Ok(std::cmp::min(limit, ceiling));
        }

        let estimated = ledger.estimate_resource_limit(tx).await?;
        let limit = std::cmp::min(
            estimated.saturating_add(self.config.gas_limit_margin()),
            ceiling,
        );
        debug!("Gas limit: estimated {} -> {}", estimated, limit);
        Ok(limit)
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => gas_limit * *max_fee_per_gas,
        }
    }
}
