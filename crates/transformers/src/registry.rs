//! Static name → factory registry for the transformers compiled into the binary.
use std::{collections::BTreeMap, sync::Arc};

use derive_more::Debug;
use extractor::ChainSource;
use eyre::{Result, bail};
use store::HeaderStore;

use crate::{
    converter::{ApprovalConverter, TransferConverter},
    transformer::{EventTransformer, LogTransformer, TransformerConfig},
};

/// Registry name of the ERC-20 `Transfer` transformer.
pub const ERC20_TRANSFER: &str = "erc20_transfer";
/// Registry name of the ERC-20 `Approval` transformer.
pub const ERC20_APPROVAL: &str = "erc20_approval";

/// Shared handles passed to every factory.
#[derive(Debug, Clone)]
pub struct TransformerContext {
    /// Persistent store
    #[debug(skip)]
    pub store: Arc<dyn HeaderStore>,
    /// Chain source
    #[debug(skip)]
    pub chain: Arc<dyn ChainSource>,
}

/// Builds one transformer from its configuration.
pub type TransformerFactory =
    fn(&TransformerConfig, &TransformerContext) -> Result<Arc<dyn EventTransformer>>;

fn erc20_transfer(
    config: &TransformerConfig,
    ctx: &TransformerContext,
) -> Result<Arc<dyn EventTransformer>> {
    let transformer = LogTransformer::new(
        config,
        TransferConverter,
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.chain),
    )?;
    Ok(Arc::new(transformer))
}

fn erc20_approval(
    config: &TransformerConfig,
    ctx: &TransformerContext,
) -> Result<Arc<dyn EventTransformer>> {
    let transformer = LogTransformer::new(
        config,
        ApprovalConverter,
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.chain),
    )?;
    Ok(Arc::new(transformer))
}

/// Maps transformer names to their factories.
#[derive(Debug, Default)]
pub struct TransformerRegistry {
    #[debug(skip)]
    factories: BTreeMap<&'static str, TransformerFactory>,
}

impl TransformerRegistry {
    /// Registry with every built-in transformer.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(ERC20_TRANSFER, erc20_transfer);
        registry.register(ERC20_APPROVAL, erc20_approval);
        registry
    }

    /// Add or replace a factory.
    pub fn register(&mut self, name: &'static str, factory: TransformerFactory) {
        self.factories.insert(name, factory);
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Instantiate the configured transformers, failing on unknown or
    /// duplicated names.
    pub fn build(
        &self,
        configs: &[TransformerConfig],
        ctx: &TransformerContext,
    ) -> Result<Vec<Arc<dyn EventTransformer>>> {
        let mut built: Vec<Arc<dyn EventTransformer>> = Vec::with_capacity(configs.len());
        for config in configs {
            let Some(factory) = self.factories.get(config.name.as_str()) else {
                bail!(
                    "unknown transformer {:?}, available: {}",
                    config.name,
                    self.names().collect::<Vec<_>>().join(", ")
                );
            };
            if built.iter().any(|t| t.kind().name() == config.name) {
                bail!("transformer {:?} configured twice", config.name);
            }
            built.push(factory(config, ctx)?);
        }
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{Address, B256, BlockNumber},
        rpc::types::Log,
    };
    use async_trait::async_trait;
    use primitives::payload::Payload;
    use store::MemoryStore;

    use super::*;
    use derive_more::Debug;

    #[derive(Debug)]
    struct NoChain;

    #[async_trait]
    impl ChainSource for NoChain {
        async fn latest_block_number(&self) -> Result<BlockNumber> {
            bail!("unused")
        }

        async fn payload_at(&self, _height: BlockNumber) -> Result<Payload> {
            bail!("unused")
        }

        async fn logs_at(&self, _: Address, _: B256, _: BlockNumber) -> Result<Vec<Log>> {
            bail!("unused")
        }
    }

    fn ctx() -> TransformerContext {
        TransformerContext { store: Arc::new(MemoryStore::new()), chain: Arc::new(NoChain) }
    }

    fn config(name: &str) -> TransformerConfig {
        TransformerConfig {
            name: name.to_owned(),
            contract_address: Address::ZERO,
            starting_block: 0,
            ending_block: None,
        }
    }

    #[test]
    fn builds_configured_subset() {
        let registry = TransformerRegistry::with_defaults();
        let built = registry.build(&[config(ERC20_APPROVAL)], &ctx()).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].kind().table().name, "erc20_approvals");
    }

    #[test]
    fn rejects_unknown_and_duplicate_names() {
        let registry = TransformerRegistry::with_defaults();
        let err = registry.build(&[config("erc721_transfer")], &ctx()).unwrap_err();
        assert!(err.to_string().contains("erc20_approval, erc20_transfer"));

        assert!(
            registry.build(&[config(ERC20_TRANSFER), config(ERC20_TRANSFER)], &ctx()).is_err()
        );
    }
}
