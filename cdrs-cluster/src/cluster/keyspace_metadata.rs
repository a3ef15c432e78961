use derive_more::Constructor;
use fxhash::FxHashMap;
use tracing::*;

use crate::error::{Error, Result};

const REPLICATION_CLASS_KEY: &str = "class";
const REPLICATION_FACTOR_KEY: &str = "replication_factor";

/// A replication strategy determines the hosts where replicas are placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationStrategy {
    SimpleStrategy {
        replication_factor: usize,
    },
    NetworkTopologyStrategy {
        datacenter_replication_factor: FxHashMap<String, usize>,
    },
    Other,
}

impl ReplicationStrategy {
    /// Builds the strategy from a replication map, as found in `system_schema.keyspaces`.
    pub fn from_replication(replication: &FxHashMap<String, String>) -> Result<Self> {
        let class = replication
            .get(REPLICATION_CLASS_KEY)
            .ok_or_else(|| Error::General("Missing replication strategy class".into()))?;

        Self::from_class_and_options(class, replication)
    }

    /// Builds the strategy from the legacy `strategy_class` and JSON `strategy_options` columns of
    /// `system.schema_keyspaces`.
    pub fn from_legacy(strategy_class: &str, strategy_options: &str) -> Result<Self> {
        let options: FxHashMap<String, serde_json::Value> = serde_json::from_str(strategy_options)
            .map_err(|error| {
                Error::General(format!("Invalid replication strategy options: {error}"))
            })?;

        let options = options
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(value) => (key, value),
                value => (key, value.to_string()),
            })
            .collect();

        Self::from_class_and_options(strategy_class, &options)
    }

    fn from_class_and_options(class: &str, options: &FxHashMap<String, String>) -> Result<Self> {
        let parse_factor = |value: &str| {
            value.trim().parse::<usize>().map_err(|error| {
                Error::General(format!("Invalid replication factor \"{value}\": {error}"))
            })
        };

        match class.rsplit('.').next().unwrap_or(class) {
            "SimpleStrategy" => {
                let replication_factor = options
                    .get(REPLICATION_FACTOR_KEY)
                    .ok_or_else(|| Error::General("Missing replication factor".into()))
                    .and_then(|factor| parse_factor(factor.as_str()))?;

                Ok(ReplicationStrategy::SimpleStrategy { replication_factor })
            }
            "NetworkTopologyStrategy" => {
                let datacenter_replication_factor = options
                    .iter()
                    .filter(|(key, _)| key.as_str() != REPLICATION_CLASS_KEY)
                    .map(|(datacenter, factor)| {
                        Ok((datacenter.clone(), parse_factor(factor.as_str())?))
                    })
                    .collect::<Result<_>>()?;

                Ok(ReplicationStrategy::NetworkTopologyStrategy {
                    datacenter_replication_factor,
                })
            }
            other => {
                debug!(class = other, "Unknown replication strategy.");
                Ok(ReplicationStrategy::Other)
            }
        }
    }
}

/// Keyspace metadata.
#[derive(Clone, Debug, PartialEq, Eq, Constructor)]
pub struct KeyspaceMetadata {
    pub replication_strategy: ReplicationStrategy,
    pub tables: Vec<String>,
}
