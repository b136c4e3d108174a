// STATE EXPORT
// Composite-keyed snapshot of every table the bridge owns.
//
// SAFETY INVARIANTS:
// 1. Composite keys serialize as "<chain>:<id>" in both JSON and bincode
// 2. export -> import -> export is byte-identical
// 3. Import never registers adapters; every exported protocol must already be
//    registered with the same kind on the target system

use log::info;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use omniguard_core::{AccountId, ChainId, CoreError, ProtocolId, TransferId};
use omniguard_oracle::{BreakerStatus, ChainSupplyRecord};
use omniguard_router::{
    ChainRoute, FeeParameters, MultiLegTransaction, ProtocolDescriptor, ProtocolKind, ReplayEntry,
    TransferRecord,
};

use crate::error::SystemError;
use crate::system::BridgeSystem;

const EXPORT_VERSION: u32 = 1;

/// (chain, id) pair rendered as `"<chain>:<id>"`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey<K> {
    pub chain: ChainId,
    pub id: K,
}

impl<K> CompositeKey<K> {
    pub fn new(chain: ChainId, id: K) -> Self {
        CompositeKey { chain, id }
    }
}

impl<K: fmt::Display> fmt::Display for CompositeKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.id)
    }
}

impl<K> FromStr for CompositeKey<K>
where
    K: FromStr<Err = CoreError>,
{
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain, id) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidIdentifier(format!("composite key {:?}", s)))?;
        Ok(CompositeKey {
            chain: chain.parse()?,
            id: id.parse()?,
        })
    }
}

impl<K: fmt::Display> Serialize for CompositeKey<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, K> Deserialize<'de> for CompositeKey<K>
where
    K: FromStr<Err = CoreError>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

pub type TransferKey = CompositeKey<TransferId>;
pub type RouteKey = CompositeKey<ProtocolId>;

/// Protocol descriptor minus its routes (exported separately by route key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEntry {
    pub kind: ProtocolKind,
    pub enabled: bool,
    pub security_level: u8,
    pub fee_parameters: FeeParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateExport {
    pub version: u32,
    pub breaker: BreakerStatus,
    pub trip_count: u64,
    pub supply_records: BTreeMap<ChainId, ChainSupplyRecord>,
    pub protocols: BTreeMap<ProtocolId, ProtocolEntry>,
    pub routes: BTreeMap<RouteKey, ChainRoute>,
    pub transfers: BTreeMap<TransferKey, TransferRecord>,
    /// Hex transfer id -> replay entry
    pub replay: BTreeMap<String, ReplayEntry>,
    pub sender_nonces: BTreeMap<AccountId, u64>,
    pub multi_leg: Vec<MultiLegTransaction>,
}

impl StateExport {
    pub fn to_json(&self) -> Result<String, SystemError> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::Serialization(e.to_string()).into())
    }

    pub fn from_json(json: &str) -> Result<Self, SystemError> {
        let export: StateExport =
            serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))?;
        export.check_version()?;
        Ok(export)
    }

    pub fn to_bincode(&self) -> Result<Vec<u8>, SystemError> {
        bincode::serialize(self).map_err(|e| CoreError::Serialization(e.to_string()).into())
    }

    pub fn from_bincode(bytes: &[u8]) -> Result<Self, SystemError> {
        let export: StateExport =
            bincode::deserialize(bytes).map_err(|e| CoreError::Serialization(e.to_string()))?;
        export.check_version()?;
        Ok(export)
    }

    fn check_version(&self) -> Result<(), SystemError> {
        if self.version != EXPORT_VERSION {
            return Err(SystemError::Import(format!(
                "unsupported export version {}",
                self.version
            )));
        }
        Ok(())
    }

    /// Reassemble full descriptors from protocol entries and their routes
    fn descriptors(&self) -> Vec<ProtocolDescriptor> {
        self.protocols
            .iter()
            .map(|(id, entry)| ProtocolDescriptor {
                protocol_id: id.clone(),
                kind: entry.kind,
                enabled: entry.enabled,
                security_level: entry.security_level,
                supported_chains: self
                    .routes
                    .iter()
                    .filter(|(key, _)| &key.id == id)
                    .map(|(key, route)| (key.chain, route.clone()))
                    .collect(),
                fee_parameters: entry.fee_parameters,
            })
            .collect()
    }
}

impl BridgeSystem {
    pub fn export_state(&self) -> StateExport {
        let mut protocols = BTreeMap::new();
        let mut routes = BTreeMap::new();
        for descriptor in self.registry().descriptors() {
            for (chain, route) in &descriptor.supported_chains {
                routes.insert(
                    CompositeKey::new(*chain, descriptor.protocol_id.clone()),
                    route.clone(),
                );
            }
            protocols.insert(
                descriptor.protocol_id.clone(),
                ProtocolEntry {
                    kind: descriptor.kind,
                    enabled: descriptor.enabled,
                    security_level: descriptor.security_level,
                    fee_parameters: descriptor.fee_parameters,
                },
            );
        }

        StateExport {
            version: EXPORT_VERSION,
            breaker: self.breaker().status(),
            trip_count: self.breaker().trip_count(),
            supply_records: self
                .oracle()
                .records()
                .into_iter()
                .map(|r| (r.chain_id, r))
                .collect(),
            protocols,
            routes,
            transfers: self
                .orchestrator()
                .transfers()
                .into_iter()
                .map(|r| (CompositeKey::new(r.key_chain(), r.transfer_id), r))
                .collect(),
            replay: self
                .orchestrator()
                .replay_guard()
                .entries()
                .into_iter()
                .map(|(id, entry)| (id.as_hex(), entry))
                .collect(),
            sender_nonces: self.orchestrator().sender_nonces(),
            multi_leg: self.two_phase().transactions(),
        }
    }

    /// Replace this system's tables with an export.
    ///
    /// Everything is validated before anything is written.
    pub fn import_state(&self, export: &StateExport) -> Result<(), SystemError> {
        export.check_version()?;

        for (key, record) in &export.transfers {
            if key.id != record.transfer_id || key.chain != record.key_chain() {
                return Err(SystemError::Import(format!(
                    "transfer key {} does not match its record",
                    key
                )));
            }
        }
        for (chain, record) in &export.supply_records {
            if *chain != record.chain_id || record.locked_supply > record.total_supply {
                return Err(SystemError::Import(format!("invalid supply record for chain {}", chain)));
            }
        }
        let mut replay = BTreeMap::new();
        for (hex_id, entry) in &export.replay {
            replay.insert(hex_id.parse::<TransferId>()?, entry.clone());
        }
        let descriptors = export.descriptors();
        for descriptor in &descriptors {
            let registered = self
                .registry()
                .descriptor(&descriptor.protocol_id)
                .ok_or_else(|| {
                    SystemError::Import(format!(
                        "protocol {} has no registered adapter",
                        descriptor.protocol_id
                    ))
                })?;
            if registered.kind != descriptor.kind {
                return Err(SystemError::Import(format!(
                    "protocol {} is {} here but {} in the export",
                    descriptor.protocol_id, registered.kind, descriptor.kind
                )));
            }
        }

        for descriptor in descriptors {
            self.registry().restore_descriptor(descriptor)?;
        }
        self.oracle()
            .restore_records(export.supply_records.values().cloned().collect());
        self.orchestrator().restore(
            export.transfers.values().cloned().collect(),
            export.sender_nonces.clone(),
        );
        self.orchestrator().replay_guard().restore(replay);
        self.two_phase().restore(export.multi_leg.clone());
        self.breaker()
            .restore(export.breaker.clone(), export.trip_count);

        info!(
            "Imported state: {} supply records, {} protocols, {} transfers",
            export.supply_records.len(),
            export.protocols.len(),
            export.transfers.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key_renders_chain_then_id() {
        let key = RouteKey::new(ChainId(56), ProtocolId::new("layerzero"));
        assert_eq!(key.to_string(), "56:layerzero");
        assert_eq!("56:layerzero".parse::<RouteKey>().unwrap(), key);
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"56:layerzero\"");
    }

    #[test]
    fn test_composite_key_rejects_garbage() {
        assert!("layerzero".parse::<RouteKey>().is_err());
        assert!("x:layerzero".parse::<RouteKey>().is_err());
        assert!("1:nothex".parse::<TransferKey>().is_err());
    }

    #[test]
    fn test_composite_keys_work_as_json_map_keys() {
        let mut map = BTreeMap::new();
        map.insert(TransferKey::new(ChainId(1), TransferId([7; 32])), 5u8);
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.starts_with("{\"1:0707"));

        let back: BTreeMap<TransferKey, u8> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
