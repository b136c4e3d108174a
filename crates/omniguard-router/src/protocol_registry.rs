// PROTOCOL REGISTRY
// Catalog of transport adapters, their per-chain routes, fee parameters and security rating.
//
// SAFETY INVARIANTS:
// 1. Every mutation is Admin-gated
// 2. Disabling a protocol blocks new route selection only; pending transfers resolve normally
// 3. Fee or chain changes invalidate that protocol's cached quotes
// 4. Adapters are never called while the registry lock is held

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use omniguard_core::{
    AccessControl, AccountId, BridgeEvent, ChainId, Clock, EventSink, ProtocolId, Role,
};

use crate::adapter::{BridgeModule, ProtocolKind};
use crate::error::RouterError;
use crate::fee_cache::FeeQuoteCache;
use crate::route_selector::RouteCandidate;

const BPS_DENOMINATOR: u128 = 10_000;

/// Fee charged on top of the adapter's own estimate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParameters {
    pub flat_fee: u128,
    /// Proportional markup on the adapter estimate, in basis points
    pub markup_bps: u32,
}

impl FeeParameters {
    /// estimate + flat_fee + estimate * markup_bps / 10_000
    pub fn apply(&self, estimate: u128) -> Result<u128, RouterError> {
        let markup = estimate
            .checked_mul(u128::from(self.markup_bps))
            .map(|m| m / BPS_DENOMINATOR);
        markup
            .and_then(|m| estimate.checked_add(m))
            .and_then(|fee| fee.checked_add(self.flat_fee))
            .ok_or_else(|| RouterError::InvalidFeeParameters("fee overflow".to_string()))
    }
}

/// Remote endpoint inbound deliveries from a chain must come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRoute {
    pub trusted_peer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    pub protocol_id: ProtocolId,
    pub kind: ProtocolKind,
    pub enabled: bool,
    /// Higher is more secure
    pub security_level: u8,
    pub supported_chains: BTreeMap<ChainId, ChainRoute>,
    pub fee_parameters: FeeParameters,
}

impl ProtocolDescriptor {
    pub fn supports(&self, chain: ChainId) -> bool {
        self.supported_chains.contains_key(&chain)
    }
}

/// One row of `get_bridge_options`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeOption {
    pub protocol_id: ProtocolId,
    pub kind: ProtocolKind,
    pub security_level: u8,
    pub fee: Option<u128>,
    pub estimated_time_secs: Option<u64>,
    pub available: bool,
    pub unavailable_reason: Option<String>,
}

impl BridgeOption {
    pub fn candidate(&self) -> Option<RouteCandidate> {
        match (self.available, self.fee, self.estimated_time_secs) {
            (true, Some(fee), Some(estimated_time_secs)) => Some(RouteCandidate {
                protocol_id: self.protocol_id.clone(),
                fee,
                estimated_time_secs,
                security_level: self.security_level,
            }),
            _ => None,
        }
    }
}

struct RegisteredProtocol {
    descriptor: ProtocolDescriptor,
    adapter: Arc<dyn BridgeModule>,
}

pub struct ProtocolRegistry {
    protocols: RwLock<BTreeMap<ProtocolId, RegisteredProtocol>>,
    fee_cache: FeeQuoteCache,
    access: Arc<AccessControl>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl ProtocolRegistry {
    pub fn new(
        fee_cache: FeeQuoteCache,
        access: Arc<AccessControl>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ProtocolRegistry {
            protocols: RwLock::new(BTreeMap::new()),
            fee_cache,
            access,
            events,
            clock,
        }
    }

    pub fn fee_cache(&self) -> &FeeQuoteCache {
        &self.fee_cache
    }

    // ---- administration ----

    pub fn register_protocol(
        &self,
        caller: &AccountId,
        protocol_id: ProtocolId,
        adapter: Arc<dyn BridgeModule>,
        security_level: u8,
    ) -> Result<(), RouterError> {
        self.access.require(caller, Role::Admin)?;
        if protocol_id.as_str().is_empty() || protocol_id.as_str().contains(':') {
            return Err(RouterError::UnknownProtocol(protocol_id));
        }

        {
            let mut protocols = self.protocols.write();
            if protocols.contains_key(&protocol_id) {
                return Err(RouterError::ProtocolAlreadyRegistered(protocol_id));
            }
            let descriptor = ProtocolDescriptor {
                protocol_id: protocol_id.clone(),
                kind: adapter.kind(),
                enabled: true,
                security_level,
                supported_chains: BTreeMap::new(),
                fee_parameters: FeeParameters::default(),
            };
            protocols.insert(protocol_id.clone(), RegisteredProtocol { descriptor, adapter });
        }

        info!("Protocol {} registered (security {})", protocol_id, security_level);
        self.events.emit(
            self.clock.now(),
            BridgeEvent::ProtocolRegistered {
                protocol: protocol_id,
            },
        );
        Ok(())
    }

    /// Add or update a chain route (`Some`) or drop support for a chain (`None`)
    pub fn configure_chain_support(
        &self,
        caller: &AccountId,
        protocol_id: &ProtocolId,
        chain: ChainId,
        route: Option<ChainRoute>,
    ) -> Result<(), RouterError> {
        self.access.require(caller, Role::Admin)?;
        self.update(protocol_id, |descriptor| {
            match route {
                Some(route) => {
                    descriptor.supported_chains.insert(chain, route);
                }
                None => {
                    descriptor.supported_chains.remove(&chain);
                }
            }
            Ok(())
        })?;
        self.fee_cache.invalidate_protocol(protocol_id);
        info!("Protocol {} chain {} support updated", protocol_id, chain);
        Ok(())
    }

    pub fn set_fee_parameters(
        &self,
        caller: &AccountId,
        protocol_id: &ProtocolId,
        parameters: FeeParameters,
    ) -> Result<(), RouterError> {
        self.access.require(caller, Role::Admin)?;
        if u128::from(parameters.markup_bps) > BPS_DENOMINATOR {
            return Err(RouterError::InvalidFeeParameters(format!(
                "markup {} bps exceeds 100%",
                parameters.markup_bps
            )));
        }
        self.update(protocol_id, |descriptor| {
            descriptor.fee_parameters = parameters;
            Ok(())
        })?;
        let dropped = self.fee_cache.invalidate_protocol(protocol_id);
        debug!("Protocol {}: {} cached quotes invalidated", protocol_id, dropped);

        self.events.emit(
            self.clock.now(),
            BridgeEvent::FeeParametersUpdated {
                protocol: protocol_id.clone(),
            },
        );
        Ok(())
    }

    pub fn set_enabled(&self, caller: &AccountId, protocol_id: &ProtocolId, enabled: bool) -> Result<(), RouterError> {
        self.access.require(caller, Role::Admin)?;
        self.update(protocol_id, |descriptor| {
            descriptor.enabled = enabled;
            Ok(())
        })?;
        if enabled {
            info!("Protocol {} enabled", protocol_id);
        } else {
            warn!("Protocol {} disabled for new routes", protocol_id);
        }
        Ok(())
    }

    pub fn set_security_level(&self, caller: &AccountId, protocol_id: &ProtocolId, level: u8) -> Result<(), RouterError> {
        self.access.require(caller, Role::Admin)?;
        self.update(protocol_id, |descriptor| {
            descriptor.security_level = level;
            Ok(())
        })
    }

    fn update<F>(&self, protocol_id: &ProtocolId, f: F) -> Result<(), RouterError>
    where
        F: FnOnce(&mut ProtocolDescriptor) -> Result<(), RouterError>,
    {
        let mut protocols = self.protocols.write();
        let entry = protocols
            .get_mut(protocol_id)
            .ok_or_else(|| RouterError::UnknownProtocol(protocol_id.clone()))?;
        f(&mut entry.descriptor)
    }

    /// Overwrite a registered protocol's descriptor from an export
    pub fn restore_descriptor(&self, descriptor: ProtocolDescriptor) -> Result<(), RouterError> {
        let id = descriptor.protocol_id.clone();
        self.update(&id, |current| {
            if current.kind != descriptor.kind {
                return Err(RouterError::MalformedPayload(format!(
                    "protocol {} kind {} does not match exported {}",
                    id, current.kind, descriptor.kind
                )));
            }
            *current = descriptor;
            Ok(())
        })?;
        self.fee_cache.invalidate_protocol(&id);
        Ok(())
    }

    // ---- lookups ----

    pub fn descriptor(&self, protocol_id: &ProtocolId) -> Option<ProtocolDescriptor> {
        self.protocols
            .read()
            .get(protocol_id)
            .map(|p| p.descriptor.clone())
    }

    /// All descriptors ordered by protocol id
    pub fn descriptors(&self) -> Vec<ProtocolDescriptor> {
        self.protocols
            .read()
            .values()
            .map(|p| p.descriptor.clone())
            .collect()
    }

    /// Descriptor and adapter for a protocol regardless of its enabled flag
    pub fn lookup(&self, protocol_id: &ProtocolId) -> Result<(ProtocolDescriptor, Arc<dyn BridgeModule>), RouterError> {
        self.protocols
            .read()
            .get(protocol_id)
            .map(|p| (p.descriptor.clone(), p.adapter.clone()))
            .ok_or_else(|| RouterError::UnknownProtocol(protocol_id.clone()))
    }

    /// Descriptor and adapter for a protocol usable for a new transfer to `chain`
    pub fn routable(
        &self,
        protocol_id: &ProtocolId,
        chain: ChainId,
    ) -> Result<(ProtocolDescriptor, Arc<dyn BridgeModule>), RouterError> {
        let (descriptor, adapter) = self.lookup(protocol_id)?;
        if !descriptor.enabled {
            return Err(RouterError::ProtocolDisabled(protocol_id.clone()));
        }
        if !descriptor.supports(chain) {
            return Err(RouterError::UnsupportedChain {
                protocol: protocol_id.clone(),
                chain,
            });
        }
        Ok((descriptor, adapter))
    }

    // ---- quotation ----

    /// Effective fee, served from the cache while fresh
    pub fn quote(&self, protocol_id: &ProtocolId, chain: ChainId, amount: u128) -> Result<u128, RouterError> {
        let generation = self.fee_cache.generation(protocol_id);
        let (descriptor, adapter) = self.lookup(protocol_id)?;
        self.quote_with(&descriptor, adapter.as_ref(), generation, chain, amount)
    }

    /// `generation` must be read before `descriptor` was snapshotted
    fn quote_with(
        &self,
        descriptor: &ProtocolDescriptor,
        adapter: &dyn BridgeModule,
        generation: u64,
        chain: ChainId,
        amount: u128,
    ) -> Result<u128, RouterError> {
        let now = self.clock.now();
        if let Some(fee) = self.fee_cache.get(&descriptor.protocol_id, chain, amount, now) {
            return Ok(fee);
        }
        let estimate = adapter
            .estimate_fee(chain, amount)
            .map_err(|e| RouterError::adapter(&descriptor.protocol_id, e))?;
        let fee = descriptor.fee_parameters.apply(estimate)?;
        if self
            .fee_cache
            .insert(&descriptor.protocol_id, chain, amount, fee, now, generation)
            .is_none()
        {
            debug!(
                "Quote for {} computed under superseded fee parameters, not cached",
                descriptor.protocol_id
            );
        }
        Ok(fee)
    }

    /// One option per enabled protocol supporting `chain`, ordered by protocol id.
    ///
    /// A failing adapter marks its own option unavailable instead of failing the call.
    pub fn get_bridge_options(&self, chain: ChainId, amount: u128) -> Vec<BridgeOption> {
        let eligible: Vec<(ProtocolDescriptor, Arc<dyn BridgeModule>, u64)> = self
            .protocols
            .read()
            .values()
            .filter(|p| p.descriptor.enabled && p.descriptor.supports(chain))
            .map(|p| {
                let generation = self.fee_cache.generation(&p.descriptor.protocol_id);
                (p.descriptor.clone(), p.adapter.clone(), generation)
            })
            .collect();

        eligible
            .into_iter()
            .map(|(descriptor, adapter, generation)| {
                let quoted = self
                    .quote_with(&descriptor, adapter.as_ref(), generation, chain, amount)
                    .and_then(|fee| {
                        adapter
                            .estimated_time_secs(chain)
                            .map(|time| (fee, time))
                            .map_err(|e| RouterError::adapter(&descriptor.protocol_id, e))
                    });

                match quoted {
                    Ok((fee, time)) => BridgeOption {
                        protocol_id: descriptor.protocol_id,
                        kind: descriptor.kind,
                        security_level: descriptor.security_level,
                        fee: Some(fee),
                        estimated_time_secs: Some(time),
                        available: true,
                        unavailable_reason: None,
                    },
                    Err(err) => {
                        warn!("Route via {} to chain {} unavailable: {}", descriptor.protocol_id, chain, err);
                        BridgeOption {
                            protocol_id: descriptor.protocol_id,
                            kind: descriptor.kind,
                            security_level: descriptor.security_level,
                            fee: None,
                            estimated_time_secs: None,
                            available: false,
                            unavailable_reason: Some(err.to_string()),
                        }
                    }
                }
            })
            .collect()
    }
}
