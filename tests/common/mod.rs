#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use std::sync::Arc;

use omniguard::{
    AccountId, BridgeSystem, ChainId, ChainRoute, InMemoryLedger, ManualClock, ProtocolId,
    ProtocolKind, ReporterId, Role, ScriptedAdapter, Settings, SupplyReport, TransferRequest,
};

pub const START: u64 = 1_700_000_000;
pub const BSC: ChainId = ChainId(56);
pub const EXPECTED_SUPPLY: u128 = 5_000_000_000;

pub struct Harness {
    pub system: BridgeSystem,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: Arc<ManualClock>,
    pub admin: AccountId,
    pub guardian: AccountId,
    pub relayer: AccountId,
    pub p1: Arc<ScriptedAdapter>,
    pub p2: Arc<ScriptedAdapter>,
}

pub fn signer(name: &str) -> SigningKey {
    SigningKey::from_bytes(&[name.as_bytes()[0]; 32])
}

pub fn p1() -> ProtocolId {
    ProtocolId::new("p1")
}

pub fn p2() -> ProtocolId {
    ProtocolId::new("p2")
}

pub fn alice() -> AccountId {
    AccountId::new("alice")
}

pub fn escrow() -> AccountId {
    AccountId::new("omniguard:escrow")
}

pub fn peer(protocol: &ProtocolId) -> Vec<u8> {
    format!("{}-router", protocol).into_bytes()
}

/// Fresh system: four reporters, P1 {fee 10, 10 s, security 9} and
/// P2 {fee 5, 60 s, security 7}, both serving chain 56
pub fn harness() -> Harness {
    harness_with(Settings::default())
}

pub fn harness_with(settings: Settings) -> Harness {
    omniguard::logging::init_for_tests();
    let admin = AccountId::new("admin");
    let guardian = AccountId::new("guardian");
    let relayer = AccountId::new("relayer");
    let ledger = Arc::new(InMemoryLedger::new(EXPECTED_SUPPLY));
    let clock = Arc::new(ManualClock::new(START));
    let system = BridgeSystem::new(settings, admin.clone(), ledger.clone(), clock.clone()).unwrap();

    system.grant_role(&admin, guardian.clone(), Role::Guardian).unwrap();
    system.grant_role(&admin, relayer.clone(), Role::Relayer).unwrap();
    for name in ["a", "b", "c", "d"] {
        system
            .oracle()
            .authorize_reporter(&admin, ReporterId::new(name), signer(name).verifying_key())
            .unwrap();
    }

    let p1_adapter = Arc::new(ScriptedAdapter::new(ProtocolKind::LayerZero, 10, 10));
    let p2_adapter = Arc::new(ScriptedAdapter::new(ProtocolKind::Wormhole, 5, 60));
    system
        .register_protocol(&admin, p1(), p1_adapter.clone(), 9)
        .unwrap();
    system
        .register_protocol(&admin, p2(), p2_adapter.clone(), 7)
        .unwrap();
    for protocol in [p1(), p2()] {
        system
            .configure_chain_support(
                &admin,
                &protocol,
                BSC,
                Some(ChainRoute {
                    trusted_peer: peer(&protocol),
                }),
            )
            .unwrap();
    }

    ledger.set_balance(alice(), 1_000_000);
    ledger.set_balance(escrow(), 10_000_000);

    Harness {
        system,
        ledger,
        clock,
        admin,
        guardian,
        relayer,
        p1: p1_adapter,
        p2: p2_adapter,
    }
}

pub fn report(name: &str, chain: ChainId, total: u128, locked: u128, nonce: u64, timestamp: u64) -> SupplyReport {
    SupplyReport::new(ReporterId::new(name), chain, total, locked, nonce, timestamp).signed(&signer(name))
}

pub fn request(amount: u128, fee_budget: u128) -> TransferRequest {
    TransferRequest {
        sender: alice(),
        recipient: AccountId::new("bob"),
        destination_chain: BSC,
        amount,
        fee_budget,
    }
}
