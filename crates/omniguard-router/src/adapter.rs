// TRANSPORT ADAPTER CAPABILITY
// One capability interface for every cross-chain messaging protocol.
//
// Protocols are tagged variants (ProtocolKind) held in the registry table as
// `Arc<dyn BridgeModule>`. The kind decides how recipients are encoded on the wire.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use omniguard_core::{AccountId, ChainId};

use crate::error::{AdapterError, RouterError};

const PADDED_ADDRESS_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// 32-byte left-padded recipient
    LayerZero,
    /// 32-byte left-padded recipient
    Wormhole,
    /// Raw string recipient
    Axelar,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::LayerZero => "LAYER_ZERO",
            ProtocolKind::Wormhole => "WORMHOLE",
            ProtocolKind::Axelar => "AXELAR",
        }
    }

    pub fn encode_recipient(&self, recipient: &AccountId) -> Result<Vec<u8>, RouterError> {
        let raw = recipient.as_str().as_bytes();
        if recipient.is_empty() {
            return Err(RouterError::InvalidRecipient("empty recipient".to_string()));
        }
        match self {
            ProtocolKind::LayerZero | ProtocolKind::Wormhole => {
                if raw.len() > PADDED_ADDRESS_LEN {
                    return Err(RouterError::InvalidRecipient(format!(
                        "{} recipients are at most {} bytes, got {}",
                        self.as_str(),
                        PADDED_ADDRESS_LEN,
                        raw.len()
                    )));
                }
                let mut padded = vec![0u8; PADDED_ADDRESS_LEN - raw.len()];
                padded.extend_from_slice(raw);
                Ok(padded)
            }
            ProtocolKind::Axelar => Ok(raw.to_vec()),
        }
    }

    pub fn decode_recipient(&self, bytes: &[u8]) -> Result<AccountId, RouterError> {
        let raw = match self {
            ProtocolKind::LayerZero | ProtocolKind::Wormhole => {
                if bytes.len() != PADDED_ADDRESS_LEN {
                    return Err(RouterError::InvalidRecipient(format!(
                        "expected {} bytes, got {}",
                        PADDED_ADDRESS_LEN,
                        bytes.len()
                    )));
                }
                let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
                &bytes[start..]
            }
            ProtocolKind::Axelar => bytes,
        };
        let text = std::str::from_utf8(raw)
            .map_err(|_| RouterError::InvalidRecipient(format!("non-utf8 recipient {}", hex::encode(raw))))?;
        let account = AccountId::new(text);
        if account.is_empty() {
            return Err(RouterError::InvalidRecipient("empty recipient".to_string()));
        }
        Ok(account)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message handed to an adapter for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub destination_chain: ChainId,
    pub recipient: Vec<u8>,
    pub amount: u128,
    /// bincode-encoded TransferPayload
    pub payload: Vec<u8>,
}

/// Adapter-side reference for a sent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendHandle(pub String);

/// Capability every transport protocol implements.
///
/// `send` is fire-and-forget: it returns once the message is handed off,
/// without waiting for destination confirmation.
pub trait BridgeModule: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    fn estimate_fee(&self, chain: ChainId, amount: u128) -> Result<u128, AdapterError>;

    fn estimated_time_secs(&self, chain: ChainId) -> Result<u64, AdapterError>;

    fn send(&self, message: &OutboundMessage) -> Result<SendHandle, AdapterError>;
}

#[derive(Debug, Default)]
struct Script {
    fees: BTreeMap<ChainId, u128>,
    default_fee: u128,
    time_secs: u64,
    fail_quotes: bool,
    fail_sends: bool,
    /// Fail only the n-th send (0-based) from now on
    fail_send_at: Option<usize>,
    sent: Vec<OutboundMessage>,
}

/// Deterministic in-process adapter for simulations and tests
#[derive(Debug)]
pub struct ScriptedAdapter {
    kind: ProtocolKind,
    script: Mutex<Script>,
}

impl ScriptedAdapter {
    pub fn new(kind: ProtocolKind, fee: u128, time_secs: u64) -> Self {
        ScriptedAdapter {
            kind,
            script: Mutex::new(Script {
                default_fee: fee,
                time_secs,
                ..Script::default()
            }),
        }
    }

    pub fn set_fee(&self, fee: u128) {
        self.script.lock().default_fee = fee;
    }

    pub fn set_chain_fee(&self, chain: ChainId, fee: u128) {
        self.script.lock().fees.insert(chain, fee);
    }

    pub fn set_time(&self, time_secs: u64) {
        self.script.lock().time_secs = time_secs;
    }

    pub fn fail_quotes(&self, fail: bool) {
        self.script.lock().fail_quotes = fail;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.script.lock().fail_sends = fail;
    }

    /// Fail the send that would be the `index`-th (0-based) recorded message
    pub fn fail_send_at(&self, index: usize) {
        self.script.lock().fail_send_at = Some(index);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.script.lock().sent.clone()
    }
}

impl BridgeModule for ScriptedAdapter {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    fn estimate_fee(&self, chain: ChainId, _amount: u128) -> Result<u128, AdapterError> {
        let script = self.script.lock();
        if script.fail_quotes {
            return Err(AdapterError::new("quote endpoint unavailable"));
        }
        Ok(script.fees.get(&chain).copied().unwrap_or(script.default_fee))
    }

    fn estimated_time_secs(&self, _chain: ChainId) -> Result<u64, AdapterError> {
        let script = self.script.lock();
        if script.fail_quotes {
            return Err(AdapterError::new("quote endpoint unavailable"));
        }
        Ok(script.time_secs)
    }

    fn send(&self, message: &OutboundMessage) -> Result<SendHandle, AdapterError> {
        let mut script = self.script.lock();
        if script.fail_sends || script.fail_send_at == Some(script.sent.len()) {
            return Err(AdapterError::new("send rejected by transport"));
        }
        script.sent.push(message.clone());
        Ok(SendHandle(format!(
            "{}-{}",
            self.kind.as_str().to_lowercase(),
            script.sent.len()
        )))
    }
}
