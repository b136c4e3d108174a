// FEE QUOTATION CACHE
// Short-lived memoized fee quotes keyed by (protocol, chain, amount bucket).
//
// Expiry is checked lazily on lookup; there is no eviction thread.
// Each protocol carries a generation bumped on every invalidation. A quote
// computed under an older generation is never served.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use omniguard_core::{ChainId, ProtocolId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub protocol_id: ProtocolId,
    pub chain_id: ChainId,
    pub amount_bucket: u128,
    /// Effective fee (adapter estimate plus fee parameters)
    pub fee: u128,
    pub expires_at: u64,
    /// Protocol generation the fee was computed under
    pub generation: u64,
}

type QuoteKey = (ProtocolId, ChainId, u128);

#[derive(Debug)]
pub struct FeeQuoteCache {
    quotes: DashMap<QuoteKey, FeeQuote>,
    generations: DashMap<ProtocolId, u64>,
    ttl_secs: u64,
    bucket_size: u128,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FeeQuoteCache {
    pub fn new(ttl_secs: u64, bucket_size: u64) -> Self {
        FeeQuoteCache {
            quotes: DashMap::new(),
            generations: DashMap::new(),
            ttl_secs,
            bucket_size: u128::from(bucket_size.max(1)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn bucket(&self, amount: u128) -> u128 {
        amount / self.bucket_size
    }

    /// Current generation of `protocol`; read it before snapshotting fee inputs
    pub fn generation(&self, protocol: &ProtocolId) -> u64 {
        self.generations.get(protocol).map(|g| *g).unwrap_or(0)
    }

    /// Cached fee for the amount's bucket, if still fresh at `now`
    pub fn get(&self, protocol: &ProtocolId, chain: ChainId, amount: u128, now: u64) -> Option<u128> {
        let key = (protocol.clone(), chain, self.bucket(amount));
        let generation = self.generation(protocol);
        let fresh = match self.quotes.get(&key) {
            Some(quote) if now < quote.expires_at && quote.generation == generation => Some(quote.fee),
            Some(_) => None,
            None => None,
        };

        match fresh {
            Some(fee) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(fee)
            }
            None => {
                // drop the stale entry outside the read guard
                self.quotes.remove_if(&key, |_, quote| {
                    now >= quote.expires_at || quote.generation != generation
                });
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a fee computed under `generation`.
    ///
    /// Returns `None` without caching when the protocol was invalidated since.
    pub fn insert(
        &self,
        protocol: &ProtocolId,
        chain: ChainId,
        amount: u128,
        fee: u128,
        now: u64,
        generation: u64,
    ) -> Option<FeeQuote> {
        if generation != self.generation(protocol) {
            return None;
        }
        let quote = FeeQuote {
            protocol_id: protocol.clone(),
            chain_id: chain,
            amount_bucket: self.bucket(amount),
            fee,
            expires_at: now.saturating_add(self.ttl_secs),
            generation,
        };
        self.quotes
            .insert((protocol.clone(), chain, quote.amount_bucket), quote.clone());
        Some(quote)
    }

    /// Bump the protocol's generation and drop its quotes; returns how many were removed
    pub fn invalidate_protocol(&self, protocol: &ProtocolId) -> usize {
        *self.generations.entry(protocol.clone()).or_insert(0) += 1;
        let before = self.quotes.len();
        self.quotes.retain(|(p, _, _), _| p != protocol);
        before.saturating_sub(self.quotes.len())
    }

    pub fn clear(&self) {
        self.quotes.clear();
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
