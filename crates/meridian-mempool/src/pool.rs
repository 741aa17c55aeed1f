//! The transaction pool.

use crate::chain::{ChainAccess, InputCheckOutcome, VerifyFlags};
use crate::meta::{RelayMethod, TxMeta};
use crate::ordering::PoolOrderKey;
use crate::{
    relay_delay, template_accept_threshold, tx_weight_limit, MempoolError, MempoolResult,
    DANDELION_EMBARGO_AVERAGE, DEFAULT_TXPOOL_MAX_WEIGHT, MEMPOOL_PRUNE_DEREGISTER_LIFETIME,
    MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME, MEMPOOL_TX_LIVETIME,
};
use dashmap::DashMap;
use meridian_consensus::{
    block_reward_parts, Network, COINBASE_BLOB_RESERVED_SIZE, DEREGISTER_LIFETIME_V1,
    DEREGISTER_LIFETIME_V2, FEE_BURNING_VERSION, SERVICE_NODE_VERSION,
};
use meridian_types::{Hash, KeyImage, Transaction, TxInput, TxVersion};
use parking_lot::RwLock;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A transaction held in the pool.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    /// The parsed transaction.
    pub tx: Transaction,
    /// Canonical serialized form.
    pub blob: Vec<u8>,
    /// Pool metadata.
    pub meta: TxMeta,
}

/// Result of a successful admission.
#[derive(Debug, Clone, Copy)]
pub struct AddResult {
    /// The transaction id.
    pub id: Hash,
    /// Flags for the RPC/relay layer.
    pub flags: VerifyFlags,
}

/// A transaction removed with `take_tx`, with everything needed to re-add
/// it as kept-by-block after a reorganization.
#[derive(Debug, Clone)]
pub struct TakenTx {
    pub tx: Transaction,
    pub blob: Vec<u8>,
    pub weight: u64,
    pub fee: u64,
    pub relayed: bool,
    pub do_not_relay: bool,
    pub double_spend_seen: bool,
    pub pruned: bool,
}

/// Outcome of filling a block template.
#[derive(Debug, Clone, Default)]
pub struct BlockTemplate {
    /// Selected transaction ids, highest priority first.
    pub tx_hashes: Vec<Hash>,
    /// Sum of selected weights.
    pub total_weight: u64,
    /// Sum of selected fees.
    pub fee: u64,
    /// The miner coinbase the selection yields.
    pub expected_reward: u64,
}

/// One age bucket of the pool histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolHisto {
    /// Transactions in the bucket.
    pub txs: usize,
    /// Their combined weight.
    pub bytes: u64,
}

/// Aggregate pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub txs_total: usize,
    pub bytes_total: u64,
    pub bytes_min: u64,
    pub bytes_max: u64,
    pub bytes_med: u64,
    pub fee_total: u64,
    pub oldest: u64,
    pub num_not_relayed: usize,
    pub num_failing: usize,
    pub num_10m: usize,
    pub num_double_spends: usize,
    /// Transactions and bytes bucketed by age, oldest bucket last.
    pub histo: Vec<PoolHisto>,
}

/// The transaction memory pool.
pub struct TxPool {
    chain: Arc<dyn ChainAccess>,
    network: Network,
    /// Transactions by id.
    txs: DashMap<Hash, PoolEntry>,
    /// Key image to claiming transaction ids.
    spent_key_images: DashMap<KeyImage, HashSet<Hash>>,
    /// Priority-ordered keys.
    ordering: RwLock<BTreeSet<PoolOrderKey>>,
    /// Ids that aged out; refused re-admission unless kept-by-block.
    timed_out: RwLock<HashSet<Hash>>,
    /// Input-check memo, cleared on every chain movement.
    input_cache: RwLock<HashMap<Hash, Option<InputCheckOutcome>>>,
    txpool_weight: RwLock<u64>,
    txpool_max_weight: RwLock<u64>,
    /// Bumped on every observable change so template callers can cache.
    cookie: AtomicU64,
    /// Miners may include stem transactions they hold.
    mine_stem_txes: bool,
}

impl TxPool {
    /// A pool over the given chain driver.
    pub fn new(chain: Arc<dyn ChainAccess>, network: Network) -> Self {
        Self {
            chain,
            network,
            txs: DashMap::new(),
            spent_key_images: DashMap::new(),
            ordering: RwLock::new(BTreeSet::new()),
            timed_out: RwLock::new(HashSet::new()),
            input_cache: RwLock::new(HashMap::new()),
            txpool_weight: RwLock::new(0),
            txpool_max_weight: RwLock::new(DEFAULT_TXPOOL_MAX_WEIGHT),
            cookie: AtomicU64::new(0),
            mine_stem_txes: false,
        }
    }

    /// Allow stem transactions into locally mined templates.
    pub fn set_mine_stem_txes(&mut self, mine: bool) {
        self.mine_stem_txes = mine;
    }

    /// Change the pool weight ceiling.
    pub fn set_max_weight(&self, bytes: u64) {
        *self.txpool_max_weight.write() = bytes;
    }

    /// Current pool weight in bytes.
    pub fn weight(&self) -> u64 {
        *self.txpool_weight.read()
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// True when the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Change counter; bumps whenever pool contents change.
    pub fn cookie(&self) -> u64 {
        self.cookie.load(AtomicOrdering::Relaxed)
    }

    /// Whether the pool holds the transaction.
    pub fn contains(&self, id: &Hash) -> bool {
        self.txs.contains_key(id)
    }

    /// Copy of a pooled entry.
    pub fn get(&self, id: &Hash) -> Option<PoolEntry> {
        self.txs.get(id).map(|e| e.clone())
    }

    // ---- admission --------------------------------------------------

    /// Admit a transaction; the id, blob and weight are derived from the
    /// canonical serialization.
    pub fn add_tx(
        &self,
        tx: Transaction,
        tx_relay: RelayMethod,
        relayed: bool,
        hf: u8,
        now: u64,
    ) -> MempoolResult<AddResult> {
        let blob = tx.to_bytes();
        let id = tx.hash();
        let weight = blob.len() as u64;
        self.add_tx_with(tx, id, blob, weight, tx_relay, relayed, hf, now)
    }

    /// Admit a transaction with a precomputed id, blob and weight.
    #[instrument(skip_all, fields(tx_id = %id, weight))]
    #[allow(clippy::too_many_arguments)]
    pub fn add_tx_with(
        &self,
        tx: Transaction,
        id: Hash,
        blob: Vec<u8>,
        weight: u64,
        mut tx_relay: RelayMethod,
        relayed: bool,
        hf: u8,
        now: u64,
    ) -> MempoolResult<AddResult> {
        let kept_by_block = tx_relay == RelayMethod::Block;

        if tx.version == TxVersion::V0 {
            return Err(MempoolError::InvalidVersion);
        }

        // Timed-out transactions stay out unless a popped block returns
        // them.
        if !kept_by_block && self.timed_out.read().contains(&id) {
            return Err(MempoolError::TimedOut(id));
        }

        if tx
            .inputs
            .iter()
            .any(|input| !matches!(input, TxInput::ToKey { .. }))
        {
            return Err(MempoolError::InvalidInput);
        }

        let fee = tx.miner_fee(hf >= FEE_BURNING_VERSION);
        if !kept_by_block && tx.is_transfer() && !self.chain.check_fee(weight, fee) {
            return Err(MempoolError::FeeTooLow { fee, weight });
        }

        let limit = tx_weight_limit(hf);
        if !kept_by_block && weight > limit {
            return Err(MempoolError::TooBig { weight, limit });
        }

        // Transactions from popped blocks skip the double-spend checks;
        // they were valid once and may become valid again.
        if !kept_by_block {
            if self.have_pool_key_images_as_spent(&tx, &id) {
                self.mark_double_spend(&tx);
                return Err(MempoolError::DoubleSpend(id));
            }
            if let Some((height, index)) = self.duplicate_deregister_of(&tx) {
                self.mark_double_spend(&tx);
                return Err(MempoolError::DuplicateDeregister { height, index });
            }
        }

        if !self.chain.check_tx_outputs(&tx) {
            return Err(MempoolError::InvalidOutput);
        }

        let mut flags = VerifyFlags::default();
        let existed = self.txs.contains_key(&id);
        let input_outcome = self.check_tx_inputs_cached(&tx, &id, kept_by_block);

        let mut meta = TxMeta {
            weight,
            fee,
            receive_time: now,
            relayed,
            pruned: tx.pruned,
            is_deregister: tx.is_deregister(),
            ..Default::default()
        };

        match input_outcome {
            None if !kept_by_block => return Err(MempoolError::InvalidInput),
            None => {
                // Kept-by-block with failing inputs: park it so it can
                // return to life after the reorganization settles.
                meta.last_relayed_time = now;
                meta.double_spend_seen = self.have_pool_key_images_as_spent(&tx, &id)
                    || self.duplicate_deregister_of(&tx).is_some();
                meta.set_relay_method(tx_relay);
                self.remove_entry_ordering(&id);
                self.insert_entry(tx, id, blob, meta)?;
                flags.verification_impossible = true;
                flags.added_to_pool = true;
            }
            Some(outcome) => {
                if let Some(existing) = self.txs.get(&id) {
                    // Dandelion++ loop: a stem transaction reappearing in
                    // stem state has looped round; fluff it out.
                    if tx_relay == RelayMethod::Stem && existing.meta.dandelion_stem() {
                        tx_relay = RelayMethod::Fluff;
                    }
                    meta.relay_method = existing.meta.relay_method;
                    meta.kept_by_block = existing.meta.kept_by_block;
                    drop(existing);
                    if !meta.upgrade_relay_method(tx_relay) {
                        // Nothing new to record.
                        flags.added_to_pool = true;
                        if meta.fee > 0 || meta.is_deregister {
                            flags.relay = tx_relay;
                        }
                        return Ok(AddResult { id, flags });
                    }
                } else {
                    meta.set_relay_method(tx_relay);
                }

                // Synchronize with the embargo timer or out-of-order
                // stem/fluff arrivals.
                meta.last_relayed_time = u64::MAX;
                meta.max_used_block_height = outcome.max_used_block_height;
                meta.max_used_block_id = outcome.max_used_block_id;
                self.remove_entry_ordering(&id);
                self.insert_entry(tx, id, blob, meta)?;
                flags.added_to_pool = true;
                if meta.fee > 0 || meta.is_deregister {
                    flags.relay = tx_relay;
                }
            }
        }

        if !existed {
            *self.txpool_weight.write() += weight;
        }
        self.cookie.fetch_add(1, AtomicOrdering::Relaxed);
        info!(fee, weight, "transaction added to pool");

        self.prune(None, now);
        Ok(AddResult { id, flags })
    }

    fn insert_entry(
        &self,
        tx: Transaction,
        id: Hash,
        blob: Vec<u8>,
        meta: TxMeta,
    ) -> MempoolResult<()> {
        self.insert_key_images(&tx, &id, meta.relay_method)?;
        self.ordering.write().insert(PoolOrderKey::new(
            meta.is_deregister,
            meta.fee,
            meta.weight,
            meta.receive_time,
            id,
        ));
        self.txs.insert(id, PoolEntry { tx, blob, meta });
        Ok(())
    }

    fn remove_entry_ordering(&self, id: &Hash) {
        if let Some(entry) = self.txs.get(id) {
            let key = PoolOrderKey::new(
                entry.meta.is_deregister,
                entry.meta.fee,
                entry.meta.weight,
                entry.meta.receive_time,
                *id,
            );
            drop(entry);
            self.ordering.write().remove(&key);
        }
    }

    fn check_tx_inputs_cached(
        &self,
        tx: &Transaction,
        id: &Hash,
        kept_by_block: bool,
    ) -> Option<InputCheckOutcome> {
        if !kept_by_block {
            if let Some(cached) = self.input_cache.read().get(id) {
                return *cached;
            }
        }
        let outcome = self.chain.check_tx_inputs(tx);
        if !kept_by_block {
            self.input_cache.write().insert(*id, outcome);
        }
        outcome
    }

    // ---- key images -------------------------------------------------

    fn insert_key_images(
        &self,
        tx: &Transaction,
        id: &Hash,
        tx_relay: RelayMethod,
    ) -> MempoolResult<()> {
        for image in tx.key_images() {
            let mut set = self.spent_key_images.entry(image).or_default();
            // Multiple claimants are only legal for kept-by-block
            // transactions.
            if tx_relay != RelayMethod::Block {
                let one_txid = set.is_empty() || (set.len() == 1 && set.contains(id));
                if !one_txid {
                    warn!(%id, %image, "conflicting pool claims on a key image");
                    return Err(MempoolError::DoubleSpend(*id));
                }
            }
            set.insert(*id);
        }
        self.cookie.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    fn remove_tx_key_images(&self, tx: &Transaction, id: &Hash) {
        for image in tx.key_images() {
            let mut empty = false;
            if let Some(mut set) = self.spent_key_images.get_mut(&image) {
                set.remove(id);
                empty = set.is_empty();
            }
            if empty {
                self.spent_key_images.remove(&image);
            }
        }
        self.cookie.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn have_pool_key_images_as_spent(&self, tx: &Transaction, id: &Hash) -> bool {
        tx.key_images().iter().any(|image| {
            self.spent_key_images.get(image).is_some_and(|set| {
                set.len() > 1 || (set.len() == 1 && !set.contains(id))
            })
        })
    }

    /// Whether the key image is claimed by any pool transaction.
    pub fn is_key_image_spent(&self, image: &KeyImage) -> bool {
        self.spent_key_images
            .get(image)
            .is_some_and(|set| !set.is_empty())
    }

    /// Spent-status lookup for a batch of key images.
    pub fn check_for_key_images(&self, images: &[KeyImage]) -> Vec<bool> {
        images.iter().map(|i| self.is_key_image_spent(i)).collect()
    }

    fn mark_double_spend(&self, tx: &Transaction) {
        let mut changed = false;
        for image in tx.key_images() {
            let Some(claimants) = self.spent_key_images.get(&image).map(|s| s.clone()) else {
                continue;
            };
            for claimant in claimants {
                if let Some(mut entry) = self.txs.get_mut(&claimant) {
                    if !entry.meta.double_spend_seen {
                        debug!(id = %claimant, %image, "marking pooled tx as double spending");
                        entry.meta.double_spend_seen = true;
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.cookie.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    fn duplicate_deregister_of(&self, tx: &Transaction) -> Option<(u64, u32)> {
        if !tx.is_deregister() {
            return None;
        }
        let deregister = tx.deregistration()?;
        let duplicate = self.txs.iter().any(|entry| {
            entry.tx.is_deregister()
                && entry.tx.deregistration().is_some_and(|other| {
                    other.block_height == deregister.block_height
                        && other.service_node_index == deregister.service_node_index
                })
        });
        duplicate.then_some((deregister.block_height, deregister.service_node_index))
    }

    // ---- removal ----------------------------------------------------

    /// Remove a transaction, returning everything needed to re-admit it.
    pub fn take_tx(&self, id: &Hash) -> MempoolResult<TakenTx> {
        self.remove_entry_ordering(id);
        let Some((_, entry)) = self.txs.remove(id) else {
            return Err(MempoolError::NotFound(*id));
        };
        *self.txpool_weight.write() -= entry.meta.weight;
        self.remove_tx_key_images(&entry.tx, id);
        self.cookie.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(TakenTx {
            tx: entry.tx,
            blob: entry.blob,
            weight: entry.meta.weight,
            fee: entry.meta.fee,
            relayed: entry.meta.relayed,
            do_not_relay: entry.meta.do_not_relay,
            double_spend_seen: entry.meta.double_spend_seen,
            pruned: entry.meta.pruned,
        })
    }

    /// Evict the lowest-priority transactions until the pool weight drops
    /// to the target (the configured maximum when `None`).
    ///
    /// Kept-by-block entries are never pruned, and a pending deregistration
    /// survives until its inclusion window has closed.
    pub fn prune(&self, target: Option<u64>, now: u64) {
        let target = target.unwrap_or_else(|| *self.txpool_max_weight.read());
        let mut removed = Vec::new();
        {
            let ordering = self.ordering.read();
            let mut weight = *self.txpool_weight.read();
            for key in ordering.iter().rev() {
                if weight <= target {
                    break;
                }
                if key.is_deregister
                    && key.receive_time >= now.saturating_sub(MEMPOOL_PRUNE_DEREGISTER_LIFETIME)
                {
                    continue;
                }
                let Some(entry) = self.txs.get(&key.tx_id) else {
                    continue;
                };
                if entry.meta.kept_by_block {
                    continue;
                }
                weight -= entry.meta.weight;
                removed.push(key.tx_id);
            }
        }
        for id in removed {
            match self.take_tx(&id) {
                Ok(taken) => {
                    info!(%id, weight = taken.weight, "pruned tx from the pool")
                }
                Err(e) => warn!(%id, error = %e, "failed to prune tx"),
            }
        }
        let weight = self.weight();
        if weight > target {
            debug!(weight, target, "pool weight still above target after pruning");
        }
    }

    /// Sweep transactions that sat in the pool past their lifetime.
    /// Swept ids are remembered and refused re-admission.
    pub fn remove_stuck_transactions(&self, now: u64) -> usize {
        let stuck: Vec<Hash> = self
            .txs
            .iter()
            .filter(|entry| {
                let age = now.saturating_sub(entry.meta.receive_time);
                (age > MEMPOOL_TX_LIVETIME && !entry.meta.kept_by_block)
                    || (age > MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME && entry.meta.kept_by_block)
                    || (entry.meta.is_deregister && age > MEMPOOL_PRUNE_DEREGISTER_LIFETIME)
            })
            .map(|entry| *entry.key())
            .collect();

        let mut count = 0;
        for id in stuck {
            self.timed_out.write().insert(id);
            if self.take_tx(&id).is_ok() {
                debug!(%id, "removed stuck transaction");
                count += 1;
            }
        }
        count
    }

    // ---- relay scheduling -------------------------------------------

    /// Transactions due for (re)relay at `now`.
    pub fn relayable_transactions(&self, now: u64) -> Vec<(Hash, Vec<u8>, RelayMethod)> {
        let mut due = Vec::new();
        for entry in self.txs.iter() {
            let meta = &entry.meta;
            // Zero-fee and deregister transactions are never re-relayed.
            if meta.pruned || meta.fee == 0 || meta.do_not_relay || meta.is_deregister {
                continue;
            }
            if !meta.dandelion_stem()
                && now.saturating_sub(meta.last_relayed_time)
                    <= relay_delay(now, meta.receive_time)
            {
                continue;
            }
            // While in stem, last_relayed_time holds the embargo deadline.
            if meta.dandelion_stem() && meta.last_relayed_time < now {
                continue;
            }
            // Flap avoidance: nodes flush at slightly different times, so
            // old transactions are not echoed back and forth.
            let max_age = if meta.kept_by_block {
                MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME
            } else {
                MEMPOOL_TX_LIVETIME
            };
            if now.saturating_sub(meta.receive_time) <= max_age / 2 {
                due.push((*entry.key(), entry.blob.clone(), meta.relay_method));
            }
        }
        due
    }

    /// Record a relay attempt. Stem transactions get a fresh Poisson
    /// embargo deadline; everything else stamps the relay time.
    pub fn set_relayed<R: Rng>(&self, hashes: &[Hash], method: RelayMethod, now: u64, rng: &mut R) {
        let embargo = Poisson::new(DANDELION_EMBARGO_AVERAGE).ok();
        for hash in hashes {
            let Some(mut entry) = self.txs.get_mut(hash) else {
                continue;
            };
            entry.meta.upgrade_relay_method(method);
            entry.meta.relayed = true;
            if entry.meta.dandelion_stem() {
                let delay = embargo
                    .as_ref()
                    .map(|d| d.sample(rng) as u64)
                    .unwrap_or(DANDELION_EMBARGO_AVERAGE as u64);
                entry.meta.last_relayed_time = now + delay;
            } else {
                entry.meta.last_relayed_time = now;
            }
        }
    }

    // ---- template filling -------------------------------------------

    /// Whether the transaction could be mined right now. Re-runs the input
    /// check, consults the failure memo, and rejects deregistrations whose
    /// inclusion window has closed. Updates the failure memo in `meta`.
    fn is_transaction_ready_to_go(&self, meta: &mut TxMeta, id: &Hash, tx: &Transaction) -> bool {
        let current_height = self.chain.current_height();

        if meta.max_used_block_id.is_null() {
            if !meta.last_failed_id.is_null()
                && current_height > meta.last_failed_height
                && Some(meta.last_failed_id) == self.chain.block_id_by_height(meta.last_failed_height)
            {
                // Known broken at this chain state.
                return false;
            }
            match self.check_tx_inputs_cached(tx, id, false) {
                Some(outcome) => {
                    meta.max_used_block_height = outcome.max_used_block_height;
                    meta.max_used_block_id = outcome.max_used_block_id;
                }
                None => {
                    meta.last_failed_height = current_height.saturating_sub(1);
                    meta.last_failed_id = self
                        .chain
                        .block_id_by_height(meta.last_failed_height)
                        .unwrap_or(Hash::NULL);
                    return false;
                }
            }
        } else {
            if meta.max_used_block_height >= current_height {
                return false;
            }
            if Some(meta.last_failed_id) == self.chain.block_id_by_height(meta.last_failed_height) {
                return false;
            }
            if self.check_tx_inputs_cached(tx, id, false).is_none() {
                meta.last_failed_height = current_height.saturating_sub(1);
                meta.last_failed_id = self
                    .chain
                    .block_id_by_height(meta.last_failed_height)
                    .unwrap_or(Hash::NULL);
                return false;
            }
        }

        if self.chain.have_tx_key_images_as_spent(tx) {
            meta.double_spend_seen = true;
            return false;
        }

        if tx.is_deregister() {
            let hf = self.chain.hard_fork_version(current_height);
            let lifetime = if hf >= 9 {
                DEREGISTER_LIFETIME_V2
            } else {
                DEREGISTER_LIFETIME_V1
            };
            let fresh = tx
                .deregistration()
                .is_some_and(|d| current_height.saturating_sub(d.block_height) <= lifetime);
            if !fresh {
                // Too old to include, but a popped block could revive it;
                // leave it to expire out of the pool on its own.
                meta.last_failed_height = current_height.saturating_sub(1);
                meta.last_failed_id = self
                    .chain
                    .block_id_by_height(meta.last_failed_height)
                    .unwrap_or(Hash::NULL);
                meta.max_used_block_height = meta.last_failed_height;
                meta.max_used_block_id = meta.last_failed_id;
                return false;
            }
        }

        true
    }

    /// Select transactions for a block template at the current height.
    #[instrument(skip(self), fields(median_weight))]
    pub fn fill_block_template(&self, median_weight: u64, hf: u8) -> MempoolResult<BlockTemplate> {
        let height = self.chain.current_height();
        let already_generated_coins = self.chain.already_generated_coins();

        let mut template = BlockTemplate::default();
        let mut best_coinbase = block_reward_parts(
            median_weight,
            0,
            already_generated_coins,
            hf,
            height,
            self.network,
            0,
            &[],
        )?
        .base_miner;

        let max_total_weight = if hf >= SERVICE_NODE_VERSION {
            (2 * median_weight).saturating_sub(COINBASE_BLOB_RESERVED_SIZE)
        } else {
            (130 * median_weight / 100).saturating_sub(COINBASE_BLOB_RESERVED_SIZE)
        };

        let ordering: Vec<PoolOrderKey> = self.ordering.read().iter().cloned().collect();
        debug!(
            median_weight,
            candidates = ordering.len(),
            "filling block template"
        );

        let mut k_images: HashSet<KeyImage> = HashSet::new();
        for key in ordering {
            let Some(entry) = self.txs.get(&key.tx_id) else {
                continue;
            };
            let meta = entry.meta;
            let tx = entry.tx.clone();
            drop(entry);

            if !meta.is_broadcast() && !(self.mine_stem_txes && meta.dandelion_stem()) {
                continue;
            }
            if meta.pruned {
                continue;
            }
            if max_total_weight < template.total_weight + meta.weight {
                continue;
            }

            let mut coinbase = 0u64;
            if hf >= SERVICE_NODE_VERSION {
                let parts = match block_reward_parts(
                    median_weight,
                    template.total_weight + meta.weight,
                    already_generated_coins,
                    hf,
                    height,
                    self.network,
                    0,
                    &[],
                ) {
                    Ok(parts) => parts,
                    Err(_) => continue,
                };
                coinbase = parts.base_miner + template.fee + meta.fee;
                if coinbase < template_accept_threshold(best_coinbase) {
                    continue;
                }
            } else if template.total_weight > median_weight {
                break;
            }

            let mut updated_meta = meta;
            let ready = self.is_transaction_ready_to_go(&mut updated_meta, &key.tx_id, &tx);
            if updated_meta != meta {
                if let Some(mut entry) = self.txs.get_mut(&key.tx_id) {
                    entry.meta = updated_meta;
                }
            }
            if !ready {
                continue;
            }

            if tx.key_images().iter().any(|image| k_images.contains(image)) {
                continue;
            }

            template.tx_hashes.push(key.tx_id);
            template.total_weight += meta.weight;
            template.fee += meta.fee;
            best_coinbase = coinbase;
            k_images.extend(tx.key_images());
        }

        template.expected_reward = best_coinbase;
        debug!(
            selected = template.tx_hashes.len(),
            weight = template.total_weight,
            fee = template.fee,
            "block template filled"
        );
        Ok(template)
    }

    // ---- maintenance and introspection ------------------------------

    /// Drop entries that no longer fit the weight limit or were mined
    /// meanwhile. Returns how many were removed. Run after hard forks and
    /// on startup.
    pub fn validate(&self, hf: u8) -> usize {
        let limit = tx_weight_limit(hf);
        let remove: Vec<Hash> = self
            .txs
            .iter()
            .filter(|entry| {
                entry.meta.weight > limit || self.chain.have_tx(entry.key())
            })
            .map(|entry| *entry.key())
            .collect();
        let mut removed = 0;
        for id in remove {
            if self.take_tx(&id).is_ok() {
                info!(%id, "removed invalid tx from the pool");
                removed += 1;
            }
        }
        removed
    }

    /// The chain advanced; drop the verification memos.
    pub fn on_blockchain_inc(&self) {
        self.input_cache.write().clear();
    }

    /// The chain popped blocks; drop the verification memos.
    pub fn on_blockchain_dec(&self) {
        self.input_cache.write().clear();
    }

    /// All pooled transactions.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.txs.iter().map(|entry| entry.tx.clone()).collect()
    }

    /// All pooled transaction ids.
    pub fn transaction_hashes(&self) -> Vec<Hash> {
        self.txs.iter().map(|entry| *entry.key()).collect()
    }

    /// Backlog rows: (weight, fee, age relative to `now`).
    pub fn backlog(&self, now: u64) -> Vec<(u64, u64, u64)> {
        self.txs
            .iter()
            .map(|entry| {
                (
                    entry.meta.weight,
                    entry.meta.fee,
                    now.saturating_sub(entry.meta.receive_time),
                )
            })
            .collect()
    }

    /// Aggregate statistics.
    pub fn stats(&self, now: u64) -> PoolStats {
        let mut stats = PoolStats::default();
        let mut weights = Vec::new();
        let mut ages: Vec<(u64, u64)> = Vec::new();
        for entry in self.txs.iter() {
            let meta = &entry.meta;
            stats.txs_total += 1;
            stats.bytes_total += meta.weight;
            weights.push(meta.weight);
            ages.push((now.saturating_sub(meta.receive_time), meta.weight));
            if stats.bytes_min == 0 || meta.weight < stats.bytes_min {
                stats.bytes_min = meta.weight;
            }
            stats.bytes_max = stats.bytes_max.max(meta.weight);
            if !meta.relayed {
                stats.num_not_relayed += 1;
            }
            stats.fee_total += meta.fee;
            if stats.oldest == 0 || meta.receive_time < stats.oldest {
                stats.oldest = meta.receive_time;
            }
            if meta.receive_time < now.saturating_sub(600) {
                stats.num_10m += 1;
            }
            if meta.last_failed_height != 0 {
                stats.num_failing += 1;
            }
            if meta.double_spend_seen {
                stats.num_double_spends += 1;
            }
        }
        weights.sort_unstable();
        if !weights.is_empty() {
            stats.bytes_med = weights[weights.len() / 2];
        }

        // Spread transactions over up to ten even age buckets.
        if stats.txs_total > 1 {
            let buckets = stats.txs_total.min(10);
            let span = now.saturating_sub(stats.oldest).max(1);
            stats.histo = vec![PoolHisto::default(); buckets];
            for (age, weight) in ages {
                let index = ((age as u128 * buckets as u128) / (span as u128 + 1)) as usize;
                let bucket = &mut stats.histo[index.min(buckets - 1)];
                bucket.txs += 1;
                bucket.bytes += weight;
            }
        }
        stats
    }

    /// Blobs of broadcast transactions the peer did not list; used to
    /// answer fluffy-block style requests.
    pub fn complement(&self, hashes: &[Hash]) -> Vec<Vec<u8>> {
        self.txs
            .iter()
            .filter(|entry| entry.meta.is_broadcast() && !hashes.contains(entry.key()))
            .map(|entry| entry.blob.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{
        serialize_extra, DeregisterExtra, TxExtraField, TxOutput, TxOutputTarget, TxType,
    };
    use parking_lot::RwLock as PlRwLock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    const NOW: u64 = 1_700_000_000;
    const HF: u8 = 9;

    struct MockChain {
        height: StdAtomicU64,
        hf: u8,
        fail_inputs: PlRwLock<bool>,
        spent_on_chain: PlRwLock<HashSet<KeyImage>>,
        min_fee_per_byte: u64,
    }

    impl MockChain {
        fn new(height: u64, hf: u8) -> Self {
            Self {
                height: StdAtomicU64::new(height),
                hf,
                fail_inputs: PlRwLock::new(false),
                spent_on_chain: PlRwLock::new(HashSet::new()),
                min_fee_per_byte: 1,
            }
        }
    }

    impl ChainAccess for MockChain {
        fn current_height(&self) -> u64 {
            self.height.load(AtomicOrdering::Relaxed)
        }

        fn block_id_by_height(&self, height: u64) -> Option<Hash> {
            let mut raw = [0u8; 32];
            raw[..8].copy_from_slice(&height.to_le_bytes());
            raw[31] = 0xbb;
            Some(Hash::from_bytes(raw))
        }

        fn hard_fork_version(&self, _height: u64) -> u8 {
            self.hf
        }

        fn check_fee(&self, tx_weight: u64, fee: u64) -> bool {
            fee >= tx_weight * self.min_fee_per_byte
        }

        fn check_tx_inputs(&self, _tx: &Transaction) -> Option<InputCheckOutcome> {
            if *self.fail_inputs.read() {
                return None;
            }
            let height = self.current_height().saturating_sub(1);
            Some(InputCheckOutcome {
                max_used_block_height: height,
                max_used_block_id: self.block_id_by_height(height).unwrap_or(Hash::NULL),
            })
        }

        fn check_tx_outputs(&self, _tx: &Transaction) -> bool {
            true
        }

        fn have_tx_key_images_as_spent(&self, tx: &Transaction) -> bool {
            let spent = self.spent_on_chain.read();
            tx.key_images().iter().any(|i| spent.contains(i))
        }

        fn have_tx(&self, _id: &Hash) -> bool {
            false
        }

        fn already_generated_coins(&self) -> u64 {
            100_000_000_000
        }
    }

    fn pool_at(height: u64, hf: u8) -> (TxPool, Arc<MockChain>) {
        let chain = Arc::new(MockChain::new(height, hf));
        (TxPool::new(chain.clone(), Network::Fakechain), chain)
    }

    fn transfer_tx(tag: u8, fee: u64) -> Transaction {
        Transaction {
            version: TxVersion::V2,
            tx_type: TxType::Standard,
            inputs: vec![TxInput::ToKey {
                amount: 0,
                key_offsets: vec![1, 2, 3],
                key_image: KeyImage::from_bytes([tag; 32]),
            }],
            outputs: vec![TxOutput {
                amount: 0,
                target: TxOutputTarget::ToKey(meridian_types::PublicKey::from_bytes([tag; 32])),
            }],
            fee,
            ..Default::default()
        }
    }

    fn deregister_tx(voted_height: u64, index: u32) -> Transaction {
        Transaction {
            version: TxVersion::V2,
            tx_type: TxType::Deregister,
            extra: serialize_extra(&[TxExtraField::Deregister(DeregisterExtra {
                block_height: voted_height,
                service_node_index: index,
                votes: vec![],
            })]),
            ..Default::default()
        }
    }

    fn add(pool: &TxPool, tx: Transaction, weight: u64) -> MempoolResult<AddResult> {
        let blob = tx.to_bytes();
        let id = tx.hash();
        pool.add_tx_with(tx, id, blob, weight, RelayMethod::Fluff, false, HF, NOW)
    }

    #[test]
    fn admits_a_paying_transfer() {
        let (pool, _) = pool_at(1_000, HF);
        let tx = transfer_tx(1, 10_000);
        let result = add(&pool, tx.clone(), 100).unwrap();
        assert!(result.flags.added_to_pool);
        assert_eq!(result.flags.relay, RelayMethod::Fluff);
        assert!(pool.contains(&tx.hash()));
        assert_eq!(pool.weight(), 100);
        assert!(pool.is_key_image_spent(&KeyImage::from_bytes([1; 32])));
    }

    #[test]
    fn rejects_version_zero() {
        let (pool, _) = pool_at(1_000, HF);
        let mut tx = transfer_tx(1, 10_000);
        tx.version = TxVersion::V0;
        assert!(matches!(
            add(&pool, tx, 100),
            Err(MempoolError::InvalidVersion)
        ));
    }

    #[test]
    fn rejects_low_fee_with_flag() {
        let (pool, _) = pool_at(1_000, HF);
        let tx = transfer_tx(1, 3);
        let err = add(&pool, tx, 100).unwrap_err();
        assert!(matches!(err, MempoolError::FeeTooLow { .. }));
        assert!(err.verify_flags().fee_too_low);
        assert!(err.verify_flags().verification_failed);
    }

    #[test]
    fn rejects_oversized_transactions() {
        let (pool, _) = pool_at(1_000, HF);
        let tx = transfer_tx(1, u64::MAX / 2);
        let limit = tx_weight_limit(HF);
        let err = add(&pool, tx, limit + 1).unwrap_err();
        assert!(matches!(err, MempoolError::TooBig { .. }));
    }

    #[test]
    fn rejects_pool_double_spends() {
        let (pool, _) = pool_at(1_000, HF);
        add(&pool, transfer_tx(7, 10_000), 100).unwrap();

        // Different tx, same key image.
        let mut conflicting = transfer_tx(7, 20_000);
        conflicting.outputs[0].amount = 1;
        let err = add(&pool, conflicting, 100).unwrap_err();
        assert!(matches!(err, MempoolError::DoubleSpend(_)));
        assert!(err.verify_flags().double_spend);
    }

    #[test]
    fn rejects_duplicate_deregisters() {
        let (pool, _) = pool_at(1_000, HF);
        add(&pool, deregister_tx(950, 3), 60).unwrap();

        // Same decision in a distinguishable transaction.
        let mut dup = deregister_tx(950, 3);
        dup.unlock_time = 1;
        let err = add(&pool, dup, 60).unwrap_err();
        assert!(matches!(
            err,
            MempoolError::DuplicateDeregister { height: 950, index: 3 }
        ));

        // A different decision is fine.
        add(&pool, deregister_tx(950, 4), 60).unwrap();
    }

    #[test]
    fn kept_by_block_survives_failing_inputs() {
        let (pool, chain) = pool_at(1_000, HF);
        *chain.fail_inputs.write() = true;

        let tx = transfer_tx(2, 10_000);
        let id = tx.hash();
        let blob = tx.to_bytes();
        let err = pool
            .add_tx_with(
                tx.clone(),
                id,
                blob.clone(),
                100,
                RelayMethod::Fluff,
                false,
                HF,
                NOW,
            )
            .unwrap_err();
        assert!(matches!(err, MempoolError::InvalidInput));

        let result = pool
            .add_tx_with(tx, id, blob, 100, RelayMethod::Block, true, HF, NOW)
            .unwrap();
        assert!(result.flags.verification_impossible);
        assert!(result.flags.added_to_pool);
        assert!(pool.get(&id).unwrap().meta.kept_by_block);
    }

    #[test]
    fn take_then_readd_restores_pool_state() {
        let (pool, _) = pool_at(1_000, HF);
        let tx = transfer_tx(3, 10_000);
        let id = tx.hash();
        add(&pool, tx, 100).unwrap();
        let weight_before = pool.weight();

        let taken = pool.take_tx(&id).unwrap();
        assert!(!pool.contains(&id));
        assert_eq!(pool.weight(), 0);
        assert!(!pool.is_key_image_spent(&KeyImage::from_bytes([3; 32])));

        pool.add_tx_with(
            taken.tx,
            id,
            taken.blob,
            taken.weight,
            RelayMethod::Fluff,
            taken.relayed,
            HF,
            NOW + 5,
        )
        .unwrap();
        assert!(pool.contains(&id));
        assert_eq!(pool.weight(), weight_before);
        assert!(pool.is_key_image_spent(&KeyImage::from_bytes([3; 32])));
    }

    #[test]
    fn prune_sheds_low_fee_but_keeps_fresh_deregisters() {
        let (pool, _) = pool_at(1_000, HF);
        pool.set_max_weight(250);

        // One fresh deregister and three equal-fee transfers.
        add(&pool, deregister_tx(990, 0), 50).unwrap();
        for tag in 1..=3u8 {
            add(&pool, transfer_tx(tag, 10_000), 100).unwrap();
        }

        assert!(pool.weight() <= 250);
        // The deregister survived even at zero fee.
        assert_eq!(
            pool.transactions()
                .iter()
                .filter(|tx| tx.is_deregister())
                .count(),
            1
        );
    }

    #[test]
    fn stuck_sweep_honours_lifetimes() {
        let (pool, _) = pool_at(1_000, HF);
        add(&pool, transfer_tx(1, 10_000), 100).unwrap();
        add(&pool, deregister_tx(990, 0), 50).unwrap();
        let transfer_id = transfer_tx(1, 10_000).hash();

        // Deregisters age out first.
        let swept = pool.remove_stuck_transactions(NOW + MEMPOOL_PRUNE_DEREGISTER_LIFETIME + 1);
        assert_eq!(swept, 1);
        assert!(pool.contains(&transfer_id));

        // Transfers age out after the standard lifetime.
        let swept = pool.remove_stuck_transactions(NOW + MEMPOOL_TX_LIVETIME + 1);
        assert_eq!(swept, 1);
        assert!(pool.is_empty());

        // A timed-out transaction is refused re-admission.
        let err = add(&pool, transfer_tx(1, 10_000), 100).unwrap_err();
        assert!(matches!(err, MempoolError::TimedOut(_)));
    }

    #[test]
    fn stem_embargo_deadline_is_in_the_future() {
        let (pool, _) = pool_at(1_000, HF);
        let tx = transfer_tx(4, 10_000);
        let id = tx.hash();
        let blob = tx.to_bytes();
        pool.add_tx_with(tx, id, blob, 100, RelayMethod::Stem, false, HF, NOW)
            .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        pool.set_relayed(&[id], RelayMethod::Stem, NOW, &mut rng);
        let meta = pool.get(&id).unwrap().meta;
        assert!(meta.dandelion_stem());
        assert!(meta.last_relayed_time >= NOW);

        // Fluffing stamps the plain relay time.
        pool.set_relayed(&[id], RelayMethod::Fluff, NOW + 10, &mut rng);
        let meta = pool.get(&id).unwrap().meta;
        assert_eq!(meta.relay_method, RelayMethod::Fluff);
        assert_eq!(meta.last_relayed_time, NOW + 10);
    }

    #[test]
    fn relayable_respects_backoff_and_age() {
        use crate::MAX_RELAY_TIME;

        let (pool, _) = pool_at(1_000, HF);
        let tx = transfer_tx(5, 10_000);
        let id = tx.hash();
        add(&pool, tx, 100).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        pool.set_relayed(&[id], RelayMethod::Fluff, NOW, &mut rng);

        // Just relayed: not due.
        assert!(pool.relayable_transactions(NOW + 1).is_empty());
        // The backoff keeps growing with age until it hits the ceiling, so
        // a freshly relayed transaction only comes due past the maximum.
        assert!(pool
            .relayable_transactions(NOW + MAX_RELAY_TIME)
            .is_empty());
        let due = pool.relayable_transactions(NOW + MAX_RELAY_TIME + 2);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, id);
        // Past half the lifetime: silenced for flap avoidance.
        assert!(pool
            .relayable_transactions(NOW + MEMPOOL_TX_LIVETIME / 2 + 1)
            .is_empty());
    }

    #[test]
    fn template_never_double_spends_and_caps_weight() {
        let (pool, _) = pool_at(1_000, HF);

        add(&pool, transfer_tx(1, 50_000), 100).unwrap();
        add(&pool, transfer_tx(2, 40_000), 100).unwrap();
        // Conflicts with tag 1 but arrives kept-by-block, so both sit in
        // the pool.
        let mut conflicting = transfer_tx(1, 60_000);
        conflicting.outputs[0].amount = 7;
        let conflicting_id = conflicting.hash();
        let blob = conflicting.to_bytes();
        pool.add_tx_with(
            conflicting,
            conflicting_id,
            blob,
            100,
            RelayMethod::Block,
            true,
            HF,
            NOW,
        )
        .unwrap();

        let template = pool.fill_block_template(1_000_000, HF).unwrap();
        let images_selected: Vec<_> = template
            .tx_hashes
            .iter()
            .map(|id| pool.get(id).unwrap().tx.key_images()[0])
            .collect();
        let unique: HashSet<_> = images_selected.iter().copied().collect();
        assert_eq!(images_selected.len(), unique.len());
        assert!(template.total_weight <= 2 * 1_000_000 - COINBASE_BLOB_RESERVED_SIZE);
        assert!(template.fee > 0);
        assert!(template.expected_reward > 0);
    }

    #[test]
    fn template_skips_stale_deregisters() {
        let (pool, _) = pool_at(1_000, HF);
        // Voted far beyond the deregister lifetime at hard fork 9.
        add(&pool, deregister_tx(1_000 - DEREGISTER_LIFETIME_V2 - 5, 0), 50).unwrap();
        add(&pool, deregister_tx(1_000 - 2, 1), 50).unwrap();

        let template = pool.fill_block_template(1_000_000, HF).unwrap();
        assert_eq!(template.tx_hashes.len(), 1);
        let selected = pool.get(&template.tx_hashes[0]).unwrap();
        assert_eq!(selected.tx.deregistration().unwrap().service_node_index, 1);
    }

    #[test]
    fn template_skips_chain_spent_images() {
        let (pool, chain) = pool_at(1_000, HF);
        let tx = transfer_tx(9, 10_000);
        add(&pool, tx.clone(), 100).unwrap();
        chain
            .spent_on_chain
            .write()
            .insert(KeyImage::from_bytes([9; 32]));

        let template = pool.fill_block_template(1_000_000, HF).unwrap();
        assert!(template.tx_hashes.is_empty());
        // The failed readiness check marked the double spend.
        assert!(pool.get(&tx.hash()).unwrap().meta.double_spend_seen);
    }

    #[test]
    fn stats_reflect_contents() {
        let (pool, _) = pool_at(1_000, HF);
        add(&pool, transfer_tx(1, 10_000), 100).unwrap();
        add(&pool, transfer_tx(2, 30_000), 300).unwrap();

        let stats = pool.stats(NOW + 1);
        assert_eq!(stats.txs_total, 2);
        assert_eq!(stats.bytes_total, 400);
        assert_eq!(stats.bytes_min, 100);
        assert_eq!(stats.bytes_max, 300);
        assert_eq!(stats.fee_total, 40_000);
        assert_eq!(stats.oldest, NOW);
        // Every transaction lands in exactly one age bucket.
        let bucketed: usize = stats.histo.iter().map(|b| b.txs).sum();
        assert_eq!(bucketed, 2);
        let bucketed_bytes: u64 = stats.histo.iter().map(|b| b.bytes).sum();
        assert_eq!(bucketed_bytes, 400);
    }

    #[test]
    fn complement_returns_unlisted_broadcast_blobs() {
        let (pool, _) = pool_at(1_000, HF);
        let tx_a = transfer_tx(1, 10_000);
        let tx_b = transfer_tx(2, 10_000);
        let id_a = tx_a.hash();
        add(&pool, tx_a, 100).unwrap();
        add(&pool, tx_b.clone(), 100).unwrap();

        let missing = pool.complement(&[id_a]);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0], tx_b.to_bytes());
        assert!(pool.complement(&pool.transaction_hashes()).is_empty());
    }
}
