//! The service-node registry state machine.
//!
//! A single owning state object guarded by one mutex: the block-processing
//! thread drives `block_added`/`blockchain_detached`, everything else is a
//! read that copies out under the same lock.

use crate::info::{Contribution, InfoVersion, ServiceNodeInfo, UNASSIGNED_SWARM_ID};
use crate::quorum::{deregister_lifetime, QuorumState};
use crate::rollback::RollbackEvent;
use crate::store::{deserialize_state, serialize_state, PersistedState, RegistryStore};
use crate::swarm::{calc_swarm_changes, SwarmId};
use crate::{RegistryError, RegistryResult, ROLLBACK_EVENT_EXPIRATION_BLOCKS};
use meridian_consensus::staking::{
    check_service_node_portions, mul_div, portions_to_amount, staking_requirement,
};
use meridian_consensus::{
    hard_fork_height, hard_fork_version_at, staking_lock_blocks, validate_service_node_rewards,
    Network, RewardParts, COIN, FEE_BURNING_VERSION, MAX_NUMBER_OF_CONTRIBUTORS,
    MAX_NUMBER_OF_CONTRIBUTORS_V2, MAX_NUMBER_OF_CONTRIBUTORS_V3, MAX_OPERATOR_V12,
    MAX_POOL_STAKERS_V12, MIN_OPERATOR_V12, MIN_POOL_STAKERS_V12, SERVICE_NODE_VERSION,
    STAKING_LOCK_BLOCKS_EXCESS, STAKING_PORTIONS,
};
use meridian_types::crypto::{derive_public_key, generate_key_derivation, registration_hash};
use meridian_types::{
    AccountAddress, Block, Hash, PublicKey, Transaction, TxOutputTarget, TxType,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Heights above which unlock times are interpreted as timestamps.
const MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// A registry entry paired with its key, for read snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNodePubkeyInfo {
    pub pubkey: PublicKey,
    pub info: ServiceNodeInfo,
}

#[derive(Default)]
struct RegistryState {
    infos: HashMap<PublicKey, ServiceNodeInfo>,
    rollback_events: VecDeque<RollbackEvent>,
    quorum_states: BTreeMap<u64, Arc<QuorumState>>,
    height: u64,
}

/// The bonded service-node registry.
pub struct ServiceNodeList {
    network: Network,
    state: Mutex<RegistryState>,
    store: Option<Box<dyn RegistryStore>>,
    my_pubkey: Option<PublicKey>,
}

impl ServiceNodeList {
    /// A fresh registry positioned at the service-node activation height.
    pub fn new(network: Network) -> Self {
        let mut list = Self {
            network,
            state: Mutex::new(RegistryState::default()),
            store: None,
            my_pubkey: None,
        };
        list.reset_cursor();
        list
    }

    /// Attach a persistence backend.
    pub fn with_store(mut self, store: Box<dyn RegistryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Mark the local operator's node so its lifecycle is logged loudly.
    pub fn set_my_service_node_key(&mut self, pubkey: PublicKey) {
        self.my_pubkey = Some(pubkey);
    }

    fn reset_cursor(&mut self) {
        let activation = hard_fork_height(self.network, SERVICE_NODE_VERSION).unwrap_or(0);
        let mut state = self.state.lock();
        *state = RegistryState::default();
        state.height = activation;
    }

    /// The registry cursor: the next height to be applied.
    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    /// Wipe all state back to the activation height, dropping any persisted
    /// snapshot. Used when a detach fell off the journal horizon.
    pub fn clear(&mut self, delete_persisted: bool) {
        self.reset_cursor();
        if delete_persisted {
            if let Some(store) = &self.store {
                if let Err(e) = store.clear() {
                    warn!(error = %e, "failed to clear persisted registry state");
                }
            }
        }
    }

    /// Apply a block at the registry cursor.
    ///
    /// Fails fatally when the block height does not equal the cursor.
    #[instrument(skip_all, fields(height = block.height()))]
    pub fn block_added(&self, block: &Block, txs: &[Transaction]) -> RegistryResult<()> {
        {
            let mut state = self.state.lock();
            self.process_block(&mut state, block, txs)?;
        }
        self.persist();
        Ok(())
    }

    fn process_block(
        &self,
        state: &mut RegistryState,
        block: &Block,
        txs: &[Transaction],
    ) -> RegistryResult<()> {
        let block_height = block.height();
        let hf = hard_fork_version_at(self.network, block_height);
        if hf < SERVICE_NODE_VERSION {
            return Ok(());
        }

        if state.height != block_height {
            return Err(RegistryError::HeightInvariantBroken {
                cursor: state.height,
                block: block_height,
            });
        }
        state.height += 1;

        // Cull the journal and pin the new horizon.
        let cull_height = block_height.saturating_sub(ROLLBACK_EVENT_EXPIRATION_BLOCKS);
        while state
            .rollback_events
            .front()
            .is_some_and(|e| e.block_height() < cull_height)
        {
            state.rollback_events.pop_front();
        }
        state
            .rollback_events
            .push_front(RollbackEvent::PreventBefore {
                block_height: cull_height,
            });

        // Expiry.
        let mut expired_count = 0usize;
        for pubkey in self.expired_nodes(state, block_height) {
            if let Some(info) = state.infos.remove(&pubkey) {
                if self.my_pubkey == Some(pubkey) {
                    info!(%pubkey, height = block_height, "service node expired (yours)");
                } else {
                    debug!(%pubkey, height = block_height, "service node expired");
                }
                state.rollback_events.push_back(RollbackEvent::Change {
                    block_height,
                    key: pubkey,
                    prior: info,
                });
                expired_count += 1;
            }
        }

        // Winner bump: the paid node goes to the back of the queue, with
        // the transaction index pinned above any real transaction.
        let winner_pubkey = block.miner_tx.service_node_winner();
        if let Some(info) = state.infos.get_mut(&winner_pubkey) {
            let prior = info.clone();
            info.last_reward_block_height = block_height;
            info.last_reward_transaction_index = u32::MAX;
            state.rollback_events.push_back(RollbackEvent::Change {
                block_height,
                key: winner_pubkey,
                prior,
            });
        }

        let mut registrations = 0usize;
        let mut deregistrations = 0usize;
        for (index, tx) in txs.iter().enumerate() {
            let index = index as u32;
            if (hf >= 18 && tx.tx_type == TxType::Stake)
                || (hf <= 17 && tx.tx_type == TxType::Standard)
            {
                if self.try_register(state, tx, block.timestamp, block_height, index, hf) {
                    registrations += 1;
                }
                self.try_contribution(state, tx, block_height, index, hf);
            } else if hf >= 18 && tx.tx_type == TxType::Swap {
                self.try_swap(tx, block_height);
            } else if tx.tx_type == TxType::Deregister {
                if self.try_deregister(state, tx, block_height) {
                    deregistrations += 1;
                }
            }
        }

        if registrations + deregistrations + expired_count > 0 {
            self.update_swarms(state, block_height, &block.hash());
        }

        // Cache the quorum for this height and evict outside the window.
        let quorum_lifetime = 6 * deregister_lifetime(hf);
        let cache_from = block_height.saturating_sub(quorum_lifetime);
        let eligible = self.eligible_pubkeys(state, hf);
        state.quorum_states.insert(
            block_height,
            Arc::new(QuorumState::select(&eligible, &block.hash())),
        );
        while state
            .quorum_states
            .first_key_value()
            .is_some_and(|(&h, _)| h < cache_from)
        {
            state.quorum_states.pop_first();
        }

        debug!(
            height = block_height,
            registrations,
            deregistrations,
            expired = expired_count,
            nodes = state.infos.len(),
            "block applied to registry"
        );
        Ok(())
    }

    /// Roll the registry back so the cursor rests at `height`.
    ///
    /// Fails with `UnreachableRollback` when the journal horizon lies above
    /// the target; the caller must then `clear` and rescan.
    #[instrument(skip(self))]
    pub fn blockchain_detached(&self, height: u64) -> RegistryResult<()> {
        let result = {
            let mut state = self.state.lock();
            let mut result = Ok(());
            loop {
                let past_target = state
                    .rollback_events
                    .back()
                    .is_some_and(|e| e.block_height() >= height);
                if !past_target {
                    break;
                }
                let Some(event) = state.rollback_events.pop_back() else {
                    break;
                };
                if !event.apply(&mut state.infos) {
                    result = Err(RegistryError::UnreachableRollback(height));
                    break;
                }
            }

            while state
                .quorum_states
                .last_key_value()
                .is_some_and(|(&h, _)| h >= height)
            {
                state.quorum_states.pop_last();
            }

            state.height = height;
            result
        };
        self.persist();
        result
    }

    // ---- reads ------------------------------------------------------

    /// Eligible pubkeys at the cursor, sorted by byte order.
    pub fn service_nodes_pubkeys(&self) -> Vec<PublicKey> {
        let state = self.state.lock();
        let hf = hard_fork_version_at(self.network, state.height);
        self.eligible_pubkeys(&state, hf)
    }

    fn eligible_pubkeys(&self, state: &RegistryState, hf: u8) -> Vec<PublicKey> {
        let mut keys: Vec<PublicKey> = state
            .infos
            .iter()
            .filter(|(_, info)| (info.is_valid() && hf > 9) || info.is_fully_funded())
            .map(|(&key, _)| key)
            .collect();
        keys.sort();
        keys
    }

    /// Whether the key is a currently eligible service node.
    pub fn is_service_node(&self, pubkey: &PublicKey) -> bool {
        let state = self.state.lock();
        let hf = hard_fork_version_at(self.network, state.height);
        state
            .infos
            .get(pubkey)
            .is_some_and(|info| (hf > 9 && info.is_valid()) || info.is_fully_funded())
    }

    /// Snapshot entries for the given keys, or every entry when empty.
    pub fn state_for_keys(&self, pubkeys: &[PublicKey]) -> Vec<ServiceNodePubkeyInfo> {
        let state = self.state.lock();
        if pubkeys.is_empty() {
            state
                .infos
                .iter()
                .map(|(&pubkey, info)| ServiceNodePubkeyInfo {
                    pubkey,
                    info: info.clone(),
                })
                .collect()
        } else {
            pubkeys
                .iter()
                .filter_map(|key| {
                    state.infos.get(key).map(|info| ServiceNodePubkeyInfo {
                        pubkey: *key,
                        info: info.clone(),
                    })
                })
                .collect()
        }
    }

    /// The quorum selected at a height, if it is still retained.
    pub fn quorum_state(&self, height: u64) -> Option<Arc<QuorumState>> {
        self.state.lock().quorum_states.get(&height).cloned()
    }

    /// Select the node owed the next reward: minimum
    /// `(last_reward_block_height, last_reward_transaction_index)`.
    pub fn select_winner(&self) -> PublicKey {
        let state = self.state.lock();
        let hf = hard_fork_version_at(self.network, state.height);
        Self::select_winner_locked(&state, hf)
    }

    fn select_winner_locked(state: &RegistryState, hf: u8) -> PublicKey {
        let mut oldest_waiting = (u64::MAX, u32::MAX);
        let mut winner = PublicKey::NULL;
        for (key, info) in &state.infos {
            let over_portioned = hf == 12
                && info.total_contributed
                    < portions_to_amount(info.portions_for_operator, info.staking_requirement);
            if (info.is_valid() && hf > 9) || (info.is_fully_funded() && !over_portioned) {
                let waiting_since = (
                    info.last_reward_block_height,
                    info.last_reward_transaction_index,
                );
                if waiting_since < oldest_waiting {
                    oldest_waiting = waiting_since;
                    winner = *key;
                }
            }
        }
        winner
    }

    /// The winner's contributor payout portions, operator-basis rules by
    /// hard fork. The null winner takes every portion.
    pub fn winner_addresses_and_portions(&self) -> Vec<(AccountAddress, u64)> {
        let state = self.state.lock();
        let hf = hard_fork_version_at(self.network, state.height);
        let winner = Self::select_winner_locked(&state, hf);
        let Some(info) = state.infos.get(&winner) else {
            return vec![(AccountAddress::NULL, STAKING_PORTIONS)];
        };

        let operator_portions = info.portions_for_operator;
        let mut winners = Vec::with_capacity(info.contributors.len());
        for contributor in &info.contributors {
            let portions = if hf < 12 {
                let remaining = STAKING_PORTIONS - operator_portions;
                let mut portions =
                    mul_div(contributor.amount, remaining, info.staking_requirement);
                if contributor.address == info.operator_address {
                    portions += operator_portions;
                }
                portions
            } else if hf < 17 {
                let basis = if contributor.address == info.operator_address {
                    MAX_OPERATOR_V12 * COIN
                } else {
                    MAX_POOL_STAKERS_V12 * COIN
                };
                mul_div(contributor.amount, STAKING_PORTIONS, basis)
            } else {
                mul_div(contributor.amount, STAKING_PORTIONS, info.staking_requirement)
            };
            winners.push((contributor.address, portions));
        }
        winners
    }

    /// Validate the coinbase of the next block against the registry's
    /// expected winner and payout rows.
    pub fn validate_miner_tx(
        &self,
        miner_tx: &Transaction,
        height: u64,
        hf: u8,
        reward_parts: &RewardParts,
    ) -> RegistryResult<()> {
        if hf < SERVICE_NODE_VERSION {
            return Ok(());
        }
        let winner = self.select_winner();
        let addresses_and_portions = self.winner_addresses_and_portions();
        validate_service_node_rewards(
            miner_tx,
            height,
            hf,
            reward_parts,
            winner,
            &addresses_and_portions,
        )
        .map_err(RegistryError::Consensus)
    }

    // ---- transaction processing -------------------------------------

    fn contribution_output_has_correct_unlock_time(
        &self,
        tx: &Transaction,
        index: usize,
        ref_height: u64,
    ) -> bool {
        let unlock_time = tx.output_unlock_time(index);
        unlock_time < MAX_BLOCK_NUMBER
            && unlock_time >= ref_height + staking_lock_blocks(self.network)
    }

    /// Sum the outputs addressed to the contributor named in the extra,
    /// counting only outputs locked long enough relative to `ref_height`.
    fn get_contribution(&self, tx: &Transaction, ref_height: u64) -> Option<(AccountAddress, u64)> {
        let address = tx.contributor()?;
        let tx_key = tx.tx_secret_key()?;
        let derivation = generate_key_derivation(&address.view, &tx_key).ok()?;

        let mut transferred = 0u64;
        for (i, output) in tx.outputs.iter().enumerate() {
            if !self.contribution_output_has_correct_unlock_time(tx, i, ref_height) {
                continue;
            }
            let TxOutputTarget::ToKey(output_key) = output.target else {
                continue;
            };
            let Ok(expected) = derive_public_key(&derivation, i as u64, &address.spend) else {
                continue;
            };
            if expected == output_key {
                transferred += output.amount;
            }
        }
        Some((address, transferred))
    }

    fn registration_from_tx(
        &self,
        tx: &Transaction,
        block_timestamp: u64,
        block_height: u64,
        index: u32,
        hf: u8,
    ) -> Option<(PublicKey, ServiceNodeInfo)> {
        let registration = tx.registration()?;
        let service_node_key = tx.service_node_pubkey()?;

        let addresses = registration.addresses();
        if registration.portions.len() != addresses.len() || registration.portions.is_empty() {
            return None;
        }
        if !check_service_node_portions(&registration.portions) {
            return None;
        }
        if registration.portions_for_operator > STAKING_PORTIONS {
            return None;
        }

        let hash = registration_hash(
            &addresses,
            registration.portions_for_operator,
            &registration.portions,
            registration.expiration_timestamp,
        );
        if !meridian_types::crypto::check_signature(&hash, &service_node_key, &registration.signature)
        {
            return None;
        }
        if registration.expiration_timestamp < block_timestamp {
            return None;
        }

        let requirement = staking_requirement(self.network, block_height);

        let (address, transferred) = self.get_contribution(tx, block_height)?;
        let is_new_address = usize::from(!addresses.contains(&address));
        if addresses.len() + is_new_address > MAX_NUMBER_OF_CONTRIBUTORS {
            return None;
        }

        if hf < 12 && transferred < requirement / MAX_NUMBER_OF_CONTRIBUTORS as u64 {
            return None;
        }
        if hf >= 12 {
            let burn_fee = tx.fee - tx.miner_fee(hf >= FEE_BURNING_VERSION);
            if tx.burned_amount() < burn_fee {
                return None;
            }
            if transferred < MIN_OPERATOR_V12 * COIN {
                return None;
            }
        }
        if (12..17).contains(&hf) && transferred > MAX_OPERATOR_V12 * COIN {
            return None;
        }

        let mut info = ServiceNodeInfo {
            version: InfoVersion::WithSwarm,
            registration_height: block_height,
            last_reward_block_height: block_height,
            last_reward_transaction_index: index,
            staking_requirement: requirement,
            portions_for_operator: registration.portions_for_operator,
            swarm_id: UNASSIGNED_SWARM_ID,
            operator_address: addresses[0],
            ..Default::default()
        };

        let basis = if (12..17).contains(&hf) {
            MAX_OPERATOR_V12 * COIN
        } else {
            requirement
        };
        for (i, address) in addresses.iter().enumerate() {
            if addresses[..i].contains(address) {
                return None;
            }
            let reserved = mul_div(basis, registration.portions[i], STAKING_PORTIONS);
            info.contributors.push(Contribution::reserved(reserved, *address));
            info.total_reserved += reserved;
        }

        Some((service_node_key, info))
    }

    fn try_register(
        &self,
        state: &mut RegistryState,
        tx: &Transaction,
        block_timestamp: u64,
        block_height: u64,
        index: u32,
        hf: u8,
    ) -> bool {
        let Some((key, mut info)) =
            self.registration_from_tx(tx, block_timestamp, block_height, index, hf)
        else {
            return false;
        };

        // A node lingers past its lock as a grace period; re-registration
        // inside the grace window keeps its reward position.
        let mut registered_during_grace_period = false;
        if let Some(old_info) = state.infos.get(&key) {
            let expiry_height =
                old_info.registration_height + staking_lock_blocks(self.network);
            if block_height < expiry_height {
                return false;
            }
            registered_during_grace_period = true;
            info.last_reward_block_height = old_info.last_reward_block_height;
            info.last_reward_transaction_index = old_info.last_reward_transaction_index;
        }

        if self.my_pubkey == Some(key) {
            info!(
                %key,
                height = block_height,
                grace = registered_during_grace_period,
                "service node registered (yours)"
            );
        } else {
            debug!(%key, height = block_height, "new service node registered");
        }

        state
            .rollback_events
            .push_back(RollbackEvent::New { block_height, key });
        state.infos.insert(key, info);
        true
    }

    fn try_contribution(
        &self,
        state: &mut RegistryState,
        tx: &Transaction,
        block_height: u64,
        index: u32,
        hf: u8,
    ) {
        let Some(pubkey) = tx.service_node_pubkey() else {
            return;
        };
        let Some(info) = state.infos.get(&pubkey) else {
            return;
        };

        let unlock_ref_height = if hf >= 12 {
            info.registration_height
        } else {
            block_height
        };
        let Some((address, mut transferred)) = self.get_contribution(tx, unlock_ref_height) else {
            return;
        };
        if info.is_fully_funded() {
            return;
        }

        if hf >= 12 {
            let burn_fee = tx.fee - tx.miner_fee(hf >= FEE_BURNING_VERSION);
            let required_burn = if hf < 16 { transferred / 1_000 } else { 1 };
            if burn_fee < required_burn {
                return;
            }
            if tx.burned_amount() < burn_fee {
                return;
            }
            if transferred < MIN_POOL_STAKERS_V12 * COIN {
                return;
            }
        }
        if (12..17).contains(&hf) && transferred > MAX_POOL_STAKERS_V12 * COIN {
            return;
        }

        let max_contributors = if hf > 11 {
            MAX_NUMBER_OF_CONTRIBUTORS_V3
        } else if hf > 9 {
            MAX_NUMBER_OF_CONTRIBUTORS_V2
        } else {
            MAX_NUMBER_OF_CONTRIBUTORS
        };

        let existing = info
            .contributors
            .iter()
            .position(|c| c.address == address);
        if existing.is_none()
            && (info.contributors.len() >= max_contributors
                || transferred < info.min_contribution(hf))
        {
            return;
        }

        let prior = info.clone();
        state.rollback_events.push_back(RollbackEvent::Change {
            block_height,
            key: pubkey,
            prior,
        });

        let Some(info) = state.infos.get_mut(&pubkey) else {
            return;
        };
        let slot = match existing {
            Some(i) => i,
            None => {
                info.contributors.push(Contribution::reserved(0, address));
                info.contributors.len() - 1
            }
        };

        let reserve_ceiling = if hf < 12 {
            info.staking_requirement
        } else if hf < 17 {
            MAX_POOL_STAKERS_V12 * COIN
        } else {
            info.staking_requirement
        };

        // The reservation pool must never overrun the ceiling.
        let can_increase_reserved_by = reserve_ceiling.saturating_sub(info.total_reserved);
        let contributor = &mut info.contributors[slot];
        let max_amount = contributor.reserved + can_increase_reserved_by;
        transferred = transferred.min(max_amount - contributor.amount);

        contributor.amount += transferred;
        if contributor.amount > contributor.reserved {
            let excess = contributor.amount - contributor.reserved;
            contributor.reserved = contributor.amount;
            info.total_reserved += excess;
        }
        info.total_contributed += transferred;
        info.last_reward_block_height = block_height;
        info.last_reward_transaction_index = index;

        debug!(%pubkey, transferred, height = block_height, "contribution received");
    }

    fn try_deregister(&self, state: &mut RegistryState, tx: &Transaction, block_height: u64) -> bool {
        if tx.tx_type != TxType::Deregister {
            return false;
        }
        let Some(deregister) = tx.deregistration() else {
            error!("deregister transaction carries no deregister extra");
            return false;
        };

        let Some(quorum) = state.quorum_states.get(&deregister.block_height).cloned() else {
            error!(
                voted_height = deregister.block_height,
                "quorum state for the voted height is not retained"
            );
            return false;
        };
        let Some(&key) = quorum
            .nodes_to_test
            .get(deregister.service_node_index as usize)
        else {
            error!(
                index = deregister.service_node_index,
                "service node index to vote off is out of bounds"
            );
            return false;
        };

        let Some(prior) = state.infos.remove(&key) else {
            return false;
        };
        if self.my_pubkey == Some(key) {
            warn!(%key, height = block_height, "service node deregistered (yours)");
        } else {
            debug!(%key, height = block_height, "service node deregistered");
        }
        state.rollback_events.push_back(RollbackEvent::Change {
            block_height,
            key,
            prior,
        });
        true
    }

    /// Validate a swap burn: the outputs addressed to the named contributor
    /// must sum to the amount declared in the memo.
    fn try_swap(&self, tx: &Transaction, block_height: u64) -> bool {
        let Some(memo) = tx.memo() else {
            return false;
        };
        let Some((_, transferred)) = self.get_contribution(tx, block_height) else {
            return false;
        };

        let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&memo) else {
            return false;
        };
        let Some(object) = parsed.as_object() else {
            return false;
        };
        if !object.contains_key("network") || !object.contains_key("address") {
            return false;
        }
        let Some(amount) = object.get("amount").and_then(|v| v.as_str()) else {
            return false;
        };
        amount == transferred.to_string()
    }

    fn expired_nodes(&self, state: &RegistryState, block_height: u64) -> Vec<PublicKey> {
        let lock_blocks = staking_lock_blocks(self.network) + STAKING_LOCK_BLOCKS_EXCESS;
        if block_height < lock_blocks {
            return Vec::new();
        }
        state
            .infos
            .iter()
            .filter(|(_, info)| block_height > info.registration_height + lock_blocks)
            .map(|(&key, _)| key)
            .collect()
    }

    fn update_swarms(&self, state: &mut RegistryState, height: u64, block_hash: &Hash) {
        let seed = block_hash.low_u64_le();

        let mut existing_swarms: BTreeMap<SwarmId, Vec<PublicKey>> = BTreeMap::new();
        for (&key, info) in &state.infos {
            existing_swarms.entry(info.swarm_id).or_default().push(key);
        }

        calc_swarm_changes(&mut existing_swarms, seed);

        for (swarm_id, keys) in existing_swarms {
            for key in keys {
                let Some(info) = state.infos.get_mut(&key) else {
                    continue;
                };
                if info.swarm_id == swarm_id {
                    continue;
                }
                let prior = info.clone();
                info.swarm_id = swarm_id;
                state.rollback_events.push_back(RollbackEvent::Change {
                    block_height: height,
                    key,
                    prior,
                });
            }
        }
    }

    // ---- persistence ------------------------------------------------

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = {
            let state = self.state.lock();
            let mut infos: Vec<(PublicKey, ServiceNodeInfo)> = state
                .infos
                .iter()
                .map(|(&key, info)| (key, info.clone()))
                .collect();
            infos.sort_by_key(|(key, _)| *key);
            PersistedState {
                height: state.height,
                infos,
                quorum_states: state
                    .quorum_states
                    .iter()
                    .map(|(&h, q)| (h, (**q).clone()))
                    .collect(),
                events: state.rollback_events.iter().cloned().collect(),
            }
        };
        if let Err(e) = store.save(&serialize_state(&snapshot)) {
            warn!(error = %e, "failed to persist registry state");
        }
    }

    /// Restore state from the attached store. Returns `NoPersistedState`
    /// when the store is empty.
    pub fn load(&self) -> RegistryResult<()> {
        let Some(store) = &self.store else {
            return Err(RegistryError::NoPersistedState);
        };
        let Some(blob) = store.load()? else {
            return Err(RegistryError::NoPersistedState);
        };
        let persisted = deserialize_state(&blob)?;

        let mut state = self.state.lock();
        state.infos = persisted.infos.into_iter().collect();
        state.quorum_states = persisted
            .quorum_states
            .into_iter()
            .map(|(h, q)| (h, Arc::new(q)))
            .collect();
        state.rollback_events = persisted.events.into();
        state.height = persisted.height;
        info!(
            height = state.height,
            nodes = state.infos.len(),
            events = state.rollback_events.len(),
            "registry state loaded"
        );
        Ok(())
    }

    /// A full snapshot of the current state, for equality checks and
    /// external persistence.
    pub fn snapshot(&self) -> PersistedState {
        let state = self.state.lock();
        let mut infos: Vec<(PublicKey, ServiceNodeInfo)> = state
            .infos
            .iter()
            .map(|(&key, info)| (key, info.clone()))
            .collect();
        infos.sort_by_key(|(key, _)| *key);
        PersistedState {
            height: state.height,
            infos,
            quorum_states: state
                .quorum_states
                .iter()
                .map(|(&h, q)| (h, (**q).clone()))
                .collect(),
            events: state.rollback_events.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for ServiceNodeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ServiceNodeList")
            .field("network", &self.network)
            .field("height", &state.height)
            .field("nodes", &state.infos.len())
            .field("journal", &state.rollback_events.len())
            .field("quorums", &state.quorum_states.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use ed25519_dalek::SigningKey;
    use meridian_consensus::{block_reward_parts, construct_miner_tx, MinerTxContext};
    use meridian_types::crypto::{
        generate_keypair, generate_service_node_keys, sign_hash, Keypair,
    };
    use meridian_types::{
        serialize_extra, CoinbaseInput, RegisterExtra, SecretKey, TxExtraField, TxInput, TxOutput,
        TxVersion,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const NET: Network = Network::Fakechain;
    /// Service-node activation height on the fakechain (mainnet table).
    const START: u64 = 106_950;
    const GENERATED: u64 = 100_000_000_000;

    struct Wallet {
        spend: Keypair,
        view: Keypair,
    }

    impl Wallet {
        fn new(rng: &mut StdRng) -> Wallet {
            Wallet {
                spend: generate_keypair(rng),
                view: generate_keypair(rng),
            }
        }

        fn address(&self) -> AccountAddress {
            AccountAddress::new(self.spend.public, self.view.public)
        }
    }

    struct NodeKeys {
        pubkey: PublicKey,
        signing: SigningKey,
    }

    fn node_keys(rng: &mut StdRng) -> NodeKeys {
        let (pubkey, signing) = generate_service_node_keys(rng);
        NodeKeys { pubkey, signing }
    }

    /// A staking output addressed to `wallet` worth `amount`.
    fn staked_output(
        wallet: &Wallet,
        tx_key: &Keypair,
        index: u64,
        amount: u64,
    ) -> TxOutput {
        let derivation = generate_key_derivation(&wallet.address().view, &tx_key.secret).unwrap();
        let key = derive_public_key(&derivation, index, &wallet.address().spend).unwrap();
        TxOutput {
            amount,
            target: TxOutputTarget::ToKey(key),
        }
    }

    fn registration_tx(
        rng: &mut StdRng,
        node: &NodeKeys,
        wallet: &Wallet,
        amount: u64,
        height: u64,
    ) -> Transaction {
        let tx_key = generate_keypair(rng);
        let addresses = vec![wallet.address()];
        let portions = vec![STAKING_PORTIONS];
        let expiration = 4_000_000_000;
        let hash = registration_hash(&addresses, 0, &portions, expiration);
        let signature = sign_hash(&hash, &node.signing);

        Transaction {
            version: TxVersion::V2,
            tx_type: TxType::Standard,
            unlock_time: height + staking_lock_blocks(NET),
            inputs: vec![],
            outputs: vec![staked_output(wallet, &tx_key, 0, amount)],
            extra: serialize_extra(&[
                TxExtraField::Register(RegisterExtra {
                    public_spend_keys: vec![wallet.address().spend],
                    public_view_keys: vec![wallet.address().view],
                    portions_for_operator: 0,
                    portions,
                    expiration_timestamp: expiration,
                    signature,
                }),
                TxExtraField::ServiceNodePubkey(node.pubkey),
                TxExtraField::Contributor(wallet.address()),
                TxExtraField::TxSecretKey(SecretKey(tx_key.secret.0)),
            ]),
            ..Default::default()
        }
    }

    fn deregister_tx(voted_height: u64, index: u32) -> Transaction {
        Transaction {
            version: TxVersion::V2,
            tx_type: TxType::Deregister,
            extra: serialize_extra(&[TxExtraField::Deregister(
                meridian_types::DeregisterExtra {
                    block_height: voted_height,
                    service_node_index: index,
                    votes: vec![],
                },
            )]),
            ..Default::default()
        }
    }

    fn block_at(height: u64, winner: PublicKey, txs: &[Transaction]) -> Block {
        Block {
            major_version: hard_fork_version_at(NET, height),
            timestamp: 1_600_000_000 + height,
            nonce: height as u32,
            miner_tx: Transaction {
                version: TxVersion::V2,
                inputs: vec![TxInput::Coinbase(CoinbaseInput { height })],
                extra: serialize_extra(&[TxExtraField::Winner(winner)]),
                ..Default::default()
            },
            tx_hashes: txs.iter().map(Transaction::hash).collect(),
            ..Default::default()
        }
    }

    fn apply_empty_blocks(list: &ServiceNodeList, from: u64, to: u64) {
        for height in from..to {
            list.block_added(&block_at(height, PublicKey::NULL, &[]), &[])
                .unwrap();
        }
    }

    #[test]
    fn registration_creates_a_funded_node() {
        let mut rng = StdRng::seed_from_u64(1);
        let list = ServiceNodeList::new(NET);
        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let requirement = staking_requirement(NET, START);

        let tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();

        assert_eq!(list.height(), START + 1);
        let entries = list.state_for_keys(&[]);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].info.is_fully_funded());
        assert_eq!(list.select_winner(), node.pubkey);
        assert!(list.is_service_node(&node.pubkey));
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let list = ServiceNodeList::new(NET);
        let node = node_keys(&mut rng);
        let other = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let requirement = staking_requirement(NET, START);

        let mut tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        // Swap in a different node key so the signature no longer verifies.
        let mut fields = meridian_types::parse_extra(&tx.extra).unwrap();
        for field in &mut fields {
            if let TxExtraField::ServiceNodePubkey(key) = field {
                *key = other.pubkey;
            }
        }
        tx.extra = serialize_extra(&fields);

        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();
        assert!(list.state_for_keys(&[]).is_empty());
    }

    #[test]
    fn underfunded_first_contribution_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let list = ServiceNodeList::new(NET);
        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let requirement = staking_requirement(NET, START);

        // Below requirement / MAX_CONTRIBUTORS.
        let tx = registration_tx(&mut rng, &node, &wallet, requirement / 5, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();
        assert!(list.state_for_keys(&[]).is_empty());
    }

    #[test]
    fn wrong_height_is_fatal() {
        let list = ServiceNodeList::new(NET);
        let err = list
            .block_added(&block_at(START + 5, PublicKey::NULL, &[]), &[])
            .unwrap_err();
        assert!(matches!(err, RegistryError::HeightInvariantBroken { .. }));
    }

    #[test]
    fn node_expires_after_lock_plus_excess() {
        let mut rng = StdRng::seed_from_u64(4);
        let list = ServiceNodeList::new(NET);
        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let requirement = staking_requirement(NET, START);

        let tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();

        let expiry = START + staking_lock_blocks(NET) + STAKING_LOCK_BLOCKS_EXCESS;
        // Still present while height <= expiry.
        apply_empty_blocks(&list, START + 1, expiry + 1);
        assert_eq!(list.state_for_keys(&[]).len(), 1);
        // The first block past the expiry height removes it.
        apply_empty_blocks(&list, expiry + 1, expiry + 2);
        assert!(list.state_for_keys(&[]).is_empty());
    }

    #[test]
    fn grace_reregistration_preserves_reward_position() {
        let mut rng = StdRng::seed_from_u64(5);
        let list = ServiceNodeList::new(NET);
        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let requirement = staking_requirement(NET, START);

        let tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();
        let before = list.state_for_keys(&[node.pubkey])[0].info.clone();
        let old_reward_height = before.last_reward_block_height;

        let grace_height = START + staking_lock_blocks(NET);
        apply_empty_blocks(&list, START + 1, grace_height);

        let requirement2 = staking_requirement(NET, grace_height);
        let tx2 = registration_tx(&mut rng, &node, &wallet, requirement2, grace_height);
        list.block_added(
            &block_at(grace_height, PublicKey::NULL, &[tx2.clone()]),
            &[tx2],
        )
        .unwrap();

        let entries = list.state_for_keys(&[node.pubkey]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].info.registration_height, grace_height);
        assert_eq!(entries[0].info.last_reward_block_height, old_reward_height);
    }

    #[test]
    fn early_reregistration_is_rejected() {
        let mut rng = StdRng::seed_from_u64(6);
        let list = ServiceNodeList::new(NET);
        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let requirement = staking_requirement(NET, START);

        let tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();

        let tx2 = registration_tx(&mut rng, &node, &wallet, requirement, START + 1);
        list.block_added(&block_at(START + 1, PublicKey::NULL, &[tx2.clone()]), &[tx2])
            .unwrap();

        let entries = list.state_for_keys(&[node.pubkey]);
        assert_eq!(entries[0].info.registration_height, START);
    }

    #[test]
    fn winner_bump_rotates_rewards() {
        let mut rng = StdRng::seed_from_u64(7);
        let list = ServiceNodeList::new(NET);
        let requirement = staking_requirement(NET, START);

        let node_a = node_keys(&mut rng);
        let wallet_a = Wallet::new(&mut rng);
        let node_b = node_keys(&mut rng);
        let wallet_b = Wallet::new(&mut rng);
        let tx_a = registration_tx(&mut rng, &node_a, &wallet_a, requirement, START);
        let tx_b = registration_tx(&mut rng, &node_b, &wallet_b, requirement, START);
        list.block_added(
            &block_at(START, PublicKey::NULL, &[tx_a.clone(), tx_b.clone()]),
            &[tx_a, tx_b],
        )
        .unwrap();

        // Node A registered at index 0, so it waits longest.
        let first = list.select_winner();
        assert_eq!(first, node_a.pubkey);

        // Paying A bumps it behind B.
        list.block_added(&block_at(START + 1, first, &[]), &[])
            .unwrap();
        assert_eq!(list.select_winner(), node_b.pubkey);
    }

    #[test]
    fn deregister_and_detach_round_trip() {
        let mut rng = StdRng::seed_from_u64(8);
        let list = ServiceNodeList::new(NET);
        let requirement = staking_requirement(NET, START);

        // Enough nodes that the quorum leaves a testable remainder.
        let mut txs = Vec::new();
        for _ in 0..12 {
            let node = node_keys(&mut rng);
            let wallet = Wallet::new(&mut rng);
            txs.push(registration_tx(&mut rng, &node, &wallet, requirement, START));
        }
        list.block_added(&block_at(START, PublicKey::NULL, &txs), &txs)
            .unwrap();
        assert_eq!(list.state_for_keys(&[]).len(), 12);

        let quorum = list.quorum_state(START).unwrap();
        assert_eq!(quorum.quorum_nodes.len(), 10);
        assert_eq!(quorum.nodes_to_test.len(), 2);
        let target = quorum.nodes_to_test[0];

        let dereg = deregister_tx(START, 0);
        let dereg_block = block_at(START + 1, PublicKey::NULL, std::slice::from_ref(&dereg));
        list.block_added(&dereg_block, std::slice::from_ref(&dereg))
            .unwrap();
        assert!(list.state_for_keys(&[target]).is_empty());
        assert_eq!(list.state_for_keys(&[]).len(), 11);
        let applied = list.snapshot();

        // Detaching restores the removed node bitwise.
        list.blockchain_detached(START + 1).unwrap();
        assert_eq!(list.state_for_keys(&[target]).len(), 1);
        assert_eq!(list.height(), START + 1);

        // Replaying the same block reproduces the node state, the quorums
        // and the cursor (the journal regrows its own retention marks).
        list.block_added(&dereg_block, std::slice::from_ref(&dereg))
            .unwrap();
        let replayed = list.snapshot();
        assert_eq!(replayed.infos, applied.infos);
        assert_eq!(replayed.quorum_states, applied.quorum_states);
        assert_eq!(replayed.height, applied.height);
    }

    #[test]
    fn stale_quorum_reference_is_ignored() {
        let mut rng = StdRng::seed_from_u64(9);
        let list = ServiceNodeList::new(NET);
        let requirement = staking_requirement(NET, START);
        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();

        // References a height with no retained quorum.
        let dereg = deregister_tx(START + 500, 0);
        list.block_added(
            &block_at(START + 1, PublicKey::NULL, &[dereg.clone()]),
            &[dereg],
        )
        .unwrap();
        assert_eq!(list.state_for_keys(&[]).len(), 1);
    }

    #[test]
    fn detach_past_horizon_is_unreachable() {
        let list = ServiceNodeList::new(NET);
        apply_empty_blocks(&list, START, START + 40);
        let err = list.blockchain_detached(START).unwrap_err();
        assert!(matches!(err, RegistryError::UnreachableRollback(_)));
    }

    fn swap_tx(rng: &mut StdRng, wallet: &Wallet, amount: u64, height: u64, memo: &str) -> Transaction {
        let tx_key = generate_keypair(rng);
        Transaction {
            version: TxVersion::V4,
            tx_type: TxType::Swap,
            unlock_time: height + staking_lock_blocks(NET),
            outputs: vec![staked_output(wallet, &tx_key, 0, amount)],
            extra: serialize_extra(&[
                TxExtraField::Contributor(wallet.address()),
                TxExtraField::TxSecretKey(SecretKey(tx_key.secret.0)),
                TxExtraField::Memo(memo.as_bytes().to_vec()),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn swap_accepts_matching_memo_amounts_only() {
        let mut rng = StdRng::seed_from_u64(12);
        let list = ServiceNodeList::new(NET);
        let wallet = Wallet::new(&mut rng);

        let good = swap_tx(
            &mut rng,
            &wallet,
            12_345,
            START,
            r#"{"network":"eth","address":"0xabc","amount":"12345"}"#,
        );
        assert!(list.try_swap(&good, START));

        let mismatched = swap_tx(
            &mut rng,
            &wallet,
            12_345,
            START,
            r#"{"network":"eth","address":"0xabc","amount":"999"}"#,
        );
        assert!(!list.try_swap(&mismatched, START));

        let missing_member = swap_tx(
            &mut rng,
            &wallet,
            12_345,
            START,
            r#"{"network":"eth","amount":"12345"}"#,
        );
        assert!(!list.try_swap(&missing_member, START));

        let not_json = swap_tx(&mut rng, &wallet, 12_345, START, "not-json");
        assert!(!list.try_swap(&not_json, START));
    }

    #[test]
    fn store_load_round_trip() {
        let mut rng = StdRng::seed_from_u64(10);
        let requirement = staking_requirement(NET, START);
        let list = ServiceNodeList::new(NET).with_store(Box::new(MemoryStore::new()));

        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();
        apply_empty_blocks(&list, START + 1, START + 5);

        let snapshot = list.snapshot();
        let blob = serialize_state(&snapshot);

        let restored = ServiceNodeList::new(NET).with_store(Box::new(MemoryStore::new()));
        restored
            .store
            .as_ref()
            .unwrap()
            .save(&blob)
            .unwrap();
        restored.load().unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.height(), list.height());
        assert_eq!(restored.select_winner(), node.pubkey);
    }

    #[test]
    fn coinbase_validates_against_the_registry() {
        let mut rng = StdRng::seed_from_u64(11);
        let list = ServiceNodeList::new(NET);
        let requirement = staking_requirement(NET, START);
        let node = node_keys(&mut rng);
        let wallet = Wallet::new(&mut rng);
        let tx = registration_tx(&mut rng, &node, &wallet, requirement, START);
        list.block_added(&block_at(START, PublicKey::NULL, &[tx.clone()]), &[tx])
            .unwrap();

        let height = START + 1;
        let hf = hard_fork_version_at(NET, height);
        let winner = list.select_winner();
        assert_eq!(winner, node.pubkey);
        let winner_info = list.winner_addresses_and_portions();
        let context = MinerTxContext::new(NET, winner, winner_info.clone());
        let miner_wallet = Wallet::new(&mut rng);

        let (miner_tx, parts) = construct_miner_tx(
            height,
            0,
            GENERATED,
            0,
            0,
            &miner_wallet.address(),
            &[],
            hf,
            &context,
            &mut rng,
        )
        .unwrap();
        list.validate_miner_tx(&miner_tx, height, hf, &parts).unwrap();

        // The same outputs claimed under a different winner must fail.
        let parts2 = block_reward_parts(0, 0, GENERATED, hf, height, NET, 0, &winner_info).unwrap();
        assert_eq!(parts, parts2);
    }
}
