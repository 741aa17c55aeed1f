//! Test data generators shared across the integration tests.

use ed25519_dalek::SigningKey;
use meridian_consensus::{staking_lock_blocks, Network, STAKING_PORTIONS};
use meridian_types::crypto::{
    derive_public_key, generate_key_derivation, generate_keypair, generate_service_node_keys,
    registration_hash, sign_hash, Keypair,
};
use meridian_types::{
    serialize_extra, AccountAddress, Block, CoinbaseInput, DeregisterExtra, Hash, KeyImage,
    PublicKey, RegisterExtra, SecretKey, Transaction, TxExtraField, TxInput, TxOutput,
    TxOutputTarget, TxType, TxVersion,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// The network the integration tests run on: mainnet rules with 30-block
/// stake locks.
pub const TEST_NETWORK: Network = Network::Fakechain;

/// A wallet with its spend and view keypairs.
pub struct TestWallet {
    pub spend: Keypair,
    pub view: Keypair,
}

impl TestWallet {
    /// A wallet from the shared test rng.
    pub fn generate(rng: &mut StdRng) -> TestWallet {
        TestWallet {
            spend: generate_keypair(rng),
            view: generate_keypair(rng),
        }
    }

    /// The wallet's public address.
    pub fn address(&self) -> AccountAddress {
        AccountAddress::new(self.spend.public, self.view.public)
    }
}

/// A service node's signing identity.
pub struct TestNode {
    pub pubkey: PublicKey,
    pub signing: SigningKey,
    pub wallet: TestWallet,
}

impl TestNode {
    /// A node identity from the shared test rng.
    pub fn generate(rng: &mut StdRng) -> TestNode {
        let (pubkey, signing) = generate_service_node_keys(rng);
        TestNode {
            pubkey,
            signing,
            wallet: TestWallet::generate(rng),
        }
    }
}

/// A deterministic rng for a test.
pub fn test_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// An output addressed to `wallet`, derivable from the revealed tx key.
pub fn staking_output(wallet: &TestWallet, tx_key: &Keypair, index: u64, amount: u64) -> TxOutput {
    let derivation = generate_key_derivation(&wallet.address().view, &tx_key.secret)
        .expect("test wallet keys are valid points");
    let key = derive_public_key(&derivation, index, &wallet.address().spend)
        .expect("test wallet keys are valid points");
    TxOutput {
        amount,
        target: TxOutputTarget::ToKey(key),
    }
}

/// A registration transaction staking `amount` from the node's own wallet,
/// with the whole portion pool reserved for it.
pub fn registration_tx(rng: &mut StdRng, node: &TestNode, amount: u64, height: u64) -> Transaction {
    registration_tx_with_portions(rng, node, &[(node.wallet.address(), STAKING_PORTIONS)], 0, amount, height)
}

/// A registration transaction with explicit reserved contributors. The
/// initial stake comes from the first address, which must belong to the
/// node's wallet for the revealed key to decode it.
pub fn registration_tx_with_portions(
    rng: &mut StdRng,
    node: &TestNode,
    reserved: &[(AccountAddress, u64)],
    portions_for_operator: u64,
    amount: u64,
    height: u64,
) -> Transaction {
    let tx_key = generate_keypair(rng);
    let addresses: Vec<AccountAddress> = reserved.iter().map(|(addr, _)| *addr).collect();
    let portions: Vec<u64> = reserved.iter().map(|(_, p)| *p).collect();
    let expiration = 4_000_000_000;
    let hash = registration_hash(&addresses, portions_for_operator, &portions, expiration);
    let signature = sign_hash(&hash, &node.signing);

    Transaction {
        version: TxVersion::V2,
        tx_type: TxType::Standard,
        unlock_time: height + staking_lock_blocks(TEST_NETWORK),
        outputs: vec![staking_output(&node.wallet, &tx_key, 0, amount)],
        extra: serialize_extra(&[
            TxExtraField::Register(RegisterExtra {
                public_spend_keys: addresses.iter().map(|a| a.spend).collect(),
                public_view_keys: addresses.iter().map(|a| a.view).collect(),
                portions_for_operator,
                portions,
                expiration_timestamp: expiration,
                signature,
            }),
            TxExtraField::ServiceNodePubkey(node.pubkey),
            TxExtraField::Contributor(node.wallet.address()),
            TxExtraField::TxSecretKey(SecretKey(tx_key.secret.0)),
        ]),
        ..Default::default()
    }
}

/// A contribution transaction staking `amount` from `wallet` to the node.
pub fn contribution_tx(
    rng: &mut StdRng,
    node_pubkey: PublicKey,
    wallet: &TestWallet,
    amount: u64,
    height: u64,
) -> Transaction {
    let tx_key = generate_keypair(rng);
    Transaction {
        version: TxVersion::V2,
        tx_type: TxType::Standard,
        unlock_time: height + staking_lock_blocks(TEST_NETWORK),
        outputs: vec![staking_output(wallet, &tx_key, 0, amount)],
        extra: serialize_extra(&[
            TxExtraField::ServiceNodePubkey(node_pubkey),
            TxExtraField::Contributor(wallet.address()),
            TxExtraField::TxSecretKey(SecretKey(tx_key.secret.0)),
        ]),
        ..Default::default()
    }
}

/// A deregistration transaction referencing a quorum decision.
pub fn deregister_tx(voted_height: u64, service_node_index: u32) -> Transaction {
    Transaction {
        version: TxVersion::V2,
        tx_type: TxType::Deregister,
        extra: serialize_extra(&[TxExtraField::Deregister(DeregisterExtra {
            block_height: voted_height,
            service_node_index,
            votes: vec![],
        })]),
        ..Default::default()
    }
}

/// A plain transfer spending a synthetic key image, paying `fee`.
pub fn transfer_tx(tag: u8, fee: u64) -> Transaction {
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
            target: TxOutputTarget::ToKey(PublicKey::from_bytes([tag; 32])),
        }],
        fee,
        ..Default::default()
    }
}

/// A block at `height` carrying the winner marker and the given
/// transactions.
pub fn block_at(height: u64, winner: PublicKey, txs: &[Transaction]) -> Block {
    let mut prev = [0u8; 32];
    prev[..8].copy_from_slice(&height.wrapping_sub(1).to_le_bytes());
    Block {
        major_version: meridian_consensus::hard_fork_version_at(TEST_NETWORK, height),
        timestamp: 1_600_000_000 + height,
        prev_id: Hash::from_bytes(prev),
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
