//! monsoon-test-fixtures
//!
//! In-memory collaborators for protocol tests: a mock chain implementing
//! both the reader and writer capabilities, a proof system that actually
//! re-checks the witness, and a prebuilt two-chain bridge. The mock chain
//! serializes payouts on the nullifier the way a real chain's contract
//! does: the first payout wins, the second observes `AlreadyRedeemed`.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use monsoon_common::{
    commitment, fr_from_bytes, fr_to_bytes, nullifier_hash, DepositSecrets, FieldHasher, Fr,
    Poseidon,
};
use monsoon_core::{
    ChainEnd, ChainReader, ChainWriter, CurrencyPair, CurrencyTable, DepositInstructions,
    DepositTx, Direction, Ed25519Signer, LeafEvent, ProofSystem, ProofWitness, ProtocolError,
    PublicInputs, RedemptionStore, Result, SessionLedger, SessionStore, SignedPayout,
    WithdrawalProtocol, DEPOSIT_METHOD,
};

pub const LOCAL_BRIDGE_ADDRESS: &str = "0xb71d6e0000000000000000000000000000000001";
pub const REMOTE_BRIDGE_ADDRESS: &str = "0xb71d6e0000000000000000000000000000000002";
pub const DEPOSITOR: &str = "0xd3b051700000000000000000000000000000000a";
pub const RECIPIENT: &str = "0x4ec1b1e400000000000000000000000000000001";

pub fn local_currency() -> [u8; 32] {
    fr_to_bytes(&Fr::from(0xaaa_001u64))
}

pub fn remote_currency() -> [u8; 32] {
    fr_to_bytes(&Fr::from(0xbbb_001u64))
}

pub fn test_currency_table() -> CurrencyTable {
    CurrencyTable::new(vec![CurrencyPair {
        local: local_currency(),
        remote: remote_currency(),
        local_decimals: 18,
        remote_decimals: 18,
    }])
    .expect("fixture currency table is valid")
}

#[derive(Default)]
struct MockChainState {
    deposits: HashMap<String, DepositTx>,
    events: Vec<LeafEvent>,
    next_block: u64,
    /// Nullifiers consumed by a mined payout (the contract's own state).
    paid: HashSet<[u8; 32]>,
    /// Nullifiers recorded by the marking call.
    registry: HashSet<[u8; 32]>,
    payouts: Vec<SignedPayout>,
    tx_counter: u64,
}

/// An in-memory chain with a deposit log, a commitment-leaf event stream
/// and an atomic nullifier registry.
pub struct MockChain {
    name: &'static str,
    state: Mutex<MockChainState>,
    unavailable: AtomicBool,
    marking_fails: AtomicBool,
}

impl MockChain {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(MockChainState {
                next_block: 1,
                ..MockChainState::default()
            }),
            unavailable: AtomicBool::new(false),
            marking_fails: AtomicBool::new(false),
        })
    }

    /// Simulate an outage; every call fails retryably until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Make the nullifier-marking call fail while payouts still land.
    pub fn set_marking_fails(&self, fails: bool) {
        self.marking_fails.store(fails, Ordering::SeqCst);
    }

    /// Record a confirmed deposit transaction and its emitted leaf event.
    pub fn seed_deposit(&self, tx_hash: &str, deposit: DepositTx) {
        let mut state = self.state.lock().expect("mock chain poisoned");
        let block = state.next_block;
        state.next_block += 1;
        state.events.push(LeafEvent {
            leaf: deposit.commitment,
            block_number: block,
            tx_index: 0,
        });
        state.deposits.insert(tx_hash.to_string(), deposit);
    }

    pub fn payout_count(&self) -> usize {
        self.state.lock().expect("mock chain poisoned").payouts.len()
    }

    pub fn payouts(&self) -> Vec<SignedPayout> {
        self.state
            .lock()
            .expect("mock chain poisoned")
            .payouts
            .clone()
    }

    pub fn leaf_events(&self) -> Vec<LeafEvent> {
        self.state.lock().expect("mock chain poisoned").events.clone()
    }

    pub fn nullifier_marked(&self, nullifier_hash: [u8; 32]) -> bool {
        self.state
            .lock()
            .expect("mock chain poisoned")
            .registry
            .contains(&nullifier_hash)
    }

    fn ensure_up(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProtocolError::ChainUnavailable(format!(
                "{} rpc timed out",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn query_leaf_events(&self, from_block: u64, to_block: u64) -> Result<Vec<LeafEvent>> {
        self.ensure_up()?;
        let state = self.state.lock().expect("mock chain poisoned");
        Ok(state
            .events
            .iter()
            .filter(|event| event.block_number >= from_block && event.block_number <= to_block)
            .copied()
            .collect())
    }
}

#[async_trait]
impl ChainWriter for MockChain {
    async fn fetch_deposit(&self, tx_hash: &str) -> Result<DepositTx> {
        self.ensure_up()?;
        let state = self.state.lock().expect("mock chain poisoned");
        state.deposits.get(tx_hash).cloned().ok_or_else(|| {
            ProtocolError::ChainUnavailable(format!(
                "transaction {tx_hash} not found on {}",
                self.name
            ))
        })
    }

    async fn register_commitment(&self, commitment: [u8; 32]) -> Result<String> {
        self.ensure_up()?;
        let mut state = self.state.lock().expect("mock chain poisoned");
        let block = state.next_block;
        state.next_block += 1;
        state.events.push(LeafEvent {
            leaf: commitment,
            block_number: block,
            tx_index: 0,
        });
        state.tx_counter += 1;
        Ok(format!("0x{}reg{:04x}", self.name, state.tx_counter))
    }

    async fn submit_payout(&self, payout: &SignedPayout) -> Result<String> {
        self.ensure_up()?;
        let mut state = self.state.lock().expect("mock chain poisoned");
        let tag = payout.payout.nullifier_hash;
        // The contract consumes the nullifier in the payout transaction
        // itself; the first to be mined wins.
        if state.paid.contains(&tag) || state.registry.contains(&tag) {
            return Err(ProtocolError::AlreadyRedeemed);
        }
        state.paid.insert(tag);
        state.payouts.push(payout.clone());
        state.tx_counter += 1;
        Ok(format!("0x{}pay{:04x}", self.name, state.tx_counter))
    }

    async fn is_nullifier_spent(&self, nullifier_hash: [u8; 32]) -> Result<bool> {
        self.ensure_up()?;
        let state = self.state.lock().expect("mock chain poisoned");
        Ok(state.paid.contains(&nullifier_hash) || state.registry.contains(&nullifier_hash))
    }

    async fn mark_nullifier_spent(&self, nullifier_hash: [u8; 32]) -> Result<()> {
        self.ensure_up()?;
        if self.marking_fails.load(Ordering::SeqCst) {
            return Err(ProtocolError::ChainUnavailable(format!(
                "{} registry write failed",
                self.name
            )));
        }
        let mut state = self.state.lock().expect("mock chain poisoned");
        state.registry.insert(nullifier_hash);
        Ok(())
    }
}

/// A proof system that re-derives the statement from the witness: the
/// commitment must hash out of the secrets, the path must fold to the
/// public root, and the nullifier hash must match. Completeness and
/// soundness, scaled down to fixtures.
pub struct MockProofSystem {
    reject: AtomicBool,
}

impl MockProofSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reject: AtomicBool::new(false),
        })
    }

    /// Refuse every proof until cleared.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProofSystem for MockProofSystem {
    async fn prove(&self, witness: &ProofWitness) -> Result<Vec<u8>> {
        serde_json::to_vec(witness).map_err(|err| ProtocolError::Store(err.to_string()))
    }

    async fn verify(&self, proof: &[u8], public_inputs: &PublicInputs) -> Result<bool> {
        if self.reject.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let witness: ProofWitness = match serde_json::from_slice(proof) {
            Ok(witness) => witness,
            Err(_) => return Ok(false),
        };

        let hasher = Poseidon;
        let secrets = DepositSecrets {
            secret: match fr_from_bytes(&witness.secret) {
                Ok(value) => value,
                Err(_) => return Ok(false),
            },
            nullifier: match fr_from_bytes(&witness.nullifier) {
                Ok(value) => value,
                Err(_) => return Ok(false),
            },
        };
        let currency = match fr_from_bytes(&witness.currency) {
            Ok(value) => value,
            Err(_) => return Ok(false),
        };

        if fr_to_bytes(&nullifier_hash(&hasher, secrets.nullifier)) != public_inputs.nullifier_hash
        {
            return Ok(false);
        }

        let mut node = commitment(&hasher, &secrets, currency, witness.amount);
        if witness.siblings.len() != witness.bits.len() {
            return Ok(false);
        }
        for (sibling, bit) in witness.siblings.iter().zip(witness.bits.iter()) {
            let sibling = match fr_from_bytes(sibling) {
                Ok(value) => value,
                Err(_) => return Ok(false),
            };
            node = if *bit == 0 {
                hasher.hash2(node, sibling)
            } else {
                hasher.hash2(sibling, node)
            };
        }
        Ok(fr_to_bytes(&node) == public_inputs.root)
    }
}

/// A fully wired two-chain bridge over mocks.
pub struct TestBridge {
    pub protocol: Arc<WithdrawalProtocol<Poseidon>>,
    pub local: Arc<MockChain>,
    pub remote: Arc<MockChain>,
    pub proof_system: Arc<MockProofSystem>,
}

pub fn test_bridge() -> TestBridge {
    test_bridge_with(8, 900)
}

pub fn test_bridge_with(levels: u32, ttl_secs: u64) -> TestBridge {
    let local = MockChain::new("local");
    let remote = MockChain::new("remote");
    let proof_system = MockProofSystem::new();

    let local_reader: Arc<dyn ChainReader> = local.clone();
    let local_writer: Arc<dyn ChainWriter> = local.clone();
    let remote_reader: Arc<dyn ChainReader> = remote.clone();
    let remote_writer: Arc<dyn ChainWriter> = remote.clone();

    let local_end = ChainEnd::new(
        "local",
        LOCAL_BRIDGE_ADDRESS,
        local_reader,
        local_writer,
        levels,
        Poseidon,
    )
    .expect("fixture chain end is valid");
    let remote_end = ChainEnd::new(
        "remote",
        REMOTE_BRIDGE_ADDRESS,
        remote_reader,
        remote_writer,
        levels,
        Poseidon,
    )
    .expect("fixture chain end is valid");

    let sessions = SessionLedger::new(SessionStore::in_memory(), Duration::from_secs(ttl_secs));
    let verifier: Arc<dyn ProofSystem> = proof_system.clone();
    let protocol = WithdrawalProtocol::new(
        Poseidon,
        local_end,
        remote_end,
        verifier,
        Arc::new(Ed25519Signer::from_seed([42u8; 32])),
        sessions,
        RedemptionStore::in_memory(),
        test_currency_table(),
    );

    TestBridge {
        protocol: Arc::new(protocol),
        local,
        remote,
        proof_system,
    }
}

impl TestBridge {
    /// The source-side mock chain for a direction.
    pub fn source_chain(&self, direction: Direction) -> &Arc<MockChain> {
        match direction {
            Direction::LocalToRemote => &self.local,
            Direction::RemoteToLocal => &self.remote,
        }
    }

    /// The destination-side mock chain for a direction.
    pub fn destination_chain(&self, direction: Direction) -> &Arc<MockChain> {
        match direction {
            Direction::LocalToRemote => &self.remote,
            Direction::RemoteToLocal => &self.local,
        }
    }
}

/// A deposit transaction that matches the session's instructions exactly.
pub fn matching_deposit(sender: &str, instructions: &DepositInstructions) -> DepositTx {
    DepositTx {
        sender: sender.to_string(),
        recipient: instructions.to.clone(),
        method: DEPOSIT_METHOD.to_string(),
        currency: instructions.currency,
        amount: instructions.amount,
        commitment: instructions.commitment,
    }
}
