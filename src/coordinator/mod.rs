//! Attestation coordinator
//!
//! One coordinator serves one ordered chain pair. It runs the validation and
//! attestation loops as independent tasks on the same fixed period, so a
//! slow source inquiry never delays vote submission and vice versa. Each
//! loop carries a circuit breaker: repeated whole-tick failures pause that
//! loop for a cool-down instead of hammering a broken dependency.

pub mod attestation;
pub mod validation;

pub use attestation::AttestationLoop;
pub use validation::ValidationLoop;

use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::metrics;

/// Whole-tick failures tolerated before a loop pauses
const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
/// Pause length once the breaker trips
const CIRCUIT_BREAKER_COOL_DOWN: Duration = Duration::from_secs(60);

#[async_trait]
trait TickLoop: Send + Sync {
    fn name(&self) -> &'static str;
    async fn tick(&self) -> Result<()>;
}

#[async_trait]
impl TickLoop for ValidationLoop {
    fn name(&self) -> &'static str {
        "validation"
    }
    async fn tick(&self) -> Result<()> {
        ValidationLoop::tick(self).await
    }
}

#[async_trait]
impl TickLoop for AttestationLoop {
    fn name(&self) -> &'static str {
        "attestation"
    }
    async fn tick(&self) -> Result<()> {
        AttestationLoop::tick(self).await
    }
}

async fn run_loop(looper: Arc<dyn TickLoop>, poll_interval: Duration, mut shutdown: mpsc::Receiver<()>) {
    let name = looper.name();
    let mut consecutive_failures = 0u32;
    info!(name, "Coordinator loop started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(name, "Coordinator loop shutting down");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {
                match looper.tick().await {
                    Ok(()) => {
                        consecutive_failures = 0;
                        metrics::record_successful_poll(name);
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(name, error = %e, consecutive_failures, "Loop tick failed");
                    }
                }
                metrics::set_consecutive_failures(name, consecutive_failures);

                if consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
                    warn!(
                        name,
                        cool_down = ?CIRCUIT_BREAKER_COOL_DOWN,
                        "Circuit breaker tripped, pausing loop"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => {
                            info!(name, "Coordinator loop shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(CIRCUIT_BREAKER_COOL_DOWN) => {
                            consecutive_failures = 0;
                        }
                    }
                }
            }
        }
    }
}

/// Runs both pipeline loops for one ordered chain pair.
pub struct CoordinatorManager {
    validation: Arc<ValidationLoop>,
    attestation: Arc<AttestationLoop>,
    poll_interval: Duration,
}

impl CoordinatorManager {
    pub fn new(
        validation: Arc<ValidationLoop>,
        attestation: Arc<AttestationLoop>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            validation,
            attestation,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) {
        let (validation_tx, validation_rx) = mpsc::channel(1);
        let (attestation_tx, attestation_rx) = mpsc::channel(1);

        let mut tasks = JoinSet::new();
        tasks.spawn(run_loop(
            self.validation.clone(),
            self.poll_interval,
            validation_rx,
        ));
        tasks.spawn(run_loop(
            self.attestation.clone(),
            self.poll_interval,
            attestation_rx,
        ));

        shutdown.recv().await;
        let _ = validation_tx.send(()).await;
        let _ = attestation_tx.send(()).await;
        while tasks.join_next().await.is_some() {}
        info!("Coordinator stopped");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Chain-endpoint fakes for exercising the loops without RPC.

    use crate::bridge::{AttestationSink, BurnLedger};
    use crate::chain::TxOutcome;
    use crate::merkle::MerkleProof;
    use crate::types::ExportReceipt;
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use eyre::{eyre, Result};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct SourceState {
        receipt: Option<ExportReceipt>,
        latest_block: u64,
        latest_timestamp: u64,
        recent: Vec<B256>,
        fail_receipt_queries: bool,
    }

    #[derive(Default)]
    pub(crate) struct FakeSource {
        state: Mutex<SourceState>,
        receipt_queries: AtomicU64,
    }

    impl FakeSource {
        pub(crate) fn with_receipt(receipt: ExportReceipt) -> Self {
            let fake = Self::default();
            fake.state.lock().unwrap().receipt = Some(receipt);
            fake
        }

        pub(crate) fn empty() -> Self {
            Self::default()
        }

        pub(crate) fn failing() -> Self {
            let fake = Self::default();
            fake.state.lock().unwrap().fail_receipt_queries = true;
            fake
        }

        pub(crate) fn set_latest_block(&self, block: u64) {
            self.state.lock().unwrap().latest_block = block;
        }

        pub(crate) fn set_latest_timestamp(&self, timestamp: u64) {
            self.state.lock().unwrap().latest_timestamp = timestamp;
        }

        pub(crate) fn set_recent_burns(&self, recent: Vec<B256>) {
            self.state.lock().unwrap().recent = recent;
        }

        pub(crate) fn receipt_queries(&self) -> u64 {
            self.receipt_queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BurnLedger for FakeSource {
        async fn latest_block_number(&self) -> Result<u64> {
            Ok(self.state.lock().unwrap().latest_block)
        }

        async fn latest_block_timestamp(&self) -> Result<u64> {
            Ok(self.state.lock().unwrap().latest_timestamp)
        }

        async fn export_receipt(&self, burn_hash: B256) -> Result<Option<ExportReceipt>> {
            self.receipt_queries.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            if state.fail_receipt_queries {
                return Err(eyre!("connection refused"));
            }
            Ok(state
                .receipt
                .clone()
                .filter(|r| r.current_burn_hash == burn_hash))
        }

        async fn recent_burn_hashes(&self) -> Result<Vec<B256>> {
            Ok(self.state.lock().unwrap().recent.clone())
        }
    }

    #[derive(Default)]
    struct DestState {
        latest_block: u64,
        claimed: HashSet<B256>,
        refutes: Vec<B256>,
        attests: Vec<(B256, MerkleProof)>,
        attest_error: Option<String>,
    }

    #[derive(Default)]
    pub(crate) struct FakeDestination {
        state: Mutex<DestState>,
    }

    impl FakeDestination {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn set_latest_block(&self, block: u64) {
            self.state.lock().unwrap().latest_block = block;
        }

        pub(crate) fn mark_claimed(&self, burn_hash: B256) {
            self.state.lock().unwrap().claimed.insert(burn_hash);
        }

        pub(crate) fn fail_attest_with(&self, message: &str) {
            self.state.lock().unwrap().attest_error = Some(message.to_string());
        }

        pub(crate) fn refutations(&self) -> Vec<B256> {
            self.state.lock().unwrap().refutes.clone()
        }

        pub(crate) fn attestations(&self) -> Vec<(B256, MerkleProof)> {
            self.state.lock().unwrap().attests.clone()
        }
    }

    #[async_trait]
    impl AttestationSink for FakeDestination {
        async fn latest_block_number(&self) -> Result<u64> {
            Ok(self.state.lock().unwrap().latest_block)
        }

        async fn attest(&self, burn_hash: B256, proof: &MerkleProof) -> Result<TxOutcome> {
            let mut state = self.state.lock().unwrap();
            if let Some(message) = &state.attest_error {
                return Err(eyre!("{message}"));
            }
            state.attests.push((burn_hash, proof.clone()));
            Ok(TxOutcome {
                tx_hash: B256::repeat_byte(0xA1),
                block_number: state.latest_block,
                success: true,
            })
        }

        async fn refute(&self, burn_hash: B256) -> Result<TxOutcome> {
            let mut state = self.state.lock().unwrap();
            state.refutes.push(burn_hash);
            Ok(TxOutcome {
                tx_hash: B256::repeat_byte(0xF2),
                block_number: state.latest_block,
                success: true,
            })
        }

        async fn is_claimed(&self, burn_hash: B256) -> Result<bool> {
            Ok(self.state.lock().unwrap().claimed.contains(&burn_hash))
        }
    }
}
