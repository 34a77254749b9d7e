//! Ledger I/O boundary
//!
//! The only module that talks to the network. Nothing here retries: a failed
//! read is reported as `Network`, a refused transaction as
//! `SubmissionRejected`, and the caller decides what to do next.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::RpcSendTransactionConfig,
    rpc_request::RpcError,
};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_RPC_URL, MAX_CONFIRMATION_TIMEOUT_SECS};
use crate::error::{StakingError, StakingResult};

/// Result of polling for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    /// Landed with an error, or its blockhash expired before it landed
    Failed(String),
    /// Gave up waiting; the transaction may still land
    TimedOut,
}

/// Reads and writes against the ledger
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Raw account data, `None` if the account does not exist
    async fn read_account(&self, address: &Pubkey) -> StakingResult<Option<Vec<u8>>>;

    /// Token account balance in base units, `None` if the account does not exist
    async fn read_token_balance(&self, address: &Pubkey) -> StakingResult<Option<u64>>;

    /// Latest blockhash and the last block height at which it is valid
    async fn latest_blockhash(&self) -> StakingResult<(Hash, u64)>;

    async fn submit(&self, transaction: &Transaction) -> StakingResult<Signature>;

    async fn confirm(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
        timeout: Duration,
    ) -> ConfirmationOutcome;
}

/// RPC gateway configuration
#[derive(Debug, Clone)]
pub struct RpcGatewayConfig {
    pub rpc_url: String,
    pub commitment: CommitmentConfig,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RpcGatewayConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            commitment: CommitmentConfig::confirmed(),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Gateway over a Solana JSON-RPC endpoint
pub struct RpcLedgerGateway {
    client: RpcClient,
    commitment: CommitmentConfig,
    poll_interval: Duration,
}

impl RpcLedgerGateway {
    pub fn new(config: RpcGatewayConfig) -> Self {
        info!("Connecting ledger gateway to {}", config.rpc_url);
        Self {
            client: RpcClient::new_with_timeout_and_commitment(
                config.rpc_url,
                config.request_timeout,
                config.commitment,
            ),
            commitment: config.commitment,
            poll_interval: config.poll_interval,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

fn is_account_not_found(err: &ClientError) -> bool {
    let message = err.to_string();
    message.contains("could not find account") || message.contains("AccountNotFound")
}

fn network_error(call: &str, err: ClientError) -> StakingError {
    warn!(call, error = %err, "Ledger read failed");
    StakingError::Network(format!("{}: {}", call, err))
}

/// Categorize a failed `sendTransaction`.
///
/// Only an explicit refusal from the node is a rejection. A failure that
/// may have happened after the request was written leaves the outcome
/// unknown; anything that fails before sending is a network error.
fn classify_submit_error(signature: Signature, err: &ClientError) -> StakingError {
    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { .. })
        | ClientErrorKind::TransactionError(_) => StakingError::SubmissionRejected(err.to_string()),
        ClientErrorKind::Reqwest(e) if e.is_connect() || e.is_builder() => {
            StakingError::Network(err.to_string())
        }
        ClientErrorKind::Reqwest(_)
        | ClientErrorKind::Io(_)
        | ClientErrorKind::SerdeJson(_)
        | ClientErrorKind::RpcError(RpcError::ParseError(_)) => StakingError::SubmissionInterrupted {
            signature,
            reason: err.to_string(),
        },
        _ => StakingError::Network(err.to_string()),
    }
}

/// What one status poll saw for a submitted signature
#[derive(Debug, Clone, PartialEq, Eq)]
enum SignatureObservation {
    /// Seen by the node; `err` is set if the transaction failed
    Seen { err: Option<String>, committed: bool },
    /// Not seen; the current block height if it could be read
    Unseen { block_height: Option<u64> },
    /// The status poll itself failed
    Unavailable,
}

/// Final outcome for an observation, `None` to keep polling
fn settle(observation: &SignatureObservation, last_valid_block_height: u64) -> Option<ConfirmationOutcome> {
    match observation {
        SignatureObservation::Seen { err: Some(err), .. } => Some(ConfirmationOutcome::Failed(err.clone())),
        SignatureObservation::Seen { committed: true, .. } => Some(ConfirmationOutcome::Confirmed),
        SignatureObservation::Unseen {
            block_height: Some(height),
        } if *height > last_valid_block_height => Some(ConfirmationOutcome::Failed(format!(
            "blockhash expired at block height {}",
            last_valid_block_height
        ))),
        _ => None,
    }
}

/// True when another poll interval would run past the deadline
fn past_deadline(now: Instant, poll_interval: Duration, deadline: Instant) -> bool {
    now + poll_interval > deadline
}

impl RpcLedgerGateway {
    async fn observe(&self, signature: &Signature) -> SignatureObservation {
        let status = match self.client.get_signature_statuses(&[*signature]).await {
            Ok(response) => response.value.into_iter().next().flatten(),
            Err(e) => {
                debug!(%signature, error = %e, "Signature status poll failed");
                return SignatureObservation::Unavailable;
            }
        };

        match status {
            Some(status) => SignatureObservation::Seen {
                err: status.err.as_ref().map(|e| e.to_string()),
                committed: status.satisfies_commitment(self.commitment),
            },
            None => {
                let block_height = match self.client.get_block_height_with_commitment(self.commitment).await {
                    Ok(height) => Some(height),
                    Err(e) => {
                        debug!(error = %e, "Block height poll failed");
                        None
                    }
                };
                SignatureObservation::Unseen { block_height }
            }
        }
    }
}

#[async_trait]
impl LedgerGateway for RpcLedgerGateway {
    async fn read_account(&self, address: &Pubkey) -> StakingResult<Option<Vec<u8>>> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| network_error("getAccountInfo", e))?;

        debug!(%address, found = response.value.is_some(), "Read account");
        Ok(response.value.map(|account| account.data))
    }

    async fn read_token_balance(&self, address: &Pubkey) -> StakingResult<Option<u64>> {
        let balance = match self
            .client
            .get_token_account_balance_with_commitment(address, self.commitment)
            .await
        {
            Ok(response) => response.value,
            Err(e) if is_account_not_found(&e) => {
                debug!(%address, "Token account not found");
                return Ok(None);
            }
            Err(e) => return Err(network_error("getTokenAccountBalance", e)),
        };

        balance.amount.parse::<u64>().map(Some).map_err(|e| {
            StakingError::Network(format!("unparseable token amount '{}': {}", balance.amount, e))
        })
    }

    async fn latest_blockhash(&self) -> StakingResult<(Hash, u64)> {
        self.client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| network_error("getLatestBlockhash", e))
    }

    async fn submit(&self, transaction: &Transaction) -> StakingResult<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: Some(0),
            ..Default::default()
        };

        match self.client.send_transaction_with_config(transaction, config).await {
            Ok(signature) => {
                info!(%signature, "Transaction submitted");
                Ok(signature)
            }
            Err(e) => {
                let signature = transaction.signatures.first().copied().unwrap_or_default();
                Err(classify_submit_error(signature, &e))
            }
        }
    }

    async fn confirm(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
        timeout: Duration,
    ) -> ConfirmationOutcome {
        let timeout = timeout.min(Duration::from_secs(MAX_CONFIRMATION_TIMEOUT_SECS));
        let deadline = Instant::now() + timeout;

        loop {
            let observation = self.observe(signature).await;
            if let Some(outcome) = settle(&observation, last_valid_block_height) {
                return outcome;
            }

            if past_deadline(Instant::now(), self.poll_interval, deadline) {
                warn!(%signature, ?timeout, "Confirmation timed out");
                return ConfirmationOutcome::TimedOut;
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_client::rpc_request::RpcResponseErrorData;
    use solana_sdk::transaction::TransactionError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_default_config() {
        let config = RpcGatewayConfig::default();
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.commitment, CommitmentConfig::confirmed());
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_account_not_found_detection() {
        let missing = ClientError::from(RpcError::ForUser("could not find account".to_string()));
        assert!(is_account_not_found(&missing));

        let io = ClientError::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"));
        assert!(!is_account_not_found(&io));
    }

    #[test]
    fn test_submit_error_classification() {
        let signature = Signature::new_unique();

        let preflight = ClientError::from(RpcError::RpcResponseError {
            code: -32002,
            message: "Transaction simulation failed".to_string(),
            data: RpcResponseErrorData::Empty,
        });
        assert!(matches!(
            classify_submit_error(signature, &preflight),
            StakingError::SubmissionRejected(_)
        ));

        let refused = ClientError::from(TransactionError::InsufficientFundsForFee);
        assert!(matches!(
            classify_submit_error(signature, &refused),
            StakingError::SubmissionRejected(_)
        ));

        let io = ClientError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe"));
        assert_eq!(
            classify_submit_error(signature, &io),
            StakingError::SubmissionInterrupted {
                signature,
                reason: io.to_string(),
            }
        );

        let garbled = ClientError::from(RpcError::ParseError("expected signature".to_string()));
        assert!(classify_submit_error(signature, &garbled).is_outcome_unknown());

        let version = ClientError::from(RpcError::RpcRequestError(
            "cluster version query failed: operation timed out".to_string(),
        ));
        assert!(matches!(
            classify_submit_error(signature, &version),
            StakingError::Network(_)
        ));
    }

    #[test]
    fn test_settle_landed() {
        let confirmed = SignatureObservation::Seen {
            err: None,
            committed: true,
        };
        assert_eq!(settle(&confirmed, 100), Some(ConfirmationOutcome::Confirmed));

        let processed = SignatureObservation::Seen {
            err: None,
            committed: false,
        };
        assert_eq!(settle(&processed, 100), None);

        let failed = SignatureObservation::Seen {
            err: Some("custom program error: 0x1".to_string()),
            committed: true,
        };
        assert_eq!(
            settle(&failed, 100),
            Some(ConfirmationOutcome::Failed("custom program error: 0x1".to_string()))
        );
    }

    #[test]
    fn test_settle_unseen() {
        let expired = SignatureObservation::Unseen {
            block_height: Some(101),
        };
        assert!(matches!(settle(&expired, 100), Some(ConfirmationOutcome::Failed(reason)) if reason.contains("expired")));

        let at_limit = SignatureObservation::Unseen {
            block_height: Some(100),
        };
        assert_eq!(settle(&at_limit, 100), None);

        let unknown_height = SignatureObservation::Unseen { block_height: None };
        assert_eq!(settle(&unknown_height, 100), None);
        assert_eq!(settle(&SignatureObservation::Unavailable, 100), None);
    }

    #[test]
    fn test_past_deadline() {
        let now = Instant::now();
        let interval = Duration::from_millis(500);

        assert!(!past_deadline(now, interval, now + Duration::from_secs(1)));
        assert!(!past_deadline(now, interval, now + interval));
        assert!(past_deadline(now, interval, now + Duration::from_millis(499)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let gateway = RpcLedgerGateway::new(RpcGatewayConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        });

        let result = gateway.read_account(&Pubkey::new_unique()).await;
        assert!(matches!(result, Err(StakingError::Network(_))));
    }

    fn gateway_for(url: String) -> RpcLedgerGateway {
        RpcLedgerGateway::new(RpcGatewayConfig {
            rpc_url: url,
            request_timeout: Duration::from_millis(300),
            ..Default::default()
        })
    }

    fn unsigned_transaction() -> Transaction {
        Transaction::new_with_payer(&[], Some(&Pubkey::new_unique()))
    }

    /// Accepts connections and never answers
    async fn spawn_silent_node() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        url
    }

    /// Answers `getVersion`, then holds any other request open without replying
    async fn spawn_stalling_node() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer_version_only(stream));
            }
        });
        url
    }

    async fn answer_version_only(mut stream: TcpStream) {
        const VERSION: &str = r#"{"jsonrpc":"2.0","result":{"solana-core":"1.17.0","feature-set":0},"id":1}"#;

        while let Some(body) = read_request(&mut stream).await {
            if !body.contains("getVersion") {
                std::future::pending::<()>().await;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                VERSION.len(),
                VERSION
            );
            if stream.write_all(response.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    /// Body of the next HTTP request, `None` once the peer closes
    async fn read_request(stream: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let start = end + 4;
                if buf.len() >= start + length {
                    return Some(String::from_utf8_lossy(&buf[start..start + length]).into_owned());
                }
            }
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..read]);
        }
    }

    #[tokio::test]
    async fn test_submit_to_silent_node_is_network_error() {
        let gateway = gateway_for(spawn_silent_node().await);

        let result = gateway.submit(&unsigned_transaction()).await;

        let error = result.unwrap_err();
        assert!(matches!(error, StakingError::Network(_)), "got {:?}", error);
        assert!(error.kind().is_retryable());
    }

    #[tokio::test]
    async fn test_submit_stalled_after_send_is_outcome_unknown() {
        let gateway = gateway_for(spawn_stalling_node().await);
        let transaction = unsigned_transaction();

        let error = gateway.submit(&transaction).await.unwrap_err();

        match &error {
            StakingError::SubmissionInterrupted { signature, .. } => {
                assert_eq!(*signature, transaction.signatures[0]);
            }
            other => panic!("expected interrupted submission, got {:?}", other),
        }
        assert!(error.is_outcome_unknown());
        assert!(!error.kind().is_retryable());
    }
}
