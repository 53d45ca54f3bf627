//! Signing collaborator for transfer intents
//!
//! Turns `{recipient, beneficiary, threshold, amount}` into a signed legacy
//! value transfer so it can be stored like any client-signed payload.

use crate::chain::ChainProvider;
use crate::config::WalletConfig;
use crate::error::{SnoozeError, SnoozeResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Higher-level registration request
#[derive(Debug, Clone, Deserialize)]
pub struct TransferIntent {
    /// Account whose nonce is used; the wallet key signs for it
    pub recipient: String,
    /// Destination of the value transfer
    pub beneficiary: String,
    /// Max fee in wei; also used as the signed gas price
    #[serde(alias = "gwei_threshold")]
    pub fee_threshold: u64,
    /// Ether amount
    pub transfer_amount: f64,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Returns the `0x`-hex signed payload
    async fn sign_intent(&self, intent: &TransferIntent) -> SnoozeResult<String>;
}

/// `LocalWallet`-backed signer, nonce read from the chain
pub struct WalletSigner {
    wallet: LocalWallet,
    provider: Arc<ChainProvider>,
    gas_limit: u64,
}

impl WalletSigner {
    /// Load the wallet from the environment variable named in config.
    /// `Ok(None)` when no key is configured.
    pub fn from_config(
        config: &WalletConfig,
        provider: Arc<ChainProvider>,
    ) -> SnoozeResult<Option<Self>> {
        let Some(var) = config.private_key_env.as_deref() else {
            return Ok(None);
        };

        let key = match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };

        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| SnoozeError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(provider.chain_id());

        info!("Intent signer initialized with wallet: {:?}", wallet.address());

        Ok(Some(Self {
            wallet,
            provider,
            gas_limit: config.transfer_gas_limit,
        }))
    }
}

fn parse_address(field: &str, value: &str) -> SnoozeResult<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| SnoozeError::InvalidRequest(format!("Invalid {} address: {}", field, e)))
}

/// Check the intent before touching the chain
pub fn validate_intent(intent: &TransferIntent) -> SnoozeResult<(Address, Address, U256)> {
    if intent.fee_threshold == 0 {
        return Err(SnoozeError::InvalidRequest(
            "fee threshold must be greater than zero".to_string(),
        ));
    }
    if !intent.transfer_amount.is_finite() || intent.transfer_amount < 0.0 {
        return Err(SnoozeError::InvalidRequest(
            "transfer amount must be a non-negative number".to_string(),
        ));
    }

    let from = parse_address("recipient", &intent.recipient)?;
    let to = parse_address("beneficiary", &intent.beneficiary)?;
    let value = ethers::utils::parse_ether(intent.transfer_amount)
        .map_err(|e| SnoozeError::InvalidRequest(format!("Invalid transfer amount: {}", e)))?;

    Ok((from, to, value))
}

/// Build and sign the legacy value transfer for an intent.
///
/// Gas price is the intent's threshold, so the payload is broadcastable as
/// soon as the fee allows it.
pub fn sign_transfer(
    wallet: &LocalWallet,
    nonce: U256,
    intent: &TransferIntent,
    chain_id: u64,
    gas_limit: u64,
) -> SnoozeResult<String> {
    let (_, to, value) = validate_intent(intent)?;

    let request = TransactionRequest::new()
        .from(wallet.address())
        .to(to)
        .value(value)
        .nonce(nonce)
        .gas(gas_limit)
        .gas_price(intent.fee_threshold)
        .chain_id(chain_id);
    let tx = TypedTransaction::Legacy(request);

    let signature = wallet
        .sign_transaction_sync(&tx)
        .map_err(|e| SnoozeError::Wallet(e.to_string()))?;

    Ok(format!("0x{}", hex::encode(tx.rlp_signed(&signature))))
}

#[async_trait]
impl TransactionSigner for WalletSigner {
    async fn sign_intent(&self, intent: &TransferIntent) -> SnoozeResult<String> {
        let (from, _, _) = validate_intent(intent)?;

        let nonce = self
            .provider
            .http()
            .get_transaction_count(from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| SnoozeError::ChainConnection {
                chain_id: self.provider.chain_id(),
                message: e.to_string(),
            })?;

        sign_transfer(
            &self.wallet,
            nonce,
            intent,
            self.provider.chain_id(),
            self.gas_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> TransferIntent {
        TransferIntent {
            recipient: "0x00000000000000000000000000000000000000aa".to_string(),
            beneficiary: "0x00000000000000000000000000000000000000bb".to_string(),
            fee_threshold: 20_000_000_000,
            transfer_amount: 0.5,
        }
    }

    #[test]
    fn test_valid_intent() {
        let (_, _, value) = validate_intent(&intent()).unwrap();
        assert_eq!(value, U256::from(500_000_000_000_000_000u64));
    }

    #[test]
    fn test_invalid_intents() {
        let mut bad = intent();
        bad.beneficiary = "not-an-address".to_string();
        assert!(matches!(
            validate_intent(&bad),
            Err(SnoozeError::InvalidRequest(_))
        ));

        let mut bad = intent();
        bad.fee_threshold = 0;
        assert!(validate_intent(&bad).is_err());

        let mut bad = intent();
        bad.transfer_amount = -1.0;
        assert!(validate_intent(&bad).is_err());
    }

    #[test]
    fn test_intent_accepts_original_field_name() {
        let parsed: TransferIntent = serde_json::from_str(
            r#"{"recipient":"0x00000000000000000000000000000000000000aa",
                "beneficiary":"0x00000000000000000000000000000000000000bb",
                "gwei_threshold":7,"transfer_amount":1.0}"#,
        )
        .unwrap();
        assert_eq!(parsed.fee_threshold, 7);
    }

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn provider(url: &str) -> Arc<ChainProvider> {
        Arc::new(
            ChainProvider::new(
                crate::config::ChainConfig {
                    chain_id: 11155111,
                    name: "sepolia".to_string(),
                    rpc_urls: vec![url.to_string()],
                    fee_strategy: Default::default(),
                    explorer_tx_url: String::new(),
                },
                std::time::Duration::from_secs(5),
            )
            .unwrap(),
        )
    }

    fn decode(raw: &str) -> (TypedTransaction, Signature) {
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap()).unwrap();
        TypedTransaction::decode_signed(&ethers::utils::rlp::Rlp::new(&bytes)).unwrap()
    }

    #[test]
    fn test_signed_transfer_fields() {
        let wallet: LocalWallet = TEST_KEY.parse().unwrap();
        let raw = sign_transfer(&wallet, U256::from(9), &intent(), 11155111, 21_000).unwrap();
        assert!(raw.starts_with("0x"));

        let (tx, signature) = decode(&raw);
        assert!(matches!(tx, TypedTransaction::Legacy(_)));
        assert_eq!(tx.nonce(), Some(&U256::from(9)));
        assert_eq!(tx.gas(), Some(&U256::from(21_000)));
        assert_eq!(tx.gas_price(), Some(U256::from(20_000_000_000u64)));
        assert_eq!(tx.value(), Some(&U256::from(500_000_000_000_000_000u64)));
        assert_eq!(tx.chain_id(), Some(U64::from(11155111)));
        assert_eq!(
            tx.to_addr(),
            Some(&"0x00000000000000000000000000000000000000bb".parse().unwrap())
        );
        assert_eq!(signature.recover(tx.sighash()).unwrap(), wallet.address());
    }

    #[test]
    fn test_signed_transfer_rejects_bad_intent() {
        let wallet: LocalWallet = TEST_KEY.parse().unwrap();
        let mut bad = intent();
        bad.fee_threshold = 0;
        assert!(matches!(
            sign_transfer(&wallet, U256::zero(), &bad, 1, 21_000),
            Err(SnoozeError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_nonce_is_read_for_recipient() {
        use axum::{extract::State, routing::post, Json, Router};
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
        let app = Router::new()
            .route(
                "/",
                post(
                    |State(seen): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                     Json(call): Json<serde_json::Value>| async move {
                        let id = call["id"].clone();
                        seen.lock().unwrap().push(call);
                        Json(serde_json::json!({"jsonrpc": "2.0", "id": id, "result": "0x5"}))
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let signer = WalletSigner {
            wallet: TEST_KEY.parse().unwrap(),
            provider: provider(&format!("http://{}", addr)),
            gas_limit: 21_000,
        };
        let raw = signer.sign_intent(&intent()).await.unwrap();

        let calls = seen.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["method"], "eth_getTransactionCount");
        assert_eq!(calls[0]["params"][0], "0x00000000000000000000000000000000000000aa");
        assert_eq!(calls[0]["params"][1], "pending");

        let (tx, _) = decode(&raw);
        assert_eq!(tx.nonce(), Some(&U256::from(5)));
    }

    #[test]
    fn test_missing_key_disables_signer() {
        let provider = provider("http://127.0.0.1:8545");
        let config = WalletConfig {
            private_key_env: Some("SNOOZE_TEST_UNSET_KEY".to_string()),
            transfer_gas_limit: 21_000,
        };
        assert!(WalletSigner::from_config(&config, provider).unwrap().is_none());
    }
}
