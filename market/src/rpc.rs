//! JSON-RPC chain access: reads for everyone, writes through the node wallet.

use crate::config::RpcConfig;
use crate::http_pool::HttpPool;
use alloy_primitives::{hex, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use market_core::{ChainReader, MarketError, Session, TxReceipt, TxRequest, Wallet};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// EIP-1193 "user rejected the request".
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl RpcError {
    pub fn is_user_rejection(&self) -> bool {
        match self {
            RpcError::Rpc { code, message } => {
                let msg = message.to_lowercase();
                *code == USER_REJECTED_CODE
                    || msg.contains("user rejected")
                    || msg.contains("user denied")
            }
            RpcError::Transport(_) => false,
        }
    }
}

pub struct RpcClient {
    pool: HttpPool,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(pool: HttpPool) -> Self {
        Self {
            pool,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let resp = self
            .pool
            .post("", None, Some(&body))
            .await
            .map_err(|e| RpcError::Transport(format!("{:#}", e)))?;
        let js = match resp.json {
            Some(js) => js,
            None => {
                return Err(RpcError::Transport(format!(
                    "http {}: {}",
                    resp.status,
                    resp.text.unwrap_or_default()
                )))
            }
        };
        parse_rpc_response(js)
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let v = self.request("eth_chainId", json!([])).await?;
        parse_hex_u64(&v).ok_or_else(|| RpcError::Transport(format!("bad chain id {}", v)))
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        let v = self.request("eth_accounts", json!([])).await?;
        let arr = v.as_array().cloned().unwrap_or_default();
        Ok(arr
            .iter()
            .filter_map(|a| a.as_str())
            .filter_map(|s| Address::from_str(s).ok())
            .collect())
    }
}

fn parse_rpc_response(js: Value) -> Result<Value, RpcError> {
    if let Some(err) = js.get("error").filter(|e| !e.is_null()) {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(RpcError::Rpc { code, message });
    }
    js.get("result")
        .cloned()
        .ok_or_else(|| RpcError::Transport("response has neither result nor error".into()))
}

fn parse_hex_u64(v: &Value) -> Option<u64> {
    let s = v.as_str()?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn parse_hex_u256(v: &Value) -> Option<U256> {
    let s = v.as_str()?;
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).ok()
}

fn quantity(v: U256) -> String {
    format!("0x{:x}", v)
}

fn parse_receipt(hash: TxHash, v: &Value) -> Option<TxReceipt> {
    if v.is_null() {
        return None;
    }
    let success = v
        .get("status")
        .and_then(parse_hex_u64)
        .map(|s| s == 1)
        .unwrap_or(false);
    Some(TxReceipt {
        hash,
        block_number: v.get("blockNumber").and_then(parse_hex_u64),
        success,
        gas_used: v.get("gasUsed").and_then(parse_hex_u64),
    })
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, MarketError> {
        let params = json!([
            {
                "to": hex::encode_prefixed(to.as_slice()),
                "data": hex::encode_prefixed(&data),
            },
            "latest"
        ]);
        let v = self
            .request("eth_call", params)
            .await
            .map_err(|e| MarketError::DataFetch(format!("eth_call {}: {}", to, e)))?;
        let s = v
            .as_str()
            .ok_or_else(|| MarketError::DataFetch(format!("eth_call {}: non-string result", to)))?;
        let raw = hex::decode(s)
            .map_err(|e| MarketError::DataFetch(format!("eth_call {}: {}", to, e)))?;
        Ok(Bytes::from(raw))
    }

    async fn native_balance(&self, account: Address) -> Result<U256, MarketError> {
        let params = json!([hex::encode_prefixed(account.as_slice()), "latest"]);
        let v = self
            .request("eth_getBalance", params)
            .await
            .map_err(|e| MarketError::DataFetch(format!("eth_getBalance: {}", e)))?;
        parse_hex_u256(&v)
            .ok_or_else(|| MarketError::DataFetch(format!("eth_getBalance: bad quantity {}", v)))
    }
}

/// Wallet backed by a node or wallet endpoint that owns the account and
/// signs `eth_sendTransaction` itself.
pub struct NodeWallet {
    rpc: Arc<RpcClient>,
    session: Session,
    receipt_poll: Duration,
    receipt_timeout: Duration,
}

impl NodeWallet {
    pub fn new(rpc: Arc<RpcClient>, session: Session, cfg: &RpcConfig) -> Self {
        Self {
            rpc,
            session,
            receipt_poll: Duration::from_millis(cfg.receipt_poll_ms.max(1)),
            receipt_timeout: Duration::from_millis(cfg.receipt_timeout_ms),
        }
    }

    /// Resolves the session from the endpoint: its chain id, and the given
    /// account or the first one it manages.
    pub async fn connect(
        rpc: Arc<RpcClient>,
        account: Option<Address>,
        cfg: &RpcConfig,
    ) -> Result<Self, MarketError> {
        let chain_id = rpc
            .chain_id()
            .await
            .map_err(|e| MarketError::DataFetch(format!("eth_chainId: {}", e)))?;
        let account = match account {
            Some(a) => a,
            None => rpc
                .accounts()
                .await
                .map_err(|e| MarketError::DataFetch(format!("eth_accounts: {}", e)))?
                .into_iter()
                .next()
                .ok_or_else(|| MarketError::DataFetch("wallet exposes no accounts".into()))?,
        };
        info!(target: "rpc", account = %account, chain_id, "wallet connected");
        Ok(Self::new(rpc, Session { account, chain_id }, cfg))
    }

    fn tx_params(&self, tx: &TxRequest) -> Value {
        let mut obj = json!({
            "from": hex::encode_prefixed(self.session.account.as_slice()),
            "to": hex::encode_prefixed(tx.to.as_slice()),
            "data": hex::encode_prefixed(&tx.data),
            "value": quantity(tx.value),
        });
        if let Some(gas) = tx.gas_limit {
            obj["gas"] = Value::String(format!("0x{:x}", gas));
        }
        obj
    }
}

#[async_trait]
impl Wallet for NodeWallet {
    fn session(&self) -> Session {
        self.session
    }

    async fn send_transaction(&self, tx: &TxRequest) -> Result<TxHash, MarketError> {
        let params = json!([self.tx_params(tx)]);
        let v = self
            .rpc
            .request("eth_sendTransaction", params)
            .await
            .map_err(|e| {
                if e.is_user_rejection() {
                    MarketError::UserRejection(e.to_string())
                } else {
                    MarketError::Submission(e.to_string())
                }
            })?;
        let s = v
            .as_str()
            .ok_or_else(|| MarketError::Submission(format!("unexpected tx hash {}", v)))?;
        TxHash::from_str(s).map_err(|e| MarketError::Submission(format!("bad tx hash {}: {}", s, e)))
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, MarketError> {
        let started = Instant::now();
        let params = json!([hash.to_string()]);
        loop {
            match self
                .rpc
                .request("eth_getTransactionReceipt", params.clone())
                .await
            {
                Ok(v) => {
                    if let Some(receipt) = parse_receipt(hash, &v) {
                        debug!(target: "rpc", hash = %hash, block = ?receipt.block_number, success = receipt.success, "receipt");
                        return Ok(receipt);
                    }
                }
                Err(RpcError::Transport(msg)) => {
                    warn!(target: "rpc", hash = %hash, error = %msg, "receipt poll failed");
                }
                Err(err) => {
                    return Err(MarketError::Confirmation {
                        hash,
                        reason: err.to_string(),
                    })
                }
            }
            if started.elapsed() >= self.receipt_timeout {
                return Err(MarketError::Confirmation {
                    hash,
                    reason: format!(
                        "no receipt after {}s",
                        self.receipt_timeout.as_secs()
                    ),
                });
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use httpmock::{Method::POST, MockServer};
    use prometheus::Registry;

    fn rpc_at(server: &MockServer) -> Arc<RpcClient> {
        let pool = HttpPool::new(&HttpConfig::default(), &server.base_url(), &Registry::new())
            .expect("pool");
        Arc::new(RpcClient::new(pool))
    }

    fn wallet(rpc: Arc<RpcClient>, timeout_ms: u64) -> NodeWallet {
        let cfg = RpcConfig {
            receipt_poll_ms: 10,
            receipt_timeout_ms: timeout_ms,
            ..RpcConfig::default()
        };
        let session = Session {
            account: Address::repeat_byte(0x01),
            chain_id: 31337,
        };
        NodeWallet::new(rpc, session, &cfg)
    }

    #[test]
    fn rpc_errors_are_classified() {
        let err = parse_rpc_response(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": 4001, "message": "User rejected the request."}
        }))
        .unwrap_err();
        assert!(err.is_user_rejection());

        let err = parse_rpc_response(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32000, "message": "MetaMask Tx Signature: User denied transaction signature."}
        }))
        .unwrap_err();
        assert!(err.is_user_rejection());

        let err = parse_rpc_response(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32000, "message": "insufficient funds for gas"}
        }))
        .unwrap_err();
        assert!(!err.is_user_rejection());
    }

    #[test]
    fn results_pass_through() {
        let v = parse_rpc_response(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"})).unwrap();
        assert_eq!(parse_hex_u64(&v), Some(1));
        assert!(parse_rpc_response(json!({"jsonrpc": "2.0", "id": 1})).is_err());
    }

    #[test]
    fn receipts_report_revert_status() {
        let hash = TxHash::repeat_byte(0xab);
        assert!(parse_receipt(hash, &Value::Null).is_none());
        let ok = parse_receipt(
            hash,
            &json!({"status": "0x1", "blockNumber": "0x10", "gasUsed": "0x5208"}),
        )
        .unwrap();
        assert!(ok.success);
        assert_eq!(ok.block_number, Some(16));
        assert_eq!(ok.gas_used, Some(21_000));
        let reverted = parse_receipt(hash, &json!({"status": "0x0", "blockNumber": "0x11"})).unwrap();
        assert!(!reverted.success);
    }

    #[test]
    fn quantities_are_minimal_hex() {
        assert_eq!(quantity(U256::ZERO), "0x0");
        assert_eq!(quantity(U256::from(1_000_000u64)), "0xf4240");
        assert_eq!(parse_hex_u256(&json!("0x")), Some(U256::ZERO));
        assert_eq!(parse_hex_u256(&json!("0xf4240")), Some(U256::from(1_000_000u64)));
    }

    #[tokio::test]
    async fn connect_reads_chain_and_first_account() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_chainId");
                then.status(200)
                    .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": "0x7a69"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_accounts");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 2,
                    "result": ["0x0101010101010101010101010101010101010101"]
                }));
            })
            .await;
        let w = NodeWallet::connect(rpc_at(&server), None, &RpcConfig::default())
            .await
            .unwrap();
        assert_eq!(w.session().chain_id, 31337);
        assert_eq!(w.session().account, Address::repeat_byte(0x01));
    }

    #[tokio::test]
    async fn rejected_send_is_a_user_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_sendTransaction");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 1,
                    "error": {"code": 4001, "message": "User rejected the request."}
                }));
            })
            .await;
        let w = wallet(rpc_at(&server), 1_000);
        let tx = TxRequest::new(Address::repeat_byte(0x99), vec![0x01, 0x02]);
        let err = w.send_transaction(&tx).await.unwrap_err();
        assert!(err.is_user_rejection());
    }

    #[tokio::test]
    async fn receipt_is_polled_until_mined() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_getTransactionReceipt");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 1,
                    "result": {"status": "0x1", "blockNumber": "0x2a", "gasUsed": "0x5208"}
                }));
            })
            .await;
        let w = wallet(rpc_at(&server), 1_000);
        let receipt = w.wait_for_receipt(TxHash::repeat_byte(0xab)).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_number, Some(42));
    }

    #[tokio::test]
    async fn missing_receipt_times_out() {
        let server = MockServer::start_async().await;
        let receipts = server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_getTransactionReceipt");
                then.status(200)
                    .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": null}));
            })
            .await;
        let hash = TxHash::repeat_byte(0xab);
        let err = wallet(rpc_at(&server), 60).wait_for_receipt(hash).await.unwrap_err();
        match err {
            MarketError::Confirmation { hash: h, reason } => {
                assert_eq!(h, hash);
                assert!(reason.starts_with("no receipt after"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(receipts.hits_async().await >= 2);
    }

    #[tokio::test]
    async fn transport_errors_keep_polling() {
        let server = MockServer::start_async().await;
        let receipts = server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_getTransactionReceipt");
                then.status(502).body("bad gateway");
            })
            .await;
        let err = wallet(rpc_at(&server), 60)
            .wait_for_receipt(TxHash::repeat_byte(0xcd))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Confirmation { .. }));
        assert!(receipts.hits_async().await >= 2);
    }

    #[tokio::test]
    async fn node_errors_end_the_wait() {
        let server = MockServer::start_async().await;
        let receipts = server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_getTransactionReceipt");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 1,
                    "error": {"code": -32000, "message": "header not found"}
                }));
            })
            .await;
        let err = wallet(rpc_at(&server), 1_000)
            .wait_for_receipt(TxHash::repeat_byte(0xef))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("header not found"));
        assert_eq!(receipts.hits_async().await, 1);
    }
}
