use super::*;

/// Upstream chain daemon: the source of block templates and the sink for
/// solved blocks.
#[async_trait]
pub trait Daemon: Send + Sync + 'static {
    async fn get_block_template(&self, address: &str, reserve_size: usize) -> Result<RawTemplate>;

    async fn submit_block(&self, block_hex: String) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

/// JSON-RPC client for a cryptonote daemon's `/json_rpc` endpoint.
pub struct RpcDaemon {
    endpoint: String,
    client: reqwest::Client,
}

impl RpcDaemon {
    pub fn new(url: &str) -> Result<Self> {
        let endpoint = format!("{}/json_rpc", url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build daemon HTTP client")?;

        Ok(Self { endpoint, client })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let envelope = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "0",
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .with_context(|| format!("daemon request {method} failed"))?
            .error_for_status()
            .with_context(|| format!("daemon rejected {method}"))?
            .json::<RpcEnvelope<T>>()
            .await
            .with_context(|| format!("daemon returned malformed {method} response"))?;

        if let Some(fault) = envelope.error {
            bail!("daemon {method} error {}: {}", fault.code, fault.message);
        }

        envelope
            .result
            .ok_or_else(|| anyhow!("daemon {method} response missing result"))
    }
}

#[async_trait]
impl Daemon for RpcDaemon {
    async fn get_block_template(&self, address: &str, reserve_size: usize) -> Result<RawTemplate> {
        self.call(
            "get_block_template",
            json!({"wallet_address": address, "reserve_size": reserve_size}),
        )
        .await
    }

    async fn submit_block(&self, block_hex: String) -> Result<()> {
        self.call::<Value>("submit_block", json!([block_hex]))
            .await
            .map(|_| ())
    }
}
