use super::*;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Events reported to the external statistics service. Delivery is
/// best-effort with retry-until-acknowledged semantics and never touches
/// the miner-facing critical path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Share {
        shares: u64,
        payment_address: String,
        payment_id: Option<String>,
        identifier: String,
        found_block: bool,
        trusted: bool,
        pool_type: PoolType,
        pool_id: u32,
        block_diff: u64,
        height: u64,
        timestamp: u64,
    },
    BlockFound {
        hash: String,
        difficulty: u64,
        height: u64,
        pool_type: PoolType,
        timestamp: u64,
    },
    InvalidShare {
        payment_address: String,
        payment_id: Option<String>,
        identifier: String,
    },
    RegisterUser {
        login: String,
        email: String,
    },
    PoolStatus {
        pool_id: u32,
        hostname: String,
        height: u64,
        ports: Vec<PortStatus>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortStatus {
    pub port: u16,
    pub starting_difficulty: u64,
    pub pool_type: PoolType,
    pub description: Option<String>,
    pub hidden: bool,
    pub tls: bool,
    pub miners: u64,
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Spawns the report sink and returns its queue. Without a configured
/// report endpoint (solo setups), reports are drained and dropped.
pub(crate) fn spawn_report_sink(
    settings: &Settings,
    cancel: CancellationToken,
    tasks: &mut JoinSet<()>,
) -> mpsc::Sender<Report> {
    let (tx, rx) = mpsc::channel::<Report>(REPORT_CHANNEL_CAPACITY);

    let Some(endpoint) = settings.report_url.clone() else {
        tasks.spawn(async move {
            let mut rx = rx;
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    report = rx.recv() => match report {
                        Some(report) => debug!(?report, "No report endpoint, dropping"),
                        None => break,
                    }
                }
            }
        });

        return tx;
    };

    let auth_key = settings.report_auth_key.clone();
    let client = reqwest::Client::new();
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    for _ in 0..REPORT_SENDERS {
        let endpoint = endpoint.clone();
        let auth_key = auth_key.clone();
        let client = client.clone();
        let rx = rx.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            loop {
                let report = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    report = async { rx.lock().await.recv().await } => match report {
                        Some(report) => report,
                        None => break,
                    }
                };

                deliver(&client, &endpoint, auth_key.as_deref(), report, &cancel).await;
            }
        });
    }

    tx
}

/// POSTs one report, retrying with growing backoff until the sink
/// acknowledges with a success status or shutdown wins.
async fn deliver(
    client: &reqwest::Client,
    endpoint: &str,
    auth_key: Option<&str>,
    report: Report,
    cancel: &CancellationToken,
) {
    let body = json!({"key": auth_key, "report": report});
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match client.post(endpoint).json(&body).send().await {
            Ok(response) if response.status().is_success() => return,
            Ok(response) => {
                warn!("Report sink replied {}, retrying", response.status());
            }
            Err(e) => {
                warn!("Report sink unreachable: {e}, retrying");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Abandoning report during shutdown");
                return;
            }
            _ = sleep(backoff) => {}
        }

        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
