use super::*;

const POOL_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Worker-to-coordinator bus. This is the whole cross-worker contract:
/// workers never share memory, they only exchange these messages.
#[derive(Debug, Clone)]
pub(crate) enum ClusterMessage {
    BanIp(IpAddr),
    NewTemplate(RawTemplate),
    MinerConnected { port: u16 },
    MinerDisconnected { port: u16 },
}

/// Coordinator-to-worker relay. Ban and template messages fan out to every
/// worker, including the one that originated them.
#[derive(Debug, Clone)]
pub(crate) enum WorkerMessage {
    BanIp(IpAddr),
    Template(RawTemplate),
}

/// The coordinating side of the process topology: relays bans and block
/// templates to all workers, polls the daemon for template changes, applies
/// worker-origin miner-count deltas, and periodically reports pool status.
/// Workers never read the count aggregate; it exists for reporting only.
pub(crate) struct Coordinator {
    settings: Arc<Settings>,
    daemon: Arc<dyn Daemon>,
    reports: mpsc::Sender<Report>,
    workers: Vec<mpsc::UnboundedSender<WorkerMessage>>,
    miner_counts: HashMap<u16, u64>,
    active_prev_hash: Option<[u8; 32]>,
    active_height: u64,
}

impl Coordinator {
    pub(crate) fn new(
        settings: Arc<Settings>,
        daemon: Arc<dyn Daemon>,
        reports: mpsc::Sender<Report>,
        workers: Vec<mpsc::UnboundedSender<WorkerMessage>>,
    ) -> Self {
        let miner_counts = settings
            .ports
            .iter()
            .map(|port| (port.port, 0))
            .collect();

        Self {
            settings,
            daemon,
            reports,
            workers,
            miner_counts,
            active_prev_hash: None,
            active_height: 0,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::Receiver<ClusterMessage>,
        cancel: CancellationToken,
    ) {
        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut status = interval(POOL_STATUS_INTERVAL);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                message = inbox.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },

                _ = poll.tick() => self.poll_template().await,

                _ = status.tick() => self.report_status().await,
            }
        }
    }

    pub(crate) fn handle(&mut self, message: ClusterMessage) {
        match message {
            ClusterMessage::BanIp(ip) => {
                info!("Banning {ip} pool-wide");
                self.broadcast(WorkerMessage::BanIp(ip));
            }
            ClusterMessage::NewTemplate(raw) => self.accept_template(raw),
            ClusterMessage::MinerConnected { port } => {
                *self.miner_counts.entry(port).or_default() += 1;
            }
            ClusterMessage::MinerDisconnected { port } => {
                let count = self.miner_counts.entry(port).or_default();
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Adopts a template observation. Re-observations of the active
    /// template (workers echoing a broadcast back, overlapping polls) are
    /// dropped here so each template fans out exactly once.
    fn accept_template(&mut self, raw: RawTemplate) {
        match raw.previous_hash() {
            Ok(hash) => {
                if self.active_prev_hash == Some(hash) {
                    return;
                }

                info!(
                    "New block template at height {} with previous hash {}",
                    raw.height,
                    hex::encode(hash)
                );

                self.active_prev_hash = Some(hash);
                self.active_height = raw.height;

                self.broadcast(WorkerMessage::Template(raw));
            }
            Err(e) => warn!("Discarding malformed template: {e}"),
        }
    }

    async fn poll_template(&mut self) {
        match self
            .daemon
            .get_block_template(&self.settings.pool_address, TEMPLATE_RESERVE_SIZE)
            .await
        {
            Ok(raw) => self.accept_template(raw),
            Err(e) => warn!("Template poll failed: {e}"),
        }
    }

    async fn report_status(&self) {
        let ports = self
            .settings
            .ports
            .iter()
            .map(|port| PortStatus {
                port: port.port,
                starting_difficulty: port.difficulty,
                pool_type: port.pool_type,
                description: port.description.clone(),
                hidden: port.hidden,
                tls: port.tls,
                miners: self.miner_counts.get(&port.port).copied().unwrap_or(0),
            })
            .collect();

        let report = Report::PoolStatus {
            pool_id: self.settings.pool_id,
            hostname: self.settings.hostname.clone(),
            height: self.active_height,
            ports,
        };

        if self.reports.send(report).await.is_err() {
            warn!("Report sink closed, pool status dropped");
        }
    }

    fn broadcast(&self, message: WorkerMessage) {
        for worker in &self.workers {
            let _ = worker.send(message.clone());
        }
    }

    #[cfg(test)]
    fn miner_count(&self, port: u16) -> u64 {
        self.miner_counts.get(&port).copied().unwrap_or(0)
    }
}
