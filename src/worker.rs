use super::*;

const LIVENESS_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const BAN_DECAY_INTERVAL: Duration = Duration::from_secs(60);

/// Per-worker context: the session registry, banned-IP view, and template
/// store this worker owns, plus handles to the shared collaborators. One
/// runtime per worker task; sessions never cross runtimes, so all
/// cross-worker effects go through the cluster channel.
pub(crate) struct WorkerRuntime {
    pub(crate) index: usize,
    pub(crate) settings: Arc<Settings>,
    pub(crate) coin: Arc<dyn Coin>,
    pub(crate) daemon: Arc<dyn Daemon>,
    reports: mpsc::Sender<Report>,
    cluster: mpsc::Sender<ClusterMessage>,
    pub(crate) sessions: DashMap<Uuid, Arc<Session>>,
    banned_ips: Mutex<HashSet<IpAddr>>,
    templates: Mutex<TemplateStore>,
}

impl WorkerRuntime {
    pub(crate) fn new(
        index: usize,
        settings: Arc<Settings>,
        coin: Arc<dyn Coin>,
        daemon: Arc<dyn Daemon>,
        reports: mpsc::Sender<Report>,
        cluster: mpsc::Sender<ClusterMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            index,
            settings,
            coin,
            daemon,
            reports,
            cluster,
            sessions: DashMap::new(),
            banned_ips: Mutex::new(HashSet::new()),
            templates: Mutex::new(TemplateStore::new()),
        })
    }

    pub(crate) fn active_template(&self) -> Option<Arc<BlockTemplate>> {
        self.templates.lock().active()
    }

    pub(crate) fn resolve_template(&self, height: u64) -> Option<Arc<BlockTemplate>> {
        self.templates.lock().resolve(height)
    }

    /// Applies a template broadcast: archive, activate, and immediately
    /// regenerate every owned session's job.
    pub(crate) fn adopt_template(&self, raw: RawTemplate) {
        let adopted = match self.templates.lock().adopt(raw) {
            Ok(adopted) => adopted,
            Err(e) => {
                warn!("Worker {} rejected template: {e}", self.index);
                return;
            }
        };

        let Some(template) = adopted else {
            return;
        };

        for session in self.sessions.iter() {
            debug!(
                "Updating worker {} with new work at height {}",
                session.address, template.height
            );
            session.push_job(self.coin.as_ref(), &template);
        }
    }

    /// Defensive re-poll, fired after block submissions. A template change
    /// observed here is propagated to the coordinator first and applied
    /// locally when the broadcast comes back around.
    pub(crate) async fn refresh_template(&self) {
        let raw = match self
            .daemon
            .get_block_template(&self.settings.pool_address, TEMPLATE_RESERVE_SIZE)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Defensive template refresh failed: {e}");
                return;
            }
        };

        match raw.previous_hash() {
            Ok(hash) => {
                let active = self.active_template().map(|template| template.previous_hash);

                if active != Some(hash) {
                    self.send_cluster(ClusterMessage::NewTemplate(raw)).await;
                }
            }
            Err(e) => warn!("Defensive template refresh returned malformed template: {e}"),
        }
    }

    pub(crate) fn register_session(&self, session: Arc<Session>) {
        self.sessions.insert(session.id, session);
    }

    pub(crate) fn session_active(&self, id: &Uuid) -> bool {
        self.sessions.contains_key(id)
    }

    /// Removes the session and broadcasts its IP pool-wide.
    pub(crate) async fn ban(&self, session: &Session) {
        warn!("Banning {session}");

        if self.sessions.remove(&session.id).is_some() {
            self.send_cluster(ClusterMessage::MinerDisconnected {
                port: session.port,
            })
            .await;
        }

        self.send_cluster(ClusterMessage::BanIp(session.ip)).await;
    }

    pub(crate) fn ip_banned(&self, ip: IpAddr) -> bool {
        self.banned_ips.lock().contains(&ip)
    }

    pub(crate) fn ban_ip(&self, ip: IpAddr) {
        self.banned_ips.lock().insert(ip);
    }

    fn clear_banned_ips(&self) {
        self.banned_ips.lock().clear();
    }

    /// Drops sessions whose heartbeat lapsed.
    pub(crate) async fn sweep_sessions(&self) {
        let timeout = self.settings.miner_timeout;

        let expired: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|entry| entry.expired(timeout))
            .map(|entry| entry.value().clone())
            .collect();

        for session in expired {
            info!("Timing out {session}");
            self.sessions.remove(&session.id);
            self.send_cluster(ClusterMessage::MinerDisconnected {
                port: session.port,
            })
            .await;
        }
    }

    /// Periodic difficulty check across all live, non-fixed sessions.
    pub(crate) fn retarget_sessions(&self) {
        let Some(template) = self.active_template() else {
            return;
        };

        let retarget = self.settings.retarget();

        for session in self.sessions.iter() {
            if session.retarget(&retarget).is_some() {
                session.push_job(self.coin.as_ref(), &template);
            }
        }
    }

    /// Re-issues the session's job against the active template, if any.
    pub(crate) fn push_job(&self, session: &Session) {
        if let Some(template) = self.active_template() {
            session.push_job(self.coin.as_ref(), &template);
        }
    }

    pub(crate) async fn send_cluster(&self, message: ClusterMessage) {
        if self.cluster.send(message).await.is_err() {
            warn!("Cluster channel closed");
        }
    }

    /// Best-effort report: a full queue drops the event rather than stall
    /// session I/O.
    pub(crate) fn report(&self, report: Report) {
        if let Err(e) = self.reports.try_send(report) {
            warn!("Report queue rejected event: {e}");
        }
    }
}

pub(crate) fn spawn_worker(
    rt: Arc<WorkerRuntime>,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    listeners: Vec<(Arc<TcpListener>, Arc<PortSettings>)>,
    cancel: CancellationToken,
    tasks: &mut JoinSet<()>,
) {
    {
        let rt = rt.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    message = inbox.recv() => match message {
                        Some(WorkerMessage::BanIp(ip)) => rt.ban_ip(ip),
                        Some(WorkerMessage::Template(raw)) => rt.adopt_template(raw),
                        None => break,
                    }
                }
            }
        });
    }

    {
        let rt = rt.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let mut ticker = interval(rt.settings.retarget_time);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => rt.retarget_sessions(),
                }
            }
        });
    }

    {
        let rt = rt.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let mut ticker = interval(LIVENESS_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => rt.sweep_sessions().await,
                }
            }
        });
    }

    {
        let rt = rt.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let mut ticker = interval(BAN_DECAY_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => rt.clear_banned_ips(),
                }
            }
        });
    }

    for (listener, port) in listeners {
        let rt = rt.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("Worker {} accepted {peer} on port {}", rt.index, port.port);

                            let (reader, writer) = stream.into_split();
                            let mut connection =
                                Connection::new(rt.clone(), port.clone(), peer, reader, writer);
                            let cancel = cancel.clone();

                            tokio::spawn(async move {
                                if let Err(e) = connection.serve(cancel).await {
                                    debug!("Connection with {peer} ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Accept failed on port {}: {e}", port.port);
                            sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{
            block_template::tests::test_raw_template,
            daemon::tests::MockDaemon,
            session::tests::{test_session, test_session_with_push, ADDR},
        },
    };

    pub(crate) fn test_runtime(
        settings: Settings,
        daemon: Arc<MockDaemon>,
    ) -> (
        Arc<WorkerRuntime>,
        mpsc::Receiver<ClusterMessage>,
        mpsc::Receiver<Report>,
    ) {
        let (cluster_tx, cluster_rx) = mpsc::channel(64);
        let (report_tx, report_rx) = mpsc::channel(64);

        let rt = WorkerRuntime::new(
            0,
            Arc::new(settings),
            Arc::new(Keccak),
            daemon,
            report_tx,
            cluster_tx,
        );

        (rt, cluster_rx, report_rx)
    }

    #[tokio::test]
    async fn adopt_pushes_jobs_to_sessions() {
        let daemon = Arc::new(MockDaemon::new(test_raw_template(100, 1000, 1)));
        let (rt, _cluster, _reports) = test_runtime(Settings::default(), daemon);

        let (session, mut push_rx) = test_session_with_push(ADDR, "x");
        let session = Arc::new(session);

        rt.register_session(session.clone());
        rt.adopt_template(test_raw_template(100, 1000, 1));

        let payload = push_rx.try_recv().expect("session should receive a job push");
        assert_eq!(payload.id, session.id.to_string());
        assert!(rt.active_template().is_some());

        // Re-adopting the same template pushes nothing further.
        rt.adopt_template(test_raw_template(100, 1000, 1));
        assert!(push_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn adopt_same_template_twice_is_noop() {
        let daemon = Arc::new(MockDaemon::new(test_raw_template(100, 1000, 1)));
        let (rt, _cluster, _reports) = test_runtime(Settings::default(), daemon);

        rt.adopt_template(test_raw_template(100, 1000, 1));
        rt.adopt_template(test_raw_template(100, 1000, 1));

        assert_eq!(rt.active_template().unwrap().height, 100);
    }

    #[tokio::test]
    async fn refresh_template_propagates_new_observation() {
        let daemon = Arc::new(MockDaemon::new(test_raw_template(101, 1000, 2)));
        let (rt, mut cluster, _reports) = test_runtime(Settings::default(), daemon);

        rt.adopt_template(test_raw_template(100, 1000, 1));
        rt.refresh_template().await;

        assert!(matches!(
            cluster.try_recv().unwrap(),
            ClusterMessage::NewTemplate(raw) if raw.height == 101
        ));
    }

    #[tokio::test]
    async fn refresh_template_with_unchanged_tip_is_silent() {
        let daemon = Arc::new(MockDaemon::new(test_raw_template(100, 1000, 1)));
        let (rt, mut cluster, _reports) = test_runtime(Settings::default(), daemon);

        rt.adopt_template(test_raw_template(100, 1000, 1));
        rt.refresh_template().await;

        assert!(cluster.try_recv().is_err());
    }

    #[tokio::test]
    async fn sweep_reaps_expired_sessions() {
        let daemon = Arc::new(MockDaemon::new(test_raw_template(100, 1000, 1)));

        let mut settings = Settings::default();
        settings.miner_timeout = Duration::ZERO;

        let (rt, mut cluster, _reports) = test_runtime(settings, daemon);

        let session = Arc::new(test_session(ADDR, "x").unwrap());
        rt.register_session(session.clone());

        rt.sweep_sessions().await;

        assert!(!rt.session_active(&session.id));
        assert!(matches!(
            cluster.try_recv().unwrap(),
            ClusterMessage::MinerDisconnected { port: 3333 }
        ));
    }

    #[tokio::test]
    async fn ban_removes_session_and_broadcasts_ip() {
        let daemon = Arc::new(MockDaemon::new(test_raw_template(100, 1000, 1)));
        let (rt, mut cluster, _reports) = test_runtime(Settings::default(), daemon);

        let session = Arc::new(test_session(ADDR, "x").unwrap());
        rt.register_session(session.clone());

        rt.ban(&session).await;

        assert!(!rt.session_active(&session.id));
        assert!(matches!(
            cluster.try_recv().unwrap(),
            ClusterMessage::MinerDisconnected { .. }
        ));
        assert!(matches!(
            cluster.try_recv().unwrap(),
            ClusterMessage::BanIp(ip) if ip == session.ip
        ));
    }

    #[tokio::test]
    async fn banned_ips_decay() {
        let daemon = Arc::new(MockDaemon::new(test_raw_template(100, 1000, 1)));
        let (rt, _cluster, _reports) = test_runtime(Settings::default(), daemon);

        let ip: IpAddr = "10.1.2.3".parse().unwrap();

        rt.ban_ip(ip);
        assert!(rt.ip_banned(ip));

        rt.clear_banned_ips();
        assert!(!rt.ip_banned(ip));
    }
}
