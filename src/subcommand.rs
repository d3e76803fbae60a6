use super::*;

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
    #[command(about = "Run the pool server")]
    Serve,
}

impl Subcommand {
    pub(crate) async fn run(self, settings: Settings, cancel: CancellationToken) -> Result {
        match self {
            Self::Serve => serve(settings, cancel).await,
        }
    }
}

async fn serve(settings: Settings, cancel: CancellationToken) -> Result {
    let settings = Arc::new(settings);

    ensure!(
        !settings.pool_address.is_empty(),
        "pool payout address must be configured (--address or [pool] address)"
    );

    ensure!(
        !settings.ports.is_empty(),
        "at least one stratum port must be configured"
    );

    if let Some(port) = settings.ports.iter().find(|port| port.tls) {
        bail!(
            "port {} is marked tls; terminate TLS in front of the pool and clear the flag",
            port.port
        );
    }

    let coin: Arc<dyn Coin> = Arc::new(Keccak);
    let daemon: Arc<dyn Daemon> = Arc::new(RpcDaemon::new(&settings.daemon_url)?);

    let mut tasks = JoinSet::new();

    let reports = sink::spawn_report_sink(&settings, cancel.clone(), &mut tasks);

    // No jobs without a template, so nothing listens until the daemon
    // produces one.
    let initial = loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),

            result = daemon.get_block_template(&settings.pool_address, TEMPLATE_RESERVE_SIZE) => {
                match result {
                    Ok(raw) => break raw,
                    Err(e) => {
                        warn!("Waiting for daemon template: {e}");
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    };

    info!(
        "Initial block template at height {} with difficulty {}",
        initial.height, initial.difficulty
    );

    // A failed bind leaves that port inactive while the others continue.
    let mut listeners = Vec::new();

    for port in &settings.ports {
        match TcpListener::bind((settings.bind, port.port)).await {
            Ok(listener) => {
                info!("Started server on port {}", port.port);
                listeners.push((Arc::new(listener), Arc::new(port.clone())));
            }
            Err(e) => {
                error!("Unable to start server on port {}: {e}", port.port);
            }
        }
    }

    ensure!(!listeners.is_empty(), "no stratum port could be bound");

    let (cluster_tx, cluster_rx) = mpsc::channel(CLUSTER_CHANNEL_CAPACITY);

    let workers = settings.workers.max(1);
    let mut links = Vec::new();

    for index in 0..workers {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        links.push(link_tx);

        let rt = WorkerRuntime::new(
            index,
            settings.clone(),
            coin.clone(),
            daemon.clone(),
            reports.clone(),
            cluster_tx.clone(),
        );

        spawn_worker(rt, link_rx, listeners.clone(), cancel.clone(), &mut tasks);
    }

    info!("Started {workers} workers");

    let coordinator = Coordinator::new(settings.clone(), daemon.clone(), reports.clone(), links);

    {
        let cancel = cancel.clone();
        tasks.spawn(async move { coordinator.run(cluster_rx, cancel).await });
    }

    if cluster_tx
        .send(ClusterMessage::NewTemplate(initial))
        .await
        .is_err()
    {
        bail!("coordinator exited before startup completed");
    }

    cancel.cancelled().await;

    info!("Shutting down");

    while tasks.join_next().await.is_some() {}

    Ok(())
}
