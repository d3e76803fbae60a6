use {
    super::*,
    tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt},
};

enum Flow {
    Continue,
    Close,
}

/// One miner connection: line-delimited JSON requests in, responses and job
/// pushes out. Generic over the byte stream so a TLS acceptor can wrap the
/// transport at the listener.
pub(crate) struct Connection<R, W> {
    rt: Arc<WorkerRuntime>,
    port: Arc<PortSettings>,
    peer: SocketAddr,
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
    session: Option<Arc<Session>>,
    push_tx: mpsc::UnboundedSender<JobPayload>,
    push_rx: mpsc::UnboundedReceiver<JobPayload>,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        rt: Arc<WorkerRuntime>,
        port: Arc<PortSettings>,
        peer: SocketAddr,
        reader: R,
        writer: W,
    ) -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        Self {
            rt,
            port,
            peer,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_SIZE)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
            session: None,
            push_tx,
            push_rx,
        }
    }

    pub(crate) async fn serve(&mut self, cancel: CancellationToken) -> Result {
        loop {
            // Pending job pushes flush before the next inbound message is
            // read, so a regenerated job always precedes the submission
            // that follows it.
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(payload) = self.push_rx.recv() => {
                    self.send(&Push::job(&payload)?).await?;
                }

                line = self.reader.next() => {
                    match line {
                        Some(Ok(line)) => {
                            if matches!(self.handle_line(&line).await?, Flow::Close) {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Excessive or broken frame from {}: {e}", self.peer);
                            break;
                        }
                        None => {
                            debug!("Miner {} disconnected", self.peer);
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        let Ok(value) = serde_json::from_str::<Value>(line) else {
            if line.starts_with("GET /") {
                return self.healthcheck(line).await;
            }

            warn!("Malformed message from {}: {line}", self.peer);
            return Ok(Flow::Close);
        };

        let request = match serde_json::from_value::<Request>(value.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!("Miner request missing id/method/params from {}: {e}", self.peer);

                let id = value
                    .get("id")
                    .cloned()
                    .and_then(|id| serde_json::from_value::<Id>(id).ok())
                    .unwrap_or(Id::Null);

                self.reply_error(id, "Invalid request").await?;
                return Ok(Flow::Continue);
            }
        };

        // Pre-auth ban check, so banned hosts can't even log back in.
        if self.rt.ip_banned(self.peer.ip()) {
            self.reply_error(request.id, RejectReason::BannedIp.to_string())
                .await?;
            return Ok(Flow::Continue);
        }

        match request.method.as_str() {
            "login" | "mining.subscribe" => self.login(request).await?,
            "getjob" => self.getjob(request).await?,
            "submit" => self.submit(request).await?,
            "keepalived" => self.keepalived(request).await?,
            method => {
                warn!("Unknown method {method} from {}", self.peer);
            }
        }

        Ok(Flow::Continue)
    }

    async fn login(&mut self, request: Request) -> Result {
        let Ok(params) = serde_json::from_value::<LoginParams>(request.params) else {
            return self
                .reply_error(request.id, LoginError::MissingCredentials.to_string())
                .await;
        };

        let Some(login) = params.login else {
            return self
                .reply_error(request.id, LoginError::MissingCredentials.to_string())
                .await;
        };

        let pass = params.pass.unwrap_or_else(|| "x".to_string());

        // A re-login replaces the previous session outright.
        if let Some(previous) = self.session.take() {
            if self.rt.sessions.remove(&previous.id).is_some() {
                self.rt
                    .send_cluster(ClusterMessage::MinerDisconnected {
                        port: previous.port,
                    })
                    .await;
            }
        }

        let session = match Session::new(
            &login,
            &pass,
            params.agent,
            self.peer.ip(),
            &self.port,
            &self.rt.settings,
            self.rt.coin.as_ref(),
            job_format(&request.method),
            self.push_tx.clone(),
        ) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                info!("Invalid miner from {}, rejecting: {e}", self.peer);
                return self.reply_error(request.id, e.to_string()).await;
            }
        };

        let Some(template) = self.rt.active_template() else {
            return self
                .reply_error(request.id, "Pool not ready, try again later")
                .await;
        };

        self.rt.register_session(session.clone());
        self.rt
            .send_cluster(ClusterMessage::MinerConnected { port: session.port })
            .await;

        if let Some(email) = &session.email {
            self.rt.report(Report::RegisterUser {
                login: session.payout(),
                email: email.clone(),
            });
        }

        let job = session.derive_job(self.rt.coin.as_ref(), &template);

        info!(
            "Miner connected: {session} on port {} (agent: {})",
            session.port,
            session.agent.as_deref().unwrap_or("unknown"),
        );

        self.session = Some(session.clone());

        self.reply_ok(
            request.id,
            json!({"id": session.id, "job": job, "status": "OK"}),
        )
        .await
    }

    async fn getjob(&mut self, request: Request) -> Result {
        let Some(session) = self.authenticated() else {
            return self
                .reply_error(request.id, RejectReason::Unauthenticated.to_string())
                .await;
        };

        let Some(template) = self.rt.active_template() else {
            return self
                .reply_error(request.id, "Pool not ready, try again later")
                .await;
        };

        let job = session.derive_job(self.rt.coin.as_ref(), &template);

        self.reply_ok(request.id, json!(job)).await
    }

    async fn submit(&mut self, request: Request) -> Result {
        let Some(session) = self.authenticated() else {
            return self
                .reply_error(request.id, RejectReason::Unauthenticated.to_string())
                .await;
        };

        let params = serde_json::from_value::<SubmitParams>(request.params).unwrap_or_default();

        match validator::process_submit(&self.rt, &session, &params).await {
            Ok(result) => self.reply_ok(request.id, result).await,
            Err(reason) => self.reply_error(request.id, reason.to_string()).await,
        }
    }

    async fn keepalived(&mut self, request: Request) -> Result {
        let Some(_session) = self.authenticated() else {
            return self
                .reply_error(request.id, RejectReason::Unauthenticated.to_string())
                .await;
        };

        self.reply_ok(request.id, json!({"status": "KEEPALIVED"})).await
    }

    /// Plain HTTP GET on a stratum port gets a static health-check page and
    /// the connection closed.
    async fn healthcheck(&mut self, line: &str) -> Result<Flow> {
        let version = if line.contains("HTTP/1.0") {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        };

        let response = format!(
            "{version} 200 OK\nContent-Type: text/plain\nContent-Length: {}\n\n{}",
            HEALTHCHECK_BODY.len(),
            HEALTHCHECK_BODY,
        );

        let writer = self.writer.get_mut();
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;

        Ok(Flow::Close)
    }

    /// The connection's session, as long as it is still registered; a ban
    /// or sweep leaves the connection unauthenticated.
    fn authenticated(&mut self) -> Option<Arc<Session>> {
        let session = self.session.clone()?;

        if self.rt.session_active(&session.id) {
            session.heartbeat();
            Some(session)
        } else {
            self.session = None;
            None
        }
    }

    async fn reply_ok(&mut self, id: Id, result: Value) -> Result {
        self.send(&Response::ok(id, result)).await
    }

    async fn reply_error(&mut self, id: Id, message: impl Into<String>) -> Result {
        self.send(&Response::error(id, message)).await
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> Result {
        let frame = serde_json::to_string(message)?;
        self.writer.send(frame).await?;
        Ok(())
    }
}
