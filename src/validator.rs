use super::*;

/// Runs a `submit` through the validation pipeline: format and duplicate
/// checks, template resolution, trusted-or-full verification, difficulty
/// classification, and all the accounting fallout. Returns the result value
/// for the reply, or the reject reason.
pub(crate) async fn process_submit(
    rt: &Arc<WorkerRuntime>,
    session: &Arc<Session>,
    params: &SubmitParams,
) -> Result<Value, RejectReason> {
    let Some(nonce) = Nonce::from_wire(&params.nonce) else {
        warn!("Malformed nonce {:?} from {session}", params.nonce);
        count_invalid(rt, session).await;
        return Err(RejectReason::MalformedNonce);
    };

    let (extra_nonce, height, job_difficulty) =
        match session.claim_submission(&params.job_id, nonce) {
            Ok(claim) => claim,
            Err(reason) => {
                warn!("{reason} from {session}");
                count_invalid(rt, session).await;
                return Err(reason);
            }
        };

    // The template a job referenced survives in bounded history for a few
    // generations; anything older has expired. The difficulty nudge forces
    // a fresh job id on the way out.
    let Some(template) = rt.resolve_template(height) else {
        warn!("Block expired at height {height} from {session}");
        count_invalid(rt, session).await;
        session.nudge_difficulty(&rt.settings.retarget());
        rt.push_job(session);
        return Err(RejectReason::BlockExpired);
    };

    let block = rt
        .coin
        .construct_block(&template.blob_with_extra_nonce(extra_nonce), nonce);

    let claimed = parse_hash(&params.result);

    let trusted = rt.settings.trust.enabled && session.trust_allows_skip(rand::random());

    let hash = if trusted {
        claimed
    } else {
        let computed = rt.coin.pow_hash(&rt.coin.convert_blob(&block));

        if claimed != Some(computed) {
            error!("Bad hash from miner {session}");
            punish(rt, session);
            count_invalid(rt, session).await;
            session.nudge_difficulty(&rt.settings.retarget());
            rt.push_job(session);
            return Err(RejectReason::LowDifficulty);
        }

        Some(computed)
    };

    let Some(hash) = hash else {
        // Trusted path with an unparseable claimed hash; it cannot
        // possibly validate, so treat it like a broken hash.
        error!("Malformed result hash from miner {session}");
        punish(rt, session);
        count_invalid(rt, session).await;
        session.nudge_difficulty(&rt.settings.retarget());
        rt.push_job(session);
        return Err(RejectReason::LowDifficulty);
    };

    let share_diff = pow_difficulty(&hash);

    if share_diff >= U256::from(template.difficulty) {
        accept(rt, session, job_difficulty).await;

        let rt = rt.clone();
        let session = session.clone();
        tokio::spawn(async move {
            submit_block_candidate(rt, session, template, block, job_difficulty, trusted).await;
        });

        Ok(json!({"status": "OK"}))
    } else if share_diff < U256::from(job_difficulty.get()) {
        warn!("Rejected low diff share of {share_diff} from {session}");
        punish(rt, session);
        count_invalid(rt, session).await;
        Err(RejectReason::LowDifficulty)
    } else {
        rt.report(share_report(rt, session, job_difficulty, &template, false, trusted));

        info!(
            "Accepted {} share at difficulty {}/{} from {session}",
            if trusted { "trusted" } else { "valid" },
            job_difficulty,
            share_diff,
        );

        accept(rt, session, job_difficulty).await;

        Ok(json!({"status": "OK"}))
    }
}

/// Submits a block candidate to the daemon off the session's critical path.
/// Success or failure, the template is re-polled immediately afterwards.
async fn submit_block_candidate(
    rt: Arc<WorkerRuntime>,
    session: Arc<Session>,
    template: Arc<BlockTemplate>,
    block: Vec<u8>,
    job_difficulty: Difficulty,
    trusted: bool,
) {
    match rt.daemon.submit_block(hex::encode(&block)).await {
        Ok(()) => {
            let block_id = hex::encode(rt.coin.block_id(&block));

            info!(
                "Block {} found at height {} by {session}",
                &block_id[..6],
                template.height
            );

            rt.report(share_report(&rt, &session, job_difficulty, &template, true, trusted));
            rt.report(Report::BlockFound {
                hash: block_id,
                difficulty: template.difficulty,
                height: template.height,
                pool_type: session.pool_type,
                timestamp: unix_millis(),
            });
        }
        Err(e) => {
            error!(
                "Error submitting block at height {} from {session}: {e}",
                template.height
            );

            rt.report(share_report(&rt, &session, job_difficulty, &template, false, trusted));
        }
    }

    rt.refresh_template().await;
}

/// Shared accounting for every accepted share: weighted hash counter,
/// interval window, trust decay, ban window.
async fn accept(rt: &Arc<WorkerRuntime>, session: &Arc<Session>, job_difficulty: Difficulty) {
    session.record_accepted(job_difficulty);

    if rt.settings.trust.enabled {
        session.trust_reward(&rt.settings.trust);
    }

    if session.check_ban(&rt.settings.ban, true) {
        rt.ban(session).await;
    }
}

async fn count_invalid(rt: &Arc<WorkerRuntime>, session: &Arc<Session>) {
    rt.report(Report::InvalidShare {
        payment_address: session.address.clone(),
        payment_id: session.payment_id.clone(),
        identifier: session.identifier.clone(),
    });

    if session.check_ban(&rt.settings.ban, false) {
        rt.ban(session).await;
    }
}

fn punish(rt: &Arc<WorkerRuntime>, session: &Arc<Session>) {
    if rt.settings.trust.enabled {
        info!("Share trust broken by {session}");
        session.trust_punish(&rt.settings.trust);
    }
}

fn share_report(
    rt: &WorkerRuntime,
    session: &Session,
    job_difficulty: Difficulty,
    template: &BlockTemplate,
    found_block: bool,
    trusted: bool,
) -> Report {
    Report::Share {
        shares: job_difficulty.get(),
        payment_address: session.address.clone(),
        payment_id: session.payment_id.clone(),
        identifier: session.identifier.clone(),
        found_block,
        trusted,
        pool_type: session.pool_type,
        pool_id: rt.settings.pool_id,
        block_diff: template.difficulty,
        height: template.height,
        timestamp: unix_millis(),
    }
}

fn parse_hash(hex_str: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}
