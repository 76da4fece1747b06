use super::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReply {
    pub data: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReply {
    pub code: i32,
    pub message: String,
}

impl ErrorReply {
    fn new(message: &str) -> Self {
        Self {
            code: -1,
            message: message.into(),
        }
    }
}

/// Core proxy state shared by every submitter: the miner registry, the
/// template snapshot, the upstream backends, and the solo-mode round
/// bookkeeping. Safe under unbounded concurrent submission; no lock is ever
/// shared between unrelated miners.
pub struct ProxyServer {
    backends: Vec<Arc<RpcClient>>,
    current: AtomicUsize,
    miners: DashMap<String, Arc<Miner>>,
    templates: TemplateStore,
    round_shares: AtomicU64,
    round_variances: Mutex<BTreeMap<u64, f64>>,
    hashrate_window: Duration,
}

impl ProxyServer {
    pub fn new(backends: Vec<Arc<RpcClient>>, hashrate_window: Duration) -> Self {
        assert!(
            !backends.is_empty(),
            "at least one upstream backend is required"
        );

        Self {
            backends,
            current: AtomicUsize::new(0),
            miners: DashMap::new(),
            templates: TemplateStore::new(),
            round_shares: AtomicU64::new(0),
            round_variances: Mutex::new(BTreeMap::new()),
            hashrate_window,
        }
    }

    /// The backend currently serving requests.
    pub fn rpc(&self) -> Arc<RpcClient> {
        self.backends[self.current.load(Ordering::Relaxed)].clone()
    }

    pub fn backends(&self) -> &[Arc<RpcClient>] {
        &self.backends
    }

    pub fn current_template(&self) -> Arc<BlockTemplate> {
        self.templates.current()
    }

    pub async fn refresh_template(&self) {
        self.templates.refresh(&self.rpc()).await;
    }

    /// Probes every backend and re-elects the current one if it is sick.
    pub async fn check_upstreams(&self) {
        for backend in &self.backends {
            backend.check_health().await;
        }

        let current = self.current.load(Ordering::Relaxed);

        if !self.backends[current].is_sick() {
            return;
        }

        match self.backends.iter().position(|backend| !backend.is_sick()) {
            Some(next) if next != current => {
                if self
                    .current
                    .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    warn!(
                        "Switching from sick upstream {} to {}",
                        self.backends[current].name(),
                        self.backends[next].name()
                    );
                }
            }
            Some(_) => {}
            None => error!("All upstream backends are sick"),
        }
    }

    /// Serves a getwork request. In solo mode a declared difficulty rebuilds
    /// the reply's target; otherwise the template's target passes through.
    pub fn handle_get_work(
        &self,
        diff: Option<&str>,
        id: &str,
        ip: &str,
    ) -> Result<JobReply, ErrorReply> {
        let template = self.templates.current();

        if template.header.is_empty() {
            return Err(ErrorReply::new("Work not ready"));
        }

        let mut target = template.target.clone();

        if !self.rpc().pool() {
            if let Some(diff) = diff {
                let difficulty = BigUint::from(parse_declared_difficulty(diff, id, ip));
                if let Ok(share_target) = difficulty::target_from_difficulty(&difficulty) {
                    target = difficulty::target_to_le_hex(&share_target);
                }
            }
        }

        Ok(JobReply {
            data: template.header.clone(),
            target,
        })
    }

    /// Accepts a share submission, registering the miner on first contact.
    pub async fn handle_submit(
        &self,
        id: &str,
        ip: &str,
        diff: Option<&str>,
        params: &[String],
    ) -> bool {
        let miner = self
            .miners
            .entry(id.to_string())
            .or_insert_with(|| {
                info!("Registered new miner {id}@{ip}");
                Arc::new(Miner::new(id, ip))
            })
            .clone();

        let template = self.templates.current();

        self.process_share(&miner, &template, diff, params).await
    }

    pub fn handle_unknown(&self, method: &str) -> ErrorReply {
        warn!("Unknown RPC method: {method}");
        ErrorReply::new("Invalid method")
    }

    async fn process_share(
        &self,
        miner: &Miner,
        template: &BlockTemplate,
        diff: Option<&str>,
        params: &[String],
    ) -> bool {
        let rpc = self.rpc();

        let Some(header) = params.first() else {
            miner.record_invalid_share();
            warn!("Share without parameters from {}@{}", miner.id(), miner.ip());
            return false;
        };

        let share_difficulty = match diff {
            Some(diff) if !rpc.pool() => {
                BigUint::from(parse_declared_difficulty(diff, miner.id(), miner.ip()))
            }
            _ => difficulty::difficulty_from_le_target(&template.target),
        };

        let share_target = match difficulty::target_from_difficulty(&share_difficulty) {
            Ok(target) => target,
            Err(_) => {
                miner.record_invalid_share();
                warn!(
                    "Share against a zero-difficulty target from {}@{}",
                    miner.id(),
                    miner.ip()
                );
                return false;
            }
        };

        let share = Block {
            header: header.clone(),
            target: share_target,
        };

        if !share.verify() {
            miner.record_invalid_share();
            warn!("Invalid share from {}@{}", miner.id(), miner.ip());
            return false;
        }

        miner.touch();
        let credited = u64::try_from(&share_difficulty).unwrap_or(u64::MAX);
        miner.credit_share(credited);
        miner.record_valid_share();

        if !rpc.pool() {
            self.round_shares.fetch_add(credited, Ordering::Relaxed);
        }

        info!(
            "Valid share from {}@{} at difficulty {share_difficulty}",
            miner.id(),
            miner.ip()
        );

        let block = Block {
            header: header.clone(),
            target: template.difficulty.clone(),
        };

        if rpc.pool() || block.verify() {
            match rpc.submit_block(params).await {
                Err(err) => {
                    miner.record_reject();
                    rpc.record_reject();
                    warn!(
                        "Upstream submission failure on height {}: {err}",
                        template.height
                    );
                }
                Ok(_) => {
                    if !rpc.pool() {
                        // Solo block found, must refresh the job before the
                        // next share arrives.
                        self.templates.refresh(&rpc).await;
                        self.log_round_variance(&template.difficulty);
                    }

                    miner.record_accept();
                    rpc.record_accept();
                    info!(
                        "Upstream block found by miner {}@{} at height {}",
                        miner.id(),
                        miner.ip(),
                        template.height
                    );
                }
            }
        }

        true
    }

    /// Stores this round's share-to-difficulty variance and resets the
    /// accumulator in a single exchange, so concurrent submitters cannot
    /// slip credited shares into a round that has already been closed out.
    fn log_round_variance(&self, difficulty: &BigUint) {
        let round_shares = self.round_shares.swap(0, Ordering::Relaxed);

        let Some(difficulty) = difficulty.to_f64().filter(|difficulty| *difficulty > 0.0) else {
            return;
        };

        self.round_variances
            .lock()
            .insert(timestamp(), round_shares as f64 / difficulty);
    }

    pub fn miner(&self, id: &str) -> Option<Arc<Miner>> {
        self.miners.get(id).map(|miner| miner.value().clone())
    }

    pub fn miner_count(&self) -> usize {
        self.miners.len()
    }

    pub fn round_shares(&self) -> u64 {
        self.round_shares.load(Ordering::Relaxed)
    }

    pub fn round_variances(&self) -> BTreeMap<u64, f64> {
        self.round_variances.lock().clone()
    }

    /// Sum of every miner's windowed estimate.
    pub fn total_hashrate(&self) -> HashRate {
        HashRate::from_dpms(
            self.miners
                .iter()
                .map(|miner| miner.hashrate(self.hashrate_window))
                .sum(),
        )
    }

    pub(crate) fn log_stats(&self) {
        let template = self.templates.current();
        let rpc = self.rpc();

        info!(
            "miners={} hashrate={} height={} round_shares={} upstream={} accepted={} rejected={} failed={}",
            self.miner_count(),
            self.total_hashrate(),
            template.height,
            self.round_shares(),
            rpc.name(),
            rpc.accepts(),
            rpc.rejects(),
            rpc.fails(),
        );
    }

    /// Spawns the template refresh and upstream check loops.
    pub fn spawn(
        self: &Arc<Self>,
        settings: &Settings,
        cancel: CancellationToken,
        tasks: &mut JoinSet<()>,
    ) {
        let server = self.clone();
        let cancel_refresh = cancel.clone();
        let refresh_interval = settings.refresh_interval;

        tasks.spawn(async move {
            let mut ticker = interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_refresh.cancelled() => break,
                    _ = ticker.tick() => server.refresh_template().await,
                }
            }

            info!("Shutting down template refresher");
        });

        let server = self.clone();
        let check_interval = settings.check_interval;

        tasks.spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        server.check_upstreams().await;
                        server.log_stats();
                    }
                }
            }

            info!("Shutting down upstream checker");
        });
    }
}

/// Parses a miner's self-declared difficulty. Malformed or non-positive
/// declarations fall back to the default rather than rejecting the share.
fn parse_declared_difficulty(diff: &str, id: &str, ip: &str) -> u64 {
    match diff.parse::<f64>() {
        Ok(difficulty) if difficulty >= 1.0 => difficulty as u64,
        Ok(_) => {
            warn!("Invalid difficulty {diff} from {id}@{ip}");
            DEFAULT_SHARE_DIFFICULTY
        }
        Err(_) => {
            warn!("Malformed difficulty {diff} from {id}@{ip}");
            DEFAULT_SHARE_DIFFICULTY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend(name: &str) -> Arc<RpcClient> {
        Arc::new(
            RpcClient::new(
                name,
                "http://127.0.0.1:1",
                "user",
                "pass",
                Duration::from_secs(1),
                false,
            )
            .unwrap(),
        )
    }

    fn test_server(backends: Vec<Arc<RpcClient>>) -> ProxyServer {
        ProxyServer::new(backends, Duration::from_secs(600))
    }

    #[test]
    fn declared_difficulty_parsing() {
        assert_eq!(parse_declared_difficulty("16", "a", "b"), 16);
        assert_eq!(parse_declared_difficulty("16.9", "a", "b"), 16);
        assert_eq!(parse_declared_difficulty("abc", "a", "b"), 8);
        assert_eq!(parse_declared_difficulty("", "a", "b"), 8);
        assert_eq!(parse_declared_difficulty("-3", "a", "b"), 8);
        assert_eq!(parse_declared_difficulty("0", "a", "b"), 8);
        assert_eq!(parse_declared_difficulty("0.5", "a", "b"), 8);
    }

    #[test]
    fn get_work_before_first_refresh_is_not_ready() {
        let server = test_server(vec![test_backend("solo")]);

        assert_eq!(
            server.handle_get_work(None, "alice", "127.0.0.1"),
            Err(ErrorReply::new("Work not ready"))
        );
    }

    #[test]
    fn unknown_method_reply() {
        let server = test_server(vec![test_backend("solo")]);
        let reply = server.handle_unknown("eth_getWork");

        assert_eq!(reply.code, -1);
        assert_eq!(reply.message, "Invalid method");
    }

    #[test]
    fn error_reply_serialization() {
        let reply = ErrorReply::new("Invalid method");

        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"code":-1,"message":"Invalid method"}"#
        );
    }

    #[tokio::test]
    async fn sick_current_backend_is_replaced() {
        let first = test_backend("first");
        let second = test_backend("second");
        let server = test_server(vec![first.clone(), second.clone()]);

        for _ in 0..5 {
            first.record_failure();
        }

        // second is also unreachable, but its streak is still under the
        // threshold after a single probe round
        server.check_upstreams().await;

        assert_eq!(server.rpc().name(), "second");
    }

    #[test]
    fn round_variance_swap_resets_accumulator() {
        let server = test_server(vec![test_backend("solo")]);
        server.round_shares.fetch_add(500, Ordering::Relaxed);

        server.log_round_variance(&BigUint::from(1000u64));

        assert_eq!(server.round_shares(), 0);

        let variances = server.round_variances();
        assert_eq!(variances.len(), 1);
        assert_eq!(variances.values().next(), Some(&0.5));
    }

    #[test]
    fn round_variance_skips_zero_difficulty() {
        let server = test_server(vec![test_backend("solo")]);
        server.round_shares.fetch_add(500, Ordering::Relaxed);

        server.log_round_variance(&BigUint::zero());

        assert_eq!(server.round_shares(), 0);
        assert!(server.round_variances().is_empty());
    }
}
