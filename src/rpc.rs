use super::*;

#[derive(Debug, Snafu)]
pub enum RpcError {
    #[snafu(display("transport failure: {source}"))]
    Transport { source: reqwest::Error },
    #[snafu(display("upstream error: {message}"))]
    Upstream { message: String },
    #[snafu(display("daemon is not ready"))]
    NotReady,
    #[snafu(display("block not accepted, result=false"))]
    Rejected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetWorkReply {
    pub data: String,
    pub target: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    #[serde(default)]
    message: String,
}

/// One upstream daemon endpoint. Health fields mutate on every request; the
/// instance lives for the process lifetime.
pub struct RpcClient {
    name: String,
    url: String,
    username: String,
    password: String,
    pool: bool,
    client: reqwest::Client,
    health: Mutex<Health>,
    sequence: AtomicU64,
    accepts: AtomicU64,
    rejects: AtomicU64,
    fails: AtomicU64,
    last_submission_at: AtomicU64,
}

impl RpcClient {
    pub fn new(
        name: &str,
        url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
        pool: bool,
    ) -> Result<Self> {
        let client = anyhow::Context::context(
            reqwest::Client::builder().timeout(timeout).build(),
            "failed to build upstream HTTP client",
        )?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            username: username.into(),
            password: password.into(),
            pool,
            client,
            health: Mutex::new(Health::new()),
            sequence: AtomicU64::new(0),
            accepts: AtomicU64::new(0),
            rejects: AtomicU64::new(0),
            fails: AtomicU64::new(0),
            last_submission_at: AtomicU64::new(0),
        })
    }

    /// Fetches the current work unit. `NotReady` covers a daemon that
    /// answers without a decodable result, which happens while it is still
    /// syncing; that is not counted against its health.
    pub async fn get_work(&self) -> Result<GetWorkReply, RpcError> {
        let response = self.request("getwork", &[]).await?;

        let Some(result) = response.result else {
            return Err(RpcError::NotReady);
        };

        serde_json::from_str(result.get()).map_err(|_| RpcError::NotReady)
    }

    /// Relays a submission with the share's original parameters.
    pub async fn submit_block(&self, params: &[String]) -> Result<bool, RpcError> {
        let response = self.request("getwork", params).await?;

        let accepted = response
            .result
            .and_then(|result| serde_json::from_str::<bool>(result.get()).ok())
            .unwrap_or_default();

        if !accepted {
            return Err(RpcError::Rejected);
        }

        Ok(accepted)
    }

    /// Liveness probe: a plain getwork whose outcome feeds the health
    /// automaton. Returns whether the backend is currently not sick, which
    /// lags the probe by the hysteresis thresholds.
    pub async fn check_health(&self) -> bool {
        if let Err(err) = self.get_work().await {
            debug!("Health probe failed on {}: {err}", self.name);
        }

        !self.is_sick()
    }

    async fn request(&self, method: &str, params: &[String]) -> Result<RpcResponse, RpcError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let body = serde_json::json!({ "id": 0, "method": method, "params": params });

        debug!("send({sequence}) {}: {body}", self.name);

        let response = match self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(source) => {
                self.record_failure();
                return Err(RpcError::Transport { source });
            }
        };

        let text = match response.text().await {
            Ok(text) => text,
            Err(source) => {
                self.record_failure();
                return Err(RpcError::Transport { source });
            }
        };

        debug!("recv({sequence}) {}: {text}", self.name);

        let Ok(decoded) = serde_json::from_str::<RpcResponse>(&text) else {
            return Err(RpcError::NotReady);
        };

        if let Some(error) = decoded.error {
            self.record_failure();
            return Err(RpcError::Upstream {
                message: error.message,
            });
        }

        self.record_success();

        Ok(decoded)
    }

    pub(crate) fn record_failure(&self) {
        if self.health.lock().record_failure() {
            self.fails.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_success(&self) {
        self.health.lock().record_success();
    }

    pub(crate) fn record_accept(&self) {
        self.accepts.fetch_add(1, Ordering::Relaxed);
        self.last_submission_at.store(timestamp(), Ordering::Relaxed);
    }

    pub(crate) fn record_reject(&self) {
        self.rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_sick(&self) -> bool {
        self.health.lock().is_sick()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> bool {
        self.pool
    }

    pub fn accepts(&self) -> u64 {
        self.accepts.load(Ordering::Relaxed)
    }

    pub fn rejects(&self) -> u64 {
        self.rejects.load(Ordering::Relaxed)
    }

    pub fn fails(&self) -> u64 {
        self.fails.load(Ordering::Relaxed)
    }

    pub fn last_submission_at(&self) -> u64 {
        self.last_submission_at.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> RpcClient {
        RpcClient::new(
            "test",
            "http://127.0.0.1:1",
            "user",
            "pass",
            Duration::from_secs(1),
            false,
        )
        .unwrap()
    }

    #[test]
    fn failures_mark_sick_and_tally_once_per_outage() {
        let client = test_client();

        for _ in 0..5 {
            client.record_failure();
        }

        assert!(client.is_sick());
        assert_eq!(client.fails(), 5);

        client.record_failure();
        assert_eq!(client.fails(), 5);
    }

    #[test]
    fn accept_stamps_last_submission() {
        let client = test_client();
        assert_eq!(client.last_submission_at(), 0);

        client.record_accept();

        assert_eq!(client.accepts(), 1);
        assert!(client.last_submission_at() > 0);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let client = test_client();

        assert!(matches!(
            client.get_work().await,
            Err(RpcError::Transport { .. })
        ));
        assert_eq!(client.fails(), 1);
    }
}
