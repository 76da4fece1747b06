use super::*;

/// Ledger buckets older than this are evicted on every hashrate read.
const LEDGER_RETENTION_MS: u64 = 86_400_000;

/// Per-miner mutable state. One record per distinct miner id, created on the
/// miner's first submission and kept for the process lifetime. The share
/// ledger is keyed by millisecond bucket and aggregated at read time.
pub struct Miner {
    id: String,
    ip: String,
    started_at: u64,
    last_beat: AtomicU64,
    valid_shares: AtomicU64,
    invalid_shares: AtomicU64,
    accepts: AtomicU64,
    rejects: AtomicU64,
    shares: Mutex<BTreeMap<u64, u64>>,
}

impl Miner {
    pub fn new(id: impl Into<String>, ip: impl Into<String>) -> Self {
        Self::new_at(id, ip, timestamp())
    }

    pub(crate) fn new_at(id: impl Into<String>, ip: impl Into<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            started_at: now,
            last_beat: AtomicU64::new(now),
            valid_shares: AtomicU64::new(0),
            invalid_shares: AtomicU64::new(0),
            accepts: AtomicU64::new(0),
            rejects: AtomicU64::new(0),
            shares: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Records the heartbeat, called on every valid share.
    pub fn touch(&self) {
        self.touch_at(timestamp());
    }

    pub(crate) fn touch_at(&self, now: u64) {
        self.last_beat.store(now, Ordering::Relaxed);
    }

    pub fn last_beat(&self) -> u64 {
        self.last_beat.load(Ordering::Relaxed)
    }

    /// Credits share difficulty into the current millisecond bucket.
    pub fn credit_share(&self, difficulty: u64) {
        self.credit_share_at(difficulty, timestamp());
    }

    pub(crate) fn credit_share_at(&self, difficulty: u64, now: u64) {
        *self.shares.lock().entry(now).or_insert(0) += difficulty;
    }

    /// Average credited difficulty per millisecond over `window`. The
    /// denominator is capped at the miner's lifetime so a fresh miner is not
    /// penalized for the part of the window it was absent. Every read also
    /// evicts ledger buckets past the retention horizon.
    pub fn hashrate(&self, window: Duration) -> f64 {
        self.hashrate_at(window, timestamp())
    }

    pub(crate) fn hashrate_at(&self, window: Duration, now: u64) -> f64 {
        let window = window.as_millis() as u64;
        let boundary = now.saturating_sub(self.started_at).min(window);

        if boundary == 0 {
            return 0.0;
        }

        let mut shares = self.shares.lock();

        shares.retain(|bucket, _| bucket + LEDGER_RETENTION_MS >= now);

        let total: u64 = shares
            .range(now.saturating_sub(window)..)
            .map(|(_, difficulty)| difficulty)
            .sum();

        total as f64 / boundary as f64
    }

    pub(crate) fn record_valid_share(&self) {
        self.valid_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalid_share(&self) {
        self.invalid_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept(&self) {
        self.accepts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reject(&self) {
        self.rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn valid_shares(&self) -> u64 {
        self.valid_shares.load(Ordering::Relaxed)
    }

    pub fn invalid_shares(&self) -> u64 {
        self.invalid_shares.load(Ordering::Relaxed)
    }

    pub fn accepts(&self) -> u64 {
        self.accepts.load(Ordering::Relaxed)
    }

    pub fn rejects(&self) -> u64 {
        self.rejects.load(Ordering::Relaxed)
    }
}
