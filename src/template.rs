use super::*;

/// Holds the latest block template as an atomically swappable snapshot.
/// Readers never block and never observe a torn write; a failed refresh
/// keeps serving the previous snapshot.
pub struct TemplateStore {
    tx: watch::Sender<Arc<BlockTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(BlockTemplate::default()));
        Self { tx }
    }

    /// The last stored snapshot, or the empty template before the first
    /// successful refresh.
    pub fn current(&self) -> Arc<BlockTemplate> {
        self.tx.borrow().clone()
    }

    /// Polls the backend for fresh work and swaps in a new snapshot. Any
    /// failure leaves the previous snapshot untouched.
    pub async fn refresh(&self, rpc: &RpcClient) {
        let reply = match rpc.get_work().await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Failed to refresh block template on {}: {err}", rpc.name());
                return;
            }
        };

        let (height, difficulty) = match pending_block_fields(&reply.data) {
            Ok(fields) => fields,
            Err(err) => {
                warn!("Failed to parse pending block on {}: {err}", rpc.name());
                return;
            }
        };

        let previous = self.current();

        self.tx.send_replace(Arc::new(BlockTemplate {
            header: reply.data,
            target: reply.target,
            difficulty,
            height,
        }));

        if height != previous.height {
            info!("New block to mine on {} at height {height}", rpc.name());
        }
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_the_empty_template() {
        let store = TemplateStore::new();
        let template = store.current();

        assert!(template.header.is_empty());
        assert_eq!(template.height, 0);
        assert!(template.difficulty.is_zero());
    }

    #[test]
    fn readers_hold_a_stable_snapshot_across_swaps() {
        let store = TemplateStore::new();
        let before = store.current();

        store.tx.send_replace(Arc::new(BlockTemplate {
            header: "ff".repeat(180),
            target: "00".repeat(32),
            difficulty: BigUint::from(1000u64),
            height: 7,
        }));

        assert_eq!(before.height, 0);
        assert_eq!(store.current().height, 7);
    }
}
