use std::sync::Arc;

use stockledger_infra::{InMemoryLedgerStore, LedgerEngine, LedgerStore};

/// Engine over a type-erased store so the binary can pick Postgres or memory
/// at startup.
pub type Ledger = LedgerEngine<Arc<dyn LedgerStore>>;

pub struct AppServices {
    ledger: Ledger,
}

impl AppServices {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            ledger: LedgerEngine::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLedgerStore::new()))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_inventory::LedgerMode;

    #[tokio::test]
    async fn in_memory_fallback_starts_empty_in_fifo_mode() {
        let services = AppServices::in_memory();
        assert_eq!(services.ledger().mode(), LedgerMode::Fifo);
        assert!(services.ledger().products().await.unwrap().is_empty());
    }
}
