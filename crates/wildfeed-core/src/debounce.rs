// Cancellable query handles with a quiet-period delay
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One submitted query; dropped or superseded handles are just cancelled tokens
#[derive(Debug, Clone)]
pub struct QueryHandle {
    token: CancellationToken,
    seq: u64,
}

impl QueryHandle {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Hands out query handles, cancelling the previous one on every submit
///
/// Whatever is in flight under an older handle (a debounce wait, a page
/// fetch, a stats fetch) sees its token fire and bails out.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    current: Mutex<QueryHandle>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: Mutex::new(QueryHandle {
                token: CancellationToken::new(),
                seq: 0,
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueryHandle> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Supersede whatever came before and return the new handle
    pub fn submit(&self) -> QueryHandle {
        let mut current = self.lock();
        current.token.cancel();
        let next = QueryHandle {
            token: CancellationToken::new(),
            seq: current.seq + 1,
        };
        debug!("Query {} superseded by {}", current.seq, next.seq);
        *current = next.clone();
        next
    }

    /// The handle the live session runs under
    pub fn current(&self) -> QueryHandle {
        self.lock().clone()
    }

    pub fn cancel(&self) {
        self.lock().token.cancel();
    }

    /// Sit out the quiet period; false if superseded meanwhile
    pub async fn wait(&self, handle: &QueryHandle) -> bool {
        tokio::select! {
            biased;
            _ = handle.token.cancelled() => {
                debug!("Query {} cancelled during debounce", handle.seq);
                false
            }
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}
