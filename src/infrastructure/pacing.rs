use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Serializes calls to an upstream API at a minimum interval. All external
/// collaborators allow roughly 1 req/s; callers `wait()` before each request.
pub struct Pacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let due = previous + self.min_interval;
            let now = Instant::now();
            if due > now {
                tokio::time::sleep(due - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}
