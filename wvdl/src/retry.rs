use crate::{Result, config::RetryPolicy};
use log::warn;
use std::{future::Future, time::Duration};

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Run `operation` until it succeeds, fails with an error that is not
    /// retryable, or the attempts run out. Every attempt calls `operation`
    /// again, so nothing is shared between attempts.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(x) => return Ok(x),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what,
                        attempt,
                        attempts,
                        e,
                        self.delay()
                    );
                    tokio::time::sleep(self.delay()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
