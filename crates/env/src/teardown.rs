//! Ordered best-effort resource release.

use std::{future::Future, pin::Pin};

use tracing::{debug, warn};

use crate::error::{EnvError, Result};

type ReleaseFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A list of named release steps that always run to completion.
#[derive(Default)]
pub struct Teardown<'a> {
    steps: Vec<(&'static str, ReleaseFuture<'a>)>,
}

impl<'a> Teardown<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a release step. Steps run in insertion order.
    #[must_use]
    pub fn step<F>(mut self, name: &'static str, release: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.steps.push((name, Box::pin(release)));
        self
    }

    /// Run every step regardless of earlier failures and return the first
    /// failure, wrapped with its step name.
    pub async fn run(self) -> Result<()> {
        let mut first_err: Option<EnvError> = None;
        for (name, release) in self.steps {
            match release.await {
                Ok(()) => debug!(step = name, "released"),
                Err(e) => {
                    warn!(step = name, error = %e, "release step failed");
                    if first_err.is_none() {
                        first_err = Some(e.context(name));
                    }
                },
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn all_steps_run_and_first_error_wins() {
        let order = Mutex::new(Vec::new());
        let record = |name: &'static str, fail: bool| {
            let order = &order;
            async move {
                order.lock().unwrap().push(name);
                if fail {
                    Err(EnvError::Cdp(format!("{name} failed")))
                } else {
                    Ok(())
                }
            }
        };

        let err = Teardown::new()
            .step("close session", record("session", true))
            .step("kill container", record("kill", true))
            .step("close liveness", record("liveness", false))
            .run()
            .await
            .unwrap_err();

        assert_eq!(*order.lock().unwrap(), vec!["session", "kill", "liveness"]);
        assert_eq!(
            err.to_string(),
            "close session: CDP error: session failed"
        );
    }

    #[tokio::test]
    async fn empty_teardown_succeeds() {
        Teardown::new().run().await.unwrap();
    }
}
