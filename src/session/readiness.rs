// ABOUTME: Active polling until a freshly started backend container accepts HTTP traffic

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::docker::{ContainerError, ContainerRuntime};

#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("backend {name} not ready within {elapsed:?}")]
    Timeout { name: String, elapsed: Duration },
    #[error(transparent)]
    Runtime(#[from] ContainerError),
}

/// A liveness probe against the backend's well-known health path.
///
/// Transport-level failures mean "not ready yet", never an error; a freshly
/// started container routinely refuses connections for a few polls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_alive(&self, url: &str) -> bool;
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_alive(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("health probe not answered yet: {}", err);
                false
            }
        }
    }
}

/// Poll until the container is running *and* its health endpoint answers.
///
/// A container reported as running is not necessarily accepting connections;
/// the in-container process may still be booting. Polling replaces the fixed
/// sleep of earlier iterations of this service, which was both racy and slow.
pub async fn wait_until_ready(
    runtime: &dyn ContainerRuntime,
    probe: &dyn HealthProbe,
    name: &str,
    health_url: &str,
    deadline: Duration,
    poll_interval: Duration,
) -> Result<(), ReadinessError> {
    let started = Instant::now();

    loop {
        if runtime.is_running(name).await? && probe.is_alive(health_url).await {
            info!("backend {} ready after {:?}", name, started.elapsed());
            return Ok(());
        }

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            warn!("timed out waiting for backend {} to come up", name);
            return Err(ReadinessError::Timeout {
                name: name.to_string(),
                elapsed,
            });
        }

        sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::container_manager::MockContainerRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const POLL: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_container_runs_and_probe_answers() {
        let mut runtime = MockContainerRuntime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        // Container takes two polls to reach running.
        runtime
            .expect_is_running()
            .returning(move |_| Ok(seen.fetch_add(1, Ordering::SeqCst) >= 2));

        let mut probe = MockHealthProbe::new();
        let probes = Arc::new(AtomicUsize::new(0));
        let answered = Arc::clone(&probes);
        // And one more poll until the process answers HTTP.
        probe
            .expect_is_alive()
            .returning(move |_| answered.fetch_add(1, Ordering::SeqCst) >= 1);

        let result = wait_until_ready(
            &runtime,
            &probe,
            "repl-bowling-lion",
            "http://repl-bowling-lion:4647/is_alive",
            Duration::from_secs(5),
            POLL,
        )
        .await;

        assert!(result.is_ok());
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_probe_never_answers() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_is_running().returning(|_| Ok(true));

        let mut probe = MockHealthProbe::new();
        probe.expect_is_alive().returning(|_| false);

        let started = Instant::now();
        let result = wait_until_ready(
            &runtime,
            &probe,
            "repl-bowling-lion",
            "http://repl-bowling-lion:4647/is_alive",
            Duration::from_secs(5),
            POLL,
        )
        .await;

        assert!(matches!(result, Err(ReadinessError::Timeout { .. })));
        // Must give up within the deadline plus at most one poll interval.
        assert!(started.elapsed() <= Duration::from_secs(5) + POLL);
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_failures_propagate_immediately() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_is_running()
            .returning(|name| Err(ContainerError::NotFound(name.to_string())));

        let probe = MockHealthProbe::new();

        let result = wait_until_ready(
            &runtime,
            &probe,
            "repl-bowling-lion",
            "http://repl-bowling-lion:4647/is_alive",
            Duration::from_secs(5),
            POLL,
        )
        .await;

        assert!(matches!(result, Err(ReadinessError::Runtime(_))));
    }
}
