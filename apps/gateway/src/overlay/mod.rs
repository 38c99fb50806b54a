//! Access to the overlay node's status
//!
//! The status reporter and the bring-up sequence only see the two traits
//! below; [`LocalApiNode`] implements them against a running overlay daemon.

use async_trait::async_trait;
use mesh_sidecar_common::{NodeStatus, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

mod local_api;

pub use local_api::{LocalApiNode, StartOptions};

/// Queries the overlay node for a status snapshot
#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn status(&self) -> Result<NodeStatus>;
}

/// Hands out status clients; fails when the node cannot be reached at all
pub trait StatusSource: Send + Sync {
    fn status_client(&self) -> Result<Arc<dyn StatusClient>>;
}

/// Poll until the node reports the `Running` backend state
///
/// `on_state` is called whenever the backend state or login URL changes,
/// including for the first snapshot. Status errors are treated as "not up
/// yet". The caller bounds the wait with its own deadline.
pub async fn wait_until_running<F>(
    client: &dyn StatusClient,
    poll_interval: Duration,
    mut on_state: F,
) -> NodeStatus
where
    F: FnMut(&NodeStatus) + Send,
{
    let mut last_seen: Option<(String, Option<String>)> = None;

    loop {
        match client.status().await {
            Ok(status) => {
                let current = (status.backend_state.clone(), status.auth_url.clone());
                if last_seen.as_ref() != Some(&current) {
                    debug!("Overlay backend state: {}", status.backend_state);
                    on_state(&status);
                    last_seen = Some(current);
                }

                if status.is_state(mesh_sidecar_common::constants::BACKEND_STATE_RUNNING) {
                    return status;
                }
            }
            Err(e) => debug!("Overlay status not available yet: {}", e),
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_sidecar_common::SidecarError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        script: Mutex<VecDeque<Result<NodeStatus>>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<NodeStatus>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl StatusClient for ScriptedClient {
        async fn status(&self) -> Result<NodeStatus> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(NodeStatus::new("Running")))
        }
    }

    #[tokio::test]
    async fn test_wait_reports_each_transition_once() {
        let mut needs_login = NodeStatus::new("NeedsLogin");
        needs_login.auth_url = Some("https://login.example.com/a/1".to_string());

        let client = ScriptedClient::new(vec![
            Err(SidecarError::StatusQuery("daemon starting".to_string())),
            Ok(NodeStatus::new("Starting")),
            Ok(NodeStatus::new("Starting")),
            Ok(needs_login.clone()),
            Ok(needs_login),
            Ok(NodeStatus::new("Running")),
        ]);

        let mut seen = Vec::new();
        let status = wait_until_running(&client, Duration::from_millis(1), |s| {
            seen.push((s.backend_state.clone(), s.auth_url.clone()))
        })
        .await;

        assert!(status.is_state("Running"));
        assert_eq!(
            seen,
            vec![
                ("Starting".to_string(), None),
                (
                    "NeedsLogin".to_string(),
                    Some("https://login.example.com/a/1".to_string())
                ),
                ("Running".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_can_be_bounded() {
        let client = ScriptedClient::new(
            (0..1000)
                .map(|_| Ok(NodeStatus::new("Starting")))
                .collect(),
        );

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            wait_until_running(&client, Duration::from_millis(5), |_| {}),
        )
        .await;
        assert!(result.is_err());
    }
}
