//! Commit a set of collaborators in order and schedule their deletion.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use super::finalizers::SharedFinalizers;
use crate::errors::{Error, Result};
use crate::kubernetes::Lifecycle;

/// For each collaborator in turn: register its deletion, commit it, then
/// wait for it to become ready
///
/// Deletion is registered before each commit. The first commit error or
/// readiness timeout stops the sequence; registered deletions still run when
/// the scope exits.
pub async fn commit_all(finalizers: &SharedFinalizers, collaborators: &[Arc<dyn Lifecycle>]) -> Result<()> {
    for collaborator in collaborators {
        let name = collaborator.describe();
        finalizers.push_delete(collaborator.clone());
        collaborator.commit().await.map_err(|e| e.with_context(format!("commit {}", name)))?;
        let started = Instant::now();
        if !collaborator.wait_for_ready().await {
            let waited = started.elapsed().as_millis() as u64;
            return Err(Error::timeout(format!("waiting for {} to become ready", name), waited));
        }
        info!(resource = %name, "Committed and ready");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorded {
        name: &'static str,
        ready: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Lifecycle for Recorded {
        fn describe(&self) -> String {
            self.name.to_string()
        }
        async fn commit(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("commit {}", self.name));
            Ok(())
        }
        async fn delete(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("delete {}", self.name));
            Ok(())
        }
        async fn wait_for_ready(&self) -> bool {
            self.ready
        }
    }

    fn recorded(name: &'static str, ready: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Lifecycle> {
        Arc::new(Recorded {
            name,
            ready,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn commits_in_order_and_deletes_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let finalizers = SharedFinalizers::new();
        commit_all(
            &finalizers,
            &[recorded("authorization", true, &log), recorded("rate-limit", true, &log)],
        )
        .await
        .unwrap();
        assert_eq!(finalizers.run_all().await, 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["commit authorization", "commit rate-limit", "delete rate-limit", "delete authorization"]
        );
    }

    #[tokio::test]
    async fn stops_at_first_unready_collaborator() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let finalizers = SharedFinalizers::new();
        let err = commit_all(
            &finalizers,
            &[recorded("policy", false, &log), recorded("never", true, &log)],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(finalizers.labels(), vec!["delete policy"]);
    }
}
