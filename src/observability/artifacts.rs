//! Where failure artifacts land: `<run-root>/<worker-id>/<test-name>/`.

use std::path::{Path, PathBuf};

/// Worker id from a variable lookup
///
/// `KUADRANT_WORKER_ID` wins; under nextest the global slot becomes `gw<N>`;
/// a plain single-process run is `master`.
pub fn worker_id_from<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(id) = lookup("KUADRANT_WORKER_ID").filter(|id| !id.is_empty()) {
        return sanitize(&id);
    }
    if let Some(slot) = lookup("NEXTEST_TEST_GLOBAL_SLOT").and_then(|s| s.parse::<u32>().ok()) {
        return format!("gw{}", slot);
    }
    "master".to_string()
}

pub fn worker_id() -> String {
    worker_id_from(|name| std::env::var(name).ok())
}

/// Path-safe form of a test or component name
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
    worker: String,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>, worker: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            worker: worker.into(),
        }
    }

    /// Layout under `root` for the current worker
    pub fn for_worker(root: impl Into<PathBuf>) -> Self {
        Self::new(root, worker_id())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn test_dir(&self, test_name: &str) -> PathBuf {
        self.root.join(&self.worker).join(sanitize(test_name))
    }

    /// `<component>-<pod>-<container>.log`
    pub fn log_file(&self, test_name: &str, component: &str, pod: &str, container: &str) -> PathBuf {
        self.test_dir(test_name)
            .join(format!("{}.log", file_stem(component, pod, container)))
    }

    /// Sibling of [`Self::log_file`] written when collection failed
    pub fn error_file(&self, test_name: &str, component: &str, pod: &str, container: &str) -> PathBuf {
        self.test_dir(test_name)
            .join(format!("{}-error.txt", file_stem(component, pod, container)))
    }
}

fn file_stem(component: &str, pod: &str, container: &str) -> String {
    format!("{}-{}-{}", sanitize(component), sanitize(pod), sanitize(container))
}
