//! Builds tasks from a batch file or from URLs given directly.
//!
//! Batch file layout:
//!
//! ```json
//! { "urls": ["example.com", "http://other.test/path"], "opts": ["-T", "30"] }
//! ```
//!
//! URLs are collapsed into a set before tasks are built, so duplicates yield a
//! single task. An `opts` key in the batch file takes precedence over the
//! options passed by the caller, even when it is an empty list.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use super::task::Task;
use crate::error::TaskError;

/// Batch file contents.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    pub urls: Vec<String>,
    /// `Some` whenever the key is present, including `"opts": []`.
    #[serde(default)]
    pub opts: Option<Vec<String>>,
}

/// Accumulates tasks for one boss invocation.
#[derive(Debug, Default)]
pub struct TaskBuilder {
    tasks: Vec<Task>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one task per distinct URL in the batch file.
    ///
    /// `opts` is a whitespace-separated option string used only when the
    /// file has no `opts` key. An unreadable or malformed file adds nothing;
    /// the problem is logged and otherwise ignored.
    ///
    /// Returns the number of tasks added.
    pub fn load_tasks(
        &mut self,
        path: impl AsRef<Path>,
        opts: Option<&str>,
        timeout: Option<u64>,
    ) -> usize {
        let path = path.as_ref();
        let batch = match read_batch_file(path) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable task file");
                return 0;
            }
        };

        // Task file options are prioritized.
        let opts = match batch.opts {
            Some(file_opts) => Some(file_opts),
            None => split_opts(opts),
        };

        self.add_urls(batch.urls, opts, timeout)
    }

    /// Adds one task per distinct URL given directly.
    ///
    /// Returns the number of tasks added.
    pub fn load_input<I, S>(&mut self, urls: I, opts: Option<&str>, timeout: Option<u64>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls = urls.into_iter().map(Into::into).collect();
        self.add_urls(urls, split_opts(opts), timeout)
    }

    fn add_urls(
        &mut self,
        urls: Vec<String>,
        opts: Option<Vec<String>>,
        timeout: Option<u64>,
    ) -> usize {
        let unique: HashSet<String> = urls.into_iter().collect();
        let added = unique.len();

        for url in unique {
            let task = Task::new(&url, opts.clone(), timeout);
            debug!(task_id = %task.id, url = %task.url, "Built task");
            self.tasks.push(task);
        }

        added
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Hands over the accumulated tasks.
    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

fn read_batch_file(path: &Path) -> Result<BatchFile, TaskError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Splits an option string on whitespace; blank strings mean no options.
pub fn split_opts(opts: Option<&str>) -> Option<Vec<String>> {
    let tokens: Vec<String> = opts?.split_whitespace().map(str::to_string).collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}
