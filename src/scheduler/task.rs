//! Task and response definitions.
//!
//! This module defines the wire types exchanged through the queues:
//!
//! - `Task`: one target URL plus analyzer options, published by the boss
//! - `Response`: the analyzer's return code and output, published by a thuglet
//! - `TaskOutcome`: how a claimed task ended, which decides its routing

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Timestamp layout appended to the host in task ids.
const TASK_ID_TIME_FORMAT: &str = "%Y_%m_%d__%H_%M_%S";

/// A unit of work: analyze one URL.
///
/// Wire form (task queue body):
///
/// ```json
/// { "id": "example.com_2024_01_31__12_00_00", "url": "http://example.com",
///   "opts": ["-T", "30"], "timeout": 1800 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Host plus creation timestamp. Diagnostic only; not guaranteed unique.
    pub id: String,
    /// Absolute target URL.
    pub url: String,
    /// Analyzer option tokens, passed before the URL. `None` means the
    /// analyzer's own defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Vec<String>>,
    /// Execution bound in seconds. `None` means the worker's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Task {
    /// Creates a task for `url`, adding `http://` when no scheme is given and
    /// deriving the id from the host and the current local time.
    ///
    /// Empty option lists are stored as `None`. Any string yields a task;
    /// the analyzer is the one to reject a target it cannot reach.
    pub fn new(url: &str, opts: Option<Vec<String>>, timeout: Option<u64>) -> Self {
        let url = normalize_url(url);
        let id = task_id(&url);

        Self {
            id,
            url,
            opts: opts.filter(|o| !o.is_empty()),
            timeout,
        }
    }

    /// Parses a task from its wire form.
    pub fn from_json(text: &str) -> Result<Self, TaskError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The analyzer command line: `binary [opt ...] url`.
    pub fn command_line(&self, binary: &str) -> Vec<String> {
        let mut command = vec![binary.to_string()];
        if let Some(ref opts) = self.opts {
            command.extend(opts.iter().cloned());
        }
        command.push(self.url.clone());
        command
    }
}

/// Prepends `http://` unless the URL already starts with `http://` or `https://`.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// Derives `<netloc>_<YYYY_MM_DD__HH_MM_SS>` from a URL and the current
/// local time.
///
/// Ids only have whole-second resolution, so two tasks for the same host
/// created within one second get the same id.
pub fn task_id(url: &str) -> String {
    task_id_at(url, Local::now())
}

/// [`task_id`] with an explicit timestamp.
pub fn task_id_at(url: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", netloc(url), at.format(TASK_ID_TIME_FORMAT))
}

/// Network location: whatever sits between `://` and the first `/`, `?` or
/// `#`, taken verbatim. Host case, ports and credentials are kept as given.
/// A string without `://` has no network location.
pub fn netloc(url: &str) -> &str {
    let Some((_, rest)) = url.split_once("://") else {
        return "";
    };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    &rest[..end]
}

/// Result of one analyzer run.
///
/// Wire form (response queue body):
///
/// ```json
/// { "id": "<task id>", "rc": 0, "url": "http://example.com", "raw": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the originating task.
    pub id: String,
    /// Process return code; negative signal number if the process was killed.
    pub rc: i32,
    /// Url of the originating task.
    pub url: String,
    /// Decoded, trimmed combined stdout and stderr.
    pub raw: String,
}

impl Response {
    pub fn new(task: &Task, rc: i32, raw: impl Into<String>) -> Self {
        Self {
            id: task.id.clone(),
            rc,
            url: task.url.clone(),
            raw: raw.into(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, TaskError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// How a claimed task ended.
///
/// Routing per variant:
///
/// | variant   | response queue | skip queue        |
/// |-----------|----------------|-------------------|
/// | `Success` | response       | -                 |
/// | `Timeout` | response       | original message  |
/// | `Failure` | -              | original message  |
///
/// The original message is always acknowledged off the task queue afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The analyzer exited on its own within the timeout.
    Success(Response),
    /// The analyzer was terminated after exceeding the timeout.
    Timeout {
        response: Response,
        original: Vec<u8>,
    },
    /// The task could not be handled at all.
    Failure { original: Vec<u8>, error: String },
}

impl TaskOutcome {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Success(_) => "success",
            TaskOutcome::Timeout { .. } => "timeout",
            TaskOutcome::Failure { .. } => "failure",
        }
    }

    /// The response to publish, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            TaskOutcome::Success(response) | TaskOutcome::Timeout { response, .. } => {
                Some(response)
            }
            TaskOutcome::Failure { .. } => None,
        }
    }

    /// The message to divert to the skip queue, if any.
    pub fn skipped(&self) -> Option<&[u8]> {
        match self {
            TaskOutcome::Success(_) => None,
            TaskOutcome::Timeout { original, .. } | TaskOutcome::Failure { original, .. } => {
                Some(original)
            }
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "http://example.com");
        assert_eq!(normalize_url("http://a.test/x"), "http://a.test/x");
        assert_eq!(normalize_url("https://a.test"), "https://a.test");
        assert_eq!(normalize_url("ftp://a.test"), "http://ftp://a.test");
    }

    #[test]
    fn test_task_id_layout() {
        let id = task_id("http://user:pw@example.com:8080/path?q=1");
        let (host, date) = id.split_at("user:pw@example.com:8080".len());

        assert_eq!(host, "user:pw@example.com:8080");
        // "_YYYY_MM_DD__HH_MM_SS"
        assert_eq!(date.len(), 21);
        assert!(date.starts_with('_'));
        assert_eq!(&date[11..13], "__");
    }

    #[test]
    fn test_netloc_is_taken_verbatim() {
        assert_eq!(netloc("https://Example.COM:443/"), "Example.COM:443");
        assert_eq!(netloc("http://example.com:99999"), "example.com:99999");
        assert_eq!(netloc("http://exa mple.com"), "exa mple.com");
        assert_eq!(netloc("http://a.test?q=1#frag"), "a.test");
        assert_eq!(netloc("http://a.test#frag/x"), "a.test");
        assert_eq!(netloc("http://"), "");
        assert_eq!(netloc("no-scheme"), "");
    }

    #[test]
    fn test_task_id_at_formats_timestamp() {
        let at = Local
            .with_ymd_and_hms(2024, 1, 31, 12, 0, 5)
            .single()
            .expect("unambiguous local time");
        assert_eq!(
            task_id_at("http://example.com/x", at),
            "example.com_2024_01_31__12_00_05"
        );
    }

    #[test]
    fn test_unparseable_targets_still_get_ids() {
        let task = Task::new("example.com:99999", None, None);
        assert_eq!(task.url, "http://example.com:99999");
        assert!(task.id.starts_with("example.com:99999_"));

        let task = Task::new("http://exa mple.com", None, None);
        assert!(task.id.starts_with("exa mple.com_"));
    }

    #[test]
    fn test_task_new() {
        let task = Task::new("example.com", Some(vec![]), Some(30));

        assert_eq!(task.url, "http://example.com");
        assert!(task.id.starts_with("example.com_"));
        assert_eq!(task.opts, None);
        assert_eq!(task.timeout, Some(30));
    }

    #[test]
    fn test_task_wire_omits_missing_opts() {
        let task = Task {
            id: "example.com_2024_01_31__12_00_00".to_string(),
            url: "http://example.com".to_string(),
            opts: None,
            timeout: Some(1800),
        };

        let value = serde_json::to_value(&task).expect("serialize");
        assert!(value.get("opts").is_none());
        assert_eq!(value["timeout"], 1800);
        assert_eq!(value["url"], "http://example.com");
    }

    #[test]
    fn test_task_from_wire_tolerates_null_and_missing_fields() {
        let task = Task::from_json(r#"{"id":"a","url":"http://a","timeout":null}"#)
            .expect("valid message");
        assert_eq!(task.opts, None);
        assert_eq!(task.timeout, None);

        assert!(Task::from_json(r#"{"id":"a"}"#).is_err());
        assert!(Task::from_json("not json").is_err());
    }

    #[test]
    fn test_command_line() {
        let mut task = Task::new("example.com", None, None);
        assert_eq!(task.command_line("thug"), vec!["thug", "http://example.com"]);

        task.opts = Some(vec!["-T".to_string(), "30".to_string(), "-E".to_string()]);
        assert_eq!(
            task.command_line("thug"),
            vec!["thug", "-T", "30", "-E", "http://example.com"]
        );
    }

    #[test]
    fn test_response_wire_fields() {
        let task = Task::new("example.com", None, None);
        let response = Response::new(&task, -15, "partial output");

        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["id"], task.id.as_str());
        assert_eq!(value["rc"], -15);
        assert_eq!(value["url"], "http://example.com");
        assert_eq!(value["raw"], "partial output");
    }

    #[test]
    fn test_outcome_routing() {
        let task = Task::new("example.com", None, None);
        let response = Response::new(&task, 0, "");

        let success = TaskOutcome::Success(response.clone());
        assert!(success.response().is_some());
        assert!(success.skipped().is_none());

        let timeout = TaskOutcome::Timeout {
            response,
            original: b"orig".to_vec(),
        };
        assert!(timeout.response().is_some());
        assert_eq!(timeout.skipped(), Some(&b"orig"[..]));

        let failure = TaskOutcome::Failure {
            original: b"orig".to_vec(),
            error: "boom".to_string(),
        };
        assert!(failure.response().is_none());
        assert_eq!(failure.skipped(), Some(&b"orig"[..]));
        assert_eq!(failure.to_string(), "failure");
    }
}
