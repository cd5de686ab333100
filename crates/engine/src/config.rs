//! Uploader configuration.
//!
//! Every field has a serde default so partial TOML/JSON documents load.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use upqueue_protocol::constants::{DEFAULT_FILE_POST_NAME, DEFAULT_HTTP_SUCCESS};

/// Settings consumed by [`UploadEngine`](crate::UploadEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Destination for uploads. Required before the first upload starts.
    #[serde(default)]
    pub upload_url: Option<String>,

    /// When set, used instead of `upload_url` for this session.
    #[serde(default)]
    pub alternate_upload_url: Option<String>,

    /// Multipart field name carrying the file bytes.
    #[serde(default = "default_file_post_name")]
    pub file_post_name: String,

    /// Extra form fields sent with every upload.
    #[serde(default)]
    pub post_params: BTreeMap<String, String>,

    /// Extra request headers sent with every upload.
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,

    /// Human size limit such as `"50 MB"`. Empty or `"0"` means unlimited.
    #[serde(default)]
    pub file_size_limit: String,

    /// Maximum successful uploads per session (0 = unlimited).
    #[serde(default)]
    pub file_upload_limit: u64,

    /// Maximum number of files in the queue at once.
    #[serde(default = "default_file_queue_limit")]
    pub file_queue_limit: u64,

    /// `;`-separated filename patterns, e.g. `"*.jpg;*.png"`.
    #[serde(default = "default_file_types")]
    pub file_types: String,

    /// Response codes treated as success.
    #[serde(default = "default_http_success")]
    pub http_success: Vec<u16>,

    /// Put failed files back at the end of the queue.
    #[serde(default)]
    pub requeue_on_error: bool,

    /// Seconds to wait for a response after the body is sent before
    /// assuming success (0 = wait indefinitely).
    #[serde(default)]
    pub assume_success_timeout: u64,
}

fn default_file_post_name() -> String {
    DEFAULT_FILE_POST_NAME.into()
}

// Largest value TOML integers can hold.
fn default_file_queue_limit() -> u64 {
    i64::MAX as u64
}

fn default_file_types() -> String {
    "*.*".into()
}

fn default_http_success() -> Vec<u16> {
    vec![DEFAULT_HTTP_SUCCESS]
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            upload_url: None,
            alternate_upload_url: None,
            file_post_name: default_file_post_name(),
            post_params: BTreeMap::new(),
            http_headers: BTreeMap::new(),
            file_size_limit: String::new(),
            file_upload_limit: 0,
            file_queue_limit: default_file_queue_limit(),
            file_types: default_file_types(),
            http_success: default_http_success(),
            requeue_on_error: false,
            assume_success_timeout: 0,
        }
    }
}

impl UploaderConfig {
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = Some(url.into());
        self
    }

    pub fn with_alternate_upload_url(mut self, url: impl Into<String>) -> Self {
        self.alternate_upload_url = Some(url.into());
        self
    }

    pub fn with_file_post_name(mut self, name: impl Into<String>) -> Self {
        self.file_post_name = name.into();
        self
    }

    pub fn with_post_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.post_params.insert(key.into(), value.into());
        self
    }

    pub fn with_http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_file_size_limit(mut self, limit: impl Into<String>) -> Self {
        self.file_size_limit = limit.into();
        self
    }

    pub fn with_file_upload_limit(mut self, limit: u64) -> Self {
        self.file_upload_limit = limit;
        self
    }

    pub fn with_file_queue_limit(mut self, limit: u64) -> Self {
        self.file_queue_limit = limit;
        self
    }

    pub fn with_file_types(mut self, patterns: impl Into<String>) -> Self {
        self.file_types = patterns.into();
        self
    }

    pub fn with_http_success(mut self, codes: Vec<u16>) -> Self {
        self.http_success = codes;
        self
    }

    pub fn with_requeue_on_error(mut self, requeue: bool) -> Self {
        self.requeue_on_error = requeue;
        self
    }

    pub fn with_assume_success_timeout(mut self, seconds: u64) -> Self {
        self.assume_success_timeout = seconds;
        self
    }

    /// Session destination: the alternate URL if set, else the upload URL.
    /// Empty strings count as unset.
    pub fn session_url(&self) -> Option<&str> {
        self.alternate_upload_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.upload_url.as_deref().filter(|u| !u.is_empty()))
    }

    /// Multipart field name, falling back to `"Filedata"` when blank.
    pub fn field_name(&self) -> &str {
        if self.file_post_name.trim().is_empty() {
            DEFAULT_FILE_POST_NAME
        } else {
            &self.file_post_name
        }
    }

    pub fn assume_success_after(&self) -> Option<Duration> {
        (self.assume_success_timeout > 0).then(|| Duration::from_secs(self.assume_success_timeout))
    }
}
