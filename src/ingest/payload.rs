use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Upper bound on files per submission.
pub const MAX_FILES: usize = 100;

/// Upper bound on a single file's content, in bytes.
pub const MAX_FILE_BYTES: usize = 1024 * 1024;

const MAX_REPO_LEN: usize = 140;
const MAX_BRANCH_SUFFIX_LEN: usize = 100;
const MAX_FILE_PATH_LEN: usize = 512;

lazy_static! {
    static ref REPO_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*/[A-Za-z0-9._-]+$").unwrap();
    static ref BRANCH_SUFFIX_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap();
    static ref FILE_PATH_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._/-]+$").unwrap();
}

/// One file to create or update on the ingestion branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFile {
    pub path: String,
    pub content: String,
}

impl IngestFile {
    /// Normalize line endings to `\n` and ensure a trailing newline so
    /// repeated submissions of the same logical content compare equal.
    pub fn normalize(&mut self) {
        if self.content.is_empty() {
            return;
        }
        let mut content = self.content.replace("\r\n", "\n").replace('\r', "\n");
        if !content.ends_with('\n') {
            content.push('\n');
        }
        self.content = content;
    }
}

/// Body of an admitted `/ingest` delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    /// Target repository as `owner/name`.
    pub repo: String,
    /// Suffix appended to the managed branch prefix.
    pub branch_suffix: String,
    pub files: Vec<IngestFile>,
}

impl IngestPayload {
    pub fn repo_parts(&self) -> Option<(&str, &str)> {
        self.repo.split_once('/')
    }
}

pub fn validate_repo(repo: &str) -> Result<(), String> {
    if repo.trim().is_empty() {
        return Err("Repository is required".to_string());
    }
    if repo.len() > MAX_REPO_LEN {
        return Err(format!(
            "Repository name too long (max {MAX_REPO_LEN} characters)"
        ));
    }
    if !REPO_REGEX.is_match(repo) {
        return Err("Repository must be in owner/name form".to_string());
    }
    Ok(())
}

pub fn validate_branch_suffix(suffix: &str) -> Result<(), String> {
    if suffix.trim().is_empty() {
        return Err("Branch suffix is required".to_string());
    }
    if suffix.len() > MAX_BRANCH_SUFFIX_LEN {
        return Err(format!(
            "Branch suffix too long (max {MAX_BRANCH_SUFFIX_LEN} characters)"
        ));
    }
    if suffix.contains("..") {
        return Err("Branch suffix cannot contain '..'".to_string());
    }
    if !BRANCH_SUFFIX_REGEX.is_match(suffix) {
        return Err(
            "Branch suffix can only contain letters, numbers, dots, underscores and hyphens, \
             and must start with a letter or number"
                .to_string(),
        );
    }
    Ok(())
}

pub fn validate_file_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("File path is required".to_string());
    }
    if path.len() > MAX_FILE_PATH_LEN {
        return Err(format!(
            "File path too long (max {MAX_FILE_PATH_LEN} characters)"
        ));
    }
    if path.starts_with('/') {
        return Err("File path must be relative".to_string());
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err("File path cannot contain empty, '.' or '..' segments".to_string());
    }
    if !FILE_PATH_REGEX.is_match(path) {
        return Err("File path contains unsupported characters".to_string());
    }
    Ok(())
}

pub fn validate_file_content(content: &str) -> Result<(), String> {
    if content.len() > MAX_FILE_BYTES {
        return Err(format!("File content too large (max {MAX_FILE_BYTES} bytes)"));
    }
    Ok(())
}
