use tracing::{info, warn};

use super::payload::IngestFile;
use crate::github::client::GitHubClient;
use crate::github::GitHubError;

/// Branches this service manages are namespaced under this prefix.
pub const BRANCH_PREFIX: &str = "ingestr-";

const MANAGED_SECTION_START: &str = "<!-- Section managed by ingestr. Do not edit manually. -->";
const MANAGED_SECTION_END: &str = "<!-- End of section managed by ingestr. -->";

/// Result of a completed ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub pr_url: String,
    pub pr_number: u64,
    pub branch: String,
}

/// Push the submitted files onto a managed branch and make sure one open
/// pull request tracks them.
///
/// Every step is idempotent: the branch create tolerates an existing ref,
/// file writes carry the current blob sha, and an up-to-date pull request
/// is left untouched.
pub async fn open_pull_request(
    github: &GitHubClient,
    owner: &str,
    name: &str,
    branch_suffix: &str,
    files: &[IngestFile],
) -> Result<IngestOutcome, GitHubError> {
    let repo = github.get_repo(owner, name).await?;
    let base = github.get_branch(owner, name, &repo.default_branch).await?;

    let branch = format!("{BRANCH_PREFIX}{branch_suffix}");
    match github
        .create_branch_ref(owner, name, &branch, &base.commit.sha)
        .await
    {
        Ok(()) => info!(%branch, sha = %base.commit.sha, "created ingestion branch"),
        Err(GitHubError::Status { status: 422, .. }) => {
            info!(%branch, "ingestion branch already exists")
        }
        Err(e) => return Err(e),
    }

    for file in files {
        let existing = github.file_info(owner, name, &file.path, &branch).await?;
        if existing.is_none() {
            info!(path = %file.path, "file does not exist on branch, creating");
        }
        let message = format!("Create or update {}", file.path);
        github
            .put_file(
                owner,
                name,
                &file.path,
                &branch,
                &message,
                &file.content,
                existing.as_ref().map(|info| info.sha.as_str()),
            )
            .await?;
    }

    let head = format!("{owner}:{branch}");
    let title = format!("Create or update files: {head}");
    let section = render_managed_section(files);

    let open = github
        .list_open_pulls(owner, name, &head, &repo.default_branch)
        .await?;

    let pull = match open.first() {
        None => {
            let body = update_managed_section("", &section);
            let pull = github
                .create_pull(owner, name, &title, &head, &repo.default_branch, &body)
                .await?;
            info!(number = pull.number, url = %pull.html_url, "opened ingestion pull request");
            pull
        }
        Some(existing) => {
            if open.len() > 1 {
                warn!(
                    %head,
                    count = open.len(),
                    "multiple open pull requests for ingestion branch, updating the first"
                );
            }
            let current_body = existing.body.clone().unwrap_or_default();
            if existing.title == title
                && lines_equal(extract_managed_section(&current_body).trim(), section.trim())
            {
                info!(number = existing.number, "pull request already up to date");
                existing.clone()
            } else {
                let updated = github
                    .update_pull(
                        owner,
                        name,
                        existing.number,
                        &title,
                        &update_managed_section(&current_body, &section),
                    )
                    .await?;
                info!(number = updated.number, "refreshed ingestion pull request");
                updated
            }
        }
    };

    Ok(IngestOutcome {
        pr_url: pull.html_url,
        pr_number: pull.number,
        branch,
    })
}

fn render_managed_section(files: &[IngestFile]) -> String {
    let mut section = String::from(
        "This pull request is automatically generated by the ingestr service.\n\n\
         <!-- tags: ingestr -->\n\n\
         ### Files in the latest submission:\n",
    );
    for file in files {
        section.push_str(&format!("* {}\n", file.path));
    }
    section
}

fn wrap_managed_section(content: &str) -> String {
    format!("\n\n{MANAGED_SECTION_START}\n{content}\n{MANAGED_SECTION_END}\n\n")
}

fn extract_managed_section(body: &str) -> &str {
    let Some(start) = body.find(MANAGED_SECTION_START) else {
        return "";
    };
    let after_start = &body[start + MANAGED_SECTION_START.len()..];
    match after_start.find(MANAGED_SECTION_END) {
        Some(end) => &after_start[..end],
        None => "",
    }
}

/// Replace the managed section of `body` with `content`, leaving any text
/// the maintainers wrote around it alone. Bodies without markers get the
/// section appended.
fn update_managed_section(body: &str, content: &str) -> String {
    match (
        body.find(MANAGED_SECTION_START),
        body.find(MANAGED_SECTION_END),
    ) {
        (Some(start), Some(end)) if end >= start => {
            let before = body[..start].trim_end();
            let after = body[end + MANAGED_SECTION_END.len()..].trim_start();
            format!("{before}{}{after}", wrap_managed_section(content))
        }
        _ => {
            format!("{}{}", body.trim_end(), wrap_managed_section(content))
        }
    }
}

/// Whole-line comparison that is indifferent to trailing line endings.
fn lines_equal(a: &str, b: &str) -> bool {
    a.lines().eq(b.lines())
}
