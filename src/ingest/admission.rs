use std::collections::HashSet;

const MAX_EVENT_TYPE_LEN: usize = 64;

/// Webhook event types GitHub currently delivers. Kept sorted so lookup
/// can binary search.
const KNOWN_EVENT_TYPES: &[&str] = &[
    "branch_protection_configuration",
    "branch_protection_rule",
    "check_run",
    "check_suite",
    "code_scanning_alert",
    "commit_comment",
    "create",
    "delete",
    "dependabot_alert",
    "deploy_key",
    "deployment",
    "deployment_protection_rule",
    "deployment_review",
    "deployment_status",
    "discussion",
    "discussion_comment",
    "fork",
    "github_app_authorization",
    "gollum",
    "installation",
    "installation_repositories",
    "installation_target",
    "issue_comment",
    "issues",
    "label",
    "marketplace_purchase",
    "member",
    "membership",
    "merge_group",
    "meta",
    "milestone",
    "org_block",
    "organization",
    "package",
    "page_build",
    "personal_access_token_request",
    "ping",
    "project",
    "project_card",
    "project_column",
    "projects_v2",
    "projects_v2_item",
    "projects_v2_status_update",
    "public",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_review_thread",
    "push",
    "registry_package",
    "release",
    "repository",
    "repository_advisory",
    "repository_dispatch",
    "repository_import",
    "repository_ruleset",
    "repository_vulnerability_alert",
    "secret_scanning_alert",
    "secret_scanning_alert_location",
    "security_advisory",
    "security_and_analysis",
    "sponsorship",
    "star",
    "status",
    "sub_issues",
    "team",
    "team_add",
    "watch",
    "workflow_dispatch",
    "workflow_job",
    "workflow_run",
];

/// Case-sensitive set of event types operators chose to accept.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: HashSet<String>,
}

impl AllowList {
    /// Parse the comma-separated operator value. Entries are trimmed and
    /// empties dropped; no case folding happens here or at match time.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { entries }
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains(event_type)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Why a delivery was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Missing or syntactically invalid event type.
    MalformedEventType,
    /// Well-formed, but not an event type GitHub sends.
    UnknownEventType,
    /// Recognized event type that operators have not allow-listed.
    NotAllowed,
}

impl RejectReason {
    /// Stable label for metrics and response details.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MalformedEventType => "malformed_event_type",
            RejectReason::UnknownEventType => "unknown_event_type",
            RejectReason::NotAllowed => "not_in_allow_list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestDecision {
    Accepted,
    Rejected(RejectReason),
}

impl IngestDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestDecision::Accepted)
    }
}

enum EventClass {
    Allowed,
    Malformed,
    Known,
    Unknown,
}

/// Decides, before any credential work happens, whether a delivery may
/// enter the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    allow: AllowList,
}

impl AdmissionGate {
    pub fn new(allow: AllowList) -> Self {
        Self { allow }
    }

    /// Classify `event_type` against the allow-list.
    ///
    /// The match below is exhaustive and only the exact allow-list hit
    /// admits; any class added later must pick a side explicitly.
    pub fn admit(&self, event_type: &str) -> IngestDecision {
        match self.classify(event_type) {
            EventClass::Allowed => IngestDecision::Accepted,
            EventClass::Malformed => IngestDecision::Rejected(RejectReason::MalformedEventType),
            EventClass::Unknown => IngestDecision::Rejected(RejectReason::UnknownEventType),
            EventClass::Known => IngestDecision::Rejected(RejectReason::NotAllowed),
        }
    }

    fn classify(&self, event_type: &str) -> EventClass {
        if event_type.is_empty()
            || event_type.len() > MAX_EVENT_TYPE_LEN
            || !event_type
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return EventClass::Malformed;
        }
        if self.allow.contains(event_type) {
            return EventClass::Allowed;
        }
        if KNOWN_EVENT_TYPES.binary_search(&event_type).is_ok() {
            EventClass::Known
        } else {
            EventClass::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AdmissionGate {
        AdmissionGate::new(AllowList::parse("push,pull_request"))
    }

    #[test]
    fn test_allow_listed_events_admitted() {
        assert_eq!(gate().admit("push"), IngestDecision::Accepted);
        assert_eq!(gate().admit("pull_request"), IngestDecision::Accepted);
    }

    #[test]
    fn test_match_is_case_sensitive() {
        assert_eq!(
            gate().admit("Push"),
            IngestDecision::Rejected(RejectReason::UnknownEventType)
        );
        assert_eq!(
            gate().admit("PULL_REQUEST"),
            IngestDecision::Rejected(RejectReason::UnknownEventType)
        );
    }

    #[test]
    fn test_known_but_not_allowed_events_rejected() {
        for event in ["issues", "workflow_run", "ping"] {
            assert_eq!(
                gate().admit(event),
                IngestDecision::Rejected(RejectReason::NotAllowed)
            );
        }
    }

    #[test]
    fn test_malformed_event_types_rejected() {
        let long = "a".repeat(MAX_EVENT_TYPE_LEN + 1);
        for event in ["", "push ", "push\n", "push;drop", "push/pull", long.as_str()] {
            assert_eq!(
                gate().admit(event),
                IngestDecision::Rejected(RejectReason::MalformedEventType),
                "event {event:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let gate = AdmissionGate::new(AllowList::parse(" , ,"));
        assert!(gate.allow.is_empty());
        assert_eq!(
            gate.admit("push"),
            IngestDecision::Rejected(RejectReason::NotAllowed)
        );
    }

    #[test]
    fn test_allow_list_entry_wins_over_known_table() {
        let gate = AdmissionGate::new(AllowList::parse("my_internal_event"));
        assert_eq!(gate.admit("my_internal_event"), IngestDecision::Accepted);
    }

    #[test]
    fn test_allow_list_parsing_trims_and_drops_empties() {
        let list = AllowList::parse(" push , pull_request ,, ");
        assert_eq!(list.len(), 2);
        assert!(list.contains("push"));
        assert!(list.contains("pull_request"));
        assert!(!list.contains("Push"));
    }

    #[test]
    fn test_known_event_table_is_sorted() {
        for pair in KNOWN_EVENT_TYPES.windows(2) {
            assert!(pair[0] < pair[1], "{} >= {}", pair[0], pair[1]);
        }
    }
}
