use crate::{captcha::Verification, models::StoredFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Browser,
    Other,
}

impl ClientKind {
    /// Browsers can be shown a challenge page, everything else just gets an error.
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent else {
            return Self::Other;
        };

        let ua = ua.to_ascii_lowercase();
        const TOOLS: &[&str] = &["curl", "wget", "python", "go-http-client", "httpie", "okhttp", "java/", "libwww", "bot", "spider"];
        if TOOLS.iter().any(|tool| ua.contains(tool)) {
            return Self::Other;
        }

        if ua.starts_with("mozilla/") || ua.starts_with("opera/") {
            Self::Browser
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidReference,
    TooManyDownloads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    ChallengeRequired,
    Reject(RejectReason),
}

/// Whether a human check is worth asking for before [`evaluate`].
pub fn needs_verification(record: &StoredFile, threshold: i64) -> bool {
    record.downloads >= threshold
}

pub fn evaluate(
    record: Option<&StoredFile>,
    requested_name: &str,
    threshold: i64,
    verification: Verification,
    client: ClientKind,
) -> GateDecision {
    let record = match record {
        Some(record) if record.is_servable_as(requested_name) => record,
        _ => return GateDecision::Reject(RejectReason::InvalidReference),
    };

    if !needs_verification(record, threshold) || verification == Verification::Verified {
        return GateDecision::Allow;
    }

    match client {
        ClientKind::Browser => GateDecision::ChallengeRequired,
        ClientKind::Other => GateDecision::Reject(RejectReason::TooManyDownloads),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::StorageMethod;

    const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

    fn record(downloads: i64) -> StoredFile {
        let mut sf = StoredFile::new(
            "K1".into(),
            "dk".into(),
            "a.txt".into(),
            StorageMethod::Local,
            Utc::now(),
        );
        sf.downloads = downloads;
        sf
    }

    #[test]
    fn detects_browsers() {
        assert_eq!(ClientKind::from_user_agent(Some(FIREFOX)), ClientKind::Browser);
        assert_eq!(ClientKind::from_user_agent(Some("curl/8.5.0")), ClientKind::Other);
        assert_eq!(ClientKind::from_user_agent(Some("Wget/1.21")), ClientKind::Other);
        assert_eq!(
            ClientKind::from_user_agent(Some("Mozilla/5.0 (compatible; Googlebot/2.1)")),
            ClientKind::Other
        );
        assert_eq!(ClientKind::from_user_agent(None), ClientKind::Other);
    }

    #[test]
    fn invalid_references_are_rejected() {
        let mut deleted = record(0);
        deleted.deleted = true;
        let reject = GateDecision::Reject(RejectReason::InvalidReference);

        for (candidate, name) in [(None, "a.txt"), (Some(&deleted), "a.txt"), (Some(&record(0)), "b.txt")] {
            for verification in [Verification::Verified, Verification::NotVerified] {
                for client in [ClientKind::Browser, ClientKind::Other] {
                    assert_eq!(evaluate(candidate, name, 3, verification, client), reject);
                }
            }
        }
    }

    #[test]
    fn below_threshold_is_allowed() {
        for downloads in 0..3 {
            let sf = record(downloads);
            assert_eq!(
                evaluate(Some(&sf), "a.txt", 3, Verification::NotVerified, ClientKind::Other),
                GateDecision::Allow
            );
        }
    }

    #[test]
    fn at_threshold_requires_verification() {
        let sf = record(3);
        assert_eq!(
            evaluate(Some(&sf), "a.txt", 3, Verification::Verified, ClientKind::Other),
            GateDecision::Allow
        );
        assert_eq!(
            evaluate(Some(&sf), "a.txt", 3, Verification::NotVerified, ClientKind::Browser),
            GateDecision::ChallengeRequired
        );
        assert_eq!(
            evaluate(Some(&sf), "a.txt", 3, Verification::NotVerified, ClientKind::Other),
            GateDecision::Reject(RejectReason::TooManyDownloads)
        );
    }

    #[test]
    fn zero_threshold_always_challenges() {
        let sf = record(0);
        assert!(needs_verification(&sf, 0));
        assert_eq!(
            evaluate(Some(&sf), "a.txt", 0, Verification::NotVerified, ClientKind::Browser),
            GateDecision::ChallengeRequired
        );
    }
}
