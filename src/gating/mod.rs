// src/gating/mod.rs

//! Test gating evaluation
//!
//! Maps decisions from the external decision service to a
//! [`TestGatingStatus`] and decides whether that status allows a stable
//! push. The HTTP side of the decision and waiver services lives behind the
//! [`DecisionService`] and [`WaiverService`] traits.

use crate::config::TestGatingSection;
use crate::db::models::{Release, TestGatingStatus, Update, UpdateRequest, UpdateStatus};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Summary the decision service returns when no policy requires tests
pub const NO_TESTS_REQUIRED: &str = "no tests are required";

/// One thing a decision is asked about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectItem {
    pub item: String,
    #[serde(rename = "type")]
    pub subject_type: String,
}

/// A decision query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSubject {
    pub product_version: String,
    pub decision_context: String,
    pub subject: Vec<SubjectItem>,
}

impl DecisionSubject {
    /// Subject covering every build of `update` plus the update itself
    pub fn for_update(update: &Update, release: &Release) -> Self {
        let mut subject: Vec<SubjectItem> = update
            .builds
            .iter()
            .map(|b| SubjectItem {
                item: b.nvr.clone(),
                subject_type: "koji_build".to_string(),
            })
            .collect();
        subject.push(SubjectItem {
            item: update.alias.clone(),
            subject_type: "bodhi_update".to_string(),
        });

        // Pending updates headed for testing are asked about testing; everything else about stable
        let decision_context = if update.request == Some(UpdateRequest::Testing)
            && update.status == UpdateStatus::Pending
        {
            "bodhi_update_push_testing"
        } else {
            "bodhi_update_push_stable"
        };

        Self {
            product_version: product_version(release),
            decision_context: decision_context.to_string(),
            subject,
        }
    }
}

/// "Fedora 40" becomes "fedora-40"
pub fn product_version(release: &Release) -> String {
    release.long_name.to_lowercase().replace(' ', "-")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsatisfiedRequirement {
    /// Subject item the requirement applies to
    pub item: String,
    pub testcase: String,
    #[serde(rename = "type")]
    pub requirement_type: String,
    #[serde(default)]
    pub scenario: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub policies_satisfied: bool,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub applicable_policies: Vec<String>,
    #[serde(default)]
    pub unsatisfied_requirements: Vec<UnsatisfiedRequirement>,
}

impl Decision {
    /// Decision for a subject no policy applies to
    pub fn no_policies() -> Self {
        Self {
            policies_satisfied: true,
            summary: NO_TESTS_REQUIRED.to_string(),
            applicable_policies: Vec::new(),
            unsatisfied_requirements: Vec::new(),
        }
    }
}

pub trait DecisionService: Send + Sync {
    /// Ask for a decision; implementations must give up after `timeout`
    ///
    /// Timeouts and server errors are `Error::ServiceUnavailable`, refusals
    /// are `Error::ServiceRejected`.
    fn query_decision(&self, subject: &DecisionSubject, timeout: Duration) -> Result<Decision>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiver {
    pub subject: String,
    pub testcase: String,
    pub product_version: String,
    pub username: String,
    pub comment: Option<String>,
}

pub trait WaiverService: Send + Sync {
    fn post_waiver(&self, waiver: &Waiver) -> Result<()>;
}

/// Map a decision to a gating status
pub fn status_from_decision(decision: &Decision) -> TestGatingStatus {
    if decision.applicable_policies.is_empty() || decision.summary == NO_TESTS_REQUIRED {
        if decision.policies_satisfied {
            return TestGatingStatus::Ignored;
        }
    }
    if decision.policies_satisfied {
        TestGatingStatus::Passed
    } else {
        TestGatingStatus::Failed
    }
}

/// Map the outcome of a query, where a failed query means the service failed
pub fn status_from_query(result: &Result<Decision>) -> TestGatingStatus {
    match result {
        Ok(decision) => status_from_decision(decision),
        Err(_) => TestGatingStatus::GreenwaveFailed,
    }
}

/// What gating says about a stable push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// No verdict yet; retry later
    Pending(String),
    /// Blocked until the results change or are waived
    Blocked(String),
}

/// Verdict for a stable push given the update's gating status
pub fn stable_verdict(status: Option<TestGatingStatus>) -> Verdict {
    match status {
        Some(TestGatingStatus::Ignored) | Some(TestGatingStatus::Passed) => Verdict::Allowed,
        None | Some(TestGatingStatus::Waiting) => {
            Verdict::Pending("Test gating has not been evaluated yet".to_string())
        }
        Some(TestGatingStatus::Queued) | Some(TestGatingStatus::Running) => {
            Verdict::Pending("Required tests are still running".to_string())
        }
        Some(TestGatingStatus::Failed) => {
            Verdict::Blocked("Required tests did not pass on this update".to_string())
        }
        Some(TestGatingStatus::GreenwaveFailed) => Verdict::Blocked(
            "The test gating decision could not be retrieved".to_string(),
        ),
    }
}

/// True only for ignored or passed
pub fn can_push_to_stable(status: Option<TestGatingStatus>) -> bool {
    stable_verdict(status) == Verdict::Allowed
}

/// Query the decision service, retrying retryable failures with fixed backoff
pub fn query_with_retry(
    service: &dyn DecisionService,
    subject: &DecisionSubject,
    policy: &TestGatingSection,
) -> Result<Decision> {
    let attempts = policy.retries + 1;
    let mut attempt = 1;
    loop {
        match service.query_decision(subject, policy.timeout()) {
            Ok(decision) => return Ok(decision),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "Decision query failed (attempt {}/{}): {}; retrying",
                    attempt, attempts, e
                );
                std::thread::sleep(policy.retry_backoff());
                attempt += 1;
            }
            Err(e) => {
                debug!("Decision query failed after {} attempt(s): {}", attempt, e);
                return Err(e);
            }
        }
    }
}

/// Decision service for deployments without gating policies
#[derive(Debug, Default)]
pub struct NoPolicyDecisions;

impl DecisionService for NoPolicyDecisions {
    fn query_decision(&self, _subject: &DecisionSubject, _timeout: Duration) -> Result<Decision> {
        Ok(Decision::no_policies())
    }
}

/// Waiver service that records waivers in memory and logs them
#[derive(Debug, Default)]
pub struct MemoryWaivers {
    waivers: Mutex<Vec<Waiver>>,
}

impl MemoryWaivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waivers(&self) -> Vec<Waiver> {
        self.waivers.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl WaiverService for MemoryWaivers {
    fn post_waiver(&self, waiver: &Waiver) -> Result<()> {
        info!(
            "Waiving {} for {} on behalf of {}",
            waiver.testcase, waiver.subject, waiver.username
        );
        self.waivers
            .lock()
            .map_err(|_| Error::ServiceUnavailable {
                service: "WaiverDB".to_string(),
                message: "waiver store poisoned".to_string(),
            })?
            .push(waiver.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing_decision() -> Decision {
        Decision {
            policies_satisfied: false,
            summary: "1 of 2 required tests failed".to_string(),
            applicable_policies: vec!["kojibuild_bodhipush".to_string()],
            unsatisfied_requirements: vec![UnsatisfiedRequirement {
                item: "foo-1.0-1.fc40".to_string(),
                testcase: "dist.rpmdeplint".to_string(),
                requirement_type: "test-result-failed".to_string(),
                scenario: None,
            }],
        }
    }

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> Error,
    }

    impl DecisionService for Flaky {
        fn query_decision(&self, _s: &DecisionSubject, _t: Duration) -> Result<Decision> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok(Decision::no_policies())
            }
        }
    }

    fn unavailable() -> Error {
        Error::ServiceUnavailable {
            service: "Greenwave".to_string(),
            message: "500".to_string(),
        }
    }

    fn rejected() -> Error {
        Error::ServiceRejected {
            service: "Greenwave".to_string(),
            message: "400".to_string(),
        }
    }

    fn fast_policy(retries: u32) -> TestGatingSection {
        TestGatingSection {
            required: true,
            retries,
            retry_backoff_ms: 0,
            timeout_secs: 1,
        }
    }

    fn subject() -> DecisionSubject {
        DecisionSubject {
            product_version: "fedora-40".to_string(),
            decision_context: "bodhi_update_push_stable".to_string(),
            subject: vec![],
        }
    }

    #[test]
    fn test_mapping_rules() {
        assert_eq!(
            status_from_decision(&Decision::no_policies()),
            TestGatingStatus::Ignored
        );

        let mut passed = failing_decision();
        passed.policies_satisfied = true;
        passed.unsatisfied_requirements.clear();
        assert_eq!(status_from_decision(&passed), TestGatingStatus::Passed);

        assert_eq!(
            status_from_decision(&failing_decision()),
            TestGatingStatus::Failed
        );
        assert_eq!(
            status_from_query(&Err(unavailable())),
            TestGatingStatus::GreenwaveFailed
        );
    }

    #[test]
    fn test_stable_verdicts() {
        assert!(can_push_to_stable(Some(TestGatingStatus::Passed)));
        assert!(can_push_to_stable(Some(TestGatingStatus::Ignored)));
        assert!(!can_push_to_stable(Some(TestGatingStatus::Running)));
        assert!(matches!(
            stable_verdict(Some(TestGatingStatus::Queued)),
            Verdict::Pending(_)
        ));
        assert!(matches!(
            stable_verdict(Some(TestGatingStatus::GreenwaveFailed)),
            Verdict::Blocked(_)
        ));
        assert!(matches!(stable_verdict(None), Verdict::Pending(_)));
    }

    #[test]
    fn test_retry_recovers_from_transient_failures() {
        let service = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: unavailable,
        };
        let decision = query_with_retry(&service, &subject(), &fast_policy(3)).unwrap();
        assert_eq!(decision, Decision::no_policies());
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_is_bounded() {
        let service = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: unavailable,
        };
        let err = query_with_retry(&service, &subject(), &fast_policy(3)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_rejection_is_not_retried() {
        let service = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: rejected,
        };
        let err = query_with_retry(&service, &subject(), &fast_policy(3)).unwrap_err();
        assert!(matches!(err, Error::ServiceRejected { .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
