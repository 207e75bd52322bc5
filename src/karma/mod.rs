// src/karma/mod.rs

//! Karma and testing-requirement evaluation
//!
//! Everything here is a pure function of the comments, the update's
//! thresholds and the resolved policy. Callers persist whatever request
//! changes follow from the result.
//!
//! Karma counts only comments made since the most recent karma reset (a
//! system comment announcing added or removed builds). Within that window
//! each author's most recent non-zero vote counts once. Anonymous comments
//! and the submitter's own votes never count.

use crate::config::BodhiConfig;
use crate::db::models::{Comment, Release, TestGatingStatus, Update};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Phrase identifying the one-time "may be pushed" system comment
pub const STABLE_COMMENT_MARKER: &str = "can be pushed to stable now if the maintainer wishes";

/// Whether `comment` resets karma (builds were added to or removed from the update)
pub fn is_karma_reset(comment: &Comment, system_users: &[String]) -> bool {
    system_users.contains(&comment.author)
        && (comment.text.contains("New build") || comment.text.contains("Removed build"))
}

/// Comments since the latest karma reset, newest first
pub fn comments_since_reset<'a>(
    comments: &'a [Comment],
    system_users: &[String],
) -> Vec<&'a Comment> {
    comments
        .iter()
        .rev()
        .take_while(|c| !is_karma_reset(c, system_users))
        .collect()
}

/// Aggregated feedback on one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KarmaTally {
    pub positive: i32,
    pub negative: i32,
    /// +1 votes from members of the admin groups
    pub admin_approvals: i32,
    /// Bodhi has already said the update may go stable
    pub has_stable_comment: bool,
}

impl KarmaTally {
    /// Tally `comments` (oldest first) for an update submitted by `submitter`
    ///
    /// `admins` names the authors that belong to an admin group.
    pub fn from_comments(
        comments: &[Comment],
        submitter: &str,
        system_users: &[String],
        admins: &HashSet<String>,
    ) -> Self {
        let mut tally = KarmaTally::default();
        let mut counted: HashSet<&str> = HashSet::new();

        for comment in comments_since_reset(comments, system_users) {
            if system_users.contains(&comment.author)
                && comment.text.starts_with("This update ")
                && comment.text.contains(STABLE_COMMENT_MARKER)
            {
                tally.has_stable_comment = true;
            }

            if comment.karma == 0 || comment.anonymous || comment.author == submitter {
                continue;
            }
            if !counted.insert(comment.author.as_str()) {
                continue;
            }

            if comment.karma > 0 {
                tally.positive += comment.karma;
                if admins.contains(&comment.author) {
                    tally.admin_approvals += 1;
                }
            } else {
                tally.negative += comment.karma;
            }
        }

        tally
    }

    pub fn karma(&self) -> i32 {
        self.positive + self.negative
    }
}

/// Aggregate karma of `comments` on an update submitted by `submitter`
pub fn karma(comments: &[Comment], submitter: &str, system_users: &[String]) -> i32 {
    KarmaTally::from_comments(comments, submitter, system_users, &HashSet::new()).karma()
}

/// Karma reached the stable threshold, or testing requirements are otherwise met
pub fn meets_stable_requirements(
    karma: i32,
    stable_karma: Option<i32>,
    testing_requirements_met: bool,
) -> bool {
    matches!(stable_karma, Some(threshold) if karma >= threshold) || testing_requirements_met
}

/// Karma fell to the unstable threshold
pub fn crosses_unstable_threshold(karma: i32, unstable_karma: Option<i32>) -> bool {
    matches!(unstable_karma, Some(threshold) if karma <= threshold)
}

/// Whole days since the update reached testing
pub fn days_in_testing(date_testing: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    date_testing
        .map(|d| (now - d).num_days().max(0))
        .unwrap_or(0)
}

/// Gating status counts as passed when unset, ignored or passed
pub fn test_gating_passed(status: Option<TestGatingStatus>) -> bool {
    matches!(
        status,
        None | Some(TestGatingStatus::Ignored) | Some(TestGatingStatus::Passed)
    )
}

/// Policy values that apply to one update, resolved from config and release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestingPolicy {
    /// Days required in testing; critical path updates use the critpath value
    pub mandatory_days: i64,
    pub critpath_min_karma: i32,
    pub num_admin_approvals: Option<i32>,
    pub gating_required: bool,
}

impl TestingPolicy {
    pub fn for_update(config: &BodhiConfig, release: &Release, update: &Update) -> Self {
        let mandatory_days = if update.critpath {
            config.critpath.stable_after_days_without_negative_karma
        } else {
            config.mandatory_days_in_testing(release)
        };

        Self {
            mandatory_days,
            critpath_min_karma: config.critpath_min_karma(release),
            num_admin_approvals: config.critpath.num_admin_approvals,
            gating_required: config.test_gating.required,
        }
    }
}

/// Whether the update has met its release's testing requirements
pub fn meets_testing_requirements(
    update: &Update,
    tally: &KarmaTally,
    policy: &TestingPolicy,
    now: DateTime<Utc>,
) -> bool {
    if policy.gating_required && !test_gating_passed(update.test_gating_status) {
        return false;
    }

    let karma = tally.karma();
    if karma >= policy.critpath_min_karma {
        return true;
    }

    let days = days_in_testing(update.date_testing, now);
    if update.critpath {
        // Any standing negative vote blocks the time-based path
        if tally.negative < 0 {
            return false;
        }
        return days >= policy.mandatory_days;
    }

    if policy.mandatory_days == 0 {
        return true;
    }

    if matches!(update.stable_karma, Some(threshold) if karma >= threshold) {
        return true;
    }

    days >= policy.mandatory_days
}

/// Whether a critical path update has enough approval to go stable
pub fn critpath_approved(
    update: &Update,
    tally: &KarmaTally,
    policy: &TestingPolicy,
    now: DateTime<Utc>,
) -> bool {
    if meets_testing_requirements(update, tally, policy, now) {
        return true;
    }
    tally.admin_approvals >= policy.num_admin_approvals.unwrap_or(0)
        && tally.karma() >= policy.critpath_min_karma
}

/// Days until the update may go stable; 0 when unknown or already eligible
pub fn days_to_stable(
    update: &Update,
    tally: &KarmaTally,
    policy: &TestingPolicy,
    now: DateTime<Utc>,
) -> i64 {
    if update.date_testing.is_none() || meets_testing_requirements(update, tally, policy, now) {
        return 0;
    }
    (policy.mandatory_days - days_in_testing(update.date_testing, now)).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn system() -> Vec<String> {
        vec!["bodhi".to_string()]
    }

    fn vote(author: &str, karma: i32) -> Comment {
        Comment::new(1, author, "", karma)
    }

    fn policy(days: i64) -> TestingPolicy {
        TestingPolicy {
            mandatory_days: days,
            critpath_min_karma: 2,
            num_admin_approvals: Some(2),
            gating_required: false,
        }
    }

    #[test]
    fn test_three_votes_reach_stable_karma() {
        let comments = vec![vote("u1", 1), vote("u2", 1), vote("u3", 1)];
        let k = karma(&comments, "submitter", &system());
        assert_eq!(k, 3);
        assert!(meets_stable_requirements(k, Some(3), false));
        assert!(!meets_stable_requirements(2, Some(3), false));
        assert!(meets_stable_requirements(2, Some(3), true));
    }

    #[test]
    fn test_revote_overwrites_previous_vote() {
        let comments = vec![vote("u1", 1), vote("u2", 1), vote("u1", -1)];
        assert_eq!(karma(&comments, "submitter", &system()), 0);

        // A neutral comment does not withdraw a vote
        let comments = vec![vote("u1", 1), vote("u1", 0)];
        assert_eq!(karma(&comments, "submitter", &system()), 1);
    }

    #[test]
    fn test_self_and_anonymous_karma_ignored() {
        let mut anon = vote("anonymous", 1);
        anon.anonymous = true;
        let comments = vec![vote("submitter", 1), anon, vote("u1", -1)];
        assert_eq!(karma(&comments, "submitter", &system()), -1);
    }

    #[test]
    fn test_build_change_resets_karma() {
        let reset = Comment::new(1, "bodhi", "New build(s): foo-1.0-2.fc40.", 0);
        let comments = vec![vote("u1", 1), vote("u2", 1), reset, vote("u3", 1)];
        assert_eq!(karma(&comments, "submitter", &system()), 1);

        // Only system users can reset karma
        let fake = Comment::new(1, "mallory", "New build(s): nope", 0);
        let comments = vec![vote("u1", 1), fake];
        assert_eq!(karma(&comments, "submitter", &system()), 1);
    }

    #[test]
    fn test_admin_approvals_and_stable_comment() {
        let admins: HashSet<String> = ["qa-person".to_string()].into_iter().collect();
        let stable = Comment::new(
            1,
            "bodhi",
            "This update has reached the stable karma threshold and can be pushed to stable now if the maintainer wishes.",
            0,
        );
        let comments = vec![vote("qa-person", 1), vote("u1", 1), stable];
        let tally = KarmaTally::from_comments(&comments, "submitter", &system(), &admins);
        assert_eq!(tally.admin_approvals, 1);
        assert_eq!(tally.karma(), 2);
        assert!(tally.has_stable_comment);
    }

    #[test]
    fn test_unstable_threshold() {
        assert!(crosses_unstable_threshold(-3, Some(-3)));
        assert!(crosses_unstable_threshold(-4, Some(-3)));
        assert!(!crosses_unstable_threshold(-2, Some(-3)));
        assert!(!crosses_unstable_threshold(-10, None));
    }

    #[test]
    fn test_meets_testing_requirements_by_days() {
        let now = Utc::now();
        let mut update = Update::new("FEDORA-2024-0000000001", 1, "submitter");
        update.stable_karma = Some(3);
        let tally = KarmaTally::default();

        assert!(meets_testing_requirements(&update, &tally, &policy(0), now));
        assert!(!meets_testing_requirements(&update, &tally, &policy(7), now));

        update.date_testing = Some(now - Duration::days(3));
        assert_eq!(days_to_stable(&update, &tally, &policy(7), now), 4);

        update.date_testing = Some(now - Duration::days(8));
        assert!(meets_testing_requirements(&update, &tally, &policy(7), now));
        assert_eq!(days_to_stable(&update, &tally, &policy(7), now), 0);
    }

    #[test]
    fn test_critpath_negative_karma_blocks_time_path() {
        let now = Utc::now();
        let mut update = Update::new("FEDORA-2024-0000000002", 1, "submitter");
        update.critpath = true;
        update.date_testing = Some(now - Duration::days(20));

        let clean = KarmaTally::default();
        assert!(meets_testing_requirements(&update, &clean, &policy(14), now));

        let negative = KarmaTally {
            positive: 1,
            negative: -1,
            ..Default::default()
        };
        assert!(!meets_testing_requirements(&update, &negative, &policy(14), now));
        assert!(!critpath_approved(&update, &negative, &policy(14), now));

        let approved = KarmaTally {
            positive: 2,
            admin_approvals: 2,
            ..Default::default()
        };
        assert!(critpath_approved(&update, &approved, &policy(14), now));
    }

    #[test]
    fn test_gating_blocks_requirements() {
        let now = Utc::now();
        let mut update = Update::new("FEDORA-2024-0000000003", 1, "submitter");
        update.test_gating_status = Some(TestGatingStatus::Failed);
        let mut p = policy(0);
        p.gating_required = true;
        assert!(!meets_testing_requirements(&update, &KarmaTally::default(), &p, now));

        update.test_gating_status = Some(TestGatingStatus::Passed);
        assert!(meets_testing_requirements(&update, &KarmaTally::default(), &p, now));
    }
}
