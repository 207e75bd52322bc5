// src/update/request.rs

//! Request changes and the karma-driven transitions that trigger them

use super::Lifecycle;
use crate::db::models::{Release, ReleaseState, Update, UpdateRequest, UpdateStatus};
use crate::error::{Error, Result};
use crate::gating::{self, DecisionSubject, Verdict};
use crate::karma;
use crate::notifications::topics;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

/// Tag the update's builds move to when its request is carried out
pub fn requested_tag(update: &Update, release: &Release) -> Result<String> {
    let tag = match update.request {
        // Stable builds of a pending release go straight to the dist tag
        Some(UpdateRequest::Stable) if release.state == ReleaseState::Pending => {
            Some(release.dist_tag.clone())
        }
        Some(UpdateRequest::Stable) => Some(release.stable_tag.clone()),
        Some(UpdateRequest::Testing) => Some(release.testing_tag.clone()),
        Some(UpdateRequest::Obsolete) => Some(release.candidate_tag.clone()),
        _ => None,
    };
    tag.filter(|t| !t.is_empty()).ok_or_else(|| {
        Error::Bodhi(format!(
            "Unable to determine requested tag for {}.",
            update.alias
        ))
    })
}

impl Lifecycle<'_> {
    /// Ask for `action` to happen to `update` on behalf of `username`
    ///
    /// Unpush, obsolete and revoke take effect immediately. Testing and
    /// stable requests are validated against the karma, time-in-testing and
    /// gating policy; a stable request that does not qualify may be
    /// downgraded to testing. Status itself is left for the compose.
    pub fn set_request(
        &self,
        update: &mut Update,
        action: UpdateRequest,
        username: &str,
    ) -> Result<()> {
        debug!("Attempting to set request {} on {}", action, update.alias);

        if update.status.as_str() == action.as_str() {
            info!("{} already {}", update.alias, action);
            return Ok(());
        }
        if update.request == Some(action) {
            debug!("{} has already been submitted to {}", update.alias, action);
            return Ok(());
        }
        if update.locked {
            return Err(Error::LockedUpdate(
                "Can't change the request on a locked update".to_string(),
            ));
        }

        let release = self.release_of(update)?;
        if release.is_archived() {
            return Err(Error::Bodhi(format!(
                "Can't change the request of an update for archived release {}",
                release.name
            )));
        }
        if update.status == UpdateStatus::Stable && action == UpdateRequest::Testing {
            return Err(Error::Bodhi(
                "Can't push a stable update back to testing".to_string(),
            ));
        }

        match action {
            UpdateRequest::Unpush => {
                self.unpush(update)?;
                self.add_comment(update, username, "This update has been unpushed.")?;
                update.save(self.conn)?;
                self.publish(&topics::update_request(action.as_str()), update, username);
                debug!("{} has been unpushed.", update.alias);
                return Ok(());
            }
            UpdateRequest::Obsolete => {
                self.obsolete(update, None)?;
                update.save(self.conn)?;
                self.publish(&topics::update_request(action.as_str()), update, username);
                debug!("{} has been obsoleted.", update.alias);
                return Ok(());
            }
            UpdateRequest::Revoke => {
                // A pending update that never reached testing is withdrawn entirely
                if update.status == UpdateStatus::Pending
                    && update.request == Some(UpdateRequest::Testing)
                {
                    update.status = UpdateStatus::Unpushed;
                }
                self.revoke(update)?;
                update.save(self.conn)?;
                self.publish(topics::UPDATE_REQUEST_REVOKE, update, username);
                debug!("{} has been revoked.", update.alias);
                return Ok(());
            }
            UpdateRequest::Testing | UpdateRequest::Stable => {}
        }

        let mut action = action;
        let mut notes: Vec<String> = Vec::new();
        let mut flash_note: Option<String> = None;
        let tally = self.tally(update)?;
        let policy = self.policy(&release, update);
        let now = Utc::now();

        if action == UpdateRequest::Stable
            && update.critpath
            && let Some(approvals) = self.config.critpath.num_admin_approvals
            && !karma::critpath_approved(update, &tally, &policy, now)
        {
            let mut stern_note = format!(
                "This critical path update has not yet been approved for pushing to the stable \
                 repository.  It must first reach a karma of {}, consisting of {} positive karma \
                 from proventesters, along with {} additional karma from the community. Or, it \
                 must spend {} days in testing without any negative feedback",
                policy.critpath_min_karma,
                approvals,
                policy.critpath_min_karma - approvals,
                self.config.critpath.stable_after_days_without_negative_karma,
            );
            if self.config.test_gating.required {
                stern_note.push_str(" Additionally, it must pass automated tests.");
            }

            if update.status == UpdateStatus::Testing {
                return Err(Error::Bodhi(stern_note));
            }
            info!("Forcing critical path update {} into testing", update.alias);
            notes.push(stern_note);
            action = UpdateRequest::Testing;
        }

        if action == UpdateRequest::Stable && !update.critpath {
            let karma = tally.karma();
            let karma_met = matches!(update.stable_karma, Some(t) if karma >= t)
                || karma::critpath_approved(update, &tally, &policy, now);

            if karma_met {
                debug!("{} meets stable karma requirements", update.alias);
            } else if self.config.mandatory_days_in_testing(&release) > 0
                && !tally.has_stable_comment
                && !karma::meets_testing_requirements(update, &tally, &policy, now)
            {
                let msg = self.config.not_yet_tested_msg(&release).to_string();
                if update.status == UpdateStatus::Testing
                    || update.request == Some(UpdateRequest::Testing)
                {
                    return Err(Error::Bodhi(msg));
                }
                action = UpdateRequest::Testing;
                flash_note = Some(msg);
            }
        }

        if action == UpdateRequest::Stable && self.config.test_gating.required {
            self.check_gating_for_stable(update, &release)?;
        }

        match action {
            UpdateRequest::Testing => self.add_tag(update, release.pending_signing_tag.as_deref())?,
            UpdateRequest::Stable => self.add_tag(update, release.pending_stable_tag.as_deref())?,
            _ => {}
        }

        // Re-submitted obsolete/unpushed updates start over from pending
        if matches!(
            update.status,
            UpdateStatus::Obsolete | UpdateStatus::Unpushed
        ) {
            update.status = UpdateStatus::Pending;
            let mut missing_candidate = false;
            for build in &update.builds {
                if !self
                    .services
                    .build_system
                    .list_tags(&build.nvr)?
                    .contains(&release.candidate_tag)
                {
                    missing_candidate = true;
                    break;
                }
            }
            if missing_candidate {
                self.add_tag(update, Some(&release.candidate_tag))?;
            }
        }

        update.request = Some(action);

        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("{}.", notes.join(". "))
        };
        debug!(
            "{} has been submitted for {}. {}{}",
            update.alias,
            action,
            notes,
            flash_note
                .as_deref()
                .map(|n| format!(". {}", n))
                .unwrap_or_default()
        );

        let mut text = format!(
            "This update has been submitted for {} by {}. {}",
            action, username, notes
        );
        if release.state == ReleaseState::Frozen && action == UpdateRequest::Stable {
            text.push_str(
                "\n\nThere is an ongoing freeze; this will be pushed to stable after the \
                 freeze is over. ",
            );
        }
        self.system_comment(update, &text)?;
        update.save(self.conn)?;

        self.publish(&topics::update_request(action.as_str()), update, username);
        Ok(())
    }

    /// Query gating and refuse the stable request unless it allows the push
    fn check_gating_for_stable(&self, update: &mut Update, release: &Release) -> Result<()> {
        let subject = DecisionSubject::for_update(update, release);
        let decision = gating::query_with_retry(
            self.services.decisions.as_ref(),
            &subject,
            &self.config.test_gating,
        )
        .inspect_err(|e| warn!("Gating query for {} failed: {}", update.alias, e))?;

        let status = gating::status_from_decision(&decision);
        self.record_gating_status(update, status)?;

        match gating::stable_verdict(Some(status)) {
            Verdict::Allowed => Ok(()),
            Verdict::Pending(reason) => Err(Error::GatingPending(reason)),
            Verdict::Blocked(reason) => Err(Error::Bodhi(reason)),
        }
    }

    /// React to the update's karma crossing one of its thresholds
    ///
    /// Negative feedback on a testing update disables automatic pushes;
    /// reaching `stable_karma` requests stable when autokarma is on;
    /// reaching `unstable_karma` revokes a stable request or obsoletes.
    pub fn check_karma_thresholds(&self, update: &mut Update, agent: &str) -> Result<()> {
        if update.locked {
            debug!("{} locked. Ignoring karma thresholds.", update.alias);
            return Err(Error::LockedUpdate(format!(
                "Can't act on karma thresholds of locked update {}",
                update.alias
            )));
        }
        if !matches!(update.status, UpdateStatus::Testing | UpdateStatus::Pending) {
            return Ok(());
        }

        let tally = self.tally(update)?;
        let karma = tally.karma();

        if (update.autokarma || update.autotime)
            && tally.negative != 0
            && update.status == UpdateStatus::Testing
            && update.request != Some(UpdateRequest::Stable)
        {
            info!(
                "Disabling automatic push of {} since it has received negative karma",
                update.alias
            );
            update.autokarma = false;
            update.autotime = false;
            let text = self.config.messages.disable_automatic_push_to_stable.clone();
            self.system_comment(update, &text)?;
            update.save(self.conn)?;
        } else if matches!(update.stable_karma, Some(t) if t > 0)
            && karma::meets_stable_requirements(karma, update.stable_karma, false)
        {
            if update.autokarma {
                info!("Automatically marking {} as stable", update.alias);
                self.set_request(update, UpdateRequest::Stable, agent)?;
                update.date_pushed = None;
                update.save(self.conn)?;
                self.services.bus.publish(
                    topics::UPDATE_KARMA_THRESHOLD,
                    json!({"update": super::update_message(update), "status": "stable"}),
                );
            } else if !tally.has_stable_comment {
                info!(
                    "{} has reached the stable karma threshold and can be pushed to stable now \
                     if the maintainer wishes",
                    update.alias
                );
                let text = self.config.messages.testing_approval_karma.clone();
                self.system_comment(update, &text)?;
            }
        } else if karma::crosses_unstable_threshold(karma, update.unstable_karma) {
            if update.status == UpdateStatus::Pending && !update.autokarma {
                return Ok(());
            }
            if update.status == UpdateStatus::Testing
                && update.request == Some(UpdateRequest::Stable)
            {
                info!("Revoking stable request of {} on negative karma", update.alias);
                self.revoke(update)?;
                update.save(self.conn)?;
                self.publish(topics::UPDATE_REQUEST_REVOKE, update, agent);
            } else {
                info!("Automatically obsoleting {}", update.alias);
                self.obsolete(update, None)?;
                update.save(self.conn)?;
            }
            self.services.bus.publish(
                topics::UPDATE_KARMA_THRESHOLD,
                json!({"update": super::update_message(update), "status": "unstable"}),
            );
        }

        Ok(())
    }

    /// Obsolete a pending update headed for testing once karma is unstable
    pub(super) fn obsolete_if_unstable(&self, update: &mut Update) -> Result<()> {
        if update.autokarma
            && update.status == UpdateStatus::Pending
            && update.request == Some(UpdateRequest::Testing)
            && karma::crosses_unstable_threshold(self.karma(update)?, update.unstable_karma)
        {
            info!("{} has reached unstable karma thresholds", update.alias);
            self.obsolete(update, None)?;
            update.save(self.conn)?;
        }
        Ok(())
    }

    /// Move a testing update back to its candidate tag
    pub fn unpush(&self, update: &mut Update) -> Result<()> {
        debug!("Unpushing {}", update.alias);
        if update.status == UpdateStatus::Unpushed {
            debug!("{} already unpushed", update.alias);
            return Ok(());
        }
        if update.status != UpdateStatus::Testing {
            return Err(Error::Bodhi(format!(
                "Can't unpush a {} update",
                update.status
            )));
        }

        let release = self.release_of(update)?;
        self.untag(update)?;
        self.add_tag(update, Some(&release.candidate_tag))?;
        update.pushed = false;
        update.status = UpdateStatus::Unpushed;
        update.request = None;
        Ok(())
    }

    /// Drop the pending request and its pending tags
    pub fn revoke(&self, update: &mut Update) -> Result<()> {
        debug!("Revoking {}", update.alias);
        let Some(request) = update.request else {
            return Err(Error::Bodhi(
                "Can only revoke an update with an existing request".to_string(),
            ));
        };
        if !matches!(
            update.status,
            UpdateStatus::Pending
                | UpdateStatus::Testing
                | UpdateStatus::Obsolete
                | UpdateStatus::Unpushed
        ) {
            return Err(Error::Bodhi(format!(
                "Can only revoke a pending, testing, unpushed, or obsolete update, not one that is {}",
                update.status
            )));
        }

        let release = self.release_of(update)?;
        match request {
            UpdateRequest::Testing => {
                self.remove_tag(update, release.pending_signing_tag.as_deref())?;
                self.remove_tag(update, release.pending_testing_tag.as_deref())?;
            }
            UpdateRequest::Stable => {
                self.remove_tag(update, release.pending_stable_tag.as_deref())?;
            }
            _ => {}
        }
        update.request = None;
        Ok(())
    }

    /// Mark `update` obsolete, optionally naming the build that replaced it
    ///
    /// `newer` is `(nvr, alias)` of the replacing build and its update.
    pub fn obsolete(&self, update: &mut Update, newer: Option<(&str, &str)>) -> Result<()> {
        debug!("Obsoleting {}", update.alias);
        self.untag(update)?;
        update.status = UpdateStatus::Obsolete;
        update.request = None;
        let text = match newer {
            Some((nvr, alias)) => format!(
                "This update has been obsoleted by [{}]({}).",
                nvr,
                self.update_url(alias)
            ),
            None => "This update has been obsoleted.".to_string(),
        };
        self.system_comment(update, &text)?;
        Ok(())
    }
}
