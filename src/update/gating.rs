// src/update/gating.rs

//! Test gating status of an update and waivers

use super::Lifecycle;
use crate::db::models::{TestGatingStatus, Update};
use crate::error::{Error, Result};
use crate::gating::{self, DecisionSubject, UnsatisfiedRequirement, Waiver};
use crate::karma;
use tracing::{debug, error, info};

impl Lifecycle<'_> {
    /// Ask the decision service about `update` and record the result
    ///
    /// The decision's unmet requirements are stored verbatim on the update,
    /// see [`Update::gating_requirements`]. A service that stays unavailable after the configured retries yields
    /// `greenwave_failed` rather than an error.
    pub fn update_test_gating_status(&self, update: &mut Update) -> Result<TestGatingStatus> {
        let release = self.release_of(update)?;
        let subject = DecisionSubject::for_update(update, &release);
        let result = gating::query_with_retry(
            self.services.decisions.as_ref(),
            &subject,
            &self.config.test_gating,
        );
        let requirements: &[UnsatisfiedRequirement] = match &result {
            Ok(decision) => decision.unsatisfied_requirements.as_slice(),
            Err(e) => {
                error!("Gating decision for {} unavailable: {}", update.alias, e);
                &[]
            }
        };
        update.set_gating_requirements(self.conn, requirements)?;

        let status = gating::status_from_query(&result);
        self.record_gating_status(update, status)?;
        Ok(status)
    }

    /// Store `status`, commenting when it changes
    pub fn record_gating_status(&self, update: &mut Update, status: TestGatingStatus) -> Result<()> {
        if update.test_gating_status == Some(status) {
            debug!("{} test gating status unchanged ({})", update.alias, status);
            return Ok(());
        }

        info!("{} test gating status is now {}", update.alias, status);
        update.test_gating_status = Some(status);
        update.save(self.conn)?;
        self.system_comment(
            update,
            &format!(
                "This update's test gating status has been changed to '{}'.",
                status
            ),
        )?;
        Ok(())
    }

    /// Requirements the decision service currently reports as unmet
    ///
    /// Queries the service again; waivers are posted against this live list.
    pub fn unsatisfied_requirements(&self, update: &Update) -> Result<Vec<UnsatisfiedRequirement>> {
        let release = self.release_of(update)?;
        let subject = DecisionSubject::for_update(update, &release);
        let decision = gating::query_with_retry(
            self.services.decisions.as_ref(),
            &subject,
            &self.config.test_gating,
        )?;
        Ok(decision.unsatisfied_requirements)
    }

    /// Waive failing tests on `update`
    ///
    /// With an empty `tests`, every unsatisfied requirement is waived;
    /// otherwise only those whose testcase is named. The status goes back to
    /// `waiting` until the next gating query.
    pub fn waive_test_results(
        &self,
        update: &mut Update,
        username: &str,
        comment: Option<&str>,
        tests: &[String],
    ) -> Result<Vec<Waiver>> {
        debug!("Attempting to waive test results for {}", update.alias);

        if update.locked {
            return Err(Error::LockedUpdate(
                "Can't waive test results on a locked update".to_string(),
            ));
        }
        if !self.config.test_gating.required {
            return Err(Error::Bodhi("Test gating is not enabled".to_string()));
        }
        if karma::test_gating_passed(update.test_gating_status) {
            return Err(Error::Bodhi(
                "Can't waive test results on an update that passes test gating".to_string(),
            ));
        }

        let release = self.release_of(update)?;
        let product_version = gating::product_version(&release);
        let mut waived = Vec::new();

        for requirement in self.unsatisfied_requirements(update)? {
            if !tests.is_empty() && !tests.contains(&requirement.testcase) {
                continue;
            }
            let waiver = Waiver {
                subject: requirement.item,
                testcase: requirement.testcase,
                product_version: product_version.clone(),
                username: username.to_string(),
                comment: comment.map(str::to_string),
            };
            debug!("Waiving test results: {:?}", waiver);
            self.services.waivers.post_waiver(&waiver)?;
            waived.push(waiver);
        }

        self.record_gating_status(update, TestGatingStatus::Waiting)?;
        Ok(waived)
    }
}
