// src/update/obsolete.rs

//! Obsoleting older updates of the same packages

use super::{Caveat, Lifecycle};
use crate::db::models::{Build, Update, UpdateRequest, UpdateStatus, UpdateType};
use crate::error::Result;
use std::cmp::Ordering;
use tracing::{debug, info};

impl Lifecycle<'_> {
    /// Obsolete older pending/testing updates that `update` supersedes
    ///
    /// An older update qualifies when it is unlocked, on the same release,
    /// requests testing or nothing, and every one of its packages is also in
    /// `update` with an older build. `update` inherits its bugs and notes.
    /// Already obsolete updates are not candidates, so a second call has no
    /// further effect.
    pub fn obsolete_older_updates(&self, update: &mut Update) -> Result<Vec<Caveat>> {
        let mut caveats = Vec::new();
        let update_id = update.require_id()?;
        let packages = update.package_names();

        for build in update.builds.clone() {
            let label = build.label()?;

            for old_build in Build::find_by_package(self.conn, update.release_id, &build.package_name)? {
                if old_build.nvr == build.nvr {
                    continue;
                }
                let Some(old_id) = old_build.update_id else {
                    continue;
                };
                if old_id == update_id {
                    continue;
                }

                let mut old = Update::get(self.conn, old_id)?;
                if old.locked
                    || !matches!(old.request, None | Some(UpdateRequest::Testing))
                    || !matches!(old.status, UpdateStatus::Testing | UpdateStatus::Pending)
                {
                    continue;
                }

                let mut obsoletable = old_build.label()?.compare(&label) == Ordering::Less;
                if obsoletable {
                    debug!("{} is newer than {}", build.nvr, old_build.nvr);
                }
                // Every package of the old update must be replaced
                if old.builds.iter().any(|b| !packages.contains(&b.package_name)) {
                    obsoletable = false;
                }

                if old.builds.len() != update.builds.len() && old.user_name != update.user_name {
                    caveats.push(Caveat::new(
                        "update",
                        format!(
                            "Please be aware that there is another update in flight owned by {}, \
                             containing {}. Are you coordinating with them?",
                            old.user_name, old_build.nvr
                        ),
                    ));
                }

                if old.update_type == UpdateType::Security
                    && update.update_type != UpdateType::Security
                {
                    caveats.push(Caveat::new(
                        "update",
                        "Adjusting type of this update to security,since it obsoletes another \
                         security update",
                    ));
                    update.update_type = UpdateType::Security;
                }

                if !obsoletable {
                    continue;
                }
                info!("{} is obsoletable", old_build.nvr);

                let mut bugs = update.bugs.clone();
                bugs.extend(old.bugs.iter().copied());
                update.set_bugs(self.conn, &bugs)?;
                update.notes = format!("{}\n\n----\n\n{}", update.notes, old.notes);

                self.obsolete(&mut old, Some((&build.nvr, &update.alias)))?;
                old.save(self.conn)?;

                let link = format!("[{}]({})", old_build.nvr, self.update_url(&old.alias));
                self.system_comment(
                    update,
                    &format!(
                        "This update has obsoleted {}, and has inherited its bugs and notes.",
                        link
                    ),
                )?;
                caveats.push(Caveat::new(
                    "update",
                    format!(
                        "This update has obsoleted {}, and has inherited its bugs and notes.",
                        old_build.nvr
                    ),
                ));
            }
        }

        update.save(self.conn)?;
        Ok(caveats)
    }
}
