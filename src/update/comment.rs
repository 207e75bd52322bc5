// src/update/comment.rs

//! Comments and karma feedback

use super::{Caveat, Lifecycle};
use crate::db::models::{BugFeedback, Comment, TestCaseFeedback, Update, User};
use crate::error::{Error, Result};
use crate::notifications::topics;
use serde_json::json;
use tracing::{debug, info, warn};

/// A comment as submitted by a user
#[derive(Debug, Clone, Default)]
pub struct NewComment {
    pub text: String,
    /// -1, 0 or 1
    pub karma: i32,
    pub karma_critpath: i32,
    pub anonymous: bool,
    pub bug_feedback: Vec<BugFeedback>,
    pub testcase_feedback: Vec<TestCaseFeedback>,
}

impl NewComment {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn karma(text: &str, karma: i32) -> Self {
        Self {
            text: text.to_string(),
            karma,
            ..Default::default()
        }
    }
}

fn check_vote(what: &str, karma: i32) -> Result<()> {
    if (-1..=1).contains(&karma) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{} must be -1, 0 or 1, got {}",
            what, karma
        )))
    }
}

impl Lifecycle<'_> {
    /// Add a comment by `author`, then act on any karma threshold it crosses
    pub fn comment(
        &self,
        update: &mut Update,
        author: &str,
        input: NewComment,
    ) -> Result<(Comment, Vec<Caveat>)> {
        if author.is_empty() {
            return Err(Error::InvalidInput(
                "You must provide a comment author".to_string(),
            ));
        }
        check_vote("karma", input.karma)?;
        check_vote("karma_critpath", input.karma_critpath)?;
        for fb in &input.bug_feedback {
            check_vote("bug feedback karma", fb.karma)?;
        }
        for fb in &input.testcase_feedback {
            check_vote("testcase feedback karma", fb.karma)?;
        }

        let got_feedback = input.bug_feedback.iter().any(|f| f.karma != 0)
            || input.testcase_feedback.iter().any(|f| f.karma != 0);
        if input.text.trim().is_empty()
            && input.karma == 0
            && input.karma_critpath == 0
            && !got_feedback
        {
            return Err(Error::InvalidInput(
                "You must provide either some text or feedback".to_string(),
            ));
        }

        let mut caveats = Vec::new();
        let mut karma = input.karma;
        if update.user_name == author && karma != 0 {
            karma = 0;
            caveats.push(Caveat::new(
                "karma",
                "You may not give karma to your own updates.",
            ));
        }

        let update_id = update.require_id()?;
        let previous = Comment::find_by_update(self.conn, update_id)?;
        let previous_karma = previous
            .iter()
            .rev()
            .find(|c| c.author == author && c.karma != 0)
            .map(|c| c.karma);

        if !input.anonymous {
            User::ensure(self.conn, author)?;
        }
        let mut comment = Comment::new(update_id, author, &input.text, karma);
        comment.karma_critpath = input.karma_critpath;
        comment.anonymous = input.anonymous;
        comment.bug_feedback = input.bug_feedback;
        comment.testcase_feedback = input.testcase_feedback;
        comment.insert(self.conn)?;

        if karma != 0 {
            match previous_karma {
                Some(p) if p != karma => {
                    caveats.push(Caveat::new("karma", "Your karma standing was reversed."));
                }
                Some(_) => debug!(
                    "Ignoring duplicate {} karma from {} on {}",
                    karma, author, update.alias
                ),
                None => {}
            }
            info!("Updated {} karma to {}", update.alias, self.karma(update)?);

            if !self.config.is_system_user(author) {
                match self.check_karma_thresholds(update, self.config.system_user()) {
                    Ok(()) => {}
                    Err(Error::LockedUpdate(_)) => {}
                    Err(e @ (Error::Bodhi(_) | Error::GatingPending(_))) => {
                        warn!("Problem checking the karma threshold of {}: {}", update.alias, e);
                        caveats.push(Caveat::new("karma", e.to_string()));
                    }
                    Err(e) => return Err(e),
                }
            }

            self.obsolete_if_unstable(update)?;
        }

        if !self.config.is_system_user(author) {
            self.services.bus.publish(
                topics::UPDATE_COMMENT,
                json!({
                    "comment": {
                        "update": update.alias,
                        "author": author,
                        "text": comment.text,
                        "karma": comment.karma,
                        "anonymous": comment.anonymous,
                    },
                    "agent": author,
                }),
            );
        }

        Ok((comment, caveats))
    }
}
