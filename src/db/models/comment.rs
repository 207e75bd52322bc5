// src/db/models/comment.rs

//! Comments on updates, with karma and per-bug / per-testcase feedback

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugFeedback {
    pub bug_id: i64,
    pub karma: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseFeedback {
    pub testcase: String,
    pub karma: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: Option<i64>,
    pub update_id: i64,
    pub author: String,
    pub text: String,
    /// Overall karma, one of -1, 0, 1
    pub karma: i32,
    pub karma_critpath: i32,
    pub anonymous: bool,
    pub timestamp: DateTime<Utc>,
    pub bug_feedback: Vec<BugFeedback>,
    pub testcase_feedback: Vec<TestCaseFeedback>,
}

impl Comment {
    pub fn new(update_id: i64, author: &str, text: &str, karma: i32) -> Self {
        Self {
            id: None,
            update_id,
            author: author.to_string(),
            text: text.to_string(),
            karma,
            karma_critpath: 0,
            anonymous: false,
            timestamp: Utc::now(),
            bug_feedback: Vec::new(),
            testcase_feedback: Vec::new(),
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO comments (update_id, author, text, karma, karma_critpath, anonymous,
                 timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.update_id,
                &self.author,
                &self.text,
                self.karma,
                self.karma_critpath,
                self.anonymous,
                self.timestamp,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);

        for fb in &self.bug_feedback {
            conn.execute(
                "INSERT INTO comment_bug_feedback (comment_id, bug_id, karma) VALUES (?1, ?2, ?3)",
                params![id, fb.bug_id, fb.karma],
            )?;
        }
        for fb in &self.testcase_feedback {
            conn.execute(
                "INSERT INTO comment_testcase_feedback (comment_id, testcase, karma)
                 VALUES (?1, ?2, ?3)",
                params![id, &fb.testcase, fb.karma],
            )?;
        }

        Ok(id)
    }

    /// All comments on an update, oldest first
    pub fn find_by_update(conn: &Connection, update_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, update_id, author, text, karma, karma_critpath, anonymous, timestamp
             FROM comments WHERE update_id = ?1 ORDER BY timestamp, id",
        )?;
        let mut comments = stmt
            .query_map([update_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut bug_stmt = conn.prepare(
            "SELECT bug_id, karma FROM comment_bug_feedback WHERE comment_id = ?1 ORDER BY bug_id",
        )?;
        let mut tc_stmt = conn.prepare(
            "SELECT testcase, karma FROM comment_testcase_feedback
             WHERE comment_id = ?1 ORDER BY testcase",
        )?;

        for comment in &mut comments {
            let Some(id) = comment.id else { continue };
            comment.bug_feedback = bug_stmt
                .query_map([id], |row| {
                    Ok(BugFeedback {
                        bug_id: row.get(0)?,
                        karma: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            comment.testcase_feedback = tc_stmt
                .query_map([id], |row| {
                    Ok(TestCaseFeedback {
                        testcase: row.get(0)?,
                        karma: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }

        Ok(comments)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            update_id: row.get(1)?,
            author: row.get(2)?,
            text: row.get(3)?,
            karma: row.get(4)?,
            karma_critpath: row.get(5)?,
            anonymous: row.get(6)?,
            timestamp: row.get(7)?,
            bug_feedback: Vec::new(),
            testcase_feedback: Vec::new(),
        })
    }
}
