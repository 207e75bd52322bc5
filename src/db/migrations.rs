// src/db/migrations.rs
//! Database migration implementations
//!
//! Each function upgrades the schema by exactly one version.

use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// Initial schema - Version 1
///
/// - releases: distribution releases and their build-system tags
/// - users / user_groups: submitters, commenters and group membership
/// - updates / update_bugs: the update lifecycle state
/// - builds: one row per build, owned by at most one update
/// - comments + feedback: karma and audit trail
/// - composes / compose_updates: in-flight repository compositions
pub fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE releases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            long_name TEXT NOT NULL UNIQUE,
            version TEXT NOT NULL,
            id_prefix TEXT NOT NULL,
            branch TEXT NOT NULL,
            dist_tag TEXT NOT NULL,
            stable_tag TEXT NOT NULL,
            testing_tag TEXT NOT NULL,
            candidate_tag TEXT NOT NULL,
            pending_signing_tag TEXT,
            pending_testing_tag TEXT,
            pending_stable_tag TEXT,
            override_tag TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'disabled'
                CHECK(state IN ('disabled', 'pending', 'frozen', 'current', 'archived')),
            composed_by_bodhi INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE users (
            name TEXT PRIMARY KEY,
            email TEXT
        );

        CREATE TABLE user_groups (
            user_name TEXT NOT NULL,
            group_name TEXT NOT NULL,
            PRIMARY KEY (user_name, group_name),
            FOREIGN KEY (user_name) REFERENCES users(name) ON DELETE CASCADE
        );

        CREATE TABLE updates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            alias TEXT NOT NULL UNIQUE,
            release_id INTEGER NOT NULL,
            user_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            request TEXT,
            type TEXT NOT NULL DEFAULT 'unspecified',
            severity TEXT NOT NULL DEFAULT 'unspecified',
            suggest TEXT NOT NULL DEFAULT 'unspecified',
            notes TEXT NOT NULL DEFAULT '',
            locked INTEGER NOT NULL DEFAULT 0,
            pushed INTEGER NOT NULL DEFAULT 0,
            critpath INTEGER NOT NULL DEFAULT 0,
            autokarma INTEGER NOT NULL DEFAULT 1,
            autotime INTEGER NOT NULL DEFAULT 1,
            stable_karma INTEGER,
            unstable_karma INTEGER,
            stable_days INTEGER,
            test_gating_status TEXT,
            from_tag TEXT,
            date_submitted TEXT NOT NULL,
            date_modified TEXT,
            date_approved TEXT,
            date_testing TEXT,
            date_stable TEXT,
            date_pushed TEXT,
            date_locked TEXT,
            FOREIGN KEY (release_id) REFERENCES releases(id),
            FOREIGN KEY (user_name) REFERENCES users(name)
        );

        CREATE INDEX idx_updates_release_status ON updates(release_id, status);
        CREATE INDEX idx_updates_request ON updates(request);

        CREATE TABLE update_bugs (
            update_id INTEGER NOT NULL,
            bug_id INTEGER NOT NULL,
            PRIMARY KEY (update_id, bug_id),
            FOREIGN KEY (update_id) REFERENCES updates(id) ON DELETE CASCADE
        );

        CREATE TABLE builds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nvr TEXT NOT NULL UNIQUE,
            package_name TEXT NOT NULL,
            release_id INTEGER NOT NULL,
            update_id INTEGER,
            type TEXT NOT NULL CHECK(type IN ('rpm', 'module', 'container', 'flatpak')),
            epoch INTEGER NOT NULL DEFAULT 0,
            signed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (release_id) REFERENCES releases(id),
            FOREIGN KEY (update_id) REFERENCES updates(id) ON DELETE SET NULL
        );

        CREATE INDEX idx_builds_update ON builds(update_id);
        CREATE INDEX idx_builds_package ON builds(package_name);

        CREATE TABLE comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            update_id INTEGER NOT NULL,
            author TEXT NOT NULL,
            text TEXT NOT NULL DEFAULT '',
            karma INTEGER NOT NULL DEFAULT 0 CHECK(karma BETWEEN -1 AND 1),
            karma_critpath INTEGER NOT NULL DEFAULT 0 CHECK(karma_critpath BETWEEN -1 AND 1),
            anonymous INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL,
            FOREIGN KEY (update_id) REFERENCES updates(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_comments_update ON comments(update_id);

        CREATE TABLE comment_bug_feedback (
            comment_id INTEGER NOT NULL,
            bug_id INTEGER NOT NULL,
            karma INTEGER NOT NULL CHECK(karma BETWEEN -1 AND 1),
            PRIMARY KEY (comment_id, bug_id),
            FOREIGN KEY (comment_id) REFERENCES comments(id) ON DELETE CASCADE
        );

        CREATE TABLE comment_testcase_feedback (
            comment_id INTEGER NOT NULL,
            testcase TEXT NOT NULL,
            karma INTEGER NOT NULL CHECK(karma BETWEEN -1 AND 1),
            PRIMARY KEY (comment_id, testcase),
            FOREIGN KEY (comment_id) REFERENCES comments(id) ON DELETE CASCADE
        );

        -- One compose per (release, request); the key is the compose lock
        CREATE TABLE composes (
            release_id INTEGER NOT NULL,
            request TEXT NOT NULL CHECK(request IN ('testing', 'stable')),
            state TEXT NOT NULL DEFAULT 'requested',
            checkpoints TEXT NOT NULL DEFAULT '{}',
            error_message TEXT,
            date_created TEXT NOT NULL,
            state_date TEXT NOT NULL,
            PRIMARY KEY (release_id, request),
            FOREIGN KEY (release_id) REFERENCES releases(id)
        );

        CREATE TABLE compose_updates (
            release_id INTEGER NOT NULL,
            request TEXT NOT NULL,
            update_id INTEGER NOT NULL UNIQUE,
            FOREIGN KEY (release_id, request)
                REFERENCES composes(release_id, request) ON DELETE CASCADE,
            FOREIGN KEY (update_id) REFERENCES updates(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_compose_updates_key ON compose_updates(release_id, request);
        ",
    )?;

    Ok(())
}

/// Version 2: keep the last gating decision's unmet requirements
///
/// - update_gating_requirements: one row per unsatisfied requirement,
///   replaced on every gating query
pub fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE update_gating_requirements (
            update_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            item TEXT NOT NULL,
            testcase TEXT NOT NULL,
            requirement_type TEXT NOT NULL,
            scenario TEXT,
            PRIMARY KEY (update_id, position),
            FOREIGN KEY (update_id) REFERENCES updates(id) ON DELETE CASCADE
        );
        ",
    )?;

    Ok(())
}
