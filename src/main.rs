// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{BuildCommands, Cli, Commands, ComposeCommands, ReleaseCommands, UpdateCommands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db }) => commands::cmd_init(&db),

        Some(Commands::Release(cmd)) => match cmd {
            ReleaseCommands::Create {
                name,
                db,
                long_name,
                version,
                id_prefix,
                state,
            } => commands::cmd_release_create(&db, &name, &long_name, &version, &id_prefix, &state),
            ReleaseCommands::List { db } => commands::cmd_release_list(&db),
            ReleaseCommands::SetState { name, state, db } => {
                commands::cmd_release_set_state(&db, &name, &state)
            }
        },

        Some(Commands::Build(cmd)) => match cmd {
            BuildCommands::Add {
                nvr,
                release,
                db,
                epoch,
                content_type,
                signed,
            } => commands::cmd_build_add(&db, &nvr, &release, epoch, &content_type, signed),
            BuildCommands::Sign { nvr, db } => commands::cmd_build_sign(&db, &nvr),
            BuildCommands::List { db } => commands::cmd_build_list(&db),
        },

        Some(Commands::Update(cmd)) => match cmd {
            UpdateCommands::New {
                builds,
                release,
                db,
                user,
                update_type,
                severity,
                notes,
                bugs,
                request,
                critpath,
                stable_karma,
                unstable_karma,
                stable_days,
                no_autokarma,
                no_autotime,
            } => commands::cmd_update_new(
                &db,
                commands::UpdateOptions {
                    release,
                    builds,
                    user,
                    update_type,
                    severity,
                    notes,
                    bugs,
                    request,
                    critpath,
                    stable_karma,
                    unstable_karma,
                    stable_days,
                    autokarma: !no_autokarma,
                    autotime: !no_autotime,
                },
            ),
            UpdateCommands::Show { update, db } => commands::cmd_update_show(&db, &update),
            UpdateCommands::List {
                db,
                release,
                status,
                request,
                user,
            } => commands::cmd_update_list(
                &db,
                release.as_deref(),
                status.as_deref(),
                request.as_deref(),
                user.as_deref(),
            ),
            UpdateCommands::Request {
                update,
                request,
                db,
                user,
            } => commands::cmd_update_request(&db, &update, &request, &user),
            UpdateCommands::Comment {
                update,
                text,
                db,
                user,
                karma,
                karma_critpath,
            } => commands::cmd_update_comment(&db, &update, &text, &user, karma, karma_critpath),
            UpdateCommands::Edit {
                update,
                builds,
                db,
                user,
            } => commands::cmd_update_edit(&db, &update, &builds, &user),
            UpdateCommands::Waive {
                update,
                db,
                user,
                comment,
                tests,
            } => commands::cmd_update_waive(&db, &update, &user, comment.as_deref(), &tests),
            UpdateCommands::Gating { update, db } => commands::cmd_update_gating(&db, &update),
            UpdateCommands::ApproveTesting { db } => commands::cmd_update_approve_testing(&db),
        },

        Some(Commands::Push {
            db,
            releases,
            requests,
            builds,
            updates,
            run,
        }) => commands::cmd_push(&db, releases, &requests, builds, updates, run),

        Some(Commands::Compose(cmd)) => match cmd {
            ComposeCommands::List { db } => commands::cmd_compose_list(&db),
            ComposeCommands::Show { release, request, db } => {
                commands::cmd_compose_show(&db, &release, &request)
            }
            ComposeCommands::Run { db, resume } => commands::cmd_compose_run(&db, resume),
        },

        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
