//! Abelana CLI - social graph and photo engagement engine.

use abelana::{
    ABELANA_DIR, Client, CompactConfig, Config, Daemon, DaemonConfig, FollowOutcome, Person, Store, StoreBatchExt,
    StoreCompactExt, TaskStatus, TimelineEntry, is_daemon_running, vacuum,
};
use chrono::DateTime;
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;

use cli::{Cli, Command};

fn setup_logging(default_level: &str) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("abelana")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("abelana.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_store_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Log level from the store's config, if there is a store yet.
fn configured_log_level(store_dir: &Path) -> String {
    Config::load(&store_dir.join(ABELANA_DIR))
        .map(|c| c.log_level)
        .unwrap_or_else(|_| Config::default().log_level)
}

fn format_date(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_persons(persons: &[Person], empty: &str) {
    if persons.is_empty() {
        println!("{}", empty.dimmed());
        return;
    }
    for p in persons {
        println!("  {} {} {}", p.person_id.cyan(), p.name, format!("<{}>", p.email).dimmed());
    }
}

fn print_entries(entries: &[TimelineEntry]) {
    if entries.is_empty() {
        println!("{}", "No photos".dimmed());
        return;
    }
    for e in entries {
        let likes = if e.likes < 0 {
            String::new()
        } else {
            format!(" {}{}", if e.i_like { "♥".red() } else { "♡".normal() }, e.likes)
        };
        println!(
            "  {} {} {}{}",
            format_date(e.created).dimmed(),
            e.photo_id.cyan(),
            e.name,
            likes
        );
    }
    if let Some(last) = entries.last() {
        println!("{} next page: --last-id {} / --last-date {}", "→".blue(), last.photo_id, last.created);
    }
}

/// Either the local store or a running daemon.
enum Backend {
    Local(Box<Store>),
    Remote(Client),
}

impl Backend {
    fn open(store_dir: &Path, remote: bool) -> Result<Self> {
        if remote {
            let client = Client::connect(store_dir, true).context("Failed to connect to daemon")?;
            Ok(Backend::Remote(client))
        } else {
            let store = Store::open(store_dir).context("Failed to open store")?;
            Ok(Backend::Local(Box::new(store)))
        }
    }

    /// The local store, for operations the daemon does not serve.
    fn local(self) -> Result<Store> {
        match self {
            Backend::Local(store) => Ok(*store),
            Backend::Remote(_) => eyre::bail!("This command is not available with --remote"),
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let store_dir = get_store_dir(&cli);
    let remote = cli.remote;

    match cli.command {
        Command::Init => {
            Store::init(&store_dir).context("Failed to initialize abelana store")?;
            println!("{} Initialized abelana store in {}", "✓".green(), store_dir.display());
        }

        Command::Signup {
            user_id,
            display_name,
            email,
        } => {
            let user = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.register_user(&user_id, &display_name, &email),
                Backend::Remote(mut client) => client.register_user(&user_id, &display_name, &email),
            }
            .context("Failed to sign up user")?;
            println!("{} Signed up: {} {}", "✓".green(), user.user_id.cyan(), user.display_name);
        }

        Command::Follow { user_id, emails } => match Backend::open(&store_dir, remote)? {
            Backend::Local(mut store) => {
                let refs: Vec<&str> = emails.iter().map(|s| s.as_str()).collect();
                let result = store.follow_all(&user_id, &refs).context("Failed to follow")?;
                for id in &result.followed {
                    println!("{} {} now follows {}", "✓".green(), user_id.cyan(), id.cyan());
                }
                for email in &result.pending {
                    println!("{} {} will follow {} once they sign up", "…".yellow(), user_id.cyan(), email);
                }
                for (email, err) in &result.errors {
                    println!("{} {}: {}", "✗".red(), email, err);
                }
            }
            Backend::Remote(mut client) => {
                for email in &emails {
                    match client.follow(&user_id, email).context("Failed to follow")? {
                        FollowOutcome::Followed { user_id: id } => {
                            println!("{} {} now follows {}", "✓".green(), user_id.cyan(), id.cyan())
                        }
                        FollowOutcome::Pending { email } => {
                            println!("{} {} will follow {} once they sign up", "…".yellow(), user_id.cyan(), email)
                        }
                    }
                }
            }
        },

        Command::FollowId { user_id, following_id } => {
            let created = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.follow_by_id(&user_id, &following_id),
                Backend::Remote(mut client) => client.follow_by_id(&user_id, &following_id),
            }
            .context("Failed to follow")?;
            if created {
                println!("{} {} now follows {}", "✓".green(), user_id.cyan(), following_id.cyan());
            } else {
                println!("{} {} already follows {}", "→".blue(), user_id.cyan(), following_id.cyan());
            }
        }

        Command::Stats { user_id } => {
            let stats = match Backend::open(&store_dir, remote)? {
                Backend::Local(store) => store.statistics(&user_id),
                Backend::Remote(mut client) => client.statistics(&user_id)?,
            };
            println!("{}: {}", "Following".bold(), stats.following);
            println!("{}: {}", "Followers".bold(), stats.followers);
        }

        Command::Following { user_id } => {
            let persons = match Backend::open(&store_dir, remote)? {
                Backend::Local(store) => store.get_following(&user_id),
                Backend::Remote(mut client) => client.get_following(&user_id),
            }
            .context("Failed to list following")?;
            print_persons(&persons, "Not following anyone");
        }

        Command::Followers { user_id } => {
            let store = Backend::open(&store_dir, remote)?.local()?;
            let persons = store.get_followers(&user_id).context("Failed to list followers")?;
            print_persons(&persons, "No followers");
        }

        Command::Person { person_id } => {
            let person = match Backend::open(&store_dir, remote)? {
                Backend::Local(store) => store.get_person(&person_id),
                Backend::Remote(mut client) => client.get_person(&person_id),
            }
            .context("Failed to get person")?;
            match person {
                Some(p) => {
                    println!("{}: {}", "ID".bold(), p.person_id.cyan());
                    println!("{}: {}", "Name".bold(), p.name);
                    println!("{}: {}", "Email".bold(), p.email);
                }
                None => {
                    eprintln!("{} User not found: {}", "✗".red(), person_id);
                    std::process::exit(1);
                }
            }
        }

        Command::Pending { user_id } => {
            let store = Backend::open(&store_dir, remote)?.local()?;
            let intents = store.pending_follows(&user_id).context("Failed to list intents")?;
            if intents.is_empty() {
                println!("{}", "No follow intents".dimmed());
            }
            for intent in intents {
                let state = match intent.resolved_at {
                    Some(at) => format!("resolved {}", at).green(),
                    None => "pending".yellow(),
                };
                println!("  {} {}", intent.email, state);
            }
        }

        Command::PostPhoto { owner_id } => {
            let mut store = Backend::open(&store_dir, remote)?.local()?;
            let photo = store.post_photo(&owner_id).context("Failed to post photo")?;
            println!("{} Posted: {}", "✓".green(), photo.photo_id.cyan());
        }

        Command::AddPhoto { photo_id, date } => {
            let photo = match (Backend::open(&store_dir, remote)?, date) {
                (Backend::Local(mut store), Some(date)) => store.add_photo_at(&photo_id, date),
                (Backend::Local(mut store), None) => store.add_photo(&photo_id),
                (Backend::Remote(mut client), None) => client.add_photo(&photo_id),
                (Backend::Remote(_), Some(_)) => eyre::bail!("--date is not available with --remote"),
            }
            .context("Failed to add photo")?;
            println!("{} Added: {} {}", "✓".green(), photo.photo_id.cyan(), format_date(photo.date).dimmed());
        }

        Command::Like { user_id, photo_id } => {
            let added = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.like(&user_id, &photo_id),
                Backend::Remote(mut client) => client.like(&user_id, &photo_id),
            }
            .context("Failed to like photo")?;
            let note = if added { "" } else { " (already liked)" };
            println!("{} {} likes {}{}", "♥".red(), user_id.cyan(), photo_id.cyan(), note.dimmed());
        }

        Command::Unlike { user_id, photo_id } => {
            let _removed = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.unlike(&user_id, &photo_id),
                Backend::Remote(mut client) => client.unlike(&user_id, &photo_id),
            }
            .context("Failed to unlike photo")?;
            println!("{} {} no longer likes {}", "✓".green(), user_id.cyan(), photo_id.cyan());
        }

        Command::Flag { user_id, photo_id } => {
            let () = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.flag(&user_id, &photo_id),
                Backend::Remote(mut client) => client.flag(&user_id, &photo_id),
            }
            .context("Failed to flag photo")?;
            println!("{} Flagged {}", "⚑".yellow(), photo_id.cyan());
        }

        Command::Approve { moderator_id, photo_id } => {
            let state = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.approve(&moderator_id, &photo_id),
                Backend::Remote(mut client) => client.approve(&moderator_id, &photo_id),
            }
            .context("Failed to approve photo")?;
            if state.flagged {
                println!("{} {} has {} approval(s)", "⚑".yellow(), photo_id.cyan(), state.approvals);
            } else {
                println!("{} {} is visible", "✓".green(), photo_id.cyan());
            }
        }

        Command::Comment {
            person_id,
            photo_id,
            text,
        } => {
            let comment = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.add_comment(&person_id, &photo_id, &text),
                Backend::Remote(mut client) => client.add_comment(&person_id, &photo_id, &text),
            }
            .context("Failed to add comment")?;
            println!("{} Commented at {}", "✓".green(), format_date(comment.time).dimmed());
        }

        Command::Comments { photo_id } => {
            let comments = match Backend::open(&store_dir, remote)? {
                Backend::Local(store) => store.get_comments(&photo_id),
                Backend::Remote(mut client) => client.get_comments(&photo_id),
            }
            .context("Failed to list comments")?;
            if comments.is_empty() {
                println!("{}", "No comments".dimmed());
            }
            for c in comments {
                println!("  {} {}: {}", format_date(c.time).dimmed(), c.person_id.cyan(), c.text);
            }
        }

        Command::Profile { user_id, last_date } => {
            let entries = match Backend::open(&store_dir, remote)? {
                Backend::Local(store) => store.profile_for_user(&user_id, &last_date),
                Backend::Remote(mut client) => client.profile_for_user(&user_id, &last_date),
            }
            .context("Failed to read profile")?;
            print_entries(&entries);
        }

        Command::Timeline { user_id, last_id } => {
            let entries = match Backend::open(&store_dir, remote)? {
                Backend::Local(store) => store.get_timeline(&user_id, &last_id),
                Backend::Remote(mut client) => client.get_timeline(&user_id, &last_id),
            }
            .context("Failed to read timeline")?;
            print_entries(&entries);
        }

        Command::Activity { user_id } => {
            let store = Backend::open(&store_dir, remote)?.local()?;
            let activity = store.activity(&user_id).context("Failed to read activity")?;
            if activity.is_empty() {
                println!("{}", "No activity".dimmed());
            }
            for a in activity {
                println!("  {} {} {}", a.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(), a.actor_id.cyan(), a.kind);
            }
        }

        Command::Drain { all } => {
            let report = match (Backend::open(&store_dir, remote)?, all) {
                (Backend::Local(mut store), true) => store.drain_until_idle(100),
                (Backend::Local(mut store), false) => store.drain_tasks(),
                (Backend::Remote(mut client), _) => client.drain(),
            }
            .context("Failed to drain tasks")?;
            println!(
                "{} {} completed, {} retried, {} failed",
                "✓".green(),
                report.completed,
                report.retried,
                report.failed
            );
        }

        Command::FailedTasks => {
            let store = Backend::open(&store_dir, remote)?.local()?;
            let failed = store.tasks(TaskStatus::Failed).context("Failed to list tasks")?;
            if failed.is_empty() {
                println!("{}", "No failed tasks".dimmed());
            }
            for t in failed {
                println!(
                    "  {} {} ({} attempts) {}",
                    t.id.to_string().cyan(),
                    t.payload,
                    t.attempts,
                    t.last_error.unwrap_or_default().red()
                );
            }
        }

        Command::Compact { older_than_days } => {
            let mut store = Backend::open(&store_dir, remote)?.local()?;
            let config = CompactConfig::new().older_than_days(older_than_days);
            let result = store.compact(&config).context("Failed to compact store")?;
            println!(
                "{} Pruned {} intent(s) and {} failed task(s)",
                "✓".green(),
                result.intents_pruned,
                result.tasks_pruned
            );
        }

        Command::Vacuum => {
            let result = vacuum(&store_dir).context("Failed to vacuum store")?;
            println!(
                "{} {} -> {} bytes ({} users, {} photos, {} follows)",
                "✓".green(),
                result.size_before,
                result.size_after,
                result.user_count,
                result.photo_count,
                result.follow_count
            );
        }

        Command::DeleteUser { user_id } => {
            let () = match Backend::open(&store_dir, remote)? {
                Backend::Local(mut store) => store.delete_user(&user_id),
                Backend::Remote(mut client) => client.delete_user(&user_id),
            }
            .context("Failed to delete user")?;
            println!("{} Deleted {}", "✓".green(), user_id.cyan());
        }

        Command::Daemon => {
            println!("{} Starting daemon for {}", "→".blue(), store_dir.display());

            let config = DaemonConfig::new(&store_dir);
            let mut daemon = Daemon::new(config).context("Failed to create daemon")?;

            let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
            rt.block_on(async { daemon.run().await }).context("Daemon error")?;
        }

        Command::DaemonStop => {
            if !is_daemon_running(&store_dir) {
                println!("{} Daemon is not running", "✗".red());
                std::process::exit(1);
            }

            let mut client = Client::connect(&store_dir, false).context("Failed to connect to daemon")?;
            client.shutdown().context("Failed to shutdown daemon")?;
            println!("{} Daemon stopped", "✓".green());
        }

        Command::DaemonStatus => {
            if is_daemon_running(&store_dir) {
                println!("{} Daemon is running", "✓".green());

                if let Ok(mut client) = Client::connect(&store_dir, false)
                    && client.ping().is_ok()
                {
                    println!("  {} Responding to requests", "✓".green());
                }
            } else {
                println!("{} Daemon is not running", "✗".red());
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&configured_log_level(&get_store_dir(&cli))).context("Failed to setup logging")?;
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
