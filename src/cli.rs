//! CLI argument parsing for Abelana.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "abelana",
    about = "Social graph and photo engagement engine",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/abelana/logs/abelana.log"
)]
pub struct Cli {
    /// Path to the abelana store directory (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Talk to a running daemon instead of opening the store directly
    #[arg(long, global = true)]
    pub remote: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new abelana store
    Init,

    /// Sign up a user (or update their display name)
    Signup {
        user_id: String,
        display_name: String,
        email: String,
    },

    /// Follow whoever owns an e-mail address
    Follow {
        user_id: String,

        /// One or more addresses
        #[arg(required = true)]
        emails: Vec<String>,
    },

    /// Follow a user by ID
    FollowId { user_id: String, following_id: String },

    /// Show follow counts
    Stats { user_id: String },

    /// List users someone follows
    Following { user_id: String },

    /// List someone's followers
    Followers { user_id: String },

    /// Show a user's public profile
    Person { person_id: String },

    /// Show follow-by-email intents
    Pending { user_id: String },

    /// Post a photo with a generated ID
    PostPhoto { owner_id: String },

    /// Ingest an uploaded photo by ID (<owner>.<suffix>)
    AddPhoto {
        photo_id: String,

        /// Photo date in unix milliseconds (default: now)
        #[arg(long)]
        date: Option<i64>,
    },

    /// Like a photo
    Like { user_id: String, photo_id: String },

    /// Remove a like
    Unlike { user_id: String, photo_id: String },

    /// Flag a photo for moderation
    Flag { user_id: String, photo_id: String },

    /// Approve a flagged photo
    Approve { moderator_id: String, photo_id: String },

    /// Comment on a photo
    Comment {
        person_id: String,
        photo_id: String,
        text: String,
    },

    /// List comments on a photo
    Comments { photo_id: String },

    /// Show a user's own photos
    Profile {
        user_id: String,

        /// Only photos older than this date (unix ms)
        #[arg(long, default_value = "")]
        last_date: String,
    },

    /// Show a user's timeline
    Timeline {
        user_id: String,

        /// Photo ID of the last entry of the previous page
        #[arg(long, default_value = "")]
        last_id: String,
    },

    /// Show a user's activity feed
    Activity { user_id: String },

    /// Run due background tasks
    Drain {
        /// Keep draining until nothing is due
        #[arg(long)]
        all: bool,
    },

    /// Show dead-lettered tasks
    FailedTasks,

    /// Prune resolved intents and dead tasks
    Compact {
        /// Age threshold in days
        #[arg(long, default_value = "30")]
        older_than_days: u32,
    },

    /// Reclaim database space
    Vacuum,

    /// Delete a user and everything they own
    DeleteUser { user_id: String },

    /// Run the daemon in foreground
    Daemon,

    /// Stop the running daemon
    DaemonStop,

    /// Check daemon status
    DaemonStatus,
}
