use clap::{Parser, Subcommand};

/// Command-line options for Mailbrief.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authenticate with Google via the browser consent flow
    Login,
    /// Fetch, summarize, and store a batch of inbox messages
    Sync {
        /// Maximum number of messages to pull this run
        #[arg(long)]
        max_results: Option<u32>,
    },
    /// List stored email summaries
    List {
        /// Show trashed emails instead of the inbox
        #[arg(long)]
        trash: bool,
    },
    /// Mark an email read (or unread with --unread)
    Read {
        email_id: String,
        #[arg(long)]
        unread: bool,
    },
    /// Move an email to the trash
    Trash { email_id: String },
    /// Restore an email from the trash
    Restore { email_id: String },
    /// Permanently delete one trashed email
    Purge { email_id: String },
    /// Permanently delete everything in the trash
    EmptyTrash,
}
