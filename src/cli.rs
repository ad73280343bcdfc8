use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use kid_safety::safety::SafetyLevel;
use kid_safety::safety::workflow::RequestType;

/// Kid account safety policy engine
#[derive(Parser, Debug)]
#[command(name = "kid-safety")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the state file location
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an example configuration file
    Init {
        /// Output path for configuration file (defaults to the platform config path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Manage kid accounts
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Issue and manage login codes
    Code {
        #[command(subcommand)]
        command: CodeCommands,
    },

    /// Inspect and assess maturity
    Maturity {
        #[command(subcommand)]
        command: MaturityCommands,
    },

    /// Manage kid passwords
    Password {
        #[command(subcommand)]
        command: PasswordCommands,
    },

    /// Trigger the panic button for a kid
    Panic {
        /// Kid account ID
        kid: Uuid,

        /// Optional message from the kid
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List and resolve safety events
    Events {
        #[command(subcommand)]
        command: EventCommands,
    },

    /// Review parent approval requests
    Approvals {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Platform access and usage
    Access {
        #[command(subcommand)]
        command: AccessCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccountCommands {
    /// Create a kid account under a parent
    Create {
        #[arg(long)]
        parent: Uuid,

        /// User ID the kid account is attached to
        #[arg(long)]
        user: Uuid,

        #[arg(long)]
        age: u8,

        /// strict, moderate, relaxed or adaptive
        #[arg(long, default_value = "moderate")]
        safety_level: SafetyLevel,
    },

    /// Show a kid account
    Show {
        kid: Uuid,
    },

    /// List a parent's kid accounts
    List {
        #[arg(long)]
        parent: Uuid,
    },

    /// Deactivate a kid account and revoke its login codes
    Deactivate {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum CodeCommands {
    /// Issue a login code
    Issue {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,

        /// Lifetime in days (defaults to the maturity level's lifetime)
        #[arg(long)]
        days: Option<u32>,

        /// Write the QR code PNG to this path
        #[arg(long)]
        qr_out: Option<PathBuf>,
    },

    /// Redeem a login code
    Validate {
        code: String,
    },

    /// Revoke a login code by ID
    Revoke {
        code_id: Uuid,

        #[arg(long)]
        parent: Uuid,
    },

    /// List a kid's active login codes
    List {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum MaturityCommands {
    /// Show the current maturity score
    Show {
        kid: Uuid,
    },

    /// Record a parent maturity rating (0-5)
    Rate {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,

        #[arg(long)]
        rating: u8,

        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PasswordCommands {
    /// Set a kid's password as the parent
    Set {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,

        #[arg(long)]
        password: String,
    },

    /// Revoke a kid's password access
    Revoke {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,

        #[arg(long)]
        reason: String,
    },

    /// Schedule the day the kid gains password independence
    Independence {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,

        /// Date in YYYY-MM-DD form (UTC)
        #[arg(long)]
        date: NaiveDate,
    },

    /// Show password settings
    Status {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum EventCommands {
    /// List recent safety events
    List {
        kid: Uuid,

        #[arg(long)]
        parent: Uuid,

        #[arg(long, default_value = "7")]
        days: u32,
    },

    /// Resolve a safety event
    Resolve {
        event_id: Uuid,

        #[arg(long)]
        parent: Uuid,

        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ApprovalCommands {
    /// Create an approval request on behalf of a kid
    Request {
        kid: Uuid,

        /// follow, message, group_join or content_share
        #[arg(long)]
        request_type: RequestType,

        #[arg(long)]
        target: Uuid,
    },

    /// List pending requests for a parent
    Pending {
        #[arg(long)]
        parent: Uuid,
    },

    /// Approve or deny a pending request
    Decide {
        approval_id: Uuid,

        #[arg(long)]
        parent: Uuid,

        /// Deny instead of approve
        #[arg(long)]
        deny: bool,

        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccessCommands {
    /// Check whether a kid may use the platform right now
    Check {
        kid: Uuid,
    },

    /// Record minutes of usage for today
    Record {
        kid: Uuid,

        #[arg(long)]
        minutes: u32,
    },
}
