use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Forms submission relay.
#[derive(Parser)]
#[command(name = "formrelay")]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the API server, delivery workers and sweep scheduler (default)
    Serve,

    /// Create an API client and print its credentials
    CreateClient {
        /// Unique client name
        name: String,
    },

    /// Dispatch an unsent submission again
    Retry {
        /// Submission id
        submission_id: Uuid,
    },

    /// Sender reputation commands
    Sender {
        #[command(subcommand)]
        action: SenderAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum SenderAction {
    /// Always allow dispatch for this sender
    Whitelist { email_address: String },

    /// Stop dispatching for this sender
    Blacklist { email_address: String },

    /// Lift a blacklist
    Unblacklist { email_address: String },
}
