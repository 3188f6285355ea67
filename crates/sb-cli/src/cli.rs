//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sb_core::config::ENV_CONNECTION_STRING;

/// Environment variable naming the emulator state file.
pub const ENV_STATE_FILE: &str = "SERVICEBUS_EMULATOR_STATE";

/// Topic, queue and subscription administration plus listeners.
#[derive(Parser, Debug)]
#[command(name = "sbctl", version)]
#[command(about = "Administer topics, queues and subscriptions, send messages and listen")]
pub struct Cli {
    /// Namespace connection string
    #[arg(long, env = ENV_CONNECTION_STRING, hide_env_values = true)]
    pub connection_string: String,

    /// JSON file holding the emulated namespace between invocations
    #[arg(long, env = ENV_STATE_FILE, default_value = ".sbctl-state.json")]
    pub state_file: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Topic and subscription commands
    #[command(subcommand)]
    Topic(TopicCommand),
    /// Queue commands
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Subcommand, Debug)]
pub enum TopicCommand {
    /// List topics with message counts
    List,
    /// Create a topic
    Create {
        #[arg(long)]
        name: String,
    },
    /// Delete a topic and its subscriptions
    Delete {
        #[arg(long)]
        name: String,
    },
    /// List the subscriptions of a topic
    ListSubscriptions {
        #[arg(long)]
        name: String,
    },
    /// Create a subscription with optional forwarding and rules
    CreateSubscription {
        /// Topic name
        #[arg(long)]
        name: String,
        #[arg(long)]
        subscription: String,
        /// `topic:name`, `queue:name` or a bare topic name
        #[arg(long)]
        forward_to: Option<String>,
        #[arg(long = "forward-deadletter-to")]
        forward_dead_letter_to: Option<String>,
        /// `rule:filter[:action]`; repeated fragments for one rule are joined
        #[arg(long = "with-rule")]
        rules: Vec<String>,
    },
    /// Delete a subscription
    DeleteSubscription {
        #[arg(long)]
        name: String,
        #[arg(long)]
        subscription: String,
    },
    /// Send a JSON message to a topic
    Send {
        #[arg(long)]
        topic: String,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Listen on one or more topics until interrupted
    Subscribe {
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,
        /// Existing subscription to read from
        #[arg(long, conflicts_with = "wiretap", required_unless_present = "wiretap")]
        subscription: Option<String>,
        /// Listen on a temporary tap subscription, removed on exit
        #[arg(long)]
        wiretap: bool,
        /// Browse without consuming
        #[arg(long)]
        peek: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// List queues with message counts
    List,
    /// Create a queue
    Create {
        #[arg(long)]
        name: String,
        /// `queue:name`, `topic:name` or a bare queue name
        #[arg(long)]
        forward_to: Option<String>,
        #[arg(long = "forward-deadletter-to")]
        forward_dead_letter_to: Option<String>,
    },
    /// Delete a queue
    Delete {
        #[arg(long)]
        name: String,
    },
    /// Send a JSON message to a queue
    Send {
        #[arg(long)]
        queue: String,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Listen on one or more queues until interrupted
    Subscribe {
        #[arg(long = "queue", required = true)]
        queues: Vec<String>,
        /// Browse without consuming
        #[arg(long)]
        peek: bool,
    },
}

/// Body, label and property options shared by both send commands.
#[derive(Args, Debug, Default)]
pub struct MessageArgs {
    /// JSON body
    #[arg(long, conflicts_with = "default", required_unless_present = "default")]
    pub body: Option<String>,
    /// Send the sample TimeService.TimePassed body
    #[arg(long)]
    pub default: bool,
    /// Stamp the Serialization/TenantId properties; label is the entity name
    #[arg(long)]
    pub uno: bool,
    #[arg(long)]
    pub label: Option<String>,
    /// Message name for forwarding-topology properties
    #[arg(long)]
    pub name: Option<String>,
    /// Message domain for forwarding-topology properties
    #[arg(long, default_value = "")]
    pub domain: String,
    #[arg(long, default_value = "ServiceBus.Tools")]
    pub sender: String,
    #[arg(long = "version", default_value = "1.0")]
    pub message_version: String,
    #[arg(long, default_value = "")]
    pub tenant: String,
    /// Extra user property, `key=value`; merged over the template
    #[arg(long = "property")]
    pub properties: Vec<String>,
}
