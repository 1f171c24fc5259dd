use crate::security::AutonomyTier;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `Semblance` - a private assistant that asks before it acts.
#[derive(Parser, Debug)]
#[command(name = "semblance")]
#[command(version)]
#[command(about = "A local assistant with a trust layer over every action.", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.semblance/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Talk to the assistant
    Chat {
        /// Single message mode (don't enter interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// List actions waiting for your approval
    Pending,

    /// Approve and execute a pending action
    Approve {
        /// Action id
        id: String,
    },

    /// Reject a pending action
    Reject {
        /// Action id
        id: String,
    },

    /// Ask the gateway to reverse an executed action
    Undo {
        /// Action id
        id: String,
    },

    /// Show the turns of a conversation
    History {
        /// Conversation id
        conversation: String,
    },

    /// Show every recorded action, newest first
    Log {
        #[arg(long, default_value = "20")]
        limit: u32,

        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Inspect or change autonomy tiers
    Autonomy {
        #[command(subcommand)]
        autonomy_command: AutonomyCommands,
    },

    /// Show how close an action kind is to running without approval
    Trust {
        /// Action type, e.g. email.send
        #[arg(required_unless_present = "all")]
        action: Option<String>,

        /// Example payload as JSON (decides the sub-type)
        #[arg(long, default_value = "{}")]
        payload: String,

        /// List the history of every action kind seen so far
        #[arg(long, conflicts_with = "action")]
        all: bool,
    },

    /// Suggestions to raise a domain's tier
    Escalations {
        #[command(subcommand)]
        escalation_command: EscalationCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum AutonomyCommands {
    /// Print the current tiers
    Show,

    /// Set the default tier, or one domain's tier with --domain
    Set {
        /// observer, guardian, partner or autonomous
        tier: AutonomyTier,

        /// Domain to override (email, calendar, ...)
        #[arg(long)]
        domain: Option<String>,
    },

    /// Remove a domain override so the default tier applies
    Clear {
        /// Domain whose override to drop
        domain: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum EscalationCommands {
    /// Look for routine action kinds and offer new suggestions
    Check,

    /// Show suggestions still waiting for an answer
    List,

    /// Accept a suggestion and raise the domain's tier
    Accept {
        /// Prompt id
        id: String,
    },

    /// Dismiss a suggestion; it is not offered again
    Dismiss {
        /// Prompt id
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn autonomy_set_parses_tier_and_domain() {
        let cli = Cli::parse_from(["semblance", "autonomy", "set", "guardian", "--domain", "email"]);
        let Commands::Autonomy {
            autonomy_command: AutonomyCommands::Set { tier, domain },
        } = cli.command
        else {
            panic!("expected autonomy set");
        };
        assert_eq!(tier, AutonomyTier::Guardian);
        assert_eq!(domain.as_deref(), Some("email"));
    }

    #[test]
    fn unknown_tier_is_rejected() {
        assert!(Cli::try_parse_from(["semblance", "autonomy", "set", "reckless"]).is_err());
    }

    #[test]
    fn autonomy_clear_takes_a_domain() {
        let cli = Cli::parse_from(["semblance", "autonomy", "clear", "email"]);
        assert!(matches!(
            cli.command,
            Commands::Autonomy {
                autonomy_command: AutonomyCommands::Clear { ref domain }
            } if domain == "email"
        ));
    }

    #[test]
    fn trust_needs_an_action_or_all() {
        assert!(Cli::try_parse_from(["semblance", "trust"]).is_err());
        assert!(Cli::try_parse_from(["semblance", "trust", "email.send", "--all"]).is_err());

        let cli = Cli::parse_from(["semblance", "trust", "--all"]);
        assert!(matches!(cli.command, Commands::Trust { action: None, all: true, .. }));
    }

    #[test]
    fn undo_and_escalation_commands_parse() {
        let cli = Cli::parse_from(["semblance", "undo", "a-1"]);
        assert!(matches!(cli.command, Commands::Undo { ref id } if id == "a-1"));

        let cli = Cli::parse_from(["semblance", "escalations", "dismiss", "p-1"]);
        assert!(matches!(
            cli.command,
            Commands::Escalations {
                escalation_command: EscalationCommands::Dismiss { ref id }
            } if id == "p-1"
        ));
        assert!(matches!(
            Cli::parse_from(["semblance", "escalations", "check"]).command,
            Commands::Escalations {
                escalation_command: EscalationCommands::Check
            }
        ));
    }

    #[test]
    fn log_paging_defaults() {
        let cli = Cli::parse_from(["semblance", "log"]);
        assert!(matches!(cli.command, Commands::Log { limit: 20, offset: 0 }));
    }
}
