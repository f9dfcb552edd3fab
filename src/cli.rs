use clap::{Parser, Subcommand};

/// Cost Guard: contracted usage, month-end forecasts and overage risk
#[derive(Parser)]
#[command(name = "costguard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to COSTGUARD_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Compute a tenant's cost summary once and print it
    Summary {
        #[arg(long)]
        tenant: String,
        /// Print the full JSON document instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List a tenant's contracted services and how each is metered
    Contracts {
        #[arg(long)]
        tenant: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary_command() {
        let cli = Cli::parse_from(["costguard", "summary", "--tenant", "acme", "--json"]);
        match cli.command {
            Some(Commands::Summary { tenant, json }) => {
                assert_eq!(tenant, "acme");
                assert!(json);
            }
            _ => panic!("expected summary command"),
        }
    }

    #[test]
    fn test_no_subcommand_is_allowed() {
        let cli = Cli::parse_from(["costguard"]);
        assert!(cli.command.is_none());
    }
}
