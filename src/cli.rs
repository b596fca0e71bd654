use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::output::IgnoreList;
use crate::policy::Policy;

#[derive(Parser, Debug)]
#[command(name = "alertyx", author, about = "Runtime threat detection and response", long_about = None)]
pub struct Cli {
    /// Permit cleaning and mitigation instead of only reporting
    #[arg(short, long, global = true)]
    pub active: bool,

    /// Show raw event lines and debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Send output to syslog instead of the terminal
    #[arg(short, long, global = true)]
    pub syslog: bool,

    /// Configuration file; a missing file means defaults
    #[arg(short, long, global = true, default_value = "alertyx.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch live kernel events for attacker techniques
    #[command(visible_aliases = ["m", "mon", "eyes"])]
    Monitor(MonitorArgs),
    /// Look for evidence of past exploitation
    #[command(visible_aliases = ["h", "uwu"])]
    Hunt {
        /// Also mitigate techniques that were found (needs --active)
        #[arg(short, long)]
        mitigate: bool,
    },
    /// Check which mitigations apply, and apply them with --active
    #[command(visible_aliases = ["mit", "cybpat"])]
    Mitigate,
    /// Print the version
    Version,
}

#[derive(Args, Debug, Default)]
pub struct MonitorArgs {
    /// Also mitigate detected techniques (needs --active)
    #[arg(short, long)]
    pub mitigate: bool,

    /// Show repeated detections
    #[arg(short, long)]
    pub duplicates: bool,

    /// Event types whose raw lines are hidden, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub ignore: Vec<String>,

    /// JSON-lines event feed to tail, repeatable
    #[arg(short, long = "feed")]
    pub feeds: Vec<PathBuf>,
}

impl Cli {
    /// Operator policy for the selected command. Config supplies the default
    /// ignore list; everything else comes from flags.
    pub fn policy(&self, cfg: &Config) -> Policy {
        let mut ignore: IgnoreList = cfg.monitor.ignore.iter().collect();
        let (mitigate, duplicates) = match &self.command {
            Commands::Monitor(args) => {
                ignore.extend(&args.ignore);
                (args.mitigate, args.duplicates)
            }
            Commands::Hunt { mitigate } => (*mitigate, false),
            Commands::Mitigate | Commands::Version => (false, false),
        };
        Policy { active: self.active, mitigate, duplicates, ignore }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_alias_and_flags_parse() {
        let cli = Cli::parse_from(["alertyx", "-a", "eyes", "-m", "-d", "--ignore", "open,Readline", "--feed", "a.jsonl", "-f", "b.jsonl"]);
        let Commands::Monitor(args) = &cli.command else {
            panic!("expected monitor, got {:?}", cli.command);
        };
        assert_eq!(args.feeds.len(), 2);

        let policy = cli.policy(&Config::default());
        assert!(policy.active && policy.mitigate && policy.duplicates);
        assert!(policy.ignore.contains("readline"));
        assert!(!policy.ignore.contains("exec"));
    }

    #[test]
    fn globals_after_subcommand_and_other_aliases() {
        let cli = Cli::parse_from(["alertyx", "uwu", "--active", "--mitigate"]);
        assert!(matches!(cli.command, Commands::Hunt { mitigate: true }));
        assert!(cli.policy(&Config::default()).may_mitigate());

        let cli = Cli::parse_from(["alertyx", "cybpat"]);
        assert!(matches!(cli.command, Commands::Mitigate));
        assert!(!cli.policy(&Config::default()).active);
    }

    #[test]
    fn config_ignore_list_merges_with_flags() {
        let mut cfg = Config::default();
        cfg.monitor.ignore = vec!["exec".into()];
        let cli = Cli::parse_from(["alertyx", "mon", "-i", "open"]);
        let policy = cli.policy(&cfg);
        assert!(policy.ignore.contains("exec") && policy.ignore.contains("open"));
    }
}
