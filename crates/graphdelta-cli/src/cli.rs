use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use graphdelta_types::ReferenceHandling;

#[derive(Parser)]
#[command(
    name = "graphdelta",
    about = "Structural diff of object graphs",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compare two JSON documents as object graphs
    Diff(DiffArgs),
    /// Show the effective settings
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SettingsArgs {
    /// TOML settings file
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Override the reference handling policy
    #[arg(long)]
    pub policy: Option<Policy>,
}

#[derive(Args)]
pub struct DiffArgs {
    pub left: PathBuf,
    pub right: PathBuf,
    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Policy {
    Throw,
    Structural,
    StructuralWithLoops,
    ReferencesOnly,
}

impl From<Policy> for ReferenceHandling {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Throw => Self::Throw,
            Policy::Structural => Self::Structural,
            Policy::StructuralWithLoops => Self::StructuralWithLoops,
            Policy::ReferencesOnly => Self::ReferencesOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_diff_with_overrides() {
        let cli = Cli::parse_from([
            "graphdelta",
            "diff",
            "a.json",
            "b.json",
            "--policy",
            "structural-with-loops",
            "--format",
            "json",
        ]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Diff(args) => {
                assert_eq!(args.left, PathBuf::from("a.json"));
                assert_eq!(args.settings.policy, Some(Policy::StructuralWithLoops));
                assert!(args.settings.settings.is_none());
            }
            Command::Config(_) => panic!("expected diff"),
        }
    }

    #[test]
    fn policy_maps_to_reference_handling() {
        assert_eq!(ReferenceHandling::from(Policy::Throw), ReferenceHandling::Throw);
        assert_eq!(
            ReferenceHandling::from(Policy::ReferencesOnly),
            ReferenceHandling::ReferencesOnly
        );
    }
}
