use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sightline-agent")]
#[command(about = "Vision-guided desktop automation runner")]
#[command(
    long_about = "Connects to a desktop, launches the target application, verifies the patient banner and performs the configured clicks and form entries, writing a JSON session report."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one automation session
    Run(RunArgs),
    /// Write a sample JSON configuration file
    SampleConfig(SampleConfigArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON configuration file
    #[clap(long, short = 'c', conflicts_with = "from_env", required_unless_present = "from_env")]
    pub config: Option<PathBuf>,

    /// Build the configuration from VM_*, TARGET_*, PATIENT_* environment variables
    #[clap(long)]
    pub from_env: bool,

    /// Directory for session reports and screenshots
    #[clap(long, short = 'o', env = "REPORT_DIR")]
    pub report_dir: Option<PathBuf>,

    /// Log filter (e.g. "debug", "sightline=trace"); overrides RUST_LOG
    #[clap(long, short = 'l')]
    pub log_level: Option<String>,

    /// Stop after the navigator phase (connect, launch, identity check)
    #[clap(long)]
    pub navigation_only: bool,
}

#[derive(Args, Debug)]
pub struct SampleConfigArgs {
    /// Where to write the sample
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_requires_a_config_source() {
        assert!(Cli::try_parse_from(["sightline-agent", "run"]).is_err());
        assert!(Cli::try_parse_from(["sightline-agent", "run", "--config", "a.json", "--from-env"]).is_err());

        let cli = Cli::try_parse_from([
            "sightline-agent",
            "run",
            "--from-env",
            "--navigation-only",
            "-l",
            "debug",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert!(args.from_env);
                assert!(args.navigation_only);
                assert_eq!(args.log_level.as_deref(), Some("debug"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
