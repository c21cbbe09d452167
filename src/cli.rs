//! Command-line interface for scribed
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Resilient transcription jobs for long audio
#[derive(Parser, Debug)]
#[command(name = "scribed", version, about = "Resilient transcription jobs for long audio")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a normalized WAV file in this process
    Transcribe {
        /// Input WAV file
        file: PathBuf,

        /// Spoken language (default: auto-detect). Examples: auto, en, de
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Translate the speech into English
        #[arg(long)]
        translate: bool,

        /// Attach word-level timings to segments
        #[arg(long)]
        word_timestamps: bool,

        /// Output format
        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,

        /// Window length override. Examples: 30s, 1m
        #[arg(long, value_name = "DURATION", value_parser = parse_secs)]
        window: Option<u64>,

        /// Checkpoint interval override. Examples: 5m, 90s
        #[arg(long, value_name = "DURATION", value_parser = parse_secs)]
        checkpoint_interval: Option<u64>,
    },

    /// Show a job's status and progress (needs a shared store)
    Status {
        /// Job identifier
        job_id: String,

        /// Output format
        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Cancel a queued or running job (needs a shared store)
    Cancel {
        /// Job identifier
        job_id: String,
    },

    /// Resume an interrupted job from its latest checkpoint (needs a shared store)
    Resume {
        /// Job identifier
        job_id: String,
    },

    /// Inspect the transcription model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Check whether a client may submit now
    RateCheck {
        /// Client identity (API key, user id, address)
        client: String,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Model maintenance actions
#[derive(Subcommand, Debug)]
pub enum ModelAction {
    /// Show the configured model and whether it is resident
    Status,
    /// Load the model once and report device and memory
    Load,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// Parse a duration string into whole seconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcribe_defaults() {
        let cli = Cli::try_parse_from(["scribed", "transcribe", "talk.wav"]).unwrap();
        match cli.command {
            Commands::Transcribe {
                file,
                language,
                translate,
                output,
                window,
                ..
            } => {
                assert_eq!(file, PathBuf::from("talk.wav"));
                assert_eq!(language, None);
                assert!(!translate);
                assert_eq!(output, OutputFormat::Text);
                assert_eq!(window, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_parse_transcribe_with_options() {
        let cli = Cli::try_parse_from([
            "scribed",
            "transcribe",
            "talk.wav",
            "--language",
            "de",
            "--translate",
            "--word-timestamps",
            "-o",
            "json",
            "--window",
            "1m",
            "--checkpoint-interval",
            "90s",
        ])
        .unwrap();
        match cli.command {
            Commands::Transcribe {
                language,
                translate,
                word_timestamps,
                output,
                window,
                checkpoint_interval,
                ..
            } => {
                assert_eq!(language.as_deref(), Some("de"));
                assert!(translate);
                assert!(word_timestamps);
                assert_eq!(output, OutputFormat::Json);
                assert_eq!(window, Some(60));
                assert_eq!(checkpoint_interval, Some(90));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["scribed", "-vv", "config", "path"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_global_options_after_command() {
        let cli =
            Cli::try_parse_from(["scribed", "status", "abc", "--config", "/tmp/c.toml", "-q"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Status { ref job_id, .. } if job_id == "abc"));
    }

    #[test]
    fn test_job_commands_require_id() {
        for command in ["status", "cancel", "resume"] {
            let err = Cli::try_parse_from(["scribed", command]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn test_model_requires_subcommand() {
        let err = Cli::try_parse_from(["scribed", "model"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_parse_rate_check() {
        let cli = Cli::try_parse_from(["scribed", "rate-check", "client-7"]).unwrap();
        assert!(matches!(cli.command, Commands::RateCheck { ref client } if client == "client-7"));
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let err =
            Cli::try_parse_from(["scribed", "transcribe", "a.wav", "--window", "soon"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_parse_secs_formats() {
        assert_eq!(parse_secs("45"), Ok(45));
        assert_eq!(parse_secs("5m"), Ok(300));
        assert_eq!(parse_secs("1h30m"), Ok(5400));
        assert!(parse_secs("").is_err());
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["scribed", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
