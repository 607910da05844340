//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use plumbline_core::context::ContextKind;
use plumbline_core::protocol::MessageKind;

/// Live element measurement overlay, hosted from the command line.
///
/// Runs the three cooperating contexts of the overlay outside a browser:
/// a relay daemon in place of the background context, `replay` as a page
/// overlay driven by a recorded page and input script, and `send` as a
/// popup issuing one message.
#[derive(Debug, Parser)]
#[command(name = "plumbline", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the relay daemon (usually auto-started)
    Relay,

    /// Run a page overlay over a page fixture and print tracker snapshots
    #[command(after_help = "\
Script steps (JSON array, applied in order):
  {\"step\":\"viewport\",\"width\":1280,\"height\":720}
  {\"step\":\"pointer\",\"x\":40,\"y\":20}
  {\"step\":\"hover\",\"element\":3}          # hover a node by id
  {\"step\":\"hover_at\",\"x\":40,\"y\":20}     # hover whatever is under a point
  {\"step\":\"modifiers\",\"alt\":true}
  {\"step\":\"key\",\"key\":\"l\",\"modifiers\":{\"alt\":true}}
  {\"step\":\"scroll\",\"x\":0,\"y\":120}
  {\"step\":\"zoom\",\"zoom\":2}
  {\"step\":\"snapshot\",\"label\":\"locked\"}

Examples:
  plumbline replay --page page.json --script steps.json
  plumbline replay --page page.json --script steps.json --format text
  plumbline replay --page page.json --script steps.json --config plumbline.json
  plumbline replay --page page.json --script steps.json --connect   # join the relay")]
    Replay(ReplayArgs),

    /// Send one message through the relay, as the popup would
    #[command(after_help = "\
Examples:
  plumbline send zoom-change --data '{\"zoom\":2}'
  plumbline send tracker-lock --data '{\"id\":\"tracker-1\",\"locked\":true}'
  plumbline send extension-toggle --target background --data '{\"active\":false}'
  plumbline send screenshot --target background")]
    Send(SendArgs),

    /// Stop the relay daemon
    Stop,
}

#[derive(Debug, clap::Args)]
pub struct ReplayArgs {
    /// Page fixture: viewport and layout nodes
    #[arg(long, value_name = "FILE")]
    pub page: PathBuf,

    /// Input script: JSON array of steps
    #[arg(long, value_name = "FILE")]
    pub script: PathBuf,

    /// Inspector configuration (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Join the relay so other contexts can reach this page
    #[arg(long)]
    pub connect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Full JSON snapshots
    Json,
    /// One line per tracker and guide line
    Text,
}

#[derive(Debug, clap::Args)]
pub struct SendArgs {
    /// Message type, e.g. ZOOM_CHANGE or zoom-change
    pub kind: MessageKind,

    /// Contexts to address [default: all]
    #[arg(short, long, value_delimiter = ',', value_name = "CONTEXT")]
    pub target: Vec<ContextKind>,

    /// Message payload as JSON
    #[arg(short, long, default_value = "{}", value_name = "JSON")]
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_parses_kind_and_targets() {
        let cli = Cli::parse_from([
            "plumbline",
            "send",
            "zoom-change",
            "--target",
            "content,popup",
            "--data",
            r#"{"zoom":2}"#,
        ]);

        match cli.command {
            Commands::Send(args) => {
                assert_eq!(args.kind, MessageKind::ZoomChange);
                assert_eq!(args.target, vec![ContextKind::Content, ContextKind::Popup]);
                assert_eq!(args.data, r#"{"zoom":2}"#);
            }
            _ => panic!("Expected send command"),
        }
    }

    #[test]
    fn send_defaults_to_empty_payload() {
        let cli = Cli::parse_from(["plumbline", "send", "SCREENSHOT"]);
        match cli.command {
            Commands::Send(args) => {
                assert!(args.target.is_empty());
                assert_eq!(args.data, "{}");
            }
            _ => panic!("Expected send command"),
        }
    }

    #[test]
    fn send_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["plumbline", "send", "teleport"]).is_err());
    }

    #[test]
    fn replay_parses_files_and_format() {
        let cli = Cli::parse_from([
            "plumbline",
            "replay",
            "--page",
            "page.json",
            "--script",
            "steps.json",
            "--format",
            "text",
            "--connect",
        ]);

        match cli.command {
            Commands::Replay(args) => {
                assert_eq!(args.page, PathBuf::from("page.json"));
                assert_eq!(args.script, PathBuf::from("steps.json"));
                assert_eq!(args.format, OutputFormat::Text);
                assert!(args.config.is_none());
                assert!(args.connect);
            }
            _ => panic!("Expected replay command"),
        }
    }
}
