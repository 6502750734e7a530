use clap::{Parser, Subcommand};

use crate::model::Protocol;

#[derive(Parser)]
#[command(version, about = "Fetch, parse and merge proxy subscriptions", long_about = None)]
pub struct Args {
    #[arg(
        short,
        long,
        default_value = "./proxy-sync.toml",
        help = "Config file, accept file path or URL"
    )]
    pub config: String,

    #[arg(short, long, help = "Emit debug log")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler until Ctrl-C
    Run,

    /// Sync all enabled sources, or a single one
    Sync {
        #[arg(short, long, help = "Only sync the named source")]
        source: Option<String>,
    },

    /// Manage configured sources
    #[command(subcommand)]
    Sources(SourcesCommand),

    /// Parse a local file and print the decoded proxies
    Parse {
        #[arg(help = "File with share links, Base64 content or a YAML proxy list")]
        file: String,
    },

    /// Report duplicate server:port keys in the proxy store
    Audit,
}

#[derive(Subcommand)]
pub enum SourcesCommand {
    /// List sources with their health
    List,

    /// Add a source
    Add {
        name: String,
        url: String,
        #[arg(short, long, help = "Protocol hint (ss, ssr, vmess, vless, trojan, hy2)")]
        protocol: Option<Protocol>,
        #[arg(short, long, help = "Sync interval in minutes, at least 5")]
        interval: Option<u32>,
    },

    /// Remove a source
    Remove { name: String },

    /// Enable a source and make it due immediately
    Enable { name: String },

    /// Disable a source
    Disable { name: String },

    /// Change the sync interval of a source
    Interval { name: String, minutes: u32 },

    /// Replace all sources with the defaults
    Reset,
}
