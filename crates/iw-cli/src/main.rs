use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "inkwell",
    about = "Inkwell: notes, bookmarks and AI concept maps",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true, default_value = "~/.inkwell/config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST server
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// REST port (overrides config)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Analyze text once and print the result as JSON
    Analyze {
        /// Content to analyze; `-` reads stdin
        content: String,

        /// User the request is attributed to for rate limiting and caching
        #[arg(long, short, default_value = "local")]
        user: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => commands::serve::start(host, port, &cli.config).await,
        Commands::Analyze { content, user } => {
            commands::analyze::run(content, user, &cli.config).await
        }
        Commands::Config => commands::config::show(&cli.config),
    }
}
