use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod util;

#[derive(Parser)]
#[command(
    name = "skybridge",
    version,
    about = "Skybridge CLI — inspect Gradio spaces and run the aggregating MCP proxy"
)]
struct Cli {
    /// Hub base URL
    #[arg(long, env = "HF_HUB_URL", default_value = "https://huggingface.co")]
    hub_url: String,

    /// Bearer token override (otherwise DEFAULT_HF_TOKEN or the hub token file)
    #[arg(long, env = "HF_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Space discovery: metadata and tool schemas
    Spaces {
        #[command(subcommand)]
        command: commands::spaces::SpacesCommands,
    },
    /// Invoke one space tool over SSE and print the result
    Call(commands::call::CallArgs),
    /// MCP server operations
    Mcp {
        #[command(subcommand)]
        command: skybridge_mcp_runtime::McpCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let token = util::resolve_token(cli.token.as_deref());

    let code = match cli.command {
        Commands::Spaces { command } => {
            commands::spaces::run(&cli.hub_url, token.as_deref(), command).await
        }
        Commands::Call(args) => commands::call::run(&cli.hub_url, token.as_deref(), args).await,
        Commands::Mcp { command } => skybridge_mcp_runtime::run(command).await,
    };
    std::process::exit(code);
}
