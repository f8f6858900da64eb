use clap::Parser;
use tracing_subscriber::EnvFilter;

use skybridge_mcp_runtime::{McpCommands, run};

#[derive(Parser)]
#[command(
    name = "skybridge-mcp",
    version,
    about = "Skybridge MCP server — aggregating proxy for Hub tools and Gradio spaces"
)]
struct Cli {
    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    // Diagnostics stay on stderr: stdout carries protocol frames.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let code = run(cli.command).await;
    std::process::exit(code);
}
