//! Iris MCP Client - CLI driver
//!
//! Starts a connection to an MCP tool server, runs one operation, prints the
//! result as JSON on stdout, and shuts the server down.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

use iris_mcp_client::config::ClientConfig;
use iris_mcp_client::iris::IrisTools;
use iris_mcp_client::mcp::McpClient;

/// Iris MCP Client
#[derive(Parser)]
#[command(name = "iris-mcp")]
#[command(author, version, about = "Iris MCP Client - talk to an MCP tool server over stdio")]
struct Cli {
    /// Command used to launch the MCP server
    #[arg(long)]
    server: String,

    /// Argument for the server command (repeatable)
    #[arg(long = "server-arg")]
    server_args: Vec<String>,

    /// Environment variable for the server, as KEY=VALUE (repeatable)
    #[arg(long = "env")]
    env: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tools the server exposes
    Tools,
    /// Call a named tool with a JSON argument object
    Call {
        /// Tool name
        name: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Evaluate a project's health
    Evaluate {
        /// Project identifier
        project_id: String,
    },
    /// Detect drift from a project's stated goals
    Drift {
        /// Project identifier
        project_id: String,
    },
    /// List tracked projects
    Projects,
    /// Record a free-form insight against a project
    Insight {
        /// Project identifier
        project_id: String,
        /// Insight text
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(&cli.server)?.args(cli.server_args.clone());
    for entry in &cli.env {
        config = config.env_entry(entry)?;
    }

    let client = McpClient::new(config);
    client.start().await.context("failed to start MCP server")?;

    let outcome = run_command(&client, &cli.command).await;

    // Always release the subprocess, even when the command failed.
    client.shutdown().await?;

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_command(client: &McpClient, command: &Commands) -> anyhow::Result<Value> {
    let iris = IrisTools::new(client.clone());

    let value = match command {
        Commands::Tools => serde_json::to_value(client.list_tools().await?)?,
        Commands::Call { name, args } => {
            let arguments: Value =
                serde_json::from_str(args).context("--args must be a JSON object")?;
            client.call_tool(name, arguments).await?
        }
        Commands::Evaluate { project_id } => {
            serde_json::to_value(iris.evaluate_project(project_id).await?)?
        }
        Commands::Drift { project_id } => serde_json::to_value(iris.detect_drift(project_id).await?)?,
        Commands::Projects => serde_json::to_value(iris.list_projects().await?)?,
        Commands::Insight { project_id, text } => {
            serde_json::to_value(iris.record_insight(project_id, text).await?)?
        }
    };

    Ok(value)
}
