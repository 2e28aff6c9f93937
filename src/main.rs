//! toolbridge - invoke tools on a streaming tool-invocation backend
//!
//! Usage:
//!   toolbridge list
//!   toolbridge call <tool> [json-args]
//!   toolbridge paths

use anyhow::{Context, Result};
use serde_json::Value;
use std::env;
use tracing::info;

use toolbridge::config::BridgeConfig;
use toolbridge::paths;
use toolbridge::BridgeClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("toolbridge=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "list" => cmd_list().await?,
        "call" => cmd_call(&args[2..]).await?,
        "paths" => {
            println!("config dir:  {}", paths::config_dir().display());
            println!("config file: {}", paths::config_path().display());
        }
        "help" | "--help" | "-h" => print_usage(),
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_usage() {
    eprintln!(
        r#"toolbridge - Invoke tools over a streaming bridge session

Usage:
  toolbridge list
  toolbridge call <tool> [json-args]
  toolbridge paths

Environment:
  TOOLBRIDGE_CONFIG   Override config file path
  TOOLBRIDGE_URL      Override backend base URL
  TOOLBRIDGE_API_KEY  Bearer credential
  RUST_LOG            Log filter (default toolbridge=info)

Config: {config}

Examples:
  toolbridge list
  toolbridge call get_campaigns '{{"limit": 10}}'
"#,
        config = paths::config_path().display(),
    );
}

fn load_client() -> Result<BridgeClient> {
    paths::log_paths();
    let config = BridgeConfig::load(paths::config_path()).context("failed to load config")?;
    info!(url = %config.stream_url(), "using backend");
    Ok(BridgeClient::new(config))
}

async fn cmd_list() -> Result<()> {
    let client = load_client()?;
    let tools = client.list_tools().await.context("tools/list failed")?;
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let Some(tool) = args.first() else {
        anyhow::bail!("usage: toolbridge call <tool> [json-args]");
    };
    let arguments: Value = match args.get(1) {
        Some(raw) => serde_json::from_str(raw).context("arguments must be valid JSON")?,
        None => Value::Object(Default::default()),
    };

    let client = load_client()?;
    let result = client
        .invoke(tool, arguments)
        .await
        .with_context(|| format!("tool '{}' failed", tool))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
