use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for the live relay", long_about = None)]
struct Cli {
    #[arg(short, long, env = "RELAY_ADMIN_URL", default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long, env = "RELAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check relay status
    Status,
    /// List registered sessions
    Sessions,
    /// Tear down one session
    Evict {
        /// Session ID as shown by `sessions`
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match &cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Sessions => client.get(format!("{base}/admin/sessions")),
        Commands::Evict { id } => client.delete(format!("{base}/admin/sessions/{id}")),
    };
    let res = request.headers(headers).send().await?;

    if let Commands::Evict { id } = &cli.command {
        match res.status().as_u16() {
            202 => println!("Eviction requested for {id}"),
            404 => eprintln!("No session {id}"),
            400 => eprintln!("Not a session ID: {id}"),
            other => eprintln!("Error: Admin API returned status {other}"),
        }
        return Ok(());
    }

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
