//! SchoolCoin CLI
//!
//! Command-line client for the SchoolCoin API:
//! - Log in and keep a session token
//! - Check balances, send coins, award achievements, buy items
//! - Import users and export ledgers as CSV
//! - Check server status

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{RequestBuilder, Response};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "schoolcoin")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "School token economy client")]
#[command(long_about = "SchoolCoin client.\nEarn coins for achievements, spend them in the marketplace and trade with classmates.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8080", global = true)]
    pub api_url: String,

    /// Session token (default: SCHOOLCOIN_TOKEN or the saved login)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and save the session token
    Login {
        /// Account email
        email: String,
        /// Password
        password: String,
    },

    /// End the current session
    Logout,

    /// Show the logged-in profile
    Me,

    /// Show a coin balance
    Balance {
        /// Profile id (default: yourself)
        profile_id: Option<i64>,
    },

    /// Send coins to another profile
    Transfer {
        /// Receiving profile id
        receiver_id: i64,
        /// Number of coins
        amount: i64,
        /// Note stored with the transaction
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Award an achievement to a student
    Award {
        /// Student profile id
        student_id: i64,
        /// Achievement type id
        achievement_type_id: i64,
        /// Note stored with the achievement
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Buy a marketplace item
    Purchase {
        /// Item id
        item_id: i64,
        /// Quantity
        #[arg(short, long, default_value = "1")]
        quantity: i64,
    },

    /// Import users from CSV (name,email,role[,password])
    Import {
        /// School id
        school_id: i64,
        /// Path to CSV file
        path: PathBuf,
    },

    /// Export transactions or balances as CSV
    Export {
        /// School id
        school_id: i64,
        /// What to export (transactions, balances)
        #[arg(short, long, default_value = "transactions")]
        kind: String,
        /// Start of range (e.g., now-30d, 2024-09-01)
        #[arg(long)]
        since: Option<String>,
        /// End of range
        #[arg(long)]
        until: Option<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show server status
    Status,

    /// Generate default server config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let api = format!("{}/api/v1", cli.api_url.trim_end_matches('/'));

    match &cli.command {
        Commands::Login { email, password } => {
            let body = serde_json::json!({ "email": email, "password": password });
            let login = expect_json(client.post(format!("{}/auth/login", api)).json(&body)).await?;

            let token = login["token"]
                .as_str()
                .context("login response has no token")?;
            let path = save_token(token)?;

            println!(
                "Logged in as {} ({})",
                login["profile"]["name"].as_str().unwrap_or("-"),
                login["profile"]["role"].as_str().unwrap_or("-")
            );
            println!("Session expires {}", login["expires_at"].as_str().unwrap_or("-"));
            println!("Token saved to {:?}", path);
        }

        Commands::Logout => {
            let token = resolve_token(&cli)?;
            send(client.post(format!("{}/auth/logout", api)).bearer_auth(&token)).await?;
            if let Some(path) = token_path() {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
            println!("Logged out");
        }

        Commands::Me => {
            let token = resolve_token(&cli)?;
            let me = expect_json(client.get(format!("{}/auth/me", api)).bearer_auth(&token)).await?;
            print_value(&cli, &me, |me| {
                println!("{:<10} {}", "ID", me["id"]);
                println!("{:<10} {}", "Name", me["name"].as_str().unwrap_or("-"));
                println!("{:<10} {}", "Email", me["email"].as_str().unwrap_or("-"));
                println!("{:<10} {}", "Role", me["role"].as_str().unwrap_or("-"));
                println!("{:<10} {}", "School", me["school_id"]);
                println!("{:<10} {}", "Balance", me["coin_balance"]);
            })?;
        }

        Commands::Balance { profile_id } => {
            let token = resolve_token(&cli)?;
            let id = match profile_id {
                Some(id) => *id,
                None => {
                    let me = expect_json(client.get(format!("{}/auth/me", api)).bearer_auth(&token))
                        .await?;
                    me["id"].as_i64().context("profile has no id")?
                }
            };

            let balance = expect_json(
                client
                    .get(format!("{}/profiles/{}/balance", api, id))
                    .bearer_auth(&token),
            )
            .await?;
            print_value(&cli, &balance, |b| {
                println!(
                    "{} {} ({})",
                    b["balance"],
                    b["coin_name"].as_str().unwrap_or("coins"),
                    b["coin_symbol"].as_str().unwrap_or("-")
                );
            })?;
        }

        Commands::Transfer {
            receiver_id,
            amount,
            description,
        } => {
            let token = resolve_token(&cli)?;
            let body = serde_json::json!({
                "receiver_id": receiver_id,
                "amount": amount,
                "description": description,
            });
            let tx = expect_json(
                client
                    .post(format!("{}/transfers", api))
                    .bearer_auth(&token)
                    .json(&body),
            )
            .await?;
            print_value(&cli, &tx, |tx| {
                println!("Sent {} coins to profile {} (transaction {})", amount, receiver_id, tx["id"]);
            })?;
        }

        Commands::Award {
            student_id,
            achievement_type_id,
            description,
        } => {
            let token = resolve_token(&cli)?;
            let body = serde_json::json!({
                "student_id": student_id,
                "achievement_type_id": achievement_type_id,
                "description": description,
            });
            let award = expect_json(
                client
                    .post(format!("{}/achievements", api))
                    .bearer_auth(&token)
                    .json(&body),
            )
            .await?;
            print_value(&cli, &award, |a| {
                println!(
                    "Awarded {} coins to profile {} (achievement {})",
                    a["transaction"]["amount"], student_id, a["achievement"]["id"]
                );
            })?;
        }

        Commands::Purchase { item_id, quantity } => {
            let token = resolve_token(&cli)?;
            let body = serde_json::json!({ "quantity": quantity });
            let receipt = expect_json(
                client
                    .post(format!("{}/items/{}/purchase", api, item_id))
                    .bearer_auth(&token)
                    .json(&body),
            )
            .await?;
            print_value(&cli, &receipt, |r| {
                println!(
                    "Bought {} x {} for {} coins ({} left in stock)",
                    quantity,
                    r["item"]["name"].as_str().unwrap_or("-"),
                    r["purchase"]["total_price"],
                    r["item"]["stock"]
                );
            })?;
        }

        Commands::Import { school_id, path } => {
            if !path.exists() {
                bail!("File not found: {:?}", path);
            }
            let token = resolve_token(&cli)?;
            let data = std::fs::read_to_string(path)?;

            let report = expect_json(
                client
                    .post(format!("{}/schools/{}/import", api, school_id))
                    .bearer_auth(&token)
                    .header(reqwest::header::CONTENT_TYPE, "text/csv")
                    .body(data),
            )
            .await?;

            print_value(&cli, &report, |r| {
                println!("Import results:");
                println!("  Created: {}", r["rows_processed"]);
                println!("  Failed: {}", r["rows_failed"]);

                let generated: Vec<_> = r["created"]
                    .as_array()
                    .map(|users| {
                        users
                            .iter()
                            .filter(|u| u.get("generated_password").is_some())
                            .collect()
                    })
                    .unwrap_or_default();
                if !generated.is_empty() {
                    println!();
                    println!("Generated passwords (shown once):");
                    println!("{:<30} {}", "Email", "Password");
                    println!("{}", "-".repeat(45));
                    for user in generated {
                        println!(
                            "{:<30} {}",
                            user["profile"]["email"].as_str().unwrap_or("-"),
                            user["generated_password"].as_str().unwrap_or("-")
                        );
                    }
                }

                if let Some(errors) = r["errors"].as_array().filter(|e| !e.is_empty()) {
                    println!();
                    println!("Errors (first 10):");
                    for error in errors.iter().take(10) {
                        println!("  {}", error.as_str().unwrap_or("-"));
                    }
                }
            })?;
        }

        Commands::Export {
            school_id,
            kind,
            since,
            until,
            output,
        } => {
            if kind != "transactions" && kind != "balances" {
                bail!("Unknown export kind: {}. Use: transactions, balances", kind);
            }
            let token = resolve_token(&cli)?;

            let mut query = Vec::new();
            if let Some(since) = since {
                query.push(("since", since.as_str()));
            }
            if let Some(until) = until {
                query.push(("until", until.as_str()));
            }

            let response = send(
                client
                    .get(format!("{}/schools/{}/export/{}", api, school_id, kind))
                    .bearer_auth(&token)
                    .query(&query),
            )
            .await?;
            let data = response.text().await?;

            match output {
                Some(path) => {
                    std::fs::write(path, &data)?;
                    println!("Exported to {:?}", path);
                }
                None => {
                    print!("{}", data);
                }
            }
        }

        Commands::Status => {
            let response = client
                .get(format!("{}/health", cli.api_url.trim_end_matches('/')))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let health: serde_json::Value = resp.json().await?;

                    println!("SchoolCoin v{}", env!("CARGO_PKG_VERSION"));
                    println!();
                    println!("API Status: {}", health["status"].as_str().unwrap_or("unknown"));
                    println!("Database: {}", health["database"].as_str().unwrap_or("unknown"));

                    if let Some(stats) = health.get("stats").filter(|s| !s.is_null()) {
                        println!();
                        println!("Store:");
                        println!("  Schools: {}", stats["schools"]);
                        println!("  Profiles: {}", stats["profiles"]);
                        println!("  Transactions: {}", stats["transactions"]);
                    }

                    if let Some(uptime) = health["uptime_seconds"].as_u64() {
                        println!();
                        println!("Uptime: {}", format_duration(uptime));
                    }
                }
                Ok(resp) => {
                    bail!("API returned error: {}", resp.status());
                }
                Err(e) => {
                    eprintln!("Cannot connect to SchoolCoin API at {}", cli.api_url);
                    eprintln!();
                    eprintln!("Make sure the SchoolCoin server is running:");
                    eprintln!("  cargo run --bin schoolcoin");
                    return Err(e.into());
                }
            }
        }

        Commands::Config { output } => {
            let config = schoolcoin::config::generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

/// Where `login` keeps the session token
fn token_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("schoolcoin").join("token"))
}

fn save_token(token: &str) -> anyhow::Result<PathBuf> {
    let path = token_path().context("no config directory on this system")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, token)?;
    Ok(path)
}

fn resolve_token(cli: &Cli) -> anyhow::Result<String> {
    if let Some(token) = &cli.token {
        return Ok(token.clone());
    }
    if let Ok(token) = std::env::var("SCHOOLCOIN_TOKEN") {
        return Ok(token);
    }
    let saved = token_path()
        .filter(|p| p.exists())
        .map(std::fs::read_to_string)
        .transpose()?;

    match saved {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => bail!("Not logged in. Run: schoolcoin-cli login <email> <password>"),
    }
}

/// Send a request and turn non-2xx responses into errors carrying the API message
async fn send(request: RequestBuilder) -> anyhow::Result<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    bail!("Request failed ({}): {}", status, message)
}

async fn expect_json(request: RequestBuilder) -> anyhow::Result<serde_json::Value> {
    Ok(send(request).await?.json().await?)
}

fn print_value(
    cli: &Cli,
    value: &serde_json::Value,
    table: impl FnOnce(&serde_json::Value),
) -> anyhow::Result<()> {
    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        table(value);
    }
    Ok(())
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}
