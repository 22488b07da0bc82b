use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use powchain_core::{Block, Chain, Transaction};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "powchain-cli")]
#[command(about = "CLI client for a powchain node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, env = "POWCHAIN_NODE", default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a transaction to be mined into a new block
    Submit {
        /// Sender
        #[arg(long)]
        from: String,
        /// Recipient
        #[arg(long)]
        to: String,
        /// Amount
        #[arg(long)]
        amount: u64,
    },
    /// Print the whole chain
    Chain,
    /// Print one block
    Block { index: u64 },
    /// Height and tip hash
    Head,
    /// Manage the node's peers
    Peers {
        #[command(subcommand)]
        cmd: PeersCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PeersCommand {
    List,
    Add { peer: String },
    Remove { peer: String },
}

#[derive(Serialize)]
struct Submission {
    transactions: Vec<Transaction>,
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_owned))
            .unwrap_or(body);
        bail!("node answered {status}: {message}");
    }
    Ok(res.json().await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = Client::new();
    debug!(%node, "using node");

    match cli.cmd {
        Command::Submit { from, to, amount } => {
            let submission = Submission {
                transactions: vec![Transaction::new(from, to, amount)],
            };
            let res = client
                .post(format!("{node}/blocks/create"))
                .json(&submission)
                .send()
                .await?;
            let block: Block = decode(res).await?;
            println!("mined block {} ({})", block.index, block.hash);
        }
        Command::Chain => {
            let chain: Chain = decode(client.get(format!("{node}/blocks")).send().await?).await?;
            print_json(&chain)?;
        }
        Command::Block { index } => {
            let res = client.get(format!("{node}/blocks/{index}")).send().await?;
            let block: Block = decode(res).await?;
            print_json(&block)?;
        }
        Command::Head => {
            let head: Value = decode(client.get(format!("{node}/chain/head")).send().await?).await?;
            print_json(&head)?;
        }
        Command::Peers { cmd } => {
            let res = match cmd {
                PeersCommand::List => client.get(format!("{node}/peers")).send().await?,
                PeersCommand::Add { peer } => {
                    client
                        .post(format!("{node}/peers/add"))
                        .json(&json!({ "peer": peer }))
                        .send()
                        .await?
                }
                PeersCommand::Remove { peer } => {
                    client
                        .post(format!("{node}/peers/remove"))
                        .json(&json!({ "peer": peer }))
                        .send()
                        .await?
                }
            };
            let body: Value = decode(res).await?;
            print_json(&body)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_arguments() {
        let cli = Cli::try_parse_from([
            "powchain-cli",
            "--node",
            "http://n:1",
            "submit",
            "--from",
            "alice",
            "--to",
            "bob",
            "--amount",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.node, "http://n:1");
        assert!(matches!(cli.cmd, Command::Submit { amount: 3, .. }));
    }

    #[test]
    fn negative_amount_is_refused() {
        let parsed = Cli::try_parse_from([
            "powchain-cli", "submit", "--from", "a", "--to", "b", "--amount", "-1",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn peer_subcommands() {
        let cli = Cli::try_parse_from(["powchain-cli", "peers", "add", "http://p:2"]).unwrap();
        assert!(matches!(cli.cmd, Command::Peers { cmd: PeersCommand::Add { ref peer } } if peer == "http://p:2"));
        let cli = Cli::try_parse_from(["powchain-cli", "block", "7", "--node", "http://x"]).unwrap();
        assert!(matches!(cli.cmd, Command::Block { index: 7 }));
        assert_eq!(cli.node, "http://x");
    }

    #[test]
    fn submission_body_shape() {
        let body = serde_json::to_value(Submission {
            transactions: vec![Transaction::new("a", "b", 2)],
        })
        .unwrap();
        assert_eq!(
            body,
            json!({ "transactions": [{ "sender": "a", "recipient": "b", "amount": 2 }] })
        );
    }
}
