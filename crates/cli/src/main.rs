use std::sync::Arc;

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    tokio::io::AsyncBufReadExt,
};

use {
    sarah_client::{ConnectionStatus, GatewayClient, GatewayConfig},
    sarah_gateway::{GatewayState, MockAgent},
    sarah_protocol::{DEFAULT_GATEWAY_URL, DEFAULT_PORT, events, methods},
};

/// Sarah gateway control plane and chat console.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway server.
    Serve {
        /// Address to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on.
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Require this bearer token from connecting clients. Omit to run
        /// the gateway open.
        #[arg(long, env = "SARAH_TOKEN")]
        token: Option<String>,
    },
    /// Connect a chat console to a running gateway.
    Chat {
        /// Gateway WebSocket address.
        #[arg(long, default_value = DEFAULT_GATEWAY_URL)]
        url: String,

        /// Bearer token for the handshake.
        #[arg(long, env = "SARAH_TOKEN")]
        token: Option<String>,

        /// Send this single message and exit instead of reading stdin.
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Args::parse().command {
        Command::Serve { bind, port, token } => {
            let state = GatewayState::new(token, Arc::new(MockAgent));
            sarah_gateway::start(&bind, port, state).await
        },
        Command::Chat {
            url,
            token,
            message,
        } => chat(url, token, message).await,
    }
}

async fn chat(url: String, token: Option<String>, message: Option<String>) -> Result<()> {
    let mut config = GatewayConfig::new(url);
    config.token = token;
    let client = GatewayClient::new(config);

    client
        .on_event(events::AGENT_THINKING, |payload| {
            if let Some(status) = payload.get("status").and_then(|s| s.as_str()) {
                eprintln!("… {status}");
            }
        })
        .await;

    // One-shot mode prints the reply straight from the response frame; the
    // push event would race process exit.
    if message.is_none() {
        client
            .on_event(events::AGENT_RESPONSE, |payload| {
                if let Some(text) = payload.get("text").and_then(|t| t.as_str()) {
                    println!("sarah: {text}");
                }
            })
            .await;
    }

    // Surface "disconnected / retrying" transitions.
    let mut status = client.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            if *status.borrow_and_update() == ConnectionStatus::Disconnected {
                eprintln!("[gateway disconnected, retrying]");
            }
        }
    });

    client.connect().await?;

    if let Some(message) = message {
        let response = client
            .request(methods::AGENT_CHAT, serde_json::json!({"message": message}))
            .await?;
        match response.payload.as_ref().and_then(|p| p.get("response")) {
            Some(text) if response.ok => println!("sarah: {}", text.as_str().unwrap_or_default()),
            _ => eprintln!(
                "error: {}",
                response.error.unwrap_or_else(|| "request failed".into())
            ),
        }
        client.disconnect().await;
        return Ok(());
    }

    // Interactive loop: one agent.chat per stdin line, replies arrive as
    // agent.response events.
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match client
            .request(methods::AGENT_CHAT, serde_json::json!({"message": line}))
            .await
        {
            Ok(response) if !response.ok => eprintln!(
                "error: {}",
                response.error.unwrap_or_else(|| "request failed".into())
            ),
            Ok(_) => {},
            Err(e) => eprintln!("error: {e}"),
        }
    }
    client.disconnect().await;
    Ok(())
}
