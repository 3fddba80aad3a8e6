//! Interactive chat client
//!
//! Asks for a username, prints everything the relay sends, and forwards
//! stdin lines until `/exit`.

use std::time::Duration;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use chat_relay::{ClientConfig, SessionRegistry, EXIT_COMMAND};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut stdin = BufReader::new(io::stdin()).lines();

    let mut stdout = io::stdout();
    stdout.write_all(b"Enter your username: ").await?;
    stdout.flush().await?;
    let username = match stdin.next_line().await? {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => "Anonymous".to_string(),
    };

    let sessions = SessionRegistry::new(ClientConfig::from_env());
    let session = sessions.get_or_create(&username);
    if !session.connect_default().await {
        eprintln!("Could not connect to server.");
        return Ok(());
    }

    let receiver = {
        let session = session.clone();
        tokio::spawn(async move { session.receive(|line| println!("{}", line)).await })
    };

    while let Some(line) = stdin.next_line().await? {
        if !session.send(&line, None).await {
            eprintln!("Message not delivered.");
        }
        if line.trim() == EXIT_COMMAND {
            break;
        }
    }

    // The receive loop ends on its own after the exit acknowledgment
    let _ = tokio::time::timeout(Duration::from_secs(2), receiver).await;
    sessions.close_all().await;
    Ok(())
}
