use anyhow::Context;
use chat_connector_rs::config::ChatConfig;
use chat_connector_rs::network::ManualNetwork;
use chat_connector_rs::rest::HttpTicketClient;
use chat_connector_rs::websocket::ChatClient;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let room_id = env::var("CHAT_ROOM_ID").context("CHAT_ROOM_ID must be set")?;
    let token = env::var("CHAT_ACCESS_TOKEN").ok();

    let config = ChatConfig::from_env().context("Invalid chat configuration")?;
    println!("Socket endpoint: {}", config.ws_url);

    let tickets = HttpTicketClient::new(&config, token).context("Failed to create ticket client")?;
    // Nothing reports connectivity here, so the demo always counts as online.
    let network = Arc::new(ManualNetwork::new(true));
    let client = ChatClient::new(config, Arc::new(tickets), network)
        .context("Failed to create chat client")?;

    let mut events = client.events();
    let mut states = client.state_changes();
    client.connect(room_id.as_str());
    println!("Joining room {}. Type a line to send it, Ctrl+C to quit.", room_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nCtrl+C received, leaving the room...");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("-- {}", *states.borrow_and_update());
            }
            event = events.recv() => match event {
                Some(event) => println!(
                    "[{} {}] {}",
                    event.received_at.format("%H:%M:%S"),
                    event.room_id,
                    event.text
                ),
                None => break,
            },
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if !line.trim().is_empty() => client.send(line),
                Some(_) => {}
                None => break,
            },
        }
    }

    client.disconnect().await;
    client.shutdown().await;
    println!("Disconnected.");
    Ok(())
}
