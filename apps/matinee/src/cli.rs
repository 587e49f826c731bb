use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use matinee_proto::{ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "matinee")]
#[command(about = "Matinee watch-together sync server and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running server, join (or create) a room, and print the
    /// event stream
    Probe {
        /// Server URL (e.g. ws://localhost:5000)
        #[arg(short, long, default_value = "ws://localhost:5000")]
        url: String,

        /// Room id to join; a fresh room is created when omitted
        #[arg(short, long)]
        room: Option<String>,

        /// Display name to join with
        #[arg(short = 'n', long, default_value = "probe")]
        username: String,

        /// How long to watch the event stream before disconnecting
        #[arg(long, default_value_t = 30)]
        watch_secs: u64,
    },
}

pub async fn run_probe(
    url: String,
    room: Option<String>,
    username: String,
    watch_secs: u64,
) -> Result<()> {
    let ws_url = format!("{url}/ws");
    debug!("connecting to {ws_url}");

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            return Err(anyhow::anyhow!("connection failed: {e}"));
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the server running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let room_id = match room {
        Some(id) => id,
        None => {
            send(&mut write, &ClientMessage::CreateRoom).await?;
            let created = timeout(Duration::from_secs(5), async {
                while let Some(msg) = read.next().await {
                    if let Message::Text(text) = msg? {
                        if let Ok(ServerMessage::RoomCreated { room_id }) =
                            serde_json::from_str::<ServerMessage>(&text)
                        {
                            return Ok::<_, anyhow::Error>(room_id);
                        }
                    }
                }
                Err(anyhow::anyhow!("connection closed before room_created"))
            })
            .await;
            match created {
                Ok(Ok(room_id)) => {
                    println!("created room {room_id}");
                    room_id
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(anyhow::anyhow!("timeout waiting for room_created")),
            }
        }
    };

    send(
        &mut write,
        &ClientMessage::JoinRoom {
            room_id: room_id.clone(),
            username,
        },
    )
    .await?;

    println!("watching room {room_id} for {watch_secs}s (ctrl-c to stop)");
    let _ = timeout(Duration::from_secs(watch_secs), async {
        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(event) => println!("{event:?}"),
                    Err(_) => println!("(unparsed) {text}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok::<_, anyhow::Error>(())
    })
    .await;

    write.send(Message::Close(None)).await?;
    Ok(())
}

async fn send<S>(write: &mut S, message: &ClientMessage) -> Result<()>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(message)?;
    write.send(Message::Text(text.into())).await?;
    Ok(())
}
