use arena_server::codec::connect;
use arena_shared::protocol::ServerMessage;
use clap::Parser;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted client for poking a running arena server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name to say hello with
    #[arg(short, long, default_value = "test-client")]
    name: String,

    /// Input messages to stream once the match starts
    #[arg(short, long, default_value = "20")]
    inputs: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);
    let (mut reader, writer) = connect(stream, &args.server, 1 << 20).await?;
    println!("Handshake complete");

    // Print everything the server sends until the connection closes
    let printer = tokio::spawn(async move {
        loop {
            match reader.read_message().await {
                Ok(Some(payload)) => match serde_json::from_slice::<ServerMessage>(&payload) {
                    Ok(ServerMessage::GameState(state)) => {
                        println!("game_state tick {}", state.tick);
                        for p in state.players {
                            println!(
                                "  {} ({}): pos=({:.2}, {:.2}) dir={:.2} hp={} score={}",
                                p.name, p.id, p.x, p.y, p.dir, p.hp, p.score
                            );
                        }
                    }
                    Ok(other) => println!("Received {}: {:?}", other.kind(), other),
                    Err(e) => println!("Failed to decode server message: {}", e),
                },
                Ok(None) => {
                    println!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    println!("Read error: {}", e);
                    break;
                }
            }
        }
    });

    let script = [
        json!({"type": "ping", "payload": {"t": 1}}),
        json!({"type": "hello", "payload": {"name": args.name}}),
        json!({"type": "room_create", "payload": {"name": "Test Room"}}),
        json!({"type": "room_ready", "payload": {"ready": true}}),
        json!({"type": "chat_send", "payload": {"text": "hello from the test client"}}),
        json!({"type": "room_start", "payload": {"winScore": 5, "wallText": "test"}}),
    ];
    for message in script {
        println!("Sending {}", message);
        writer.send_text(&message.to_string()).await?;
        sleep(Duration::from_millis(100)).await;
    }

    for i in 0..args.inputs {
        let input = json!({
            "type": "input",
            "payload": {
                "forward": i % 4 != 3,
                "back": false,
                "left": false,
                "right": i % 4 == 3,
                "turn": 0.1,
                "shoot": i % 2 == 0,
            }
        });
        writer.send_text(&input.to_string()).await?;
        sleep(Duration::from_millis(100)).await;
    }

    writer
        .send_text(&json!({"type": "room_leave", "payload": {}}).to_string())
        .await?;
    sleep(Duration::from_millis(200)).await;
    writer.shutdown().await;

    let _ = timeout(Duration::from_secs(1), printer).await;
    println!("Test client finished");
    Ok(())
}
