//! Line-oriented TCP front end. Each client sends one `/command arg...`
//! per line and gets one `OK:`/`ERR:` line back; `/subscribe` switches
//! the connection to a stream of JSON event lines instead.

use std::sync::Arc;

use log::{error, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::common::error::ServiceError;
use crate::common::models::{ChatEvent, MessagePayload, User};
use crate::server::service::ChatService;

pub struct Server {
    pub service: Arc<ChatService>,
    events: broadcast::Sender<ChatEvent>,
}

impl Server {
    pub fn new(service: Arc<ChatService>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { service, events }
    }

    pub async fn run(self: Arc<Self>, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", addr);
        loop {
            let (stream, peer) = listener.accept().await?;
            info!("New connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(server, stream).await {
                    error!("Client error ({}): {}", peer, e);
                }
            });
        }
    }

    fn publish(&self, event: ChatEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    pub async fn handle_command(&self, cmd: &str, args: &[&str]) -> String {
        match cmd {
            "/create_group" if !args.is_empty() => {
                let name = args.join(" ");
                match self.service.create_group(&name).await {
                    Ok(group) => format!("OK: {}", group.id.simple()),
                    Err(e) => err_line(e),
                }
            }
            "/delete_group" if args.len() == 1 => {
                let Ok(group_id) = parse_uuid(args[0]) else {
                    return bad_id();
                };
                match self.service.delete_group(group_id).await {
                    Ok(members) => {
                        for member in members {
                            self.publish(ChatEvent::MemberRemoved {
                                group_id,
                                user_id: member.id,
                            });
                        }
                        "OK: group deleted".to_string()
                    }
                    Err(e) => err_line(e),
                }
            }
            "/join_group" if args.len() >= 3 => {
                let (Ok(user_id), Ok(group_id)) = (parse_uuid(args[0]), parse_uuid(args[1]))
                else {
                    return bad_id();
                };
                let user = User {
                    id: user_id,
                    name: args[2..].join(" "),
                };
                match self.service.join_group(&user, group_id).await {
                    Ok(()) => {
                        self.publish(ChatEvent::MemberAdded { group_id, user_id });
                        "OK: joined".to_string()
                    }
                    Err(e) => err_line(e),
                }
            }
            "/leave_group" if args.len() == 2 => {
                let (Ok(user_id), Ok(group_id)) = (parse_uuid(args[0]), parse_uuid(args[1]))
                else {
                    return bad_id();
                };
                match self.service.leave_group(user_id, group_id).await {
                    Ok(()) => {
                        self.publish(ChatEvent::MemberRemoved { group_id, user_id });
                        "OK: left".to_string()
                    }
                    Err(e) => err_line(e),
                }
            }
            "/groups" => match self.service.list_groups().await {
                Ok(groups) => json_line(&groups),
                Err(e) => err_line(e),
            },
            "/my_groups" if args.len() == 1 => {
                let Ok(user_id) = parse_uuid(args[0]) else {
                    return bad_id();
                };
                match self.service.get_user_membership(user_id).await {
                    Ok(groups) => json_line(&groups),
                    Err(e) => err_line(e),
                }
            }
            "/users" if args.len() == 1 => {
                let Ok(group_id) = parse_uuid(args[0]) else {
                    return bad_id();
                };
                match self.service.list_users(group_id).await {
                    Ok(users) => json_line(&users),
                    Err(e) => err_line(e),
                }
            }
            "/messages" if args.len() == 1 => {
                let Ok(group_id) = parse_uuid(args[0]) else {
                    return bad_id();
                };
                match self.service.list_messages(group_id).await {
                    Ok(messages) => json_line(&messages),
                    Err(e) => err_line(e),
                }
            }
            "/send" if args.len() >= 3 => {
                let (Ok(group_id), Ok(sender_id)) = (parse_uuid(args[0]), parse_uuid(args[1]))
                else {
                    return bad_id();
                };
                let payload = MessagePayload {
                    group_id,
                    sender_id,
                    contents: args[2..].join(" "),
                };
                match self.service.send_message(payload).await {
                    Ok(message) => {
                        self.publish(ChatEvent::NewMessage {
                            message: message.clone(),
                        });
                        format!("OK: {}", message.id.simple())
                    }
                    Err(e) => err_line(e),
                }
            }
            _ => "ERR: Unknown or invalid command".to_string(),
        }
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(raw)
}

fn bad_id() -> String {
    "ERR: Malformed id".to_string()
}

fn err_line(e: ServiceError) -> String {
    format!("ERR: {e}")
}

fn json_line<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => format!("OK: {json}"),
        Err(e) => format!("ERR: {e}"),
    }
}

async fn handle_client(server: Arc<Server>, stream: TcpStream) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        if cmd == "/subscribe" {
            writer.write_all(b"OK: subscribed\n").await?;
            writer.flush().await?;
            return stream_events(server.events.subscribe(), writer).await;
        }

        let reply = server.handle_command(cmd, &args).await;
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
}

async fn stream_events(
    mut events: broadcast::Receiver<ChatEvent>,
    mut writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
) -> anyhow::Result<()> {
    loop {
        match events.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event)?;
                writer.write_all(json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            // A slow consumer skips what it missed and keeps going.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                info!("Subscriber lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
