//! Terminal client for the Seer consultation chat.
//!
//! Requests a session with an expert, waits for acceptance, then drops into
//! an interactive loop: plain lines send text, `/file <path>` uploads an
//! attachment, `/history <continue|fresh|summary>` switches the history
//! mode, `/quit` leaves the room.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, broadcast};
use tracing::warn;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use seer_chat::{
    ApiClient, ChatChannel, ChatIdentity, ClientConfig, FileConfig, HistoryPreference, Message,
    MessageStream, MessageType, NegotiationState, Negotiator, RoomId, RoomTracker, SenderType,
    UploadCoordinator, load_config,
};

#[derive(Parser)]
#[command(name = "seer-cli", about = "Terminal client for the Seer consultation chat")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "seer.toml")]
    config: PathBuf,

    /// Backend base URL (overrides the config file).
    #[arg(long)]
    backend_url: Option<String>,

    /// Bearer credential for the backend.
    #[arg(long, env = "SEER_TOKEN")]
    token: Option<String>,

    /// Identity to chat as. A random one is generated when omitted.
    #[arg(long)]
    user_id: Option<String>,

    /// Expert to request a session with.
    #[arg(long)]
    expert_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seer_chat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut file_config: FileConfig = load_config(&cli.config)
        .extract()
        .context("invalid configuration")?;
    if let Some(url) = cli.backend_url {
        file_config.backend.base_url = url;
        file_config.backend.ws_url = None;
    }
    if let Some(token) = cli.token {
        file_config.backend.token = Some(token);
    }
    if file_config.backend.token.as_deref().unwrap_or("").is_empty() {
        bail!("no bearer token: pass --token, set SEER_TOKEN, or put it in {}", cli.config.display());
    }
    let config = ClientConfig::from_file(&file_config);

    let user_id = cli
        .user_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let api = Arc::new(ApiClient::new(&config)?);
    let channel = ChatChannel::shared(&config);
    let room = Arc::new(Mutex::new(RoomTracker::new(&channel)));

    let mut negotiator = Negotiator::new(api.clone(), cli.expert_id.clone(), room.clone(), &config);
    let mut updates = negotiator.subscribe();

    println!("requesting session with expert {}...", cli.expert_id);
    negotiator.request().await?;

    let session_id = {
        let outcome = updates
            .wait_for(|s| {
                matches!(
                    s,
                    NegotiationState::Active { .. }
                        | NegotiationState::Cancelled { .. }
                        | NegotiationState::Failed { .. }
                )
            })
            .await
            .context("negotiation observer closed")?
            .clone();
        match outcome {
            NegotiationState::Active { session_id } => session_id,
            NegotiationState::Cancelled { .. } => {
                println!("the expert declined the session.");
                return Ok(());
            }
            NegotiationState::Failed { reason, .. } => {
                println!("session request failed: {reason}");
                return Ok(());
            }
            NegotiationState::Idle | NegotiationState::Pending { .. } => unreachable!(),
        }
    };
    println!("session {session_id} is live. /file, /history, /quit available.");

    let identity = ChatIdentity {
        room_id: RoomId::from_session(&session_id),
        session_id: Some(session_id),
        sender_id: user_id.clone(),
        sender_type: SenderType::User,
        user_id,
        expert_id: cli.expert_id,
    };
    let mut stream = MessageStream::new(&channel, identity.clone());
    let mut uploads = UploadCoordinator::new(&channel, identity);

    stream.load_history(api.as_ref()).await?;
    for message in stream.messages() {
        print_message(message);
    }

    let mut events = channel.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let logged = stream.messages().len();
                        let was_typing = stream.typing_users().count() > 0;
                        stream.apply(event);
                        for message in &stream.messages()[logged..] {
                            print_message(message);
                        }
                        if let Some(error) = stream.error().map(str::to_string) {
                            println!("! {error}");
                            stream.clear_error();
                        }
                        let typing = stream.typing_users().count() > 0;
                        if typing && !was_typing {
                            println!("... the expert is typing");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("stdin closed")? else { break };
                if line == "/quit" {
                    break;
                } else if let Some(path) = line.strip_prefix("/file ") {
                    if let Err(e) = upload(&mut uploads, api.as_ref(), path.trim()).await {
                        println!("! {e}");
                    }
                } else if let Some(mode) = line.strip_prefix("/history ") {
                    match HistoryPreference::parse(mode) {
                        Some(preference) => {
                            stream.set_preference(api.as_ref(), preference).await?;
                            println!("--- history mode: {preference} ---");
                            for message in stream.messages() {
                                print_message(message);
                            }
                        }
                        None => println!("! unknown history mode: {mode}"),
                    }
                } else if let Err(e) = stream.send_text(&line) {
                    println!("! {e}");
                }
            }
        }
    }

    negotiator.close().await;
    Ok(())
}

async fn upload(uploads: &mut UploadCoordinator, api: &ApiClient, path: &str) -> Result<()> {
    if uploads.uploading() {
        bail!("an upload is already in progress");
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {path}"))?;
    let name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();

    let draft = uploads.select_file(name, &mime, bytes)?;
    println!(
        "uploading {} ({:.2} MB)...",
        draft.file_name,
        draft.size() as f64 / 1024.0 / 1024.0
    );
    let uploaded = uploads.confirm_upload(api).await?;
    println!("sent {} -> {}", uploaded.file_name, uploaded.file_url);
    Ok(())
}

fn print_message(message: &Message) {
    let who = match message.sender_type {
        SenderType::User => "you",
        SenderType::Expert => "expert",
    };
    let ticks = if message.is_read { "✓✓" } else { "✓" };
    match message.message_type {
        MessageType::Text => {
            println!("[{}] {who}: {} {ticks}", message.timestamp.format("%H:%M"), message.content);
        }
        MessageType::Image | MessageType::File => {
            println!(
                "[{}] {who}: 📎 {} ({}) {ticks}",
                message.timestamp.format("%H:%M"),
                message.file_name.as_deref().unwrap_or("attachment"),
                message.file_url.as_deref().unwrap_or("-"),
            );
        }
    }
}
