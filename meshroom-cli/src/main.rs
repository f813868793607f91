use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Input;
use meshroom_client::{
    ClientConfig, LocalIdentity, RoomController, RoomError, RoomEvent, SyntheticDevices,
    SyntheticMediaConfig,
};
use meshroom_core::RoomId;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshroom")]
#[command(about = "Join a mesh video room from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Join {
        /// Relay WebSocket endpoint.
        #[arg(long, env = "MESHROOM_SIGNALING_URL")]
        url: Option<String>,

        #[arg(short, long)]
        room: String,

        /// Display name; prompted for when omitted.
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        no_video: bool,

        #[arg(long)]
        no_audio: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Join {
            url,
            room,
            name,
            no_video,
            no_audio,
        } => {
            let name = match name {
                Some(name) => name,
                None => Input::<String>::new()
                    .with_prompt("Display name")
                    .interact_text()
                    .context("Failed to read display name")?,
            };

            let mut config = ClientConfig::from_env();
            if let Some(url) = url {
                config.signaling_url = url;
            }
            config.media.video = !no_video;
            config.media.audio = !no_audio;

            run_join(config, RoomId::from(room), name).await
        }
    }
}

async fn run_join(config: ClientConfig, room: RoomId, name: String) -> Result<()> {
    let devices = SyntheticDevices::new(SyntheticMediaConfig {
        frame_interval: Some(Duration::from_millis(33)),
        ..Default::default()
    });
    let identity = LocalIdentity::new(name);
    tracing::info!(
        "Connecting to {} as {}",
        config.signaling_url,
        identity.user_id
    );
    let (controller, task) = RoomController::connect(identity, config, devices)?;

    let printer = tokio::spawn(print_events(controller.subscribe()));

    println!("{} {}", "Joining".cyan(), room.to_string().bold());
    match controller.join(room).await {
        Ok(()) => {}
        Err(RoomError::RoomFull) => {
            println!("{}", "Room is full. Try again later.".red().bold());
            return shutdown(controller, task, printer).await;
        }
        Err(e) => {
            println!("{} {}", "Could not join:".red().bold(), e);
            return shutdown(controller, task, printer).await;
        }
    }
    println!(
        "{}",
        "Commands: /video /audio /share /who /leave, anything else is chat".dimmed()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let outcome = match line {
            "" => continue,
            "/leave" => break,
            "/video" => controller
                .toggle_video()
                .await
                .map(|on| println!("video {}", on_off(on))),
            "/audio" => controller
                .toggle_audio()
                .await
                .map(|on| println!("audio {}", on_off(on))),
            "/share" => controller
                .toggle_screen_share()
                .await
                .map(|on| println!("screen share {}", on_off(on))),
            "/who" => {
                print_roster(&controller);
                Ok(())
            }
            text => controller.send_chat(text).await,
        };
        if let Err(e) = outcome {
            println!("{} {}", "error:".red(), e);
            if e.is_fatal() {
                return shutdown(controller, task, printer).await;
            }
        }
    }

    controller.leave().await?;
    println!("{}", "Left the room".yellow());
    shutdown(controller, task, printer).await
}

async fn shutdown(
    controller: RoomController,
    task: tokio::task::JoinHandle<()>,
    printer: tokio::task::JoinHandle<()>,
) -> Result<()> {
    drop(controller);
    task.await.context("Room task panicked")?;
    printer.abort();
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<RoomEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                println!("{}", format!("({n} events skipped)").dimmed());
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            RoomEvent::Joined {
                room_id,
                participants,
            } => println!(
                "{} {} ({} already here)",
                "Joined".green().bold(),
                room_id,
                participants.len()
            ),
            RoomEvent::ParticipantJoined(p) => {
                println!("{} {}", "+".green(), p.display_name.bold())
            }
            RoomEvent::ParticipantLeft(user_id) => println!("{} {}", "-".red(), user_id),
            RoomEvent::ParticipantUpdated(p) => println!(
                "{} {} video={} audio={} sharing={}",
                "~".blue(),
                p.display_name,
                on_off(p.video_enabled),
                on_off(p.audio_enabled),
                on_off(p.screen_sharing)
            ),
            RoomEvent::RemoteStream { user_id, track } => {
                println!("{} {} from {}", "stream".magenta(), track.kind, user_id)
            }
            RoomEvent::ChatAppended(msg) => {
                println!("{}: {}", msg.user_name.cyan().bold(), msg.message)
            }
            RoomEvent::LocalMediaChanged { .. } => {}
            RoomEvent::ChannelStatus { connected } => {
                if connected {
                    println!("{}", "relay connected".dimmed());
                } else {
                    println!("{}", "relay disconnected, retrying".yellow());
                }
            }
            RoomEvent::Notice(message) => println!("{} {}", "!".yellow().bold(), message),
            RoomEvent::RoomFull | RoomEvent::Left => break,
        }
    }
}

fn print_roster(controller: &RoomController) {
    let snapshot = controller.snapshot();
    println!("{} participant(s) besides you", snapshot.participants.len());
    if !snapshot.channel_connected {
        println!("{}", "relay offline, sessions kept".yellow());
    }
    for p in snapshot.participants {
        let session = snapshot
            .sessions
            .iter()
            .find(|s| s.user_id == p.user_id)
            .map_or("no session".to_string(), |s| s.state.to_string());
        println!("  {} [{}] {}", p.display_name.bold(), p.user_id, session.dimmed());
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}
