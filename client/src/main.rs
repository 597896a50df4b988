use std::path::PathBuf;

use finchvoice_client::audio::{list_input_devices, list_output_devices, CpalCapture, CpalPlayback};
use finchvoice_client::ClientConfig;
use finchvoice_sdk::{CallEnded, CallMedia, CallSession, CallState};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_devices() -> Result<(), Box<dyn std::error::Error>> {
    println!("Input devices:");
    for name in list_input_devices()? {
        println!("  {}", name);
    }
    println!("Output devices:");
    for name in list_output_devices()? {
        println!("  {}", name);
    }
    Ok(())
}

async fn run_call(config: ClientConfig) -> Result<CallEnded, Box<dyn std::error::Error>> {
    let capture = CpalCapture::new(config.audio.input_device.clone(), config.audio.input_gain);
    let playback = CpalPlayback::open(config.audio.output_device.clone(), config.audio.output_volume)?;
    let media = CallMedia::opus(config.call.bitrate, Box::new(capture), Box::new(playback))?;

    let mut session = CallSession::start(config.call, media)?;
    let mut state = session.watch_state();

    let ended = loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Hanging up");
                session.hang_up();
                break session.wait().await?;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break session.wait().await?;
                }
                match *state.borrow_and_update() {
                    CallState::Connecting => info!("Connecting..."),
                    CallState::Active => info!("In call, press Ctrl-C to hang up"),
                    CallState::Ended => {}
                }
            }
        }
    };

    if let Some(counters) = session.counters() {
        info!(
            "Sent {} packets, received {}, played {} frames, {} authentication failures",
            counters.packets_sent, counters.packets_received, counters.frames_played, counters.auth_failures
        );
    }
    Ok(ended)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--list-devices") {
        return print_devices();
    }

    let path = match arg {
        Some(arg) => PathBuf::from(arg),
        None => ClientConfig::default_path()?,
    };
    let config = ClientConfig::load(&path)?;
    if let Err(e) = config.call.validate() {
        error!("Fill in the [call] section of {:?}: {}", path, e);
        return Err(e.into());
    }

    info!(
        "Starting finchvoice for guild {} channel {}",
        config.call.guild_id, config.call.channel_id
    );

    match run_call(config).await? {
        CallEnded::HungUp => info!("Call ended"),
        other => warn!("Call ended: {:?}", other),
    }
    Ok(())
}
