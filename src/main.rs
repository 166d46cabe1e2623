use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use voxa::{Engine, EngineConfig, SessionEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let mut args = env::args();
    let _ = args.next();
    let command = args.next().unwrap_or_else(|| "ambient".to_string());
    if let Some(extra) = args.next() {
        anyhow::bail!("Unexpected argument '{extra}' after '{command}'");
    }

    let config = EngineConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let engine = Arc::new(Engine::with_devices(config).map_err(|e| anyhow!(e.to_string()))?);

    match command.as_str() {
        "ambient" => run_ambient(&engine).await?,
        "clips" => run_clips(&engine).await?,
        "converse" => run_converse(&engine).await?,
        other => {
            anyhow::bail!("Unknown command '{other}'. Supported commands: ambient, clips, converse");
        }
    }

    engine.stop().await;
    Ok(())
}

/// Ambient analysis only: print level and peak frequency until interrupted.
async fn run_ambient(engine: &Arc<Engine>) -> anyhow::Result<()> {
    engine
        .start_ambient()
        .map_err(|e| anyhow!(e.to_string()))?;
    println!("Analyzing microphone input; press Ctrl-C to stop.");

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = engine.snapshot();
                println!(
                    "level {:>8.5}  peak {:>7.1} Hz",
                    snapshot.average_level, snapshot.peak_frequency_hz
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Preload the clip vocabulary, then play each clip in order.
async fn run_clips(engine: &Arc<Engine>) -> anyhow::Result<()> {
    let loaded = engine.preload_clips().await;
    println!("Preloaded {loaded} clips.");

    let phrases = engine.config().preload_phrases.clone();
    for phrase in &phrases {
        println!("Playing: {phrase}");
        if let Err(e) = engine.play_clip(phrase).await {
            eprintln!("Clip failed: {e}");
            continue;
        }
        while engine.clip_playing() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
    Ok(())
}

/// Live conversation until interrupted.
async fn run_converse(engine: &Arc<Engine>) -> anyhow::Result<()> {
    engine.on_session_event(Arc::new(|event| match event {
        SessionEvent::Opened => println!("Session open, talk away."),
        SessionEvent::SpeakingStarted => println!("... responding ..."),
        SessionEvent::SpeakingStopped => println!("... idle ..."),
        SessionEvent::Interrupted => println!("(interrupted)"),
        SessionEvent::Closed => println!("Session closed."),
        SessionEvent::Errored(e) => eprintln!("Session error: {e}"),
    }));

    engine
        .start_conversation()
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    engine.stop_conversation().await;
    Ok(())
}
