use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use voice_onboarding::{
    create_router, AppState, Collaborators, Config, HttpNegotiator, LifecycleState, Role,
    SessionController, SessionUpdate, StaticIdentity, WavFileDevices, WebSocketConnector,
};

/// How long to wait for the backend to close after a user stop
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "voice-onboarding")]
#[command(about = "Voice onboarding conversation client")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/voice-onboarding", global = true)]
    config: String,

    /// Signed-in user; without it sessions fail as unauthenticated
    #[arg(short, long, global = true)]
    user_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hold one conversation, printing the transcript as it arrives
    Run {
        /// WAV file replayed as the microphone
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// WAV file the agent's speech is rendered to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Serve the HTTP control API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice Onboarding v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Backend: {}", cfg.backend.base_url);

    match cli.command {
        Command::Run { input, output } => {
            let input = input.unwrap_or_else(|| cfg.devices.input_path.clone());
            let output = output.unwrap_or_else(|| cfg.devices.output_path.clone());
            let controller = build_controller(&cfg, cli.user_id, input, output)?;
            run_conversation(controller).await
        }
        Command::Serve => {
            let controller = build_controller(
                &cfg,
                cli.user_id,
                cfg.devices.input_path.clone(),
                cfg.devices.output_path.clone(),
            )?;
            serve(&cfg, controller).await
        }
    }
}

fn build_controller(
    cfg: &Config,
    user_id: Option<String>,
    input: PathBuf,
    output: PathBuf,
) -> Result<SessionController> {
    let session_config = cfg.session_config();

    let identity = match user_id {
        Some(user_id) => StaticIdentity::signed_in(user_id),
        None => {
            warn!("No --user-id given; sessions will be rejected");
            StaticIdentity::anonymous()
        }
    };

    let negotiator = HttpNegotiator::new(
        &cfg.backend.base_url,
        &cfg.backend.start_path,
        session_config.negotiation_timeout,
    )
    .context("Failed to configure session negotiation")?;

    info!("Microphone: {}", input.display());
    info!("Speaker: {}", output.display());

    let collaborators = Collaborators {
        identity: Arc::new(identity),
        devices: Arc::new(WavFileDevices::new(input, output)),
        negotiator: Arc::new(negotiator),
        connector: Arc::new(
            WebSocketConnector::new(session_config.connect_timeout)
                .with_close_timeout(session_config.close_timeout),
        ),
    };

    Ok(SessionController::new(session_config, collaborators))
}

async fn run_conversation(controller: SessionController) -> Result<()> {
    let mut updates = controller.subscribe();
    let mut state = controller.watch_state();

    let session_id = controller.start().await?;
    info!("Conversation {} started. Press Ctrl+C to end it", session_id);

    let printer = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(SessionUpdate::Transcript(entry)) => match entry.role {
                    Role::User => println!("you:   {}", entry.content),
                    Role::Agent => println!("agent: {}", entry.content),
                },
                Ok(SessionUpdate::Profile(profile)) => {
                    info!("Profile now has {} fields", profile.len())
                }
                Ok(SessionUpdate::Error(message)) => error!("{}", message),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} session updates", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = state.wait_for(|s| s.is_terminal()) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Ending conversation...");
            controller.stop().await?;

            let mut closing = controller.watch_state();
            if tokio::time::timeout(STOP_GRACE, closing.wait_for(|s| s.is_terminal()))
                .await
                .is_err()
            {
                warn!("Backend did not close the conversation within {:?}", STOP_GRACE);
            }
        }
    }

    printer.abort();

    let stats = controller.get_stats().await;
    info!("Conversation {}", stats.state);
    info!("Duration: {:.1}s", stats.duration_secs);
    info!(
        "Frames sent: {}, received: {}, discarded: {}",
        stats.frames_sent, stats.frames_received, stats.blocks_discarded
    );

    let profile = controller.profile().await;
    if !profile.is_empty() {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    }

    if stats.state == LifecycleState::Error {
        anyhow::bail!(
            "Conversation failed: {}",
            stats.last_error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}

async fn serve(cfg: &Config, controller: SessionController) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    let app = create_router(AppState::new(controller.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutting down");
        })
        .await
        .context("HTTP server error")?;

    controller.stop().await?;
    Ok(())
}
