//! `labrig` – lab rig control server.
//!
//! 1. Loads `~/.labrig/config.toml` (or `LABRIG_CONFIG`) and initialises
//!    logging.
//! 2. Attaches hardware: simulated drivers when `server.simulate` is set,
//!    otherwise every controller comes up unavailable.
//! 3. Captures the arm's startup centers, starts both camera loops and the
//!    volume estimator, then serves the media endpoints and the command
//!    channel.
//! 4. On Ctrl-C parks the rig (automation cancelled, stirrer off, valves
//!    closed) before stopping the camera and volume loops.

mod config;
mod hardware;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;

use labrig_cockpit::media::{self, MediaState};
use labrig_cockpit::{CommandServer, Dispatcher, Hub, StateView, serve_media};
use labrig_devices::{ArmController, CameraController, RigController};
use labrig_runtime::{AnthropicVision, RigNotifier, Sequencer, VolumeEstimator, VolumeModel};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;

fn main() -> ExitCode {
    let (cfg, config_error) = match config::load() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };
    labrig_runtime::init_tracing(&cfg.server.log_format);
    if let Some(e) = config_error {
        warn!(error = %e, "config error; using defaults");
    } else {
        info!(path = %config::config_path().display(), "config loaded");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(cfg.server.worker_threads.max(1))
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "labrig exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), String> {
    let drivers = hardware::attach(&cfg);
    let hub = Arc::new(Hub::new());
    let notifier: Arc<dyn RigNotifier> = hub.clone();

    let arm = Arc::new(ArmController::new(cfg.arm.clone(), drivers.servo_bus));
    let rig = Arc::new(RigController::new(cfg.rig.clone(), drivers.rig));
    let thermal = Arc::new(CameraController::thermal(
        &cfg.thermal,
        cfg.server.media_port,
        drivers.thermal,
    ));
    let webcam = Arc::new(CameraController::webcam(
        &cfg.webcam,
        cfg.server.media_port,
        drivers.webcam,
    ));
    thermal.set_listener(hub.clone());
    webcam.set_listener(hub.clone());

    let model = if cfg.volume.api_key.is_empty() {
        None
    } else {
        match AnthropicVision::new(
            cfg.volume.api_url.clone(),
            cfg.volume.model.clone(),
            cfg.volume.api_key.clone(),
            cfg.volume.max_tokens,
            cfg.volume.request_timeout(),
        ) {
            Ok(vision) => Some(Arc::new(vision) as Arc<dyn VolumeModel>),
            Err(e) => {
                error!(error = %e, "vision client unavailable; volume estimation disabled");
                None
            }
        }
    };
    let volume = Arc::new(VolumeEstimator::new(
        &cfg.volume,
        model,
        webcam.clone(),
        notifier.clone(),
    ));

    let sequencer = Arc::new(Sequencer::new(
        arm.clone(),
        rig.clone(),
        thermal.clone(),
        volume.clone(),
        notifier,
        cfg.automation.clone(),
    ));
    let view = StateView {
        arm: arm.clone(),
        rig,
        thermal: thermal.clone(),
        webcam: webcam.clone(),
        volume: volume.clone(),
    };
    let dispatcher = Arc::new(Dispatcher::new(view, sequencer.clone(), hub));

    if let Err(e) = arm.capture_startup_centers().await {
        warn!(error = %e, "could not capture arm startup centers");
    }
    thermal.start();
    webcam.start();
    volume.start();

    let router = media::router(MediaState {
        thermal: thermal.clone(),
        webcam: webcam.clone(),
    })
    .map_err(|e| e.to_string())?;
    let media_addr = format!("{}:{}", cfg.server.host, cfg.server.media_port);
    let media_listener = TcpListener::bind(&media_addr)
        .await
        .map_err(|e| format!("bind error on {media_addr}: {e}"))?;
    let command_server = CommandServer::new(dispatcher)
        .with_host(cfg.server.host.clone())
        .with_port(cfg.server.ws_port);
    let command_listener = command_server.bind().await.map_err(|e| e.to_string())?;

    let stop_token = CancellationToken::new();
    let media_task = tokio::spawn(serve_media(media_listener, router, stop_token.clone()));
    let command_task = tokio::spawn(command_server.serve(command_listener, stop_token.clone()));
    info!(
        ws_port = cfg.server.ws_port,
        media_port = cfg.server.media_port,
        simulate = cfg.server.simulate,
        "labrig ready"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C; shutting down");
    }
    info!("shutdown requested");

    stop_token.cancel();
    shutdown::park_and_stop(
        &sequencer,
        &volume,
        &[&thermal, &webcam],
        shutdown::STOP_TIMEOUT,
    )
    .await;

    match media_task.await {
        Ok(Err(e)) => warn!(error = %e, "media server error"),
        Err(e) => warn!(error = %e, "media server task failed"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = command_task.await {
        warn!(error = %e, "command server task failed");
    }
    info!("exiting");
    Ok(())
}
