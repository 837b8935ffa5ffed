mod cli;
mod error;
mod output;
mod shell;
mod simulate;

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use nwmng_config::{ProjArgs, Profile, Transport, args_cache};
use nwmng_core::{Controller, CoreError, DeviceDb, Manager, Notice};
use nwmng_ncp::SimulatedNcp;

use crate::cli::{Cli, Mode};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn proj_args(cli: &Cli) -> ProjArgs {
    ProjArgs {
        encrypted: cli.mode.map(|m| m == Mode::Secure),
        port: cli.port.clone(),
        baud_rate: cli.baud_rate,
        sock_server: cli.sock_server.clone(),
        sock_client: cli.sock_client.clone(),
        sock_encrypted: cli.sock_encrypted,
    }
}

fn describe(transport: &Transport) -> String {
    match transport {
        Transport::Serial { port, baud_rate } => format!("serial port {port} at {baud_rate} baud"),
        Transport::Socket { server, client, .. } => {
            format!("socket {} <-> {}", client.display(), server.display())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Some(devices) = cli.simulate else {
        let cache = cli.args_cache.clone().unwrap_or_else(nwmng_config::args_cache_path);
        let transport = args_cache::sync(&cache, &proj_args(&cli))?;
        return Err(CliError::NoTransport {
            transport: describe(&transport),
        });
    };

    let profile_path = cli.profile_path.clone().unwrap_or_else(nwmng_config::profile_path);
    let profile = nwmng_config::load_or_generate(&profile_path)?;
    let prov = profile.to_provisioner()?;
    let settings = profile.to_settings();

    let mut db = DeviceDb::new();
    db.init();
    simulate::seed(&mut db, devices)?;

    let (link, sim, events) = SimulatedNcp::new();
    sim.set_auto_respond(true);
    let controller = Controller::new(Manager::new(settings, prov, db), link, events);

    let color = output::should_color(cli.color);
    let listener = tokio::spawn(listen(controller.notices(), profile, profile_path.clone(), color));

    controller.start().await.map_err(|e| match e {
        CoreError::State { message } => CliError::Bootstrap {
            reason: message,
            path: profile_path.display().to_string(),
        },
        other => other.into(),
    })?;
    tracing::info!("network ready");

    let beacons = simulate::spawn_beacons(controller.clone(), sim);
    let result = shell::run(&controller).await;

    beacons.abort();
    controller.shutdown().await;
    listener.abort();
    result
}

/// Print notices and write provisioner changes back to the profile.
async fn listen(
    mut notices: broadcast::Receiver<Notice>,
    mut profile: Profile,
    path: PathBuf,
    color: bool,
) {
    loop {
        match notices.recv().await {
            Ok(Notice::ProvisionerChanged(prov)) => {
                profile.record(&prov);
                match nwmng_config::save_profile(&path, &profile) {
                    Ok(()) => tracing::debug!(path = %path.display(), "provisioner profile saved"),
                    Err(e) => tracing::warn!(error = %e, "could not save provisioner profile"),
                }
            }
            Ok(notice) => {
                if let Some(line) = output::render_notice(&notice, color) {
                    output::print_output(&line);
                }
            }
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notice listener lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
