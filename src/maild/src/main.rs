/**
 * maild SMTP receiving daemon
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
**/
use maild::{log_channels, Args, Daemon, DaemonError, Logs};
use maild_config::AppConfig;

/// time given to the save workers once the listeners are closed
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

async fn serve(mut daemon: Daemon) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    daemon.start()?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!(target: log_channels::DAEMON, "SIGHUP received, reloading the configuration");
                // a rejected reload is logged and keeps the daemon running
                daemon.reload().await.ok();
            }
            _ = terminate.recv() => break,
            _ = interrupt.recv() => break,
        }
    }

    tracing::info!(target: log_channels::DAEMON, "stopping");
    daemon.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

fn run(args: &Args) -> Result<(), DaemonError> {
    let daemon = match &args.config {
        Some(path) => Daemon::from_path(path)?,
        None => Daemon::new(AppConfig::default().finalize()?),
    };

    if args.test_config {
        daemon.check()?;
        println!("configuration is valid");
        return Ok(());
    }

    let logs = Logs::init(&daemon.config())?;
    let daemon = daemon.with_logs(logs);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(daemon))
}

fn main() {
    let args = <Args as clap::StructOpt>::parse();

    std::process::exit(match run(&args) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(target: log_channels::DAEMON, "{e}");
            eprintln!("maild: {e}");
            e.exit_code()
        }
    });
}
