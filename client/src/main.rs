use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::error::ErrorKind;
use clap::Parser;
use client::network::{Client, ClientConfig, ClientError};
use crossbeam_channel::bounded;
use log::{error, info};

/// Bridges a local GUI (UDP) to the game server (TCP).
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address of the GUI, as HOST:PORT
    #[arg(short = 'd', long = "gui-address")]
    gui_address: String,

    /// Name identifying you in the game
    #[arg(short = 'n', long = "player-name")]
    player_name: String,

    /// UDP port to listen on for GUI datagrams
    #[arg(short = 'p', long)]
    port: u16,

    /// Address of the game server, as HOST:PORT
    #[arg(short = 's', long = "server-address")]
    server_address: String,
}

fn main() -> ExitCode {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    // Help exits 0; any argument problem is a known failure and exits 1.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    run(args)
}

fn run(args: Args) -> ExitCode {
    let config = ClientConfig {
        player_name: args.player_name,
        port: args.port,
        gui_address: args.gui_address,
        server_address: args.server_address,
    };

    let client = match Client::connect(&config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (fatal_tx, fatal_rx) = bounded::<ClientError>(1);
    {
        let tx = fatal_tx.clone();
        if ctrlc::set_handler(move || {
            let _ = tx.try_send(ClientError::Interrupted);
        })
        .is_err()
        {
            eprintln!("Error: could not install SIGINT handler.");
            return ExitCode::FAILURE;
        }
    }

    let gui_worker = {
        let client = Arc::clone(&client);
        let tx = fatal_tx.clone();
        thread::spawn(move || {
            if let Err(e) = client.gui_loop() {
                let _ = tx.try_send(e);
            }
        })
    };
    let server_worker = {
        let client = Arc::clone(&client);
        let tx = fatal_tx.clone();
        thread::spawn(move || {
            if let Err(e) = client.server_loop() {
                let _ = tx.try_send(e);
            }
        })
    };

    // First fatal error wins; then both workers are forced out and joined.
    let exit = match fatal_rx.recv() {
        Ok(ClientError::Interrupted) => {
            info!("interrupted, shutting down");
            ExitCode::FAILURE
        }
        Ok(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("worker threads died without reporting");
            ExitCode::from(2)
        }
    };

    client.stop();
    let clean = gui_worker.join().is_ok() && server_worker.join().is_ok();
    if clean {
        exit
    } else {
        ExitCode::from(2)
    }
}
