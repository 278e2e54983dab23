use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info};
use server::game::Rules;
use server::network::{Server, ServerConfig, ServerError};

/// Authoritative game server for the bomber game.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Turns a bomb waits before exploding
    #[arg(short = 'b', long = "bomb-timer")]
    bomb_timer: u16,

    /// Players needed to start a game
    #[arg(short = 'c', long = "players-count", value_parser = clap::value_parser!(u8).range(1..))]
    players_count: u8,

    /// Milliseconds between turns
    #[arg(short = 't', long = "turn-duration")]
    turn_duration: u64,

    /// How far explosions reach along each axis
    #[arg(short = 'e', long = "explosion-radius")]
    explosion_radius: u16,

    /// Blocks rolled onto the board at game start
    #[arg(short = 'k', long = "initial-blocks")]
    initial_blocks: u16,

    /// Turns in a game
    #[arg(short = 'l', long = "game-length")]
    game_length: u16,

    /// Name presented to clients in the Hello message
    #[arg(short = 'n', long = "server-name")]
    server_name: String,

    /// TCP port to listen on
    #[arg(short = 'p', long)]
    port: u16,

    /// PRNG seed; identical seeds replay identical games
    #[arg(short = 's', long, default_value_t = 0)]
    seed: u32,

    /// Board width
    #[arg(short = 'x', long = "size-x", value_parser = clap::value_parser!(u16).range(1..))]
    size_x: u16,

    /// Board height
    #[arg(short = 'y', long = "size-y", value_parser = clap::value_parser!(u16).range(1..))]
    size_y: u16,
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
    let config = ServerConfig {
        rules: Rules {
            server_name: args.server_name,
            player_count: args.players_count,
            size_x: args.size_x,
            size_y: args.size_y,
            game_length: args.game_length,
            explosion_radius: args.explosion_radius,
            bomb_timer: args.bomb_timer,
            initial_blocks: args.initial_blocks,
        },
        port: args.port,
        turn_duration: Duration::from_millis(args.turn_duration),
        seed: args.seed,
    };

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error: could not bind to port {}: {}", args.port, e);
            return ExitCode::FAILURE;
        }
    };

    let (fatal_tx, fatal_rx) = bounded::<ServerError>(1);
    {
        let tx = fatal_tx.clone();
        if ctrlc::set_handler(move || {
            let _ = tx.try_send(ServerError::Interrupted);
        })
        .is_err()
        {
            eprintln!("Error: could not install SIGINT handler.");
            return ExitCode::FAILURE;
        }
    }

    server.start();
    let service = {
        let server = Arc::clone(&server);
        let tx = fatal_tx.clone();
        thread::spawn(move || {
            if let Err(e) = server.serve() {
                let _ = tx.try_send(e);
            }
        })
    };

    // First fatal error wins: SIGINT from the handler or a failure out of
    // the service loop.
    let exit = match fatal_rx.recv() {
        Ok(ServerError::Interrupted) => {
            info!("interrupted, shutting down");
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("service loop died without reporting");
            ExitCode::from(2)
        }
    };

    server.shutdown();
    if service.join().is_err() {
        return ExitCode::from(2);
    }
    exit
}
