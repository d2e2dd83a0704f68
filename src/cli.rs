//! CLI front-end (spec.md §1 names this only as an out-of-scope external
//! collaborator; the concrete subcommand shape here is recovered from
//! `original_source/cmd/tts-proxy/main.go`).

use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::{parse_port, ConfigStore};
use crate::errors::ConfigResult;

const TEST_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

pub enum Command {
    Serve,
    MapList,
    MapSet { port: u16, target: String },
    MapDelete { port: u16 },
    Test { port: u16 },
    Help,
}

pub fn parse(args: &[String]) -> Result<Command, String> {
    match args {
        [] => Ok(Command::Serve),
        [cmd] if cmd == "serve" => Ok(Command::Serve),
        [cmd] if cmd == "help" || cmd == "--help" || cmd == "-h" => Ok(Command::Help),
        [cmd, sub] if cmd == "map" && sub == "list" => Ok(Command::MapList),
        [cmd, port] if cmd == "test" => {
            let port = parse_port(port).map_err(|e| e.to_string())?;
            Ok(Command::Test { port })
        }
        [cmd, sub, port] if cmd == "map" && sub == "delete" => {
            let port = parse_port(port).map_err(|e| e.to_string())?;
            Ok(Command::MapDelete { port })
        }
        [cmd, sub, port, target] if cmd == "map" && sub == "set" => {
            let port = parse_port(port).map_err(|e| e.to_string())?;
            Ok(Command::MapSet {
                port,
                target: target.clone(),
            })
        }
        _ => Err(usage()),
    }
}

pub fn usage() -> String {
    "usage: tts-proxy [serve|map list|map set <port> <host:port>|map delete <port>|test <port>|help]"
        .to_string()
}

/// Runs every subcommand except `serve`, which the caller handles itself
/// (it needs the host key and listener fleet, not just the config store).
pub async fn run(cmd: Command, store: &ConfigStore) -> ConfigResult<()> {
    match cmd {
        Command::Serve => unreachable!("serve is handled by the caller"),
        Command::Help => {
            println!("{}", usage());
            Ok(())
        }
        Command::MapList => {
            let mapping = store.snapshot()?;
            for (port, target) in mapping.sorted_pairs() {
                println!("{port} -> {target}");
            }
            Ok(())
        }
        Command::MapSet { port, target } => {
            store.set_mapping(port, &target)?;
            println!("{port} -> {target}");
            Ok(())
        }
        Command::MapDelete { port } => {
            store.delete_mapping(port)?;
            println!("removed mapping for port {port}");
            Ok(())
        }
        Command::Test { port } => {
            let mapping = store.snapshot()?;
            let Some(target) = mapping.lookup(port) else {
                println!("no mapping configured for port {port}");
                return Ok(());
            };
            match tokio::time::timeout(TEST_DIAL_TIMEOUT, TcpStream::connect(target)).await {
                Ok(Ok(_)) => println!("port {port}: reached {target}"),
                Ok(Err(err)) => println!("port {port}: failed to reach {target}: {err}"),
                Err(_) => println!("port {port}: timed out reaching {target}"),
            }
            Ok(())
        }
    }
}
