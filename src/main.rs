//! # CGI Server - Entry Point
//! src/main.rs
//!
//! Punto de entrada del servidor CGI.
//!
//! Con argumentos inválidos el proceso termina con estado 1 sin escribir
//! nada; `--help` y `--version` se imprimen normalmente.

use cgi_server::config::Config;
use cgi_server::server::Server;
use clap::error::ErrorKind;
use clap::Parser;
use std::process;
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(_) => process::exit(1),
    };

    // Los logs van a stderr; se inicializan después de validar los argumentos
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "cgi_server=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = config.validate() {
        error!("configuración inválida: {}", e);
        process::exit(1);
    }
    config.log_summary();

    let mut server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("error fatal: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!("error fatal: {}", e);
        process::exit(1);
    }
}
