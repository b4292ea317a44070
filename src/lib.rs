//! # CGI Server
//! src/lib.rs
//!
//! Servidor HTTP mínimo de un solo proceso y un solo hilo. Cada request
//! `GET /<programa>[?<query>]` ejecuta un programa CGI y su salida estándar
//! se devuelve como cuerpo de la respuesta.
//!
//! ## Arquitectura
//!
//! El servidor está dividido en módulos especializados:
//! - `http`: parser incremental del request line y escritura de respuestas
//! - `cgi`: resolución de recursos, lanzamiento de procesos y lectura del pipe
//! - `server`: tabla de sesiones y event loop basado en readiness
//! - `metrics`: contadores de la ejecución
//! - `config`: argumentos CLI y variables de entorno
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use cgi_server::config::Config;
//! use cgi_server::server::Server;
//!
//! let config = Config::default();
//! let mut server = Server::bind(config).expect("Error al iniciar servidor");
//! server.run().expect("Error en el event loop");
//! ```

pub mod cgi;
pub mod config;
pub mod http;
pub mod metrics;
pub mod server;
