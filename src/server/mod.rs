//! # Módulo del Servidor
//! src/server/mod.rs
//!
//! Este módulo implementa el servidor que:
//! 1. Escucha en un puerto
//! 2. Acepta conexiones y les asigna una sesión
//! 3. Lee y parsea requests HTTP sin bloquear
//! 4. Lanza el programa CGI y acumula su salida
//! 5. Responde y libera la sesión
//!
//! Todo ocurre en un solo hilo: ver [`event_loop`].

pub mod event_loop;
pub mod session;

// Re-exportar para facilitar el uso
pub use event_loop::{Server, ServerError};
pub use session::{Session, SessionTable};
