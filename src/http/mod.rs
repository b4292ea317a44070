//! # Módulo HTTP
//! src/http/mod.rs
//!
//! Implementa la parte mínima de HTTP que necesita el servidor CGI:
//!
//! - Parsing incremental de la request line de un `GET`
//! - Las cuatro respuestas fijas (200, 400, 404, 500)
//! - Códigos de estado
//!
//! No hay keep-alive ni otros métodos: cada conexión lleva exactamente un
//! request y se cierra después de la respuesta.

pub mod request;   // Parsing incremental de requests
pub mod response;  // Escritura de las respuestas fijas
pub mod status;    // Códigos de estado HTTP

pub use request::{FeedOutcome, ParseError, Request, RequestParser};
pub use response::Reply;
pub use status::StatusCode;
