//! # Códigos de Estado HTTP
//! src/http/status.rs
//!
//! El servidor solo produce cuatro respuestas posibles:
//!
//! - **200 OK**: el programa CGI terminó con estado 0
//! - **400 Bad Request**: la línea de request no es un GET válido
//! - **404 Not Found**: recurso ignorado (favicon) o programa no ejecutable
//! - **500 Internal Server Error**: fallo de pipe/spawn/lectura o salida inesperada del CGI

/// Códigos de estado que el servidor puede enviar
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusCode {
    /// 200 OK - La salida del programa CGI se envía como body
    Ok = 200,

    /// 400 Bad Request - Request malformado o recurso inválido
    BadRequest = 400,

    /// 404 Not Found - El programa no existe o no puede ejecutarse
    NotFound = 404,

    /// 500 Internal Server Error - Error de transporte o del programa CGI
    InternalServerError = 500,
}

impl StatusCode {
    /// Convierte el código a su valor numérico
    ///
    /// # Ejemplo
    /// ```
    /// use cgi_server::http::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// ```
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Retorna el texto de razón (reason phrase) asociado al código
    ///
    /// # Ejemplo
    /// ```
    /// use cgi_server::http::StatusCode;
    /// assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }

    /// Verifica si el código indica éxito (2xx)
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }

    /// Verifica si el código indica error del cliente (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    /// Verifica si el código indica error del servidor (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.as_u16())
    }
}

impl std::fmt::Display for StatusCode {
    /// Formato: "200 OK"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}
