//! # Escritura de Respuestas HTTP
//! src/http/response.rs
//!
//! Solo existen cuatro respuestas. Las de error son páginas HTML fijas; la
//! de éxito es el status line seguido de la salida cruda del programa CGI
//! (el programa escribe su propio `Content-Type` y la línea en blanco).
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! <stdout del programa CGI>
//! ```

use super::StatusCode;
use std::io::{self, Write};

/// Tamaño máximo de cada escritura del body
pub const MAX_CHUNK: usize = 1024;

const BAD_REQUEST_PAGE: &str = "<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML 2.0//EN\">\n\
<html><head>\n\
<title>400 Bad Request</title>\n\
</head><body>\n\
<h1>Bad Request</h1>\n\
The request could not be understood by the server.<p>\n\
</body></html>\n";

const NOT_FOUND_PAGE: &str = "<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML 2.0//EN\">\n\
<html><head>\n\
<title>404 Not Found</title>\n\
</head><body>\n\
<h1>Not Found</h1>\n\
<hr>\n</body>The server could not satisfy the request.</html>\n";

const SERVER_ERROR_PAGE: &str = "<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML 2.0//EN\">\n\
<html><head>\n\
<title>500 Internal Server Error</title>\n\
</head><body>\n\
<h1>Internal Server Error</h1>\n\
The server encountered an internal error or\n\
misconfiguration and was unable to complete your request.<p>\n\
</body></html>\n";

/// Respuesta a enviar por una conexión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    /// 200 con la salida del programa CGI
    Ok(&'a [u8]),
    BadRequest,
    NotFound,
    ServerError,
}

impl Reply<'_> {
    /// Código de estado de la respuesta
    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Ok(_) => StatusCode::Ok,
            Reply::BadRequest => StatusCode::BadRequest,
            Reply::NotFound => StatusCode::NotFound,
            Reply::ServerError => StatusCode::InternalServerError,
        }
    }

    /// Bytes de body que lleva la respuesta (sin contar el status line)
    pub fn body_len(&self) -> usize {
        match self {
            Reply::Ok(body) => body.len(),
            Reply::BadRequest => BAD_REQUEST_PAGE.len(),
            Reply::NotFound => NOT_FOUND_PAGE.len(),
            Reply::ServerError => SERVER_ERROR_PAGE.len(),
        }
    }

    /// Escribe la respuesta completa en `w`
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Reply::Ok(body) => write_ok(w, body),
            Reply::BadRequest => write_bad_request(w),
            Reply::NotFound => write_not_found(w),
            Reply::ServerError => write_server_error(w),
        }
    }
}

/// Escribe un 400 Bad Request
pub fn write_bad_request<W: Write>(w: &mut W) -> io::Result<()> {
    write_error_page(w, StatusCode::BadRequest, BAD_REQUEST_PAGE)
}

/// Escribe un 404 Not Found
pub fn write_not_found<W: Write>(w: &mut W) -> io::Result<()> {
    write_error_page(w, StatusCode::NotFound, NOT_FOUND_PAGE)
}

/// Escribe un 500 Internal Server Error
pub fn write_server_error<W: Write>(w: &mut W) -> io::Result<()> {
    write_error_page(w, StatusCode::InternalServerError, SERVER_ERROR_PAGE)
}

fn write_error_page<W: Write>(w: &mut W, status: StatusCode, page: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\n\r\n{}",
        status, page
    );
    w.write_all(response.as_bytes())?;
    w.flush()
}

/// Escribe un 200 OK seguido de `body`
///
/// El body sale en bloques de a lo sumo [`MAX_CHUNK`] bytes. Las
/// escrituras cortas de los bloques intermedios se reintentan con el resto;
/// una escritura corta del último bloque es un error.
pub fn write_ok<W: Write>(w: &mut W, body: &[u8]) -> io::Result<()> {
    w.write_all(format!("HTTP/1.1 {}\r\n", StatusCode::Ok).as_bytes())?;

    let mut remaining = body;
    while remaining.len() > MAX_CHUNK {
        let n = w.write(&remaining[..MAX_CHUNK])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "peer stopped accepting body bytes"));
        }
        remaining = &remaining[n..];
    }

    let n = w.write(remaining)?;
    if n != remaining.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write on final chunk: {} of {} bytes", n, remaining.len()),
        ));
    }
    w.flush()
}
