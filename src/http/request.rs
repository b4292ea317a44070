//! # Parsing incremental de Requests
//! src/http/request.rs
//!
//! Los bytes de cada conexión se acumulan en el buffer de la sesión hasta
//! ver el fin de los headers (`\r\n\r\n`). Recién entonces se parsea la
//! request line completa, así nunca se trabaja con tokens a medias.
//!
//! ## Formato aceptado
//!
//! ```text
//! GET /<path>[?<query>] HTTP/1.1\r\n
//! ...headers ignorados...\r\n
//! \r\n
//! ```

use crate::cgi::resource;
use crate::server::session::Session;
use thiserror::Error;

/// Marca el fin de los headers HTTP
pub const REQUEST_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Razones por las que un request se considera malformado
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// El request no empieza con `GET `
    #[error("request does not start with \"GET \"")]
    NotGet,

    /// El target no empieza con `/`
    #[error("request target does not start with '/'")]
    MissingSlash,

    /// No hay nada entre `/` y el primer separador
    #[error("empty resource path")]
    EmptyPath,

    /// El nombre del recurso no pasa la validación
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Hay un `?` sin query string detrás
    #[error("empty query string")]
    EmptyQuery,

    /// Path o query no son UTF-8
    #[error("request line is not valid UTF-8")]
    NotUtf8,

    /// Se acumularon demasiados bytes sin ver el fin de los headers
    #[error("request exceeds {0} bytes without a header terminator")]
    TooLarge(usize),
}

/// Resultado de alimentar bytes nuevos al parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Todavía no llegó `\r\n\r\n`; hay que esperar más bytes
    Incomplete,

    /// El request no es aceptable; se responde 400
    Malformed(ParseError),

    /// Request completo: `resource_path` y `query_string` quedaron en la sesión
    Complete,
}

/// Request line ya parseada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Recurso sin la `/` inicial (ej: "simple.cgi")
    path: String,

    /// Query string sin el `?` (ej: "name=ana")
    query: Option<String>,
}

impl Request {
    /// Parsea la request line contenida al inicio de `buffer`
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use cgi_server::http::Request;
    ///
    /// let request = Request::parse(b"GET /simple.cgi?x=1 HTTP/1.1\r\n\r\n").unwrap();
    /// assert_eq!(request.path(), "simple.cgi");
    /// assert_eq!(request.query(), Some("x=1"));
    /// ```
    pub fn parse(buffer: &[u8]) -> Result<Self, ParseError> {
        let target = buffer.strip_prefix(b"GET ").ok_or(ParseError::NotGet)?;
        let rest = target.strip_prefix(b"/").ok_or(ParseError::MissingSlash)?;

        // El path termina en el primer '\r', ' ' o '?'
        let path_end = rest
            .iter()
            .position(|b| matches!(b, b'\r' | b' ' | b'?'))
            .unwrap_or(rest.len());
        if path_end == 0 {
            return Err(ParseError::EmptyPath);
        }

        let path = std::str::from_utf8(&rest[..path_end]).map_err(|_| ParseError::NotUtf8)?;
        if !resource::is_valid_resource(path) {
            return Err(ParseError::InvalidResource(path.to_string()));
        }

        let query = match rest.get(path_end) {
            Some(b'?') => Some(Self::parse_query(&rest[path_end + 1..])?),
            _ => None,
        };

        Ok(Request {
            path: path.to_string(),
            query,
        })
    }

    /// La query string va desde después del `?` hasta el primer ' ' o '\r'
    fn parse_query(rest: &[u8]) -> Result<String, ParseError> {
        let end = rest
            .iter()
            .position(|b| matches!(b, b' ' | b'\r'))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(ParseError::EmptyQuery);
        }
        std::str::from_utf8(&rest[..end])
            .map(str::to_string)
            .map_err(|_| ParseError::NotUtf8)
    }

    /// Obtiene el recurso pedido
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Obtiene la query string, si la hay
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Descompone el request en sus partes
    pub fn into_parts(self) -> (String, Option<String>) {
        (self.path, self.query)
    }
}

/// Busca el fin de los headers en los bytes acumulados
pub fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(REQUEST_TERMINATOR.len())
        .position(|window| window == REQUEST_TERMINATOR)
}

/// Parser incremental de requests, uno por servidor
#[derive(Debug, Clone)]
pub struct RequestParser {
    max_request_bytes: usize,
}

impl RequestParser {
    /// Crea un parser que rechaza requests de más de `max_request_bytes`
    /// sin terminador
    pub fn new(max_request_bytes: usize) -> Self {
        Self { max_request_bytes }
    }

    /// Agrega `bytes` al buffer de la sesión e intenta parsear el request
    ///
    /// El buffer se crea en la primera llamada. Siempre se re-parsea todo
    /// lo acumulado, porque el terminador puede estar partido entre
    /// entregas.
    pub fn feed(&self, session: &mut Session, bytes: &[u8]) -> FeedOutcome {
        let buffer = session.request_buffer.get_or_insert_with(Vec::new);
        buffer.extend_from_slice(bytes);

        if find_terminator(buffer).is_none() {
            if buffer.len() > self.max_request_bytes {
                return FeedOutcome::Malformed(ParseError::TooLarge(self.max_request_bytes));
            }
            return FeedOutcome::Incomplete;
        }

        match Request::parse(buffer) {
            Ok(request) => {
                let (path, query) = request.into_parts();
                session.resource_path = Some(path);
                session.query_string = query;
                FeedOutcome::Complete
            }
            Err(e) => FeedOutcome::Malformed(e),
        }
    }
}
