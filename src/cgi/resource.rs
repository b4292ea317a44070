//! # Recursos CGI
//! src/cgi/resource.rs
//!
//! Decide qué nombres de recurso son aceptables y cómo se traducen a la
//! ruta del ejecutable. Un nombre válido nunca sale del directorio CGI.

use std::path::{Path, PathBuf};

/// Recurso que los navegadores piden solos; nunca se ejecuta
pub const FAVICON: &str = "favicon.ico";

/// Verifica que `name` sea un nombre de programa CGI aceptable
///
/// Solo se permiten caracteres ASCII alfanuméricos, `.`, `_` y `-`, y el
/// nombre no puede empezar con `.`.
///
/// # Ejemplo
/// ```
/// use cgi_server::cgi::resource::is_valid_resource;
///
/// assert!(is_valid_resource("simple.cgi"));
/// assert!(!is_valid_resource("../simple.cgi"));
/// ```
pub fn is_valid_resource(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Traduce nombres de recurso a rutas dentro del directorio CGI
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    root: PathBuf,
}

impl ResourceResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        // Una raíz vacía haría que el nombre se buscara en $PATH
        let root = if root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            root
        };
        Self { root }
    }

    /// Directorio donde viven los programas
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ruta del ejecutable para `name`
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
