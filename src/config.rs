//! # Configuración del Servidor
//! src/config.rs
//!
//! Configuración con soporte para argumentos CLI y variables de entorno.
//! El único argumento obligatorio es el puerto.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./cgi_server 8080 --cgi-dir ./cgi-bin --max-clients 10
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! CGI_DIR=./cgi-bin CGI_IDLE_TIMEOUT=60 ./cgi_server 8080
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Configuración del servidor CGI
#[derive(Debug, Clone, Parser)]
#[command(name = "cgi_server")]
#[command(about = "Servidor HTTP de un solo hilo que ejecuta programas CGI")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Puerto TCP en el que escucha el servidor
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "CGI_HOST")]
    pub host: String,

    /// Directorio donde se buscan los programas CGI
    #[arg(long = "cgi-dir", default_value = ".", env = "CGI_DIR")]
    pub cgi_dir: PathBuf,

    // === Capacidad ===

    /// Número máximo de sesiones simultáneas
    #[arg(long = "max-clients", default_value = "10", env = "CGI_MAX_CLIENTS")]
    pub max_clients: usize,

    /// Bytes máximos acumulados de un request sin ver el fin de los headers
    #[arg(long = "max-request-bytes", default_value = "8192", env = "CGI_MAX_REQUEST")]
    pub max_request_bytes: usize,

    /// Bytes máximos de salida de un programa CGI
    #[arg(long = "max-page-bytes", default_value = "1048576", env = "CGI_MAX_PAGE")]
    pub max_page_bytes: usize,

    // === Timeouts ===

    /// Segundos sin actividad tras los cuales el servidor termina
    #[arg(long = "idle-timeout-secs", default_value = "300", env = "CGI_IDLE_TIMEOUT")]
    pub idle_timeout_secs: u64,

    /// Límite para escribir una respuesta completa, en milisegundos
    #[arg(long = "write-timeout-ms", default_value = "5000", env = "CGI_WRITE_TIMEOUT")]
    pub write_timeout_ms: u64,

    /// Tiempo para recolectar un hijo que cerró su stdout sin terminar
    /// (0 = responder 500 de inmediato)
    ///
    /// El hijo cierra su stdout justo antes de terminar, así que con 0 una
    /// buena parte de los programas correctos reciben 500 porque el EOF
    /// llega antes de poder recolectarlos. Un valor positivo (ej: 2000) es
    /// necesario para obtener 200 de forma confiable.
    #[arg(long = "exit-grace-ms", default_value = "0", env = "CGI_EXIT_GRACE")]
    pub exit_grace_ms: u64,
}

impl Config {
    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use cgi_server::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), String> {
        if self.max_clients == 0 {
            return Err("Max clients must be >= 1".to_string());
        }
        if self.max_request_bytes == 0 {
            return Err("Max request bytes must be > 0".to_string());
        }
        if self.max_page_bytes == 0 {
            return Err("Max page bytes must be > 0".to_string());
        }
        if self.idle_timeout_secs == 0 {
            return Err("Idle timeout must be > 0".to_string());
        }
        // set_write_timeout rechaza una duración cero
        if self.write_timeout_ms == 0 {
            return Err("Write timeout must be > 0".to_string());
        }
        Ok(())
    }

    /// Registra un resumen de la configuración
    pub fn log_summary(&self) {
        info!(
            address = %self.address(),
            cgi_dir = %self.cgi_dir.display(),
            max_clients = self.max_clients,
            max_request_bytes = self.max_request_bytes,
            max_page_bytes = self.max_page_bytes,
            idle_timeout_secs = self.idle_timeout_secs,
            write_timeout_ms = self.write_timeout_ms,
            exit_grace_ms = self.exit_grace_ms,
            "configuración cargada"
        );
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            cgi_dir: PathBuf::from("."),
            max_clients: 10,
            max_request_bytes: 8192,
            max_page_bytes: 1024 * 1024,
            idle_timeout_secs: 300,
            write_timeout_ms: 5000,
            exit_grace_ms: 0,
        }
    }
}
