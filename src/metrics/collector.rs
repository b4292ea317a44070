//! # Estadísticas del Servidor
//! src/metrics/collector.rs
//!
//! Contadores de una ejecución del servidor. El event loop es de un solo
//! hilo, así que no hay locks: el servidor es dueño de su `ServerStats` y
//! lo actualiza en cada evento.

use crate::http::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;

/// Contadores acumulados desde que arrancó el servidor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Conexiones aceptadas con un slot asignado
    pub accepted: u64,

    /// Conexiones cerradas por falta de slots
    pub refused: u64,

    /// Programas CGI lanzados
    pub children_spawned: u64,

    /// Respuestas enviadas por código de estado
    pub responses: BTreeMap<u16, u64>,

    /// Bytes de salida CGI entregados en respuestas 200
    pub bytes_delivered: u64,

    /// Máximo de sesiones activas al mismo tiempo
    pub peak_sessions: usize,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra una conexión aceptada y el número de sesiones activas
    pub fn record_accept(&mut self, active_sessions: usize) {
        self.accepted += 1;
        self.peak_sessions = self.peak_sessions.max(active_sessions);
    }

    pub fn record_refused(&mut self) {
        self.refused += 1;
    }

    pub fn record_spawn(&mut self) {
        self.children_spawned += 1;
    }

    /// Registra una respuesta enviada; `body_len` solo cuenta para 200
    pub fn record_response(&mut self, status: StatusCode, body_len: usize) {
        *self.responses.entry(status.as_u16()).or_insert(0) += 1;
        if status.is_success() {
            self.bytes_delivered += body_len as u64;
        }
    }

    /// Respuestas enviadas con `status`
    pub fn responses_for(&self, status: StatusCode) -> u64 {
        self.responses.get(&status.as_u16()).copied().unwrap_or(0)
    }

    /// Total de respuestas enviadas
    pub fn total_responses(&self) -> u64 {
        self.responses.values().sum()
    }

    /// Las estadísticas en formato JSON
    pub fn to_json(&self) -> String {
        // Un struct de contadores y un BTreeMap<u16, _> siempre serializan
        serde_json::to_string(self).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
    }
}
