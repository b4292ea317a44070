//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Contadores del servidor:
//! - Conexiones aceptadas y rechazadas
//! - Programas CGI lanzados
//! - Respuestas por código de estado

pub mod collector;

pub use collector::ServerStats;
