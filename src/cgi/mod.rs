//! # Ciclo de vida CGI
//! src/cgi/mod.rs
//!
//! Convierte un request parseado en un proceso hijo conectado por un pipe,
//! acumula su salida y decide, cuando el pipe se cierra, cómo terminó.
//!
//! La salida se guarda completa en memoria antes de responder: el status
//! line depende del estado de salida del hijo, que solo se conoce al
//! final.

pub mod process;
pub mod resource;

pub use process::{
    ChildExit, ChildProcess, CommandSpawner, ProcessSpawner, SpawnError, Spawned,
    NOT_FOUND_EXIT_STATUS, QUERY_STRING_VAR,
};
pub use resource::ResourceResolver;

use crate::server::session::{CgiChild, Session};
use std::io::{self, Read};
use std::os::fd::RawFd;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Tamaño de cada lectura del pipe
pub const READ_CHUNK: usize = 4096;

/// Resultado de atender un pipe listo para lectura
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeOutcome {
    /// Llegaron bytes (o nada todavía); seguir esperando
    MoreData,
    /// El hijo terminó con estado 0: responder 200 con la salida
    Done,
    /// El hijo terminó con [`NOT_FOUND_EXIT_STATUS`]: responder 404
    NotFoundBySpawnedProgram,
    /// Error de lectura, salida demasiado grande o estado inesperado: 500
    Failed,
    /// EOF visto, el hijo todavía no terminó y queda tiempo de gracia
    AwaitingExit,
}

/// Lanza programas CGI y recoge su salida
pub struct CgiManager {
    spawner: Box<dyn ProcessSpawner>,
    resolver: ResourceResolver,
    max_page_bytes: usize,
    exit_grace: Duration,
}

impl CgiManager {
    pub fn new(
        spawner: Box<dyn ProcessSpawner>,
        resolver: ResourceResolver,
        max_page_bytes: usize,
        exit_grace: Duration,
    ) -> Self {
        Self {
            spawner,
            resolver,
            max_page_bytes,
            exit_grace,
        }
    }

    /// Lanza el programa pedido por la sesión
    ///
    /// Registra en la sesión el hijo y su pipe, crea el buffer de salida y
    /// retorna el descriptor de lectura para que el event loop lo vigile.
    pub fn spawn(&self, session: &mut Session) -> Result<RawFd, SpawnError> {
        debug_assert!(session.cgi.is_none(), "session already has a CGI child");

        let name = session.resource_path().ok_or_else(|| {
            SpawnError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                "session has no parsed resource",
            ))
        })?;
        let program = self.resolver.resolve(name);
        let spawned = self.spawner.spawn(&program, session.query_string())?;

        let child = CgiChild::new(spawned.process, spawned.output);
        let pipe_fd = child.pipe_fd();
        info!(
            pid = child.pid(),
            pipe_fd,
            program = %program.display(),
            "programa CGI lanzado"
        );

        session.output = Some(Vec::new());
        session.cgi = Some(child);
        Ok(pipe_fd)
    }

    /// Lee todo lo disponible en el pipe de la sesión
    ///
    /// Un EOF dispara la consulta no bloqueante del estado del hijo.
    pub fn on_pipe_readable(&self, session: &mut Session) -> PipeOutcome {
        let Session {
            cgi,
            output,
            exit_deadline,
            ..
        } = session;
        let Some(child) = cgi.as_mut() else {
            warn!("pipe listo en una sesión sin proceso CGI");
            return PipeOutcome::Failed;
        };
        let output = output.get_or_insert_with(Vec::new);

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match child.pipe.read(&mut chunk) {
                Ok(0) => {
                    debug!(pid = child.pid(), bytes = output.len(), "el programa CGI cerró el pipe");
                    return self.settle(child, exit_deadline);
                }
                Ok(n) => {
                    if output.len() + n > self.max_page_bytes {
                        warn!(
                            pid = child.pid(),
                            limit = self.max_page_bytes,
                            "la salida del programa CGI excede el máximo"
                        );
                        return PipeOutcome::Failed;
                    }
                    output.extend_from_slice(&chunk[..n]);
                    trace!(pid = child.pid(), n, total = output.len(), "bytes leídos del pipe");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return PipeOutcome::MoreData,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(pid = child.pid(), error = %e, "error leyendo el pipe CGI");
                    return PipeOutcome::Failed;
                }
            }
        }
    }

    /// Vuelve a consultar el estado de un hijo que ya cerró el pipe
    pub fn poll_exit(&self, session: &mut Session) -> PipeOutcome {
        let Session {
            cgi, exit_deadline, ..
        } = session;
        match cgi.as_mut() {
            Some(child) => self.settle(child, exit_deadline),
            None => PipeOutcome::Failed,
        }
    }

    fn settle(&self, child: &mut CgiChild, exit_deadline: &mut Option<Instant>) -> PipeOutcome {
        match child.process.try_wait() {
            Ok(Some(status)) => {
                *exit_deadline = None;
                info!(pid = child.pid(), status = %ChildExit::describe(status), "programa CGI terminado");
                match ChildExit::from_status(status) {
                    ChildExit::Success => PipeOutcome::Done,
                    ChildExit::NotFound => PipeOutcome::NotFoundBySpawnedProgram,
                    ChildExit::Failure(_) => PipeOutcome::Failed,
                }
            }
            Ok(None) => {
                let now = Instant::now();
                let deadline = *exit_deadline.get_or_insert(now + self.exit_grace);
                if self.exit_grace.is_zero() || now >= deadline {
                    *exit_deadline = None;
                    warn!(pid = child.pid(), "el programa CGI cerró el pipe pero no terminó");
                    PipeOutcome::Failed
                } else {
                    PipeOutcome::AwaitingExit
                }
            }
            Err(e) => {
                *exit_deadline = None;
                warn!(pid = child.pid(), error = %e, "waitpid falló");
                PipeOutcome::Failed
            }
        }
    }
}
