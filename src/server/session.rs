//! # Tabla de Sesiones
//! src/server/session.rs
//!
//! Cada conexión activa ocupa un slot de una tabla de capacidad fija. El
//! slot es dueño del socket, del buffer del request, del proceso CGI y de
//! su salida: liberar el slot cierra todos los descriptores y termina al
//! hijo si sigue vivo.
//!
//! Las búsquedas por descriptor son lineales; la capacidad es chica.

use crate::cgi::process::{ChildExit, ChildProcess};
use crate::cgi::resource::FAVICON;
use mio::unix::pipe::Receiver;
use std::fmt;
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Proceso CGI en curso: pid y pipe siempre van juntos
pub struct CgiChild {
    pid: u32,
    pub(crate) process: Box<dyn ChildProcess>,
    pub(crate) pipe: Receiver,
}

impl CgiChild {
    pub fn new(process: Box<dyn ChildProcess>, pipe: Receiver) -> Self {
        Self {
            pid: process.id(),
            process,
            pipe,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pipe_fd(&self) -> RawFd {
        self.pipe.as_raw_fd()
    }
}

impl Drop for CgiChild {
    /// Un hijo que sigue vivo al liberar la sesión se mata y se recolecta
    fn drop(&mut self) {
        match self.process.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(pid = self.pid, "terminando proceso CGI huérfano");
                if let Err(e) = self.process.kill() {
                    warn!(pid = self.pid, error = %e, "no se pudo matar el proceso CGI");
                }
                match self.process.wait() {
                    Ok(status) => debug!(pid = self.pid, status = %ChildExit::describe(status), "proceso CGI recolectado"),
                    Err(e) => warn!(pid = self.pid, error = %e, "no se pudo recolectar el proceso CGI"),
                }
            }
            Err(e) => warn!(pid = self.pid, error = %e, "waitpid falló al liberar la sesión"),
        }
    }
}

impl fmt::Debug for CgiChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CgiChild")
            .field("pid", &self.pid)
            .field("pipe_fd", &self.pipe_fd())
            .finish()
    }
}

/// Estado de servidor para una conexión de cliente
///
/// Un slot libre tiene todo en `None`; uno ocupado siempre tiene
/// `connection`. `output` existe si y solo si se lanzó un hijo.
#[derive(Debug, Default)]
pub struct Session {
    pub(crate) connection: Option<TcpStream>,
    pub(crate) request_buffer: Option<Vec<u8>>,
    pub(crate) resource_path: Option<String>,
    pub(crate) query_string: Option<String>,
    pub(crate) cgi: Option<CgiChild>,
    pub(crate) output: Option<Vec<u8>>,
    /// Límite para recolectar un hijo que cerró el pipe pero no terminó
    pub(crate) exit_deadline: Option<Instant>,
}

impl Session {
    pub fn is_free(&self) -> bool {
        self.connection.is_none()
    }

    pub fn connection_fd(&self) -> Option<RawFd> {
        self.connection.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn pipe_fd(&self) -> Option<RawFd> {
        self.cgi.as_ref().map(CgiChild::pipe_fd)
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.cgi.as_ref().map(CgiChild::pid)
    }

    pub fn resource_path(&self) -> Option<&str> {
        self.resource_path.as_deref()
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Salida del programa CGI recibida hasta ahora
    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    /// Fin lógico de los datos válidos en `output`
    pub fn output_cursor(&self) -> usize {
        self.output.as_ref().map_or(0, Vec::len)
    }

    pub fn is_favicon(&self) -> bool {
        self.resource_path() == Some(FAVICON)
    }

    /// El pipe ya dio EOF y se espera el estado de salida del hijo
    pub fn is_reaping(&self) -> bool {
        self.exit_deadline.is_some()
    }

    /// Libera todo lo que posee el slot y lo deja vacío
    ///
    /// Es idempotente: resetear un slot vacío no hace nada.
    pub fn reset(&mut self) {
        // El orden importa: primero el hijo (se mata y recolecta), luego
        // el socket
        self.cgi = None;
        *self = Session::default();
    }
}

/// No hay slots libres para una conexión nueva
///
/// Devuelve la conexión para que el llamador decida cómo cerrarla.
#[derive(Debug, Error)]
#[error("session table is full ({capacity} slots)")]
pub struct TableFull {
    pub capacity: usize,
    pub connection: TcpStream,
}

/// Tabla de sesiones de capacidad fija
#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<Session>,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Session::default()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Número de slots ocupados
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.active() == 0
    }

    /// Ocupa el primer slot libre con `connection`
    pub fn allocate(&mut self, connection: TcpStream) -> Result<usize, TableFull> {
        debug_assert!(
            self.find_by_connection(connection.as_raw_fd()).is_none(),
            "descriptor already owned by a live session"
        );

        match self.slots.iter().position(Session::is_free) {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.reset();
                slot.connection = Some(connection);
                Ok(index)
            }
            None => Err(TableFull {
                capacity: self.capacity(),
                connection,
            }),
        }
    }

    pub fn find_by_connection(&self, fd: RawFd) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.connection_fd() == Some(fd))
    }

    pub fn find_by_pipe(&self, fd: RawFd) -> Option<usize> {
        self.slots.iter().position(|s| s.pipe_fd() == Some(fd))
    }

    pub fn get(&self, index: usize) -> Option<&Session> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Session> {
        self.slots.get_mut(index)
    }

    /// Libera el slot `index`; no hace nada si ya estaba libre o no existe
    pub fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.reset();
        }
    }

    /// Libera la sesión dueña del socket `fd`
    ///
    /// Retorna `false` si ninguna sesión lo tenía.
    pub fn release_by_socket(&mut self, fd: RawFd) -> bool {
        match self.find_by_connection(fd) {
            Some(index) => {
                self.release(index);
                true
            }
            None => false,
        }
    }

    /// Índices de las sesiones esperando el estado de salida de su hijo
    pub fn reaping(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_reaping())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_reaping(&self) -> bool {
        self.slots.iter().any(Session::is_reaping)
    }
}
