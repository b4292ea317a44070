//! # Procesos CGI
//! src/cgi/process.rs
//!
//! Abstrae el "spawn con stdout a un pipe" en dos operaciones: lanzar el
//! programa y consultar su estado de salida sin bloquear. La
//! implementación real usa `std::process::Command` y un pipe de `mio`
//! cuyo extremo de lectura queda no bloqueante para el event loop.

use mio::unix::pipe::{self, Receiver};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use thiserror::Error;

/// Estado de salida con el que un programa CGI indica "recurso no encontrado"
pub const NOT_FOUND_EXIT_STATUS: i32 = 100;

/// Variable de entorno por la que el programa recibe la query string
pub const QUERY_STRING_VAR: &str = "QUERY_STRING";

/// Errores al lanzar un programa CGI
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to create CGI pipe: {0}")]
    Pipe(#[source] io::Error),

    /// exec falló: el programa no existe, no tiene permiso o no es un
    /// ejecutable válido
    #[error("CGI program {} cannot be executed: {source}", path.display())]
    NotExecutable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn CGI program: {0}")]
    Spawn(#[source] io::Error),
}

impl SpawnError {
    /// Indica si el error corresponde a un 404 y no a un 500
    pub fn is_not_executable(&self) -> bool {
        matches!(self, SpawnError::NotExecutable { .. })
    }
}

/// Cómo terminó un programa CGI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Estado 0
    Success,
    /// Estado [`NOT_FOUND_EXIT_STATUS`]
    NotFound,
    /// Cualquier otro estado, o muerte por señal
    Failure(ExitStatus),
}

impl ChildExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => ChildExit::Success,
            Some(NOT_FOUND_EXIT_STATUS) => ChildExit::NotFound,
            _ => ChildExit::Failure(status),
        }
    }

    /// Estado crudo para los logs (código de salida o señal)
    pub fn describe(status: ExitStatus) -> String {
        match (status.code(), status.signal()) {
            (Some(code), _) => format!("exit {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            _ => "unknown".to_string(),
        }
    }
}

/// Proceso hijo que se puede consultar sin bloquear
pub trait ChildProcess {
    /// Identificador del proceso
    fn id(&self) -> u32;

    /// Estado de salida si el proceso ya terminó, `None` si sigue corriendo
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    fn kill(&mut self) -> io::Result<()>;

    fn wait(&mut self) -> io::Result<ExitStatus>;
}

impl ChildProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        Child::wait(self)
    }
}

/// Un programa recién lanzado y el extremo de lectura de su stdout
pub struct Spawned {
    pub process: Box<dyn ChildProcess>,
    pub output: Receiver,
}

/// Lanza programas CGI con el stdout conectado a un pipe
pub trait ProcessSpawner {
    /// Ejecuta `program` sin argumentos; `query` se exporta en
    /// [`QUERY_STRING_VAR`] antes del exec
    fn spawn(&self, program: &Path, query: Option<&str>) -> Result<Spawned, SpawnError>;
}

/// Spawner basado en `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSpawner;

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self, program: &Path, query: Option<&str>) -> Result<Spawned, SpawnError> {
        let (sender, receiver) = pipe::new().map_err(SpawnError::Pipe)?;

        // El hijo escribe con un stdout bloqueante normal
        sender.set_nonblocking(false).map_err(SpawnError::Pipe)?;
        let stdout = OwnedFd::from(sender);

        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::inherit());
        match query {
            Some(query) => command.env(QUERY_STRING_VAR, query),
            None => command.env_remove(QUERY_STRING_VAR),
        };

        let child = command
            .spawn()
            .map_err(|e| classify_spawn_error(program, e))?;

        // `command` se libera al salir y con él el extremo de escritura del
        // padre: el EOF del pipe llega cuando el hijo cierra su stdout
        Ok(Spawned {
            process: Box::new(child),
            output: receiver,
        })
    }
}

/// errno que `execve` reporta cuando el programa en sí no se puede ejecutar
fn is_exec_failure(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(
            libc::ENOENT
                | libc::EACCES
                | libc::EPERM
                | libc::ENOEXEC
                | libc::ENOTDIR
                | libc::ELOOP
                | libc::ETXTBSY
                | libc::EISDIR
                | libc::E2BIG
                | libc::ENAMETOOLONG
        )
    )
}

/// Separa los fallos de exec (404) de los fallos de fork o de recursos
/// como EAGAIN, ENOMEM o EMFILE (500)
fn classify_spawn_error(program: &Path, e: io::Error) -> SpawnError {
    if is_exec_failure(&e) {
        SpawnError::NotExecutable {
            path: program.to_path_buf(),
            source: e,
        }
    } else {
        SpawnError::Spawn(e)
    }
}
