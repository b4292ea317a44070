//! # Event Loop
//! src/server/event_loop.rs
//!
//! Servidor de un solo hilo basado en readiness. Un único `Poll` vigila el
//! socket de escucha, el socket de cada sesión que todavía espera su
//! request y el pipe de cada sesión que espera la salida de su programa
//! CGI. Cada descriptor registrado usa como token su propio número.
//!
//! ## Estados por descriptor
//!
//! - **Escucha**: el listener; acepta conexiones y les asigna un slot.
//! - **Esperando request**: el socket del cliente; se lee y se alimenta al
//!   parser hasta tener un request completo.
//! - **Esperando salida CGI**: el pipe del hijo; el socket del cliente deja
//!   de vigilarse y la salida se acumula hasta que el hijo termina.
//!
//! `mio` notifica por flanco, así que cada descriptor listo se lee hasta
//! que la lectura bloquearía.

use crate::cgi::{CgiManager, CommandSpawner, PipeOutcome, ProcessSpawner, ResourceResolver};
use crate::config::Config;
use crate::http::{FeedOutcome, Reply, RequestParser};
use crate::metrics::ServerStats;
use crate::server::session::{SessionTable, TableFull};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Eventos máximos por iteración
const EVENTS_CAPACITY: usize = 128;

/// Tamaño de cada lectura del socket del cliente
const READ_CHUNK: usize = 1024;

/// Intervalo para volver a consultar hijos que cerraron el pipe sin terminar
const REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Errores fatales del servidor
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to register descriptor {fd}: {source}")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// Llegó un evento para un descriptor que ninguna sesión posee
    #[error("event for descriptor {0} owned by no session")]
    OrphanDescriptor(RawFd),
}

/// Servidor CGI de un solo hilo
pub struct Server {
    config: Config,
    poll: Poll,
    listener: TcpListener,
    listener_fd: RawFd,
    /// La tabla se llenó: no se aceptan más conexiones
    draining: bool,
    sessions: SessionTable,
    parser: RequestParser,
    cgi: CgiManager,
    stats: ServerStats,
}

impl Server {
    /// Crea el servidor y abre el socket de escucha
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        Self::with_spawner(config, Box::new(CommandSpawner))
    }

    /// Igual que [`Server::bind`] pero con otra forma de lanzar procesos
    pub fn with_spawner(config: Config, spawner: Box<dyn ProcessSpawner>) -> Result<Self, ServerError> {
        let address = config.address();
        let bind_error = |source: io::Error| ServerError::Bind {
            address: address.clone(),
            source,
        };

        let listener = TcpListener::bind(&address).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        let poll = Poll::new().map_err(ServerError::Poll)?;
        let listener_fd = listener.as_raw_fd();
        register(poll.registry(), listener_fd).map_err(|source| ServerError::Register {
            fd: listener_fd,
            source,
        })?;

        let local = listener.local_addr().map_err(bind_error)?;
        info!(address = %local, cgi_dir = %config.cgi_dir.display(), "servidor escuchando");

        let cgi = CgiManager::new(
            spawner,
            ResourceResolver::new(config.cgi_dir.clone()),
            config.max_page_bytes,
            config.exit_grace(),
        );

        Ok(Self {
            sessions: SessionTable::new(config.max_clients),
            parser: RequestParser::new(config.max_request_bytes),
            cgi,
            poll,
            listener,
            listener_fd,
            draining: false,
            stats: ServerStats::new(),
            config,
        })
    }

    /// Dirección real del listener (útil con el puerto 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.active()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Corre el event loop
    ///
    /// Termina con `Ok` por inactividad o cuando termina de drenar, y con
    /// `Err` si falla el poll o se detecta un descriptor huérfano.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let idle_timeout = self.config.idle_timeout();

        let result = loop {
            if self.draining && self.sessions.is_empty() {
                info!("sin sesiones activas, drenado completo");
                break Ok(());
            }

            let reaping = self.sessions.has_reaping();
            let timeout = if reaping { REAP_INTERVAL } else { idle_timeout };

            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                break Err(ServerError::Poll(e));
            }

            if events.is_empty() && !reaping {
                info!(idle_secs = idle_timeout.as_secs(), "timeout de inactividad");
                break Ok(());
            }

            // Orden fijo: descriptores ascendentes, cada uno una sola vez
            let mut ready: Vec<RawFd> = events.iter().map(|e| e.token().0 as RawFd).collect();
            ready.sort_unstable();
            ready.dedup();

            if let Err(e) = self.dispatch(&ready) {
                break Err(e);
            }
            self.service_reaping();
        };

        info!(stats = %self.stats.to_json(), "servidor detenido");
        result
    }

    fn dispatch(&mut self, ready: &[RawFd]) -> Result<(), ServerError> {
        for &fd in ready {
            if fd == self.listener_fd {
                if !self.draining {
                    self.accept_connections();
                }
            } else if let Some(index) = self.sessions.find_by_connection(fd) {
                self.on_connection_readable(index, fd);
            } else if let Some(index) = self.sessions.find_by_pipe(fd) {
                self.on_pipe_readable(index);
            } else {
                error!(fd, "evento para un descriptor sin sesión");
                return Err(ServerError::OrphanDescriptor(fd));
            }
        }
        Ok(())
    }

    // ==================== Escucha ====================

    fn accept_connections(&mut self) {
        while !self.draining {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "error al aceptar conexión");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "no se pudo configurar la conexión");
            return;
        }
        let fd = stream.as_raw_fd();

        match self.sessions.allocate(stream) {
            Ok(index) => {
                if let Err(e) = register(self.poll.registry(), fd) {
                    warn!(%peer, fd, error = %e, "no se pudo registrar la conexión");
                    self.sessions.release(index);
                    return;
                }
                self.stats.record_accept(self.sessions.active());
                info!(%peer, fd, slot = index, "conexión aceptada");
            }
            Err(TableFull {
                capacity,
                connection,
            }) => {
                drop(connection);
                self.stats.record_refused();
                warn!(%peer, capacity, "tabla de sesiones llena, conexión cerrada");
                self.start_draining();
            }
        }
    }

    fn start_draining(&mut self) {
        deregister(self.poll.registry(), self.listener_fd);
        self.draining = true;
        info!(active = self.sessions.active(), "drenando sesiones activas");
    }

    // ==================== Esperando request ====================

    fn on_connection_readable(&mut self, index: usize, fd: RawFd) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let Some(session) = self.sessions.get_mut(index) else {
                return;
            };
            let Some(stream) = session.connection.as_mut() else {
                return;
            };

            match stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(slot = index, fd, "el cliente cerró la conexión");
                    deregister(self.poll.registry(), fd);
                    self.sessions.release_by_socket(fd);
                    return;
                }
                Ok(n) => {
                    trace!(slot = index, n, "bytes recibidos");
                    match self.parser.feed(session, &chunk[..n]) {
                        FeedOutcome::Incomplete => continue,
                        FeedOutcome::Malformed(reason) => {
                            info!(slot = index, %reason, "request inválido");
                            self.finish(index, Reply::BadRequest);
                        }
                        FeedOutcome::Complete => {
                            info!(
                                slot = index,
                                path = session.resource_path().unwrap_or_default(),
                                query = session.query_string().unwrap_or_default(),
                                "request completo"
                            );
                            if session.is_favicon() {
                                self.finish(index, Reply::NotFound);
                            } else {
                                self.start_cgi(index, fd);
                            }
                        }
                    }
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(slot = index, error = %e, "error leyendo del cliente");
                    deregister(self.poll.registry(), fd);
                    self.sessions.release(index);
                    return;
                }
            }
        }
    }

    fn start_cgi(&mut self, index: usize, connection_fd: RawFd) {
        let Some(session) = self.sessions.get_mut(index) else {
            return;
        };

        match self.cgi.spawn(session) {
            Ok(pipe_fd) => {
                self.stats.record_spawn();
                if let Err(e) = register(self.poll.registry(), pipe_fd) {
                    warn!(slot = index, pipe_fd, error = %e, "no se pudo registrar el pipe");
                    // Sin pipe registrado el hijo se descarta antes de responder
                    session.cgi = None;
                    self.finish(index, Reply::ServerError);
                    return;
                }
                // El socket ya no se vigila hasta responder
                deregister(self.poll.registry(), connection_fd);
            }
            Err(e) if e.is_not_executable() => {
                info!(slot = index, error = %e, "programa CGI no ejecutable");
                self.finish(index, Reply::NotFound);
            }
            Err(e) => {
                warn!(slot = index, error = %e, "no se pudo lanzar el programa CGI");
                self.finish(index, Reply::ServerError);
            }
        }
    }

    // ==================== Esperando salida CGI ====================

    fn on_pipe_readable(&mut self, index: usize) {
        let Some(session) = self.sessions.get_mut(index) else {
            return;
        };
        let outcome = self.cgi.on_pipe_readable(session);
        self.settle(index, outcome);
    }

    /// Vuelve a consultar a los hijos que cerraron el pipe sin terminar
    fn service_reaping(&mut self) {
        for index in self.sessions.reaping() {
            if let Some(session) = self.sessions.get_mut(index) {
                let outcome = self.cgi.poll_exit(session);
                self.settle(index, outcome);
            }
        }
    }

    fn settle(&mut self, index: usize, outcome: PipeOutcome) {
        match outcome {
            PipeOutcome::MoreData | PipeOutcome::AwaitingExit => {}
            PipeOutcome::Done => {
                let output = match self.sessions.get_mut(index) {
                    Some(session) => {
                        debug!(slot = index, bytes = session.output_cursor(), "salida CGI completa");
                        session.output.take().unwrap_or_default()
                    }
                    None => Vec::new(),
                };
                self.finish(index, Reply::Ok(&output));
            }
            PipeOutcome::NotFoundBySpawnedProgram => self.finish(index, Reply::NotFound),
            PipeOutcome::Failed => self.finish(index, Reply::ServerError),
        }
    }

    // ==================== Respuesta ====================

    /// Escribe la respuesta final y libera la sesión pase lo que pase
    fn finish(&mut self, index: usize, reply: Reply<'_>) {
        let write_timeout = self.config.write_timeout();
        let status = reply.status();

        if let Some(stream) = self.sessions.get_mut(index).and_then(|s| s.connection.as_mut()) {
            match write_reply(stream, &reply, write_timeout) {
                Ok(()) => {
                    let bytes = reply.body_len();
                    if status.is_server_error() {
                        warn!(slot = index, %status, bytes, "respuesta de error enviada");
                    } else if status.is_client_error() {
                        info!(slot = index, %status, bytes, "request rechazado");
                    } else {
                        info!(slot = index, %status, bytes, "respuesta enviada");
                    }
                    self.stats.record_response(status, bytes);
                }
                Err(e) => warn!(slot = index, %status, error = %e, "no se pudo enviar la respuesta"),
            }
        }

        self.close_session(index);
    }

    /// Quita del poll el descriptor vigilado de la sesión y libera el slot
    fn close_session(&mut self, index: usize) {
        let Some(session) = self.sessions.get(index) else {
            return;
        };
        // Con un hijo en curso solo el pipe está registrado
        if let Some(fd) = session.pipe_fd().or_else(|| session.connection_fd()) {
            deregister(self.poll.registry(), fd);
        }
        self.sessions.release(index);
        debug!(slot = index, active = self.sessions.active(), "sesión liberada");
    }
}

/// Respuesta bloqueante con límite de tiempo
fn write_reply(stream: &mut TcpStream, reply: &Reply<'_>, timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(timeout))?;
    reply.write_to(stream)
}

fn register(registry: &Registry, fd: RawFd) -> io::Result<()> {
    registry.register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
}

fn deregister(registry: &Registry, fd: RawFd) {
    if let Err(e) = registry.deregister(&mut SourceFd(&fd)) {
        debug!(fd, error = %e, "no se pudo quitar el descriptor del poll");
    }
}
