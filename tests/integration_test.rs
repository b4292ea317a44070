//! Tests de integración para el servidor CGI
//! tests/integration_test.rs
//!
//! Cada test levanta su propio servidor en un puerto efímero, con un
//! directorio temporal de scripts CGI (`/bin/sh`), y le habla con sockets
//! reales. El servidor termina solo por inactividad y el test recupera sus
//! estadísticas al hacer `join`.
//!
//! Los tests se serializan: escribir un ejecutable mientras otro hilo hace
//! fork + exec puede dar ETXTBSY.

use cgi_server::config::Config;
use cgi_server::http::StatusCode;
use cgi_server::metrics::ServerStats;
use cgi_server::server::Server;
use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Directorio temporal con programas CGI
struct CgiDir {
    dir: TempDir,
}

impl CgiDir {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Escribe un script de shell ejecutable
    fn script(&self, name: &str, body: &str) {
        self.file(name, &format!("#!/bin/sh\n{}\n", body), 0o755);
    }

    fn file(&self, name: &str, contents: &str, mode: u32) {
        let path = self.path().join(name);
        fs::write(&path, contents).expect("Failed to write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("Failed to chmod");
    }
}

/// Servidor corriendo en otro hilo
struct Running {
    addr: SocketAddr,
    handle: JoinHandle<ServerStats>,
}

impl Running {
    fn start(cgi: &CgiDir) -> Self {
        Self::start_with(cgi, |_| {})
    }

    fn start_with(cgi: &CgiDir, tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config {
            port: 0,
            cgi_dir: cgi.path().to_path_buf(),
            idle_timeout_secs: 1,
            exit_grace_ms: 2000,
            ..Config::default()
        };
        tweak(&mut config);

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut server = Server::bind(config).expect("Failed to bind");
            tx.send(server.local_addr().expect("No local address")).unwrap();
            server.run().expect("Event loop failed");
            server.stats().clone()
        });
        let addr = rx.recv().expect("Server did not start");

        Self { addr, handle }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("Failed to connect");
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream
    }

    /// Envía bytes crudos y lee la respuesta hasta que el servidor cierra
    fn raw(&self, request: &[u8]) -> Vec<u8> {
        let mut stream = self.connect();
        stream.write_all(request).unwrap();
        read_all(&mut stream)
    }

    fn get(&self, target: &str) -> Vec<u8> {
        self.raw(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target).as_bytes())
    }

    /// Espera a que el servidor termine y retorna sus estadísticas
    fn stop(self) -> ServerStats {
        self.handle.join().expect("Server thread panicked")
    }
}

fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response).expect("Failed to read response");
    response
}

/// Primera línea de la respuesta, sin CRLF
fn status_line(response: &[u8]) -> String {
    let end = response
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(response.len());
    String::from_utf8_lossy(&response[..end]).into_owned()
}

/// Todo lo que sigue al status line de un 200
fn ok_body(response: &[u8]) -> &[u8] {
    let prefix = b"HTTP/1.1 200 OK\r\n";
    assert!(
        response.starts_with(prefix),
        "Expected 200 OK, got: {}",
        status_line(response)
    );
    &response[prefix.len()..]
}

// ==================== 200 OK ====================

#[test]
fn test_simple_cgi_with_query() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("hello.cgi", r"printf 'Content-Type: text/plain\r\n\r\nhola %s' $QUERY_STRING");
    let server = Running::start(&cgi);

    let response = server.get("/hello.cgi?name=ana");
    assert_eq!(ok_body(&response), b"Content-Type: text/plain\r\n\r\nhola name=ana");

    let stats = server.stop();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.children_spawned, 1);
    assert_eq!(stats.responses_for(StatusCode::Ok), 1);
}

#[test]
fn test_query_absent_is_unset() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("env.cgi", "printf '%s' \"${QUERY_STRING-unset}\"");
    let server = Running::start(&cgi);

    assert_eq!(ok_body(&server.get("/env.cgi")), b"unset");
    assert_eq!(ok_body(&server.get("/env.cgi?a=1&b=2")), b"a=1&b=2");

    server.stop();
}

#[test]
fn test_empty_output_is_bare_status_line() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("quiet.cgi", "exit 0");
    let server = Running::start(&cgi);

    assert_eq!(server.get("/quiet.cgi"), b"HTTP/1.1 200 OK\r\n");

    server.stop();
}

#[test]
fn test_large_output_exact_length() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("big.cgi", "head -c 200000 /dev/zero | tr '\\000' 'x'");
    let server = Running::start(&cgi);

    let response = server.get("/big.cgi");
    let body = ok_body(&response);
    assert_eq!(body.len(), 200_000);
    assert!(body.iter().all(|&b| b == b'x'));

    let stats = server.stop();
    assert_eq!(stats.bytes_delivered, 200_000);
}

#[test]
fn test_output_exactly_at_cap() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("fits.cgi", "head -c 4096 /dev/zero | tr '\\000' 'y'");
    let server = Running::start_with(&cgi, |c| c.max_page_bytes = 4096);

    assert_eq!(ok_body(&server.get("/fits.cgi")).len(), 4096);

    server.stop();
}

#[test]
fn test_partial_delivery() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("hello.cgi", "printf 'q=%s' \"$QUERY_STRING\"");
    let server = Running::start(&cgi);

    let mut stream = server.connect();
    for piece in [&b"GE"[..], b"T /hel", b"lo.cgi?x", b"=1 HTTP/1.1\r", b"\n\r", b"\n"] {
        stream.write_all(piece).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(30));
    }
    let response = read_all(&mut stream);
    assert_eq!(ok_body(&response), b"q=x=1");

    server.stop();
}

#[test]
fn test_concurrent_clients() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("slow.cgi", "sleep 0.5\nprintf 'listo %s' \"$QUERY_STRING\"");
    let server = Running::start(&cgi);
    let addr = server.addr;

    let start = Instant::now();
    let clients: Vec<_> = (0..3)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
                stream
                    .write_all(format!("GET /slow.cgi?{} HTTP/1.1\r\n\r\n", i).as_bytes())
                    .unwrap();
                read_all(&mut stream)
            })
        })
        .collect();

    for (i, client) in clients.into_iter().enumerate() {
        let response = client.join().unwrap();
        assert_eq!(ok_body(&response), format!("listo {}", i).as_bytes());
    }
    // Los tres hijos corrieron a la vez
    assert!(start.elapsed() < Duration::from_millis(1400));

    let stats = server.stop();
    assert_eq!(stats.children_spawned, 3);
    assert!(stats.peak_sessions >= 2);
}

// ==================== 400 Bad Request ====================

#[test]
fn test_non_get_is_bad_request() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("hello.cgi", "printf hola");
    let server = Running::start(&cgi);

    let response = server.raw(b"POST /hello.cgi HTTP/1.1\r\n\r\n");
    assert_eq!(status_line(&response), "HTTP/1.1 400 Bad Request");
    assert!(String::from_utf8_lossy(&response).contains("Content-Type: text/html\r\n\r\n"));

    let response = server.raw(b"get /hello.cgi HTTP/1.1\r\n\r\n");
    assert_eq!(status_line(&response), "HTTP/1.1 400 Bad Request");

    let stats = server.stop();
    assert_eq!(stats.children_spawned, 0);
    assert_eq!(stats.responses_for(StatusCode::BadRequest), 2);
}

#[test]
fn test_invalid_paths_are_bad_request() {
    let _guard = serial();
    let cgi = CgiDir::new();
    let server = Running::start(&cgi);

    for target in ["/", "/../hello.cgi", "/.hidden", "/hello.cgi?", "hello.cgi"] {
        let response = server.get(target);
        assert_eq!(status_line(&response), "HTTP/1.1 400 Bad Request", "target {}", target);
    }

    let stats = server.stop();
    assert_eq!(stats.children_spawned, 0);
}

#[test]
fn test_oversized_request_is_bad_request() {
    let _guard = serial();
    let cgi = CgiDir::new();
    let server = Running::start_with(&cgi, |c| c.max_request_bytes = 64);

    let mut stream = server.connect();
    let mut request = b"GET /hello.cgi HTTP/1.1\r\n".to_vec();
    request.extend_from_slice(&[b'a'; 100]);
    stream.write_all(&request).unwrap();
    let response = read_all(&mut stream);
    assert_eq!(status_line(&response), "HTTP/1.1 400 Bad Request");

    server.stop();
}

// ==================== 404 Not Found ====================

#[test]
fn test_favicon_is_not_found_without_spawning() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("favicon.ico", "printf nunca");
    let server = Running::start(&cgi);

    let response = server.get("/favicon.ico");
    assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found");

    let stats = server.stop();
    assert_eq!(stats.children_spawned, 0);
    assert_eq!(stats.responses_for(StatusCode::NotFound), 1);
}

#[test]
fn test_missing_program_is_not_found() {
    let _guard = serial();
    let cgi = CgiDir::new();
    let server = Running::start(&cgi);

    let response = server.get("/nothing.cgi");
    assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found");

    server.stop();
}

#[test]
fn test_non_executable_program_is_not_found() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.file("plain.cgi", "#!/bin/sh\nprintf hola\n", 0o644);
    let server = Running::start(&cgi);

    let response = server.get("/plain.cgi");
    assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found");

    server.stop();
}

#[test]
fn test_invalid_executable_format_is_not_found() {
    let _guard = serial();
    let cgi = CgiDir::new();
    // Ejecutables sin shebang ni formato binario válido: exec da ENOEXEC
    cgi.file("noshebang.cgi", "echo hola\n", 0o755);
    cgi.file("garbage.cgi", "\x7fELF\0\0garbage", 0o755);
    let server = Running::start(&cgi);

    assert_eq!(status_line(&server.get("/noshebang.cgi")), "HTTP/1.1 404 Not Found");
    assert_eq!(status_line(&server.get("/garbage.cgi")), "HTTP/1.1 404 Not Found");

    let stats = server.stop();
    assert_eq!(stats.responses_for(StatusCode::NotFound), 2);
    assert_eq!(stats.responses_for(StatusCode::InternalServerError), 0);
}

#[test]
fn test_sentinel_exit_is_not_found() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("gone.cgi", "exit 100");
    cgi.script("half.cgi", "printf 'Content-Type: text/plain\\r\\n\\r\\nparcial'\nexit 100");
    let server = Running::start(&cgi);

    assert_eq!(status_line(&server.get("/gone.cgi")), "HTTP/1.1 404 Not Found");

    // La salida parcial se descarta
    let response = server.get("/half.cgi");
    assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found");
    assert!(!String::from_utf8_lossy(&response).contains("parcial"));

    let stats = server.stop();
    assert_eq!(stats.children_spawned, 2);
    assert_eq!(stats.bytes_delivered, 0);
}

// ==================== 500 Internal Server Error ====================

#[test]
fn test_failure_exit_is_server_error() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("broken.cgi", "printf algo\nexit 3");
    let server = Running::start(&cgi);

    let response = server.get("/broken.cgi");
    assert_eq!(status_line(&response), "HTTP/1.1 500 Internal Server Error");

    let stats = server.stop();
    assert_eq!(stats.responses_for(StatusCode::InternalServerError), 1);
}

#[test]
fn test_output_over_cap_is_server_error() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("flood.cgi", "head -c 5000 /dev/zero | tr '\\000' 'z'");
    let server = Running::start_with(&cgi, |c| c.max_page_bytes = 1000);

    let response = server.get("/flood.cgi");
    assert_eq!(status_line(&response), "HTTP/1.1 500 Internal Server Error");

    server.stop();
}

// ==================== Ciclo de vida ====================

#[test]
fn test_client_closing_early_releases_session() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("hello.cgi", "printf hola");
    let server = Running::start_with(&cgi, |c| c.max_clients = 1);

    let mut early = server.connect();
    early.write_all(b"GET /hel").unwrap();
    early.shutdown(Shutdown::Both).unwrap();
    drop(early);
    thread::sleep(Duration::from_millis(100));

    // El único slot quedó libre
    assert_eq!(ok_body(&server.get("/hello.cgi")), b"hola");

    let stats = server.stop();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.refused, 0);
    assert_eq!(stats.total_responses(), 1);
}

#[test]
fn test_full_table_refuses_and_drains() {
    let _guard = serial();
    let cgi = CgiDir::new();
    cgi.script("hello.cgi", "printf hola");
    let server = Running::start_with(&cgi, |c| {
        c.max_clients = 1;
        c.idle_timeout_secs = 30;
    });

    let mut first = server.connect();
    first.write_all(b"GET /hello.cgi").unwrap();
    thread::sleep(Duration::from_millis(100));

    // Sin slots: se acepta y se cierra sin respuesta
    let mut second = server.connect();
    let mut refused = Vec::new();
    match second.read_to_end(&mut refused) {
        Ok(_) => assert!(refused.is_empty()),
        Err(e) => assert_ne!(e.kind(), std::io::ErrorKind::WouldBlock),
    }

    // La sesión existente se sigue atendiendo
    first.write_all(b" HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(ok_body(&read_all(&mut first)), b"hola");

    // Con la tabla vacía el servidor termina sin esperar el timeout
    let start = Instant::now();
    let stats = server.stop();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.refused, 1);
    assert_eq!(stats.peak_sessions, 1);
}

#[test]
fn test_idle_server_stops() {
    let _guard = serial();
    let cgi = CgiDir::new();
    let server = Running::start(&cgi);

    let stats = server.stop();
    assert_eq!(stats, ServerStats::default());
}
