//! Background daemon for the abelana engine.
//!
//! The daemon owns the single writer connection, serves JSON-line requests
//! over a Unix socket, and drains the task queue on every tick so follow
//! fan-out and notifications make progress without a client asking.

use crate::error::{EngineError, engine_error};
use crate::protocol::{Request, Response};
use crate::storage::ABELANA_DIR;
use crate::store::Store;
use eyre::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Socket file name within the .abelana directory.
const SOCKET_FILE: &str = "daemon.sock";

/// PID file name within the .abelana directory.
const PID_FILE: &str = "daemon.pid";

/// Configuration for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory containing .abelana
    pub root: PathBuf,

    /// Interval between task-queue drains. `None` uses the store config.
    pub drain_interval: Option<Duration>,
}

impl DaemonConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            drain_interval: None,
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.root.join(ABELANA_DIR).join(SOCKET_FILE)
    }

    /// Get the PID file path.
    pub fn pid_path(&self) -> PathBuf {
        self.root.join(ABELANA_DIR).join(PID_FILE)
    }
}

/// The abelana daemon.
pub struct Daemon {
    config: DaemonConfig,
    store: Store,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let store = Store::open(&config.root).context("Failed to open store")?;

        Ok(Self {
            config,
            store,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a shutdown handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the daemon until a shutdown request arrives.
    pub async fn run(&mut self) -> Result<()> {
        // Clean up any stale socket
        let socket_path = self.config.socket_path();
        if socket_path.exists() {
            fs::remove_file(&socket_path).ok();
        }

        // Write PID file
        let pid_path = self.config.pid_path();
        fs::write(&pid_path, std::process::id().to_string()).context("Failed to write PID file")?;

        // Create Unix socket listener
        let listener = UnixListener::bind(&socket_path).context("Failed to bind to Unix socket")?;
        listener
            .set_nonblocking(true)
            .context("Failed to set socket to non-blocking")?;

        log::info!("Daemon listening on {:?}", socket_path);

        // Create channel for client requests
        let (tx, mut rx) = mpsc::channel::<(Request, mpsc::Sender<Response>)>(100);

        // Spawn connection acceptor task
        let shutdown_flag = Arc::clone(&self.shutdown);
        let tx_clone = tx.clone();
        tokio::spawn(async move {
            Self::accept_connections(listener, tx_clone, shutdown_flag).await;
        });

        let period = self
            .config
            .drain_interval
            .unwrap_or_else(|| self.store.config().drain_interval());
        let mut drain_interval = interval(period);

        // Main event loop
        loop {
            tokio::select! {
                // Handle incoming request
                Some((request, response_tx)) = rx.recv() => {
                    let response = self.handle_request(request);
                    let _ = response_tx.send(response).await;
                }

                // Periodic drain of the task queue
                _ = drain_interval.tick() => {
                    match self.store.drain_tasks() {
                        Ok(report) if report.ran() > 0 => {
                            log::debug!(
                                "Drained {} tasks ({} retried, {} failed)",
                                report.ran(),
                                report.retried,
                                report.failed
                            );
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Task drain failed: {:#}", e),
                    }
                }
            }

            // Check shutdown flag
            if self.shutdown.load(Ordering::Relaxed) {
                log::info!("Daemon shutting down");
                break;
            }
        }

        // Cleanup
        fs::remove_file(&socket_path).ok();
        fs::remove_file(&pid_path).ok();

        Ok(())
    }

    /// Accept connections in a background task.
    async fn accept_connections(
        listener: UnixListener,
        tx: mpsc::Sender<(Request, mpsc::Sender<Response>)>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Non-blocking accept so the shutdown flag is checked between polls
            match listener.accept() {
                Ok((stream, _)) => {
                    let tx_clone = tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, tx_clone).await {
                            log::warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No pending connections, sleep briefly
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single client connection.
    async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<(Request, mpsc::Sender<Response>)>) -> Result<()> {
        stream.set_nonblocking(false)?;

        let reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        for line in reader.lines() {
            let line = line.context("Failed to read line")?;
            if line.is_empty() {
                continue;
            }

            let request: Request = serde_json::from_str(&line).context("Failed to parse request")?;
            // Check for shutdown request
            let is_shutdown = matches!(request, Request::Shutdown);

            // Send to main loop and wait for response
            let (resp_tx, mut resp_rx) = mpsc::channel(1);
            tx.send((request, resp_tx))
                .await
                .context("Failed to send request to daemon")?;

            if let Some(response) = resp_rx.recv().await {
                let response_json = serde_json::to_string(&response)?;
                writeln!(writer, "{}", response_json)?;
                writer.flush()?;
            }

            if is_shutdown {
                break;
            }
        }

        Ok(())
    }

    fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::Register {
                user_id,
                display_name,
                email,
            } => match self.store.register_user(&user_id, &display_name, &email) {
                Ok(user) => Response::User { user },
                Err(e) => error_response(e),
            },

            Request::FollowById { user_id, following_id } => match self.store.follow_by_id(&user_id, &following_id) {
                Ok(changed) => Response::Changed { changed },
                Err(e) => error_response(e),
            },

            Request::Follow { user_id, email } => match self.store.follow(&user_id, &email) {
                Ok(outcome) => Response::Followed { outcome },
                Err(e) => error_response(e),
            },

            Request::Stats { user_id } => Response::Stats {
                stats: self.store.statistics(&user_id),
            },

            Request::Following { user_id } => match self.store.get_following(&user_id) {
                Ok(persons) => Response::Persons { persons },
                Err(e) => error_response(e),
            },

            Request::Person { person_id } => match self.store.get_person(&person_id) {
                Ok(Some(person)) => Response::Person { person },
                Ok(None) => Response::NotFound { id: person_id },
                Err(e) => error_response(e),
            },

            Request::AddPhoto { photo_id } => match self.store.add_photo(&photo_id) {
                Ok(photo) => Response::Photo { photo },
                Err(e) => error_response(e),
            },

            Request::Like { user_id, photo_id } => match self.store.like(&user_id, &photo_id) {
                Ok(changed) => Response::Changed { changed },
                Err(e) => error_response(e),
            },

            Request::Unlike { user_id, photo_id } => match self.store.unlike(&user_id, &photo_id) {
                Ok(changed) => Response::Changed { changed },
                Err(e) => error_response(e),
            },

            Request::Flag { user_id, photo_id } => match self.store.flag(&user_id, &photo_id) {
                Ok(()) => Response::Ok,
                Err(e) => error_response(e),
            },

            Request::Approve { moderator_id, photo_id } => match self.store.approve(&moderator_id, &photo_id) {
                Ok(state) => Response::Moderation { state },
                Err(e) => error_response(e),
            },

            Request::Comment {
                person_id,
                photo_id,
                text,
            } => match self.store.add_comment(&person_id, &photo_id, &text) {
                Ok(comment) => Response::Comment { comment },
                Err(e) => error_response(e),
            },

            Request::Comments { photo_id } => match self.store.get_comments(&photo_id) {
                Ok(comments) => Response::Comments { comments },
                Err(e) => error_response(e),
            },

            Request::Profile { user_id, last_date } => match self.store.profile_for_user(&user_id, &last_date) {
                Ok(entries) => Response::Timeline { entries },
                Err(e) => error_response(e),
            },

            Request::Timeline { user_id, last_id } => match self.store.get_timeline(&user_id, &last_id) {
                Ok(entries) => Response::Timeline { entries },
                Err(e) => error_response(e),
            },

            Request::Wipeout { user_id } => match self.store.delete_user(&user_id) {
                Ok(()) => Response::Ok,
                Err(e) => error_response(e),
            },

            Request::Drain => match self.store.drain_tasks() {
                Ok(report) => Response::Drained { report },
                Err(e) => error_response(e),
            },

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::Ok
            }

            Request::Ping => Response::Pong,
        }
    }
}

/// Map a failed operation to the wire: missing entities get their own response.
fn error_response(e: eyre::Report) -> Response {
    match engine_error(&e) {
        Some(EngineError::NotFound { id, .. }) => Response::NotFound { id: id.clone() },
        _ => Response::error(format!("{:#}", e)),
    }
}

/// Check if a daemon is running for the given store path.
pub fn is_daemon_running(root: &Path) -> bool {
    let config = DaemonConfig::new(root);
    let socket_path = config.socket_path();
    let pid_path = config.pid_path();

    if !socket_path.exists() {
        return false;
    }

    if let Ok(pid_str) = fs::read_to_string(&pid_path)
        && let Ok(pid) = pid_str.trim().parse::<i32>()
    {
        // Signal 0 only checks that the process exists.
        unsafe {
            if libc::kill(pid, 0) == 0 {
                return true;
            }
        }
    }

    // Stale socket, clean up
    fs::remove_file(&socket_path).ok();
    fs::remove_file(&pid_path).ok();
    false
}

/// Start the daemon as a background process.
pub fn start_daemon(root: &Path) -> Result<()> {
    use std::process::Command;

    let exe = std::env::current_exe().context("Failed to get current executable")?;

    Command::new(exe)
        .args(["--dir", root.to_str().unwrap_or("."), "daemon"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    std::thread::sleep(Duration::from_millis(100));

    Ok(())
}
