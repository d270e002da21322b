//! Client for connecting to the abelana daemon.

use crate::daemon::{DaemonConfig, is_daemon_running, start_daemon};
use crate::error::EngineError;
use crate::protocol::{Request, Response};
use crate::tasks::DrainReport;
use crate::types::{Comment, FollowOutcome, ModerationState, Person, Photo, Stats, TimelineEntry, User};
use eyre::{Context, Result, bail};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client for communicating with the abelana daemon.
pub struct Client {
    root: PathBuf,
    stream: UnixStream,
}

/// Turn a non-success response into an error.
fn unexpected<T>(response: Response) -> Result<T> {
    match response {
        Response::Error { message } => bail!("{}", message),
        Response::NotFound { id } => Err(eyre::eyre!(EngineError::NotFound { kind: "entity", id })),
        other => bail!("Unexpected response: {:?}", other),
    }
}

impl Client {
    /// Connect to the daemon, optionally auto-starting it if not running.
    pub fn connect(root: &Path, auto_start: bool) -> Result<Self> {
        let config = DaemonConfig::new(root);
        let socket_path = config.socket_path();

        let stream = match UnixStream::connect(&socket_path) {
            Ok(stream) => stream,
            Err(_) if auto_start => {
                if !is_daemon_running(root) {
                    start_daemon(root).context("Failed to auto-start daemon")?;

                    let mut attempts = 0;
                    loop {
                        if attempts > 20 {
                            bail!("Daemon failed to start in time");
                        }
                        std::thread::sleep(Duration::from_millis(50));
                        if let Ok(stream) = UnixStream::connect(&socket_path) {
                            break stream;
                        }
                        attempts += 1;
                    }
                } else {
                    UnixStream::connect(&socket_path).context("Failed to connect to daemon")?
                }
            }
            Err(e) => {
                bail!("Failed to connect to daemon: {}. Is it running?", e);
            }
        };

        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .context("Failed to set read timeout")?;

        Ok(Self {
            root: root.to_path_buf(),
            stream,
        })
    }

    /// Get the store root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Send a request and receive a response.
    fn request(&mut self, request: Request) -> Result<Response> {
        let request_json = serde_json::to_string(&request)?;
        writeln!(self.stream, "{}", request_json)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line)?;

        let response: Response = serde_json::from_str(&response_line)?;
        Ok(response)
    }

    pub fn register_user(&mut self, user_id: &str, display_name: &str, email: &str) -> Result<User> {
        match self.request(Request::Register {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            email: email.to_string(),
        })? {
            Response::User { user } => Ok(user),
            other => unexpected(other),
        }
    }

    /// Follow a user by ID. Returns true if the edge is new.
    pub fn follow_by_id(&mut self, user_id: &str, following_id: &str) -> Result<bool> {
        match self.request(Request::FollowById {
            user_id: user_id.to_string(),
            following_id: following_id.to_string(),
        })? {
            Response::Changed { changed } => Ok(changed),
            other => unexpected(other),
        }
    }

    /// Follow by e-mail address.
    pub fn follow(&mut self, user_id: &str, email: &str) -> Result<FollowOutcome> {
        match self.request(Request::Follow {
            user_id: user_id.to_string(),
            email: email.to_string(),
        })? {
            Response::Followed { outcome } => Ok(outcome),
            other => unexpected(other),
        }
    }

    pub fn statistics(&mut self, user_id: &str) -> Result<Stats> {
        match self.request(Request::Stats {
            user_id: user_id.to_string(),
        })? {
            Response::Stats { stats } => Ok(stats),
            other => unexpected(other),
        }
    }

    pub fn get_following(&mut self, user_id: &str) -> Result<Vec<Person>> {
        match self.request(Request::Following {
            user_id: user_id.to_string(),
        })? {
            Response::Persons { persons } => Ok(persons),
            other => unexpected(other),
        }
    }

    pub fn get_person(&mut self, person_id: &str) -> Result<Option<Person>> {
        match self.request(Request::Person {
            person_id: person_id.to_string(),
        })? {
            Response::Person { person } => Ok(Some(person)),
            Response::NotFound { .. } => Ok(None),
            other => unexpected(other),
        }
    }

    pub fn add_photo(&mut self, photo_id: &str) -> Result<Photo> {
        match self.request(Request::AddPhoto {
            photo_id: photo_id.to_string(),
        })? {
            Response::Photo { photo } => Ok(photo),
            other => unexpected(other),
        }
    }

    pub fn like(&mut self, user_id: &str, photo_id: &str) -> Result<bool> {
        match self.request(Request::Like {
            user_id: user_id.to_string(),
            photo_id: photo_id.to_string(),
        })? {
            Response::Changed { changed } => Ok(changed),
            other => unexpected(other),
        }
    }

    pub fn unlike(&mut self, user_id: &str, photo_id: &str) -> Result<bool> {
        match self.request(Request::Unlike {
            user_id: user_id.to_string(),
            photo_id: photo_id.to_string(),
        })? {
            Response::Changed { changed } => Ok(changed),
            other => unexpected(other),
        }
    }

    pub fn flag(&mut self, user_id: &str, photo_id: &str) -> Result<()> {
        match self.request(Request::Flag {
            user_id: user_id.to_string(),
            photo_id: photo_id.to_string(),
        })? {
            Response::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    pub fn approve(&mut self, moderator_id: &str, photo_id: &str) -> Result<ModerationState> {
        match self.request(Request::Approve {
            moderator_id: moderator_id.to_string(),
            photo_id: photo_id.to_string(),
        })? {
            Response::Moderation { state } => Ok(state),
            other => unexpected(other),
        }
    }

    pub fn add_comment(&mut self, person_id: &str, photo_id: &str, text: &str) -> Result<Comment> {
        match self.request(Request::Comment {
            person_id: person_id.to_string(),
            photo_id: photo_id.to_string(),
            text: text.to_string(),
        })? {
            Response::Comment { comment } => Ok(comment),
            other => unexpected(other),
        }
    }

    pub fn get_comments(&mut self, photo_id: &str) -> Result<Vec<Comment>> {
        match self.request(Request::Comments {
            photo_id: photo_id.to_string(),
        })? {
            Response::Comments { comments } => Ok(comments),
            other => unexpected(other),
        }
    }

    pub fn profile_for_user(&mut self, user_id: &str, last_date: &str) -> Result<Vec<TimelineEntry>> {
        match self.request(Request::Profile {
            user_id: user_id.to_string(),
            last_date: last_date.to_string(),
        })? {
            Response::Timeline { entries } => Ok(entries),
            other => unexpected(other),
        }
    }

    pub fn get_timeline(&mut self, user_id: &str, last_id: &str) -> Result<Vec<TimelineEntry>> {
        match self.request(Request::Timeline {
            user_id: user_id.to_string(),
            last_id: last_id.to_string(),
        })? {
            Response::Timeline { entries } => Ok(entries),
            other => unexpected(other),
        }
    }

    pub fn delete_user(&mut self, user_id: &str) -> Result<()> {
        match self.request(Request::Wipeout {
            user_id: user_id.to_string(),
        })? {
            Response::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    /// Run due background tasks now instead of waiting for the next tick.
    pub fn drain(&mut self) -> Result<DrainReport> {
        match self.request(Request::Drain)? {
            Response::Drained { report } => Ok(report),
            other => unexpected(other),
        }
    }

    /// Shutdown the daemon.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.request(Request::Shutdown)? {
            Response::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    /// Ping the daemon.
    pub fn ping(&mut self) -> Result<()> {
        match self.request(Request::Ping)? {
            Response::Pong => Ok(()),
            other => unexpected(other),
        }
    }
}
