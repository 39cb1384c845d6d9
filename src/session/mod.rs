//! Per-session state. Each session owns its own context object (no
//! ambient globals): the spooled upload, the single report slot and the
//! last simplified text, guarded by the phase machine below.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::media::SpooledImage;

/// Session timeout (30 minutes of inactivity)
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Maximum number of concurrent sessions
pub const MAX_SESSIONS: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    ImageUploaded,
    Analyzing,
    ReportShown,
    Simplifying,
    SimplifiedShown,
    /// A model call failed. The error message is retained for display;
    /// a new upload leaves this state.
    Failed,
}

#[derive(Debug, Default)]
pub struct Session {
    phase: Phase,
    upload: Option<SpooledImage>,
    report: Option<String>,
    simplified: Option<String>,
    error: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    pub fn simplified(&self) -> Option<&str> {
        self.simplified.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn upload(&self) -> Option<&SpooledImage> {
        self.upload.as_ref()
    }

    /// Store a fresh upload, replacing (and deleting) any previous one.
    /// A stored report is intentionally left visible until a new
    /// analysis overwrites it.
    pub fn attach_image(&mut self, image: SpooledImage) {
        self.upload = Some(image);
        self.error = None;
        self.phase = Phase::ImageUploaded;
    }

    /// Take the upload for analysis. The caller owns the spooled file
    /// from here on, so it is deleted when the analysis scope ends,
    /// whatever the outcome. Returns None if nothing was uploaded.
    pub fn begin_analysis(&mut self) -> Option<SpooledImage> {
        let image = self.upload.take()?;
        self.phase = Phase::Analyzing;
        Some(image)
    }

    /// Store the report. At most one report is retained: a second
    /// analysis overwrites, never appends.
    pub fn complete_analysis(&mut self, report: String) {
        self.report = Some(report);
        self.simplified = None;
        self.error = None;
        self.phase = Phase::ReportShown;
    }

    /// Take a copy of the stored report for simplification. Returns
    /// None if no report is stored.
    pub fn begin_simplify(&mut self) -> Option<String> {
        let report = self.report.clone()?;
        self.phase = Phase::Simplifying;
        Some(report)
    }

    pub fn complete_simplify(&mut self, simplified: String) {
        self.simplified = Some(simplified);
        self.phase = Phase::SimplifiedShown;
    }

    /// The "No" branch of the simplify choice. Never touches the
    /// provider; just drops any previously rendered simplification.
    pub fn decline_simplify(&mut self) {
        self.simplified = None;
        if self.phase() == Phase::SimplifiedShown {
            self.phase = Phase::ReportShown;
        }
    }

    pub fn fail(&mut self, message: String) {
        self.error = Some(message);
        self.phase = Phase::Failed;
    }
}

struct SessionEntry {
    session: Arc<Mutex<Session>>,
    last_accessed: Instant,
}

/// Session cache keyed by id. Each session is independent; locking one
/// session for a blocking model call does not block the others.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a session by id, refreshing its access time.
    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(id)?;
        entry.last_accessed = Instant::now();
        Some(entry.session.clone())
    }

    /// Get an existing session or create a new one. When the cache is
    /// full the oldest session is evicted to make room.
    pub async fn get_or_create(&self, id: Option<String>) -> (String, Arc<Mutex<Session>>) {
        let mut sessions = self.sessions.lock().await;

        if let Some(ref id) = id {
            if let Some(entry) = sessions.get_mut(id) {
                entry.last_accessed = Instant::now();
                return (id.clone(), entry.session.clone());
            }
        }

        if sessions.len() >= MAX_SESSIONS {
            if let Some(oldest_id) = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(id, _)| id.clone())
            {
                sessions.remove(&oldest_id);
                info!("Removed oldest session {} to make room", oldest_id);
            }
        }

        let new_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = Arc::new(Mutex::new(Session::new()));
        sessions.insert(
            new_id.clone(),
            SessionEntry {
                session: session.clone(),
                last_accessed: Instant::now(),
            },
        );

        info!("Created new session: {}", new_id);
        (new_id, session)
    }

    /// Drop sessions idle for longer than `SESSION_TIMEOUT`. Returns
    /// the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_idle(SESSION_TIMEOUT).await
    }

    /// Drop sessions idle for longer than `max_idle`.
    pub async fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before_count = sessions.len();

        sessions.retain(|id, entry| {
            let expired = entry.last_accessed.elapsed() > max_idle;
            if expired {
                debug!("Expiring session: {}", id);
            }
            !expired
        });

        let removed = before_count - sessions.len();
        if removed > 0 {
            info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
