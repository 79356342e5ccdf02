//! Registry of open related feeds, one per article page view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{FeedSettings, SensorSettings};
use crate::db::Article;
use crate::feed::{FeedLoader, FeedPage};
use crate::repository::ContentRepository;
use crate::sensor::{Geometry, Sentinel};

pub struct FeedSession {
    pub id: String,
    pub loader: FeedLoader,
    sentinel: Mutex<Sentinel>,
    last_seen: Mutex<Instant>,
}

impl FeedSession {
    fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .map(|last_seen| last_seen.elapsed())
            .unwrap_or_default()
    }

    pub fn threshold(&self) -> f64 {
        self.sentinel.lock().map(|s| s.threshold()).unwrap_or_default()
    }

    pub fn root_margin(&self) -> String {
        self.sentinel
            .lock()
            .map(|s| s.root_margin())
            .unwrap_or_default()
    }

    pub fn is_attached(&self) -> bool {
        self.sentinel.lock().map(|s| s.is_attached()).unwrap_or(false)
    }

    pub async fn load_more(&self) -> FeedPage {
        self.touch();
        let page = self.loader.load_more().await;
        self.rearm_after(&page);
        page
    }

    /// Feed a sentinel position report; loads the next page when the
    /// sentinel has just come into view.
    ///
    /// An empty page that is not the end (a failed fetch) leaves the
    /// sentinel in view, so the next attempt needs it to leave and
    /// re-enter, or an explicit [`FeedSession::load_more`].
    pub async fn on_visibility(&self, geometry: &Geometry) -> Option<FeedPage> {
        self.touch();
        let fired = self
            .sentinel
            .lock()
            .map(|mut s| s.observe(geometry))
            .unwrap_or(false);
        if !fired {
            return None;
        }
        let page = self.loader.load_more().await;
        self.rearm_after(&page);
        Some(page)
    }

    pub async fn reset(&self) -> FeedPage {
        self.touch();
        let page = self.loader.reset().await;
        self.rearm_after(&page);
        page
    }

    // New cards push a fresh sentinel below them.
    fn rearm_after(&self, page: &FeedPage) {
        if page.articles.is_empty() {
            return;
        }
        if let Ok(mut sentinel) = self.sentinel.lock() {
            sentinel.rearm();
        }
    }

    fn detach(&self) {
        if let Ok(mut sentinel) = self.sentinel.lock() {
            sentinel.detach();
        }
    }
}

pub struct FeedSessions {
    repo: Arc<dyn ContentRepository>,
    feed: FeedSettings,
    sensor: SensorSettings,
    sessions: RwLock<HashMap<String, Arc<FeedSession>>>,
}

impl FeedSessions {
    pub fn new(repo: Arc<dyn ContentRepository>, feed: FeedSettings, sensor: SensorSettings) -> Self {
        Self {
            repo,
            feed,
            sensor,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a related feed for `seed` and load its first page.
    pub async fn open(&self, seed: Article) -> (Arc<FeedSession>, FeedPage) {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(FeedSession {
            id: id.clone(),
            loader: FeedLoader::new(self.repo.clone(), seed, self.feed.clone()),
            sentinel: Mutex::new(Sentinel::new(self.sensor.clone())),
            last_seen: Mutex::new(Instant::now()),
        });

        let first_page = session.loader.initialize().await;
        debug!(
            "Opened feed session {} for '{}'",
            id,
            session.loader.seed().slug
        );

        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), session.clone());
        while sessions.len() > self.feed.max_sessions.max(1) {
            let Some(stalest) = sessions
                .iter()
                .filter(|(key, _)| **key != id)
                .max_by_key(|(_, s)| s.idle_for())
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            if let Some(evicted) = sessions.remove(&stalest) {
                evicted.detach();
                info!("Evicted feed session {} (limit {})", stalest, self.feed.max_sessions);
            }
        }
        drop(sessions);

        (session, first_page)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<FeedSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Tear down a session. A load still running finishes on its own and
    /// its result goes nowhere.
    pub async fn close(&self, id: &str) -> bool {
        match self.sessions.write().await.remove(id) {
            Some(session) => {
                session.detach();
                debug!("Closed feed session {}", id);
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        for session in sessions.values() {
            session.detach();
        }
        let count = sessions.len();
        sessions.clear();
        info!("Closed {} feed sessions", count);
        count
    }

    /// Drop sessions idle for longer than `ttl`.
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            let keep = session.idle_for() <= ttl;
            if !keep {
                session.detach();
            }
            keep
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Swept {} idle feed sessions", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

pub async fn start_session_sweeper(sessions: Arc<FeedSessions>, ttl: Duration) {
    let period = (ttl / 2).max(Duration::from_secs(1));
    loop {
        tokio::time::sleep(period).await;
        sessions.sweep_idle(ttl).await;
    }
}
