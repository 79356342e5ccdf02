//! Related-article feed shown below an article page.
//!
//! The loader keeps a shuffled pool of same-category articles and reveals it
//! one page at a time. Every article id revealed in a session is remembered,
//! so refilling the pool from the repository never repeats an article.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::FeedSettings;
use crate::db::Article;
use crate::repository::ContentRepository;

/// Articles appended to the feed by one loader step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub articles: Vec<Article>,
    pub has_reached_end: bool,
}

impl FeedPage {
    /// Nothing revealed although the feed is not finished, e.g. a failed fetch.
    pub fn is_stalled(&self) -> bool {
        self.articles.is_empty() && !self.has_reached_end
    }
}

/// Point-in-time copy of the loader state.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub visible: Vec<Article>,
    pub shown_ids: HashSet<String>,
    pub pool_len: usize,
    pub cursor: usize,
    pub is_loading_more: bool,
    pub has_reached_end: bool,
}

#[derive(Debug, Default)]
struct FeedState {
    shown_ids: HashSet<String>,
    available_pool: Vec<Article>,
    cursor: usize,
    visible: Vec<Article>,
    is_loading_more: bool,
    has_reached_end: bool,
    /// Bumped whenever the state is cleared; a fetch started under an older
    /// generation is dropped when it completes.
    generation: u64,
}

impl FeedState {
    fn clear(&mut self, seed_id: &str) {
        self.shown_ids.clear();
        self.shown_ids.insert(seed_id.to_string());
        self.available_pool.clear();
        self.cursor = 0;
        self.visible.clear();
        self.is_loading_more = false;
        self.has_reached_end = false;
        self.generation += 1;
    }

    /// Reveal up to `count` pooled articles starting at the cursor.
    fn serve_from_pool(&mut self, count: usize) -> Vec<Article> {
        let start = self.cursor.min(self.available_pool.len());
        let end = (start + count).min(self.available_pool.len());
        let batch = self.available_pool[start..end].to_vec();

        self.cursor = end;
        for article in &batch {
            self.shown_ids.insert(article.id.clone());
        }
        self.visible.extend_from_slice(&batch);
        batch
    }
}

/// Drop anything already shown (and repeats within the batch), then shuffle.
fn build_pool(batch: Vec<Article>, exclude: &HashSet<String>) -> Vec<Article> {
    let mut seen = HashSet::new();
    let mut pool: Vec<Article> = batch
        .into_iter()
        .filter(|article| !exclude.contains(&article.id) && seen.insert(article.id.clone()))
        .collect();
    pool.shuffle(&mut rand::thread_rng());
    pool
}

pub struct FeedLoader {
    repo: Arc<dyn ContentRepository>,
    settings: FeedSettings,
    seed: Article,
    state: RwLock<FeedState>,
}

impl FeedLoader {
    pub fn new(repo: Arc<dyn ContentRepository>, seed: Article, settings: FeedSettings) -> Self {
        let mut state = FeedState::default();
        state.clear(&seed.id);

        Self {
            repo,
            settings,
            seed,
            state: RwLock::new(state),
        }
    }

    pub fn seed(&self) -> &Article {
        &self.seed
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Fetch the first batch for the seed's category and reveal the first page.
    ///
    /// A repository failure here leaves an empty, finished feed; the page
    /// itself still renders.
    pub async fn initialize(&self) -> FeedPage {
        let generation = {
            let mut state = self.state.write().await;
            state.clear(&self.seed.id);
            // Scroll triggers before the first batch lands are ignored.
            state.is_loading_more = true;
            state.generation
        };

        let fetched = self
            .repo
            .fetch_by_category(&self.seed.category, self.settings.initial_batch)
            .await;

        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Discarding stale initial batch for '{}'", self.seed.slug);
            return FeedPage::default();
        }
        state.is_loading_more = false;

        let batch = fetched.unwrap_or_else(|e| {
            warn!(
                "Failed to fetch related articles for '{}': {}",
                self.seed.slug, e
            );
            Vec::new()
        });

        state.available_pool = build_pool(batch, &state.shown_ids);
        let articles = state.serve_from_pool(self.settings.page_size);
        state.has_reached_end = state.available_pool.len() <= self.settings.page_size;

        debug!(
            "Feed for '{}' initialized: pool {}, revealed {}",
            self.seed.slug,
            state.available_pool.len(),
            articles.len()
        );

        FeedPage {
            articles,
            has_reached_end: state.has_reached_end,
        }
    }

    /// Reveal the next page. A no-op while another load is running or once
    /// the feed has reached its end.
    pub async fn load_more(&self) -> FeedPage {
        let page_size = self.settings.page_size;

        let (generation, mut page, open_slots) = {
            let mut state = self.state.write().await;
            if state.is_loading_more || state.has_reached_end {
                debug!("Load more for '{}' skipped", self.seed.slug);
                return FeedPage {
                    articles: Vec::new(),
                    has_reached_end: state.has_reached_end,
                };
            }
            state.is_loading_more = true;

            let served = state.serve_from_pool(page_size);
            if served.len() == page_size {
                state.is_loading_more = false;
                return FeedPage {
                    articles: served,
                    has_reached_end: false,
                };
            }

            let open_slots = page_size - served.len();
            let page = FeedPage {
                articles: served,
                has_reached_end: false,
            };
            (state.generation, page, open_slots)
        };

        // Pool is drained: pause briefly, then refill from the repository.
        let delay = self.settings.replenish_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let fetched = self
            .repo
            .fetch_by_category(&self.seed.category, self.settings.replenish_batch)
            .await;

        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Discarding stale feed page for '{}'", self.seed.slug);
            return FeedPage {
                articles: Vec::new(),
                has_reached_end: state.has_reached_end,
            };
        }
        state.is_loading_more = false;

        match fetched {
            Err(e) => {
                warn!(
                    "Failed to replenish related articles for '{}': {}",
                    self.seed.slug, e
                );
            }
            Ok(batch) => {
                let fresh = build_pool(batch, &state.shown_ids);
                if fresh.is_empty() {
                    info!("Related feed for '{}' reached its end", self.seed.slug);
                    state.has_reached_end = true;
                } else {
                    let short = fresh.len() < open_slots;
                    let take = fresh.len().min(open_slots);
                    state.available_pool.extend(fresh);
                    page.articles.extend(state.serve_from_pool(take));
                    if short {
                        state.has_reached_end = true;
                    }
                }
            }
        }

        page.has_reached_end = state.has_reached_end;
        page
    }

    /// Forget everything shown in this session and start over.
    pub async fn reset(&self) -> FeedPage {
        info!("Resetting related feed for '{}'", self.seed.slug);
        {
            let mut state = self.state.write().await;
            state.clear(&self.seed.id);
        }
        self.initialize().await
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let state = self.state.read().await;
        FeedSnapshot {
            visible: state.visible.clone(),
            shown_ids: state.shown_ids.clone(),
            pool_len: state.available_pool.len(),
            cursor: state.cursor,
            is_loading_more: state.is_loading_more,
            has_reached_end: state.has_reached_end,
        }
    }

    pub async fn has_reached_end(&self) -> bool {
        self.state.read().await.has_reached_end
    }
}
