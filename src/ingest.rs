use std::sync::Arc;
use std::time::Duration;

use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::content::{estimate_read_time, excerpt, slugify, strip_html};
use crate::db::{Database, NewArticle, Source};

const EXCERPT_CHARS: usize = 200;

pub struct Ingestor {
    client: Client,
    db: Arc<Database>,
    refreshing: Arc<RwLock<bool>>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("CryptoFlowNews/1.0 (News Portal)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            db,
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    pub async fn refresh_all_sources(&self) -> anyhow::Result<()> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Ingest already in progress, skipping");
                return Ok(());
            }
            *refreshing = true;
        }

        let result = self.do_refresh_all().await;

        *self.refreshing.write().await = false;

        result
    }

    async fn do_refresh_all(&self) -> anyhow::Result<()> {
        let sources = self.db.get_all_sources().await?;
        info!("Ingesting {} sources", sources.len());

        for source in sources {
            let outcome = self.refresh_source(&source).await;
            let error = outcome.as_ref().err().map(|e| e.to_string());
            if let Some(message) = &error {
                error!("Failed to ingest source '{}': {}", source.name, message);
            }
            if let Err(e) = self
                .db
                .update_source_fetched(source.id, error.as_deref())
                .await
            {
                warn!("Could not record fetch for '{}': {}", source.name, e);
            }
        }

        info!("Ingest complete");
        Ok(())
    }

    /// Fetch one source and upsert its entries. Returns how many were stored.
    pub async fn refresh_source(&self, source: &Source) -> anyhow::Result<usize> {
        info!("Fetching source: {} ({})", source.name, source.url);

        let response = self.client.get(&source.url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let parsed = parser::parse(&bytes[..])?;

        let mut count = 0;
        for entry in &parsed.entries {
            let Some(mut article) = Self::article_from_entry(source, entry) else {
                warn!("Skipping untitled entry {} from '{}'", entry.id, source.name);
                continue;
            };
            self.db.upsert_article_with_free_slug(&mut article).await?;
            count += 1;
        }

        info!("Added/updated {} articles from '{}'", count, source.name);
        Ok(count)
    }

    /// Map a feed entry onto an article in the source's category.
    /// `None` when the title has nothing to build a slug from.
    pub fn article_from_entry(source: &Source, entry: &Entry) -> Option<NewArticle> {
        let title = entry
            .title
            .as_ref()
            .map(|t| strip_html(&t.content))
            .unwrap_or_default();
        let slug = slugify(&title);
        if slug.is_empty() {
            return None;
        }

        let summary = entry
            .summary
            .as_ref()
            .map(|t| strip_html(&t.content))
            .unwrap_or_default();
        let content = entry
            .content
            .as_ref()
            .and_then(|c| c.body.as_deref())
            .map(strip_html)
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| summary.clone());
        let lead = if summary.is_empty() { &content } else { &summary };

        Some(NewArticle {
            id: format!("{}:{}", slugify(&source.name), entry.id),
            slug,
            excerpt: excerpt(lead, EXCERPT_CHARS),
            read_time: estimate_read_time(&content),
            content,
            title,
            image: None,
            source_url: entry.links.first().map(|l| l.href.clone()),
            category: source.category.clone(),
            author_name: source.name.clone(),
            location: String::new(),
            tags: entry.categories.iter().map(|c| c.term.clone()).collect(),
            is_breaking: false,
            is_featured: false,
            is_trending: false,
            published_at: entry.published.or(entry.updated).map(|dt| dt.to_rfc3339()),
        })
    }
}

pub async fn start_background_refresh(ingestor: Arc<Ingestor>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial ingest");
    if let Err(e) = ingestor.refresh_all_sources().await {
        error!("Initial ingest failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled ingest");
        if let Err(e) = ingestor.refresh_all_sources().await {
            error!("Scheduled ingest failed: {}", e);
        }
    }
}
