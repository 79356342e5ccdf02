use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Form, Router,
};
use serde::Deserialize;
use tracing::{error, warn};

use crate::db::{Article, Database, Project, ProjectDetail, Subscriber, SubscriberStats};
use crate::feed::FeedPage;
use crate::ingest::Ingestor;
use crate::newsletter::{self, normalize_email};
use crate::session::{FeedSession, FeedSessions};
use crate::sensor::Geometry;
use crate::submission::{self, ContentSubmission, ContentType};

const ARTICLES_PER_PAGE: i64 = 15;
const HOME_LATEST: i64 = 12;
const HOME_SIDEBAR: i64 = 5;
const HOME_FEATURED: i64 = 3;
const TAG_LIMIT: i64 = 30;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Arc<Ingestor>,
    pub sessions: Arc<FeedSessions>,
}

/// All application routes, without static files or middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/category/:name", get(category))
        .route("/news", post(submit_news))
        .route("/news/:slug", get(article))
        .route("/content", post(submit_content))
        .route("/projects/:kind", get(projects))
        .route("/projects/:kind/:slug", get(project))
        .route("/search", get(search))
        .route("/tag/:tag", get(tag))
        .route("/feed/:session", delete(close_feed))
        .route("/feed/:session/more", get(feed_more))
        .route("/feed/:session/visibility", post(feed_visibility))
        .route("/feed/:session/reset", post(feed_reset))
        .route("/newsletter/subscribe", post(subscribe))
        .route("/newsletter/unsubscribe", post(unsubscribe))
        .route("/newsletter/admin", get(newsletter_admin))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/health", get(health))
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub featured: Vec<Article>,
    pub latest: Vec<Article>,
    pub breaking: Vec<Article>,
    pub trending: Vec<Article>,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "category.html")]
pub struct CategoryTemplate {
    pub category: String,
    pub articles: Vec<Article>,
    pub total: i64,
    pub next_offset: i64,
    pub has_more: bool,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "article.html")]
pub struct ArticleTemplate {
    pub article: Article,
    pub session_id: String,
    pub articles: Vec<Article>,
    pub has_reached_end: bool,
    pub stalled: bool,
    pub threshold: f64,
    pub root_margin: String,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "feed_items.html")]
pub struct FeedItemsTemplate {
    pub session_id: String,
    pub articles: Vec<Article>,
    pub has_reached_end: bool,
    /// Nothing came back and the feed is not finished: offer a manual retry.
    pub stalled: bool,
    pub threshold: f64,
    pub root_margin: String,
}

impl FeedItemsTemplate {
    fn new(session: &FeedSession, page: FeedPage) -> Self {
        Self {
            session_id: session.id.clone(),
            stalled: page.is_stalled(),
            articles: page.articles,
            has_reached_end: page.has_reached_end,
            threshold: session.threshold(),
            root_margin: session.root_margin(),
        }
    }
}

#[derive(Template)]
#[template(path = "search.html")]
pub struct SearchTemplate {
    pub query: String,
    pub articles: Vec<Article>,
    pub next_offset: i64,
    pub has_more: bool,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "tag.html")]
pub struct TagTemplate {
    pub tag: String,
    pub articles: Vec<Article>,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "projects.html")]
pub struct ProjectsTemplate {
    pub heading: String,
    pub kind: String,
    pub projects: Vec<Project>,
    pub next_offset: i64,
    pub has_more: bool,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "project.html")]
pub struct ProjectTemplate {
    pub heading: String,
    pub project: Project,
    pub details: Vec<ProjectDetail>,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "newsletter_admin.html")]
pub struct NewsletterAdminTemplate {
    pub stats: SubscriberStats,
    pub subscribers: Vec<Subscriber>,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "newsletter_result.html")]
pub struct NewsletterResultTemplate {
    pub success: bool,
    pub message: String,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        askama_axum::into_response(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(e) => {
                error!("Request failed: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, format!("Error: {}", self)).into_response()
    }
}

async fn find_session(state: &AppState, id: &str) -> Result<Arc<FeedSession>, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or(AppError::NotFound("Feed session"))
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let featured = state.db.get_featured_articles(HOME_FEATURED).await?;
    let latest = state.db.get_latest_articles(HOME_LATEST, 0).await?;
    let breaking = state.db.get_breaking_articles(HOME_SIDEBAR).await?;
    let trending = state.db.get_trending_articles(HOME_SIDEBAR).await?;

    Ok(HtmlTemplate(IndexTemplate {
        featured,
        latest,
        breaking,
        trending,
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

#[derive(Deserialize)]
pub struct MoreQuery {
    #[serde(default)]
    pub offset: i64,
}

pub async fn category(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<MoreQuery>,
) -> Result<impl IntoResponse, AppError> {
    let offset = query.offset.max(0);
    let articles = state
        .db
        .get_articles_by_category(&name, ARTICLES_PER_PAGE, offset)
        .await?;
    let total = state.db.get_article_count_for_category(&name).await?;

    Ok(HtmlTemplate(CategoryTemplate {
        category: name,
        articles,
        total,
        next_offset: offset + ARTICLES_PER_PAGE,
        has_more: offset + ARTICLES_PER_PAGE < total,
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

/// Article page. Opens a related feed session seeded with the article.
pub async fn article(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let article = state
        .db
        .get_article_by_slug(&slug)
        .await?
        .ok_or(AppError::NotFound("Article"))?;

    if let Err(e) = state.db.increment_views(&article.id).await {
        warn!("Could not count view for '{}': {}", slug, e);
    }

    let (session, page) = state.sessions.open(article.clone()).await;
    let stalled = page.is_stalled();

    Ok(HtmlTemplate(ArticleTemplate {
        article,
        session_id: session.id.clone(),
        articles: page.articles,
        has_reached_end: page.has_reached_end,
        stalled,
        threshold: session.threshold(),
        root_margin: session.root_margin(),
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

pub async fn feed_more(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = find_session(&state, &session_id).await?;
    let page = session.load_more().await;
    Ok(HtmlTemplate(FeedItemsTemplate::new(&session, page)))
}

/// Sentinel position report. 204 unless the sentinel just came into view.
pub async fn feed_visibility(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Form(geometry): Form<Geometry>,
) -> Result<Response, AppError> {
    let session = find_session(&state, &session_id).await?;
    match session.on_visibility(&geometry).await {
        Some(page) => Ok(HtmlTemplate(FeedItemsTemplate::new(&session, page)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn feed_reset(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = find_session(&state, &session_id).await?;
    let page = session.reset().await;
    Ok(HtmlTemplate(FeedItemsTemplate::new(&session, page)))
}

pub async fn close_feed(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.sessions.close(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Feed session"))
    }
}

/// Editor submission of a news story. `content_type` defaults to news.
pub async fn submit_news(
    State(state): State<Arc<AppState>>,
    Form(mut form): Form<ContentSubmission>,
) -> Result<Response, AppError> {
    if form.content_type.trim().is_empty() {
        form.content_type = ContentType::News.as_str().to_string();
    }
    create_content(&state, form).await
}

/// Editor submission of any content type; `content_type` is required.
pub async fn submit_content(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ContentSubmission>,
) -> Result<Response, AppError> {
    create_content(&state, form).await
}

async fn create_content(state: &AppState, form: ContentSubmission) -> Result<Response, AppError> {
    let submission = form.validate().map_err(AppError::BadRequest)?;
    let published = submission::publish(&state.db, submission).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, published.path())],
        published.slug,
    )
        .into_response())
}

fn project_kind(raw: &str) -> Result<ContentType, AppError> {
    ContentType::project(raw).ok_or(AppError::NotFound("Content type"))
}

fn heading(kind: ContentType) -> String {
    match kind {
        ContentType::News => "News",
        ContentType::Airdrop => "Airdrops",
        ContentType::Nft => "NFT Drops",
        ContentType::Defi => "DeFi Protocols",
        ContentType::Listing => "Listings",
    }
    .to_string()
}

pub async fn projects(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<MoreQuery>,
) -> Result<impl IntoResponse, AppError> {
    let kind = project_kind(&kind)?;
    let offset = query.offset.max(0);
    let mut projects = state
        .db
        .get_projects(kind.as_str(), ARTICLES_PER_PAGE + 1, offset)
        .await?;
    let has_more = projects.len() as i64 > ARTICLES_PER_PAGE;
    projects.truncate(ARTICLES_PER_PAGE as usize);

    Ok(HtmlTemplate(ProjectsTemplate {
        heading: heading(kind),
        kind: kind.as_str().to_string(),
        projects,
        next_offset: offset + ARTICLES_PER_PAGE,
        has_more,
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

pub async fn project(
    State(state): State<Arc<AppState>>,
    Path((kind, slug)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let kind = project_kind(&kind)?;
    let project = state
        .db
        .get_project(kind.as_str(), &slug)
        .await?
        .ok_or(AppError::NotFound("Project"))?;

    if let Err(e) = state.db.increment_project_views(&project.id).await {
        warn!("Could not count view for '{}': {}", slug, e);
    }
    let details = state.db.get_project_details(&project.id).await?;

    Ok(HtmlTemplate(ProjectTemplate {
        heading: heading(kind),
        project,
        details,
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub offset: i64,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let text = query.q.trim().to_string();
    let offset = query.offset.max(0);
    let mut articles = state
        .db
        .search_articles(&text, ARTICLES_PER_PAGE + 1, offset)
        .await?;
    let has_more = articles.len() as i64 > ARTICLES_PER_PAGE;
    articles.truncate(ARTICLES_PER_PAGE as usize);

    Ok(HtmlTemplate(SearchTemplate {
        query: text,
        articles,
        next_offset: offset + ARTICLES_PER_PAGE,
        has_more,
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

pub async fn tag(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let articles = state.db.get_articles_by_tag(&tag, TAG_LIMIT).await?;

    Ok(HtmlTemplate(TagTemplate {
        tag,
        articles,
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

#[derive(Deserialize)]
pub struct NewsletterForm {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

fn valid_email(raw: &str) -> Result<String, AppError> {
    normalize_email(raw)
        .ok_or_else(|| AppError::BadRequest("Please enter a valid email address".to_string()))
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Form(form): Form<NewsletterForm>,
) -> Result<impl IntoResponse, AppError> {
    let email = valid_email(&form.email)?;
    let outcome =
        newsletter::subscribe(&state.db, &email, &form.first_name, &form.last_name).await?;
    let first_name = match form.first_name.trim() {
        "" => "Reader",
        name => name,
    };

    Ok(HtmlTemplate(NewsletterResultTemplate {
        success: outcome.is_success(),
        message: outcome.message(first_name),
    }))
}

pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Form(form): Form<NewsletterForm>,
) -> Result<impl IntoResponse, AppError> {
    let email = valid_email(&form.email)?;
    let outcome = newsletter::unsubscribe(&state.db, &email).await?;

    Ok(HtmlTemplate(NewsletterResultTemplate {
        success: outcome.is_success(),
        message: outcome.message().to_string(),
    }))
}

pub async fn newsletter_admin(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let stats = newsletter::stats(&state.db).await?;
    let subscribers = state.db.get_active_subscribers().await?;

    Ok(HtmlTemplate(NewsletterAdminTemplate {
        stats,
        subscribers,
        refreshing: state.ingestor.is_refreshing().await,
    }))
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let ingestor = state.ingestor.clone();
    tokio::spawn(async move {
        let _ = ingestor.refresh_all_sources().await;
    });

    Ok(HtmlTemplate(RefreshButtonTemplate { refreshing: true }))
}

pub async fn refresh_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let refreshing = state.ingestor.is_refreshing().await;
    Ok(HtmlTemplate(RefreshButtonTemplate { refreshing }))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
