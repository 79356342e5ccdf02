use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::config::SourceConfig;
use crate::content::{parse_tags, time_ago};

#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct Article {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub image: Option<String>,
    pub source_url: Option<String>,
    pub category: String,
    pub author_name: String,
    pub location: String,
    pub tags: String,
    pub is_breaking: bool,
    pub is_featured: bool,
    pub is_trending: bool,
    pub read_time: i64,
    pub views: i64,
    pub published_at: Option<String>,
    pub created_at: String,
}

impl Article {
    pub fn tag_list(&self) -> Vec<String> {
        parse_tags(&self.tags)
    }

    pub fn time_ago(&self) -> String {
        let when = self.published_at.as_deref().unwrap_or(&self.created_at);
        time_ago(Some(when), Utc::now())
    }
}

/// Fields supplied when creating or refreshing an article.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub image: Option<String>,
    pub source_url: Option<String>,
    pub category: String,
    pub author_name: String,
    pub location: String,
    pub tags: Vec<String>,
    pub is_breaking: bool,
    pub is_featured: bool,
    pub is_trending: bool,
    pub read_time: i64,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category: String,
    pub last_fetched: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Subscriber {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub preferences: String,
    pub is_active: bool,
    pub subscribed_at: String,
    pub unsubscribed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, FromRow, PartialEq, Eq)]
pub struct SubscriberStats {
    pub active: i64,
    pub total: i64,
    pub recent: i64,
}

impl SubscriberStats {
    /// Recent sign-ups as a whole percentage of active subscribers.
    pub fn growth_rate(&self) -> i64 {
        if self.active == 0 {
            return 0;
        }
        (self.recent as f64 / self.active as f64 * 100.0).round() as i64
    }
}

/// A non-news listing: airdrop, NFT drop, DeFi protocol or exchange listing.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct Project {
    pub id: String,
    pub kind: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub category: String,
    pub author_name: String,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub discord: Option<String>,
    pub tags: String,
    pub is_active: bool,
    pub is_featured: bool,
    pub is_verified: bool,
    pub views: i64,
    pub created_at: String,
}

impl Project {
    pub fn tag_list(&self) -> Vec<String> {
        parse_tags(&self.tags)
    }

    pub fn time_ago(&self) -> String {
        time_ago(Some(&self.created_at), Utc::now())
    }
}

/// One labelled fact about a project, e.g. "Mint price" = "0.05 ETH".
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct ProjectDetail {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub id: String,
    pub kind: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub category: String,
    pub author_name: String,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub discord: Option<String>,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub is_featured: bool,
    pub is_verified: bool,
    pub details: Vec<(String, String)>,
}

const SLUG_ATTEMPTS: usize = 32;

const INSERT_ARTICLE: &str = r#"
    INSERT INTO articles (
        id, slug, title, excerpt, content, image, source_url, category,
        author_name, location, tags, is_breaking, is_featured, is_trending,
        read_time, published_at, created_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPSERT_ARTICLE: &str = r#"
    INSERT INTO articles (
        id, slug, title, excerpt, content, image, source_url, category,
        author_name, location, tags, is_breaking, is_featured, is_trending,
        read_time, published_at, created_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        title = excluded.title,
        excerpt = excluded.excerpt,
        content = excluded.content,
        image = COALESCE(excluded.image, image),
        source_url = excluded.source_url,
        category = excluded.category,
        read_time = excluded.read_time,
        published_at = excluded.published_at
"#;

/// SQLite reports unique violations as "UNIQUE constraint failed: table.column".
fn is_unique_violation_on(error: &sqlx::Error, column: &str) -> bool {
    match error {
        sqlx::Error::Database(e) => e.is_unique_violation() && e.message().contains(column),
        _ => false,
    }
}

/// Escape LIKE wildcards so user text matches literally (used with `ESCAPE '\'`).
fn like_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                excerpt TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                image TEXT,
                source_url TEXT,
                category TEXT NOT NULL,
                author_name TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '',
                is_breaking INTEGER NOT NULL DEFAULT 0,
                is_featured INTEGER NOT NULL DEFAULT 0,
                is_trending INTEGER NOT NULL DEFAULT 0,
                read_time INTEGER NOT NULL DEFAULT 5,
                views INTEGER NOT NULL DEFAULT 0,
                published_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_category_published
            ON articles(category, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                last_fetched TEXT,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS newsletter_subscribers (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL DEFAULT '',
                preferences TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                subscribed_at TEXT NOT NULL,
                unsubscribed_at TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                slug TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                image TEXT,
                category TEXT NOT NULL,
                author_name TEXT NOT NULL DEFAULT '',
                website TEXT,
                twitter TEXT,
                discord TEXT,
                tags TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                is_featured INTEGER NOT NULL DEFAULT 0,
                is_verified INTEGER NOT NULL DEFAULT 0,
                views INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(kind, slug)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS project_details (
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                label TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (project_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Articles

    pub async fn insert_article(&self, article: &NewArticle) -> anyhow::Result<()> {
        self.write_article(INSERT_ARTICLE, article).await?;
        Ok(())
    }

    /// Insert, or refresh the text of an article already stored under the same id.
    /// Slug and view count of an existing article are left untouched.
    pub async fn upsert_article(&self, article: &NewArticle) -> anyhow::Result<()> {
        self.write_article(UPSERT_ARTICLE, article).await?;
        Ok(())
    }

    /// Insert `article` under the first free slug derived from `article.slug`.
    /// The chosen slug is written back into `article`.
    pub async fn insert_article_with_free_slug(
        &self,
        article: &mut NewArticle,
    ) -> anyhow::Result<()> {
        self.write_article_with_free_slug(INSERT_ARTICLE, article).await
    }

    /// Upsert counterpart of [`Database::insert_article_with_free_slug`].
    pub async fn upsert_article_with_free_slug(
        &self,
        article: &mut NewArticle,
    ) -> anyhow::Result<()> {
        self.write_article_with_free_slug(UPSERT_ARTICLE, article).await
    }

    // Another writer can claim the candidate between the lookup and the write.
    // The unique index rejects that write and the next candidate is tried.
    async fn write_article_with_free_slug(
        &self,
        sql: &'static str,
        article: &mut NewArticle,
    ) -> anyhow::Result<()> {
        let base = article.slug.clone();
        for _ in 0..SLUG_ATTEMPTS {
            article.slug = self.unique_slug(&base, &article.id).await?;
            match self.write_article(sql, article).await {
                Err(e) if is_unique_violation_on(&e, "articles.slug") => {
                    debug!("Slug '{}' was claimed concurrently, retrying", article.slug);
                }
                result => return Ok(result?),
            }
        }
        anyhow::bail!("No free slug for '{}' after {} attempts", base, SLUG_ATTEMPTS)
    }

    async fn write_article(&self, sql: &'static str, article: &NewArticle) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(sql)
            .bind(&article.id)
            .bind(&article.slug)
            .bind(&article.title)
            .bind(&article.excerpt)
            .bind(&article.content)
            .bind(&article.image)
            .bind(&article.source_url)
            .bind(&article.category)
            .bind(&article.author_name)
            .bind(&article.location)
            .bind(article.tags.join(","))
            .bind(article.is_breaking)
            .bind(article.is_featured)
            .bind(article.is_trending)
            .bind(article.read_time)
            .bind(&article.published_at)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// True when another article (not `except_id`) already uses `slug`.
    pub async fn slug_taken(&self, slug: &str, except_id: &str) -> anyhow::Result<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE slug = ? AND id != ?")
                .bind(slug)
                .bind(except_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 > 0)
    }

    /// First free slug among `base`, `base-2`, `base-3`, ... for article `id`.
    pub async fn unique_slug(&self, base: &str, id: &str) -> anyhow::Result<String> {
        let mut candidate = base.to_string();
        let mut n = 2;
        while self.slug_taken(&candidate, id).await? {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        Ok(candidate)
    }

    pub async fn get_article_by_slug(&self, slug: &str) -> anyhow::Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    pub async fn get_articles_by_category(
        &self,
        category: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE category = ?
            ORDER BY published_at DESC NULLS LAST, created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(category)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_article_count_for_category(&self, category: &str) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE category = ?")
            .bind(category)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn get_latest_articles(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            ORDER BY published_at DESC NULLS LAST, created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_breaking_articles(&self, limit: i64) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE is_breaking = 1
            ORDER BY published_at DESC NULLS LAST, created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_trending_articles(&self, limit: i64) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE is_trending = 1
            ORDER BY views DESC, published_at DESC NULLS LAST
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_featured_articles(&self, limit: i64) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE is_featured = 1
            ORDER BY published_at DESC NULLS LAST, created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    /// Articles carrying `tag` exactly (ASCII case-insensitive), newest first.
    pub async fn get_articles_by_tag(&self, tag: &str, limit: i64) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE ',' || tags || ',' LIKE ? ESCAPE '\'
            ORDER BY published_at DESC NULLS LAST, created_at DESC
            LIMIT ?
            "#,
        )
        .bind(format!("%,{},%", like_escape(tag.trim())))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    /// Articles whose title or excerpt contains every word of `query`.
    pub async fn search_articles(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Article>> {
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE ");
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                builder.push(" AND ");
            }
            let pattern = format!("%{}%", like_escape(term));
            builder
                .push("(title LIKE ")
                .push_bind(pattern.clone())
                .push(r" ESCAPE '\' OR excerpt LIKE ")
                .push_bind(pattern)
                .push(r" ESCAPE '\')");
        }
        builder
            .push(" ORDER BY published_at DESC NULLS LAST, created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let articles = builder
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await?;
        Ok(articles)
    }

    pub async fn increment_views(&self, article_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE articles SET views = views + 1 WHERE id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Projects

    /// Insert `project` and its details under the first free slug for its kind.
    pub async fn insert_project_with_free_slug(
        &self,
        project: &mut NewProject,
    ) -> anyhow::Result<()> {
        let base = project.slug.clone();
        for _ in 0..SLUG_ATTEMPTS {
            project.slug = self.unique_project_slug(&project.kind, &base).await?;
            match self.write_project(project).await {
                Err(e) if is_unique_violation_on(&e, "projects.slug") => {
                    debug!("Slug '{}' was claimed concurrently, retrying", project.slug);
                }
                result => return Ok(result?),
            }
        }
        anyhow::bail!("No free slug for '{}' after {} attempts", base, SLUG_ATTEMPTS)
    }

    async fn write_project(&self, project: &NewProject) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO projects (
                id, kind, slug, name, description, image, category, author_name,
                website, twitter, discord, tags, is_active, is_featured, is_verified,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.kind)
        .bind(&project.slug)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.image)
        .bind(&project.category)
        .bind(&project.author_name)
        .bind(&project.website)
        .bind(&project.twitter)
        .bind(&project.discord)
        .bind(project.tags.join(","))
        .bind(project.is_active)
        .bind(project.is_featured)
        .bind(project.is_verified)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for (position, (label, value)) in project.details.iter().enumerate() {
            sqlx::query(
                "INSERT INTO project_details (project_id, position, label, value) VALUES (?, ?, ?, ?)",
            )
            .bind(&project.id)
            .bind(position as i64)
            .bind(label)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn unique_project_slug(&self, kind: &str, base: &str) -> anyhow::Result<String> {
        let mut candidate = base.to_string();
        let mut n = 2;
        loop {
            let count: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM projects WHERE kind = ? AND slug = ?")
                    .bind(kind)
                    .bind(&candidate)
                    .fetch_one(&self.pool)
                    .await?;
            if count.0 == 0 {
                return Ok(candidate);
            }
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
    }

    pub async fn get_project(&self, kind: &str, slug: &str) -> anyhow::Result<Option<Project>> {
        let project =
            sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE kind = ? AND slug = ?")
                .bind(kind)
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(project)
    }

    pub async fn get_project_details(&self, project_id: &str) -> anyhow::Result<Vec<ProjectDetail>> {
        let details = sqlx::query_as::<_, ProjectDetail>(
            "SELECT label, value FROM project_details WHERE project_id = ? ORDER BY position",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(details)
    }

    pub async fn get_projects(
        &self,
        kind: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT * FROM projects
            WHERE kind = ?
            ORDER BY is_featured DESC, created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(kind)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    pub async fn increment_project_views(&self, project_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE projects SET views = views + 1 WHERE id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Sources

    pub async fn sync_sources(&self, configs: &[SourceConfig]) -> anyhow::Result<()> {
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO sources (name, url, category)
                VALUES (?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    name = excluded.name,
                    category = excluded.category
                "#,
            )
            .bind(&config.name)
            .bind(&config.url)
            .bind(&config.category)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_all_sources(&self) -> anyhow::Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources)
    }

    pub async fn update_source_fetched(
        &self,
        source_id: i64,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE sources SET last_fetched = ?, last_error = ? WHERE id = ?")
            .bind(&now)
            .bind(error)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Newsletter

    pub async fn get_subscriber(&self, email: &str) -> anyhow::Result<Option<Subscriber>> {
        let subscriber = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT id, email, first_name, last_name, preferences, is_active,
                   subscribed_at, unsubscribed_at
            FROM newsletter_subscribers
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscriber)
    }

    pub async fn get_active_subscribers(&self) -> anyhow::Result<Vec<Subscriber>> {
        let subscribers = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT id, email, first_name, last_name, preferences, is_active,
                   subscribed_at, unsubscribed_at
            FROM newsletter_subscribers
            WHERE is_active = 1
            ORDER BY subscribed_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscribers)
    }

    /// Active and total counts, plus active subscribers who joined at or after `since`.
    pub async fn get_subscriber_stats(&self, since: &str) -> anyhow::Result<SubscriberStats> {
        let stats = sqlx::query_as::<_, SubscriberStats>(
            r#"
            SELECT
                COALESCE(SUM(is_active), 0) AS active,
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN is_active = 1 AND subscribed_at >= ? THEN 1 ELSE 0 END), 0)
                    AS recent
            FROM newsletter_subscribers
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    pub async fn insert_subscriber(
        &self,
        id: &str,
        email: &str,
        first_name: &str,
        last_name: &str,
        preferences: &[&str],
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO newsletter_subscribers (
                id, email, first_name, last_name, preferences, is_active,
                subscribed_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(preferences.join(","))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reactivate_subscriber(
        &self,
        id: &str,
        first_name: &str,
        last_name: &str,
        preferences: &[&str],
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE newsletter_subscribers
            SET first_name = ?, last_name = ?, preferences = ?, is_active = 1,
                unsubscribed_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(first_name)
        .bind(last_name)
        .bind(preferences.join(","))
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deactivate_subscriber(&self, id: &str) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE newsletter_subscribers
            SET is_active = 0, unsubscribed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) async fn create_test_db() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    pub(crate) fn new_article(id: &str, category: &str, hours_ago: i64) -> NewArticle {
        NewArticle {
            id: id.to_string(),
            slug: format!("story-{}", id.to_lowercase()),
            title: format!("Story {}", id),
            excerpt: format!("Excerpt {}", id),
            content: format!("Body of {}", id),
            category: category.to_string(),
            author_name: "Desk".to_string(),
            read_time: 5,
            published_at: Some((Utc::now() - Duration::hours(hours_ago)).to_rfc3339()),
            ..Default::default()
        }
    }

    fn create_source_config(name: &str, url: &str, category: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            url: url.to_string(),
            category: category.to_string(),
        }
    }

    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_database_creation() {
            let db = Database::new("sqlite::memory:").await;
            assert!(db.is_ok());
        }

        #[tokio::test]
        async fn test_database_initialization() {
            let db = create_test_db().await;
            let articles = db.get_latest_articles(10, 0).await.unwrap();
            assert!(articles.is_empty());
            assert!(db.get_all_sources().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_double_initialization_is_safe() {
            let db = create_test_db().await;
            let result = db.initialize().await;
            assert!(result.is_ok());
        }
    }

    mod article_tests {
        use super::*;

        #[tokio::test]
        async fn test_insert_and_get_by_slug() {
            let db = create_test_db().await;
            let mut article = new_article("A1", "DeFi", 1);
            article.tags = vec!["yield".to_string(), "staking".to_string()];
            article.is_breaking = true;
            db.insert_article(&article).await.unwrap();

            let stored = db.get_article_by_slug("story-a1").await.unwrap().unwrap();
            assert_eq!(stored.id, "A1");
            assert_eq!(stored.category, "DeFi");
            assert_eq!(stored.tag_list(), vec!["yield", "staking"]);
            assert!(stored.is_breaking);
            assert!(!stored.is_trending);
            assert_eq!(stored.views, 0);
        }

        #[tokio::test]
        async fn test_get_missing_slug() {
            let db = create_test_db().await;
            assert!(db.get_article_by_slug("nope").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_duplicate_slug_rejected() {
            let db = create_test_db().await;
            db.insert_article(&new_article("A1", "DeFi", 1)).await.unwrap();

            let mut clash = new_article("A2", "DeFi", 1);
            clash.slug = "story-a1".to_string();
            assert!(db.insert_article(&clash).await.is_err());
            assert!(db.slug_taken("story-a1", "A2").await.unwrap());
            assert!(!db.slug_taken("story-a1", "A1").await.unwrap());
        }

        #[tokio::test]
        async fn test_unique_slug_counts_up() {
            let db = create_test_db().await;
            db.insert_article(&new_article("A1", "DeFi", 1)).await.unwrap();
            let mut second = new_article("A2", "DeFi", 1);
            second.slug = "story-a1-2".to_string();
            db.insert_article(&second).await.unwrap();

            assert_eq!(db.unique_slug("story-a1", "A3").await.unwrap(), "story-a1-3");
            assert_eq!(db.unique_slug("story-a1", "A1").await.unwrap(), "story-a1");
            assert_eq!(db.unique_slug("fresh", "A3").await.unwrap(), "fresh");
        }

        #[tokio::test]
        async fn test_upsert_refreshes_text_keeps_slug_and_views() {
            let db = create_test_db().await;
            db.upsert_article(&new_article("A1", "DeFi", 1)).await.unwrap();
            db.increment_views("A1").await.unwrap();

            let mut updated = new_article("A1", "DeFi", 1);
            updated.title = "Updated".to_string();
            updated.slug = "different-slug".to_string();
            db.upsert_article(&updated).await.unwrap();

            let stored = db.get_article_by_slug("story-a1").await.unwrap().unwrap();
            assert_eq!(stored.title, "Updated");
            assert_eq!(stored.views, 1);
            assert_eq!(db.get_latest_articles(10, 0).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_category_filter_and_order() {
            let db = create_test_db().await;
            for (i, hours) in [(1, 5), (2, 1), (3, 3)] {
                db.insert_article(&new_article(&format!("D{}", i), "DeFi", hours))
                    .await
                    .unwrap();
            }
            db.insert_article(&new_article("H1", "Health", 0)).await.unwrap();

            let defi = db.get_articles_by_category("DeFi", 10, 0).await.unwrap();
            let ids: Vec<_> = defi.iter().map(|a| a.id.as_str()).collect();
            assert_eq!(ids, vec!["D2", "D3", "D1"]);
            assert_eq!(db.get_article_count_for_category("DeFi").await.unwrap(), 3);
            assert_eq!(db.get_article_count_for_category("NFT").await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_category_pagination() {
            let db = create_test_db().await;
            for i in 0..12 {
                db.insert_article(&new_article(&format!("D{}", i), "DeFi", i))
                    .await
                    .unwrap();
            }

            let first = db.get_articles_by_category("DeFi", 5, 0).await.unwrap();
            let second = db.get_articles_by_category("DeFi", 5, 5).await.unwrap();
            let last = db.get_articles_by_category("DeFi", 5, 10).await.unwrap();
            assert_eq!(first.len(), 5);
            assert_eq!(second.len(), 5);
            assert_eq!(last.len(), 2);
            assert_ne!(first[0].id, second[0].id);
        }

        #[tokio::test]
        async fn test_unpublished_sorted_last() {
            let db = create_test_db().await;
            let mut draft = new_article("X", "DeFi", 0);
            draft.published_at = None;
            db.insert_article(&draft).await.unwrap();
            db.insert_article(&new_article("Y", "DeFi", 10)).await.unwrap();

            let latest = db.get_latest_articles(10, 0).await.unwrap();
            assert_eq!(latest[0].id, "Y");
            assert_eq!(latest[1].id, "X");
        }

        #[tokio::test]
        async fn test_breaking_and_trending() {
            let db = create_test_db().await;
            let mut breaking = new_article("B", "DeFi", 1);
            breaking.is_breaking = true;
            let mut hot = new_article("T1", "DeFi", 1);
            hot.is_trending = true;
            let mut hotter = new_article("T2", "DeFi", 2);
            hotter.is_trending = true;
            for a in [&breaking, &hot, &hotter] {
                db.insert_article(a).await.unwrap();
            }
            db.increment_views("T2").await.unwrap();
            db.increment_views("T2").await.unwrap();

            let breaking = db.get_breaking_articles(5).await.unwrap();
            assert_eq!(breaking.len(), 1);
            assert_eq!(breaking[0].id, "B");

            let trending = db.get_trending_articles(5).await.unwrap();
            let ids: Vec<_> = trending.iter().map(|a| a.id.as_str()).collect();
            assert_eq!(ids, vec!["T2", "T1"]);
        }
    }

    mod listing_tests {
        use super::*;

        async fn tagged(db: &Database, id: &str, tags: &[&str], title: &str) {
            let mut article = new_article(id, "DeFi", 1);
            article.tags = tags.iter().map(|t| t.to_string()).collect();
            article.title = title.to_string();
            db.insert_article(&article).await.unwrap();
        }

        #[tokio::test]
        async fn test_featured_newest_first() {
            let db = create_test_db().await;
            for (id, hours, featured) in [("F1", 5, true), ("F2", 1, true), ("P", 0, false)] {
                let mut article = new_article(id, "DeFi", hours);
                article.is_featured = featured;
                db.insert_article(&article).await.unwrap();
            }

            let featured = db.get_featured_articles(5).await.unwrap();
            let ids: Vec<_> = featured.iter().map(|a| a.id.as_str()).collect();
            assert_eq!(ids, vec!["F2", "F1"]);
        }

        #[tokio::test]
        async fn test_tag_matches_whole_tag_only() {
            let db = create_test_db().await;
            tagged(&db, "A", &["defi", "yield"], "One").await;
            tagged(&db, "B", &["defi-news"], "Two").await;
            tagged(&db, "C", &["yield"], "Three").await;

            let ids = |articles: Vec<Article>| -> Vec<String> {
                articles.into_iter().map(|a| a.id).collect()
            };
            assert_eq!(ids(db.get_articles_by_tag("defi", 10).await.unwrap()), vec!["A"]);
            assert_eq!(db.get_articles_by_tag("yield", 10).await.unwrap().len(), 2);
            assert!(db.get_articles_by_tag("def%", 10).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_search_title_and_excerpt() {
            let db = create_test_db().await;
            tagged(&db, "A", &[], "Bitcoin ETF Approved").await;
            tagged(&db, "B", &[], "Ethereum Upgrade").await;
            let mut by_excerpt = new_article("C", "DeFi", 2);
            by_excerpt.excerpt = "What the bitcoin halving means".to_string();
            db.insert_article(&by_excerpt).await.unwrap();

            let hits = db.search_articles("bitcoin", 10, 0).await.unwrap();
            let mut ids: Vec<_> = hits.iter().map(|a| a.id.as_str()).collect();
            ids.sort();
            assert_eq!(ids, vec!["A", "C"]);

            let both = db.search_articles("  bitcoin   etf ", 10, 0).await.unwrap();
            assert_eq!(both.len(), 1);
            assert_eq!(both[0].id, "A");

            assert!(db.search_articles("   ", 10, 0).await.unwrap().is_empty());
            assert!(db.search_articles("100%", 10, 0).await.unwrap().is_empty());
            assert_eq!(db.search_articles("bitcoin", 10, 1).await.unwrap().len(), 1);
        }
    }

    mod free_slug_tests {
        use super::*;

        #[tokio::test]
        async fn test_insert_with_free_slug_writes_back_slug() {
            let db = create_test_db().await;
            db.insert_article(&new_article("A1", "DeFi", 1)).await.unwrap();

            let mut clash = new_article("A2", "DeFi", 1);
            clash.slug = "story-a1".to_string();
            db.insert_article_with_free_slug(&mut clash).await.unwrap();

            assert_eq!(clash.slug, "story-a1-2");
            assert_eq!(
                db.get_article_by_slug("story-a1-2").await.unwrap().unwrap().id,
                "A2"
            );
        }

        #[tokio::test]
        async fn test_upsert_with_free_slug_keeps_own_slug() {
            let db = create_test_db().await;
            let mut first = new_article("A1", "DeFi", 1);
            db.upsert_article_with_free_slug(&mut first).await.unwrap();
            let mut again = new_article("A1", "DeFi", 1);
            again.title = "Retitled".to_string();
            db.upsert_article_with_free_slug(&mut again).await.unwrap();

            assert_eq!(again.slug, "story-a1");
            assert_eq!(db.get_latest_articles(10, 0).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_other_unique_violations_are_not_retried() {
            let db = create_test_db().await;
            db.insert_article(&new_article("A1", "DeFi", 1)).await.unwrap();

            let mut same_id = new_article("A1", "DeFi", 1);
            same_id.slug = "another".to_string();
            assert!(db.insert_article_with_free_slug(&mut same_id).await.is_err());
        }
    }

    mod project_tests {
        use super::*;

        fn new_project(id: &str, kind: &str, name: &str) -> NewProject {
            NewProject {
                id: id.to_string(),
                kind: kind.to_string(),
                slug: crate::content::slugify(name),
                name: name.to_string(),
                description: format!("About {}", name),
                category: "DeFi".to_string(),
                author_name: "Desk".to_string(),
                is_active: true,
                details: vec![
                    ("TVL".to_string(), "$1B".to_string()),
                    ("APY".to_string(), "4%".to_string()),
                ],
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_project_round_trip_with_ordered_details() {
            let db = create_test_db().await;
            let mut project = new_project("P1", "defi", "Aave");
            db.insert_project_with_free_slug(&mut project).await.unwrap();

            let stored = db.get_project("defi", "aave").await.unwrap().unwrap();
            assert_eq!(stored.name, "Aave");
            assert!(stored.is_active);
            assert!(db.get_project("nft", "aave").await.unwrap().is_none());

            let details = db.get_project_details("P1").await.unwrap();
            let labels: Vec<_> = details.iter().map(|d| d.label.as_str()).collect();
            assert_eq!(labels, vec!["TVL", "APY"]);
        }

        #[tokio::test]
        async fn test_duplicate_project_id_is_an_error() {
            let db = create_test_db().await;
            let mut first = new_project("P1", "defi", "Aave");
            db.insert_project_with_free_slug(&mut first).await.unwrap();

            let mut same_id = new_project("P1", "nft", "Other");
            same_id.details = vec![("Mint price".to_string(), "1 ETH".to_string())];
            assert!(db.insert_project_with_free_slug(&mut same_id).await.is_err());
            assert_eq!(db.get_project_details("P1").await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn test_projects_listing_featured_first() {
            let db = create_test_db().await;
            let mut plain = new_project("P1", "nft", "Apes");
            let mut featured = new_project("P2", "nft", "Punks");
            featured.is_featured = true;
            let mut other_kind = new_project("P3", "defi", "Curve");
            for p in [&mut plain, &mut featured, &mut other_kind] {
                db.insert_project_with_free_slug(p).await.unwrap();
            }
            db.increment_project_views("P1").await.unwrap();

            let nfts = db.get_projects("nft", 10, 0).await.unwrap();
            let ids: Vec<_> = nfts.iter().map(|p| p.id.as_str()).collect();
            assert_eq!(ids, vec!["P2", "P1"]);
            assert_eq!(nfts[1].views, 1);
        }
    }

    mod source_tests {
        use super::*;

        #[tokio::test]
        async fn test_sync_sources_upserts_by_url() {
            let db = create_test_db().await;
            db.sync_sources(&[create_source_config("Wire", "https://wire.test/rss", "DeFi")])
                .await
                .unwrap();
            db.sync_sources(&[create_source_config("Wire 2", "https://wire.test/rss", "NFT")])
                .await
                .unwrap();

            let sources = db.get_all_sources().await.unwrap();
            assert_eq!(sources.len(), 1);
            assert_eq!(sources[0].name, "Wire 2");
            assert_eq!(sources[0].category, "NFT");
        }

        #[tokio::test]
        async fn test_update_source_fetched() {
            let db = create_test_db().await;
            db.sync_sources(&[create_source_config("Wire", "https://wire.test/rss", "DeFi")])
                .await
                .unwrap();
            let id = db.get_all_sources().await.unwrap()[0].id;

            db.update_source_fetched(id, Some("timeout")).await.unwrap();
            let source = &db.get_all_sources().await.unwrap()[0];
            assert!(source.last_fetched.is_some());
            assert_eq!(source.last_error.as_deref(), Some("timeout"));

            db.update_source_fetched(id, None).await.unwrap();
            let source = &db.get_all_sources().await.unwrap()[0];
            assert!(source.last_error.is_none());
        }
    }

    mod subscriber_tests {
        use super::*;

        #[tokio::test]
        async fn test_subscriber_lifecycle() {
            let db = create_test_db().await;
            db.insert_subscriber("s1", "a@b.test", "Ada", "L", &["daily-digest"])
                .await
                .unwrap();

            let sub = db.get_subscriber("a@b.test").await.unwrap().unwrap();
            assert!(sub.is_active);
            assert_eq!(sub.preferences, "daily-digest");

            db.deactivate_subscriber("s1").await.unwrap();
            let sub = db.get_subscriber("a@b.test").await.unwrap().unwrap();
            assert!(!sub.is_active);
            assert!(sub.unsubscribed_at.is_some());

            db.reactivate_subscriber("s1", "Ada", "Lovelace", &["weekly-breakthroughs"])
                .await
                .unwrap();
            let sub = db.get_subscriber("a@b.test").await.unwrap().unwrap();
            assert!(sub.is_active);
            assert!(sub.unsubscribed_at.is_none());
            assert_eq!(sub.last_name, "Lovelace");
        }

        #[tokio::test]
        async fn test_active_subscribers_and_stats() {
            let db = create_test_db().await;
            db.insert_subscriber("s1", "a@b.test", "Ada", "", &[]).await.unwrap();
            db.insert_subscriber("s2", "c@d.test", "Cy", "", &[]).await.unwrap();
            db.insert_subscriber("s3", "e@f.test", "Eve", "", &[]).await.unwrap();
            db.deactivate_subscriber("s3").await.unwrap();

            let active = db.get_active_subscribers().await.unwrap();
            let mut emails: Vec<_> = active.iter().map(|s| s.email.as_str()).collect();
            emails.sort();
            assert_eq!(emails, vec!["a@b.test", "c@d.test"]);

            let past = (Utc::now() - Duration::days(30)).to_rfc3339();
            let stats = db.get_subscriber_stats(&past).await.unwrap();
            assert_eq!(
                stats,
                SubscriberStats {
                    active: 2,
                    total: 3,
                    recent: 2
                }
            );
            assert_eq!(stats.growth_rate(), 100);

            let future = (Utc::now() + Duration::days(1)).to_rfc3339();
            assert_eq!(db.get_subscriber_stats(&future).await.unwrap().recent, 0);
        }

        #[tokio::test]
        async fn test_stats_on_empty_table() {
            let db = create_test_db().await;
            let stats = db.get_subscriber_stats("1970-01-01T00:00:00+00:00").await.unwrap();
            assert_eq!(stats.total, 0);
            assert_eq!(stats.growth_rate(), 0);
        }

        #[tokio::test]
        async fn test_duplicate_email_rejected() {
            let db = create_test_db().await;
            db.insert_subscriber("s1", "a@b.test", "Ada", "", &[]).await.unwrap();
            assert!(db
                .insert_subscriber("s2", "a@b.test", "Ada", "", &[])
                .await
                .is_err());
        }
    }
}
