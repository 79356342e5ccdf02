//! Read-side access to articles for the related feed.
//!
//! The feed loader only ever talks to a [`ContentRepository`], so it can be
//! driven by the SQLite store in production and by in-memory fakes in tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{Article, Database};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Most recent `limit` articles in `category`, newest first.
    async fn fetch_by_category(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<Article>, RepositoryError>;
}

#[async_trait]
impl ContentRepository for Database {
    async fn fetch_by_category(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<Article>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(self.get_articles_by_category(category, limit, 0).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{create_test_db, new_article};

    #[tokio::test]
    async fn test_database_fetch_by_category() {
        let db = create_test_db().await;
        for i in 0..4 {
            db.insert_article(&new_article(&format!("D{}", i), "DeFi", i))
                .await
                .unwrap();
        }
        db.insert_article(&new_article("N1", "NFT", 0)).await.unwrap();

        let articles = db.fetch_by_category("DeFi", 3).await.unwrap();
        let ids: Vec<_> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["D0", "D1", "D2"]);
    }

    #[tokio::test]
    async fn test_fetch_unknown_category_is_empty() {
        let db = create_test_db().await;
        let repo: &dyn ContentRepository = &db;
        assert!(repo.fetch_by_category("Nothing", 20).await.unwrap().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = RepositoryError::Unavailable("connection reset".to_string());
        assert_eq!(err.to_string(), "repository unavailable: connection reset");

        let err: RepositoryError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "storage error: disk full");
    }
}
