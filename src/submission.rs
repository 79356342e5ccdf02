use std::str::FromStr;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::content::{parse_tags, slugify};
use crate::db::{Database, NewArticle, NewProject};

const DEFAULT_READ_TIME: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    News,
    Airdrop,
    Nft,
    Defi,
    Listing,
}

impl ContentType {
    pub const PROJECTS: [ContentType; 4] = [
        ContentType::Airdrop,
        ContentType::Nft,
        ContentType::Defi,
        ContentType::Listing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::News => "news",
            ContentType::Airdrop => "airdrop",
            ContentType::Nft => "nft",
            ContentType::Defi => "defi",
            ContentType::Listing => "listing",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            ContentType::News => "news",
            ContentType::Airdrop => "airdrops",
            ContentType::Nft => "NFTs",
            ContentType::Defi => "DeFi protocols",
            ContentType::Listing => "listings",
        }
    }

    /// The project kinds, i.e. everything except news.
    pub fn project(raw: &str) -> Option<ContentType> {
        raw.parse::<ContentType>()
            .ok()
            .filter(|kind| *kind != ContentType::News)
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "news" => Ok(ContentType::News),
            "airdrop" => Ok(ContentType::Airdrop),
            "nft" => Ok(ContentType::Nft),
            "defi" => Ok(ContentType::Defi),
            "listing" => Ok(ContentType::Listing),
            _ => Err("Invalid or missing content type".to_string()),
        }
    }
}

/// Submission form as posted by the editor page. Which fields matter
/// depends on `content_type`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContentSubmission {
    pub content_type: String,
    pub author: String,
    pub category: String,
    pub tags: String,
    pub image: String,

    // news
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub location: String,
    pub read_time: String,
    pub is_breaking: Option<String>,
    pub is_trending: Option<String>,
    pub is_featured: Option<String>,

    // projects
    pub name: String,
    pub description: String,
    pub website: String,
    pub twitter: String,
    pub discord: String,
    pub is_verified: Option<String>,
    pub requirements: String,
    pub end_date: String,
    pub total_value: String,
    pub is_active: Option<String>,
    pub mint_price: String,
    pub total_supply: String,
    pub mint_date: String,
    pub is_live: Option<String>,
    pub tvl: String,
    pub apy: String,
    pub blockchain: String,
    pub exchange: String,
    pub price: String,
    pub market_cap: String,
    pub listing_date: String,
    pub is_new: Option<String>,
}

/// A validated submission, ready to store.
#[derive(Debug, Clone)]
pub enum Submission {
    News(NewArticle),
    Project(NewProject),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub content_type: ContentType,
    pub slug: String,
}

impl Published {
    pub fn path(&self) -> String {
        match self.content_type {
            ContentType::News => format!("/news/{}", self.slug),
            kind => format!("/projects/{}/{}", kind.as_str(), self.slug),
        }
    }
}

fn checkbox(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("true") | Some("on"))
}

fn optional(value: &str) -> Option<String> {
    match value.trim() {
        "" => None,
        v => Some(v.to_string()),
    }
}

impl ContentSubmission {
    /// Check the content type and required fields, and build what to store.
    pub fn validate(self) -> Result<Submission, String> {
        match self.content_type.parse::<ContentType>()? {
            ContentType::News => self.into_article().map(Submission::News),
            kind => self.into_project(kind).map(Submission::Project),
        }
    }

    fn author_and_category(&self) -> Result<(String, String), String> {
        let author = self.author.trim();
        let category = self.category.trim();
        if author.is_empty() || category.is_empty() {
            return Err("Author and category are required".to_string());
        }
        Ok((author.to_string(), category.to_string()))
    }

    /// Build a news article from the news fields, ignoring `content_type`.
    pub fn into_article(self) -> Result<NewArticle, String> {
        let (author, category) = self.author_and_category()?;

        let title = self.title.trim();
        let excerpt = self.excerpt.trim();
        let content = self.content.trim();
        if title.is_empty() || excerpt.is_empty() || content.is_empty() {
            return Err("Title, excerpt, and content are required for news".to_string());
        }

        let slug = slugify(title);
        if slug.is_empty() {
            return Err("Title must contain letters or digits".to_string());
        }

        let read_time = self
            .read_time
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|minutes| *minutes > 0)
            .unwrap_or(DEFAULT_READ_TIME);

        Ok(NewArticle {
            id: Uuid::new_v4().to_string(),
            slug,
            title: title.to_string(),
            excerpt: excerpt.to_string(),
            content: content.to_string(),
            image: optional(&self.image),
            source_url: None,
            category,
            author_name: author,
            location: self.location.trim().to_string(),
            tags: parse_tags(&self.tags),
            is_breaking: checkbox(&self.is_breaking),
            is_featured: checkbox(&self.is_featured),
            is_trending: checkbox(&self.is_trending),
            read_time,
            published_at: Some(Utc::now().to_rfc3339()),
        })
    }

    fn into_project(self, kind: ContentType) -> Result<NewProject, String> {
        let (author, category) = self.author_and_category()?;

        let name = self.name.trim();
        let description = self.description.trim();
        if name.is_empty() || description.is_empty() {
            return Err(format!(
                "Name and description are required for {}",
                kind.plural()
            ));
        }

        let slug = slugify(name);
        if slug.is_empty() {
            return Err("Name must contain letters or digits".to_string());
        }

        let (details, is_active) = match kind {
            ContentType::Airdrop => (
                vec![
                    ("Requirements", &self.requirements),
                    ("End date", &self.end_date),
                    ("Total value", &self.total_value),
                ],
                checkbox(&self.is_active),
            ),
            ContentType::Nft => (
                vec![
                    ("Mint price", &self.mint_price),
                    ("Total supply", &self.total_supply),
                    ("Mint date", &self.mint_date),
                ],
                checkbox(&self.is_live),
            ),
            ContentType::Defi => (
                vec![
                    ("TVL", &self.tvl),
                    ("APY", &self.apy),
                    ("Blockchain", &self.blockchain),
                ],
                checkbox(&self.is_active),
            ),
            ContentType::Listing => (
                vec![
                    ("Exchange", &self.exchange),
                    ("Price", &self.price),
                    ("Market cap", &self.market_cap),
                    ("Listing date", &self.listing_date),
                ],
                checkbox(&self.is_new),
            ),
            ContentType::News => (Vec::new(), false),
        };
        let details = details
            .into_iter()
            .filter_map(|(label, value)| optional(value).map(|v| (label.to_string(), v)))
            .collect();

        Ok(NewProject {
            id: Uuid::new_v4().to_string(),
            kind: kind.as_str().to_string(),
            slug,
            name: name.to_string(),
            description: description.to_string(),
            image: optional(&self.image),
            category,
            author_name: author,
            website: optional(&self.website),
            twitter: optional(&self.twitter),
            discord: optional(&self.discord),
            tags: parse_tags(&self.tags),
            is_active,
            is_featured: checkbox(&self.is_featured),
            is_verified: checkbox(&self.is_verified),
            details,
        })
    }
}

/// Store a validated submission, numbering the slug when it is already taken.
pub async fn publish(db: &Database, submission: Submission) -> anyhow::Result<Published> {
    match submission {
        Submission::News(mut article) => {
            db.insert_article_with_free_slug(&mut article).await?;
            Ok(Published {
                content_type: ContentType::News,
                slug: article.slug,
            })
        }
        Submission::Project(mut project) => {
            db.insert_project_with_free_slug(&mut project).await?;
            let content_type = ContentType::project(&project.kind)
                .ok_or_else(|| anyhow::anyhow!("Unknown project kind '{}'", project.kind))?;
            Ok(Published {
                content_type,
                slug: project.slug,
            })
        }
    }
}
