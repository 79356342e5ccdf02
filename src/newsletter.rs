use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::db::{Database, SubscriberStats};

const DEFAULT_PREFERENCES: [&str; 2] = ["daily-digest", "weekly-breakthroughs"];
const RECENT_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    Reactivated,
    AlreadySubscribed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Unsubscribed,
    AlreadyUnsubscribed,
    NotSubscribed,
}

impl SubscribeOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SubscribeOutcome::AlreadySubscribed)
    }

    pub fn message(&self, first_name: &str) -> String {
        match self {
            SubscribeOutcome::Subscribed => format!(
                "Welcome {}! You've successfully subscribed to our newsletter.",
                first_name
            ),
            SubscribeOutcome::Reactivated => format!(
                "Welcome back {}! You've been resubscribed to our newsletter.",
                first_name
            ),
            SubscribeOutcome::AlreadySubscribed => {
                "You're already subscribed to our newsletter!".to_string()
            }
        }
    }
}

impl UnsubscribeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnsubscribeOutcome::Unsubscribed)
    }

    pub fn message(&self) -> &'static str {
        match self {
            UnsubscribeOutcome::Unsubscribed => {
                "You've been unsubscribed from our newsletter."
            }
            UnsubscribeOutcome::AlreadyUnsubscribed => "You're already unsubscribed.",
            UnsubscribeOutcome::NotSubscribed => "You're not subscribed to our newsletter.",
        }
    }
}

pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(email)
}

pub async fn subscribe(
    db: &Database,
    email: &str,
    first_name: &str,
    last_name: &str,
) -> anyhow::Result<SubscribeOutcome> {
    let first_name = match first_name.trim() {
        "" => "Reader",
        name => name,
    };
    let last_name = last_name.trim();

    match db.get_subscriber(email).await? {
        Some(existing) if existing.is_active => Ok(SubscribeOutcome::AlreadySubscribed),
        Some(existing) => {
            db.reactivate_subscriber(&existing.id, first_name, last_name, &DEFAULT_PREFERENCES)
                .await?;
            info!("Reactivated newsletter subscriber {}", existing.id);
            Ok(SubscribeOutcome::Reactivated)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            db.insert_subscriber(&id, email, first_name, last_name, &DEFAULT_PREFERENCES)
                .await?;
            info!("New newsletter subscriber {}", id);
            Ok(SubscribeOutcome::Subscribed)
        }
    }
}

pub async fn unsubscribe(db: &Database, email: &str) -> anyhow::Result<UnsubscribeOutcome> {
    match db.get_subscriber(email).await? {
        None => Ok(UnsubscribeOutcome::NotSubscribed),
        Some(existing) if !existing.is_active => Ok(UnsubscribeOutcome::AlreadyUnsubscribed),
        Some(existing) => {
            db.deactivate_subscriber(&existing.id).await?;
            info!("Newsletter subscriber {} unsubscribed", existing.id);
            Ok(UnsubscribeOutcome::Unsubscribed)
        }
    }
}

/// Subscriber counts, with "recent" meaning the last 30 days.
pub async fn stats(db: &Database) -> anyhow::Result<SubscriberStats> {
    let since = (Utc::now() - Duration::days(RECENT_DAYS)).to_rfc3339();
    db.get_subscriber_stats(&since).await
}
