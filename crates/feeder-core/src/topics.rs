//! Topic addressing.
//!
//! Every feeder owns three topics under `feeder/{client_id}/`. Passing
//! `None` as the client id yields the single-level `+` wildcard that the
//! backend subscribes with.

use thiserror::Error;

const ROOT: &str = "feeder";
const WILDCARD: &str = "+";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic {0:?} is not shaped feeder/{{client_id}}/{{kind}}")]
    Malformed(String),

    #[error("topic {0:?} has unknown kind {1:?}")]
    UnknownKind(String, String),
}

/// The last segment of a feeder topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Status,
    Feed,
    FeedLog,
}

impl TopicKind {
    pub fn segment(&self) -> &'static str {
        match self {
            TopicKind::Status => "status",
            TopicKind::Feed => "feed",
            TopicKind::FeedLog => "feed_log",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "status" => Some(TopicKind::Status),
            "feed" => Some(TopicKind::Feed),
            "feed_log" => Some(TopicKind::FeedLog),
            _ => None,
        }
    }
}

/// Build the topic of `kind` for one feeder, or the wildcard for all.
pub fn topic(kind: TopicKind, client_id: Option<&str>) -> String {
    format!("{ROOT}/{}/{}", client_id.unwrap_or(WILDCARD), kind.segment())
}

pub fn status_topic(client_id: Option<&str>) -> String {
    topic(TopicKind::Status, client_id)
}

pub fn feed_topic(client_id: Option<&str>) -> String {
    topic(TopicKind::Feed, client_id)
}

pub fn feed_log_topic(client_id: Option<&str>) -> String {
    topic(TopicKind::FeedLog, client_id)
}

/// Split a concrete topic into its client id and kind.
pub fn parse_topic(topic: &str) -> Result<(&str, TopicKind), TopicError> {
    let mut parts = topic.split('/');
    let (Some(root), Some(client_id), Some(kind), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TopicError::Malformed(topic.to_string()));
    };

    if root != ROOT || client_id.is_empty() || client_id == WILDCARD {
        return Err(TopicError::Malformed(topic.to_string()));
    }

    let kind = TopicKind::from_segment(kind)
        .ok_or_else(|| TopicError::UnknownKind(topic.to_string(), kind.to_string()))?;
    Ok((client_id, kind))
}
