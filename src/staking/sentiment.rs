//! Sentiment scoring for stake decisions
//!
//! Two HTTP collaborators:
//! - an activity feed returning recent posts about a partition
//!   (`GET {DATURA_API_URL}?query=Bittensor netuid {n}&sort=Top&count=10`)
//! - an LLM chat-completion endpoint asked for a score in [-100, 100]
//!
//! Either one failing makes the score unavailable; the decision engine
//! then skips the cycle without acting.

use crate::ledger::Netuid;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_SCORE: i64 = -100;
pub const MAX_SCORE: i64 = 100;

const SCORE_PROMPT: &str = "Give me a sentiment score of -100 to 100 for the following text, \
please only return the score and nothing else and make sure it is within the range of -100 to 100: ";

#[derive(Debug)]
pub enum OracleError {
    Http(reqwest::Error),
    Status(u16),
    Parse(String),
    OutOfRange(i64),
    EmptyCorpus,
    Timeout(&'static str),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Http(err)
    }
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Http(e) => write!(f, "HTTP error: {}", e),
            OracleError::Status(code) => write!(f, "API returned HTTP {}", code),
            OracleError::Parse(msg) => write!(f, "Error parsing sentiment score: {}", msg),
            OracleError::OutOfRange(score) => write!(f, "Sentiment score out of range: {}", score),
            OracleError::EmptyCorpus => write!(f, "No recent activity to score"),
            OracleError::Timeout(what) => write!(f, "{} timed out", what),
        }
    }
}

impl std::error::Error for OracleError {}

/// Source of recent-activity text for a partition
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn recent_activity(&self, netuid: Netuid) -> Result<String, OracleError>;
}

/// Text scoring capability; `Err` means the score is unavailable
#[async_trait]
pub trait SentimentOracle: Send + Sync {
    async fn score(&self, corpus: &str) -> Result<i64, OracleError>;
}

/// Recent-posts search feed
pub struct DaturaFeed {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl DaturaFeed {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ActivityFeed for DaturaFeed {
    async fn recent_activity(&self, netuid: Netuid) -> Result<String, OracleError> {
        let query = format!("Bittensor netuid {}", netuid);

        let response = self
            .client
            .get(&self.url)
            .header("Authorization", &self.api_key)
            .query(&[("query", query.as_str()), ("sort", "Top"), ("count", "10")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OracleError::Status(response.status().as_u16()));
        }

        let body: serde_json::Value = response.json().await?;
        let texts = extract_texts(&body);

        log::debug!("Activity feed returned {} posts for netuid {}", texts.len(), netuid);

        if texts.is_empty() {
            return Err(OracleError::EmptyCorpus);
        }

        Ok(texts.join("\n"))
    }
}

/// Members that wrap a result list when the feed does not return a bare array
const POST_LIST_KEYS: &[&str] = &["data", "results", "tweets"];

/// Members holding a quoted post
const QUOTE_KEYS: &[&str] = &["quoted", "quote", "quoted_status"];

/// Collect the `text` of every post and of any post it quotes
///
/// Only post bodies are read. Nested profile objects (`user`, entities)
/// are ignored even when they carry a `text` member.
pub fn extract_texts(value: &serde_json::Value) -> Vec<String> {
    let posts = match value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match POST_LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_array()))
        {
            Some(items) => items.as_slice(),
            None => std::slice::from_ref(value),
        },
        _ => &[],
    };

    let mut texts = Vec::new();
    for post in posts {
        collect_post(post, &mut texts);
    }
    texts
}

fn collect_post(post: &serde_json::Value, out: &mut Vec<String>) {
    let Some(map) = post.as_object() else {
        return;
    };

    if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
        if !text.trim().is_empty() {
            out.push(text.to_string());
        }
    }

    for key in QUOTE_KEYS {
        if let Some(quoted) = map.get(*key) {
            collect_post(quoted, out);
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completion backed oracle
pub struct ChutesOracle {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChutesOracle {
    pub fn new(url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl SentimentOracle for ChutesOracle {
    async fn score(&self, corpus: &str) -> Result<i64, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: format!("{}{}", SCORE_PROMPT, corpus),
            }],
            stream: false,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OracleError::Status(response.status().as_u16()));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();

        parse_score(content)
    }
}

/// Reduce a model reply to its digits and minus signs and range-check it
pub fn parse_score(content: &str) -> Result<i64, OracleError> {
    let digits: String = content
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();

    let score: i64 = digits
        .parse()
        .map_err(|_| OracleError::Parse(format!("no integer in reply {:?}", content)))?;

    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(OracleError::OutOfRange(score));
    }

    Ok(score)
}
