//! Analysis engine: turns raw social posts into a `MarketJudgment`.
//!
//! Builds a deterministic engagement-weighted summary of the posts, asks
//! the LLM backend for a structured judgment, and parses the reply. Any
//! backend or parse failure, and any empty input, yields the neutral
//! fallback judgment instead of an error.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::LlmBackend;
use crate::types::{MarketCondition, MarketJudgment, SocialPost};

/// Posts beyond this many (by engagement) are left out of the prompt.
const MAX_SUMMARY_POSTS: usize = 20;

/// Individual post texts are truncated to this many characters.
const MAX_POST_CHARS: usize = 280;

// ---------------------------------------------------------------------------
// Lexicon scoring
// ---------------------------------------------------------------------------

const POSITIVE_WORDS: &[&str] = &[
    "bull", "moon", "pump", "surge", "rally", "breakout", "accumulat", "record",
    "growth", "growing", "strong", "support", "adoption", "inflow", "gain", "up",
    "buy", "listing", "rise",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bear", "dump", "crash", "drop", "sell", "fear", "worr", "weak", "outage",
    "hack", "exploit", "rug", "scam", "threat", "down", "decline", "fall", "unlock",
];

/// Keyword sentiment of one text: -1.0 to +1.0, 0.0 when nothing matches.
pub fn lexicon_score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '$')
        .filter(|w| !w.is_empty())
        .collect();

    let pos = words
        .iter()
        .filter(|w| POSITIVE_WORDS.iter().any(|p| w.starts_with(p)))
        .count() as f64;
    let neg = words
        .iter()
        .filter(|w| NEGATIVE_WORDS.iter().any(|n| w.starts_with(n)))
        .count() as f64;

    if pos + neg == 0.0 {
        return 0.0;
    }
    (pos - neg) / (pos + neg)
}

// ---------------------------------------------------------------------------
// Weighted summary
// ---------------------------------------------------------------------------

/// A post paired with its normalised engagement weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedText {
    pub text: String,
    pub weight: f64,
}

/// Weight posts by `(1 + engagement) / Σ(1 + engagement)`, ordered by
/// engagement descending then text, keeping the top `MAX_SUMMARY_POSTS`.
pub fn weigh_posts(posts: &[SocialPost]) -> Vec<WeightedText> {
    let mut sorted: Vec<&SocialPost> = posts.iter().collect();
    sorted.sort_by(|a, b| b.engagement.cmp(&a.engagement).then_with(|| a.text.cmp(&b.text)));
    sorted.truncate(MAX_SUMMARY_POSTS);

    let total: f64 = sorted.iter().map(|p| 1.0 + p.engagement as f64).sum();
    sorted
        .into_iter()
        .map(|p| WeightedText {
            text: p.text.chars().take(MAX_POST_CHARS).collect(),
            weight: (1.0 + p.engagement as f64) / total,
        })
        .collect()
}

/// Engagement-weighted lexicon sentiment across the kept posts.
pub fn weighted_lexicon_score(weighted: &[WeightedText]) -> f64 {
    weighted.iter().map(|w| w.weight * lexicon_score(&w.text)).sum()
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawJudgment {
    sentiment: f64,
    confidence: f64,
    #[serde(default, alias = "marketCondition", alias = "market_condition")]
    condition: Option<String>,
    #[serde(default)]
    reasoning: Option<serde_json::Value>,
    #[serde(default, alias = "suggestedActions")]
    suggested_actions: Option<serde_json::Value>,
}

/// Accept either a list of strings or a single string.
fn string_list(value: Option<serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}

fn finish(sentiment: f64, confidence: f64, condition: Option<&str>, reasoning: Vec<String>, actions: Vec<String>) -> Option<MarketJudgment> {
    if !sentiment.is_finite() || !confidence.is_finite() {
        return None;
    }
    let sentiment = sentiment.clamp(-1.0, 1.0);
    let confidence = confidence.clamp(0.0, 1.0);
    let condition = condition
        .and_then(|c| c.parse::<MarketCondition>().ok())
        .unwrap_or_else(|| MarketCondition::from_sentiment(sentiment));
    Some(MarketJudgment {
        sentiment,
        confidence,
        condition,
        reasoning,
        suggested_actions: actions,
    })
}

/// Parse the first JSON object embedded in `text`.
fn parse_json(text: &str) -> Option<MarketJudgment> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let raw: RawJudgment = serde_json::from_str(&text[start..=end]).ok()?;
    finish(
        raw.sentiment,
        raw.confidence,
        raw.condition.as_deref(),
        string_list(raw.reasoning),
        string_list(raw.suggested_actions),
    )
}

/// Extract the first signed float after `label` on a line.
fn extract_float_after(line: &str, label: &str) -> Option<f64> {
    let pos = line.find(label)?;
    let after = line[pos + label.len()..].trim_start();
    let num: String = after
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    num.parse().ok()
}

/// Parse `SENTIMENT: x` / `CONFIDENCE: y` / `CONDITION: z` lines.
fn parse_labelled(text: &str) -> Option<MarketJudgment> {
    let mut sentiment = None;
    let mut confidence = None;
    let mut condition = None;
    let mut reasoning = Vec::new();

    for line in text.lines() {
        let upper = line.to_uppercase();
        if let Some(v) = extract_float_after(&upper, "SENTIMENT:") {
            sentiment.get_or_insert(v);
        } else if let Some(v) = extract_float_after(&upper, "CONFIDENCE:") {
            confidence.get_or_insert(v);
        } else if let Some(pos) = upper.find("CONDITION:") {
            condition.get_or_insert_with(|| upper[pos + "CONDITION:".len()..].trim().to_string());
        } else if !line.trim().is_empty() {
            reasoning.push(line.trim().to_string());
        }
    }

    finish(sentiment?, confidence?, condition.as_deref(), reasoning, Vec::new())
}

/// Parse a backend reply, JSON first and labelled lines second.
pub fn parse_judgment(text: &str) -> Option<MarketJudgment> {
    parse_json(text).or_else(|| parse_labelled(text))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct AnalysisEngine {
    backend: Arc<dyn LlmBackend>,
}

impl AnalysisEngine {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    pub fn system_prompt() -> &'static str {
        "You are a crypto market sentiment analyst. You receive social media posts \
         about one token, each annotated with an engagement weight. Judge the \
         aggregate market sentiment.\n\n\
         Respond with ONLY a JSON object of this exact shape:\n\
         {\"sentiment\": <float -1..1>, \"confidence\": <float 0..1>, \
         \"condition\": \"bullish\"|\"bearish\"|\"neutral\", \
         \"reasoning\": [<short strings>], \"suggested_actions\": [<short strings>]}\n\n\
         Weight high-engagement posts more. Be conservative with confidence when \
         posts disagree or are few."
    }

    /// Deterministic textual summary of the weighted posts.
    pub fn build_prompt(symbol: &str, weighted: &[WeightedText], total_posts: usize) -> String {
        let mut prompt = String::with_capacity(256 + weighted.len() * 120);
        prompt.push_str(&format!("TOKEN: {}\n", symbol.to_uppercase()));
        prompt.push_str(&format!(
            "POSTS: {} total, {} shown (highest engagement first)\n",
            total_posts,
            weighted.len()
        ));
        prompt.push_str(&format!(
            "LEXICON SENTIMENT (engagement-weighted): {:+.2}\n\n",
            weighted_lexicon_score(weighted)
        ));
        for (i, w) in weighted.iter().enumerate() {
            let text = w.text.replace('\n', " ");
            prompt.push_str(&format!("{}. [w={:.3}] {}\n", i + 1, w.weight, text));
        }
        prompt
    }

    /// Produce a judgment for `symbol`. Never fails.
    pub async fn analyze(&self, symbol: &str, posts: &[SocialPost]) -> MarketJudgment {
        if posts.is_empty() {
            debug!(symbol, "No posts, using fallback judgment");
            return MarketJudgment::fallback();
        }

        let weighted = weigh_posts(posts);
        let prompt = Self::build_prompt(symbol, &weighted, posts.len());

        let reply = match self.backend.complete(Self::system_prompt(), &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(symbol, error = %e, "Analysis backend failed, using fallback judgment");
                return MarketJudgment::fallback();
            }
        };

        match parse_judgment(&reply) {
            Some(judgment) => {
                info!(
                    symbol,
                    sentiment = %format!("{:+.2}", judgment.sentiment),
                    confidence = %format!("{:.0}%", judgment.confidence * 100.0),
                    condition = %judgment.condition,
                    posts = posts.len(),
                    "Judgment complete"
                );
                judgment
            }
            None => {
                warn!(symbol, reply_len = reply.len(), "Unparseable analysis reply, using fallback judgment");
                MarketJudgment::fallback()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
