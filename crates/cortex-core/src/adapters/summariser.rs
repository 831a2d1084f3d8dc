//! The Summariser adapter: style-/length-parameterised text
//! compression and key-point listing.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStyle {
    Narrative,
    Bullet,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryLength {
    Brief,
    Medium,
    Detailed,
}

#[derive(Debug, Clone)]
pub struct SummariseOptions {
    pub style: SummaryStyle,
    pub length: SummaryLength,
    pub custom_focus: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub success: bool,
    pub summary: String,
    pub word_count: u32,
    pub character_count: u32,
    pub quality_score: f32,
    pub compression_ratio: f32,
    pub billing: Option<super::extractor::Billing>,
}

/// Style-/length-parameterised text compression, and key-point listing.
#[async_trait]
pub trait Summariser: Send + Sync {
    async fn summarise(&self, text: &str, options: SummariseOptions) -> SummaryOutcome;
    async fn extract_key_points(&self, text: &str, max_points: usize) -> Vec<String>;
}
