use anyhow::Context;
use once_cell::sync::Lazy;
use ragkit_llm::{LlmClient, LlmRequest};
use regex::Regex;
use tokio::runtime::Runtime;

use crate::error::ScoreError;

pub const MAX_GRADE: u8 = 100;

const GRADER_SYSTEM_PROMPT: &str = "You are an answer grading assistant. You receive a question, a reference answer and an AI generated answer. Grade the generated answer on an integer scale from 0 to 100. If the generated answer has the same meaning as the reference answer, or fully contains it, give 100; otherwise lower the grade accordingly. Reply with the grade only.";

/// Grades a generated answer against a reference answer.
pub trait Scorer {
    fn score(&self, query: &str, reference: &str, generated: &str) -> Result<u8, ScoreError>;
}

impl<F> Scorer for F
where
    F: Fn(&str, &str, &str) -> Result<u8, ScoreError>,
{
    fn score(&self, query: &str, reference: &str, generated: &str) -> Result<u8, ScoreError> {
        self(query, reference, generated)
    }
}

/// Scorer backed by a chat completion. One request per call, no retries.
pub struct LlmScorer {
    client: LlmClient,
    runtime: Runtime,
}

impl LlmScorer {
    pub fn new(client: LlmClient) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start scorer runtime")?;
        Ok(Self { client, runtime })
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }
}

impl Scorer for LlmScorer {
    fn score(&self, query: &str, reference: &str, generated: &str) -> Result<u8, ScoreError> {
        let request = grading_request(query, reference, generated);
        let response = self.runtime.block_on(self.client.chat(&request))?;
        parse_grade(&response.content)
    }
}

pub fn grading_request(query: &str, reference: &str, generated: &str) -> LlmRequest {
    LlmRequest {
        system: Some(GRADER_SYSTEM_PROMPT.to_string()),
        user: format!(
            "Question: {query} \n\nReference answer: {reference} \n\nAI generated answer: {generated} \n\n"
        ),
    }
}

static GRADE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("grade pattern"));

/// Takes the first integer in the reply and clamps it to `0..=100`.
pub fn parse_grade(reply: &str) -> Result<u8, ScoreError> {
    let digits = GRADE
        .find(reply)
        .ok_or_else(|| ScoreError::Unparseable(reply.to_string()))?;
    let value: u64 = digits.as_str().parse().unwrap_or(u64::MAX);
    Ok(value.min(MAX_GRADE as u64) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkit_llm::{LlmProvider, LlmSettings};

    #[test]
    fn parse_grade_reads_first_integer() {
        assert_eq!(parse_grade("85").unwrap(), 85);
        assert_eq!(parse_grade("Score: 70/100").unwrap(), 70);
        assert_eq!(parse_grade("  0 ").unwrap(), 0);
    }

    #[test]
    fn parse_grade_clamps_out_of_range() {
        assert_eq!(parse_grade("250").unwrap(), 100);
        assert_eq!(parse_grade("99999999999999999999999").unwrap(), 100);
    }

    #[test]
    fn parse_grade_rejects_text_without_digits() {
        let err = parse_grade("excellent").unwrap_err();
        assert!(matches!(err, ScoreError::Unparseable(_)));
    }

    #[test]
    fn grading_request_carries_all_three_texts() {
        let req = grading_request("b", "x", "resp-b");
        assert!(req.system.unwrap().contains("0 to 100"));
        assert!(req.user.contains("Question: b"));
        assert!(req.user.contains("Reference answer: x"));
        assert!(req.user.contains("AI generated answer: resp-b"));
    }

    #[test]
    fn local_llm_scorer_produces_grade() {
        let client = LlmClient::new(&LlmSettings::new(LlmProvider::Local, "local")).unwrap();
        let scorer = LlmScorer::new(client).unwrap();
        let grade = scorer.score("q", "same words", "same words").unwrap();
        assert_eq!(grade, 100);
    }
}
