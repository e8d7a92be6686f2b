//! Response builder
//!
//! Composes the LLM prompt from the ranked hits, invokes the completion
//! provider behind retry and the LLM circuit breaker, and assembles the
//! final answer object with citations and token accounting.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use helpdesk_rag_adapters::{ChatMessage, CompletionParams, LlmClient};
use helpdesk_rag_core::{
    Answer, AnswerBlock, AnswerMetrics, CacheOutcome, GatewayError, Query, RankedHit, SourceId,
};
use helpdesk_rag_monitoring as monitoring;
use helpdesk_rag_resilience::{BreakerError, CircuitBreaker, RetryConfig, RetryError};

use crate::prompt::{build_context, fallback_prompt, system_prompt, ContextBlock, CHARS_PER_TOKEN};

/// Response-builder tuning
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Token budget for the context block
    pub context_token_budget: usize,
    /// Timeout for a single completion attempt
    pub llm_timeout: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            context_token_budget: 2000,
            llm_timeout: Duration::from_secs(20),
        }
    }
}

/// Builds the final answer from ranked hits and the original question
pub struct ResponseBuilder {
    llm: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    config: ResponderConfig,
}

impl ResponseBuilder {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        breaker: Arc<CircuitBreaker>,
        config: ResponderConfig,
    ) -> Self {
        Self {
            llm,
            breaker,
            retry: RetryConfig::for_llm(),
            config,
        }
    }

    /// Invoke the LLM over the assembled prompt and build the answer.
    ///
    /// With an empty hit list the model is asked to answer from general
    /// knowledge with a disclaimer; the caller marks such answers
    /// `miss_no_context`.
    pub async fn build(
        &self,
        query: &Query,
        hits: &[RankedHit],
        partial: bool,
        cache_result: CacheOutcome,
    ) -> Result<Answer, GatewayError> {
        let context = build_context(hits, self.config.context_token_budget);

        let system = if context.is_empty() {
            fallback_prompt(query.mode)
        } else {
            format!("{}\n\n# Context\n\n{}", system_prompt(query.mode), context.text)
        };
        let messages = [ChatMessage::system(system), ChatMessage::user(&query.text)];

        let params = CompletionParams {
            temperature: 0.2,
            max_tokens: query.mode.max_tokens(),
            timeout: self.config.llm_timeout,
        };

        let started = Instant::now();
        let completion = self
            .breaker
            .execute(|| {
                helpdesk_rag_resilience::retry(&self.retry, "llm completion", || {
                    self.llm.complete(&messages, &params)
                })
            })
            .await
            .map_err(|e| self.map_failure(e))?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        monitoring::record_llm_latency(latency_ms);
        let estimated = (messages.iter().map(|m| m.content.len()).sum::<usize>()
            + completion.text.len()) as u64
            / CHARS_PER_TOKEN as u64;
        monitoring::record_tokens_spent(u64::from(completion.total_tokens()), estimated);

        debug!(
            model = %self.llm.model(),
            prompt_tokens = completion.prompt_tokens,
            completion_tokens = completion.completion_tokens,
            latency_ms = latency_ms as u64,
            "completion received"
        );

        Ok(assemble_answer(
            completion.text,
            &context,
            completion.prompt_tokens,
            completion.completion_tokens,
            partial,
            cache_result,
        ))
    }

    fn map_failure(&self, error: BreakerError<RetryError<helpdesk_rag_core::LlmError>>) -> GatewayError {
        match error {
            BreakerError::Open { retry_after, .. } => {
                warn!("completion short-circuited, LLM circuit open");
                GatewayError::Unavailable {
                    message: "LLM temporarily unavailable".to_string(),
                    retry_after,
                }
            }
            BreakerError::Failed(retry_error) => match retry_error {
                RetryError::Exhausted { attempts, last_error } => {
                    warn!(attempts, error = %last_error, "completion retries exhausted");
                    GatewayError::Unavailable {
                        message: format!("LLM unavailable after {attempts} attempts"),
                        retry_after: None,
                    }
                }
                RetryError::NonRetryable(e) => {
                    warn!(error = %e, "completion failed");
                    GatewayError::Internal(format!("LLM request failed: {e}"))
                }
            },
        }
    }
}

fn assemble_answer(
    text: String,
    context: &ContextBlock,
    prompt_tokens: u32,
    completion_tokens: u32,
    partial: bool,
    cache_result: CacheOutcome,
) -> Answer {
    let mut blocks = vec![AnswerBlock::Section {
        title: None,
        text: text.clone(),
    }];

    if !context.citations.is_empty() {
        let sources = context
            .citations
            .iter()
            .map(|c| format!("[{}] {} ({})", c.index, c.title, c.url))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(AnswerBlock::Divider);
        blocks.push(AnswerBlock::Section {
            title: Some("Sources".to_string()),
            text: sources,
        });
    }

    let mut sources_used: Vec<SourceId> = Vec::new();
    for citation in &context.citations {
        if !sources_used.contains(&citation.source) {
            sources_used.push(citation.source.clone());
        }
    }

    Answer {
        text,
        blocks,
        citations: context.citations.clone(),
        metrics: AnswerMetrics {
            prompt_tokens,
            completion_tokens,
            sources_used,
            cache_result,
            partial,
            similarity: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_rag_adapters::{MockLlm, MockLlmFailure};
    use helpdesk_rag_core::{Hit, HitPayload};
    use helpdesk_rag_resilience::BreakerConfig;

    fn ranked(title: &str, score: f32) -> RankedHit {
        RankedHit {
            hit: Hit {
                source: SourceId::new("JIRA"),
                doc_id: title.to_string(),
                score,
                payload: HitPayload {
                    title: title.to_string(),
                    url: format!("https://jira/{title}"),
                    snippet: "resolution steps".to_string(),
                    updated_at: None,
                },
                vector: None,
            },
            final_score: score,
            dedup_group: 0,
        }
    }

    fn builder(llm: MockLlm) -> ResponseBuilder {
        ResponseBuilder::new(
            Arc::new(llm),
            Arc::new(CircuitBreaker::new("llm", BreakerConfig::default())),
            ResponderConfig::default(),
        )
    }

    #[tokio::test]
    async fn grounded_answer_carries_citations_and_tokens() {
        let llm = MockLlm::new().with_completion("Restart the VPN client. [1]", 120, 40);
        let builder = builder(llm);

        let hits = [ranked("vpn-guide", 0.9)];
        let answer = builder
            .build(&Query::new("vpn drops"), &hits, false, CacheOutcome::Miss)
            .await
            .unwrap();

        assert_eq!(answer.text, "Restart the VPN client. [1]");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.metrics.prompt_tokens, 120);
        assert_eq!(answer.metrics.completion_tokens, 40);
        assert_eq!(answer.metrics.sources_used, vec![SourceId::new("JIRA")]);
        assert!(!answer.metrics.partial);
        // Answer section, divider, sources section
        assert_eq!(answer.blocks.len(), 3);
    }

    #[tokio::test]
    async fn empty_context_answers_with_a_disclaimer_prompt() {
        let llm = MockLlm::new();
        let builder = builder(llm);

        let answer = builder
            .build(
                &Query::new("what is dhcp?"),
                &[],
                true,
                CacheOutcome::MissNoContext,
            )
            .await
            .unwrap();

        assert!(answer.citations.is_empty());
        assert_eq!(answer.metrics.cache_result, CacheOutcome::MissNoContext);
        assert!(answer.metrics.partial);
        assert_eq!(answer.blocks.len(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let llm = MockLlm::new()
            .with_failure(MockLlmFailure::ServerError)
            .with_completion("recovered", 10, 5);
        let builder = builder(llm);

        let answer = builder
            .build(&Query::new("q"), &[], false, CacheOutcome::Miss)
            .await
            .unwrap();
        assert_eq!(answer.text, "recovered");
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let llm = MockLlm::new()
            .with_failure(MockLlmFailure::BadRequest)
            .with_completion("never reached", 1, 1);
        let builder = builder(llm);

        let err = builder
            .build(&Query::new("q"), &[], false, CacheOutcome::Miss)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_unavailable() {
        let llm = MockLlm::new()
            .with_failure(MockLlmFailure::ServerError)
            .with_failure(MockLlmFailure::ServerError)
            .with_failure(MockLlmFailure::ServerError);
        let builder = builder(llm);

        let err = builder
            .build(&Query::new("q"), &[], false, CacheOutcome::Miss)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unavailable");
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let llm = MockLlm::new().with_completion("never reached", 1, 1);
        let breaker = Arc::new(CircuitBreaker::new("llm", BreakerConfig::default()));
        for _ in 0..5 {
            assert!(breaker.try_acquire().is_allowed());
            breaker.record_outcome(1.0);
        }
        let builder = ResponseBuilder::new(Arc::new(llm), breaker, ResponderConfig::default());

        let err = builder
            .build(&Query::new("q"), &[], false, CacheOutcome::Miss)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unavailable");
    }
}
