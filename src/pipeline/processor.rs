//! Reply processor: turns one inbound message into one reply decision.
//!
//! Flow:
//! 1. Spam gate → may short-circuit with the suppression reply
//! 2. Retrieval → a known answer, grammar-corrected
//! 3. Generation (only on no-match) → post-processed for the recipient
//!
//! Nothing here touches the outbound channel; dispatch happens afterwards.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ReplySettings;
use crate::error::{InferenceError, PipelineError};
use crate::pipeline::spam::SpamGate;
use crate::pipeline::types::{
    Generator, InboundMessage, PostProcessor, ReplyDecision, RetrievalResult, Retriever,
    normalize_text,
};

/// Decides the reply for each message. Stateless between messages.
pub struct ReplyProcessor {
    spam: SpamGate,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    postprocessor: Arc<dyn PostProcessor>,
    settings: ReplySettings,
}

impl ReplyProcessor {
    pub fn new(
        spam: SpamGate,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        postprocessor: Arc<dyn PostProcessor>,
        settings: ReplySettings,
    ) -> Self {
        Self {
            spam,
            retriever,
            generator,
            postprocessor,
            settings,
        }
    }

    /// Run the decision stages for `message`.
    ///
    /// Post-processing failures degrade to the untransformed text; every
    /// other failure is returned for the orchestrator to classify.
    pub async fn decide(&self, message: &InboundMessage) -> Result<ReplyDecision, PipelineError> {
        let text = normalize_text(&message.text);

        if self.spam.classify(&text).await? {
            info!(id = %message.id, author = %message.author_handle, "Suppressing spam message");
            return Ok(ReplyDecision::Suppressed {
                text: self.settings.suppression_reply.clone(),
            });
        }

        match self
            .retriever
            .retrieve(&text)
            .await
            .map_err(PipelineError::Retrieval)?
        {
            RetrievalResult::Matched(answer) => {
                debug!(id = %message.id, score = answer.score, query = %answer.query, "Retrieved known answer");
                let text = match self.postprocessor.correct_grammar(&answer) {
                    Ok(corrected) => corrected,
                    Err(e) => {
                        warn!(id = %message.id, error = %e, "Grammar correction failed, sending retrieved text as-is");
                        answer.reply.clone()
                    }
                };
                Ok(ReplyDecision::Retrieved {
                    text,
                    score: answer.score,
                })
            }
            RetrievalResult::NoMatch => {
                let raw = self
                    .generator
                    .generate(&text, self.settings.num_candidates, self.settings.max_length)
                    .await
                    .map_err(PipelineError::Generation)?;

                if raw.trim().is_empty() {
                    return Err(PipelineError::Generation(InferenceError::EmptyOutput {
                        service: "generator".to_string(),
                    }));
                }

                let text = match self.postprocessor.postprocess(&raw, &message.author_handle) {
                    Ok(processed) => processed,
                    Err(e) => {
                        warn!(id = %message.id, error = %e, "Post-processing failed, sending generated text as-is");
                        raw
                    }
                };
                debug!(id = %message.id, "Generated reply");
                Ok(ReplyDecision::Generated { text })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use crate::pipeline::test_support::*;
    use crate::pipeline::types::Provenance;

    fn processor(
        spam: Arc<KeywordSpam>,
        retriever: Arc<MapRetriever>,
        generator: Arc<ScriptedGenerator>,
        postprocessor: Arc<dyn PostProcessor>,
    ) -> ReplyProcessor {
        ReplyProcessor::new(
            SpamGate::new(spam),
            retriever,
            generator,
            postprocessor,
            ReplySettings {
                suppression_reply: "....".into(),
                num_candidates: 2,
                max_length: 64,
            },
        )
    }

    #[tokio::test]
    async fn spam_short_circuits_retrieval_and_generation() {
        let spam = Arc::new(KeywordSpam::new("spam"));
        let retriever = Arc::new(MapRetriever::new());
        let generator = Arc::new(ScriptedGenerator::new("unused"));
        let p = processor(
            spam.clone(),
            retriever.clone(),
            generator.clone(),
            Arc::new(TaggingPostProcessor),
        );

        let decision = p.decide(&message(6, "alice", "SPAM text")).await.unwrap();
        assert_eq!(decision, ReplyDecision::Suppressed { text: "....".into() });
        assert_eq!(decision.score(), 0.0);
        assert_eq!(spam.calls(), vec!["spam text".to_string()]);
        assert_eq!(retriever.calls(), 0);
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn retrieved_answer_is_grammar_corrected_and_keeps_score() {
        let retriever = Arc::new(MapRetriever::new().with_answer("what is your name?", "i am bot", 14.5));
        let generator = Arc::new(ScriptedGenerator::new("unused"));
        let p = processor(
            Arc::new(KeywordSpam::new("spam")),
            retriever,
            generator.clone(),
            Arc::new(TaggingPostProcessor),
        );

        let decision = p
            .decide(&message(1, "alice", "What is   your name?"))
            .await
            .unwrap();
        assert_eq!(
            decision,
            ReplyDecision::Retrieved {
                text: "corrected(i am bot)".into(),
                score: 14.5
            }
        );
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn no_match_generates_once_with_recipient() {
        let generator = Arc::new(ScriptedGenerator::new("hi there"));
        let p = processor(
            Arc::new(KeywordSpam::new("spam")),
            Arc::new(MapRetriever::new()),
            generator.clone(),
            Arc::new(TaggingPostProcessor),
        );

        let decision = p.decide(&message(5, "alice", "Hello")).await.unwrap();
        assert_eq!(decision.text(), "post(hi there -> alice)");
        assert_eq!(decision.provenance(), Provenance::Generated);
        assert_eq!(decision.score(), 0.0);
        assert_eq!(generator.calls(), vec![("hello".to_string(), 2, 64)]);
    }

    #[tokio::test]
    async fn post_processing_failure_passes_text_through() {
        let p = processor(
            Arc::new(KeywordSpam::new("spam")),
            Arc::new(MapRetriever::new().with_answer("known", "raw answer", 3.0)),
            Arc::new(ScriptedGenerator::new("raw generated")),
            Arc::new(FailingPostProcessor),
        );

        let generated = p.decide(&message(1, "bob", "new question")).await.unwrap();
        assert_eq!(generated.text(), "raw generated");

        let retrieved = p.decide(&message(2, "bob", "known")).await.unwrap();
        assert_eq!(retrieved.text(), "raw answer");
        assert_eq!(retrieved.score(), 3.0);
    }

    #[tokio::test]
    async fn blank_generation_is_fatal_to_message() {
        let p = processor(
            Arc::new(KeywordSpam::new("spam")),
            Arc::new(MapRetriever::new()),
            Arc::new(ScriptedGenerator::new("   ")),
            Arc::new(TaggingPostProcessor),
        );

        let err = p.decide(&message(1, "bob", "hello")).await.unwrap_err();
        assert_eq!(err.class(), FailureClass::FatalToMessage);
    }

    #[tokio::test]
    async fn generator_error_is_fatal_to_message() {
        let generator = Arc::new(ScriptedGenerator::new("unused"));
        generator.fail_for("hello", u32::MAX);
        let p = processor(
            Arc::new(KeywordSpam::new("spam")),
            Arc::new(MapRetriever::new()),
            generator,
            Arc::new(TaggingPostProcessor),
        );

        let err = p.decide(&message(1, "bob", "hello")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }

    #[tokio::test]
    async fn retrieval_outage_is_transient() {
        let p = processor(
            Arc::new(KeywordSpam::new("spam")),
            Arc::new(MapRetriever::new().unavailable()),
            Arc::new(ScriptedGenerator::new("unused")),
            Arc::new(TaggingPostProcessor),
        );

        let err = p.decide(&message(1, "bob", "hello")).await.unwrap_err();
        assert_eq!(err.class(), FailureClass::TransientSkippable);
    }
}
