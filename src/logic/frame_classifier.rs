//! SPDX-License-Identifier: GPL-3.0-or-later

//! Stage 2: maps each Frame to an ActivityLabel via the external vision
//! model. A parallel first pass classifies every frame without
//! prior-label context, bounded by a `tokio::sync::Semaphore`; a cheap
//! sequential refinement pass then re-labels only the low-confidence
//! transitions using the true previous label, preserving the invariant
//! that output order matches input order regardless of internal
//! concurrency.

use crate::config::{PipelineConfig, RetryConfig};
use crate::error::{PipelineError, StageName};
use crate::external::retry::{with_retry, CircuitBreaker};
use crate::external::vision_client::VisionClient;
use crate::logic::coordinator::CancellationSignal;
use crate::types::{ActivityLabel, Classification, Frame};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Calls the vision client once for a frame, applying the configured
/// retry policy and recording the outcome on the shared circuit breaker.
/// A failed call never propagates: it becomes a soft-failure
/// Classification.
async fn classify_one(
    client: &VisionClient,
    retry: &RetryConfig,
    breaker: &CircuitBreaker,
    frame: &Frame,
    prev_label: Option<ActivityLabel>,
) -> Classification {
    let result = with_retry(retry, || async {
        client.classify_frame(&frame.bytes, prev_label).await
    })
    .await;

    match result {
        Ok(v) => {
            breaker.record_success();
            Classification {
                frame_index: frame.index,
                timestamp: frame.timestamp,
                label: v.label,
                confidence: v.confidence,
                note: v.note,
            }
        }
        Err(e) => {
            breaker.record_failure(retry.circuit_breaker_threshold);
            Classification {
                frame_index: frame.index,
                timestamp: frame.timestamp,
                label: ActivityLabel::Idle,
                confidence: 0.0,
                note: Some(format!("classification failed: {e}")),
            }
        }
    }
}

/// Classifies an ordered frame sequence, returning an equal-length,
/// same-order list of Classifications. Honors `cancel` at each
/// suspension point (semaphore acquisition in pass 1, each iteration of
/// the pass-2 refinement loop), returning `Cancelled` without completing
/// the stage.
pub async fn classify(
    frames: &[Frame],
    client: Arc<VisionClient>,
    cfg: &PipelineConfig,
    source_id: &str,
    cancel: &CancellationSignal,
) -> Result<Vec<Classification>, PipelineError> {
    if frames.is_empty() {
        return Ok(Vec::new());
    }

    let breaker = Arc::new(CircuitBreaker::new());
    let semaphore = Arc::new(Semaphore::new(cfg.concurrency));
    let threshold = cfg.retry.circuit_breaker_threshold;
    let mut results: Vec<Option<Classification>> = vec![None; frames.len()];

    // Pass 1: parallel, no prior-label context, bounded by `concurrency`.
    let mut joinset: JoinSet<(usize, Option<Classification>)> = JoinSet::new();
    for (i, frame) in frames.iter().cloned().enumerate() {
        let client = Arc::clone(&client);
        let breaker = Arc::clone(&breaker);
        let semaphore = Arc::clone(&semaphore);
        let retry = cfg.retry.clone();
        let cancel = cancel.clone();
        joinset.spawn(async move {
            if cancel.is_cancelled() {
                return (i, None);
            }
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            if cancel.is_cancelled() || breaker.is_tripped(threshold) {
                return (i, None);
            }
            let c = classify_one(&client, &retry, &breaker, &frame, None).await;
            (i, Some(c))
        });
    }

    while let Some(joined) = joinset.join_next().await {
        let (i, classification) =
            joined.map_err(|e| PipelineError::internal(StageName::FrameClassifier, source_id, e))?;
        results[i] = classification;
    }

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled {
            source_id: source_id.to_string(),
        });
    }

    if breaker.is_tripped(threshold) {
        return Err(PipelineError::classifier_unavailable(
            source_id,
            "circuit breaker tripped after consecutive classification failures",
        ));
    }

    let mut classifications: Vec<Classification> = results
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            c.unwrap_or_else(|| Classification {
                frame_index: frames[i].index,
                timestamp: frames[i].timestamp,
                label: ActivityLabel::Idle,
                confidence: 0.0,
                note: Some("classification aborted before completion".into()),
            })
        })
        .collect();

    // Pass 2: sequential refinement of low-confidence transitions, now
    // that the true previous label is known for every position.
    let mut prev_label = ActivityLabel::Idle;
    for i in 0..classifications.len() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                source_id: source_id.to_string(),
            });
        }
        if classifications[i].confidence < cfg.resample_confidence_threshold {
            if breaker.is_tripped(threshold) {
                return Err(PipelineError::classifier_unavailable(
                    source_id,
                    "circuit breaker tripped during refinement pass",
                ));
            }
            classifications[i] =
                classify_one(&client, &cfg.retry, &breaker, &frames[i], Some(prev_label)).await;
        }
        prev_label = classifications[i].label;
    }

    Ok(classifications)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::external::retry::FailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry_cfg(max_attempts: u32, threshold: u32) -> RetryConfig {
        RetryConfig {
            initial_backoff_ms: 1,
            factor: 2,
            max_attempts,
            circuit_breaker_threshold: threshold,
        }
    }

    /// A model call that fails transiently on its first attempt but
    /// succeeds on retry leaves the breaker clean and the call ultimately
    /// recorded as a success.
    #[tokio::test]
    async fn intermittent_failure_recovers_without_tripping_breaker() {
        let cfg = retry_cfg(3, 10);
        let breaker = CircuitBreaker::new();
        let calls = AtomicU32::new(0);

        let result: Result<i32, String> = with_retry(&cfg, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err((format!("503"), FailureKind::Transient))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        match &result {
            Ok(_) => breaker.record_success(),
            Err(_) => {
                breaker.record_failure(cfg.circuit_breaker_threshold);
            }
        }

        assert_eq!(result.unwrap(), 7);
        assert!(!breaker.is_tripped(cfg.circuit_breaker_threshold));
    }

    /// Ten consecutive classification failures (each exhausting its own
    /// retry budget) trip the circuit breaker at its default threshold.
    #[tokio::test]
    async fn tenth_consecutive_failure_trips_breaker() {
        let cfg = retry_cfg(1, 10);
        let breaker = CircuitBreaker::new();

        for attempt in 1..=10u32 {
            let result: Result<i32, String> = with_retry(&cfg, || async {
                Err::<i32, _>(("model unreachable".to_string(), FailureKind::Transient))
            })
            .await;
            assert!(result.is_err());
            let tripped = breaker.record_failure(cfg.circuit_breaker_threshold);
            assert_eq!(tripped, attempt == 10, "unexpected trip state at attempt {attempt}");
        }

        assert!(breaker.is_tripped(cfg.circuit_breaker_threshold));
    }

    /// A signal cancelled before the stage starts short-circuits every
    /// spawned task at its semaphore-acquire suspension point and the
    /// stage returns `Cancelled` without ever calling the vision model.
    #[tokio::test]
    async fn cancellation_before_start_returns_cancelled() {
        use crate::config::{PipelineConfig, VisionModelConfig};
        use crate::external::vision_client::VisionClient;
        use crate::types::{Frame, ImageEncoding};

        let toml = r#"
        sampling_rate = 3

        [vision_model]
        model = "vision-mini-2"
        endpoint = "https://models.example.com/v1/vision"
        "#;
        let cfg = PipelineConfig::from_toml_str("B6", toml).unwrap();

        let vision_cfg = VisionModelConfig {
            model: "vision-mini-2".to_string(),
            temperature: None,
            max_output_tokens: None,
            endpoint: "https://models.example.com/v1/vision".to_string(),
            api_key_env: None,
        };
        let client = Arc::new(VisionClient::new(vision_cfg, "system prompt".to_string()).unwrap());

        let frames = vec![Frame {
            index: 0,
            timestamp: 0.0,
            bytes: vec![0u8; 4],
            encoding: ImageEncoding::Jpeg,
        }];

        let cancel = CancellationSignal::new();
        cancel.cancel();

        let result = classify(&frames, client, &cfg, "B6", &cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled { .. })));
    }
}
