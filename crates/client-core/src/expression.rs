//! Expression signal bridge.
//!
//! Couples a facial-expression classifier to a call's side channel: while a
//! call is active the bridge samples the classifier on a fixed cadence and
//! sends a configured message whenever the target label dominates a sample.
//! The classifier itself sits behind [`ExpressionSource`] so the bridge can
//! be driven by a real model or a scripted stand-in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::ExpressionConfig;

/// The expression classes a source can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionLabel {
    Angry,
    Disgusted,
    Fearful,
    Happy,
    Neutral,
    Sad,
    Surprised,
}

impl ExpressionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Angry => "angry",
            Self::Disgusted => "disgusted",
            Self::Fearful => "fearful",
            Self::Happy => "happy",
            Self::Neutral => "neutral",
            Self::Sad => "sad",
            Self::Surprised => "surprised",
        }
    }
}

impl std::fmt::Display for ExpressionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification: a score per detected label.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionSample {
    /// Label scores in classifier order. Not required to sum to 1.
    pub scores: Vec<(ExpressionLabel, f32)>,
}

impl ExpressionSample {
    pub fn new(scores: Vec<(ExpressionLabel, f32)>) -> Self {
        Self { scores }
    }

    /// The label with the highest score.
    ///
    /// Ties keep the earliest label in classifier order; an empty sample has
    /// no dominant label.
    pub fn dominant(&self) -> Option<ExpressionLabel> {
        let mut best: Option<(ExpressionLabel, f32)> = None;
        for &(label, score) in &self.scores {
            match best {
                Some((_, best_score)) if score > best_score => best = Some((label, score)),
                None => best = Some((label, score)),
                _ => {}
            }
        }
        best.map(|(label, _)| label)
    }
}

/// Source of expression classifications.
///
/// `sample` returns `None` when no face is currently detectable; the bridge
/// treats that as a non-match.
#[async_trait]
pub trait ExpressionSource: Send + Sync {
    async fn sample(&self) -> Option<ExpressionSample>;
}

/// Samples an [`ExpressionSource`] and feeds matches into a side channel.
///
/// Owned by the call session: started when media is established, stopped when
/// the session closes. Dropping the side-channel sender also stops the loop,
/// so the bridge can never outlive the call it belongs to.
pub struct ExpressionBridge {
    source: Arc<dyn ExpressionSource>,
    config: ExpressionConfig,
    task: StdMutex<Option<JoinHandle<()>>>,
    messages_sent: Arc<AtomicU64>,
}

impl std::fmt::Debug for ExpressionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionBridge")
            .field("config", &self.config)
            .field("messages_sent", &self.messages_sent.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ExpressionBridge {
    pub fn new(source: Arc<dyn ExpressionSource>, config: ExpressionConfig) -> Self {
        Self {
            source,
            config,
            task: StdMutex::new(None),
            messages_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts sampling into `outbound`. A running loop is replaced.
    pub fn start(&self, outbound: mpsc::Sender<String>) {
        self.stop();

        let source = Arc::clone(&self.source);
        let config = self.config.clone();
        let messages_sent = Arc::clone(&self.messages_sent);
        let handle = tokio::spawn(sample_loop(source, config, outbound, messages_sent));

        let mut guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(handle);
    }

    /// Stops sampling. Idempotent.
    pub fn stop(&self) {
        let handle = {
            let mut guard = match self.task.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Whether the sampling loop is currently alive.
    pub fn is_running(&self) -> bool {
        let guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Messages sent over the lifetime of this bridge.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

impl Drop for ExpressionBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sample_loop(
    source: Arc<dyn ExpressionSource>,
    config: ExpressionConfig,
    outbound: mpsc::Sender<String>,
    messages_sent: Arc<AtomicU64>,
) {
    let mut interval = tokio::time::interval(config.sample_interval);
    // A stalled classifier must not cause a catch-up burst of sends
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut previous_match = false;
    loop {
        interval.tick().await;
        if outbound.is_closed() {
            break;
        }

        let Some(sample) = source.sample().await else {
            // No face in frame ends any running episode
            previous_match = false;
            continue;
        };

        let matches = sample.dominant() == Some(config.target_label);
        let should_send = if config.edge_triggered {
            matches && !previous_match
        } else {
            matches
        };
        previous_match = matches;

        if should_send {
            if outbound.send(config.message.clone()).await.is_err() {
                break;
            }
            messages_sent.fetch_add(1, Ordering::Relaxed);
            debug!("Expression bridge sent message for {}", config.target_label);
        }
    }
}
