//! Client configuration.

use std::time::Duration;

use crate::expression::ExpressionLabel;
use crate::media::MediaConstraints;

/// Default bound on how long a media negotiation may run.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between expression samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a [`CallSessionManager`].
///
/// [`CallSessionManager`]: crate::session::CallSessionManager
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling registry, e.g. `ws://localhost:9000/channel`.
    pub registry_url: String,
    /// How long a negotiation may run before the attempt is abandoned.
    pub negotiation_timeout: Duration,
    /// Which local tracks to ask the media engine for.
    pub media: MediaConstraints,
    /// Expression bridge behavior.
    pub expression: ExpressionConfig,
}

impl ClientConfig {
    /// Creates a configuration pointing at the given registry.
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            media: MediaConstraints::default(),
            expression: ExpressionConfig::default(),
        }
    }

    /// Sets the negotiation deadline.
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Sets the media constraints used when acquiring local tracks.
    pub fn with_media(mut self, media: MediaConstraints) -> Self {
        self.media = media;
        self
    }

    /// Sets the expression bridge behavior.
    pub fn with_expression(mut self, expression: ExpressionConfig) -> Self {
        self.expression = expression;
        self
    }
}

/// Configuration for the expression signal bridge.
#[derive(Debug, Clone)]
pub struct ExpressionConfig {
    /// How often the expression source is sampled while a call is active.
    pub sample_interval: Duration,
    /// The label that triggers a side-channel message.
    pub target_label: ExpressionLabel,
    /// The message sent when the target label dominates a sample.
    pub message: String,
    /// When `true`, a message is sent only on the transition into the target
    /// label rather than on every matching sample.
    ///
    /// The default is `false`: every sampled match sends, which means a held
    /// expression repeats the message at the sample rate. Set this to get
    /// one message per episode instead.
    pub edge_triggered: bool,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            target_label: ExpressionLabel::Happy,
            message: "I'm happy!".to_string(),
            edge_triggered: false,
        }
    }
}

impl ExpressionConfig {
    /// Sets the sampling interval.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets the label that triggers the message.
    pub fn with_target_label(mut self, label: ExpressionLabel) -> Self {
        self.target_label = label;
        self
    }

    /// Sets the message sent on a match.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Switches between per-sample and per-episode sending.
    pub fn with_edge_triggered(mut self, edge_triggered: bool) -> Self {
        self.edge_triggered = edge_triggered;
        self
    }
}
