//! Test data builders for creating sessions

use livescope::config::PipelineConfig;
use livescope::supervisor::BackoffPolicy;
use livescope::{ManualClock, PushHandle, PushTransport, Renderer, StreamSession};
use std::sync::Arc;

/// A session fed by a [`PushTransport`] and driven by a [`ManualClock`]
pub struct Harness {
    pub session: StreamSession,
    pub push: PushHandle,
    pub clock: ManualClock,
}

/// Builder for test [`Harness`]es
pub struct SessionBuilder {
    config: PipelineConfig,
    renderer: Option<Box<dyn Renderer>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        let mut config = PipelineConfig::default();
        config.reconnect.backoff = BackoffPolicy::Fixed { delay_ms: 100 };
        Self {
            config,
            renderer: None,
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.buffer.capacity = capacity;
        self
    }

    pub fn max_batch_samples(mut self, max: usize) -> Self {
        self.config.buffer.max_batch_samples = max;
        self
    }

    pub fn max_fps(mut self, fps: u32) -> Self {
        self.config.render.max_fps = fps;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.reconnect.backoff = backoff;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    pub fn renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn build(self) -> Harness {
        let clock = ManualClock::new();
        let (transport, push) = PushTransport::new();

        let mut builder = StreamSession::builder(self.config)
            .clock(Arc::new(clock.clone()))
            .transport(Box::new(transport));
        if let Some(renderer) = self.renderer {
            builder = builder.renderer(renderer);
        }

        Harness {
            session: builder.build().expect("test session should build"),
            push,
            clock,
        }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_builder() {
        let harness = SessionBuilder::new().capacity(8).max_attempts(1).build();
        assert_eq!(harness.session.config().buffer.capacity, 8);
        assert_eq!(harness.session.config().reconnect.max_attempts, 1);
        assert!(!harness.push.is_open());
    }
}
