//! Renderer doubles and channel helpers

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use livescope::{ConnectionState, Frame, LivescopeError, Renderer, Result};
use std::sync::{Arc, Mutex};

/// What a [`RecordingRenderer`] saw in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct SeenFrame {
    pub index: u64,
    pub values: Vec<f64>,
    pub state: ConnectionState,
}

/// Renderer that records every frame it is given
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    frames: Arc<Mutex<Vec<SeenFrame>>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<SeenFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn boxed(&self) -> Box<dyn Renderer> {
        Box::new(self.clone())
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.frames.lock().unwrap().push(SeenFrame {
            index: frame.index(),
            values: frame.window().values().collect(),
            state: frame.state().clone(),
        });
        Ok(())
    }
}

/// Renderer that blocks chosen frames until the test releases them
///
/// `started` receives each frame index as rendering begins.
pub struct GatedRenderer {
    blocked: Vec<u64>,
    gate: Receiver<()>,
    started: Sender<u64>,
}

/// Test-side controls for a [`GatedRenderer`]
pub struct Gate {
    pub release: Sender<()>,
    pub started: Receiver<u64>,
}

impl GatedRenderer {
    pub fn new(blocked: Vec<u64>) -> (Self, Gate) {
        let (release, gate) = bounded(16);
        let (started_tx, started) = unbounded();
        (
            Self {
                blocked,
                gate,
                started: started_tx,
            },
            Gate { release, started },
        )
    }
}

impl Renderer for GatedRenderer {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        let _ = self.started.send(frame.index());
        if self.blocked.contains(&frame.index()) {
            self.gate
                .recv()
                .map_err(|_| LivescopeError::Render("gate dropped".to_string()))?;
        }
        Ok(())
    }
}

/// Renderer that fails every frame
pub fn failing_renderer() -> Box<dyn Renderer> {
    Box::new(|_: &Frame| -> Result<()> { Err(LivescopeError::Render("boom".to_string())) })
}
