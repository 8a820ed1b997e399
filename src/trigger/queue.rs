// src/trigger/queue.rs

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::types::OverlapBehaviour;

/// Fires that arrived while a run of the same pipeline was active.
///
/// - `Queue`: keep up to `max_pending` fires in arrival order; when full, the
///   oldest pending fire is dropped.
/// - `Coalesce`: keep only the most recent fire.
///
/// Dropped fires are handed back to the caller so it can tell whoever was
/// waiting on them.
#[derive(Debug)]
pub struct FireQueue<T> {
    behaviour: OverlapBehaviour,
    max_pending: usize,
    pending: VecDeque<T>,
}

impl<T> FireQueue<T> {
    /// `max_pending` is clamped to at least 1.
    pub fn new(behaviour: OverlapBehaviour, max_pending: usize) -> Self {
        Self {
            behaviour,
            max_pending: max_pending.max(1),
            pending: VecDeque::new(),
        }
    }

    pub fn behaviour(&self) -> OverlapBehaviour {
        self.behaviour
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remember a fire for later. Returns the fires displaced by it.
    pub fn push(&mut self, fire: T) -> Vec<T> {
        let mut dropped = Vec::new();

        match self.behaviour {
            OverlapBehaviour::Queue => {
                self.pending.push_back(fire);
                if self.pending.len() > self.max_pending {
                    warn!(
                        pending = self.pending.len(),
                        max_pending = self.max_pending,
                        "overlap queue full; dropping oldest pending fire"
                    );
                }
                while self.pending.len() > self.max_pending {
                    dropped.extend(self.pending.pop_front());
                }
            }
            OverlapBehaviour::Coalesce => {
                dropped.extend(self.pending.drain(..));
                self.pending.push_back(fire);
                debug!(replaced = dropped.len(), "coalesced pending fire");
            }
        }

        dropped
    }

    /// Next fire to run, oldest first.
    pub fn pop(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    /// Take every pending fire.
    pub fn drain(&mut self) -> Vec<T> {
        self.pending.drain(..).collect()
    }
}
