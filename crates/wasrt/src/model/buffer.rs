use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent context feature maps for one sequence.
///
/// The buffer is either empty (unseeded) or holds exactly `capacity` entries,
/// oldest first. Seeding fills every slot with the same value, so the first
/// frame of a sequence sees itself repeated as its own history.
#[derive(Debug, Clone)]
pub struct ContextBuffer<T> {
    capacity: usize,
    frames: VecDeque<T>,
}

impl<T: Clone> ContextBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "context buffer needs at least one slot");
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_seeded(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Replaces the contents with `capacity` copies of `frame`.
    pub fn seed(&mut self, frame: T) {
        self.frames.clear();
        self.frames.extend(std::iter::repeat_n(frame, self.capacity));
    }

    /// Appends `frame` and evicts the oldest entry.
    ///
    /// An unseeded buffer is seeded with `frame` instead.
    pub fn push(&mut self, frame: T) {
        if !self.is_seeded() {
            self.seed(frame);
            return;
        }
        self.frames.pop_front();
        self.frames.push_back(frame);
    }

    /// Ordered copy of the contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.frames.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
