/// Ring of the most recent frames, read back oldest first.
#[derive(Clone, Debug)]
pub struct FrameStack {
    frame_size: usize,
    buffer: Vec<Vec<f32>>,
    next_slot: usize,
}

impl FrameStack {
    pub fn new(frames: usize, frame_size: usize) -> Self {
        assert!(frames > 0, "a frame stack holds at least one frame");

        Self {
            frame_size,
            buffer: vec![vec![0.0; frame_size]; frames],
            next_slot: 0,
        }
    }

    pub fn frames(&self) -> usize {
        self.buffer.len()
    }

    /// Fills every slot with `frame`, so the first observation of an episode
    /// carries no history from the previous one.
    pub fn reset(&mut self, frame: &[f32]) {
        assert_eq!(frame.len(), self.frame_size);

        self.buffer
            .iter_mut()
            .for_each(|slot| slot.copy_from_slice(frame));
        self.next_slot = 0;
    }

    pub fn push(&mut self, frame: &[f32]) {
        assert_eq!(frame.len(), self.frame_size);

        self.buffer[self.next_slot].copy_from_slice(frame);
        self.next_slot = (self.next_slot + 1) % self.buffer.len();
    }

    /// Stacked frames, `[frames * frame_size]`
    pub fn observation(&self) -> Vec<f32> {
        let len = self.buffer.len();

        (0..len)
            .map(|ndx| &self.buffer[(self.next_slot + ndx) % len])
            .flat_map(|frame| frame.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_repeats_frame() {
        let mut stack = FrameStack::new(3, 2);
        stack.reset(&[1.0, 2.0]);

        assert_eq!(stack.observation(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn oldest_frame_first() {
        let mut stack = FrameStack::new(3, 1);
        stack.reset(&[0.0]);

        stack.push(&[1.0]);
        stack.push(&[2.0]);
        assert_eq!(stack.observation(), vec![0.0, 1.0, 2.0]);

        stack.push(&[3.0]);
        stack.push(&[4.0]);
        assert_eq!(stack.observation(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    #[should_panic]
    fn frame_size_mismatch() {
        let mut stack = FrameStack::new(2, 4);
        stack.push(&[1.0]);
    }
}
