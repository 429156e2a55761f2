// src/audio_buffer.rs

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// ch0[0..N], ch1[0..N], ...
    Planar,
    /// frame by frame: ch0, ch1, ..., chN
    Interleaved,
}

/// Borrowed multichannel block owned by the host.
///
/// The engine only ever adds into it; clearing is the host's job.
#[derive(Debug)]
pub struct AudioBuffer<'a> {
    pub channels: usize,
    pub frames: usize,
    pub layout: Layout,
    pub data: &'a mut [f32],
}

impl<'a> AudioBuffer<'a> {
    /// Wrap planar data (`channels` contiguous runs of equal length).
    #[inline]
    pub fn planar(data: &'a mut [f32], channels: usize) -> Self {
        Self::with_layout(data, channels, Layout::Planar)
    }

    /// Wrap interleaved data.
    #[inline]
    pub fn interleaved(data: &'a mut [f32], channels: usize) -> Self {
        Self::with_layout(data, channels, Layout::Interleaved)
    }

    fn with_layout(data: &'a mut [f32], channels: usize, layout: Layout) -> Self {
        let frames = if channels == 0 { 0 } else { data.len() / channels };
        Self {
            channels,
            frames,
            layout,
            data,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    #[inline]
    fn index(&self, ch: usize, frame: usize) -> usize {
        match self.layout {
            Layout::Planar => ch * self.frames + frame,
            Layout::Interleaved => frame * self.channels + ch,
        }
    }

    #[inline]
    pub fn sample(&self, ch: usize, frame: usize) -> f32 {
        self.data[self.index(ch, frame)]
    }

    /// Add `value` to every channel at `frame`. Out-of-range frames are ignored.
    #[inline]
    pub fn add_to_all(&mut self, frame: usize, value: f32) {
        if frame >= self.frames {
            return;
        }
        for ch in 0..self.channels {
            let i = self.index(ch, frame);
            self.data[i] += value;
        }
    }

    /// Planar channel slice.
    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        debug_assert_eq!(self.layout, Layout::Planar);
        let start = ch * self.frames;
        &self.data[start..start + self.frames]
    }

    /// Get direct access to the sample data.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_to_all_planar() {
        let mut data = vec![0.0; 8];
        let mut buffer = AudioBuffer::planar(&mut data, 2);
        buffer.add_to_all(1, 0.5);
        buffer.add_to_all(1, 0.25);
        assert_eq!(buffer.frames, 4);
        assert_eq!(buffer.channel(0), &[0.0, 0.75, 0.0, 0.0]);
        assert_eq!(buffer.channel(1), &[0.0, 0.75, 0.0, 0.0]);
    }

    #[test]
    fn test_add_to_all_interleaved() {
        let mut data = vec![0.0; 6];
        let mut buffer = AudioBuffer::interleaved(&mut data, 2);
        buffer.add_to_all(2, 1.0);
        buffer.add_to_all(3, 1.0);
        assert_eq!(buffer.samples(), &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_zero_channels_is_inert() {
        let mut data = vec![0.0; 4];
        let mut buffer = AudioBuffer::planar(&mut data, 0);
        buffer.add_to_all(0, 1.0);
        assert_eq!(buffer.frames, 0);
        assert!(buffer.samples().iter().all(|s| *s == 0.0));
    }
}
