//! Direct routing of LFE sources to the subwoofer bus

use crate::layout::SpeakerLayout;
use crate::scene::{ActiveMask, Scene};
use crate::streaming::SlotView;
use crate::types::BusBuffer;

/// Sums active LFE sources and feeds the sum to every subwoofer
///
/// Each subwoofer receives `sum * compensation / subwoofer_count`. Nothing
/// else the mixer does (master gain, focus, elevation, solo) reaches it.
#[derive(Debug, Clone)]
pub struct LfeRouter {
    /// (source index, stream channel) of every LFE source
    sources: Vec<(usize, usize)>,
    sub_channels: Vec<usize>,
    gain: f32,
    sum: Vec<f32>,
}

impl LfeRouter {
    /// `compensation` is the overall LFE level before the split across subs
    pub fn new(scene: &Scene, layout: &SpeakerLayout, compensation: f32, max_block_frames: usize) -> Self {
        let sources = scene
            .sources()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_lfe())
            .map(|(i, s)| (i, s.channel))
            .collect();
        let sub_channels: Vec<usize> = layout.subwoofers().iter().map(|s| s.channel).collect();
        let gain = if sub_channels.is_empty() {
            0.0
        } else {
            compensation / sub_channels.len() as f32
        };
        Self {
            sources,
            sub_channels,
            gain,
            sum: vec![0.0; max_block_frames],
        }
    }

    pub fn is_active(&self) -> bool {
        !self.sources.is_empty() && !self.sub_channels.is_empty()
    }

    /// Per-subwoofer gain applied to the LFE sum
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Add `len` frames from chunk-local `local` into the subs at `offset`
    pub fn route(
        &mut self,
        mask: &ActiveMask,
        view: &SlotView<'_>,
        local: usize,
        len: usize,
        bus: &mut BusBuffer,
        offset: usize,
    ) {
        if !self.is_active() {
            return;
        }
        let len = len.min(self.sum.len());
        let sum = &mut self.sum[..len];
        sum.fill(0.0);

        let mut any = false;
        for &(index, channel) in &self.sources {
            if !mask.is_active(index) {
                continue;
            }
            any = true;
            for (acc, &s) in sum.iter_mut().zip(view.frames(channel, local, len)) {
                *acc += s;
            }
        }
        if !any {
            return;
        }

        for &ch in &self.sub_channels {
            let out = &mut bus.channel_mut(ch)[offset..offset + len];
            for (o, &s) in out.iter_mut().zip(sum.iter()) {
                *o += s * self.gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{DoubleBuffer, StreamResource};
    use std::io::Cursor;
    use std::sync::Arc;

    fn wav(frames: u32) -> Vec<u8> {
        // Channel 0: 0.5, channel 1: 0.25, channel 2: 1.0
        let spec = hound::WavSpec {
            channels: 3,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..frames {
                writer.write_sample(0.5f32).unwrap();
                writer.write_sample(0.25f32).unwrap();
                writer.write_sample(1.0f32).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_lfe_split_across_subs() {
        let layout = SpeakerLayout::from_yaml_str(
            "speakers:\n  - { channel: 0 }\nsubwoofers:\n  - { channel: 1 }\n  - { channel: 3 }\n",
        )
        .unwrap();
        let scene = Scene::from_yaml_str(
            "sources:\n  - { name: a, channel: 0, kind: lfe }\n  - { name: b, channel: 1, kind: lfe }\n  - { name: c, channel: 2, kind: direct_speaker, speaker: 0 }\n",
        )
        .unwrap();
        let mask = ActiveMask::new(scene.len());

        let resource = StreamResource::from_source(Box::new(Cursor::new(wav(64))), 64).unwrap();
        let buffer = DoubleBuffer::new(Arc::new(resource), 64, 64);
        buffer.prime(0).unwrap();
        let view = buffer.active_view().unwrap();

        let mut router = LfeRouter::new(&scene, &layout, 0.95, 16);
        let mut bus = BusBuffer::new(layout.output_channels(), 16);
        router.route(&mask, &view, 0, 16, &mut bus, 0);

        let expected = 0.75 * 0.95 / 2.0;
        assert!(bus.channel(1).iter().all(|&s| (s - expected).abs() < 1e-6));
        assert_eq!(bus.channel(1), bus.channel(3));
        // Main bus untouched
        assert!(bus.channel(0).iter().all(|&s| s == 0.0));

        // Masked LFE source drops out of the sum
        mask.set(1, false);
        bus.fill_silence();
        router.route(&mask, &view, 0, 16, &mut bus, 0);
        assert!((bus.channel(3)[0] - 0.5 * 0.95 / 2.0).abs() < 1e-6);
    }
}
