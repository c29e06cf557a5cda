//! Bus-to-device channel map
//!
//! CSV format, one row per bus channel:
//!
//! ```text
//! # comment
//! layout,device
//! 0,0
//! 1,2
//! ```
//!
//! Column order follows the header. A map is validated completely before it
//! is used; any bad row rejects the whole file.

use std::path::Path;

use thiserror::Error;

use crate::layout::SpeakerLayout;
use crate::types::BusBuffer;

#[derive(Error, Debug)]
pub enum ChannelMapError {
    #[error("Channel map has no 'layout,device' header")]
    MissingHeader,

    #[error("Line {line}: malformed row '{content}'")]
    Malformed { line: usize, content: String },

    #[error("Device channel {device} is targeted by bus channels {first} and {second}")]
    DuplicateTarget { device: usize, first: usize, second: usize },

    #[error("Bus channel {bus} targets device channel {device}, device has {device_channels}")]
    TargetOutOfRange { bus: usize, device: usize, device_channels: usize },

    #[error("Bus channel {bus} doesn't exist; layout has {bus_channels}")]
    BusOutOfRange { bus: usize, bus_channels: usize },

    #[error("Bus channel {0} is mapped twice")]
    DuplicateBus(usize),

    #[error("Bus channel {0} carries a speaker but has no device channel")]
    Unmapped(usize),

    #[error("Failed to read channel map: {0}")]
    Io(#[from] std::io::Error),
}

pub type ChannelMapResult<T> = Result<T, ChannelMapError>;

/// Validated, injective bus→device channel map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    /// One optional device channel per bus channel
    targets: Vec<Option<usize>>,
    device_channels: usize,
    identity: bool,
}

impl ChannelMap {
    /// Bus channel `n` to device channel `n`
    pub fn identity(bus_channels: usize) -> Self {
        Self {
            targets: (0..bus_channels).map(Some).collect(),
            device_channels: bus_channels,
            identity: true,
        }
    }

    /// Validate explicit `(bus, device)` pairs against the layout and device
    pub fn from_pairs(
        pairs: &[(usize, usize)],
        layout: &SpeakerLayout,
        device_channels: usize,
    ) -> ChannelMapResult<Self> {
        let bus_channels = layout.output_channels();
        let mut targets: Vec<Option<usize>> = vec![None; bus_channels];
        let mut owner: Vec<Option<usize>> = vec![None; device_channels];

        for &(bus, device) in pairs {
            if bus >= bus_channels {
                return Err(ChannelMapError::BusOutOfRange { bus, bus_channels });
            }
            if device >= device_channels {
                return Err(ChannelMapError::TargetOutOfRange {
                    bus,
                    device,
                    device_channels,
                });
            }
            if targets[bus].is_some() {
                return Err(ChannelMapError::DuplicateBus(bus));
            }
            if let Some(first) = owner[device] {
                return Err(ChannelMapError::DuplicateTarget {
                    device,
                    first,
                    second: bus,
                });
            }
            targets[bus] = Some(device);
            owner[device] = Some(bus);
        }

        if let Some(bus) = (0..bus_channels).find(|&ch| layout.has_channel(ch) && targets[ch].is_none()) {
            return Err(ChannelMapError::Unmapped(bus));
        }

        let identity = targets.iter().enumerate().all(|(bus, t)| *t == Some(bus));
        let map = Self {
            targets,
            device_channels,
            identity,
        };
        log::info!(
            "Channel map: {} bus channels -> {} device channels{}",
            bus_channels,
            device_channels,
            if identity { " (identity)" } else { "" }
        );
        Ok(map)
    }

    pub fn from_csv_str(csv: &str, layout: &SpeakerLayout, device_channels: usize) -> ChannelMapResult<Self> {
        let mut columns: Option<(usize, usize)> = None;
        let mut pairs = Vec::new();

        for (index, raw) in csv.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();

            let Some((layout_col, device_col)) = columns else {
                let find = |name: &str| cells.iter().position(|c| c.eq_ignore_ascii_case(name));
                match (find("layout"), find("device")) {
                    (Some(l), Some(d)) => columns = Some((l, d)),
                    _ => return Err(ChannelMapError::MissingHeader),
                }
                continue;
            };

            let malformed = || ChannelMapError::Malformed {
                line: index + 1,
                content: line.to_string(),
            };
            let parse = |col: usize| -> ChannelMapResult<usize> {
                cells.get(col).and_then(|c| c.parse().ok()).ok_or_else(malformed)
            };
            pairs.push((parse(layout_col)?, parse(device_col)?));
        }

        if columns.is_none() {
            return Err(ChannelMapError::MissingHeader);
        }
        Self::from_pairs(&pairs, layout, device_channels)
    }

    pub fn load<P: AsRef<Path>>(path: P, layout: &SpeakerLayout, device_channels: usize) -> ChannelMapResult<Self> {
        let csv = std::fs::read_to_string(path.as_ref())?;
        Self::from_csv_str(&csv, layout, device_channels)
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Number of bus channels; equals the layout's output width
    pub fn bus_channels(&self) -> usize {
        self.targets.len()
    }

    /// Device channels the map was validated against
    pub fn device_channels(&self) -> usize {
        self.device_channels
    }

    pub fn target(&self, bus: usize) -> Option<usize> {
        self.targets.get(bus).copied().flatten()
    }

    /// Device channels the output stream must provide
    pub fn required_device_channels(&self) -> usize {
        self.targets.iter().flatten().max().map_or(0, |&t| t + 1)
    }

    /// True if an interleaved buffer of `out_channels` carries every target
    pub fn fits_output(&self, out_channels: usize) -> bool {
        out_channels >= self.required_device_channels()
    }

    /// Write the bus into an interleaved device buffer of `out_channels`
    ///
    /// Writes `bus.frames()` frames. Device channels without a bus channel
    /// are zeroed. The stream is checked with [`fits_output`](Self::fits_output)
    /// before it starts; a narrower buffer gets silence, never a partial map.
    pub fn apply(&self, bus: &BusBuffer, out: &mut [f32], out_channels: usize) {
        if out_channels == 0 || !self.fits_output(out_channels) {
            out.fill(0.0);
            return;
        }
        let frames = bus.frames().min(out.len() / out_channels);
        out[..frames * out_channels].fill(0.0);

        if self.identity {
            let channels = bus.channels().min(out_channels);
            for ch in 0..channels {
                for (frame, &s) in bus.channel(ch)[..frames].iter().enumerate() {
                    out[frame * out_channels + ch] = s;
                }
            }
            return;
        }

        for (bus_ch, target) in self.targets.iter().enumerate() {
            let Some(device) = *target else { continue };
            for (frame, &s) in bus.channel(bus_ch)[..frames].iter().enumerate() {
                out[frame * out_channels + device] = s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Main speakers on 0, 1, 3 and a sub on 4; bus channel 2 is a gap
    fn layout() -> SpeakerLayout {
        SpeakerLayout::from_yaml_str(
            "speakers:\n  - { channel: 0, azimuth: -30 }\n  - { channel: 1, azimuth: 30 }\n  - { channel: 3, azimuth: 180 }\nsubwoofers:\n  - { channel: 4 }\n",
        )
        .unwrap()
    }

    #[test]
    fn test_csv_with_comments_and_reordered_columns() {
        let csv = "# patch for rack B\n\ndevice , Layout\n0,1\n 1 , 0 \n7,3\n# sub\n5,4\n";
        let map = ChannelMap::from_csv_str(csv, &layout(), 8).unwrap();
        assert_eq!(map.target(0), Some(1));
        assert_eq!(map.target(1), Some(0));
        assert_eq!(map.target(2), None);
        assert_eq!(map.target(3), Some(7));
        assert_eq!(map.bus_channels(), 5);
        assert_eq!(map.required_device_channels(), 8);
        assert!(!map.is_identity());
    }

    #[test]
    fn test_rejects_duplicate_target() {
        let csv = "layout,device\n0,0\n1,0\n3,2\n4,3\n";
        assert!(matches!(
            ChannelMap::from_csv_str(csv, &layout(), 8),
            Err(ChannelMapError::DuplicateTarget { device: 0, first: 0, second: 1 })
        ));
    }

    #[test]
    fn test_rejects_target_out_of_range() {
        let csv = "layout,device\n0,0\n1,1\n3,2\n4,8\n";
        assert!(matches!(
            ChannelMap::from_csv_str(csv, &layout(), 8),
            Err(ChannelMapError::TargetOutOfRange { bus: 4, device: 8, .. })
        ));
    }

    #[test]
    fn test_rejects_incomplete_and_malformed() {
        let missing_sub = "layout,device\n0,0\n1,1\n3,2\n";
        assert!(matches!(
            ChannelMap::from_csv_str(missing_sub, &layout(), 8),
            Err(ChannelMapError::Unmapped(4))
        ));

        let bad_row = "layout,device\n0,0\n1,x\n";
        assert!(matches!(
            ChannelMap::from_csv_str(bad_row, &layout(), 8),
            Err(ChannelMapError::Malformed { line: 3, .. })
        ));

        assert!(matches!(
            ChannelMap::from_csv_str("0,0\n", &layout(), 8),
            Err(ChannelMapError::MissingHeader)
        ));

        let twice = "layout,device\n0,0\n0,1\n";
        assert!(matches!(
            ChannelMap::from_csv_str(twice, &layout(), 8),
            Err(ChannelMapError::DuplicateBus(0))
        ));

        let unknown_bus = "layout,device\n9,0\n";
        assert!(matches!(
            ChannelMap::from_csv_str(unknown_bus, &layout(), 8),
            Err(ChannelMapError::BusOutOfRange { bus: 9, .. })
        ));
    }

    #[test]
    fn test_apply_interleaves_to_targets() {
        let map = ChannelMap::from_pairs(&[(0, 3), (1, 2), (3, 1), (4, 0)], &layout(), 4).unwrap();
        let mut bus = BusBuffer::new(5, 2);
        for ch in 0..5 {
            bus.channel_mut(ch).fill(ch as f32 + 1.0);
        }

        let mut out = vec![9.0; 8];
        map.apply(&bus, &mut out, 4);
        assert_eq!(out, vec![5.0, 4.0, 2.0, 1.0, 5.0, 4.0, 2.0, 1.0]);

        let identity = ChannelMap::identity(5);
        let mut wide = vec![9.0; 12];
        identity.apply(&bus, &mut wide, 6);
        assert_eq!(&wide[..6], &[1.0, 2.0, 3.0, 4.0, 5.0, 0.0]);
    }

    #[test]
    fn test_narrow_output_is_silent_not_partial() {
        let map = ChannelMap::from_pairs(&[(0, 0), (1, 1), (3, 2), (4, 5)], &layout(), 6).unwrap();
        assert!(map.fits_output(6));
        assert!(!map.fits_output(4));

        let mut bus = BusBuffer::new(5, 2);
        for ch in 0..5 {
            bus.channel_mut(ch).fill(1.0);
        }
        let mut out = vec![9.0; 8];
        map.apply(&bus, &mut out, 4);
        assert!(out.iter().all(|&s| s == 0.0));

        let identity = ChannelMap::identity(5);
        assert!(!identity.fits_output(3));
        assert!(identity.fits_output(5));
    }
}
