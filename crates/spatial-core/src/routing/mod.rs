//! Post-mix routing stages
//!
//! Fixed order inside a block, after spatial mixing:
//!
//! ```text
//! main bus ─────────────────────────┐
//!                                   ├─► SpeakerCompensation ─► ChannelMap ─► device
//! LFE sources ─► LfeRouter ─► subs ─┘
//! ```

mod compensation;
mod lfe;
mod remap;

pub use compensation::{GainRamp, SpeakerCompensation};
pub use lfe::LfeRouter;
pub use remap::{ChannelMap, ChannelMapError, ChannelMapResult};

/// Convert decibels to a linear amplitude factor
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_linear() {
        assert_eq!(db_to_linear(0.0), 1.0);
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-4);
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-4);
    }
}
