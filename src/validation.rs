//! Frame content checks for test patterns.
//!
//! Used by the tests and by the binary's `--validate` mode to confirm that frames coming
//! out of the grab cycle carry the pattern a test camera was told to produce.

use thiserror::Error;

use crate::frame::{FrameView, OwnedFrame};

/// Red, green, blue values of the eight color bars, left to right: white, yellow, cyan,
/// green, magenta, red, blue, black.
pub const COLOR_BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

/// Per-channel tolerance. Covers studio-range output of virtual cameras.
const COLOR_TOLERANCE: u8 = 25;

/// Minimum left-to-right luminance rise of a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// A frame that does not contain the expected content.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A sample position lies outside the frame.
    #[error("pixel ({x}, {y}) outside {width}x{height} frame")]
    OutOfBounds {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },
    /// A color bar has the wrong color.
    #[error("color bar {bar} at x={x}: expected RGB{expected:?}, got RGB{actual:?}")]
    ColorBar {
        /// Bar index, 0 is leftmost.
        bar: usize,
        /// Sampled column.
        x: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Sampled color.
        actual: (u8, u8, u8),
    },
    /// Luminance decreases along the row.
    #[error("gradient decreases at x={x}: {luminance} < {previous}")]
    GradientDecreasing {
        /// Sampled column.
        x: u32,
        /// Luminance at `x`.
        luminance: f32,
        /// Luminance at the previous sample.
        previous: f32,
    },
    /// The row is too flat to be a gradient.
    #[error("gradient rises by {0} only")]
    GradientFlat(f32),
    /// No frames to check.
    #[error("empty frame sequence")]
    EmptySequence,
    /// Frame counters are not consecutive.
    #[error("frame sequence gap at index {index}: expected {expected}, got {actual}")]
    SequenceGap {
        /// Position in the sequence.
        index: usize,
        /// Counter following the previous frame.
        expected: u64,
        /// Counter found.
        actual: u64,
    },
}

/// Check that a frame shows eight vertical color bars.
///
/// Samples the center of each bar on the middle row.
pub fn validate_color_bars(frame: &FrameView<'_>) -> Result<(), ValidationError> {
    let width = frame.width();
    let bar_width = width / 8;
    let y = frame.height() / 2;

    for (bar, expected) in COLOR_BARS.iter().copied().enumerate() {
        let x = u32::try_from(bar).unwrap_or(0) * bar_width + bar_width / 2;
        let actual = sample(frame, x, y)?;

        if !colors_match(actual, expected) {
            return Err(ValidationError::ColorBar {
                bar,
                x,
                expected,
                actual,
            });
        }
    }

    Ok(())
}

/// Check that luminance rises from the left edge to the right edge of the middle row.
pub fn validate_gradient(frame: &FrameView<'_>) -> Result<(), ValidationError> {
    let y = frame.height() / 2;
    let mut first = None;
    let mut previous: Option<f32> = None;

    for x in (0..frame.width()).step_by(10) {
        let (r, g, b) = sample(frame, x, y)?;
        let luminance = 0.114f32.mul_add(f32::from(b), 0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)));

        // Rounding may dip by a level.
        if let Some(previous) = previous.filter(|previous| luminance < previous - 1.0) {
            return Err(ValidationError::GradientDecreasing {
                x,
                luminance,
                previous,
            });
        }
        first.get_or_insert(luminance);
        previous = Some(luminance);
    }

    let rise = previous.unwrap_or(0.0) - first.unwrap_or(0.0);
    if rise < MIN_GRADIENT_RISE {
        return Err(ValidationError::GradientFlat(rise));
    }
    Ok(())
}

/// Check that frame counters increase by exactly one from frame to frame.
pub fn validate_frame_sequence(frames: &[OwnedFrame]) -> Result<(), ValidationError> {
    if frames.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [previous, current] = pair {
            let expected = previous.frame_count + 1;
            if current.frame_count != expected {
                return Err(ValidationError::SequenceGap {
                    index: index + 1,
                    expected,
                    actual: current.frame_count,
                });
            }
        }
    }

    Ok(())
}

fn sample(frame: &FrameView<'_>, x: u32, y: u32) -> Result<(u8, u8, u8), ValidationError> {
    frame.rgb_at(x, y).ok_or(ValidationError::OutOfBounds {
        x,
        y,
        width: frame.width(),
        height: frame.height(),
    })
}

const fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8)) -> bool {
    actual.0.abs_diff(expected.0) <= COLOR_TOLERANCE
        && actual.1.abs_diff(expected.1) <= COLOR_TOLERANCE
        && actual.2.abs_diff(expected.2) <= COLOR_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameDescriptor;
    use crate::mock::{fill_pattern, TestPattern};
    use crate::traits::{FrameInfo, FrameStatus, PixelFormat};

    fn pattern_frame(format: PixelFormat, pattern: TestPattern) -> FrameDescriptor {
        let (width, height) = (64, 8);
        let channels = format.channels().unwrap_or(1) as usize;
        let size = 64 * 8 * channels;

        let mut frame = FrameDescriptor::allocate(size);
        fill_pattern(frame.buffer_mut(), format, width, pattern);
        frame.record(&FrameInfo {
            width,
            height,
            format,
            populated: size,
            frame_count: 0,
            status: FrameStatus::Complete,
        });
        frame
    }

    fn owned(counts: &[u64]) -> Vec<OwnedFrame> {
        counts
            .iter()
            .map(|&frame_count| {
                let mut frame = pattern_frame(PixelFormat::Mono8, TestPattern::Gradient);
                frame.record(&FrameInfo {
                    width: 64,
                    height: 8,
                    format: PixelFormat::Mono8,
                    populated: 512,
                    frame_count,
                    status: FrameStatus::Complete,
                });
                FrameView::decode(&frame).expect("decode").to_owned_frame()
            })
            .collect()
    }

    #[test]
    fn test_color_bars_in_both_channel_orders() {
        for format in [PixelFormat::Bgr24, PixelFormat::Rgb24] {
            let frame = pattern_frame(format, TestPattern::ColorBars);
            let view = FrameView::decode(&frame).expect("decode");
            assert_eq!(validate_color_bars(&view), Ok(()), "{format}");
        }
    }

    #[test]
    fn test_color_bars_reject_gradient() {
        let frame = pattern_frame(PixelFormat::Bgr24, TestPattern::Gradient);
        let view = FrameView::decode(&frame).expect("decode");
        assert!(matches!(
            validate_color_bars(&view),
            Err(ValidationError::ColorBar { .. })
        ));
    }

    #[test]
    fn test_gradient_mono_and_color() {
        for format in [PixelFormat::Mono8, PixelFormat::Bgr24] {
            let frame = pattern_frame(format, TestPattern::Gradient);
            let view = FrameView::decode(&frame).expect("decode");
            assert_eq!(validate_gradient(&view), Ok(()), "{format}");
        }
    }

    #[test]
    fn test_gradient_rejects_solid() {
        let frame = pattern_frame(PixelFormat::Mono8, TestPattern::Solid(128, 128, 128));
        let view = FrameView::decode(&frame).expect("decode");
        assert!(matches!(
            validate_gradient(&view),
            Err(ValidationError::GradientFlat(_))
        ));
    }

    #[test]
    fn test_frame_sequence() {
        assert_eq!(validate_frame_sequence(&owned(&[4, 5, 6])), Ok(()));
        assert_eq!(validate_frame_sequence(&[]), Err(ValidationError::EmptySequence));
        assert_eq!(
            validate_frame_sequence(&owned(&[1, 2, 4])),
            Err(ValidationError::SequenceGap {
                index: 2,
                expected: 3,
                actual: 4
            })
        );
    }

    #[test]
    fn test_colors_match_tolerance() {
        assert!(colors_match((235, 235, 16), (255, 255, 0)));
        assert!(!colors_match((200, 255, 0), (255, 255, 0)));
    }
}
