//! Window Segmenter
//!
//! Tiles one cycle's angle/torque traces into disjoint fixed-length windows.
//! Windows start at offset 0 and step by `window_size`; a trailing remainder
//! shorter than a window is dropped. The same tiling is used for training
//! matrices and for online inference, so the two can never disagree.

/// One fixed-length slice of a cycle. Both halves have `window_size` samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window<'a> {
    pub angle: &'a [f64],
    pub torque: &'a [f64],
}

impl Window<'_> {
    pub fn len(&self) -> usize {
        self.angle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angle.is_empty()
    }
}

/// Number of windows [`segment`] would emit.
///
/// Zero when either trace is not strictly longer than `window_size`.
pub fn window_count(angle_len: usize, torque_len: usize, window_size: usize) -> usize {
    let usable = angle_len.min(torque_len);
    if window_size == 0 || usable <= window_size {
        return 0;
    }
    usable / window_size
}

/// Slice a cycle into its ordered window tiling.
///
/// Never fails: empty input or a zero `window_size` yields no windows.
pub fn segment<'a>(angle: &'a [f64], torque: &'a [f64], window_size: usize) -> Vec<Window<'a>> {
    let count = window_count(angle.len(), torque.len(), window_size);
    (0..count)
        .map(|i| {
            let start = i * window_size;
            let end = start + window_size;
            Window {
                angle: &angle[start..end],
                torque: &torque[start..end],
            }
        })
        .collect()
}

/// The most recent complete window of a cycle, if any.
///
/// This is the window the online accumulator classifies after each batch.
pub fn last_window<'a>(angle: &'a [f64], torque: &'a [f64], window_size: usize) -> Option<Window<'a>> {
    let count = window_count(angle.len(), torque.len(), window_size);
    if count == 0 {
        return None;
    }
    let start = (count - 1) * window_size;
    let end = start + window_size;
    Some(Window {
        angle: &angle[start..end],
        torque: &torque[start..end],
    })
}
