//! Rolling/windowed per-pixel image averager (C6).
//!
//! Maintains a running `u32` sum of the last `window_size` `u8` frames
//! (§3's `Window Mean Image`: `frame_history:Deque<Vec<u8>>`,
//! `accum:Vec<u32>`, `window_avg:Vec<u8>`) and divides it down to a mean
//! image on every `update`. The division is done in `131072`-pixel chunks
//! dispatched across a `rayon` pool, mirroring the teacher's chunk-parallel
//! pixel work; there is no dedicated "pixel averager" module in the teacher
//! to ground the pixel math itself on, so the divisor bookkeeping below
//! follows original §4.6 literally branch-by-branch.
//!
//! `window_size` is a per-call argument to [`RollingAverager::update`], not
//! fixed at construction: the window is shrinkable/growable, so a caller can
//! tighten or loosen it between frames, and the shrink branch below has to
//! actually trim `history`/`accum` down to whatever size was most recently
//! requested rather than a constant chosen once up front.

use std::collections::VecDeque;

use crate::error::{CoreResult, DaqCoreError};

const CHUNK_PIXELS: usize = 131_072;

/// A `u32` per-pixel accumulator and the `u8` frame history backing it.
pub struct RollingAverager {
    /// Window size most recently passed to `update`, kept only for
    /// `window_size()` introspection between calls.
    window_size: usize,
    n_pixels: usize,
    history: VecDeque<Vec<u8>>,
    accum: Vec<u32>,
}

impl RollingAverager {
    /// `window_size` here is only the initial value reported by
    /// [`Self::window_size`] before the first call to `update`; each call to
    /// `update` takes its own `window_size` and can grow or shrink it.
    pub fn new(n_pixels: usize, window_size: usize) -> Self {
        RollingAverager {
            window_size,
            n_pixels,
            history: VecDeque::new(),
            accum: vec![0u32; n_pixels],
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of frames currently contributing to `accum`.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Feed one new frame under the given `window_size`, returning the
    /// updated mean image. `frame.len()` must equal `n_pixels`. `window_size`
    /// may differ from the previous call's: a smaller value shrinks
    /// `history`/`accum` down before this frame is folded in, a larger one
    /// lets the window keep growing past where it would otherwise have
    /// reached steady state.
    pub fn update(&mut self, frame: &[u8], window_size: usize) -> CoreResult<Vec<u8>> {
        if frame.len() != self.n_pixels {
            return Err(DaqCoreError::OutOfRange(format!(
                "frame has {} pixels, averager was built for {}",
                frame.len(),
                self.n_pixels
            )));
        }

        // Shrink: drop oldest frames until at most window_size + 1 remain.
        while self.history.len() > window_size + 1 {
            let oldest = self.history.pop_back().expect("checked len > 0 above");
            subtract_in_place(&mut self.accum, &oldest);
        }

        let history_before = self.history.len();
        self.window_size = window_size;

        if history_before == window_size + 1 {
            // Steady-state: reclaim the oldest frame's storage for the new
            // frame, recompute accum with front added / back removed. The
            // divisor (H - 1) equals window_size here, matching Testable
            // Property 4's "average of the last W frames, divided by W".
            let mut back = self.history.pop_back().expect("history_before == window_size + 1");
            back.copy_from_slice(frame);
            self.history.push_front(back);
            let front = self.history.front().expect("just pushed");
            let back = self.history.back().expect("len == window_size + 1 >= 1");
            add_sub_in_place_parallel(&mut self.accum, front, back);
            divide_into_mean_parallel(&self.accum, (history_before - 1) as u32)
        } else if history_before == window_size {
            // Initial expansion, final frame of the initial fill. Divisor H
            // (== window_size) matches Property 4 once k = H + 1 exceeds W.
            self.history.push_front(frame.to_vec());
            let front = self.history.front().expect("just pushed");
            add_in_place_parallel(&mut self.accum, front);
            divide_into_mean_parallel(&self.accum, history_before as u32)
        } else {
            // Post-initial growth: history_before < window_size, including
            // the very first call (history_before == 0). Testable Property 4
            // requires window_avg = sum / k for k <= W frames seen so far;
            // k here is history_before + 1 (the count after this push), not
            // the literal (H - 1) of original 4.6, which divides by zero at
            // H == 0 and again at H == 1 for any window_size >= 2. Resolves
            // the original's first-frame Open Question by construction: see
            // DESIGN.md.
            self.history.push_front(frame.to_vec());
            let front = self.history.front().expect("just pushed");
            add_in_place_parallel(&mut self.accum, front);
            divide_into_mean_parallel(&self.accum, (history_before + 1) as u32)
        }
    }
}

fn subtract_in_place(accum: &mut [u32], frame: &[u8]) {
    for (a, f) in accum.iter_mut().zip(frame.iter()) {
        *a -= u32::from(*f);
    }
}

fn add_in_place_parallel(accum: &mut [u32], frame: &[u8]) {
    use rayon::prelude::*;
    accum
        .par_chunks_mut(CHUNK_PIXELS)
        .zip(frame.par_chunks(CHUNK_PIXELS))
        .for_each(|(a_chunk, f_chunk)| {
            for (a, f) in a_chunk.iter_mut().zip(f_chunk.iter()) {
                *a += u32::from(*f);
            }
        });
}

fn add_sub_in_place_parallel(accum: &mut [u32], front: &[u8], back: &[u8]) {
    use rayon::prelude::*;
    accum
        .par_chunks_mut(CHUNK_PIXELS)
        .zip(front.par_chunks(CHUNK_PIXELS))
        .zip(back.par_chunks(CHUNK_PIXELS))
        .for_each(|((a_chunk, f_chunk), b_chunk)| {
            for ((a, f), b) in a_chunk.iter_mut().zip(f_chunk.iter()).zip(b_chunk.iter()) {
                *a = *a + u32::from(*f) - u32::from(*b);
            }
        });
}

/// Integer-divide `accum` by `divisor`, clamping each pixel to `u8::MAX`
/// (the accumulator is a sum of up to `window_size + 1` `u8` samples, so an
/// overflowing divide cannot happen for any sane window size, but the clamp
/// keeps a pathological `window_size` from panicking on a `u8` cast).
fn divide_into_mean_parallel(accum: &[u32], divisor: u32) -> CoreResult<Vec<u8>> {
    use rayon::prelude::*;
    if divisor == 0 {
        return Err(DaqCoreError::OutOfRange("rolling averager divisor is zero".into()));
    }
    let mut out = vec![0u8; accum.len()];
    out.par_chunks_mut(CHUNK_PIXELS)
        .zip(accum.par_chunks(CHUNK_PIXELS))
        .for_each(|(o_chunk, a_chunk)| {
            for (o, a) in o_chunk.iter_mut().zip(a_chunk.iter()) {
                *o = (a / divisor).min(u8::MAX as u32) as u8;
            }
        });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_returns_itself_without_dividing_by_zero() {
        let mut avg = RollingAverager::new(4, 3);
        let out = avg.update(&[1, 2, 3, 4], 3).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn post_initial_growth_divides_by_frame_count_seen_so_far() {
        let mut avg = RollingAverager::new(2, 4);
        avg.update(&[2, 2], 4).unwrap();
        let out = avg.update(&[4, 4], 4).unwrap();
        assert_eq!(out, vec![3, 3]);
    }

    #[test]
    fn initial_expansion_divides_by_window_size_at_fill_boundary() {
        let mut avg = RollingAverager::new(1, 2);
        avg.update(&[10], 2).unwrap();
        avg.update(&[10], 2).unwrap();
        let out = avg.update(&[10], 2).unwrap();
        assert_eq!(out, vec![15]);
    }

    #[test]
    fn steady_state_recomputes_with_front_minus_back() {
        let mut avg = RollingAverager::new(1, 2);
        avg.update(&[10], 2).unwrap();
        avg.update(&[20], 2).unwrap();
        let out = avg.update(&[30], 2).unwrap();
        assert_eq!(out, vec![30]);
        let out2 = avg.update(&[5], 2).unwrap();
        // accum = 60 (30+20+10) + front(5) - back(20) = 45, divisor 2 -> 22 (integer division)
        assert_eq!(out2, vec![22]);
    }

    #[test]
    fn mismatched_frame_size_is_out_of_range() {
        let mut avg = RollingAverager::new(4, 3);
        let err = avg.update(&[1, 2], 3).unwrap_err();
        assert_eq!(err.kind_name(), "OutOfRange");
    }

    #[test]
    fn large_window_accumulates_without_overflow() {
        // window_size large enough that a u8 frame sum over (window+1)
        // samples would overflow a u16 but not a u32 accumulator.
        let mut avg = RollingAverager::new(1, 300);
        for _ in 0..301 {
            avg.update(&[255], 300).unwrap();
        }
        let out = avg.update(&[255], 300).unwrap();
        assert_eq!(out, vec![255]);
    }

    #[test]
    fn shrinking_window_on_a_later_call_trims_history_and_accum() {
        // Fill to steady state at window_size=3 (history holds 4 frames:
        // the +1 slack plus the 3 live ones), then shrink to window_size=1
        // on a later call. Without the per-call window_size threaded into
        // the shrink loop's bound, history never exceeds window_size + 1
        // and the shrink branch can never run; here it must drop down to
        // window_size + 1 == 2 frames before this call's steady-state step
        // folds the new frame in.
        let mut avg = RollingAverager::new(1, 3);
        avg.update(&[10], 3).unwrap();
        avg.update(&[20], 3).unwrap();
        avg.update(&[30], 3).unwrap();
        avg.update(&[40], 3).unwrap();
        assert_eq!(avg.history_len(), 4);

        avg.update(&[50], 1).unwrap();
        assert_eq!(avg.window_size(), 1);
        assert_eq!(avg.history_len(), 2);
    }
}
