//! Line styling state
//!
//! Style positions are measured in pixels along the major axis. A pattern of
//! `c` runs alternates dash, gap, dash, ...; an odd count repeats with the
//! dash/gap sense inverted, so every position is taken modulo twice the
//! pattern length.

use alloc::vec::Vec;

/// How a path is styled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StylePattern<'a> {
    /// Alternating run lengths in pixels; `start_gap` makes the first run a gap
    Runs { runs: &'a [u32], start_gap: bool },
    /// Eight-pixel repeating mask, bit `i` set means pixel `i` is drawn
    Mask(u8),
}

/// Style of one stroke call plus the position carried between calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineStyle<'a> {
    pub pattern: StylePattern<'a>,
    /// Position in the pattern where the next stroke starts
    pub state: u32,
}

impl<'a> LineStyle<'a> {
    pub const fn runs(runs: &'a [u32], start_gap: bool) -> Self {
        Self { pattern: StylePattern::Runs { runs, start_gap }, state: 0 }
    }

    pub const fn mask(mask: u8) -> Self {
        Self { pattern: StylePattern::Mask(mask), state: 0 }
    }
}

/// What a style resolves to before any pixel is drawn
pub(crate) enum ResolvedStyle {
    Solid,
    /// Every run is a gap: nothing to draw
    Invisible,
    Styled(LineState),
}

/// Running style cursor for one stroke
#[derive(Debug, Clone)]
pub(crate) struct LineState {
    ltor: Vec<i64>,
    rtol: Vec<i64>,
    pub sp_total: i64,
    pub sp_total2: i64,
    pub sp_next: i64,
    pub sp_complex: i64,
    pub sp_remaining: i64,
    /// True while in a gap
    pub gap: bool,
    start_gap: bool,
    reversed: bool,
    psp: usize,
    /// Rotation applied to a mask style, undone when the state is reported
    mask_shift: Option<i64>,
}

impl LineState {
    fn new(runs: Vec<i64>, start_gap: bool, state: i64, mask_shift: Option<i64>) -> Self {
        let total: i64 = runs.iter().sum();
        let rtol = runs.iter().rev().copied().collect();
        Self {
            ltor: runs,
            rtol,
            sp_total: total,
            sp_total2: 2 * total,
            sp_next: state.rem_euclid(2 * total),
            sp_complex: 0,
            sp_remaining: 0,
            gap: start_gap,
            start_gap,
            reversed: false,
            psp: 0,
            mask_shift,
        }
    }

    /// Resolve a style description. `None` means the pattern cannot be
    /// expressed (an empty or zero-length run).
    pub fn resolve(style: &LineStyle<'_>) -> Option<ResolvedStyle> {
        match style.pattern {
            StylePattern::Runs { runs, start_gap } => {
                if runs.is_empty() || runs.iter().any(|&r| r == 0) {
                    return None;
                }
                let runs = runs.iter().map(|&r| r as i64).collect();
                Some(ResolvedStyle::Styled(LineState::new(
                    runs,
                    start_gap,
                    style.state as i64,
                    None,
                )))
            }
            StylePattern::Mask(0xff) => Some(ResolvedStyle::Solid),
            StylePattern::Mask(0) => Some(ResolvedStyle::Invisible),
            StylePattern::Mask(bits) => {
                // Rotate so the pattern starts on a transition, then read
                // off the runs. A cyclic pattern always has an even count.
                let bit = |i: u32| (bits >> (i & 7)) & 1;
                let k = (0..8u32).find(|&i| bit(i) != bit(i + 7)).unwrap_or(0);
                let mut runs = Vec::new();
                let mut len = 0i64;
                for i in 0..8u32 {
                    if i > 0 && bit(k + i) != bit(k + i - 1) {
                        runs.push(len);
                        len = 0;
                    }
                    len += 1;
                }
                runs.push(len);
                let start_gap = bit(k) == 0;
                let state = style.state as i64 - k as i64;
                Some(ResolvedStyle::Styled(LineState::new(
                    runs,
                    start_gap,
                    state.rem_euclid(8),
                    Some(k as i64),
                )))
            }
        }
    }

    /// Style state to hand back to the caller after the stroke
    pub fn reported_state(&self) -> u32 {
        match self.mask_shift {
            Some(k) => (self.sp_next + k).rem_euclid(8) as u32,
            None => self.sp_next as u32,
        }
    }

    /// Advance `sp_next` past a line of `pels` pixels; returns the position
    /// the line started at
    pub fn advance(&mut self, pels: i64) -> i64 {
        let this = self.sp_next;
        self.sp_next += pels;
        if self.sp_next >= self.sp_total2 {
            self.sp_next %= self.sp_total2;
        }
        this
    }

    /// Position the cursor for a line piece starting `sp` pixels into the
    /// pattern. Right-to-left lines walk the reversed array from the far end.
    pub fn position(&mut self, sp: i64, right_to_left: bool) {
        let mut sp = sp.rem_euclid(self.sp_total2);
        if right_to_left {
            sp = (-sp).rem_euclid(self.sp_total2);
            self.gap = !self.start_gap;
        } else {
            self.gap = self.start_gap;
        }
        self.reversed = right_to_left;

        if sp >= self.sp_total {
            sp -= self.sp_total;
            if self.ltor.len() & 1 != 0 {
                self.gap = !self.gap;
            }
        }

        let runs = if right_to_left { &self.rtol } else { &self.ltor };
        let mut psp = 0;
        while sp >= runs[psp] {
            sp -= runs[psp];
            psp += 1;
        }
        self.sp_remaining = runs[psp] - sp;
        if psp & 1 != 0 {
            self.gap = !self.gap;
        }
        self.psp = psp;
    }

    /// Move to the next run; returns its length
    pub fn next_run(&mut self) -> i64 {
        let runs = if self.reversed { &self.rtol } else { &self.ltor };
        self.psp += 1;
        if self.psp >= runs.len() {
            self.psp = 0;
        }
        runs[self.psp]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn styled(style: &LineStyle) -> LineState {
        match LineState::resolve(style) {
            Some(ResolvedStyle::Styled(ls)) => ls,
            _ => panic!("expected a styled pattern"),
        }
    }

    #[test]
    fn test_resolve_edges() {
        assert!(LineState::resolve(&LineStyle::runs(&[], false)).is_none());
        assert!(LineState::resolve(&LineStyle::runs(&[3, 0], false)).is_none());
        assert!(matches!(
            LineState::resolve(&LineStyle::mask(0xff)),
            Some(ResolvedStyle::Solid)
        ));
        assert!(matches!(
            LineState::resolve(&LineStyle::mask(0)),
            Some(ResolvedStyle::Invisible)
        ));
    }

    #[test]
    fn test_mask_expands_to_runs() {
        // 0b0011_1100: gap 2, dash 4, gap 2
        let ls = styled(&LineStyle::mask(0b0011_1100));
        assert_eq!(ls.sp_total, 8);
        assert_eq!(ls.ltor, alloc::vec![4, 4]);
        assert!(!ls.start_gap);
        // Pixel 0 is a gap; it sits six pixels into the rotated pattern
        assert_eq!(ls.sp_next, 6);
        assert_eq!(ls.reported_state(), 0);
    }

    #[test]
    fn test_position_walks_runs() {
        let mut ls = styled(&LineStyle::runs(&[3, 2], false));
        ls.position(4, false);
        assert!(ls.gap);
        assert_eq!(ls.sp_remaining, 1);
        assert_eq!(ls.next_run(), 3);

        // Odd run counts invert on the second repetition
        let mut odd = styled(&LineStyle::runs(&[2, 3, 1], false));
        odd.position(6, false);
        assert!(odd.gap);
        assert_eq!(odd.sp_remaining, 2);
    }

    #[test]
    fn test_advance_wraps() {
        let mut ls = styled(&LineStyle::runs(&[3, 2], false));
        assert_eq!(ls.advance(7), 0);
        assert_eq!(ls.advance(7), 7);
        assert_eq!(ls.sp_next, 4);
    }
}
