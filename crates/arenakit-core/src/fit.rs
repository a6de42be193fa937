//! Fit-mode policy shared by every arena strategy.

use serde::Serialize;

/// Policy for choosing among candidate free regions during allocation.
///
/// The candidate set is always the free regions (plus required per-block
/// header) whose size covers the request; the mode only decides which of
/// them wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FitMode {
    /// First sufficient region in address order.
    #[default]
    FirstFit,
    /// Smallest sufficient region; ties go to the first encountered.
    BestFit,
    /// Largest sufficient region; ties go to the first encountered.
    WorstFit,
}

impl FitMode {
    /// Short label used in log messages.
    pub fn label(self) -> &'static str {
        match self {
            FitMode::FirstFit => "first-fit",
            FitMode::BestFit => "best-fit",
            FitMode::WorstFit => "worst-fit",
        }
    }
}

/// Running state of a fit-mode search over free regions.
///
/// Feed candidates in address order via [`FitSearch::offer`]; the winner
/// (if any) is whatever [`FitSearch::take`] returns at the end.
#[derive(Debug)]
pub(crate) struct FitSearch<T> {
    mode: FitMode,
    best: Option<(usize, T)>,
    done: bool,
}

impl<T> FitSearch<T> {
    pub(crate) fn new(mode: FitMode) -> Self {
        Self {
            mode,
            best: None,
            done: false,
        }
    }

    /// Offers a sufficient candidate of the given region size.
    ///
    /// Callers must pre-filter on sufficiency; `offer` only arbitrates
    /// between already-viable regions. Returns `true` once the search can
    /// stop early (first fit only).
    pub(crate) fn offer(&mut self, region_size: usize, candidate: T) -> bool {
        if self.done {
            return true;
        }
        let replace = match (&self.best, self.mode) {
            (None, _) => true,
            (Some((held, _)), FitMode::BestFit) => region_size < *held,
            (Some((held, _)), FitMode::WorstFit) => region_size > *held,
            (Some(_), FitMode::FirstFit) => false,
        };
        if replace {
            self.best = Some((region_size, candidate));
        }
        if self.mode == FitMode::FirstFit && self.best.is_some() {
            self.done = true;
        }
        self.done
    }

    pub(crate) fn take(self) -> Option<T> {
        self.best.map(|(_, candidate)| candidate)
    }
}
