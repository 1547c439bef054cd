//! Progress reporting hooks.
//!
//! Long-running operations report through [`Progress`] so front ends can
//! render a bar, log lines or nothing at all.

/// Receiver for progress of a long-running operation.
pub trait Progress {
    /// Called once before the first unit with the total number of units.
    fn begin(&mut self, total: u64);

    /// `units` more units are done; `label` describes the last one.
    fn advance(&mut self, units: u64, label: &str);

    /// Called once when the operation completes successfully.
    fn finish(&mut self);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn begin(&mut self, _total: u64) {}

    fn advance(&mut self, _units: u64, _label: &str) {}

    fn finish(&mut self) {}
}

impl<T: Progress + ?Sized> Progress for &mut T {
    fn begin(&mut self, total: u64) {
        (**self).begin(total);
    }

    fn advance(&mut self, units: u64, label: &str) {
        (**self).advance(units, label);
    }

    fn finish(&mut self) {
        (**self).finish();
    }
}

/// Records every call, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordedProgress {
    pub total: Option<u64>,
    pub advances: Vec<(u64, String)>,
    pub finished: bool,
}

#[cfg(test)]
impl RecordedProgress {
    pub fn done(&self) -> u64 {
        self.advances.iter().map(|(n, _)| n).sum()
    }
}

#[cfg(test)]
impl Progress for RecordedProgress {
    fn begin(&mut self, total: u64) {
        self.total = Some(total);
    }

    fn advance(&mut self, units: u64, label: &str) {
        self.advances.push((units, label.to_string()));
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
