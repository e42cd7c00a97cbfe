//! Advisory progress reporting.
//!
//! Long imports walk thousands of files; callers that want feedback
//! install a sink and get "N of M" ticks.  Everything here is best
//! effort: a counter that was never started ignores updates, and
//! overshooting clamps to the total.

/// Receives `(current, total, message)` ticks.
pub type ProgressSink = Box<dyn FnMut(usize, usize, Option<&str>)>;

#[derive(Default)]
pub struct Progress {
    total: usize,
    current: usize,
    started: bool,
    sink: Option<ProgressSink>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: ProgressSink) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn begin(&mut self, total: usize, message: &str) {
        self.total = total.max(1);
        self.current = 0;
        self.started = true;
        log::info!("{message}");
        self.emit(Some(message));
    }

    /// Advances by `steps`, clamped to the total.
    pub fn step(&mut self, steps: usize) {
        if !self.started {
            return;
        }
        self.current = (self.current + steps.max(1)).min(self.total);
        self.emit(None);
    }

    /// Advances by one and logs a stage message.
    pub fn update(&mut self, message: &str) {
        if !self.started {
            return;
        }
        self.current = (self.current + 1).min(self.total);
        log::info!("{message}");
        self.emit(Some(message));
    }

    pub fn end(&mut self, message: &str) {
        if !self.started {
            return;
        }
        self.current = self.total;
        self.started = false;
        log::info!("{message}");
        self.emit(Some(message));
    }

    fn emit(&mut self, message: Option<&str>) {
        if let Some(sink) = self.sink.as_mut() {
            sink(self.current, self.total, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn steps_clamp_to_total() {
        let mut progress = Progress::new();
        progress.begin(3, "working");
        progress.step(2);
        progress.step(5);
        assert_eq!(progress.current(), 3);
        progress.end("done");
        // Updates after end are ignored.
        progress.step(1);
        assert_eq!(progress.current(), 3);
    }

    #[test]
    fn sink_sees_every_tick() {
        let ticks: Rc<RefCell<Vec<(usize, usize)>>> = Rc::default();
        let seen = Rc::clone(&ticks);
        let mut progress =
            Progress::with_sink(Box::new(move |cur, total, _| seen.borrow_mut().push((cur, total))));
        progress.begin(2, "start");
        progress.step(1);
        progress.end("done");
        assert_eq!(&*ticks.borrow(), &[(0, 2), (1, 2), (2, 2)]);
    }

    #[test]
    fn unstarted_counter_ignores_updates() {
        let mut progress = Progress::new();
        progress.step(1);
        progress.update("noop");
        assert_eq!(progress.current(), 0);
        assert_eq!(progress.total(), 0);
    }
}
