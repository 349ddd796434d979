//! Progress reporting and run statistics.
//!
//! [`ProgressCallback`] decouples the transcoder from whatever displays
//! progress. Callbacks are purely observational and are invoked
//! synchronously between nodes.

use std::time::Duration;

use crate::path::NodePath;

/// One completed node.
#[derive(Debug, Clone)]
pub struct ProgressTick {
    pub path: NodePath,
    /// Nodes completed so far, this one included.
    pub processed: u64,
    /// Expected number of nodes (root excluded), if known.
    pub estimated_total: Option<u64>,
    pub elapsed: Duration,
}

impl ProgressTick {
    /// Completion in percent, clamped to 100. `None` without an estimate.
    pub fn percent(&self) -> Option<f64> {
        let total = self.estimated_total?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.processed as f64 / total as f64 * 100.0).min(100.0))
    }
}

/// Receives progress updates from a transcoding run.
pub trait ProgressCallback {
    /// Called once before the first node.
    fn on_started(&self, _estimated_total: Option<u64>) {}

    /// Called after every node except the root.
    fn on_node_completed(&self, tick: &ProgressTick);

    /// Called once after the destination is finalized.
    fn on_finished(&self, _stats: &Stats) {}
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressTick),
{
    fn on_node_completed(&self, tick: &ProgressTick) {
        self(tick)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Nodes copied, root excluded.
    pub node_count: u64,
    /// Groups created, root excluded.
    pub group_count: u64,
    pub dataset_count: u64,
    /// Attributes copied, root attributes included.
    pub attribute_count: u64,
    /// Logical (encoded, unfiltered) size of all dataset payloads.
    pub payload_bytes: u64,
    /// Source container size.
    pub bytes_in: u64,
    /// Finalized destination size.
    pub bytes_out: u64,
    pub elapsed: Duration,
}

impl Stats {
    /// `(bytes_in - bytes_out) / bytes_in`; 0 for an empty input, negative
    /// when the output grew.
    pub fn reduction_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            return 0.0;
        }
        (self.bytes_in as f64 - self.bytes_out as f64) / self.bytes_in as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn ratio() {
        let mut s = Stats {
            bytes_in: 1000,
            bytes_out: 250,
            ..Stats::default()
        };
        assert!((s.reduction_ratio() - 0.75).abs() < 1e-12);
        s.bytes_out = 1200;
        assert!((s.reduction_ratio() + 0.2).abs() < 1e-12);
        s.bytes_in = 0;
        assert_eq!(s.reduction_ratio(), 0.0);
    }

    #[test]
    fn percent() {
        let path = NodePath::root();
        let mut tick = ProgressTick {
            path: path.clone(),
            processed: 3,
            estimated_total: Some(4),
            elapsed: Duration::ZERO,
        };
        assert_eq!(tick.percent(), Some(75.0));
        tick.processed = 9;
        assert_eq!(tick.percent(), Some(100.0));
        tick.estimated_total = Some(0);
        assert_eq!(tick.percent(), Some(100.0));
        tick.estimated_total = None;
        assert_eq!(tick.percent(), None);
    }

    #[test]
    fn closures_are_callbacks() {
        let seen = RefCell::new(Vec::new());
        let cb = |t: &ProgressTick| seen.borrow_mut().push(t.processed);
        let path = NodePath::root();
        cb.on_started(Some(2));
        for i in 1..=2 {
            cb.on_node_completed(&ProgressTick {
                path: path.clone(),
                processed: i,
                estimated_total: Some(2),
                elapsed: Duration::ZERO,
            });
        }
        cb.on_finished(&Stats::default());
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }
}
