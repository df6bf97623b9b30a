//! Best-placement tracking for a single metric.

/// Scored placement of the template's top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    /// X coordinate (column) of the placement.
    pub x: usize,
    /// Y coordinate (row) of the placement.
    pub y: usize,
    /// Raw metric value at the placement.
    pub score: f32,
}

/// Keeps the best peak seen so far; ties keep the earliest placement in scan order.
pub(crate) struct BestPeak {
    lower_is_better: bool,
    best: Option<Peak>,
}

impl BestPeak {
    pub(crate) fn new(lower_is_better: bool) -> Self {
        Self {
            lower_is_better,
            best: None,
        }
    }

    pub(crate) fn push(&mut self, peak: Peak) {
        let replace = match self.best {
            None => true,
            Some(cur) if self.lower_is_better => peak.score < cur.score,
            Some(cur) => peak.score > cur.score,
        };
        if replace {
            self.best = Some(peak);
        }
    }

    pub(crate) fn into_inner(self) -> Option<Peak> {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::{BestPeak, Peak};

    #[test]
    fn ties_keep_first_placement() {
        let mut best = BestPeak::new(false);
        best.push(Peak { x: 3, y: 1, score: 0.9 });
        best.push(Peak { x: 0, y: 2, score: 0.9 });
        best.push(Peak { x: 1, y: 2, score: 0.5 });
        assert_eq!(best.into_inner().map(|p| (p.x, p.y)), Some((3, 1)));
    }

    #[test]
    fn lower_is_better_picks_minimum() {
        let mut best = BestPeak::new(true);
        best.push(Peak { x: 0, y: 0, score: 0.4 });
        best.push(Peak { x: 1, y: 0, score: 0.1 });
        assert_eq!(best.into_inner().map(|p| p.x), Some(1));
    }
}
