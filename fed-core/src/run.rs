//! Sync run phase machine.
//!
//! A run moves `Init → Fetching → Processing → Applying → Finalizing → Done`,
//! one step at a time and never backwards. `Failed` is reachable from any
//! non-terminal phase. The orchestrator in `fed-sync` performs the I/O and
//! reports progress here; this type only guards the transitions and keeps
//! the counters honest.

use fed_types::{Cursor, SyncDirection};
use std::fmt;
use thiserror::Error;

/// Phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncPhase {
    /// Created, nothing sent yet.
    Init,
    /// Pulling and verifying pages, selecting local items.
    Fetching,
    /// Planning resolutions and packaging outgoing pages.
    Processing,
    /// Writing received content and sending outgoing pages.
    Applying,
    /// Persisting cursors, counters and the trust outcome.
    Finalizing,
    /// Completed successfully. Terminal.
    Done,
    /// Aborted. Terminal.
    Failed,
}

impl SyncPhase {
    /// The phase that follows on success, if any.
    pub fn next(&self) -> Option<SyncPhase> {
        match self {
            SyncPhase::Init => Some(SyncPhase::Fetching),
            SyncPhase::Fetching => Some(SyncPhase::Processing),
            SyncPhase::Processing => Some(SyncPhase::Applying),
            SyncPhase::Applying => Some(SyncPhase::Finalizing),
            SyncPhase::Finalizing => Some(SyncPhase::Done),
            SyncPhase::Done | SyncPhase::Failed => None,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Failed)
    }

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Init => "init",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Processing => "processing",
            SyncPhase::Applying => "applying",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from illegal run operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Transition that is not the single forward step.
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        /// Current phase
        from: SyncPhase,
        /// Requested phase
        to: SyncPhase,
    },

    /// Operation on a run that already finished.
    #[error("run already {0}")]
    Terminal(SyncPhase),

    /// Operation not allowed in the current phase.
    #[error("{operation} not allowed in phase {phase}")]
    WrongPhase {
        /// What was attempted
        operation: &'static str,
        /// Current phase
        phase: SyncPhase,
    },

    /// Page budget exhausted.
    #[error("iteration cap of {0} pages reached")]
    IterationCap(u32),
}

/// Item counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    /// Items created locally.
    pub created: u32,
    /// Items updated locally.
    pub updated: u32,
    /// Items skipped (unchanged, stale, kept local, or failed to apply).
    pub skipped: u32,
    /// Items where both sides changed since the checkpoint.
    pub conflicted: u32,
    /// Items and deletions handed to governance for review.
    pub pending_review: u32,
    /// Items sent to the peer and acknowledged.
    pub sent: u32,
}

impl RunCounts {
    /// Items written locally.
    pub fn received(&self) -> u32 {
        self.created + self.updated
    }
}

/// State of one synchronization attempt against one peer.
#[derive(Debug, Clone)]
pub struct SyncRun {
    direction: SyncDirection,
    phase: SyncPhase,
    pages: u32,
    max_pages: u32,
    truncated: bool,
    resume_cursor: Cursor,
    push_cursor: Cursor,
    counts: RunCounts,
    failure: Option<String>,
}

impl SyncRun {
    /// Start a run from the peer's committed cursors.
    pub fn new(
        direction: SyncDirection,
        resume_cursor: Cursor,
        push_cursor: Cursor,
        max_pages: u32,
    ) -> Self {
        Self {
            direction,
            phase: SyncPhase::Init,
            pages: 0,
            max_pages: max_pages.max(1),
            truncated: false,
            resume_cursor,
            push_cursor,
            counts: RunCounts::default(),
            failure: None,
        }
    }

    /// Direction of this run.
    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    /// Narrow the direction before fetching starts.
    pub fn restrict_direction(&mut self, direction: SyncDirection) -> Result<(), RunError> {
        if self.phase != SyncPhase::Init {
            return Err(RunError::WrongPhase {
                operation: "restrict_direction",
                phase: self.phase,
            });
        }
        self.direction = direction;
        Ok(())
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Pages fetched so far.
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Configured page budget.
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Whether the page budget ran out while the peer still claimed more.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Pull cursor covering every fully applied page.
    pub fn resume_cursor(&self) -> Cursor {
        self.resume_cursor
    }

    /// Push cursor covering every acknowledged page.
    pub fn push_cursor(&self) -> Cursor {
        self.push_cursor
    }

    /// Item counters.
    pub fn counts(&self) -> &RunCounts {
        &self.counts
    }

    /// Mutable item counters.
    pub fn counts_mut(&mut self) -> &mut RunCounts {
        &mut self.counts
    }

    /// Failure reason, once failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Move to `to`, which must be the next phase.
    pub fn advance(&mut self, to: SyncPhase) -> Result<(), RunError> {
        if self.phase.is_terminal() {
            return Err(RunError::Terminal(self.phase));
        }
        if to == SyncPhase::Failed || self.phase.next() != Some(to) {
            return Err(RunError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Mark the run failed. No-op once terminal.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = SyncPhase::Failed;
        self.failure = Some(reason.into());
    }

    /// Claim budget for one more page.
    ///
    /// Fails with `IterationCap` once `max_pages` pages have been fetched.
    pub fn begin_page(&mut self) -> Result<u32, RunError> {
        if self.phase != SyncPhase::Fetching {
            return Err(RunError::WrongPhase {
                operation: "begin_page",
                phase: self.phase,
            });
        }
        if self.pages >= self.max_pages {
            self.truncated = true;
            return Err(RunError::IterationCap(self.max_pages));
        }
        self.pages += 1;
        Ok(self.pages)
    }

    /// Whether another page may still be fetched.
    pub fn has_page_budget(&self) -> bool {
        self.pages < self.max_pages
    }

    /// Record that the page budget ran out with pages still pending.
    pub fn mark_truncated(&mut self) -> RunError {
        self.truncated = true;
        RunError::IterationCap(self.max_pages)
    }

    /// Commit the pull cursor after a page is fully applied.
    ///
    /// Cursors only move forward.
    pub fn commit_pull_cursor(&mut self, cursor: Cursor) -> Result<(), RunError> {
        self.require_applying("commit_pull_cursor")?;
        if cursor > self.resume_cursor {
            self.resume_cursor = cursor;
        }
        Ok(())
    }

    /// Commit the push cursor after a page is acknowledged.
    pub fn commit_push_cursor(&mut self, cursor: Cursor) -> Result<(), RunError> {
        self.require_applying("commit_push_cursor")?;
        if cursor > self.push_cursor {
            self.push_cursor = cursor;
        }
        Ok(())
    }

    fn require_applying(&self, operation: &'static str) -> Result<(), RunError> {
        if self.phase != SyncPhase::Applying {
            return Err(RunError::WrongPhase {
                operation,
                phase: self.phase,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> SyncRun {
        SyncRun::new(SyncDirection::Pull, Cursor::new(5), Cursor::zero(), 3)
    }

    #[test]
    fn phases_advance_in_order() {
        let mut run = run();
        for phase in [
            SyncPhase::Fetching,
            SyncPhase::Processing,
            SyncPhase::Applying,
            SyncPhase::Finalizing,
            SyncPhase::Done,
        ] {
            run.advance(phase).unwrap();
            assert_eq!(run.phase(), phase);
        }
        assert!(run.phase().is_terminal());
    }

    #[test]
    fn no_skipping_or_going_back() {
        let mut run = run();
        assert!(matches!(
            run.advance(SyncPhase::Applying),
            Err(RunError::InvalidTransition { .. })
        ));
        run.advance(SyncPhase::Fetching).unwrap();
        run.advance(SyncPhase::Processing).unwrap();
        assert!(matches!(
            run.advance(SyncPhase::Fetching),
            Err(RunError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn failed_is_terminal() {
        let mut run = run();
        run.advance(SyncPhase::Fetching).unwrap();
        run.fail("bad signature");
        assert_eq!(run.phase(), SyncPhase::Failed);
        assert_eq!(run.failure(), Some("bad signature"));

        assert_eq!(
            run.advance(SyncPhase::Processing),
            Err(RunError::Terminal(SyncPhase::Failed))
        );
        run.fail("again");
        assert_eq!(run.failure(), Some("bad signature"));
    }

    #[test]
    fn advance_cannot_target_failed() {
        let mut run = run();
        assert!(run.advance(SyncPhase::Failed).is_err());
        assert_eq!(run.phase(), SyncPhase::Init);
    }

    #[test]
    fn page_budget_is_exact() {
        let mut run = run();
        run.advance(SyncPhase::Fetching).unwrap();
        assert_eq!(run.begin_page(), Ok(1));
        assert_eq!(run.begin_page(), Ok(2));
        assert_eq!(run.begin_page(), Ok(3));
        assert!(!run.has_page_budget());
        assert_eq!(run.begin_page(), Err(RunError::IterationCap(3)));
        assert_eq!(run.pages(), 3);
        assert!(run.is_truncated());
    }

    #[test]
    fn pages_only_during_fetching() {
        let mut run = run();
        assert!(matches!(run.begin_page(), Err(RunError::WrongPhase { .. })));
    }

    #[test]
    fn cursors_commit_only_while_applying_and_never_regress() {
        let mut run = run();
        assert!(run.commit_pull_cursor(Cursor::new(9)).is_err());

        run.advance(SyncPhase::Fetching).unwrap();
        run.advance(SyncPhase::Processing).unwrap();
        run.advance(SyncPhase::Applying).unwrap();

        run.commit_pull_cursor(Cursor::new(9)).unwrap();
        run.commit_pull_cursor(Cursor::new(7)).unwrap();
        assert_eq!(run.resume_cursor(), Cursor::new(9));

        run.commit_push_cursor(Cursor::new(4)).unwrap();
        assert_eq!(run.push_cursor(), Cursor::new(4));
    }

    #[test]
    fn failure_keeps_committed_cursor() {
        let mut run = run();
        run.advance(SyncPhase::Fetching).unwrap();
        run.advance(SyncPhase::Processing).unwrap();
        run.advance(SyncPhase::Applying).unwrap();
        run.commit_pull_cursor(Cursor::new(12)).unwrap();
        run.fail("timeout");
        assert_eq!(run.resume_cursor(), Cursor::new(12));
    }

    #[test]
    fn direction_narrowed_before_fetching_only() {
        let mut run = SyncRun::new(SyncDirection::Bidirectional, Cursor::zero(), Cursor::zero(), 10);
        run.restrict_direction(SyncDirection::Pull).unwrap();
        assert_eq!(run.direction(), SyncDirection::Pull);
        run.advance(SyncPhase::Fetching).unwrap();
        assert!(run.restrict_direction(SyncDirection::Push).is_err());
    }

    #[test]
    fn counts_accumulate() {
        let mut run = run();
        run.counts_mut().created += 2;
        run.counts_mut().updated += 1;
        assert_eq!(run.counts().received(), 3);
    }
}
