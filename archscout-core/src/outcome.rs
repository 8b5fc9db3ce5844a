use strum_macros::Display;

/// Why a fetch did not touch the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// Raw content is already on disk and no force update was requested
    AlreadyFetched,
    /// The id is in the invalid-id set
    KnownInvalid,
    /// The source answered 404, the id was added to the invalid-id set
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Failure,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ParseOutcome {
    /// At least one field was recomputed and the record was written
    Changed,
    /// Nothing needed recomputing
    Unchanged,
    Failure,
}

/// Final bucket of one project within a stage run.
///
/// `Complete` means the project needed no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure,
    Complete,
}

impl From<FetchOutcome> for StageOutcome {
    fn from(value: FetchOutcome) -> Self {
        match value {
            FetchOutcome::Success => StageOutcome::Success,
            FetchOutcome::Failure => StageOutcome::Failure,
            FetchOutcome::Skipped(_) => StageOutcome::Complete,
        }
    }
}

impl From<ParseOutcome> for StageOutcome {
    fn from(value: ParseOutcome) -> Self {
        match value {
            ParseOutcome::Changed => StageOutcome::Success,
            ParseOutcome::Unchanged => StageOutcome::Complete,
            ParseOutcome::Failure => StageOutcome::Failure,
        }
    }
}
