use std::fmt;

/// The six states a pull request can occupy. Persisted at the Store boundary as a stable
/// lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullRequestStatus {
    Pending,
    Approved,
    Testing,
    Success,
    Failure,
    Error,
}

impl PullRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Testing => "testing",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "testing" => Some(Self::Testing),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Approved)
    }

    pub fn is_testing(&self) -> bool {
        matches!(self, Self::Testing)
    }
}

impl fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The host's mergeability hint, tri-state because GitHub itself reports "unknown" while it
/// is still computing the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mergeable {
    Yes,
    No,
    Unknown,
}

impl Mergeable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}
