use std::fmt;

pub mod eiv;

/// Stage of a single bootstrap iteration
///
/// An iteration always starts at [Status::Draw] and ends in either
/// [Status::Accept] or [Status::Reject]; a rejected iteration is followed by
/// a fresh draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A new block-bootstrap resample is being drawn
    Draw,
    /// The starting point is being built from least-squares fits
    Initialize,
    /// The negative log-likelihood is being minimized
    Minimize,
    /// The minimizer converged and the estimates were recorded
    Accept,
    /// The minimizer did not converge, nothing was recorded
    Reject,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Draw => "draw",
            Status::Initialize => "initialize",
            Status::Minimize => "minimize",
            Status::Accept => "accept",
            Status::Reject => "reject",
        };
        write!(f, "{}", name)
    }
}
