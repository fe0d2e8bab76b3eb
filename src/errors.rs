use thiserror::Error;

/// Failure of a single roll-number scrape.
///
/// Each variant maps onto one retry decision in [`ScrapeError::is_retryable`];
/// the bulk coordinator never lets one of these abort a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("Transient fetch error: {0}")]
    Transient(String),

    #[error("Upstream rejected the request with HTTP {status}")]
    UpstreamRejected { status: u16 },

    #[error("Roll number doesn't exist")]
    RollNumberDoesNotExist,

    #[error("Html received is invalid: {0}")]
    InvalidHtml(String),

    #[error("Unknown programme for roll number {0}")]
    UnknownProgramme(String),

    #[error("Session token {0} not found on the form page")]
    MissingToken(&'static str),

    #[error("Invalid roll number: {0}")]
    InvalidRollNumber(String),
}

impl ScrapeError {
    // Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Transient(_) => true,
            ScrapeError::UpstreamRejected { status } => *status == 429 || *status >= 500,
            ScrapeError::UnknownProgramme(_) => true,
            ScrapeError::MissingToken(_) => true,
            ScrapeError::RollNumberDoesNotExist
            | ScrapeError::InvalidHtml(_)
            | ScrapeError::InvalidRollNumber(_) => false,
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    // HTTP status failures are rejections, everything else is transient.
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if !status.is_success() => ScrapeError::UpstreamRejected { status: status.as_u16() },
            _ => ScrapeError::Transient(e.to_string()),
        }
    }
}
