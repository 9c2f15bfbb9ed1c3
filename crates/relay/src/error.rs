use std::fmt;

/// Stage of a relay at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Completion,
    Send,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completion => "completion",
            Self::Send => "send",
        })
    }
}

/// Failure of a single relay. Always contained: logged, message dropped.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("completion request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("timed out during {stage}")]
    Timeout { stage: RelayStage },

    #[error("completion service answered {status}")]
    Status { status: reqwest::StatusCode },

    #[error("completion body is not text: {0}")]
    Decode(#[source] std::string::FromUtf8Error),

    #[error("reply not delivered: {0}")]
    Send(#[from] chatrelay_session::Error),
}

impl RelayError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                stage: RelayStage::Completion,
            }
        } else {
            Self::Network(err)
        }
    }
}

/// Startup failures. Any of these ends the process.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("could not open pairing stream: {0}")]
    Pairing(#[source] chatrelay_session::Error),

    #[error("initial connect failed: {0}")]
    Connect(#[source] chatrelay_session::Error),
}
