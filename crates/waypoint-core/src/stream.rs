use serde::{Deserialize, Serialize};

/// Verbosity selector for streamed graph execution.
///
/// Several modes can be active at once; each emitted event carries the mode
/// it belongs to so a consumer of a multiplexed stream can filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamMode {
    /// Full state after every super-step.
    #[serde(rename = "full-state")]
    FullState,
    /// Only the partial update each node produced.
    #[serde(rename = "delta-only")]
    Delta,
    /// Token chunks a node forwards from a model call.
    #[serde(rename = "raw-model-tokens")]
    Tokens,
    /// Node start/end bookkeeping.
    #[serde(rename = "debug")]
    Debug,
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullState => write!(f, "full-state"),
            Self::Delta => write!(f, "delta-only"),
            Self::Tokens => write!(f, "raw-model-tokens"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

impl std::str::FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full-state" => Ok(Self::FullState),
            "delta-only" => Ok(Self::Delta),
            "raw-model-tokens" => Ok(Self::Tokens),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown stream mode: '{other}'")),
        }
    }
}

/// Parse a comma-separated stream mode string (e.g. "full-state,raw-model-tokens").
///
/// Returns `[FullState]` if the input is empty.
pub fn parse_stream_modes(s: &str) -> Result<Vec<StreamMode>, String> {
    if s.trim().is_empty() {
        return Ok(vec![StreamMode::FullState]);
    }
    s.split(',')
        .map(|part| part.trim().parse::<StreamMode>())
        .collect()
}
