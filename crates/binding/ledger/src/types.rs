use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Consensus time assigned by the log, `<seconds>.<nanoseconds>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsensusTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl ConsensusTimestamp {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            seconds: at.timestamp(),
            nanos: at.timestamp_subsec_nanos(),
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanos).single()
    }

    /// The smallest timestamp strictly after this one.
    pub fn next(&self) -> Self {
        if self.nanos >= 999_999_999 {
            Self::new(self.seconds + 1, 0)
        } else {
            Self::new(self.seconds, self.nanos + 1)
        }
    }
}

impl fmt::Display for ConsensusTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

impl FromStr for ConsensusTimestamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secs, frac) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
        let seconds = secs
            .parse::<i64>()
            .map_err(|_| format!("invalid consensus seconds: {}", s))?;
        if frac.is_empty() || frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid consensus nanoseconds: {}", s));
        }
        let nanos = format!("{:0<9}", frac)
            .parse::<u32>()
            .map_err(|_| format!("invalid consensus nanoseconds: {}", s))?;
        Ok(Self { seconds, nanos })
    }
}

/// One raw message read from the consensus log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMessage {
    pub sequence: u64,
    pub consensus_timestamp: ConsensusTimestamp,
    pub contents: Vec<u8>,
}

/// Acknowledgement of a submitted log message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub sequence: u64,
    pub consensus_timestamp: ConsensusTimestamp,
}

/// Reference to a submitted funding transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_ref: String,
}
