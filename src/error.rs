// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Unified error types for the dcgm-bridge library.
//!
//! Every bridge operation returns [`Result`]. Engine failures are never
//! swallowed: they surface as [`Error::Engine`] carrying the call that failed
//! and the engine's own status, except for the engine's "no data" status which
//! gets its own variant because callers routinely branch on it.
//!
//! # Example
//!
//! ```rust,no_run
//! use dcgm_bridge::{values::ValuesSinceQuery, Error, GROUP_ALL_GPUS};
//!
//! match ValuesSinceQuery::new(GROUP_ALL_GPUS, 1).collect() {
//!     Ok(batch) => println!("{} value(s)", batch.values.len()),
//!     Err(Error::LimitExceeded { limit }) => eprintln!("narrow the query below {limit}"),
//!     Err(Error::NoData) => eprintln!("nothing watched yet"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

use thiserror::Error;

use crate::engine::EngineStatus;

/// The main error type for dcgm-bridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine reported that nothing matched the query.
    ///
    /// This is the engine's convention for an empty result (for example a
    /// values-since query on a field group that has never been watched). It is
    /// distinct from a successful query that simply produced zero values.
    #[error("No data available for the requested query")]
    NoData,

    /// A single request would have accumulated more values than allowed.
    ///
    /// Partial results are discarded. Retry with a narrower query: a shorter
    /// time range, fewer fields or fewer entities.
    #[error("Callback value limit exceeded: more than {limit} values in one request")]
    LimitExceeded { limit: usize },

    /// A foreign engine call returned a failure status.
    #[error("{call} failed: {status}")]
    Engine {
        call: &'static str,
        status: EngineStatus,
    },

    /// A request argument was rejected before reaching the engine.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The native library could not be loaded or is missing a symbol.
    #[error("Library error: {0}")]
    Library(String),

    /// A native callback panicked while copying data out of the engine.
    #[error("Native callback failed: {0}")]
    Callback(String),

    /// An operation that needs a Tokio runtime was called outside of one.
    #[error("Async runtime unavailable: {0}")]
    Runtime(String),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map a non-OK engine status to an error, lifting `NoData` into its own variant.
    pub fn from_status(call: &'static str, status: EngineStatus) -> Self {
        match status {
            EngineStatus::NoData => Error::NoData,
            status => Error::Engine { call, status },
        }
    }

    /// Returns the engine status behind this error, if it came from the engine.
    pub fn engine_status(&self) -> Option<EngineStatus> {
        match self {
            Error::NoData => Some(EngineStatus::NoData),
            Error::Engine { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A specialized Result type for dcgm-bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Turn a raw engine return code into a `Result`.
pub(crate) fn check(call: &'static str, status: EngineStatus) -> Result<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(Error::from_status(call, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NoData;
        assert_eq!(err.to_string(), "No data available for the requested query");

        let err = Error::LimitExceeded { limit: 500 };
        assert_eq!(
            err.to_string(),
            "Callback value limit exceeded: more than 500 values in one request"
        );

        let err = Error::Engine {
            call: "dcgmPolicySet",
            status: EngineStatus::Uninitialized,
        };
        assert_eq!(
            err.to_string(),
            "dcgmPolicySet failed: Uninitialized (DCGM_ST_UNINITIALIZED, -10)"
        );

        let err = Error::InvalidArgument("no conditions".to_string());
        assert_eq!(err.to_string(), "Invalid argument: no conditions");
    }

    #[test]
    fn test_from_status_lifts_no_data() {
        assert!(matches!(
            Error::from_status("dcgmGetValuesSince_v2", EngineStatus::NoData),
            Error::NoData
        ));
        assert!(matches!(
            Error::from_status("dcgmGetValuesSince_v2", EngineStatus::Timeout),
            Error::Engine {
                status: EngineStatus::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_check() {
        assert!(check("dcgmPolicySet", EngineStatus::Ok).is_ok());
        let err = check("dcgmPolicySet", EngineStatus::BadParam).unwrap_err();
        assert_eq!(err.engine_status(), Some(EngineStatus::BadParam));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.engine_status(), None);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
