//! Failure policy for memory calls.
//!
//! Every place the orchestrator talks to the memory service is a [`CallSite`],
//! and each call site has exactly one [`FailureMode`]. Call sites never decide
//! on their own whether to swallow an error; they go through [`CallSite::settle`].

use crate::error::MemoryError;

/// What happens when a memory call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The error reaches the caller.
    Fatal,
    /// The error is logged and replaced by an empty value.
    Degrade,
}

/// Places where the orchestrator calls the memory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    /// Search feeding the system preamble of a generation call.
    AugmentSearch,
    /// Search whose records are handed straight to the caller.
    DirectSearch,
    /// Add requested explicitly by the caller.
    ExplicitAdd,
    /// Add accompanying a generation call.
    BackgroundAdd,
}

impl CallSite {
    pub fn mode(self) -> FailureMode {
        match self {
            Self::AugmentSearch | Self::BackgroundAdd => FailureMode::Degrade,
            Self::DirectSearch | Self::ExplicitAdd => FailureMode::Fatal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AugmentSearch => "augment_search",
            Self::DirectSearch => "direct_search",
            Self::ExplicitAdd => "explicit_add",
            Self::BackgroundAdd => "background_add",
        }
    }

    /// Log a failure at the level matching this call site's mode.
    pub fn report(self, error: &MemoryError) {
        match self.mode() {
            FailureMode::Degrade => tracing::warn!(
                call_site = self.as_str(),
                transient = error.is_transient(),
                error = %error,
                "Memory call failed, continuing without it"
            ),
            FailureMode::Fatal => {
                tracing::error!(call_site = self.as_str(), error = %error, "Memory call failed");
            }
        }
    }

    /// Apply this call site's failure mode to a result.
    pub fn settle<T: Default>(self, result: Result<T, MemoryError>) -> Result<T, MemoryError> {
        result.or_else(|e| {
            self.report(&e);
            match self.mode() {
                FailureMode::Degrade => Ok(T::default()),
                FailureMode::Fatal => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degrading_sites_swallow() {
        let failed: Result<Vec<u8>, _> = Err(MemoryError::Format("no results".into()));
        assert_eq!(CallSite::AugmentSearch.settle(failed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_fatal_sites_propagate() {
        for site in [CallSite::DirectSearch, CallSite::ExplicitAdd] {
            let failed: Result<String, _> = Err(MemoryError::Status {
                status: 500,
                body: "boom".into(),
            });
            assert!(site.settle(failed).is_err(), "{site:?} should propagate");
        }
    }

    #[test]
    fn test_background_add_never_fatal() {
        assert_eq!(CallSite::BackgroundAdd.mode(), FailureMode::Degrade);
    }
}
