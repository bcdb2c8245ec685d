use thiserror::Error;

/// Failures surfaced by the alert pipeline.
///
/// Only `DeviceUnavailable` escalates to the host as a persistent error state.
/// Everything else is absorbed inside the frame loop or the dispatcher worker.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("no capture device passed the liveness check ({attempts} configurations tried)")]
    DeviceUnavailable { attempts: usize },
    #[error("frame read failed on {device}: {reason}")]
    ReadFailure { device: String, reason: String },
    #[error("notification queue full ({capacity} pending), request dropped")]
    DispatchOverflow { capacity: usize },
    #[error("notification dispatcher is closed")]
    DispatcherClosed,
    #[error("speech synthesis failed: {0}")]
    SynthesisFailure(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
