//! Timeout durations used by the policy engine.

/// Types of timers that bound protocol waits.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    ChunkingNotSupported,
    CrcReceive,
    PdDebounce,
    PSTransition,
    SenderResponse,
    SinkEprKeepAlive,
    SinkPpsPeriodic,
    SinkWaitCap,
}

impl TimerType {
    /// The timeout duration in milliseconds.
    pub const fn duration_ms(self) -> u32 {
        match self {
            TimerType::ChunkingNotSupported => 42,
            TimerType::CrcReceive => 120,
            TimerType::PdDebounce => 15,
            TimerType::PSTransition => 500,
            TimerType::SenderResponse => 25,
            TimerType::SinkEprKeepAlive => 200,
            TimerType::SinkPpsPeriodic => 1000,
            TimerType::SinkWaitCap => 310,
        }
    }
}
