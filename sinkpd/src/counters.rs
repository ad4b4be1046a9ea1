//! Rolling counters for message IDs and hard reset attempts.

/// Counter errors.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The counter exceeded its maximum value and wrapped to zero.
    Overrun,
}

/// A counter that rolls over after a type-specific maximum value.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counter {
    value: u8,
    max_value: u8,
}

/// Types of counters.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterType {
    /// Hard resets sent before the source is declared unresponsive.
    HardReset,
    /// The rolling 3-bit message ID stamped into transmitted headers.
    MessageId,
}

impl Counter {
    /// Create a counter with the maximum value given by the specification,
    /// [Table 6.70].
    pub fn new(counter_type: CounterType) -> Self {
        let max_value = match counter_type {
            CounterType::HardReset => 2,
            CounterType::MessageId => 7,
        };

        Self { value: 0, max_value }
    }

    /// The current counter value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Assign a value, wrapping past the maximum.
    pub fn set(&mut self, value: u8) {
        self.value = value % (self.max_value + 1);
    }

    /// Count up by one, reporting [`Error::Overrun`] on wrap-around.
    pub fn increment(&mut self) -> Result<(), Error> {
        self.set(self.value + 1);

        if self.value == 0 { Err(Error::Overrun) } else { Ok(()) }
    }

    /// Reset the counter to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}
