/// "Elapsed since last timestamp" gate, re-armed to the sample that fired it.
///
/// No drift compensation and no catch-up of missed periods.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicGate {
    period_ms: u64,
    last_ms: Option<u64>,
}

impl PeriodicGate {
    /// First fires once `period_ms` has elapsed since boot (t = 0).
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: Some(0),
        }
    }

    /// Fires on the first poll, then every `period_ms`.
    pub fn immediate(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: None,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_ms
            .map(|last| now_ms.saturating_sub(last) > self.period_ms)
            .unwrap_or(true)
    }

    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.is_due(now_ms) {
            self.last_ms = Some(now_ms);
            true
        } else {
            false
        }
    }
}
