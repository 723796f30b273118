use std::time::Instant;

/// A monotonic receive-time stamp, produced once per `Poller::poll` return
/// and handed unchanged to every channel dispatched from that batch, then on
/// to the user's message callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(Instant);

impl Timestamp {
    pub fn now() -> Timestamp {
        Timestamp(Instant::now())
    }

    pub fn as_instant(&self) -> Instant {
        self.0
    }
}
