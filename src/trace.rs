//! Frame tracing.
//!
//! The engine reports every frame it sends or receives to a [`FrameSink`].
//! The default sink forwards to `tracing` at debug level; tests and hosts can
//! pass a closure instead.

use std::fmt;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("recv"),
        }
    }
}

/// One traced frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent<'a> {
    pub direction: Direction,
    pub packet_type: u8,
    pub frame: &'a [u8],
}

pub trait FrameSink: Send + Sync {
    fn frame(&self, event: &FrameEvent<'_>);
}

impl<F> FrameSink for F
where
    F: Fn(&FrameEvent<'_>) + Send + Sync,
{
    fn frame(&self, event: &FrameEvent<'_>) {
        self(event)
    }
}

/// Logs each frame as hex through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FrameSink for TracingSink {
    fn frame(&self, event: &FrameEvent<'_>) {
        debug!(
            direction = %event.direction,
            packet_type = event.packet_type,
            "{}: {}",
            event.direction,
            hex::encode(event.frame)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_sink_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: &FrameEvent<'_>| {
                seen.lock().unwrap().push((event.direction, event.packet_type));
            }
        };
        let frame = [0x55, 0x55, 0x01, 0x00, 0x01, 0xAA, 0xAA];
        sink.frame(&FrameEvent {
            direction: Direction::Send,
            packet_type: 0x01,
            frame: &frame,
        });
        assert_eq!(*seen.lock().unwrap(), vec![(Direction::Send, 0x01)]);
    }
}
