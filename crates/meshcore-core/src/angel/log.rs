//! Structured log stream to the supervisor.
//!
//! Until the handshake completes, log records go to stdout. Once the
//! acknowledgement is sent, [`LogSwitch::attach`] redirects them: the
//! [`AngelLogLayer`] encodes each event as a bencoded record on the log
//! stream, and the stdout layer is muted by [`LogSwitch::stdout_filter`].

use std::fmt::Write as _;
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::{FilterFn, filter_fn};
use tracing_subscriber::layer::{Context, Layer};

use super::channel::Outbound;
use crate::benc::Dict;
use crate::error::FatalError;

/// Shared switch deciding where log records go
#[derive(Clone, Default)]
pub struct LogSwitch {
    sink: Arc<Mutex<Option<Outbound>>>,
}

impl LogSwitch {
    /// Create a detached switch; records go to stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding records to the supervisor.
    pub fn attach(&self, outbound: Outbound) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
    }

    /// Stop forwarding; records go back to stdout.
    pub fn detach(&self) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether records are being forwarded
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current(&self) -> Option<Outbound> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Per-layer filter that passes events only while detached.
    pub fn stdout_filter(self) -> FilterFn<impl Fn(&tracing::Metadata<'_>) -> bool> {
        filter_fn(move |_| !self.is_attached())
    }

    /// Layer that forwards events while attached.
    #[must_use]
    pub fn layer(&self) -> AngelLogLayer {
        AngelLogLayer {
            switch: self.clone(),
        }
    }
}

/// `tracing` layer writing log records onto the supervisor log stream
pub struct AngelLogLayer {
    switch: LogSwitch,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

fn record(level: &str, file: &str, line: u32, message: String) -> Dict {
    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Dict::new()
        .with("level", level)
        .with("file", file)
        .with("line", i64::from(line))
        .with("message", message)
        .with("time", i64::try_from(time).unwrap_or(i64::MAX))
}

/// Build the bencoded record for one event.
pub(crate) fn record_for(event: &Event<'_>) -> Dict {
    let mut visitor = MessageVisitor::default();
    event.record(&mut visitor);
    let meta = event.metadata();
    record(
        meta.level().as_str(),
        meta.file().unwrap_or(meta.target()),
        meta.line().unwrap_or(0),
        format!("{}{}", visitor.message, visitor.fields),
    )
}

/// Build an `ERROR` record for `error`, located at the caller.
#[track_caller]
pub(crate) fn fatal_record(error: &FatalError) -> Dict {
    let at = Location::caller();
    record(
        tracing::Level::ERROR.as_str(),
        at.file(),
        at.line(),
        error.to_string(),
    )
}

impl<S: Subscriber> Layer<S> for AngelLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if let Some(outbound) = self.switch.current() {
            outbound.try_log(&record_for(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angel::frame::{StreamTag, SyncMagic};
    use crate::benc;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_records_flow_only_while_attached() {
        let switch = LogSwitch::new();
        let (outbound, mut rx) = Outbound::new(SyncMagic::from_bytes([9; 8]));
        let subscriber = tracing_subscriber::registry().with(switch.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before handshake");
            switch.attach(outbound);
            tracing::warn!(peer = 7, "after handshake");
            switch.detach();
            tracing::info!("detached again");
        });

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame[8], StreamTag::Log as u8);
        let record = benc::decode_dict(&frame[13..]).unwrap();
        assert_eq!(record.get_str("level"), Some("WARN"));
        assert_eq!(record.get_str("message"), Some("after handshake peer=7"));
        assert!(record.get_int("line").unwrap() > 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fatal_record_points_at_caller() {
        let record = fatal_record(&FatalError::HandshakeTimeout);
        assert_eq!(record.get_str("level"), Some("ERROR"));
        assert!(record.get_str("file").unwrap().ends_with("log.rs"));
        assert_eq!(
            record.get_str("message"),
            Some(FatalError::HandshakeTimeout.to_string().as_str())
        );
    }

    #[test]
    fn test_switch_state() {
        let switch = LogSwitch::new();
        assert!(!switch.is_attached());
        let (outbound, _rx) = Outbound::new(SyncMagic::from_bytes([0; 8]));
        switch.attach(outbound);
        assert!(switch.is_attached());
    }
}
