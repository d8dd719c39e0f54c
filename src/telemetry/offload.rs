//! Offload counts observed in backend log output.
//!
//! llama.cpp reports how many layers actually landed on an accelerator only
//! as a log line (`offloaded 20/33 layers to GPU`). With its logs routed into
//! `tracing`, [`OffloadLogLayer`] picks that line up while a
//! [`capture_offload`] scope is open on the same thread.

use std::cell::Cell;
use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Layers placed on the accelerator out of the model's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadCount {
    pub offloaded: u32,
    pub total: u32,
}

thread_local! {
    static ARMED: Cell<bool> = const { Cell::new(false) };
    static SEEN: Cell<Option<OffloadCount>> = const { Cell::new(None) };
}

/// Run `load` and return the offload count logged while it ran.
///
/// `None` when no subscriber carrying [`OffloadLogLayer`] saw the line.
pub fn capture_offload<T>(load: impl FnOnce() -> T) -> (T, Option<OffloadCount>) {
    SEEN.with(|seen| seen.set(None));
    ARMED.with(|armed| armed.set(true));
    let out = load();
    ARMED.with(|armed| armed.set(false));
    (out, SEEN.with(Cell::take))
}

/// Parse `... offloaded N/M layers to GPU`.
pub fn parse_offload_line(line: &str) -> Option<OffloadCount> {
    const MARK: &str = "offloaded ";
    let rest = &line[line.find(MARK)? + MARK.len()..];
    let (counts, tail) = rest.split_once(' ')?;
    if !tail.starts_with("layers to GPU") {
        return None;
    }
    let (offloaded, total) = counts.split_once('/')?;
    Some(OffloadCount { offloaded: offloaded.parse().ok()?, total: total.parse().ok()? })
}

/// Tracing layer that records offload lines inside a capture scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffloadLogLayer;

impl<S: Subscriber> Layer<S> for OffloadLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !ARMED.with(Cell::get) {
            return;
        }
        let mut visitor = OffloadVisitor(None);
        event.record(&mut visitor);
        if let Some(count) = visitor.0 {
            SEEN.with(|seen| seen.set(Some(count)));
        }
    }
}

struct OffloadVisitor(Option<OffloadCount>);

impl Visit for OffloadVisitor {
    fn record_str(&mut self, _field: &Field, value: &str) {
        if self.0.is_none() {
            self.0 = parse_offload_line(value);
        }
    }

    fn record_debug(&mut self, _field: &Field, value: &dyn fmt::Debug) {
        if self.0.is_none() {
            self.0 = parse_offload_line(&format!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_parse_offload_line() {
        assert_eq!(
            parse_offload_line("load_tensors: offloaded 20/33 layers to GPU"),
            Some(OffloadCount { offloaded: 20, total: 33 })
        );
        assert_eq!(
            parse_offload_line("llm_load_tensors: offloaded 0/29 layers to GPU\n"),
            Some(OffloadCount { offloaded: 0, total: 29 })
        );
        assert_eq!(parse_offload_line("offloading 33 repeating layers to GPU"), None);
        assert_eq!(parse_offload_line("offloaded x/33 layers to GPU"), None);
    }

    #[test]
    fn test_capture_sees_line_inside_scope_only() {
        let subscriber = tracing_subscriber::registry().with(OffloadLogLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("load_tensors: offloaded 7/33 layers to GPU");
            let ((), seen) = capture_offload(|| {
                tracing::info!(module = "llama", "load_tensors: offloaded 12/33 layers to GPU");
            });
            assert_eq!(seen, Some(OffloadCount { offloaded: 12, total: 33 }));

            let ((), seen) = capture_offload(|| tracing::info!("model loaded"));
            assert_eq!(seen, None);
        });
    }

    #[test]
    fn test_capture_without_layer_reports_unknown() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let ((), seen) = capture_offload(|| tracing::info!("offloaded 3/3 layers to GPU"));
            assert_eq!(seen, None);
        });
    }
}
