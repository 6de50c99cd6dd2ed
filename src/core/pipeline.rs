//! Decode → filter → render, run for every delivered payload.
//!
//! `ReportPipeline` is the message handler shared by all broker connections.
//! Nothing in it is fatal: a payload that cannot be decoded, has no origin or
//! does not match the filter is counted and dropped, and the next payload is
//! processed normally.

use std::{
    fmt,
    io::{self, Write},
    sync::atomic::{AtomicU64, Ordering},
};

use mtrwatch_mqtt::MessageHandler;
use tracing::{debug, error};

use super::{
    filter::{CountryFilter, Verdict},
    render::TableRenderer,
    report,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Rendered,
    DecodeFailed,
    NoOrigin,
    Filtered,
    RenderFailed,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    decode_failed: AtomicU64,
    no_origin: AtomicU64,
    filtered: AtomicU64,
    rendered: AtomicU64,
    render_failed: AtomicU64,
}

impl PipelineStats {
    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Rendered => &self.rendered,
            Outcome::DecodeFailed => &self.decode_failed,
            Outcome::NoOrigin => &self.no_origin,
            Outcome::Filtered => &self.filtered,
            Outcome::RenderFailed => &self.render_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_failed: self.decode_failed.load(Ordering::Relaxed),
            no_origin: self.no_origin.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
            render_failed: self.render_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub decode_failed: u64,
    pub no_origin: u64,
    pub filtered: u64,
    pub rendered: u64,
    pub render_failed: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} rendered={} filtered={} no_origin={} decode_failed={} render_failed={}",
            self.received,
            self.rendered,
            self.filtered,
            self.no_origin,
            self.decode_failed,
            self.render_failed
        )
    }
}

pub struct ReportPipeline<W: Write + Send = io::Stdout> {
    filter: CountryFilter,
    renderer: TableRenderer<W>,
    stats: PipelineStats,
}

impl<W: Write + Send> ReportPipeline<W> {
    pub fn new(filter: CountryFilter, renderer: TableRenderer<W>) -> Self {
        Self {
            filter,
            renderer,
            stats: PipelineStats::default(),
        }
    }

    /// Runs one payload through the pipeline.
    pub fn process(&self, broker: &str, payload: &[u8]) -> Outcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let outcome = match report::decode(payload) {
            Err(e) => {
                error!(broker = %broker, "{}", e);
                Outcome::DecodeFailed
            }
            Ok(report) => match self.filter.evaluate(&report) {
                Verdict::NoOrigin => Outcome::NoOrigin,
                Verdict::Filtered => Outcome::Filtered,
                Verdict::Accept => match self.renderer.render(&report) {
                    Ok(()) => Outcome::Rendered,
                    Err(e) => {
                        error!(broker = %broker, "Failed to write report: {}", e);
                        Outcome::RenderFailed
                    }
                },
            },
        };

        debug!(broker = %broker, "Report {:?}", outcome);
        self.stats.record(outcome);
        outcome
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn into_renderer(self) -> TableRenderer<W> {
        self.renderer
    }
}

impl<W: Write + Send + 'static> MessageHandler for ReportPipeline<W> {
    fn on_message(&self, broker: &str, _topic: &str, payload: &[u8]) {
        self.process(broker, payload);
    }
}
