//! Observability boundary.
//!
//! Engine logic never talks to a metrics backend directly; every
//! instrumentation point flows through [`sink::MetricsEvent`] and the
//! installed [`sink::MetricsSink`].

pub mod sink;
