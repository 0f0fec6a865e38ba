use std::cell::RefCell;

thread_local! {
    static SINK: RefCell<Option<&'static dyn MetricsSink>> = const { RefCell::new(None) };
}

///
/// ExecKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecKind {
    Create,
    Read,
    Write,
    Unlink,
    Search,
    ReadGroup,
    Flush,
}

///
/// MetricsEvent
///

#[derive(Clone, Debug)]
pub enum MetricsEvent {
    ExecStart {
        kind: ExecKind,
        entity: String,
    },
    ExecFinish {
        kind: ExecKind,
        entity: String,
        records: u64,
    },
    RowsFetched {
        table: String,
        rows: u64,
    },
    RowsScanned {
        table: String,
        rows: u64,
    },
    /// A `nowait` row lock was not immediately grantable.
    LockConflict {
        table: String,
    },
    RecomputeBatch {
        entity: String,
        field: String,
        records: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: &MetricsEvent);
}

/// Install a sink for the current thread; `None` uninstalls.
pub fn install(sink: Option<&'static dyn MetricsSink>) {
    SINK.with_borrow_mut(|slot| *slot = sink);
}

/// Emit one event to the installed sink, if any.
pub fn emit(event: MetricsEvent) {
    SINK.with_borrow(|slot| {
        if let Some(sink) = slot {
            sink.record(&event);
        }
    });
}

/// Run `f` with a sink installed, restoring the previous one afterwards.
pub fn with_sink<T>(sink: &'static dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    let previous = SINK.with_borrow(|slot| *slot);
    install(Some(sink));
    let out = f();
    install(previous);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    struct Counting;

    impl MetricsSink for Counting {
        fn record(&self, _event: &MetricsEvent) {
            COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    static COUNTING: Counting = Counting;

    #[test]
    fn events_reach_the_installed_sink_only_inside_the_scope() {
        let before = COUNTER.load(Ordering::Relaxed);
        emit(MetricsEvent::LockConflict {
            table: "outside".into(),
        });
        assert_eq!(
            COUNTER.load(Ordering::Relaxed),
            before,
            "no sink installed, nothing recorded"
        );

        with_sink(&COUNTING, || {
            emit(MetricsEvent::LockConflict {
                table: "inside".into(),
            });
        });
        assert_eq!(COUNTER.load(Ordering::Relaxed), before + 1);

        emit(MetricsEvent::LockConflict {
            table: "after".into(),
        });
        assert_eq!(COUNTER.load(Ordering::Relaxed), before + 1);
    }
}
