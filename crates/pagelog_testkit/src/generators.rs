//! Property-based test generators using proptest.
//!
//! Besides value and row strategies, this module generates workloads of
//! log operations together with the model of what recovery must produce.

use std::collections::BTreeMap;

use pagelog_codec::{Row, Value};
use proptest::prelude::*;

/// Strategy for a single column value.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Long),
        any::<f64>()
            .prop_filter("NaN never compares equal", |d| !d.is_nan())
            .prop_map(Value::Double),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(Value::Bytes),
        "[a-z0-9 ]{0,24}".prop_map(Value::String),
    ]
}

/// Strategy for a row with a small key, so operations collide.
pub fn row_strategy() -> impl Strategy<Value = Row> {
    (0i64..32, prop::collection::vec(value_strategy(), 0..4))
        .prop_map(|(key, values)| Row::new(key, values))
}

/// One step of a generated workload.
#[derive(Debug, Clone, PartialEq)]
pub enum LogOp {
    /// Session inserts (or replaces) a row.
    Add {
        /// Index of the session.
        session: usize,
        /// The row.
        row: Row,
    },
    /// Session deletes a row by key.
    Remove {
        /// Index of the session.
        session: usize,
        /// The key.
        key: i64,
    },
    /// Session commits.
    Commit {
        /// Index of the session.
        session: usize,
    },
    /// A user page is overwritten.
    WritePage {
        /// Index of the user page.
        page: usize,
        /// Fill byte.
        fill: u8,
    },
}

/// Number of sessions a workload uses.
pub const WORKLOAD_SESSIONS: usize = 3;

/// Number of user pages a workload writes.
pub const WORKLOAD_PAGES: usize = 4;

/// Strategy for one workload step.
pub fn log_op_strategy() -> impl Strategy<Value = LogOp> {
    let session = 0..WORKLOAD_SESSIONS;
    prop_oneof![
        4 => (session.clone(), row_strategy())
            .prop_map(|(session, row)| LogOp::Add { session, row }),
        2 => (session.clone(), 0i64..32).prop_map(|(session, key)| LogOp::Remove { session, key }),
        2 => session.prop_map(|session| LogOp::Commit { session }),
        2 => (0..WORKLOAD_PAGES, 1u8..=255).prop_map(|(page, fill)| LogOp::WritePage { page, fill }),
    ]
}

/// Strategy for a workload.
pub fn workload_strategy(max_len: usize) -> impl Strategy<Value = Vec<LogOp>> {
    prop::collection::vec(log_op_strategy(), 0..max_len)
}

/// The rows recovery must rebuild from `ops`: the operations of every
/// session up to its last commit, applied in log order.
pub fn committed_rows(ops: &[LogOp]) -> BTreeMap<i64, Row> {
    let mut last_commit = [None; WORKLOAD_SESSIONS];
    for (i, op) in ops.iter().enumerate() {
        if let LogOp::Commit { session } = op {
            last_commit[*session] = Some(i);
        }
    }
    let committed = |session: usize, i: usize| last_commit[session].is_some_and(|c| c > i);
    let mut rows = BTreeMap::new();
    for (i, op) in ops.iter().enumerate() {
        match op {
            LogOp::Add { session, row } if committed(*session, i) => {
                rows.insert(row.key(), row.clone());
            }
            LogOp::Remove { session, key } if committed(*session, i) => {
                rows.remove(key);
            }
            _ => {}
        }
    }
    rows
}
