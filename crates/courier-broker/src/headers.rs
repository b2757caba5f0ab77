//! Retry metadata carried in AMQP headers.
//!
//! A failed channel message is republished to the DLX with its body
//! untouched; the retry state lives entirely in headers so the sweeper can
//! read it without decoding the payload. Broker-native reject dead-lettering
//! is not used because the retry count must survive the round trip.

use chrono::Utc;
use lapin::types::{AMQPValue, FieldTable};

/// Header carrying the number of sweeper re-injections so far.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Header carrying the most recent failure message.
pub const LAST_ERROR_HEADER: &str = "x-last-error";

/// Header carrying the unix time of the most recent failure.
pub const FAILED_TIME_HEADER: &str = "x-failed-time";

/// Header stamped when a message is promoted to a terminal DLQ.
pub const FINAL_FAILURE_TIME_HEADER: &str = "x-final-failure-time";

/// Maximum characters of an error message kept in headers.
pub const MAX_ERROR_LEN: usize = 500;

/// Retry state of a dead-lettered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryHeaders {
    /// Re-injections performed so far; 0 on first failure.
    pub retry_count: u32,
    /// Most recent failure message, truncated.
    pub last_error: Option<String>,
    /// Unix time of the most recent failure.
    pub failed_at: Option<i64>,
}

impl RetryHeaders {
    /// Headers for a message that just failed, preserving its current
    /// retry count.
    pub fn failure(retry_count: u32, error: &str) -> Self {
        Self {
            retry_count,
            last_error: Some(truncate_error(error)),
            failed_at: Some(Utc::now().timestamp()),
        }
    }

    /// Headers for a re-injection: the retry count advances, the failure
    /// context is carried along.
    pub fn incremented(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            last_error: self.last_error.clone(),
            failed_at: self.failed_at,
        }
    }

    /// Read retry state from delivery headers; absent headers mean a first
    /// failure.
    pub fn from_table(table: Option<&FieldTable>) -> Self {
        let Some(table) = table else {
            return Self::default();
        };
        let inner = table.inner();

        let retry_count = inner
            .get(RETRY_COUNT_HEADER)
            .and_then(header_i64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);

        let last_error = inner.get(LAST_ERROR_HEADER).and_then(|v| match v {
            AMQPValue::LongString(s) => Some(s.to_string()),
            AMQPValue::ShortString(s) => Some(s.to_string()),
            _ => None,
        });

        let failed_at = inner.get(FAILED_TIME_HEADER).and_then(header_i64);

        Self {
            retry_count,
            last_error,
            failed_at,
        }
    }

    /// Encode as an AMQP header table.
    pub fn to_table(&self) -> FieldTable {
        let mut table = FieldTable::default();
        table.insert(
            RETRY_COUNT_HEADER.into(),
            AMQPValue::LongInt(self.retry_count as i32),
        );
        if let Some(ref error) = self.last_error {
            table.insert(
                LAST_ERROR_HEADER.into(),
                AMQPValue::LongString(error.as_str().into()),
            );
        }
        if let Some(failed_at) = self.failed_at {
            table.insert(FAILED_TIME_HEADER.into(), AMQPValue::LongLongInt(failed_at));
        }
        table
    }

    /// Encode for promotion to a terminal DLQ, stamping the final failure
    /// time.
    pub fn to_final_table(&self) -> FieldTable {
        let mut table = self.to_table();
        table.insert(
            FINAL_FAILURE_TIME_HEADER.into(),
            AMQPValue::LongLongInt(Utc::now().timestamp()),
        );
        table
    }
}

/// Integer headers arrive in whatever width the publisher chose.
fn header_i64(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortShortUInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortUInt(n) => Some(i64::from(*n)),
        AMQPValue::LongInt(n) => Some(i64::from(*n)),
        AMQPValue::LongUInt(n) => Some(i64::from(*n)),
        AMQPValue::LongLongInt(n) => Some(*n),
        _ => None,
    }
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LEN).collect()
}
