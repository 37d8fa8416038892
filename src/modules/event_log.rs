//! Event log module
//!
//! Records bus events durably, one store record per area and day, under
//! keys of the form `log/<area>/<YYYY-MM>/<DD>`. Each record is a list of
//! event payloads in arrival order. Typed-handle capabilities: `record` for
//! direct appends and `query` for reading back a date range.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::module::resolver::ModuleFactory;
use crate::module::traits::{Module, ModuleError};
use crate::queue::TaskHandle;
use crate::runtime::Runtime;
use crate::store::{DurableStore, StoreError};

/// Event log module. Construct through [`EventLog::factory`].
pub struct EventLog {
    rt: Runtime,
    topics: Vec<String>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl EventLog {
    /// Name the module registers under.
    pub const NAME: &'static str = "event-log";

    /// Factory recording every event published on `topics`. The topic is
    /// the log area.
    pub fn factory(topics: Vec<String>) -> ModuleFactory {
        Arc::new(move |rt| {
            Arc::new(EventLog {
                rt,
                topics: topics.clone(),
                subscriptions: Mutex::new(Vec::new()),
            }) as Arc<dyn Module>
        })
    }

    /// Append `payload` to today's record for `area`. Ordered against
    /// other appends to the same area and day.
    pub fn record(
        &self,
        area: &str,
        payload: serde_json::Value,
    ) -> TaskHandle<Result<(), StoreError>> {
        record_event(self.rt.store(), area, payload)
    }

    /// Events from every area accepted by `matches_area`, between `start`
    /// and `end` inclusive (both in `YYYY-MM/DD` form), in per-day order.
    ///
    /// Walks the saved day files on disk; days still cached by the store
    /// are served from memory.
    pub async fn query(
        &self,
        mut matches_area: impl FnMut(&str) -> bool,
        start: &str,
        end: &str,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let store = self.rt.store();
        let log_dir = store.dir().join("log");
        let (start_month, _) = start.split_once('/').unwrap_or((start, ""));
        let (end_month, _) = end.split_once('/').unwrap_or((end, ""));

        let mut events = Vec::new();
        for area in read_dir_names(&log_dir).await? {
            if !matches_area(&area) {
                continue;
            }
            for month in read_dir_names(&log_dir.join(&area)).await? {
                if month.as_str() < start_month || month.as_str() > end_month {
                    continue;
                }
                for file in read_dir_names(&log_dir.join(&area).join(&month)).await? {
                    let Some(day) = file.strip_suffix(".yaml") else {
                        continue;
                    };
                    let date = format!("{month}/{day}");
                    if date.as_str() < start || date.as_str() > end {
                        continue;
                    }
                    let key = format!("log/{area}/{month}/{day}");
                    let day_events: Vec<serde_json::Value> = store.get(&key, Vec::new).await?;
                    events.extend(day_events);
                }
            }
        }
        Ok(events)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Module for EventLog {
    async fn load(&self, rt: &Runtime) -> Result<(), ModuleError> {
        let mut subscriptions = self.lock();
        for topic in &self.topics {
            let mut rx = rt.bus().subscribe(topic);
            let store = rt.store().clone();
            let area = topic.clone();
            subscriptions.push(tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    debug!("Logging event on topic {}", area);
                    match record_event(&store, &area, event.payload).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("Failed to log event for area {}: {}", area, e),
                        Err(e) => warn!("Event log append for area {} was aborted: {}", area, e),
                    }
                }
            }));
        }
        Ok(())
    }

    async fn unload(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        for subscription in self.lock().drain(..) {
            subscription.abort();
        }
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn record_event(
    store: &DurableStore,
    area: &str,
    payload: serde_json::Value,
) -> TaskHandle<Result<(), StoreError>> {
    let key = day_key(area, SystemTime::now());
    store.modify(&key, Vec::new, move |events: &mut Vec<serde_json::Value>| {
        events.push(payload);
    })
}

fn day_key(area: &str, now: SystemTime) -> String {
    let days = now
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs() / 86_400) as i64)
        .unwrap_or(0);
    let (year, month, day) = civil_from_days(days);
    format!("log/{area}/{year:04}-{month:02}/{day:02}")
}

/// Proleptic Gregorian date for a count of days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = if month <= 2 { year + 1 } else { year };
    (year, month, day)
}

async fn read_dir_names(dir: &std::path::Path) -> Result<Vec<String>, StoreError> {
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Persistence {
                key: dir.to_string_lossy().into_owned(),
                source,
            })
        }
    };

    let mut names = Vec::new();
    loop {
        match rd.next_entry().await {
            Ok(Some(entry)) => names.push(entry.file_name().to_string_lossy().into_owned()),
            Ok(None) => break,
            Err(source) => {
                return Err(StoreError::Persistence {
                    key: dir.to_string_lossy().into_owned(),
                    source,
                })
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn civil_date_epoch() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(31), (1970, 2, 1));
        // 2000-02-29: leap day
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
    }

    #[test]
    fn day_key_shape() {
        let key = day_key("group-7", UNIX_EPOCH + Duration::from_secs(86_400 * 31));
        assert_eq!(key, "log/group-7/1970-02/01");
    }
}
