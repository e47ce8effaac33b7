//! Fetch request recording / 请求记录
//!
//! Debug-only facility: every fetch callback appends one JSON line to a log
//! file so recorded traffic can be replayed and analysed. Timestamps can be
//! shifted so a client chooses where "now" starts while the gaps between
//! requests stay real.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::findex::{EncryptedTable, Table, UidSet};

fn now_millis() -> Result<i64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| Error::Internal("system time is before UNIX_EPOCH".to_string()))?;
    i64::try_from(now.as_millis()).map_err(|_| Error::Internal("system time out of range".to_string()))
}

pub struct RequestLog {
    path: PathBuf,
    /// Real time minus fake time, in milliseconds; also serializes writers
    time_diff: Mutex<i64>,
}

impl RequestLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            time_diff: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make subsequent timestamps start at `fake_time_ms` / 设置伪造时间
    pub fn set_fake_time(&self, fake_time_ms: i64) -> Result<()> {
        let diff = now_millis()?
            .checked_sub(fake_time_ms)
            .ok_or_else(|| Error::BadRequest(format!("fake_time {} out of range", fake_time_ms)))?;
        *self.time_diff.lock() = diff;
        Ok(())
    }

    /// Append one fetch line / 追加一行记录
    ///
    /// Requested UIDs with no stored line are logged as `null`.
    pub fn record(&self, table: Table, uids: &UidSet, found: &EncryptedTable) -> Result<()> {
        let data: Map<String, Value> = uids
            .iter()
            .map(|uid| {
                let value = found
                    .get(uid)
                    .map(|value| Value::String(STANDARD_NO_PAD.encode(value)))
                    .unwrap_or(Value::Null);
                (STANDARD_NO_PAD.encode(uid), value)
            })
            .collect();

        let time_diff = self.time_diff.lock();
        let date = now_millis()?
            .checked_sub(*time_diff)
            .ok_or_else(|| Error::BadRequest("fake time overflows the request date".to_string()))?;
        let line = json!({
            "date": date,
            "type": format!("fetch_{}", table.name()),
            "data": data,
        });

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&line)?)?;
        Ok(())
    }

    /// All lines as a JSON array / 以 JSON 数组读取全部记录
    pub fn read_all(&self) -> Result<Vec<Value>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| Error::Internal(format!("corrupted request log {}: {}", self.path.display(), e)))
            })
            .collect()
    }

    /// Remove the log file, missing is fine / 清空日志
    pub fn reset(&self) -> Result<()> {
        let _guard = self.time_diff.lock();
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Run a log operation on the blocking pool / 在阻塞线程池中操作日志文件
pub async fn blocking<T, F>(log: Arc<RequestLog>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&RequestLog) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&log))
        .await
        .map_err(|e| Error::Internal(format!("request log task failed: {}", e)))?
}

/// `base64(uid) -> base64(value)` object of a whole table / 导出整张表
pub fn export_table(table: &EncryptedTable) -> Map<String, Value> {
    table
        .iter()
        .map(|(uid, value)| {
            (
                STANDARD_NO_PAD.encode(uid),
                Value::String(STANDARD_NO_PAD.encode(value)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexes::test_support::uid;

    #[test]
    fn test_record_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("requests.log"));
        assert!(log.read_all().unwrap().is_empty());

        let uids: UidSet = [uid(1), uid(2)].into_iter().collect();
        let mut found = EncryptedTable::new();
        found.insert(uid(1), vec![0xff, 0x00]);

        log.record(Table::Entries, &uids, &found).unwrap();
        log.record(Table::Chains, &UidSet::new(), &EncryptedTable::new()).unwrap();

        let lines = log.read_all().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "fetch_entries");
        assert_eq!(lines[1]["type"], "fetch_chains");

        let data = lines[0]["data"].as_object().unwrap();
        assert_eq!(data[&STANDARD_NO_PAD.encode(uid(1))], "/wA");
        assert!(data[&STANDARD_NO_PAD.encode(uid(2))].is_null());
    }

    #[test]
    fn test_fake_time_shifts_dates() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("requests.log"));

        log.set_fake_time(1_000).unwrap();
        log.record(Table::Entries, &UidSet::new(), &EncryptedTable::new()).unwrap();

        let date = log.read_all().unwrap()[0]["date"].as_i64().unwrap();
        assert!((1_000..61_000).contains(&date), "date {date} not near fake time");
    }

    #[test]
    fn test_fake_time_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("requests.log"));

        assert!(matches!(log.set_fake_time(i64::MIN), Err(Error::BadRequest(_))));

        *log.time_diff.lock() = i64::MIN;
        let recorded = log.record(Table::Entries, &UidSet::new(), &EncryptedTable::new());
        assert!(matches!(recorded, Err(Error::BadRequest(_))));

        log.set_fake_time(-1_000).unwrap();
        log.record(Table::Entries, &UidSet::new(), &EncryptedTable::new()).unwrap();
        assert!(log.read_all().unwrap()[0]["date"].as_i64().unwrap() < 0);
    }

    #[test]
    fn test_corrupted_log_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("requests.log"));
        std::fs::write(log.path(), "{\"date\": 1}\nnot json\n").unwrap();

        let err = log.read_all().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_reset() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("requests.log"));

        log.reset().unwrap();
        log.record(Table::Chains, &UidSet::new(), &EncryptedTable::new()).unwrap();
        assert!(log.path().exists());

        log.reset().unwrap();
        assert!(!log.path().exists());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocking_operations() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(RequestLog::new(dir.path().join("requests.log")));

        let uids: UidSet = [uid(3)].into_iter().collect();
        blocking(log.clone(), move |log| log.record(Table::Chains, &uids, &EncryptedTable::new()))
            .await
            .unwrap();

        let lines = blocking(log.clone(), |log| log.read_all()).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "fetch_chains");
    }

    #[test]
    fn test_export_table() {
        let mut table = EncryptedTable::new();
        table.insert(uid(0), b"hi".to_vec());

        let exported = export_table(&table);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[&STANDARD_NO_PAD.encode(uid(0))], "aGk");
    }
}
