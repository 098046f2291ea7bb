use crate::id_pool::IdPool;
use crate::util::now_ms;
use lw_protocol::{
    EncryptedRecord, IncomingRecord, LevelLabel, LogEntry, DEFAULT_LEVEL, ENCRYPTED_PLACEHOLDER,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Producer fields lifted into the canonical entry.  They never appear in
/// `data`; `levelLabel` is included so normalization is idempotent.
const NORMALIZED_FIELDS: [&str; 8] = [
    "level",
    "levelLabel",
    "time",
    "msg",
    "message",
    "namespace",
    "name",
    "channel",
];

/// Maps heterogeneous producer records onto the canonical [`LogEntry`].
///
/// pino sends `{level, time, msg}`, winston sends `{level, message}` with a
/// `name` for the logger, bunyan sends both spellings; the remainder of each
/// record flows into `data` untouched.  Encrypted blobs pass through opaque.
pub struct Normalizer {
    ids: Arc<IdPool>,
}

impl Normalizer {
    pub fn new(ids: Arc<IdPool>) -> Self {
        Self { ids }
    }

    pub async fn normalize(&self, record: IncomingRecord, default_channel: &str) -> LogEntry {
        match record {
            IncomingRecord::Encrypted(record) => {
                self.normalize_encrypted(record, default_channel).await
            }
            IncomingRecord::Plain(map) => self.normalize_plain(map, default_channel).await,
        }
    }

    async fn normalize_plain(
        &self,
        mut map: Map<String, Value>,
        default_channel: &str,
    ) -> LogEntry {
        let level = map
            .get("level")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_LEVEL);
        let time = map.get("time").and_then(Value::as_i64).unwrap_or_else(now_ms);
        let msg = string_field(&map, "msg")
            .or_else(|| string_field(&map, "message"))
            .unwrap_or_default();
        let namespace = string_field(&map, "namespace").or_else(|| string_field(&map, "name"));
        let channel =
            string_field(&map, "channel").unwrap_or_else(|| default_channel.to_owned());

        for field in NORMALIZED_FIELDS {
            map.remove(field);
        }
        // A re-normalized canonical entry carries its payload nested under
        // `data`; lift it back out and layer any remaining keys on top.
        let mut data = match map.remove("data") {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                let mut data = Map::new();
                data.insert("data".to_owned(), other);
                data
            }
            None => Map::new(),
        };
        data.extend(map);

        LogEntry {
            id: self.ids.get().await,
            level,
            level_label: LevelLabel::from_level(level),
            time,
            msg,
            namespace,
            channel,
            data,
            encrypted: None,
            encrypted_data: None,
        }
    }

    async fn normalize_encrypted(
        &self,
        record: EncryptedRecord,
        default_channel: &str,
    ) -> LogEntry {
        LogEntry {
            id: self.ids.get().await,
            level: DEFAULT_LEVEL,
            level_label: LevelLabel::Info,
            time: now_ms(),
            msg: ENCRYPTED_PLACEHOLDER.to_owned(),
            namespace: None,
            channel: default_channel.to_owned(),
            data: Map::new(),
            encrypted: Some(true),
            encrypted_data: Some(record.encrypted),
        }
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}
