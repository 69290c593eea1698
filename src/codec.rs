//! Canonical JSON codec
//!
//! Encodes values, actions and transactions into the JSON interchange
//! form that is hashed, logged and replicated:
//!
//! - map keys are always emitted in sorted order, compact separators
//! - the absent marker is `{"__ext__":"Absent"}`
//! - a user map that itself contains the reserved `__ext__` key is escaped
//!   as `{"__ext__":"Map","data":{...}}`, so neither form is ever confused
//!   with user data
//! - actions are `[path, old, new]` triples, path segments are strings
//!   (map keys) or non-negative integers (sequence indices)
//! - other `__ext__` tags are looked up in an [`ExtensionRegistry`]; the
//!   default one knows `set`

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

use crate::error::CodecError;
use crate::hash::Hash;
use crate::transaction::StoredTransaction;
use crate::value::{Action, ExtValue, Map, Path, PathSegment, Slot, Value};

// ── Extension tags ─────────────────────────────────────────────────────

/// Reserved key marking a tagged extension object.
pub const EXT_KEY: &str = "__ext__";
/// Payload key of a tagged extension object.
pub const EXT_DATA: &str = "data";
/// Tag of the absent marker.
pub const TAG_ABSENT: &str = "Absent";
/// Tag of an escaped map.
pub const TAG_MAP: &str = "Map";
/// Tag of the built-in set extension.
pub const TAG_SET: &str = "set";

/// Encode/decode pair for one extension tag.
#[derive(Clone, Copy)]
pub struct ExtensionCodec {
    /// Normalize a payload when a value is built in memory.
    pub encode: fn(Value) -> Result<Value, CodecError>,
    /// Check a payload read back from JSON. Must accept exactly what
    /// `encode` produces, otherwise logged values stop round-tripping.
    pub decode: fn(Value) -> Result<Value, CodecError>,
}

impl fmt::Debug for ExtensionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionCodec").finish_non_exhaustive()
    }
}

/// Tag → codec table consulted when decoding tagged objects.
///
/// `Absent` and the map escape are handled by the codec itself and cannot
/// be registered. The default registry carries the `set` extension.
#[derive(Debug, Clone)]
pub struct ExtensionRegistry {
    codecs: BTreeMap<String, ExtensionCodec>,
}

static BUILTIN: Lazy<ExtensionRegistry> = Lazy::new(ExtensionRegistry::default);

impl Default for ExtensionRegistry {
    fn default() -> Self {
        let mut codecs = BTreeMap::new();
        codecs.insert(
            TAG_SET.to_owned(),
            ExtensionCodec {
                encode: encode_set,
                decode: decode_set,
            },
        );
        Self { codecs }
    }
}

impl ExtensionRegistry {
    /// Registry without any caller-visible extension.
    pub fn empty() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Shared default registry, used by every decode that takes none.
    pub fn builtin() -> &'static ExtensionRegistry {
        &BUILTIN
    }

    /// Add or replace the codec for `tag`. Returns the replaced codec.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        codec: ExtensionCodec,
    ) -> Result<Option<ExtensionCodec>, CodecError> {
        let tag = tag.into();
        if tag == TAG_ABSENT || tag == TAG_MAP {
            return Err(CodecError::ReservedExtension(tag));
        }
        Ok(self.codecs.insert(tag, codec))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.codecs.contains_key(tag)
    }

    /// Build a tagged value, letting the codec normalize `payload`.
    pub fn build(&self, tag: &str, payload: Value) -> Result<Value, CodecError> {
        let codec = self
            .codecs
            .get(tag)
            .ok_or_else(|| CodecError::UnknownExtension(tag.to_owned()))?;
        Ok(Value::Ext(ExtValue::new(tag, (codec.encode)(payload)?)))
    }

    fn decode(&self, tag: String, payload: Value) -> Result<Value, CodecError> {
        let Some(codec) = self.codecs.get(&tag) else {
            return Err(CodecError::UnknownExtension(tag));
        };
        let payload = (codec.decode)(payload)?;
        Ok(Value::Ext(ExtValue::new(tag, payload)))
    }
}

// ── Set extension ──────────────────────────────────────────────────────

fn member_key(value: &Value) -> String {
    to_canonical_string(&encode_value(value))
}

pub(crate) fn set_value(mut items: Vec<Value>) -> ExtValue {
    items.sort_by_cached_key(member_key);
    items.dedup();
    ExtValue::new(TAG_SET, Value::Seq(items))
}

fn encode_set(payload: Value) -> Result<Value, CodecError> {
    match payload {
        Value::Seq(items) => Ok(set_value(items).data().clone()),
        other => Err(CodecError::Shape {
            expected: "set members",
            found: other.kind_name().to_owned(),
        }),
    }
}

fn decode_set(payload: Value) -> Result<Value, CodecError> {
    let ordered = match &payload {
        Value::Seq(items) => items
            .windows(2)
            .all(|pair| member_key(&pair[0]) < member_key(&pair[1])),
        other => {
            return Err(CodecError::Shape {
                expected: "set members",
                found: other.kind_name().to_owned(),
            })
        }
    };
    if !ordered {
        return Err(CodecError::Shape {
            expected: "sorted, duplicate-free set members",
            found: payload.to_string(),
        });
    }
    Ok(payload)
}

// ── Tagged objects ─────────────────────────────────────────────────────

/// Decoded form of a tagged extension object.
enum Tagged {
    Absent,
    Value(Value),
}

fn ext_object(tag: &str, data: Option<Json>) -> Json {
    let mut obj = serde_json::Map::new();
    obj.insert(EXT_KEY.to_owned(), Json::String(tag.to_owned()));
    if let Some(data) = data {
        obj.insert(EXT_DATA.to_owned(), data);
    }
    Json::Object(obj)
}

/// Tagged objects carry exactly `__ext__` (plus `data` unless absent);
/// anything else would be dropped on re-encoding and escape the hash.
fn parse_extension(
    mut obj: serde_json::Map<String, Json>,
    registry: &ExtensionRegistry,
) -> Result<Tagged, CodecError> {
    let tag = match obj.remove(EXT_KEY) {
        Some(Json::String(tag)) => tag,
        Some(other) => return Err(CodecError::shape("extension tag string", &other)),
        None => return Err(CodecError::shape("extension object", &Json::Object(obj))),
    };
    if tag == TAG_ABSENT {
        if !obj.is_empty() {
            return Err(CodecError::shape("bare absent marker", &Json::Object(obj)));
        }
        return Ok(Tagged::Absent);
    }

    let Some(data) = obj.remove(EXT_DATA) else {
        return Err(CodecError::shape("extension payload", &Json::Null));
    };
    if !obj.is_empty() {
        return Err(CodecError::shape("extension object without extra keys", &Json::Object(obj)));
    }
    if tag == TAG_MAP {
        return match data {
            Json::Object(entries) => Ok(Tagged::Value(Value::Map(decode_entries(entries, registry)?))),
            other => Err(CodecError::shape("escaped map payload", &other)),
        };
    }
    let payload = decode_value_with(data, registry)?;
    registry.decode(tag, payload).map(Tagged::Value)
}

// ── Values ─────────────────────────────────────────────────────────────

/// Encode a value into its canonical JSON form.
pub fn encode_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::Seq(items) => Json::Array(items.iter().map(encode_value).collect()),
        Value::Map(map) => {
            let obj = encode_map(map);
            if map.contains_key(EXT_KEY) {
                ext_object(TAG_MAP, Some(obj))
            } else {
                obj
            }
        }
        Value::Ext(ext) => ext_object(ext.tag(), Some(encode_value(ext.data()))),
    }
}

fn encode_map(map: &Map) -> Json {
    Json::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

fn decode_entries(
    obj: serde_json::Map<String, Json>,
    registry: &ExtensionRegistry,
) -> Result<Map, CodecError> {
    obj.into_iter()
        .map(|(k, v)| Ok((k, decode_value_with(v, registry)?)))
        .collect()
}

/// Decode a value. The absent marker is rejected: it never appears inside a tree.
pub fn decode_value(json: Json) -> Result<Value, CodecError> {
    decode_value_with(json, ExtensionRegistry::builtin())
}

pub fn decode_value_with(json: Json, registry: &ExtensionRegistry) -> Result<Value, CodecError> {
    decode_slot_with(json, registry)?
        .into_value()
        .ok_or(CodecError::UnexpectedAbsent)
}

/// Encode a slot; `Absent` becomes the tagged marker.
pub fn encode_slot(slot: &Slot) -> Json {
    match slot {
        Slot::Absent => ext_object(TAG_ABSENT, None),
        Slot::Present(v) => encode_value(v),
    }
}

/// Decode a slot, accepting the absent marker at the top level only.
pub fn decode_slot(json: Json) -> Result<Slot, CodecError> {
    decode_slot_with(json, ExtensionRegistry::builtin())
}

pub fn decode_slot_with(json: Json, registry: &ExtensionRegistry) -> Result<Slot, CodecError> {
    let value = match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Seq(
            items
                .into_iter()
                .map(|item| decode_value_with(item, registry))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(obj) if obj.contains_key(EXT_KEY) => match parse_extension(obj, registry)? {
            Tagged::Absent => return Ok(Slot::Absent),
            Tagged::Value(value) => value,
        },
        Json::Object(obj) => Value::Map(decode_entries(obj, registry)?),
    };
    Ok(Slot::Present(value))
}

// ── Paths & actions ────────────────────────────────────────────────────

pub fn encode_path(path: &Path) -> Json {
    Json::Array(
        path.segments()
            .iter()
            .map(|segment| match segment {
                PathSegment::Key(k) => Json::String(k.clone()),
                PathSegment::Index(i) => Json::from(*i),
            })
            .collect(),
    )
}

pub fn decode_path(json: Json) -> Result<Path, CodecError> {
    let Json::Array(items) = json else {
        return Err(CodecError::shape("path array", &json));
    };
    items
        .into_iter()
        .map(|item| match item {
            Json::String(k) => Ok(PathSegment::Key(k)),
            Json::Number(ref n) => n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .map(PathSegment::Index)
                .ok_or_else(|| CodecError::shape("non-negative index", &item)),
            other => Err(CodecError::shape("path segment", &other)),
        })
        .collect()
}

/// Encode an action as `[path, old, new]`.
pub fn encode_action(action: &Action) -> Json {
    Json::Array(vec![
        encode_path(action.path()),
        encode_slot(action.old()),
        encode_slot(action.new_value()),
    ])
}

pub fn decode_action(json: Json) -> Result<Action, CodecError> {
    decode_action_with(json, ExtensionRegistry::builtin())
}

pub fn decode_action_with(json: Json, registry: &ExtensionRegistry) -> Result<Action, CodecError> {
    let Json::Array(items) = json else {
        return Err(CodecError::shape("[path, old, new]", &json));
    };
    let Ok([path, old, new]) = <[Json; 3]>::try_from(items) else {
        return Err(CodecError::Shape {
            expected: "[path, old, new]",
            found: "array of wrong length".to_owned(),
        });
    };
    Ok(Action::new(
        decode_path(path)?,
        decode_slot_with(old, registry)?,
        decode_slot_with(new, registry)?,
    )?)
}

// ── Transactions ───────────────────────────────────────────────────────

/// The hashed part of a transaction: `{actions, parent, tid}`.
pub fn transaction_body(tid: u64, parent: Option<&Hash>, actions: &[Action]) -> Json {
    let mut obj = serde_json::Map::new();
    obj.insert(
        "actions".to_owned(),
        Json::Array(actions.iter().map(encode_action).collect()),
    );
    obj.insert(
        "parent".to_owned(),
        parent.map_or(Json::Null, |h| Json::String(h.to_base64())),
    );
    obj.insert("tid".to_owned(), Json::from(tid));
    Json::Object(obj)
}

/// Full wire form: the body plus `hash`.
pub fn transaction_record(
    tid: u64,
    parent: Option<&Hash>,
    actions: &[Action],
    hash: &Hash,
) -> Json {
    let mut record = transaction_body(tid, parent, actions);
    if let Json::Object(obj) = &mut record {
        obj.insert("hash".to_owned(), Json::String(hash.to_base64()));
    }
    sort_keys(record)
}

/// Decode a full wire record, fields exactly `actions`, `hash`, `parent`
/// and `tid`. The hash is returned as recorded, not checked.
pub fn decode_transaction_record(
    json: Json,
    registry: &ExtensionRegistry,
) -> Result<StoredTransaction, CodecError> {
    let mut obj = match json {
        Json::Object(obj) => obj,
        other => return Err(CodecError::shape("transaction record", &other)),
    };
    if let Some(extra) = obj.keys().find(|k| !RECORD_FIELDS.contains(&k.as_str())) {
        return Err(CodecError::Shape {
            expected: "transaction record field",
            found: extra.clone(),
        });
    }
    let mut field = |name: &'static str| {
        obj.remove(name).ok_or_else(|| CodecError::Shape {
            expected: name,
            found: "missing field".to_owned(),
        })
    };

    let actions = match field("actions")? {
        Json::Array(items) => items
            .into_iter()
            .map(|item| decode_action_with(item, registry))
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(CodecError::shape("action list", &other)),
    };
    let parent = match field("parent")? {
        Json::Null => None,
        Json::String(s) => Some(Hash::from_base64(&s)?),
        other => return Err(CodecError::shape("parent hash or null", &other)),
    };
    let hash = match field("hash")? {
        Json::String(s) => Hash::from_base64(&s)?,
        other => return Err(CodecError::shape("hash string", &other)),
    };
    let tid = match field("tid")? {
        Json::Number(n) => n.as_u64().ok_or_else(|| CodecError::Shape {
            expected: "non-negative integer tid",
            found: n.to_string(),
        })?,
        other => return Err(CodecError::shape("tid", &other)),
    };
    Ok(StoredTransaction {
        actions,
        hash,
        parent,
        tid,
    })
}

const RECORD_FIELDS: [&str; 4] = ["actions", "hash", "parent", "tid"];

/// Rebuild every object with keys in sorted order.
pub fn sort_keys(json: Json) -> Json {
    match json {
        Json::Array(items) => Json::Array(items.into_iter().map(sort_keys).collect()),
        Json::Object(obj) => {
            let mut entries: Vec<_> = obj.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Json::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        other => other,
    }
}

/// Compact single-line text of a canonical JSON tree.
pub fn to_canonical_string(json: &Json) -> String {
    json.to_string()
}

/// Content hash of a canonical JSON tree.
pub fn content_hash(json: &Json) -> Hash {
    Hash::digest(to_canonical_string(json).as_bytes())
}

// ── serde glue ─────────────────────────────────────────────────────────

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode_value(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decode_value(Json::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode_path(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decode_path(Json::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode_action(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decode_action(Json::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
