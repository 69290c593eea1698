//! Value model
//!
//! A JSON-like tree (null, bool, number, string, sequence, map, tagged
//! extension) plus the pieces that address and change it: [`PathSegment`],
//! [`Path`], the three-way [`Slot`] (absent / present) and [`Action`].

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Number;

use crate::error::InvalidAction;

/// Map node. Keys are kept sorted so iteration order is canonical.
pub type Map = BTreeMap<String, Value>;

/// A node of the document tree.
///
/// Equality is structural. Numbers compare as JSON numbers, so the integer
/// `1` and the float `1.0` are different values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Seq(Vec<Value>),
    Map(Map),
    /// Tagged leaf decoded through an extension codec, e.g. a set.
    Ext(ExtValue),
}

/// Payload of a tagged extension value.
///
/// The payload is kept in its canonical form; build one through
/// [`Value::set`] or [`crate::codec::ExtensionRegistry::build`] so the
/// registered codec gets to normalize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtValue {
    tag: String,
    data: Box<Value>,
}

impl ExtValue {
    pub(crate) fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data: Box::new(data),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl Value {
    /// Short name of the variant, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "map",
            Value::Ext(_) => "extension",
        }
    }

    /// A set: members sorted by canonical encoding, duplicates dropped.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Ext(crate::codec::set_value(items.into_iter().collect()))
    }

    pub fn as_ext(&self) -> Option<&ExtValue> {
        match self {
            Value::Ext(ext) => Some(ext),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Seq(_) | Value::Map(_))
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// Child addressed by a single segment.
    pub fn get(&self, segment: &PathSegment) -> Option<&Value> {
        match (self, segment) {
            (Value::Map(m), PathSegment::Key(k)) => m.get(k),
            (Value::Seq(s), PathSegment::Index(i)) => s.get(*i),
            _ => None,
        }
    }

    /// Node at `path`, if every step exists.
    pub fn pointer(&self, path: &Path) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.get(segment))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::codec::encode_value(self))
    }
}

// ── Conversions ────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Seq(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
            ext @ Value::Ext(_) => crate::codec::encode_value(&ext),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Seq(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

// ── Slot ───────────────────────────────────────────────────────────────

/// A location that may or may not hold a value.
///
/// `Absent` means "no such key/index", which is not the same as `Null`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Slot {
    #[default]
    Absent,
    Present(Value),
}

impl Slot {
    pub fn is_absent(&self) -> bool {
        matches!(self, Slot::Absent)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Absent => None,
            Slot::Present(v) => Some(v),
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Slot::Absent => None,
            Slot::Present(v) => Some(v),
        }
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Present(value)
    }
}

impl From<Option<Value>> for Slot {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Slot::Absent, Slot::Present)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Absent => f.write_str("<absent>"),
            Slot::Present(v) => fmt::Display::fmt(v, f),
        }
    }
}

// ── Paths ──────────────────────────────────────────────────────────────

/// One step of a path: a map key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "[{k:?}]"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Sequence of segments from the root of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// The empty path (the root itself)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Append a map key
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(key.into()));
        self
    }

    /// Append a sequence index
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// True if `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("root")?;
        for segment in &self.0 {
            fmt::Display::fmt(segment, f)?;
        }
        Ok(())
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl From<&[PathSegment]> for Path {
    fn from(segments: &[PathSegment]) -> Self {
        Self(segments.to_vec())
    }
}

impl FromIterator<PathSegment> for Path {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ── Action ─────────────────────────────────────────────────────────────

/// What an action does to its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

/// A single localized change: `path`, expected `old`, replacement `new`.
///
/// At least one of `old` and `new` is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    path: Path,
    old: Slot,
    new: Slot,
}

impl Action {
    /// Build an action, rejecting the absent/absent combination.
    pub fn new(path: Path, old: impl Into<Slot>, new: impl Into<Slot>) -> Result<Self, InvalidAction> {
        let (old, new) = (old.into(), new.into());
        if old.is_absent() && new.is_absent() {
            return Err(InvalidAction { path });
        }
        Ok(Self { path, old, new })
    }

    /// Callers guarantee at least one side is present.
    pub(crate) fn new_unchecked(path: Path, old: Slot, new: Slot) -> Self {
        debug_assert!(!(old.is_absent() && new.is_absent()));
        Self { path, old, new }
    }

    pub fn create(path: Path, value: Value) -> Self {
        Self::new_unchecked(path, Slot::Absent, Slot::Present(value))
    }

    pub fn update(path: Path, old: Value, new: Value) -> Self {
        Self::new_unchecked(path, Slot::Present(old), Slot::Present(new))
    }

    pub fn delete(path: Path, old: Value) -> Self {
        Self::new_unchecked(path, Slot::Present(old), Slot::Absent)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn old(&self) -> &Slot {
        &self.old
    }

    pub fn new_value(&self) -> &Slot {
        &self.new
    }

    pub fn kind(&self) -> ActionKind {
        match (&self.old, &self.new) {
            (Slot::Absent, _) => ActionKind::Create,
            (_, Slot::Absent) => ActionKind::Delete,
            _ => ActionKind::Update,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.path, self.old, self.new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_roundtrip() {
        let json = json!({"a": [1, true, null, "s"], "b": {"c": 2.5}});
        let value = Value::from(json.clone());
        assert_eq!(serde_json::Value::from(value), json);
    }

    #[test]
    fn test_int_and_float_differ() {
        assert_ne!(Value::from(1i64), Value::from(1.0f64));
    }

    #[test]
    fn test_nan_becomes_null() {
        assert_eq!(Value::from(f64::NAN), Value::Null);
    }

    #[test]
    fn test_get_by_segment() {
        let v = Value::from(json!({"a": [10, 20]}));
        let a = v.get(&PathSegment::from("a")).unwrap();
        assert_eq!(a.get(&PathSegment::Index(1)), Some(&Value::from(20i64)));
        assert!(a.get(&PathSegment::from("x")).is_none());
        assert!(v.get(&PathSegment::Index(0)).is_none());
    }

    #[test]
    fn test_pointer_walks_path() {
        let v = Value::from(json!({"foo": {"bar": [1, 2, 3]}}));
        let p = Path::root().key("foo").key("bar").index(2);
        assert_eq!(v.pointer(&p), Some(&Value::from(3i64)));
        assert!(v.pointer(&Path::root().key("nope")).is_none());
        assert_eq!(v.pointer(&Path::root()), Some(&v));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::Null.kind_name(), "null");
        assert_eq!(Value::from(json!([])).kind_name(), "sequence");
        assert_eq!(Value::from(json!({})).kind_name(), "map");
        assert!(Value::from(json!({})).is_container());
        assert!(!Value::from("x").is_container());
    }

    #[test]
    fn test_set_is_normalized_leaf() {
        let a = Value::set([Value::from(3i64), Value::from(1i64), Value::from(3i64)]);
        let b = Value::set([Value::from(1i64), Value::from(3i64)]);
        assert_eq!(a, b);
        assert_eq!(a.kind_name(), "extension");
        assert!(!a.is_container());
        let ext = a.as_ext().unwrap();
        assert_eq!(ext.tag(), "set");
        assert_eq!(ext.data(), &Value::from(json!([1, 3])));
        assert_eq!(
            serde_json::Value::from(a),
            json!({"__ext__": "set", "data": [1, 3]})
        );
    }

    #[test]
    fn test_slot_distinguishes_null_from_absent() {
        let null = Slot::Present(Value::Null);
        assert!(!null.is_absent());
        assert!(Slot::Absent.is_absent());
        assert_ne!(null, Slot::Absent);
        assert_eq!(Slot::from(None), Slot::Absent);
    }

    #[test]
    fn test_path_display() {
        let p = Path::root().key("foo").index(0).key("bar");
        assert_eq!(p.to_string(), "root[\"foo\"][0][\"bar\"]");
        assert_eq!(Path::root().to_string(), "root");
    }

    #[test]
    fn test_path_prefix() {
        let a = Path::root().key("a");
        let ab = a.clone().key("b");
        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&a));
        assert!(!ab.is_prefix_of(&a));
        assert!(Path::root().is_prefix_of(&a));
    }

    #[test]
    fn test_action_rejects_absent_absent() {
        let err = Action::new(Path::root().key("x"), Slot::Absent, Slot::Absent).unwrap_err();
        assert_eq!(err.path, Path::root().key("x"));
    }

    #[test]
    fn test_action_kinds() {
        let p = Path::root().key("k");
        assert_eq!(Action::create(p.clone(), Value::Null).kind(), ActionKind::Create);
        assert_eq!(Action::delete(p.clone(), Value::Null).kind(), ActionKind::Delete);
        assert_eq!(
            Action::update(p, Value::from(1i64), Value::from(2i64)).kind(),
            ActionKind::Update
        );
    }

    #[test]
    fn test_action_new_accepts_values() {
        let a = Action::new(Path::root().key("k"), Value::from(1i64), Slot::Absent).unwrap();
        assert_eq!(a.old(), &Slot::Present(Value::from(1i64)));
        assert!(a.new_value().is_absent());
    }
}
