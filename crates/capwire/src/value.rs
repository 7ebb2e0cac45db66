//! # Value Model
//!
//! The dynamic values that travel through the codec.
//!
//! Primitives are held inline. Every other kind is a cheap-to-clone `Arc`
//! handle, so two clones of a handle are the *same* value: the encoder uses
//! handle identity to collapse shared references and cycles into one wire
//! entry, and the decoder hands back one shared handle per wire entry.
//!
//! Containers use interior mutability so the decoder can build cyclic graphs
//! (insert the container first, fill it afterwards). Locks are never held
//! across an `.await`; readers take a snapshot instead.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use bytes::Bytes;
use chrono::DateTime;
use chrono::Datelike;
use chrono::SecondsFormat;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::Stream;
use futures::StreamExt;

use crate::error::Error;
use crate::error::Result;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
//  VALUE
// ============================================================================

/// A structured runtime value.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    BigInt(i128),
    /// A primitive wrapped in an object (`new Number(1)`).
    Boxed(Boxed),
    Array(Array),
    Object(Object),
    Map(MapValue),
    Set(SetValue),
    Date(Date),
    RegExp(RegExp),
    ArrayBuffer(ArrayBuffer),
    /// A typed array or `DataView` over an `ArrayBuffer`.
    View(TypedArray),
    Error(ErrorValue),
    Headers(Headers),
    Request(Request),
    Response(Response),
    Stream(ByteStream),
    Blob(Blob),
    Function(Function),
    /// A live object passed by handle, never by copy.
    Capability(Stub),
    /// A class instance provided by the host platform.
    Platform(PlatformObject),
    /// Any other host value; only encodable through a registry handler.
    Opaque(Opaque),
}

impl Value {
    /// Builds an array with no holes.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Array::from_values(items))
    }

    /// Builds a plain object, keeping the given key order.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Object::from_entries(entries))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::BigInt(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Short type description used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::BigInt(_) => "bigint",
            Value::Boxed(_) => "Object",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Map(_) => "Map",
            Value::Set(_) => "Set",
            Value::Date(_) => "Date",
            Value::RegExp(_) => "RegExp",
            Value::ArrayBuffer(_) => "ArrayBuffer",
            Value::View(_) => "ArrayBufferView",
            Value::Error(_) => "Error",
            Value::Headers(_) => "Headers",
            Value::Request(_) => "Request",
            Value::Response(_) => "Response",
            Value::Stream(_) => "ReadableStream",
            Value::Blob(_) => "Blob",
            Value::Function(_) => "function",
            Value::Capability(_) => "Capability",
            Value::Platform(_) => "PlatformObject",
            Value::Opaque(_) => "Opaque",
        }
    }

    /// The handle address of a reference value; `None` for primitives.
    pub fn identity(&self) -> Option<usize> {
        fn addr<T: ?Sized>(arc: &Arc<T>) -> usize {
            Arc::as_ptr(arc) as *const () as usize
        }
        match self {
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::BigInt(_) => None,
            Value::Boxed(v) => Some(addr(&v.0)),
            Value::Array(v) => Some(addr(&v.0)),
            Value::Object(v) => Some(addr(&v.0)),
            Value::Map(v) => Some(addr(&v.0)),
            Value::Set(v) => Some(addr(&v.0)),
            Value::Date(v) => Some(addr(&v.0)),
            Value::RegExp(v) => Some(addr(&v.0)),
            Value::ArrayBuffer(v) => Some(addr(&v.0)),
            Value::View(v) => Some(addr(&v.0)),
            Value::Error(v) => Some(addr(&v.0)),
            Value::Headers(v) => Some(addr(&v.0)),
            Value::Request(v) => Some(addr(&v.0)),
            Value::Response(v) => Some(addr(&v.0)),
            Value::Stream(v) => Some(addr(&v.0)),
            Value::Blob(v) => Some(addr(&v.0)),
            Value::Function(v) => Some(addr(&v.0)),
            Value::Capability(v) => Some(addr(&v.0)),
            Value::Platform(v) => Some(addr(&v.0)),
            Value::Opaque(v) => Some(addr(&v.value)),
        }
    }

    /// True when both values are the same handle (or equal primitives).
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => Value::same_value_zero(self, other),
            _ => false,
        }
    }

    /// `SameValueZero`: `NaN` equals `NaN`, `+0` equals `-0`, handles by identity.
    pub fn same_value_zero(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => (x.is_nan() && y.is_nan()) || x == y,
            (Value::String(x), Value::String(y)) => x == y,
            (Value::BigInt(x), Value::BigInt(y)) => x == y,
            _ => match (a.identity(), b.identity()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Number(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Number(v as f64) }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self { Value::Number(v as f64) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Number(v as f64) }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self { Value::Number(v as f64) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self { Value::Array(v) }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self { Value::Object(v) }
}

impl From<ErrorValue> for Value {
    fn from(v: ErrorValue) -> Self { Value::Error(v) }
}

impl From<Function> for Value {
    fn from(v: Function) -> Self { Value::Function(v) }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Shallow on purpose: graphs may be cyclic.
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::BigInt(n) => write!(f, "{}n", n),
            Value::Boxed(b) => write!(f, "Boxed({:?})", b.value()),
            Value::Array(a) => write!(f, "Array(len={})", a.len()),
            Value::Object(o) => write!(f, "Object{:?}", o.keys()),
            Value::Map(m) => write!(f, "Map(size={})", m.len()),
            Value::Set(s) => write!(f, "Set(size={})", s.len()),
            Value::Date(d) => write!(f, "Date({})", d.to_iso().unwrap_or_else(|| "Invalid Date".into())),
            Value::RegExp(r) => write!(f, "/{}/{}", r.source(), r.flags()),
            Value::ArrayBuffer(b) => write!(f, "ArrayBuffer(byteLength={})", b.len()),
            Value::View(v) => write!(f, "{}(byteLength={})", v.kind().name(), v.byte_length()),
            Value::Error(e) => write!(f, "{}: {}", e.name(), e.message()),
            Value::Headers(h) => write!(f, "Headers{:?}", h.entries()),
            Value::Request(r) => write!(f, "Request({} {})", r.method(), r.url()),
            Value::Response(r) => write!(f, "Response({} {})", r.status(), r.status_text()),
            Value::Stream(s) => write!(f, "ReadableStream(consumed={})", s.is_consumed()),
            Value::Blob(b) => write!(f, "Blob(size={}, type={:?})", b.size(), b.mime_type()),
            Value::Function(func) => write!(f, "[Function: {}]", func.name()),
            Value::Capability(s) => write!(f, "[Capability: {}]", s.type_name()),
            Value::Platform(p) => write!(f, "[{}]", p.class()),
            Value::Opaque(o) => write!(f, "[Opaque: {}]", o.type_name()),
        }
    }
}

// ============================================================================
//  CONTAINERS
// ============================================================================

/// A boxed primitive. Only booleans, numbers and strings can be boxed.
#[derive(Clone)]
pub struct Boxed(Arc<Value>);

impl Boxed {
    pub fn new(primitive: Value) -> Result<Self> {
        match primitive {
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(Self(Arc::new(primitive))),
            other => Err(Error::shape("Object", format!("cannot box a {}", other.type_name()))),
        }
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// An array. `None` slots are holes: absent, not `undefined`.
#[derive(Clone, Default)]
pub struct Array(Arc<RwLock<Vec<Option<Value>>>>);

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(items: impl IntoIterator<Item = Value>) -> Self {
        Self::with_slots(items.into_iter().map(Some).collect())
    }

    pub fn with_slots(slots: Vec<Option<Value>>) -> Self {
        Self(Arc::new(RwLock::new(slots)))
    }

    /// An array of `len` holes.
    pub fn with_len(len: usize) -> Self {
        Self::with_slots(vec![None; len])
    }

    pub fn len(&self) -> usize {
        read(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether index `i` holds a value (holes and out-of-range are absent).
    pub fn has(&self, i: usize) -> bool {
        matches!(read(&self.0).get(i), Some(Some(_)))
    }

    /// The value at `i`, or `None` for holes and out-of-range indices.
    pub fn get(&self, i: usize) -> Option<Value> {
        read(&self.0).get(i).cloned().flatten()
    }

    pub fn push(&self, value: Value) {
        write(&self.0).push(Some(value));
    }

    /// Stores `value` at `i`, growing the array with holes when needed.
    pub fn set(&self, i: usize, value: Value) {
        let mut slots = write(&self.0);
        if i >= slots.len() {
            slots.resize(i + 1, None);
        }
        slots[i] = Some(value);
    }

    /// A copy of the slots, safe to iterate while awaiting.
    pub fn snapshot(&self) -> Vec<Option<Value>> {
        read(&self.0).clone()
    }

    /// The values with holes read as `undefined`.
    pub fn to_vec(&self) -> Vec<Value> {
        read(&self.0).iter().map(|slot| slot.clone().unwrap_or_default()).collect()
    }
}

/// Key of an object property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyKey {
    String(String),
    /// A symbol, identified by its description.
    Symbol(String),
}

struct ObjectInner {
    null_prototype: bool,
    props: RwLock<Vec<(PropertyKey, Value)>>,
}

/// A plain object with own properties in insertion order.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    pub fn new() -> Self {
        Self(Arc::new(ObjectInner { null_prototype: false, props: RwLock::new(Vec::new()) }))
    }

    /// An object created with `Object.create(null)`.
    pub fn with_null_prototype() -> Self {
        Self(Arc::new(ObjectInner { null_prototype: true, props: RwLock::new(Vec::new()) }))
    }

    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let obj = Self::new();
        for (key, value) in entries {
            obj.set(key, value);
        }
        obj
    }

    pub fn has_null_prototype(&self) -> bool {
        self.0.null_prototype
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        read(&self.0.props)
            .iter()
            .find(|(k, _)| matches!(k, PropertyKey::String(s) if s == key))
            .map(|(_, v)| v.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        read(&self.0.props).iter().any(|(k, _)| matches!(k, PropertyKey::String(s) if s == key))
    }

    /// Sets a string-keyed property, keeping its original position when it exists.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.set_key(PropertyKey::String(key.into()), value);
    }

    pub fn set_symbol(&self, description: impl Into<String>, value: Value) {
        self.set_key(PropertyKey::Symbol(description.into()), value);
    }

    fn set_key(&self, key: PropertyKey, value: Value) {
        let mut props = write(&self.0.props);
        match props.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => props.push((key, value)),
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut props = write(&self.0.props);
        let pos = props.iter().position(|(k, _)| matches!(k, PropertyKey::String(s) if s == key))?;
        Some(props.remove(pos).1)
    }

    pub fn has_symbols(&self) -> bool {
        read(&self.0.props).iter().any(|(k, _)| matches!(k, PropertyKey::Symbol(_)))
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// String-keyed entries in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        read(&self.0.props)
            .iter()
            .filter_map(|(k, v)| match k {
                PropertyKey::String(s) => Some((s.clone(), v.clone())),
                PropertyKey::Symbol(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.0.props).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

/// An insertion-ordered map keyed by `SameValueZero`.
#[derive(Clone, Default)]
pub struct MapValue(Arc<RwLock<Vec<(Value, Value)>>>);

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        read(&self.0).iter().find(|(k, _)| Value::same_value_zero(k, key)).map(|(_, v)| v.clone())
    }

    pub fn set(&self, key: Value, value: Value) {
        let mut entries = write(&self.0);
        match entries.iter_mut().find(|(k, _)| Value::same_value_zero(k, &key)) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        read(&self.0).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An insertion-ordered set keyed by `SameValueZero`.
#[derive(Clone, Default)]
pub struct SetValue(Arc<RwLock<Vec<Value>>>);

impl SetValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: Value) {
        let mut items = write(&self.0);
        if !items.iter().any(|v| Value::same_value_zero(v, &value)) {
            items.push(value);
        }
    }

    pub fn has(&self, value: &Value) -> bool {
        read(&self.0).iter().any(|v| Value::same_value_zero(v, value))
    }

    pub fn values(&self) -> Vec<Value> {
        read(&self.0).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
//  SCALAR OBJECTS
// ============================================================================

/// A point in time, or an invalid date.
#[derive(Clone)]
pub struct Date(Arc<Option<DateTime<Utc>>>);

impl Date {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Arc::new(Some(at)))
    }

    pub fn invalid() -> Self {
        Self(Arc::new(None))
    }

    pub fn from_millis(ms: f64) -> Self {
        if !ms.is_finite() {
            return Self::invalid();
        }
        Self(Arc::new(DateTime::from_timestamp_millis(ms as i64)))
    }

    /// Parses an ISO-8601 timestamp; anything unparseable is an invalid date.
    /// Years outside `0..=9999` use the six-digit signed form, e.g.
    /// `+010000-01-01T00:00:00.000Z`.
    pub fn parse(iso: &str) -> Self {
        let at = match extended_year(iso) {
            Some((year, rest)) => DateTime::parse_from_rfc3339(&format!("2000{}", rest))
                .ok()
                .and_then(|d| d.with_year(year)),
            None => DateTime::parse_from_rfc3339(iso).ok(),
        };
        Self(Arc::new(at.map(|d| d.with_timezone(&Utc))))
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn timestamp_millis(&self) -> Option<i64> {
        self.0.map(|d| d.timestamp_millis())
    }

    /// `toISOString()` form, e.g. `2024-01-02T03:04:05.678Z`.
    pub fn to_iso(&self) -> Option<String> {
        self.0.map(|d| match d.year() {
            0..=9999 => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            year => format!(
                "{}{:06}{}",
                if year < 0 { '-' } else { '+' },
                year.unsigned_abs(),
                d.format("-%m-%dT%H:%M:%S%.3fZ")
            ),
        })
    }
}

/// Splits `±YYYYYY-...` into its year and the remainder after the year.
/// `-000000` is not a valid year.
fn extended_year(iso: &str) -> Option<(i32, &str)> {
    let sign = match iso.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits = iso.get(1..7)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) || (sign < 0 && digits == "000000") {
        return None;
    }
    let year: i32 = digits.parse().ok()?;
    Some((sign * year, &iso[7..]))
}

struct RegExpInner {
    source: String,
    flags: String,
}

#[derive(Clone)]
pub struct RegExp(Arc<RegExpInner>);

impl RegExp {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self(Arc::new(RegExpInner { source: source.into(), flags: flags.into() }))
    }

    pub fn source(&self) -> &str {
        &self.0.source
    }

    pub fn flags(&self) -> &str {
        &self.0.flags
    }
}

// ============================================================================
//  BINARY DATA
// ============================================================================

/// A fixed block of raw bytes.
#[derive(Clone)]
pub struct ArrayBuffer(Arc<Vec<u8>>);

impl ArrayBuffer {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Element type of an `ArrayBuffer` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    DataView,
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl ViewKind {
    pub const ALL: [ViewKind; 12] = [
        ViewKind::DataView,
        ViewKind::Int8,
        ViewKind::Uint8,
        ViewKind::Uint8Clamped,
        ViewKind::Int16,
        ViewKind::Uint16,
        ViewKind::Int32,
        ViewKind::Uint32,
        ViewKind::Float32,
        ViewKind::Float64,
        ViewKind::BigInt64,
        ViewKind::BigUint64,
    ];

    /// Constructor name, e.g. `Uint8Array`.
    pub fn name(self) -> &'static str {
        match self {
            ViewKind::DataView => "DataView",
            ViewKind::Int8 => "Int8Array",
            ViewKind::Uint8 => "Uint8Array",
            ViewKind::Uint8Clamped => "Uint8ClampedArray",
            ViewKind::Int16 => "Int16Array",
            ViewKind::Uint16 => "Uint16Array",
            ViewKind::Int32 => "Int32Array",
            ViewKind::Uint32 => "Uint32Array",
            ViewKind::Float32 => "Float32Array",
            ViewKind::Float64 => "Float64Array",
            ViewKind::BigInt64 => "BigInt64Array",
            ViewKind::BigUint64 => "BigUint64Array",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// `BYTES_PER_ELEMENT`; `DataView` addresses single bytes.
    pub fn bytes_per_element(self) -> usize {
        match self {
            ViewKind::DataView | ViewKind::Int8 | ViewKind::Uint8 | ViewKind::Uint8Clamped => 1,
            ViewKind::Int16 | ViewKind::Uint16 => 2,
            ViewKind::Int32 | ViewKind::Uint32 | ViewKind::Float32 => 4,
            ViewKind::Float64 | ViewKind::BigInt64 | ViewKind::BigUint64 => 8,
        }
    }

    pub fn is_typed_array(self) -> bool {
        self != ViewKind::DataView
    }
}

struct ViewInner {
    kind: ViewKind,
    buffer: ArrayBuffer,
    byte_offset: usize,
    byte_length: usize,
}

/// A window onto an `ArrayBuffer`.
#[derive(Clone)]
pub struct TypedArray(Arc<ViewInner>);

impl TypedArray {
    /// Creates a view of `length` elements starting at `byte_offset`.
    pub fn new(kind: ViewKind, buffer: ArrayBuffer, byte_offset: usize, length: usize) -> Result<Self> {
        let size = kind.bytes_per_element();
        if byte_offset % size != 0 {
            return Err(Error::shape(kind.name(), format!("start offset must be a multiple of {}", size)));
        }
        let byte_length = length
            .checked_mul(size)
            .filter(|len| byte_offset.checked_add(*len).is_some_and(|end| end <= buffer.len()))
            .ok_or_else(|| Error::shape(kind.name(), "view exceeds the bounds of its buffer"))?;
        Ok(Self(Arc::new(ViewInner { kind, buffer, byte_offset, byte_length })))
    }

    /// A view spanning a fresh buffer holding `bytes`.
    pub fn from_bytes(kind: ViewKind, bytes: Vec<u8>) -> Result<Self> {
        let size = kind.bytes_per_element();
        if bytes.len() % size != 0 {
            return Err(Error::shape(kind.name(), format!("byte length should be a multiple of {}", size)));
        }
        let length = bytes.len() / size;
        Self::new(kind, ArrayBuffer::new(bytes), 0, length)
    }

    pub fn kind(&self) -> ViewKind {
        self.0.kind
    }

    pub fn buffer(&self) -> &ArrayBuffer {
        &self.0.buffer
    }

    pub fn byte_offset(&self) -> usize {
        self.0.byte_offset
    }

    pub fn byte_length(&self) -> usize {
        self.0.byte_length
    }

    /// Element count (`length`), or the byte length for a `DataView`.
    pub fn len(&self) -> usize {
        self.0.byte_length / self.0.kind.bytes_per_element()
    }

    pub fn is_empty(&self) -> bool {
        self.0.byte_length == 0
    }

    /// The bytes covered by this view.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0.buffer.as_bytes()[self.0.byte_offset..self.0.byte_offset + self.0.byte_length]
    }
}

// ============================================================================
//  ERRORS
// ============================================================================

struct ErrorInner {
    name: String,
    message: String,
    stack: Option<String>,
    cause: Option<Value>,
}

/// An error object: `{name, message, stack, cause}`.
#[derive(Clone)]
pub struct ErrorValue(Arc<ErrorInner>);

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_details(name, message, None, None)
    }

    pub fn with_details(
        name: impl Into<String>,
        message: impl Into<String>,
        stack: Option<String>,
        cause: Option<Value>,
    ) -> Self {
        Self(Arc::new(ErrorInner { name: name.into(), message: message.into(), stack, cause }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.0.stack.as_deref()
    }

    pub fn cause(&self) -> Option<&Value> {
        self.0.cause.as_ref()
    }
}

// ============================================================================
//  HTTP
// ============================================================================

/// Case-insensitive HTTP header list.
#[derive(Clone, Default)]
pub struct Headers(Arc<RwLock<Vec<(String, String)>>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: AsRef<str>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let headers = Self::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value);
        }
        headers
    }

    pub fn append(&self, name: &str, value: impl Into<String>) {
        write(&self.0).push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn set(&self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let mut list = write(&self.0);
        list.retain(|(n, _)| *n != name);
        list.push((name, value.into()));
    }

    /// All values for `name`, joined with `, `.
    pub fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let values: Vec<String> = read(&self.0).iter().filter(|(n, _)| *n == name).map(|(_, v)| v.clone()).collect();
        if values.is_empty() { None } else { Some(values.join(", ")) }
    }

    /// Iteration order of the fetch `Headers` class: sorted, combined.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut combined: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in read(&self.0).iter() {
            combined.entry(name.clone()).or_default().push(value.clone());
        }
        combined.into_iter().map(|(name, values)| (name, values.join(", "))).collect()
    }
}

struct RequestInner {
    method: String,
    url: String,
    headers: Headers,
    cf: Value,
    body: Option<ByteStream>,
}

/// A fetch `Request`.
#[derive(Clone)]
pub struct Request(Arc<RequestInner>);

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>, headers: Headers, cf: Value, body: Option<ByteStream>) -> Self {
        Self(Arc::new(RequestInner { method: method.into(), url: url.into(), headers, cf, body }))
    }

    pub fn method(&self) -> &str {
        &self.0.method
    }

    pub fn url(&self) -> &str {
        &self.0.url
    }

    pub fn headers(&self) -> &Headers {
        &self.0.headers
    }

    /// Platform metadata attached to the request.
    pub fn cf(&self) -> &Value {
        &self.0.cf
    }

    pub fn body(&self) -> Option<&ByteStream> {
        self.0.body.as_ref()
    }
}

struct ResponseInner {
    status: u16,
    status_text: String,
    headers: Headers,
    cf: Value,
    body: Option<ByteStream>,
}

/// A fetch `Response`.
#[derive(Clone)]
pub struct Response(Arc<ResponseInner>);

impl Response {
    pub fn new(status: u16, status_text: impl Into<String>, headers: Headers, cf: Value, body: Option<ByteStream>) -> Self {
        Self(Arc::new(ResponseInner { status, status_text: status_text.into(), headers, cf, body }))
    }

    pub fn status(&self) -> u16 {
        self.0.status
    }

    pub fn status_text(&self) -> &str {
        &self.0.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.0.headers
    }

    pub fn cf(&self) -> &Value {
        &self.0.cf
    }

    pub fn body(&self) -> Option<&ByteStream> {
        self.0.body.as_ref()
    }
}

// ============================================================================
//  STREAMS & BLOBS
// ============================================================================

/// Chunks of a pull-based byte stream.
pub type ChunkStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A single-consumer byte stream. Reading it drains it.
#[derive(Clone)]
pub struct ByteStream(Arc<Mutex<Option<ChunkStream>>>);

impl ByteStream {
    pub fn new(stream: impl Stream<Item = std::io::Result<Bytes>> + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(stream.boxed()))))
    }

    /// A stream yielding `bytes` as a single chunk.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::new(futures::stream::once(futures::future::ready(Ok(bytes))))
    }

    /// Takes the underlying stream, leaving this handle consumed.
    pub fn take(&self) -> Option<ChunkStream> {
        lock(&self.0).take()
    }

    pub fn is_consumed(&self) -> bool {
        lock(&self.0).is_none()
    }

    /// Drains the stream into one buffer.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        let mut stream = self.take().ok_or_else(|| Error::Stream("stream has already been consumed".into()))?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Stream(e.to_string()))?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Name and modification time of a `File`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub last_modified: f64,
}

struct BlobInner {
    data: Bytes,
    mime_type: String,
    file: Option<FileInfo>,
}

/// An immutable `Blob`, or a `File` when it carries `FileInfo`.
#[derive(Clone)]
pub struct Blob(Arc<BlobInner>);

impl Blob {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self(Arc::new(BlobInner { data: data.into(), mime_type: mime_type.into(), file: None }))
    }

    pub fn file(data: impl Into<Bytes>, mime_type: impl Into<String>, name: impl Into<String>, last_modified: f64) -> Self {
        let file = FileInfo { name: name.into(), last_modified };
        Self(Arc::new(BlobInner { data: data.into(), mime_type: mime_type.into(), file: Some(file) }))
    }

    pub fn data(&self) -> &Bytes {
        &self.0.data
    }

    pub fn size(&self) -> usize {
        self.0.data.len()
    }

    pub fn mime_type(&self) -> &str {
        &self.0.mime_type
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        self.0.file.as_ref()
    }
}

// ============================================================================
//  CALLABLES & HOST OBJECTS
// ============================================================================

/// Future returned by invoking a `Function`.
pub type CallFuture = BoxFuture<'static, Result<Value>>;

type Callable = dyn Fn(Value, Vec<Value>) -> CallFuture + Send + Sync;

struct FunctionInner {
    name: String,
    callable: Arc<Callable>,
    receiver: Value,
}

/// A callable value. The callable receives `(this, arguments)`.
///
/// Raising `Error::Thrown` from the callable is the equivalent of `throw`.
#[derive(Clone)]
pub struct Function(Arc<FunctionInner>);

impl Function {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        let callable: Arc<Callable> = Arc::new(move |this, args| Box::pin(f(this, args)) as CallFuture);
        Self(Arc::new(FunctionInner { name: name.into(), callable, receiver: Value::Undefined }))
    }

    /// A function whose body completes without suspending.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, move |this, args| futures::future::ready(f(this, args)))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn receiver(&self) -> &Value {
        &self.0.receiver
    }

    /// A new function sharing the body, with `this` fixed to `receiver`.
    pub fn bind(&self, receiver: Value) -> Function {
        Self(Arc::new(FunctionInner {
            name: self.0.name.clone(),
            callable: Arc::clone(&self.0.callable),
            receiver,
        }))
    }

    pub fn call(&self, args: Vec<Value>) -> CallFuture {
        (self.0.callable)(self.0.receiver.clone(), args)
    }
}

/// What reading a property of a capability produced.
pub enum Member {
    /// A method; bound to the capability when read.
    Method(Function),
    /// A plain property, taken as-is even when callable.
    Property(Value),
}

/// A live object that crosses the wire by handle.
///
/// Implementors are recognized by type: any `Value::Capability` is passed by
/// reference, whatever its name.
pub trait Capability: Send + Sync + 'static {
    /// Name used in diagnostics.
    fn type_name(&self) -> &str;

    /// Reads `property`. Unknown properties are `Member::Property(Value::Undefined)`.
    fn get(&self, property: &str) -> Result<Member>;

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a `Capability`.
#[derive(Clone)]
pub struct Stub(Arc<dyn Capability>);

impl Stub {
    pub fn new(capability: impl Capability) -> Self {
        Self(Arc::new(capability))
    }

    pub fn type_name(&self) -> &str {
        self.0.type_name()
    }

    pub fn get(&self, property: &str) -> Result<Member> {
        self.0.get(property)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

struct PlatformInner {
    class: String,
    internal: bool,
    fields: Object,
    methods: Vec<(String, Function)>,
    body: Option<ByteStream>,
}

/// A class instance provided by the host platform (an R2 object, a
/// checksum set, ...). Only instances flagged internal can be encoded.
#[derive(Clone)]
pub struct PlatformObject(Arc<PlatformInner>);

impl PlatformObject {
    pub fn builder(class: impl Into<String>) -> PlatformObjectBuilder {
        PlatformObjectBuilder {
            class: class.into(),
            internal: false,
            fields: Object::new(),
            methods: Vec::new(),
            body: None,
        }
    }

    pub fn class(&self) -> &str {
        &self.0.class
    }

    pub fn is_internal(&self) -> bool {
        self.0.internal
    }

    pub fn fields(&self) -> &Object {
        &self.0.fields
    }

    pub fn method(&self, name: &str) -> Option<Function> {
        self.0.methods.iter().find(|(n, _)| n == name).map(|(_, f)| f.clone())
    }

    pub fn methods(&self) -> &[(String, Function)] {
        &self.0.methods
    }

    pub fn body(&self) -> Option<&ByteStream> {
        self.0.body.as_ref()
    }
}

pub struct PlatformObjectBuilder {
    class: String,
    internal: bool,
    fields: Object,
    methods: Vec<(String, Function)>,
    body: Option<ByteStream>,
}

impl PlatformObjectBuilder {
    /// Marks the object as a platform-internal class.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn field(self, name: impl Into<String>, value: Value) -> Self {
        self.fields.set(name, value);
        self
    }

    pub fn method(mut self, name: impl Into<String>, function: Function) -> Self {
        self.methods.push((name.into(), function));
        self
    }

    pub fn body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }

    pub fn build(self) -> PlatformObject {
        PlatformObject(Arc::new(PlatformInner {
            class: self.class,
            internal: self.internal,
            fields: self.fields,
            methods: self.methods,
            body: self.body,
        }))
    }
}

/// A host value the codec knows nothing about.
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { type_name: std::any::type_name::<T>(), value: Arc::new(value) }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}
