//! Dynamic values that cross the host boundary.
//!
//! A [`Variant`] is the bridge's rendition of the host's dynamic value type:
//! a tagged sum over null, bool, int32, double, int64, string, array,
//! dictionary, and array buffer, plus `Undefined` (which doubles as the
//! worker shutdown sentinel). Heap-backed variants are reference counted
//! through `Arc`; cloning a `Variant` takes a reference and dropping one
//! releases it, and the count is atomic so values may cross the queue
//! between the host thread and the worker.
//!
//! Arrays, dictionaries, and array buffers are shared mutable containers:
//! two clones of the same array observe each other's writes, which is what
//! the builtin array/dict commands rely on.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Shared, growable array of variants.
#[derive(Clone, Default)]
pub struct VarArray(Arc<Mutex<Vec<Variant>>>);

/// Shared string-keyed dictionary of variants.
#[derive(Clone, Default)]
pub struct VarDict(Arc<Mutex<FxHashMap<String, Variant>>>);

/// Shared byte buffer with a mappable backing store.
#[derive(Clone)]
pub struct VarBuffer(Arc<Mutex<Vec<u8>>>);

/// Dynamic, refcounted tagged value.
#[derive(Clone, Default)]
pub enum Variant {
    /// No value; also the worker shutdown sentinel
    #[default]
    Undefined,
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit float
    Double(f64),
    /// 64-bit signed integer; serialized as `["long", lo, hi]`
    Int64(i64),
    /// Immutable UTF-8 string
    String(Arc<str>),
    /// Shared array
    Array(VarArray),
    /// Shared dictionary
    Dictionary(VarDict),
    /// Shared byte buffer; serialized as `["ArrayBuffer", base64]`
    ArrayBuffer(VarBuffer),
}

impl VarArray {
    /// Create an empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Element at `index`, or `Undefined` when out of range.
    pub fn get(&self, index: usize) -> Variant {
        self.0.lock().get(index).cloned().unwrap_or(Variant::Undefined)
    }

    /// Store `value` at `index`, extending the array with `Undefined`
    /// padding when `index` is past the end.
    pub fn set(&self, index: usize, value: Variant) {
        let mut vec = self.0.lock();
        if index >= vec.len() {
            vec.resize_with(index + 1, || Variant::Undefined);
        }
        vec[index] = value;
    }

    /// Append `value`.
    pub fn push(&self, value: Variant) {
        self.0.lock().push(value);
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// True when the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Truncate or pad (with `Undefined`) to exactly `len` elements.
    pub fn set_len(&self, len: usize) {
        self.0.lock().resize_with(len, || Variant::Undefined);
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Variant> {
        self.0.lock().clone()
    }

    /// Identity comparison (same backing store).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references to the backing store.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for VarArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarArray(len={})", self.len())
    }
}

impl FromIterator<Variant> for VarArray {
    fn from_iter<T: IntoIterator<Item = Variant>>(iter: T) -> Self {
        Self(Arc::new(Mutex::new(iter.into_iter().collect())))
    }
}

impl VarDict {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, or `Undefined` when absent.
    pub fn get(&self, key: &str) -> Variant {
        self.0.lock().get(key).cloned().unwrap_or(Variant::Undefined)
    }

    /// Insert or overwrite `key`.
    pub fn set(&self, key: &str, value: Variant) {
        self.0.lock().insert(key.to_owned(), value);
    }

    /// Remove `key`. Returns false when the key was absent.
    pub fn delete(&self, key: &str) -> bool {
        self.0.lock().remove(key).is_some()
    }

    /// True when `key` is present.
    pub fn has_key(&self, key: &str) -> bool {
        self.0.lock().contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// True when the dictionary holds no entries.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Vec<(String, Variant)> {
        self.0
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Identity comparison (same backing store).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references to the backing store.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for VarDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarDict(len={})", self.len())
    }
}

impl fmt::Debug for VarBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarBuffer(len={})", self.byte_length())
    }
}

impl VarBuffer {
    /// Create a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![0; len])))
    }

    /// Create a buffer holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Arc::new(Mutex::new(bytes.to_vec())))
    }

    /// Length in bytes.
    pub fn byte_length(&self) -> usize {
        self.0.lock().len()
    }

    /// Raw pointer to the backing storage.
    ///
    /// The pointer stays valid until the buffer is resized or the last
    /// reference is dropped. The caller must not hold it across either.
    pub fn map(&self) -> *mut u8 {
        self.0.lock().as_mut_ptr()
    }

    /// Release a mapping obtained with [`VarBuffer::map`].
    ///
    /// The backing store is plain memory, so this is bookkeeping only.
    pub fn unmap(&self) {}

    /// Run `f` over the buffer contents under the lock.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Identity comparison (same backing store).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references to the backing store.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Variant {
    /// Build a string variant from UTF-8 text.
    pub fn from_utf8(text: &str) -> Self {
        Variant::String(Arc::from(text))
    }

    /// Tag name, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Undefined => "undefined",
            Variant::Null => "null",
            Variant::Bool(_) => "bool",
            Variant::Int32(_) => "int32",
            Variant::Double(_) => "double",
            Variant::Int64(_) => "int64",
            Variant::String(_) => "string",
            Variant::Array(_) => "array",
            Variant::Dictionary(_) => "dictionary",
            Variant::ArrayBuffer(_) => "arraybuffer",
        }
    }

    /// True for `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Variant::Undefined)
    }

    /// Boolean payload, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Int32 payload, if this is an int32.
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Variant::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Double payload, if this is a double.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Variant::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Read this variant as a 64-bit integer.
    ///
    /// Accepts an inline `Int64`, a plain `Int32` (widened), or the decoded
    /// wire form `["long", lo, hi]`, which is what a callback reply carries
    /// after generic JSON decoding.
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Variant::Int64(i) => Some(*i),
            Variant::Int32(i) => Some(*i as i64),
            Variant::Array(arr) => {
                let items = arr.to_vec();
                match items.as_slice() {
                    [Variant::String(tag), lo, hi] if &**tag == "long" => {
                        let lo = lo.as_int32()?;
                        let hi = hi.as_int32()?;
                        Some(((hi as i64) << 32) | (lo as u32 as i64))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// String payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array payload, if this is an array.
    pub fn as_array(&self) -> Option<&VarArray> {
        match self {
            Variant::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Dictionary payload, if this is a dictionary.
    pub fn as_dictionary(&self) -> Option<&VarDict> {
        match self {
            Variant::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Buffer payload, if this is an array buffer.
    pub fn as_array_buffer(&self) -> Option<&VarBuffer> {
        match self {
            Variant::ArrayBuffer(b) => Some(b),
            _ => None,
        }
    }

    /// Identity comparison: true when both variants are the same scalar or
    /// share the same backing store.
    pub fn ptr_eq(&self, other: &Variant) -> bool {
        match (self, other) {
            (Variant::String(a), Variant::String(b)) => Arc::ptr_eq(a, b),
            (Variant::Array(a), Variant::Array(b)) => a.ptr_eq(b),
            (Variant::Dictionary(a), Variant::Dictionary(b)) => a.ptr_eq(b),
            (Variant::ArrayBuffer(a), Variant::ArrayBuffer(b)) => a.ptr_eq(b),
            _ => self == other,
        }
    }

    /// Number of live references to the backing store, for heap-backed
    /// variants. Scalars have no refcount.
    pub fn ref_count(&self) -> Option<usize> {
        match self {
            Variant::String(s) => Some(Arc::strong_count(s)),
            Variant::Array(a) => Some(a.ref_count()),
            Variant::Dictionary(d) => Some(d.ref_count()),
            Variant::ArrayBuffer(b) => Some(b.ref_count()),
            _ => None,
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Undefined, Variant::Undefined) => true,
            (Variant::Null, Variant::Null) => true,
            (Variant::Bool(a), Variant::Bool(b)) => a == b,
            (Variant::Int32(a), Variant::Int32(b)) => a == b,
            (Variant::Double(a), Variant::Double(b)) => a == b,
            (Variant::Int64(a), Variant::Int64(b)) => a == b,
            (Variant::String(a), Variant::String(b)) => a == b,
            (Variant::Array(a), Variant::Array(b)) => {
                a.ptr_eq(b) || a.to_vec() == b.to_vec()
            }
            (Variant::Dictionary(a), Variant::Dictionary(b)) => {
                a.ptr_eq(b) || {
                    let mut lhs = a.entries();
                    let mut rhs = b.entries();
                    lhs.sort_by(|x, y| x.0.cmp(&y.0));
                    rhs.sort_by(|x, y| x.0.cmp(&y.0));
                    lhs == rhs
                }
            }
            (Variant::ArrayBuffer(a), Variant::ArrayBuffer(b)) => {
                a.ptr_eq(b) || a.with_bytes(|x| b.with_bytes(|y| x == y))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Undefined => write!(f, "undefined"),
            Variant::Null => write!(f, "null"),
            Variant::Bool(b) => write!(f, "bool({})", b),
            Variant::Int32(i) => write!(f, "int32({})", i),
            Variant::Double(d) => write!(f, "double({})", d),
            Variant::Int64(i) => write!(f, "int64({})", i),
            Variant::String(s) => write!(f, "string({:?})", s),
            Variant::Array(a) => write!(f, "array(len={})", a.len()),
            Variant::Dictionary(d) => write!(f, "dictionary(len={})", d.len()),
            Variant::ArrayBuffer(b) => write!(f, "arraybuffer(len={})", b.byte_length()),
        }
    }
}
