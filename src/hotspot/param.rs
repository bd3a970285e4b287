//! Call arguments and their normalized lookup keys.
//!
//! A call carries a heterogeneous argument list. Each traffic shaping
//! controller is bound to one position in that list; the value found there is
//! normalized into a [`ParamKey`] which controllers use as the counting key for
//! that parameter value.

use serde::{Serialize, Serializer};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use super::controller::TrafficShapingController;

/// Decimal digits kept when bucketing floating point arguments.
pub const FLOAT_PRECISION: usize = 5;

/// Type-erased value with equality and hashing of the concrete type.
trait OpaqueValue: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_any(&self, other: &dyn Any) -> bool;
    fn hash_any(&self, state: &mut dyn Hasher);
}

impl<T: Any + Send + Sync + Eq + Hash> OpaqueValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_any(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|other| other == self)
    }

    fn hash_any(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// A value of a type without dedicated normalization.
///
/// Opaque values compare and hash by value, so two calls passing equal
/// values count against the same parameter. Values of different types never
/// compare equal.
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    value: Arc<dyn OpaqueValue>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync + Eq + Hash>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Name of the wrapped type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        self.value.eq_any(other.value.as_any())
    }
}

impl Eq for Opaque {}

impl Hash for Opaque {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash_any(state);
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

/// A raw call argument as handed over by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// An absent argument
    Nil,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Isize(isize),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Usize(usize),
    F32(f32),
    F64(f64),
    Str(String),
    /// Any other type, passed through untouched
    Other(Opaque),
}

impl ParamValue {
    /// Wrap a value of an arbitrary type.
    pub fn opaque<T: Any + Send + Sync + Eq + Hash>(value: T) -> Self {
        ParamValue::Other(Opaque::new(value))
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(v: $ty) -> Self {
                    ParamValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_primitive!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    isize => Isize,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    usize => Usize,
    f32 => F32,
    f64 => F64,
    String => Str,
);

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParamValue::Nil, Into::into)
    }
}

impl From<ParamKey> for ParamValue {
    fn from(key: ParamKey) -> Self {
        match key {
            ParamKey::Bool(b) => ParamValue::Bool(b),
            ParamKey::Int(n) => ParamValue::I64(n),
            ParamKey::Float(n) => ParamValue::F64(n),
            ParamKey::Str(s) => ParamValue::Str(s),
            ParamKey::Opaque(o) => ParamValue::Other(o),
        }
    }
}

/// A normalized argument, used by controllers as a counting key.
#[derive(Debug, Clone)]
pub enum ParamKey {
    Bool(bool),
    /// Every integer width collapses into `i64`
    Int(i64),
    /// Quantized to [`FLOAT_PRECISION`] decimal digits
    Float(f64),
    Str(String),
    Opaque(Opaque),
}

impl ParamKey {
    /// Normalize a raw argument.
    ///
    /// Returns `None` for `Nil` and for floats whose quantized form cannot be
    /// read back. Normalization is idempotent: feeding a normalized key back
    /// through `ParamValue::from` yields an equal key.
    pub fn normalize(value: &ParamValue) -> Option<ParamKey> {
        let key = match value {
            ParamValue::Nil => return None,
            ParamValue::Bool(b) => ParamKey::Bool(*b),
            ParamValue::F32(n) => ParamKey::Float(quantize(f64::from(*n))?),
            ParamValue::F64(n) => ParamKey::Float(quantize(*n)?),
            ParamValue::I8(n) => ParamKey::Int(i64::from(*n)),
            ParamValue::I16(n) => ParamKey::Int(i64::from(*n)),
            ParamValue::I32(n) => ParamKey::Int(i64::from(*n)),
            ParamValue::I64(n) => ParamKey::Int(*n),
            ParamValue::Isize(n) => ParamKey::Int(*n as i64),
            ParamValue::U8(n) => ParamKey::Int(i64::from(*n)),
            ParamValue::U16(n) => ParamKey::Int(i64::from(*n)),
            ParamValue::U32(n) => ParamKey::Int(i64::from(*n)),
            // Values above i64::MAX wrap, matching a two's complement cast.
            ParamValue::U64(n) => ParamKey::Int(*n as i64),
            ParamValue::Usize(n) => ParamKey::Int(*n as i64),
            ParamValue::Str(s) => ParamKey::Str(s.clone()),
            ParamValue::Other(o) => ParamKey::Opaque(o.clone()),
        };
        Some(key)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ParamKey::Bool(_) => "bool",
            ParamKey::Int(_) => "int",
            ParamKey::Float(_) => "float",
            ParamKey::Str(_) => "string",
            ParamKey::Opaque(_) => "opaque",
        }
    }
}

impl PartialEq for ParamKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamKey::Bool(a), ParamKey::Bool(b)) => a == b,
            (ParamKey::Int(a), ParamKey::Int(b)) => a == b,
            (ParamKey::Float(a), ParamKey::Float(b)) => a.to_bits() == b.to_bits(),
            (ParamKey::Str(a), ParamKey::Str(b)) => a == b,
            (ParamKey::Opaque(a), ParamKey::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamKey {}

impl Hash for ParamKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ParamKey::Bool(b) => b.hash(state),
            ParamKey::Int(n) => n.hash(state),
            ParamKey::Float(n) => n.to_bits().hash(state),
            ParamKey::Str(s) => s.hash(state),
            ParamKey::Opaque(o) => o.hash(state),
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Bool(b) => write!(f, "{}", b),
            ParamKey::Int(n) => write!(f, "{}", n),
            ParamKey::Float(n) => write!(f, "{}", n),
            ParamKey::Str(s) => f.write_str(s),
            ParamKey::Opaque(o) => write!(f, "<{}>", o.type_name()),
        }
    }
}

impl Serialize for ParamKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamKey::Bool(b) => serializer.serialize_bool(*b),
            ParamKey::Int(n) => serializer.serialize_i64(*n),
            ParamKey::Float(n) => serializer.serialize_f64(*n),
            ParamKey::Str(s) => serializer.serialize_str(s),
            ParamKey::Opaque(o) => serializer.serialize_str(&format!("<{}>", o.type_name())),
        }
    }
}

/// Bucket a float to [`FLOAT_PRECISION`] decimal digits.
///
/// Distinct but close values intentionally map to the same key. Both zeros
/// collapse to `+0.0` so that key equality follows numeric equality.
pub fn quantize(n: f64) -> Option<f64> {
    let q: f64 = format!("{:.*}", FLOAT_PRECISION, n).parse().ok()?;
    Some(if q == 0.0 { 0.0 } else { q })
}

/// Turn a possibly tail-relative bound index into a position in a list of
/// `len` arguments.
///
/// A negative index is adjusted exactly once by adding `len`; anything still
/// outside `[0, len)` has no position.
pub fn resolve_index(bound: isize, len: usize) -> Option<usize> {
    let idx = if bound < 0 { len as isize + bound } else { bound };
    if idx < 0 || idx as usize >= len {
        return None;
    }
    Some(idx as usize)
}

/// Pick the argument a controller is bound to and normalize it.
///
/// Returns `None` whenever the controller does not apply to this argument
/// list: index out of range, absent argument, or an unreadable float.
pub fn match_arg(
    controller: &dyn TrafficShapingController,
    args: &[ParamValue],
) -> Option<ParamKey> {
    let bound = controller.bound_param_index();
    let Some(idx) = resolve_index(bound, args.len()) else {
        debug!(
            args = ?args,
            param_index = bound,
            "No argument at the bound param index of hotspot controller"
        );
        return None;
    };

    let key = ParamKey::normalize(&args[idx]);
    if key.is_none() {
        debug!(args = ?args, param_index = bound, "Bound argument is absent or unusable");
    }
    key
}
