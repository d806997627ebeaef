//! Tagged runtime values and the foreign-type callback registry.
//!
//! Every variant except [`Value::Foreign`] is deep-copied by ordinary Rust
//! `Clone`. Foreign values alias through a host-supplied callback instead,
//! so cloning, freeing, and comparing a [`Value`] always goes through the
//! [`ForeignOps`] registry rather than the standard `Clone`/`PartialEq`
//! traits — a foreign payload may be an opaque handle the host owns, and
//! only the host's registered callback for its declared type knows how to
//! duplicate, release, or compare it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::PrtError;

pub type EventIndex = u32;
pub type MachineDeclIndex = u32;
pub type StateIndex = u32;
pub type FunIndex = u32;
pub type ForeignTypeIndex = u32;

/// Structural type of a value, mirroring the variants of [`Value`].
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Bool,
    Int,
    Float,
    String,
    Machine,
    Event,
    Tuple(Vec<Type>),
    NamedTuple(Vec<(String, Type)>),
    Seq(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Foreign(ForeignTypeIndex),
    /// Unconstrained — used for the explicit null payload.
    Any,
}

/// Embeds the owning process' guid and the machine's 1-based index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MachineId {
    pub process_guid: uuid::Uuid,
    pub index: u32,
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.process_guid, self.index)
    }
}

/// A first-class reference to an event declaration.
#[derive(Clone, Debug)]
pub struct EventRef {
    pub decl_index: EventIndex,
    pub name: Arc<str>,
}

impl PartialEq for EventRef {
    fn eq(&self, other: &Self) -> bool {
        self.decl_index == other.decl_index
    }
}

/// Callback registry for foreign-typed values, looked up by declaration
/// index. [`crate::program::Program`] is the canonical implementor — each
/// [`crate::program::ForeignTypeDecl`] supplies the four callbacks below.
pub trait ForeignOps: Send + Sync {
    fn foreign_clone(&self, decl: ForeignTypeIndex, data: &dyn Any) -> Box<dyn Any + Send + Sync>;
    fn foreign_free(&self, decl: ForeignTypeIndex, data: Box<dyn Any + Send + Sync>);
    fn foreign_equals(&self, decl: ForeignTypeIndex, a: &dyn Any, b: &dyn Any) -> bool;
    fn foreign_default(&self, decl: ForeignTypeIndex) -> Box<dyn Any + Send + Sync>;
}

/// An opaque host-owned payload plus the declaration index used to resolve
/// its callbacks through [`ForeignOps`].
pub struct ForeignValue {
    pub decl_index: ForeignTypeIndex,
    pub data: Box<dyn Any + Send + Sync>,
}

impl fmt::Debug for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Foreign(#{})", self.decl_index)
    }
}

/// A tagged value on a machine's variable list, queue, or stack.
///
/// `Value` deliberately does not derive `Clone`: a foreign payload can
/// only be duplicated through its registered callback, so every clone
/// goes through [`Value::clone_value`] instead. Plain `==` (via the
/// [`PartialEq`] impl below) is provided for ergonomics and compares
/// foreign values shallowly by declaration index only; [`Value::equals`]
/// is the registry-aware comparison the dispatcher actually uses.
#[derive(Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Machine(MachineId),
    Event(EventRef),
    Tuple(Vec<Value>),
    NamedTuple(Vec<(String, Value)>),
    Seq(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Foreign(ForeignValue),
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Machine(a), Value::Machine(b)) => a == b,
            (Value::Event(a), Value::Event(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::NamedTuple(a), Value::NamedTuple(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.contains(x))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Value::Foreign(a), Value::Foreign(b)) => a.decl_index == b.decl_index,
            _ => false,
        }
    }
}

/// Selects a field of a tuple or named-tuple by position or by name.
pub enum FieldKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl Value {
    /// Default-constructs a value of the given declared type.
    pub fn make_default(ty: &Type, ops: &dyn ForeignOps) -> Value {
        match ty {
            Type::Bool => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Float => Value::Float(0.0),
            Type::String => Value::String(String::new()),
            Type::Machine => Value::Null,
            Type::Event => Value::Null,
            Type::Tuple(fields) => {
                Value::Tuple(fields.iter().map(|f| Value::make_default(f, ops)).collect())
            }
            Type::NamedTuple(fields) => Value::NamedTuple(
                fields
                    .iter()
                    .map(|(n, f)| (n.clone(), Value::make_default(f, ops)))
                    .collect(),
            ),
            Type::Seq(_) => Value::Seq(Vec::new()),
            Type::Set(_) => Value::Set(Vec::new()),
            Type::Map(_, _) => Value::Map(Vec::new()),
            Type::Foreign(decl) => Value::Foreign(ForeignValue {
                decl_index: *decl,
                data: ops.foreign_default(*decl),
            }),
            Type::Any => Value::Null,
        }
    }

    /// Packages the positional arguments of a multi-arg constructor or
    /// entry payload into a single tuple value, as `MkMachine`/`Send`
    /// variadic ingress does before handing the payload to a handler.
    pub fn make_tuple_from_array(values: Vec<Value>) -> Value {
        match values.len() {
            0 => Value::Null,
            1 => values.into_iter().next().unwrap(),
            _ => Value::Tuple(values),
        }
    }

    /// Deep-independent copy. Foreign values clone through the registered
    /// callback for their declared type.
    pub fn clone_value(&self, ops: &dyn ForeignOps) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Float(*f),
            Value::String(s) => Value::String(s.clone()),
            Value::Machine(m) => Value::Machine(m.clone()),
            Value::Event(e) => Value::Event(e.clone()),
            Value::Tuple(items) => {
                Value::Tuple(items.iter().map(|v| v.clone_value(ops)).collect())
            }
            Value::NamedTuple(fields) => Value::NamedTuple(
                fields
                    .iter()
                    .map(|(n, v)| (n.clone(), v.clone_value(ops)))
                    .collect(),
            ),
            Value::Seq(items) => Value::Seq(items.iter().map(|v| v.clone_value(ops)).collect()),
            Value::Set(items) => Value::Set(items.iter().map(|v| v.clone_value(ops)).collect()),
            Value::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone_value(ops), v.clone_value(ops)))
                    .collect(),
            ),
            Value::Foreign(fv) => Value::Foreign(ForeignValue {
                decl_index: fv.decl_index,
                data: ops.foreign_clone(fv.decl_index, fv.data.as_ref()),
            }),
        }
    }

    /// Recursively releases a value. A no-op for primitives; invokes the
    /// registered free callback for foreign payloads.
    pub fn free_value(self, ops: &dyn ForeignOps) {
        match self {
            Value::Tuple(items) | Value::Seq(items) | Value::Set(items) => {
                for v in items {
                    v.free_value(ops);
                }
            }
            Value::NamedTuple(fields) => {
                for (_, v) in fields {
                    v.free_value(ops);
                }
            }
            Value::Map(entries) => {
                for (k, v) in entries {
                    k.free_value(ops);
                    v.free_value(ops);
                }
            }
            Value::Foreign(fv) => ops.foreign_free(fv.decl_index, fv.data),
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::String(_)
            | Value::Machine(_)
            | Value::Event(_) => {}
        }
    }

    /// Structural equality. Comparing incompatible kinds is `false`, never
    /// an error. Foreign values compare through the registered callback.
    pub fn equals(&self, other: &Value, ops: &dyn ForeignOps) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Machine(a), Value::Machine(b)) => a == b,
            (Value::Event(a), Value::Event(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y, ops))
            }
            (Value::NamedTuple(a), Value::NamedTuple(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((an, av), (bn, bv))| an == bn && av.equals(bv, ops))
            }
            (Value::Seq(a), Value::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y, ops))
            }
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|x| b.iter().any(|y| x.equals(y, ops)))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(ak, av)| {
                        b.iter()
                            .any(|(bk, bv)| ak.equals(bk, ops) && av.equals(bv, ops))
                    })
            }
            (Value::Foreign(a), Value::Foreign(b)) => {
                a.decl_index == b.decl_index
                    && ops.foreign_equals(a.decl_index, a.data.as_ref(), b.data.as_ref())
            }
            _ => false,
        }
    }

    pub fn get_field(&self, key: FieldKey<'_>) -> Option<&Value> {
        match (self, key) {
            (Value::Tuple(items), FieldKey::Index(i)) => items.get(i),
            (Value::NamedTuple(fields), FieldKey::Index(i)) => fields.get(i).map(|(_, v)| v),
            (Value::NamedTuple(fields), FieldKey::Name(n)) => {
                fields.iter().find(|(fname, _)| fname == n).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn set_field(&mut self, key: FieldKey<'_>, value: Value) -> Result<(), PrtError> {
        match (self, key) {
            (Value::Tuple(items), FieldKey::Index(i)) => {
                let slot = items
                    .get_mut(i)
                    .ok_or_else(|| PrtError::BadIndex { what: format!("tuple field {i}") })?;
                *slot = value;
                Ok(())
            }
            (Value::NamedTuple(fields), FieldKey::Index(i)) => {
                let slot = fields
                    .get_mut(i)
                    .ok_or_else(|| PrtError::BadIndex { what: format!("named-tuple field {i}") })?;
                slot.1 = value;
                Ok(())
            }
            (Value::NamedTuple(fields), FieldKey::Name(n)) => {
                let slot = fields
                    .iter_mut()
                    .find(|(fname, _)| fname == n)
                    .ok_or_else(|| PrtError::BadIndex { what: format!("named-tuple field '{n}'") })?;
                slot.1 = value;
                Ok(())
            }
            _ => Err(PrtError::TypeMismatch {
                expected: "tuple or named-tuple".into(),
                found: "other".into(),
            }),
        }
    }

    pub fn size(&self) -> Option<usize> {
        match self {
            Value::Seq(items) | Value::Set(items) => Some(items.len()),
            Value::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }

    pub fn contains(&self, needle: &Value, ops: &dyn ForeignOps) -> bool {
        match self {
            Value::Seq(items) | Value::Set(items) => items.iter().any(|v| v.equals(needle, ops)),
            Value::Map(entries) => entries.iter().any(|(k, _)| k.equals(needle, ops)),
            _ => false,
        }
    }

    pub fn insert(&mut self, item: Value, ops: &dyn ForeignOps) -> Result<(), PrtError> {
        match self {
            Value::Seq(items) => {
                items.push(item);
                Ok(())
            }
            Value::Set(items) => {
                if !items.iter().any(|v| v.equals(&item, ops)) {
                    items.push(item);
                }
                Ok(())
            }
            _ => Err(PrtError::TypeMismatch {
                expected: "sequence or set".into(),
                found: "other".into(),
            }),
        }
    }

    pub fn insert_kv(&mut self, key: Value, val: Value, ops: &dyn ForeignOps) -> Result<(), PrtError> {
        match self {
            Value::Map(entries) => {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| k.equals(&key, ops)) {
                    slot.1 = val;
                } else {
                    entries.push((key, val));
                }
                Ok(())
            }
            _ => Err(PrtError::TypeMismatch {
                expected: "map".into(),
                found: "other".into(),
            }),
        }
    }

    pub fn remove(&mut self, item: &Value, ops: &dyn ForeignOps) -> bool {
        match self {
            Value::Seq(items) => {
                if let Some(pos) = items.iter().position(|v| v.equals(item, ops)) {
                    items.remove(pos);
                    true
                } else {
                    false
                }
            }
            Value::Set(items) => {
                if let Some(pos) = items.iter().position(|v| v.equals(item, ops)) {
                    items.remove(pos);
                    true
                } else {
                    false
                }
            }
            Value::Map(entries) => {
                if let Some(pos) = entries.iter().position(|(k, _)| k.equals(item, ops)) {
                    entries.remove(pos);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

/// Parameter-passing status for the variadic ingress APIs (`MkMachine`,
/// `Send`, handler call plumbing). `Swap` is reserved for in-language swap
/// statements and is illegal at these boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamStatus {
    Clone,
    Move,
    Swap,
}

/// One argument crossing an ingress API boundary.
pub struct Arg {
    pub status: ParamStatus,
    pub value: Value,
}

impl Arg {
    pub fn clone_of(value: Value) -> Self {
        Self { status: ParamStatus::Clone, value }
    }

    pub fn move_of(value: Value) -> Self {
        Self { status: ParamStatus::Move, value }
    }

    /// Resolves an argument's status into an owned [`Value`] ready to hand
    /// to a handler. `Clone` deep-copies through `ops`; `Move` takes the
    /// value as given; `Swap` is illegal at ingress and is reported.
    pub fn resolve(self, ops: &dyn ForeignOps) -> Result<Value, PrtError> {
        match self.status {
            ParamStatus::Clone => Ok(self.value.clone_value(ops)),
            ParamStatus::Move => Ok(self.value),
            ParamStatus::Swap => Err(PrtError::InternalInvariant {
                message: "SWAP parameter status is illegal at ingress APIs".into(),
            }),
        }
    }
}

/// Resolves a list of ingress arguments into a single payload value,
/// repackaging multiple arguments into a tuple the way entry/constructor
/// payloads are built from variadic call sites.
pub fn resolve_args(args: Vec<Arg>, ops: &dyn ForeignOps) -> Result<Value, PrtError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(arg.resolve(ops)?);
    }
    Ok(Value::make_tuple_from_array(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct NoForeign;
    impl ForeignOps for NoForeign {
        fn foreign_clone(&self, _: ForeignTypeIndex, _: &dyn Any) -> Box<dyn Any + Send + Sync> {
            unreachable!("scenario has no foreign values")
        }
        fn foreign_free(&self, _: ForeignTypeIndex, _: Box<dyn Any + Send + Sync>) {
            unreachable!("scenario has no foreign values")
        }
        fn foreign_equals(&self, _: ForeignTypeIndex, _: &dyn Any, _: &dyn Any) -> bool {
            unreachable!("scenario has no foreign values")
        }
        fn foreign_default(&self, _: ForeignTypeIndex) -> Box<dyn Any + Send + Sync> {
            unreachable!("scenario has no foreign values")
        }
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Tuple),
                proptest::collection::vec(inner, 0..4).prop_map(Value::Seq),
            ]
        })
    }

    proptest! {
        #[test]
        fn clone_round_trips_to_an_equal_but_independent_value(v in arb_value()) {
            let cloned = v.clone_value(&NoForeign);
            prop_assert!(v.equals(&cloned, &NoForeign));
        }

        #[test]
        fn equals_is_reflexive(v in arb_value()) {
            let other = v.clone_value(&NoForeign);
            prop_assert!(v.equals(&other, &NoForeign));
            prop_assert!(other.equals(&v, &NoForeign));
        }
    }

    #[test]
    fn incompatible_kinds_compare_unequal_not_erroring() {
        assert!(!Value::Int(1).equals(&Value::Bool(true), &NoForeign));
        assert!(!Value::Null.equals(&Value::Int(0), &NoForeign));
    }

    #[test]
    fn clone_of_a_tuple_is_deep() {
        let original = Value::Tuple(vec![Value::Int(1), Value::String("a".into())]);
        let mut cloned = original.clone_value(&NoForeign);
        if let Value::Tuple(items) = &mut cloned {
            items[0] = Value::Int(99);
        }
        assert!(original.equals(&Value::Tuple(vec![Value::Int(1), Value::String("a".into())]), &NoForeign));
    }

    #[test]
    fn make_default_matches_declared_type() {
        let ty = Type::NamedTuple(vec![("a".into(), Type::Int), ("b".into(), Type::Bool)]);
        let v = Value::make_default(&ty, &NoForeign);
        assert!(v.equals(
            &Value::NamedTuple(vec![("a".into(), Value::Int(0)), ("b".into(), Value::Bool(false))]),
            &NoForeign
        ));
    }

    #[test]
    fn set_and_get_field_by_name_and_index() {
        let mut v = Value::NamedTuple(vec![("x".into(), Value::Int(1))]);
        v.set_field(FieldKey::Name("x"), Value::Int(5)).unwrap();
        assert_eq!(v.get_field(FieldKey::Index(0)), Some(&Value::Int(5)));
        assert!(v.set_field(FieldKey::Name("missing"), Value::Int(0)).is_err());
    }

    #[test]
    fn seq_and_set_and_map_operations() {
        let mut seq = Value::Seq(vec![]);
        seq.insert(Value::Int(1), &NoForeign).unwrap();
        seq.insert(Value::Int(2), &NoForeign).unwrap();
        assert_eq!(seq.size(), Some(2));

        let mut set = Value::Set(vec![]);
        set.insert(Value::Int(1), &NoForeign).unwrap();
        set.insert(Value::Int(1), &NoForeign).unwrap();
        assert_eq!(set.size(), Some(1));

        let mut map = Value::Map(vec![]);
        map.insert_kv(Value::String("k".into()), Value::Int(1), &NoForeign).unwrap();
        map.insert_kv(Value::String("k".into()), Value::Int(2), &NoForeign).unwrap();
        assert_eq!(map.size(), Some(1));
        assert!(map.contains(&Value::String("k".into()), &NoForeign));
    }
}
