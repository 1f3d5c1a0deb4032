//! An in-memory [`Runtime`] for tests and offline replay.
//!
//! [`SandboxRuntime`] models a heap of objects addressed by [`ObjRef`]. It
//! implements every embedding operation an action log can contain, with
//! deliberately small semantics: properties live in an ordered map, arrays
//! and buffers hold their elements inline, and functions follow a
//! [`Behaviour`] chosen when they are created.
//!
//! Loaded scripts select their behaviour from the first line of the source:
//!
//! | first line        | behaviour                                  |
//! |-------------------|--------------------------------------------|
//! | `throw <message>` | raise `<message>` as a script exception    |
//! | `terminate`       | raise a terminating exception              |
//! | `new object`      | return a fresh object                      |
//! | `echo`            | return the first argument                  |
//! | `typed array <n>` | return a typed array over `n` zero bytes   |
//! | anything else     | return null                                |
//!
//! Host-created functions echo their first argument.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use ttlog_core::{ContextTag, DocumentId, PropertyId, Value};

use crate::action::CodeLoad;
use crate::runtime::{CallOutcome, Runtime, RuntimeFault, StatementPosition, Thrown};

/// Property holding the value of a property descriptor object.
pub const DESCRIPTOR_VALUE: PropertyId = PropertyId(0);

/// Largest array the sandbox will allocate.
pub const MAX_ARRAY_LENGTH: u32 = 1 << 20;

/// Handle of a sandbox heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjRef(pub u32);

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a sandbox function does when called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behaviour {
    Nothing,
    Echo,
    NewObject,
    TypedArray(u32),
    Throw(String),
    Terminate,
}

impl Behaviour {
    /// Selects a behaviour from the first line of a script.
    pub fn parse(source: &str) -> Behaviour {
        let first = source.lines().next().unwrap_or("").trim();
        if let Some(message) = first.strip_prefix("throw ") {
            return Behaviour::Throw(message.trim().to_string());
        }
        if let Some(n) = first.strip_prefix("typed array ") {
            if let Ok(n) = n.trim().parse() {
                return Behaviour::TypedArray(n);
            }
        }
        match first {
            "terminate" => Behaviour::Terminate,
            "new object" => Behaviour::NewObject,
            "echo" => Behaviour::Echo,
            _ => Behaviour::Nothing,
        }
    }
}

/// Shape of a heap object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Plain { regular: bool },
    /// A primitive boxed by a to-object conversion.
    Wrapper(Value<ObjRef>),
    Symbol(String),
    Array(Vec<Value<ObjRef>>),
    ArrayBuffer(Vec<u8>),
    TypedArray { buffer: ObjRef },
    Function {
        name: Option<String>,
        behaviour: Behaviour,
        source: Option<DocumentId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    pub kind: ObjectKind,
    pub properties: IndexMap<PropertyId, Value<ObjRef>>,
    pub prototype: Option<ObjRef>,
}

impl HeapObject {
    fn new(kind: ObjectKind) -> Self {
        HeapObject {
            kind,
            properties: IndexMap::new(),
            prototype: None,
        }
    }
}

/// Full sandbox state captured for checkpoints.
#[derive(Debug, Clone)]
pub struct SandboxSnapshot {
    heap: Vec<HeapObject>,
    calls: u64,
    last_statement: Option<StatementPosition>,
}

/// In-memory runtime.
#[derive(Debug, Clone, Default)]
pub struct SandboxRuntime {
    heap: Vec<HeapObject>,
    /// Known contexts; `None` accepts any.
    contexts: Option<BTreeSet<ContextTag>>,
    current: Option<ContextTag>,
    calls: u64,
    last_statement: Option<StatementPosition>,
}

impl SandboxRuntime {
    /// A sandbox that accepts every context tag.
    pub fn new() -> Self {
        Self::default()
    }

    /// A sandbox that only knows the given contexts.
    pub fn with_contexts(contexts: impl IntoIterator<Item = ContextTag>) -> Self {
        SandboxRuntime {
            contexts: Some(contexts.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn current_context(&self) -> Option<ContextTag> {
        self.current
    }

    /// Number of calls executed so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn heap(&self) -> &[HeapObject] {
        &self.heap
    }

    pub fn object(&self, handle: &ObjRef) -> Option<&HeapObject> {
        self.heap.get(handle.0 as usize)
    }

    /// An own property of `handle`.
    pub fn property(&self, handle: &ObjRef, property: PropertyId) -> Option<&Value<ObjRef>> {
        self.object(handle)?.properties.get(&property)
    }

    /// Allocates a typed array over `length` zero bytes.
    pub fn create_typed_array(&mut self, length: u32) -> Result<ObjRef, RuntimeFault> {
        if length > MAX_ARRAY_LENGTH {
            return Err(RuntimeFault::new(format!(
                "typed array length {length} exceeds {MAX_ARRAY_LENGTH}"
            )));
        }
        let buffer = self.alloc(ObjectKind::ArrayBuffer(vec![0; length as usize]));
        Ok(self.alloc(ObjectKind::TypedArray { buffer }))
    }

    fn alloc(&mut self, kind: ObjectKind) -> ObjRef {
        let handle = ObjRef(self.heap.len() as u32);
        self.heap.push(HeapObject::new(kind));
        handle
    }

    fn get(&self, handle: &ObjRef) -> Result<&HeapObject, RuntimeFault> {
        self.object(handle)
            .ok_or_else(|| RuntimeFault::new(format!("dangling handle {handle}")))
    }

    fn get_mut(&mut self, handle: &ObjRef) -> Result<&mut HeapObject, RuntimeFault> {
        self.heap
            .get_mut(handle.0 as usize)
            .ok_or_else(|| RuntimeFault::new(format!("dangling handle {handle}")))
    }

    /// Walks the prototype chain. Chains never exceed the heap size.
    fn lookup(&self, handle: &ObjRef, property: PropertyId) -> Result<Value<ObjRef>, RuntimeFault> {
        let mut current = Some(*handle);
        for _ in 0..=self.heap.len() {
            let Some(h) = current else { break };
            let object = self.get(&h)?;
            if let Some(value) = object.properties.get(&property) {
                return Ok(value.clone());
            }
            current = object.prototype;
        }
        Ok(Value::Null)
    }

    fn function(&self, handle: &ObjRef) -> Option<(Behaviour, Option<DocumentId>)> {
        match &self.object(handle)?.kind {
            ObjectKind::Function {
                behaviour, source, ..
            } => Some((behaviour.clone(), *source)),
            _ => None,
        }
    }

    fn invoke(&mut self, behaviour: Behaviour, args: &[Value<ObjRef>]) -> CallOutcome<ObjRef> {
        match behaviour {
            Behaviour::Nothing => Ok(Value::Null),
            Behaviour::Echo => Ok(args.first().cloned().unwrap_or(Value::Null)),
            Behaviour::NewObject => Ok(Value::Object(self.alloc(ObjectKind::Plain { regular: true }))),
            Behaviour::TypedArray(n) => match self.create_typed_array(n) {
                Ok(array) => Ok(Value::Object(array)),
                Err(fault) => Err(thrown(&fault.message)),
            },
            Behaviour::Throw(message) => Err(Thrown {
                value: Value::Str(message),
                terminating: false,
            }),
            Behaviour::Terminate => Err(Thrown {
                value: Value::Null,
                terminating: true,
            }),
        }
    }
}

fn thrown(message: &str) -> Thrown<ObjRef> {
    Thrown {
        value: Value::Str(message.to_string()),
        terminating: false,
    }
}

fn as_index(index: &Value<ObjRef>) -> Result<u32, RuntimeFault> {
    let n = match index {
        Value::I32(v) => i64::from(*v),
        Value::U32(v) => i64::from(*v),
        Value::I64(v) => *v,
        Value::U64(v) => i64::try_from(*v).unwrap_or(i64::MAX),
        Value::F64(v) if v.fract() == 0.0 => *v as i64,
        other => {
            return Err(RuntimeFault::new(format!(
                "{} is not a valid index",
                other.type_name()
            )))
        }
    };
    u32::try_from(n).map_err(|_| RuntimeFault::new(format!("index {n} out of range")))
}

fn as_byte(value: &Value<ObjRef>) -> u8 {
    match value {
        Value::I32(v) => *v as u8,
        Value::U32(v) => *v as u8,
        Value::I64(v) => *v as u8,
        Value::U64(v) => *v as u8,
        Value::F64(v) => *v as u8,
        Value::Bool(b) => u8::from(*b),
        _ => 0,
    }
}

impl Runtime for SandboxRuntime {
    type Handle = ObjRef;
    type Snapshot = SandboxSnapshot;

    fn enter_context(&mut self, ctx: ContextTag) -> Result<(), RuntimeFault> {
        if let Some(known) = &self.contexts {
            if !known.contains(&ctx) {
                return Err(RuntimeFault::new(format!("no context {ctx}")));
            }
        }
        self.current = Some(ctx);
        Ok(())
    }

    fn to_object(&mut self, value: &Value<ObjRef>) -> Result<Value<ObjRef>, RuntimeFault> {
        match value {
            Value::Object(h) => {
                self.get(h)?;
                Ok(Value::Object(*h))
            }
            Value::Null => Err(RuntimeFault::new("cannot convert null to an object")),
            primitive => Ok(Value::Object(
                self.alloc(ObjectKind::Wrapper(primitive.clone())),
            )),
        }
    }

    fn create_symbol(&mut self, description: &Value<ObjRef>) -> Result<Value<ObjRef>, RuntimeFault> {
        let description = match description {
            Value::Str(s) => s.clone(),
            Value::Null => String::new(),
            other => return Err(RuntimeFault::new(format!(
                "symbol description must be a string, found {}",
                other.type_name()
            ))),
        };
        Ok(Value::Object(self.alloc(ObjectKind::Symbol(description))))
    }

    fn create_object(&mut self, regular: bool) -> Result<ObjRef, RuntimeFault> {
        Ok(self.alloc(ObjectKind::Plain { regular }))
    }

    fn create_array(&mut self, length: u32) -> Result<ObjRef, RuntimeFault> {
        if length > MAX_ARRAY_LENGTH {
            return Err(RuntimeFault::new(format!(
                "array length {length} exceeds {MAX_ARRAY_LENGTH}"
            )));
        }
        Ok(self.alloc(ObjectKind::Array(vec![Value::Null; length as usize])))
    }

    fn create_array_buffer(&mut self, bytes: &[u8]) -> Result<ObjRef, RuntimeFault> {
        Ok(self.alloc(ObjectKind::ArrayBuffer(bytes.to_vec())))
    }

    fn create_function(&mut self, name: Option<&Value<ObjRef>>) -> Result<ObjRef, RuntimeFault> {
        let name = match name {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        };
        Ok(self.alloc(ObjectKind::Function {
            name,
            behaviour: Behaviour::Echo,
            source: None,
        }))
    }

    fn get_property(&mut self, object: &ObjRef, property: PropertyId) -> Result<Value<ObjRef>, RuntimeFault> {
        self.lookup(object, property)
    }

    fn get_index(&mut self, object: &ObjRef, index: &Value<ObjRef>) -> Result<Value<ObjRef>, RuntimeFault> {
        let i = as_index(index)?;
        match &self.get(object)?.kind {
            ObjectKind::Array(items) => Ok(items.get(i as usize).cloned().unwrap_or(Value::Null)),
            ObjectKind::ArrayBuffer(bytes) => Ok(bytes
                .get(i as usize)
                .map_or(Value::Null, |b| Value::U32(u32::from(*b)))),
            _ => self.lookup(object, PropertyId(i)),
        }
    }

    fn get_own_property_descriptor(
        &mut self,
        object: &ObjRef,
        property: PropertyId,
    ) -> Result<Value<ObjRef>, RuntimeFault> {
        let Some(value) = self.get(object)?.properties.get(&property).cloned() else {
            return Ok(Value::Null);
        };
        let descriptor = self.alloc(ObjectKind::Plain { regular: true });
        self.get_mut(&descriptor)?
            .properties
            .insert(DESCRIPTOR_VALUE, value);
        Ok(Value::Object(descriptor))
    }

    fn get_own_property_keys(&mut self, object: &ObjRef, names: bool) -> Result<ObjRef, RuntimeFault> {
        let keys = if names {
            self.get(object)?
                .properties
                .keys()
                .map(|p| Value::U32(p.0))
                .collect()
        } else {
            self.get(object)?;
            Vec::new()
        };
        Ok(self.alloc(ObjectKind::Array(keys)))
    }

    fn define_property(
        &mut self,
        object: &ObjRef,
        property: PropertyId,
        descriptor: &Value<ObjRef>,
    ) -> Result<bool, RuntimeFault> {
        let Value::Object(d) = descriptor else {
            return Ok(false);
        };
        let value = self.property(d, DESCRIPTOR_VALUE).cloned().unwrap_or(Value::Null);
        self.get_mut(object)?.properties.insert(property, value);
        Ok(true)
    }

    fn delete_property(
        &mut self,
        object: &ObjRef,
        property: PropertyId,
        _strict: bool,
    ) -> Result<Value<ObjRef>, RuntimeFault> {
        let removed = self.get_mut(object)?.properties.shift_remove(&property);
        Ok(Value::Bool(removed.is_some()))
    }

    fn set_prototype(&mut self, object: &ObjRef, prototype: &Value<ObjRef>) -> Result<(), RuntimeFault> {
        let prototype = match prototype {
            Value::Null => None,
            Value::Object(p) => {
                let mut current = Some(*p);
                for _ in 0..=self.heap.len() {
                    let Some(h) = current else { break };
                    if h == *object {
                        return Err(RuntimeFault::new(format!("prototype cycle through {object}")));
                    }
                    current = self.get(&h)?.prototype;
                }
                Some(*p)
            }
            other => {
                return Err(RuntimeFault::new(format!(
                    "prototype must be an object or null, found {}",
                    other.type_name()
                )))
            }
        };
        self.get_mut(object)?.prototype = prototype;
        Ok(())
    }

    fn set_property(
        &mut self,
        object: &ObjRef,
        property: PropertyId,
        value: &Value<ObjRef>,
        _strict: bool,
    ) -> Result<(), RuntimeFault> {
        self.get_mut(object)?.properties.insert(property, value.clone());
        Ok(())
    }

    fn set_index(
        &mut self,
        object: &ObjRef,
        index: &Value<ObjRef>,
        value: &Value<ObjRef>,
    ) -> Result<(), RuntimeFault> {
        let i = as_index(index)?;
        let target = self.get_mut(object)?;
        match &mut target.kind {
            ObjectKind::Array(items) => {
                if i >= MAX_ARRAY_LENGTH {
                    return Err(RuntimeFault::new(format!("index {i} exceeds {MAX_ARRAY_LENGTH}")));
                }
                let i = i as usize;
                if i >= items.len() {
                    items.resize(i + 1, Value::Null);
                }
                items[i] = value.clone();
            }
            ObjectKind::ArrayBuffer(bytes) => {
                let slot = bytes
                    .get_mut(i as usize)
                    .ok_or_else(|| RuntimeFault::new(format!("index {i} outside buffer")))?;
                *slot = as_byte(value);
            }
            _ => {
                target.properties.insert(PropertyId(i), value.clone());
            }
        }
        Ok(())
    }

    fn typed_array_buffer(&mut self, object: &ObjRef) -> Result<ObjRef, RuntimeFault> {
        match &self.get(object)?.kind {
            ObjectKind::TypedArray { buffer } => Ok(*buffer),
            _ => Err(RuntimeFault::new(format!("{object} is not a typed array"))),
        }
    }

    fn construct(&mut self, function: &ObjRef, args: &[Value<ObjRef>]) -> CallOutcome<ObjRef> {
        let Some((behaviour, _)) = self.function(function) else {
            return Err(thrown("not a constructor"));
        };
        match behaviour {
            Behaviour::Throw(_) | Behaviour::Terminate => self.invoke(behaviour, args),
            _ => {
                let object = self.alloc(ObjectKind::Plain { regular: true });
                if let Some(target) = self.heap.get_mut(object.0 as usize) {
                    for (i, arg) in args.iter().enumerate() {
                        target.properties.insert(PropertyId(i as u32), arg.clone());
                    }
                    target.prototype = Some(*function);
                }
                Ok(Value::Object(object))
            }
        }
    }

    fn call(&mut self, function: &ObjRef, args: &[Value<ObjRef>]) -> CallOutcome<ObjRef> {
        let Some((behaviour, source)) = self.function(function) else {
            return Err(thrown("not a function"));
        };
        self.calls += 1;
        self.last_statement = Some(StatementPosition {
            function_time: self.calls,
            loop_time: 0,
            line: 1,
            column: 0,
            source_id: source.map_or(0, |d| d.0 as u32),
        });
        self.invoke(behaviour, args)
    }

    fn load_script(&mut self, script: &CodeLoad) -> Result<ObjRef, RuntimeFault> {
        Ok(self.alloc(ObjectKind::Function {
            name: Some(script.uri.clone()),
            behaviour: Behaviour::parse(&script.source),
            source: Some(script.document_id),
        }))
    }

    fn last_executed_statement(&self) -> Option<StatementPosition> {
        self.last_statement
    }

    fn capture(&self) -> Option<SandboxSnapshot> {
        Some(SandboxSnapshot {
            heap: self.heap.clone(),
            calls: self.calls,
            last_statement: self.last_statement,
        })
    }

    fn restore(&mut self, snapshot: &SandboxSnapshot) -> Result<(), RuntimeFault> {
        self.heap = snapshot.heap.clone();
        self.calls = snapshot.calls;
        self.last_statement = snapshot.last_statement;
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttlog_core::BodyCounterId;

    #[test]
    fn behaviour_from_first_line() {
        assert_eq!(Behaviour::parse("throw boom\nrest"), Behaviour::Throw("boom".into()));
        assert_eq!(Behaviour::parse("terminate"), Behaviour::Terminate);
        assert_eq!(Behaviour::parse("typed array 8"), Behaviour::TypedArray(8));
        assert_eq!(Behaviour::parse("typed array x"), Behaviour::Nothing);
        assert_eq!(Behaviour::parse(""), Behaviour::Nothing);
    }

    #[test]
    fn unknown_context_is_rejected() {
        let mut rt = SandboxRuntime::with_contexts([ContextTag(1)]);
        assert!(rt.enter_context(ContextTag(1)).is_ok());
        assert!(rt.enter_context(ContextTag(2)).is_err());
        assert_eq!(rt.current_context(), Some(ContextTag(1)));
    }

    #[test]
    fn properties_follow_prototypes() {
        let mut rt = SandboxRuntime::new();
        let proto = rt.create_object(true).unwrap();
        let obj = rt.create_object(true).unwrap();
        rt.set_property(&proto, PropertyId(3), &Value::I32(9), false).unwrap();
        rt.set_prototype(&obj, &Value::Object(proto)).unwrap();
        assert_eq!(rt.get_property(&obj, PropertyId(3)).unwrap(), Value::I32(9));
        assert!(rt.set_prototype(&proto, &Value::Object(obj)).is_err());
    }

    #[test]
    fn descriptors_round_trip_through_define() {
        let mut rt = SandboxRuntime::new();
        let a = rt.create_object(true).unwrap();
        let b = rt.create_object(true).unwrap();
        assert_eq!(rt.get_own_property_descriptor(&a, PropertyId(1)).unwrap(), Value::Null);
        rt.set_property(&a, PropertyId(1), &Value::Str("x".into()), false).unwrap();
        let desc = rt.get_own_property_descriptor(&a, PropertyId(1)).unwrap();
        assert!(rt.define_property(&b, PropertyId(5), &desc).unwrap());
        assert_eq!(rt.property(&b, PropertyId(5)), Some(&Value::Str("x".into())));
    }

    #[test]
    fn arrays_are_bounded() {
        let mut rt = SandboxRuntime::new();
        assert!(rt.create_array(MAX_ARRAY_LENGTH + 1).is_err());
        let arr = rt.create_array(2).unwrap();
        rt.set_index(&arr, &Value::I32(4), &Value::Bool(true)).unwrap();
        assert_eq!(rt.get_index(&arr, &Value::U32(4)).unwrap(), Value::Bool(true));
        assert!(rt.get_index(&arr, &Value::I32(-1)).is_err());
    }

    #[test]
    fn oversized_typed_array_throws() {
        let mut rt = SandboxRuntime::new();
        let load = CodeLoad {
            document_id: DocumentId(1),
            load_flags: 0,
            body_counter_id: BodyCounterId(1),
            source_dir: String::new(),
            source_file: "big.js".to_string(),
            uri: "big.js".to_string(),
            source: "typed array 4294967295".into(),
        };
        let f = rt.load_script(&load).unwrap();
        let thrown = rt.call(&f, &[]).unwrap_err();
        assert!(!thrown.terminating);
        assert!(matches!(&thrown.value, Value::Str(m) if m.contains("exceeds")));
        assert_eq!(rt.heap().len(), 1);

        assert!(rt.create_typed_array(MAX_ARRAY_LENGTH + 1).is_err());
        let array = rt.create_typed_array(4).unwrap();
        let buffer = rt.typed_array_buffer(&array).unwrap();
        assert_eq!(rt.object(&buffer).unwrap().kind, ObjectKind::ArrayBuffer(vec![0; 4]));
    }

    #[test]
    fn snapshot_restores_heap() {
        let mut rt = SandboxRuntime::new();
        rt.create_object(true).unwrap();
        let snap = rt.capture().unwrap();
        rt.create_object(true).unwrap();
        assert_eq!(rt.heap().len(), 2);
        rt.restore(&snap).unwrap();
        assert_eq!(rt.heap().len(), 1);
    }

    #[test]
    fn calls_record_last_statement() {
        let mut rt = SandboxRuntime::new();
        let f = rt.create_function(None).unwrap();
        assert_eq!(rt.call(&f, &[Value::I32(4)]).unwrap(), Value::I32(4));
        assert_eq!(rt.last_executed_statement().map(|p| p.function_time), Some(1));
        let not_fn = rt.create_object(true).unwrap();
        assert!(rt.call(&not_fn, &[]).is_err());
    }
}
