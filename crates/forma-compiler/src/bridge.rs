//! Script ↔ schema bridge.
//!
//! # Design
//!
//! - `MessageType` — a schema message type as a callable script value.
//!   Calling it with keyword arguments builds an instance; nested message
//!   types hang off it as attributes (`Outer.Inner(...)`).
//! - `MessageValue` — a mutable, attribute-addressable instance. Every
//!   assignment is checked field-by-field against the descriptor. Reading
//!   an unset scalar yields the schema default; reading an unset message,
//!   repeated, or map field vivifies an empty slot so nested construction
//!   (`cfg.server.port = 80`, `cfg.tags.append(...)`) writes through.
//! - `RepeatedField` / `MapField` — live views over a field's storage,
//!   sharing it with the owning instance.
//!
//! Conversion to a typed [`DynamicMessage`] happens once construction is
//! finished (driver and validator boundaries); the descriptor of the
//! conversion result is exactly the constructor's descriptor.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use forma_script::value::{Builtin, CallArgs, Key, NativeObject};
use forma_script::{EvalError, EvalErrorKind, Evaluator, Value};
use forma_schema::{
    DynamicMessage, FieldDescriptor, FieldType, FieldValue, MapKey, MessageDescriptor,
    MessageRef, ScalarType, SchemaError, TypeRegistry,
};

/// Registry handle shared by the loader and every bridge value.
pub type SharedRegistry = Rc<RefCell<TypeRegistry>>;

/// Surface a schema error to script code, keeping its category readable
/// from the error kind.
fn schema_err(e: SchemaError) -> EvalError {
    let kind = match &e {
        SchemaError::UnknownField { .. } => EvalErrorKind::Attribute,
        SchemaError::TypeMismatch { .. } => EvalErrorKind::Type,
        _ => EvalErrorKind::Value,
    };
    EvalError::new(kind, e.to_string())
}

fn unknown_field(descriptor: &MessageDescriptor, name: &str) -> EvalError {
    schema_err(SchemaError::UnknownField {
        field: name.to_string(),
        message_type: descriptor.full_name.clone(),
    })
}

fn type_mismatch(message_type: &str, field: &str, detail: String) -> EvalError {
    schema_err(SchemaError::TypeMismatch {
        field: field.to_string(),
        message_type: message_type.to_string(),
        detail,
    })
}

// === Message constructors ===

/// A message type exposed as a callable script value.
pub struct MessageType {
    descriptor: MessageRef,
    registry: SharedRegistry,
}

impl MessageType {
    pub fn new(descriptor: MessageRef, registry: SharedRegistry) -> Self {
        Self {
            descriptor,
            registry,
        }
    }

    pub fn descriptor(&self) -> &MessageRef {
        &self.descriptor
    }
}

impl NativeObject for MessageType {
    fn type_name(&self) -> &str {
        "message_type"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<message type {}>", self.descriptor.full_name)
    }

    fn call(&self, _eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
        if !args.positional.is_empty() {
            return Err(EvalError::arity_error(format!(
                "{}() accepts keyword arguments only",
                self.descriptor.name
            )));
        }
        let msg = MessageValue::empty(self.descriptor.clone(), self.registry.clone());
        for (name, value) in &args.keywords {
            msg.set_attr(name, value.clone())?;
        }
        Ok(Value::Native(Rc::new(msg)))
    }

    fn get_attr(&self, name: &str) -> Result<Value, EvalError> {
        for full in &self.descriptor.nested_messages {
            if MessageDescriptor::nested_short_name(full) == name {
                let nested = self
                    .registry
                    .borrow()
                    .message(full)
                    .map_err(schema_err)?;
                return Ok(Value::native(MessageType::new(
                    nested,
                    self.registry.clone(),
                )));
            }
        }
        Err(EvalError::new(
            EvalErrorKind::Attribute,
            format!(
                "message type `{}` has no nested message `{name}`",
                self.descriptor.full_name
            ),
        ))
    }
}

// === Message instances ===

/// Script-side storage for one field.
#[derive(Clone)]
enum Slot {
    /// Scalar or enum value.
    Value(FieldValue),
    Message(MessageValue),
    Repeated(Rc<RefCell<Vec<Slot>>>),
    Map(Rc<RefCell<IndexMap<MapKey, Slot>>>),
}

/// A message instance bound to one descriptor, shared by reference like
/// every other mutable script container.
#[derive(Clone)]
pub struct MessageValue {
    descriptor: MessageRef,
    registry: SharedRegistry,
    slots: Rc<RefCell<IndexMap<u32, Slot>>>,
}

impl MessageValue {
    pub fn empty(descriptor: MessageRef, registry: SharedRegistry) -> Self {
        Self {
            descriptor,
            registry,
            slots: Rc::new(RefCell::new(IndexMap::new())),
        }
    }

    pub fn descriptor(&self) -> &MessageRef {
        &self.descriptor
    }

    /// Convert to a typed message. The result's descriptor is exactly this
    /// instance's descriptor.
    pub fn to_message(&self) -> Result<DynamicMessage, SchemaError> {
        let mut msg = DynamicMessage::new(self.descriptor.clone());
        for (number, slot) in self.slots.borrow().iter() {
            msg.set_field_by_number(*number, slot_to_field_value(slot)?)?;
        }
        Ok(msg)
    }

    /// Wrap a typed message for script code (validators receive these).
    pub fn from_message(msg: &DynamicMessage, registry: SharedRegistry) -> Self {
        let wrapper = MessageValue::empty(msg.descriptor().clone(), registry.clone());
        {
            let mut slots = wrapper.slots.borrow_mut();
            for (number, value) in msg.set_fields() {
                slots.insert(number, field_value_to_slot(value, &registry));
            }
        }
        wrapper
    }

    fn field(&self, name: &str) -> Result<&FieldDescriptor, EvalError> {
        self.descriptor
            .field(name)
            .ok_or_else(|| unknown_field(&self.descriptor, name))
    }
}

impl NativeObject for MessageValue {
    fn type_name(&self) -> &str {
        &self.descriptor.full_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        let slots = self.slots.borrow();
        let fields: Vec<String> = self
            .descriptor
            .fields
            .iter()
            .filter_map(|f| {
                let slot = slots.get(&f.number)?;
                Some(format!("{} = {}", f.name, slot_repr(slot)))
            })
            .collect();
        format!("{}({})", self.descriptor.name, fields.join(", "))
    }

    fn get_attr(&self, name: &str) -> Result<Value, EvalError> {
        let field = self.field(name)?;
        if let Some(slot) = self.slots.borrow().get(&field.number) {
            return slot_to_script(slot, field, &self.descriptor.full_name, &self.registry);
        }

        // Unset field: vivify container-shaped fields so nested
        // construction writes through; scalars just report their default.
        if field.is_map() {
            let entries = Rc::new(RefCell::new(IndexMap::new()));
            self.slots
                .borrow_mut()
                .insert(field.number, Slot::Map(entries));
        } else if field.is_repeated() {
            let items = Rc::new(RefCell::new(Vec::new()));
            self.slots
                .borrow_mut()
                .insert(field.number, Slot::Repeated(items));
        } else if let FieldType::Message(type_name) = &field.field_type {
            let nested = self
                .registry
                .borrow()
                .message(type_name)
                .map_err(schema_err)?;
            let child = MessageValue::empty(nested, self.registry.clone());
            self.slots
                .borrow_mut()
                .insert(field.number, Slot::Message(child));
        } else {
            let default = DynamicMessage::default_value(field).ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::Value,
                    format!("field `{name}` has no default"),
                )
            })?;
            return scalar_to_script(&field.field_type, &default, &self.registry);
        }

        let slots = self.slots.borrow();
        slot_to_script(
            &slots[&field.number],
            field,
            &self.descriptor.full_name,
            &self.registry,
        )
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<(), EvalError> {
        let field = self.field(name)?;
        let slot = slot_from_script(field, &value, &self.descriptor.full_name, &self.registry)?;
        self.slots.borrow_mut().insert(field.number, slot);
        Ok(())
    }
}

// === Field views ===

/// Live view of a repeated field: an appendable ordered sequence.
#[derive(Clone)]
pub struct RepeatedField {
    message_type: String,
    field_name: String,
    element_type: FieldType,
    registry: SharedRegistry,
    items: Rc<RefCell<Vec<Slot>>>,
}

impl RepeatedField {
    fn convert(&self, value: &Value) -> Result<Slot, EvalError> {
        element_from_script(&self.element_type, value, &self.registry)
            .map_err(|detail| type_mismatch(&self.message_type, &self.field_name, detail))
    }

    fn field_descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            name: self.field_name.clone(),
            number: 0,
            cardinality: forma_schema::Cardinality::Singular,
            field_type: self.element_type.clone(),
        }
    }
}

impl NativeObject for RepeatedField {
    fn type_name(&self) -> &str {
        "repeated_field"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        let items: Vec<String> = self.items.borrow().iter().map(slot_repr).collect();
        format!("[{}]", items.join(", "))
    }

    fn get_attr(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "append" => {
                let this = self.clone();
                Ok(Builtin::value("append", move |_eval, args| {
                    args.exactly("append", 1)?;
                    let slot = this.convert(&args.positional[0])?;
                    this.items.borrow_mut().push(slot);
                    Ok(Value::None)
                }))
            }
            "extend" => {
                let this = self.clone();
                Ok(Builtin::value("extend", move |_eval, args| {
                    args.exactly("extend", 1)?;
                    for item in args.positional[0].iterate()? {
                        let slot = this.convert(&item)?;
                        this.items.borrow_mut().push(slot);
                    }
                    Ok(Value::None)
                }))
            }
            _ => Err(EvalError::attribute_error(self.type_name(), name)),
        }
    }

    fn index_get(&self, index: &Value) -> Result<Value, EvalError> {
        let items = self.items.borrow();
        let i = normalize_index(index, items.len())?;
        slot_to_script(&items[i], &self.field_descriptor(), &self.message_type, &self.registry)
    }

    fn index_set(&self, index: Value, value: Value) -> Result<(), EvalError> {
        let slot = self.convert(&value)?;
        let mut items = self.items.borrow_mut();
        let len = items.len();
        let i = normalize_index(&index, len)?;
        items[i] = slot;
        Ok(())
    }

    fn iterate(&self) -> Result<Vec<Value>, EvalError> {
        let field = self.field_descriptor();
        self.items
            .borrow()
            .iter()
            .map(|slot| slot_to_script(slot, &field, &self.message_type, &self.registry))
            .collect()
    }

    fn contains(&self, value: &Value) -> Result<bool, EvalError> {
        for item in self.iterate()? {
            if item.equals(value) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn length(&self) -> Result<usize, EvalError> {
        Ok(self.items.borrow().len())
    }
}

/// Live view of a map field: a mapping with key-type enforcement.
#[derive(Clone)]
pub struct MapField {
    message_type: String,
    field_name: String,
    key_type: ScalarType,
    value_type: FieldType,
    registry: SharedRegistry,
    entries: Rc<RefCell<IndexMap<MapKey, Slot>>>,
}

impl MapField {
    fn convert_key(&self, value: &Value) -> Result<MapKey, EvalError> {
        let key = Key::from_value(value)
            .map_err(|e| type_mismatch(&self.message_type, &self.field_name, e.message))?;
        script_key_to_map_key(self.key_type, &key)
            .map_err(|detail| type_mismatch(&self.message_type, &self.field_name, detail))
    }

    fn convert_value(&self, value: &Value) -> Result<Slot, EvalError> {
        element_from_script(&self.value_type, value, &self.registry)
            .map_err(|detail| type_mismatch(&self.message_type, &self.field_name, detail))
    }

    fn value_descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            name: self.field_name.clone(),
            number: 0,
            cardinality: forma_schema::Cardinality::Singular,
            field_type: self.value_type.clone(),
        }
    }
}

impl NativeObject for MapField {
    fn type_name(&self) -> &str {
        "map_field"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        let entries: Vec<String> = self
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| format!("{}: {}", map_key_to_script(k).repr(), slot_repr(v)))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }

    fn get_attr(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "get" => {
                let this = self.clone();
                Ok(Builtin::value("get", move |_eval, args| {
                    args.between("get", 1, 2)?;
                    let key = this.convert_key(&args.positional[0])?;
                    match this.entries.borrow().get(&key) {
                        Some(slot) => slot_to_script(
                            slot,
                            &this.value_descriptor(),
                            &this.message_type,
                            &this.registry,
                        ),
                        None => Ok(args.positional.get(1).cloned().unwrap_or(Value::None)),
                    }
                }))
            }
            "keys" => {
                let this = self.clone();
                Ok(Builtin::value("keys", move |_eval, args| {
                    args.exactly("keys", 0)?;
                    Ok(Value::list(
                        this.entries
                            .borrow()
                            .keys()
                            .map(map_key_to_script)
                            .collect(),
                    ))
                }))
            }
            "values" => {
                let this = self.clone();
                Ok(Builtin::value("values", move |_eval, args| {
                    args.exactly("values", 0)?;
                    let field = this.value_descriptor();
                    this.entries
                        .borrow()
                        .values()
                        .map(|slot| {
                            slot_to_script(slot, &field, &this.message_type, &this.registry)
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::list)
                }))
            }
            "items" => {
                let this = self.clone();
                Ok(Builtin::value("items", move |_eval, args| {
                    args.exactly("items", 0)?;
                    let field = this.value_descriptor();
                    let mut out = Vec::new();
                    for (k, slot) in this.entries.borrow().iter() {
                        let v =
                            slot_to_script(slot, &field, &this.message_type, &this.registry)?;
                        out.push(Value::tuple(vec![map_key_to_script(k), v]));
                    }
                    Ok(Value::list(out))
                }))
            }
            _ => Err(EvalError::attribute_error(self.type_name(), name)),
        }
    }

    fn index_get(&self, index: &Value) -> Result<Value, EvalError> {
        let key = self.convert_key(index)?;
        let entries = self.entries.borrow();
        let slot = entries.get(&key).ok_or_else(|| {
            EvalError::index_error(format!("key {} not found", index.repr()))
        })?;
        slot_to_script(slot, &self.value_descriptor(), &self.message_type, &self.registry)
    }

    fn index_set(&self, index: Value, value: Value) -> Result<(), EvalError> {
        let key = self.convert_key(&index)?;
        let slot = self.convert_value(&value)?;
        self.entries.borrow_mut().insert(key, slot);
        Ok(())
    }

    fn iterate(&self) -> Result<Vec<Value>, EvalError> {
        Ok(self
            .entries
            .borrow()
            .keys()
            .map(map_key_to_script)
            .collect())
    }

    fn contains(&self, value: &Value) -> Result<bool, EvalError> {
        let key = self.convert_key(value)?;
        Ok(self.entries.borrow().contains_key(&key))
    }

    fn length(&self) -> Result<usize, EvalError> {
        Ok(self.entries.borrow().len())
    }
}

// === Conversions ===

fn slot_repr(slot: &Slot) -> String {
    match slot {
        Slot::Value(FieldValue::String(s)) => format!("{s:?}"),
        Slot::Value(v) => format!("{v:?}"),
        Slot::Message(m) => m.repr(),
        Slot::Repeated(items) => {
            let items: Vec<String> = items.borrow().iter().map(slot_repr).collect();
            format!("[{}]", items.join(", "))
        }
        Slot::Map(entries) => {
            let entries: Vec<String> = entries
                .borrow()
                .iter()
                .map(|(k, v)| format!("{:?}: {}", k, slot_repr(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

fn slot_to_field_value(slot: &Slot) -> Result<FieldValue, SchemaError> {
    Ok(match slot {
        Slot::Value(v) => v.clone(),
        Slot::Message(m) => FieldValue::Message(m.to_message()?),
        Slot::Repeated(items) => FieldValue::List(
            items
                .borrow()
                .iter()
                .map(slot_to_field_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Slot::Map(entries) => {
            let mut out = IndexMap::new();
            for (k, v) in entries.borrow().iter() {
                out.insert(k.clone(), slot_to_field_value(v)?);
            }
            FieldValue::Map(out)
        }
    })
}

fn field_value_to_slot(value: &FieldValue, registry: &SharedRegistry) -> Slot {
    match value {
        FieldValue::Message(m) => {
            Slot::Message(MessageValue::from_message(m, registry.clone()))
        }
        FieldValue::List(items) => Slot::Repeated(Rc::new(RefCell::new(
            items
                .iter()
                .map(|v| field_value_to_slot(v, registry))
                .collect(),
        ))),
        FieldValue::Map(entries) => Slot::Map(Rc::new(RefCell::new(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), field_value_to_slot(v, registry)))
                .collect(),
        ))),
        other => Slot::Value(other.clone()),
    }
}

/// Convert a script value for assignment into `field`.
fn slot_from_script(
    field: &FieldDescriptor,
    value: &Value,
    message_type: &str,
    registry: &SharedRegistry,
) -> Result<Slot, EvalError> {
    let mismatch =
        |detail: String| type_mismatch(message_type, &field.name, detail);

    if let FieldType::Map { key, value: value_type } = &field.field_type {
        match value {
            Value::Dict(d) => {
                let mut entries = IndexMap::new();
                for (k, v) in d.borrow().iter() {
                    let map_key =
                        script_key_to_map_key(*key, k).map_err(&mismatch)?;
                    let slot =
                        element_from_script(value_type, v, registry).map_err(&mismatch)?;
                    entries.insert(map_key, slot);
                }
                return Ok(Slot::Map(Rc::new(RefCell::new(entries))));
            }
            Value::Native(n) => {
                if let Some(view) = n.as_any().downcast_ref::<MapField>() {
                    return Ok(Slot::Map(Rc::new(RefCell::new(
                        view.entries.borrow().clone(),
                    ))));
                }
            }
            _ => {}
        }
        return Err(mismatch(format!(
            "expected a dict, got {}",
            value.type_name()
        )));
    }

    if field.is_repeated() {
        let items: Vec<Value> = match value {
            Value::List(_) | Value::Tuple(_) => value.iterate()?,
            Value::Native(n) => {
                if let Some(view) = n.as_any().downcast_ref::<RepeatedField>() {
                    return Ok(Slot::Repeated(Rc::new(RefCell::new(
                        view.items.borrow().clone(),
                    ))));
                }
                return Err(mismatch(format!(
                    "expected a list, got {}",
                    value.type_name()
                )));
            }
            _ => {
                return Err(mismatch(format!(
                    "expected a list, got {}",
                    value.type_name()
                )));
            }
        };
        let mut slots = Vec::with_capacity(items.len());
        for item in &items {
            slots.push(
                element_from_script(&field.field_type, item, registry).map_err(&mismatch)?,
            );
        }
        return Ok(Slot::Repeated(Rc::new(RefCell::new(slots))));
    }

    element_from_script(&field.field_type, value, registry).map_err(&mismatch)
}

/// Convert one script value to a slot of the given element type. Errors
/// are returned as a mismatch detail string; callers add field context.
fn element_from_script(
    field_type: &FieldType,
    value: &Value,
    registry: &SharedRegistry,
) -> Result<Slot, String> {
    match field_type {
        FieldType::Scalar(scalar) => scalar_from_script(*scalar, value).map(Slot::Value),
        FieldType::Enum(name) => match value {
            Value::Int(n) => {
                let n = i32::try_from(*n)
                    .map_err(|_| format!("enum value {n} out of range"))?;
                Ok(Slot::Value(FieldValue::Enum(n)))
            }
            Value::Str(symbol) => {
                let registry = registry.borrow();
                let descriptor = registry
                    .enum_type(name)
                    .map_err(|e| e.to_string())?;
                let number = descriptor
                    .number(symbol)
                    .ok_or_else(|| format!("unknown enum symbol {symbol:?} for `{name}`"))?;
                Ok(Slot::Value(FieldValue::Enum(number)))
            }
            other => Err(format!(
                "expected enum `{name}` (int or symbol), got {}",
                other.type_name()
            )),
        },
        FieldType::Message(name) => match value {
            Value::Native(n) => match n.as_any().downcast_ref::<MessageValue>() {
                Some(mv) if mv.descriptor.full_name == *name => Ok(Slot::Message(mv.clone())),
                Some(mv) => Err(format!(
                    "expected message `{name}`, got `{}`",
                    mv.descriptor.full_name
                )),
                None => Err(format!(
                    "expected message `{name}`, got {}",
                    n.type_name()
                )),
            },
            other => Err(format!(
                "expected message `{name}`, got {}",
                other.type_name()
            )),
        },
        FieldType::Map { .. } => Err("nested map values are not constructible".to_string()),
    }
}

/// Scalar conversions, with range checks. Ints widen to both wider integer
/// kinds and floating-point fields; strings and bytes stay distinct.
fn scalar_from_script(scalar: ScalarType, value: &Value) -> Result<FieldValue, String> {
    let out_of_range = |n: &i64, kind: &str| format!("value {n} out of range for {kind}");
    Ok(match (scalar, value) {
        (ScalarType::Double, Value::Float(x)) => FieldValue::F64(*x),
        (ScalarType::Double, Value::Int(n)) => FieldValue::F64(*n as f64),
        (ScalarType::Float, Value::Float(x)) => FieldValue::F32(*x as f32),
        (ScalarType::Float, Value::Int(n)) => FieldValue::F32(*n as f32),
        (
            ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32,
            Value::Int(n),
        ) => FieldValue::I32(i32::try_from(*n).map_err(|_| out_of_range(n, "int32"))?),
        (
            ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64,
            Value::Int(n),
        ) => FieldValue::I64(*n),
        (ScalarType::UInt32 | ScalarType::Fixed32, Value::Int(n)) => {
            FieldValue::U32(u32::try_from(*n).map_err(|_| out_of_range(n, "uint32"))?)
        }
        (ScalarType::UInt64 | ScalarType::Fixed64, Value::Int(n)) => {
            FieldValue::U64(u64::try_from(*n).map_err(|_| out_of_range(n, "uint64"))?)
        }
        (ScalarType::Bool, Value::Bool(b)) => FieldValue::Bool(*b),
        (ScalarType::String, Value::Str(s)) => FieldValue::String(s.to_string()),
        (ScalarType::Bytes, Value::Bytes(b)) => FieldValue::Bytes(b.to_vec()),
        (scalar, other) => {
            return Err(format!(
                "expected {}, got {}",
                scalar.name(),
                other.type_name()
            ));
        }
    })
}

fn script_key_to_map_key(key_type: ScalarType, key: &Key) -> Result<MapKey, String> {
    Ok(match (key_type, key) {
        (ScalarType::Bool, Key::Bool(b)) => MapKey::Bool(*b),
        (ScalarType::String, Key::Str(s)) => MapKey::String(s.to_string()),
        (
            ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32,
            Key::Int(n),
        ) => {
            i32::try_from(*n).map_err(|_| format!("map key {n} out of range for int32"))?;
            MapKey::Int(*n)
        }
        (
            ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64,
            Key::Int(n),
        ) => MapKey::Int(*n),
        (ScalarType::UInt32 | ScalarType::Fixed32, Key::Int(n)) => MapKey::Uint(
            u32::try_from(*n)
                .map(u64::from)
                .map_err(|_| format!("map key {n} out of range for uint32"))?,
        ),
        (ScalarType::UInt64 | ScalarType::Fixed64, Key::Int(n)) => MapKey::Uint(
            u64::try_from(*n).map_err(|_| format!("map key {n} out of range for uint64"))?,
        ),
        (key_type, key) => {
            return Err(format!(
                "map key {} does not match key type {}",
                key.to_value().repr(),
                key_type.name()
            ));
        }
    })
}

fn map_key_to_script(key: &MapKey) -> Value {
    match key {
        MapKey::Bool(b) => Value::Bool(*b),
        MapKey::Int(n) => Value::Int(*n),
        MapKey::Uint(n) => Value::Int(*n as i64),
        MapKey::String(s) => Value::str(s),
    }
}

/// Read one slot back as a script value. `field` supplies the element type
/// (and, through it, enum symbol rendering); `owner` names the enclosing
/// message for error texts.
fn slot_to_script(
    slot: &Slot,
    field: &FieldDescriptor,
    owner: &str,
    registry: &SharedRegistry,
) -> Result<Value, EvalError> {
    match slot {
        Slot::Message(mv) => Ok(Value::Native(Rc::new(mv.clone()))),
        Slot::Repeated(items) => Ok(Value::native(RepeatedField {
            message_type: owner.to_string(),
            field_name: field.name.clone(),
            element_type: field.field_type.clone(),
            registry: registry.clone(),
            items: items.clone(),
        })),
        Slot::Map(entries) => {
            let FieldType::Map { key, value } = &field.field_type else {
                return Err(EvalError::new(
                    EvalErrorKind::Value,
                    format!("field `{}` holds an unexpected map", field.name),
                ));
            };
            Ok(Value::native(MapField {
                message_type: owner.to_string(),
                field_name: field.name.clone(),
                key_type: *key,
                value_type: (**value).clone(),
                registry: registry.clone(),
                entries: entries.clone(),
            }))
        }
        Slot::Value(v) => scalar_to_script(&field.field_type, v, registry),
    }
}

/// Scalar/enum field value → script value. Enum numbers render as their
/// symbol when the enum declares one.
fn scalar_to_script(
    field_type: &FieldType,
    value: &FieldValue,
    registry: &SharedRegistry,
) -> Result<Value, EvalError> {
    Ok(match value {
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::I32(n) => Value::Int(*n as i64),
        FieldValue::I64(n) => Value::Int(*n),
        FieldValue::U32(n) => Value::Int(*n as i64),
        FieldValue::U64(n) => Value::Int(i64::try_from(*n).map_err(|_| {
            EvalError::new(
                EvalErrorKind::Value,
                format!("uint64 value {n} exceeds the script integer range"),
            )
        })?),
        FieldValue::F32(x) => Value::Float(*x as f64),
        FieldValue::F64(x) => Value::Float(*x),
        FieldValue::String(s) => Value::str(s),
        FieldValue::Bytes(b) => Value::Bytes(b.as_slice().into()),
        FieldValue::Enum(n) => {
            if let FieldType::Enum(name) = field_type {
                let registry = registry.borrow();
                if let Ok(descriptor) = registry.enum_type(name) {
                    if let Some(symbol) = descriptor.symbol(*n) {
                        return Ok(Value::str(symbol));
                    }
                }
            }
            Value::Int(*n as i64)
        }
        FieldValue::Message(_) | FieldValue::List(_) | FieldValue::Map(_) => {
            return Err(EvalError::new(
                EvalErrorKind::Value,
                "container value in a scalar slot".to_string(),
            ));
        }
    })
}

fn normalize_index(index: &Value, len: usize) -> Result<usize, EvalError> {
    let Value::Int(i) = index else {
        return Err(EvalError::type_error(format!(
            "indices must be integers, not {}",
            index.type_name()
        )));
    };
    let idx = if *i < 0 { *i + len as i64 } else { *i };
    if idx < 0 || idx as usize >= len {
        return Err(EvalError::index_error(format!(
            "index {i} out of range for length {len}"
        )));
    }
    Ok(idx as usize)
}
