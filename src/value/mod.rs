use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::types::{Kind, Type, TypeRegistry};

pub type Properties = Rc<RefCell<BTreeMap<String, Value>>>;

#[derive(Clone)]
pub enum Data {
    Bool(bool),
    Number(f64),
    Char(u16),
    Array(Vec<Value>),
    /// Shared by every clone of the body: objects have reference semantics.
    Object(Properties),
}

#[derive(Clone)]
pub struct Body {
    pub ty: Type,
    pub data: Data,
}

/// A reference-counted, copy-on-write handle. The default handle is null.
#[derive(Clone, Default)]
pub struct Value(Option<Rc<RefCell<Body>>>);

impl Value {
    pub fn new(ty: Type, data: Data) -> Self {
        Value(Some(Rc::new(RefCell::new(Body { ty, data }))))
    }

    pub fn null() -> Self {
        Value(None)
    }

    pub fn boolean(types: &TypeRegistry, b: bool) -> Self {
        Value::new(types.bool(), Data::Bool(b))
    }

    pub fn number(types: &TypeRegistry, n: f64) -> Self {
        Value::new(types.number(), Data::Number(n))
    }

    pub fn character(types: &TypeRegistry, c: u16) -> Self {
        Value::new(types.char(), Data::Char(c))
    }

    pub fn string(types: &TypeRegistry, s: &str) -> Self {
        let chars = s
            .encode_utf16()
            .map(|c| Value::character(types, c))
            .collect();
        Value::new(types.string(), Data::Array(chars))
    }

    pub fn array(ty: Type, elements: Vec<Value>) -> Self {
        Value::new(ty, Data::Array(elements))
    }

    pub fn object(ty: Type) -> Self {
        Value::new(ty, Data::Object(Rc::new(RefCell::new(BTreeMap::new()))))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn ty(&self) -> Option<Type> {
        self.0.as_ref().map(|b| b.borrow().ty.clone())
    }

    pub fn kind(&self) -> Option<Kind> {
        self.0.as_ref().map(|b| b.borrow().ty.kind())
    }

    pub fn is_array(&self) -> bool {
        self.kind() == Some(Kind::Array)
    }

    pub fn is_object(&self) -> bool {
        self.kind() == Some(Kind::Object)
    }

    /// Name of the type, `(VOID)` for null.
    pub fn type_name(&self) -> String {
        self.ty().map_or_else(|| "(VOID)".to_string(), |t| t.name().to_string())
    }

    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Number of handles sharing this body; 0 for null.
    pub fn ref_count(&self) -> usize {
        self.0.as_ref().map_or(0, Rc::strong_count)
    }

    // ── Coercions ────────────────────────────────────────────────────

    pub fn as_number(&self) -> f64 {
        let Some(body) = &self.0 else { return 0.0 };
        let body = body.borrow();
        match &body.data {
            Data::Bool(b) => f64::from(u8::from(*b)),
            Data::Number(n) => *n,
            Data::Char(c) => f64::from(*c),
            Data::Array(_) => parse_leading_number(&body),
            Data::Object(props) => props
                .borrow()
                .get("value")
                .map_or(0.0, Value::as_number),
        }
    }

    pub fn as_bool(&self) -> bool {
        let Some(body) = &self.0 else { return false };
        match &body.borrow().data {
            Data::Bool(b) => *b,
            Data::Number(n) => *n != 0.0,
            Data::Char(c) => *c != 0,
            Data::Array(items) => !items.is_empty(),
            Data::Object(_) => true,
        }
    }

    pub fn as_char(&self) -> u16 {
        let Some(body) = &self.0 else { return 0 };
        match &body.borrow().data {
            Data::Char(c) => *c,
            Data::Bool(b) => u16::from(*b),
            Data::Number(n) => *n as u16,
            _ => 0,
        }
    }

    // ── Arrays ───────────────────────────────────────────────────────

    /// Element count of an array, 0 for anything else.
    pub fn len(&self) -> usize {
        let Some(body) = &self.0 else { return 0 };
        match &body.borrow().data {
            Data::Array(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element(&self, index: usize) -> Option<Value> {
        let body = self.0.as_ref()?;
        match &body.borrow().data {
            Data::Array(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    /// Shallow copy of the element handles.
    pub fn elements(&self) -> Vec<Value> {
        let Some(body) = &self.0 else { return Vec::new() };
        match &body.borrow().data {
            Data::Array(items) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Separates this handle's body from every other owner. A null handle
    /// becomes an empty void array.
    pub fn unique(&mut self, types: &TypeRegistry) {
        let copy = match &self.0 {
            None => Body { ty: types.void_array(), data: Data::Array(Vec::new()) },
            Some(body) if Rc::strong_count(body) > 1 => body.borrow().clone(),
            Some(_) => return,
        };
        self.0 = Some(Rc::new(RefCell::new(copy)));
    }

    fn with_body_mut<R>(&mut self, types: &TypeRegistry, f: impl FnOnce(&mut Body) -> R) -> R {
        self.unique(types);
        let body = self.0.get_or_insert_with(|| {
            Rc::new(RefCell::new(Body { ty: types.void_array(), data: Data::Array(Vec::new()) }))
        });
        f(&mut body.borrow_mut())
    }

    pub fn set_type(&mut self, types: &TypeRegistry, ty: Type) {
        self.with_body_mut(types, |body| body.ty = ty);
    }

    pub fn push(&mut self, types: &TypeRegistry, item: Value) {
        self.with_body_mut(types, |body| {
            if let Data::Array(items) = &mut body.data {
                items.push(item);
            }
        });
    }

    pub fn extend(&mut self, types: &TypeRegistry, other: &Value) {
        let tail = other.elements();
        self.with_body_mut(types, |body| {
            if let Data::Array(items) = &mut body.data {
                items.extend(tail);
            }
        });
    }

    pub fn set_element(&mut self, types: &TypeRegistry, index: usize, item: Value) {
        self.with_body_mut(types, |body| {
            if let Data::Array(items) = &mut body.data {
                if let Some(slot) = items.get_mut(index) {
                    *slot = item;
                }
            }
        });
    }

    pub fn remove_element(&mut self, types: &TypeRegistry, index: usize) {
        self.with_body_mut(types, |body| {
            if let Data::Array(items) = &mut body.data {
                if index < items.len() {
                    items.remove(index);
                }
            }
        });
    }

    /// Makes element `index` private to this body (without separating the
    /// body itself) and returns a handle sharing it, for in-place writes.
    pub fn writable_element(&self, types: &TypeRegistry, index: usize) -> Option<Value> {
        let body = self.0.as_ref()?;
        let mut body = body.borrow_mut();
        match &mut body.data {
            Data::Array(items) => {
                let slot = items.get_mut(index)?;
                slot.unique(types);
                Some(slot.clone())
            }
            _ => None,
        }
    }

    /// Replaces the shared body's contents with `src`'s, so every handle
    /// sharing this body observes the new value. Returns false when either
    /// side is null, since there is no body to write through.
    pub fn overwrite(&self, src: &Value) -> bool {
        let (Some(dest), Some(from)) = (&self.0, &src.0) else {
            return false;
        };
        if !Rc::ptr_eq(dest, from) {
            let copy = from.borrow().clone();
            *dest.borrow_mut() = copy;
        }
        true
    }

    // ── Objects ──────────────────────────────────────────────────────

    pub fn properties(&self) -> Option<Properties> {
        let body = self.0.as_ref()?;
        match &body.borrow().data {
            Data::Object(props) => Some(props.clone()),
            _ => None,
        }
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties()
            .is_some_and(|p| p.borrow().contains_key(name))
    }

    pub fn get_property(&self, name: &str) -> Option<Value> {
        self.properties()?.borrow().get(name).cloned()
    }

    /// The innermost `value` property, following nested objects.
    pub fn underlying(&self) -> Option<Value> {
        let mut current = self.get_property("value")?;
        while current.is_object() {
            current = current.get_property("value")?;
        }
        Some(current)
    }

    /// A copy for a constant push: objects get their own property map so
    /// each evaluation of a literal yields a distinct object.
    pub fn instantiate(&self) -> Value {
        let Some(body) = &self.0 else { return Value::null() };
        let body = body.borrow();
        match &body.data {
            Data::Object(props) => {
                let copy = props.borrow().clone();
                Value::new(body.ty.clone(), Data::Object(Rc::new(RefCell::new(copy))))
            }
            _ => self.clone(),
        }
    }

    fn is_string(&self) -> bool {
        self.0
            .as_ref()
            .is_some_and(|b| b.borrow().ty.element().is_some_and(|e| e.kind() == Kind::Char))
    }
}

fn parse_leading_number(body: &Body) -> f64 {
    let Data::Array(items) = &body.data else { return 0.0 };
    let units: Vec<u16> = items.iter().map(Value::as_char).collect();
    let text = String::from_utf16_lossy(&units);
    let trimmed = text.trim();
    // Lenient: take the longest numeric prefix.
    let end = trimmed
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    trimmed[..end].parse().unwrap_or(0.0)
}

// ── Display ──────────────────────────────────────────────────────────

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(body) = &self.0 else { return f.write_str("(VOID)") };
        if self.is_string() {
            let units: Vec<u16> = self.elements().iter().map(Value::as_char).collect();
            return f.write_str(&String::from_utf16_lossy(&units));
        }
        let body = body.borrow();
        match &body.data {
            Data::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Data::Number(n) => f.write_str(&format_number(*n)),
            Data::Char(c) => f.write_str(&String::from_utf16_lossy(&[*c])),
            Data::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Data::Object(props) => match props.borrow().get("value") {
                Some(v) => write!(f, "{v}"),
                None => f.write_str("Object"),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("null"),
            Some(_) if self.is_string() => write!(f, "{:?}", self.to_string()),
            Some(body) => write!(f, "{}({})", body.borrow().ty, self),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Some(body) = &self.0 else { return serializer.serialize_none() };
        if self.is_string() {
            return serializer.serialize_str(&self.to_string());
        }
        let body = body.borrow();
        match &body.data {
            Data::Bool(b) => serializer.serialize_bool(*b),
            Data::Number(n) => serializer.serialize_f64(*n),
            Data::Char(c) => serializer.serialize_str(&String::from_utf16_lossy(&[*c])),
            Data::Array(items) => serializer.collect_seq(items.iter()),
            Data::Object(props) => serializer.collect_map(props.borrow().iter()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_until_mutated() {
        let types = TypeRegistry::new();
        let original = Value::string(&types, "abc");
        let mut copy = original.clone();
        assert!(copy.ptr_eq(&original));
        assert_eq!(original.ref_count(), 2);

        copy.push(&types, Value::character(&types, u16::from(b'd')));
        assert!(!copy.ptr_eq(&original));
        assert_eq!(original.to_string(), "abc");
        assert_eq!(copy.to_string(), "abcd");
    }

    #[test]
    fn objects_alias_through_clones() {
        let mut types = TypeRegistry::new();
        let point = types.object_named("Point");
        let a = Value::object(point);
        let mut b = a.clone();
        b.properties()
            .expect("object")
            .borrow_mut()
            .insert("x".into(), Value::number(&types, 1.0));
        assert_eq!(a.get_property("x").map(|v| v.as_number()), Some(1.0));

        // Even a forced separation keeps the shared property map.
        b.unique(&types);
        b.properties()
            .expect("object")
            .borrow_mut()
            .insert("y".into(), Value::number(&types, 2.0));
        assert!(a.has_property("y"));
    }

    #[test]
    fn unique_on_null_allocates_void_array() {
        let types = TypeRegistry::new();
        let mut v = Value::null();
        v.unique(&types);
        assert_eq!(v.ty(), Some(types.void_array()));
        assert_eq!(v.len(), 0);
    }

    #[test]
    fn overwrite_is_visible_to_all_sharers() {
        let types = TypeRegistry::new();
        let mut array = Value::array(
            types.string(),
            vec![Value::character(&types, 65), Value::character(&types, 66)],
        );
        let slot = array.writable_element(&types, 0).expect("in range");
        assert!(slot.overwrite(&Value::character(&types, 90)));
        assert_eq!(array.to_string(), "ZB");

        // The element was made private before the write.
        let before = array.clone();
        array.unique(&types);
        let slot = array.writable_element(&types, 1).expect("in range");
        assert!(slot.overwrite(&Value::character(&types, 89)));
        assert_eq!(before.to_string(), "ZB");
        assert_eq!(array.to_string(), "ZY");

        // Nothing to write through on either side of a null.
        assert!(!slot.overwrite(&Value::null()));
        assert!(!Value::null().overwrite(&slot));
        assert_eq!(array.to_string(), "ZY");
    }

    #[test]
    fn display_forms() {
        let mut types = TypeRegistry::new();
        assert_eq!(Value::null().to_string(), "(VOID)");
        assert_eq!(Value::number(&types, 3.0).to_string(), "3");
        assert_eq!(Value::number(&types, 2.5).to_string(), "2.5");
        assert_eq!(Value::boolean(&types, true).to_string(), "true");
        let number = types.number();
        let numbers = types.array_of(&number);
        let list = Value::array(numbers, vec![Value::number(&types, 1.0), Value::number(&types, 2.0)]);
        assert_eq!(list.to_string(), "[1,2]");
        let obj = Value::object(types.object());
        assert_eq!(obj.to_string(), "Object");
        obj.properties()
            .expect("object")
            .borrow_mut()
            .insert("value".into(), Value::number(&types, 7.0));
        assert_eq!(obj.to_string(), "7");
    }

    #[test]
    fn coercions() {
        let types = TypeRegistry::new();
        assert_eq!(Value::boolean(&types, true).as_number(), 1.0);
        assert_eq!(Value::character(&types, 65).as_number(), 65.0);
        assert_eq!(Value::string(&types, " 42.5x").as_number(), 42.5);
        assert_eq!(Value::string(&types, "-3").as_number(), -3.0);
        assert!(!Value::string(&types, "").as_bool());
        assert!(Value::number(&types, -1.0).as_bool());
        assert_eq!(Value::null().as_number(), 0.0);
    }

    #[test]
    fn instantiate_gives_fresh_objects() {
        let types = TypeRegistry::new();
        let template = Value::object(types.object());
        let a = template.instantiate();
        let b = template.instantiate();
        a.properties()
            .expect("object")
            .borrow_mut()
            .insert("k".into(), Value::number(&types, 1.0));
        assert!(!b.has_property("k"));
        assert!(!template.has_property("k"));
    }

    #[test]
    fn serializes_to_json() {
        let mut types = TypeRegistry::new();
        let number = types.number();
        let numbers = types.array_of(&number);
        let list = Value::array(numbers, vec![Value::number(&types, 1.0)]);
        assert_eq!(serde_json::to_string(&list).unwrap(), "[1.0]");
        assert_eq!(serde_json::to_string(&Value::string(&types, "hi")).unwrap(), "\"hi\"");
        assert_eq!(serde_json::to_string(&Value::null()).unwrap(), "null");
    }
}
