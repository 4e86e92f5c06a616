//! Built-in operations over values.
//!
//! Each operation is a plain function over the type registry and its
//! operands. The [`OPERATIONS`] table exposes them to compiled code as
//! native blocks; the engine turns an `Err` into a runtime error and a null
//! result.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::types::{Kind, Type, TypeRegistry};
use crate::value::{Data, Value};
use crate::vm::{VmError, VmResult};

pub type OpFn = fn(&mut TypeRegistry, &[Value]) -> VmResult<Value>;

pub struct Operation {
    pub name: &'static str,
    pub arity: usize,
    pub func: OpFn,
}

pub fn lookup(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.name == name)
}

// ── Arithmetic ───────────────────────────────────────────────────────

fn elementwise(
    types: &mut TypeRegistry,
    a: &Value,
    b: &Value,
    scalar: fn(&mut TypeRegistry, &Value, &Value) -> VmResult<Value>,
) -> VmResult<Value> {
    match (a.is_array(), b.is_array()) {
        (true, true) => {
            if a.ty() != b.ty() {
                return Err(VmError::TypeMismatch { expected: a.type_name(), found: b.type_name() });
            }
            if a.len() != b.len() {
                return Err(VmError::LengthMismatch { left: a.len(), right: b.len() });
            }
            let mut items = Vec::with_capacity(a.len());
            for (x, y) in a.elements().iter().zip(b.elements().iter()) {
                items.push(elementwise(types, x, y, scalar)?);
            }
            Ok(Value::array(array_type_of(types, &items, a), items))
        }
        (false, false) => scalar(types, a, b),
        _ => Err(VmError::TypeMismatch { expected: a.type_name(), found: b.type_name() }),
    }
}

/// Array type for freshly computed elements, falling back to the source type.
fn array_type_of(types: &mut TypeRegistry, items: &[Value], source: &Value) -> Type {
    match items.first().and_then(Value::ty) {
        Some(element) => types.array_of(&element),
        None => source.ty().unwrap_or_else(|| types.void_array()),
    }
}

fn numeric_operand(operation: &'static str, v: &Value) -> VmResult<f64> {
    match v.kind() {
        None | Some(Kind::Array) => Err(VmError::InvalidOperand { operation, found: v.type_name() }),
        Some(_) => Ok(v.as_number()),
    }
}

macro_rules! arithmetic {
    ($name:ident, |$x:ident, $y:ident| $body:expr) => {
        pub fn $name(types: &mut TypeRegistry, a: &Value, b: &Value) -> VmResult<Value> {
            fn scalar(types: &mut TypeRegistry, a: &Value, b: &Value) -> VmResult<Value> {
                let $x = numeric_operand(stringify!($name), a)?;
                let $y = numeric_operand(stringify!($name), b)?;
                let n: VmResult<f64> = $body;
                Ok(Value::number(types, n?))
            }
            elementwise(types, a, b, scalar)
        }
    };
}

arithmetic!(add, |x, y| Ok(x + y));
arithmetic!(subtract, |x, y| Ok(x - y));
arithmetic!(multiply, |x, y| Ok(x * y));
arithmetic!(divide, |x, y| if y == 0.0 { Err(VmError::DivisionByZero) } else { Ok(x / y) });
arithmetic!(remainder, |x, y| if y == 0.0 { Err(VmError::DivisionByZero) } else { Ok(x % y) });
arithmetic!(power, |x, y| Ok(x.powf(y)));

fn map_numeric(
    types: &mut TypeRegistry,
    a: &Value,
    operation: &'static str,
    f: fn(f64) -> f64,
) -> VmResult<Value> {
    if a.is_array() {
        let mut items = Vec::with_capacity(a.len());
        for item in a.elements() {
            items.push(map_numeric(types, &item, operation, f)?);
        }
        return Ok(Value::array(array_type_of(types, &items, a), items));
    }
    let n = numeric_operand(operation, a)?;
    Ok(Value::number(types, f(n)))
}

pub fn negative(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    map_numeric(types, a, "negative", |x| -x)
}

pub fn round(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    map_numeric(types, a, "round", f64::round)
}

pub fn truncate(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    map_numeric(types, a, "truncate", f64::trunc)
}

pub fn ceil(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    map_numeric(types, a, "ceil", f64::ceil)
}

pub fn floor(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    map_numeric(types, a, "floor", f64::floor)
}

pub fn absolute(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    map_numeric(types, a, "absolute", f64::abs)
}

// ── Comparison and stepping ──────────────────────────────────────────

/// Total order over values of one type. Arrays compare element by element,
/// a longer array with an equal prefix is greater. Objects compare through
/// their `value` property.
pub fn ordering(a: &Value, b: &Value) -> VmResult<Ordering> {
    let (Some(ta), Some(tb)) = (a.ty(), b.ty()) else {
        return Err(VmError::NullCompare);
    };
    if ta.is_object() && tb.is_object() {
        let (Some(x), Some(y)) = (a.underlying(), b.underlying()) else {
            return Err(VmError::ObjectCompare);
        };
        return ordering(&x, &y);
    }
    let either_void = ta.is_array() && tb.is_array() && (ta.element().is_none() || tb.element().is_none());
    if ta != tb && !either_void {
        return Err(VmError::TypeMismatch { expected: ta.to_string(), found: tb.to_string() });
    }
    Ok(match ta.kind() {
        Kind::Bool => a.as_bool().cmp(&b.as_bool()),
        Kind::Number => a.as_number().partial_cmp(&b.as_number()).unwrap_or(Ordering::Equal),
        Kind::Char => a.as_char().cmp(&b.as_char()),
        Kind::Array => {
            let (xs, ys) = (a.elements(), b.elements());
            for (x, y) in xs.iter().zip(ys.iter()) {
                match ordering(x, y)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            xs.len().cmp(&ys.len())
        }
        Kind::Object => return Err(VmError::ObjectCompare),
    })
}

pub fn compare(types: &mut TypeRegistry, a: &Value, b: &Value) -> VmResult<Value> {
    let n = match ordering(a, b)? {
        Ordering::Less => -1.0,
        Ordering::Equal => 0.0,
        Ordering::Greater => 1.0,
    };
    Ok(Value::number(types, n))
}

fn step(types: &mut TypeRegistry, a: &Value, up: bool, operation: &'static str) -> VmResult<Value> {
    match a.kind() {
        Some(Kind::Number) => {
            let delta = if up { 1.0 } else { -1.0 };
            Ok(Value::number(types, a.as_number() + delta))
        }
        Some(Kind::Char) => {
            let c = a.as_char();
            let next = if up { c.wrapping_add(1) } else { c.wrapping_sub(1) };
            Ok(Value::character(types, next))
        }
        Some(Kind::Bool) => Ok(Value::boolean(types, up)),
        Some(Kind::Object) => match a.underlying() {
            Some(inner) => step(types, &inner, up, operation),
            None => Err(VmError::PropertyNotFound { name: "value".to_string() }),
        },
        _ => Err(VmError::InvalidOperand { operation, found: a.type_name() }),
    }
}

pub fn successor(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    step(types, a, true, "successor")
}

pub fn predecessor(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    step(types, a, false, "predecessor")
}

pub fn not(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    Ok(Value::boolean(types, !a.as_bool()))
}

// ── Arrays ───────────────────────────────────────────────────────────

fn require_array(a: &Value) -> VmResult<()> {
    if a.is_array() {
        Ok(())
    } else {
        Err(VmError::NotAnArray { found: a.type_name() })
    }
}

/// Validates `index` against `0..bound`.
fn array_index(array: &Value, index: &Value, bound: usize) -> VmResult<usize> {
    let n = index.as_number();
    if n < 0.0 {
        return Err(VmError::NegativeIndex { index: n });
    }
    if n != n.trunc() {
        return Err(VmError::NonIntegralIndex { index: n });
    }
    let i = n as usize;
    if i >= bound {
        return Err(VmError::IndexOutOfBounds { index: n, length: array.len() });
    }
    Ok(i)
}

/// Element compatibility for writes into an array of type `array_ty`.
/// Object arrays accept any object whose chain satisfies the element type.
fn check_element(array_ty: &Type, item: &Value) -> VmResult<()> {
    let Some(found) = item.ty() else {
        return Err(VmError::TypeMismatch {
            expected: array_ty.element().map_or_else(|| "a value".to_string(), Type::to_string),
            found: item.type_name(),
        });
    };
    let Some(element) = array_ty.element() else {
        return Ok(());
    };
    if &found == element || (element.is_object() && found.has_polytype(element)) {
        return Ok(());
    }
    Err(VmError::TypeMismatch { expected: element.to_string(), found: found.to_string() })
}

pub fn length(types: &mut TypeRegistry, a: &Value) -> VmResult<Value> {
    require_array(a)?;
    Ok(Value::number(types, a.len() as f64))
}

pub fn read_index(_types: &mut TypeRegistry, a: &Value, index: &Value) -> VmResult<Value> {
    require_array(a)?;
    let i = array_index(a, index, a.len())?;
    Ok(a.element(i).unwrap_or_default())
}

/// Like [`read_index`], but the returned handle shares the element's body
/// so an in-place overwrite lands inside the array.
pub fn index_writable(types: &mut TypeRegistry, a: &Value, index: &Value) -> VmResult<Value> {
    require_array(a)?;
    let i = array_index(a, index, a.len())?;
    Ok(a.writable_element(types, i).unwrap_or_default())
}

pub fn write_index(types: &mut TypeRegistry, a: &Value, index: &Value, item: &Value) -> VmResult<Value> {
    require_array(a)?;
    let i = array_index(a, index, a.len())?;
    let array_ty = a.ty().unwrap_or_else(|| types.void_array());
    check_element(&array_ty, item)?;
    let mut result = a.clone();
    result.set_element(types, i, item.clone());
    Ok(result)
}

/// Half-open slice `[from, to)`.
pub fn slice(types: &mut TypeRegistry, a: &Value, from: &Value, to: &Value) -> VmResult<Value> {
    require_array(a)?;
    let start = array_index(a, from, a.len() + 1)?;
    let end = array_index(a, to, a.len() + 1)?;
    if start > end {
        return Err(VmError::IndexOutOfBounds { index: from.as_number(), length: a.len() });
    }
    let items = a.elements()[start..end].to_vec();
    Ok(Value::array(a.ty().unwrap_or_else(|| types.void_array()), items))
}

pub fn erase(types: &mut TypeRegistry, a: &Value, index: &Value) -> VmResult<Value> {
    require_array(a)?;
    let i = array_index(a, index, a.len())?;
    let mut result = a.clone();
    result.remove_element(types, i);
    Ok(result)
}

pub fn append(types: &mut TypeRegistry, a: &Value, item: &Value) -> VmResult<Value> {
    require_array(a)?;
    let array_ty = a.ty().unwrap_or_else(|| types.void_array());
    check_element(&array_ty, item)?;
    let mut result = a.clone();
    result.push(types, item.clone());
    if array_ty == types.void_array() {
        if let Some(element) = item.ty() {
            let adopted = types.array_of(&element);
            result.set_type(types, adopted);
        }
    }
    Ok(result)
}

/// Joins two arrays, or merges two objects. Non-array operands are
/// converted to strings first.
pub fn concatenate(types: &mut TypeRegistry, a: &Value, b: &Value) -> VmResult<Value> {
    if a.is_object() && b.is_object() {
        return Ok(merge_objects(types, a, b));
    }
    let left = if a.is_array() { a.clone() } else { Value::string(types, &a.to_string()) };
    let right = if b.is_array() { b.clone() } else { Value::string(types, &b.to_string()) };
    let void = types.void_array();
    let (lt, rt) = (
        left.ty().unwrap_or_else(|| void.clone()),
        right.ty().unwrap_or_else(|| void.clone()),
    );
    if lt != rt && lt != void && rt != void {
        return Err(VmError::TypeMismatch { expected: lt.to_string(), found: rt.to_string() });
    }
    let mut result = left;
    result.extend(types, &right);
    if lt == void {
        result.set_type(types, rt);
    }
    Ok(result)
}

fn merge_objects(types: &mut TypeRegistry, a: &Value, b: &Value) -> Value {
    let mut merged = a
        .properties()
        .map(|p| p.borrow().clone())
        .unwrap_or_default();
    if let Some(right) = b.properties() {
        for (name, value) in right.borrow().iter() {
            merged.insert(name.clone(), value.clone());
        }
    }
    let generic = types.object();
    let (lt, rt) = (
        a.ty().unwrap_or_else(|| generic.clone()),
        b.ty().unwrap_or_else(|| generic.clone()),
    );
    let ty = if rt == generic {
        lt
    } else if lt == generic {
        rt
    } else {
        types.union_of(&[lt, rt])
    };
    Value::new(ty, Data::Object(Rc::new(RefCell::new(merged))))
}

pub fn assert(_types: &mut TypeRegistry, condition: &Value, message: &Value) -> VmResult<Value> {
    if condition.as_bool() {
        Ok(Value::null())
    } else {
        Err(VmError::Assertion(message.to_string()))
    }
}

// ── Objects ──────────────────────────────────────────────────────────

fn require_object(obj: &Value) -> VmResult<crate::value::Properties> {
    obj.properties()
        .ok_or_else(|| VmError::NotAnObject { found: obj.type_name() })
}

pub fn register_property(_types: &mut TypeRegistry, obj: &Value, name: &Value, value: &Value) -> VmResult<Value> {
    let props = require_object(obj)?;
    let name = name.to_string();
    if props.borrow().contains_key(&name) {
        return Err(VmError::PropertyExists { name });
    }
    props.borrow_mut().insert(name, value.clone());
    Ok(Value::null())
}

pub fn get_property(_types: &mut TypeRegistry, obj: &Value, name: &Value) -> VmResult<Value> {
    let props = require_object(obj)?;
    let name = name.to_string();
    let found = props.borrow().get(&name).cloned();
    found.ok_or(VmError::PropertyNotFound { name })
}

pub fn set_property(_types: &mut TypeRegistry, obj: &Value, name: &Value, value: &Value) -> VmResult<Value> {
    let props = require_object(obj)?;
    let name = name.to_string();
    if !props.borrow().contains_key(&name) {
        return Err(VmError::PropertyNotFound { name });
    }
    props.borrow_mut().insert(name, value.clone());
    Ok(Value::null())
}

// ── Table ────────────────────────────────────────────────────────────

macro_rules! wrap {
    ($wrapper:ident => $func:ident()) => {
        fn $wrapper(types: &mut TypeRegistry, _args: &[Value]) -> VmResult<Value> {
            $func(types)
        }
    };
    ($wrapper:ident => $func:ident($($i:literal),+)) => {
        fn $wrapper(types: &mut TypeRegistry, args: &[Value]) -> VmResult<Value> {
            $func(types, $(&args[$i]),+)
        }
    };
}

fn constant_true(types: &mut TypeRegistry) -> VmResult<Value> {
    Ok(Value::boolean(types, true))
}

fn constant_false(types: &mut TypeRegistry) -> VmResult<Value> {
    Ok(Value::boolean(types, false))
}

fn constant_pi(types: &mut TypeRegistry) -> VmResult<Value> {
    Ok(Value::number(types, std::f64::consts::PI))
}

wrap!(op_true => constant_true());
wrap!(op_false => constant_false());
wrap!(op_pi => constant_pi());
wrap!(op_length => length(0));
wrap!(op_not => not(0));
wrap!(op_negative => negative(0));
wrap!(op_predecessor => predecessor(0));
wrap!(op_successor => successor(0));
wrap!(op_round => round(0));
wrap!(op_truncate => truncate(0));
wrap!(op_ceil => ceil(0));
wrap!(op_floor => floor(0));
wrap!(op_absolute => absolute(0));
wrap!(op_add => add(0, 1));
wrap!(op_subtract => subtract(0, 1));
wrap!(op_multiply => multiply(0, 1));
wrap!(op_divide => divide(0, 1));
wrap!(op_remainder => remainder(0, 1));
wrap!(op_power => power(0, 1));
wrap!(op_index => read_index(0, 1));
wrap!(op_index_writable => index_writable(0, 1));
wrap!(op_write_index => write_index(0, 1, 2));
wrap!(op_slice => slice(0, 1, 2));
wrap!(op_erase => erase(0, 1));
wrap!(op_append => append(0, 1));
wrap!(op_concatenate => concatenate(0, 1));
wrap!(op_compare => compare(0, 1));
wrap!(op_assert => assert(0, 1));
wrap!(op_register_property => register_property(0, 1, 2));
wrap!(op_get_property => get_property(0, 1));
wrap!(op_set_property => set_property(0, 1, 2));

pub static OPERATIONS: &[Operation] = &[
    Operation { name: "true", arity: 0, func: op_true },
    Operation { name: "false", arity: 0, func: op_false },
    Operation { name: "pi", arity: 0, func: op_pi },
    Operation { name: "length", arity: 1, func: op_length },
    Operation { name: "not", arity: 1, func: op_not },
    Operation { name: "negative", arity: 1, func: op_negative },
    Operation { name: "predecessor", arity: 1, func: op_predecessor },
    Operation { name: "successor", arity: 1, func: op_successor },
    Operation { name: "round", arity: 1, func: op_round },
    Operation { name: "trunc", arity: 1, func: op_truncate },
    Operation { name: "truncate", arity: 1, func: op_truncate },
    Operation { name: "ceil", arity: 1, func: op_ceil },
    Operation { name: "floor", arity: 1, func: op_floor },
    Operation { name: "absolute", arity: 1, func: op_absolute },
    Operation { name: "add", arity: 2, func: op_add },
    Operation { name: "subtract", arity: 2, func: op_subtract },
    Operation { name: "multiply", arity: 2, func: op_multiply },
    Operation { name: "divide", arity: 2, func: op_divide },
    Operation { name: "remainder", arity: 2, func: op_remainder },
    Operation { name: "power", arity: 2, func: op_power },
    Operation { name: "index", arity: 2, func: op_index },
    Operation { name: "index!", arity: 2, func: op_index_writable },
    Operation { name: "write_index", arity: 3, func: op_write_index },
    Operation { name: "slice", arity: 3, func: op_slice },
    Operation { name: "erase", arity: 2, func: op_erase },
    Operation { name: "append", arity: 2, func: op_append },
    Operation { name: "concatenate", arity: 2, func: op_concatenate },
    Operation { name: "link", arity: 2, func: op_concatenate },
    Operation { name: "compare", arity: 2, func: op_compare },
    Operation { name: "assert", arity: 2, func: op_assert },
    Operation { name: "obj_register_property", arity: 3, func: op_register_property },
    Operation { name: "obj_get_property", arity: 2, func: op_get_property },
    Operation { name: "obj_set_property", arity: 3, func: op_set_property },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(types: &mut TypeRegistry, ns: &[f64]) -> Value {
        let number = types.number();
        let ty = types.array_of(&number);
        let items = ns.iter().map(|n| Value::number(types, *n)).collect();
        Value::array(ty, items)
    }

    #[test]
    fn compare_orders_arrays_lexicographically() {
        let mut types = TypeRegistry::new();
        let a = numbers(&mut types, &[1.0, 2.0]);
        let b = numbers(&mut types, &[1.0, 2.0, 3.0]);
        let c = numbers(&mut types, &[1.0, 3.0]);
        assert_eq!(compare(&mut types, &a, &b).unwrap().as_number(), -1.0);
        assert_eq!(compare(&mut types, &c, &b).unwrap().as_number(), 1.0);
        let s1 = Value::string(&types, "ab");
        let s2 = Value::string(&types, "ab");
        assert_eq!(compare(&mut types, &s1, &s2).unwrap().as_number(), 0.0);
        let short = Value::string(&types, "12");
        let long = Value::string(&types, "123");
        assert_eq!(compare(&mut types, &short, &long).unwrap().as_number(), -1.0);
    }

    #[test]
    fn compare_rejects_mixed_types_and_null() {
        let mut types = TypeRegistry::new();
        let n = Value::number(&types, 1.0);
        let s = Value::string(&types, "1");
        assert!(matches!(compare(&mut types, &n, &s), Err(VmError::TypeMismatch { .. })));
        assert_eq!(compare(&mut types, &Value::null(), &n).unwrap_err(), VmError::NullCompare);
    }

    #[test]
    fn compare_objects_through_value_property() {
        let mut types = TypeRegistry::new();
        let a = Value::object(types.object());
        let b = Value::object(types.object());
        let value = Value::string(&types, "value");
        assert_eq!(compare(&mut types, &a, &b).unwrap_err(), VmError::ObjectCompare);
        let one = Value::number(&types, 1.0);
        let two = Value::number(&types, 2.0);
        register_property(&mut types, &a, &value, &one).unwrap();
        register_property(&mut types, &b, &value, &two).unwrap();
        assert_eq!(compare(&mut types, &a, &b).unwrap().as_number(), -1.0);
    }

    #[test]
    fn append_to_void_array_adopts_element_type() {
        let mut types = TypeRegistry::new();
        let empty = Value::array(types.void_array(), Vec::new());
        let one = Value::number(&types, 1.0);
        let result = append(&mut types, &empty, &one).unwrap();
        let number = types.number();
        assert_eq!(result.ty(), Some(types.array_of(&number)));
        assert_eq!(empty.len(), 0);

        let c = Value::character(&types, 65);
        assert!(matches!(append(&mut types, &result, &c), Err(VmError::TypeMismatch { .. })));
    }

    #[test]
    fn elementwise_arithmetic() {
        let mut types = TypeRegistry::new();
        let a = numbers(&mut types, &[1.0, 2.0]);
        let b = numbers(&mut types, &[10.0, 20.0]);
        let sum = add(&mut types, &a, &b).unwrap();
        assert_eq!(sum.to_string(), "[11,22]");

        let c = numbers(&mut types, &[1.0]);
        assert_eq!(
            add(&mut types, &a, &c).unwrap_err(),
            VmError::LengthMismatch { left: 2, right: 1 }
        );
        let s = Value::string(&types, "ab");
        assert!(matches!(add(&mut types, &a, &s), Err(VmError::TypeMismatch { .. })));
        let one = Value::number(&types, 1.0);
        assert!(matches!(add(&mut types, &a, &one), Err(VmError::TypeMismatch { .. })));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let mut types = TypeRegistry::new();
        let one = Value::number(&types, 1.0);
        let zero = Value::number(&types, 0.0);
        assert_eq!(divide(&mut types, &one, &zero).unwrap_err(), VmError::DivisionByZero);
        assert_eq!(remainder(&mut types, &one, &zero).unwrap_err(), VmError::DivisionByZero);
        let seven = Value::number(&types, 7.0);
        let three = Value::number(&types, 3.0);
        assert_eq!(remainder(&mut types, &seven, &three).unwrap().as_number(), 1.0);
    }

    #[test]
    fn index_validation() {
        let mut types = TypeRegistry::new();
        let a = numbers(&mut types, &[5.0, 6.0, 7.0]);
        let [one, minus, half, three] = [1.0, -1.0, 0.5, 3.0].map(|n| Value::number(&types, n));

        assert_eq!(read_index(&mut types, &a, &one).unwrap().as_number(), 6.0);
        assert_eq!(read_index(&mut types, &a, &minus).unwrap_err(), VmError::NegativeIndex { index: -1.0 });
        assert_eq!(read_index(&mut types, &a, &half).unwrap_err(), VmError::NonIntegralIndex { index: 0.5 });
        assert_eq!(
            read_index(&mut types, &a, &three).unwrap_err(),
            VmError::IndexOutOfBounds { index: 3.0, length: 3 }
        );
        assert!(matches!(read_index(&mut types, &one, &one), Err(VmError::NotAnArray { .. })));
    }

    #[test]
    fn slice_and_erase() {
        let mut types = TypeRegistry::new();
        let s = Value::string(&types, "hello");
        let one = Value::number(&types, 1.0);
        let four = Value::number(&types, 4.0);
        let five = Value::number(&types, 5.0);
        let six = Value::number(&types, 6.0);
        assert_eq!(slice(&mut types, &s, &one, &four).unwrap().to_string(), "ell");
        assert_eq!(slice(&mut types, &s, &five, &five).unwrap().to_string(), "");
        assert!(slice(&mut types, &s, &four, &one).is_err());
        assert!(slice(&mut types, &s, &one, &six).is_err());
        let erased = erase(&mut types, &s, &one).unwrap();
        assert_eq!(erased.to_string(), "hllo");
        assert_eq!(s.to_string(), "hello");
    }

    #[test]
    fn write_index_respects_object_polymorphism() {
        let mut types = TypeRegistry::new();
        let shape = types.object_named("Shape");
        let circle = types.object_with_parent("Circle", &shape);
        let other = types.object_named("Other");
        let shapes_ty = types.array_of(&shape);
        let shapes = Value::array(shapes_ty, vec![Value::object(shape.clone())]);
        let zero = Value::number(&types, 0.0);

        let updated = write_index(&mut types, &shapes, &zero, &Value::object(circle.clone())).unwrap();
        assert_eq!(updated.element(0).and_then(|v| v.ty()), Some(circle));
        assert_eq!(shapes.element(0).and_then(|v| v.ty()), Some(shape));

        let rejected = write_index(&mut types, &shapes, &zero, &Value::object(other));
        assert!(matches!(rejected, Err(VmError::TypeMismatch { .. })));
    }

    #[test]
    fn concatenate_strings_and_conversions() {
        let mut types = TypeRegistry::new();
        let a = Value::string(&types, "ab");
        let b = Value::string(&types, "cd");
        assert_eq!(concatenate(&mut types, &a, &b).unwrap().to_string(), "abcd");
        let n = Value::number(&types, 3.0);
        let joined = concatenate(&mut types, &a, &n).unwrap();
        assert_eq!(joined.to_string(), "ab3");
        assert_eq!(joined.ty(), Some(types.string()));

        let empty = Value::array(types.void_array(), Vec::new());
        let adopted = concatenate(&mut types, &empty, &a).unwrap();
        assert_eq!(adopted.ty(), Some(types.string()));

        let nums = numbers(&mut types, &[1.0]);
        assert!(concatenate(&mut types, &nums, &a).is_err());
    }

    #[test]
    fn concatenate_objects_morphs_type() {
        let mut types = TypeRegistry::new();
        let a_ty = types.object_named("A");
        let b_ty = types.object_named("B");
        let a = Value::object(a_ty.clone());
        let b = Value::object(b_ty.clone());
        let generic = Value::object(types.object());
        let key = Value::string(&types, "k");
        let one = Value::number(&types, 1.0);
        register_property(&mut types, &b, &key, &one).unwrap();

        let merged = concatenate(&mut types, &a, &b).unwrap();
        let ty = merged.ty().unwrap();
        assert!(ty.has_polytype(&a_ty) && ty.has_polytype(&b_ty));
        assert!(merged.has_property("k"));
        assert!(!a.has_property("k"));

        let adopted = concatenate(&mut types, &generic, &b).unwrap();
        assert_eq!(adopted.ty(), Some(b_ty));
    }

    #[test]
    fn properties() {
        let mut types = TypeRegistry::new();
        let obj = Value::object(types.object());
        let alias = obj.clone();
        let x = Value::string(&types, "x");
        let one = Value::number(&types, 1.0);
        let two = Value::number(&types, 2.0);
        register_property(&mut types, &obj, &x, &one).unwrap();
        assert!(matches!(register_property(&mut types, &obj, &x, &one), Err(VmError::PropertyExists { .. })));
        set_property(&mut types, &alias, &x, &two).unwrap();
        assert_eq!(get_property(&mut types, &obj, &x).unwrap().as_number(), 2.0);
        let y = Value::string(&types, "y");
        assert!(matches!(get_property(&mut types, &obj, &y), Err(VmError::PropertyNotFound { .. })));
        assert!(matches!(set_property(&mut types, &obj, &y, &one), Err(VmError::PropertyNotFound { .. })));
        assert!(matches!(get_property(&mut types, &one, &x), Err(VmError::NotAnObject { .. })));
    }

    #[test]
    fn stepping_and_rounding() {
        let mut types = TypeRegistry::new();
        let c = Value::character(&types, u16::from(b'a'));
        assert_eq!(successor(&mut types, &c).unwrap().to_string(), "b");
        let n = Value::number(&types, 2.5);
        assert_eq!(predecessor(&mut types, &n).unwrap().as_number(), 1.5);
        assert_eq!(round(&mut types, &n).unwrap().as_number(), 3.0);
        assert_eq!(truncate(&mut types, &n).unwrap().as_number(), 2.0);
        let neg = Value::number(&types, -2.5);
        assert_eq!(absolute(&mut types, &neg).unwrap().as_number(), 2.5);
        assert_eq!(floor(&mut types, &neg).unwrap().as_number(), -3.0);
        assert_eq!(ceil(&mut types, &neg).unwrap().as_number(), -2.0);
        let s = Value::string(&types, "a");
        assert!(successor(&mut types, &s).is_err());
    }

    #[test]
    fn assert_raises_with_message() {
        let mut types = TypeRegistry::new();
        let f = Value::boolean(&types, false);
        let msg = Value::string(&types, "boom");
        assert_eq!(assert(&mut types, &f, &msg).unwrap_err(), VmError::Assertion("boom".into()));
    }

    #[test]
    fn table_names_are_unique() {
        let mut names: Vec<&str> = OPERATIONS.iter().map(|op| op.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
        assert_eq!(lookup("index!").map(|op| op.arity), Some(2));
    }
}
