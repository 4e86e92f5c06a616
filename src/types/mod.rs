use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Kind {
    Bool,
    Number,
    Char,
    Array,
    Object,
}

/// One entry of an object's polymorphic chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub name: String,
    pub id: usize,
}

#[derive(Debug)]
pub struct TypeData {
    id: usize,
    name: String,
    kind: Kind,
    element: Option<Type>,
    ancestors: Vec<Ancestor>,
    head_length: usize,
}

/// Interned type handle. Equality is identity, never structure.
#[derive(Clone)]
pub struct Type(Rc<TypeData>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Type {}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl serde::Serialize for Type {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.name)
    }
}

impl Type {
    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> Kind {
        self.0.kind
    }

    /// Element type of an array; `None` for the void array and non-arrays.
    pub fn element(&self) -> Option<&Type> {
        self.0.element.as_ref()
    }

    pub fn ancestors(&self) -> &[Ancestor] {
        &self.0.ancestors
    }

    pub fn head_length(&self) -> usize {
        self.0.head_length
    }

    fn heads(&self) -> &[Ancestor] {
        &self.0.ancestors[..self.0.head_length]
    }

    fn tails(&self) -> &[Ancestor] {
        &self.0.ancestors[self.0.head_length..]
    }

    pub fn is_array(&self) -> bool {
        self.0.kind == Kind::Array
    }

    pub fn is_object(&self) -> bool {
        self.0.kind == Kind::Object
    }

    /// Nominal subtype check: every head of `required` must appear in this
    /// type's chain. The generic object (no heads) is satisfied by any object.
    pub fn has_polytype(&self, required: &Type) -> bool {
        if self == required {
            return true;
        }
        if !self.is_object() || !required.is_object() {
            return false;
        }
        required
            .heads()
            .iter()
            .all(|head| self.0.ancestors.iter().any(|a| a.id == head.id))
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Owns every type of a program. Types are immortal for its lifetime.
pub struct TypeRegistry {
    types: Vec<Type>,
    boolean: Type,
    number: Type,
    character: Type,
    string: Type,
    void_array: Type,
    object: Type,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut types = Vec::new();
        let mut intern = |name: &str, kind: Kind, element: Option<Type>| {
            let ty = Type(Rc::new(TypeData {
                id: types.len(),
                name: name.to_string(),
                kind,
                element,
                ancestors: Vec::new(),
                head_length: 0,
            }));
            types.push(ty.clone());
            ty
        };
        let boolean = intern("BOOL", Kind::Bool, None);
        let number = intern("NUMBER", Kind::Number, None);
        let character = intern("CHAR", Kind::Char, None);
        let string = intern("STRING", Kind::Array, Some(character.clone()));
        let void_array = intern("[VOID]", Kind::Array, None);
        let object = intern("OBJECT", Kind::Object, None);
        TypeRegistry { types, boolean, number, character, string, void_array, object }
    }

    pub fn bool(&self) -> Type {
        self.boolean.clone()
    }

    pub fn number(&self) -> Type {
        self.number.clone()
    }

    pub fn char(&self) -> Type {
        self.character.clone()
    }

    pub fn string(&self) -> Type {
        self.string.clone()
    }

    pub fn void_array(&self) -> Type {
        self.void_array.clone()
    }

    /// The generic object type, satisfied by every object.
    pub fn object(&self) -> Type {
        self.object.clone()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<Type> {
        self.types.iter().find(|t| t.name() == name).cloned()
    }

    fn insert(
        &mut self,
        name: String,
        kind: Kind,
        element: Option<Type>,
        ancestors: impl FnOnce(usize) -> Vec<Ancestor>,
        head_length: usize,
    ) -> Type {
        let id = self.types.len();
        let ty = Type(Rc::new(TypeData {
            id,
            name,
            kind,
            element,
            ancestors: ancestors(id),
            head_length,
        }));
        self.types.push(ty.clone());
        ty
    }

    pub fn array_of(&mut self, element: &Type) -> Type {
        if let Some(found) = self
            .types
            .iter()
            .find(|t| t.is_array() && t.element() == Some(element))
        {
            return found.clone();
        }
        let name = format!("[{}]", element.name());
        self.insert(name, Kind::Array, Some(element.clone()), |_| Vec::new(), 0)
    }

    /// A named base object type. Re-declaring a name returns the existing type.
    pub fn object_named(&mut self, name: &str) -> Type {
        if let Some(found) = self.lookup(name).filter(Type::is_object) {
            return found;
        }
        let owned = name.to_string();
        self.insert(
            owned.clone(),
            Kind::Object,
            None,
            |id| vec![Ancestor { name: owned, id }],
            1,
        )
    }

    /// A named object type whose chain is `[self] ++ parent's chain`.
    pub fn object_with_parent(&mut self, name: &str, parent: &Type) -> Type {
        if let Some(found) = self.lookup(name).filter(Type::is_object) {
            return found;
        }
        let owned = name.to_string();
        let inherited = parent.ancestors().to_vec();
        self.insert(
            owned.clone(),
            Kind::Object,
            None,
            move |id| {
                let mut chain = vec![Ancestor { name: owned, id }];
                chain.extend(inherited);
                chain
            },
            1,
        )
    }

    /// Union of object types: every head in order, then every tail in order.
    pub fn union_of(&mut self, parts: &[Type]) -> Type {
        let mut heads: Vec<Ancestor> = Vec::new();
        for part in parts {
            for head in part.heads() {
                if !heads.iter().any(|h| h.id == head.id) {
                    heads.push(head.clone());
                }
            }
        }
        if heads.is_empty() {
            return self.object();
        }
        let head_length = heads.len();
        if let Some(found) = self.types.iter().find(|t| {
            t.is_object()
                && t.head_length() == head_length
                && t.heads().iter().zip(&heads).all(|(a, b)| a.id == b.id)
        }) {
            return found.clone();
        }
        let mut chain = heads;
        for part in parts {
            for tail in part.tails() {
                if !chain.iter().any(|a| a.id == tail.id) {
                    chain.push(tail.clone());
                }
            }
        }
        let name = chain[..head_length]
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(" & ");
        self.insert(name, Kind::Object, None, |_| chain, head_length)
    }
}
