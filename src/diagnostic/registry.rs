/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,  // one line, for listings
    pub long: &'static str,   // full explanation for --explain
}

/// All stable error codes of the fae language.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "FAE-L001",
        short: "unexpected character",
        long: r#"## FAE-L001: unexpected character

The source contains a character sequence that starts no token.

**Example:**

    let a = b & c;

A single `&` is not an operator. Use `&&` for logical and, `||` for
logical or, and `(| x |)` for an absolute value. Strings must close on
the line they open, and a character literal holds exactly one character.
"#,
    },
    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "FAE-C001",
        short: "unexpected token",
        long: r#"## FAE-C001: unexpected token

The compiler expected a different token here, e.g. a `;` after a
statement or a `)` closing a condition.

**Example:**

    if x > 1 { }

Conditions are parenthesized: `if (x > 1) { }`.
"#,
    },
    ErrorEntry {
        code: "FAE-C002",
        short: "unexpected end of input",
        long: r#"## FAE-C002: unexpected end of input

The script ended in the middle of a statement, usually because a `}`
or `)` is missing.
"#,
    },
    ErrorEntry {
        code: "FAE-C003",
        short: "unknown identifier",
        long: r#"## FAE-C003: unknown identifier

A name is used that is not a variable, routine or type in scope, nor a
built-in operation or host function.

Variables must be declared with `let` or `var` in the current block or
an enclosing one before they can be assigned:

    let count = 0;
    count += 1;
"#,
    },
    ErrorEntry {
        code: "FAE-C004",
        short: "wrong number of arguments",
        long: r#"## FAE-C004: wrong number of arguments

A call passes a different number of arguments than the routine or
built-in declares.

    function add(a, b) { return a + b; }
    let x = add(1);     -- FAE-C004
"#,
    },
    ErrorEntry {
        code: "FAE-C005",
        short: "statement not allowed here",
        long: r#"## FAE-C005: statement not allowed here

- `break` must appear inside a loop body of the current routine.
- `return` must appear inside a function, sub, task or event; only
  functions return a value.
- events (`@Name { }`) are declared at top level.
- subs take no parameters.
"#,
    },
    ErrorEntry {
        code: "FAE-C006",
        short: "duplicate declaration",
        long: r#"## FAE-C006: duplicate declaration

A name is declared twice in the same block, a routine lists the same
parameter twice, or an event is declared twice. Inner blocks may
shadow outer names.
"#,
    },
    ErrorEntry {
        code: "FAE-C007",
        short: "unknown type",
        long: r#"## FAE-C007: unknown type

A `type Name : Parent;` declaration names a parent type that is not
declared before it.

    type Shape;
    type Circle : Shape;
"#,
    },
    ErrorEntry {
        code: "FAE-C008",
        short: "not a value",
        long: r#"## FAE-C008: not a value

A name is used where a value is expected but it does not produce one:
a sub or task used in an expression, a routine named without calling
it, a type named without an object literal, or a variable called like
a function.
"#,
    },
    ErrorEntry {
        code: "FAE-C009",
        short: "not assignable",
        long: r#"## FAE-C009: not assignable

The left side of an assignment must be a variable, optionally followed
by indexes and properties. At most one index may follow the last
property: `p.items[0] = 1` is allowed, `p.grid[0][1] = 1` is not.
"#,
    },
    ErrorEntry {
        code: "FAE-C010",
        short: "malformed block",
        long: r#"## FAE-C010: malformed block

A compiled block has a branch or loop marker without its closing
marker. This indicates a compiler bug, not a user error.
"#,
    },
    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "FAE-R001",
        short: "type mismatch",
        long: r#"## FAE-R001: type mismatch

An operation received operands of incompatible types, e.g. comparing a
number with a string, or appending a value of the wrong type to a
typed array. Object arrays accept objects of any type derived from
their element type.
"#,
    },
    ErrorEntry {
        code: "FAE-R002",
        short: "length mismatch",
        long: r#"## FAE-R002: length mismatch

Arithmetic on two arrays works element by element and needs arrays of
equal length.
"#,
    },
    ErrorEntry {
        code: "FAE-R003",
        short: "not an array",
        long: r#"## FAE-R003: not an array

An index, slice, `length` or `append` was applied to a value that is
not an array.
"#,
    },
    ErrorEntry {
        code: "FAE-R004",
        short: "bad array index",
        long: r#"## FAE-R004: bad array index

An array index was negative, fractional, or not less than the array's
length. Slices `a[i..j]` are half-open and accept `j` equal to the
length.
"#,
    },
    ErrorEntry {
        code: "FAE-R005",
        short: "object property error",
        long: r#"## FAE-R005: object property error

A property was read or set that the object does not have, registered
twice in one literal, or accessed on a value that is not an object.
Properties are created by object literals: `{ x: 1, y: 2 }`.
"#,
    },
    ErrorEntry {
        code: "FAE-R006",
        short: "values cannot be compared",
        long: r#"## FAE-R006: values cannot be compared

One side of a comparison was an unassigned value, or two objects were
compared and at least one lacks a `value` property.
"#,
    },
    ErrorEntry {
        code: "FAE-R007",
        short: "invalid operand",
        long: r#"## FAE-R007: invalid operand

An arithmetic operation received a value it cannot use, such as an
object without a `value` property, or a division by zero.
"#,
    },
    ErrorEntry {
        code: "FAE-R008",
        short: "variable read before assignment",
        long: r#"## FAE-R008: variable read before assignment

Declarations reserve a slot for the whole block, but the slot holds
nothing until it is first assigned.

    let total;
    let x = total + 1;     -- FAE-R008
"#,
    },
    ErrorEntry {
        code: "FAE-R009",
        short: "variable changed type",
        long: r#"## FAE-R009: variable changed type

A variable keeps the type of its first value. An empty array literal
`[]` may later hold a typed array and the other way round, and an
object variable accepts objects of derived types.
"#,
    },
    ErrorEntry {
        code: "FAE-R010",
        short: "script error",
        long: r#"## FAE-R010: script error

An `assert(condition, message)` failed, or a host function raised an
error. The message explains the cause.
"#,
    },
];

/// Look up an error entry by code (e.g. `"FAE-C003"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}
