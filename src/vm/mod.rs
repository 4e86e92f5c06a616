//! The execution engine: one instruction per `advance`, cooperative tasks,
//! pooled environments.

pub mod env;
pub mod scheduler;

use crate::bytecode::{BlockId, BlockKind, Callback, Instruction, Program};
use crate::types::TypeRegistry;
use crate::value::Value;

use env::{EnvId, EnvPool};
use scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("length mismatch: {left} elements against {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("attempted to index a non-array value of type {found}")]
    NotAnArray { found: String },
    #[error("array index {index} is negative")]
    NegativeIndex { index: f64 },
    #[error("array index {index} is not a whole number")]
    NonIntegralIndex { index: f64 },
    #[error("array index {index} is out of bounds for length {length}")]
    IndexOutOfBounds { index: f64, length: usize },
    #[error("no property '{name}' on object")]
    PropertyNotFound { name: String },
    #[error("property '{name}' is already registered")]
    PropertyExists { name: String },
    #[error("expected an object, found {found}")]
    NotAnObject { found: String },
    #[error("cannot compare objects without a \"value\" property")]
    ObjectCompare,
    #[error("a null value was compared")]
    NullCompare,
    #[error("{operation} cannot be used with {found}")]
    InvalidOperand { operation: &'static str, found: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("variable '{name}' is used before it is assigned")]
    UninitializedVariable { name: String },
    #[error("no enclosing scope at level {level}")]
    UnresolvedScope { level: usize },
    #[error("cannot change the type of '{name}' from {from} to {to}")]
    TypeChanged { name: String, from: String, to: String },
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("{0}")]
    Raised(String),
}

impl VmError {
    /// Stable code for `--explain`.
    pub fn code(&self) -> &'static str {
        match self {
            VmError::TypeMismatch { .. } => "FAE-R001",
            VmError::LengthMismatch { .. } => "FAE-R002",
            VmError::NotAnArray { .. } => "FAE-R003",
            VmError::NegativeIndex { .. }
            | VmError::NonIntegralIndex { .. }
            | VmError::IndexOutOfBounds { .. } => "FAE-R004",
            VmError::PropertyNotFound { .. }
            | VmError::PropertyExists { .. }
            | VmError::NotAnObject { .. } => "FAE-R005",
            VmError::ObjectCompare | VmError::NullCompare => "FAE-R006",
            VmError::InvalidOperand { .. } | VmError::DivisionByZero => "FAE-R007",
            VmError::UninitializedVariable { .. } | VmError::UnresolvedScope { .. } => "FAE-R008",
            VmError::TypeChanged { .. } => "FAE-R009",
            VmError::Assertion(_) | VmError::Raised(_) => "FAE-R010",
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// A runtime error and the source line of the instruction that raised it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {error}")]
pub struct RuntimeError {
    pub error: VmError,
    pub line: usize,
}

// ── Machine ──────────────────────────────────────────────────────────

pub struct Machine {
    program: Program,
    pool: EnvPool,
    scheduler: Scheduler,
    root: Option<EnvId>,
    finished: bool,
    stopped: bool,
    resuming: bool,
    error: Option<RuntimeError>,
    line: usize,
}

impl Machine {
    pub fn new(program: Program) -> Self {
        Machine {
            program,
            pool: EnvPool::new(),
            scheduler: Scheduler::new(),
            root: None,
            finished: true,
            stopped: false,
            resuming: false,
            error: None,
            line: 0,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.program.types
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// True while a native that stopped the machine is being re-invoked.
    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    pub fn error(&self) -> Option<&RuntimeError> {
        self.error.as_ref()
    }

    pub fn current_line(&self) -> usize {
        self.line
    }

    /// Environments allocated so far, live or pooled.
    pub fn environments_allocated(&self) -> usize {
        self.pool.allocated()
    }

    pub fn environments_live(&self) -> usize {
        self.pool.live()
    }

    pub fn thread_count(&self) -> usize {
        self.scheduler.len()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.program.event(name).is_some()
    }

    /// Value of a top-level variable of the program.
    pub fn global(&self, name: &str) -> Option<Value> {
        let root = self.root?;
        let block = self.program.block(self.program.root);
        let slot = block.variables.iter().position(|v| v == name)?;
        self.pool[root].variables.get(slot).cloned()
    }

    /// Executes the program from the top until it completes, stops or fails.
    /// Does nothing if the program has already been started.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.check_error()?;
        if self.root.is_some() {
            return Ok(());
        }
        let root_block = self.program.root;
        let variables = self.program.block(root_block).variables.len();
        let root = self.pool.acquire(root_block, None, variables, false);
        self.root = Some(root);
        self.scheduler.reset(root);
        self.finished = false;
        self.stopped = false;
        self.resuming = false;
        tracing::debug!(blocks = self.program.blocks.len(), "program started");
        self.drive()
    }

    /// Invokes a declared event with the program's top level as its parent.
    /// Returns `Ok(false)` when no such event exists.
    pub fn call(&mut self, name: &str) -> Result<bool, RuntimeError> {
        let Some(event) = self.program.event(name) else {
            return Ok(false);
        };
        self.run()?;
        if self.stopped {
            tracing::warn!(event = name, "event ignored while the machine is stopped");
            return Ok(false);
        }
        let Some(root) = self.scheduler.get(0) else {
            return Ok(false);
        };
        self.pool[root].ref_count += 1;
        let variables = self.program.block(event).variables.len();
        let env = self.pool.acquire(event, Some(root), variables, false);
        self.scheduler.replace(0, env);
        self.scheduler.focus(0);
        self.finished = false;
        tracing::debug!(event = name, "event called");
        self.drive()?;
        Ok(true)
    }

    /// Continues after `stop()` from the instruction that last ran.
    pub fn resume(&mut self) -> Result<(), RuntimeError> {
        self.check_error()?;
        if !self.stopped {
            return Ok(());
        }
        self.stopped = false;
        self.finished = false;
        self.resuming = self.at_native_call();
        tracing::debug!(line = self.line, "resumed");
        self.drive()
    }

    /// Whether the focused thread is about to re-run a native call.
    fn at_native_call(&self) -> bool {
        let Some(id) = self.scheduler.current() else { return false };
        let env = &self.pool[id];
        match self.program.block(env.block).codes.get(env.ip).map(|c| &c.op) {
            Some(Instruction::Call { block, .. } | Instruction::CallPush { block, .. }) => {
                self.program.block(*block).native.is_some()
            }
            _ => false,
        }
    }

    /// Halts the machine; `resume()` continues it.
    pub fn stop(&mut self) {
        tracing::debug!(line = self.line, "stopped");
        self.finished = true;
        self.stopped = true;
    }

    /// Raises a script error at the current line and halts the machine.
    pub fn raise_error(&mut self, message: impl Into<String>) {
        self.fail(VmError::Raised(message.into()));
    }

    pub(crate) fn fail(&mut self, error: VmError) {
        tracing::debug!(line = self.line, %error, "runtime error");
        if self.error.is_none() {
            self.error = Some(RuntimeError { error, line: self.line });
        }
        self.finished = true;
    }

    fn check_error(&self) -> Result<(), RuntimeError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn drive(&mut self) -> Result<(), RuntimeError> {
        while !self.finished {
            self.advance();
        }
        self.check_error()
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Executes exactly one instruction of the focused thread.
    pub fn advance(&mut self) {
        let Some(id) = self.scheduler.current() else {
            self.finished = true;
            return;
        };
        let (block_id, ip) = {
            let env = &self.pool[id];
            (env.block, env.ip)
        };
        let block = self.program.block(block_id);
        let Some(code) = block.codes.get(ip) else {
            self.complete(id);
            return;
        };
        let op = code.op.clone();
        self.line = code.line;
        tracing::trace!(line = self.line, ip, ?op, "dispatch");
        self.pool[id].ip += 1;

        macro_rules! frame {
            () => {
                self.pool[id]
            };
        }

        match op {
            Instruction::PushVal { value } => frame!().stack.push(value.instantiate()),
            Instruction::Pop => {
                frame!().pop();
            }
            Instruction::Dup => {
                let top = frame!().top().clone();
                frame!().stack.push(top);
            }
            Instruction::Dup2 => {
                let env = &mut frame!();
                let b = env.pop();
                let a = env.pop();
                env.stack.extend([a.clone(), b.clone(), a, b]);
            }
            Instruction::Swap => {
                let env = &mut frame!();
                let b = env.pop();
                let a = env.pop();
                env.stack.push(b);
                env.stack.push(a);
            }
            Instruction::PushVar { level, slot } => self.push_var(id, level, slot, false),
            Instruction::PushVarWritable { level, slot } => self.push_var(id, level, slot, true),
            Instruction::Assign { level, slot } => self.assign(id, level, slot),
            Instruction::AssignWritable => {
                let env = &mut frame!();
                let src = env.pop();
                let dest = env.pop();
                if let Err(error) = self.check_assignable("element", &dest, &src) {
                    self.fail(error);
                    return;
                }
                if !dest.overwrite(&src) {
                    self.fail(VmError::TypeChanged {
                        name: "element".to_string(),
                        from: dest.to_string(),
                        to: src.to_string(),
                    });
                }
            }
            Instruction::CmpEq => self.compare_top(id, |r| r == 0.0),
            Instruction::CmpNe => self.compare_top(id, |r| r != 0.0),
            Instruction::CmpGt => self.compare_top(id, |r| r > 0.0),
            Instruction::CmpGe => self.compare_top(id, |r| r >= 0.0),
            Instruction::CmpLt => self.compare_top(id, |r| r < 0.0),
            Instruction::CmpLe => self.compare_top(id, |r| r <= 0.0),
            Instruction::CaseBegin | Instruction::CaseEnd => {}
            Instruction::CaseIf { skip } => {
                let env = &mut frame!();
                if env.pop().as_bool() {
                    env.ip = skip;
                }
            }
            Instruction::CaseIfNot { skip } => {
                let env = &mut frame!();
                if !env.pop().as_bool() {
                    env.ip = skip;
                }
            }
            Instruction::CaseNext { skip } => frame!().ip = skip,
            Instruction::LoopBack { target } => frame!().ip = target,
            Instruction::LoopCount { exit } => {
                let remaining = frame!().top().as_number();
                if remaining > 0.0 {
                    let next = Value::number(&self.program.types, remaining - 1.0);
                    *frame!().top_mut() = next;
                } else {
                    frame!().ip = exit;
                }
            }
            Instruction::LoopIf { exit } => {
                let env = &mut frame!();
                if !env.pop().as_bool() {
                    env.ip = exit;
                }
            }
            Instruction::LoopAsc { exit } => {
                let env = &mut frame!();
                if env.pop().as_number() <= 0.0 {
                    env.ip = exit;
                }
            }
            Instruction::LoopDesc { exit } => {
                let env = &mut frame!();
                if env.pop().as_number() >= 0.0 {
                    env.ip = exit;
                }
            }
            Instruction::BreakLoop => self.break_loop(id),
            Instruction::BreakRoutine => self.break_routine(id),
            Instruction::Call { block, argc } => self.call_block(id, block, argc, false),
            Instruction::CallPush { block, argc } => self.call_block(id, block, argc, true),
            Instruction::Yield => self.scheduler.yield_focus(),
            Instruction::Exit => self.stop(),
        }
    }

    fn variable_name(&self, env: EnvId, slot: usize) -> String {
        let block = self.program.block(self.pool[env].block);
        block
            .variables
            .get(slot)
            .cloned()
            .unwrap_or_else(|| format!("#{slot}"))
    }

    /// First environment up the parent chain whose block sits at `level`.
    fn resolve(&self, id: EnvId, level: usize) -> Option<EnvId> {
        self.pool
            .ancestry(id)
            .find(|&e| self.program.block(self.pool[e].block).level == level)
    }

    fn push_var(&mut self, id: EnvId, level: usize, slot: usize, writable: bool) {
        let Some(owner) = self.resolve(id, level) else {
            self.fail(VmError::UnresolvedScope { level });
            return;
        };
        let initialized = self.pool[owner]
            .variables
            .get(slot)
            .is_some_and(|v| !v.is_null());
        if !initialized {
            let name = self.variable_name(owner, slot);
            self.fail(VmError::UninitializedVariable { name });
            return;
        }
        let types = &self.program.types;
        let variable = &mut self.pool[owner].variables[slot];
        if writable {
            variable.unique(types);
        }
        let value = variable.clone();
        self.pool[id].stack.push(value);
    }

    /// A slot may not silently change type, except between the void array
    /// and a typed array, or to an object satisfying the old object type.
    /// Only an unassigned slot may take a null.
    fn check_assignable(&self, name: &str, old: &Value, new: &Value) -> VmResult<()> {
        let Some(from) = old.ty() else {
            return Ok(());
        };
        let Some(to) = new.ty() else {
            return Err(VmError::TypeChanged {
                name: name.to_string(),
                from: from.to_string(),
                to: new.to_string(),
            });
        };
        let void = self.program.types.void_array();
        let allowed = from == to
            || (from.is_array() && to.is_array() && (from == void || to == void))
            || (from.is_object() && to.has_polytype(&from));
        if allowed {
            Ok(())
        } else {
            Err(VmError::TypeChanged {
                name: name.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn assign(&mut self, id: EnvId, level: usize, slot: usize) {
        let value = self.pool[id].pop();
        let Some(owner) = self.resolve(id, level) else {
            self.fail(VmError::UnresolvedScope { level });
            return;
        };
        let env = &mut self.pool[owner];
        if env.variables.len() <= slot {
            env.variables.resize(slot + 1, Value::null());
        }
        let old = self.pool[owner].variables[slot].clone();
        if let Err(error) = self.check_assignable(&self.variable_name(owner, slot), &old, &value) {
            self.fail(error);
            return;
        }
        self.pool[owner].variables[slot] = value;
    }

    fn compare_top(&mut self, id: EnvId, test: fn(f64) -> bool) {
        let r = self.pool[id].pop().as_number();
        let result = Value::boolean(&self.program.types, test(r));
        self.pool[id].stack.push(result);
    }

    // ── Control flow ─────────────────────────────────────────────────

    fn block_kind(&self, env: EnvId) -> BlockKind {
        self.program.block(self.pool[env].block).kind
    }

    fn finish_env(&mut self, env: EnvId) {
        let len = self.program.block(self.pool[env].block).len();
        self.pool[env].ip = len;
    }

    /// Unwinds to the innermost loop body and moves its caller past the
    /// loop's closing `LoopBack`.
    fn break_loop(&mut self, id: EnvId) {
        let chain: Vec<EnvId> = self.pool.ancestry(id).collect();
        for env in chain {
            self.finish_env(env);
            if self.block_kind(env) == BlockKind::Loop {
                if let Some(parent) = self.pool[env].parent {
                    let ip = self.pool[parent].ip;
                    let exit = self.program.block(self.pool[parent].block).loop_exit(ip);
                    self.pool[parent].ip = exit;
                }
                return;
            }
        }
    }

    /// Unwinds to the innermost sub, function or task, discarding the loop
    /// state held by the callers of every loop body passed on the way.
    fn break_routine(&mut self, id: EnvId) {
        let chain: Vec<EnvId> = self.pool.ancestry(id).collect();
        for env in chain {
            self.finish_env(env);
            let kind = self.block_kind(env);
            if kind == BlockKind::Loop {
                if let Some(parent) = self.pool[env].parent {
                    self.pool[parent].stack.clear();
                }
            }
            if kind.is_routine() {
                return;
            }
        }
    }

    fn call_block(&mut self, id: EnvId, target: BlockId, argc: usize, push: bool) {
        let (kind, native, variables) = {
            let block = self.program.block(target);
            (block.kind, block.native, block.variables.len())
        };
        let args = self.pool[id].take_args(argc);

        if let Some(callback) = native {
            let result = match callback {
                Callback::Operation(op) => match op(&mut self.program.types, &args) {
                    Ok(v) => v,
                    Err(error) => {
                        self.fail(error);
                        Value::null()
                    }
                },
                Callback::Host(f) => f(self, &args),
            };
            let env = &mut self.pool[id];
            if self.stopped {
                // Re-run this call on resume with the same operands.
                env.ip -= 1;
                env.stack.extend(args);
                return;
            }
            self.resuming = false;
            if push {
                env.stack.push(result);
            }
            return;
        }

        self.pool[id].ref_count += 1;
        if kind == BlockKind::Task {
            let task = self.pool.acquire(target, Some(id), variables, false);
            self.pool[task].stack = args;
            self.scheduler.spawn(task);
            tracing::debug!(task = %self.program.block(target).name, threads = self.scheduler.len(), "task spawned");
        } else {
            let child = self.pool.acquire(target, Some(id), variables, push);
            self.pool[child].stack = args;
            self.scheduler.replace_current(child);
        }
    }

    /// Handles an environment that ran past its last instruction.
    fn complete(&mut self, id: EnvId) {
        let Some(parent) = self.pool[id].parent else {
            self.finished = true;
            return;
        };
        self.scheduler.replace_current(parent);
        let env = &self.pool[id];
        if env.has_result {
            let result = env.variables.first().cloned().unwrap_or_default();
            self.pool[parent].stack.push(result);
        } else if self.block_kind(id) == BlockKind::Task {
            tracing::debug!(task = %self.program.block(env.block).name, "task finished");
            self.scheduler.remove_current();
            self.scheduler.yield_focus();
        }
        self.release_chain(id);
    }

    fn release_chain(&mut self, id: EnvId) {
        let mut next = Some(id);
        while let Some(env) = next {
            let e = &mut self.pool[env];
            e.ref_count -= 1;
            if e.ref_count > 0 {
                break;
            }
            next = e.parent;
            self.pool.release(env);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Block;
    use crate::compiler::compile;
    use crate::host;
    use std::cell::RefCell;

    fn machine(source: &str) -> Machine {
        let program = compile(source, host::NATIVES).unwrap();
        Machine::new(program)
    }

    fn run(source: &str) -> Machine {
        let mut m = machine(source);
        m.run().unwrap();
        m
    }

    fn global(m: &Machine, name: &str) -> Value {
        m.global(name).unwrap_or_else(|| panic!("no global {name}"))
    }

    fn run_err(source: &str) -> RuntimeError {
        let mut m = machine(source);
        m.run().unwrap_err()
    }

    #[test]
    fn loop_count_runs_n_times() {
        let m = run("let x = 0; loop(3) { x += 1; }");
        assert_eq!(global(&m, "x").as_number(), 3.0);
    }

    #[test]
    fn exhausted_loop_lands_one_past_loop_back() {
        let types = TypeRegistry::new();
        let three = Value::number(&types, 3.0);
        let mut body = Block::new("body", 1, BlockKind::Loop);
        body.resolve_jumps().unwrap();
        let mut root = Block::new("main", 0, BlockKind::Normal);
        root.emit(Instruction::PushVal { value: three }, 1);
        root.emit(Instruction::LoopCount { exit: 0 }, 1);
        root.emit(Instruction::Call { block: BlockId(1), argc: 0 }, 1);
        root.emit(Instruction::LoopBack { target: 1 }, 1);
        root.emit(Instruction::Pop, 1);
        root.resolve_jumps().unwrap();
        let program = Program {
            blocks: vec![root, body],
            root: BlockId(0),
            events: Default::default(),
            types,
        };
        let mut m = Machine::new(program);
        let root = m.pool.acquire(BlockId(0), None, 0, false);
        m.root = Some(root);
        m.scheduler.reset(root);
        m.finished = false;

        // Step until the counter is exhausted and LoopCount takes its exit.
        let mut exits = 0;
        while !m.finished {
            let before = m.scheduler.current().map(|e| (e, m.pool[e].ip));
            m.advance();
            if let Some((e, 1)) = before {
                if e == root && m.pool[root].ip == 4 {
                    exits += 1;
                    assert_eq!(m.pool[root].stack.len(), 1, "counter still on the stack");
                }
            }
        }
        assert_eq!(exits, 1);
        assert!(m.pool[root].stack.is_empty());
    }

    #[test]
    fn while_and_for_loops() {
        let m = run(
            "let n = 0; let sum = 0;
             while (n < 5) { n += 1; sum += n; }
             let acc = \"\";
             for (i in 1..4) { acc ~= i; }
             let rev = \"\";
             for reverse (i in 1..4) { rev ~= i; }
             let idx = 0;
             for (i in [10, 20, 30]) { idx += i; }",
        );
        assert_eq!(global(&m, "sum").as_number(), 15.0);
        assert_eq!(global(&m, "acc").to_string(), "123");
        assert_eq!(global(&m, "rev").to_string(), "321");
        assert_eq!(global(&m, "idx").as_number(), 3.0);
    }

    #[test]
    fn if_else_chains_and_short_circuit() {
        let m = run(
            "function grade(n) {
                if (n >= 90) { return \"A\"; }
                else if (n >= 80) { return \"B\"; }
                else { return \"C\"; }
             }
             let a = grade(95); let b = grade(85); let c = grade(10);
             let t = true || missing();
             let f = false && missing();
             function missing() { assert(false, \"evaluated\"); return true; }",
        );
        assert_eq!(global(&m, "a").to_string(), "A");
        assert_eq!(global(&m, "b").to_string(), "B");
        assert_eq!(global(&m, "c").to_string(), "C");
        assert!(global(&m, "t").as_bool());
        assert!(!global(&m, "f").as_bool());
    }

    #[test]
    fn break_leaves_the_innermost_loop() {
        let m = run(
            "let outer = 0; let inner = 0;
             loop(3) {
                outer += 1;
                loop { inner += 1; if (inner % 2 == 0) { break; } }
             }
             let stopped = 0;
             for (i in 0..10) { if (i == 4) { break; } stopped = i; }",
        );
        assert_eq!(global(&m, "outer").as_number(), 3.0);
        assert_eq!(global(&m, "inner").as_number(), 6.0);
        assert_eq!(global(&m, "stopped").as_number(), 3.0);
    }

    #[test]
    fn return_unwinds_loops_inside_functions() {
        let m = run(
            "function find(list, wanted) {
                for (i in list) { if (list[i] == wanted) { return i; } }
                return -1;
             }
             let at = find([4, 5, 6], 6);
             let none = find([4, 5, 6], 9);",
        );
        assert_eq!(global(&m, "at").as_number(), 2.0);
        assert_eq!(global(&m, "none").as_number(), -1.0);
    }

    #[test]
    fn recursion_and_pool_reuse() {
        let mut m = machine(
            "function fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }
             let r = fib(15);",
        );
        m.run().unwrap();
        assert_eq!(global(&m, "r").as_number(), 610.0);
        let after_first = m.environments_allocated();
        assert!(after_first < 100, "allocated {after_first}");
    }

    #[test]
    fn pool_stabilizes_across_repeated_calls() {
        let mut m = machine(
            "let total = 0;
             function inc(n) { return n + 1; }
             @Main { loop(50) { total = inc(total); } }",
        );
        m.call("Main").unwrap();
        let first = m.environments_allocated();
        for _ in 0..20 {
            m.call("Main").unwrap();
        }
        assert_eq!(m.environments_allocated(), first);
        assert_eq!(global(&m, "total").as_number(), 50.0 * 21.0);
        assert_eq!(m.environments_live(), 1);
    }

    #[test]
    fn tasks_interleave_in_round_robin_order() {
        let m = run(
            "let log = \"\";
             task a() { log ~= \"a1 \"; yield; log ~= \"a2 \"; }
             task b() { log ~= \"b1 \"; yield; log ~= \"b2 \"; }
             a(); b();
             loop(4) { yield; }",
        );
        assert_eq!(global(&m, "log").to_string(), "a1 b1 a2 b2 ");
        assert_eq!(m.thread_count(), 1);
    }

    #[test]
    fn task_arguments_are_transferred() {
        let m = run(
            "let seen = 0;
             task add(n, m) { seen = n * 10 + m; }
             add(4, 2);
             yield;",
        );
        assert_eq!(global(&m, "seen").as_number(), 42.0);
    }

    #[test]
    fn tasks_keep_running_across_events() {
        let mut m = machine(
            "let ticks = 0;
             task counter() { loop { ticks += 1; yield; } }
             counter();
             @Main { yield; }",
        );
        m.run().unwrap();
        assert_eq!(global(&m, "ticks").as_number(), 0.0);
        m.call("Main").unwrap();
        m.call("Main").unwrap();
        assert_eq!(global(&m, "ticks").as_number(), 2.0);
    }

    #[test]
    fn uninitialized_variable_is_an_error() {
        let err = run_err("let x; let y = x + 1;");
        assert!(matches!(err.error, VmError::UninitializedVariable { ref name } if name == "x"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn assignment_cannot_change_type() {
        let err = run_err("let x = 1;\nx = \"one\";");
        assert!(matches!(err.error, VmError::TypeChanged { .. }));
        assert_eq!(err.line, 2);

        let m = run("let xs = []; xs = [1, 2]; let ys = [3]; ys = [];");
        assert_eq!(global(&m, "xs").len(), 2);
        assert_eq!(global(&m, "ys").len(), 0);
    }

    #[test]
    fn assigning_a_missing_result_is_an_error() {
        let source = "function f(n) { if (n > 0) { return 1; } }\nlet x = 5;\nx = f(0);\nlet y = x + 1;";
        let mut m = machine(source);
        let err = m.run().unwrap_err();
        assert!(matches!(
            err.error,
            VmError::TypeChanged { ref name, ref to, .. } if name == "x" && to == "(VOID)"
        ));
        assert_eq!(err.line, 3);
        assert_eq!(global(&m, "x").as_number(), 5.0);

        let m = run("function f(n) { if (n > 0) { return 1; } }\nlet x;\nx = f(0);\nx = 2;");
        assert_eq!(global(&m, "x").as_number(), 2.0);
    }

    #[test]
    fn element_write_of_a_missing_result_is_an_error() {
        let source = "function f(n) { if (n > 0) { return 1; } }\nlet xs = [5, 6];\nxs[0] = f(0);\nlet done = 1;";
        let mut m = machine(source);
        let err = m.run().unwrap_err();
        assert!(matches!(
            err.error,
            VmError::TypeChanged { ref name, ref to, .. } if name == "element" && to == "(VOID)"
        ));
        assert_eq!(err.line, 3);
        assert_eq!(global(&m, "xs").to_string(), "[5,6]");
        assert!(global(&m, "done").is_null());
    }

    #[test]
    fn runtime_errors_halt_with_line() {
        let mut m = machine("let a = [1, 2];\nlet b = 0;\nb = a[5];\nb = 9;");
        let err = m.run().unwrap_err();
        assert!(matches!(err.error, VmError::IndexOutOfBounds { .. }));
        assert_eq!(err.line, 3);
        assert_eq!(global(&m, "b").as_number(), 0.0);
        assert!(m.is_finished());
        assert_eq!(m.run().unwrap_err(), err);
    }

    #[test]
    fn array_writes_do_not_alias_copies() {
        let m = run(
            "let a = [1, 2, 3]; let b = a; b[0] = 9;
             let grid = [[1, 2], [3, 4]]; let copy = grid; grid[1][0] = 7;",
        );
        assert_eq!(global(&m, "a").to_string(), "[1,2,3]");
        assert_eq!(global(&m, "b").to_string(), "[9,2,3]");
        assert_eq!(global(&m, "grid").to_string(), "[[1,2],[7,4]]");
        assert_eq!(global(&m, "copy").to_string(), "[[1,2],[3,4]]");
    }

    #[test]
    fn objects_have_reference_semantics() {
        let m = run(
            "type Point;
             let p = Point { x: 1, y: 2 };
             let q = p;
             q.x = 5;
             p.y += 1;
             let sum = p.x + q.y;",
        );
        assert_eq!(global(&m, "sum").as_number(), 8.0);
    }

    #[test]
    fn object_arrays_accept_subtypes() {
        let m = run(
            "type Shape; type Circle : Shape;
             let shapes = [Shape { value: 1 }];
             shapes = append(shapes, Circle { value: 2 });
             let n = length(shapes);",
        );
        assert_eq!(global(&m, "n").as_number(), 2.0);

        let err = run_err(
            "type Shape; type Other;
             let shapes = [Shape { value: 1 }];
             shapes = append(shapes, Other { value: 2 });",
        );
        assert!(matches!(err.error, VmError::TypeMismatch { .. }));
    }

    #[test]
    fn events_switch_selects_matching_branch() {
        let m = run(
            "let picked = \"\";
             function pick(k) {
                let r = \"\";
                events (k) => on (1, 2) { r = \"low\"; } on (3) { r = \"three\"; } else { r = \"other\"; }
                return r;
             }
             picked = pick(2) ~ pick(3) ~ pick(9);",
        );
        assert_eq!(global(&m, "picked").to_string(), "lowthreeother");
    }

    thread_local! {
        static SEEN: RefCell<Vec<f64>> = const { RefCell::new(Vec::new()) };
    }

    fn pausing(machine: &mut Machine, args: &[Value]) -> Value {
        SEEN.with(|s| s.borrow_mut().push(args[0].as_number()));
        if !machine.is_resuming() {
            machine.stop();
            return Value::null();
        }
        let doubled = args[0].as_number() * 2.0;
        Value::number(machine.types(), doubled)
    }

    #[test]
    fn stop_and_resume_reruns_the_native_call_once() {
        let natives = [host::HostNative { name: "pause", arity: 1, func: pausing }];
        let program = compile("let before = 1; let r = pause(21); let after = r + 1;", &natives).unwrap();
        let mut m = Machine::new(program);
        SEEN.with(|s| s.borrow_mut().clear());

        m.run().unwrap();
        assert!(m.is_stopped());
        assert!(m.global("r").is_some_and(|v| v.is_null()));

        m.resume().unwrap();
        assert!(!m.is_stopped());
        assert_eq!(global(&m, "r").as_number(), 42.0);
        assert_eq!(global(&m, "after").as_number(), 43.0);
        SEEN.with(|s| assert_eq!(*s.borrow(), vec![21.0, 21.0]));
    }

    #[test]
    fn exit_stops_and_resume_continues() {
        let mut m = machine("let x = 1; exit; x = 2;");
        m.run().unwrap();
        assert!(m.is_stopped());
        assert_eq!(global(&m, "x").as_number(), 1.0);
        m.resume().unwrap();
        assert!(!m.is_resuming());
        assert_eq!(global(&m, "x").as_number(), 2.0);
    }

    #[test]
    fn raise_error_from_native() {
        fn failing(machine: &mut Machine, _args: &[Value]) -> Value {
            machine.raise_error("host refused");
            Value::null()
        }
        let natives = [host::HostNative { name: "refuse", arity: 0, func: failing }];
        let program = compile("let a = 1;\nrefuse();\na = 2;", &natives).unwrap();
        let mut m = Machine::new(program);
        let err = m.run().unwrap_err();
        assert_eq!(err.error, VmError::Raised("host refused".into()));
        assert_eq!(err.line, 2);
        assert_eq!(global(&m, "a").as_number(), 1.0);
    }

    #[test]
    fn call_missing_event_is_a_no_op() {
        let mut m = machine("let x = 1;");
        assert!(!m.has_event("Main"));
        assert_eq!(m.call("Main"), Ok(false));
        assert!(m.root.is_none());
    }

    #[test]
    fn events_see_globals() {
        let mut m = machine("let count = 0; @Setup { count = 10; } @Main { count += 1; }");
        assert!(m.call("Setup").unwrap());
        assert!(m.call("Main").unwrap());
        assert_eq!(global(&m, "count").as_number(), 11.0);
    }
}
