use std::collections::HashMap;

use serde::Serialize;

use crate::ops::OpFn;
use crate::types::TypeRegistry;
use crate::value::Value;
use crate::vm::Machine;

/// Host callback ABI. The argument slice is only valid for the call.
pub type NativeFn = fn(&mut Machine, &[Value]) -> Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Normal,
    Loop,
    Sub,
    Function,
    Task,
}

impl BlockKind {
    /// Sub, function and task blocks bound a `return`.
    pub fn is_routine(self) -> bool {
        matches!(self, BlockKind::Sub | BlockKind::Function | BlockKind::Task)
    }
}

#[derive(Clone, Copy)]
pub enum Callback {
    Operation(OpFn),
    Host(NativeFn),
}

// ── Instructions ─────────────────────────────────────────────────────
//
// Forward targets (`skip`, `exit`) are absolute indices within the block,
// filled in by `Block::resolve_jumps` once the block is complete.

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    PushVal { value: Value },
    Pop,
    Dup,
    Dup2,
    Swap,
    PushVar { level: usize, slot: usize },
    PushVarWritable { level: usize, slot: usize },
    Assign { level: usize, slot: usize },
    AssignWritable,
    CmpEq,
    CmpNe,
    CmpGt,
    CmpGe,
    CmpLt,
    CmpLe,
    CaseBegin,
    /// Pops a boolean; skips when it is true.
    CaseIf { skip: usize },
    /// Pops a boolean; skips when it is false.
    CaseIfNot { skip: usize },
    /// End of a taken branch: skips past the matching `CaseEnd`.
    CaseNext { skip: usize },
    CaseEnd,
    LoopBack { target: usize },
    LoopCount { exit: usize },
    LoopIf { exit: usize },
    LoopAsc { exit: usize },
    LoopDesc { exit: usize },
    BreakLoop,
    BreakRoutine,
    Call { block: BlockId, argc: usize },
    CallPush { block: BlockId, argc: usize },
    Yield,
    Exit,
}

#[derive(Debug, Clone, Serialize)]
pub struct Code {
    #[serde(flatten)]
    pub op: Instruction,
    pub line: usize,
}

impl Code {
    pub fn new(op: Instruction, line: usize) -> Self {
        Code { op, line }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("case marker at {index} has no matching end")]
    UnmatchedCase { index: usize },
    #[error("loop test at {index} has no closing loop-back")]
    UnclosedLoop { index: usize },
}

// ── Blocks ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct Block {
    pub name: String,
    pub level: usize,
    pub kind: BlockKind,
    pub argument_count: usize,
    /// Slot names, for diagnostics. Function blocks keep `result` in slot 0.
    pub variables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "native_flag")]
    pub native: Option<Callback>,
    pub codes: Vec<Code>,
    /// `loop_exits[i]`: index just past the first `LoopBack` at or after `i`.
    #[serde(skip)]
    loop_exits: Vec<usize>,
}

fn native_flag<S: serde::Serializer>(_: &Option<Callback>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(true)
}

impl Block {
    pub fn new(name: impl Into<String>, level: usize, kind: BlockKind) -> Self {
        Block {
            name: name.into(),
            level,
            kind,
            argument_count: 0,
            variables: Vec::new(),
            native: None,
            codes: Vec::new(),
            loop_exits: Vec::new(),
        }
    }

    pub fn native(name: impl Into<String>, argument_count: usize, callback: Callback) -> Self {
        let mut block = Block::new(name, 0, BlockKind::Function);
        block.argument_count = argument_count;
        block.native = Some(callback);
        block
    }

    pub fn emit(&mut self, op: Instruction, line: usize) -> usize {
        self.codes.push(Code::new(op, line));
        self.codes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Where a `BreakLoop` sends the environment that called the loop body,
    /// given that environment's current instruction pointer.
    pub fn loop_exit(&self, ip: usize) -> usize {
        self.loop_exits.get(ip).copied().unwrap_or(self.codes.len())
    }

    /// Fills every forward target in one pass over the finished block.
    ///
    /// Case tests skip to just past the next `CaseNext` at their own nesting
    /// depth, or past the closing `CaseEnd`; a `CaseNext` always skips past the
    /// closing `CaseEnd`. Loop tests exit just past the `LoopBack` that closes
    /// them.
    pub fn resolve_jumps(&mut self) -> Result<(), ResolveError> {
        let len = self.codes.len();
        let mut exits = vec![len; len + 1];
        let mut next_exit = len;
        for i in (0..len).rev() {
            if matches!(self.codes[i].op, Instruction::LoopBack { .. }) {
                next_exit = i + 1;
            }
            exits[i] = next_exit;
        }

        for i in 0..len {
            let resolved = match self.codes[i].op {
                Instruction::CaseIf { .. } | Instruction::CaseIfNot { .. } => {
                    Some(self.scan_case(i, true).ok_or(ResolveError::UnmatchedCase { index: i })?)
                }
                Instruction::CaseNext { .. } => {
                    Some(self.scan_case(i, false).ok_or(ResolveError::UnmatchedCase { index: i })?)
                }
                Instruction::LoopCount { .. }
                | Instruction::LoopIf { .. }
                | Instruction::LoopAsc { .. }
                | Instruction::LoopDesc { .. } => {
                    let exit = exits[i + 1];
                    let closes = exit > i + 1
                        && matches!(self.codes[exit - 1].op, Instruction::LoopBack { target } if target <= i);
                    if !closes {
                        return Err(ResolveError::UnclosedLoop { index: i });
                    }
                    Some(exit)
                }
                _ => None,
            };
            if let Some(target) = resolved {
                match &mut self.codes[i].op {
                    Instruction::CaseIf { skip }
                    | Instruction::CaseIfNot { skip }
                    | Instruction::CaseNext { skip } => *skip = target,
                    Instruction::LoopCount { exit }
                    | Instruction::LoopIf { exit }
                    | Instruction::LoopAsc { exit }
                    | Instruction::LoopDesc { exit } => *exit = target,
                    _ => {}
                }
            }
        }
        self.loop_exits = exits;
        Ok(())
    }

    fn scan_case(&self, from: usize, stop_at_next: bool) -> Option<usize> {
        let mut depth = 0usize;
        for (i, code) in self.codes.iter().enumerate().skip(from + 1) {
            match code.op {
                Instruction::CaseBegin => depth += 1,
                Instruction::CaseEnd if depth == 0 => return Some(i + 1),
                Instruction::CaseEnd => depth -= 1,
                Instruction::CaseNext { .. } if depth == 0 && stop_at_next => return Some(i + 1),
                _ => {}
            }
        }
        None
    }
}

// ── Program ──────────────────────────────────────────────────────────

/// A compiled program: the block arena, its entry block, declared events
/// and the types the compiler interned.
#[derive(Serialize)]
pub struct Program {
    pub blocks: Vec<Block>,
    pub root: BlockId,
    pub events: HashMap<String, BlockId>,
    #[serde(skip)]
    pub types: TypeRegistry,
}

impl Program {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn event(&self, name: &str) -> Option<BlockId> {
        self.events.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_of(ops: Vec<Instruction>) -> Block {
        let mut block = Block::new("test", 0, BlockKind::Normal);
        for op in ops {
            block.emit(op, 1);
        }
        block
    }

    fn skip_of(block: &Block, i: usize) -> usize {
        match block.codes[i].op {
            Instruction::CaseIf { skip } | Instruction::CaseIfNot { skip } | Instruction::CaseNext { skip } => skip,
            Instruction::LoopCount { exit }
            | Instruction::LoopIf { exit }
            | Instruction::LoopAsc { exit }
            | Instruction::LoopDesc { exit } => exit,
            _ => panic!("no target at {i}"),
        }
    }

    #[test]
    fn if_else_chain_targets() {
        use Instruction::*;
        // 0 begin, 1 if_not, 2 pop, 3 next, 4 if_not, 5 pop, 6 next, 7 pop, 8 end
        let mut block = block_of(vec![
            CaseBegin,
            CaseIfNot { skip: 0 },
            Pop,
            CaseNext { skip: 0 },
            CaseIfNot { skip: 0 },
            Pop,
            CaseNext { skip: 0 },
            Pop,
            CaseEnd,
        ]);
        block.resolve_jumps().unwrap();
        assert_eq!(skip_of(&block, 1), 4);
        assert_eq!(skip_of(&block, 3), 9);
        assert_eq!(skip_of(&block, 4), 7);
        assert_eq!(skip_of(&block, 6), 9);
    }

    #[test]
    fn nested_cases_are_skipped_whole() {
        use Instruction::*;
        let mut block = block_of(vec![
            CaseBegin,
            CaseIf { skip: 0 },
            CaseBegin,
            CaseIfNot { skip: 0 },
            CaseNext { skip: 0 },
            CaseEnd,
            CaseEnd,
        ]);
        block.resolve_jumps().unwrap();
        assert_eq!(skip_of(&block, 1), 7);
        assert_eq!(skip_of(&block, 3), 5);
        assert_eq!(skip_of(&block, 4), 6);
    }

    #[test]
    fn loop_tests_exit_past_their_loop_back() {
        use Instruction::*;
        let mut block = block_of(vec![
            PushVal { value: Value::null() },
            LoopCount { exit: 0 },
            Pop,
            LoopBack { target: 1 },
            Pop,
        ]);
        block.resolve_jumps().unwrap();
        assert_eq!(skip_of(&block, 1), 4);
        assert_eq!(block.loop_exit(2), 4);
        assert_eq!(block.loop_exit(4), 5);
    }

    #[test]
    fn unbalanced_markers_are_rejected() {
        use Instruction::*;
        let mut block = block_of(vec![CaseBegin, CaseIfNot { skip: 0 }, Pop]);
        assert_eq!(block.resolve_jumps(), Err(ResolveError::UnmatchedCase { index: 1 }));

        let mut block = block_of(vec![LoopIf { exit: 0 }, Pop]);
        assert_eq!(block.resolve_jumps(), Err(ResolveError::UnclosedLoop { index: 0 }));
    }
}
