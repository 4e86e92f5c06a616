use std::ops::{Index, IndexMut};

use crate::bytecode::BlockId;
use crate::value::Value;

/// Generation-checked handle into an [`EnvPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvId {
    index: u32,
    generation: u32,
}

/// One activation of a block.
#[derive(Debug)]
pub struct Environment {
    pub parent: Option<EnvId>,
    /// 1 for the thread slot or executing parent holding it, plus 1 per
    /// live child spawned from it.
    pub ref_count: usize,
    pub block: BlockId,
    pub ip: usize,
    pub variables: Vec<Value>,
    pub stack: Vec<Value>,
    pub has_result: bool,
}

impl Environment {
    fn empty() -> Self {
        Environment {
            parent: None,
            ref_count: 0,
            block: BlockId(0),
            ip: 0,
            variables: Vec::new(),
            stack: Vec::new(),
            has_result: false,
        }
    }

    pub fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(v) => v,
            None => panic!("operand stack underflow in block {:?} at {}", self.block, self.ip),
        }
    }

    pub fn top(&self) -> &Value {
        match self.stack.last() {
            Some(v) => v,
            None => panic!("operand stack underflow in block {:?} at {}", self.block, self.ip),
        }
    }

    pub fn top_mut(&mut self) -> &mut Value {
        let (block, ip) = (self.block, self.ip);
        match self.stack.last_mut() {
            Some(v) => v,
            None => panic!("operand stack underflow in block {block:?} at {ip}"),
        }
    }

    /// Removes the top `count` values, oldest first.
    pub fn take_args(&mut self, count: usize) -> Vec<Value> {
        assert!(
            count <= self.stack.len(),
            "operand stack underflow in block {:?} at {}",
            self.block,
            self.ip
        );
        self.stack.split_off(self.stack.len() - count)
    }
}

struct Slot {
    generation: u32,
    live: bool,
    env: Environment,
}

/// Slot arena of environments. Released slots go on a free-index stack and
/// keep their buffers, so steady-state calls allocate nothing.
#[derive(Default)]
pub struct EnvPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EnvPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(
        &mut self,
        block: BlockId,
        parent: Option<EnvId>,
        variable_count: usize,
        has_result: bool,
    ) -> EnvId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot { generation: 0, live: false, env: Environment::empty() });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.live = true;
        let env = &mut slot.env;
        env.parent = parent;
        env.ref_count = 1;
        env.block = block;
        env.ip = 0;
        env.variables.clear();
        env.variables.resize(variable_count, Value::null());
        env.stack.clear();
        env.has_result = has_result;
        EnvId { index, generation: slot.generation }
    }

    pub fn release(&mut self, id: EnvId) {
        let slot = &mut self.slots[id.index as usize];
        assert!(slot.live && slot.generation == id.generation, "double release of {id:?}");
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.env.variables.clear();
        slot.env.stack.clear();
        slot.env.parent = None;
        self.free.push(id.index);
    }

    pub fn contains(&self, id: EnvId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|s| s.live && s.generation == id.generation)
    }

    /// Environments ever allocated, live or pooled.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Parent chain starting at `id`, `id` included.
    pub fn ancestry(&self, id: EnvId) -> impl Iterator<Item = EnvId> + '_ {
        std::iter::successors(Some(id), move |&e| self[e].parent)
    }
}

impl Index<EnvId> for EnvPool {
    type Output = Environment;

    fn index(&self, id: EnvId) -> &Environment {
        let slot = &self.slots[id.index as usize];
        assert!(slot.live && slot.generation == id.generation, "stale environment handle {id:?}");
        &slot.env
    }
}

impl IndexMut<EnvId> for EnvPool {
    fn index_mut(&mut self, id: EnvId) -> &mut Environment {
        let slot = &mut self.slots[id.index as usize];
        assert!(slot.live && slot.generation == id.generation, "stale environment handle {id:?}");
        &mut slot.env
    }
}
