//! Function bodies.
//!
//! A body owns its blocks, instructions and values in flat arenas indexed by typed ids. Erasing an
//! instruction leaves an empty slot behind, so ids are never reused and a stale id is detected
//! rather than silently aliasing a newer instruction.

use crate::instruction::{MirInstruction, MirInstructionKind};
use crate::ty::MirType;
use std::collections::HashSet;
use std::fmt::Display;
use tarn_diagnostics::ice;

macro_rules! declare_id {
    ($name:ident, $prefix:expr) => {
        #[cfg_attr(feature = "serde", derive(serde::Serialize))]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

declare_id!(ValueId, "%");
declare_id!(InstId, "inst");
declare_id!(BlockId, "bb");
declare_id!(FunctionId, "fn");
declare_id!(GlobalId, "global");

/// Where a value comes from.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirValueDefinition {
    /// An argument of the given block.
    Argument(BlockId),
    /// The n-th result of an instruction.
    Result(InstId, u32),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct MirValue<'ta> {
    pub ty: MirType<'ta>,
    pub definition: MirValueDefinition,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Default)]
pub struct MirBlock {
    pub arguments: Vec<ValueId>,
    pub instructions: Vec<InstId>,
}

/// A single use of a value: the `index`-th operand of `user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MirUse {
    pub user: InstId,
    pub index: usize,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Default)]
pub struct MirBody<'ta> {
    values: Vec<MirValue<'ta>>,
    instructions: Vec<Option<MirInstruction<'ta>>>,
    blocks: Vec<MirBlock>,
}

impl<'ta> MirBody<'ta> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_block(&self) -> BlockId {
        if self.blocks.is_empty() {
            ice!("function body has no entry block");
        }
        BlockId(0)
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(MirBlock::default());
        BlockId(self.blocks.len() as u32 - 1)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn block(&self, id: BlockId) -> &MirBlock {
        self.blocks
            .get(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown block {}", id))
    }

    fn block_mut(&mut self, id: BlockId) -> &mut MirBlock {
        self.blocks
            .get_mut(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown block {}", id))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn add_block_argument(&mut self, block: BlockId, ty: MirType<'ta>) -> ValueId {
        let index = self.block(block).arguments.len();
        self.insert_block_argument(block, index, ty)
    }

    pub fn insert_block_argument(
        &mut self,
        block: BlockId,
        index: usize,
        ty: MirType<'ta>,
    ) -> ValueId {
        let value = self.new_value(ty, MirValueDefinition::Argument(block));
        self.block_mut(block).arguments.insert(index, value);
        value
    }

    /// Remove a block argument. The argument must not have any uses left.
    pub fn erase_block_argument(&mut self, block: BlockId, index: usize) {
        let value = self.block(block).arguments[index];
        if self.has_uses(value) {
            ice!("erasing block argument {} of {} which still has uses", value, block);
        }
        self.block_mut(block).arguments.remove(index);
    }

    fn new_value(&mut self, ty: MirType<'ta>, definition: MirValueDefinition) -> ValueId {
        self.values.push(MirValue { ty, definition });
        ValueId(self.values.len() as u32 - 1)
    }

    pub fn value(&self, id: ValueId) -> &MirValue<'ta> {
        self.values
            .get(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown value {}", id))
    }

    pub fn value_ty(&self, id: ValueId) -> MirType<'ta> {
        self.value(id).ty
    }

    /// Change the type of a value in place, keeping all of its uses.
    pub fn set_value_type(&mut self, id: ValueId, ty: MirType<'ta>) {
        self.values
            .get_mut(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown value {}", id))
            .ty = ty;
    }

    pub fn defining_instruction(&self, id: ValueId) -> Option<InstId> {
        match self.value(id).definition {
            MirValueDefinition::Result(inst, _) => Some(inst),
            MirValueDefinition::Argument(_) => None,
        }
    }

    /// The kind of the instruction defining the value, if it is an instruction result.
    pub fn defining_kind(&self, id: ValueId) -> Option<&MirInstructionKind<'ta>> {
        self.defining_instruction(id)
            .map(|inst| &self.instruction(inst).kind)
    }

    /// The block a value is defined in.
    pub fn parent_block(&self, id: ValueId) -> BlockId {
        match self.value(id).definition {
            MirValueDefinition::Argument(block) => block,
            MirValueDefinition::Result(inst, _) => self.instruction(inst).block,
        }
    }

    /// The position of a block argument within its block.
    pub fn block_argument_index(&self, id: ValueId) -> Option<usize> {
        let MirValueDefinition::Argument(block) = self.value(id).definition else {
            return None;
        };
        self.block(block).arguments.iter().position(|a| *a == id)
    }

    pub fn is_live(&self, id: InstId) -> bool {
        matches!(self.instructions.get(id.0 as usize), Some(Some(_)))
    }

    pub fn instruction(&self, id: InstId) -> &MirInstruction<'ta> {
        match self.instructions.get(id.0 as usize) {
            Some(Some(inst)) => inst,
            Some(None) => ice!("use of erased instruction {}", id),
            None => ice!("unknown instruction {}", id),
        }
    }

    pub fn instruction_mut(&mut self, id: InstId) -> &mut MirInstruction<'ta> {
        match self.instructions.get_mut(id.0 as usize) {
            Some(Some(inst)) => inst,
            Some(None) => ice!("use of erased instruction {}", id),
            None => ice!("unknown instruction {}", id),
        }
    }

    pub fn kind(&self, id: InstId) -> &MirInstructionKind<'ta> {
        &self.instruction(id).kind
    }

    /// The only result of an instruction.
    pub fn result(&self, id: InstId) -> ValueId {
        match self.instruction(id).results.as_slice() {
            [result] => *result,
            results => ice!(
                "expected {} to have a single result, found {}",
                self.instruction(id).kind.opcode(),
                results.len()
            ),
        }
    }

    pub fn results(&self, id: InstId) -> &[ValueId] {
        &self.instruction(id).results
    }

    /// Insert an instruction at the given position of a block, creating one result value per
    /// result type.
    pub fn insert_instruction(
        &mut self,
        block: BlockId,
        position: usize,
        kind: MirInstructionKind<'ta>,
        result_types: Vec<MirType<'ta>>,
    ) -> InstId {
        let id = InstId(self.instructions.len() as u32);
        let results = result_types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| self.new_value(ty, MirValueDefinition::Result(id, i as u32)))
            .collect();
        self.instructions.push(Some(MirInstruction {
            kind,
            results,
            block,
        }));
        self.block_mut(block).instructions.insert(position, id);
        id
    }

    /// Append an instruction to the end of a block.
    pub fn push_instruction(
        &mut self,
        block: BlockId,
        kind: MirInstructionKind<'ta>,
        result_types: Vec<MirType<'ta>>,
    ) -> InstId {
        let position = self.block(block).instructions.len();
        self.insert_instruction(block, position, kind, result_types)
    }

    /// The index of an instruction within its block.
    pub fn position_in_block(&self, id: InstId) -> usize {
        let block = self.instruction(id).block;
        self.block(block)
            .instructions
            .iter()
            .position(|i| *i == id)
            .unwrap_or_else(|| ice!("instruction {} is not in its block {}", id, block))
    }

    /// Unlink and free an instruction. None of its results may have uses left.
    pub fn erase_instruction(&mut self, id: InstId) {
        for result in self.instruction(id).results.clone() {
            if self.has_uses(result) {
                ice!(
                    "erasing {} whose result {} still has uses",
                    self.instruction(id).kind.opcode(),
                    result
                );
            }
        }
        let position = self.position_in_block(id);
        let block = self.instruction(id).block;
        self.block_mut(block).instructions.remove(position);
        self.instructions[id.0 as usize] = None;
    }

    /// All live instructions in block order.
    pub fn instructions_in_order(&self) -> Vec<InstId> {
        self.blocks
            .iter()
            .flat_map(|b| b.instructions.iter().copied())
            .collect()
    }

    pub fn uses(&self, value: ValueId) -> Vec<MirUse> {
        let mut uses = Vec::new();
        for user in self.instructions_in_order() {
            for (index, operand) in self.kind(user).operands().into_iter().enumerate() {
                if operand == value {
                    uses.push(MirUse { user, index });
                }
            }
        }
        uses
    }

    /// The distinct instructions using a value, in block order.
    pub fn users(&self, value: ValueId) -> Vec<InstId> {
        let mut seen = HashSet::new();
        self.uses(value)
            .into_iter()
            .map(|u| u.user)
            .filter(|u| seen.insert(*u))
            .collect()
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        self.instructions_in_order()
            .into_iter()
            .any(|user| self.kind(user).operands().contains(&value))
    }

    pub fn set_operand(&mut self, site: MirUse, value: ValueId) {
        let mut operands = self.instruction_mut(site.user).kind.operands_mut();
        let Some(operand) = operands.get_mut(site.index) else {
            ice!("operand {} out of range for {}", site.index, site.user);
        };
        **operand = value;
    }

    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        for site in self.uses(old) {
            self.set_operand(site, new);
        }
    }

    /// Replace every use of `old` with `new`, except the uses by `except`.
    pub fn replace_all_uses_except(&mut self, old: ValueId, new: ValueId, except: InstId) {
        for site in self.uses(old) {
            if site.user != except {
                self.set_operand(site, new);
            }
        }
    }

    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.block(block)
            .instructions
            .last()
            .copied()
            .filter(|i| self.kind(*i).is_terminator())
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.kind(t).successors())
            .unwrap_or_default()
    }

    /// All blocks in reverse post-order from the entry block.
    ///
    /// Blocks that are not reachable from the entry block are appended in index order, so that
    /// every block is visited exactly once.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        if self.blocks.is_empty() {
            return vec![];
        }
        let mut visited = HashSet::new();
        let mut post_order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry_block(), 0usize)];
        visited.insert(self.entry_block());
        while let Some((block, next)) = stack.pop() {
            let successors = self.successors(block);
            if let Some(successor) = successors.get(next).copied() {
                stack.push((block, next + 1));
                if visited.insert(successor) {
                    stack.push((successor, 0));
                }
            } else {
                post_order.push(block);
            }
        }
        post_order.reverse();
        for block in self.block_ids() {
            if !visited.contains(&block) {
                post_order.push(block);
            }
        }
        post_order
    }

    /// The terminators that leave the function, in reverse post-order.
    pub fn function_exits(&self) -> Vec<InstId> {
        self.reverse_post_order()
            .into_iter()
            .filter_map(|b| self.terminator(b))
            .filter(|t| self.kind(*t).is_function_exiting())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::body::{BlockId, MirBody, MirUse};
    use crate::instruction::{LoadQualifier, MirInstructionKind};
    use crate::ty::MirType;
    use bumpalo::Bump;
    use tarn_macros::assert_matches;

    #[test]
    fn test_replace_uses_then_erase() {
        let bump = Bump::new();
        let arena = MirArena::new(&bump);
        let i64_ty = arena.get_integer_ty(64);
        let mut body = MirBody::new();
        let entry = body.add_block();
        let address = body.add_block_argument(entry, MirType::address(i64_ty));
        let load = body.push_instruction(
            entry,
            MirInstructionKind::Load {
                address,
                qualifier: LoadQualifier::Trivial,
            },
            vec![MirType::object(i64_ty)],
        );
        let loaded = body.result(load);
        let ret = body.push_instruction(
            entry,
            MirInstructionKind::Return { operand: loaded },
            vec![],
        );
        assert_eq!(body.uses(loaded), vec![MirUse { user: ret, index: 0 }]);
        let literal = body.insert_instruction(
            entry,
            1,
            MirInstructionKind::IntegerLiteral { value: 7 },
            vec![MirType::object(i64_ty)],
        );
        let replacement = body.result(literal);
        body.replace_all_uses_with(loaded, replacement);
        body.erase_instruction(load);
        assert!(!body.is_live(load));
        assert_eq!(body.block(entry).instructions, vec![literal, ret]);
        assert_matches!(body.kind(ret), MirInstructionKind::Return { operand } => {
            assert_eq!(*operand, replacement);
        });
        assert_eq!(body.function_exits(), vec![ret]);
    }

    #[test]
    #[should_panic(expected = "still has uses")]
    fn test_erase_instruction_with_uses() {
        let bump = Bump::new();
        let arena = MirArena::new(&bump);
        let unit = arena.get_empty_tuple_ty();
        let mut body = MirBody::new();
        let entry = body.add_block();
        let tuple = body.push_instruction(
            entry,
            MirInstructionKind::Tuple { elements: vec![] },
            vec![MirType::object(unit)],
        );
        let value = body.result(tuple);
        body.push_instruction(entry, MirInstructionKind::Return { operand: value }, vec![]);
        body.erase_instruction(tuple);
    }

    #[test]
    fn test_reverse_post_order_visits_every_block() {
        let mut body = MirBody::new();
        let entry = body.add_block();
        let left = body.add_block();
        let right = body.add_block();
        let unreachable = body.add_block();
        body.push_instruction(
            entry,
            MirInstructionKind::Branch {
                destination: left,
                arguments: vec![],
            },
            vec![],
        );
        body.push_instruction(
            left,
            MirInstructionKind::Branch {
                destination: right,
                arguments: vec![],
            },
            vec![],
        );
        body.push_instruction(right, MirInstructionKind::Unreachable, vec![]);
        body.push_instruction(unreachable, MirInstructionKind::Unreachable, vec![]);
        assert_eq!(
            body.reverse_post_order(),
            vec![entry, left, right, BlockId(3)]
        );
    }
}
