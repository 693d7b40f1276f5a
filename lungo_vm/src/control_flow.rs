//! Basic-block discovery over decoded source bytecode.
//!
//! The scanner makes a single pass over a method's instructions, splitting an
//! initial whole-method block at every branch target and at the successor of
//! every control-transfer instruction. Blocks live in an arena indexed by
//! [`BlockId`]; the start-offset map and the ordered block list both carry
//! ids, so a split is visible to every holder at once.

use crate::Error::{InternalError, MalformedBytecode};
use crate::Result;
use crate::bytecode::Instruction;
use ahash::{AHashMap, AHashSet};

/// Arena index of a basic block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct BlockId(pub(crate) u32);

/// A half-open range `[start, end)` of source bytecode offsets with a single
/// entry and no internal branch targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BasicBlock {
    pub start: u16,
    pub end: u16,
}

/// The discovered block structure of one method.
#[derive(Debug)]
pub(crate) struct ControlFlow {
    blocks: Vec<BasicBlock>,
    order: Vec<BlockId>,
    map: AHashMap<u16, BlockId>,
}

impl ControlFlow {
    /// Scan decoded instructions and discover the basic block boundaries.
    ///
    /// # Errors
    ///
    /// [`MalformedBytecode`] if a branch or switch target does not land on an
    /// instruction boundary inside the method.
    pub(crate) fn scan(instructions: &[(u16, Instruction)], code_length: u16) -> Result<Self> {
        let mut control_flow = ControlFlow::new(code_length);
        let boundaries = instructions
            .iter()
            .map(|(offset, _)| *offset)
            .collect::<AHashSet<_>>();

        for (index, (offset, instruction)) in instructions.iter().enumerate() {
            let successor = instructions
                .get(index + 1)
                .map_or(code_length, |(next_offset, _)| *next_offset);
            match instruction {
                Instruction::Ifeq(target)
                | Instruction::Ifne(target)
                | Instruction::Iflt(target)
                | Instruction::Ifge(target)
                | Instruction::Ifgt(target)
                | Instruction::Ifle(target)
                | Instruction::If_icmpeq(target)
                | Instruction::If_icmpne(target)
                | Instruction::If_icmplt(target)
                | Instruction::If_icmpge(target)
                | Instruction::If_icmpgt(target)
                | Instruction::If_icmple(target)
                | Instruction::If_acmpeq(target)
                | Instruction::If_acmpne(target)
                | Instruction::Ifnull(target)
                | Instruction::Ifnonnull(target)
                | Instruction::Goto(target) => {
                    control_flow.split_target(&boundaries, *offset, *target)?;
                    control_flow.split_successor(successor);
                }
                Instruction::Tableswitch(table_switch) => {
                    control_flow.split_target(&boundaries, *offset, table_switch.default)?;
                    for target in &table_switch.offsets {
                        control_flow.split_target(&boundaries, *offset, *target)?;
                    }
                    control_flow.split_successor(successor);
                }
                Instruction::Lookupswitch(lookup_switch) => {
                    control_flow.split_target(&boundaries, *offset, lookup_switch.default)?;
                    for target in lookup_switch.pairs.values() {
                        control_flow.split_target(&boundaries, *offset, *target)?;
                    }
                    control_flow.split_successor(successor);
                }
                Instruction::Ireturn
                | Instruction::Lreturn
                | Instruction::Freturn
                | Instruction::Dreturn
                | Instruction::Areturn
                | Instruction::Return
                | Instruction::Athrow => {
                    control_flow.split_successor(successor);
                }
                _ => {}
            }
        }
        Ok(control_flow)
    }

    fn new(code_length: u16) -> Self {
        let entry = BlockId(0);
        let mut map = AHashMap::default();
        map.insert(0, entry);
        ControlFlow {
            blocks: vec![BasicBlock {
                start: 0,
                end: code_length,
            }],
            order: vec![entry],
            map,
        }
    }

    fn split_target(
        &mut self,
        boundaries: &AHashSet<u16>,
        offset: u16,
        target: u16,
    ) -> Result<()> {
        if !boundaries.contains(&target) {
            return Err(MalformedBytecode(format!(
                "branch at offset {offset} targets {target}, which is not an instruction boundary"
            )));
        }
        self.split_at(target);
        Ok(())
    }

    fn split_successor(&mut self, successor: u16) {
        if successor < self.code_length() {
            self.split_at(successor);
        }
    }

    /// Split the block containing `offset` so that a block starts at
    /// `offset`. Splitting at an existing boundary is a no-op.
    fn split_at(&mut self, offset: u16) {
        if self.map.contains_key(&offset) {
            return;
        }
        // The ordered list is sorted by start offset; the containing block is
        // the last block starting at or before the offset.
        let position = self
            .order
            .partition_point(|id| self.block(*id).start <= offset);
        let index = position.saturating_sub(1);
        let containing = self.order[index];
        let end = self.block(containing).end;
        self.blocks[containing.0 as usize].end = offset;

        let new_id = BlockId(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        self.blocks.push(BasicBlock { start: offset, end });
        self.order.insert(index + 1, new_id);
        self.map.insert(offset, new_id);
    }

    /// The block for an id.
    pub(crate) fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    /// Block ids in source order.
    pub(crate) fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// The block starting at the given offset.
    ///
    /// # Errors
    ///
    /// if no block starts at the offset; every scanned branch target has one.
    pub(crate) fn block_at(&self, offset: u16) -> Result<BlockId> {
        self.map
            .get(&offset)
            .copied()
            .ok_or_else(|| InternalError(format!("no basic block starts at offset {offset}")))
    }

    /// The number of blocks.
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    fn code_length(&self) -> u16 {
        self.order
            .last()
            .map_or(0, |last| self.block(*last).end)
    }
}
