//! Value and variable operations for the bytecode VM.
//!
//! Constants and global names come from the running body; captures come
//! from the running function.

use super::types::{VmError, VmResult};
use super::Vm;

impl Vm {
    pub(super) fn op_push_constant(&mut self, index: u16) -> VmResult<()> {
        let value = self
            .frame()?
            .function
            .body()
            .get_constant(index)
            .cloned()
            .ok_or(VmError::InvalidConstant(index))?;
        self.push(value)
    }

    pub(super) fn op_load_local(&mut self, slot: u8) -> VmResult<()> {
        let value = self
            .frame()?
            .locals
            .get(slot as usize)
            .cloned()
            .ok_or(VmError::InvalidLocal(slot))?;
        self.push(value)
    }

    pub(super) fn op_store_local(&mut self, slot: u8) -> VmResult<()> {
        let value = self.pop()?;
        let local = self
            .frame_mut()?
            .locals
            .get_mut(slot as usize)
            .ok_or(VmError::InvalidLocal(slot))?;
        *local = value;
        Ok(())
    }

    /// Resolve a free name through the function's owning scope
    pub(super) fn op_load_global(&mut self, index: u16) -> VmResult<()> {
        let function = &self.frame()?.function;
        let name = function
            .body()
            .get_name(index)
            .ok_or(VmError::InvalidName(index))?;
        let value = function
            .scope()
            .lookup(name)
            .ok_or_else(|| VmError::UnboundGlobal(name.to_string()))?;
        self.push(value)
    }

    pub(super) fn op_store_global(&mut self, index: u16) -> VmResult<()> {
        let value = self.pop()?;
        let function = &self.frame()?.function;
        let name = function
            .body()
            .get_name(index)
            .ok_or(VmError::InvalidName(index))?;
        function.scope().bind(name, value);
        Ok(())
    }

    pub(super) fn op_load_capture(&mut self, index: u16) -> VmResult<()> {
        let value = self
            .frame()?
            .function
            .capture(index)
            .cloned()
            .ok_or(VmError::InvalidCapture(index))?;
        self.push(value)
    }
}
