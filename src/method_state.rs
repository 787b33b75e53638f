use std::collections::HashMap;
use std::fmt;

use crate::class_reader::ExceptionTableEntry;
use crate::error::InstrumentError;
use crate::frame::FrameType;
use crate::insn::LabelNode;
use crate::nodes::TryCatchBlockNode;
use crate::types::JvmType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Closing,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Open => "OPEN",
            Phase::Closing => "CLOSING",
            Phase::Closed => "CLOSED",
        }
    }
}

/// How the frame at a label relates to the simulated state reaching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameMode {
    /// The operand stack is exactly these types.
    Replace(Vec<FrameType>),
    /// These types are pushed on top of the incoming stack.
    Append(Vec<FrameType>),
    /// The incoming stack is kept.
    Same,
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, types) = match self {
            FrameMode::Replace(types) => ("replace", types.as_slice()),
            FrameMode::Append(types) => ("append", types.as_slice()),
            FrameMode::Same => return f.write_str("same"),
        };
        write!(f, "{name} [")?;
        for (i, ty) in types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str("]")
    }
}

/// Slot, handler and frame bookkeeping for one method rewrite.
#[derive(Debug)]
pub struct MethodState {
    phase: Phase,
    next_local: u16,
    handlers: Vec<TryCatchBlockNode>,
    frame_requests: HashMap<LabelNode, FrameMode>,
}

impl MethodState {
    /// `max_locals` of the original method; scratch slots start there.
    pub fn new(max_locals: u16) -> Self {
        Self {
            phase: Phase::Open,
            next_local: max_locals,
            handlers: Vec::new(),
            frame_requests: HashMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// First slot not yet used by the original method or by an allocation.
    pub fn next_local(&self) -> u16 {
        self.next_local
    }

    /// Raises the first scratch slot to at least `max_locals`.
    pub fn reserve_original(&mut self, max_locals: u16) {
        self.next_local = self.next_local.max(max_locals);
    }

    pub fn ensure_open(&self) -> Result<(), InstrumentError> {
        match self.phase {
            Phase::Open => Ok(()),
            phase => Err(InstrumentError::MethodClosed {
                state: phase.as_str(),
            }),
        }
    }

    /// Reserves a fresh slot sized for `ty`. Slots are never handed out twice.
    pub fn allocate(&mut self, ty: &JvmType) -> Result<u16, InstrumentError> {
        self.ensure_open()?;
        if *ty == JvmType::Void {
            return Err(InstrumentError::InvalidType("void has no slot".to_string()));
        }
        let slot = self.next_local;
        self.next_local = slot
            .checked_add(ty.size())
            .ok_or(InstrumentError::TooManyLocals)?;
        Ok(slot)
    }

    pub fn add_handler(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) -> Result<(), InstrumentError> {
        self.ensure_open()?;
        self.handlers.push(TryCatchBlockNode {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        Ok(())
    }

    /// Handlers registered so far, in registration order.
    pub fn handlers(&self) -> &[TryCatchBlockNode] {
        &self.handlers
    }

    /// Records a frame request. Returns `false` when an identical request was
    /// already recorded for `label`.
    pub fn request_frame(&mut self, label: LabelNode, mode: FrameMode) -> Result<bool, InstrumentError> {
        self.ensure_open()?;
        match self.frame_requests.get(&label) {
            Some(existing) if *existing == mode => Ok(false),
            Some(existing) => Err(InstrumentError::FrameConflict {
                label,
                existing: existing.to_string(),
                requested: mode.to_string(),
            }),
            None => {
                self.frame_requests.insert(label, mode);
                Ok(true)
            }
        }
    }

    pub fn begin_close(&mut self) -> Result<(), InstrumentError> {
        self.ensure_open()?;
        self.phase = Phase::Closing;
        Ok(())
    }

    pub fn finish_close(&mut self) {
        self.phase = Phase::Closed;
    }
}

/// Merges injected handler entries into the original exception table.
///
/// Original entries keep their relative order. Each injected entry goes
/// right before the first earlier entry whose range strictly contains it,
/// otherwise at the end. Identical bounds do not count as containment.
pub fn merge_handlers(
    original: Vec<ExceptionTableEntry>,
    injected: Vec<ExceptionTableEntry>,
) -> Vec<ExceptionTableEntry> {
    let mut merged = original;
    for entry in injected {
        let position = merged
            .iter()
            .position(|existing| strictly_contains(existing, &entry))
            .unwrap_or(merged.len());
        merged.insert(position, entry);
    }
    merged
}

fn strictly_contains(outer: &ExceptionTableEntry, inner: &ExceptionTableEntry) -> bool {
    outer.start_pc <= inner.start_pc
        && inner.end_pc <= outer.end_pc
        && (outer.start_pc, outer.end_pc) != (inner.start_pc, inner.end_pc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start_pc: u16, end_pc: u16, handler_pc: u16) -> ExceptionTableEntry {
        ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type: 0,
        }
    }

    #[test]
    fn test_allocations_are_strictly_increasing() {
        let mut state = MethodState::new(2);
        let a = state.allocate(&JvmType::Int).unwrap();
        let b = state.allocate(&JvmType::Long).unwrap();
        let c = state.allocate(&JvmType::object("java/lang/String")).unwrap();
        assert_eq!((a, b, c), (2, 3, 5));
        assert_eq!(state.next_local(), 6);
    }

    #[test]
    fn test_reserve_original_never_lowers() {
        let mut state = MethodState::new(4);
        state.reserve_original(2);
        assert_eq!(state.next_local(), 4);
        state.reserve_original(7);
        assert_eq!(state.allocate(&JvmType::Int).unwrap(), 7);
    }

    #[test]
    fn test_slot_overflow() {
        let mut state = MethodState::new(u16::MAX);
        assert!(matches!(
            state.allocate(&JvmType::Int),
            Err(InstrumentError::TooManyLocals)
        ));
    }

    #[test]
    fn test_frame_conflicts() {
        let mut state = MethodState::new(0);
        let label = LabelNode::at(4);
        assert!(state.request_frame(label, FrameMode::Same).unwrap());
        assert!(!state.request_frame(label, FrameMode::Same).unwrap());
        let err = state
            .request_frame(label, FrameMode::Replace(vec![FrameType::Integer]))
            .unwrap_err();
        match err {
            InstrumentError::FrameConflict {
                label: at,
                existing,
                requested,
            } => {
                assert_eq!(at, label);
                assert_eq!(existing, "same");
                assert_eq!(requested, "replace [int]");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_same_mode_with_other_types_conflicts() {
        let mut state = MethodState::new(0);
        let label = LabelNode::at(0);
        state
            .request_frame(label, FrameMode::Append(vec![FrameType::Integer]))
            .unwrap();
        assert!(
            state
                .request_frame(label, FrameMode::Append(vec![FrameType::Float]))
                .is_err()
        );
    }

    #[test]
    fn test_closed_state_rejects_calls() {
        let mut state = MethodState::new(1);
        state.begin_close().unwrap();
        assert!(matches!(
            state.allocate(&JvmType::Int),
            Err(InstrumentError::MethodClosed { state: "CLOSING" })
        ));
        state.finish_close();
        assert_eq!(state.phase(), Phase::Closed);
        assert!(matches!(
            state.request_frame(LabelNode::at(0), FrameMode::Same),
            Err(InstrumentError::MethodClosed { state: "CLOSED" })
        ));
        assert!(state.begin_close().is_err());
    }

    #[test]
    fn test_nested_range_goes_before_enclosing() {
        let merged = merge_handlers(vec![entry(0, 20, 30)], vec![entry(4, 10, 40)]);
        assert_eq!(merged, vec![entry(4, 10, 40), entry(0, 20, 30)]);
    }

    #[test]
    fn test_unrelated_range_is_appended() {
        let original = vec![entry(0, 4, 30), entry(10, 20, 34)];
        let merged = merge_handlers(original.clone(), vec![entry(4, 8, 40)]);
        assert_eq!(&merged[..2], &original[..]);
        assert_eq!(merged[2], entry(4, 8, 40));
    }

    #[test]
    fn test_enclosing_injected_range_goes_after() {
        let merged = merge_handlers(vec![entry(4, 10, 30)], vec![entry(0, 20, 40)]);
        assert_eq!(merged, vec![entry(4, 10, 30), entry(0, 20, 40)]);
    }

    #[test]
    fn test_identical_bounds_keep_order() {
        let merged = merge_handlers(
            vec![entry(0, 10, 30)],
            vec![entry(0, 10, 40), entry(0, 10, 50)],
        );
        assert_eq!(
            merged,
            vec![entry(0, 10, 30), entry(0, 10, 40), entry(0, 10, 50)]
        );
    }

    #[test]
    fn test_injected_ranges_nest_among_themselves() {
        let merged = merge_handlers(
            vec![entry(0, 30, 60)],
            vec![entry(2, 20, 40), entry(4, 8, 50)],
        );
        assert_eq!(
            merged,
            vec![entry(4, 8, 50), entry(2, 20, 40), entry(0, 30, 60)]
        );
    }
}
