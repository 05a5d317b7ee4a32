//! The per-session stack of executing units.
//!
//! Every call to [`Session::run`](crate::transaction::Session::run) pushes one
//! frame and pops it again on return. A frame either owns a context (and, for
//! a physical transaction, its [`ResourceHolder`]) or is a participant that
//! joined a context owned further down.
//!
//! REQUIRES_NEW and NOT_SUPPORTED detach the frames beneath them as a
//! [`SuspendedStack`]. The token travels inside the frame that caused the
//! suspension, so unwinding that frame is what reattaches it.

use crate::storage::SavepointId;
use crate::transaction::context::{ContextId, TransactionContext};
use crate::transaction::resource::ResourceHolder;

/// A frame that owns its context.
#[derive(Debug)]
pub(crate) struct OwnedFrame {
    pub(crate) context: TransactionContext,
    /// Set for physical contexts.
    pub(crate) holder: Option<ResourceHolder>,
    /// Set for nested contexts.
    pub(crate) savepoint: Option<SavepointId>,
    /// Frames detached when this one was entered.
    pub(crate) suspended: Option<SuspendedStack>,
}

#[derive(Debug)]
pub(crate) enum Frame {
    /// A unit participating in the context `target`.
    Joined { id: ContextId, target: ContextId },
    Owned(OwnedFrame),
}

impl Frame {
    /// Identity of the frame itself; for owned frames this is the context id.
    pub(crate) fn id(&self) -> ContextId {
        match self {
            Frame::Joined { id, .. } => *id,
            Frame::Owned(owned) => owned.context.id(),
        }
    }
}

/// Frames detached from a stack, restorable verbatim.
#[derive(Debug)]
#[must_use = "a suspended stack must be resumed"]
pub struct SuspendedStack {
    frames: Vec<Frame>,
}

impl SuspendedStack {
    /// Number of frames held.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Ordered frames of one call path, innermost last.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The context the innermost unit runs in.
    ///
    /// For a joined participant this is the context it joined.
    pub fn peek(&self) -> Option<&TransactionContext> {
        match self.frames.last()? {
            Frame::Owned(owned) => Some(&owned.context),
            Frame::Joined { target, .. } => self.context(*target),
        }
    }

    /// Look up an owned context by id.
    pub fn context(&self, id: ContextId) -> Option<&TransactionContext> {
        self.owned().find(|f| f.context.id() == id).map(|f| &f.context)
    }

    /// All owned contexts, outermost first.
    pub fn contexts(&self) -> impl Iterator<Item = &TransactionContext> {
        self.owned().map(|f| &f.context)
    }

    /// Holder of the nearest physical transaction, if the innermost unit runs
    /// inside one.
    pub fn nearest_holder(&self) -> Option<&ResourceHolder> {
        if !self.peek()?.is_transactional() {
            return None;
        }
        self.owned().rev().find_map(|f| f.holder.as_ref())
    }

    pub(crate) fn nearest_holder_mut(&mut self) -> Option<&mut ResourceHolder> {
        if !self.peek()?.is_transactional() {
            return None;
        }
        self.frames.iter_mut().rev().find_map(|frame| match frame {
            Frame::Owned(owned) => owned.holder.as_mut(),
            Frame::Joined { .. } => None,
        })
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Option<&mut TransactionContext> {
        self.frames.iter_mut().find_map(|frame| match frame {
            Frame::Owned(owned) if owned.context.id() == id => Some(&mut owned.context),
            _ => None,
        })
    }

    pub(crate) fn top_id(&self) -> Option<ContextId> {
        self.frames.last().map(Frame::id)
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Detach the whole stack.
    pub(crate) fn suspend(&mut self) -> SuspendedStack {
        self.suspend_from(0)
    }

    /// Detach every frame at or above `depth`.
    pub(crate) fn suspend_from(&mut self, depth: usize) -> SuspendedStack {
        let depth = depth.min(self.frames.len());
        SuspendedStack {
            frames: self.frames.split_off(depth),
        }
    }

    /// Reattach frames detached by [`suspend`](Self::suspend).
    pub(crate) fn resume(&mut self, suspended: SuspendedStack) {
        self.frames.extend(suspended.frames);
    }

    fn owned(&self) -> impl DoubleEndedIterator<Item = &OwnedFrame> {
        self.frames.iter().filter_map(|frame| match frame {
            Frame::Owned(owned) => Some(owned),
            Frame::Joined { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::context::ContextKind;
    use crate::transaction::isolation::IsolationLevel;

    fn owned(kind: ContextKind) -> Frame {
        Frame::Owned(OwnedFrame {
            context: TransactionContext::new(kind, IsolationLevel::ReadCommitted, false, None, None),
            holder: None,
            savepoint: None,
            suspended: None,
        })
    }

    #[test]
    fn test_push_pop_peek() {
        let mut stack = ContextStack::new();
        assert!(stack.peek().is_none());

        let frame = owned(ContextKind::Physical);
        let id = frame.id();
        stack.push(frame);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.peek().unwrap().id(), id);

        assert_eq!(stack.pop().unwrap().id(), id);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_joined_frame_peeks_at_target() {
        let mut stack = ContextStack::new();
        let frame = owned(ContextKind::Physical);
        let target = frame.id();
        stack.push(frame);
        stack.push(Frame::Joined {
            id: ContextId::new(),
            target,
        });

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.peek().unwrap().id(), target);
        assert_eq!(stack.contexts().count(), 1);
        assert_ne!(stack.top_id(), Some(target));
    }

    #[test]
    fn test_suspend_and_resume_restore_verbatim() {
        let mut stack = ContextStack::new();
        stack.push(owned(ContextKind::Physical));
        stack.push(owned(ContextKind::Nested));
        let before: Vec<_> = stack.contexts().map(|c| c.id()).collect();

        let token = stack.suspend();
        assert_eq!(token.len(), 2);
        assert!(stack.is_empty());

        stack.push(owned(ContextKind::None));
        stack.pop();
        stack.resume(token);

        let after: Vec<_> = stack.contexts().map(|c| c.id()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_suspend_from_takes_suffix() {
        let mut stack = ContextStack::new();
        stack.push(owned(ContextKind::Physical));
        stack.push(owned(ContextKind::Nested));
        let token = stack.suspend_from(1);
        assert_eq!(token.len(), 1);
        assert_eq!(stack.depth(), 1);
        assert!(stack.suspend_from(5).is_empty());
        stack.resume(token);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_no_holder_outside_transaction() {
        let mut stack = ContextStack::new();
        stack.push(owned(ContextKind::None));
        assert!(stack.nearest_holder().is_none());
        assert!(stack.nearest_holder_mut().is_none());
    }

    #[test]
    fn test_context_mut_marks_rollback_only() {
        let mut stack = ContextStack::new();
        let frame = owned(ContextKind::Physical);
        let id = frame.id();
        stack.push(frame);
        assert!(stack.context_mut(id).unwrap().mark_rollback_only());
        assert!(stack.peek().unwrap().is_rollback_only());
        assert!(stack.context_mut(ContextId::new()).is_none());
    }
}
