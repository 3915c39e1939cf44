use crate::action::Action;

/// Actions tracked since the last successful flush, with their estimated encoded size.
#[derive(Debug, Default)]
pub(crate) struct ActionBuffer {
    actions: Vec<Action>,
    bytes: usize,
}

impl ActionBuffer {
    pub(crate) fn push(&mut self, action: Action) {
        self.bytes += action.approximate_size();
        self.actions.push(action);
    }

    pub(crate) fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.actions.clear();
        self.bytes = 0;
    }

    /// True once either the byte or the action count limit is reached.
    /// A `max_actions` of zero disables the count limit.
    pub(crate) fn is_full(&self, max_bytes: usize, max_actions: usize) -> bool {
        self.bytes >= max_bytes || (max_actions > 0 && self.actions.len() >= max_actions)
    }
}
