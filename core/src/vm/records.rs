use crate::value::Value;

/// Bookkeeping for one interpreted call.
#[derive(Debug, Clone)]
pub(crate) struct CallRecord {
    pub(crate) return_to: usize,
    pub(crate) scope_depth: usize,
    pub(crate) entity_depth: usize,
    pub(crate) chain_depth: usize,
    /// Register contents of the caller, restored once the callee's result
    /// has been pushed.
    pub(crate) saved_register: Option<Value>,
    /// Set for nested invocations: returning leaves the nested run loop
    /// instead of jumping back.
    pub(crate) return_on_exit: bool,
}

/// An entity whose body is currently executing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityFrame {
    pub(crate) tag: u32,
    pub(crate) begin: usize,
    pub(crate) has_scope: bool,
    pub(crate) chain: Option<usize>,
    pub(crate) repeat: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ChainFrame {
    pub(crate) begin: usize,
    pub(crate) end: usize,
}
