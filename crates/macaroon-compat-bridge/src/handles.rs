use std::fmt;
use std::sync::Mutex;

/// Name of a value living in a remote runtime's namespace.
///
/// The host never sees the value, only this name; it is spliced into later
/// expressions to address the remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolicHandle(String);

impl SymbolicHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SymbolicHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hands out `<prefix><n>` names from one counter.
///
/// One allocator belongs to one remote namespace (one Evaluator); every
/// adapter addressing that namespace draws from it. Names are never reused.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: Mutex<u64>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics if `prefix` is empty or ends in an ASCII digit: such a prefix
    /// could collide with another prefix's numbered names.
    pub fn new_handle(&self, prefix: &str) -> SymbolicHandle {
        assert!(
            prefix.chars().last().is_some_and(|c| !c.is_ascii_digit()),
            "handle prefix {prefix:?} must be non-empty and must not end in a digit"
        );
        let n = {
            let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
            let n = *next;
            *next += 1;
            n
        };
        SymbolicHandle(format!("{prefix}{n}"))
    }

    pub fn issued(&self) -> u64 {
        *self.next.lock().unwrap_or_else(|e| e.into_inner())
    }
}
