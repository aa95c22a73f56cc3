// String interner: maps free-form upstream strings (statuses, test names,
// problem types) to stable small integers and back. One instance per server
// handle — no global tables.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::InternError;
use crate::types::StrCode;

#[derive(Debug, Default)]
struct Inner {
    codes: HashMap<String, StrCode>,
    strings: Vec<String>,
}

/// Append-only bidirectional string ↔ code table.
///
/// A string always maps to the same code for the lifetime of the table and
/// codes are never reused for a different string. Safe for concurrent
/// interning: two racing `intern` calls on the same new string resolve to a
/// single winner's code.
#[derive(Debug, Default)]
pub struct StringInterner {
    inner: RwLock<Inner>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its stable code. Allocates a fresh code
    /// only for strings never seen by this table.
    pub fn intern(&self, s: &str) -> StrCode {
        {
            let inner = self.inner.read().expect("interner lock poisoned");
            if let Some(&code) = inner.codes.get(s) {
                return code;
            }
        }

        let mut inner = self.inner.write().expect("interner lock poisoned");
        // Double-check: another writer may have interned between the locks.
        if let Some(&code) = inner.codes.get(s) {
            return code;
        }
        let code = StrCode(u32::try_from(inner.strings.len()).expect("interner table overflow"));
        inner.strings.push(s.to_owned());
        inner.codes.insert(s.to_owned(), code);
        code
    }

    /// Look up the code for a string without interning it.
    pub fn lookup(&self, s: &str) -> Option<StrCode> {
        self.inner
            .read()
            .expect("interner lock poisoned")
            .codes
            .get(s)
            .copied()
    }

    /// Resolve a code back to its string. Fails with `UnknownCode` for codes
    /// this table never produced.
    pub fn resolve(&self, code: StrCode) -> Result<String, InternError> {
        self.inner
            .read()
            .expect("interner lock poisoned")
            .strings
            .get(code.0 as usize)
            .cloned()
            .ok_or(InternError::UnknownCode(code.0))
    }

    /// Number of distinct strings interned so far.
    pub fn len(&self) -> usize {
        self.inner.read().expect("interner lock poisoned").strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
