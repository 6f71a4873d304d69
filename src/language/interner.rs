use std::collections::HashMap;

/// Interned handle for a source identifier or string literal. Ids are stable
/// for the lifetime of the compilation unit and never reused within one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StringId(u32);

impl StringId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Deduplicating string pool. There is no removal: the interner lives exactly
/// as long as the compilation session that filled it.
#[derive(Default)]
pub struct StringInterner {
    ids: HashMap<String, StringId>,
    strings: Vec<String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing id when `text` was interned before, otherwise
    /// allocates the next id.
    pub fn intern(&mut self, text: &str) -> StringId {
        if let Some(&id) = self.ids.get(text) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.ids.insert(text.to_owned(), id);
        self.strings.push(text.to_owned());
        id
    }

    /// Total over every id this interner ever returned. Passing an id from a
    /// different interner is a programmer error and panics.
    pub fn lookup(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
