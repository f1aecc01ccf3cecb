//! An ordered BSON document: a mapping from UTF-8 field names to [`Bson`] values that preserves
//! insertion order, as required by the wire format (fields are written in order and read back in
//! the same order).

use std::{fmt, iter::FromIterator};

use super::Bson;

#[derive(Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Bson)>,
}

impl Document {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Inserts `key: value`, preserving `key`'s existing position if it was already present
    /// (matching how documents are typically rebuilt by merging in fields).
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        let key = key.into();
        let value = value.into();
        if let Some(pos) = self.position(&key) {
            Some(std::mem::replace(&mut self.entries[pos].1, value))
        } else {
            self.entries.push((key, value));
            None
        }
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        let pos = self.position(key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key)? {
            Bson::Int32(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Bson::Int64(i) => Some(*i),
            Bson::Int32(i) => Some(*i as i64),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        match self.get(key)? {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn get_array(&self, key: &str) -> Option<&[Bson]> {
        match self.get(key)? {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(k, v)| (k, v))).finish()
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = std::vec::IntoIter<(String, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Bson);
    type IntoIter = std::iter::Map<std::slice::Iter<'a, (String, Bson)>, fn(&'a (String, Bson)) -> (&'a String, &'a Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(String, Bson)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Bson)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl Extend<(String, Bson)> for Document {
    fn extend<T: IntoIterator<Item = (String, Bson)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

/// Builds a [`Document`] with the same ergonomics as the `doc!` macro the `bson` crate exposes,
/// e.g. `doc! { "find": "coll", "filter": doc! { "x": 1 } }`.
#[macro_export]
macro_rules! doc {
    () => {
        $crate::bson::document::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut doc = $crate::bson::document::Document::new();
        $(doc.insert($key, $value);)+
        doc
    }};
    ($($key:literal : $value:expr),+ $(,)?) => {{
        let mut doc = $crate::bson::document::Document::new();
        $(doc.insert($key, $value);)+
        doc
    }};
}
