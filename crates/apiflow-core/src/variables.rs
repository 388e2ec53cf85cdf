//! String-keyed workflow variables and `${name}` placeholder substitution.

use std::collections::HashMap;

/// Variables shared between the steps of a workflow run.
///
/// Seeded by the caller, extended with the values each completed step
/// extracts from its response, and substituted into request templates.
///
/// # Examples
///
/// ```
/// use apiflow_core::Variables;
///
/// let mut vars = Variables::new();
/// vars.insert("uid", "42");
///
/// assert_eq!(vars.get("uid"), Some("42"));
/// assert_eq!(vars.substitute("/users/${uid}/${unknown}"), "/users/42/${unknown}");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    /// Creates an empty variable set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Returns the value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Removes a value and returns it.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    /// Returns `true` if `name` is set.
    pub fn contains_key(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns an iterator over all variable names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns an iterator over all name/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no variables are set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the underlying map.
    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Replaces every `${name}` whose name is set.
    ///
    /// Substitution is a single left-to-right pass: inserted values are not
    /// expanded again, and placeholders for unknown names are kept verbatim.
    pub fn substitute(&self, text: &str) -> String {
        if self.values.is_empty() || !text.contains("${") {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.values.get(name) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&rest[start..start + 2 + end + 1]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Variables {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Self::new();
        vars.extend(iter);
        vars
    }
}

impl From<HashMap<String, String>> for Variables {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl From<Variables> for HashMap<String, String> {
    fn from(vars: Variables) -> Self {
        vars.values
    }
}
