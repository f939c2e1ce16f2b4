// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Mutex;

/// Named values substituted into connections strings before parsing.
///
/// Variable names match case-insensitively. Expansion replaces every
/// `$name$` occurrence in a single left-to-right pass; names without a
/// binding stay in the string verbatim and substituted values are never
/// re-expanded.
#[derive(Debug, Default)]
pub struct ProtocolVariables {
    items: Mutex<HashMap<String, String>>,
}

impl ProtocolVariables {
    pub fn new() -> ProtocolVariables {
        ProtocolVariables::default()
    }

    pub fn put(&self, key: &str, value: impl Into<String>) {
        self.items
            .lock()
            .unwrap()
            .insert(key.to_ascii_lowercase(), value.into());
    }

    /// Inserts only when the variable is not yet defined.
    pub fn add(&self, key: &str, value: impl Into<String>) {
        self.items
            .lock()
            .unwrap()
            .entry(key.to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    pub fn remove(&self, key: &str) {
        self.items.lock().unwrap().remove(&key.to_ascii_lowercase());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap()
            .get(&key.to_ascii_lowercase())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn expand(&self, connections: &str) -> String {
        let items = self.items.lock().unwrap();
        let mut result = String::with_capacity(connections.len());
        let mut rest = connections;
        loop {
            let Some(open) = rest.find('$') else {
                result.push_str(rest);
                return result;
            };
            let Some(close) = rest[open + 1..].find('$').map(|i| open + 1 + i) else {
                result.push_str(rest);
                return result;
            };
            let name = &rest[open + 1..close];
            match items.get(&name.to_ascii_lowercase()) {
                Some(value) => {
                    result.push_str(&rest[..open]);
                    result.push_str(value);
                    rest = &rest[close + 1..];
                }
                None => {
                    // Leave the name intact; the closing dollar sign may
                    // still open a later pair.
                    result.push_str(&rest[..close]);
                    rest = &rest[close..];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_defined_variable() {
        let vars = ProtocolVariables::new();
        vars.put("host", "example.org");
        assert_eq!(
            vars.expand("tcp(host=$host$, port=4228)"),
            "tcp(host=example.org, port=4228)"
        );
    }

    #[test]
    fn test_expand_is_case_insensitive() {
        let vars = ProtocolVariables::new();
        vars.put("FileName", "app.sil");
        assert_eq!(
            vars.expand("file(filename=$filename$)"),
            "file(filename=app.sil)"
        );
    }

    #[test]
    fn test_expand_leaves_unknown_names() {
        let vars = ProtocolVariables::new();
        assert_eq!(vars.expand("file(filename=$nope$)"), "file(filename=$nope$)");
    }

    #[test]
    fn test_expand_unknown_then_known() {
        let vars = ProtocolVariables::new();
        vars.put("b", "B");
        // The closing dollar of the unresolved pair opens the next one.
        assert_eq!(vars.expand("$a$b$"), "$aB");
    }

    #[test]
    fn test_expand_does_not_recurse() {
        let vars = ProtocolVariables::new();
        vars.put("a", "$b$");
        vars.put("b", "B");
        assert_eq!(vars.expand("$a$"), "$b$");
    }

    #[test]
    fn test_expand_unbalanced_dollar() {
        let vars = ProtocolVariables::new();
        vars.put("x", "1");
        assert_eq!(vars.expand("price: 5$"), "price: 5$");
        assert_eq!(vars.expand("$x$ and 5$"), "1 and 5$");
    }

    #[test]
    fn test_add_and_remove() {
        let vars = ProtocolVariables::new();
        vars.put("a", "1");
        vars.add("a", "2");
        assert_eq!(vars.get("a").as_deref(), Some("1"));
        vars.remove("A");
        assert!(vars.is_empty());
        assert_eq!(vars.get("a"), None);
    }
}
