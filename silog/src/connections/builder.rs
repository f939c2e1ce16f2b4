// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Renders protocol sections back into connections-string syntax.
///
/// Values containing separators or quotes are quoted with `""` escaping,
/// so anything the builder emits parses back to the same pairs.
#[derive(Debug, Default)]
pub struct ConnectionsBuilder {
    buffer: String,
    has_options: bool,
}

impl ConnectionsBuilder {
    pub fn new() -> ConnectionsBuilder {
        ConnectionsBuilder::default()
    }

    pub fn begin_protocol(&mut self, name: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push_str(", ");
        }
        self.buffer.push_str(name);
        self.buffer.push('(');
        self.has_options = false;
    }

    pub fn add_option(&mut self, key: &str, value: impl fmt::Display) {
        if self.has_options {
            self.buffer.push_str(", ");
        }
        self.buffer.push_str(key);
        self.buffer.push('=');
        let value = value.to_string();
        if needs_quoting(&value) {
            self.buffer.push('"');
            for ch in value.chars() {
                if ch == '"' {
                    self.buffer.push('"');
                }
                self.buffer.push(ch);
            }
            self.buffer.push('"');
        } else {
            self.buffer.push_str(&value);
        }
        self.has_options = true;
    }

    pub fn end_protocol(&mut self) {
        self.buffer.push(')');
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
        || value.contains(['"', ',', '(', ')', '='])
}
