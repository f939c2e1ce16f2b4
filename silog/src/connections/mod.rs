// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Connections string parsing.
//!
//! A connections string names one or more protocol sections of the form
//! `name(key=value, ...)`, separated by commas. Values may be quoted with
//! double quotes; inside a quoted run the sequence `""` is a literal quote
//! and commas lose their separator role. All syntax failures surface as
//! [`SilogError::InvalidConnections`].

mod builder;

pub use builder::ConnectionsBuilder;

use silog_common::LookupTable;

use crate::error::SilogError;
use crate::Result;

/// Splits a connections string into protocol sections and hands each
/// `(name, options)` pair to the callback. Protocol names are lower-cased.
pub fn parse<F>(connections: &str, mut handler: F) -> Result<()>
where
    F: FnMut(&str, &str) -> Result<()>,
{
    let mut rest = connections.trim();
    while !rest.is_empty() {
        let open = rest.find('(').ok_or_else(|| {
            SilogError::invalid_connections(format!("missing \"(\" in {rest:?}"))
        })?;
        let name = rest[..open].trim();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(SilogError::invalid_connections(format!(
                "invalid protocol name {name:?}"
            )));
        }

        let inner = &rest[open + 1..];
        let close = find_unquoted(inner, ')').ok_or_else(|| {
            SilogError::invalid_connections(format!("missing \")\" for protocol {name:?}"))
        })?;
        handler(&name.to_ascii_lowercase(), &inner[..close])?;

        rest = inner[close + 1..].trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest
            .strip_prefix(',')
            .ok_or_else(|| {
                SilogError::invalid_connections(format!("expected \",\" before {rest:?}"))
            })?
            .trim_start();
        if rest.is_empty() {
            return Err(SilogError::invalid_connections(
                "trailing \",\" after last protocol".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Parses a protocol's option list into `(key, value)` pairs. Keys are
/// lower-cased and values are unquoted.
pub fn parse_options<F>(options: &str, mut handler: F) -> Result<()>
where
    F: FnMut(&str, &str) -> Result<()>,
{
    for pair in split_unquoted(options, ',') {
        let pair = pair.trim();
        if pair.is_empty() {
            if options.trim().is_empty() {
                continue;
            }
            return Err(SilogError::invalid_connections(
                "empty option entry".to_owned(),
            ));
        }
        let eq = find_unquoted(pair, '=').ok_or_else(|| {
            SilogError::invalid_connections(format!("missing \"=\" in option {pair:?}"))
        })?;
        let key = pair[..eq].trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(SilogError::invalid_connections(format!(
                "missing key in option {pair:?}"
            )));
        }
        let value = unquote(pair[eq + 1..].trim())?;
        handler(&key, &value)?;
    }
    Ok(())
}

/// Parses a protocol's option list into a [`LookupTable`].
pub fn parse_options_table(options: &str) -> Result<LookupTable> {
    let mut table = LookupTable::new();
    parse_options(options, |key, value| {
        table.put(key, value);
        Ok(())
    })?;
    Ok(table)
}

fn find_unquoted(input: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(idx),
            _ => {}
        }
    }
    None
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            c if c == separator && !quoted => {
                parts.push(&input[start..idx]);
                start = idx + separator.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unquote(value: &str) -> Result<String> {
    if !value.starts_with('"') {
        return Ok(value.to_owned());
    }
    let mut result = String::with_capacity(value.len());
    let mut chars = value[1..].char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch != '"' {
            result.push(ch);
            continue;
        }
        match chars.peek() {
            // An escaped quote inside the quoted run.
            Some((_, '"')) => {
                result.push('"');
                chars.next();
            }
            Some(_) => {
                let after = value[1 + idx + 1..].trim();
                if !after.is_empty() {
                    return Err(SilogError::invalid_connections(format!(
                        "unexpected characters after quoted value {value:?}"
                    )));
                }
                return Ok(result);
            }
            None => return Ok(result),
        }
    }
    Err(SilogError::invalid_connections(format!(
        "unterminated quoted value {value:?}"
    )))
}
