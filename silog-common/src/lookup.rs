// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use crate::Level;

const KB_FACTOR: i64 = 1024;
const MB_FACTOR: i64 = 1024 * 1024;
const GB_FACTOR: i64 = 1024 * 1024 * 1024;

/// An ARGB color value as carried by log-entry packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(u32);

impl Color {
    /// Fully transparent black, the default background of a log entry.
    pub const TRANSPARENT: Color = Color(0);

    pub const fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Color {
        Color(((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub const fn argb(self) -> u32 {
        self.0
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::TRANSPARENT
    }
}

impl From<u32> for Color {
    fn from(argb: u32) -> Self {
        Color(argb)
    }
}

/// Case-insensitive option map with typed accessors.
///
/// Keys are normalized to lower case on insert, lookup and removal. Every
/// typed getter falls back to its default on a missing key or a value that
/// does not parse.
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    items: HashMap<String, String>,
}

impl LookupTable {
    pub fn new() -> LookupTable {
        LookupTable::default()
    }

    pub fn put(&mut self, key: &str, value: impl Into<String>) {
        self.items.insert(key.to_ascii_lowercase(), value.into());
    }

    /// Inserts only when the key is not yet present.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.items
            .entry(key.to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.items.remove(&key.to_ascii_lowercase());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(&key.to_ascii_lowercase())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_owned()
    }

    /// True iff the value is one of `true`, `1` or `yes`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            ),
            None => default,
        }
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.get(key).map(parse_digits) {
            Some(Some(n)) => n as i32,
            _ => default,
        }
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        match self.get(key).map(parse_digits) {
            Some(Some(n)) => n,
            _ => default,
        }
    }

    /// Size in bytes. Values accept a trailing `KB`, `MB` or `GB` unit;
    /// without a unit the number is taken as kilobytes. `default` is in
    /// kilobytes and also applies to unparseable values.
    pub fn get_size(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(value) => parse_size(value).unwrap_or(default * KB_FACTOR),
            None => default * KB_FACTOR,
        }
    }

    /// Timespan in milliseconds. Values accept a trailing `s`, `m`, `h`
    /// or `d` unit; without a unit the number is taken as seconds.
    /// `default` is in seconds and also applies to unparseable values.
    pub fn get_timespan(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(value) => parse_timespan(value).unwrap_or(default * 1000),
            None => default * 1000,
        }
    }

    pub fn get_level(&self, key: &str, default: Level) -> Level {
        match self.get(key) {
            Some(value) => Level::from_name(value).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_color(&self, key: &str, default: Color) -> Color {
        match self.get(key) {
            Some(value) => parse_color(value).unwrap_or(default),
            None => default,
        }
    }

    /// UTF-8 encodes the value and truncates or zero-pads it to exactly
    /// `size` bytes. Missing or empty values return the default as-is.
    pub fn get_bytes(&self, key: &str, size: usize, default: &[u8]) -> Vec<u8> {
        match self.get(key) {
            Some(value) if !value.is_empty() => {
                let mut bytes = value.as_bytes().to_vec();
                bytes.resize(size, 0);
                bytes
            }
            _ => default.to_vec(),
        }
    }
}

fn parse_digits(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_size(value: &str) -> Option<i64> {
    let value = value.trim();
    let (digits, factor) = if value.len() >= 2 && value.is_char_boundary(value.len() - 2) {
        let (head, unit) = value.split_at(value.len() - 2);
        match unit.to_ascii_lowercase().as_str() {
            "kb" => (head, KB_FACTOR),
            "mb" => (head, MB_FACTOR),
            "gb" => (head, GB_FACTOR),
            _ => (value, KB_FACTOR),
        }
    } else {
        (value, KB_FACTOR)
    };
    parse_digits(digits).map(|n| n * factor)
}

fn parse_timespan(value: &str) -> Option<i64> {
    let value = value.trim();
    let (digits, factor) = match value.as_bytes().last() {
        Some(b's') | Some(b'S') => (&value[..value.len() - 1], 1000),
        Some(b'm') | Some(b'M') => (&value[..value.len() - 1], 60 * 1000),
        Some(b'h') | Some(b'H') => (&value[..value.len() - 1], 3600 * 1000),
        Some(b'd') | Some(b'D') => (&value[..value.len() - 1], 86400 * 1000),
        _ => (value, 1000),
    };
    parse_digits(digits).map(|n| n * factor)
}

fn parse_color(value: &str) -> Option<Color> {
    let value = value.trim();
    let hex = ["0x", "&H", "$"]
        .iter()
        .find_map(|prefix| strip_prefix_ignore_case(value, prefix))?;
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    // An odd number of nibbles gets a trailing zero nibble.
    let mut hex = hex.to_owned();
    if hex.len() % 2 != 0 {
        hex.push('0');
    }
    let bytes: Vec<u8> = hex
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect::<Option<_>>()?;
    match bytes.as_slice() {
        [r, g, b] => Some(Color::from_argb(0xff, *r, *g, *b)),
        [a, r, g, b] => Some(Color::from_argb(*a, *r, *g, *b)),
        _ => None,
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let bytes = value.as_bytes();
    if bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    {
        // An ASCII prefix always ends on a character boundary.
        Some(&value[prefix.len()..])
    } else {
        None
    }
}
