// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};

use chrono::DateTime;

use crate::formatter::Formatter;
use crate::packet::Packet;

pub const DEFAULT_PATTERN: &str = "[%timestamp%] %level%: %title%";

const LINE_SEPARATOR: &str = "\r\n";
const INDENT_STEP: &str = "  ";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Timestamp,
    Level,
    Title,
    Session,
    AppName,
    HostName,
}

/// Renders log entries as human-readable lines.
///
/// Only log entries produce output; process-flow packets merely adjust the
/// indentation depth when indenting is enabled, and every other kind is
/// skipped.
#[derive(Debug)]
pub struct TextFormatter {
    tokens: Vec<Token>,
    indent: bool,
    indent_level: usize,
    line: Vec<u8>,
}

impl TextFormatter {
    pub fn new(pattern: &str, indent: bool) -> TextFormatter {
        TextFormatter {
            tokens: parse_pattern(pattern),
            indent,
            indent_level: 0,
            line: Vec::new(),
        }
    }
}

impl Default for TextFormatter {
    fn default() -> Self {
        TextFormatter::new(DEFAULT_PATTERN, false)
    }
}

impl Formatter for TextFormatter {
    fn compile(&mut self, packet: &Packet) -> usize {
        self.line.clear();
        match packet {
            Packet::LogEntry(entry) => {
                let mut rendered = String::new();
                if self.indent {
                    for _ in 0..self.indent_level {
                        rendered.push_str(INDENT_STEP);
                    }
                }
                for token in &self.tokens {
                    match token {
                        Token::Literal(text) => rendered.push_str(text),
                        Token::Timestamp => rendered.push_str(&render_timestamp(entry.timestamp)),
                        Token::Level => rendered.push_str(&entry.level.to_string()),
                        Token::Title => rendered.push_str(&entry.title),
                        Token::Session => rendered.push_str(&entry.session_name),
                        Token::AppName => rendered.push_str(&entry.appname),
                        Token::HostName => rendered.push_str(&entry.hostname),
                    }
                }
                rendered.push_str(LINE_SEPARATOR);
                self.line = rendered.into_bytes();
            }
            Packet::ProcessFlow(flow) => {
                if self.indent {
                    // Tags 0, 2 and 4 enter a scope, the others leave it.
                    if flow.flow_type % 2 == 0 {
                        self.indent_level += 1;
                    } else {
                        self.indent_level = self.indent_level.saturating_sub(1);
                    }
                }
            }
            _ => {}
        }
        self.line.len()
    }

    fn write(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&self.line)
    }
}

fn render_timestamp(micros: u64) -> String {
    match DateTime::from_timestamp_micros(micros as i64) {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => micros.to_string(),
    }
}

fn parse_pattern(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('%') {
        let Some(close) = rest[open + 1..].find('%').map(|i| open + 1 + i) else {
            break;
        };
        let token = match rest[open + 1..close].to_ascii_lowercase().as_str() {
            "timestamp" => Some(Token::Timestamp),
            "level" => Some(Token::Level),
            "title" => Some(Token::Title),
            "session" => Some(Token::Session),
            "appname" => Some(Token::AppName),
            "hostname" => Some(Token::HostName),
            _ => None,
        };
        match token {
            Some(token) => {
                literal.push_str(&rest[..open]);
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(token);
                rest = &rest[close + 1..];
            }
            None => {
                // Unknown variables stay literal; the closing percent sign
                // may open the next token.
                literal.push_str(&rest[..close]);
                rest = &rest[close..];
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{LogEntry, ProcessFlow, ProcessFlowType, Watch, WatchType};
    use silog_common::Level;

    fn render(formatter: &mut TextFormatter, packet: &Packet) -> String {
        formatter.compile(packet);
        let mut out = Vec::new();
        formatter.write(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn entry_at_epoch(title: &str) -> LogEntry {
        let mut entry = LogEntry::new(Level::Message, title);
        entry.timestamp = 0;
        entry
    }

    #[test]
    fn test_default_pattern() {
        let mut formatter = TextFormatter::default();
        let line = render(&mut formatter, &Packet::from(entry_at_epoch("hello")));
        assert_eq!(line, "[1970-01-01 00:00:00.000] message: hello\r\n");
    }

    #[test]
    fn test_custom_pattern_and_unknown_token() {
        let mut formatter = TextFormatter::new("%session% %bogus% %title%", false);
        let mut entry = entry_at_epoch("t");
        entry.session_name = String::from("Main");
        let line = render(&mut formatter, &Packet::from(entry));
        assert_eq!(line, "Main %bogus% t\r\n");
    }

    #[test]
    fn test_non_log_entries_produce_nothing() {
        let mut formatter = TextFormatter::default();
        let watch = Packet::from(Watch::new(Level::Debug, "n", "v", WatchType::Int));
        assert_eq!(formatter.compile(&watch), 0);
    }

    #[test]
    fn test_indentation_follows_process_flow() {
        let mut formatter = TextFormatter::new("%title%", true);
        let enter = Packet::from(ProcessFlow::new(
            Level::Debug,
            ProcessFlowType::EnterMethod,
            "m",
        ));
        let leave = Packet::from(ProcessFlow::new(
            Level::Debug,
            ProcessFlowType::LeaveMethod,
            "m",
        ));

        assert_eq!(render(&mut formatter, &Packet::from(entry_at_epoch("a"))), "a\r\n");
        formatter.compile(&enter);
        assert_eq!(
            render(&mut formatter, &Packet::from(entry_at_epoch("b"))),
            "  b\r\n"
        );
        formatter.compile(&leave);
        formatter.compile(&leave);
        assert_eq!(render(&mut formatter, &Packet::from(entry_at_epoch("c"))), "c\r\n");
    }
}
