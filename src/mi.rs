use std::borrow::Cow;
use std::collections::HashMap;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

// MIResponse enum to represent different types of GDB responses
#[derive(Debug, PartialEq, Eq)]
pub enum MIResponse {
    ExecResult(String, HashMap<String, String>),
    AsyncRecord(String, HashMap<String, String>),
    Notify(String, HashMap<String, String>),
    StreamOutput(String, String),
    Unknown(String),
}

pub fn parse_key_value_pairs(input: &str) -> HashMap<String, String> {
    let mut key_values = HashMap::new();
    let mut current_key = String::new();
    let mut buffer = String::new();
    let mut nesting_level = 0;
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '=' if nesting_level == 0 && !in_quotes => {
                current_key = buffer.trim().to_string();
                buffer.clear();
            }
            '{' if !in_quotes => {
                nesting_level += 1;
                if nesting_level > 1 {
                    buffer.push(c); // Nested brace content
                }
            }
            '}' if !in_quotes => {
                if nesting_level > 1 {
                    buffer.push(c); // Nested brace content
                }
                nesting_level -= 1;
                if nesting_level == 0 && !current_key.is_empty() {
                    let value = if buffer.starts_with('{') && buffer.ends_with('}') {
                        buffer[1..buffer.len() - 1].to_string() // Trim outer braces
                    } else {
                        buffer.trim().to_string()
                    };
                    key_values.insert(current_key.clone(), value);
                    current_key.clear();
                    buffer.clear();
                }
            }
            ',' if nesting_level == 0 && !in_quotes => {
                if !current_key.is_empty() && !buffer.is_empty() {
                    let value = buffer.trim().trim_matches('"').to_string(); // Trim quotes here
                    key_values.insert(current_key.clone(), value);
                    current_key.clear();
                    buffer.clear();
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                buffer.push(c);
            }
            _ => buffer.push(c),
        }
    }

    // Handle remaining buffer
    if !current_key.is_empty() && !buffer.is_empty() {
        let value = buffer.trim().trim_matches('"').to_string(); // Trim quotes here
        key_values.insert(current_key, value);
    }

    key_values
}

// Function to parse a single GDB/MI line into MIResponse
pub fn parse_mi_response(line: &str) -> MIResponse {
    debug!("{}", line);
    if line.starts_with('^') {
        parse_exec_result(&line[1..])
    } else if line.starts_with('*') {
        parse_async_record(&line[1..])
    } else if line.starts_with('=') {
        parse_notify(&line[1..])
    } else if line.starts_with('~') || line.starts_with('@') || line.starts_with('&') {
        parse_stream_output(line)
    } else {
        MIResponse::Unknown(line.to_string())
    }
}

fn parse_exec_result(input: &str) -> MIResponse {
    if let Some((status, rest)) = input.split_once(',') {
        MIResponse::ExecResult(status.to_string(), parse_key_value_pairs(rest))
    } else {
        MIResponse::ExecResult(input.to_string(), HashMap::new())
    }
}

fn parse_async_record(input: &str) -> MIResponse {
    if let Some((prefix, rest)) = input.split_once(',') {
        let data = parse_key_value_pairs(rest);
        MIResponse::AsyncRecord(prefix.to_string(), data)
    } else {
        MIResponse::AsyncRecord(input.to_string(), HashMap::new())
    }
}

fn parse_notify(input: &str) -> MIResponse {
    if let Some((event, rest)) = input.split_once(',') {
        MIResponse::Notify(event.to_string(), parse_key_value_pairs(rest))
    } else {
        MIResponse::Notify(input.to_string(), HashMap::new())
    }
}

fn parse_stream_output(input: &str) -> MIResponse {
    let (kind, content) = input.split_at(1);
    let unescaped_content = unescape_gdb_output(content.trim_matches('"'));
    MIResponse::StreamOutput(kind.to_string(), unescaped_content.to_string())
}

fn unescape_gdb_output(input: &str) -> Cow<str> {
    // Replace escaped sequences with actual characters
    input.replace("\\n", "\n").replace("\\t", "\t").into()
}

// Commands with arguments go through builders so the quoting stays in one
// place; fixed commands are written literally at the call site.

pub fn data_read_memory_bytes(addr: u64, count: u64) -> String {
    format!("-data-read-memory-bytes {addr:#x} {count}")
}

pub fn data_evaluate_expression(expr: &str) -> String {
    format!(r#"-data-evaluate-expression "{}""#, expr.replace('"', "\\\""))
}

pub fn target_attach(pid: i32) -> String {
    format!("-target-attach {pid}")
}

pub fn interpreter_exec_console(cmd: &str) -> String {
    format!(r#"-interpreter-exec console "{}""#, cmd.replace('"', "\\\""))
}

/// Pull the integer out of a `-data-evaluate-expression` result.
///
/// Values arrive shaped like `8`, `0x7ffff7a3b040`,
/// `(zend_mm_heap *) 0x7ffff7a3b040`, or `(unsigned long) 312`; a leading
/// cast is dropped first so digits inside type names never win.
pub fn parse_value_integer(value: &str) -> Option<u64> {
    static RE_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0x[0-9a-fA-F]+|\d+)").unwrap());

    let text = RE_INT.find(strip_leading_cast(value))?.as_str();
    if let Some(hex_digits) = text.strip_prefix("0x") {
        u64::from_str_radix(hex_digits, 16).ok()
    } else {
        text.parse().ok()
    }
}

// Casts can nest parens, e.g. `(zend_mm_free_slot *(*)[30]) 0x20`, so the
// group has to be balanced rather than regexed away.
fn strip_leading_cast(value: &str) -> &str {
    let trimmed = value.trim();
    if !trimmed.starts_with('(') {
        return trimmed;
    }
    let mut depth = 0usize;
    for (i, c) in trimmed.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return trimmed[i + 1..].trim_start();
                }
            }
            _ => {}
        }
    }
    trimmed
}

/// Unwrap the `memory=[{begin=..,contents=..}]` payload of
/// `-data-read-memory-bytes`.
///
/// The key-value parser above eats the braces of the first block, leaving
/// the leading bracket behind; only the first block is used, which is all
/// a plain (offset-free) read produces.
pub fn parse_memory_contents(memory: &str) -> Option<(u64, Vec<u8>)> {
    let inner = memory.trim_start_matches('[').trim_end_matches(']');
    let data = parse_key_value_pairs(inner);
    let begin = data.get("begin")?;
    let begin = u64::from_str_radix(begin.strip_prefix("0x")?, 16).ok()?;
    let contents = hex::decode(data.get("contents")?).ok()?;
    Some((begin, contents))
}
