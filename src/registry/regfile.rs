use super::hive::ValueMap;
use super::value::{decode_utf16, RegValue, REG_BINARY, REG_DWORD, REG_QWORD, REG_SZ};
use super::RegistryError;

pub const HEADER: &str = "Windows Registry Editor Version 5.00";
pub const HKLM_PREFIX: &str = "HKEY_LOCAL_MACHINE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegKeyDump {
    pub path: String,
    pub values: ValueMap,
}

pub fn render(keys: &[RegKeyDump]) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push_str("\r\n\r\n");

    for key in keys {
        out.push('[');
        out.push_str(&key.path);
        out.push_str("]\r\n");
        for (name, value) in &key.values {
            out.push_str(&render_value(name, value));
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
    }
    out
}

pub fn render_value(name: &str, value: &RegValue) -> String {
    let mut out = String::new();
    if name.is_empty() {
        out.push('@');
    } else {
        out.push('"');
        out.push_str(&escape(name));
        out.push('"');
    }
    out.push('=');

    match value {
        RegValue::Sz(s) => {
            out.push('"');
            out.push_str(&escape(s));
            out.push('"');
        }
        RegValue::Dword(v) => out.push_str(&format!("dword:{v:08x}")),
        RegValue::Binary(b) => {
            out.push_str("hex:");
            out.push_str(&format_hex_bytes(b, "  "));
        }
        other => {
            out.push_str(&format!("hex({:x}):", other.ty()));
            out.push_str(&format_hex_bytes(&other.to_bytes(), "  "));
        }
    }
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn format_hex_bytes(bytes: &[u8], indent: &str) -> String {
    let mut out = String::new();
    for (idx, b) in bytes.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if idx > 0 && idx % 16 == 0 {
            out.push_str("\\\r\n");
            out.push_str(indent);
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

// Decodes file bytes: UTF-16LE when a BOM says so (as written by
// `reg export`), UTF-8 otherwise.
pub fn decode_file(bytes: &[u8]) -> Result<String, RegistryError> {
    let text = if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        decode_utf16(rest).ok_or_else(|| malformed(0, "invalid UTF-16 text"))?
    } else {
        let rest = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
        String::from_utf8(rest.to_vec()).map_err(|_| malformed(0, "invalid UTF-8 text"))?
    };
    Ok(text)
}

fn malformed(line: usize, reason: impl Into<String>) -> RegistryError {
    RegistryError::MalformedBackup {
        line,
        reason: reason.into(),
    }
}

// Parses key sections and their values. Deletion entries (`[-key]`,
// `"name"=-`) are skipped.
pub fn parse(text: &str) -> Result<Vec<RegKeyDump>, RegistryError> {
    let mut lines = logical_lines(text).into_iter();

    match lines.next() {
        Some((_, first)) if first.trim() == HEADER => {}
        Some((n, _)) => return Err(malformed(n, "missing registry editor header")),
        None => return Err(malformed(0, "empty file")),
    }

    let mut keys: Vec<RegKeyDump> = Vec::new();
    let mut skipping = false;
    for (n, line) in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[') {
            let path = section
                .strip_suffix(']')
                .ok_or_else(|| malformed(n, "unterminated key section"))?;
            skipping = path.starts_with('-');
            if !skipping {
                keys.push(RegKeyDump {
                    path: path.to_string(),
                    values: ValueMap::new(),
                });
            }
            continue;
        }
        if skipping {
            continue;
        }
        let key = keys
            .last_mut()
            .ok_or_else(|| malformed(n, "value outside of a key section"))?;
        let (name, data) = split_value_line(line).ok_or_else(|| malformed(n, "bad value name"))?;
        if data == "-" {
            continue;
        }
        let value = parse_data(data).ok_or_else(|| malformed(n, format!("bad value data for {name:?}")))?;
        key.values.insert(name, value);
    }
    Ok(keys)
}

// Joins `\`-continued lines; yields (1-based first line number, text).
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.trim_end_matches('\r');
        let (start, mut acc) = match pending.take() {
            Some((start, acc)) => (start, acc + raw.trim_start()),
            None => (idx + 1, raw.to_string()),
        };
        if acc.ends_with('\\') && !acc.trim_start().starts_with('[') {
            acc.pop();
            pending = Some((start, acc));
        } else {
            out.push((start, acc));
        }
    }
    if let Some(rest) = pending {
        out.push(rest);
    }
    out
}

fn split_value_line(line: &str) -> Option<(String, &str)> {
    if let Some(rest) = line.strip_prefix('@') {
        return Some((String::new(), rest.strip_prefix('=')?));
    }
    let (name, end) = read_quoted(line)?;
    Some((name, line[end..].strip_prefix('=')?))
}

// Reads a quoted, backslash-escaped string at the start of `s`. Returns the
// unescaped text and the byte offset just past the closing quote.
fn read_quoted(s: &str) -> Option<(String, usize)> {
    let mut chars = s.char_indices();
    if chars.next()?.1 != '"' {
        return None;
    }
    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?.1),
            '"' => return Some((out, i + 1)),
            other => out.push(other),
        }
    }
    None
}

fn parse_data(data: &str) -> Option<RegValue> {
    if data.starts_with('"') {
        let (s, end) = read_quoted(data)?;
        return data[end..].trim().is_empty().then_some(RegValue::Sz(s));
    }
    if let Some(hex) = data.strip_prefix("dword:") {
        return u32::from_str_radix(hex.trim(), 16).ok().map(RegValue::Dword);
    }
    if let Some(hex) = data.strip_prefix("hex:") {
        return parse_hex_bytes(hex).map(RegValue::Binary);
    }
    let rest = data.strip_prefix("hex(")?;
    let (ty, hex) = rest.split_once("):")?;
    let ty = u32::from_str_radix(ty, 16).ok()?;
    let bytes = parse_hex_bytes(hex)?;
    Some(match ty {
        REG_SZ | REG_DWORD | REG_QWORD | REG_BINARY => RegValue::from_bytes(ty, bytes),
        _ => RegValue::Other { ty, bytes },
    })
}

fn parse_hex_bytes(hex: &str) -> Option<Vec<u8>> {
    hex.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect()
}
