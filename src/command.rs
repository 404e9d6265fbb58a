//! Command-line parsing for the session protocol

use crate::protocol::command as id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Unrecognized,
    Help,
    ConfigureCompressor(String),
    ConfigureName(String),
    ShowConfiguration,
    Send(String),
    Compress(String),
    ShowList,
    EmptyList,
    Quit,
}

impl Command {
    /// Parse one command line. The verb is case-insensitive, the parameter
    /// is kept verbatim (trimmed).
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        let (verb, param) = match line.split_once(' ') {
            Some((v, p)) => (v, Some(p.trim())),
            None => (line, None),
        };
        let verb = verb.to_ascii_lowercase();
        match (verb.as_str(), param) {
            ("help", None) => Command::Help,
            ("quit", None) => Command::Quit,
            ("show-configuration", None) => Command::ShowConfiguration,
            ("show-list", None) => Command::ShowList,
            ("empty-list", None) => Command::EmptyList,
            ("configure-compressor", Some(p)) if !p.is_empty() => {
                Command::ConfigureCompressor(p.to_string())
            }
            ("configure-name", Some(p)) if !p.is_empty() => Command::ConfigureName(p.to_string()),
            ("send", Some(p)) if !p.is_empty() => Command::Send(p.to_string()),
            ("compress", Some(p)) if !p.is_empty() => Command::Compress(p.to_string()),
            _ => Command::Unrecognized,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Command::Unrecognized => id::UNRECOGNIZED,
            Command::Help => id::HELP,
            Command::ConfigureCompressor(_) => id::CONFIGURE_COMPRESSOR,
            Command::ConfigureName(_) => id::CONFIGURE_NAME,
            Command::ShowConfiguration => id::SHOW_CONFIGURATION,
            Command::Send(_) => id::SEND,
            Command::Compress(_) => id::COMPRESS,
            Command::ShowList => id::SHOW_LIST,
            Command::EmptyList => id::EMPTY_LIST,
            Command::Quit => id::QUIT,
        }
    }
}

/// Split a space-separated path list. Double quotes group spaces into one
/// token and are dropped; they may appear anywhere inside a token.
pub fn split_paths(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    for ch in list.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            ' ' | '\t' | '\n' | '\r' if !in_quotes => {
                if has_token && !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
                has_token = false;
            }
            _ => {
                cur.push(ch);
                has_token = true;
            }
        }
    }
    if has_token && !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Last `/`-separated component of a client path.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

pub fn strip_quotes(s: &str) -> String {
    s.chars().filter(|c| *c != '"').collect()
}
