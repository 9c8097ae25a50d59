//! In-memory directory for tests
//!
//! Evaluates the subset of RFC 4515 filters the connector produces:
//! `&`, `|`, `!`, equality, presence and substring assertions with `\xx`
//! escapes. Values compare case-insensitively, like `caseIgnoreMatch`.

use crate::ldap::config::DirectoryConfig;
use crate::ldap::connection::{Connector, DirectoryConnection};
use crate::ldap::types::{BindStatus, DirectoryEntry, SearchRequest};
use async_trait::async_trait;
use guard_core::{ConnectionError, Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const RC_INVALID_CREDENTIALS: u32 = 49;

/// Injected misbehaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    RefuseConnections,
    FailHandshake,
    /// Every operation hangs
    Stall,
    /// Searches fail with a directory error
    BrokenSearch,
}

/// What the directory observed
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub connects: usize,
    pub terminations: usize,
    pub unbinds: usize,
    /// DN of every bind attempt, in order
    pub binds: Vec<String>,
    /// Bound DN and filter of every search, in order
    pub searches: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: DirectoryEntry,
    password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    entries: Vec<StoredEntry>,
    allow_anonymous: bool,
    fault: Option<Fault>,
    stats: Arc<Mutex<Stats>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry that can be bound to with `password`
    pub fn with_account(mut self, entry: DirectoryEntry, password: &str) -> Self {
        self.entries.push(StoredEntry {
            entry,
            password: Some(password.to_string()),
        });
        self
    }

    pub fn with_entry(mut self, entry: DirectoryEntry) -> Self {
        self.entries.push(StoredEntry {
            entry,
            password: None,
        });
        self
    }

    pub fn allow_anonymous(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn stats(&self) -> Stats {
        self.stats.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryDirectory {
    type Connection = MemoryConnection;

    async fn connect(&self, _config: &DirectoryConfig) -> Result<MemoryConnection> {
        match self.fault {
            Some(Fault::RefuseConnections) => {
                return Err(ConnectionError::DialFailed("connection refused".to_string()).into())
            }
            Some(Fault::FailHandshake) => {
                return Err(
                    ConnectionError::HandshakeFailed("certificate not trusted".to_string()).into(),
                )
            }
            _ => {}
        }

        self.stats.lock().connects += 1;
        Ok(MemoryConnection {
            directory: self.clone(),
            bound_as: None,
        })
    }
}

pub struct MemoryConnection {
    directory: MemoryDirectory,
    bound_as: Option<String>,
}

impl MemoryConnection {
    async fn stall_if_configured(&self) {
        if self.directory.fault == Some(Fault::Stall) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<BindStatus> {
        self.stall_if_configured().await;
        self.directory.stats.lock().binds.push(dn.to_string());

        if dn.is_empty() && password.is_empty() && self.directory.allow_anonymous {
            self.bound_as = Some(String::new());
            return Ok(BindStatus::Bound);
        }

        let accepted = !password.is_empty()
            && self.directory.entries.iter().any(|stored| {
                stored.entry.dn.eq_ignore_ascii_case(dn)
                    && stored.password.as_deref() == Some(password)
            });

        if accepted {
            self.bound_as = Some(dn.to_string());
            Ok(BindStatus::Bound)
        } else {
            self.bound_as = None;
            Ok(BindStatus::Rejected(RC_INVALID_CREDENTIALS))
        }
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>> {
        self.stall_if_configured().await;
        self.directory.stats.lock().searches.push((
            self.bound_as.clone().unwrap_or_default(),
            request.filter.clone(),
        ));

        if self.directory.fault == Some(Fault::BrokenSearch) {
            return Err(Error::Directory("search failed with code 80: other".to_string()));
        }

        let filter = parse(&request.filter)
            .ok_or_else(|| Error::Directory(format!("bad filter: {}", request.filter)))?;

        let mut found: Vec<DirectoryEntry> = self
            .directory
            .entries
            .iter()
            .map(|stored| &stored.entry)
            .filter(|entry| in_scope(&entry.dn, &request.base_dn) && filter.matches(entry))
            .map(|entry| project(entry, &request.attributes))
            .collect();

        if request.size_limit > 0 {
            found.truncate(request.size_limit as usize);
        }
        Ok(found)
    }

    async fn unbind(&mut self) -> Result<()> {
        self.directory.stats.lock().unbinds += 1;
        self.bound_as = None;
        Ok(())
    }

    fn terminate(&mut self) {
        self.directory.stats.lock().terminations += 1;
    }
}

fn in_scope(dn: &str, base: &str) -> bool {
    base.is_empty() || dn.to_ascii_lowercase().ends_with(&base.to_ascii_lowercase())
}

fn project(entry: &DirectoryEntry, attributes: &[String]) -> DirectoryEntry {
    let mut projected = DirectoryEntry::new(entry.dn.clone());
    for (name, values) in &entry.attrs {
        if attributes.is_empty() || attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            projected.attrs.insert(name.clone(), values.clone());
        }
    }
    projected
}

// ============================================================================
// Filter evaluation
// ============================================================================

#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, Vec<u8>),
    Present(String),
    /// Pieces between `*`; the first and last may be empty
    Substring(String, Vec<Vec<u8>>),
}

impl Filter {
    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|f| f.matches(entry)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || values(entry, attr).next().is_some()
            }
            Filter::Equal(attr, expected) => {
                values(entry, attr).any(|v| v.as_bytes().eq_ignore_ascii_case(expected))
            }
            Filter::Substring(attr, pieces) => {
                values(entry, attr).any(|v| substring_match(&v.to_ascii_lowercase(), pieces))
            }
        }
    }
}

fn values<'a>(entry: &'a DirectoryEntry, attr: &'a str) -> impl Iterator<Item = &'a String> {
    entry
        .attrs
        .iter()
        .filter(move |(name, _)| name.eq_ignore_ascii_case(attr))
        .flat_map(|(_, values)| values.iter())
}

fn substring_match(value: &str, pieces: &[Vec<u8>]) -> bool {
    let value = value.as_bytes();
    let last = pieces.len() - 1;
    let mut pos = 0;
    for (i, piece) in pieces.iter().enumerate() {
        let piece = piece.to_ascii_lowercase();
        if i == 0 {
            if !value.starts_with(&piece) {
                return false;
            }
            pos = piece.len();
        } else if i == last {
            return value.len() >= pos + piece.len() && value.ends_with(&piece);
        } else if !piece.is_empty() {
            match value[pos..]
                .windows(piece.len().max(1))
                .position(|w| w == piece.as_slice())
            {
                Some(at) => pos += at + piece.len(),
                None => return false,
            }
        }
    }
    true
}

fn parse(filter: &str) -> Option<Filter> {
    let bytes = filter.as_bytes();
    let mut pos = 0;
    let parsed = parse_at(bytes, &mut pos)?;
    (pos == bytes.len()).then_some(parsed)
}

fn parse_at(bytes: &[u8], pos: &mut usize) -> Option<Filter> {
    if bytes.get(*pos) != Some(&b'(') {
        return None;
    }
    *pos += 1;

    let parsed = match bytes.get(*pos)? {
        b'&' => {
            *pos += 1;
            Filter::And(parse_list(bytes, pos)?)
        }
        b'|' => {
            *pos += 1;
            Filter::Or(parse_list(bytes, pos)?)
        }
        b'!' => {
            *pos += 1;
            Filter::Not(Box::new(parse_at(bytes, pos)?))
        }
        _ => {
            let start = *pos;
            while *bytes.get(*pos)? != b')' {
                *pos += 1;
            }
            parse_item(std::str::from_utf8(&bytes[start..*pos]).ok()?)?
        }
    };

    if bytes.get(*pos) != Some(&b')') {
        return None;
    }
    *pos += 1;
    Some(parsed)
}

fn parse_list(bytes: &[u8], pos: &mut usize) -> Option<Vec<Filter>> {
    let mut parts = Vec::new();
    while bytes.get(*pos) == Some(&b'(') {
        parts.push(parse_at(bytes, pos)?);
    }
    Some(parts)
}

fn parse_item(item: &str) -> Option<Filter> {
    let (attr, raw) = item.split_once('=')?;
    let attr = attr.to_string();
    if raw == "*" {
        return Some(Filter::Present(attr));
    }
    if raw.contains('*') {
        let pieces = raw.split('*').map(unescape).collect::<Option<Vec<_>>>()?;
        return Some(Filter::Substring(attr, pieces));
    }
    Some(Filter::Equal(attr, unescape(raw)?))
}

fn unescape(raw: &str) -> Option<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::filter::and_equals;

    fn alice() -> DirectoryEntry {
        DirectoryEntry::new("uid=alice,ou=people,dc=example")
            .with_attr("objectClass", &["person"])
            .with_attr("uid", &["alice"])
            .with_attr("mail", &["alice@example.com"])
    }

    #[test]
    fn test_equality_and_composition() {
        let entry = alice();
        assert!(parse("(uid=alice)").unwrap().matches(&entry));
        assert!(parse("(UID=ALICE)").unwrap().matches(&entry));
        assert!(parse("(&(objectClass=person)(uid=alice))").unwrap().matches(&entry));
        assert!(parse("(|(uid=bob)(uid=alice))").unwrap().matches(&entry));
        assert!(!parse("(!(uid=alice))").unwrap().matches(&entry));
    }

    #[test]
    fn test_presence_and_substring() {
        let entry = alice();
        assert!(parse("(mail=*)").unwrap().matches(&entry));
        assert!(parse("(mail=alice*)").unwrap().matches(&entry));
        assert!(parse("(mail=*@example.com)").unwrap().matches(&entry));
        assert!(parse("(mail=a*@*.com)").unwrap().matches(&entry));
        assert!(!parse("(mail=bob*)").unwrap().matches(&entry));
    }

    #[test]
    fn test_escaped_wildcard_is_literal() {
        let entry = alice();
        let filter = and_equals("(objectClass=person)", "uid", "*");
        assert!(!parse(&filter).unwrap().matches(&entry));

        let star = DirectoryEntry::new("uid=*,dc=example").with_attr("uid", &["*"]);
        assert!(parse("(uid=\\2a)").unwrap().matches(&star));
    }

    #[test]
    fn test_malformed_filters_rejected() {
        assert!(parse("uid=alice").is_none());
        assert!(parse("(uid=alice").is_none());
        assert!(parse("(uid=alice))").is_none());
        assert!(parse("(uid=\\zz)").is_none());
    }
}
