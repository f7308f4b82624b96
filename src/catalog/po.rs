//! Minimal gettext PO/POT reader and writer.
//!
//! Understands comments, `msgctxt`, `msgid`, `msgid_plural`, `msgstr` and
//! `msgstr[n]` with multi-line string continuations. Plural entries and the
//! header are carried through untouched.

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoEntry {
    /// Raw comment lines (`#`, `#.`, `#:`, `#,`, `#|`, `#~`), without newline.
    pub comments: Vec<String>,
    pub msgctxt: Option<String>,
    pub msgid: String,
    pub msgid_plural: Option<String>,
    pub msgstr: String,
    pub msgstr_plural: Vec<String>,
}

impl PoEntry {
    pub fn is_header(&self) -> bool {
        self.msgid.is_empty() && self.msgctxt.is_none()
    }

    pub fn is_plural(&self) -> bool {
        self.msgid_plural.is_some()
    }

    /// Entries that take part in translation.
    pub fn is_translatable(&self) -> bool {
        !self.is_header() && !self.is_plural()
    }

    /// Comment-only blocks such as obsolete `#~` entries.
    fn is_comment_only(&self) -> bool {
        self.is_header() && self.msgstr.is_empty() && self.msgid_plural.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Ctxt,
    Id,
    IdPlural,
    Str,
    StrPlural(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoFile {
    pub entries: Vec<PoEntry>,
}

impl PoFile {
    pub fn parse(content: &str) -> Result<Self> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut entries = Vec::new();
        let mut current = PoEntry::default();
        let mut started = false;
        let mut field: Option<Field> = None;

        for (n, raw) in content.lines().enumerate() {
            let line = raw.trim();
            let lineno = n + 1;

            if line.is_empty() {
                if started {
                    entries.push(std::mem::take(&mut current));
                    started = false;
                    field = None;
                }
                continue;
            }

            if line.starts_with('#') {
                // a comment after strings begins the next entry
                if started && field.is_some() {
                    entries.push(std::mem::take(&mut current));
                    field = None;
                }
                current.comments.push(line.to_string());
                started = true;
                continue;
            }

            if line.starts_with('"') {
                let value = unquote(line, lineno)?;
                match field {
                    Some(f) => append(&mut current, f, &value),
                    None => {
                        return Err(RelayError::Catalog(format!(
                            "line {}: string continuation without a keyword",
                            lineno
                        )))
                    }
                }
                continue;
            }

            let (keyword, rest) = line.split_once(char::is_whitespace).ok_or_else(|| {
                RelayError::Catalog(format!("line {}: expected keyword and string", lineno))
            })?;
            let value = unquote(rest.trim(), lineno)?;

            let next = match keyword {
                "msgctxt" => Field::Ctxt,
                "msgid" => Field::Id,
                "msgid_plural" => Field::IdPlural,
                "msgstr" => Field::Str,
                k if k.starts_with("msgstr[") && k.ends_with(']') => {
                    let idx = k["msgstr[".len()..k.len() - 1].parse::<usize>().map_err(|_| {
                        RelayError::Catalog(format!("line {}: bad plural index in {}", lineno, k))
                    })?;
                    Field::StrPlural(idx)
                }
                other => {
                    return Err(RelayError::Catalog(format!(
                        "line {}: unknown keyword {}",
                        lineno, other
                    )))
                }
            };

            // msgctxt or msgid after msgstr means a new entry without a blank line
            if matches!(next, Field::Ctxt | Field::Id)
                && matches!(field, Some(Field::Str) | Some(Field::StrPlural(_)))
            {
                entries.push(std::mem::take(&mut current));
            }

            match next {
                Field::Ctxt => current.msgctxt = Some(String::new()),
                Field::IdPlural => current.msgid_plural = Some(String::new()),
                Field::StrPlural(idx) => {
                    if current.msgstr_plural.len() <= idx {
                        current.msgstr_plural.resize(idx + 1, String::new());
                    }
                }
                _ => {}
            }
            append(&mut current, next, &value);
            field = Some(next);
            started = true;
        }

        if started {
            entries.push(current);
        }
        Ok(Self { entries })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            for comment in &entry.comments {
                out.push_str(comment);
                out.push('\n');
            }
            if entry.is_comment_only() {
                continue;
            }
            if let Some(ctx) = &entry.msgctxt {
                write_field(&mut out, "msgctxt", ctx);
            }
            write_field(&mut out, "msgid", &entry.msgid);
            if let Some(plural) = &entry.msgid_plural {
                write_field(&mut out, "msgid_plural", plural);
                for (idx, value) in entry.msgstr_plural.iter().enumerate() {
                    write_field(&mut out, &format!("msgstr[{}]", idx), value);
                }
            } else {
                write_field(&mut out, "msgstr", &entry.msgstr);
            }
        }
        out
    }
}

fn append(entry: &mut PoEntry, field: Field, value: &str) {
    match field {
        Field::Ctxt => entry.msgctxt.get_or_insert_with(String::new).push_str(value),
        Field::Id => entry.msgid.push_str(value),
        Field::IdPlural => entry.msgid_plural.get_or_insert_with(String::new).push_str(value),
        Field::Str => entry.msgstr.push_str(value),
        Field::StrPlural(idx) => {
            if let Some(slot) = entry.msgstr_plural.get_mut(idx) {
                slot.push_str(value);
            }
        }
    }
}

fn unquote(quoted: &str, lineno: usize) -> Result<String> {
    if quoted.len() < 2 || !quoted.starts_with('"') || !quoted.ends_with('"') {
        return Err(RelayError::Catalog(format!("line {}: expected quoted string", lineno)));
    }
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => {
                return Err(RelayError::Catalog(format!("line {}: dangling escape", lineno)));
            }
        }
    }
    Ok(out)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn write_field(out: &mut String, keyword: &str, value: &str) {
    let pieces: Vec<&str> = value.split_inclusive('\n').collect();
    if pieces.len() <= 1 {
        out.push_str(&format!("{} \"{}\"\n", keyword, escape(value)));
        return;
    }
    out.push_str(&format!("{} \"\"\n", keyword));
    for piece in pieces {
        out.push_str(&format!("\"{}\"\n", escape(piece)));
    }
}
