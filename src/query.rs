//! Lucene query construction for the MusicBrainz search endpoints.
//!
//! Every value is escaped and quoted, so user-supplied tag text can never
//! turn into operators, groups or wildcards on the server side.

/// Tokens with special meaning in the Lucene query grammar.
/// The backslash comes first so escapes inserted for later tokens are
/// not escaped again.
const SPECIALS: &[&str] = &[
    "\\", "+", "-", "&&", "||", "!", "(", ")", "{", "}", "[", "]", "^", "\"", "~", "*", "?",
    ":", "/",
];

/// One `name:"value"` clause of a search query.
#[derive(Debug, Clone, Copy)]
pub struct QueryField<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// Required clauses are emitted even when `value` is blank.
    pub required: bool,
}

impl<'a> QueryField<'a> {
    pub fn required(name: &'a str, value: &'a str) -> Self {
        QueryField { name, value, required: true }
    }

    pub fn optional(name: &'a str, value: &'a str) -> Self {
        QueryField { name, value, required: false }
    }

    fn render(&self) -> Option<String> {
        if !self.required && self.value.trim().is_empty() {
            return None;
        }
        Some(format!("{}:\"{}\"", self.name, escape_lucene(self.value)))
    }
}

/// Prefix every Lucene special token in `s` with a backslash.
pub fn escape_lucene(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut rest = s;
    'outer: while !rest.is_empty() {
        for special in SPECIALS {
            if let Some(tail) = rest.strip_prefix(special) {
                out.push('\\');
                out.push_str(special);
                rest = tail;
                continue 'outer;
            }
        }
        let ch = rest.chars().next().unwrap_or_default();
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}

/// Join the present fields with `AND`.
///
/// Optional fields with an empty or whitespace-only value are dropped.
/// A blank required field still produces a clause (`artist:""`), which
/// simply never matches anything.
pub fn build_search_query(fields: &[QueryField<'_>]) -> String {
    fields
        .iter()
        .filter_map(QueryField::render)
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Query for the recording search endpoint.
pub fn recording_query(artist: &str, title: &str, album: &str) -> String {
    build_search_query(&[
        QueryField::required("artist", artist),
        QueryField::required("recording", title),
        QueryField::optional("release", album),
    ])
}

/// Query for the release-group search endpoint.
pub fn release_group_query(artist: &str, album: &str) -> String {
    build_search_query(&[
        QueryField::required("artist", artist),
        QueryField::required("releasegroup", album),
    ])
}
