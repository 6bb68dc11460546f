//! Statement splitter.
//!
//! Pipeline:
//!   SchemaFile.content
//!     └─ Statements (lazy iterator, cloneable to restart)
//!          ├─ quoted literals / identifiers  → copied verbatim
//!          ├─ comments                       → dropped (markers noted)
//!          └─ code                           → `#__` replaced by the prefix
//!
//! A `;` ends a statement only outside quotes and comments. Empty segments
//! never surface as statements; a trailing fragment without a terminator is
//! kept if it has content.
//!
//! A `@can-fail` marker applies to the statement whose span holds it. A
//! comment that follows a terminator on the same line belongs to the statement
//! that terminator ended.

use std::{iter::FusedIterator, path::Path, sync::Arc};

use crate::{
  dialect::Dialect,
  error::{ParseError, Unterminated},
  schema::{SchemaFile, Statement},
};

const TERMINATOR: u8 = b';';
const PREFIX_PLACEHOLDER: &str = "#__";
const CAN_FAIL_MARKER: &str = "@can-fail";

// ─── Lexical rules ───────────────────────────────────────────────────────────

/// The parts of the lexical grammar that differ between dialects.
#[derive(Debug, Clone, Copy, Default)]
struct Lexicon {
  /// `\'` escapes a quote inside literals.
  backslash_escapes:   bool,
  /// `E'...'` literals take backslash escapes.
  escape_strings:      bool,
  backtick_quotes:     bool,
  bracket_quotes:      bool,
  hash_comments:       bool,
  /// `/*! ... */` is code, not a comment.
  executable_comments: bool,
  dollar_quotes:       bool,
  /// `CREATE TRIGGER ... BEGIN ...; END` is one statement.
  compound_triggers:   bool,
}

impl Lexicon {
  fn for_dialect(dialect: Dialect) -> Self {
    match dialect {
      Dialect::MySql => Self {
        backslash_escapes: true,
        backtick_quotes: true,
        hash_comments: true,
        executable_comments: true,
        ..Self::default()
      },
      Dialect::PostgreSql => Self {
        escape_strings: true,
        dollar_quotes: true,
        ..Self::default()
      },
      Dialect::Sqlite => Self {
        backtick_quotes: true,
        bracket_quotes: true,
        compound_triggers: true,
        ..Self::default()
      },
      Dialect::SqlServer => Self {
        bracket_quotes: true,
        ..Self::default()
      },
      Dialect::Generic => Self::default(),
    }
  }
}

// ─── Splitter ────────────────────────────────────────────────────────────────

/// Splits schema files into [`Statement`]s using one dialect's rules.
#[derive(Debug, Clone)]
pub struct Splitter {
  lexicon:      Lexicon,
  table_prefix: Option<String>,
}

impl Splitter {
  pub fn new(dialect: Dialect) -> Self {
    Self {
      lexicon: Lexicon::for_dialect(dialect),
      table_prefix: None,
    }
  }

  /// Replace `#__` placeholders outside quotes with `prefix`.
  pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.table_prefix = Some(prefix.into());
    self
  }

  pub fn split<'a>(&'a self, file: &'a SchemaFile) -> Statements<'a> {
    self.split_str(file.path.clone(), &file.content)
  }

  pub fn split_str<'a>(&'a self, origin: Arc<Path>, source: &'a str) -> Statements<'a> {
    Statements {
      splitter: self,
      source,
      origin,
      pos: 0,
      line_mark: (0, 1),
      marker_taken: 0,
      done: false,
    }
  }
}

// ─── Iterator ────────────────────────────────────────────────────────────────

/// Lazy sequence of statements. Clone it to restart from the same point.
///
/// Yields `Err` once for an unterminated quote or comment, then stops.
#[derive(Debug, Clone)]
pub struct Statements<'a> {
  splitter:     &'a Splitter,
  source:       &'a str,
  origin:       Arc<Path>,
  pos:          usize,
  /// `(offset, line)` of the last position whose line number is known.
  line_mark:    (usize, usize),
  /// End of a trailing marker comment already given to the previous
  /// statement.
  marker_taken: usize,
  done:         bool,
}

/// A statement being accumulated.
#[derive(Default)]
struct Pending {
  text:     String,
  start:    Option<usize>,
  can_fail: bool,
  /// `BEGIN`/`CASE` minus `END` words seen in code.
  depth:    i64,
}

impl Statements<'_> {
  fn line_at(&mut self, offset: usize) -> usize {
    if offset < self.line_mark.0 {
      self.line_mark = (0, 1);
    }
    let (from, line) = self.line_mark;
    let line = line + self.source.as_bytes()[from..offset]
      .iter()
      .filter(|&&b| b == b'\n')
      .count();
    self.line_mark = (offset, line);
    line
  }

  fn fail(&mut self, offset: usize, kind: Unterminated) -> Option<Result<Statement, ParseError>> {
    self.done = true;
    let line = self.line_at(offset);
    Some(Err(ParseError {
      file: self.origin.clone(),
      offset,
      line,
      kind,
    }))
  }

  /// Append code from `source[from..to]`, substituting the table prefix.
  fn push_code(&self, pending: &mut Pending, from: usize, to: usize) {
    if from >= to {
      return;
    }
    let slice = &self.source[from..to];
    note_start(pending, from, slice);
    for word in slice.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
      if word.eq_ignore_ascii_case("BEGIN") || word.eq_ignore_ascii_case("CASE") {
        pending.depth += 1;
      } else if word.eq_ignore_ascii_case("END") {
        pending.depth -= 1;
      }
    }
    match &self.splitter.table_prefix {
      Some(prefix) => pending.text.push_str(&slice.replace(PREFIX_PLACEHOLDER, prefix)),
      None => pending.text.push_str(slice),
    }
  }

  /// Append a quoted literal or identifier verbatim.
  fn push_raw(&self, pending: &mut Pending, from: usize, to: usize) {
    let slice = &self.source[from..to];
    note_start(pending, from, slice);
    pending.text.push_str(slice);
  }

  /// If a comment holding the can-fail marker follows `after` on the same
  /// line, return where that comment ends.
  fn trailing_marker(&self, after: usize) -> Option<usize> {
    let source = self.source;
    let lexicon = self.splitter.lexicon;
    let line_end = source[after..].find('\n').map_or(source.len(), |n| after + n);
    let rest = &source[after..line_end];
    let start = line_end - rest.trim_start().len();
    let comment = &source[start..line_end];

    let hash = lexicon.hash_comments
      && comment.starts_with('#')
      && !comment.starts_with(PREFIX_PLACEHOLDER);
    let executable = lexicon.executable_comments && comment.starts_with("/*!");

    let end = if comment.starts_with("--") || hash {
      line_end
    } else if comment.starts_with("/*") && !executable {
      start + 2 + source[start + 2..].find("*/")? + 2
    } else {
      return None;
    };
    source[start..end].contains(CAN_FAIL_MARKER).then_some(end)
  }

  fn needs_more(&self, pending: &Pending) -> bool {
    self.splitter.lexicon.compound_triggers && pending.depth > 0 && is_trigger(&pending.text)
  }

  fn finish(&mut self, pending: Pending) -> Option<Statement> {
    let text = pending.text.trim();
    let start = pending.start?;
    if text.is_empty() {
      return None;
    }
    let line = self.line_at(start);
    Some(Statement {
      text: text.to_owned(),
      origin_file: self.origin.clone(),
      origin_offset: start,
      line,
      can_fail: pending.can_fail,
    })
  }
}

impl Iterator for Statements<'_> {
  type Item = Result<Statement, ParseError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }
    let source = self.source;
    let bytes = source.as_bytes();
    let lexicon = self.splitter.lexicon;

    let mut pending = Pending::default();
    let mut seg = self.pos;
    let mut i = self.pos;

    while i < bytes.len() {
      let b = bytes[i];
      let quoted = match b {
        b'\'' => Some((
          b,
          lexicon.backslash_escapes || (lexicon.escape_strings && escape_prefix(bytes, i)),
        )),
        b'"' => Some((b, lexicon.backslash_escapes)),
        b'`' if lexicon.backtick_quotes => Some((b'`', false)),
        b'[' if lexicon.bracket_quotes => Some((b']', false)),
        _ => None,
      };

      if let Some((close, backslash)) = quoted {
        let Some(end) = scan_delimited(bytes, i, close, backslash) else {
          return self.fail(i, unterminated_kind(b));
        };
        self.push_code(&mut pending, seg, i);
        self.push_raw(&mut pending, i, end);
        i = end;
        seg = end;
        continue;
      }

      if b == b'$' && lexicon.dollar_quotes {
        if let Some(tag_end) = dollar_tag(bytes, i) {
          let tag = &source[i..tag_end];
          let Some(found) = source[tag_end..].find(tag) else {
            return self.fail(i, Unterminated::DollarQuote);
          };
          let end = tag_end + found + tag.len();
          self.push_code(&mut pending, seg, i);
          self.push_raw(&mut pending, i, end);
          i = end;
          seg = end;
          continue;
        }
        i += 1;
        continue;
      }

      let next = bytes.get(i + 1).copied();
      let line_comment = (b == b'-' && next == Some(b'-'))
        || (b == b'#' && lexicon.hash_comments && !source[i..].starts_with(PREFIX_PLACEHOLDER));
      if line_comment {
        let end = source[i..].find('\n').map_or(bytes.len(), |n| i + n);
        self.push_code(&mut pending, seg, i);
        pending.can_fail |= i >= self.marker_taken && source[i..end].contains(CAN_FAIL_MARKER);
        // The newline stays in the code run as whitespace.
        i = end;
        seg = end;
        continue;
      }

      if b == b'/' && next == Some(b'*') {
        let Some(close) = source[i + 2..].find("*/") else {
          return self.fail(i, Unterminated::BlockComment);
        };
        let end = i + 2 + close + 2;
        if lexicon.executable_comments && bytes.get(i + 2) == Some(&b'!') {
          i = end;
          continue;
        }
        self.push_code(&mut pending, seg, i);
        pending.can_fail |= i >= self.marker_taken && source[i..end].contains(CAN_FAIL_MARKER);
        pending.text.push(' ');
        i = end;
        seg = end;
        continue;
      }

      if b == TERMINATOR {
        self.push_code(&mut pending, seg, i);
        i += 1;
        seg = i;
        if self.needs_more(&pending) {
          pending.text.push(';');
          continue;
        }
        if let Some(end) = self.trailing_marker(i) {
          pending.can_fail = true;
          self.marker_taken = end;
        }
        self.pos = i;
        if let Some(statement) = self.finish(std::mem::take(&mut pending)) {
          return Some(Ok(statement));
        }
        continue;
      }

      i += 1;
    }

    self.push_code(&mut pending, seg, bytes.len());
    self.pos = bytes.len();
    self.done = true;
    self.finish(pending).map(Ok)
  }
}

impl FusedIterator for Statements<'_> {}

// ─── Scanning helpers ────────────────────────────────────────────────────────

fn note_start(pending: &mut Pending, from: usize, slice: &str) {
  if pending.start.is_none()
    && let Some(idx) = slice.find(|c: char| !c.is_whitespace())
  {
    pending.start = Some(from + idx);
  }
}

/// End (exclusive) of the quoted run opening at `open`, or `None` if it is
/// never closed. A doubled closing character is an escaped one.
fn scan_delimited(bytes: &[u8], open: usize, close: u8, backslash: bool) -> Option<usize> {
  let mut j = open + 1;
  while j < bytes.len() {
    let c = bytes[j];
    if backslash && c == b'\\' {
      j += 2;
      continue;
    }
    if c == close {
      if bytes.get(j + 1) == Some(&close) {
        j += 2;
        continue;
      }
      return Some(j + 1);
    }
    j += 1;
  }
  None
}

/// If a dollar-quote tag (`$$` or `$name$`) starts at `at`, return its end.
fn dollar_tag(bytes: &[u8], at: usize) -> Option<usize> {
  if at > 0 && is_ident_byte(bytes[at - 1]) {
    return None;
  }
  let mut j = at + 1;
  match bytes.get(j) {
    Some(b'$') => return Some(j + 1),
    Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {}
    _ => return None,
  }
  while let Some(&c) = bytes.get(j) {
    if c == b'$' {
      return Some(j + 1);
    }
    if !is_ident_byte(c) {
      return None;
    }
    j += 1;
  }
  None
}

/// Whether the quote at `at` opens an `E'...'` escape string.
fn escape_prefix(bytes: &[u8], at: usize) -> bool {
  at > 0
    && matches!(bytes[at - 1], b'E' | b'e')
    && (at < 2 || !is_ident_byte(bytes[at - 2]))
}

fn is_ident_byte(b: u8) -> bool { b.is_ascii_alphanumeric() || b == b'_' }

fn unterminated_kind(open: u8) -> Unterminated {
  match open {
    b'\'' => Unterminated::SingleQuote,
    b'"' => Unterminated::DoubleQuote,
    b'`' => Unterminated::Backtick,
    _ => Unterminated::Bracket,
  }
}

fn is_trigger(text: &str) -> bool {
  let mut words = text.split_whitespace();
  if !words.next().is_some_and(|w| w.eq_ignore_ascii_case("CREATE")) {
    return false;
  }
  words
    .find(|w| !w.eq_ignore_ascii_case("TEMP") && !w.eq_ignore_ascii_case("TEMPORARY"))
    .is_some_and(|w| w.eq_ignore_ascii_case("TRIGGER"))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn split(dialect: Dialect, src: &str) -> Vec<String> {
    let splitter = Splitter::new(dialect);
    splitter
      .split_str(Arc::from(Path::new("test.sql")), src)
      .map(|s| s.unwrap().text)
      .collect()
  }

  fn split_err(dialect: Dialect, src: &str) -> ParseError {
    let splitter = Splitter::new(dialect);
    splitter
      .split_str(Arc::from(Path::new("test.sql")), src)
      .find_map(Result::err)
      .expect("expected a parse error")
  }

  #[test]
  fn ignores_terminators_in_literals_and_comments() {
    let out = split(
      Dialect::Generic,
      "insert into t values ('a;b'); -- comment; \n insert into t values (1);",
    );
    assert_eq!(out, vec!["insert into t values ('a;b')", "insert into t values (1)"]);
  }

  #[test]
  fn doubled_quotes_are_escapes() {
    let out = split(Dialect::Generic, "select 'it''s; fine'; select \"a\"\"b;\";");
    assert_eq!(out, vec!["select 'it''s; fine'", "select \"a\"\"b;\""]);
  }

  #[test]
  fn backslash_escapes_depend_on_dialect() {
    let src = "select 'C:\\'; select 2;";
    assert_eq!(split(Dialect::PostgreSql, src), vec!["select 'C:\\'", "select 2"]);

    let err = split_err(Dialect::MySql, src);
    assert_eq!(err.kind, Unterminated::SingleQuote);
    assert_eq!(err.offset, 7);

    let out = split(Dialect::MySql, "insert into t values ('a\\';b'); select 1;");
    assert_eq!(out, vec!["insert into t values ('a\\';b')", "select 1"]);
  }

  #[test]
  fn postgres_escape_strings() {
    let out = split(Dialect::PostgreSql, "insert into t values (E'it\\'s; ok'); select 1;");
    assert_eq!(out, vec!["insert into t values (E'it\\'s; ok')", "select 1"]);

    // Only a bare `E` prefix switches escaping on.
    let out = split(Dialect::PostgreSql, "select name'a\\'; select 2;");
    assert_eq!(out, vec!["select name'a\\'", "select 2"]);
  }

  #[test]
  fn trailing_fragment_kept_only_with_content() {
    assert_eq!(split(Dialect::Generic, "select 1; select 2"), vec!["select 1", "select 2"]);
    assert_eq!(split(Dialect::Generic, "select 1;\n  \n\t"), vec!["select 1"]);
    assert!(split(Dialect::Generic, " ;;\n -- only a comment\n;").is_empty());
  }

  #[test]
  fn block_comments_are_dropped() {
    let out = split(
      Dialect::Generic,
      "/* header; with terminator */\ncreate table a (id int /* inline; */);\n/* trailer */",
    );
    assert_eq!(out, vec!["create table a (id int  )"]);
  }

  #[test]
  fn unterminated_block_comment_reports_line() {
    let err = split_err(Dialect::Generic, "select 1;\nselect 2;\n/* never closed");
    assert_eq!(err.kind, Unterminated::BlockComment);
    assert_eq!(err.line, 3);
  }

  #[test]
  fn postgres_dollar_quotes() {
    let out = split(
      Dialect::PostgreSql,
      "create function f() returns int as $body$ select 1; $body$ language sql;\n\
       do $$ begin perform 1; end $$; select $1;",
    );
    assert_eq!(out.len(), 3);
    assert!(out[0].contains("$body$ select 1; $body$"));
    assert_eq!(out[1], "do $$ begin perform 1; end $$");
    assert_eq!(out[2], "select $1");
  }

  #[test]
  fn sqlite_trigger_bodies_stay_whole() {
    let out = split(
      Dialect::Sqlite,
      "create trigger t after insert on a begin\n  insert into log values (1);\n  \
       update a set x = case when 1 then 2 else 3 end;\nend;\ncreate table b (id int);",
    );
    assert_eq!(out.len(), 2);
    assert!(out[0].starts_with("create trigger t"));
    assert!(out[0].ends_with("end"));
    assert_eq!(out[1], "create table b (id int)");
  }

  #[test]
  fn triggers_split_on_other_dialects() {
    let out = split(Dialect::Generic, "create trigger t begin insert into l values (1); end;");
    assert_eq!(out.len(), 2);
  }

  #[test]
  fn prefix_substituted_outside_quotes_only() {
    let splitter = Splitter::new(Dialect::MySql).with_table_prefix("jos_");
    let out: Vec<_> = splitter
      .split_str(
        Arc::from(Path::new("p.sql")),
        "# a comment\ninsert into `#__t` values ('#__x');\ncreate table #__items (id int);",
      )
      .map(|s| s.unwrap().text)
      .collect();
    assert_eq!(out, vec!["insert into `#__t` values ('#__x')", "create table jos_items (id int)"]);
  }

  #[test]
  fn hash_comments_only_on_mysql() {
    assert_eq!(split(Dialect::MySql, "select 1 # one; two\n;"), vec!["select 1"]);
    assert_eq!(split(Dialect::Generic, "select 1 # one; two\n;"), vec!["select 1 # one", "two"]);
  }

  #[test]
  fn mysql_executable_comments_kept() {
    let out = split(Dialect::MySql, "/*!40101 SET NAMES utf8; */;\nselect 1;");
    assert_eq!(out, vec!["/*!40101 SET NAMES utf8; */", "select 1"]);
  }

  #[test]
  fn bracket_identifiers() {
    let out = split(Dialect::SqlServer, "create table [odd;name]] x] (id int); select 1;");
    assert_eq!(out, vec!["create table [odd;name]] x] (id int)", "select 1"]);
    let err = split_err(Dialect::SqlServer, "select [open");
    assert_eq!(err.kind, Unterminated::Bracket);
  }

  #[test]
  fn can_fail_marker_applies_to_statement() {
    let splitter = Splitter::new(Dialect::Generic);
    let out: Vec<_> = splitter
      .split_str(
        Arc::from(Path::new("m.sql")),
        "-- @can-fail\ndrop index idx;\ncreate table x (id int);\nalter table x /* @can-fail */ add y int;",
      )
      .map(Result::unwrap)
      .collect();
    assert!(out[0].can_fail);
    assert!(!out[1].can_fail);
    assert!(out[2].can_fail);
  }

  #[test]
  fn trailing_can_fail_marker_belongs_to_finished_statement() {
    let splitter = Splitter::new(Dialect::Generic);
    let flags: Vec<_> = splitter
      .split_str(
        Arc::from(Path::new("m.sql")),
        "drop index old_idx; -- @can-fail\n\
         create table important (id int);\n\
         drop view v; /* @can-fail */\n\
         create table after (id int);",
      )
      .map(|s| {
        let s = s.unwrap();
        (s.text, s.can_fail)
      })
      .collect();
    assert_eq!(
      flags,
      vec![
        ("drop index old_idx".to_owned(), true),
        ("create table important (id int)".to_owned(), false),
        ("drop view v".to_owned(), true),
        ("create table after (id int)".to_owned(), false),
      ]
    );
  }

  #[test]
  fn provenance_offsets_and_lines() {
    let splitter = Splitter::new(Dialect::Generic);
    let src = "\n-- intro\n  create table a (id int);\n\ncreate table b (id int);";
    let out: Vec<_> = splitter
      .split_str(Arc::from(Path::new("o.sql")), src)
      .map(Result::unwrap)
      .collect();
    assert_eq!(out[0].line, 3);
    assert_eq!(&src[out[0].origin_offset..out[0].origin_offset + 6], "create");
    assert_eq!(out[1].line, 5);
    assert_eq!(&src[out[1].origin_offset..out[1].origin_offset + 15], "create table b ");
  }

  #[test]
  fn restartable_by_clone() {
    let splitter = Splitter::new(Dialect::Generic);
    let mut first = splitter.split_str(Arc::from(Path::new("r.sql")), "a; b; c");
    first.next();
    let rest: Vec<_> = first.clone().map(|s| s.unwrap().text).collect();
    let again: Vec<_> = first.map(|s| s.unwrap().text).collect();
    assert_eq!(rest, vec!["b", "c"]);
    assert_eq!(rest, again);
  }

  #[test]
  fn stops_after_error() {
    let splitter = Splitter::new(Dialect::Generic);
    let mut it = splitter.split_str(Arc::from(Path::new("e.sql")), "select 1; select 'oops");
    assert!(it.next().unwrap().is_ok());
    assert!(it.next().unwrap().is_err());
    assert!(it.next().is_none());
  }
}
