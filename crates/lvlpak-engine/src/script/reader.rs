//! Section script reader
//!
//! Turns script text into a [`SectionTable`]: named sections holding
//! keyword lines, each line remembering where it came from. `$(NAME)`
//! references are expanded from the build defines before a line is lexed.

use rustc_hash::FxHashMap;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::files::{normalize, FileSource};
use super::lexer::{tokenize, Token};
use crate::config::DuplicatePolicy;
use crate::diagnostics::SourceMap;
use crate::error::{BuildError, BuildErrorKind, Warning, WarningKind};
use crate::store::validate_alignment;

/// Where a script line came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// File id in the [`SourceMap`]
    pub file_id: usize,
    /// Normalized path of the script file
    pub path: Arc<PathBuf>,
    /// 1-based line number
    pub line: u32,
    /// Byte range of the line within the file
    pub span: Range<usize>,
}

impl Origin {
    /// Directory containing the script file
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// A keyword argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// Quoted string
    Str(String),
    /// Bare word
    Word(String),
}

impl Arg {
    /// Integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric value; integers widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Arg::Int(value) => Some(*value as f64),
            Arg::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Text of a string or bare word
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Arg::Str(text) | Arg::Word(text) => Some(text),
            _ => None,
        }
    }

    /// Short description for error messages
    pub fn describe(&self) -> &'static str {
        match self {
            Arg::Int(_) => "an integer",
            Arg::Float(_) => "a float",
            Arg::Str(_) => "a string",
            Arg::Word(_) => "a word",
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(value) => write!(f, "{}", value),
            Arg::Float(value) => write!(f, "{}", value),
            Arg::Str(text) => write!(f, "{:?}", text),
            Arg::Word(text) => f.write_str(text),
        }
    }
}

/// One `keyword arg…` line
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLine {
    /// Lower-cased keyword
    pub keyword: String,
    /// Arguments in order
    pub args: Vec<Arg>,
    /// Source location
    pub origin: Origin,
}

/// A `[name]` block and its lines
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSection {
    /// Section name
    pub name: String,
    /// `align=N` from the header
    pub alignment: Option<u32>,
    /// Location of the header
    pub origin: Origin,
    /// Body lines
    pub lines: Vec<ScriptLine>,
}

/// Script sections by name, in definition order
#[derive(Debug, Default)]
pub struct SectionTable {
    sections: Vec<ScriptSection>,
    index: FxHashMap<String, usize>,
}

impl SectionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sections
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Look up a section by name
    pub fn get(&self, name: &str) -> Option<&ScriptSection> {
        self.index.get(name).map(|&i| &self.sections[i])
    }

    /// Whether a section is defined
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Sections in definition order
    pub fn iter(&self) -> impl Iterator<Item = &ScriptSection> {
        self.sections.iter()
    }

    /// Add a section, applying `policy` to a name that is already defined.
    /// Returns the warning raised when a duplicate is ignored.
    pub fn insert(
        &mut self,
        section: ScriptSection,
        policy: DuplicatePolicy,
    ) -> Result<Option<Warning>, BuildError> {
        if self.index.contains_key(&section.name) {
            let kind = match policy {
                DuplicatePolicy::Error => {
                    return Err(BuildError::at(
                        BuildErrorKind::DuplicateSection(section.name.clone()),
                        &section.origin,
                    ))
                }
                DuplicatePolicy::Ignore => WarningKind::DuplicateSectionIgnored(section.name.clone()),
            };
            return Ok(Some(Warning::new(kind, Some(&section.origin))));
        }
        self.index.insert(section.name.clone(), self.sections.len());
        self.sections.push(section);
        Ok(None)
    }
}

/// Expand `$(NAME)` references in `line`
pub fn substitute<'t>(
    line: &'t str,
    defines: &BTreeMap<String, String>,
) -> Result<Cow<'t, str>, BuildErrorKind> {
    if !line.contains("$(") {
        return Ok(Cow::Borrowed(line));
    }
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find(')')
            .ok_or_else(|| BuildErrorKind::Syntax("unterminated '$(' reference".to_string()))?;
        let name = after[..end].trim();
        let value = defines
            .get(name)
            .ok_or_else(|| BuildErrorKind::UndefinedVariable(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

/// Reads script files into a [`SectionTable`]
pub struct ScriptReader<'a> {
    files: &'a dyn FileSource,
    sources: &'a mut SourceMap,
    defines: &'a BTreeMap<String, String>,
    policy: DuplicatePolicy,
    table: SectionTable,
    warnings: Vec<Warning>,
}

impl<'a> ScriptReader<'a> {
    /// Create a reader
    pub fn new(
        files: &'a dyn FileSource,
        sources: &'a mut SourceMap,
        defines: &'a BTreeMap<String, String>,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            files,
            sources,
            defines,
            policy,
            table: SectionTable::new(),
            warnings: Vec::new(),
        }
    }

    /// Read a script file through the file source
    pub fn read_file(&mut self, path: &Path) -> Result<(), BuildError> {
        let text = self.files.read_to_string(path).map_err(|source| {
            BuildError::new(BuildErrorKind::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        self.read_source(path, &text)
    }

    /// Read script text that claims to live at `path`
    pub fn read_source(&mut self, path: &Path, text: &str) -> Result<(), BuildError> {
        let path = Arc::new(normalize(path));
        let file_id = self.sources.add(path.display().to_string(), text);
        let before = self.table.len();

        let mut current: Option<ScriptSection> = None;
        let mut offset = 0usize;
        for (index, raw) in text.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += raw.len();
            let line = raw.trim_end_matches(['\n', '\r']);
            let origin = Origin {
                file_id,
                path: Arc::clone(&path),
                line: index as u32 + 1,
                span: start..start + line.len(),
            };

            let expanded =
                substitute(line, self.defines).map_err(|kind| BuildError::at(kind, &origin))?;
            let tokens = tokenize(&expanded)
                .map_err(|e| BuildError::at(BuildErrorKind::Syntax(e.to_string()), &origin))?;
            let Some((first, _)) = tokens.first() else {
                continue;
            };

            match first {
                Token::LBracket => {
                    let section = parse_header(&tokens, origin)?;
                    if let Some(done) = current.replace(section) {
                        self.commit(done)?;
                    }
                }
                Token::Word(keyword) => {
                    let Some(section) = current.as_mut() else {
                        return Err(BuildError::at(
                            BuildErrorKind::Syntax(format!(
                                "'{}' appears before the first section header",
                                keyword
                            )),
                            &origin,
                        ));
                    };
                    let args = parse_args(&tokens[1..], &origin)?;
                    section.lines.push(ScriptLine {
                        keyword: keyword.to_ascii_lowercase(),
                        args,
                        origin,
                    });
                }
                other => {
                    return Err(BuildError::at(
                        BuildErrorKind::Syntax(format!(
                            "expected a keyword or section header, found {}",
                            token_name(other)
                        )),
                        &origin,
                    ))
                }
            }
        }
        if let Some(done) = current {
            self.commit(done)?;
        }

        debug!(
            path = %path.display(),
            sections = self.table.len() - before,
            "read script"
        );
        Ok(())
    }

    /// Warnings raised so far
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Finish reading
    pub fn finish(self) -> (SectionTable, Vec<Warning>) {
        (self.table, self.warnings)
    }

    fn commit(&mut self, section: ScriptSection) -> Result<(), BuildError> {
        if let Some(warning) = self.table.insert(section, self.policy)? {
            warn!("{}", warning);
            self.warnings.push(warning);
        }
        Ok(())
    }
}

fn parse_header(tokens: &[(Token, Range<usize>)], origin: Origin) -> Result<ScriptSection, BuildError> {
    let syntax = |message: &str| BuildError::at(BuildErrorKind::Syntax(message.to_string()), &origin);
    let mut rest = tokens[1..].iter().map(|(token, _)| token);

    let name = match rest.next() {
        Some(Token::Word(name)) | Some(Token::Str(name)) => name.clone(),
        _ => return Err(syntax("expected a section name after '['")),
    };

    let mut alignment = None;
    loop {
        match rest.next() {
            Some(Token::RBracket) => break,
            Some(Token::Word(key)) if key.eq_ignore_ascii_case("align") => {
                match (rest.next(), rest.next()) {
                    (Some(Token::Equals), Some(Token::Int(value))) => {
                        let checked = u32::try_from(*value)
                            .ok()
                            .and_then(|v| validate_alignment(v).ok());
                        match checked {
                            Some(v) => alignment = Some(v),
                            None => {
                                return Err(BuildError::at(
                                    BuildErrorKind::InvalidArgument {
                                        keyword: "align".to_string(),
                                        message: format!("{} is not a valid alignment", value),
                                    },
                                    &origin,
                                ))
                            }
                        }
                    }
                    _ => return Err(syntax("expected 'align=N'")),
                }
            }
            _ => return Err(syntax("expected 'align=N' or ']' in section header")),
        }
    }
    if rest.next().is_some() {
        return Err(syntax("unexpected text after section header"));
    }

    Ok(ScriptSection {
        name,
        alignment,
        origin,
        lines: Vec::new(),
    })
}

fn parse_args(tokens: &[(Token, Range<usize>)], origin: &Origin) -> Result<Vec<Arg>, BuildError> {
    let mut args = Vec::with_capacity(tokens.len());
    for (token, _) in tokens {
        let arg = match token {
            Token::Comma => continue,
            Token::Int(value) => Arg::Int(*value),
            Token::Float(value) => Arg::Float(*value),
            Token::Str(text) => Arg::Str(text.clone()),
            Token::Word(text) => Arg::Word(text.clone()),
            other => {
                return Err(BuildError::at(
                    BuildErrorKind::Syntax(format!("unexpected {} in argument list", token_name(other))),
                    origin,
                ))
            }
        };
        args.push(arg);
    }
    Ok(args)
}

fn token_name(token: &Token) -> &'static str {
    match token {
        Token::LBracket => "'['",
        Token::RBracket => "']'",
        Token::Comma => "','",
        Token::Equals => "'='",
        Token::Float(_) => "a float",
        Token::Int(_) => "an integer",
        Token::Str(_) => "a string",
        Token::Word(_) => "a word",
    }
}
