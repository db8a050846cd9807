//! Section compiler
//!
//! Expands the script's sections, starting from the root, into a graph of
//! [`Section`]s. Referenced sections are compiled on first use and memoized
//! by name; a section currently being compiled is tracked on a stack so that
//! cycles are reported instead of recursing forever. Data files go through
//! the [`ContentStore`] so identical content is stored once.

mod keyword;
mod section;

pub use keyword::Keyword;
pub use section::{Part, Section, SectionId};

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::config::BundleConfig;
use crate::error::{BuildError, BuildErrorKind, RefKind, Warning, WarningKind};
use crate::format::{round_up, Endian};
use crate::script::{normalize, Arg, FileSource, Origin, ScriptLine, SectionTable};
use crate::store::{validate_alignment, BlobId, ContentStore};

/// Output of the compiler: everything the packer needs
#[derive(Debug)]
pub struct CompiledProgram {
    /// Deduplicated blobs
    pub store: ContentStore,
    /// Every compiled section, reachable or not
    pub sections: Vec<Section>,
    /// Root section
    pub root: SectionId,
    /// Warnings raised while compiling
    pub warnings: Vec<Warning>,
}

impl CompiledProgram {
    /// Look up a section
    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id.index()]
    }

    /// Find a compiled section by name
    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .position(|section| section.name == name)
            .map(SectionId::new)
    }
}

/// Compiles script sections into [`Section`]s
pub struct SectionCompiler<'a> {
    table: &'a SectionTable,
    files: &'a dyn FileSource,
    search: Vec<PathBuf>,
    chunk_size: u32,
    endian: Endian,
    store: ContentStore,
    sections: Vec<Section>,
    by_name: FxHashMap<String, SectionId>,
    runtime_files: FxHashMap<String, SectionId>,
    /// Sections being compiled, outermost first
    stack: Vec<String>,
    warnings: Vec<Warning>,
}

impl<'a> SectionCompiler<'a> {
    /// Create a compiler over `table` using the layout settings of `config`
    pub fn new(table: &'a SectionTable, files: &'a dyn FileSource, config: &BundleConfig) -> Self {
        Self {
            table,
            files,
            search: config.search_paths(),
            chunk_size: config.bundle.chunk_size,
            endian: config.bundle.endian,
            store: ContentStore::new(config.bundle.pad_size, config.bundle.dedup),
            sections: Vec::new(),
            by_name: FxHashMap::default(),
            runtime_files: FxHashMap::default(),
            stack: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Compile everything reachable from `root`
    pub fn compile(mut self, root: &str) -> Result<CompiledProgram, BuildError> {
        let root = self.compile_section(root, None)?;
        debug!(
            sections = self.sections.len(),
            blobs = self.store.len(),
            dedup_hits = self.store.dedup_hits(),
            "compiled sections"
        );
        Ok(CompiledProgram {
            store: self.store,
            sections: self.sections,
            root,
            warnings: self.warnings,
        })
    }

    /// Compile the named section (memoized). `referrer` is the line that
    /// asked for it, used to locate errors.
    pub fn compile_section(
        &mut self,
        name: &str,
        referrer: Option<&Origin>,
    ) -> Result<SectionId, BuildError> {
        if let Some(&id) = self.by_name.get(name) {
            if self.stack.iter().any(|open| open == name) {
                let chain = self.cycle_chain(name);
                return Err(located(BuildErrorKind::CyclicSection(chain), referrer));
            }
            return Ok(id);
        }

        let table = self.table;
        let script = table.get(name).ok_or_else(|| {
            located(
                BuildErrorKind::UnresolvableReference {
                    kind: RefKind::Section,
                    name: name.to_string(),
                },
                referrer,
            )
        })?;
        if let Some(alignment) = script.alignment {
            self.check_alignment("align", alignment, &script.origin)?;
        }

        let id = SectionId::new(self.sections.len());
        self.sections.push(Section::new(name, script.alignment, Some(script.origin.clone())));
        self.by_name.insert(name.to_string(), id);
        self.stack.push(name.to_string());

        let mut section = Section::new(name, script.alignment, Some(script.origin.clone()));
        let mut base_dir: Option<PathBuf> = None;
        for line in &script.lines {
            self.compile_line(&mut section, line, &mut base_dir)?;
        }

        self.stack.pop();
        if section.size == 0 {
            self.warn(
                WarningKind::ZeroLengthItem {
                    what: format!("section '{}'", name),
                },
                Some(&script.origin),
            );
        }
        trace!(section = name, size = section.size, parts = section.parts.len(), "compiled section");
        self.sections[id.index()] = section;
        Ok(id)
    }

    fn compile_line(
        &mut self,
        section: &mut Section,
        line: &ScriptLine,
        base_dir: &mut Option<PathBuf>,
    ) -> Result<(), BuildError> {
        let origin = &line.origin;
        let keyword = Keyword::parse(&line.keyword).ok_or_else(|| {
            BuildError::at(BuildErrorKind::UnknownKeyword(line.keyword.clone()), origin)
        })?;

        match keyword {
            Keyword::File => {
                expect_args(line, 1, 2)?;
                let path = text_arg(line, 0)?;
                let alignment = match line.args.get(1) {
                    Some(_) => {
                        let value = int_arg(line, 1, 1, self.chunk_size as i64)? as u32;
                        Some(self.check_alignment(&line.keyword, value, origin)?)
                    }
                    None => None,
                };
                let blob = self.intern_file(path, alignment, line, base_dir.as_deref())?;
                self.push(section, Part::BlobRef(blob), origin)?;
            }
            Keyword::Level => {
                expect_args(line, 1, 1)?;
                let target = text_arg(line, 0)?;
                let id = self.compile_section(target, Some(origin))?;
                self.push(section, Part::SectionRef(id), origin)?;
            }
            Keyword::Load => {
                expect_args(line, 1, 1)?;
                let filename = text_arg(line, 0)?;
                let record = self.runtime_file(filename, origin)?;
                self.push(
                    section,
                    Part::RuntimeFileRef {
                        name: filename.to_string(),
                        section: record,
                    },
                    origin,
                )?;
            }
            Keyword::Long | Keyword::Word | Keyword::Byte | Keyword::Float => {
                let bytes = self.encode_numbers(keyword, line)?;
                self.push(section, Part::Literal(bytes), origin)?;
            }
            Keyword::String => {
                expect_args(line, 1, usize::MAX)?;
                let mut bytes = Vec::new();
                for index in 0..line.args.len() {
                    bytes.extend_from_slice(text_arg(line, index)?.as_bytes());
                }
                self.push(section, Part::Literal(bytes), origin)?;
            }
            Keyword::Binc => {
                expect_args(line, 1, 1)?;
                let path = self.resolve_path(text_arg(line, 0)?, origin, base_dir.as_deref())?;
                let bytes = self.read_file(&path, origin)?;
                if bytes.is_empty() {
                    self.warn(
                        WarningKind::ZeroLengthItem {
                            what: format!("file '{}'", path.display()),
                        },
                        Some(origin),
                    );
                }
                if bytes.len() as u64 > self.chunk_size as u64 {
                    return Err(BuildError::at(
                        BuildErrorKind::OversizedItem {
                            what: format!("section '{}'", section.name),
                            size: section.size as u64 + bytes.len() as u64,
                            chunk_size: self.chunk_size,
                        },
                        origin,
                    ));
                }
                self.push(section, Part::Literal(bytes), origin)?;
            }
            Keyword::Align => {
                expect_args(line, 1, 1)?;
                let boundary = int_arg(line, 0, 1, self.chunk_size as i64)? as u32;
                let boundary = self.check_alignment(&line.keyword, boundary, origin)?;
                self.push(section, Part::Align { boundary, size: 0 }, origin)?;
            }
            Keyword::Pad => {
                expect_args(line, 1, 1)?;
                let count = int_arg(line, 0, 0, self.chunk_size as i64)? as u32;
                self.push(section, Part::Pad(count), origin)?;
            }
            Keyword::Path => {
                expect_args(line, 1, 1)?;
                let dir = Path::new(text_arg(line, 0)?);
                let dir = if dir.is_absolute() {
                    dir.to_path_buf()
                } else {
                    origin.dir().join(dir)
                };
                *base_dir = Some(normalize(&dir));
            }
            Keyword::Insert => {
                expect_args(line, 1, 1)?;
                let target = text_arg(line, 0)?;
                if self.stack.iter().any(|open| open == target) {
                    return Err(BuildError::at(
                        BuildErrorKind::CyclicInsert(target.to_string()),
                        origin,
                    ));
                }
                let id = self.compile_section(target, Some(origin))?;
                let parts = self.sections[id.index()].parts.clone();
                for part in parts {
                    self.push(section, part, origin)?;
                }
            }
        }
        Ok(())
    }

    /// Append a part and enforce the one-chunk limit
    fn push(&self, section: &mut Section, part: Part, origin: &Origin) -> Result<(), BuildError> {
        section
            .push(part)
            .map_err(|kind| BuildError::at(kind, origin))?;
        if round_up(section.size, self.store.pad_size()) > self.chunk_size {
            return Err(BuildError::at(
                BuildErrorKind::OversizedItem {
                    what: format!("section '{}'", section.name),
                    size: section.size as u64,
                    chunk_size: self.chunk_size,
                },
                origin,
            ));
        }
        Ok(())
    }

    fn check_alignment(&self, keyword: &str, value: u32, origin: &Origin) -> Result<u32, BuildError> {
        if value > self.chunk_size {
            return Err(BuildError::at(
                BuildErrorKind::InvalidArgument {
                    keyword: keyword.to_string(),
                    message: format!("alignment {} exceeds the chunk size {}", value, self.chunk_size),
                },
                origin,
            ));
        }
        validate_alignment(value).map_err(|e| {
            BuildError::at(
                BuildErrorKind::InvalidArgument {
                    keyword: keyword.to_string(),
                    message: e.to_string(),
                },
                origin,
            )
        })
    }

    fn intern_file(
        &mut self,
        raw: &str,
        alignment: Option<u32>,
        line: &ScriptLine,
        base_dir: Option<&Path>,
    ) -> Result<BlobId, BuildError> {
        let origin = &line.origin;
        let path = self.resolve_path(raw, origin, base_dir)?;
        let key = path.display().to_string();
        if let Some(id) = self
            .store
            .find_by_name(&key, alignment)
            .map_err(|e| BuildError::from(e).or_at(origin))?
        {
            trace!(file = %key, blob = %id, "file already interned");
            return Ok(id);
        }

        let bytes = self.read_file(&path, origin)?;
        if bytes.is_empty() {
            self.warn(
                WarningKind::ZeroLengthItem {
                    what: format!("file '{}'", key),
                },
                Some(origin),
            );
        }
        if round_up(bytes.len().min(u32::MAX as usize) as u32, self.store.pad_size()) > self.chunk_size {
            return Err(BuildError::at(
                BuildErrorKind::OversizedItem {
                    what: format!("file '{}'", key),
                    size: bytes.len() as u64,
                    chunk_size: self.chunk_size,
                },
                origin,
            ));
        }
        self.store
            .intern(bytes, Some(&key), alignment)
            .map_err(|e| BuildError::from(e).or_at(origin))
    }

    fn runtime_file(&mut self, filename: &str, origin: &Origin) -> Result<SectionId, BuildError> {
        if let Some(&id) = self.runtime_files.get(filename) {
            return Ok(id);
        }
        let record = Section::runtime_file_record(filename);
        if round_up(record.size, self.store.pad_size()) > self.chunk_size {
            return Err(BuildError::at(
                BuildErrorKind::OversizedItem {
                    what: format!("runtime file record '{}'", filename),
                    size: record.size as u64,
                    chunk_size: self.chunk_size,
                },
                origin,
            ));
        }
        let id = SectionId::new(self.sections.len());
        self.sections.push(record);
        self.runtime_files.insert(filename.to_string(), id);
        Ok(id)
    }

    /// Section `path` override or the script's directory first, then the
    /// configured search paths; the first existing file wins.
    fn resolve_path(
        &self,
        raw: &str,
        origin: &Origin,
        base_dir: Option<&Path>,
    ) -> Result<PathBuf, BuildError> {
        let relative = Path::new(raw);
        let mut candidates = Vec::with_capacity(self.search.len() + 1);
        if relative.is_absolute() {
            candidates.push(relative.to_path_buf());
        } else {
            candidates.push(base_dir.unwrap_or_else(|| origin.dir()).join(relative));
            candidates.extend(self.search.iter().map(|dir| dir.join(relative)));
        }
        candidates
            .into_iter()
            .map(|candidate| normalize(&candidate))
            .find(|candidate| self.files.exists(candidate))
            .ok_or_else(|| {
                BuildError::at(
                    BuildErrorKind::UnresolvableReference {
                        kind: RefKind::File,
                        name: raw.to_string(),
                    },
                    origin,
                )
            })
    }

    fn read_file(&self, path: &Path, origin: &Origin) -> Result<Vec<u8>, BuildError> {
        self.files.read(path).map_err(|source| {
            BuildError::at(
                BuildErrorKind::Io {
                    path: path.to_path_buf(),
                    source,
                },
                origin,
            )
        })
    }

    fn encode_numbers(&self, keyword: Keyword, line: &ScriptLine) -> Result<Vec<u8>, BuildError> {
        expect_args(line, 1, usize::MAX)?;
        let width = keyword.element_width().unwrap_or(4) as usize;
        let mut bytes = Vec::with_capacity(width * line.args.len());
        for (index, arg) in line.args.iter().enumerate() {
            if keyword == Keyword::Float {
                let value = arg
                    .as_float()
                    .ok_or_else(|| wrong_type(line, index, "a number"))?;
                bytes.extend_from_slice(&self.endian.f32_bytes(value as f32));
                continue;
            }
            let (min, max) = keyword.int_range().unwrap_or((i32::MIN as i64, u32::MAX as i64));
            let value = int_arg(line, index, min, max)?;
            match width {
                1 => bytes.push(value as u8),
                2 => bytes.extend_from_slice(&self.endian.u16_bytes(value as u16)),
                _ => bytes.extend_from_slice(&self.endian.u32_bytes(value as u32)),
            }
        }
        Ok(bytes)
    }

    fn warn(&mut self, kind: WarningKind, origin: Option<&Origin>) {
        let warning = Warning::new(kind, origin);
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    fn cycle_chain(&self, name: &str) -> String {
        let start = self.stack.iter().position(|open| open == name).unwrap_or(0);
        let mut chain: Vec<&str> = self.stack[start..].iter().map(String::as_str).collect();
        chain.push(name);
        chain.join(" -> ")
    }
}

fn located(kind: BuildErrorKind, origin: Option<&Origin>) -> BuildError {
    match origin {
        Some(origin) => BuildError::at(kind, origin),
        None => BuildError::new(kind),
    }
}

fn invalid(line: &ScriptLine, message: String) -> BuildError {
    BuildError::at(
        BuildErrorKind::InvalidArgument {
            keyword: line.keyword.clone(),
            message,
        },
        &line.origin,
    )
}

fn expect_args(line: &ScriptLine, min: usize, max: usize) -> Result<(), BuildError> {
    let count = line.args.len();
    if count < min {
        return Err(invalid(line, format!("expected at least {} argument(s), found {}", min, count)));
    }
    if count > max {
        return Err(invalid(line, format!("expected at most {} argument(s), found {}", max, count)));
    }
    Ok(())
}

fn wrong_type(line: &ScriptLine, index: usize, expected: &str) -> BuildError {
    let found = line.args.get(index).map(Arg::describe).unwrap_or("nothing");
    invalid(
        line,
        format!("argument {} must be {}, found {}", index + 1, expected, found),
    )
}

fn text_arg(line: &ScriptLine, index: usize) -> Result<&str, BuildError> {
    line.args
        .get(index)
        .and_then(Arg::as_text)
        .ok_or_else(|| wrong_type(line, index, "a name or string"))
}

fn int_arg(line: &ScriptLine, index: usize, min: i64, max: i64) -> Result<i64, BuildError> {
    let value = line
        .args
        .get(index)
        .and_then(Arg::as_int)
        .ok_or_else(|| wrong_type(line, index, "an integer"))?;
    if value < min || value > max {
        return Err(invalid(
            line,
            format!("{} is outside the range {}..={}", value, min, max),
        ));
    }
    Ok(value)
}
