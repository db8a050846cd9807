//! Diagnostic rendering for build errors and warnings
//!
//! Script files are registered in a [`SourceMap`] as they are read, so any
//! error or warning carrying an [`Origin`] can be shown with the offending
//! line underlined.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{NoColor, WriteColor};

use crate::error::{BuildError, BuildErrorKind, Warning, WarningKind};
use crate::script::Origin;

/// Script sources seen during a build, indexed by file id
pub struct SourceMap {
    files: SimpleFiles<String, String>,
    count: usize,
}

impl Default for SourceMap {
    fn default() -> Self {
        Self {
            files: SimpleFiles::new(),
            count: 0,
        }
    }
}

impl SourceMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file and return its id
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> usize {
        self.count += 1;
        self.files.add(name.into(), source.into())
    }

    /// Number of registered files
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no file has been registered
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The underlying codespan file set
    pub fn files(&self) -> &SimpleFiles<String, String> {
        &self.files
    }
}

impl std::fmt::Debug for SourceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMap").field("files", &self.count).finish()
    }
}

/// A renderable diagnostic
pub struct Diagnostic {
    inner: CsDiagnostic<usize>,
}

impl Diagnostic {
    /// Diagnostic for a fatal build error
    pub fn from_build_error(error: &BuildError) -> Self {
        let mut inner = CsDiagnostic::error()
            .with_message(error.kind.to_string())
            .with_code(error.kind.code());
        if let Some(origin) = &error.origin {
            inner = inner.with_labels(vec![primary(origin, error_label(&error.kind))]);
        }
        if let Some(help) = help(&error.kind) {
            inner = inner.with_notes(vec![format!("help: {}", help)]);
        }
        Self { inner }
    }

    /// Diagnostic for a warning
    pub fn from_warning(warning: &Warning) -> Self {
        let label = match &warning.kind {
            WarningKind::ZeroLengthItem { .. } => "contributes no bytes",
            WarningKind::DuplicateSectionIgnored(_) => "this definition is ignored",
        };
        let mut inner = CsDiagnostic::warning().with_message(warning.kind.to_string());
        if let Some(origin) = &warning.origin {
            inner = inner.with_labels(vec![primary(origin, label)]);
        }
        Self { inner }
    }

    /// Severity of this diagnostic
    pub fn severity(&self) -> Severity {
        self.inner.severity
    }

    /// Write the diagnostic to `writer`
    pub fn emit(
        &self,
        writer: &mut dyn WriteColor,
        sources: &SourceMap,
    ) -> Result<(), codespan_reporting::files::Error> {
        let config = term::Config::default();
        term::emit(writer, &config, sources.files(), &self.inner)
    }

    /// Render without color (tests, logs)
    pub fn render(&self, sources: &SourceMap) -> String {
        let mut buffer = NoColor::new(Vec::new());
        if self.emit(&mut buffer, sources).is_err() {
            return self.inner.message.clone();
        }
        String::from_utf8_lossy(&buffer.into_inner()).into_owned()
    }
}

fn primary(origin: &Origin, message: &str) -> Label<usize> {
    Label::primary(origin.file_id, origin.span.clone()).with_message(message)
}

fn error_label(kind: &BuildErrorKind) -> &'static str {
    match kind {
        BuildErrorKind::Syntax(_) => "cannot parse this line",
        BuildErrorKind::UndefinedVariable(_) => "variable used here",
        BuildErrorKind::UnknownKeyword(_) => "unknown keyword",
        BuildErrorKind::InvalidArgument { .. } => "invalid argument",
        BuildErrorKind::UnresolvableReference { .. } => "referenced here",
        BuildErrorKind::DuplicateSection(_) => "redefined here",
        BuildErrorKind::CyclicSection(_) | BuildErrorKind::CyclicInsert(_) => "cycle closes here",
        BuildErrorKind::MisalignedReference { .. } => "reference emitted here",
        BuildErrorKind::Io { .. } => "while reading this",
        _ => "here",
    }
}

fn help(kind: &BuildErrorKind) -> Option<&'static str> {
    match kind {
        BuildErrorKind::UndefinedVariable(_) => {
            Some("define it under [defines] in lvlpak.toml or pass -D NAME=VALUE")
        }
        BuildErrorKind::MisalignedReference { .. } => {
            Some("add `align 4` before the reference")
        }
        BuildErrorKind::DuplicateSection(_) => {
            Some("set duplicate_sections = \"ignore\" to keep the first definition")
        }
        BuildErrorKind::OversizedItem { .. } => Some("split the section or raise chunk_size"),
        _ => None,
    }
}

/// One-line summary printed after a build
pub fn summary(errors: usize, warnings: usize) -> String {
    fn plural(n: usize, word: &str) -> String {
        format!("{} {}{}", n, word, if n == 1 { "" } else { "s" })
    }
    match (errors, warnings) {
        (0, 0) => "no problems".to_string(),
        (0, w) => plural(w, "warning"),
        (e, 0) => plural(e, "error"),
        (e, w) => format!("{}, {}", plural(e, "error"), plural(w, "warning")),
    }
}
