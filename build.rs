use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

// Directories that never contain sources governed by the code policy.
// `examples` holds read-only third-party reference code.
const SKIPPED_DIRS: [&str; 3] = ["./target", "./examples", "./.git"];

// Every rule produces a list of offending lines for one file.
struct LineCollector {
    violations: Vec<String>,
    rule: Rule,
}

#[derive(Clone, Copy)]
enum Rule {
    UnderscoreBinding,
    ForbiddenWord,
    DoubleStar,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b",
            Rule::ForbiddenWord => {
                r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            }
            Rule::DoubleStar => r"(//|/\*).*\*\*",
            Rule::AllCapsComment => r"(//|/\*|///).*",
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn applies_to_build_script(self) -> bool {
        matches!(self, Rule::UnderscoreBinding)
    }

    fn explanation(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenWord => {
                "Comments containing 'FIXED', 'CORRECTED', 'FIX', 'NEW', 'CHANGE(D/S)', 'MODIF(Y/IED/IES)' or 'UPDATE(D/S)' are STRICTLY FORBIDDEN.\n   Remove them completely rather than commenting them out."
            }
            Rule::DoubleStar => {
                "The '**' pattern is not allowed in regular comments (it is allowed in doc comments)."
            }
            Rule::AllCapsComment => {
                "Comments where all alphabetic characters are uppercase are STRICTLY FORBIDDEN.\n   STRONGLY CONSIDER deleting the comment completely."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes are STRICTLY FORBIDDEN.\n   Either use the code (removing the attribute) or remove it completely."
            }
        }
    }
}

impl LineCollector {
    fn new(rule: Rule) -> Self {
        Self {
            violations: Vec::new(),
            rule,
        }
    }

    fn accepts(&self, line_text: &str) -> bool {
        match self.rule {
            Rule::UnderscoreBinding => {
                !is_comment_line(line_text) && !underscore_in_string(line_text)
            }
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::DoubleStar => !is_doc_comment(line_text),
            Rule::AllCapsComment => comment_is_all_caps(line_text),
        }
    }

    fn into_error(self, path: &Path) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: Found {} code policy violations in {}:\n",
            self.violations.len(),
            path.display()
        );
        for violation in &self.violations {
            message.push_str(&format!("   {violation}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.rule.explanation()));
        Some(message)
    }
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.accepts(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with("//")
        || (line.contains("/*") && !line.contains("*/match") && !line.contains("*/let"))
}

// An underscore identifier between quotes is string content, not a binding.
fn underscore_in_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_is_all_caps(line: &str) -> bool {
    let trimmed = line.trim_start();
    let comment_text = if let Some(rest) = trimmed.strip_prefix("///") {
        rest.trim()
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        rest.trim()
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        match rest.find("*/") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        }
    } else {
        return false;
    };
    let mut letters = comment_text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}

fn is_skipped(entry: &DirEntry) -> bool {
    SKIPPED_DIRS.iter().any(|dir| entry.path().starts_with(dir))
}

fn rust_sources() -> Vec<PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn enforce(rule: Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in sources {
        if path.file_name().is_some_and(|name| name == "build.rs")
            && !rule.applies_to_build_script()
        {
            continue;
        }
        let mut collector = LineCollector::new(rule);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(message) = collector.into_error(path) {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let sources = rust_sources();
    for path in &sources {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    let rules = [
        Rule::UnderscoreBinding,
        Rule::ForbiddenWord,
        Rule::DoubleStar,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ];
    for rule in rules {
        if let Err(e) = enforce(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
