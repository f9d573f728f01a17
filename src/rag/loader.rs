//! Corpus loading: directory walk, markdown cleaning, provenance and chunking.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::chunker::{estimate_tokens, ChunkSettings, Chunker};
use super::error::RetrievalError;
use super::types::Chunk;
use crate::core::config::defaults;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSettings {
    /// Canonical doc-site root; empty keeps relative paths as sources.
    pub base_url: String,
    pub chunking: ChunkSettings,
    /// Documents shorter than this after cleaning are skipped.
    pub min_document_chars: usize,
    /// Lowercase extensions without the leading dot.
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub exclude_files: Vec<String>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            base_url: defaults::DOCS_BASE_URL.to_string(),
            chunking: ChunkSettings::default(),
            min_document_chars: defaults::MIN_DOCUMENT_CHARS,
            extensions: to_strings(&defaults::EXTENSIONS),
            exclude_dirs: to_strings(&defaults::EXCLUDE_DIRS),
            exclude_files: to_strings(&defaults::EXCLUDE_FILES),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Result of one corpus pass.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub chunks: Vec<Chunk>,
    /// SHA-256 over the loader settings, then the sorted relative paths and raw
    /// contents of every included file.
    pub fingerprint: String,
    pub documents_seen: usize,
    pub documents_skipped: usize,
}

/// Walk `root` and split every eligible document into chunks.
///
/// A missing root is an error; a root with no usable documents is not (the
/// caller decides whether an empty chunk list is acceptable).
pub fn load_corpus(root: &Path, settings: &LoaderSettings) -> Result<Vec<Chunk>, RetrievalError> {
    scan_corpus(root, settings).map(|corpus| corpus.chunks)
}

pub fn scan_corpus(root: &Path, settings: &LoaderSettings) -> Result<Corpus, RetrievalError> {
    let files = discover_files(root, settings)?;
    let cleaner = MarkdownCleaner::new()?;
    let chunker = Chunker::new(settings.chunking.clone());
    let mut hasher = fingerprint_hasher(settings)?;

    let mut chunks = Vec::new();
    let mut skipped = 0;

    for relative in &files {
        let path = root.join(relative);
        let raw = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("Skipping unreadable document {}: {}", path.display(), err);
                skipped += 1;
                continue;
            }
        };
        hash_document(&mut hasher, relative, &raw);

        let Ok(text) = String::from_utf8(raw) else {
            tracing::warn!("Skipping non UTF-8 document {}", path.display());
            skipped += 1;
            continue;
        };

        let cleaned = cleaner.clean(&text);
        if cleaned.chars().count() < settings.min_document_chars {
            tracing::debug!("Skipping short document {}", relative.display());
            skipped += 1;
            continue;
        }

        let source = source_url(&settings.base_url, relative);
        let title = cleaner
            .first_heading(&cleaned)
            .unwrap_or_else(|| title_from_stem(relative));
        let category = category_for(relative).to_string();

        let passages = chunker.split(&cleaned);
        if passages.is_empty() {
            skipped += 1;
            continue;
        }
        chunks.extend(
            passages
                .into_iter()
                .enumerate()
                .map(|(sequence_index, text)| Chunk {
                    text,
                    source: source.clone(),
                    title: title.clone(),
                    sequence_index,
                    category: category.clone(),
                }),
        );
    }

    let estimated_tokens: usize = chunks.iter().map(|c| estimate_tokens(&c.text)).sum();
    tracing::info!(
        "Loaded {} chunks (~{} tokens) from {} documents under {} ({} skipped)",
        chunks.len(),
        estimated_tokens,
        files.len() - skipped,
        root.display(),
        skipped
    );

    Ok(Corpus {
        chunks,
        fingerprint: hex::encode(hasher.finalize()),
        documents_seen: files.len(),
        documents_skipped: skipped,
    })
}

/// Fingerprint of the corpus without chunking it. Matches [`Corpus::fingerprint`].
pub fn corpus_fingerprint(root: &Path, settings: &LoaderSettings) -> Result<String, RetrievalError> {
    let files = discover_files(root, settings)?;
    let mut hasher = fingerprint_hasher(settings)?;
    for relative in &files {
        let path = root.join(relative);
        // Unreadable files are skipped by the loader too.
        if let Ok(raw) = fs::read(&path) {
            hash_document(&mut hasher, relative, &raw);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hasher seeded with the loader settings, so changing how documents are
/// cleaned, chunked or attributed also invalidates a persisted index.
fn fingerprint_hasher(settings: &LoaderSettings) -> Result<Sha256, RetrievalError> {
    let encoded =
        serde_json::to_vec(settings).map_err(|err| RetrievalError::Serialization(err.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update((encoded.len() as u64).to_le_bytes());
    hasher.update(&encoded);
    Ok(hasher)
}

fn hash_document(hasher: &mut Sha256, relative: &Path, raw: &[u8]) {
    hasher.update(relative_key(relative).as_bytes());
    hasher.update([0u8]);
    hasher.update((raw.len() as u64).to_le_bytes());
    hasher.update(raw);
}

/// Eligible files as paths relative to `root`, in sorted walk order.
fn discover_files(root: &Path, settings: &LoaderSettings) -> Result<Vec<PathBuf>, RetrievalError> {
    if !root.is_dir() {
        return Err(RetrievalError::CorpusMissing {
            root: root.to_path_buf(),
        });
    }
    let mut files = Vec::new();
    walk(root, Path::new(""), settings, &mut files)?;
    Ok(files)
}

fn walk(
    root: &Path,
    relative: &Path,
    settings: &LoaderSettings,
    out: &mut Vec<PathBuf>,
) -> Result<(), RetrievalError> {
    let dir = root.join(relative);
    let mut entries = fs::read_dir(&dir)
        .map_err(|err| RetrievalError::io(&dir, err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| RetrievalError::io(&dir, err))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry
            .file_type()
            .map_err(|err| RetrievalError::io(entry.path(), err))?;
        let child = relative.join(&name);

        if file_type.is_dir() {
            if name.starts_with('.') || settings.exclude_dirs.iter().any(|d| d == &name) {
                continue;
            }
            walk(root, &child, settings, out)?;
        } else if file_type.is_file() {
            if settings.exclude_files.iter().any(|f| f == &name) {
                continue;
            }
            let extension = Path::new(&name)
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
            if extension.is_some_and(|ext| settings.extensions.contains(&ext)) {
                out.push(child);
            }
        }
    }
    Ok(())
}

struct MarkdownCleaner {
    ref_role: Regex,
    anchor_line: Regex,
    heading: Regex,
}

impl MarkdownCleaner {
    fn new() -> Result<Self, RetrievalError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| RetrievalError::Config(format!("invalid pattern: {}", err)))
        };
        Ok(Self {
            ref_role: compile(r"\{ref\}`[^`]+`")?,
            anchor_line: compile(r"(?m)^\([^)]+\)=[ \t]*$")?,
            heading: compile(r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*$")?,
        })
    }

    fn clean(&self, text: &str) -> String {
        let body = strip_front_matter(text);
        let without_refs = self.ref_role.replace_all(body, "");
        let without_anchors = self.anchor_line.replace_all(&without_refs, "");
        without_anchors.trim().to_string()
    }

    fn first_heading(&self, text: &str) -> Option<String> {
        self.heading
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|title| !title.is_empty())
    }
}

fn strip_front_matter(text: &str) -> &str {
    let text = text.trim_start_matches('\u{feff}');
    let Some(rest) = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            return &rest[offset..];
        }
    }
    // Unterminated block: treat it as ordinary text.
    text
}

fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `base_url/relative/path.html`, or the relative path itself with no base.
pub(crate) fn source_url(base_url: &str, relative: &Path) -> String {
    let key = relative_key(relative);
    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        return key;
    }
    let page = match key.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => format!("{}.html", stem),
        _ => format!("{}.html", key),
    };
    format!("{}/{}", base, page)
}

fn title_from_stem(relative: &Path) -> String {
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.split(|c| matches!(c, '_' | '-' | ' '))
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn category_for(relative: &Path) -> &'static str {
    let key = relative_key(relative).to_lowercase();
    if key.contains("executor") {
        "executor"
    } else if key.contains("channel") {
        "channel"
    } else if key.contains("process") {
        "process"
    } else if key.contains("config") {
        "config"
    } else if key.contains("dsl") || key.contains("migration") {
        "dsl"
    } else {
        "general"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn settings() -> LoaderSettings {
        LoaderSettings {
            chunking: ChunkSettings {
                min_chars: 40,
                max_chars: 400,
            },
            ..LoaderSettings::default()
        }
    }

    const BODY: &str = "Executors decide where each task runs. The local executor uses the host machine.";

    #[test]
    fn missing_root_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_corpus(&dir.path().join("nope"), &settings()).unwrap_err();
        assert!(matches!(err, RetrievalError::CorpusMissing { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_root_yields_no_chunks() {
        let dir = TempDir::new().unwrap();
        assert!(load_corpus(dir.path(), &settings()).unwrap().is_empty());
    }

    #[test]
    fn chunks_carry_provenance() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "reference/executor.md", &format!("# Executors\n\n{BODY}"));

        let chunks = load_corpus(dir.path(), &settings()).unwrap();
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(
            chunk.source,
            "https://www.nextflow.io/docs/latest/reference/executor.html"
        );
        assert_eq!(chunk.title, "Executors");
        assert_eq!(chunk.category, "executor");
        assert_eq!(chunk.sequence_index, 0);
        assert!(chunk.text.contains("local executor"));
    }

    #[test]
    fn excluded_and_foreign_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "README.md", BODY);
        write(dir.path(), "_static/theme.md", BODY);
        write(dir.path(), ".git/notes.md", BODY);
        write(dir.path(), "conf.py", BODY);
        write(dir.path(), "image.png", BODY);
        write(dir.path(), "tiny.md", "too short");
        write(dir.path(), "overview.md", BODY);

        let corpus = scan_corpus(dir.path(), &settings()).unwrap();
        assert_eq!(corpus.documents_seen, 2);
        assert_eq!(corpus.documents_skipped, 1);
        assert_eq!(corpus.chunks.len(), 1);
        assert!(corpus.chunks[0].source.ends_with("/overview.html"));
    }

    #[test]
    fn walk_order_is_sorted_and_stable() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.md", BODY);
        write(dir.path(), "a/z.md", BODY);
        write(dir.path(), "a.md", BODY);

        let first = load_corpus(dir.path(), &settings()).unwrap();
        let sources: Vec<&str> = first.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(
            sources,
            vec![
                "https://www.nextflow.io/docs/latest/a/z.html",
                "https://www.nextflow.io/docs/latest/a.html",
                "https://www.nextflow.io/docs/latest/b.html",
            ]
        );
        assert_eq!(first, load_corpus(dir.path(), &settings()).unwrap());
    }

    #[test]
    fn markup_artifacts_are_removed() {
        let cleaner = MarkdownCleaner::new().unwrap();
        let text = "---\ntitle: x\n---\n(executor-page)=\n\n# Executors\n\nSee {ref}`process-page` for more.";
        let cleaned = cleaner.clean(text);
        assert_eq!(cleaned, "# Executors\n\nSee  for more.");
        assert_eq!(cleaner.first_heading(&cleaned).as_deref(), Some("Executors"));
    }

    #[test]
    fn unterminated_front_matter_is_kept() {
        assert_eq!(strip_front_matter("---\nnot closed"), "---\nnot closed");
    }

    #[test]
    fn title_falls_back_to_file_stem() {
        assert_eq!(title_from_stem(Path::new("guides/aws_batch-setup.md")), "Aws Batch Setup");
    }

    #[test]
    fn source_without_base_is_relative_path() {
        assert_eq!(source_url("", Path::new("guides/intro.md")), "guides/intro.md");
        assert_eq!(
            source_url("https://docs.example.org/", Path::new("intro.md")),
            "https://docs.example.org/intro.html"
        );
    }

    #[test]
    fn categories_follow_path() {
        assert_eq!(category_for(Path::new("channel.md")), "channel");
        assert_eq!(category_for(Path::new("migrations/24-04.md")), "dsl");
        assert_eq!(category_for(Path::new("overview.md")), "general");
    }

    #[test]
    fn fingerprint_tracks_content_changes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "overview.md", BODY);
        let before = corpus_fingerprint(dir.path(), &settings()).unwrap();
        assert_eq!(before, scan_corpus(dir.path(), &settings()).unwrap().fingerprint);

        write(dir.path(), "overview.md", &format!("{BODY} Updated."));
        let after = corpus_fingerprint(dir.path(), &settings()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn fingerprint_tracks_loader_settings() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "overview.md", BODY);
        let base = corpus_fingerprint(dir.path(), &settings()).unwrap();

        let moved = LoaderSettings {
            base_url: "https://mirror.example.org/docs/".to_string(),
            ..settings()
        };
        let rechunked = LoaderSettings {
            chunking: ChunkSettings {
                min_chars: 40,
                max_chars: 200,
            },
            ..settings()
        };

        for changed in [moved, rechunked] {
            let fingerprint = corpus_fingerprint(dir.path(), &changed).unwrap();
            assert_ne!(base, fingerprint);
            assert_eq!(fingerprint, scan_corpus(dir.path(), &changed).unwrap().fingerprint);
        }
        assert_eq!(base, corpus_fingerprint(dir.path(), &settings()).unwrap());
    }
}
