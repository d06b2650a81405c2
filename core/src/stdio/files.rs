//! File context loader: expands a task's `files` list into resolved,
//! encoded file content relative to its workdir.

use base64::Engine as _;
use futures::stream::{self, StreamExt};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::error::stdio::StdioError;
use crate::executor::types::FilesConfig;
use crate::stdio::types::{FilesEncoding, FilesMode};

const SNIFF_BYTES: usize = 8 * 1024;
const LOAD_CONCURRENCY: usize = 8;

const TEXT_EXTENSIONS: &[&str] = &[
    "rs", "toml", "md", "txt", "json", "yaml", "yml", "py", "js", "ts", "tsx", "jsx", "go",
    "java", "kt", "c", "h", "cpp", "hpp", "cs", "rb", "sh", "html", "css", "xml", "csv", "sql",
    "ini", "cfg", "lock",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tar", "tgz", "7z",
    "exe", "dll", "so", "dylib", "bin", "wasm", "mp3", "mp4", "wav", "ogg",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFile {
    /// Path relative to the workdir when inside it, absolute otherwise.
    pub path: String,
    /// `Embed` or `Ref`; never `Auto` after resolution.
    pub mode: FilesMode,
    pub encoding: FilesEncoding,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub content: Option<ResolvedContent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedContent {
    Text(String),
    /// `len` is the decoded byte length.
    Base64 { len: usize, data: String },
}

/// Files of one task plus the non-fatal problems met while resolving them.
#[derive(Debug, Clone, Default)]
pub struct ResolvedContext {
    pub files: Vec<ResolvedFile>,
    pub warnings: Vec<StdioError>,
}

#[derive(Clone)]
struct CachedFile {
    bytes: Arc<Vec<u8>>,
    len: u64,
    modified: Option<SystemTime>,
}

struct Candidate {
    canonical: PathBuf,
    display: String,
    from_glob: bool,
}

/// Resolves file lists; holds an optional LRU cache shared by every task of an engine.
pub struct FileLoader {
    cfg: FilesConfig,
    cache: Option<Mutex<LruCache<PathBuf, CachedFile>>>,
}

impl FileLoader {
    pub fn new(cfg: FilesConfig) -> Self {
        let cache = if cfg.cache_enabled {
            NonZeroUsize::new(cfg.cache_entries).map(|cap| Mutex::new(LruCache::new(cap)))
        } else {
            None
        };
        Self { cfg, cache }
    }

    pub fn config(&self) -> &FilesConfig {
        &self.cfg
    }

    /// Expands `files` relative to `workdir`.
    ///
    /// Only an unusable workdir is an error; everything else degrades to a
    /// warning and a shorter file list.
    pub async fn resolve(
        &self,
        files: &[String],
        mode: FilesMode,
        encoding: FilesEncoding,
        workdir: &str,
    ) -> Result<ResolvedContext, StdioError> {
        let base = tokio::fs::canonicalize(workdir)
            .await
            .map_err(|_| StdioError::InvalidPath(format!("working directory not found: {workdir}")))?;
        if !tokio::fs::metadata(&base)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(StdioError::InvalidPath(format!(
                "working directory is not a directory: {workdir}"
            )));
        }

        let mut ctx = ResolvedContext::default();
        if files.is_empty() {
            return Ok(ctx);
        }

        let candidates = self.expand(files, &base, &mut ctx.warnings).await;

        let loaded: Vec<_> = stream::iter(
            candidates
                .into_iter()
                .map(|c| self.load_candidate(c, mode, encoding)),
        )
        .buffered(LOAD_CONCURRENCY)
        .collect()
        .await;

        let max_total = self.cfg.max_total_size_mb.saturating_mul(1024 * 1024);
        let mut total: u64 = 0;
        for result in loaded {
            match result {
                Ok((file, warning)) => {
                    if total.saturating_add(file.size) > max_total {
                        ctx.warnings.push(StdioError::FileTooLarge(
                            total.saturating_add(file.size),
                            max_total,
                        ));
                        tracing::warn!(
                            limit = max_total,
                            "total file context size exceeded, truncating at {}",
                            file.path
                        );
                        break;
                    }
                    total += file.size;
                    ctx.warnings.extend(warning);
                    ctx.files.push(file);
                }
                Err(e) => ctx.warnings.push(e),
            }
        }

        tracing::debug!(
            files = ctx.files.len(),
            warnings = ctx.warnings.len(),
            total_bytes = total,
            "resolved file context"
        );
        Ok(ctx)
    }

    async fn expand(
        &self,
        files: &[String],
        base: &Path,
        warnings: &mut Vec<StdioError>,
    ) -> Vec<Candidate> {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut selected = Vec::new();
        let mut overflow = 0usize;

        for entry in files {
            let from_glob = is_glob(entry);
            let paths = if from_glob {
                match glob_matches(entry, base) {
                    Ok(paths) if paths.is_empty() => {
                        warnings.push(StdioError::GlobNoMatch(entry.clone()));
                        continue;
                    }
                    Ok(paths) => paths,
                    Err(e) => {
                        warnings.push(e);
                        continue;
                    }
                }
            } else {
                vec![base.join(entry)]
            };

            for path in paths {
                let canonical = match tokio::fs::canonicalize(&path).await {
                    Ok(p) => p,
                    Err(_) => {
                        warnings.push(StdioError::FileNotFound(entry.clone()));
                        continue;
                    }
                };
                if !self.cfg.allow_outside_workdir && !canonical.starts_with(base) {
                    warnings.push(StdioError::PathTraversal(path.display().to_string()));
                    continue;
                }
                if !tokio::fs::metadata(&canonical)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false)
                {
                    if !from_glob {
                        warnings.push(StdioError::InvalidPath(format!("not a file: {entry}")));
                    }
                    continue;
                }
                if !seen.insert(canonical.clone()) {
                    continue;
                }
                if selected.len() >= self.cfg.max_files {
                    overflow += 1;
                    continue;
                }
                let display = canonical
                    .strip_prefix(base)
                    .map(|rel| rel.display().to_string())
                    .unwrap_or_else(|_| canonical.display().to_string());
                selected.push(Candidate {
                    canonical,
                    display,
                    from_glob,
                });
            }
        }

        if overflow > 0 {
            warnings.push(StdioError::TooManyFiles(
                selected.len() + overflow,
                self.cfg.max_files,
            ));
        }
        selected
    }

    async fn load_candidate(
        &self,
        candidate: Candidate,
        mode: FilesMode,
        encoding: FilesEncoding,
    ) -> Result<(ResolvedFile, Option<StdioError>), StdioError> {
        let meta = tokio::fs::metadata(&candidate.canonical)
            .await
            .map_err(|_| StdioError::FileAccessDenied(candidate.display.clone()))?;
        let size = meta.len();
        let modified = meta.modified().ok();

        let max_file = self.cfg.max_file_size_mb.saturating_mul(1024 * 1024);
        if size > max_file {
            return Err(StdioError::FileTooLarge(size, max_file));
        }

        let threshold = self.cfg.embed_threshold_kb.saturating_mul(1024);
        let effective_mode = match mode {
            FilesMode::Embed => FilesMode::Embed,
            FilesMode::Ref => FilesMode::Ref,
            FilesMode::Auto if !candidate.from_glob && size < threshold => FilesMode::Embed,
            FilesMode::Auto => FilesMode::Ref,
        };

        if effective_mode == FilesMode::Ref {
            let guessed = match (encoding, extension_class(&candidate.canonical)) {
                (FilesEncoding::Auto, Some(class)) => class,
                (requested, _) => requested,
            };
            return Ok((
                ResolvedFile {
                    path: candidate.display,
                    mode: FilesMode::Ref,
                    encoding: guessed,
                    size,
                    modified,
                    content: None,
                },
                None,
            ));
        }

        let bytes = self.read(&candidate.canonical, size, modified).await?;
        let (encoding, content, warning) = encode(&candidate, encoding, &bytes);

        Ok((
            ResolvedFile {
                path: candidate.display,
                mode: FilesMode::Embed,
                encoding,
                size,
                modified,
                content: Some(content),
            },
            warning,
        ))
    }

    async fn read(
        &self,
        path: &Path,
        len: u64,
        modified: Option<SystemTime>,
    ) -> Result<Arc<Vec<u8>>, StdioError> {
        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                if let Some(hit) = guard.get(path) {
                    if hit.len == len && hit.modified == modified {
                        return Ok(hit.bytes.clone());
                    }
                }
            }
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StdioError::FileNotFound(path.display().to_string())
            } else {
                StdioError::FileAccessDenied(path.display().to_string())
            }
        })?;
        let bytes = Arc::new(bytes);

        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                guard.put(
                    path.to_path_buf(),
                    CachedFile {
                        bytes: bytes.clone(),
                        len,
                        modified,
                    },
                );
            }
        }
        Ok(bytes)
    }
}

fn is_glob(entry: &str) -> bool {
    entry.contains(&['*', '?', '['][..])
}

fn glob_matches(entry: &str, base: &Path) -> Result<Vec<PathBuf>, StdioError> {
    let pattern = if Path::new(entry).is_absolute() {
        entry.to_string()
    } else {
        format!(
            "{}/{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            entry
        )
    };
    let paths = glob::glob(&pattern)
        .map_err(|e| StdioError::InvalidPath(format!("{entry}: {e}")))?;
    let mut matches: Vec<PathBuf> = paths.filter_map(Result::ok).filter(|p| p.is_file()).collect();
    matches.sort();
    Ok(matches)
}

fn extension_class(path: &Path) -> Option<FilesEncoding> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Some(FilesEncoding::Utf8)
    } else if BINARY_EXTENSIONS.contains(&ext.as_str()) {
        Some(FilesEncoding::Base64)
    } else {
        None
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_BYTES)];
    head.contains(&0) || std::str::from_utf8(bytes).is_err()
}

fn base64_content(bytes: &[u8]) -> ResolvedContent {
    ResolvedContent::Base64 {
        len: bytes.len(),
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
    }
}

fn encode(
    candidate: &Candidate,
    requested: FilesEncoding,
    bytes: &[u8],
) -> (FilesEncoding, ResolvedContent, Option<StdioError>) {
    let as_text = || std::str::from_utf8(bytes).ok().map(str::to_string);

    match requested {
        FilesEncoding::Base64 => (FilesEncoding::Base64, base64_content(bytes), None),
        FilesEncoding::Utf8 => match as_text() {
            Some(text) => (FilesEncoding::Utf8, ResolvedContent::Text(text), None),
            None => {
                tracing::warn!("{} is not valid UTF-8, using base64", candidate.display);
                (
                    FilesEncoding::Base64,
                    base64_content(bytes),
                    Some(StdioError::EncodingError(format!(
                        "{} is not valid UTF-8; embedded as base64",
                        candidate.display
                    ))),
                )
            }
        },
        FilesEncoding::Auto => {
            let binary = match extension_class(&candidate.canonical) {
                Some(FilesEncoding::Base64) => true,
                Some(_) => std::str::from_utf8(bytes).is_err(),
                None => looks_binary(bytes),
            };
            match (binary, as_text()) {
                (false, Some(text)) => (FilesEncoding::Utf8, ResolvedContent::Text(text), None),
                _ => (FilesEncoding::Base64, base64_content(bytes), None),
            }
        }
    }
}
