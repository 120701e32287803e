use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Archive suffix that makes `name.zip` browsable as `name/`
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// What a request path resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A plain file under the content root
    File(PathBuf),
    /// A directory to render as a listing; `url_path` has no leading slash
    Listing { dir: PathBuf, url_path: String },
    /// Permanent redirect to this absolute URL path
    Redirect(String),
    /// An entry inside a container
    Archive { container: PathBuf, entry: String },
    NotFound,
}

/// Maps decoded request paths onto the content tree.
///
/// Walks the path one segment at a time from the root. A segment that
/// names neither a file nor a directory, but has a `.zip` sibling, turns
/// the rest of the path into an entry name inside that archive.
#[derive(Debug, Clone)]
pub struct Router {
    root: PathBuf,
    index_file: String,
    create_indexes: bool,
    expose_hidden_files: bool,
}

impl Router {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.root_dir.clone(),
            index_file: config.index_file.clone(),
            create_indexes: config.create_indexes,
            expose_hidden_files: config.expose_hidden_files,
        }
    }

    pub fn resolve(&self, url_path: &str) -> Route {
        let url_path = url_path.trim_start_matches('/');
        let parts: Vec<&str> = url_path.split('/').collect();
        let last = parts.len() - 1;

        let mut current = self.root.clone();

        for (i, part) in parts.iter().enumerate() {
            if *part == ".." || (!self.expose_hidden_files && part.starts_with('.')) {
                return Route::NotFound;
            }
            current.push(part);

            if let Ok(metadata) = fs::metadata(&current) {
                if metadata.is_dir() {
                    if i == last && self.create_indexes {
                        return Route::Listing {
                            dir: current,
                            url_path: url_path.to_string(),
                        };
                    }
                    continue;
                }
                return if i == last {
                    Route::File(current)
                } else {
                    Route::NotFound
                };
            }

            let candidate = with_suffix(&current, ARCHIVE_SUFFIX);
            if candidate.is_file() {
                if i == last {
                    return Route::Redirect(format!("/{url_path}/"));
                }
                let rest = parts[i + 1..].join("/");
                let entry = if rest.is_empty() {
                    self.index_file.clone()
                } else {
                    rest
                };
                return Route::Archive {
                    container: candidate,
                    entry,
                };
            }
        }

        if self.create_indexes && current.is_dir() {
            return Route::Listing {
                dir: current,
                url_path: url_path.to_string(),
            };
        }
        Route::NotFound
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
