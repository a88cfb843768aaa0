use crate::modules::error::ResolveError;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// The module an import is made from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Referrer {
    /// The entry script, or eval/REPL input anchored at a directory
    Script { dir: PathBuf },
    LocalModule { path: PathBuf },
    RemoteModule { url: Url },
}

impl Referrer {
    pub fn from_id(id: &str, script_dir: &Path) -> Self {
        if id.is_empty() {
            return Referrer::Script {
                dir: script_dir.to_path_buf(),
            };
        }
        match Url::parse(id) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Referrer::RemoteModule { url },
            _ => Referrer::LocalModule {
                path: PathBuf::from(id),
            },
        }
    }
}

/// Where an import specifier points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// A file on the local filesystem, loaded by the host
    Local { path: PathBuf },
    /// A bare package name or absolute URL, fetched through the resolver
    Remote { specifier: String },
}

impl fmt::Display for ImportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportTarget::Local { path } => write!(f, "{}", path.display()),
            ImportTarget::Remote { specifier } => f.write_str(specifier),
        }
    }
}

impl ImportTarget {
    pub fn classify(specifier: &str, referrer: &Referrer) -> Result<Self, ResolveError> {
        let specifier = specifier.trim();
        let invalid = |reason: &str| ResolveError::InvalidSpecifier {
            specifier: specifier.to_string(),
            reason: reason.to_string(),
        };

        if specifier.is_empty() {
            return Err(invalid("empty specifier"));
        }

        if specifier.starts_with("http://") || specifier.starts_with("https://") {
            let url = Url::parse(specifier).map_err(|e| invalid(&e.to_string()))?;
            return Ok(ImportTarget::Remote {
                specifier: url.to_string(),
            });
        }

        if specifier.starts_with("file://") {
            let path = Url::parse(specifier)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| invalid("not a valid file URL"))?;
            return Ok(ImportTarget::Local {
                path: normalize_path(&path),
            });
        }

        if is_path_like(specifier) {
            return match referrer {
                Referrer::RemoteModule { url } => {
                    let joined = url.join(specifier).map_err(|e| invalid(&e.to_string()))?;
                    Ok(ImportTarget::Remote {
                        specifier: joined.to_string(),
                    })
                }
                Referrer::Script { dir } => Ok(ImportTarget::Local {
                    path: normalize_path(&dir.join(specifier)),
                }),
                Referrer::LocalModule { path } => {
                    let dir = path.parent().unwrap_or_else(|| Path::new("."));
                    Ok(ImportTarget::Local {
                        path: normalize_path(&dir.join(specifier)),
                    })
                }
            };
        }

        let bare = specifier.strip_prefix("npm:").unwrap_or(specifier);
        if bare.is_empty() || bare.contains(char::is_whitespace) {
            return Err(invalid("not a package name"));
        }

        Ok(ImportTarget::Remote {
            specifier: bare.to_string(),
        })
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
        || specifier == ".."
}

/// Lexically resolve `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
