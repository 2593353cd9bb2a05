//! Mount table and operation routing
//!
//! The router owns the mount table, resolves paths by longest matching
//! prefix and enforces read-only policy before a request reaches a
//! backend. The table is an immutable snapshot swapped whole on
//! mount/unmount, so a lookup sees either the old or the new table.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use webtop_core::{path, CallError, FileInfo, FileRef, FindQuery, MountConfig, Operation};

use crate::transport::Backend;

/// One filesystem operation with its arguments in fixed order
#[derive(Clone, Debug, PartialEq)]
pub enum FsRequest {
    Scandir { dir: FileRef },
    Read { file: FileRef },
    Write { file: FileRef, data: Vec<u8> },
    Copy { src: FileRef, dest: FileRef },
    Move { src: FileRef, dest: FileRef },
    Unlink { file: FileRef },
    Mkdir { dir: FileRef },
    Exists { file: FileRef },
    Fileinfo { file: FileRef },
    Find { dir: FileRef, query: FindQuery },
    Trash { file: FileRef },
    Untrash { file: FileRef },
    EmptyTrash { root: FileRef },
    FreeSpace { root: FileRef },
    Url { file: FileRef },
    Download { file: FileRef },
    Upload { dest: FileRef, filename: String, data: Vec<u8> },
}

impl FsRequest {
    pub fn operation(&self) -> Operation {
        match self {
            FsRequest::Scandir { .. } => Operation::Scandir,
            FsRequest::Read { .. } => Operation::Read,
            FsRequest::Write { .. } => Operation::Write,
            FsRequest::Copy { .. } => Operation::Copy,
            FsRequest::Move { .. } => Operation::Move,
            FsRequest::Unlink { .. } => Operation::Unlink,
            FsRequest::Mkdir { .. } => Operation::Mkdir,
            FsRequest::Exists { .. } => Operation::Exists,
            FsRequest::Fileinfo { .. } => Operation::Fileinfo,
            FsRequest::Find { .. } => Operation::Find,
            FsRequest::Trash { .. } => Operation::Trash,
            FsRequest::Untrash { .. } => Operation::Untrash,
            FsRequest::EmptyTrash { .. } => Operation::EmptyTrash,
            FsRequest::FreeSpace { .. } => Operation::FreeSpace,
            FsRequest::Url { .. } => Operation::Url,
            FsRequest::Download { .. } => Operation::Download,
            FsRequest::Upload { .. } => Operation::Upload,
        }
    }

    /// The file whose path selects the mount
    pub fn target(&self) -> &FileRef {
        match self {
            FsRequest::Scandir { dir }
            | FsRequest::Mkdir { dir }
            | FsRequest::Find { dir, .. }
            | FsRequest::Upload { dest: dir, .. } => dir,
            FsRequest::Read { file }
            | FsRequest::Write { file, .. }
            | FsRequest::Unlink { file }
            | FsRequest::Exists { file }
            | FsRequest::Fileinfo { file }
            | FsRequest::Trash { file }
            | FsRequest::Untrash { file }
            | FsRequest::Url { file }
            | FsRequest::Download { file } => file,
            FsRequest::Copy { src, .. } | FsRequest::Move { src, .. } => src,
            FsRequest::EmptyTrash { root } | FsRequest::FreeSpace { root } => root,
        }
    }

    /// Second path of a two-path operation
    pub fn destination(&self) -> Option<&FileRef> {
        match self {
            FsRequest::Copy { dest, .. } | FsRequest::Move { dest, .. } => Some(dest),
            _ => None,
        }
    }
}

/// Result of a routed operation
#[derive(Clone, Debug, PartialEq)]
pub enum FsResponse {
    Files(Vec<FileRef>),
    Bytes(Vec<u8>),
    Flag(bool),
    Info(FileInfo),
    Url(String),
    Space(Option<u64>),
    File(FileRef),
    Done,
}

fn mismatch(expected: &str, got: &FsResponse) -> CallError {
    CallError::Protocol(format!("expected {} response, got {:?}", expected, got))
}

impl FsResponse {
    pub fn into_files(self) -> Result<Vec<FileRef>, CallError> {
        match self {
            FsResponse::Files(files) => Ok(files),
            other => Err(mismatch("listing", &other)),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, CallError> {
        match self {
            FsResponse::Bytes(bytes) => Ok(bytes),
            other => Err(mismatch("content", &other)),
        }
    }

    pub fn into_flag(self) -> Result<bool, CallError> {
        match self {
            FsResponse::Flag(flag) => Ok(flag),
            other => Err(mismatch("boolean", &other)),
        }
    }

    pub fn into_info(self) -> Result<FileInfo, CallError> {
        match self {
            FsResponse::Info(info) => Ok(info),
            other => Err(mismatch("fileinfo", &other)),
        }
    }

    pub fn into_url(self) -> Result<String, CallError> {
        match self {
            FsResponse::Url(url) => Ok(url),
            other => Err(mismatch("url", &other)),
        }
    }

    pub fn into_space(self) -> Result<Option<u64>, CallError> {
        match self {
            FsResponse::Space(space) => Ok(space),
            other => Err(mismatch("free space", &other)),
        }
    }

    pub fn into_file(self) -> Result<FileRef, CallError> {
        match self {
            FsResponse::File(file) => Ok(file),
            other => Err(mismatch("file", &other)),
        }
    }
}

/// A prefix bound to a backend instance
pub struct Mount {
    pub config: MountConfig,
    pub backend: Arc<dyn Backend>,
}

impl Mount {
    pub fn new(config: MountConfig, backend: Arc<dyn Backend>) -> Self {
        Self { config, backend }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("name", &self.config.name)
            .field("prefix", &self.config.prefix)
            .field("backend", &self.backend.name())
            .field("read_only", &self.config.read_only)
            .finish()
    }
}

type MountTable = Arc<Vec<Arc<Mount>>>;

#[derive(Default)]
pub struct Router {
    mounts: RwLock<MountTable>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mount; names are unique
    pub fn mount(&self, mount: Mount) -> Result<(), CallError> {
        let mut table = self.mounts.write();
        if table.iter().any(|m| m.name() == mount.name()) {
            return Err(CallError::InvalidArgument(format!(
                "mount '{}' already exists",
                mount.name()
            )));
        }

        info!(
            "Mounted {} at {} ({}{})",
            mount.name(),
            mount.prefix(),
            mount.backend.name(),
            if mount.is_read_only() { ", read-only" } else { "" }
        );
        let mut next: Vec<Arc<Mount>> = table.as_ref().clone();
        next.push(Arc::new(mount));
        *table = Arc::new(next);
        Ok(())
    }

    /// Remove a mount by name; returns whether it existed
    pub fn unmount(&self, name: &str) -> bool {
        let mut table = self.mounts.write();
        let next: Vec<Arc<Mount>> = table.iter().filter(|m| m.name() != name).cloned().collect();
        if next.len() == table.len() {
            return false;
        }
        *table = Arc::new(next);
        info!("Unmounted {}", name);
        true
    }

    /// Current mount table snapshot
    pub fn mounts(&self) -> MountTable {
        self.mounts.read().clone()
    }

    /// Find the mount owning `path` by longest matching prefix
    pub fn resolve(&self, path: &str) -> Result<(Arc<dyn Backend>, Arc<Mount>), CallError> {
        let table = self.mounts();
        let mount = table
            .iter()
            .filter(|m| path::prefix_matches(path, m.prefix()))
            .max_by_key(|m| m.prefix().len())
            .cloned()
            .ok_or_else(|| CallError::NoSuchMount(path.to_string()))?;
        Ok((mount.backend.clone(), mount))
    }

    /// Refuse mutating operations on read-only mounts
    pub fn check_policy(operation: Operation, mount: &Mount) -> Result<(), CallError> {
        if mount.is_read_only() && operation.is_mutating() {
            return Err(CallError::ReadOnlyViolation {
                mount: mount.name().to_string(),
                operation: operation.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Run a request against a resolved mount
    pub async fn dispatch(&self, request: FsRequest, mount: &Mount) -> Result<FsResponse, CallError> {
        let operation = request.operation();
        Self::check_policy(operation, mount)?;
        debug!("{} {} on {}", operation, request.target().path(), mount.name());

        let backend = mount.backend.as_ref();
        let response = match request {
            FsRequest::Scandir { dir } => FsResponse::Files(backend.scandir(&dir).await?),
            FsRequest::Read { file } => FsResponse::Bytes(backend.read(&file).await?),
            FsRequest::Write { file, data } => {
                backend.write(&file, &data).await?;
                FsResponse::Done
            }
            FsRequest::Copy { src, dest } => {
                backend.copy(&src, &dest).await?;
                FsResponse::Done
            }
            FsRequest::Move { src, dest } => {
                backend.rename(&src, &dest).await?;
                FsResponse::Done
            }
            FsRequest::Unlink { file } => {
                backend.unlink(&file).await?;
                FsResponse::Done
            }
            FsRequest::Mkdir { dir } => {
                backend.mkdir(&dir).await?;
                FsResponse::Done
            }
            FsRequest::Exists { file } => FsResponse::Flag(backend.exists(&file).await?),
            FsRequest::Fileinfo { file } => FsResponse::Info(backend.fileinfo(&file).await?),
            FsRequest::Find { dir, query } => FsResponse::Files(backend.find(&dir, &query).await?),
            FsRequest::Trash { file } => {
                backend.trash(&file).await?;
                FsResponse::Done
            }
            FsRequest::Untrash { file } => {
                backend.untrash(&file).await?;
                FsResponse::Done
            }
            FsRequest::EmptyTrash { root } => {
                backend.empty_trash(&root).await?;
                FsResponse::Done
            }
            FsRequest::FreeSpace { root } => FsResponse::Space(backend.free_space(&root).await?),
            FsRequest::Url { file } => FsResponse::Url(backend.url(&file).await?),
            FsRequest::Download { file } => FsResponse::Bytes(backend.download(&file).await?),
            FsRequest::Upload {
                dest,
                filename,
                data,
            } => FsResponse::File(backend.upload(&dest, &filename, &data).await?),
        };
        Ok(response)
    }

    /// Resolve the request's target and dispatch it
    pub async fn route(&self, request: FsRequest) -> Result<FsResponse, CallError> {
        let target = request.target().path().to_string();
        path::validate(&target)?;
        if let Some(dest) = request.destination() {
            path::validate(dest.path())?;
        }
        let (_, mount) = self.resolve(&target)?;
        self.dispatch(request, &mount).await
    }
}
