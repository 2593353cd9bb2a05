//! Filesystem facade consumed by applications
//!
//! Wraps the router with one method per operation, copies and moves
//! across mounts, enforces the upload size limit and notifies watchers
//! after successful mutations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use webtop_core::{path, CallError, FileInfo, FileRef, FindQuery, Operation, WatchEvent};

use crate::router::{FsRequest, Router};

/// Handle returned by [`Vfs::watch`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

pub type WatchHandler = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

#[derive(Default)]
struct WatchRegistry {
    next_id: AtomicU64,
    watchers: RwLock<Vec<(WatchId, String, WatchHandler)>>,
}

pub struct Vfs {
    router: Arc<Router>,
    max_upload_size: u64,
    watches: WatchRegistry,
}

impl Vfs {
    pub fn new(router: Arc<Router>, max_upload_size: u64) -> Self {
        Self {
            router,
            max_upload_size,
            watches: WatchRegistry::default(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub async fn scandir(&self, dir: &FileRef) -> Result<Vec<FileRef>, CallError> {
        self.router
            .route(FsRequest::Scandir { dir: dir.clone() })
            .await?
            .into_files()
    }

    pub async fn read(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        self.router
            .route(FsRequest::Read { file: file.clone() })
            .await?
            .into_bytes()
    }

    pub async fn write(&self, file: &FileRef, data: &[u8]) -> Result<(), CallError> {
        self.router
            .route(FsRequest::Write {
                file: file.clone(),
                data: data.to_vec(),
            })
            .await?;
        self.changed(Operation::Write, file);
        Ok(())
    }

    /// Copy a file, across mounts if needed
    pub async fn copy(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        if self.same_mount(src, dest)? {
            self.router
                .route(FsRequest::Copy {
                    src: src.clone(),
                    dest: dest.clone(),
                })
                .await?;
        } else {
            self.transfer(src, dest, false).await?;
        }
        self.changed(Operation::Copy, dest);
        Ok(())
    }

    /// Move a file, across mounts if needed
    pub async fn move_(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        if self.same_mount(src, dest)? {
            self.router
                .route(FsRequest::Move {
                    src: src.clone(),
                    dest: dest.clone(),
                })
                .await?;
        } else {
            self.transfer(src, dest, true).await?;
        }
        self.changed(Operation::Move, dest);
        Ok(())
    }

    pub async fn unlink(&self, file: &FileRef) -> Result<(), CallError> {
        self.router
            .route(FsRequest::Unlink { file: file.clone() })
            .await?;
        self.changed(Operation::Unlink, file);
        Ok(())
    }

    pub async fn mkdir(&self, dir: &FileRef) -> Result<(), CallError> {
        self.router
            .route(FsRequest::Mkdir { dir: dir.clone() })
            .await?;
        self.changed(Operation::Mkdir, dir);
        Ok(())
    }

    pub async fn exists(&self, file: &FileRef) -> Result<bool, CallError> {
        self.router
            .route(FsRequest::Exists { file: file.clone() })
            .await?
            .into_flag()
    }

    pub async fn fileinfo(&self, file: &FileRef) -> Result<FileInfo, CallError> {
        self.router
            .route(FsRequest::Fileinfo { file: file.clone() })
            .await?
            .into_info()
    }

    pub async fn find(&self, dir: &FileRef, query: &FindQuery) -> Result<Vec<FileRef>, CallError> {
        self.router
            .route(FsRequest::Find {
                dir: dir.clone(),
                query: query.clone(),
            })
            .await?
            .into_files()
    }

    pub async fn url(&self, file: &FileRef) -> Result<String, CallError> {
        self.router
            .route(FsRequest::Url { file: file.clone() })
            .await?
            .into_url()
    }

    pub async fn download(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        self.router
            .route(FsRequest::Download { file: file.clone() })
            .await?
            .into_bytes()
    }

    /// Store `data` as `filename` inside `dest`
    pub async fn upload(
        &self,
        dest: &FileRef,
        filename: &str,
        data: &[u8],
    ) -> Result<FileRef, CallError> {
        let size = data.len() as u64;
        if size > self.max_upload_size {
            return Err(CallError::UploadTooLarge {
                size,
                max: self.max_upload_size,
            });
        }
        if filename.is_empty() || filename.contains('/') {
            return Err(CallError::InvalidArgument(format!(
                "invalid upload filename: {:?}",
                filename
            )));
        }

        let file = self
            .router
            .route(FsRequest::Upload {
                dest: dest.clone(),
                filename: filename.to_string(),
                data: data.to_vec(),
            })
            .await?
            .into_file()?;
        self.changed(Operation::Upload, &file);
        Ok(file)
    }

    pub async fn trash(&self, file: &FileRef) -> Result<(), CallError> {
        self.router
            .route(FsRequest::Trash { file: file.clone() })
            .await?;
        self.changed(Operation::Trash, file);
        Ok(())
    }

    pub async fn untrash(&self, file: &FileRef) -> Result<(), CallError> {
        self.router
            .route(FsRequest::Untrash { file: file.clone() })
            .await?;
        self.changed(Operation::Untrash, file);
        Ok(())
    }

    pub async fn empty_trash(&self, root: &FileRef) -> Result<(), CallError> {
        self.router
            .route(FsRequest::EmptyTrash { root: root.clone() })
            .await?;
        self.changed(Operation::EmptyTrash, root);
        Ok(())
    }

    pub async fn free_space(&self, root: &FileRef) -> Result<Option<u64>, CallError> {
        self.router
            .route(FsRequest::FreeSpace { root: root.clone() })
            .await?
            .into_space()
    }

    /// Call `handler` for every change under `prefix`
    pub fn watch<F>(&self, prefix: &str, handler: F) -> WatchId
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let id = WatchId(self.watches.next_id.fetch_add(1, Ordering::Relaxed));
        self.watches
            .watchers
            .write()
            .push((id, prefix.to_string(), Arc::new(handler)));
        debug!("watching {} ({:?})", prefix, id);
        id
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut watchers = self.watches.watchers.write();
        let before = watchers.len();
        watchers.retain(|(wid, _, _)| *wid != id);
        watchers.len() != before
    }

    /// Deliver a change to matching watchers
    pub fn notify(&self, event: &WatchEvent) {
        let handlers: Vec<WatchHandler> = self
            .watches
            .watchers
            .read()
            .iter()
            .filter(|(_, prefix, _)| path::prefix_matches(event.file.path(), prefix))
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    fn changed(&self, operation: Operation, file: &FileRef) {
        self.notify(&WatchEvent::new(format!("vfs:{}", operation), file.clone()));
    }

    fn same_mount(&self, src: &FileRef, dest: &FileRef) -> Result<bool, CallError> {
        let (_, a) = self.router.resolve(src.path())?;
        let (_, b) = self.router.resolve(dest.path())?;
        Ok(Arc::ptr_eq(&a, &b))
    }

    /// Read from one mount and write to another; policy is checked on both
    /// ends before any data moves
    async fn transfer(&self, src: &FileRef, dest: &FileRef, remove_source: bool) -> Result<(), CallError> {
        let (_, src_mount) = self.router.resolve(src.path())?;
        let (_, dest_mount) = self.router.resolve(dest.path())?;
        Router::check_policy(Operation::Write, &dest_mount)?;
        if remove_source {
            Router::check_policy(Operation::Unlink, &src_mount)?;
        }

        info!(
            "{} {} ({}) -> {} ({})",
            if remove_source { "moving" } else { "copying" },
            src.path(),
            src_mount.name(),
            dest.path(),
            dest_mount.name()
        );
        let data = self.read(src).await?;
        self.router
            .route(FsRequest::Write {
                file: dest.clone(),
                data,
            })
            .await?;
        if remove_source {
            self.router
                .route(FsRequest::Unlink { file: src.clone() })
                .await?;
        }
        Ok(())
    }
}
