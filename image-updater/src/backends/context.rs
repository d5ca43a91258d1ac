use anyhow::{anyhow, Result};
use ignore::WalkBuilder;
use log::{debug, info};
use number_prefix::NumberPrefix;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};
use tar::Builder as TarBuilder;
use tempfile::TempDir;

/// A build context packed into a tar file. The file lives in its own
/// temporary directory, which is removed when the archive is dropped.
pub struct ContextArchive {
    temp_dir: TempDir,
    path: PathBuf,
    size: u64,
}

impl ContextArchive {
    /// Packs every file under `context`, honouring `.dockerignore`.
    ///
    /// Ignore files follow gitignore rules rather than Docker's: patterns
    /// without a slash match at any depth, and a `.dockerignore` in a
    /// subdirectory applies to that subdirectory.
    pub fn pack<P: AsRef<Path>>(context: P) -> Result<ContextArchive> {
        let context = context.as_ref();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("context.tar");
        let file = {
            let mut options = OpenOptions::new();
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            options.write(true).create(true).open(&path)?
        };

        let mut tar = TarBuilder::new(file);
        let walk = WalkBuilder::new(context)
            .add_custom_ignore_filename(".dockerignore")
            .ignore(false)
            .git_global(false)
            .git_ignore(false)
            .git_exclude(false)
            .hidden(false)
            .parents(false)
            .build();

        let mut size = 0;
        for result in walk {
            let entry = result?;
            let relative = entry.path().strip_prefix(context)?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            tar.append_path_with_name(entry.path(), relative)?;
            size += entry.metadata()?.len();
        }

        tar.finish()?;

        match NumberPrefix::binary(size as f32) {
            NumberPrefix::Standalone(bytes) => info!("archived build context ({} bytes)", bytes),
            NumberPrefix::Prefixed(prefix, n) => {
                info!("archived build context ({:.1} {}B)", n, prefix)
            }
        };

        Ok(ContextArchive {
            temp_dir,
            path,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn open(&self) -> Result<File> {
        File::open(&self.path)
            .map_err(|err| anyhow!("couldn't open build context {:?}: {}", self.path, err))
    }

    /// Removes the archive, reporting failures that dropping would ignore.
    pub fn close(self) -> Result<()> {
        debug!("removing build context {:?}", self.path);
        self.temp_dir.close()?;
        Ok(())
    }
}
