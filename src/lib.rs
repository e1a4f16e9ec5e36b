//! # db_vault
//!
//! One backup pipeline for many databases: connect, dump, validate,
//! compress, optionally encrypt, optionally upload.
//!
//! ## Features
//!
//! - **Engines**: MySQL, MongoDB, Redis, SQLite, IBM Db2 (PostgreSQL reserved)
//! - **Validation**: every dump is restored into a throwaway namespace or integrity-checked
//! - **Compression**: XZ (LZMA) with parallel processing
//! - **Encryption**: Age encryption with a generated key or a passphrase
//! - **Cloud Upload**: S3, Azure Blob Storage, Google Cloud Storage, MinIO
//! - **Retries**: bounded exponential backoff around whole runs and each upload
//! - **Parallel Processing**: batch jobs on a rayon pool, async callers on tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use db_vault::backup::manager::{BackupManager, DatabaseKind};
//! use db_vault::backup::pipeline::{BackupTarget, PipelineOptions};
//!
//! let mut manager = BackupManager::new(DatabaseKind::Sqlite);
//! let target = BackupTarget::builder().database("/var/lib/app/app.db").build();
//! let options = PipelineOptions::builder()
//!     .destination_dir("/var/backups/app")
//!     .build();
//!
//! let report = manager.perform_pipeline(&target, &options)?;
//! println!("{:?}", report.artifact);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
