//! Opaque record store
//!
//! Persists the records a zkvault server would hold. Nothing here can read
//! them: users, projects and files are ciphertext plus wrapped keys, stored
//! as JSON under
//!
//! ```text
//! users/<email-hash>.json
//! projects/<owner-hash>/<project-id>.json
//! files/<owner-hash>/<file-id>.json
//! ```
//!
//! `<email-hash>` / `<owner-hash>` are the hex BLAKE3 of the canonical
//! (trimmed, lowercased) email, so any email is a safe path segment.

use opendal::{ErrorKind, Operator};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use zkv_core::{ZkvError, ZkvResult};
use zkv_crypto::{canonical_email, FileRecord, ProjectRecord, UserRecord};

const USERS: &str = "users";
const PROJECTS: &str = "projects";
const FILES: &str = "files";

/// Record store over any OpenDAL operator.
#[derive(Clone)]
pub struct RecordStore {
    op: Operator,
}

impl RecordStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    // ── Users ────────────────────────────────────────────────────────────────

    /// Store a new user. Fails with `Duplicate` if the email is taken.
    pub async fn put_user(&self, record: &UserRecord) -> ZkvResult<()> {
        let path = user_path(&record.email);
        if self.exists(&path).await? {
            return Err(ZkvError::Duplicate(format!("user {}", record.email)));
        }
        self.write_json(&path, record).await?;
        debug!(path = %path, "stored user record");
        Ok(())
    }

    pub async fn get_user(&self, email: &str) -> ZkvResult<UserRecord> {
        self.read_json(&user_path(email))
            .await?
            .ok_or_else(|| ZkvError::NotFound(format!("user {}", email.trim())))
    }

    // ── Projects ─────────────────────────────────────────────────────────────

    /// Store (or replace) a project record for `owner`.
    pub async fn put_project(&self, owner: &str, record: &ProjectRecord) -> ZkvResult<()> {
        let path = record_path(PROJECTS, owner, &record.project_id)?;
        self.write_json(&path, record).await?;
        debug!(path = %path, "stored project record");
        Ok(())
    }

    pub async fn get_project(&self, owner: &str, project_id: &str) -> ZkvResult<ProjectRecord> {
        self.read_json(&record_path(PROJECTS, owner, project_id)?)
            .await?
            .ok_or_else(|| ZkvError::NotFound(format!("project {project_id}")))
    }

    /// All of `owner`'s projects, ordered by id.
    pub async fn list_projects(&self, owner: &str) -> ZkvResult<Vec<ProjectRecord>> {
        let mut projects: Vec<ProjectRecord> = self.list_json(&owner_dir(PROJECTS, owner)).await?;
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(projects)
    }

    /// Delete a project record. Returns whether it existed.
    ///
    /// Files filed under the project keep their own records and keys.
    pub async fn delete_project(&self, owner: &str, project_id: &str) -> ZkvResult<bool> {
        self.delete_record(&record_path(PROJECTS, owner, project_id)?)
            .await
    }

    // ── Files ────────────────────────────────────────────────────────────────

    /// Store (or replace) a file record for `owner`.
    pub async fn put_file(&self, owner: &str, record: &FileRecord) -> ZkvResult<()> {
        let path = record_path(FILES, owner, &record.file_id)?;
        self.write_json(&path, record).await?;
        debug!(path = %path, size = record.file_size, "stored file record");
        Ok(())
    }

    pub async fn get_file(&self, owner: &str, file_id: &str) -> ZkvResult<FileRecord> {
        self.read_json(&record_path(FILES, owner, file_id)?)
            .await?
            .ok_or_else(|| ZkvError::NotFound(format!("file {file_id}")))
    }

    /// All of `owner`'s files, ordered by id.
    pub async fn list_files(&self, owner: &str) -> ZkvResult<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self.list_json(&owner_dir(FILES, owner)).await?;
        files.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        Ok(files)
    }

    /// `owner`'s files filed under `project_id`, ordered by id.
    pub async fn list_project_files(
        &self,
        owner: &str,
        project_id: &str,
    ) -> ZkvResult<Vec<FileRecord>> {
        let mut files = self.list_files(owner).await?;
        files.retain(|f| f.project_id.as_deref() == Some(project_id));
        Ok(files)
    }

    /// Delete a file record. Returns whether it existed.
    pub async fn delete_file(&self, owner: &str, file_id: &str) -> ZkvResult<bool> {
        self.delete_record(&record_path(FILES, owner, file_id)?)
            .await
    }

    // ── JSON helpers ─────────────────────────────────────────────────────────

    async fn exists(&self, path: &str) -> ZkvResult<bool> {
        match self.op.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ZkvError::Storage(format!("stat {path}: {e}"))),
        }
    }

    async fn delete_record(&self, path: &str) -> ZkvResult<bool> {
        if !self.exists(path).await? {
            return Ok(false);
        }
        self.op
            .delete(path)
            .await
            .map_err(|e| ZkvError::Storage(format!("deleting {path}: {e}")))?;
        debug!(path = %path, "deleted record");
        Ok(true)
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &str) -> ZkvResult<Option<T>> {
        match self.op.read(path).await {
            Ok(data) => serde_json::from_slice(&data.to_bytes())
                .map(Some)
                .map_err(|e| ZkvError::Serialization(format!("parsing {path}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ZkvError::Storage(format!("reading {path}: {e}"))),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &str, value: &T) -> ZkvResult<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| ZkvError::Serialization(format!("serializing {path}: {e}")))?;
        self.op
            .write(path, json)
            .await
            .map_err(|e| ZkvError::Storage(format!("writing {path}: {e}")))?;
        Ok(())
    }

    /// Read every `*.json` entry directly under `dir`. A missing directory
    /// is an empty listing; unreadable entries are skipped with a warning.
    async fn list_json<T: DeserializeOwned>(&self, dir: &str) -> ZkvResult<Vec<T>> {
        let entries = match self.op.list(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ZkvError::Storage(format!("listing {dir}: {e}"))),
        };

        let mut records = Vec::new();
        for entry in entries {
            if !entry.name().ends_with(".json") {
                continue;
            }
            match self.read_json(entry.path()).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %entry.path(), "skipping unreadable record: {e}"),
            }
        }
        Ok(records)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("scheme", &self.op.info().scheme())
            .field("root", &self.op.info().root())
            .finish()
    }
}

/// Hex BLAKE3 of the canonical email.
pub fn email_hash(email: &str) -> String {
    blake3::hash(canonical_email(email).as_bytes())
        .to_hex()
        .to_string()
}

fn user_path(email: &str) -> String {
    format!("{USERS}/{}.json", email_hash(email))
}

fn owner_dir(kind: &str, owner: &str) -> String {
    format!("{kind}/{}/", email_hash(owner))
}

fn record_path(kind: &str, owner: &str, id: &str) -> ZkvResult<String> {
    if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
        return Err(ZkvError::Storage(format!("invalid record id {id:?}")));
    }
    Ok(format!("{}{id}.json", owner_dir(kind, owner)))
}
