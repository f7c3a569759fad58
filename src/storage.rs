//! Enrolled face encodings.
//!
//! Workers read the encodings for their company once at startup through
//! `EncodingStore::load_all`. The on-disk layout written by enrollment is
//! `<storage_path>/encodings/<company_id>/<employee_id>.json` containing
//! `{"encodings": [[f32, ...], ...]}`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::validate_identifier;

/// One face feature vector.
pub type Encoding = Vec<f32>;

/// Enrolled encodings for one company, keyed by employee id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnrolledEncodings {
    by_entity: BTreeMap<String, Vec<Encoding>>,
}

impl EnrolledEncodings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add encodings for an entity. Entities with no encodings are not recorded.
    pub fn insert(&mut self, entity_id: impl Into<String>, encodings: Vec<Encoding>) {
        if encodings.is_empty() {
            return;
        }
        self.by_entity.insert(entity_id.into(), encodings);
    }

    pub fn get(&self, entity_id: &str) -> Option<&[Encoding]> {
        self.by_entity.get(entity_id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Encoding])> {
        self.by_entity
            .iter()
            .map(|(id, encodings)| (id.as_str(), encodings.as_slice()))
    }

    /// Number of enrolled entities.
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}

pub trait EncodingStore: Send + Sync {
    /// Load every enrolled entity for `company_id`. An unknown company is an empty set.
    fn load_all(&self, company_id: &str) -> Result<EnrolledEncodings>;
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryEncodingStore {
    companies: RwLock<HashMap<String, EnrolledEncodings>>,
}

impl InMemoryEncodingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, company_id: &str, entity_id: &str, encodings: Vec<Encoding>) {
        let mut companies = self
            .companies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        companies
            .entry(company_id.to_string())
            .or_default()
            .insert(entity_id, encodings);
    }
}

impl EncodingStore for InMemoryEncodingStore {
    fn load_all(&self, company_id: &str) -> Result<EnrolledEncodings> {
        let companies = self
            .companies
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(companies.get(company_id).cloned().unwrap_or_default())
    }
}

// ----------------------------------------------------------------------------
// JSON file store
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct EncodingFile {
    #[serde(default)]
    encodings: Vec<Encoding>,
}

/// File-backed store using one JSON document per employee.
#[derive(Clone, Debug)]
pub struct JsonEncodingStore {
    encodings_dir: PathBuf,
}

impl JsonEncodingStore {
    /// Open the store rooted at `storage_path`. Encodings live under `encodings/`.
    pub fn open(storage_path: impl AsRef<Path>) -> Result<Self> {
        let encodings_dir = storage_path.as_ref().join("encodings");
        std::fs::create_dir_all(&encodings_dir).with_context(|| {
            format!(
                "failed to create encodings directory {}",
                encodings_dir.display()
            )
        })?;
        Ok(Self { encodings_dir })
    }

    pub fn save(&self, company_id: &str, employee_id: &str, encodings: &[Encoding]) -> Result<()> {
        let path = self.encoding_path(company_id, employee_id)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let doc = EncodingFile {
            encodings: encodings.to_vec(),
        };
        let json = serde_json::to_vec(&doc)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!(
            "saved {} encodings for {}/{}",
            encodings.len(),
            company_id,
            employee_id
        );
        Ok(())
    }

    /// Load one employee's encodings. `None` when nothing is enrolled.
    pub fn load(&self, company_id: &str, employee_id: &str) -> Result<Option<Vec<Encoding>>> {
        let path = self.encoding_path(company_id, employee_id)?;
        if !path.exists() {
            return Ok(None);
        }
        read_encoding_file(&path).map(Some)
    }

    pub fn delete(&self, company_id: &str, employee_id: &str) -> Result<()> {
        let path = self.encoding_path(company_id, employee_id)?;
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to delete {}", path.display()))?;
            log::info!("deleted encodings for {}/{}", company_id, employee_id);
        }
        Ok(())
    }

    fn company_dir(&self, company_id: &str) -> Result<PathBuf> {
        validate_identifier("company_id", company_id)?;
        Ok(self.encodings_dir.join(company_id))
    }

    fn encoding_path(&self, company_id: &str, employee_id: &str) -> Result<PathBuf> {
        validate_identifier("employee_id", employee_id)?;
        Ok(self
            .company_dir(company_id)?
            .join(format!("{employee_id}.json")))
    }
}

impl EncodingStore for JsonEncodingStore {
    fn load_all(&self, company_id: &str) -> Result<EnrolledEncodings> {
        let dir = self.company_dir(company_id)?;
        let mut enrolled = EnrolledEncodings::new();
        if !dir.is_dir() {
            return Ok(enrolled);
        }

        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(employee_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            // Skip unreadable enrollments.
            match read_encoding_file(&path) {
                Ok(encodings) => enrolled.insert(employee_id, encodings),
                Err(err) => log::warn!("skipping encodings file {}: {:#}", path.display(), err),
            }
        }
        Ok(enrolled)
    }
}

fn read_encoding_file(path: &Path) -> Result<Vec<Encoding>> {
    let raw = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let doc: EncodingFile = serde_json::from_slice(&raw)
        .map_err(|e| anyhow!("invalid encodings file {}: {}", path.display(), e))?;
    Ok(doc.encodings)
}
