// Catalog readers and writers
//
// The engine works on plain `TranslationUnit`s; this module turns catalog
// files into units and writes translations back in the original format:
// - Po: gettext .po/.pot files
// - Json: array of {key?, source, context?, translation?}

pub mod json;
pub mod po;

use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::aggregate::OutputCatalog;
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::error::{RelayError, Result};
use crate::unit::TranslationUnit;
use json::JsonEntry;
use po::PoFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Po,
    Json,
}

impl CatalogFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "po" | "pot" => Ok(CatalogFormat::Po),
            "json" => Ok(CatalogFormat::Json),
            _ => Err(RelayError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// A translatable entry as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub unit: TranslationUnit,
    /// Translation already present in the input file, if any.
    pub existing_translation: Option<String>,
}

#[derive(Debug, Clone)]
enum Document {
    Po(PoFile),
    Json(Vec<JsonEntry>),
}

/// A parsed catalog file, kept whole so it can be written back.
#[derive(Debug, Clone)]
pub struct Catalog {
    document: Document,
}

impl Catalog {
    pub fn parse(content: &str, format: CatalogFormat) -> Result<Self> {
        let document = match format {
            CatalogFormat::Po => Document::Po(PoFile::parse(content)?),
            CatalogFormat::Json => Document::Json(json::parse(content)?),
        };
        Ok(Self { document })
    }

    pub async fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = CatalogFormat::from_path(path)?;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::FileNotFound(path.display().to_string()))
            }
            Err(e) => return Err(RelayError::Catalog(format!("read {}: {}", path.display(), e))),
        };
        let catalog = Self::parse(&content, format)?;
        info!(path = %path.display(), entries = catalog.entries().len(), "Loaded catalog");
        Ok(catalog)
    }

    pub fn format(&self) -> CatalogFormat {
        match self.document {
            Document::Po(_) => CatalogFormat::Po,
            Document::Json(_) => CatalogFormat::Json,
        }
    }

    /// Translatable entries in file order.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        match &self.document {
            Document::Po(po) => po
                .entries
                .iter()
                .filter(|e| e.is_translatable())
                .map(|e| CatalogEntry {
                    unit: TranslationUnit::new(e.msgid.clone(), e.msgctxt.clone()),
                    existing_translation: non_blank(&e.msgstr),
                })
                .collect(),
            Document::Json(entries) => entries.iter().map(json_entry_to_catalog).collect(),
        }
    }

    pub fn units(&self) -> Vec<TranslationUnit> {
        self.entries().into_iter().map(|e| e.unit).collect()
    }

    /// Render the catalog with translations from `output` substituted.
    pub fn render(&self, output: &OutputCatalog) -> Result<String> {
        let translations = output.translations();
        match &self.document {
            Document::Po(po) => {
                let mut po = po.clone();
                for entry in po.entries.iter_mut().filter(|e| e.is_translatable()) {
                    let key = crate::unit::derive_key(&entry.msgid, entry.msgctxt.as_deref());
                    if let Some(out) = translations.get(key.as_str()) {
                        entry.msgstr = out.translated_text.clone();
                    }
                }
                Ok(po.render())
            }
            Document::Json(entries) => {
                let mut entries = entries.clone();
                for entry in entries.iter_mut() {
                    let key = json_entry_to_catalog(entry).unit.key;
                    if let Some(out) = translations.get(key.as_str()) {
                        entry.translation = Some(out.translated_text.clone());
                    }
                }
                json::render(&entries)
            }
        }
    }

    /// Write the translated catalog, replacing `path` atomically.
    pub async fn write<P: AsRef<Path>>(&self, output: &OutputCatalog, path: P) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let rendered = self.render(output)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => std::path::PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(rendered.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)
                .map_err(|e| RelayError::Catalog(format!("write {}: {}", path.display(), e.error)))?;
            info!(path = %path.display(), "Wrote translated catalog");
            Ok(())
        })
        .await
        .map_err(|e| RelayError::Internal(format!("catalog write task failed: {}", e)))?
    }

    /// Load a catalog written by an earlier run, if one is usable.
    ///
    /// A missing file, a different format or a parse failure all yield
    /// `None`; the run then starts from the input alone.
    pub async fn read_previous<P: AsRef<Path>>(path: P, format: CatalogFormat) -> Option<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return None;
        }
        match CatalogFormat::from_path(path) {
            Ok(found) if found == format => {}
            _ => {
                warn!(path = %path.display(), "Existing output has a different format, ignoring it");
                return None;
            }
        }
        match Self::read(path).await {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load existing output, ignoring it");
                None
            }
        }
    }
}

/// Record translations already present in `entries` as succeeded, so they
/// are not requested again. Keys the store already knows are left alone.
pub async fn seed_checkpoint(store: &dyn CheckpointStore, entries: &[CatalogEntry]) -> Result<usize> {
    let mut seeded = 0;
    for entry in entries {
        let Some(text) = &entry.existing_translation else {
            continue;
        };
        if store.get(&entry.unit.key).await.is_none() {
            store
                .put(CheckpointRecord::succeeded(entry.unit.key.clone(), text.clone(), 0))
                .await?;
            seeded += 1;
        }
    }
    Ok(seeded)
}

fn json_entry_to_catalog(entry: &JsonEntry) -> CatalogEntry {
    let unit = match &entry.key {
        Some(key) => TranslationUnit::with_key(key.clone(), entry.source.clone(), entry.context.clone()),
        None => TranslationUnit::new(entry.source.clone(), entry.context.clone()),
    };
    CatalogEntry {
        unit,
        existing_translation: entry.translation.as_deref().and_then(non_blank),
    }
}

fn non_blank(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
