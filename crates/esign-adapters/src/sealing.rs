use async_trait::async_trait;
use chrono::Utc;
use esign_core::{Envelope, EnvelopeError, SealReceipt, SealingService};
use serde_json::json;
use std::path::{Component, Path, PathBuf};

const SEAL_MARKER: &[u8] = b"\n%ESIGN-SEAL ";

/// Seals documents stored under a local root directory.
///
/// The sealed rendition is the original bytes followed by a signed-values manifest
/// trailer. Each rendition gets its own file named after the number of signatures
/// it covers, so an older seal finishing late never overwrites a newer one.
#[derive(Debug, Clone)]
pub struct LocalSealingService {
    root: PathBuf,
}

impl LocalSealingService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a document reference inside the root, rejecting escapes.
    pub fn resolve(&self, document_ref: &str) -> Result<PathBuf, EnvelopeError> {
        let relative = Path::new(document_ref.trim_start_matches('/'));
        let safe = !document_ref.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(EnvelopeError::integration(
                "sealing",
                format!("document reference '{}' is outside the document root", document_ref),
            ));
        }
        Ok(self.root.join(relative))
    }

    async fn read(&self, document_ref: &str) -> Result<Vec<u8>, EnvelopeError> {
        let path = self.resolve(document_ref)?;
        tokio::fs::read(&path).await.map_err(|e| {
            EnvelopeError::integration("sealing", format!("cannot read '{}': {}", document_ref, e))
        })
    }
}

/// `docs/lease.pdf` + 2 signatures -> `docs/lease-sealed-2.pdf`.
fn sealed_ref(document_ref: &str, signatures: usize) -> String {
    let lower = document_ref.to_ascii_lowercase();
    let stem = if lower.ends_with(".pdf") {
        &document_ref[..document_ref.len() - 4]
    } else {
        document_ref
    };
    format!("{}-sealed-{}.pdf", stem, signatures)
}

fn manifest(envelope: &Envelope, hash_original: &str) -> serde_json::Value {
    json!({
        "envelope_id": envelope.id,
        "title": envelope.title,
        "sealed_at": Utc::now(),
        "document_hash": hash_original,
        "audit_head": envelope.audit().last().map(|e| e.entry_hash.clone()),
        "signers": envelope.signers().iter().map(|s| json!({
            "email": s.email,
            "name": s.name,
            "role": s.role,
            "status": s.status,
            "signed_at": s.signed_at,
            "ip": s.ip,
        })).collect::<Vec<_>>(),
        "fields": envelope.signature_fields().iter().filter(|f| f.value.is_some()).map(|f| json!({
            "id": f.id,
            "type": f.field_type,
            "page": f.page,
            "assignee_email": f.assignee_email,
            "signed_at": f.signed_at,
            "value_hash": f.value.as_deref().map(|v| blake3::hash(v.as_bytes()).to_hex().to_string()),
        })).collect::<Vec<_>>(),
    })
}

#[async_trait]
impl SealingService for LocalSealingService {
    async fn seal(&self, envelope: &Envelope) -> Result<SealReceipt, EnvelopeError> {
        let original = self.read(&envelope.document_ref).await?;
        let hash_original = blake3::hash(&original).to_hex().to_string();

        let trailer = serde_json::to_vec(&manifest(envelope, &hash_original))?;
        let mut sealed = Vec::with_capacity(original.len() + trailer.len() + 32);
        sealed.extend_from_slice(&original);
        sealed.extend_from_slice(SEAL_MARKER);
        sealed.extend_from_slice(&trailer);
        sealed.extend_from_slice(b"\n%%EOF\n");
        let hash_final = blake3::hash(&sealed).to_hex().to_string();

        let sealed_ref = sealed_ref(&envelope.document_ref, envelope.signed_count());
        let target = self.resolve(&sealed_ref)?;
        let staging = target.with_extension(format!("pdf.{}.tmp", &hash_final[..12]));
        let io_err = |e: std::io::Error| {
            EnvelopeError::integration("sealing", format!("cannot write '{}': {}", sealed_ref, e))
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&staging, &sealed).await.map_err(io_err)?;
        tokio::fs::rename(&staging, &target).await.map_err(io_err)?;

        tracing::debug!(
            envelope_id = %envelope.id,
            sealed_ref = %sealed_ref,
            bytes = sealed.len(),
            "sealed rendition written"
        );
        Ok(SealReceipt {
            sealed_ref,
            hash_original,
            hash_final,
        })
    }

    async fn document_hash(&self, document_ref: &str) -> Result<String, EnvelopeError> {
        let bytes = self.read(document_ref).await?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_ref_keeps_directory_and_counts_signatures() {
        assert_eq!(sealed_ref("docs/Lease.PDF", 2), "docs/Lease-sealed-2.pdf");
        assert_eq!(sealed_ref("scan", 1), "scan-sealed-1.pdf");
    }

    #[test]
    fn resolve_rejects_parent_traversal() {
        let service = LocalSealingService::new("/srv/docs");
        assert!(service.resolve("../etc/passwd").is_err());
        assert!(service.resolve("a/../../b.pdf").is_err());
        assert!(service.resolve("").is_err());
        assert_eq!(
            service.resolve("/contracts/a.pdf").unwrap(),
            PathBuf::from("/srv/docs/contracts/a.pdf")
        );
    }
}
