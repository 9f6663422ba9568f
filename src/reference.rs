use crate::error::{Error, Result};
use crate::tree::{Document, NodePath};
use rand::RngCore;
use xml::name::OwnedName;

/// A signable node and, once computed, the digest of its canonical form.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id: String,
    /// Position of the matching `ds:Reference` inside `ds:SignedInfo`.
    pub index: usize,
    pub target: NodePath,
    pub digest_value: Option<Vec<u8>>,
}

impl Reference {
    pub fn uri(&self) -> String {
        format!("#{}", self.id)
    }
}

/// `<prefix>-<uuid>`, with the UUID built from `rng`.
pub fn random_id<R: RngCore + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    format!("{}-{}", prefix, uuid::Builder::from_random_bytes(bytes).into_uuid())
}

fn id_prefix(document: &Document, target: &NodePath, id_namespace: &str) -> String {
    document
        .in_scope(target)
        .0
        .iter()
        .find(|(prefix, uri)| !prefix.is_empty() && uri.as_str() == id_namespace)
        .map(|(prefix, _)| prefix.clone())
        .unwrap_or_else(|| "wsu".to_string())
}

/// Hands out reference ids for one envelope build.
#[derive(Debug, Default)]
pub struct ReferenceResolver {
    references: Vec<Reference>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a fresh `Id` attribute in `id_namespace` onto `target`, points
    /// the `index`-th `ds:Reference` of `ds:SignedInfo` at it and records it.
    ///
    /// # Panics
    /// If the generated id was already handed out in this build.
    pub fn assign_reference<R: RngCore + ?Sized>(
        &mut self,
        document: &mut Document,
        target: &NodePath,
        id_namespace: &str,
        local_name: &str,
        index: usize,
        rng: &mut R,
    ) -> Result<String> {
        let id = random_id(&local_name.to_lowercase(), rng);
        if self.references.iter().any(|r| r.id == id) {
            panic!("reference id {} assigned twice in one envelope", id);
        }

        let name = OwnedName {
            local_name: "Id".to_string(),
            namespace: Some(id_namespace.to_string()),
            prefix: Some(id_prefix(document, target, id_namespace)),
        };
        document.set_attribute(target, name, &id)?;

        let signed_info = document.require(crate::ns::DSIG, "SignedInfo")?;
        let reference_node = document
            .find_all_within(&signed_info, crate::ns::DSIG, "Reference")
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::MissingNode(format!("ds:Reference #{}", index)))?;
        document.set_attribute(&reference_node, OwnedName::local("URI"), &format!("#{}", id))?;

        log::debug!("assigned reference {} to {}", id, local_name);
        self.references.push(Reference {
            id: id.clone(),
            index,
            target: target.clone(),
            digest_value: None,
        });
        Ok(id)
    }

    pub fn record_digest(&mut self, id: &str, digest: Vec<u8>) -> Result<&Reference> {
        let reference = self
            .references
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::MissingNode(format!("reference {}", id)))?;
        debug_assert!(reference.digest_value.is_none(), "digest of {} recorded twice", id);
        reference.digest_value = Some(digest);
        Ok(reference)
    }

    pub fn get(&self, id: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.id == id)
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }
}
