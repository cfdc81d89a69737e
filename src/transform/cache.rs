//! Per-run entity cache: each concept is transformed at most once.

use indexmap::IndexMap;

use crate::cdm::catvar::CategoricalVariant;
use crate::cdm::core::MappableConcept;
use crate::cdm::statement::{Document, Statement, Therapeutic};

/// Idempotent dedup store for one transform run, keyed by source ID or
/// digest.  Backed by insertion-ordered maps so that re-iteration yields
/// first-encounter order.
///
/// `V` is the source-specific variation record kept for statement assembly.
#[derive(Debug, Default)]
pub struct EntityCache<V> {
    /// Variation records by source variant key.
    pub variations: IndexMap<String, V>,
    /// Categorical variants by source profile/variant key.
    pub categorical_variants: IndexMap<String, CategoricalVariant>,
    /// Genes by source gene key.
    pub genes: IndexMap<String, MappableConcept>,
    /// Diseases by source disease key or identity digest.
    pub conditions: IndexMap<String, MappableConcept>,
    /// Therapies and therapy groups by concept key.
    pub therapies: IndexMap<String, Therapeutic>,
    /// Documents by source document key.
    pub documents: IndexMap<String, Document>,
    /// Admitted evidence statements by statement ID.
    pub evidence: IndexMap<String, Statement>,
}

impl<V> EntityCache<V> {
    pub fn new() -> Self {
        Self {
            variations: IndexMap::new(),
            categorical_variants: IndexMap::new(),
            genes: IndexMap::new(),
            conditions: IndexMap::new(),
            therapies: IndexMap::new(),
            documents: IndexMap::new(),
            evidence: IndexMap::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn iteration_keeps_first_encounter_order() {
        let mut cache: super::EntityCache<()> = super::EntityCache::new();
        for key in ["civic.gid:19", "civic.gid:5", "civic.gid:12"] {
            cache
                .genes
                .insert(key.to_string(), Default::default());
        }
        // Re-inserting does not move the entry.
        cache
            .genes
            .insert("civic.gid:5".to_string(), Default::default());

        let keys = cache.genes.keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["civic.gid:19", "civic.gid:5", "civic.gid:12"]);
    }
}
