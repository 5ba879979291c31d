use std::sync::Arc;

use tracing::{debug, info};

use crate::assessment::domain::{
    Commission, CommissionId, CommissionRelation, RelationId, ResultCalculationMethod,
};

use super::repository::{ClassificationRepository, CommissionRepository, RepositoryError};
use super::StoreError;

/// Commission graph maintenance: default flag, relations and their priorities.
#[derive(Clone)]
pub struct CommissionStore {
    commissions: Arc<dyn CommissionRepository>,
    classifications: Arc<dyn ClassificationRepository>,
}

impl CommissionStore {
    pub fn new(
        commissions: Arc<dyn CommissionRepository>,
        classifications: Arc<dyn ClassificationRepository>,
    ) -> Self {
        Self {
            commissions,
            classifications,
        }
    }

    pub fn create_commission(&self, mut commission: Commission) -> Result<Commission, StoreError> {
        let wants_default = commission.is_default;
        commission.is_default = false;
        let mut stored = self.commissions.insert(commission)?;
        if wants_default {
            self.set_default(stored.id)?;
            stored.is_default = true;
        }
        info!(commission = %stored.id, "commission created");
        Ok(stored)
    }

    pub fn update_commission(&self, commission: Commission) -> Result<Commission, StoreError> {
        let current = self.commission(commission.id)?;
        let wants_default = commission.is_default && !current.is_default;

        let mut updated = commission;
        if wants_default {
            updated.is_default = false;
        }
        self.commissions.update(updated.clone())?;
        if wants_default {
            self.set_default(updated.id)?;
            updated.is_default = true;
        }
        Ok(updated)
    }

    /// Clears the flag on every commission, then sets it on `id`, in one unit of work.
    pub fn set_default(&self, id: CommissionId) -> Result<(), StoreError> {
        let mut found = false;
        self.commissions.transaction(&mut |tx| {
            let all = tx.commissions();
            found = all.iter().any(|commission| commission.id == id);
            if !found {
                return Ok(());
            }
            for mut commission in all {
                let is_default = commission.id == id;
                if commission.is_default != is_default {
                    commission.is_default = is_default;
                    tx.update_commission(commission)?;
                }
            }
            Ok(())
        })?;

        if found {
            info!(commission = %id, "default commission changed");
            Ok(())
        } else {
            Err(StoreError::not_found("commission", id))
        }
    }

    pub fn default_commission(&self) -> Result<Option<Commission>, StoreError> {
        Ok(self
            .commissions
            .list()?
            .into_iter()
            .find(|commission| commission.is_default))
    }

    pub fn commission(&self, id: CommissionId) -> Result<Commission, StoreError> {
        self.commissions
            .fetch(id)?
            .ok_or_else(|| StoreError::not_found("commission", id))
    }

    pub fn commissions(&self) -> Result<Vec<Commission>, StoreError> {
        Ok(self.commissions.list()?)
    }

    /// Rejected while classification records or relations still point at the commission.
    pub fn delete_commission(&self, id: CommissionId) -> Result<(), StoreError> {
        self.commission(id)?;
        let references = self.classifications.count_by_commission(id)?
            + self.commissions.count_relations_referencing(id)?;
        if references > 0 {
            return Err(StoreError::InUse {
                what: "commission",
                id: id.0,
                references,
            });
        }
        self.commissions.delete(id)?;
        info!(commission = %id, "commission deleted");
        Ok(())
    }

    /// Appends a relation after the source's current lowest-precedence one.
    pub fn add_relation(
        &self,
        source: CommissionId,
        targets: Vec<CommissionId>,
        method: ResultCalculationMethod,
    ) -> Result<CommissionRelation, StoreError> {
        if targets.is_empty() {
            return Err(StoreError::InvalidRelation(
                "a relation needs at least one target".to_string(),
            ));
        }
        if targets.contains(&source) {
            return Err(StoreError::InvalidRelation(format!(
                "commission {source} cannot target itself"
            )));
        }
        self.commission(source)?;
        for target in &targets {
            self.commission(*target)?;
        }

        let priority = self
            .commissions
            .relations_for_source(source)?
            .iter()
            .map(|relation| relation.priority)
            .max()
            .map_or(1, |highest| highest + 1);

        let relation = self.commissions.insert_relation(CommissionRelation {
            id: RelationId(0),
            source,
            targets,
            priority,
            method,
        })?;
        debug!(relation = %relation.id, %source, priority, "commission relation added");
        Ok(relation)
    }

    pub fn relations(&self, source: CommissionId) -> Result<Vec<CommissionRelation>, StoreError> {
        Ok(self.commissions.relations_for_source(source)?)
    }

    /// Exchanges the priorities of two relations sharing a source.
    pub fn swap_priority(&self, first: RelationId, second: RelationId) -> Result<(), StoreError> {
        if first == second {
            return Ok(());
        }

        let mut missing = None;
        let mut different_sources = false;
        self.commissions.transaction(&mut |tx| {
            let Some(mut a) = tx.relation(first) else {
                missing = Some(first);
                return Ok(());
            };
            let Some(mut b) = tx.relation(second) else {
                missing = Some(second);
                return Ok(());
            };
            if a.source != b.source {
                different_sources = true;
                return Ok(());
            }
            std::mem::swap(&mut a.priority, &mut b.priority);
            tx.update_relation(a)?;
            tx.update_relation(b)?;
            Ok(())
        })?;

        if let Some(id) = missing {
            return Err(StoreError::not_found("commission relation", id));
        }
        if different_sources {
            return Err(StoreError::InvalidRelation(format!(
                "relations {first} and {second} belong to different source commissions"
            )));
        }
        debug!(%first, %second, "relation priorities swapped");
        Ok(())
    }

    pub fn delete_relation(&self, id: RelationId) -> Result<(), StoreError> {
        match self.commissions.delete_relation(id) {
            Ok(()) => Ok(()),
            Err(RepositoryError::NotFound) => Err(StoreError::not_found("commission relation", id)),
            Err(error) => Err(error.into()),
        }
    }
}
