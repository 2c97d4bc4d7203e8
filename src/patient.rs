//! Patient hosting a virus population.

use crate::virus::Virus;
use anyhow::{Context, Result};
use rand::prelude::*;
use std::collections::BTreeSet;

/// Patient hosting a population of virus particles.
///
/// The population is throttled by its density relative to `max_pop` but is
/// never culled to it. Prescribed drugs accumulate and are never withdrawn.
pub struct Patient {
    viruses: Vec<Virus>,
    max_pop: usize,
    pop_density: Option<f64>,
    active_drugs: BTreeSet<String>,
}

impl Patient {
    /// Create a new untreated patient.
    pub fn new(viruses: Vec<Virus>, max_pop: usize) -> Result<Self> {
        crate::utils::check_num(max_pop, 1..).context("invalid maximum population")?;
        Ok(Self {
            viruses,
            max_pop,
            pop_density: None,
            active_drugs: BTreeSet::new(),
        })
    }

    pub fn total_population(&self) -> usize {
        self.viruses.len()
    }

    /// Population density computed by the last update, if any.
    pub fn pop_density(&self) -> Option<f64> {
        self.pop_density
    }

    /// Start administering `drug`. Does nothing if it is already active.
    pub fn add_prescription(&mut self, drug: &str) {
        if !self.active_drugs.contains(drug) {
            self.active_drugs.insert(drug.to_string());
        }
    }

    pub fn prescriptions(&self) -> &BTreeSet<String> {
        &self.active_drugs
    }

    /// Count the particles resistant to every drug in `drugs`.
    pub fn resistant_population<'a, I>(&self, drugs: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a String> + Clone,
    {
        let mut n_resistant = 0;
        for virus in &self.viruses {
            if virus.is_resistant_to_all(drugs.clone())? {
                n_resistant += 1;
            }
        }
        Ok(n_resistant)
    }

    /// Advance the infection by one step and return the new total population.
    ///
    /// Every particle present at the start of the step is tested for
    /// clearance, then every survivor attempts to reproduce against the
    /// post-clearance density. Offspring join only after the whole pass.
    /// On error the population is left as it was before the step.
    pub fn update<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<usize> {
        let survives: Vec<bool> = self
            .viruses
            .iter()
            .map(|virus| !virus.does_clear(rng))
            .collect();
        let n_survivors = survives.iter().filter(|&&survive| survive).count();

        let pop_density = n_survivors as f64 / self.max_pop as f64;

        let mut offspring = Vec::new();
        let survivors = self
            .viruses
            .iter()
            .zip(&survives)
            .filter_map(|(virus, &survive)| survive.then_some(virus));
        for virus in survivors {
            if let Some(child) = virus
                .reproduce(pop_density, &self.active_drugs, rng)
                .context("failed to attempt reproduction")?
            {
                offspring.push(child);
            }
        }

        let mut survives = survives.into_iter();
        self.viruses.retain(|_| survives.next().unwrap_or(false));
        self.viruses.append(&mut offspring);
        self.pop_density = Some(pop_density);

        Ok(self.viruses.len())
    }
}
