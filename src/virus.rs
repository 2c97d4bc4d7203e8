//! Virus particles.

use crate::utils::check_prob;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::Bernoulli;
use std::collections::{BTreeMap, BTreeSet};

/// Drug resistance profile of a virus particle.
///
/// Maps every tracked drug to whether the particle resists it. Offspring
/// inherit the same set of drugs, so a profile never loses an entry.
#[derive(Debug, PartialEq, Clone)]
pub struct Resistance {
    resistances: BTreeMap<String, bool>,
    mut_dist: Bernoulli,
}

/// Virus particle inside a patient.
///
/// Particles are immutable: reproduction returns a new particle and
/// clearance is decided by the patient removing it. The clearance and
/// mutation distributions are fixed at creation and shared with offspring.
#[derive(Debug, PartialEq, Clone)]
pub struct Virus {
    prob_birth_max: f64,
    clear_dist: Bernoulli,
    resistance: Option<Resistance>,
}

impl Virus {
    /// Create a virus particle without any drug resistance profile.
    pub fn new(prob_birth_max: f64, prob_clear: f64) -> Result<Self> {
        check_prob(prob_birth_max).context("invalid maximum birth probability")?;
        let clear_dist = Bernoulli::new(prob_clear).context("invalid clearance probability")?;
        Ok(Self {
            prob_birth_max,
            clear_dist,
            resistance: None,
        })
    }

    /// Create a virus particle that tracks resistance to the given drugs.
    pub fn with_resistance(
        prob_birth_max: f64,
        prob_clear: f64,
        resistances: BTreeMap<String, bool>,
        prob_mut: f64,
    ) -> Result<Self> {
        let mut virus = Self::new(prob_birth_max, prob_clear)?;
        let mut_dist = Bernoulli::new(prob_mut).context("invalid mutation probability")?;
        virus.resistance = Some(Resistance {
            resistances,
            mut_dist,
        });
        Ok(virus)
    }

    /// Decide whether the host clears this particle during the current step.
    pub fn does_clear<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.clear_dist.sample(rng)
    }

    /// Whether this particle resists `drug`.
    ///
    /// # Errors
    /// Returns an error if the particle has no resistance profile or if the
    /// profile does not track `drug`.
    pub fn is_resistant_to(&self, drug: &str) -> Result<bool> {
        let Some(resistance) = &self.resistance else {
            bail!("virus has no resistance profile, cannot check drug {drug:?}");
        };
        resistance
            .resistances
            .get(drug)
            .copied()
            .with_context(|| format!("drug {drug:?} is missing from the resistance profile"))
    }

    /// Whether this particle resists every drug in `drugs`.
    ///
    /// An empty set of drugs is resisted by every particle.
    pub fn is_resistant_to_all<'a, I>(&self, drugs: I) -> Result<bool>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for drug in drugs {
            if !self.is_resistant_to(drug)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Attempt to produce one offspring.
    ///
    /// Returns `Ok(None)` when the particle does not reproduce this step.
    /// Any active drug the particle does not resist blocks reproduction
    /// before the birth probability is drawn. The birth probability is
    /// `prob_birth_max * (1 - pop_density)`, so no particle reproduces once
    /// the density reaches 1.
    pub fn reproduce<R: Rng + ?Sized>(
        &self,
        pop_density: f64,
        active_drugs: &BTreeSet<String>,
        rng: &mut R,
    ) -> Result<Option<Self>> {
        if !self
            .is_resistant_to_all(active_drugs)
            .context("failed to check active drugs")?
        {
            return Ok(None);
        }

        // Depends on the density, so it cannot be built once per particle.
        let prob_birth = (self.prob_birth_max * (1.0 - pop_density)).clamp(0.0, 1.0);
        let birth_dist = Bernoulli::new(prob_birth)
            .with_context(|| format!("invalid birth probability at density {pop_density}"))?;
        if !birth_dist.sample(rng) {
            return Ok(None);
        }

        Ok(Some(Self {
            prob_birth_max: self.prob_birth_max,
            clear_dist: self.clear_dist,
            resistance: self.resistance.as_ref().map(|res| res.mutate(rng)),
        }))
    }
}

impl Resistance {
    /// Profile of an offspring: every drug flips independently with probability `prob_mut`.
    fn mutate<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let resistances = self
            .resistances
            .iter()
            .map(|(drug, &resistant)| (drug.clone(), resistant ^ self.mut_dist.sample(rng)))
            .collect();
        Self {
            resistances,
            mut_dist: self.mut_dist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::ConstRng;
    use rand_chacha::ChaCha12Rng;

    fn drugs(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn profile(entries: &[(&str, bool)]) -> BTreeMap<String, bool> {
        entries
            .iter()
            .map(|&(drug, resistant)| (drug.to_string(), resistant))
            .collect()
    }

    #[test]
    fn rejects_invalid_probabilities() {
        assert!(Virus::new(1.5, 0.1).is_err());
        assert!(Virus::new(0.1, -0.1).is_err());
        assert!(Virus::with_resistance(0.1, 0.1, BTreeMap::new(), 2.0).is_err());
        assert!(Virus::with_resistance(0.1, 0.1, BTreeMap::new(), 0.0).is_ok());
    }

    #[test]
    fn clearance_frequency_matches_probability() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let virus = Virus::new(0.1, 0.3).unwrap();
        let n_trials = 100_000;
        let n_clear = (0..n_trials)
            .filter(|_| virus.does_clear(&mut rng))
            .count();
        let freq = n_clear as f64 / n_trials as f64;
        assert!((freq - 0.3).abs() < 0.01, "frequency was {freq}");
    }

    #[test]
    fn clearance_extremes_are_deterministic() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let always = Virus::new(0.5, 1.0).unwrap();
        let never = Virus::new(0.5, 0.0).unwrap();
        for _ in 0..1000 {
            assert!(always.does_clear(&mut rng));
            assert!(!never.does_clear(&mut rng));
        }
    }

    #[test]
    fn offspring_inherit_clearance() {
        let virus = Virus::new(1.0, 1.0).unwrap();
        let child = virus
            .reproduce(0.0, &BTreeSet::new(), &mut ConstRng::HIGH)
            .unwrap()
            .expect("birth probability of one always reproduces");
        assert!(child.does_clear(&mut ConstRng::HIGH));
    }

    #[test]
    fn no_reproduction_at_full_density() {
        let virus = Virus::new(1.0, 0.0).unwrap();
        let none = BTreeSet::new();
        for pop_density in [1.0, 1.2, 3.0] {
            let child = virus
                .reproduce(pop_density, &none, &mut ConstRng::LOW)
                .unwrap();
            assert!(child.is_none());
        }
    }

    #[test]
    fn forced_draw_reproduces_below_full_density() {
        let virus = Virus::new(0.2, 0.4).unwrap();
        let child = virus
            .reproduce(0.5, &BTreeSet::new(), &mut ConstRng::LOW)
            .unwrap()
            .expect("draw of zero must reproduce");
        assert_eq!(child, virus);

        let child = virus
            .reproduce(0.5, &BTreeSet::new(), &mut ConstRng::HIGH)
            .unwrap();
        assert!(child.is_none());
    }

    #[test]
    fn unresisted_drug_blocks_reproduction() {
        let virus = Virus::with_resistance(
            1.0,
            0.0,
            profile(&[("guttagonol", true), ("gremfixin", false)]),
            0.0,
        )
        .unwrap();

        let child = virus
            .reproduce(0.0, &drugs(&["guttagonol", "gremfixin"]), &mut ConstRng::LOW)
            .unwrap();
        assert!(child.is_none());

        let child = virus
            .reproduce(0.0, &drugs(&["guttagonol"]), &mut ConstRng::LOW)
            .unwrap();
        assert!(child.is_some());
    }

    #[test]
    fn unknown_drug_is_an_error() {
        let virus =
            Virus::with_resistance(0.5, 0.1, profile(&[("guttagonol", false)]), 0.1).unwrap();
        assert!(virus.is_resistant_to("grimpex").is_err());
        assert!(
            virus
                .reproduce(0.0, &drugs(&["grimpex"]), &mut ConstRng::LOW)
                .is_err()
        );

        let simple = Virus::new(0.5, 0.1).unwrap();
        assert!(simple.is_resistant_to("guttagonol").is_err());
        assert!(
            simple
                .reproduce(0.0, &drugs(&["guttagonol"]), &mut ConstRng::LOW)
                .is_err()
        );
    }

    #[test]
    fn offspring_keeps_profile_without_mutation() {
        let resistances = profile(&[("guttagonol", true), ("gremfixin", false)]);
        let virus = Virus::with_resistance(1.0, 0.0, resistances, 0.0).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        for _ in 0..100 {
            let child = virus
                .reproduce(0.0, &BTreeSet::new(), &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(child, virus);
        }
    }

    #[test]
    fn mutation_frequency_matches_probability() {
        let prob_mut = 0.2;
        let virus = Virus::with_resistance(
            1.0,
            0.0,
            profile(&[("guttagonol", true), ("gremfixin", false)]),
            prob_mut,
        )
        .unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(11);

        let n_trials = 50_000;
        let mut n_lost = 0;
        let mut n_gained = 0;
        for _ in 0..n_trials {
            let child = virus
                .reproduce(0.0, &BTreeSet::new(), &mut rng)
                .unwrap()
                .unwrap();
            if !child.is_resistant_to("guttagonol").unwrap() {
                n_lost += 1;
            }
            if child.is_resistant_to("gremfixin").unwrap() {
                n_gained += 1;
            }
        }

        let freq_lost = n_lost as f64 / n_trials as f64;
        let freq_gained = n_gained as f64 / n_trials as f64;
        assert!((freq_lost - prob_mut).abs() < 0.01, "lost {freq_lost}");
        assert!((freq_gained - prob_mut).abs() < 0.01, "gained {freq_gained}");
    }

    #[test]
    fn empty_drug_set_is_resisted() {
        let simple = Virus::new(0.5, 0.1).unwrap();
        assert!(simple.is_resistant_to_all(&BTreeSet::<String>::new()).unwrap());
    }
}
